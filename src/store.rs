use crate::model::{Reservation, Room};
use crate::timeslot::TimeSlot;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::{sync::Notify, time};
use tracing::{debug, error, info, warn};

const SNAPSHOT_FILE: &str = "reservations.json";
const WAL_SUFFIX: &str = ".wal";
/// Delay to debounce snapshot writes.
const WRITE_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("reservation {0} does not exist")]
    MissingReservation(u64),

    #[error("slot overlaps existing reservation {0}")]
    Conflict(u64),

    #[error("writing journal: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding journal record: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// The reservation table image. This is also the snapshot file format.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Ledger {
    reservations: HashMap<u64, Reservation>,
}

/// One journal record, one JSON object per line in the WAL.
#[derive(Debug, Serialize, Deserialize)]
enum WalOp {
    Insert(Reservation),
    Remove { id: u64 },
}

impl WalOp {
    fn apply(self, ledger: &mut Ledger) {
        match self {
            WalOp::Insert(r) => {
                ledger.reservations.insert(r.id, r);
            }
            WalOp::Remove { id } => {
                ledger.reservations.remove(&id);
            }
        }
    }
}

/// File-backed reservation storage plus the immutable room catalog.
///
/// Mutations journal to a WAL line before touching the in-memory table, so a
/// failed append leaves the table unchanged. A background task debounces full
/// snapshots (tmp file + atomic rename under an exclusive file lock) and
/// truncates the WAL after each one.
pub struct BookingStore {
    rooms: HashMap<u32, Room>,
    ledger: Arc<RwLock<Ledger>>,
    wal: Arc<Mutex<std::fs::File>>,
    snapshot_path: PathBuf,
    write_notify: Arc<Notify>,
    pending: Arc<Mutex<bool>>,
}

impl BookingStore {
    /// Open the store: load the room catalog, the last snapshot and whatever
    /// the WAL has on top of it. Must be called inside a tokio runtime (the
    /// snapshot writer is a spawned task).
    pub fn open(rooms_file: impl AsRef<Path>, data_dir: impl AsRef<Path>) -> Result<Self> {
        let rooms = load_rooms(rooms_file.as_ref())?;

        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("creating data dir {}", data_dir.display()))?;
        let snapshot_path = data_dir.join(SNAPSHOT_FILE);
        let wal_path = wal_path_for(&snapshot_path);

        info!("Loading reservations from: {}", snapshot_path.display());
        let mut ledger: Ledger = match std::fs::read_to_string(&snapshot_path) {
            Ok(s) => serde_json::from_str(&s).context("parsing reservations snapshot")?,
            Err(_) => Ledger::default(),
        };

        let replayed = replay_wal(&wal_path, &mut ledger)?;

        let wal = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&wal_path)
            .with_context(|| format!("opening WAL {}", wal_path.display()))?;

        let store = Self {
            rooms,
            ledger: Arc::new(RwLock::new(ledger)),
            wal: Arc::new(Mutex::new(wal)),
            snapshot_path,
            write_notify: Arc::new(Notify::new()),
            pending: Arc::new(Mutex::new(false)),
        };

        if replayed > 0 {
            info!("Replayed {replayed} journal records, compacting");
            store.flush()?;
        }

        store.start_writer();
        Ok(store)
    }

    // ── Room catalog (read-only) ─────────────────────────────────

    pub fn room(&self, id: u32) -> Option<Room> {
        self.rooms.get(&id).cloned()
    }

    pub fn rooms(&self) -> Vec<Room> {
        let mut rooms: Vec<Room> = self.rooms.values().cloned().collect();
        rooms.sort_by_key(|r| r.id);
        rooms
    }

    // ── Reservation reads ────────────────────────────────────────

    pub fn reservation(&self, id: u64) -> Option<Reservation> {
        self.ledger.read().reservations.get(&id).cloned()
    }

    /// Reservations for `room_id` intersecting the candidate slot:
    /// `existing.start < slot.end && slot.start < existing.end`.
    pub fn overlapping(&self, room_id: u32, slot: &TimeSlot) -> Vec<Reservation> {
        let ledger = self.ledger.read();
        let mut hits: Vec<Reservation> = ledger
            .reservations
            .values()
            .filter(|r| r.room_id == room_id && span_of(r).overlaps(slot))
            .cloned()
            .collect();
        hits.sort_by_key(|r| r.start_time);
        hits
    }

    /// Reservations for a room that have not yet finished at `cutoff`,
    /// ascending by start.
    pub fn for_room_ending_after(&self, room_id: u32, cutoff: DateTime<Utc>) -> Vec<Reservation> {
        let ledger = self.ledger.read();
        let mut hits: Vec<Reservation> = ledger
            .reservations
            .values()
            .filter(|r| r.room_id == room_id && r.end_time >= cutoff)
            .cloned()
            .collect();
        hits.sort_by_key(|r| r.start_time);
        hits
    }

    pub fn for_user(&self, user_id: &str) -> Vec<Reservation> {
        let ledger = self.ledger.read();
        let mut hits: Vec<Reservation> = ledger
            .reservations
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        hits.sort_by_key(|r| r.start_time);
        hits
    }

    // ── Reservation writes ───────────────────────────────────────

    /// Insert a reservation unless it overlaps an existing one for the same
    /// room. The overlap scan, id assignment and insert all happen under one
    /// exclusive lock, so a success here is the authoritative non-conflict
    /// verdict; two racing requests cannot both pass.
    pub fn insert_if_vacant(
        &self,
        room_id: u32,
        user_id: &str,
        slot: TimeSlot,
        created_at: DateTime<Utc>,
    ) -> Result<Reservation, StoreError> {
        let mut ledger = self.ledger.write();

        if let Some(existing) = ledger
            .reservations
            .values()
            .find(|r| r.room_id == room_id && span_of(r).overlaps(&slot))
        {
            return Err(StoreError::Conflict(existing.id));
        }

        let mut id: u64 = rand::random();
        while ledger.reservations.contains_key(&id) {
            id = rand::random();
        }

        let reservation = Reservation {
            id,
            room_id,
            user_id: user_id.to_string(),
            start_time: slot.start,
            end_time: slot.end,
            created_at,
        };

        self.append_wal(&WalOp::Insert(reservation.clone()))?;
        ledger.reservations.insert(id, reservation.clone());
        debug!("Inserted reservation {id} for room {room_id}");

        self.schedule_snapshot();
        Ok(reservation)
    }

    pub fn remove(&self, id: u64) -> Result<Reservation, StoreError> {
        let mut ledger = self.ledger.write();

        let Some(reservation) = ledger.reservations.get(&id).cloned() else {
            return Err(StoreError::MissingReservation(id));
        };

        self.append_wal(&WalOp::Remove { id })?;
        ledger.reservations.remove(&id);
        debug!("Removed reservation {id}");

        self.schedule_snapshot();
        Ok(reservation)
    }

    /// Force a snapshot now, synchronously.
    pub fn flush(&self) -> Result<()> {
        write_snapshot(&self.ledger, &self.wal, &self.snapshot_path)
    }

    // ── Internals ────────────────────────────────────────────────

    fn append_wal(&self, op: &WalOp) -> Result<(), StoreError> {
        let line = serde_json::to_string(op)?;
        let mut wal = self.wal.lock();
        writeln!(wal, "{line}")?;
        Ok(())
    }

    fn schedule_snapshot(&self) {
        *self.pending.lock() = true;
        self.write_notify.notify_one();
    }

    fn start_writer(&self) {
        let ledger = self.ledger.clone();
        let wal = self.wal.clone();
        let path = self.snapshot_path.clone();
        let notify = self.write_notify.clone();
        let pending = self.pending.clone();

        tokio::spawn(async move {
            loop {
                notify.notified().await;
                // debounce
                time::sleep(WRITE_DELAY).await;

                let do_write = std::mem::take(&mut *pending.lock());
                if !do_write {
                    continue;
                }

                if let Err(e) = write_snapshot(&ledger, &wal, &path) {
                    error!("Snapshot write failed: {e:#}");
                }
            }
        });
    }
}

fn span_of(r: &Reservation) -> TimeSlot {
    TimeSlot {
        start: r.start_time,
        end: r.end_time,
    }
}

fn wal_path_for(snapshot_path: &Path) -> PathBuf {
    let mut name = snapshot_path.as_os_str().to_owned();
    name.push(WAL_SUFFIX);
    PathBuf::from(name)
}

fn load_rooms(path: &Path) -> Result<HashMap<u32, Room>> {
    info!("Loading rooms from: {}", path.display());
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading rooms config {}", path.display()))?;
    let rooms: HashMap<u32, Room> =
        serde_json::from_str(&content).context("parsing rooms config")?;
    for (id, room) in &rooms {
        if *id != room.id {
            return Err(anyhow!(
                "rooms config: entry {id} declares mismatched id {}",
                room.id
            ));
        }
    }
    Ok(rooms)
}

fn replay_wal(wal_path: &Path, ledger: &mut Ledger) -> Result<usize> {
    let Ok(content) = std::fs::read_to_string(wal_path) else {
        return Ok(0);
    };

    let mut replayed = 0;
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<WalOp>(line) {
            Ok(op) => {
                op.apply(ledger);
                replayed += 1;
            }
            Err(e) => {
                // A torn tail from an interrupted append; everything before
                // it already applied.
                warn!("Discarding malformed journal tail: {e}");
                break;
            }
        }
    }
    Ok(replayed)
}

/// Serialize the table and swap it in atomically, then truncate the WAL.
/// Holds the table write lock so no operation can slip between the snapshot
/// and the truncation.
fn write_snapshot(
    ledger: &RwLock<Ledger>,
    wal: &Mutex<std::fs::File>,
    snapshot_path: &Path,
) -> Result<()> {
    let guard = ledger.write();
    let json = serde_json::to_string_pretty(&*guard)?;
    let wal_guard = wal.lock();

    // Exclusive lock on the snapshot file while replacing it.
    let lock_file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(snapshot_path)
        .with_context(|| format!("opening snapshot {}", snapshot_path.display()))?;
    fs2::FileExt::lock_exclusive(&lock_file).context("locking snapshot file")?;

    let tmp = snapshot_path.with_extension("tmp");
    std::fs::write(&tmp, &json).context("writing snapshot temp file")?;
    std::fs::rename(&tmp, snapshot_path).context("atomic rename")?;

    wal_guard.set_len(0).context("truncating WAL")?;

    drop(lock_file);
    Ok(())
}

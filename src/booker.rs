use crate::error::AppError;
use crate::model::{Reservation, Room};
use crate::store::{BookingStore, StoreError};
use crate::timeslot::TimeSlot;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::path::Path;
use tracing::info;

/// The booking core. Wraps the store and enforces the rules that make a
/// request bookable: a well-formed future time window, an existing room, no
/// overlap with an existing reservation, and owner-only deletion.
pub struct BookingApp {
    store: BookingStore,
}

impl BookingApp {
    pub fn open(rooms_file: impl AsRef<Path>, data_dir: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            store: BookingStore::open(rooms_file, data_dir)?,
        })
    }

    pub fn rooms(&self) -> Vec<Room> {
        self.store.rooms()
    }

    pub fn room(&self, room_id: u32) -> Result<Room, AppError> {
        self.store.room(room_id).ok_or(AppError::NotFound("Room"))
    }

    /// Reservations for a room that have not yet finished, ascending by
    /// start time.
    pub fn room_schedule(
        &self,
        room_id: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<Reservation>, AppError> {
        self.room(room_id)?;
        Ok(self.store.for_room_ending_after(room_id, now))
    }

    /// Create a reservation for `user_id`: validate the time window, check
    /// the room exists, then hand the candidate to the store, whose insert
    /// is the authoritative overlap check.
    pub fn create_reservation(
        &self,
        room_id: u32,
        user_id: &str,
        date: &str,
        time: &str,
        duration_minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<Reservation, AppError> {
        let slot = TimeSlot::from_request(date, time, duration_minutes, now)?;
        self.room(room_id)?;

        let reservation = self
            .store
            .insert_if_vacant(room_id, user_id, slot, now)
            .map_err(store_err)?;
        info!(
            "Created reservation {} for room {} [{} - {})",
            reservation.id, room_id, reservation.start_time, reservation.end_time
        );
        Ok(reservation)
    }

    /// Delete a reservation, owner only. A reservation either exists and
    /// belongs to the requester (deleted), exists and does not (rejected,
    /// unchanged), or does not exist.
    pub fn delete_reservation(&self, reservation_id: u64, user_id: &str) -> Result<(), AppError> {
        let Some(reservation) = self.store.reservation(reservation_id) else {
            return Err(AppError::NotFound("Reservation"));
        };
        if reservation.user_id != user_id {
            return Err(AppError::Forbidden);
        }

        self.store.remove(reservation_id).map_err(store_err)?;
        info!("Deleted reservation {reservation_id}");
        Ok(())
    }

    /// All of a user's reservations with the room attached, ascending by
    /// start time. A room that has since left the catalog still renders,
    /// through the display-name fallback.
    pub fn user_reservations(&self, user_id: &str) -> Vec<(Reservation, Room)> {
        self.store
            .for_user(user_id)
            .into_iter()
            .map(|r| {
                let room = self.store.room(r.room_id).unwrap_or(Room {
                    id: r.room_id,
                    name: None,
                    description: None,
                    capacity: None,
                });
                (r, room)
            })
            .collect()
    }
}

fn store_err(e: StoreError) -> AppError {
    match e {
        StoreError::Conflict(_) => AppError::SlotConflict,
        StoreError::MissingReservation(_) => AppError::NotFound("Reservation"),
        other => AppError::Persistence(other.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::path::PathBuf;

    fn at(h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2031, 1, 20, h, mi, 0).unwrap()
    }

    fn open_app() -> BookingApp {
        let dir = std::env::temp_dir().join(format!("roombook-booker-{}", rand::random::<u64>()));
        std::fs::create_dir_all(&dir).unwrap();
        let rooms: PathBuf = dir.join("rooms.json");
        std::fs::write(
            &rooms,
            r#"{ "1": { "id": 1, "name": "Atrium", "description": null, "capacity": 4 } }"#,
        )
        .unwrap();
        BookingApp::open(rooms, dir.join("data")).unwrap()
    }

    #[tokio::test]
    async fn booked_slot_rejects_overlap_but_not_adjacency() {
        let app = open_app();
        let now = at(9, 0);
        app.create_reservation(1, "user-a", "2031-01-20", "10:00", 60, now)
            .unwrap();

        // Same window again: conflict.
        let err = app
            .create_reservation(1, "user-b", "2031-01-20", "10:00", 60, now)
            .unwrap_err();
        assert!(matches!(err, AppError::SlotConflict));

        // Starting exactly when the other ends: fine.
        app.create_reservation(1, "user-b", "2031-01-20", "11:00", 30, now)
            .unwrap();
    }

    #[tokio::test]
    async fn validation_failures_never_reach_the_store() {
        let app = open_app();
        let now = at(9, 0);

        let err = app
            .create_reservation(1, "user-a", "2031-01-20", "10:00", 45, now)
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidDuration));

        let err = app
            .create_reservation(1, "user-a", "1990-01-01", "10:00", 60, now)
            .unwrap_err();
        assert!(matches!(err, AppError::PastReservation));

        assert!(app.room_schedule(1, now).unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_room_is_not_found() {
        let app = open_app();
        let err = app
            .create_reservation(9, "user-a", "2031-01-20", "10:00", 60, at(9, 0))
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound("Room")));
        assert!(matches!(
            app.room_schedule(9, at(9, 0)).unwrap_err(),
            AppError::NotFound("Room")
        ));
    }

    #[tokio::test]
    async fn deletion_is_owner_only() {
        let app = open_app();
        let now = at(9, 0);
        let reservation = app
            .create_reservation(1, "user-a", "2031-01-20", "10:00", 60, now)
            .unwrap();

        // Someone else: rejected, reservation untouched.
        let err = app.delete_reservation(reservation.id, "user-b").unwrap_err();
        assert!(matches!(err, AppError::Forbidden));
        assert_eq!(app.room_schedule(1, now).unwrap().len(), 1);

        // The owner: gone, and a second attempt no longer finds it.
        app.delete_reservation(reservation.id, "user-a").unwrap();
        assert!(app.room_schedule(1, now).unwrap().is_empty());
        let err = app.delete_reservation(reservation.id, "user-a").unwrap_err();
        assert!(matches!(err, AppError::NotFound("Reservation")));
    }

    #[tokio::test]
    async fn deleting_an_unknown_id_is_not_found() {
        let app = open_app();
        let err = app.delete_reservation(123, "user-a").unwrap_err();
        assert!(matches!(err, AppError::NotFound("Reservation")));
    }

    #[tokio::test]
    async fn user_listing_embeds_the_room() {
        let app = open_app();
        let now = at(9, 0);
        app.create_reservation(1, "user-a", "2031-01-20", "10:00", 60, now)
            .unwrap();
        let mine = app.user_reservations("user-a");
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].1.display_name(), "Atrium");
        assert!(app.user_reservations("user-b").is_empty());
    }
}

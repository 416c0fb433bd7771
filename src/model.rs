use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A bookable room. Rooms come from the config file and are immutable at
/// runtime; there is no endpoint that creates or edits them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Room {
    pub id: u32,
    pub name: Option<String>,
    pub description: Option<String>,
    pub capacity: Option<u32>,
}

impl Room {
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("Room {}", self.id),
        }
    }

    pub fn capacity_label(&self) -> Option<String> {
        self.capacity.map(|c| {
            if c == 1 {
                "1 person".to_string()
            } else {
                format!("{c} people")
            }
        })
    }
}

/// One booked slot: `[start_time, end_time)`, owned by a single user.
/// Never mutated in place; it is created once and possibly deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: u64,
    pub room_id: u32,
    pub user_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

//! Types for the home-inventory records.

use chrono::{DateTime, NaiveDate, Utc};
use std::path::Path;
use uuid::Uuid;

/// Upload directory for room photos, relative to the media root.
pub const ROOM_PHOTO_UPLOAD_TO: &str = "room_photos/";

/// Display name given to locations that predate the `name` column.
pub const DEFAULT_LOCATION_NAME: &str = "Home";

#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub id: Uuid,
    pub name: String,
    pub address: Option<String>,
    pub date_created: DateTime<Utc>,
    pub date_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Room {
    pub id: Uuid,
    pub location_id: Uuid,
    pub name: String,
    pub date_created: DateTime<Utc>,
    pub date_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoomPhoto {
    pub id: Uuid,
    pub room_id: Uuid,
    pub image: String,
    pub caption: Option<String>,
    pub date_taken: NaiveDate,
    pub date_created: DateTime<Utc>,
    pub date_updated: DateTime<Utc>,
    pub date_deleted: Option<DateTime<Utc>>,
}

impl RoomPhoto {
    pub fn is_deleted(&self) -> bool {
        self.date_deleted.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub id: i64,
    pub name: String,
}

/// A `(app_label, model)` pair that generic references use as a type tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    pub id: i64,
    pub app_label: String,
    pub model: String,
}

impl ContentType {
    pub fn table(&self) -> String {
        format!("{}_{}", self.app_label, self.model)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub date_scheduled: DateTime<Utc>,
    pub content_type_id: i64,
    pub object_id: Uuid,
}

/// Fields supplied by the caller when creating a task.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub name: String,
    pub description: String,
    pub date_scheduled: DateTime<Utc>,
    pub content_type_id: i64,
    pub object_id: Uuid,
}

/// Stored image path for an uploaded file name. Any directory part of the
/// name is dropped; names with no file part at all (`""`, `..`) give `None`.
pub fn photo_upload_path(filename: &str) -> Option<String> {
    let base = Path::new(filename).file_name()?;
    Some(format!("{}{}", ROOM_PHOTO_UPLOAD_TO, base.to_string_lossy()))
}

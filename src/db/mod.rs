mod home;
mod recorder;
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

pub use home::{
    photo_upload_path, ContentType, Group, Location, NewTask, Room, RoomPhoto, Task, DEFAULT_LOCATION_NAME,
    ROOM_PHOTO_UPLOAD_TO,
};
pub use recorder::{AppliedMigration, ColumnInfo, RECORDER_TABLE};

use crate::config::DatabaseConfig;
#[cfg(feature = "postgres")]
use crate::config::DatabaseType;
use crate::migrations::MigrationKey;
use crate::schema::{Dialect, ModelRef};

macro_rules! dispatch {
    // No arguments beyond self
    ($self:expr, $method:ident()) => {
        match &$self.inner {
            DatabaseInner::Sqlite(db) => db.$method(),
            #[cfg(feature = "postgres")]
            DatabaseInner::Postgres(db) => db.$method(),
        }
    };
    // With arguments
    ($self:expr, $method:ident($($arg:expr),+ $(,)?)) => {
        match &$self.inner {
            DatabaseInner::Sqlite(db) => db.$method($($arg),+),
            #[cfg(feature = "postgres")]
            DatabaseInner::Postgres(db) => db.$method($($arg),+),
        }
    };
}

enum DatabaseInner {
    Sqlite(sqlite::SqliteDb),
    #[cfg(feature = "postgres")]
    Postgres(postgres::PgDb),
}

pub struct Database {
    inner: DatabaseInner,
}

impl Database {
    /// Open a database connection based on the provided configuration.
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        #[cfg(feature = "postgres")]
        {
            if config.backend == DatabaseType::Postgresql {
                let url = config.postgresql_url.as_deref()
                    .ok_or_else(|| anyhow::anyhow!("PostgreSQL URL not configured"))?;
                let mut pg = postgres::PgDb::open(url, config.pool_size)?;
                pg.set_log_sql(config.log_sql);
                return Ok(Self { inner: DatabaseInner::Postgres(pg) });
            }
        }

        let mut db = sqlite::SqliteDb::open(&config.sqlite_path)?;
        db.set_log_sql(config.log_sql);
        Ok(Self { inner: DatabaseInner::Sqlite(db) })
    }

    /// Fresh in-memory SQLite store.
    pub fn open_in_memory() -> Result<Self> {
        let db = sqlite::SqliteDb::open_in_memory()?;
        Ok(Self { inner: DatabaseInner::Sqlite(db) })
    }

    pub fn dialect(&self) -> Dialect {
        match &self.inner {
            DatabaseInner::Sqlite(_) => Dialect::Sqlite,
            #[cfg(feature = "postgres")]
            DatabaseInner::Postgres(_) => Dialect::Postgres,
        }
    }

    #[cfg(test)]
    pub(crate) fn sqlite(&self) -> &sqlite::SqliteDb {
        match &self.inner {
            DatabaseInner::Sqlite(db) => db,
            #[cfg(feature = "postgres")]
            DatabaseInner::Postgres(_) => panic!("not a SQLite database"),
        }
    }

    // ========================================================================
    // Migration recorder
    // ========================================================================

    pub fn ensure_recorder(&self) -> Result<()> {
        dispatch!(self, ensure_recorder())
    }

    pub fn applied_migrations(&self) -> Result<Vec<AppliedMigration>> {
        dispatch!(self, applied_migrations())
    }

    pub fn apply_unit(&self, key: &MigrationKey, checksum: &str, statements: &[String]) -> Result<()> {
        dispatch!(self, apply_unit(key, checksum, statements))
    }

    pub fn unapply_unit(&self, key: &MigrationKey, statements: &[String]) -> Result<()> {
        dispatch!(self, unapply_unit(key, statements))
    }

    pub fn sync_content_types(&self, models: &[ModelRef]) -> Result<usize> {
        dispatch!(self, sync_content_types(models))
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    pub fn table_names(&self) -> Result<Vec<String>> {
        dispatch!(self, table_names())
    }

    pub fn table_exists(&self, table: &str) -> Result<bool> {
        dispatch!(self, table_exists(table))
    }

    pub fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        dispatch!(self, columns(table))
    }

    pub fn index_names(&self, table: &str) -> Result<Vec<String>> {
        dispatch!(self, index_names(table))
    }

    // ========================================================================
    // Locations and rooms
    // ========================================================================

    pub fn create_location(&self, name: &str, address: Option<&str>) -> Result<Location> {
        dispatch!(self, create_location(name, address))
    }

    pub fn get_location(&self, id: Uuid) -> Result<Option<Location>> {
        dispatch!(self, get_location(id))
    }

    pub fn update_location(&self, id: Uuid, name: &str, address: Option<&str>) -> Result<bool> {
        dispatch!(self, update_location(id, name, address))
    }

    pub fn delete_location(&self, id: Uuid) -> Result<bool> {
        dispatch!(self, delete_location(id))
    }

    pub fn create_room(&self, location_id: Uuid, name: &str) -> Result<Room> {
        dispatch!(self, create_room(location_id, name))
    }

    pub fn delete_room(&self, id: Uuid) -> Result<bool> {
        dispatch!(self, delete_room(id))
    }

    // ========================================================================
    // Room photos
    // ========================================================================

    pub fn add_room_photo(
        &self,
        room_id: Uuid,
        filename: &str,
        caption: Option<&str>,
        date_taken: NaiveDate,
    ) -> Result<RoomPhoto> {
        dispatch!(self, add_room_photo(room_id, filename, caption, date_taken))
    }

    pub fn get_room_photo(&self, id: Uuid) -> Result<Option<RoomPhoto>> {
        dispatch!(self, get_room_photo(id))
    }

    pub fn update_room_photo_caption(&self, id: Uuid, caption: Option<&str>) -> Result<bool> {
        dispatch!(self, update_room_photo_caption(id, caption))
    }

    pub fn soft_delete_room_photo(&self, id: Uuid) -> Result<bool> {
        dispatch!(self, soft_delete_room_photo(id))
    }

    pub fn room_photos(&self, room_id: Uuid, include_deleted: bool) -> Result<Vec<RoomPhoto>> {
        dispatch!(self, room_photos(room_id, include_deleted))
    }

    pub fn count_room_photos(&self) -> Result<i64> {
        dispatch!(self, count_room_photos())
    }

    // ========================================================================
    // Groups and location ownership
    // ========================================================================

    pub fn create_group(&self, name: &str) -> Result<Group> {
        dispatch!(self, create_group(name))
    }

    pub fn add_location_owner(&self, location_id: Uuid, group_id: i64) -> Result<bool> {
        dispatch!(self, add_location_owner(location_id, group_id))
    }

    pub fn remove_location_owner(&self, location_id: Uuid, group_id: i64) -> Result<bool> {
        dispatch!(self, remove_location_owner(location_id, group_id))
    }

    pub fn location_owners(&self, location_id: Uuid) -> Result<Vec<Group>> {
        dispatch!(self, location_owners(location_id))
    }

    pub fn owned_locations(&self, group_id: i64) -> Result<Vec<Location>> {
        dispatch!(self, owned_locations(group_id))
    }

    // ========================================================================
    // Content types and tasks
    // ========================================================================

    pub fn content_type(&self, app_label: &str, model: &str) -> Result<Option<ContentType>> {
        dispatch!(self, content_type(app_label, model))
    }

    pub fn create_task(&self, task: &NewTask) -> Result<Task> {
        dispatch!(self, create_task(task))
    }

    pub fn get_task(&self, id: Uuid) -> Result<Option<Task>> {
        dispatch!(self, get_task(id))
    }

    pub fn update_task(&self, task: &Task) -> Result<bool> {
        dispatch!(self, update_task(task))
    }

    pub fn delete_task(&self, id: Uuid) -> Result<bool> {
        dispatch!(self, delete_task(id))
    }

    pub fn tasks_for_target(&self, content_type_id: i64, object_id: Uuid) -> Result<Vec<Task>> {
        dispatch!(self, tasks_for_target(content_type_id, object_id))
    }

    pub fn tasks_scheduled_before(&self, until: DateTime<Utc>) -> Result<Vec<Task>> {
        dispatch!(self, tasks_scheduled_before(until))
    }

    pub fn generic_target_exists(&self, content_type: &ContentType, object_id: Uuid) -> Result<bool> {
        dispatch!(self, generic_target_exists(content_type, object_id))
    }
}

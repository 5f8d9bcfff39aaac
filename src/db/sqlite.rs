//! SQLite backend implementation.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

use super::home::{photo_upload_path, ContentType, Group, Location, NewTask, Room, RoomPhoto, Task};
use super::recorder::{AppliedMigration, ColumnInfo, RECORDER_TABLE};
use crate::error::MigrationError;
use crate::migrations::MigrationKey;
use crate::schema::ModelRef;

pub struct SqliteDb {
    pub(crate) conn: Connection,
    log_sql: bool,
}

/// Read a UUID stored as hyphenated text.
fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let text: String = row.get(idx)?;
    Uuid::parse_str(&text).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_location(row: &Row<'_>) -> rusqlite::Result<Location> {
    Ok(Location {
        id: uuid_at(row, 0)?,
        name: row.get(1)?,
        address: row.get(2)?,
        date_created: row.get(3)?,
        date_updated: row.get(4)?,
    })
}

fn row_to_room_photo(row: &Row<'_>) -> rusqlite::Result<RoomPhoto> {
    Ok(RoomPhoto {
        id: uuid_at(row, 0)?,
        room_id: uuid_at(row, 1)?,
        image: row.get(2)?,
        caption: row.get(3)?,
        date_taken: row.get(4)?,
        date_created: row.get(5)?,
        date_updated: row.get(6)?,
        date_deleted: row.get(7)?,
    })
}

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: uuid_at(row, 0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        date_scheduled: row.get(3)?,
        content_type_id: row.get(4)?,
        object_id: uuid_at(row, 5)?,
    })
}

const LOCATION_COLUMNS: &str = "l.id, l.name, l.address, l.date_created, l.date_updated";
const ROOM_PHOTO_COLUMNS: &str =
    "id, room_id, image, caption, date_taken, date_created, date_updated, date_deleted";
const TASK_COLUMNS: &str = "id, name, description, date_scheduled, content_type_id, object_id";

impl SqliteDb {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database: {}", path.display()))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self { conn, log_sql: false })
    }

    pub fn set_log_sql(&mut self, log_sql: bool) {
        self.log_sql = log_sql;
    }

    // ========================================================================
    // Migration recorder
    // ========================================================================

    pub fn ensure_recorder(&self) -> Result<()> {
        self.conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{RECORDER_TABLE}" (
                "id" integer NOT NULL PRIMARY KEY AUTOINCREMENT,
                "app" varchar(255) NOT NULL,
                "name" varchar(255) NOT NULL,
                "checksum" varchar(64) NOT NULL,
                "applied" datetime NOT NULL,
                UNIQUE ("app", "name")
            );
            "#
        ))?;
        Ok(())
    }

    pub fn applied_migrations(&self) -> Result<Vec<AppliedMigration>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT app, name, checksum, applied FROM \"{RECORDER_TABLE}\" ORDER BY id"
        ))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(AppliedMigration {
                    key: MigrationKey::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?),
                    checksum: row.get(2)?,
                    applied: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Run a unit's statements and record it, all or nothing.
    pub fn apply_unit(&self, key: &MigrationKey, checksum: &str, statements: &[String]) -> Result<()> {
        self.run_unit(statements, |conn| {
            conn.execute(
                &format!("INSERT INTO \"{RECORDER_TABLE}\" (app, name, checksum, applied) VALUES (?1, ?2, ?3, ?4)"),
                params![key.app, key.name, checksum, Utc::now()],
            )?;
            Ok(())
        })
    }

    /// Run a unit's reverse statements and drop its record, all or nothing.
    pub fn unapply_unit(&self, key: &MigrationKey, statements: &[String]) -> Result<()> {
        self.run_unit(statements, |conn| {
            conn.execute(
                &format!("DELETE FROM \"{RECORDER_TABLE}\" WHERE app = ?1 AND name = ?2"),
                params![key.app, key.name],
            )?;
            Ok(())
        })
    }

    /// Foreign keys are off while a unit runs so that table remakes do not
    /// cascade; integrity is checked once, before commit.
    fn run_unit<F>(&self, statements: &[String], record: F) -> Result<()>
    where
        F: FnOnce(&Connection) -> Result<()>,
    {
        self.conn.execute_batch("PRAGMA foreign_keys = OFF;")?;
        let result = self.run_in_transaction(statements, record);
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        result
    }

    fn run_in_transaction<F>(&self, statements: &[String], record: F) -> Result<()>
    where
        F: FnOnce(&Connection) -> Result<()>,
    {
        // Dropped without commit on any error, which rolls back.
        let tx = self.conn.unchecked_transaction()?;
        self.run_statements(&tx, statements)?;
        Self::check_foreign_keys(&tx)?;
        record(&tx)?;
        tx.commit()?;
        Ok(())
    }

    fn run_statements(&self, conn: &Connection, statements: &[String]) -> Result<()> {
        for sql in statements {
            if self.log_sql {
                info!("{}", sql);
            } else {
                debug!("{}", sql);
            }
            conn.execute_batch(sql)
                .with_context(|| format!("Failed to execute: {}", sql))?;
        }
        Ok(())
    }

    fn check_foreign_keys(conn: &Connection) -> Result<()> {
        let violation = conn
            .query_row("PRAGMA foreign_key_check", [], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<i64>>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .optional()?;
        match violation {
            Some((table, rowid, parent)) => Err(MigrationError::ForeignKeyViolation {
                table,
                rowid: rowid.unwrap_or_default(),
                parent,
            }
            .into()),
            None => Ok(()),
        }
    }

    /// Register every model as a content type; returns how many were new.
    pub fn sync_content_types(&self, models: &[ModelRef]) -> Result<usize> {
        if !self.table_exists("contenttypes_contenttype")? {
            return Ok(0);
        }
        let mut inserted = 0;
        for model in models {
            inserted += self.conn.execute(
                "INSERT OR IGNORE INTO contenttypes_contenttype (app_label, model) VALUES (?1, ?2)",
                params![model.app, model.model],
            )?;
        }
        Ok(inserted)
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    pub fn table_names(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names)
    }

    pub fn table_exists(&self, table: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?1) ORDER BY cid")?;
        let columns = stmt
            .query_map([table], |row| {
                Ok(ColumnInfo {
                    name: row.get(0)?,
                    data_type: row.get(1)?,
                    not_null: row.get::<_, i64>(2)? != 0,
                    default: row.get(3)?,
                    primary_key: row.get::<_, i64>(4)? != 0,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(columns)
    }

    pub fn index_names(&self, table: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = ?1 AND sql IS NOT NULL ORDER BY name",
        )?;
        let names = stmt
            .query_map([table], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names)
    }

    // ========================================================================
    // Locations and rooms
    // ========================================================================

    pub fn create_location(&self, name: &str, address: Option<&str>) -> Result<Location> {
        let now = Utc::now();
        let id = Uuid::new_v4();
        self.conn.execute(
            "INSERT INTO core_location (id, name, address, date_created, date_updated) VALUES (?1, ?2, ?3, ?4, ?4)",
            params![id.to_string(), name, address, now],
        )?;
        Ok(Location {
            id,
            name: name.to_string(),
            address: address.map(str::to_string),
            date_created: now,
            date_updated: now,
        })
    }

    pub fn get_location(&self, id: Uuid) -> Result<Option<Location>> {
        let location = self
            .conn
            .query_row(
                &format!("SELECT {LOCATION_COLUMNS} FROM core_location l WHERE l.id = ?1"),
                [id.to_string()],
                row_to_location,
            )
            .optional()?;
        Ok(location)
    }

    /// Rename a location and replace its address; `None` clears it.
    pub fn update_location(&self, id: Uuid, name: &str, address: Option<&str>) -> Result<bool> {
        let updated = self.conn.execute(
            "UPDATE core_location SET name = ?1, address = ?2, date_updated = ?3 WHERE id = ?4",
            params![name, address, Utc::now(), id.to_string()],
        )?;
        Ok(updated > 0)
    }

    /// Rooms, their photos and owner rows go with the location. Tasks that
    /// point at it are generic references and stay.
    pub fn delete_location(&self, id: Uuid) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM core_location WHERE id = ?1", [id.to_string()])?;
        Ok(deleted > 0)
    }

    pub fn create_room(&self, location_id: Uuid, name: &str) -> Result<Room> {
        let now = Utc::now();
        let id = Uuid::new_v4();
        self.conn.execute(
            "INSERT INTO core_room (id, date_created, date_updated, name, location_id) VALUES (?1, ?2, ?2, ?3, ?4)",
            params![id.to_string(), now, name, location_id.to_string()],
        )?;
        Ok(Room {
            id,
            location_id,
            name: name.to_string(),
            date_created: now,
            date_updated: now,
        })
    }

    /// Deleting a room removes its photos with it.
    pub fn delete_room(&self, id: Uuid) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM core_room WHERE id = ?1", [id.to_string()])?;
        Ok(deleted > 0)
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
        let now = Utc::now();
        let photo = RoomPhoto {
            id: Uuid::new_v4(),
            room_id,
            image: photo_upload_path(filename)
                .with_context(|| format!("Photo file name has no file component: {:?}", filename))?,
            caption: caption.map(str::to_string),
            date_taken,
            date_created: now,
            date_updated: now,
            date_deleted: None,
        };
        self.conn.execute(
            &format!("INSERT INTO core_roomphoto ({ROOM_PHOTO_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
            params![
                photo.id.to_string(),
                photo.room_id.to_string(),
                photo.image,
                photo.caption,
                photo.date_taken,
                photo.date_created,
                photo.date_updated,
                photo.date_deleted,
            ],
        )?;
        Ok(photo)
    }

    pub fn get_room_photo(&self, id: Uuid) -> Result<Option<RoomPhoto>> {
        let photo = self
            .conn
            .query_row(
                &format!("SELECT {ROOM_PHOTO_COLUMNS} FROM core_roomphoto WHERE id = ?1"),
                [id.to_string()],
                row_to_room_photo,
            )
            .optional()?;
        Ok(photo)
    }

    pub fn update_room_photo_caption(&self, id: Uuid, caption: Option<&str>) -> Result<bool> {
        let updated = self.conn.execute(
            "UPDATE core_roomphoto SET caption = ?1, date_updated = ?2 WHERE id = ?3",
            params![caption, Utc::now(), id.to_string()],
        )?;
        Ok(updated > 0)
    }

    /// Returns false if the photo does not exist or is already deleted.
    pub fn soft_delete_room_photo(&self, id: Uuid) -> Result<bool> {
        let now = Utc::now();
        let updated = self.conn.execute(
            "UPDATE core_roomphoto SET date_deleted = ?1, date_updated = ?1 WHERE id = ?2 AND date_deleted IS NULL",
            params![now, id.to_string()],
        )?;
        Ok(updated > 0)
    }

    pub fn room_photos(&self, room_id: Uuid, include_deleted: bool) -> Result<Vec<RoomPhoto>> {
        let filter = if include_deleted { "" } else { " AND date_deleted IS NULL" };
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ROOM_PHOTO_COLUMNS} FROM core_roomphoto WHERE room_id = ?1{filter} ORDER BY date_taken, date_created"
        ))?;
        let photos = stmt
            .query_map([room_id.to_string()], row_to_room_photo)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(photos)
    }

    pub fn count_room_photos(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM core_roomphoto", [], |row| row.get(0))?;
        Ok(count)
    }

    // ========================================================================
    // Groups and location ownership
    // ========================================================================

    pub fn create_group(&self, name: &str) -> Result<Group> {
        self.conn
            .execute("INSERT INTO auth_group (name) VALUES (?1)", [name])?;
        Ok(Group {
            id: self.conn.last_insert_rowid(),
            name: name.to_string(),
        })
    }

    /// Returns false when the group already owns the location.
    pub fn add_location_owner(&self, location_id: Uuid, group_id: i64) -> Result<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO core_location_owners (location_id, group_id) VALUES (?1, ?2)",
            params![location_id.to_string(), group_id],
        )?;
        Ok(inserted > 0)
    }

    pub fn remove_location_owner(&self, location_id: Uuid, group_id: i64) -> Result<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM core_location_owners WHERE location_id = ?1 AND group_id = ?2",
            params![location_id.to_string(), group_id],
        )?;
        Ok(deleted > 0)
    }

    pub fn location_owners(&self, location_id: Uuid) -> Result<Vec<Group>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT g.id, g.name
            FROM auth_group g
            JOIN core_location_owners o ON o.group_id = g.id
            WHERE o.location_id = ?1
            ORDER BY g.name
            "#,
        )?;
        let groups = stmt
            .query_map([location_id.to_string()], |row| {
                Ok(Group {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(groups)
    }

    pub fn owned_locations(&self, group_id: i64) -> Result<Vec<Location>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {LOCATION_COLUMNS}
            FROM core_location l
            JOIN core_location_owners o ON o.location_id = l.id
            WHERE o.group_id = ?1
            ORDER BY l.name
            "#
        ))?;
        let locations = stmt
            .query_map([group_id], row_to_location)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(locations)
    }

    // ========================================================================
    // Content types and tasks
    // ========================================================================

    pub fn content_type(&self, app_label: &str, model: &str) -> Result<Option<ContentType>> {
        let ct = self
            .conn
            .query_row(
                "SELECT id, app_label, model FROM contenttypes_contenttype WHERE app_label = ?1 AND model = ?2",
                params![app_label, model.to_lowercase()],
                |row| {
                    Ok(ContentType {
                        id: row.get(0)?,
                        app_label: row.get(1)?,
                        model: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(ct)
    }

    pub fn create_task(&self, task: &NewTask) -> Result<Task> {
        let id = Uuid::new_v4();
        self.conn.execute(
            &format!("INSERT INTO core_task ({TASK_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"),
            params![
                id.to_string(),
                task.name,
                task.description,
                task.date_scheduled,
                task.content_type_id,
                task.object_id.to_string(),
            ],
        )?;
        Ok(Task {
            id,
            name: task.name.clone(),
            description: task.description.clone(),
            date_scheduled: task.date_scheduled,
            content_type_id: task.content_type_id,
            object_id: task.object_id,
        })
    }

    pub fn get_task(&self, id: Uuid) -> Result<Option<Task>> {
        let task = self
            .conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM core_task WHERE id = ?1"),
                [id.to_string()],
                row_to_task,
            )
            .optional()?;
        Ok(task)
    }

    /// Write back a task's name, description and schedule. The target is fixed.
    pub fn update_task(&self, task: &Task) -> Result<bool> {
        let updated = self.conn.execute(
            "UPDATE core_task SET name = ?1, description = ?2, date_scheduled = ?3 WHERE id = ?4",
            params![task.name, task.description, task.date_scheduled, task.id.to_string()],
        )?;
        Ok(updated > 0)
    }

    pub fn delete_task(&self, id: Uuid) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM core_task WHERE id = ?1", [id.to_string()])?;
        Ok(deleted > 0)
    }

    pub fn tasks_for_target(&self, content_type_id: i64, object_id: Uuid) -> Result<Vec<Task>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM core_task WHERE content_type_id = ?1 AND object_id = ?2 ORDER BY date_scheduled"
        ))?;
        let tasks = stmt
            .query_map(params![content_type_id, object_id.to_string()], row_to_task)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tasks)
    }

    pub fn tasks_scheduled_before(&self, until: DateTime<Utc>) -> Result<Vec<Task>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM core_task WHERE date_scheduled <= ?1 ORDER BY date_scheduled"
        ))?;
        let tasks = stmt
            .query_map([until], row_to_task)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tasks)
    }

    /// Whether the row named by a generic reference exists. The table is
    /// derived from the content type and must be a real table.
    pub fn generic_target_exists(&self, content_type: &ContentType, object_id: Uuid) -> Result<bool> {
        let table = content_type.table();
        if !self.table_exists(&table)? {
            return Ok(false);
        }
        let found = self
            .conn
            .query_row(
                &format!("SELECT 1 FROM \"{}\" WHERE id = ?1", table.replace('"', "\"\"")),
                [object_id.to_string()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

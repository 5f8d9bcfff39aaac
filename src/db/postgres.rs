//! PostgreSQL backend implementation.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use postgres::{GenericClient, NoTls};
use r2d2::Pool;
use r2d2_postgres::PostgresConnectionManager;
use tracing::{debug, info};
use uuid::Uuid;

use super::home::{photo_upload_path, ContentType, Group, Location, NewTask, Room, RoomPhoto, Task};
use super::recorder::{AppliedMigration, ColumnInfo, RECORDER_TABLE};
use crate::migrations::MigrationKey;
use crate::schema::ModelRef;

pub struct PgDb {
    pool: Pool<PostgresConnectionManager<NoTls>>,
    log_sql: bool,
}

fn row_to_location(row: &postgres::Row) -> Location {
    Location {
        id: row.get(0),
        name: row.get(1),
        address: row.get(2),
        date_created: row.get(3),
        date_updated: row.get(4),
    }
}

fn row_to_room_photo(row: &postgres::Row) -> RoomPhoto {
    RoomPhoto {
        id: row.get(0),
        room_id: row.get(1),
        image: row.get(2),
        caption: row.get(3),
        date_taken: row.get(4),
        date_created: row.get(5),
        date_updated: row.get(6),
        date_deleted: row.get(7),
    }
}

fn row_to_task(row: &postgres::Row) -> Task {
    Task {
        id: row.get(0),
        name: row.get(1),
        description: row.get(2),
        date_scheduled: row.get(3),
        content_type_id: row.get(4),
        object_id: row.get(5),
    }
}

/// Recorder change written in the same transaction as a unit's statements.
enum Record<'a> {
    Applied { key: &'a MigrationKey, checksum: &'a str },
    Unapplied { key: &'a MigrationKey },
}

impl Record<'_> {
    fn write<C: GenericClient>(&self, client: &mut C) -> Result<()> {
        match self {
            Record::Applied { key, checksum } => {
                client.execute(
                    &format!("INSERT INTO \"{RECORDER_TABLE}\" (app, name, checksum, applied) VALUES ($1, $2, $3, $4)"),
                    &[&key.app, &key.name, checksum, &Utc::now()],
                )?;
            }
            Record::Unapplied { key } => {
                client.execute(
                    &format!("DELETE FROM \"{RECORDER_TABLE}\" WHERE app = $1 AND name = $2"),
                    &[&key.app, &key.name],
                )?;
            }
        }
        Ok(())
    }
}

const LOCATION_COLUMNS: &str = "l.id, l.name, l.address, l.date_created, l.date_updated";
const ROOM_PHOTO_COLUMNS: &str =
    "id, room_id, image, caption, date_taken, date_created, date_updated, date_deleted";
const TASK_COLUMNS: &str = "id, name, description, date_scheduled, content_type_id, object_id";

impl PgDb {
    pub fn open(url: &str, pool_size: u32) -> Result<Self> {
        let manager = PostgresConnectionManager::new(url.parse()?, NoTls);
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .context("Failed to create PostgreSQL connection pool")?;
        Ok(Self { pool, log_sql: false })
    }

    pub fn set_log_sql(&mut self, log_sql: bool) {
        self.log_sql = log_sql;
    }

    // ========================================================================
    // Migration recorder
    // ========================================================================

    pub fn ensure_recorder(&self) -> Result<()> {
        let mut client = self.pool.get()?;
        client.batch_execute(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{RECORDER_TABLE}" (
                "id" bigint NOT NULL PRIMARY KEY GENERATED BY DEFAULT AS IDENTITY,
                "app" varchar(255) NOT NULL,
                "name" varchar(255) NOT NULL,
                "checksum" varchar(64) NOT NULL,
                "applied" timestamp with time zone NOT NULL,
                UNIQUE ("app", "name")
            );
            "#
        ))?;
        Ok(())
    }

    pub fn applied_migrations(&self) -> Result<Vec<AppliedMigration>> {
        let mut client = self.pool.get()?;
        let rows = client.query(
            &format!("SELECT app, name, checksum, applied FROM \"{RECORDER_TABLE}\" ORDER BY id"),
            &[],
        )?;
        Ok(rows
            .iter()
            .map(|row| AppliedMigration {
                key: MigrationKey::new(row.get::<_, String>(0), row.get::<_, String>(1)),
                checksum: row.get(2),
                applied: row.get(3),
            })
            .collect())
    }

    pub fn apply_unit(&self, key: &MigrationKey, checksum: &str, statements: &[String]) -> Result<()> {
        self.run_unit(statements, &Record::Applied { key, checksum })
    }

    pub fn unapply_unit(&self, key: &MigrationKey, statements: &[String]) -> Result<()> {
        self.run_unit(statements, &Record::Unapplied { key })
    }

    /// Deferred foreign keys are checked when the transaction commits.
    fn run_unit(&self, statements: &[String], record: &Record<'_>) -> Result<()> {
        let mut client = self.pool.get()?;
        let mut tx = client.transaction()?;
        self.run_statements(&mut tx, statements)?;
        record.write(&mut tx)?;
        tx.commit().context("Failed to commit migration")?;
        Ok(())
    }

    fn run_statements<C: GenericClient>(&self, client: &mut C, statements: &[String]) -> Result<()> {
        for sql in statements {
            if self.log_sql {
                info!("{}", sql);
            } else {
                debug!("{}", sql);
            }
            client
                .batch_execute(sql)
                .with_context(|| format!("Failed to execute: {}", sql))?;
        }
        Ok(())
    }

    pub fn sync_content_types(&self, models: &[ModelRef]) -> Result<usize> {
        if !self.table_exists("contenttypes_contenttype")? {
            return Ok(0);
        }
        let mut client = self.pool.get()?;
        let mut inserted = 0;
        for model in models {
            inserted += client.execute(
                "INSERT INTO contenttypes_contenttype (app_label, model) VALUES ($1, $2) ON CONFLICT DO NOTHING",
                &[&model.app, &model.model],
            )? as usize;
        }
        Ok(inserted)
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    pub fn table_names(&self) -> Result<Vec<String>> {
        let mut client = self.pool.get()?;
        let rows = client.query(
            "SELECT table_name::text FROM information_schema.tables WHERE table_schema = current_schema() ORDER BY table_name",
            &[],
        )?;
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    pub fn table_exists(&self, table: &str) -> Result<bool> {
        let mut client = self.pool.get()?;
        let row = client.query_one(
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_schema = current_schema() AND table_name = $1)",
            &[&table],
        )?;
        Ok(row.get(0))
    }

    pub fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let mut client = self.pool.get()?;
        let rows = client.query(
            r#"
            SELECT c.column_name::text, c.data_type::text, c.is_nullable = 'NO', c.column_default::text,
                   EXISTS (
                       SELECT 1 FROM information_schema.table_constraints tc
                       JOIN information_schema.key_column_usage k
                         ON k.constraint_name = tc.constraint_name AND k.table_name = tc.table_name
                       WHERE tc.table_name = c.table_name
                         AND tc.constraint_type = 'PRIMARY KEY'
                         AND k.column_name = c.column_name
                   )
            FROM information_schema.columns c
            WHERE c.table_schema = current_schema() AND c.table_name = $1
            ORDER BY c.ordinal_position
            "#,
            &[&table],
        )?;
        Ok(rows
            .iter()
            .map(|row| ColumnInfo {
                name: row.get(0),
                data_type: row.get(1),
                not_null: row.get(2),
                default: row.get(3),
                primary_key: row.get(4),
            })
            .collect())
    }

    pub fn index_names(&self, table: &str) -> Result<Vec<String>> {
        let mut client = self.pool.get()?;
        let rows = client.query(
            "SELECT indexname::text FROM pg_indexes WHERE schemaname = current_schema() AND tablename = $1 ORDER BY indexname",
            &[&table],
        )?;
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    // ========================================================================
    // Locations and rooms
    // ========================================================================

    pub fn create_location(&self, name: &str, address: Option<&str>) -> Result<Location> {
        let mut client = self.pool.get()?;
        let now = Utc::now();
        let id = Uuid::new_v4();
        client.execute(
            "INSERT INTO core_location (id, name, address, date_created, date_updated) VALUES ($1, $2, $3, $4, $4)",
            &[&id, &name, &address, &now],
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
        let mut client = self.pool.get()?;
        let row = client.query_opt(
            &format!("SELECT {LOCATION_COLUMNS} FROM core_location l WHERE l.id = $1"),
            &[&id],
        )?;
        Ok(row.as_ref().map(row_to_location))
    }

    pub fn update_location(&self, id: Uuid, name: &str, address: Option<&str>) -> Result<bool> {
        let mut client = self.pool.get()?;
        let updated = client.execute(
            "UPDATE core_location SET name = $1, address = $2, date_updated = $3 WHERE id = $4",
            &[&name, &address, &Utc::now(), &id],
        )?;
        Ok(updated > 0)
    }

    pub fn delete_location(&self, id: Uuid) -> Result<bool> {
        let mut client = self.pool.get()?;
        let deleted = client.execute("DELETE FROM core_location WHERE id = $1", &[&id])?;
        Ok(deleted > 0)
    }

    pub fn create_room(&self, location_id: Uuid, name: &str) -> Result<Room> {
        let mut client = self.pool.get()?;
        let now = Utc::now();
        let id = Uuid::new_v4();
        client.execute(
            "INSERT INTO core_room (id, date_created, date_updated, name, location_id) VALUES ($1, $2, $2, $3, $4)",
            &[&id, &now, &name, &location_id],
        )?;
        Ok(Room {
            id,
            location_id,
            name: name.to_string(),
            date_created: now,
            date_updated: now,
        })
    }

    pub fn delete_room(&self, id: Uuid) -> Result<bool> {
        let mut client = self.pool.get()?;
        let deleted = client.execute("DELETE FROM core_room WHERE id = $1", &[&id])?;
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
        let mut client = self.pool.get()?;
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
        client.execute(
            &format!("INSERT INTO core_roomphoto ({ROOM_PHOTO_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"),
            &[
                &photo.id,
                &photo.room_id,
                &photo.image,
                &photo.caption,
                &photo.date_taken,
                &photo.date_created,
                &photo.date_updated,
                &photo.date_deleted,
            ],
        )?;
        Ok(photo)
    }

    pub fn get_room_photo(&self, id: Uuid) -> Result<Option<RoomPhoto>> {
        let mut client = self.pool.get()?;
        let row = client.query_opt(
            &format!("SELECT {ROOM_PHOTO_COLUMNS} FROM core_roomphoto WHERE id = $1"),
            &[&id],
        )?;
        Ok(row.as_ref().map(row_to_room_photo))
    }

    pub fn update_room_photo_caption(&self, id: Uuid, caption: Option<&str>) -> Result<bool> {
        let mut client = self.pool.get()?;
        let updated = client.execute(
            "UPDATE core_roomphoto SET caption = $1, date_updated = $2 WHERE id = $3",
            &[&caption, &Utc::now(), &id],
        )?;
        Ok(updated > 0)
    }

    pub fn soft_delete_room_photo(&self, id: Uuid) -> Result<bool> {
        let mut client = self.pool.get()?;
        let updated = client.execute(
            "UPDATE core_roomphoto SET date_deleted = $1, date_updated = $1 WHERE id = $2 AND date_deleted IS NULL",
            &[&Utc::now(), &id],
        )?;
        Ok(updated > 0)
    }

    pub fn room_photos(&self, room_id: Uuid, include_deleted: bool) -> Result<Vec<RoomPhoto>> {
        let mut client = self.pool.get()?;
        let filter = if include_deleted { "" } else { " AND date_deleted IS NULL" };
        let rows = client.query(
            &format!(
                "SELECT {ROOM_PHOTO_COLUMNS} FROM core_roomphoto WHERE room_id = $1{filter} ORDER BY date_taken, date_created"
            ),
            &[&room_id],
        )?;
        Ok(rows.iter().map(row_to_room_photo).collect())
    }

    pub fn count_room_photos(&self) -> Result<i64> {
        let mut client = self.pool.get()?;
        let row = client.query_one("SELECT COUNT(*) FROM core_roomphoto", &[])?;
        Ok(row.get(0))
    }

    // ========================================================================
    // Groups and location ownership
    // ========================================================================

    pub fn create_group(&self, name: &str) -> Result<Group> {
        let mut client = self.pool.get()?;
        let row = client.query_one("INSERT INTO auth_group (name) VALUES ($1) RETURNING id", &[&name])?;
        Ok(Group {
            id: row.get::<_, i64>(0),
            name: name.to_string(),
        })
    }

    pub fn add_location_owner(&self, location_id: Uuid, group_id: i64) -> Result<bool> {
        let mut client = self.pool.get()?;
        let inserted = client.execute(
            "INSERT INTO core_location_owners (location_id, group_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            &[&location_id, &group_id],
        )?;
        Ok(inserted > 0)
    }

    pub fn remove_location_owner(&self, location_id: Uuid, group_id: i64) -> Result<bool> {
        let mut client = self.pool.get()?;
        let deleted = client.execute(
            "DELETE FROM core_location_owners WHERE location_id = $1 AND group_id = $2",
            &[&location_id, &group_id],
        )?;
        Ok(deleted > 0)
    }

    pub fn location_owners(&self, location_id: Uuid) -> Result<Vec<Group>> {
        let mut client = self.pool.get()?;
        let rows = client.query(
            r#"
            SELECT g.id, g.name
            FROM auth_group g
            JOIN core_location_owners o ON o.group_id = g.id
            WHERE o.location_id = $1
            ORDER BY g.name
            "#,
            &[&location_id],
        )?;
        Ok(rows
            .iter()
            .map(|row| Group {
                id: row.get(0),
                name: row.get(1),
            })
            .collect())
    }

    pub fn owned_locations(&self, group_id: i64) -> Result<Vec<Location>> {
        let mut client = self.pool.get()?;
        let rows = client.query(
            &format!(
                r#"
                SELECT {LOCATION_COLUMNS}
                FROM core_location l
                JOIN core_location_owners o ON o.location_id = l.id
                WHERE o.group_id = $1
                ORDER BY l.name
                "#
            ),
            &[&group_id],
        )?;
        Ok(rows.iter().map(row_to_location).collect())
    }

    // ========================================================================
    // Content types and tasks
    // ========================================================================

    pub fn content_type(&self, app_label: &str, model: &str) -> Result<Option<ContentType>> {
        let mut client = self.pool.get()?;
        let row = client.query_opt(
            "SELECT id, app_label, model FROM contenttypes_contenttype WHERE app_label = $1 AND model = $2",
            &[&app_label, &model.to_lowercase()],
        )?;
        Ok(row.map(|row| ContentType {
            id: row.get(0),
            app_label: row.get(1),
            model: row.get(2),
        }))
    }

    pub fn create_task(&self, task: &NewTask) -> Result<Task> {
        let mut client = self.pool.get()?;
        let id = Uuid::new_v4();
        client.execute(
            &format!("INSERT INTO core_task ({TASK_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6)"),
            &[
                &id,
                &task.name,
                &task.description,
                &task.date_scheduled,
                &task.content_type_id,
                &task.object_id,
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
        let mut client = self.pool.get()?;
        let row = client.query_opt(&format!("SELECT {TASK_COLUMNS} FROM core_task WHERE id = $1"), &[&id])?;
        Ok(row.as_ref().map(row_to_task))
    }

    pub fn update_task(&self, task: &Task) -> Result<bool> {
        let mut client = self.pool.get()?;
        let updated = client.execute(
            "UPDATE core_task SET name = $1, description = $2, date_scheduled = $3 WHERE id = $4",
            &[&task.name, &task.description, &task.date_scheduled, &task.id],
        )?;
        Ok(updated > 0)
    }

    pub fn delete_task(&self, id: Uuid) -> Result<bool> {
        let mut client = self.pool.get()?;
        let deleted = client.execute("DELETE FROM core_task WHERE id = $1", &[&id])?;
        Ok(deleted > 0)
    }

    pub fn tasks_for_target(&self, content_type_id: i64, object_id: Uuid) -> Result<Vec<Task>> {
        let mut client = self.pool.get()?;
        let rows = client.query(
            &format!(
                "SELECT {TASK_COLUMNS} FROM core_task WHERE content_type_id = $1 AND object_id = $2 ORDER BY date_scheduled"
            ),
            &[&content_type_id, &object_id],
        )?;
        Ok(rows.iter().map(row_to_task).collect())
    }

    pub fn tasks_scheduled_before(&self, until: DateTime<Utc>) -> Result<Vec<Task>> {
        let mut client = self.pool.get()?;
        let rows = client.query(
            &format!("SELECT {TASK_COLUMNS} FROM core_task WHERE date_scheduled <= $1 ORDER BY date_scheduled"),
            &[&until],
        )?;
        Ok(rows.iter().map(row_to_task).collect())
    }

    pub fn generic_target_exists(&self, content_type: &ContentType, object_id: Uuid) -> Result<bool> {
        let table = content_type.table();
        if !self.table_exists(&table)? {
            return Ok(false);
        }
        let mut client = self.pool.get()?;
        // Compare as text so integer and uuid keys both work.
        let row = client.query_opt(
            &format!("SELECT 1 FROM \"{}\" WHERE id::text = $1", table.replace('"', "\"\"")),
            &[&object_id.to_string()],
        )?;
        Ok(row.is_some())
    }
}

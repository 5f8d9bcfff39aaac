//! Plans and runs migrations against a database.

use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{info, warn};

use super::{MigrationGraph, MigrationKey};
use crate::db::{AppliedMigration, Database, RECORDER_TABLE};
use crate::error::MigrationError;

/// What a `migrate` run should bring the database to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Every app at its latest unit.
    Latest,
    /// One app at its latest unit.
    App(String),
    /// Exactly this unit applied, and nothing later in its app.
    Unit(MigrationKey),
    /// Every unit of the app unapplied.
    Zero(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanStep {
    pub key: MigrationKey,
    pub backwards: bool,
}

impl fmt::Display for PlanStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.backwards {
            write!(f, "Unapply {}", self.key)
        } else {
            write!(f, "Apply {}", self.key)
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MigrateOptions {
    /// Record units as applied or unapplied without running their SQL.
    pub fake: bool,
    /// Compute the plan and stop.
    pub plan_only: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MigrateReport {
    pub plan: Vec<PlanStep>,
    pub applied: Vec<MigrationKey>,
    pub unapplied: Vec<MigrationKey>,
    pub content_types_created: usize,
}

/// One row of `showmigrations`.
#[derive(Debug, Clone)]
pub struct MigrationStatus {
    pub key: MigrationKey,
    pub applied: bool,
    /// Applied, but the unit's definition changed since.
    pub checksum_drift: bool,
    pub descriptions: Vec<String>,
}

pub struct MigrationExecutor<'a> {
    db: &'a Database,
    graph: MigrationGraph,
}

impl<'a> MigrationExecutor<'a> {
    pub fn new(db: &'a Database, graph: MigrationGraph) -> Self {
        Self { db, graph }
    }

    pub fn graph(&self) -> &MigrationGraph {
        &self.graph
    }

    /// Recorded units. A store that never ran a unit has no recorder table
    /// yet, and reading it must not create one.
    fn recorded(&self) -> Result<Vec<AppliedMigration>> {
        if !self.db.table_exists(RECORDER_TABLE)? {
            return Ok(Vec::new());
        }
        self.db.applied_migrations()
    }

    fn applied_keys(&self) -> Result<BTreeSet<MigrationKey>> {
        Ok(self
            .recorded()?
            .into_iter()
            .map(|m| m.key)
            .collect())
    }

    /// Steps needed to reach `target` from what is recorded now.
    pub fn migration_plan(&self, target: &Target) -> Result<Vec<PlanStep>> {
        let applied = self.applied_keys()?;
        Ok(self.plan_for(target, &applied)?)
    }

    fn plan_for(&self, target: &Target, applied: &BTreeSet<MigrationKey>) -> Result<Vec<PlanStep>, MigrationError> {
        let mut plan = Vec::new();
        let mut seen = BTreeSet::new();

        match target {
            Target::Latest => {
                for leaf in self.graph.leaf_nodes() {
                    self.push_forwards(&leaf, applied, &mut plan, &mut seen)?;
                }
            }
            Target::App(app) => {
                let leaves: Vec<MigrationKey> =
                    self.graph.leaf_nodes().into_iter().filter(|k| &k.app == app).collect();
                if leaves.is_empty() {
                    return Err(MigrationError::UnknownApp(app.clone()));
                }
                for leaf in &leaves {
                    self.push_forwards(leaf, applied, &mut plan, &mut seen)?;
                }
            }
            Target::Unit(key) => {
                self.graph.get(key)?;
                if applied.contains(key) {
                    // Roll back whatever was applied after it in the same app.
                    let later: Vec<MigrationKey> = self
                        .graph
                        .keys()
                        .filter(|k| k.app == key.app && self.direct_child(key, k))
                        .cloned()
                        .collect();
                    for child in later {
                        self.push_backwards(&child, applied, &mut plan, &mut seen)?;
                    }
                } else {
                    self.push_forwards(key, applied, &mut plan, &mut seen)?;
                }
            }
            Target::Zero(app) => {
                if !self.graph.apps().contains(app) {
                    return Err(MigrationError::UnknownApp(app.clone()));
                }
                for root in self.graph.root_nodes(app) {
                    self.push_backwards(&root, applied, &mut plan, &mut seen)?;
                }
            }
        }
        Ok(plan)
    }

    fn direct_child(&self, parent: &MigrationKey, candidate: &MigrationKey) -> bool {
        self.graph
            .get(candidate)
            .map(|m| m.dependencies.contains(parent))
            .unwrap_or(false)
    }

    fn push_forwards(
        &self,
        key: &MigrationKey,
        applied: &BTreeSet<MigrationKey>,
        plan: &mut Vec<PlanStep>,
        seen: &mut BTreeSet<MigrationKey>,
    ) -> Result<(), MigrationError> {
        for step in self.graph.forwards_plan(key)? {
            if !applied.contains(&step) && seen.insert(step.clone()) {
                plan.push(PlanStep { key: step, backwards: false });
            }
        }
        Ok(())
    }

    fn push_backwards(
        &self,
        key: &MigrationKey,
        applied: &BTreeSet<MigrationKey>,
        plan: &mut Vec<PlanStep>,
        seen: &mut BTreeSet<MigrationKey>,
    ) -> Result<(), MigrationError> {
        for step in self.graph.backwards_plan(key)? {
            if applied.contains(&step) && seen.insert(step.clone()) {
                plan.push(PlanStep { key: step, backwards: true });
            }
        }
        Ok(())
    }

    /// Bring the database to `target`. Each step commits on its own; a
    /// failing step is rolled back and stops the run.
    pub fn migrate(&self, target: &Target, options: MigrateOptions) -> Result<MigrateReport> {
        self.check_consistent_history()?;
        let plan = self.migration_plan(target)?;

        let mut report = MigrateReport {
            plan: plan.clone(),
            ..MigrateReport::default()
        };
        if options.plan_only {
            return Ok(report);
        }
        if plan.is_empty() {
            info!("No migrations to apply");
            return Ok(report);
        }

        for step in &plan {
            if step.backwards {
                self.unapply(&step.key, options.fake)?;
                report.unapplied.push(step.key.clone());
            } else {
                self.apply(&step.key, options.fake)?;
                report.applied.push(step.key.clone());
            }
        }

        if !report.applied.is_empty() {
            report.content_types_created = self.sync_content_types()?;
        }
        Ok(report)
    }

    /// Apply a single unit whose dependencies are all applied.
    pub fn apply_one(&self, key: &MigrationKey, fake: bool) -> Result<()> {
        let applied = self.applied_keys()?;
        if applied.contains(key) {
            return Err(MigrationError::AlreadyApplied(key.clone()).into());
        }
        for dependency in &self.graph.get(key)?.dependencies {
            if !applied.contains(dependency) {
                return Err(MigrationError::NotApplied(dependency.clone()).into());
            }
        }
        self.apply(key, fake)?;
        self.sync_content_types()?;
        Ok(())
    }

    fn apply(&self, key: &MigrationKey, fake: bool) -> Result<()> {
        let migration = self.graph.get(key)?;
        let statements = if fake {
            Vec::new()
        } else {
            let state = self.graph.state_before(key)?;
            migration.render(self.db.dialect(), &state, false)?
        };
        self.db.ensure_recorder()?;
        self.db.apply_unit(key, &migration.checksum(), &statements)?;
        if fake {
            info!("Applying {}... FAKED", key);
        } else {
            info!("Applying {}... OK ({} statements)", key, statements.len());
        }
        Ok(())
    }

    fn unapply(&self, key: &MigrationKey, fake: bool) -> Result<()> {
        let migration = self.graph.get(key)?;
        let statements = if fake {
            Vec::new()
        } else {
            let state = self.graph.state_before(key)?;
            migration.render(self.db.dialect(), &state, true)?
        };
        self.db.ensure_recorder()?;
        self.db.unapply_unit(key, &statements)?;
        if fake {
            info!("Unapplying {}... FAKED", key);
        } else {
            info!("Unapplying {}... OK ({} statements)", key, statements.len());
        }
        Ok(())
    }

    /// Insert a content type for every model the applied units define.
    fn sync_content_types(&self) -> Result<usize> {
        let applied = self.applied_keys()?;
        let keys: Vec<MigrationKey> = self
            .graph
            .full_plan()
            .into_iter()
            .filter(|k| applied.contains(k))
            .collect();
        let state = self.graph.make_state(&keys)?;
        let created = self.db.sync_content_types(&state.model_keys())?;
        if created > 0 {
            info!("Created {} content types", created);
        }
        Ok(created)
    }

    /// Every applied unit must have all of its dependencies applied.
    pub fn check_consistent_history(&self) -> Result<()> {
        let applied = self.applied_keys()?;
        for key in &applied {
            let Ok(migration) = self.graph.get(key) else {
                warn!("Recorded migration {} is not known", key);
                continue;
            };
            for dependency in &migration.dependencies {
                if !applied.contains(dependency) {
                    return Err(MigrationError::InconsistentHistory {
                        applied: key.clone(),
                        dependency: dependency.clone(),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }

    /// SQL that applying (or unapplying) `key` would run on this database.
    pub fn sql_for(&self, key: &MigrationKey, backwards: bool) -> Result<Vec<String>, MigrationError> {
        let state = self.graph.state_before(key)?;
        self.graph.get(key)?.render(self.db.dialect(), &state, backwards)
    }

    /// Every known unit in dependency order with its recorded status.
    pub fn show(&self) -> Result<Vec<MigrationStatus>> {
        let recorded: BTreeMap<MigrationKey, String> = self
            .recorded()?
            .into_iter()
            .map(|m| (m.key, m.checksum))
            .collect();

        let mut statuses = Vec::new();
        for key in self.graph.full_plan() {
            let migration = self.graph.get(&key)?;
            let checksum = recorded.get(&key);
            statuses.push(MigrationStatus {
                applied: checksum.is_some(),
                checksum_drift: checksum.is_some_and(|c| *c != migration.checksum()),
                descriptions: migration.describe(),
                key,
            });
        }
        Ok(statuses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::{all, Migration};
    use crate::schema::{Field, Operation};
    use chrono::{NaiveDate, Utc};
    use rusqlite::params;
    use uuid::Uuid;

    fn key(app: &str, name: &str) -> MigrationKey {
        MigrationKey::new(app, name)
    }

    fn roomphoto() -> MigrationKey {
        key("core", "0003_roomphoto")
    }

    fn location_fields() -> MigrationKey {
        key("core", "0009_location_name_alter_location_address")
    }

    fn owners_task() -> MigrationKey {
        key("core", "0017_location_owners_task")
    }

    fn executor(db: &Database) -> MigrationExecutor<'_> {
        MigrationExecutor::new(db, MigrationGraph::new(all()).unwrap())
    }

    fn applied(db: &Database) -> Vec<MigrationKey> {
        db.applied_migrations().unwrap().into_iter().map(|m| m.key).collect()
    }

    #[test]
    fn test_latest_adds_exactly_the_new_tables() {
        let db = Database::open_in_memory().unwrap();
        let executor = executor(&db);
        for base in [key("auth", "0001_initial"), key("contenttypes", "0001_initial"), key("core", "0001_initial")] {
            executor.migrate(&Target::Unit(base), MigrateOptions::default()).unwrap();
        }
        let before: BTreeSet<String> = db.table_names().unwrap().into_iter().collect();

        let report = executor.migrate(&Target::Latest, MigrateOptions::default()).unwrap();
        assert_eq!(report.applied, vec![roomphoto(), location_fields(), owners_task()]);

        let after: BTreeSet<String> = db.table_names().unwrap().into_iter().collect();
        let added: Vec<&String> = after.difference(&before).collect();
        assert_eq!(added, vec!["core_location_owners", "core_roomphoto", "core_task"]);

        let columns: Vec<String> = db.columns("core_location").unwrap().into_iter().map(|c| c.name).collect();
        assert!(columns.contains(&"name".to_string()));
    }

    #[test]
    fn test_location_name_backfilled_and_address_relaxed() {
        let db = Database::open_in_memory().unwrap();
        let executor = executor(&db);
        executor.migrate(&Target::Unit(roomphoto()), MigrateOptions::default()).unwrap();

        let id = Uuid::new_v4();
        let now = Utc::now();
        db.sqlite()
            .conn
            .execute(
                "INSERT INTO core_location (id, date_created, date_updated, address) VALUES (?1, ?2, ?2, ?3)",
                params![id.to_string(), now, "12 Elm Street"],
            )
            .unwrap();

        executor.migrate(&Target::Unit(location_fields()), MigrateOptions::default()).unwrap();

        let location = db.get_location(id).unwrap().unwrap();
        assert_eq!(location.name, "Home");
        assert_eq!(location.address.as_deref(), Some("12 Elm Street"));

        let columns = db.columns("core_location").unwrap();
        let address = columns.iter().find(|c| c.name == "address").unwrap();
        assert!(!address.not_null);
        let name = columns.iter().find(|c| c.name == "name").unwrap();
        assert!(name.not_null);
        assert_eq!(name.default, None);

        let cabin = db.create_location("Cabin", None).unwrap();
        assert_eq!(db.get_location(cabin.id).unwrap().unwrap().address, None);
    }

    #[test]
    fn test_room_delete_cascades_to_its_photos_only() {
        let db = Database::open_in_memory().unwrap();
        executor(&db).migrate(&Target::Latest, MigrateOptions::default()).unwrap();

        let location = db.create_location("Home", Some("1 Main St")).unwrap();
        let kitchen = db.create_room(location.id, "Kitchen").unwrap();
        let garage = db.create_room(location.id, "Garage").unwrap();
        let day = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        db.add_room_photo(kitchen.id, "sink.jpg", None, day).unwrap();
        db.add_room_photo(kitchen.id, "oven.jpg", Some("new oven"), day).unwrap();
        let kept = db.add_room_photo(garage.id, "door.jpg", None, day).unwrap();
        assert_eq!(db.count_room_photos().unwrap(), 3);

        assert!(db.delete_room(kitchen.id).unwrap());
        assert_eq!(db.count_room_photos().unwrap(), 1);
        assert_eq!(db.room_photos(garage.id, true).unwrap(), vec![kept]);
    }

    #[test]
    fn test_dangling_generic_reference_is_storable() {
        let db = Database::open_in_memory().unwrap();
        let report = executor(&db).migrate(&Target::Latest, MigrateOptions::default()).unwrap();
        assert!(report.content_types_created >= 5);

        let room_type = db.content_type("core", "Room").unwrap().unwrap();
        let nowhere = Uuid::new_v4();
        let task = db
            .create_task(&crate::db::NewTask {
                name: "Clean gutters".to_string(),
                description: String::new(),
                date_scheduled: Utc::now(),
                content_type_id: room_type.id,
                object_id: nowhere,
            })
            .unwrap();
        assert_eq!(db.tasks_for_target(room_type.id, nowhere).unwrap(), vec![task]);
        assert!(!db.generic_target_exists(&room_type, nowhere).unwrap());
    }

    #[test]
    fn test_reapply_is_noop_and_apply_one_rejected() {
        let db = Database::open_in_memory().unwrap();
        let executor = executor(&db);
        executor.migrate(&Target::Latest, MigrateOptions::default()).unwrap();
        let tables = db.table_names().unwrap();
        let indexes = db.index_names("core_roomphoto").unwrap();

        let report = executor.migrate(&Target::Latest, MigrateOptions::default()).unwrap();
        assert!(report.plan.is_empty());
        assert!(report.applied.is_empty());

        let err = executor.apply_one(&roomphoto(), false).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MigrationError>(),
            Some(MigrationError::AlreadyApplied(_))
        ));
        assert_eq!(db.table_names().unwrap(), tables);
        assert_eq!(db.index_names("core_roomphoto").unwrap(), indexes);
        assert_eq!(applied(&db).len(), 6);
    }

    #[test]
    fn test_apply_one_requires_dependencies() {
        let db = Database::open_in_memory().unwrap();
        let executor = executor(&db);
        let err = executor.apply_one(&roomphoto(), false).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MigrationError>(),
            Some(MigrationError::NotApplied(_))
        ));

        executor.apply_one(&key("core", "0001_initial"), false).unwrap();
        executor.apply_one(&roomphoto(), false).unwrap();
        assert!(db.table_exists("core_roomphoto").unwrap());
    }

    #[test]
    fn test_failing_unit_rolls_back() {
        let db = Database::open_in_memory().unwrap();
        let mut units = all();
        units.push(
            Migration::new("core", "0018_location_nickname")
                .depends_on("core", "0017_location_owners_task")
                .operation(Operation::add_field("location", Field::char("nickname", 50), true)),
        );
        let executor = MigrationExecutor::new(&db, MigrationGraph::new(units).unwrap());
        executor.migrate(&Target::Unit(owners_task()), MigrateOptions::default()).unwrap();
        let location = db.create_location("Home", None).unwrap();
        let columns_before = db.columns("core_location").unwrap();

        assert!(executor.migrate(&Target::Latest, MigrateOptions::default()).is_err());

        assert_eq!(db.columns("core_location").unwrap(), columns_before);
        assert_eq!(applied(&db).len(), 6);
        assert!(!db.table_exists("new__core_location").unwrap());
        assert_eq!(db.get_location(location.id).unwrap().unwrap(), location);
    }

    #[test]
    fn test_unapply_location_fields_with_null_address_fails() {
        let db = Database::open_in_memory().unwrap();
        let executor = executor(&db);
        executor.migrate(&Target::Latest, MigrateOptions::default()).unwrap();
        db.create_location("Cabin", None).unwrap();

        let plan = executor.migration_plan(&Target::Unit(roomphoto())).unwrap();
        assert_eq!(
            plan,
            vec![
                PlanStep { key: owners_task(), backwards: true },
                PlanStep { key: location_fields(), backwards: true },
            ]
        );

        assert!(executor.migrate(&Target::Unit(roomphoto()), MigrateOptions::default()).is_err());

        let recorded = applied(&db);
        assert!(recorded.contains(&location_fields()));
        assert!(!recorded.contains(&owners_task()));
        assert!(!db.table_exists("core_task").unwrap());
        let columns = db.columns("core_location").unwrap();
        assert!(columns.iter().any(|c| c.name == "name"));
        assert!(!columns.iter().find(|c| c.name == "address").unwrap().not_null);
    }

    #[test]
    fn test_unapply_location_fields_when_addresses_present() {
        let db = Database::open_in_memory().unwrap();
        let executor = executor(&db);
        executor.migrate(&Target::Latest, MigrateOptions::default()).unwrap();
        let location = db.create_location("Flat", Some("3 High Road")).unwrap();

        let report = executor.migrate(&Target::Unit(roomphoto()), MigrateOptions::default()).unwrap();
        assert_eq!(report.unapplied, vec![owners_task(), location_fields()]);

        let columns: Vec<String> = db.columns("core_location").unwrap().into_iter().map(|c| c.name).collect();
        assert!(!columns.contains(&"name".to_string()));
        let address: String = db
            .sqlite()
            .conn
            .query_row("SELECT address FROM core_location WHERE id = ?1", [location.id.to_string()], |row| row.get(0))
            .unwrap();
        assert_eq!(address, "3 High Road");
    }

    #[test]
    fn test_fake_records_without_schema_changes() {
        let db = Database::open_in_memory().unwrap();
        let options = MigrateOptions { fake: true, ..MigrateOptions::default() };
        let report = executor(&db).migrate(&Target::Latest, options).unwrap();
        assert_eq!(report.applied.len(), 6);
        assert_eq!(applied(&db).len(), 6);
        assert!(!db.table_exists("core_location").unwrap());
        assert_eq!(report.content_types_created, 0);
    }

    #[test]
    fn test_plan_only_touches_nothing() {
        let db = Database::open_in_memory().unwrap();
        let options = MigrateOptions { plan_only: true, ..MigrateOptions::default() };
        let report = executor(&db).migrate(&Target::App("core".to_string()), options).unwrap();
        assert_eq!(report.plan.len(), 6);
        assert!(report.plan.iter().all(|s| !s.backwards));
        assert!(db.table_names().unwrap().is_empty());
    }

    #[test]
    fn test_plan_only_on_fresh_file_creates_no_tables() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = crate::config::DatabaseConfig {
            sqlite_path: dir.path().join("homekeep.db"),
            ..crate::config::DatabaseConfig::default()
        };
        let db = Database::open(&config).unwrap();
        let executor = executor(&db);
        let options = MigrateOptions { plan_only: true, ..MigrateOptions::default() };
        let report = executor.migrate(&Target::Latest, options).unwrap();
        assert_eq!(report.plan.len(), 6);
        assert!(report.applied.is_empty());

        let statuses = executor.show().unwrap();
        assert!(statuses.iter().all(|s| !s.applied));
        assert!(db.table_names().unwrap().is_empty());
    }

    #[test]
    fn test_zero_unapplies_whole_app() {
        let db = Database::open_in_memory().unwrap();
        let executor = executor(&db);
        executor.migrate(&Target::Latest, MigrateOptions::default()).unwrap();

        let report = executor.migrate(&Target::Zero("core".to_string()), MigrateOptions::default()).unwrap();
        assert_eq!(report.unapplied.len(), 4);
        assert_eq!(report.unapplied[0], owners_task());
        assert_eq!(
            applied(&db),
            vec![key("auth", "0001_initial"), key("contenttypes", "0001_initial")]
        );
        for table in ["core_location", "core_room", "core_roomphoto", "core_task", "core_location_owners"] {
            assert!(!db.table_exists(table).unwrap(), "{} still exists", table);
        }
        assert!(db.table_exists("auth_group").unwrap());
    }

    #[test]
    fn test_unknown_app_rejected() {
        let db = Database::open_in_memory().unwrap();
        let err = executor(&db)
            .migrate(&Target::App("attic".to_string()), MigrateOptions::default())
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<MigrationError>(), Some(MigrationError::UnknownApp(_))));
    }

    #[test]
    fn test_inconsistent_history_detected() {
        let db = Database::open_in_memory().unwrap();
        db.ensure_recorder().unwrap();
        db.apply_unit(&roomphoto(), "x", &[]).unwrap();
        let err = executor(&db).migrate(&Target::Latest, MigrateOptions::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MigrationError>(),
            Some(MigrationError::InconsistentHistory { .. })
        ));
    }

    #[test]
    fn test_show_reports_checksum_drift() {
        let db = Database::open_in_memory().unwrap();
        let executor = executor(&db);
        executor.migrate(&Target::Unit(roomphoto()), MigrateOptions::default()).unwrap();
        db.sqlite()
            .conn
            .execute(
                &format!("UPDATE {} SET checksum = 'stale' WHERE name = '0003_roomphoto'", crate::db::RECORDER_TABLE),
                [],
            )
            .unwrap();

        let statuses = executor.show().unwrap();
        assert_eq!(statuses.len(), 6);
        let by_key: BTreeMap<MigrationKey, &MigrationStatus> = statuses.iter().map(|s| (s.key.clone(), s)).collect();
        assert!(by_key[&roomphoto()].applied);
        assert!(by_key[&roomphoto()].checksum_drift);
        assert!(by_key[&key("core", "0001_initial")].applied);
        assert!(!by_key[&key("core", "0001_initial")].checksum_drift);
        assert!(!by_key[&owners_task()].applied);
        assert_eq!(by_key[&roomphoto()].descriptions, vec!["Create model RoomPhoto".to_string()]);
    }

    #[test]
    fn test_sql_for_location_fields() {
        let db = Database::open_in_memory().unwrap();
        let sql = executor(&db).sql_for(&location_fields(), false).unwrap();
        assert!(sql.iter().any(|s| s.starts_with("CREATE TABLE \"new__core_location\"")));
        assert!(sql.iter().any(|s| s.contains("'Home'")));
        assert!(sql.iter().any(|s| s == "ALTER TABLE \"new__core_location\" RENAME TO \"core_location\""));
        assert!(!db.table_exists("core_location").unwrap());
    }
}

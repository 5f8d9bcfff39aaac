//! Scheduling tasks against any home record.
//!
//! A task points at its target through a `(content type, object id)` pair.
//! Storage accepts any pair; the checks that the target is real live here.

use anyhow::Result;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::db::{Database, NewTask, Task};

/// Longest task name the `name` column holds.
pub const MAX_NAME_LENGTH: usize = 255;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("task name must not be blank")]
    BlankName,

    #[error("task name is {0} characters, the limit is {MAX_NAME_LENGTH}")]
    NameTooLong(usize),

    #[error("no content type registered for {app_label}.{model}")]
    UnknownContentType { app_label: String, model: String },

    #[error("{app_label}.{model} {object_id} does not exist")]
    TargetNotFound {
        app_label: String,
        model: String,
        object_id: Uuid,
    },

    #[error("task {0} does not exist")]
    TaskNotFound(Uuid),
}

/// The record a task is about, e.g. a room or a whole location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericTarget {
    pub app_label: String,
    pub model: String,
    pub object_id: Uuid,
}

impl GenericTarget {
    pub fn new(app_label: &str, model: &str, object_id: Uuid) -> Self {
        Self {
            app_label: app_label.to_string(),
            model: model.to_lowercase(),
            object_id,
        }
    }

    pub fn location(id: Uuid) -> Self {
        Self::new("core", "location", id)
    }

    pub fn room(id: Uuid) -> Self {
        Self::new("core", "room", id)
    }
}

fn validate_name(name: &str) -> Result<&str, ScheduleError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ScheduleError::BlankName);
    }
    let length = name.chars().count();
    if length > MAX_NAME_LENGTH {
        return Err(ScheduleError::NameTooLong(length));
    }
    Ok(name)
}

fn resolve(db: &Database, target: &GenericTarget) -> Result<i64> {
    let content_type = db
        .content_type(&target.app_label, &target.model)?
        .ok_or_else(|| ScheduleError::UnknownContentType {
            app_label: target.app_label.clone(),
            model: target.model.clone(),
        })?;
    if !db.generic_target_exists(&content_type, target.object_id)? {
        return Err(ScheduleError::TargetNotFound {
            app_label: target.app_label.clone(),
            model: target.model.clone(),
            object_id: target.object_id,
        }
        .into());
    }
    Ok(content_type.id)
}

/// Create a task for `target` after checking its name and that the target exists.
pub fn schedule_task(
    db: &Database,
    target: &GenericTarget,
    name: &str,
    description: &str,
    when: DateTime<Utc>,
) -> Result<Task> {
    let name = validate_name(name)?;
    let content_type_id = resolve(db, target)?;
    let task = db.create_task(&NewTask {
        name: name.to_string(),
        description: description.to_string(),
        date_scheduled: when,
        content_type_id,
        object_id: target.object_id,
    })?;
    tracing::info!(
        "Scheduled task '{}' for {}.{} {} at {}",
        task.name,
        target.app_label,
        target.model,
        target.object_id,
        when
    );
    Ok(task)
}

/// Changes to an existing task; `None` keeps the current value.
#[derive(Debug, Clone, Default)]
pub struct TaskChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub date_scheduled: Option<DateTime<Utc>>,
}

/// Apply `changes` to a task. A new name is checked like a scheduled one.
pub fn update_task(db: &Database, id: Uuid, changes: &TaskChanges) -> Result<Task> {
    let mut task = db.get_task(id)?.ok_or(ScheduleError::TaskNotFound(id))?;
    if let Some(name) = &changes.name {
        task.name = validate_name(name)?.to_string();
    }
    if let Some(description) = &changes.description {
        task.description = description.clone();
    }
    if let Some(when) = changes.date_scheduled {
        task.date_scheduled = when;
    }
    if !db.update_task(&task)? {
        return Err(ScheduleError::TaskNotFound(id).into());
    }
    tracing::info!("Updated task '{}' ({})", task.name, task.id);
    Ok(task)
}

/// Remove a task. Its target is left alone.
pub fn delete_task(db: &Database, id: Uuid) -> Result<()> {
    if !db.delete_task(id)? {
        return Err(ScheduleError::TaskNotFound(id).into());
    }
    tracing::info!("Deleted task {}", id);
    Ok(())
}

/// Tasks for `target`, earliest first. Unknown content types have none.
pub fn tasks_for(db: &Database, target: &GenericTarget) -> Result<Vec<Task>> {
    match db.content_type(&target.app_label, &target.model)? {
        Some(content_type) => db.tasks_for_target(content_type.id, target.object_id),
        None => Ok(Vec::new()),
    }
}

/// Every task scheduled at or before `now`.
pub fn due_tasks(db: &Database, now: DateTime<Utc>) -> Result<Vec<Task>> {
    db.tasks_scheduled_before(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::{all, MigrateOptions, MigrationExecutor, MigrationGraph, Target};
    use chrono::Duration;

    fn migrated() -> Database {
        let db = Database::open_in_memory().unwrap();
        MigrationExecutor::new(&db, MigrationGraph::new(all()).unwrap())
            .migrate(&Target::Latest, MigrateOptions::default())
            .unwrap();
        db
    }

    fn schedule_error(err: anyhow::Error) -> ScheduleError {
        err.downcast::<ScheduleError>().unwrap()
    }

    #[test]
    fn test_schedule_for_room_and_location() {
        let db = migrated();
        let home = db.create_location("Home", None).unwrap();
        let kitchen = db.create_room(home.id, "Kitchen").unwrap();
        let now = Utc::now();

        let filter = schedule_task(&db, &GenericTarget::room(kitchen.id), "  Replace filter ", "", now).unwrap();
        assert_eq!(filter.name, "Replace filter");
        let roof = schedule_task(
            &db,
            &GenericTarget::location(home.id),
            "Inspect roof",
            "Check flashing",
            now + Duration::days(30),
        )
        .unwrap();

        assert_eq!(tasks_for(&db, &GenericTarget::room(kitchen.id)).unwrap(), vec![filter.clone()]);
        assert_eq!(tasks_for(&db, &GenericTarget::location(home.id)).unwrap(), vec![roof]);
        assert_eq!(due_tasks(&db, now).unwrap(), vec![filter]);
    }

    #[test]
    fn test_name_validation() {
        let db = migrated();
        let home = db.create_location("Home", None).unwrap();
        let target = GenericTarget::location(home.id);

        let err = schedule_task(&db, &target, "   ", "", Utc::now()).unwrap_err();
        assert_eq!(schedule_error(err), ScheduleError::BlankName);

        let long = "x".repeat(MAX_NAME_LENGTH + 1);
        let err = schedule_task(&db, &target, &long, "", Utc::now()).unwrap_err();
        assert_eq!(schedule_error(err), ScheduleError::NameTooLong(256));

        let exact = "x".repeat(MAX_NAME_LENGTH);
        assert!(schedule_task(&db, &target, &exact, "", Utc::now()).is_ok());
    }

    #[test]
    fn test_missing_target_rejected() {
        let db = migrated();
        let err = schedule_task(&db, &GenericTarget::room(Uuid::new_v4()), "Paint", "", Utc::now()).unwrap_err();
        assert!(matches!(schedule_error(err), ScheduleError::TargetNotFound { .. }));
        assert!(due_tasks(&db, Utc::now()).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_content_type_rejected() {
        let db = migrated();
        let target = GenericTarget::new("core", "Item", Uuid::new_v4());
        let err = schedule_task(&db, &target, "Dust", "", Utc::now()).unwrap_err();
        assert_eq!(
            schedule_error(err),
            ScheduleError::UnknownContentType {
                app_label: "core".to_string(),
                model: "item".to_string(),
            }
        );
        assert!(tasks_for(&db, &target).unwrap().is_empty());
    }

    #[test]
    fn test_update_task_changes_only_given_fields() {
        let db = migrated();
        let home = db.create_location("Home", None).unwrap();
        let target = GenericTarget::location(home.id);
        let when = Utc::now();
        let task = schedule_task(&db, &target, "Inspect roof", "Check flashing", when).unwrap();

        let later = when + Duration::days(7);
        let changes = TaskChanges {
            name: Some(" Inspect gutters ".to_string()),
            date_scheduled: Some(later),
            ..TaskChanges::default()
        };
        let updated = update_task(&db, task.id, &changes).unwrap();
        assert_eq!(updated.name, "Inspect gutters");
        assert_eq!(updated.description, "Check flashing");
        assert_eq!(updated.date_scheduled, later);
        assert_eq!(updated.object_id, home.id);
        assert_eq!(db.get_task(task.id).unwrap(), Some(updated));
    }

    #[test]
    fn test_update_task_rejects_blank_name_and_unknown_task() {
        let db = migrated();
        let home = db.create_location("Home", None).unwrap();
        let task = schedule_task(&db, &GenericTarget::location(home.id), "Dust", "", Utc::now()).unwrap();

        let blank = TaskChanges {
            name: Some("  ".to_string()),
            ..TaskChanges::default()
        };
        let err = update_task(&db, task.id, &blank).unwrap_err();
        assert_eq!(schedule_error(err), ScheduleError::BlankName);
        assert_eq!(db.get_task(task.id).unwrap().unwrap().name, "Dust");

        let missing = Uuid::new_v4();
        let err = update_task(&db, missing, &TaskChanges::default()).unwrap_err();
        assert_eq!(schedule_error(err), ScheduleError::TaskNotFound(missing));
    }

    #[test]
    fn test_delete_task_leaves_target() {
        let db = migrated();
        let home = db.create_location("Home", None).unwrap();
        let kitchen = db.create_room(home.id, "Kitchen").unwrap();
        let target = GenericTarget::room(kitchen.id);
        let task = schedule_task(&db, &target, "Replace filter", "", Utc::now()).unwrap();

        delete_task(&db, task.id).unwrap();
        assert!(tasks_for(&db, &target).unwrap().is_empty());
        assert!(db.get_task(task.id).unwrap().is_none());
        assert!(db.get_location(home.id).unwrap().is_some());
        assert!(db.generic_target_exists(&db.content_type("core", "room").unwrap().unwrap(), kitchen.id).unwrap());

        let err = delete_task(&db, task.id).unwrap_err();
        assert_eq!(schedule_error(err), ScheduleError::TaskNotFound(task.id));
    }

    #[test]
    fn test_group_target_with_integer_key_never_matches_uuid() {
        let db = migrated();
        db.create_group("Owners").unwrap();
        let target = GenericTarget::new("auth", "group", Uuid::new_v4());
        let err = schedule_task(&db, &target, "Review", "", Utc::now()).unwrap_err();
        assert!(matches!(schedule_error(err), ScheduleError::TargetNotFound { .. }));
    }
}

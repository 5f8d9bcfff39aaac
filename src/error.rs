//! Error types for schema state and migration planning.
//!
//! Storage failures travel as `anyhow::Error` like everywhere else in the
//! crate; these variants are the ones callers may want to match on, via
//! `err.downcast_ref::<MigrationError>()`.

use thiserror::Error;

use crate::migrations::MigrationKey;
use crate::schema::ModelRef;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("migration {child} depends on nonexistent migration {parent}")]
    NodeNotFound { child: MigrationKey, parent: MigrationKey },

    #[error("circular dependency involving migration {0}")]
    CircularDependency(MigrationKey),

    #[error("migration {applied} is applied before its dependency {dependency}")]
    InconsistentHistory {
        applied: MigrationKey,
        dependency: MigrationKey,
    },

    #[error("no migration matching '{name}' in app '{app}'")]
    UnknownMigration { app: String, name: String },

    #[error("more than one migration matches '{name}' in app '{app}'")]
    AmbiguousMigration { app: String, name: String },

    #[error("app '{0}' has no migrations")]
    UnknownApp(String),

    #[error("migration {0} is already applied")]
    AlreadyApplied(MigrationKey),

    #[error("migration {0} is not applied")]
    NotApplied(MigrationKey),

    #[error("model {0} already exists")]
    DuplicateModel(ModelRef),

    #[error("model {0} does not exist")]
    ModelNotFound(ModelRef),

    #[error("field '{field}' already exists on {model}")]
    DuplicateField { model: ModelRef, field: String },

    #[error("field '{field}' does not exist on {model}")]
    FieldNotFound { model: ModelRef, field: String },

    #[error("{0} has no primary key")]
    MissingPrimaryKey(ModelRef),

    #[error("foreign key check failed on table '{table}' (row {rowid}) referencing '{parent}'")]
    ForeignKeyViolation {
        table: String,
        rowid: i64,
        parent: String,
    },
}

//! Types for the applied-migration ledger and schema introspection.

use chrono::{DateTime, Utc};

use crate::migrations::MigrationKey;

/// Ledger table that records which units have been applied.
pub const RECORDER_TABLE: &str = "homekeep_migrations";

#[derive(Debug, Clone, PartialEq)]
pub struct AppliedMigration {
    pub key: MigrationKey,
    pub checksum: String,
    pub applied: DateTime<Utc>,
}

/// One column as reported by the backend's catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub not_null: bool,
    pub primary_key: bool,
    pub default: Option<String>,
}

//! Migration units, their dependency graph and the executor that applies them.

pub mod executor;
pub mod graph;
mod units;

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::MigrationError;
use crate::schema::{Dialect, Operation, ProjectState, SchemaEditor};

pub use executor::{MigrateOptions, MigrateReport, MigrationExecutor, MigrationStatus, PlanStep, Target};
pub use graph::MigrationGraph;

/// `(app, name)` identity of a unit, e.g. `core.0003_roomphoto`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MigrationKey {
    pub app: String,
    pub name: String,
}

impl MigrationKey {
    pub fn new(app: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for MigrationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.app, self.name)
    }
}

/// One ordered schema-change unit.
#[derive(Debug, Clone)]
pub struct Migration {
    pub key: MigrationKey,
    pub dependencies: Vec<MigrationKey>,
    pub operations: Vec<Operation>,
}

impl Migration {
    pub fn new(app: &str, name: &str) -> Self {
        Self {
            key: MigrationKey::new(app, name),
            dependencies: Vec::new(),
            operations: Vec::new(),
        }
    }

    pub fn depends_on(mut self, app: &str, name: &str) -> Self {
        self.dependencies.push(MigrationKey::new(app, name));
        self
    }

    pub fn operation(mut self, operation: Operation) -> Self {
        self.operations.push(operation);
        self
    }

    pub fn app(&self) -> &str {
        &self.key.app
    }

    /// SHA-256 over the serialized operations; changes whenever the unit's
    /// definition does.
    pub fn checksum(&self) -> String {
        let bytes = serde_json::to_vec(&self.operations).unwrap_or_default();
        format!("{:x}", Sha256::digest(&bytes))
    }

    pub fn mutate_state(&self, state: &mut ProjectState) -> Result<(), MigrationError> {
        for operation in &self.operations {
            operation.state_forwards(self.app(), state)?;
        }
        Ok(())
    }

    /// SQL for applying (or, with `backwards`, unapplying) this unit on top
    /// of `state`, the project state just before the unit.
    pub fn render(
        &self,
        dialect: Dialect,
        state: &ProjectState,
        backwards: bool,
    ) -> Result<Vec<String>, MigrationError> {
        let mut editor = SchemaEditor::new(dialect);
        let mut states = vec![state.clone()];
        for operation in &self.operations {
            let mut next = states[states.len() - 1].clone();
            operation.state_forwards(self.app(), &mut next)?;
            if !backwards {
                operation.database_forwards(self.app(), &mut editor, &states[states.len() - 1], &next)?;
            }
            states.push(next);
        }
        if backwards {
            for (i, operation) in self.operations.iter().enumerate().rev() {
                operation.database_backwards(self.app(), &mut editor, &states[i + 1], &states[i])?;
            }
        }
        Ok(editor.into_statements())
    }

    pub fn describe(&self) -> Vec<String> {
        self.operations.iter().map(Operation::describe).collect()
    }
}

/// Every unit shipped with the crate.
pub fn all() -> Vec<Migration> {
    units::all()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_is_stable_and_distinct() {
        let units = all();
        let first = units[0].checksum();
        assert_eq!(first.len(), 64);
        assert_eq!(first, all()[0].checksum());
        let distinct: std::collections::BTreeSet<String> = units.iter().map(Migration::checksum).collect();
        assert_eq!(distinct.len(), units.len());
    }

    #[test]
    fn test_migration_key_display() {
        assert_eq!(MigrationKey::new("core", "0003_roomphoto").to_string(), "core.0003_roomphoto");
    }
}

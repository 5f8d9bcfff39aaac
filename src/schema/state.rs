//! In-memory picture of the models as of some point in the migration history.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use super::field::{Field, ManyToMany, OnDelete};
use crate::error::MigrationError;

/// `(app, model)` pair; the model name is stored lower-cased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ModelRef {
    pub app: String,
    pub model: String,
}

impl ModelRef {
    pub fn new(app: impl Into<String>, model: impl AsRef<str>) -> Self {
        Self {
            app: app.into(),
            model: model.as_ref().to_lowercase(),
        }
    }

    pub fn table(&self) -> String {
        format!("{}_{}", self.app, self.model)
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.app, self.model)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelState {
    pub key: ModelRef,
    /// Display name, e.g. `RoomPhoto`.
    pub name: String,
    pub fields: Vec<Field>,
    pub many_to_many: Vec<ManyToMany>,
    /// Sets of field names that must be unique together.
    pub unique_together: Vec<Vec<String>>,
}

impl ModelState {
    pub fn new(app: &str, name: &str, fields: Vec<Field>, many_to_many: Vec<ManyToMany>) -> Self {
        Self {
            key: ModelRef::new(app, name),
            name: name.to_string(),
            fields,
            many_to_many,
            unique_together: Vec::new(),
        }
    }

    pub fn table(&self) -> String {
        self.key.table()
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some() || self.many_to_many.iter().any(|m| m.name == name)
    }

    pub fn primary_key(&self) -> Result<&Field, MigrationError> {
        self.fields
            .iter()
            .find(|f| f.primary_key)
            .ok_or_else(|| MigrationError::MissingPrimaryKey(self.key.clone()))
    }

    /// Association table for one of this model's many-to-many relations.
    pub fn m2m_table(&self, relation: &ManyToMany) -> String {
        format!("{}_{}", self.table(), relation.name)
    }

    /// Implicit model backing a many-to-many relation: an auto id plus one
    /// cascading foreign key to each side, unique as a pair.
    pub fn through(&self, relation: &ManyToMany) -> ModelState {
        let (from, to) = if relation.to == self.key {
            (format!("from_{}", self.key.model), format!("to_{}", relation.to.model))
        } else {
            (self.key.model.clone(), relation.to.model.clone())
        };
        let name = format!("{}_{}", self.key.model, relation.name);
        let mut through = ModelState::new(
            &self.key.app,
            &name,
            vec![
                Field::auto_pk(),
                Field::foreign_key(from.as_str(), self.key.clone(), OnDelete::Cascade),
                Field::foreign_key(to.as_str(), relation.to.clone(), OnDelete::Cascade),
            ],
            vec![],
        );
        through.unique_together.push(vec![from, to]);
        through
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectState {
    models: BTreeMap<ModelRef, ModelState>,
}

impl ProjectState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn model(&self, key: &ModelRef) -> Result<&ModelState, MigrationError> {
        self.models
            .get(key)
            .ok_or_else(|| MigrationError::ModelNotFound(key.clone()))
    }

    pub fn model_mut(&mut self, key: &ModelRef) -> Result<&mut ModelState, MigrationError> {
        self.models
            .get_mut(key)
            .ok_or_else(|| MigrationError::ModelNotFound(key.clone()))
    }

    pub fn contains(&self, key: &ModelRef) -> bool {
        self.models.contains_key(key)
    }

    pub fn add_model(&mut self, model: ModelState) -> Result<(), MigrationError> {
        if self.models.contains_key(&model.key) {
            return Err(MigrationError::DuplicateModel(model.key));
        }
        self.models.insert(model.key.clone(), model);
        Ok(())
    }

    pub fn remove_model(&mut self, key: &ModelRef) -> Result<ModelState, MigrationError> {
        self.models
            .remove(key)
            .ok_or_else(|| MigrationError::ModelNotFound(key.clone()))
    }

    pub fn model_keys(&self) -> Vec<ModelRef> {
        self.models.keys().cloned().collect()
    }
}

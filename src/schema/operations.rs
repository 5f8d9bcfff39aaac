//! Schema-change operations: each one knows how to move the in-memory state
//! forwards and how to render itself, in either direction, through a
//! `SchemaEditor`.

use serde::Serialize;

use super::editor::SchemaEditor;
use super::field::{Field, ManyToMany};
use super::state::{ModelRef, ModelState, ProjectState};
use crate::error::MigrationError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Operation {
    CreateModel {
        name: String,
        fields: Vec<Field>,
        many_to_many: Vec<ManyToMany>,
        unique_together: Vec<Vec<String>>,
    },
    /// Existing rows are backfilled with the field's literal default. With
    /// `preserve_default` false, the default is dropped from the model once
    /// the backfill is done.
    AddField {
        model: String,
        field: Field,
        preserve_default: bool,
    },
    AlterField {
        model: String,
        field: Field,
    },
    AddManyToMany {
        model: String,
        relation: ManyToMany,
    },
}

impl Operation {
    pub fn create_model(name: &str, fields: Vec<Field>) -> Self {
        Operation::CreateModel {
            name: name.to_string(),
            fields,
            many_to_many: Vec::new(),
            unique_together: Vec::new(),
        }
    }

    pub fn add_field(model: &str, field: Field, preserve_default: bool) -> Self {
        Operation::AddField {
            model: model.to_lowercase(),
            field,
            preserve_default,
        }
    }

    pub fn alter_field(model: &str, field: Field) -> Self {
        Operation::AlterField {
            model: model.to_lowercase(),
            field,
        }
    }

    pub fn add_many_to_many(model: &str, relation: ManyToMany) -> Self {
        Operation::AddManyToMany {
            model: model.to_lowercase(),
            relation,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Operation::CreateModel { name, .. } => format!("Create model {}", name),
            Operation::AddField { model, field, .. } => format!("Add field {} to {}", field.name, model),
            Operation::AlterField { model, field } => format!("Alter field {} on {}", field.name, model),
            Operation::AddManyToMany { model, relation } => {
                format!("Add field {} to {}", relation.name, model)
            }
        }
    }

    fn model_key(&self, app: &str) -> ModelRef {
        match self {
            Operation::CreateModel { name, .. } => ModelRef::new(app, name),
            Operation::AddField { model, .. }
            | Operation::AlterField { model, .. }
            | Operation::AddManyToMany { model, .. } => ModelRef::new(app, model),
        }
    }

    pub fn state_forwards(&self, app: &str, state: &mut ProjectState) -> Result<(), MigrationError> {
        let key = self.model_key(app);
        match self {
            Operation::CreateModel {
                name,
                fields,
                many_to_many,
                unique_together,
            } => {
                let mut model = ModelState::new(app, name, fields.clone(), many_to_many.clone());
                model.unique_together = unique_together.clone();
                state.add_model(model)
            }
            Operation::AddField {
                field,
                preserve_default,
                ..
            } => {
                let model = state.model_mut(&key)?;
                if model.has_field(&field.name) {
                    return Err(MigrationError::DuplicateField {
                        model: key,
                        field: field.name.clone(),
                    });
                }
                let mut field = field.clone();
                if !preserve_default {
                    field.default = None;
                }
                model.fields.push(field);
                Ok(())
            }
            Operation::AlterField { field, .. } => {
                let model = state.model_mut(&key)?;
                let slot = model
                    .fields
                    .iter_mut()
                    .find(|f| f.name == field.name)
                    .ok_or_else(|| MigrationError::FieldNotFound {
                        model: key.clone(),
                        field: field.name.clone(),
                    })?;
                *slot = field.clone();
                Ok(())
            }
            Operation::AddManyToMany { relation, .. } => {
                state.model(&relation.to)?;
                let model = state.model_mut(&key)?;
                if model.has_field(&relation.name) {
                    return Err(MigrationError::DuplicateField {
                        model: key,
                        field: relation.name.clone(),
                    });
                }
                model.many_to_many.push(relation.clone());
                Ok(())
            }
        }
    }

    /// Render the change from `from` (state before this operation) to `to`
    /// (state after it).
    pub fn database_forwards(
        &self,
        app: &str,
        editor: &mut SchemaEditor,
        from: &ProjectState,
        to: &ProjectState,
    ) -> Result<(), MigrationError> {
        let key = self.model_key(app);
        match self {
            Operation::CreateModel { .. } => editor.create_model(to.model(&key)?, to),
            Operation::AddField { field, .. } => {
                // The declared field, not the state's copy: it still carries
                // the default needed for the backfill.
                editor.add_field(from.model(&key)?, to.model(&key)?, field, to)
            }
            Operation::AlterField { field, .. } => {
                let before = from.model(&key)?;
                let old = field_of(before, &field.name)?;
                let after = to.model(&key)?;
                editor.alter_field(before, after, old, field_of(after, &field.name)?, to)
            }
            Operation::AddManyToMany { relation, .. } => editor.create_m2m(to.model(&key)?, relation, to),
        }
    }

    /// Undo the change: `from` is the state with this operation applied,
    /// `to` the state before it.
    pub fn database_backwards(
        &self,
        app: &str,
        editor: &mut SchemaEditor,
        from: &ProjectState,
        to: &ProjectState,
    ) -> Result<(), MigrationError> {
        let key = self.model_key(app);
        match self {
            Operation::CreateModel { .. } => {
                editor.delete_model(from.model(&key)?);
                Ok(())
            }
            Operation::AddField { field, .. } => {
                let before = from.model(&key)?;
                editor.remove_field(before, to.model(&key)?, field_of(before, &field.name)?, to)
            }
            Operation::AlterField { field, .. } => {
                let before = from.model(&key)?;
                let after = to.model(&key)?;
                editor.alter_field(
                    before,
                    after,
                    field_of(before, &field.name)?,
                    field_of(after, &field.name)?,
                    to,
                )
            }
            Operation::AddManyToMany { relation, .. } => {
                editor.delete_m2m(from.model(&key)?, relation);
                Ok(())
            }
        }
    }
}

fn field_of<'a>(model: &'a ModelState, name: &str) -> Result<&'a Field, MigrationError> {
    model.field(name).ok_or_else(|| MigrationError::FieldNotFound {
        model: model.key.clone(),
        field: name.to_string(),
    })
}

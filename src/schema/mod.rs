//! Declarative model descriptions and the machinery that turns changes to
//! them into SQL.

mod dialect;
mod editor;
mod field;
mod operations;
mod state;

pub use dialect::Dialect;
pub use editor::SchemaEditor;
pub use field::{Field, FieldDefault, FieldKind, ManyToMany, OnDelete, Value};
pub use operations::Operation;
pub use state::{ModelRef, ModelState, ProjectState};

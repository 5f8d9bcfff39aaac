//! Content types: the `(app_label, model)` registry generic references point into.

use crate::migrations::Migration;
use crate::schema::{Field, Operation};

pub fn migration() -> Migration {
    Migration::new("contenttypes", "0001_initial").operation(Operation::CreateModel {
        name: "ContentType".to_string(),
        fields: vec![
            Field::auto_pk(),
            Field::char("app_label", 100),
            Field::char("model", 100),
        ],
        many_to_many: vec![],
        unique_together: vec![vec!["app_label".to_string(), "model".to_string()]],
    })
}

use crate::migrations::Migration;
use crate::schema::{Field, Operation};

pub fn migration() -> Migration {
    Migration::new("auth", "0001_initial").operation(Operation::create_model(
        "Group",
        vec![Field::auto_pk(), Field::char("name", 150).unique()],
    ))
}

//! Baseline for the `core` app: the Location and Room models later units build on.

use crate::migrations::Migration;
use crate::schema::{Field, FieldKind, ModelRef, OnDelete, Operation};

pub fn migration() -> Migration {
    Migration::new("core", "0001_initial")
        .operation(Operation::create_model(
            "Location",
            vec![
                Field::uuid_pk(),
                Field::new("date_created", FieldKind::DateTime).auto_now_add(),
                Field::new("date_updated", FieldKind::DateTime).auto_now(),
                Field::new("address", FieldKind::Text),
            ],
        ))
        .operation(Operation::create_model(
            "Room",
            vec![
                Field::uuid_pk(),
                Field::new("date_created", FieldKind::DateTime).auto_now_add(),
                Field::new("date_updated", FieldKind::DateTime).auto_now(),
                Field::char("name", 255),
                Field::foreign_key("location", ModelRef::new("core", "location"), OnDelete::Cascade),
            ],
        ))
}

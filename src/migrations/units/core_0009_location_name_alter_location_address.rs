use crate::db::DEFAULT_LOCATION_NAME;
use crate::migrations::Migration;
use crate::schema::{Field, FieldDefault, FieldKind, Operation};

pub fn migration() -> Migration {
    Migration::new("core", "0009_location_name_alter_location_address")
        .depends_on("core", "0003_roomphoto")
        .operation(Operation::add_field(
            "location",
            Field::char("name", 255).default(FieldDefault::text(DEFAULT_LOCATION_NAME)),
            false,
        ))
        .operation(Operation::alter_field(
            "location",
            Field::new("address", FieldKind::Text).blank().null(),
        ))
}

use crate::migrations::Migration;
use crate::schema::{Field, FieldKind, ManyToMany, ModelRef, OnDelete, Operation};

pub fn migration() -> Migration {
    Migration::new("core", "0017_location_owners_task")
        .depends_on("auth", "0001_initial")
        .depends_on("contenttypes", "0001_initial")
        .depends_on("core", "0009_location_name_alter_location_address")
        .operation(Operation::add_many_to_many(
            "location",
            ManyToMany::new("owners", ModelRef::new("auth", "group")).related_name("owned_locations"),
        ))
        .operation(Operation::create_model(
            "Task",
            vec![
                Field::uuid_pk(),
                Field::char("name", 255),
                Field::new("description", FieldKind::Text).blank(),
                Field::new("date_scheduled", FieldKind::DateTime),
                // Generic reference: the schema does not check that `object_id`
                // exists in the table named by `content_type`.
                Field::new("object_id", FieldKind::Uuid),
                Field::foreign_key(
                    "content_type",
                    ModelRef::new("contenttypes", "contenttype"),
                    OnDelete::Cascade,
                ),
            ],
        ))
}

use crate::db::ROOM_PHOTO_UPLOAD_TO;
use crate::migrations::Migration;
use crate::schema::{Field, FieldKind, ModelRef, OnDelete, Operation};

pub fn migration() -> Migration {
    Migration::new("core", "0003_roomphoto")
        .depends_on("core", "0001_initial")
        .operation(Operation::create_model(
            "RoomPhoto",
            vec![
                Field::uuid_pk(),
                Field::new("date_created", FieldKind::DateTime).auto_now_add(),
                Field::new("date_updated", FieldKind::DateTime).auto_now(),
                // Absent until the photo is soft-deleted.
                Field::new("date_deleted", FieldKind::DateTime).blank().null(),
                Field::new(
                    "image",
                    FieldKind::Image {
                        upload_to: ROOM_PHOTO_UPLOAD_TO.to_string(),
                    },
                ),
                Field::new("caption", FieldKind::Text).blank().null(),
                Field::new("date_taken", FieldKind::Date),
                Field::foreign_key("room", ModelRef::new("core", "room"), OnDelete::Cascade),
            ],
        ))
}

//! The schema-change units, one file per unit.

mod auth_0001_initial;
mod contenttypes_0001_initial;
mod core_0001_initial;
mod core_0003_roomphoto;
mod core_0009_location_name_alter_location_address;
mod core_0017_location_owners_task;

use super::Migration;

pub(super) fn all() -> Vec<Migration> {
    vec![
        contenttypes_0001_initial::migration(),
        auth_0001_initial::migration(),
        core_0001_initial::migration(),
        core_0003_roomphoto::migration(),
        core_0009_location_name_alter_location_address::migration(),
        core_0017_location_owners_task::migration(),
    ]
}

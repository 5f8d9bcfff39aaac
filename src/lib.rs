//! Schema migrations and storage for a home-inventory database.

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod migrations;
pub mod schema;
pub mod tasks;

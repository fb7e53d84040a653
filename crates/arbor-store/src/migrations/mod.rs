//! Schema migrations for the SQLite snapshot store

pub mod checksums;
pub mod embedded;
pub mod runner;

pub use runner::apply_migrations;

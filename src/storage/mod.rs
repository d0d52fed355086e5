//! Storage layer for the code property graph

pub mod models;
pub mod sqlite;
pub mod wiki;

pub use sqlite::Database;

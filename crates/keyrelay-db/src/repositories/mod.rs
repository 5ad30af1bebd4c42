//! Repository implementations.

pub mod row_mappers;
pub mod sqlite_script_repository;

pub use sqlite_script_repository::SqliteScriptRepository;

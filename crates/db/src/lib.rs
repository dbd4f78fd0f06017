//! Record store, ORM layer, and file database for satchel.
//!
//! This crate provides the local storage model:
//! - A thin transactional wrapper over SQLite (single-writer, WAL)
//! - A lightweight ORM: source table plus named one-one / one-many /
//!   many-one relations, with version-based pruning
//! - The file database indexing cached CMS content and resolving on-disk
//!   cache locations per fileset policy

pub mod client;
pub mod error;
pub mod file_db;
pub mod orm;

pub use client::{Database, Record, execute_on, query_on, query_one_on};
pub use error::{DbError, DbResult};
pub use file_db::{FILE_STATUS_CLEAN, FILE_STATUS_STAGED, FileDb, UpdateSet};
pub use orm::{Orm, OrmModel, OrmRelation, RelationKind};

//! Database module: outbox rows and the SQL functions that manage them.
//!
//! - `model`: typed rows returned by repositories.
//! - `repo`: SQL-only functions over the `outbox` table.
//!
//! Callers import from `forum_mailer::db`; the repository API is re-exported.

pub mod model;
pub mod repo;

pub use model::OutboxItem;
pub use repo::*;

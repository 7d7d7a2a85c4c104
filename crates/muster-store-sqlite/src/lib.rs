//! SQLite backend for the muster membership synchronizer.
//!
//! Implements all three collaborator traits against a single database file,
//! wrapping [`tokio_rusqlite`] so database access runs on a dedicated thread
//! without blocking the async runtime. Also exposes the population/catalog
//! admin surface the traits deliberately exclude (seeding users, fields,
//! groups, and values).

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;

#[cfg(test)]
mod tests;

//! Core types and trait definitions for the muster membership synchronizer.
//!
//! Administrator-defined rules map profile-field values onto cohort
//! membership; this crate holds the rule model, the matching engine, and the
//! synchronization algorithms, all behind storage-agnostic collaborator
//! traits. It is deliberately free of HTTP and database dependencies.

// We intentionally use native `impl Future` trait methods (Rust 1.75+).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod error;
pub mod field;
pub mod matcher;
pub mod resolve;
pub mod rule;
pub mod ruleset;
pub mod store;
pub mod sync;

#[cfg(test)]
mod testutil;

pub use error::{Error, Result};

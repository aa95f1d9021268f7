//! # missive-store
//!
//! Persistent storage for the Missive server, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for every domain
//! model. Invariants the protocol depends on (one active chat request per
//! user pair) are enforced here with constraints so they hold at the moment
//! of write, not just at an earlier check.

pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod requests;
pub mod users;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;

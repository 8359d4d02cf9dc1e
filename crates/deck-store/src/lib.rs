//! deck-store — the versioned object store behind the remote config.
//!
//! [`ConfigStore`] is the contract the coordination layer relies on:
//! reads return the stored bytes together with an opaque [`VersionToken`],
//! and writes succeed only when the caller presents the token it last saw
//! (compare-and-swap). [`RedbConfigStore`] implements that contract on top
//! of [redb](https://docs.rs/redb), on disk or in memory.
//!
//! # Architecture
//!
//! Object bytes and their revision counters live in two tables keyed by
//! the same `&str` key. A conditional write checks and bumps the revision
//! and replaces the bytes inside a single write transaction.

pub mod error;
pub mod store;
pub mod tables;

pub use error::{StoreError, StoreResult};
pub use store::{ConfigStore, RedbConfigStore, VersionToken, Versioned};

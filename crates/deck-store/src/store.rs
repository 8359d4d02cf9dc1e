//! ConfigStore — versioned object storage with conditional writes.
//!
//! The trait is the only capability the coordination layer needs from a
//! backing store. `RedbConfigStore` provides it over redb; the in-memory
//! backend lets several "processes" share one store in tests.
//!
//! A file-backed redb database is locked exclusively by the process that
//! opened it. A second `deck` process pointed at the same path fails in
//! [`RedbConfigStore::open`] with `StoreError::Open` and never reaches the
//! lease. Cross-process lease contention therefore needs a shared backend;
//! with this one, sharing happens through clones inside a single process.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::tables::*;

/// Convert any `Display` error into a `StoreError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StoreError::$variant(e.to_string())
    };
}

/// Opaque version of a stored object, returned by every read and write.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionToken(String);

impl VersionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    fn from_revision(revision: u64) -> Self {
        Self(revision.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stored bytes together with the version they were read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    pub bytes: Vec<u8>,
    pub token: VersionToken,
}

/// Durable key/value storage with compare-and-swap writes.
pub trait ConfigStore: Send + Sync {
    /// Read an object. `None` if the key was never written.
    fn read(&self, key: &str) -> StoreResult<Option<Versioned>>;

    /// Write an object if its current version equals `expected`.
    ///
    /// `expected == None` means the key must not exist yet. Returns the new
    /// version, or [`StoreError::Conflict`] without writing anything.
    fn write(
        &self,
        key: &str,
        bytes: &[u8],
        expected: Option<&VersionToken>,
    ) -> StoreResult<VersionToken>;
}

/// Thread-safe config store backed by redb.
#[derive(Clone)]
pub struct RedbConfigStore {
    db: Arc<Database>,
}

impl RedbConfigStore {
    /// Open (or create) a persistent store at the given path.
    ///
    /// Fails with `StoreError::Open` while another handle holds the file.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "config store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory config store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(OBJECTS).map_err(map_err!(Table))?;
        txn.open_table(REVISIONS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }
}

impl ConfigStore for RedbConfigStore {
    fn read(&self, key: &str) -> StoreResult<Option<Versioned>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let objects = txn.open_table(OBJECTS).map_err(map_err!(Table))?;
        let revisions = txn.open_table(REVISIONS).map_err(map_err!(Table))?;

        let bytes = objects
            .get(key)
            .map_err(map_err!(Read))?
            .map(|guard| guard.value().to_vec());
        let revision = revisions
            .get(key)
            .map_err(map_err!(Read))?
            .map(|guard| guard.value());

        match (bytes, revision) {
            (Some(bytes), Some(revision)) => Ok(Some(Versioned {
                bytes,
                token: VersionToken::from_revision(revision),
            })),
            (None, None) => Ok(None),
            _ => Err(StoreError::Read(format!(
                "object {key} and its revision are out of sync"
            ))),
        }
    }

    fn write(
        &self,
        key: &str,
        bytes: &[u8],
        expected: Option<&VersionToken>,
    ) -> StoreResult<VersionToken> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;

        let current = {
            let revisions = txn.open_table(REVISIONS).map_err(map_err!(Table))?;
            let revision = revisions
                .get(key)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value());
            revision
        };
        let actual = current.map(VersionToken::from_revision);

        if actual.as_ref() != expected {
            txn.abort().map_err(map_err!(Transaction))?;
            debug!(%key, ?expected, ?actual, "conditional write rejected");
            return Err(StoreError::Conflict {
                key: key.to_string(),
                expected: expected.cloned(),
                actual,
            });
        }

        let next = current.unwrap_or(0) + 1;
        {
            let mut revisions = txn.open_table(REVISIONS).map_err(map_err!(Table))?;
            revisions.insert(key, next).map_err(map_err!(Write))?;
            let mut objects = txn.open_table(OBJECTS).map_err(map_err!(Table))?;
            objects.insert(key, bytes).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;

        debug!(%key, revision = next, "object stored");
        Ok(VersionToken::from_revision(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_missing_returns_none() {
        let store = RedbConfigStore::open_in_memory().unwrap();
        assert!(store.read("nope").unwrap().is_none());
    }

    #[test]
    fn create_then_read() {
        let store = RedbConfigStore::open_in_memory().unwrap();
        let token = store.write("doc", b"{}", None).unwrap();

        let read = store.read("doc").unwrap().unwrap();
        assert_eq!(read.bytes, b"{}");
        assert_eq!(read.token, token);
    }

    #[test]
    fn create_fails_when_key_exists() {
        let store = RedbConfigStore::open_in_memory().unwrap();
        store.write("doc", b"a", None).unwrap();

        let err = store.write("doc", b"b", None).unwrap_err();
        assert!(matches!(err, StoreError::Conflict { expected: None, .. }));
        assert_eq!(store.read("doc").unwrap().unwrap().bytes, b"a");
    }

    #[test]
    fn update_with_current_token_advances_version() {
        let store = RedbConfigStore::open_in_memory().unwrap();
        let first = store.write("doc", b"a", None).unwrap();
        let second = store.write("doc", b"b", Some(&first)).unwrap();

        assert_ne!(first, second);
        let read = store.read("doc").unwrap().unwrap();
        assert_eq!(read.bytes, b"b");
        assert_eq!(read.token, second);
    }

    #[test]
    fn stale_token_is_rejected_without_writing() {
        let store = RedbConfigStore::open_in_memory().unwrap();
        let first = store.write("doc", b"a", None).unwrap();
        let second = store.write("doc", b"b", Some(&first)).unwrap();

        let err = store.write("doc", b"stale", Some(&first)).unwrap_err();
        match err {
            StoreError::Conflict { actual, .. } => assert_eq!(actual, Some(second)),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!StoreError::Conflict {
            key: "doc".into(),
            expected: None,
            actual: None
        }
        .is_transient());
        assert_eq!(store.read("doc").unwrap().unwrap().bytes, b"b");
    }

    #[test]
    fn keys_are_versioned_independently() {
        let store = RedbConfigStore::open_in_memory().unwrap();
        let doc = store.write("doc", b"a", None).unwrap();
        let lease = store.write("lease", b"l", None).unwrap();

        store.write("lease", b"l2", Some(&lease)).unwrap();
        store.write("doc", b"b", Some(&doc)).unwrap();
    }

    #[test]
    fn clones_share_the_same_database() {
        let store = RedbConfigStore::open_in_memory().unwrap();
        let other = store.clone();
        other.write("doc", b"shared", None).unwrap();
        assert_eq!(store.read("doc").unwrap().unwrap().bytes, b"shared");
    }

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        let token = {
            let store = RedbConfigStore::open(&db_path).unwrap();
            store.write("doc", b"persisted", None).unwrap()
        };

        let store = RedbConfigStore::open(&db_path).unwrap();
        let read = store.read("doc").unwrap().unwrap();
        assert_eq!(read.bytes, b"persisted");
        assert_eq!(read.token, token);
    }

    #[test]
    fn second_open_of_a_held_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("held.redb");

        let first = RedbConfigStore::open(&db_path).unwrap();
        assert!(matches!(
            RedbConfigStore::open(&db_path),
            Err(StoreError::Open(_))
        ));

        drop(first);
        RedbConfigStore::open(&db_path).unwrap();
    }
}

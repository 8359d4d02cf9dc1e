//! redb table definitions for the config store.
//!
//! Both tables share the object key, e.g. `remote-config/{namespace}/{deployment}`
//! or `leases/{namespace}/{name}`.

use redb::TableDefinition;

/// Object payloads (JSON bytes).
pub const OBJECTS: TableDefinition<&str, &[u8]> = TableDefinition::new("objects");

/// Monotonic revision per object, bumped on every successful write.
pub const REVISIONS: TableDefinition<&str, u64> = TableDefinition::new("revisions");

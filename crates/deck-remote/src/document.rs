//! The persisted remote config document and its versioned codec.
//!
//! Stored bytes are first decoded into a raw JSON value so the migration
//! engine can upgrade older layouts. Only a value at [`SCHEMA_VERSION`] is
//! decoded into the typed [`RemoteConfigDocument`], and only a typed
//! document at that version is ever encoded back.

use std::collections::BTreeMap;

use deck_core::{Cluster, ClusterRef, Component, ComponentId, ComponentType};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{RemoteConfigError, RemoteConfigResult};
use crate::registry::ComponentsRegistry;

/// Schema version written by this build.
pub const SCHEMA_VERSION: u32 = 3;

pub type ClusterMap = BTreeMap<ClusterRef, Cluster>;
pub type ComponentMap = BTreeMap<ComponentType, BTreeMap<ComponentId, Component>>;

/// One applied schema migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRecord {
    /// Version the document was migrated to.
    pub version: u32,
    pub migrated_at: u64,
    pub migrated_by: String,
    pub from_version: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    #[serde(default)]
    pub migrations: Vec<MigrationRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_version: Option<String>,
}

/// Versioned description of a deployment's topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfigDocument {
    #[serde(default)]
    pub metadata: DocumentMetadata,
    pub version: u32,
    #[serde(default)]
    pub clusters: ClusterMap,
    #[serde(default)]
    pub components: ComponentMap,
    #[serde(default)]
    pub command_history: Vec<String>,
    #[serde(default)]
    pub last_executed_command: String,
    #[serde(default)]
    pub flags: BTreeMap<String, String>,
}

/// The command being executed, recorded into the document on persist.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Invocation {
    pub command: String,
    pub flags: BTreeMap<String, String>,
}

impl Invocation {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            flags: BTreeMap::new(),
        }
    }

    pub fn with_flag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.flags.insert(name.into(), value.into());
        self
    }
}

impl Default for RemoteConfigDocument {
    fn default() -> Self {
        Self {
            metadata: DocumentMetadata::default(),
            version: SCHEMA_VERSION,
            clusters: ClusterMap::new(),
            components: ComponentMap::new(),
            command_history: Vec::new(),
            last_executed_command: String::new(),
            flags: BTreeMap::new(),
        }
    }
}

impl RemoteConfigDocument {
    /// A copy of the cluster and component maps to mutate.
    pub fn registry(&self) -> ComponentsRegistry {
        ComponentsRegistry::new(self.clusters.clone(), self.components.clone())
    }

    pub fn set_registry(&mut self, registry: ComponentsRegistry) {
        let (clusters, components) = registry.into_parts();
        self.clusters = clusters;
        self.components = components;
    }

    /// Append the invocation to the command history and stamp metadata.
    pub fn record_invocation(&mut self, invocation: &Invocation, updated_by: &str, now: u64) {
        self.command_history.push(invocation.command.clone());
        self.last_executed_command = invocation.command.clone();
        self.flags
            .extend(invocation.flags.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.metadata.last_updated_at = Some(now);
        self.metadata.last_updated_by = Some(updated_by.to_string());
        self.metadata.tool_version = Some(env!("CARGO_PKG_VERSION").to_string());
    }

    /// Encode for storage. Refuses documents not at the current schema.
    pub fn encode(&self) -> RemoteConfigResult<Vec<u8>> {
        if self.version != SCHEMA_VERSION {
            return Err(RemoteConfigError::UnsupportedSchemaVersion {
                found: self.version.into(),
                supported: SCHEMA_VERSION,
            });
        }
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Decode a raw value that has already been migrated to the current schema.
    pub fn from_raw(raw: Value) -> RemoteConfigResult<Self> {
        let version = schema_version(&raw)?;
        if version > SCHEMA_VERSION {
            return Err(RemoteConfigError::UnsupportedSchemaVersion {
                found: version.into(),
                supported: SCHEMA_VERSION,
            });
        }
        if version < SCHEMA_VERSION {
            return Err(RemoteConfigError::MigrationGap {
                version,
                target: SCHEMA_VERSION,
            });
        }
        Ok(serde_json::from_value(raw)?)
    }
}

/// Parse stored bytes into a raw, not yet migrated, value.
pub fn decode_raw(bytes: &[u8]) -> RemoteConfigResult<Value> {
    let raw: Value = serde_json::from_slice(bytes)?;
    if !raw.is_object() {
        return Err(malformed("remote config document must be a JSON object"));
    }
    Ok(raw)
}

/// Schema version recorded in a raw document. Documents written before
/// versioning carry no field and read as version 0. A field that is present
/// must be a non-negative integer.
pub fn schema_version(raw: &Value) -> RemoteConfigResult<u32> {
    let Some(field) = raw.get("version") else {
        return Ok(0);
    };
    let Some(version) = field.as_u64() else {
        return Err(malformed(&format!(
            "schema version must be a non-negative integer, found {field}"
        )));
    };
    u32::try_from(version).map_err(|_| RemoteConfigError::UnsupportedSchemaVersion {
        found: version,
        supported: SCHEMA_VERSION,
    })
}

pub(crate) fn malformed(msg: &str) -> RemoteConfigError {
    RemoteConfigError::Codec(<serde_json::Error as serde::de::Error>::custom(msg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use deck_core::DeploymentPhase;

    fn sample() -> RemoteConfigDocument {
        let mut doc = RemoteConfigDocument::default();
        let mut registry = doc.registry();
        registry.add_cluster("c1", Cluster::new("kind-c1", "deck", "mainnet"));
        registry
            .add_new_component(Component::consensus_node("node1", "c1", "deck", 0))
            .unwrap();
        doc.set_registry(registry);
        doc
    }

    #[test]
    fn encodes_external_field_names() {
        let doc = sample();
        let raw = decode_raw(&doc.encode().unwrap()).unwrap();

        assert_eq!(raw["version"], 3);
        assert_eq!(raw["clusters"]["c1"]["dnsBaseDomain"], "cluster.local");
        assert_eq!(raw["components"]["consensusNode"]["0"]["name"], "node1");
        assert_eq!(raw["components"]["consensusNode"]["0"]["phase"], "requested");
        assert!(raw["commandHistory"].as_array().unwrap().is_empty());
        assert!(raw["metadata"]["migrations"].as_array().unwrap().is_empty());
    }

    #[test]
    fn decode_restores_typed_document() {
        let doc = sample();
        let raw = decode_raw(&doc.encode().unwrap()).unwrap();
        let back = RemoteConfigDocument::from_raw(raw).unwrap();

        assert_eq!(back, doc);
        let node = &back.components[&ComponentType::ConsensusNode][&0];
        assert_eq!(node.phase, DeploymentPhase::Requested);
    }

    #[test]
    fn record_invocation_appends_history_and_flags() {
        let mut doc = sample();
        let invocation = Invocation::new("consensus node add node2").with_flag("cluster", "c1");
        doc.record_invocation(&invocation, "alice@host:1", 1234);

        assert_eq!(doc.command_history, vec!["consensus node add node2"]);
        assert_eq!(doc.last_executed_command, "consensus node add node2");
        assert_eq!(doc.flags.get("cluster").map(String::as_str), Some("c1"));
        assert_eq!(doc.metadata.last_updated_at, Some(1234));
        assert_eq!(doc.metadata.last_updated_by.as_deref(), Some("alice@host:1"));
    }

    #[test]
    fn from_raw_rejects_old_and_new_versions() {
        let old = serde_json::json!({ "version": 1 });
        assert!(matches!(
            RemoteConfigDocument::from_raw(old),
            Err(RemoteConfigError::MigrationGap { version: 1, .. })
        ));

        let new = serde_json::json!({ "version": 9 });
        assert!(matches!(
            RemoteConfigDocument::from_raw(new),
            Err(RemoteConfigError::UnsupportedSchemaVersion { found: 9, .. })
        ));
    }

    #[test]
    fn decode_raw_rejects_non_objects() {
        assert!(decode_raw(b"[1, 2]").is_err());
        assert!(decode_raw(b"not json").is_err());
    }

    #[test]
    fn missing_version_reads_as_zero() {
        assert_eq!(schema_version(&serde_json::json!({})).unwrap(), 0);
        assert_eq!(schema_version(&serde_json::json!({ "version": 2 })).unwrap(), 2);
    }

    #[test]
    fn malformed_version_is_a_codec_error() {
        for version in [
            serde_json::json!(-1),
            serde_json::json!("3"),
            serde_json::json!(2.5),
            serde_json::Value::Null,
        ] {
            let raw = serde_json::json!({ "version": version });
            assert!(
                matches!(schema_version(&raw), Err(RemoteConfigError::Codec(_))),
                "{raw}"
            );
        }
    }

    #[test]
    fn version_beyond_u32_is_unsupported() {
        let raw = serde_json::json!({ "version": 4_294_967_296u64 });
        assert!(matches!(
            schema_version(&raw),
            Err(RemoteConfigError::UnsupportedSchemaVersion {
                found: 4_294_967_296,
                ..
            })
        ));
    }
}

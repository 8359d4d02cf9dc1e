//! Schema migrations for stored remote config documents.
//!
//! Each migration accepts a half-open range of source versions and
//! produces a document at its target version. The engine walks a raw
//! document forward one migration at a time until it reaches the current
//! schema, recording every step in `metadata.migrations`. Migrations work
//! on a copy; the input value is never touched.

use std::collections::BTreeSet;
use std::ops::Range;

use deck_core::{Cluster, ComponentType, DeploymentPhase, NodeState};
use serde_json::{Map, Value, json};
use tracing::info;

use crate::document::{MigrationRecord, SCHEMA_VERSION, malformed, schema_version};
use crate::error::{RemoteConfigError, RemoteConfigResult, ValidationError};

/// A pure upgrade of a raw document to a newer schema version.
pub trait Migration: Send + Sync {
    fn name(&self) -> &'static str;

    /// Source versions this migration accepts.
    fn source_versions(&self) -> Range<u32>;

    fn target_version(&self) -> u32;

    /// Produce the upgraded document. The engine stamps `version` and the
    /// migration history afterwards.
    fn apply(&self, document: &Value) -> RemoteConfigResult<Value>;
}

/// Ordered set of migrations leading up to one current version.
pub struct MigrationEngine {
    current_version: u32,
    migrations: Vec<Box<dyn Migration>>,
}

impl MigrationEngine {
    pub fn new(current_version: u32) -> Self {
        Self {
            current_version,
            migrations: Vec::new(),
        }
    }

    /// Engine with every migration shipped in this build.
    pub fn standard() -> Self {
        Self::new(SCHEMA_VERSION)
            .with_migration(ComponentIdsMigration)
            .with_migration(LifecyclePhaseMigration)
    }

    pub fn with_migration(mut self, migration: impl Migration + 'static) -> Self {
        self.migrations.push(Box::new(migration));
        self
    }

    pub fn current_version(&self) -> u32 {
        self.current_version
    }

    /// Whether `document` is older than the current version. A document
    /// with a malformed version field is reported as not needing migration;
    /// [`MigrationEngine::migrate`] rejects it.
    pub fn needs_migration(&self, document: &Value) -> bool {
        schema_version(document).is_ok_and(|v| v < self.current_version)
    }

    /// Upgrade `document` to the current version.
    ///
    /// A document already at the current version comes back unchanged.
    pub fn migrate(&self, document: &Value, migrated_by: &str, now: u64) -> RemoteConfigResult<Value> {
        let mut version = schema_version(document)?;
        if version > self.current_version {
            return Err(RemoteConfigError::UnsupportedSchemaVersion {
                found: version.into(),
                supported: self.current_version,
            });
        }

        let mut migrated = document.clone();
        while version < self.current_version {
            let gap = RemoteConfigError::MigrationGap {
                version,
                target: self.current_version,
            };
            let Some(migration) = self
                .migrations
                .iter()
                .find(|m| m.source_versions().contains(&version))
            else {
                return Err(gap);
            };

            let target = migration.target_version();
            if target <= version || target > self.current_version {
                return Err(gap);
            }

            let mut next = migration.apply(&migrated)?;
            stamp(
                &mut next,
                MigrationRecord {
                    version: target,
                    migrated_at: now,
                    migrated_by: migrated_by.to_string(),
                    from_version: version,
                },
            )?;
            info!(migration = migration.name(), from = version, to = target, "document migrated");

            migrated = next;
            version = target;
        }

        Ok(migrated)
    }
}

/// Set `version` and append the record to `metadata.migrations`.
fn stamp(document: &mut Value, record: MigrationRecord) -> RemoteConfigResult<()> {
    let root = object_mut(document, "document")?;
    root.insert("version".to_string(), json!(record.version));

    let metadata = root.entry("metadata").or_insert_with(|| json!({}));
    let migrations = object_mut(metadata, "metadata")?
        .entry("migrations")
        .or_insert_with(|| json!([]));
    migrations
        .as_array_mut()
        .ok_or_else(|| malformed("metadata.migrations must be an array"))?
        .push(serde_json::to_value(record)?);
    Ok(())
}

fn object_mut<'a>(value: &'a mut Value, what: &str) -> RemoteConfigResult<&'a mut Map<String, Value>> {
    value
        .as_object_mut()
        .ok_or_else(|| malformed(&format!("{what} must be a JSON object")))
}

fn id_space_exhausted(type_key: &str) -> RemoteConfigError {
    match type_key.parse::<ComponentType>() {
        Ok(component_type) => ValidationError::IdSpaceExhausted { component_type }.into(),
        Err(_) => malformed(&format!("no free component id left under '{type_key}'")),
    }
}

// ── Built-in migrations ───────────────────────────────────────────

/// Version 1 keyed components by name. Rekey them by per-type numeric id.
///
/// Consensus nodes keep their `nodeId` as their id when it is free; every
/// other component gets the next id in name order.
pub struct ComponentIdsMigration;

impl Migration for ComponentIdsMigration {
    fn name(&self) -> &'static str {
        "component-ids"
    }

    fn source_versions(&self) -> Range<u32> {
        0..2
    }

    fn target_version(&self) -> u32 {
        2
    }

    fn apply(&self, document: &Value) -> RemoteConfigResult<Value> {
        let mut next = document.clone();
        let Some(components) = object_mut(&mut next, "document")?.get_mut("components") else {
            return Ok(document.clone());
        };

        for (type_key, by_name) in object_mut(components, "components")?.iter_mut() {
            let is_consensus = type_key == ComponentType::ConsensusNode.as_str();
            let entries = std::mem::take(object_mut(by_name, "component group")?);

            let mut used = BTreeSet::new();
            let mut assigned = Vec::with_capacity(entries.len());
            let mut pending = Vec::new();

            for (name, body) in entries {
                let node_id = body.get("nodeId").and_then(Value::as_u64);
                match node_id {
                    Some(id) if is_consensus && used.insert(id) => assigned.push((id, name, body)),
                    _ => pending.push((name, body)),
                }
            }
            for (name, body) in pending {
                let id = match used.last() {
                    None => 0,
                    Some(max) => max.checked_add(1).ok_or_else(|| id_space_exhausted(type_key))?,
                };
                used.insert(id);
                assigned.push((id, name, body));
            }

            let rekeyed = object_mut(by_name, "component group")?;
            for (id, name, mut body) in assigned {
                let fields = object_mut(&mut body, "component")?;
                fields.insert("id".to_string(), json!(id));
                fields.entry("name").or_insert_with(|| json!(name));
                fields.entry("type").or_insert_with(|| json!(type_key));
                if is_consensus {
                    fields.insert("nodeId".to_string(), json!(id));
                }
                rekeyed.insert(id.to_string(), body);
            }
        }

        Ok(next)
    }
}

/// Version 2 components carried a legacy `state` string. Replace it with a
/// `phase`, keep consensus node state as `nodeState`, and fill in cluster
/// DNS settings that older tools never wrote.
pub struct LifecyclePhaseMigration;

impl LifecyclePhaseMigration {
    fn phase_for(state: &str) -> DeploymentPhase {
        match state {
            "deployed" => DeploymentPhase::Deployed,
            "started" | "active" => DeploymentPhase::Started,
            "stopped" => DeploymentPhase::Stopped,
            "frozen" => DeploymentPhase::Frozen,
            "deleted" => DeploymentPhase::Deleted,
            _ => DeploymentPhase::Requested,
        }
    }
}

impl Migration for LifecyclePhaseMigration {
    fn name(&self) -> &'static str {
        "lifecycle-phase"
    }

    fn source_versions(&self) -> Range<u32> {
        2..3
    }

    fn target_version(&self) -> u32 {
        3
    }

    fn apply(&self, document: &Value) -> RemoteConfigResult<Value> {
        let mut next = document.clone();
        let root = object_mut(&mut next, "document")?;

        if let Some(clusters) = root.get_mut("clusters") {
            for cluster in object_mut(clusters, "clusters")?.values_mut() {
                let fields = object_mut(cluster, "cluster")?;
                fields
                    .entry("dnsBaseDomain")
                    .or_insert_with(|| json!(Cluster::DEFAULT_DNS_BASE_DOMAIN));
                fields
                    .entry("dnsConsensusNodePattern")
                    .or_insert_with(|| json!(Cluster::DEFAULT_DNS_CONSENSUS_NODE_PATTERN));
            }
        }

        if let Some(components) = root.get_mut("components") {
            for (type_key, by_id) in object_mut(components, "components")?.iter_mut() {
                let is_consensus = type_key == ComponentType::ConsensusNode.as_str();
                for body in object_mut(by_id, "component group")?.values_mut() {
                    let fields = object_mut(body, "component")?;
                    let Some(state) = fields.remove("state") else {
                        continue;
                    };
                    let state = state.as_str().unwrap_or_default().to_string();

                    fields
                        .entry("phase")
                        .or_insert_with(|| json!(Self::phase_for(&state)));
                    if is_consensus {
                        let node_state = state.parse::<NodeState>().unwrap_or_default();
                        fields.entry("nodeState").or_insert_with(|| json!(node_state));
                    }
                }
            }
        }

        Ok(next)
    }
}

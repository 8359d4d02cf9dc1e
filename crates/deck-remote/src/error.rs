//! Error types for the remote config subsystem.

use std::fmt;

use deck_core::{ClusterRef, ComponentId, ComponentType, DeploymentPhase, NodeId};
use deck_store::StoreError;
use thiserror::Error;

/// Result type alias for remote config operations.
pub type RemoteConfigResult<T> = Result<T, RemoteConfigError>;

/// A broken document invariant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{component_type} '{name}' already exists")]
    DuplicateComponent {
        component_type: ComponentType,
        name: String,
    },

    #[error("{component_type} id {id} is used by more than one component")]
    DuplicateId {
        component_type: ComponentType,
        id: ComponentId,
    },

    #[error("consensus node id {node_id} is used by more than one consensus node")]
    DuplicateNodeId { node_id: NodeId },

    #[error("{component_type} '{name}' references unknown cluster '{cluster}'")]
    DanglingClusterReference {
        component_type: ComponentType,
        name: String,
        cluster: ClusterRef,
    },

    #[error("{component_type} '{name}' cannot move from {from} to {to}")]
    IllegalPhaseTransition {
        component_type: ComponentType,
        name: String,
        from: DeploymentPhase,
        to: DeploymentPhase,
    },

    #[error("new {component_type} '{name}' must start in requested, not {phase}")]
    NotInitialPhase {
        component_type: ComponentType,
        name: String,
        phase: DeploymentPhase,
    },

    #[error("no {component_type} id left to allocate")]
    IdSpaceExhausted { component_type: ComponentType },

    #[error("{component_type} '{name}' is stored under id {key} but carries id {id}")]
    IdMismatch {
        component_type: ComponentType,
        name: String,
        key: ComponentId,
        id: ComponentId,
    },

    #[error("'{name}' is stored under {component_type} but is a {found}")]
    TypeMismatch {
        component_type: ComponentType,
        name: String,
        found: ComponentType,
    },
}

/// What a failed lookup was looking for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Name(ComponentType, String),
    Id(ComponentType, ComponentId),
    Cluster(ClusterRef),
}

impl fmt::Display for Lookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lookup::Name(t, name) => write!(f, "{t} '{name}'"),
            Lookup::Id(t, id) => write!(f, "{t} with id {id}"),
            Lookup::Cluster(cluster) => write!(f, "cluster '{cluster}'"),
        }
    }
}

/// Errors surfaced by the registry, lease, migration engine, and manager.
#[derive(Debug, Error)]
pub enum RemoteConfigError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("document invalid after mutation: {}", join(.0))]
    InvalidDocument(Vec<ValidationError>),

    #[error("not found: {0}")]
    NotFound(Lookup),

    #[error("document {key} was modified concurrently; reload and retry")]
    Conflict { key: String },

    #[error("lease {lease} is held by {holder} until {expires_at}")]
    LeaseHeldByOther {
        lease: String,
        holder: String,
        expires_at: u64,
    },

    #[error("lease {lease} was lost: {reason}")]
    LeaseLost { lease: String, reason: String },

    #[error("no migration accepts schema version {version} (target {target})")]
    MigrationGap { version: u32, target: u32 },

    #[error("schema version {found} is newer than supported version {supported}")]
    UnsupportedSchemaVersion { found: u64, supported: u32 },

    #[error("malformed document: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("store error: {0}")]
    Store(StoreError),
}

impl RemoteConfigError {
    /// Whether a fresh `mutate` cycle may succeed where this one failed.
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteConfigError::Conflict { .. }
            | RemoteConfigError::LeaseLost { .. }
            | RemoteConfigError::LeaseHeldByOther { .. } => true,
            RemoteConfigError::Store(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<StoreError> for RemoteConfigError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict { key, .. } => RemoteConfigError::Conflict { key },
            other => RemoteConfigError::Store(other),
        }
    }
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_conflict_becomes_remote_conflict() {
        let err: RemoteConfigError = StoreError::Conflict {
            key: "remote-config/ns/d".into(),
            expected: None,
            actual: None,
        }
        .into();
        assert!(matches!(err, RemoteConfigError::Conflict { ref key } if key == "remote-config/ns/d"));
        assert!(err.is_retryable());
    }

    #[test]
    fn migration_gap_is_not_retryable() {
        let err = RemoteConfigError::MigrationGap {
            version: 1,
            target: 3,
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn invalid_document_lists_every_violation() {
        let err = RemoteConfigError::InvalidDocument(vec![
            ValidationError::DuplicateNodeId { node_id: 1 },
            ValidationError::DanglingClusterReference {
                component_type: ComponentType::BlockNode,
                name: "block-1".into(),
                cluster: "gone".into(),
            },
        ]);
        let msg = err.to_string();
        assert!(msg.contains("node id 1"));
        assert!(msg.contains("unknown cluster 'gone'"));
    }
}

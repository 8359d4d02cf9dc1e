//! Domain types describing a deployment's topology.
//!
//! Components never own their cluster. They carry a [`ClusterRef`] that is
//! resolved against the document's cluster map, so the two never form a
//! reference cycle.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Key into the cluster map of a remote config document.
pub type ClusterRef = String;

/// Per-type numeric identifier of a component.
pub type ComponentId = u64;

/// Consensus node identifier within the network.
pub type NodeId = u64;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown {kind}: {value}")]
pub struct ParseError {
    kind: &'static str,
    value: String,
}

impl ParseError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

// ── Cluster ───────────────────────────────────────────────────────

/// A Kubernetes-style cluster hosting part of a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    pub name: String,
    pub namespace: String,
    /// Name of the deployment that owns this cluster entry.
    pub deployment: String,
    pub dns_base_domain: String,
    /// Pattern used to address consensus nodes, e.g.
    /// `network-{nodeAlias}-svc.{namespace}.svc`.
    pub dns_consensus_node_pattern: String,
}

impl Cluster {
    pub const DEFAULT_DNS_BASE_DOMAIN: &'static str = "cluster.local";
    pub const DEFAULT_DNS_CONSENSUS_NODE_PATTERN: &'static str =
        "network-{nodeAlias}-svc.{namespace}.svc";

    /// Cluster entry with default DNS settings.
    pub fn new(name: &str, namespace: &str, deployment: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            deployment: deployment.to_string(),
            dns_base_domain: Self::DEFAULT_DNS_BASE_DOMAIN.to_string(),
            dns_consensus_node_pattern: Self::DEFAULT_DNS_CONSENSUS_NODE_PATTERN.to_string(),
        }
    }

    /// Fully qualified address of a consensus node in this cluster.
    pub fn consensus_node_address(&self, node_alias: &str) -> String {
        let host = self
            .dns_consensus_node_pattern
            .replace("{nodeAlias}", node_alias)
            .replace("{namespace}", &self.namespace);
        format!("{host}.{}", self.dns_base_domain)
    }
}

// ── Component type ────────────────────────────────────────────────

/// Kind of runtime component tracked in the remote config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ComponentType {
    ConsensusNode,
    BlockNode,
    RelayNode,
    MirrorNode,
    HaProxy,
    EnvoyProxy,
    Explorer,
}

impl ComponentType {
    pub const ALL: [ComponentType; 7] = [
        ComponentType::ConsensusNode,
        ComponentType::BlockNode,
        ComponentType::RelayNode,
        ComponentType::MirrorNode,
        ComponentType::HaProxy,
        ComponentType::EnvoyProxy,
        ComponentType::Explorer,
    ];

    /// Name used in stored documents and on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentType::ConsensusNode => "consensusNode",
            ComponentType::BlockNode => "blockNode",
            ComponentType::RelayNode => "relayNode",
            ComponentType::MirrorNode => "mirrorNode",
            ComponentType::HaProxy => "haProxy",
            ComponentType::EnvoyProxy => "envoyProxy",
            ComponentType::Explorer => "explorer",
        }
    }
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComponentType {
    type Err = ParseError;

    /// Accepts the stored camelCase name or a kebab-case spelling.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s.chars().filter(|c| *c != '-' && *c != '_').collect();
        ComponentType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(&normalized))
            .ok_or_else(|| ParseError::new("component type", s))
    }
}

// ── Lifecycle phase ───────────────────────────────────────────────

/// Lifecycle phase of a single component.
///
/// ```text
/// requested → deploying → deployed → configured → starting → started
/// started → stopping → stopped → starting
/// started → freezing → frozen → starting
/// (any non-terminal) → deleting → deleted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentPhase {
    #[default]
    Requested,
    Deploying,
    Deployed,
    Configured,
    Starting,
    Started,
    Stopping,
    Stopped,
    Freezing,
    Frozen,
    Deleting,
    Deleted,
}

impl DeploymentPhase {
    pub const ALL: [DeploymentPhase; 12] = [
        DeploymentPhase::Requested,
        DeploymentPhase::Deploying,
        DeploymentPhase::Deployed,
        DeploymentPhase::Configured,
        DeploymentPhase::Starting,
        DeploymentPhase::Started,
        DeploymentPhase::Stopping,
        DeploymentPhase::Stopped,
        DeploymentPhase::Freezing,
        DeploymentPhase::Frozen,
        DeploymentPhase::Deleting,
        DeploymentPhase::Deleted,
    ];

    pub fn is_terminal(self) -> bool {
        self == DeploymentPhase::Deleted
    }

    /// Whether `self → next` is a legal lifecycle transition.
    pub fn can_transition_to(self, next: DeploymentPhase) -> bool {
        use DeploymentPhase::*;

        match (self, next) {
            (Requested, Deploying)
            | (Deploying, Deployed)
            | (Deployed, Configured)
            | (Configured, Starting)
            | (Starting, Started)
            | (Started, Stopping)
            | (Stopping, Stopped)
            | (Stopped, Starting)
            | (Started, Freezing)
            | (Freezing, Frozen)
            | (Frozen, Starting)
            | (Deleting, Deleted) => true,
            (from, Deleting) => !from.is_terminal() && from != Deleting,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentPhase::Requested => "requested",
            DeploymentPhase::Deploying => "deploying",
            DeploymentPhase::Deployed => "deployed",
            DeploymentPhase::Configured => "configured",
            DeploymentPhase::Starting => "starting",
            DeploymentPhase::Started => "started",
            DeploymentPhase::Stopping => "stopping",
            DeploymentPhase::Stopped => "stopped",
            DeploymentPhase::Freezing => "freezing",
            DeploymentPhase::Frozen => "frozen",
            DeploymentPhase::Deleting => "deleting",
            DeploymentPhase::Deleted => "deleted",
        }
    }
}

impl fmt::Display for DeploymentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentPhase {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeploymentPhase::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseError::new("deployment phase", s))
    }
}

/// Node-specific state of a consensus node, tracked alongside its phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    #[default]
    Requested,
    Initialized,
    Setup,
    Started,
    Frozen,
    Stopped,
    NonDeployed,
}

impl NodeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeState::Requested => "requested",
            NodeState::Initialized => "initialized",
            NodeState::Setup => "setup",
            NodeState::Started => "started",
            NodeState::Frozen => "frozen",
            NodeState::Stopped => "stopped",
            NodeState::NonDeployed => "non_deployed",
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeState {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "requested" => Ok(NodeState::Requested),
            "initialized" => Ok(NodeState::Initialized),
            "setup" => Ok(NodeState::Setup),
            "started" => Ok(NodeState::Started),
            "frozen" => Ok(NodeState::Frozen),
            "stopped" => Ok(NodeState::Stopped),
            "non_deployed" => Ok(NodeState::NonDeployed),
            _ => Err(ParseError::new("node state", s)),
        }
    }
}

// ── Component ─────────────────────────────────────────────────────

/// A deployed runtime component.
///
/// The `id` is assigned by the registry when the component is added and
/// is unique within the component's type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    pub id: ComponentId,
    pub name: String,
    pub cluster: ClusterRef,
    pub namespace: String,
    pub phase: DeploymentPhase,
    #[serde(flatten)]
    pub kind: ComponentKind,
}

/// Type-specific component data, tagged with the component type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ComponentKind {
    ConsensusNode {
        node_id: NodeId,
        #[serde(default)]
        node_state: NodeState,
    },
    BlockNode,
    RelayNode {
        #[serde(default)]
        consensus_node_ids: Vec<NodeId>,
    },
    MirrorNode,
    HaProxy,
    EnvoyProxy,
    Explorer,
}

impl ComponentKind {
    pub fn component_type(&self) -> ComponentType {
        match self {
            ComponentKind::ConsensusNode { .. } => ComponentType::ConsensusNode,
            ComponentKind::BlockNode => ComponentType::BlockNode,
            ComponentKind::RelayNode { .. } => ComponentType::RelayNode,
            ComponentKind::MirrorNode => ComponentType::MirrorNode,
            ComponentKind::HaProxy => ComponentType::HaProxy,
            ComponentKind::EnvoyProxy => ComponentType::EnvoyProxy,
            ComponentKind::Explorer => ComponentType::Explorer,
        }
    }

    /// Kind with default type-specific data, used when only the type is known.
    pub fn default_for(component_type: ComponentType) -> Self {
        match component_type {
            ComponentType::ConsensusNode => ComponentKind::ConsensusNode {
                node_id: 0,
                node_state: NodeState::default(),
            },
            ComponentType::BlockNode => ComponentKind::BlockNode,
            ComponentType::RelayNode => ComponentKind::RelayNode {
                consensus_node_ids: Vec::new(),
            },
            ComponentType::MirrorNode => ComponentKind::MirrorNode,
            ComponentType::HaProxy => ComponentKind::HaProxy,
            ComponentType::EnvoyProxy => ComponentKind::EnvoyProxy,
            ComponentType::Explorer => ComponentKind::Explorer,
        }
    }
}

impl Component {
    /// A new component in the `requested` phase. The id is a placeholder
    /// until the registry assigns one.
    pub fn new(name: &str, cluster: &str, namespace: &str, kind: ComponentKind) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
            cluster: cluster.to_string(),
            namespace: namespace.to_string(),
            phase: DeploymentPhase::Requested,
            kind,
        }
    }

    pub fn consensus_node(name: &str, cluster: &str, namespace: &str, node_id: NodeId) -> Self {
        Self::new(
            name,
            cluster,
            namespace,
            ComponentKind::ConsensusNode {
                node_id,
                node_state: NodeState::Requested,
            },
        )
    }

    pub fn component_type(&self) -> ComponentType {
        self.kind.component_type()
    }

    /// Consensus node id, if this is a consensus node.
    pub fn node_id(&self) -> Option<NodeId> {
        match &self.kind {
            ComponentKind::ConsensusNode { node_id, .. } => Some(*node_id),
            _ => None,
        }
    }
}

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use deck_core::{ComponentType, DeploymentPhase, NodeState, NodeId};

mod commands;

use commands::Context;

#[derive(Parser)]
#[command(
    name = "deck",
    about = "Deck — coordinated remote config for multi-cluster deployments",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Path to deck.toml
    #[arg(long, global = true, default_value = "deck.toml")]
    config: PathBuf,
    /// Override [deployment].namespace
    #[arg(long, global = true)]
    namespace: Option<String>,
    /// Override [deployment].name
    #[arg(long, global = true)]
    deployment: Option<String>,
    /// Override [store].path
    #[arg(long, global = true)]
    store: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a deck.toml scaffold for --deployment and --namespace
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Manage clusters of the deployment
    Cluster {
        #[command(subcommand)]
        action: ClusterAction,
    },
    /// Manage deployed components
    Component {
        #[command(subcommand)]
        action: ComponentAction,
    },
    /// Consensus node shortcuts
    Node {
        #[command(subcommand)]
        action: NodeAction,
    },
    /// Print the current remote config as JSON
    Show,
    /// Print the command history recorded in the remote config
    History,
    /// Inspect the deployment lease
    Lease {
        #[command(subcommand)]
        action: LeaseAction,
    },
}

#[derive(Subcommand)]
enum ClusterAction {
    /// Register (or replace) a cluster under a reference
    Add {
        /// Cluster reference used by components
        reference: String,
        /// Kubernetes cluster name (defaults to the reference)
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        dns_base_domain: Option<String>,
        /// Pattern for consensus node addresses, with {nodeAlias} and {namespace}
        #[arg(long)]
        dns_consensus_node_pattern: Option<String>,
    },
}

#[derive(Subcommand)]
enum ComponentAction {
    /// Add a component of the given type (e.g. consensus-node, block-node)
    Add {
        component_type: ComponentType,
        name: String,
        /// Cluster reference the component is placed on
        #[arg(long)]
        cluster: String,
        /// Consensus node id (defaults to the next free one)
        #[arg(long)]
        node_id: Option<NodeId>,
        /// Consensus node ids a relay node serves
        #[arg(long, value_delimiter = ',')]
        relay_for: Vec<NodeId>,
    },
    /// Remove a component
    Remove {
        component_type: ComponentType,
        name: String,
    },
    /// Move a component to another lifecycle phase
    Phase {
        component_type: ComponentType,
        name: String,
        phase: DeploymentPhase,
    },
}

#[derive(Subcommand)]
enum NodeAction {
    /// Move a consensus node to another lifecycle phase
    Phase { name: String, phase: DeploymentPhase },
    /// Set the node-specific state of a consensus node
    State { name: String, state: NodeState },
}

#[derive(Subcommand)]
enum LeaseAction {
    /// Show who holds the deployment lease
    Status,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("deck=info".parse()?)
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let command_line = std::iter::once("deck".to_string())
        .chain(std::env::args().skip(1))
        .collect::<Vec<_>>()
        .join(" ");
    let ctx = Context {
        config: cli.config,
        namespace: cli.namespace,
        deployment: cli.deployment,
        store: cli.store,
        command_line,
    };

    match cli.command {
        Commands::Init { force } => commands::init::init(&ctx, force),
        Commands::Cluster { action } => match action {
            ClusterAction::Add {
                reference,
                name,
                dns_base_domain,
                dns_consensus_node_pattern,
            } => commands::cluster::add(
                &ctx,
                &reference,
                name.as_deref(),
                dns_base_domain.as_deref(),
                dns_consensus_node_pattern.as_deref(),
            ),
        },
        Commands::Component { action } => match action {
            ComponentAction::Add {
                component_type,
                name,
                cluster,
                node_id,
                relay_for,
            } => commands::component::add(&ctx, component_type, &name, &cluster, node_id, relay_for),
            ComponentAction::Remove {
                component_type,
                name,
            } => commands::component::remove(&ctx, component_type, &name),
            ComponentAction::Phase {
                component_type,
                name,
                phase,
            } => commands::component::phase(&ctx, component_type, &name, phase),
        },
        Commands::Node { action } => match action {
            NodeAction::Phase { name, phase } => {
                commands::component::phase(&ctx, ComponentType::ConsensusNode, &name, phase)
            }
            NodeAction::State { name, state } => commands::component::node_state(&ctx, &name, state),
        },
        Commands::Show => commands::inspect::show(&ctx),
        Commands::History => commands::inspect::history(&ctx),
        Commands::Lease { action } => match action {
            LeaseAction::Status => commands::inspect::lease_status(&ctx),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_component_add_with_global_overrides() {
        let cli = Cli::try_parse_from([
            "deck",
            "component",
            "add",
            "relay-node",
            "relay-1",
            "--cluster",
            "c1",
            "--relay-for",
            "0,1",
            "--namespace",
            "deck-ns",
        ])
        .unwrap();

        assert_eq!(cli.namespace.as_deref(), Some("deck-ns"));
        match cli.command {
            Commands::Component {
                action:
                    ComponentAction::Add {
                        component_type,
                        relay_for,
                        node_id,
                        ..
                    },
            } => {
                assert_eq!(component_type, ComponentType::RelayNode);
                assert_eq!(relay_for, vec![0, 1]);
                assert_eq!(node_id, None);
            }
            _ => panic!("expected component add"),
        }
    }

    #[test]
    fn parses_node_phase() {
        let cli = Cli::try_parse_from(["deck", "node", "phase", "node1", "started"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Node {
                action: NodeAction::Phase { phase: DeploymentPhase::Started, .. }
            }
        ));
    }

    #[test]
    fn rejects_unknown_component_type() {
        assert!(Cli::try_parse_from(["deck", "component", "remove", "web-server", "x"]).is_err());
    }
}

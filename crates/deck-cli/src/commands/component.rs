use deck_core::{Component, ComponentKind, ComponentType, DeploymentPhase, NodeId, NodeState};
use deck_remote::ComponentsRegistry;

use super::Context;

pub fn add(
    ctx: &Context,
    component_type: ComponentType,
    name: &str,
    cluster: &str,
    node_id: Option<NodeId>,
    relay_for: Vec<NodeId>,
) -> anyhow::Result<()> {
    let manager = ctx.manager()?;
    let namespace = manager.settings().namespace.clone();
    let invocation = ctx
        .invocation()
        .with_flag("cluster", cluster)
        .with_flag("componentType", component_type.as_str());

    let mut assigned = 0;
    manager.mutate(&invocation, |registry| {
        let kind = match component_type {
            ComponentType::ConsensusNode => ComponentKind::ConsensusNode {
                node_id: node_id.unwrap_or_else(|| next_node_id(registry)),
                node_state: NodeState::Requested,
            },
            ComponentType::RelayNode => ComponentKind::RelayNode {
                consensus_node_ids: relay_for,
            },
            other => ComponentKind::default_for(other),
        };
        assigned = registry.add_new_component(Component::new(name, cluster, &namespace, kind))?;
        Ok(())
    })?;
    println!("✓ {component_type} '{name}' added with id {assigned}");
    Ok(())
}

pub fn remove(ctx: &Context, component_type: ComponentType, name: &str) -> anyhow::Result<()> {
    let manager = ctx.manager()?;
    let invocation = ctx
        .invocation()
        .with_flag("componentType", component_type.as_str());
    manager.mutate(&invocation, |registry| {
        registry.remove_component(name, component_type)?;
        Ok(())
    })?;
    println!("✓ {component_type} '{name}' removed");
    Ok(())
}

pub fn phase(
    ctx: &Context,
    component_type: ComponentType,
    name: &str,
    phase: DeploymentPhase,
) -> anyhow::Result<()> {
    let manager = ctx.manager()?;
    let invocation = ctx
        .invocation()
        .with_flag("componentType", component_type.as_str());
    manager.mutate(&invocation, |registry| {
        registry.change_component_phase(component_type, name, phase)
    })?;
    println!("✓ {component_type} '{name}' is now {phase}");
    Ok(())
}

pub fn node_state(ctx: &Context, name: &str, state: NodeState) -> anyhow::Result<()> {
    let manager = ctx.manager()?;
    manager.mutate(&ctx.invocation(), |registry| registry.change_node_state(name, state))?;
    println!("✓ consensus node '{name}' state set to {state}");
    Ok(())
}

/// One past the highest consensus node id in use.
fn next_node_id(registry: &ComponentsRegistry) -> NodeId {
    registry
        .components_of(ComponentType::ConsensusNode)
        .filter_map(Component::node_id)
        .max()
        .map_or(0, |max| max + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{cluster, testing::context};
    use deck_remote::RemoteConfigError;

    fn with_cluster(dir: &std::path::Path) -> Context {
        let ctx = context(dir, "deck cluster add c1");
        cluster::add(&ctx, "c1", None, None, None).unwrap();
        ctx
    }

    #[test]
    fn consensus_nodes_get_sequential_node_ids() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = with_cluster(dir.path());

        add(&ctx, ComponentType::ConsensusNode, "node1", "c1", None, Vec::new()).unwrap();
        add(&ctx, ComponentType::ConsensusNode, "node2", "c1", None, Vec::new()).unwrap();
        add(&ctx, ComponentType::RelayNode, "relay", "c1", None, vec![0, 1]).unwrap();

        let registry = ctx.manager().unwrap().load().unwrap().unwrap().document.registry();
        let node2 = registry.get_component(ComponentType::ConsensusNode, "node2").unwrap();
        assert_eq!(node2.node_id(), Some(1));
        let relay = registry.get_component(ComponentType::RelayNode, "relay").unwrap();
        assert_eq!(
            relay.kind,
            ComponentKind::RelayNode {
                consensus_node_ids: vec![0, 1]
            }
        );
    }

    #[test]
    fn unknown_cluster_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = with_cluster(dir.path());

        let err = add(&ctx, ComponentType::BlockNode, "block", "nope", None, Vec::new()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RemoteConfigError>(),
            Some(RemoteConfigError::Validation(_))
        ));
    }

    #[test]
    fn phase_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = with_cluster(dir.path());
        add(&ctx, ComponentType::Explorer, "explorer", "c1", None, Vec::new()).unwrap();

        assert!(phase(&ctx, ComponentType::Explorer, "explorer", DeploymentPhase::Started).is_err());
        phase(&ctx, ComponentType::Explorer, "explorer", DeploymentPhase::Deploying).unwrap();
        remove(&ctx, ComponentType::Explorer, "explorer").unwrap();

        let document = ctx.manager().unwrap().load().unwrap().unwrap().document;
        assert!(document.registry().get_component(ComponentType::Explorer, "explorer").is_err());
        assert_eq!(document.command_history.len(), 4);
    }
}

//! ComponentsRegistry — invariant-enforcing view over the cluster and
//! component maps of a remote config document.
//!
//! Ids are allocated per component type as `max(existing) + 1`. Lookups
//! by name or id fail with `NotFound`; lookups by cluster return an empty
//! list instead. Nothing cascades: removing a component leaves anything
//! that depended on it to the caller.

use std::collections::{BTreeMap, HashMap, HashSet};

use deck_core::{
    Cluster, Component, ComponentId, ComponentKind, ComponentType, DeploymentPhase,
    NodeState,
};
use tracing::debug;

use crate::document::{ClusterMap, ComponentMap};
use crate::error::{Lookup, RemoteConfigError, RemoteConfigResult, ValidationError};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComponentsRegistry {
    clusters: ClusterMap,
    components: ComponentMap,
}

impl ComponentsRegistry {
    pub fn new(clusters: ClusterMap, components: ComponentMap) -> Self {
        Self {
            clusters,
            components,
        }
    }

    pub fn into_parts(self) -> (ClusterMap, ComponentMap) {
        (self.clusters, self.components)
    }

    // ── Clusters ───────────────────────────────────────────────────

    pub fn clusters(&self) -> &ClusterMap {
        &self.clusters
    }

    /// Register a cluster, replacing any entry under the same reference.
    pub fn add_cluster(&mut self, reference: &str, cluster: Cluster) {
        debug!(%reference, cluster = %cluster.name, "cluster registered");
        self.clusters.insert(reference.to_string(), cluster);
    }

    pub fn cluster(&self, reference: &str) -> RemoteConfigResult<&Cluster> {
        self.clusters
            .get(reference)
            .ok_or_else(|| RemoteConfigError::NotFound(Lookup::Cluster(reference.to_string())))
    }

    // ── Components ─────────────────────────────────────────────────

    /// Add a component under a freshly allocated id and return that id.
    /// New components must be in the `requested` phase.
    pub fn add_new_component(&mut self, mut component: Component) -> RemoteConfigResult<ComponentId> {
        let component_type = component.component_type();

        if component.phase != DeploymentPhase::Requested {
            return Err(ValidationError::NotInitialPhase {
                component_type,
                name: component.name,
                phase: component.phase,
            }
            .into());
        }
        if self.find(component_type, &component.name).is_some() {
            return Err(ValidationError::DuplicateComponent {
                component_type,
                name: component.name,
            }
            .into());
        }
        if !self.clusters.contains_key(&component.cluster) {
            return Err(ValidationError::DanglingClusterReference {
                component_type,
                name: component.name,
                cluster: component.cluster,
            }
            .into());
        }
        if let Some(node_id) = component.node_id() {
            let taken = self
                .components_of(ComponentType::ConsensusNode)
                .any(|c| c.node_id() == Some(node_id));
            if taken {
                return Err(ValidationError::DuplicateNodeId { node_id }.into());
            }
        }

        let id = self.new_component_id(component_type)?;
        component.id = id;
        debug!(%component_type, name = %component.name, id, "component added");
        self.components
            .entry(component_type)
            .or_default()
            .insert(id, component);
        Ok(id)
    }

    pub fn get_component(
        &self,
        component_type: ComponentType,
        name: &str,
    ) -> RemoteConfigResult<&Component> {
        self.find(component_type, name)
            .ok_or_else(|| not_found_by_name(component_type, name))
    }

    pub fn get_component_by_id(
        &self,
        component_type: ComponentType,
        id: ComponentId,
    ) -> RemoteConfigResult<&Component> {
        self.components
            .get(&component_type)
            .and_then(|by_id| by_id.get(&id))
            .ok_or(RemoteConfigError::NotFound(Lookup::Id(component_type, id)))
    }

    pub fn get_components_by_cluster_reference(
        &self,
        component_type: ComponentType,
        cluster: &str,
    ) -> Vec<&Component> {
        self.components_of(component_type)
            .filter(|c| c.cluster == cluster)
            .collect()
    }

    /// All components of one type, in id order.
    pub fn components_of(&self, component_type: ComponentType) -> impl Iterator<Item = &Component> {
        self.components
            .get(&component_type)
            .into_iter()
            .flat_map(BTreeMap::values)
    }

    /// Remove a component. Dependents are left untouched.
    pub fn remove_component(
        &mut self,
        name: &str,
        component_type: ComponentType,
    ) -> RemoteConfigResult<Component> {
        let id = self.get_component(component_type, name)?.id;
        let by_id = self
            .components
            .get_mut(&component_type)
            .ok_or_else(|| not_found_by_name(component_type, name))?;
        let removed = by_id
            .remove(&id)
            .ok_or_else(|| not_found_by_name(component_type, name))?;
        if by_id.is_empty() {
            self.components.remove(&component_type);
        }
        debug!(%component_type, %name, id, "component removed");
        Ok(removed)
    }

    /// Move a consensus node to a new lifecycle phase.
    pub fn change_node_phase(&mut self, name: &str, phase: DeploymentPhase) -> RemoteConfigResult<()> {
        self.change_component_phase(ComponentType::ConsensusNode, name, phase)
    }

    /// Move any component to a new lifecycle phase. Illegal transitions
    /// leave the component unchanged.
    pub fn change_component_phase(
        &mut self,
        component_type: ComponentType,
        name: &str,
        phase: DeploymentPhase,
    ) -> RemoteConfigResult<()> {
        let component = self.find_mut(component_type, name)?;
        let from = component.phase;
        if !from.can_transition_to(phase) {
            return Err(ValidationError::IllegalPhaseTransition {
                component_type,
                name: name.to_string(),
                from,
                to: phase,
            }
            .into());
        }
        component.phase = phase;
        debug!(%component_type, %name, %from, to = %phase, "phase changed");
        Ok(())
    }

    /// Update the node-specific state of a consensus node.
    pub fn change_node_state(&mut self, name: &str, state: NodeState) -> RemoteConfigResult<()> {
        let component = self.find_mut(ComponentType::ConsensusNode, name)?;
        if let ComponentKind::ConsensusNode { node_state, .. } = &mut component.kind {
            *node_state = state;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.components.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ── Validation ─────────────────────────────────────────────────

    /// Every invariant violation in the current maps. Never mutates.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut violations = Vec::new();
        let mut node_ids: HashMap<u64, usize> = HashMap::new();

        for (&component_type, by_id) in &self.components {
            let mut ids = HashSet::new();
            let mut names = HashSet::new();

            for (&key, component) in by_id {
                if component.id != key {
                    violations.push(ValidationError::IdMismatch {
                        component_type,
                        name: component.name.clone(),
                        key,
                        id: component.id,
                    });
                }
                let found = component.component_type();
                if found != component_type {
                    violations.push(ValidationError::TypeMismatch {
                        component_type,
                        name: component.name.clone(),
                        found,
                    });
                }
                if !ids.insert(component.id) {
                    violations.push(ValidationError::DuplicateId {
                        component_type,
                        id: component.id,
                    });
                }
                if !names.insert(component.name.as_str()) {
                    violations.push(ValidationError::DuplicateComponent {
                        component_type,
                        name: component.name.clone(),
                    });
                }
                if !self.clusters.contains_key(&component.cluster) {
                    violations.push(ValidationError::DanglingClusterReference {
                        component_type,
                        name: component.name.clone(),
                        cluster: component.cluster.clone(),
                    });
                }
                if let Some(node_id) = component.node_id() {
                    *node_ids.entry(node_id).or_default() += 1;
                }
            }
        }

        let mut duplicated: Vec<u64> = node_ids
            .into_iter()
            .filter_map(|(node_id, count)| (count > 1).then_some(node_id))
            .collect();
        duplicated.sort_unstable();
        violations.extend(
            duplicated
                .into_iter()
                .map(|node_id| ValidationError::DuplicateNodeId { node_id }),
        );

        violations
    }

    // ── Internals ──────────────────────────────────────────────────

    fn new_component_id(&self, component_type: ComponentType) -> RemoteConfigResult<ComponentId> {
        let max = self
            .components
            .get(&component_type)
            .and_then(|by_id| by_id.values().map(|c| c.id).chain(by_id.keys().copied()).max());
        match max {
            None => Ok(0),
            Some(max) => max
                .checked_add(1)
                .ok_or_else(|| ValidationError::IdSpaceExhausted { component_type }.into()),
        }
    }

    fn find(&self, component_type: ComponentType, name: &str) -> Option<&Component> {
        self.components_of(component_type).find(|c| c.name == name)
    }

    fn find_mut(
        &mut self,
        component_type: ComponentType,
        name: &str,
    ) -> RemoteConfigResult<&mut Component> {
        self.components
            .get_mut(&component_type)
            .and_then(|by_id| by_id.values_mut().find(|c| c.name == name))
            .ok_or_else(|| not_found_by_name(component_type, name))
    }
}

fn not_found_by_name(component_type: ComponentType, name: &str) -> RemoteConfigError {
    RemoteConfigError::NotFound(Lookup::Name(component_type, name.to_string()))
}

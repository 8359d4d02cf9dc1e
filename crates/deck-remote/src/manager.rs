//! RemoteConfigManager — the lease-guarded read-modify-write cycle.
//!
//! ```text
//! acquire lease ─▶ load ─▶ migrate ─▶ operation ─▶ validate ─▶ renew ─▶ persist
//!       │                                                                  │
//!       └──────────────────── release (guard drop) ◀───────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use deck_core::config::DEFAULT_LEASE_DURATION_SECS;
use deck_core::{Clock, DeckConfig};
use deck_store::{ConfigStore, VersionToken};
use tracing::{debug, info, warn};

use crate::document::{Invocation, RemoteConfigDocument, decode_raw, schema_version};
use crate::error::{RemoteConfigError, RemoteConfigResult};
use crate::lease::{Lease, LeaseGuard, LeaseHolder, LeaseRecord};
use crate::migration::MigrationEngine;
use crate::registry::ComponentsRegistry;

/// Store key prefix for remote config documents.
pub const DOCUMENT_KEY_PREFIX: &str = "remote-config";

/// Which deployment a manager works on, and how long it holds the lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerSettings {
    pub namespace: String,
    pub deployment: String,
    pub lease_duration: Duration,
}

impl ManagerSettings {
    pub fn new(namespace: &str, deployment: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            deployment: deployment.to_string(),
            lease_duration: Duration::from_secs(DEFAULT_LEASE_DURATION_SECS),
        }
    }

    pub fn with_lease_duration(mut self, duration: Duration) -> Self {
        self.lease_duration = duration;
        self
    }

    pub fn from_config(config: &DeckConfig) -> Self {
        Self::new(&config.deployment.namespace, &config.deployment.name)
            .with_lease_duration(config.lease_duration())
    }
}

/// A document together with the store version it was read at.
///
/// `token == None` means no document exists yet; persisting it requires
/// the key to still be absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedDocument {
    pub document: RemoteConfigDocument,
    pub token: Option<VersionToken>,
}

/// Lease record plus whether it is live right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseStatus {
    pub record: LeaseRecord,
    pub live: bool,
}

pub struct RemoteConfigManager<S> {
    store: S,
    clock: Arc<dyn Clock>,
    migrations: MigrationEngine,
    holder: LeaseHolder,
    settings: ManagerSettings,
}

impl<S: ConfigStore + Clone> RemoteConfigManager<S> {
    /// Manager using the standard migration chain.
    pub fn new(
        store: S,
        clock: Arc<dyn Clock>,
        holder: LeaseHolder,
        settings: ManagerSettings,
    ) -> Self {
        Self::with_migrations(store, clock, MigrationEngine::standard(), holder, settings)
    }

    pub fn with_migrations(
        store: S,
        clock: Arc<dyn Clock>,
        migrations: MigrationEngine,
        holder: LeaseHolder,
        settings: ManagerSettings,
    ) -> Self {
        Self {
            store,
            clock,
            migrations,
            holder,
            settings,
        }
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    pub fn holder(&self) -> &LeaseHolder {
        &self.holder
    }

    pub fn document_key(&self) -> String {
        format!(
            "{DOCUMENT_KEY_PREFIX}/{}/{}",
            self.settings.namespace, self.settings.deployment
        )
    }

    /// A fresh lease handle for this deployment.
    pub fn lease(&self) -> Lease<S> {
        Lease::new(
            self.store.clone(),
            self.clock.clone(),
            &self.settings.namespace,
            &self.settings.deployment,
            self.holder.clone(),
            self.settings.lease_duration,
        )
    }

    pub fn lease_status(&self) -> RemoteConfigResult<Option<LeaseStatus>> {
        let now = self.clock.now();
        Ok(self.lease().status()?.map(|record| LeaseStatus {
            live: record.is_live(now),
            record,
        }))
    }

    /// Read and migrate the current document in memory. Never writes.
    pub fn load(&self) -> RemoteConfigResult<Option<VersionedDocument>> {
        let key = self.document_key();
        let Some(stored) = self.store.read(&key)? else {
            debug!(%key, "no remote config stored yet");
            return Ok(None);
        };

        let raw = decode_raw(&stored.bytes)?;
        let stored_version = schema_version(&raw)?;
        let raw = self
            .migrations
            .migrate(&raw, &self.holder.identity(), self.clock.now())?;
        if stored_version != self.migrations.current_version() {
            info!(
                %key,
                from = stored_version,
                to = self.migrations.current_version(),
                "remote config migrated in memory"
            );
        }

        Ok(Some(VersionedDocument {
            document: RemoteConfigDocument::from_raw(raw)?,
            token: Some(stored.token),
        }))
    }

    /// Record `invocation` into the document and write it conditionally
    /// on the token it was loaded at. Returns the new token.
    pub fn persist(
        &self,
        loaded: VersionedDocument,
        invocation: &Invocation,
    ) -> RemoteConfigResult<VersionToken> {
        let VersionedDocument {
            mut document,
            token,
        } = loaded;
        self.write_document(&mut document, token.as_ref(), invocation)
    }

    /// Run `operation` against the deployment's registry under the lease
    /// and persist the result. Returns the persisted document.
    ///
    /// Nothing is written unless the operation and full re-validation both
    /// succeed. The lease is released on every exit path.
    pub fn mutate<F>(
        &self,
        invocation: &Invocation,
        operation: F,
    ) -> RemoteConfigResult<RemoteConfigDocument>
    where
        F: FnOnce(&mut ComponentsRegistry) -> RemoteConfigResult<()>,
    {
        let mut guard = LeaseGuard::acquire(self.lease())?;

        let VersionedDocument { mut document, token } =
            self.load()?.unwrap_or_else(|| VersionedDocument {
                document: RemoteConfigDocument::default(),
                token: None,
            });

        let mut registry = document.registry();
        operation(&mut registry)?;

        let violations = registry.validate();
        if !violations.is_empty() {
            warn!(
                command = %invocation.command,
                violations = violations.len(),
                "mutation left the document invalid"
            );
            return Err(RemoteConfigError::InvalidDocument(violations));
        }
        document.set_registry(registry);

        // Refuse to write if the lease moved on while we worked.
        guard.renew()?;

        self.write_document(&mut document, token.as_ref(), invocation)?;

        if let Err(e) = guard.release() {
            warn!(key = %self.document_key(), error = %e, "failed to release lease after persist");
        }
        Ok(document)
    }

    fn write_document(
        &self,
        document: &mut RemoteConfigDocument,
        expected: Option<&VersionToken>,
        invocation: &Invocation,
    ) -> RemoteConfigResult<VersionToken> {
        let key = self.document_key();
        document.record_invocation(invocation, &self.holder.identity(), self.clock.now());
        let bytes = document.encode()?;

        match self.store.write(&key, &bytes, expected) {
            Ok(next) => {
                info!(
                    %key,
                    command = %invocation.command,
                    version = %next,
                    "remote config persisted"
                );
                Ok(next)
            }
            Err(e) => {
                warn!(%key, error = %e, "remote config write rejected");
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deck_core::{Cluster, Component, ComponentType, DeploymentPhase, ManualClock};
    use deck_store::RedbConfigStore;

    fn manager(store: &RedbConfigStore, clock: &Arc<ManualClock>, user: &str) -> RemoteConfigManager<RedbConfigStore> {
        RemoteConfigManager::new(
            store.clone(),
            clock.clone(),
            LeaseHolder::new(user, "host", 7),
            ManagerSettings::new("deck", "mainnet").with_lease_duration(Duration::from_secs(30)),
        )
    }

    fn setup() -> (RedbConfigStore, Arc<ManualClock>) {
        (
            RedbConfigStore::open_in_memory().unwrap(),
            Arc::new(ManualClock::new(5_000)),
        )
    }

    fn add_cluster(registry: &mut ComponentsRegistry) -> RemoteConfigResult<()> {
        registry.add_cluster("c1", Cluster::new("kind-c1", "deck", "mainnet"));
        Ok(())
    }

    #[test]
    fn load_absent_document_is_none() {
        let (store, clock) = setup();
        assert!(manager(&store, &clock, "alice").load().unwrap().is_none());
    }

    #[test]
    fn first_mutation_creates_the_document() {
        let (store, clock) = setup();
        let mgr = manager(&store, &clock, "alice");

        let doc = mgr
            .mutate(&Invocation::new("cluster add c1").with_flag("cluster", "c1"), add_cluster)
            .unwrap();
        assert_eq!(doc.command_history, vec!["cluster add c1"]);

        let loaded = mgr.load().unwrap().unwrap();
        assert!(loaded.token.is_some());
        assert_eq!(loaded.document, doc);
        assert_eq!(loaded.document.metadata.last_updated_by.as_deref(), Some("alice@host:7"));
        assert_eq!(loaded.document.metadata.last_updated_at, Some(5_000));
    }

    #[test]
    fn failed_operation_writes_nothing() {
        let (store, clock) = setup();
        let mgr = manager(&store, &clock, "alice");
        mgr.mutate(&Invocation::new("cluster add c1"), add_cluster).unwrap();
        let before = mgr.load().unwrap().unwrap();

        let err = mgr
            .mutate(&Invocation::new("node phase node9 started"), |registry| {
                registry.change_node_phase("node9", DeploymentPhase::Started)
            })
            .unwrap_err();
        assert!(matches!(err, RemoteConfigError::NotFound(_)));

        let after = mgr.load().unwrap().unwrap();
        assert_eq!(after, before);
        assert_eq!(after.document.command_history.len(), 1);
    }

    #[test]
    fn invalid_result_is_rejected() {
        let (store, clock) = setup();
        let mgr = manager(&store, &clock, "alice");

        let err = mgr
            .mutate(&Invocation::new("orphan"), |registry| {
                // Cluster registered then dropped behind the registry's back.
                registry.add_cluster("c1", Cluster::new("kind-c1", "deck", "mainnet"));
                registry.add_new_component(Component::consensus_node("node1", "c1", "deck", 0))?;
                let (_, components) = std::mem::take(registry).into_parts();
                *registry = ComponentsRegistry::new(Default::default(), components);
                Ok(())
            })
            .unwrap_err();
        match err {
            RemoteConfigError::InvalidDocument(violations) => assert_eq!(violations.len(), 1),
            other => panic!("unexpected error: {other}"),
        }
        assert!(mgr.load().unwrap().is_none());
    }

    #[test]
    fn lease_is_released_after_success_and_failure() {
        let (store, clock) = setup();
        let alice = manager(&store, &clock, "alice");
        let bob = manager(&store, &clock, "bob");

        alice.mutate(&Invocation::new("cluster add c1"), add_cluster).unwrap();
        let status = alice.lease_status().unwrap().unwrap();
        assert!(!status.live);
        assert_eq!(status.record.holder_identity, None);

        let _ = alice.mutate(&Invocation::new("bad"), |registry| {
            registry.cluster("missing").map(|_| ())
        });
        bob.mutate(&Invocation::new("cluster add c1"), add_cluster).unwrap();
    }

    #[test]
    fn mutation_blocked_by_live_foreign_lease() {
        let (store, clock) = setup();
        let alice = manager(&store, &clock, "alice");
        let bob = manager(&store, &clock, "bob");

        let mut held = alice.lease();
        held.acquire().unwrap();

        let err = bob.mutate(&Invocation::new("cluster add c1"), add_cluster).unwrap_err();
        assert!(matches!(err, RemoteConfigError::LeaseHeldByOther { .. }));
        assert!(err.is_retryable());
        assert!(bob.load().unwrap().is_none());

        let status = bob.lease_status().unwrap().unwrap();
        assert!(status.live);
        assert_eq!(status.record.holder_identity.as_deref(), Some("alice@host:7"));
    }

    #[test]
    fn lease_taken_over_mid_mutation_aborts_persist() {
        let (store, clock) = setup();
        let alice = manager(&store, &clock, "alice");
        let bob = manager(&store, &clock, "bob");

        let err = alice
            .mutate(&Invocation::new("slow"), |registry| {
                clock.advance(Duration::from_secs(31));
                bob.lease().acquire()?;
                add_cluster(registry)
            })
            .unwrap_err();
        assert!(matches!(err, RemoteConfigError::LeaseLost { .. }));
        assert!(alice.load().unwrap().is_none());

        // Bob's lease survives alice's failed cycle.
        let status = bob.lease_status().unwrap().unwrap();
        assert_eq!(status.record.holder_identity.as_deref(), Some("bob@host:7"));
    }

    #[test]
    fn lease_expiring_mid_mutation_aborts_persist() {
        let (store, clock) = setup();
        let alice = manager(&store, &clock, "alice");

        let err = alice
            .mutate(&Invocation::new("slow"), |registry| {
                clock.advance(Duration::from_secs(31));
                add_cluster(registry)
            })
            .unwrap_err();
        assert!(matches!(err, RemoteConfigError::LeaseLost { .. }));
        assert!(alice.load().unwrap().is_none());
        assert!(!alice.lease_status().unwrap().unwrap().live);
    }

    #[test]
    fn stale_persist_conflicts() {
        let (store, clock) = setup();
        let alice = manager(&store, &clock, "alice");
        alice.mutate(&Invocation::new("cluster add c1"), add_cluster).unwrap();

        let first = alice.load().unwrap().unwrap();
        let second = alice.load().unwrap().unwrap();

        alice.persist(first, &Invocation::new("one")).unwrap();
        let err = alice.persist(second, &Invocation::new("two")).unwrap_err();
        assert!(matches!(err, RemoteConfigError::Conflict { .. }));

        let history = alice.load().unwrap().unwrap().document.command_history;
        assert_eq!(history, vec!["cluster add c1", "one"]);
    }

    #[test]
    fn document_key_layout() {
        let (store, clock) = setup();
        let mgr = manager(&store, &clock, "alice");
        assert_eq!(mgr.document_key(), "remote-config/deck/mainnet");
        assert_eq!(mgr.lease().key(), "leases/deck/mainnet");
    }

    #[test]
    fn settings_from_config() {
        let config = DeckConfig::scaffold("mainnet", "deck");
        let settings = ManagerSettings::from_config(&config);
        assert_eq!(settings.namespace, "deck");
        assert_eq!(settings.deployment, "mainnet");
        assert_eq!(settings.lease_duration, Duration::from_secs(DEFAULT_LEASE_DURATION_SECS));
    }

    #[test]
    fn components_survive_reload() {
        let (store, clock) = setup();
        let mgr = manager(&store, &clock, "alice");
        mgr.mutate(&Invocation::new("cluster add c1"), add_cluster).unwrap();
        mgr.mutate(&Invocation::new("component add block-node"), |registry| {
            registry.add_new_component(Component::new(
                "block-1",
                "c1",
                "deck",
                deck_core::ComponentKind::default_for(ComponentType::BlockNode),
            ))?;
            Ok(())
        })
        .unwrap();

        let doc = mgr.load().unwrap().unwrap().document;
        let registry = doc.registry();
        assert_eq!(registry.get_component(ComponentType::BlockNode, "block-1").unwrap().id, 0);
        assert_eq!(doc.command_history.len(), 2);
    }
}

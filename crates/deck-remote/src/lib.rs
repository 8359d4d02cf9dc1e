//! Remote configuration for deck deployments.
//!
//! A deployment's topology (clusters and the components placed on them)
//! lives in one versioned document in a [`deck_store::ConfigStore`].
//! Every change goes through [`RemoteConfigManager::mutate`], which holds
//! a [`Lease`] for the deployment, upgrades old documents through the
//! [`MigrationEngine`], applies the change to a [`ComponentsRegistry`],
//! re-validates, and writes back conditionally on the version it read.

pub mod document;
pub mod error;
pub mod lease;
pub mod manager;
pub mod migration;
pub mod registry;

pub use document::{Invocation, MigrationRecord, RemoteConfigDocument, SCHEMA_VERSION};
pub use error::{Lookup, RemoteConfigError, RemoteConfigResult, ValidationError};
pub use lease::{Lease, LeaseGuard, LeaseHolder, LeaseRecord};
pub use manager::{LeaseStatus, ManagerSettings, RemoteConfigManager, VersionedDocument};
pub use migration::{Migration, MigrationEngine};
pub use registry::ComponentsRegistry;

pub mod cluster;
pub mod component;
pub mod init;
pub mod inspect;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use deck_core::{DeckConfig, SystemClock};
use deck_remote::{Invocation, LeaseHolder, ManagerSettings, RemoteConfigManager};
use deck_store::RedbConfigStore;
use tracing::debug;

/// Global options shared by every subcommand.
pub struct Context {
    pub config: PathBuf,
    pub namespace: Option<String>,
    pub deployment: Option<String>,
    pub store: Option<PathBuf>,
    /// Full command line, recorded in the document's history.
    pub command_line: String,
}

impl Context {
    /// deck.toml if present, with command-line overrides applied.
    pub fn resolve(&self) -> anyhow::Result<DeckConfig> {
        let mut config = if self.config.exists() {
            DeckConfig::from_file(&self.config)
                .with_context(|| format!("failed to read {}", self.config.display()))?
        } else {
            let (Some(deployment), Some(namespace)) = (&self.deployment, &self.namespace) else {
                anyhow::bail!(
                    "{} not found; run `deck init` or pass --deployment and --namespace",
                    self.config.display()
                );
            };
            DeckConfig::scaffold(deployment, namespace)
        };

        if let Some(namespace) = &self.namespace {
            config.deployment.namespace = namespace.clone();
        }
        if let Some(deployment) = &self.deployment {
            config.deployment.name = deployment.clone();
        }
        if let Some(store) = &self.store {
            config.store = Some(deck_core::config::StoreConfig {
                path: Some(store.display().to_string()),
            });
        }
        Ok(config)
    }

    pub fn manager(&self) -> anyhow::Result<RemoteConfigManager<RedbConfigStore>> {
        let config = self.resolve()?;
        let path = config.store_path();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let store = RedbConfigStore::open(&path)
            .with_context(|| format!("failed to open store at {}", path.display()))?;
        debug!(path = %path.display(), deployment = %config.deployment.name, "store ready");

        Ok(RemoteConfigManager::new(
            store,
            Arc::new(SystemClock),
            LeaseHolder::current(),
            ManagerSettings::from_config(&config),
        ))
    }

    pub fn invocation(&self) -> Invocation {
        Invocation::new(self.command_line.clone())
    }
}

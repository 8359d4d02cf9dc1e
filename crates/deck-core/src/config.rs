//! deck.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default lease TTL when none is configured.
pub const DEFAULT_LEASE_DURATION_SECS: u64 = 20;

/// Default location of the local config store.
pub const DEFAULT_STORE_PATH: &str = ".deck/remote-config.redb";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeckConfig {
    pub deployment: DeploymentConfig,
    pub store: Option<StoreConfig>,
    pub lease: Option<LeaseConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentConfig {
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseConfig {
    pub duration_secs: Option<u64>,
}

impl DeckConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DeckConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Scaffold a minimal deck.toml for the given deployment.
    pub fn scaffold(deployment: &str, namespace: &str) -> Self {
        DeckConfig {
            deployment: DeploymentConfig {
                name: deployment.to_string(),
                namespace: namespace.to_string(),
            },
            store: Some(StoreConfig {
                path: Some(DEFAULT_STORE_PATH.to_string()),
            }),
            lease: Some(LeaseConfig {
                duration_secs: Some(DEFAULT_LEASE_DURATION_SECS),
            }),
        }
    }

    pub fn store_path(&self) -> PathBuf {
        self.store
            .as_ref()
            .and_then(|s| s.path.as_deref())
            .unwrap_or(DEFAULT_STORE_PATH)
            .into()
    }

    pub fn lease_duration(&self) -> Duration {
        let secs = self
            .lease
            .as_ref()
            .and_then(|l| l.duration_secs)
            .unwrap_or(DEFAULT_LEASE_DURATION_SECS);
        Duration::from_secs(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaffold() {
        let config = DeckConfig::scaffold("mainnet-a", "deck");
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("mainnet-a"));
        assert!(toml_str.contains("duration_secs = 20"));
    }

    #[test]
    fn test_parse_minimal_uses_defaults() {
        let toml_str = r#"
[deployment]
name = "test"
namespace = "ns"
"#;
        let config: DeckConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.deployment.name, "test");
        assert_eq!(config.store_path(), PathBuf::from(DEFAULT_STORE_PATH));
        assert_eq!(config.lease_duration(), Duration::from_secs(20));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deck.toml");
        std::fs::write(
            &path,
            r#"
[deployment]
name = "solo"
namespace = "deck-ns"

[store]
path = "/tmp/deck.redb"

[lease]
duration_secs = 45
"#,
        )
        .unwrap();

        let config = DeckConfig::from_file(&path).unwrap();
        assert_eq!(config.store_path(), PathBuf::from("/tmp/deck.redb"));
        assert_eq!(config.lease_duration(), Duration::from_secs(45));
    }
}

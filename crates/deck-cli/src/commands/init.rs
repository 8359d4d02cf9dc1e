use deck_core::DeckConfig;

use super::Context;

pub fn init(ctx: &Context, force: bool) -> anyhow::Result<()> {
    if ctx.config.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", ctx.config.display());
    }
    let (Some(deployment), Some(namespace)) = (&ctx.deployment, &ctx.namespace) else {
        anyhow::bail!("deck init requires --deployment and --namespace");
    };

    let mut config = DeckConfig::scaffold(deployment, namespace);
    if let Some(store) = &ctx.store {
        config.store = Some(deck_core::config::StoreConfig {
            path: Some(store.display().to_string()),
        });
    }
    std::fs::write(&ctx.config, config.to_toml_string()?)?;
    println!("✓ Generated {}", ctx.config.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::context;

    #[test]
    fn writes_scaffold_once() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), "deck init");

        init(&ctx, false).unwrap();
        let config = DeckConfig::from_file(&ctx.config).unwrap();
        assert_eq!(config.deployment.name, "mainnet");
        assert_eq!(config.store_path(), dir.path().join("state").join("remote-config.redb"));

        assert!(init(&ctx, false).is_err());
        init(&ctx, true).unwrap();
    }
}

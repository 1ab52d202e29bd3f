use super::CommandExit;
use std::path::Path;
use warden_core::{Config, ConfigStore};

pub fn init(warden_home: &Path, force: bool) -> anyhow::Result<()> {
    let store = ConfigStore::new(warden_home);
    if store.path().exists() && !force {
        return Err(CommandExit::new(
            1,
            format!("{} already exists; pass --force to overwrite", store.path().display()),
        )
        .into());
    }
    store.save(&Config::default())?;
    tracing::info!(path = %store.path().display(), "default config written");
    println!("Config written to {}", store.path().display());
    Ok(())
}

pub fn show(warden_home: &Path) -> anyhow::Result<()> {
    let store = ConfigStore::new(warden_home);
    let config = store.load();
    println!("# {}", store.path().display());
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

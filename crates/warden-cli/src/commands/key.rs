use std::path::Path;
use warden_core::context::key_path;
use warden_core::SecretKey;

pub async fn init(warden_home: &Path, force: bool) -> anyhow::Result<()> {
    let path = key_path(warden_home);
    SecretKey::create(&path, force).await?;
    tracing::info!(path = %path.display(), rotated = force, "signing key written");
    println!("Signing key written to {}", path.display());
    if force {
        println!("Existing signed state no longer verifies; breakers will read as tripped until reset.");
    }
    Ok(())
}

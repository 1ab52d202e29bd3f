//! Operator-side clearance commands. Agents are blocked from running these.

use super::{load_context, resolve_project_dir, revision_probe, CommandExit};
use std::path::{Path, PathBuf};
use warden_core::{ClearanceVerdict, ReleaseClearance};

pub async fn grant(app: &str, project: Option<PathBuf>, warden_home: &Path) -> anyhow::Result<()> {
    let project_dir = resolve_project_dir(project)?;
    let (ctx, config) = load_context(project_dir, warden_home, None).await;
    let probe = revision_probe(&config);

    let clearance = ReleaseClearance::new(&ctx)
        .grant_current(app, ctx.project_dir(), &probe)
        .await?;
    println!(
        "Release clearance granted for {} at {} (expires {})",
        clearance.app,
        clearance.git_sha,
        clearance.expires_at.to_rfc3339()
    );
    Ok(())
}

pub async fn check(app: &str, project: Option<PathBuf>, warden_home: &Path) -> anyhow::Result<()> {
    let project_dir = resolve_project_dir(project)?;
    let (ctx, config) = load_context(project_dir, warden_home, None).await;
    let probe = revision_probe(&config);

    match ReleaseClearance::new(&ctx)
        .check_current(app, ctx.project_dir(), &probe)
        .await?
    {
        ClearanceVerdict::Allowed(clearance) => {
            println!(
                "Cleared: {} at {} until {}",
                clearance.app,
                clearance.git_sha,
                clearance.expires_at.to_rfc3339()
            );
            Ok(())
        }
        ClearanceVerdict::Blocked(reason) => Err(CommandExit::new(1, format!("Not cleared: {reason}")).into()),
    }
}

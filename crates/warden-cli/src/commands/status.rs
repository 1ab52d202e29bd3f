use super::{load_context, resolve_project_dir};
use std::path::{Path, PathBuf};
use warden_core::gate::GATE_FILE;
use warden_core::{
    BreakerPhase, CircuitBreaker, Context, DocumentState, GateState, ProjectManifest, RequirementTracker,
    StateStore,
};

pub async fn run(project: Option<PathBuf>, warden_home: &Path) -> anyhow::Result<()> {
    let project_dir = resolve_project_dir(project)?;
    let (ctx, _) = load_context(project_dir, warden_home, None).await;

    println!("project: {}", ctx.project_dir().display());
    println!(
        "signing key: {}",
        if ctx.signer().has_key() { "loaded" } else { "MISSING (run `warden key init`)" }
    );

    print_breaker(&ctx).await?;
    print_gate(&ctx).await?;
    print_requirements(&ctx).await;
    Ok(())
}

async fn print_breaker(ctx: &Context) -> anyhow::Result<()> {
    let breaker = CircuitBreaker::new(ctx);
    match breaker.document().await? {
        DocumentState::Absent => println!("breaker: closed (no state)"),
        DocumentState::Untrusted(failure) => println!("breaker: TRIPPED (untrusted state: {failure})"),
        DocumentState::Trusted(state) => {
            let phase = match state.phase() {
                BreakerPhase::Closed => "closed",
                BreakerPhase::Tripped => "TRIPPED",
                BreakerPhase::TrippedPendingReset => "TRIPPED (waiting for user reset)",
            };
            println!("breaker: {phase}, {} failure(s)", state.failures);
            if let Some(reason) = &state.trip_reason {
                println!("  reason: {reason}");
            }
            for (signature, count) in state.top_signatures(3) {
                println!("  {count}x {signature}");
            }
        }
    }
    Ok(())
}

async fn print_gate(ctx: &Context) -> anyhow::Result<()> {
    let Some(manifest) = ProjectManifest::load(&ctx.manifest_path()).await? else {
        println!("startup gate: not governed (no {})", ctx.manifest_path().display());
        return Ok(());
    };
    if let Some(app) = manifest.app() {
        println!("app: {app}");
    }

    let store = StateStore::new(ctx.signer().clone());
    match store.load::<GateState>(&ctx.state_file(GATE_FILE)).await? {
        DocumentState::Absent => println!("startup gate: not initialised"),
        DocumentState::Untrusted(failure) => println!("startup gate: untrusted state ({failure})"),
        DocumentState::Trusted(gate) => {
            println!("startup gate: {}", if gate.open { "open" } else { "closed" });
            for (step, done) in &gate.steps {
                println!("  [{}] {step}", if *done { "x" } else { " " });
            }
        }
    }
    Ok(())
}

async fn print_requirements(ctx: &Context) {
    let tracker = RequirementTracker::new(ctx);
    println!("bypass: {}", if tracker.bypass_active().await { "ON" } else { "off" });

    match tracker.requirements().await {
        Some(set) => {
            let outstanding: Vec<&str> = set.outstanding().collect();
            if outstanding.is_empty() {
                println!("requirements: none outstanding");
            } else {
                println!("requirements: {}", outstanding.join(", "));
            }
        }
        None => println!("requirements: none"),
    }

    let progress = tracker.research_progress().await;
    let skipped: Vec<&str> = progress
        .categories
        .iter()
        .filter(|(_, p)| p.skipped)
        .map(|(category, _)| category.as_str())
        .collect();
    if !skipped.is_empty() {
        println!("research skipped: {}", skipped.join(", "));
    }

    let patterns = tracker.user_patterns().await;
    if patterns.corrections > 0 {
        println!("user corrections: {}", patterns.corrections);
    }
}

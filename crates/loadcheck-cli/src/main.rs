//! Run a fleet of simulated customer sessions against an object store and
//! report the consistency errors they find.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use loadcheck_agent::Agent;
use loadcheck_config::{ConfigError, TestPlan, UserIdentity};
use loadcheck_store::{MemoryStore, ObjectStore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "loadcheck",
    about = "Synthetic-load consistency tester for object storage"
)]
struct Args {
    /// JSON test plan driving every session.
    #[arg(long)]
    test_plan: PathBuf,

    /// Directory of per-user identity files; one session runs per file.
    #[arg(long)]
    identity_dir: PathBuf,

    /// Cap on the number of concurrent sessions.
    #[arg(long, default_value_t = 10)]
    max_users: usize,

    /// Wall-clock duration of the run, in seconds.
    #[arg(long, default_value_t = 60)]
    duration_secs: u64,

    /// Base seed for the per-session generators; session index is added so
    /// agents diverge while the whole run stays reproducible.
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();
    match run(args).await {
        Ok(0) => ExitCode::SUCCESS,
        Ok(errors) => {
            error!(errors, "run finished with consistency errors");
            ExitCode::FAILURE
        }
        Err(err) => {
            error!(%err, "run failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<u64, Box<dyn std::error::Error>> {
    let plan = TestPlan::from_file(&args.test_plan)?;
    let identities = load_identities(&args.identity_dir, args.max_users)?;
    if identities.is_empty() {
        return Err("no identity files found".into());
    }
    info!(
        users = identities.len(),
        duration_secs = args.duration_secs,
        "starting run"
    );

    // Sessions share one in-memory store standing in for the real service.
    let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());
    let cancel = CancellationToken::new();

    let mut handles = Vec::new();
    for (index, identity) in identities.into_iter().enumerate() {
        let agent = Agent::new(
            identity,
            plan.clone(),
            Arc::clone(&store),
            cancel.clone(),
            args.seed.wrapping_add(index as u64),
        )?;
        handles.push(tokio::spawn(agent.run()));
    }

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(args.duration_secs)) => {
            info!("run duration elapsed, stopping sessions");
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received, stopping sessions");
        }
    }
    cancel.cancel();

    let mut errors = 0u64;
    for handle in handles {
        match handle.await {
            Ok(Ok(count)) => errors += count,
            Ok(Err(err)) => {
                errors += 1;
                error!(%err, "session failed");
            }
            Err(err) => {
                errors += 1;
                error!(%err, "session task panicked");
            }
        }
    }
    info!(errors, "run complete");
    Ok(errors)
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                let _ = ctrl_c.await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

/// Load up to `max` identity files from `dir`, in name order so runs are
/// reproducible.
fn load_identities(dir: &Path, max: usize) -> Result<Vec<UserIdentity>, ConfigError> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.extension().is_some_and(|e| e == "json"))
        .collect();
    paths.sort();
    paths.truncate(max);
    paths.iter().map(|p| UserIdentity::from_file(p)).collect()
}

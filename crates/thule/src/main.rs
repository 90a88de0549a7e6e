mod plan;
mod worker;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use thule_core::{BuiltinEvaluator, IngressService, MemoryClusterReader, Planner};
use thule_forge::{
    CommentStore, GitLabCommentStore, GitLabMergeRequestReader, GitLabOptions,
    GitLabStatusPublisher, MemoryCommentStore, MemoryStatusPublisher, MergeRequestReader,
    StatusPublisher,
};
use thule_store::{MemoryDeliveryStore, MemoryProjectLock, MemoryRunStore};

#[derive(Parser)]
#[command(name = "thule", about = "Read-only GitOps plan service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the webhook ingress API.
    Serve,
    /// Run the planner worker loop.
    Worker,
    /// Render and diff one project locally, printing the plan comment.
    Plan {
        /// Project directory containing thule.conf.
        #[arg(long, default_value = ".")]
        project: PathBuf,
        /// Commit label for the report output.
        #[arg(long, default_value = "local")]
        sha: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let exit_code = match cli.command {
        Command::Serve => run_serve().await,
        Command::Worker => run_worker().await,
        Command::Plan { project, sha } => match plan::run_plan(&project, &sha) {
            Ok(body) => {
                println!("{body}");
                0
            }
            Err(err) => {
                eprintln!("{err}");
                1
            }
        },
    };
    std::process::exit(exit_code);
}

async fn run_serve() -> i32 {
    let addr = match parse_addr(&env_or("THULE_API_ADDR", ":8080")) {
        Ok(addr) => addr,
        Err(err) => {
            error!(error = %err, "invalid THULE_API_ADDR");
            return 1;
        }
    };
    let jobs = match thule_queue::queue_from_env() {
        Ok(jobs) => jobs,
        Err(err) => {
            error!(error = %err, "queue init failed");
            return 1;
        }
    };
    let dedupe = match thule_store::dedupe_from_env() {
        Ok(dedupe) => dedupe,
        Err(err) => {
            error!(error = %err, "dedupe init failed");
            return 1;
        }
    };
    info!(dedupe = dedupe.label, "admission dedupe configured");

    let ingress = Arc::new(IngressService::new(
        jobs,
        Arc::new(MemoryDeliveryStore::new()),
        Arc::new(MemoryProjectLock::new()),
        Arc::new(MemoryRunStore::new()),
        dedupe,
    ));
    let secret = std::env::var("THULE_WEBHOOK_SECRET").ok();
    let state = thule_serve::AppState::new(ingress, secret);

    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        shutdown.cancel();
    });

    if let Err(err) = thule_serve::serve(state, addr).await {
        error!(error = %err, "api stopped");
        return 1;
    }
    0
}

async fn run_worker() -> i32 {
    let jobs = match thule_queue::queue_from_env() {
        Ok(jobs) => jobs,
        Err(err) => {
            error!(error = %err, "queue init failed");
            return 1;
        }
    };
    let repo_root = PathBuf::from(env_or("THULE_REPO_ROOT", "."));
    let repo_url = std::env::var("THULE_REPO_URL").unwrap_or_default();
    let syncer = Arc::new(thule_repo::syncer_from_env());

    let (comments, status, merge_requests) = match forge_from_env(&repo_url) {
        Ok(forge) => forge,
        Err(err) => {
            error!(error = %err, "forge init failed");
            return 1;
        }
    };

    let runs: Arc<MemoryRunStore> = Arc::new(MemoryRunStore::new());
    let planner = Planner::new(
        repo_root.clone(),
        Arc::new(MemoryClusterReader::new()),
        comments,
        status,
        runs.clone(),
        Arc::new(BuiltinEvaluator::new()),
    );

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        signal_cancel.cancel();
    });
    tokio::spawn(worker::run_maintenance(cancel.clone(), syncer.clone()));

    info!(repo = %repo_root.display(), "thule-worker started");
    worker::run_worker(
        cancel,
        worker::WorkerDeps {
            jobs,
            syncer,
            merge_requests,
            planner,
            runs,
            repo_root,
            default_base_ref: env_or("THULE_REPO_BASE_REF", "master"),
        },
    )
    .await;
    0
}

type ForgeStack = (
    Arc<dyn CommentStore>,
    Arc<dyn StatusPublisher>,
    Option<Arc<dyn MergeRequestReader>>,
);

/// GitLab-backed outbound surfaces when a token is configured, memory
/// stand-ins otherwise.
fn forge_from_env(repo_url: &str) -> Result<ForgeStack, thule_forge::ForgeError> {
    match GitLabOptions::from_env(repo_url)? {
        Some(opts) => {
            info!(base_url = %opts.base_url, project = %opts.project_path, "gitlab forge configured");
            Ok((
                Arc::new(GitLabCommentStore::new(opts.clone())?),
                Arc::new(GitLabStatusPublisher::new(opts.clone())?),
                Some(Arc::new(GitLabMergeRequestReader::new(opts)?)),
            ))
        }
        None => Ok((
            Arc::new(MemoryCommentStore::new()),
            Arc::new(MemoryStatusPublisher::new()),
            None,
        )),
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn env_or(key: &str, fallback: &str) -> String {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => value,
        _ => fallback.to_string(),
    }
}

/// Accepts Go-style `:8080` listen addresses as well as full socket
/// addresses.
fn parse_addr(raw: &str) -> Result<SocketAddr, std::net::AddrParseError> {
    if let Some(port) = raw.strip_prefix(':') {
        return format!("0.0.0.0:{port}").parse();
    }
    raw.parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn go_style_listen_addresses_are_accepted() {
        assert_eq!(parse_addr(":8080").unwrap().port(), 8080);
        assert_eq!(
            parse_addr("127.0.0.1:9000").unwrap(),
            "127.0.0.1:9000".parse().unwrap()
        );
        assert!(parse_addr("nonsense").is_err());
    }
}

//! skycat daemon and operator binary.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::Serialize;
use skycat_core::CatalogKind;
use skycat_core::config::AppConfig;
use skycat_metadata::MetadataStore;
use skycat_metadata::repos::ImageRepo;
use skycat_server::workflow::SolveRequestOutcome;
use skycat_server::{AppState, WorkerPool, bulk, catalog_import, create_router, reaper};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// skycat - plate-solve orchestration and catalog matching
#[derive(Parser, Debug)]
#[command(name = "skycatd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        global = true,
        env = "SKYCAT_CONFIG",
        default_value = "config/skycat.toml"
    )]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server, worker pool, watchdog and reaper (default)
    Serve,
    /// Solve one image and wait for the result
    Solve {
        image_id: i64,
        /// Re-solve an already solved image
        #[arg(long)]
        force: bool,
    },
    /// Recompute the automatic catalog matches of one image
    Rematch { image_id: i64 },
    /// Queue solves for every eligible image under a path prefix
    BulkSolve {
        prefix: String,
        #[arg(long)]
        force: bool,
    },
    /// Re-match every solved image under a path prefix
    BulkMatch { prefix: String },
    /// Fail stale in-flight submissions once
    Reap,
    /// Load a JSON catalog file (messier, ngc or named_star)
    ImportCatalog { kind: CatalogKind, file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // One-shot commands print JSON on stdout, so logs go to stderr.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("skycat v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;
    config.validate().map_err(anyhow::Error::msg)?;

    skycat_server::metrics::register_metrics();

    let metadata = skycat_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    tracing::info!("Metadata store initialized");

    let solver =
        skycat_solver::from_config(&config.solver).context("failed to initialize plate solver")?;

    let state = AppState::new(config, metadata, solver);

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(state).await,
        Command::Solve { image_id, force } => solve_one(&state, image_id, force).await,
        Command::Rematch { image_id } => {
            let report = state.matcher.match_image(image_id).await?;
            print_json(&report)
        }
        Command::BulkSolve { prefix, force } => {
            let report =
                bulk::bulk_solve(state.metadata.as_ref(), &state.workflow, &prefix, force).await?;
            print_json(&report)
        }
        Command::BulkMatch { prefix } => {
            let report =
                bulk::bulk_match(state.metadata.as_ref(), &state.matcher, &prefix).await?;
            print_json(&report)
        }
        Command::Reap => {
            let reaped =
                reaper::reap_once(state.metadata.as_ref(), state.config.workflow.stale_after())
                    .await?;
            print_json(&serde_json::json!({ "reaped": reaped }))
        }
        Command::ImportCatalog { kind, file } => {
            let report = catalog_import::import_file(state.metadata.as_ref(), kind, &file)
                .await
                .with_context(|| format!("failed to import {}", file.display()))?;
            print_json(&report)
        }
    }
}

/// Load configuration (file is optional, env vars can provide/override everything).
fn load_config(path: &str) -> Result<AppConfig> {
    let config_path = std::path::Path::new(path);
    let mut figment = Figment::new();
    let has_config_file = config_path.exists();

    if has_config_file {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::debug!("No config file found at {}", path);
    }

    // SKYCAT_CONFIG is only the file path
    let has_env_config =
        std::env::vars().any(|(key, _)| key.starts_with("SKYCAT_") && key != "SKYCAT_CONFIG");

    if !has_config_file && !has_env_config {
        anyhow::bail!(
            "No configuration provided.\n\n\
             Provide configuration via one of:\n  \
             1. Config file: skycatd --config /path/to/skycat.toml\n  \
             2. Environment variables: SKYCAT_METADATA__TYPE=sqlite \
             SKYCAT_METADATA__PATH=/var/lib/skycat/skycat.db skycatd\n\n\
             See config/skycat.example.toml for example configuration.\n\
             Set SKYCAT_CONFIG env var to specify a default config file path."
        );
    }

    if !has_config_file {
        tracing::info!("Using environment variables for configuration");
    }

    figment
        .merge(Env::prefixed("SKYCAT_").split("__"))
        .extract()
        .context("failed to load configuration")
}

async fn serve(state: AppState) -> Result<()> {
    recover_orphaned_tasks(&state.metadata).await?;

    let _watchdog_handle = state.task_registry.clone().spawn_watchdog();
    tracing::info!("Task watchdog spawned");

    let pool = Arc::new(WorkerPool::new(
        state.metadata.clone(),
        state.workflow.clone(),
        state.task_registry.clone(),
    ));
    let _workers = pool.spawn();

    let workflow_config = &state.config.workflow;
    let _reaper_handle = reaper::spawn_reaper(
        state.metadata.clone(),
        workflow_config.reaper_interval(),
        workflow_config.stale_after(),
    );

    let addr: SocketAddr = state
        .config
        .server
        .bind
        .parse()
        .context("invalid bind address")?;
    let app = create_router(state);

    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Re-queue tasks left running by a previous process.
///
/// Their images stay in flight; the re-queued monitor picks them up again
/// and the reaper covers anything that never resumes.
async fn recover_orphaned_tasks(metadata: &Arc<dyn MetadataStore>) -> Result<()> {
    let recovered = metadata
        .recover_orphaned_tasks(OffsetDateTime::now_utc())
        .await
        .context("failed to recover orphaned tasks")?;
    if recovered > 0 {
        tracing::warn!(
            count = recovered,
            "Re-queued tasks left running by a previous server instance"
        );
    }
    Ok(())
}

/// Request a solve, then drive the image's tasks inline until it settles.
async fn solve_one(state: &AppState, image_id: i64, force: bool) -> Result<()> {
    let outcome = state.workflow.request_solve(image_id, force).await?;
    tracing::info!(image_id, outcome = ?outcome, "Solve requested");

    if !matches!(outcome, SolveRequestOutcome::AlreadyStarted { .. }) {
        let workflow = &state.config.workflow;
        // Room for every poll plus a few deferred admissions.
        let budget = workflow
            .poll_interval()
            .saturating_mul(workflow.max_poll_attempts)
            .saturating_add(Duration::from_secs(
                state.config.admission.retry_after_secs.saturating_mul(4),
            ))
            .saturating_add(Duration::from_secs(60));

        let pool = WorkerPool::new(
            state.metadata.clone(),
            state.workflow.clone(),
            state.task_registry.clone(),
        );
        if !pool.run_until_settled(image_id, budget).await {
            tracing::warn!(image_id, "Image did not settle before the deadline");
        }
    }

    let image = state
        .metadata
        .get_image(image_id)
        .await?
        .with_context(|| format!("image {image_id} disappeared"))?;
    print_json(&serde_json::json!({
        "request": outcome,
        "image_id": image.image_id,
        "astrometry_status": image.astrometry_status,
        "submission_id": image.submission_id,
        "job_id": image.job_id,
        "astrometry_url": image.astrometry_url,
        "ra_center_degrees": image.ra_center_degrees,
        "dec_center_degrees": image.dec_center_degrees,
    }))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("failed to serialize output")?;
    println!("{out}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use skycat_metadata::SqliteStore;
    use skycat_metadata::models::{NewImage, TaskRow};
    use skycat_metadata::repos::TaskKind;

    #[test]
    fn import_catalog_parses_kind() {
        let args = Args::try_parse_from([
            "skycatd",
            "import-catalog",
            "named-star",
            "stars.json",
        ])
        .unwrap();
        assert!(matches!(
            args.command,
            Some(Command::ImportCatalog {
                kind: CatalogKind::NamedStar,
                ..
            })
        ));
    }

    #[test]
    fn serve_is_the_default() {
        let args = Args::try_parse_from(["skycatd", "--config", "x.toml"]).unwrap();
        assert!(args.command.is_none());
        assert_eq!(args.config, "x.toml");
    }

    #[tokio::test]
    async fn recover_orphaned_tasks_requeues_running() {
        let metadata: Arc<dyn MetadataStore> =
            Arc::new(SqliteStore::new(":memory:", None).await.unwrap());
        let image_id = metadata
            .insert_image(&NewImage {
                file_path: "/lights/orphan.fits".into(),
                ..NewImage::default()
            })
            .await
            .unwrap();
        let now = OffsetDateTime::now_utc();
        let task = TaskRow::queued(image_id, TaskKind::Monitor, Some("1".into()), false, now);
        metadata.enqueue_task(&task).await.unwrap();
        metadata.claim_due_task(now).await.unwrap().unwrap();

        recover_orphaned_tasks(&metadata).await.unwrap();

        let row = metadata.get_task(task.task_id).await.unwrap().unwrap();
        assert_eq!(row.state, "queued");
    }
}

//! `meshforge-worker` -- runs one generation end to end.
//!
//! Reads a generation request (JSON) from the path given as the first
//! argument, submits it as `USER_ID` and logs progress until the
//! generation reaches a terminal status. Ctrl-C cancels the generation.
//!
//! See [`config::WorkerConfig::from_env`] for the environment variables.

mod config;

use std::sync::Arc;

use anyhow::Context;
use meshforge_core::generation::GenerationInput;
use meshforge_db::{CreditLedger, GenerationStore, MemoryStore, PgStore};
use meshforge_events::{EventBus, GenerationEventKind};
use meshforge_pipeline::{GenerationOrchestrator, StaticIdentity};
use meshforge_provider::ProviderApi;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::{LogFormat, WorkerConfig};

const DEFAULT_LOG_FILTER: &str =
    "meshforge_worker=debug,meshforge_pipeline=debug,meshforge_provider=info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = WorkerConfig::from_env()?;
    init_tracing(config.log_format);

    let path = std::env::args()
        .nth(1)
        .context("usage: meshforge-worker <request.json>")?;
    let raw = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
    let input: GenerationInput =
        serde_json::from_str(&raw).with_context(|| format!("parsing {path}"))?;

    let (store, ledger) = open_store(&config).await?;

    let http = reqwest::Client::builder()
        .timeout(config.http_timeout())
        .build()
        .context("building HTTP client")?;
    let client = Arc::new(ProviderApi::with_client(http, &config.proxy_base_url));

    let events = Arc::new(EventBus::default());
    tokio::spawn(log_events(Arc::clone(&events)));

    let orchestrator = GenerationOrchestrator::new(
        client,
        store,
        ledger,
        Arc::new(StaticIdentity::user(config.user_id)),
        events,
        config.orchestrator(),
    );

    tracing::info!(
        user_id = config.user_id,
        proxy = %config.proxy_base_url,
        kind = input.kind.as_str(),
        "Starting meshforge-worker",
    );

    let handle = orchestrator.start(input).await?;
    let generation_id = handle.generation_id;
    let wait = handle.wait();
    tokio::pin!(wait);

    let finished = tokio::select! {
        result = &mut wait => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    let result = match finished {
        Some(result) => result,
        None => {
            tracing::info!(generation_id, "Interrupted; canceling generation");
            orchestrator.cancel(generation_id).await?;
            wait.await
        }
    };

    match result {
        Ok(outcome) => {
            tracing::info!(
                generation_id,
                asset_id = outcome.asset.id,
                model_url = outcome.asset.preferred_model_url().unwrap_or("-"),
                balance = ?outcome.balance,
                "Generation finished",
            );
            println!("{}", serde_json::to_string_pretty(&outcome.asset)?);
            Ok(())
        }
        Err(e) if e.is_canceled() => {
            tracing::info!(generation_id, "Generation canceled");
            Ok(())
        }
        Err(e) => Err(anyhow::Error::new(e).context(format!("generation {generation_id} failed"))),
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

/// PostgreSQL when `DATABASE_URL` is set, otherwise an in-memory store
/// seeded with `INITIAL_CREDITS`.
async fn open_store(
    config: &WorkerConfig,
) -> anyhow::Result<(Arc<dyn GenerationStore>, Arc<dyn CreditLedger>)> {
    match &config.database_url {
        Some(url) => {
            let pool = meshforge_db::create_pool(url)
                .await
                .context("connecting to database")?;
            meshforge_db::health_check(&pool).await?;
            meshforge_db::run_migrations(&pool)
                .await
                .context("running migrations")?;
            if config.initial_credits.is_some() {
                tracing::warn!("INITIAL_CREDITS is ignored with a database");
            }
            tracing::info!("Using PostgreSQL store");
            let store = Arc::new(PgStore::new(pool));
            let generations: Arc<dyn GenerationStore> = store.clone();
            let ledger: Arc<dyn CreditLedger> = store;
            Ok((generations, ledger))
        }
        None => {
            let credits = config.initial_credits.unwrap_or(0);
            tracing::info!(credits, "Using in-memory store");
            let store = Arc::new(MemoryStore::with_balance(config.user_id, credits));
            let generations: Arc<dyn GenerationStore> = store.clone();
            let ledger: Arc<dyn CreditLedger> = store;
            Ok((generations, ledger))
        }
    }
}

async fn log_events(events: Arc<EventBus>) {
    let mut rx = events.subscribe();
    loop {
        match rx.recv().await {
            Ok(event) => match &event.kind {
                GenerationEventKind::Progress { progress } => {
                    tracing::debug!(generation_id = event.generation_id, progress, "Progress");
                }
                GenerationEventKind::StageStarted { stage, task_id } => tracing::info!(
                    generation_id = event.generation_id,
                    stage = stage.as_str(),
                    task_id = %task_id,
                    "Stage started",
                ),
                other => tracing::info!(
                    generation_id = event.generation_id,
                    event = other.message_type(),
                    "Generation event",
                ),
            },
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event logger lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use serviceradar::alerting::{AlertSender, DiscordSender, WebhookSender};
use serviceradar::api::middleware::auth::{hash_key, PERM_ADMIN, PERM_READ, PERM_WRITE};
use serviceradar::api::{spawn_api_server, ApiState, SnapshotStore};
use serviceradar::config::{read_config_file, Config, KnownPollers};
use serviceradar::engine::Engine;
use serviceradar::metrics::MetricManager;
use serviceradar::notify::types::{
    NotificationLevel, NotificationRequest, TargetSpec, TargetType,
};
use serviceradar::notify::NotificationService;
use serviceradar::scheduler::Scheduler;
use serviceradar::store::{ApiKeyRow, SqliteStore};
use tokio::sync::watch;
use tracing::{error, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("serviceradar", LevelFilter::TRACE),
        ("serviceradar_core", LevelFilter::TRACE),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .pretty()
                .with_writer(std::io::stderr)
                .compact(),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file)?;

    if let Err(e) = config.validate() {
        error!("invalid configuration: {}", e);
        return Err(anyhow::anyhow!("configuration validation failed: {}", e));
    }

    run_core(config).await
}

async fn run_core(config: Config) -> anyhow::Result<()> {
    let known = KnownPollers::compile(&config.known_pollers)?;
    if known.is_empty() {
        warn!("no known-poller patterns configured, accepting all reports");
    }

    let store = Arc::new(SqliteStore::new(&config.storage.path).await?);

    // Pre-register exact poller ids so the never-reported check can name
    // pollers that have yet to make first contact
    store
        .ensure_known_pollers(known.exact_ids(), Utc::now())
        .await?;

    bootstrap_admin_key(&store, &config).await?;

    let metrics = Arc::new(MetricManager::new(&config.metrics));

    let mut senders: Vec<Arc<dyn AlertSender>> = Vec::new();
    let mut alert_targets = Vec::new();

    if let Some(webhook) = &config.alerting.webhook {
        alert_targets.push(TargetSpec {
            target_type: TargetType::Webhook,
            target_id: webhook.name.clone(),
        });
        senders.push(Arc::new(WebhookSender::new(webhook.clone())));
        info!("webhook alerting enabled ({})", webhook.url);
    }

    if let Some(discord) = &config.alerting.discord {
        alert_targets.push(TargetSpec {
            target_type: TargetType::Discord,
            target_id: "discord".to_string(),
        });
        senders.push(Arc::new(DiscordSender::new(discord.clone())));
        info!("discord alerting enabled");
    }

    if alert_targets.is_empty() {
        warn!("no alert targets configured, health alerts will be dropped");
    }

    let notifications = NotificationService::new(store.clone(), senders);
    let snapshots = Arc::new(SnapshotStore::new());

    let engine = Arc::new(Engine::new(
        store.clone(),
        metrics.clone(),
        notifications.clone(),
        snapshots.clone(),
        known.clone(),
        config.alert_threshold(),
        alert_targets.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    Scheduler::new(
        engine.clone(),
        store.clone(),
        metrics.clone(),
        known,
        config.storage.retention_days,
        shutdown_rx.clone(),
    )
    .start();
    info!("scheduler loops started");

    let bind_addr: SocketAddr = format!("{}:{}", config.api.bind, config.api.port).parse()?;
    let api_state = ApiState {
        engine,
        store: store.clone(),
        metrics,
        notifications: notifications.clone(),
        snapshots,
    };
    let addr = spawn_api_server(bind_addr, api_state, config.api.enable_cors, shutdown_rx).await?;
    info!("core started on http://{}", addr);

    info!("press Ctrl+C to shutdown gracefully");
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received shutdown signal, stopping"),
        Err(err) => error!("unable to listen for shutdown signal: {err}"),
    }

    // Best-effort shutdown notice; failures are ignored
    if !alert_targets.is_empty() {
        let _ = notifications
            .create_and_dispatch(NotificationRequest {
                alert_id: "core:shutdown:".to_string(),
                node_id: None,
                service_name: None,
                level: NotificationLevel::Info,
                title: "Core Shutting Down".to_string(),
                message: "serviceradar core is shutting down".to_string(),
                expire_at: None,
                metadata: Default::default(),
                targets: alert_targets,
            })
            .await;
    }

    let _ = shutdown_tx.send(true);

    // Let the API drain and the loops observe the signal
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;

    store.close().await;
    info!("core stopped");

    Ok(())
}

/// Seed the configured bootstrap admin key if it is not present yet. Only
/// the hash is stored; the secret lives in the operator's config.
async fn bootstrap_admin_key(store: &SqliteStore, config: &Config) -> anyhow::Result<()> {
    let Some(secret) = &config.api.bootstrap_key else {
        return Ok(());
    };

    match store.get_api_key("bootstrap").await {
        Ok(_) => return Ok(()),
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e.into()),
    }

    store
        .create_api_key(&ApiKeyRow {
            key_id: "bootstrap".to_string(),
            key_hash: hash_key(secret),
            service_name: "bootstrap".to_string(),
            permissions: vec![
                PERM_READ.to_string(),
                PERM_WRITE.to_string(),
                PERM_ADMIN.to_string(),
            ],
            created_at: Utc::now(),
            expires_at: None,
            last_used_at: None,
        })
        .await?;

    info!("seeded bootstrap admin api key");
    Ok(())
}

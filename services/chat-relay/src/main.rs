use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::serve;
use chat_relay::{
    create_router, ApiState, CostTable, EventBus, MessageStore, MeteredClient, QuotaDay,
    QuotaGovernor, RelayConfig, RelayManager, UsageLedger, UsageLogStore, YouTubeClient,
};
use tokio::{net::TcpListener, signal};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = RelayConfig::from_env().context("failed to load configuration")?;
    init_tracing(&config);

    info!(
        host = %config.server_host,
        port = config.server_port,
        data_dir = %config.data_dir.display(),
        channels = ?config.channel_ids,
        lookup = %config.session_lookup,
        quota_timezone = %config.quota_timezone,
        "starting chat-relay service"
    );

    let bus = EventBus::default();

    let usage_store = Arc::new(
        UsageLogStore::open(&config.data_dir).context("failed to open usage log database")?,
    );
    let messages = Arc::new(
        MessageStore::open(&config.data_dir).context("failed to open chat message database")?,
    );

    let (ledger, ledger_writer) =
        UsageLedger::start(usage_store, QuotaDay::new(config.quota_timezone), bus.clone());
    let governor = Arc::new(QuotaGovernor::new(
        Arc::clone(&ledger),
        CostTable::default(),
        config.quota_policy(),
        bus.clone(),
    ));

    let upstream = YouTubeClient::new(
        config.api_base_url.clone(),
        config.api_key.clone(),
        config.upstream_timeout_secs,
    )
    .context("failed to build upstream client")?;
    let client = Arc::new(MeteredClient::new(
        Arc::new(upstream),
        governor,
        Arc::clone(&ledger),
    ));

    let relay = RelayManager::new(
        Arc::clone(&client),
        Arc::clone(&messages),
        bus.clone(),
        config.poller_settings(),
        config.channel_ids.clone(),
        config.monitoring_enabled,
    );

    if !config.monitoring_enabled {
        info!("chat monitoring disabled by configuration");
    } else if config.autostart {
        for channel_id in relay.channels() {
            relay.start(channel_id);
        }
    }

    let shutdown = CancellationToken::new();
    let state = Arc::new(
        ApiState::new(
            Arc::clone(&ledger),
            client,
            messages,
            relay.clone(),
            bus,
        )
        .with_heartbeat_interval(config.heartbeat_interval())
        .with_shutdown(shutdown.clone()),
    );
    let router = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server_host, config.server_port)
        .parse()
        .context("invalid server bind address")?;
    let listener = TcpListener::bind(addr)
        .await
        .context("failed to bind TCP listener")?;
    let local_addr = listener
        .local_addr()
        .context("failed to read bound address")?;
    info!(%local_addr, "chat-relay listening");

    serve(listener, router.into_make_service())
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown.cancel();
        })
        .await
        .context("server encountered an unrecoverable error")?;

    relay.shutdown().await;
    ledger.flush().await;
    if ledger_writer.is_finished() {
        warn!("usage ledger writer stopped before shutdown; recent entries may be lost");
    }

    info!("chat-relay shutdown complete");
    Ok(())
}

fn init_tracing(config: &RelayConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| std::env::var("LOG_LEVEL").map(EnvFilter::new))
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for CTRL+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

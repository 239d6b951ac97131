use anyhow::Context;
use campus_safety_backend::{
    config::Settings,
    dispatch::{LogPushSender, NotificationDispatcher},
    routes, AppState,
};
use chrono::Utc;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "campus-safety-server", about = "Campus SOS and safe walk backend")]
struct Args {
    /// TOML configuration file; environment variables override it
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Overrides `bind_addr` from the configuration
    #[arg(long)]
    bind: Option<SocketAddr>,

    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut settings = Settings::load_from(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config.display()))?;
    if let Some(bind) = args.bind {
        settings.bind_addr = bind;
    }

    init_tracing(&settings.log_level, args.json_logs);

    let state = Arc::new(AppState::in_memory(settings.clone()));

    let dispatcher = Arc::new(NotificationDispatcher::new(
        state.store.clone(),
        Arc::new(LogPushSender),
    ));
    dispatcher.spawn(state.events());

    spawn_housekeeping(state.clone(), settings.safe_walk.delay_check_interval_secs);

    let app = routes::create_router(state);

    let listener = TcpListener::bind(settings.bind_addr)
        .await
        .with_context(|| format!("binding {}", settings.bind_addr))?;
    tracing::info!(addr = %settings.bind_addr, "listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Delayed-walk sweep plus limiter cleanup
fn spawn_housekeeping(state: Arc<AppState>, interval_secs: u64) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            ticker.tick().await;
            match state.walks.sweep_delayed(Utc::now()).await {
                Ok(delayed) if !delayed.is_empty() => {
                    tracing::info!(count = delayed.len(), "marked safe walks delayed");
                },
                Ok(_) => {},
                Err(e) => tracing::error!(error = %e, "delayed walk sweep failed"),
            }
            state.rate_limiter.cleanup();
            state.token_limiter.cleanup();
            state.locations.prune();
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
    tracing::info!("shutting down");
}

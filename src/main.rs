use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use mail_relay::{
    config::Config, counter::DailyCounterStore, dispatch::MailDispatcher, router::ProviderRouter,
    AppState,
};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("Invalid configuration")?;

    // Refuse to serve with an unknown counter state
    let store = DailyCounterStore::new(&config.counter_file);
    let record = store
        .ensure_fresh()
        .await
        .context("Failed to initialize daily counter")?;
    info!(
        date = %record.date,
        count = record.count,
        policy = ?config.policy,
        limit = config.daily_limit,
        "Daily counter ready"
    );

    let dispatcher = MailDispatcher::from_config(&config.primary, &config.fallback)
        .context("Failed to create SMTP transports")?;
    let router = ProviderRouter::new(config.policy, config.daily_limit, config.default_from.clone());

    let app = mail_relay::app(AppState {
        store: Arc::new(store),
        router: Arc::new(router),
        dispatcher,
    });

    // Run it
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Mailer API listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("Failed to run server")?;

    Ok(())
}

use std::sync::Arc;

use anyhow::Context;
use pet_butler::assistant::PetAssistant;
use pet_butler::channels::{ChannelManager, CliChannel, TelegramChannel, TelegramMode};
use pet_butler::config::AppConfig;
use pet_butler::dispatcher::Dispatcher;
use pet_butler::llm::create_provider;
use pet_butler::onboarding::{OnboardingManager, OnboardingRouteState, onboarding_routes};
use pet_butler::server;
use pet_butler::store::{Database, LibSqlBackend, ProfileGateway};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env().context("invalid configuration")?;

    eprintln!("🐾 Pet Butler v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.llm.model);
    eprintln!("   HTTP: http://0.0.0.0:{}/", config.port);

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("failed to open database at {}", config.db_path.display()))?,
    );
    eprintln!("   Database: {}", config.db_path.display());

    let gateway = ProfileGateway::new(db).with_timeout(config.store_timeout);

    // ── Onboarding + assistant ───────────────────────────────────────────
    let llm = create_provider(&config.llm)?;
    let onboarding = OnboardingManager::new(gateway.clone());
    let assistant = Arc::new(PetAssistant::new(
        gateway.clone(),
        llm,
        config.llm.max_tokens,
    ));

    // ── Channels ─────────────────────────────────────────────────────────
    let mut channels = ChannelManager::new();
    let mut routes = vec![onboarding_routes(OnboardingRouteState {
        manager: Arc::new(onboarding.clone()),
        gateway,
    })];

    if let Some(telegram) = config.telegram {
        let mode = match &telegram.mode {
            TelegramMode::Polling => "polling".to_string(),
            TelegramMode::Webhook { url, .. } => format!("webhook at {url}"),
        };
        eprintln!("   Telegram: enabled ({mode})");
        let channel = TelegramChannel::new(telegram.bot_token, telegram.mode);
        routes.push(channel.webhook_router());
        channels.add(Box::new(channel));
    }

    if config.cli {
        eprintln!("   CLI: enabled (user: local-user)");
        channels.add(Box::new(CliChannel::new()));
    }

    eprintln!("   Channels: {}\n", channels.names().join(", "));

    // ── HTTP server ──────────────────────────────────────────────────────
    let (_addr, server_handle) = server::spawn(server::router(routes), config.port)
        .await
        .with_context(|| format!("failed to bind port {}", config.port))?;

    let dispatcher = Arc::new(Dispatcher::new(onboarding, assistant));
    dispatcher.run(channels).await?;

    server_handle.abort();
    Ok(())
}

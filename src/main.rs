//! Storefront support chat server

use storefront_support_chat::api;
use storefront_support_chat::core::ai::RagAiAdapter;
use storefront_support_chat::core::auth::TokenAuthenticator;
use storefront_support_chat::core::bot::KeywordBotEngine;
use storefront_support_chat::core::guest::{GuestSessionStore, MyGuestChatService, spawn_eviction};
use storefront_support_chat::core::hub::Hub;
use storefront_support_chat::core::services::{MyMessageService, MyRoomService};
use storefront_support_chat::infrastructure::config::ChatConfig;
use storefront_support_chat::infrastructure::database::DatabaseConnection;
use storefront_support_chat::infrastructure::gemini::GeminiBackend;
use storefront_support_chat::infrastructure::repositories::{
    DbCatalogRepository, DbFaqRepository, DbMessageRepository, DbRoomRepository, DbUserDirectory,
};

use anyhow::Context;
use axum::http::{HeaderValue, Method, header};
use di::{Injectable, ServiceCollection};
use di_axum::RouterServiceProviderExtensions;
use log::{info, warn};
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};
use tower_http::cors::{AllowOrigin, CorsLayer};

const GUEST_EVICTION_INTERVAL: Duration = Duration::from_secs(60);

fn main() -> anyhow::Result<()> {
    // initialize tracing
    tracing_subscriber::fmt::init();

    let runtime: Runtime = Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(web_server_task())
}

async fn web_server_task() -> anyhow::Result<()> {
    let provider = ServiceCollection::new()
        .add(ChatConfig::singleton())
        .add(DatabaseConnection::singleton())
        .add(GeminiBackend::singleton())
        .add(Hub::singleton())
        .add(GuestSessionStore::singleton())
        .add(DbRoomRepository::scoped())
        .add(DbMessageRepository::scoped())
        .add(DbFaqRepository::scoped())
        .add(DbUserDirectory::scoped())
        .add(DbCatalogRepository::scoped())
        .add(TokenAuthenticator::scoped())
        .add(RagAiAdapter::scoped())
        .add(KeywordBotEngine::scoped())
        .add(MyRoomService::scoped())
        .add(MyMessageService::scoped())
        .add(MyGuestChatService::scoped())
        .build_provider()
        .map_err(|e| anyhow::anyhow!("invalid service registrations: {e:?}"))?;

    let config = provider.get_required::<ChatConfig>();
    if !config.ai_enabled() {
        warn!("GEMINI_API_KEY is not set, the bot answers from the FAQ only");
    }

    let database = provider.get_required::<DatabaseConnection>();
    sqlx::migrate!()
        .run(&**database)
        .await
        .context("failed to run database migrations")?;

    spawn_eviction(
        provider.get_required::<GuestSessionStore>(),
        GUEST_EVICTION_INTERVAL,
    );

    let origins = config
        .cors_origins
        .iter()
        .map(|origin| origin.parse::<HeaderValue>())
        .collect::<Result<Vec<_>, _>>()
        .context("invalid CORS_ORIGINS")?;

    let app = api::router()
        .layer(
            CorsLayer::new()
                .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
                .allow_methods([Method::GET, Method::POST])
                .allow_origin(AllowOrigin::list(origins)),
        )
        .with_provider(provider);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("cannot bind {}", config.bind_addr))?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    info!("Shutting down...");
    Ok(())
}

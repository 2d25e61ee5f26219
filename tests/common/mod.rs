//! Shared harness for the integration tests.
//!
//! The DI container builds `DatabaseConnection` and `ChatConfig` itself, so tests hand it an
//! in-memory pool and a config through the global hooks. Tests using them are `#[serial]`.

#![allow(dead_code)]

use chrono::{Duration as ChronoDuration, Utc};
use di::{InjectBuilder, Injectable, Ref, ServiceCollection, ServiceProvider, inject, injectable};
use serde_json::Value;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use storefront_support_chat::core::ai::RagAiAdapter;
use storefront_support_chat::core::auth::{Principal, TokenAuthenticator, sign_token};
use storefront_support_chat::core::bot::KeywordBotEngine;
use storefront_support_chat::core::error::{ChatError, ChatResult};
use storefront_support_chat::core::guest::{GuestSessionStore, MyGuestChatService};
use storefront_support_chat::core::hub::Hub;
use storefront_support_chat::core::services::{MyMessageService, MyRoomService};
use storefront_support_chat::infrastructure::config::ChatConfig;
use storefront_support_chat::infrastructure::database::DatabaseConnection;
use storefront_support_chat::infrastructure::entities::UserRole;
use storefront_support_chat::infrastructure::gemini::GeminiBackend;
use storefront_support_chat::infrastructure::repositories::{
    DbCatalogRepository, DbFaqRepository, DbMessageRepository, DbRoomRepository, DbUserDirectory,
};
use storefront_support_chat::infrastructure::traits::GenerationBackend;
use tokio::sync::mpsc;
use uuid::Uuid;

pub const TEST_SECRET: &str = "integration-test-secret";
pub const CANNED_AI_ANSWER: &str = "Serum vitamin C phù hợp cho da xỉn màu.";

/// Counter for unique test database URIs
static TEST_DB_COUNTER: AtomicU32 = AtomicU32::new(0);

/// In-memory SQLite with migrations applied, installed as the global test pool.
///
/// A single connection keeps concurrent test writers from tripping over shared-cache locks.
pub async fn setup_test_db() -> SqlitePool {
    let db_num = TEST_DB_COUNTER.fetch_add(1, Ordering::SeqCst);
    let db_url = format!("sqlite:file:chattest{db_num}?mode=memory&cache=shared");

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(&db_url)
        .await
        .unwrap();
    sqlx::migrate!().run(&pool).await.unwrap();

    DatabaseConnection::set_test_pool(pool.clone());
    ChatConfig::set_test_config(test_config());

    pool
}

pub fn test_config() -> ChatConfig {
    ChatConfig {
        token_secret: TEST_SECRET.to_owned(),
        ai_timeout: Duration::from_millis(200),
        guest_session_ttl: Duration::from_secs(60),
        ..ChatConfig::default()
    }
}

/// Clean up after test
pub fn cleanup_test_db() {
    DatabaseConnection::clear_test_pool();
    ChatConfig::clear_test_config();
}

/// Full service graph with the given generation backend in place of the HTTP one.
pub fn build_provider(backend: InjectBuilder) -> ServiceProvider {
    ServiceCollection::new()
        .add(ChatConfig::singleton())
        .add(DatabaseConnection::singleton())
        .add(backend)
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
        .unwrap()
}

/// Provider with the real backend, which stays unconfigured without an API key.
pub fn default_provider() -> ServiceProvider {
    build_provider(GeminiBackend::singleton())
}

pub struct CannedBackend;

#[injectable(GenerationBackend)]
impl CannedBackend {
    #[inject]
    pub fn create() -> CannedBackend {
        CannedBackend
    }
}

#[async_trait::async_trait]
impl GenerationBackend for CannedBackend {
    fn is_configured(&self) -> bool {
        true
    }

    async fn generate(&self, _prompt: &str) -> ChatResult<String> {
        Ok(format!("  {CANNED_AI_ANSWER}\n"))
    }
}

/// Never answers; the adapter's timeout must cut it off.
pub struct HangingBackend;

#[injectable(GenerationBackend)]
impl HangingBackend {
    #[inject]
    pub fn create() -> HangingBackend {
        HangingBackend
    }
}

#[async_trait::async_trait]
impl GenerationBackend for HangingBackend {
    fn is_configured(&self) -> bool {
        true
    }

    async fn generate(&self, _prompt: &str) -> ChatResult<String> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok("too late".to_owned())
    }
}

pub struct FailingBackend;

#[injectable(GenerationBackend)]
impl FailingBackend {
    #[inject]
    pub fn create() -> FailingBackend {
        FailingBackend
    }
}

#[async_trait::async_trait]
impl GenerationBackend for FailingBackend {
    fn is_configured(&self) -> bool {
        true
    }

    async fn generate(&self, _prompt: &str) -> ChatResult<String> {
        Err(ChatError::Upstream("503 Service Unavailable".to_owned()))
    }
}

/// Answers with the handoff sentinel, as the model does for complaints.
pub struct HandoffBackend;

#[injectable(GenerationBackend)]
impl HandoffBackend {
    #[inject]
    pub fn create() -> HandoffBackend {
        HandoffBackend
    }
}

#[async_trait::async_trait]
impl GenerationBackend for HandoffBackend {
    fn is_configured(&self) -> bool {
        true
    }

    async fn generate(&self, _prompt: &str) -> ChatResult<String> {
        Ok(" TRANSFER_TO_HUMAN\n".to_owned())
    }
}

/// Closes every open room while "generating", so the reply arrives too late.
pub struct ClosingBackend {
    connection: Ref<DatabaseConnection>,
}

#[injectable(GenerationBackend)]
impl ClosingBackend {
    #[inject]
    pub fn create(connection: Ref<DatabaseConnection>) -> ClosingBackend {
        ClosingBackend { connection }
    }
}

#[async_trait::async_trait]
impl GenerationBackend for ClosingBackend {
    fn is_configured(&self) -> bool {
        true
    }

    async fn generate(&self, _prompt: &str) -> ChatResult<String> {
        sqlx::query("UPDATE chat_rooms SET status = 'CLOSED', closed_at = ? WHERE status != 'CLOSED'")
            .bind(Utc::now())
            .execute(&**self.connection)
            .await?;
        Ok(CANNED_AI_ANSWER.to_owned())
    }
}

pub async fn seed_user(pool: &SqlitePool, role: UserRole, display_name: &str) -> Principal {
    let user_id = Uuid::new_v4();
    sqlx::query("INSERT INTO users (id, display_name, role) VALUES (?, ?, ?)")
        .bind(user_id)
        .bind(display_name)
        .bind(role)
        .execute(pool)
        .await
        .unwrap();

    Principal {
        user_id,
        role,
        display_name: display_name.to_owned(),
    }
}

pub async fn seed_faq(pool: &SqlitePool, keywords: &str, answer: &str, priority: i64) -> i64 {
    sqlx::query_scalar(
        "INSERT INTO faq_entries (keywords, question, answer, priority) VALUES (?, ?, ?, ?) RETURNING id",
    )
    .bind(keywords)
    .bind(keywords)
    .bind(answer)
    .bind(priority)
    .fetch_one(pool)
    .await
    .unwrap()
}

pub fn token_for(user: &Principal) -> String {
    sign_token(TEST_SECRET, user.user_id, Utc::now() + ChronoDuration::hours(1))
}

/// Decoded frames waiting in a hub outbox.
pub fn drain(receiver: &mut mpsc::UnboundedReceiver<String>) -> Vec<Value> {
    let mut frames = Vec::new();
    while let Ok(frame) = receiver.try_recv() {
        frames.push(serde_json::from_str(&frame).unwrap());
    }
    frames
}

pub fn frames_to<'a>(frames: &'a [Value], destination: &str) -> Vec<&'a Value> {
    frames
        .iter()
        .filter(|frame| frame["destination"] == destination)
        .collect()
}

//! Infrastructure traits, used for DI on higher levels

use crate::core::error::ChatResult;
use crate::infrastructure::entities;
use crate::infrastructure::entities::{AgentKind, RoomStatus, SenderType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait]
pub trait RoomRepository: Send + Sync {
    async fn find_room(&self, room_id: Uuid) -> ChatResult<Option<entities::Room>>;

    async fn create_room(&self, room: entities::Room) -> ChatResult<entities::Room>;

    /// Non-closed rooms of a customer, newest first.
    async fn list_active_rooms(&self, customer_id: Uuid) -> ChatResult<Vec<entities::Room>>;

    /// Pending rooms without an owner, oldest first.
    async fn list_unclaimed_pending(&self) -> ChatResult<Vec<entities::Room>>;

    async fn count_unclaimed_pending(&self) -> ChatResult<i64>;

    /// Pending or assigned rooms owned by `manager_id`, most recently updated first.
    async fn list_manager_rooms(&self, manager_id: Uuid) -> ChatResult<Vec<entities::Room>>;

    /// `OPEN -> PENDING` as a single conditional update. `None` when the room was not open.
    async fn mark_pending(&self, room_id: Uuid, at: DateTime<Utc>)
    -> ChatResult<Option<entities::Room>>;

    /// `PENDING -> ASSIGNED` as a single conditional update. `None` when the room was not
    /// pending at the time of the write.
    async fn claim_pending(
        &self,
        room_id: Uuid,
        manager_id: Uuid,
        agent_kind: AgentKind,
        at: DateTime<Utc>,
    ) -> ChatResult<Option<entities::Room>>;

    /// `expected -> CLOSED` as a single conditional update. `None` when the room was no longer
    /// in `expected` at the time of the write.
    async fn close(
        &self,
        room_id: Uuid,
        expected: RoomStatus,
        rating: Option<i64>,
        feedback: Option<String>,
        at: DateTime<Utc>,
    ) -> ChatResult<Option<entities::Room>>;

    async fn touch(&self, room_id: Uuid, at: DateTime<Utc>) -> ChatResult<()>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn create_message(&self, message: entities::NewMessage) -> ChatResult<entities::Message>;

    /// Inserts the message only while its room is in `status`, in the same statement.
    async fn create_message_in_status(
        &self,
        message: entities::NewMessage,
        status: RoomStatus,
    ) -> ChatResult<Option<entities::Message>>;

    /// One page of messages, newest first.
    async fn list_recent(
        &self,
        room_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> ChatResult<Vec<entities::Message>>;

    async fn last_message(&self, room_id: Uuid) -> ChatResult<Option<entities::Message>>;

    /// Returns the number of rows flipped to read.
    async fn mark_read(&self, room_id: Uuid, sender_type: SenderType) -> ChatResult<u64>;

    async fn count_unread(&self, room_id: Uuid, sender_type: SenderType) -> ChatResult<i64>;
}

#[async_trait]
pub trait FaqRepository: Send + Sync {
    async fn list_active(&self) -> ChatResult<Vec<entities::FaqEntry>>;
}

/// Read-only view of the account service.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user(&self, user_id: Uuid) -> ChatResult<Option<entities::User>>;
}

/// Read-only view of the storefront catalog.
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    async fn list_products(&self) -> ChatResult<Vec<entities::Product>>;

    async fn list_category_names(&self) -> ChatResult<Vec<String>>;

    async fn list_brand_names(&self) -> ChatResult<Vec<String>>;
}

/// External generative-text endpoint.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    fn is_configured(&self) -> bool;

    async fn generate(&self, prompt: &str) -> ChatResult<String>;
}

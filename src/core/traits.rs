//! DI "Interfaces"

use crate::core::auth::{Identity, Principal};
use crate::core::error::ChatResult;
use crate::infrastructure::entities;
use crate::infrastructure::entities::{AgentKind, MessageType, SenderType};
use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

/// Outcome of running the bot pipeline on one customer or guest message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BotResponse {
    pub message: String,
    pub transfer_to_human: bool,
    pub quick_replies: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    #[serde(flatten)]
    pub room: entities::Room,
    pub customer_name: Option<String>,
    pub customer_avatar: Option<String>,
    pub manager_name: Option<String>,
    pub manager_avatar: Option<String>,
    pub last_message: Option<entities::Message>,
    pub unread_count: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestWelcome {
    pub session_id: String,
    pub message: String,
    pub quick_replies: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestReply {
    pub session_id: String,
    pub message: String,
    pub quick_replies: Vec<String>,
    pub transfer_to_human: bool,
    pub requires_login: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BotStatus {
    pub online: bool,
    pub ai_enabled: bool,
    pub active_guest_sessions: usize,
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Verifies a bearer token and resolves the caller through the user directory.
    async fn authenticate(&self, token: &str) -> ChatResult<Principal>;

    /// Resolves the identity of a real-time connection before it is upgraded.
    ///
    /// A token, when present, must be valid; otherwise a live guest session id is required.
    async fn handshake(&self, token: Option<&str>, session_id: Option<&str>) -> ChatResult<Identity>;
}

#[async_trait]
pub trait RoomService: Send + Sync {
    /// Returns the customer's non-closed room, creating an open bot room (with a welcome
    /// message) when there is none.
    async fn get_or_create_room(&self, customer_id: Uuid) -> ChatResult<entities::Room>;

    /// Returns the room if `viewer` may see it: its customer, or any agent.
    async fn authorize_view(&self, room_id: Uuid, viewer: &Principal) -> ChatResult<entities::Room>;

    async fn room_summary(&self, room_id: Uuid, viewer: &Principal) -> ChatResult<RoomSummary>;

    async fn list_active_rooms(&self, customer_id: Uuid) -> ChatResult<Vec<entities::Room>>;

    async fn list_pending_rooms(&self) -> ChatResult<Vec<entities::Room>>;

    async fn list_manager_rooms(&self, manager_id: Uuid) -> ChatResult<Vec<entities::Room>>;

    async fn count_pending_rooms(&self) -> ChatResult<i64>;

    /// `OPEN -> PENDING`, then announces the pending queue change.
    async fn escalate(&self, room_id: Uuid) -> ChatResult<entities::Room>;

    /// Customer-initiated escalation of their own room.
    async fn request_human(&self, customer_id: Uuid, room_id: Uuid) -> ChatResult<entities::Room>;

    /// Claims a pending room. At most one concurrent caller succeeds; the others get
    /// `InvalidState` and nothing is written on their behalf.
    async fn accept_room(&self, room_id: Uuid, agent: &Principal) -> ChatResult<entities::Room>;

    async fn close_room(
        &self,
        room_id: Uuid,
        actor: &Principal,
        rating: Option<i64>,
        feedback: Option<String>,
    ) -> ChatResult<entities::Room>;
}

#[async_trait]
pub trait MessageService: Send + Sync {
    /// Stores a customer message and, for an open bot room, the bot's reply and any
    /// resulting escalation. Returns the customer's message.
    async fn send_customer_message(
        &self,
        customer_id: Uuid,
        room_id: Uuid,
        content: String,
        message_type: MessageType,
    ) -> ChatResult<entities::Message>;

    async fn send_agent_message(
        &self,
        agent_id: Uuid,
        kind: AgentKind,
        room_id: Uuid,
        content: String,
        message_type: MessageType,
    ) -> ChatResult<entities::Message>;

    async fn send_manager_message(
        &self,
        manager_id: Uuid,
        room_id: Uuid,
        content: String,
        message_type: MessageType,
    ) -> ChatResult<entities::Message> {
        self.send_agent_message(manager_id, AgentKind::Manager, room_id, content, message_type)
            .await
    }

    async fn send_support_message(
        &self,
        support_id: Uuid,
        room_id: Uuid,
        content: String,
        message_type: MessageType,
    ) -> ChatResult<entities::Message> {
        self.send_agent_message(support_id, AgentKind::Support, room_id, content, message_type)
            .await
    }

    /// Routes to the matching `send_*` operation by the sender's relation to the room.
    async fn send_as(
        &self,
        sender: &Principal,
        room_id: Uuid,
        content: String,
        message_type: MessageType,
    ) -> ChatResult<entities::Message>;

    /// One page of history in chronological order. Page 0 holds the most recent messages.
    async fn get_messages(
        &self,
        room_id: Uuid,
        page: i64,
        size: i64,
    ) -> ChatResult<Vec<entities::Message>>;

    async fn mark_messages_as_read(&self, room_id: Uuid, sender_type: SenderType) -> ChatResult<u64>;

    async fn count_unread(&self, room_id: Uuid, sender_type: SenderType) -> ChatResult<i64>;

    /// Marks the counterpart's messages read for `viewer` and announces it on the read channel.
    async fn mark_read_by(&self, viewer: &Principal, room_id: Uuid) -> ChatResult<u64>;

    async fn notify_typing(&self, sender: &Principal, room_id: Uuid, typing: bool) -> ChatResult<()>;
}

#[async_trait]
pub trait BotEngine: Send + Sync {
    /// Never fails; the worst case is the default reply.
    async fn respond(&self, message: &str) -> BotResponse;
}

#[async_trait]
pub trait AiAdapter: Send + Sync {
    fn is_available(&self) -> bool;

    /// Builds the retrieval context and prompt for `message` and asks the generation backend.
    async fn generate_reply(&self, message: &str) -> ChatResult<String>;
}

#[async_trait]
pub trait GuestChatService: Send + Sync {
    async fn init_guest_chat(&self, guest_name: Option<String>) -> GuestWelcome;

    async fn send_guest_message(&self, session_id: &str, content: String) -> ChatResult<GuestReply>;

    fn quick_replies(&self) -> Vec<String>;

    fn bot_status(&self) -> BotStatus;
}

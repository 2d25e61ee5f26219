//! Database entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomType {
    Bot,
    Human,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomStatus {
    Open,
    Pending,
    Assigned,
    Closed,
}

impl RoomStatus {
    pub fn is_terminal(self) -> bool {
        self == RoomStatus::Closed
    }

    /// Whether `self -> next` is one of the allowed lifecycle edges.
    pub fn can_transition_to(self, next: RoomStatus) -> bool {
        matches!(
            (self, next),
            (RoomStatus::Open, RoomStatus::Pending)
                | (RoomStatus::Open, RoomStatus::Closed)
                | (RoomStatus::Pending, RoomStatus::Assigned)
                | (RoomStatus::Pending, RoomStatus::Closed)
                | (RoomStatus::Assigned, RoomStatus::Closed)
        )
    }
}

/// Category of the human agent that claimed a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentKind {
    Manager,
    Support,
}

impl From<AgentKind> for SenderType {
    fn from(kind: AgentKind) -> Self {
        match kind {
            AgentKind::Manager => SenderType::Manager,
            AgentKind::Support => SenderType::Support,
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub manager_id: Option<Uuid>,
    pub agent_kind: Option<AgentKind>,
    pub room_type: RoomType,
    pub status: RoomStatus,
    pub subject: Option<String>,
    pub rating: Option<i64>,
    pub feedback: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Room {
    pub fn new_bot_room(customer_id: Uuid) -> Room {
        let now = Utc::now();
        Room {
            id: Uuid::new_v4(),
            customer_id,
            manager_id: None,
            agent_kind: None,
            room_type: RoomType::Bot,
            status: RoomStatus::Open,
            subject: None,
            rating: None,
            feedback: None,
            created_at: now,
            updated_at: now,
            closed_at: None,
        }
    }

    /// Sender type whose messages the customer is waiting on.
    pub fn responder_type(&self) -> SenderType {
        match (self.room_type, self.agent_kind) {
            (RoomType::Human, Some(kind)) => kind.into(),
            (RoomType::Human, None) => SenderType::Manager,
            (RoomType::Bot, _) => SenderType::Bot,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SenderType {
    Customer,
    Manager,
    Support,
    Bot,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    Product,
    QuickReply,
    File,
    System,
}

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: i64,
    pub room_id: Uuid,
    pub sender_id: Option<Uuid>,
    pub sender_type: SenderType,
    pub content: String,
    pub message_type: MessageType,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// A message that has not been stored yet.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub room_id: Uuid,
    pub sender_id: Option<Uuid>,
    pub sender_type: SenderType,
    pub content: String,
    pub message_type: MessageType,
}

impl NewMessage {
    pub fn bot(room_id: Uuid, content: impl Into<String>) -> NewMessage {
        NewMessage {
            room_id,
            sender_id: None,
            sender_type: SenderType::Bot,
            content: content.into(),
            message_type: MessageType::Text,
        }
    }

    pub fn system(room_id: Uuid, content: impl Into<String>) -> NewMessage {
        NewMessage {
            room_id,
            sender_id: None,
            sender_type: SenderType::System,
            content: content.into(),
            message_type: MessageType::System,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct FaqEntry {
    pub id: i64,
    pub keywords: String,
    pub question: String,
    pub answer: String,
    pub category: Option<String>,
    pub priority: i64,
    pub is_active: bool,
}

impl FaqEntry {
    /// Lower-cased, trimmed keyword tokens from the comma-delimited source.
    pub fn keyword_tokens(&self) -> impl Iterator<Item = String> + '_ {
        self.keywords
            .split(',')
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    Customer,
    Manager,
    Support,
}

impl UserRole {
    pub fn agent_kind(self) -> Option<AgentKind> {
        match self {
            UserRole::Customer => None,
            UserRole::Manager => Some(AgentKind::Manager),
            UserRole::Support => Some(AgentKind::Support),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub role: UserRole,
}

#[derive(Debug, Clone, FromRow)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub price: i64,
}

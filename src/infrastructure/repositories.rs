//! DB Repository abstractions

use crate::core::error::{ChatError, ChatResult};
use crate::infrastructure::database::DatabaseConnection;
use crate::infrastructure::entities::{
    AgentKind, FaqEntry, Message, NewMessage, Product, Room, RoomStatus, SenderType, User,
};
use crate::infrastructure::traits::{
    CatalogRepository, FaqRepository, MessageRepository, RoomRepository, UserDirectory,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use di::{Ref, injectable};
use log::error;
use uuid::Uuid;

fn storage_error(e: sqlx::Error) -> ChatError {
    error!("{e}");
    ChatError::from(e)
}

#[injectable(RoomRepository)]
pub struct DbRoomRepository {
    connection: Ref<DatabaseConnection>,
}

#[async_trait]
impl RoomRepository for DbRoomRepository {
    async fn find_room(&self, room_id: Uuid) -> ChatResult<Option<Room>> {
        sqlx::query_as("SELECT * FROM chat_rooms WHERE id = ?")
            .bind(room_id)
            .fetch_optional(&**self.connection)
            .await
            .map_err(storage_error)
    }

    async fn create_room(&self, room: Room) -> ChatResult<Room> {
        sqlx::query_as(
            "INSERT INTO chat_rooms (id, customer_id, manager_id, agent_kind, room_type, status, subject, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING *",
        )
        .bind(room.id)
        .bind(room.customer_id)
        .bind(room.manager_id)
        .bind(room.agent_kind)
        .bind(room.room_type)
        .bind(room.status)
        .bind(room.subject)
        .bind(room.created_at)
        .bind(room.updated_at)
        .fetch_one(&**self.connection)
        .await
        .map_err(storage_error)
    }

    async fn list_active_rooms(&self, customer_id: Uuid) -> ChatResult<Vec<Room>> {
        sqlx::query_as(
            "SELECT * FROM chat_rooms WHERE customer_id = ? AND status != 'CLOSED' ORDER BY created_at DESC",
        )
        .bind(customer_id)
        .fetch_all(&**self.connection)
        .await
        .map_err(storage_error)
    }

    async fn list_unclaimed_pending(&self) -> ChatResult<Vec<Room>> {
        sqlx::query_as(
            "SELECT * FROM chat_rooms WHERE status = 'PENDING' AND manager_id IS NULL ORDER BY created_at ASC",
        )
        .fetch_all(&**self.connection)
        .await
        .map_err(storage_error)
    }

    async fn count_unclaimed_pending(&self) -> ChatResult<i64> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM chat_rooms WHERE status = 'PENDING' AND manager_id IS NULL",
        )
        .fetch_one(&**self.connection)
        .await
        .map_err(storage_error)
    }

    async fn list_manager_rooms(&self, manager_id: Uuid) -> ChatResult<Vec<Room>> {
        sqlx::query_as(
            "SELECT * FROM chat_rooms WHERE manager_id = ? AND status IN ('PENDING', 'ASSIGNED') ORDER BY updated_at DESC",
        )
        .bind(manager_id)
        .fetch_all(&**self.connection)
        .await
        .map_err(storage_error)
    }

    async fn mark_pending(&self, room_id: Uuid, at: DateTime<Utc>) -> ChatResult<Option<Room>> {
        sqlx::query_as(
            "UPDATE chat_rooms SET status = 'PENDING', manager_id = NULL, updated_at = ? WHERE id = ? AND status = 'OPEN' RETURNING *",
        )
        .bind(at)
        .bind(room_id)
        .fetch_optional(&**self.connection)
        .await
        .map_err(storage_error)
    }

    async fn claim_pending(
        &self,
        room_id: Uuid,
        manager_id: Uuid,
        agent_kind: AgentKind,
        at: DateTime<Utc>,
    ) -> ChatResult<Option<Room>> {
        // The status guard in the WHERE clause is the claim; no prior read is trusted.
        sqlx::query_as(
            "UPDATE chat_rooms SET status = 'ASSIGNED', room_type = 'HUMAN', manager_id = ?, agent_kind = ?, updated_at = ? WHERE id = ? AND status = 'PENDING' RETURNING *",
        )
        .bind(manager_id)
        .bind(agent_kind)
        .bind(at)
        .bind(room_id)
        .fetch_optional(&**self.connection)
        .await
        .map_err(storage_error)
    }

    async fn close(
        &self,
        room_id: Uuid,
        expected: RoomStatus,
        rating: Option<i64>,
        feedback: Option<String>,
        at: DateTime<Utc>,
    ) -> ChatResult<Option<Room>> {
        // The status the caller was authorized against must still hold.
        sqlx::query_as(
            "UPDATE chat_rooms SET status = 'CLOSED', closed_at = ?, updated_at = ?, rating = COALESCE(?, rating), feedback = COALESCE(?, feedback) WHERE id = ? AND status = ? AND status != 'CLOSED' RETURNING *",
        )
        .bind(at)
        .bind(at)
        .bind(rating)
        .bind(feedback)
        .bind(room_id)
        .bind(expected)
        .fetch_optional(&**self.connection)
        .await
        .map_err(storage_error)
    }

    async fn touch(&self, room_id: Uuid, at: DateTime<Utc>) -> ChatResult<()> {
        sqlx::query("UPDATE chat_rooms SET updated_at = ? WHERE id = ?")
            .bind(at)
            .bind(room_id)
            .execute(&**self.connection)
            .await
            .map(|_| ())
            .map_err(storage_error)
    }
}

#[injectable(MessageRepository)]
pub struct DbMessageRepository {
    connection: Ref<DatabaseConnection>,
}

#[async_trait]
impl MessageRepository for DbMessageRepository {
    async fn create_message(&self, message: NewMessage) -> ChatResult<Message> {
        sqlx::query_as(
            "INSERT INTO chat_messages (room_id, sender_id, sender_type, content, message_type, is_read, created_at) VALUES (?, ?, ?, ?, ?, 0, ?) RETURNING *",
        )
        .bind(message.room_id)
        .bind(message.sender_id)
        .bind(message.sender_type)
        .bind(message.content)
        .bind(message.message_type)
        .bind(Utc::now())
        .fetch_one(&**self.connection)
        .await
        .map_err(storage_error)
    }

    async fn create_message_in_status(
        &self,
        message: NewMessage,
        status: RoomStatus,
    ) -> ChatResult<Option<Message>> {
        sqlx::query_as(
            "INSERT INTO chat_messages (room_id, sender_id, sender_type, content, message_type, is_read, created_at) SELECT ?, ?, ?, ?, ?, 0, ? WHERE EXISTS (SELECT 1 FROM chat_rooms WHERE id = ? AND status = ?) RETURNING *",
        )
        .bind(message.room_id)
        .bind(message.sender_id)
        .bind(message.sender_type)
        .bind(message.content)
        .bind(message.message_type)
        .bind(Utc::now())
        .bind(message.room_id)
        .bind(status)
        .fetch_optional(&**self.connection)
        .await
        .map_err(storage_error)
    }

    async fn list_recent(&self, room_id: Uuid, limit: i64, offset: i64) -> ChatResult<Vec<Message>> {
        sqlx::query_as(
            "SELECT * FROM chat_messages WHERE room_id = ? ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
        )
        .bind(room_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&**self.connection)
        .await
        .map_err(storage_error)
    }

    async fn last_message(&self, room_id: Uuid) -> ChatResult<Option<Message>> {
        sqlx::query_as(
            "SELECT * FROM chat_messages WHERE room_id = ? ORDER BY created_at DESC, id DESC LIMIT 1",
        )
        .bind(room_id)
        .fetch_optional(&**self.connection)
        .await
        .map_err(storage_error)
    }

    async fn mark_read(&self, room_id: Uuid, sender_type: SenderType) -> ChatResult<u64> {
        sqlx::query(
            "UPDATE chat_messages SET is_read = 1 WHERE room_id = ? AND sender_type = ? AND is_read = 0",
        )
        .bind(room_id)
        .bind(sender_type)
        .execute(&**self.connection)
        .await
        .map(|result| result.rows_affected())
        .map_err(storage_error)
    }

    async fn count_unread(&self, room_id: Uuid, sender_type: SenderType) -> ChatResult<i64> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM chat_messages WHERE room_id = ? AND sender_type = ? AND is_read = 0",
        )
        .bind(room_id)
        .bind(sender_type)
        .fetch_one(&**self.connection)
        .await
        .map_err(storage_error)
    }
}

#[injectable(FaqRepository)]
pub struct DbFaqRepository {
    connection: Ref<DatabaseConnection>,
}

#[async_trait]
impl FaqRepository for DbFaqRepository {
    async fn list_active(&self) -> ChatResult<Vec<FaqEntry>> {
        sqlx::query_as("SELECT * FROM faq_entries WHERE is_active = 1 ORDER BY priority DESC, id ASC")
            .fetch_all(&**self.connection)
            .await
            .map_err(storage_error)
    }
}

#[injectable(UserDirectory)]
pub struct DbUserDirectory {
    connection: Ref<DatabaseConnection>,
}

#[async_trait]
impl UserDirectory for DbUserDirectory {
    async fn find_user(&self, user_id: Uuid) -> ChatResult<Option<User>> {
        sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&**self.connection)
            .await
            .map_err(storage_error)
    }
}

#[injectable(CatalogRepository)]
pub struct DbCatalogRepository {
    connection: Ref<DatabaseConnection>,
}

#[async_trait]
impl CatalogRepository for DbCatalogRepository {
    async fn list_products(&self) -> ChatResult<Vec<Product>> {
        sqlx::query_as("SELECT * FROM products ORDER BY id ASC")
            .fetch_all(&**self.connection)
            .await
            .map_err(storage_error)
    }

    async fn list_category_names(&self) -> ChatResult<Vec<String>> {
        sqlx::query_scalar("SELECT name FROM categories ORDER BY name ASC")
            .fetch_all(&**self.connection)
            .await
            .map_err(storage_error)
    }

    async fn list_brand_names(&self) -> ChatResult<Vec<String>> {
        sqlx::query_scalar("SELECT name FROM brands ORDER BY name ASC")
            .fetch_all(&**self.connection)
            .await
            .map_err(storage_error)
    }
}

//! Room lifecycle and message services.
//!
//! Every write is followed by a broadcast on the matching hub destination. Status changes go
//! through status-guarded updates in the repository, never a read followed by a write.

use crate::core::auth::Principal;
use crate::core::error::{ChatError, ChatResult};
use crate::core::hub::{Broadcaster, destinations};
use crate::core::traits::{BotEngine, MessageService, RoomService, RoomSummary};
use crate::infrastructure::entities::{
    AgentKind, Message, MessageType, NewMessage, Room, RoomStatus, RoomType, SenderType, User,
};
use crate::infrastructure::traits::{MessageRepository, RoomRepository, UserDirectory};
use async_trait::async_trait;
use chrono::Utc;
use di::{Ref, injectable};
use log::{debug, info, warn};
use serde_json::json;
use uuid::Uuid;

const MAX_CONTENT_CHARS: usize = 4000;
const MAX_PAGE_SIZE: i64 = 100;

const WELCOME_MESSAGE: &str = "Xin chào! Mình là trợ lý ảo của cửa hàng. Mình có thể giúp bạn tư vấn sản phẩm, kiểm tra đơn hàng, phí vận chuyển và chính sách đổi trả. Gõ \"nhân viên\" bất cứ lúc nào để được hỗ trợ trực tiếp.";
const HUMAN_REQUESTED_MESSAGE: &str = "Yêu cầu gặp nhân viên đã được ghi nhận. Vui lòng chờ trong giây lát.";
const ROOM_CLOSED_MESSAGE: &str = "Cuộc trò chuyện đã kết thúc. Cảm ơn bạn đã liên hệ!";

fn validate_content(content: &str) -> ChatResult<String> {
    let content = content.trim();
    if content.is_empty() {
        return Err(ChatError::InvalidInput("message content is empty".to_owned()));
    }
    if content.chars().count() > MAX_CONTENT_CHARS {
        return Err(ChatError::InvalidInput(format!(
            "message content exceeds {MAX_CONTENT_CHARS} characters"
        )));
    }
    Ok(content.to_owned())
}

fn closed_room() -> ChatError {
    ChatError::InvalidState("room is closed".to_owned())
}

/// Stores a message, bumps the room's `updated_at` and pushes the message to the room topic.
async fn post_message(
    messages: &dyn MessageRepository,
    rooms: &dyn RoomRepository,
    hub: &dyn Broadcaster,
    message: NewMessage,
) -> ChatResult<Message> {
    let message = messages.create_message(message).await?;
    rooms.touch(message.room_id, message.created_at).await?;
    hub.publish(&destinations::room(message.room_id), json!(message));
    Ok(message)
}

/// Pushes the room's new state, with the SYSTEM message that announced it when there is one.
fn publish_status(hub: &dyn Broadcaster, room: &Room, announcement: Option<&Message>) {
    hub.publish(
        &destinations::room_status(room.id),
        json!({
            "roomId": room.id,
            "status": room.status,
            "roomType": room.room_type,
            "managerId": room.manager_id,
            "agentKind": room.agent_kind,
            "message": announcement,
        }),
    );
}

async fn publish_pending_changed(rooms: &dyn RoomRepository, hub: &dyn Broadcaster, room_id: Uuid) {
    let count = match rooms.count_unclaimed_pending().await {
        Ok(count) => count,
        Err(e) => {
            warn!("could not count pending rooms: {e}");
            return;
        }
    };
    hub.publish(
        destinations::PENDING,
        json!({ "type": "PENDING_ROOMS_CHANGED", "roomId": room_id, "pendingCount": count }),
    );
}

#[injectable(RoomService)]
pub struct MyRoomService {
    rooms: Ref<dyn RoomRepository>,
    messages: Ref<dyn MessageRepository>,
    users: Ref<dyn UserDirectory>,
    hub: Ref<dyn Broadcaster>,
}

impl MyRoomService {
    async fn require_room(&self, room_id: Uuid) -> ChatResult<Room> {
        self.rooms
            .find_room(room_id)
            .await?
            .ok_or_else(ChatError::room_not_found)
    }

    async fn profile(&self, user_id: Option<Uuid>) -> Option<User> {
        let user_id = user_id?;
        match self.users.find_user(user_id).await {
            Ok(user) => user,
            Err(e) => {
                warn!("user directory lookup failed: {e}");
                None
            }
        }
    }

    /// Status-guarded updates return `None` when the guard failed; tell "gone" from "wrong state".
    async fn explain_rejected_transition(&self, room_id: Uuid, attempted: &str) -> ChatError {
        match self.rooms.find_room(room_id).await {
            Ok(Some(room)) => ChatError::InvalidState(format!(
                "cannot {attempted} a room in status {:?}",
                room.status
            )),
            Ok(None) => ChatError::room_not_found(),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl RoomService for MyRoomService {
    async fn get_or_create_room(&self, customer_id: Uuid) -> ChatResult<Room> {
        if let Some(room) = self.rooms.list_active_rooms(customer_id).await?.into_iter().next() {
            return Ok(room);
        }

        let room = self.rooms.create_room(Room::new_bot_room(customer_id)).await?;
        info!("created bot room {} for customer {customer_id}", room.id);

        post_message(
            &*self.messages,
            &*self.rooms,
            &*self.hub,
            NewMessage::bot(room.id, WELCOME_MESSAGE),
        )
        .await?;

        Ok(room)
    }

    async fn authorize_view(&self, room_id: Uuid, viewer: &Principal) -> ChatResult<Room> {
        let room = self.require_room(room_id).await?;
        if room.customer_id == viewer.user_id || viewer.is_agent() {
            Ok(room)
        } else {
            Err(ChatError::PermissionDenied("not a participant of this room".to_owned()))
        }
    }

    async fn room_summary(&self, room_id: Uuid, viewer: &Principal) -> ChatResult<RoomSummary> {
        let room = self.authorize_view(room_id, viewer).await?;

        let unread_from = if room.customer_id == viewer.user_id {
            room.responder_type()
        } else {
            SenderType::Customer
        };
        let unread_count = self.messages.count_unread(room.id, unread_from).await?;
        let last_message = self.messages.last_message(room.id).await?;

        let customer = self.profile(Some(room.customer_id)).await;
        let manager = self.profile(room.manager_id).await;

        Ok(RoomSummary {
            customer_name: customer.as_ref().map(|u| u.display_name.clone()),
            customer_avatar: customer.and_then(|u| u.avatar_url),
            manager_name: manager.as_ref().map(|u| u.display_name.clone()),
            manager_avatar: manager.and_then(|u| u.avatar_url),
            last_message,
            unread_count,
            room,
        })
    }

    async fn list_active_rooms(&self, customer_id: Uuid) -> ChatResult<Vec<Room>> {
        self.rooms.list_active_rooms(customer_id).await
    }

    async fn list_pending_rooms(&self) -> ChatResult<Vec<Room>> {
        self.rooms.list_unclaimed_pending().await
    }

    async fn list_manager_rooms(&self, manager_id: Uuid) -> ChatResult<Vec<Room>> {
        self.rooms.list_manager_rooms(manager_id).await
    }

    async fn count_pending_rooms(&self) -> ChatResult<i64> {
        self.rooms.count_unclaimed_pending().await
    }

    async fn escalate(&self, room_id: Uuid) -> ChatResult<Room> {
        let Some(room) = self.rooms.mark_pending(room_id, Utc::now()).await? else {
            return Err(self.explain_rejected_transition(room_id, "escalate").await);
        };
        info!("room {room_id} is waiting for an agent");

        publish_status(&*self.hub, &room, None);
        publish_pending_changed(&*self.rooms, &*self.hub, room_id).await;
        Ok(room)
    }

    async fn request_human(&self, customer_id: Uuid, room_id: Uuid) -> ChatResult<Room> {
        let room = self.require_room(room_id).await?;
        if room.customer_id != customer_id {
            return Err(ChatError::PermissionDenied("not your room".to_owned()));
        }

        let room = self.escalate(room_id).await?;
        post_message(
            &*self.messages,
            &*self.rooms,
            &*self.hub,
            NewMessage::system(room_id, HUMAN_REQUESTED_MESSAGE),
        )
        .await?;
        Ok(room)
    }

    async fn accept_room(&self, room_id: Uuid, agent: &Principal) -> ChatResult<Room> {
        let Some(kind) = agent.agent_kind() else {
            return Err(ChatError::PermissionDenied("only agents can accept rooms".to_owned()));
        };

        let Some(room) = self
            .rooms
            .claim_pending(room_id, agent.user_id, kind, Utc::now())
            .await?
        else {
            return Err(self.explain_rejected_transition(room_id, "accept").await);
        };
        info!("room {room_id} claimed by {:?} {}", kind, agent.user_id);

        let announcement = post_message(
            &*self.messages,
            &*self.rooms,
            &*self.hub,
            NewMessage::system(
                room_id,
                format!(
                    "Nhân viên {} đã tham gia cuộc trò chuyện và sẽ hỗ trợ bạn.",
                    agent.display_name
                ),
            ),
        )
        .await?;

        publish_status(&*self.hub, &room, Some(&announcement));
        self.hub.publish(
            destinations::PENDING_ACCEPTED,
            json!({ "roomId": room_id, "managerId": agent.user_id, "agentKind": kind }),
        );
        publish_pending_changed(&*self.rooms, &*self.hub, room_id).await;
        self.hub.send_to_user(
            agent.user_id,
            destinations::NOTIFICATIONS,
            json!({ "type": "ROOM_ACCEPTED", "room": room }),
        );

        Ok(room)
    }

    async fn close_room(
        &self,
        room_id: Uuid,
        actor: &Principal,
        rating: Option<i64>,
        feedback: Option<String>,
    ) -> ChatResult<Room> {
        if let Some(rating) = rating {
            if !(1..=5).contains(&rating) {
                return Err(ChatError::InvalidInput("rating must be between 1 and 5".to_owned()));
            }
        }

        let feedback = feedback.map(|f| f.trim().to_owned()).filter(|f| !f.is_empty());

        // A miss means the room moved on between the read and the write. Statuses only move
        // forward, so re-checking against the fresh row terminates.
        let (closed_from, closed) = loop {
            let room = self.require_room(room_id).await?;
            if !room.status.can_transition_to(RoomStatus::Closed) {
                return Err(closed_room());
            }
            let is_customer = room.customer_id == actor.user_id;
            let is_owner =
                room.manager_id == Some(actor.user_id) && room.status == RoomStatus::Assigned;
            let is_agent_on_unclaimed = actor.is_agent() && room.status == RoomStatus::Pending;
            if !(is_customer || is_owner || is_agent_on_unclaimed) {
                return Err(ChatError::PermissionDenied("not a participant of this room".to_owned()));
            }

            if let Some(closed) = self
                .rooms
                .close(room_id, room.status, rating, feedback.clone(), Utc::now())
                .await?
            {
                break (room.status, closed);
            }
            debug!("room {room_id} changed while closing, re-checking");
        };
        info!("room {room_id} closed by {}", actor.user_id);

        let announcement = post_message(
            &*self.messages,
            &*self.rooms,
            &*self.hub,
            NewMessage::system(room_id, ROOM_CLOSED_MESSAGE),
        )
        .await?;
        publish_status(&*self.hub, &closed, Some(&announcement));
        if closed_from == RoomStatus::Pending {
            publish_pending_changed(&*self.rooms, &*self.hub, room_id).await;
        }

        Ok(closed)
    }
}

#[injectable(MessageService)]
pub struct MyMessageService {
    rooms: Ref<dyn RoomRepository>,
    messages: Ref<dyn MessageRepository>,
    room_service: Ref<dyn RoomService>,
    bot: Ref<dyn BotEngine>,
    hub: Ref<dyn Broadcaster>,
}

impl MyMessageService {
    async fn require_room(&self, room_id: Uuid) -> ChatResult<Room> {
        self.rooms
            .find_room(room_id)
            .await?
            .ok_or_else(ChatError::room_not_found)
    }

    /// Runs the bot on a customer turn, stores and pushes its reply, and applies escalation.
    ///
    /// The reply is only stored while the room is still open to the bot; a room closed or
    /// escalated during generation gets nothing.
    async fn run_bot(&self, room: &Room, content: &str) -> ChatResult<()> {
        let response = self.bot.respond(content).await;

        let Some(reply) = self
            .messages
            .create_message_in_status(
                NewMessage::bot(room.id, response.message.clone()),
                RoomStatus::Open,
            )
            .await?
        else {
            debug!("room {} left bot handling before the reply was ready", room.id);
            return Ok(());
        };
        self.rooms.touch(room.id, reply.created_at).await?;
        self.hub.publish(
            &destinations::room(room.id),
            json!({
                "id": reply.id,
                "roomId": reply.room_id,
                "senderId": reply.sender_id,
                "senderType": reply.sender_type,
                "content": reply.content,
                "messageType": reply.message_type,
                "isRead": reply.is_read,
                "createdAt": reply.created_at,
                "quickReplies": response.quick_replies,
            }),
        );

        if response.transfer_to_human {
            match self.room_service.escalate(room.id).await {
                Ok(_) => {}
                // Someone else moved the room on (closed it, or it was escalated already).
                Err(ChatError::InvalidState(reason)) => {
                    warn!("escalation of room {} skipped: {reason}", room.id)
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl MessageService for MyMessageService {
    async fn send_customer_message(
        &self,
        customer_id: Uuid,
        room_id: Uuid,
        content: String,
        message_type: MessageType,
    ) -> ChatResult<Message> {
        let content = validate_content(&content)?;
        let room = self.require_room(room_id).await?;
        if room.customer_id != customer_id {
            return Err(ChatError::PermissionDenied("not your room".to_owned()));
        }
        if room.status.is_terminal() {
            return Err(closed_room());
        }

        let message = post_message(
            &*self.messages,
            &*self.rooms,
            &*self.hub,
            NewMessage {
                room_id,
                sender_id: Some(customer_id),
                sender_type: SenderType::Customer,
                content: content.clone(),
                message_type,
            },
        )
        .await?;

        if room.room_type == RoomType::Bot && room.status == RoomStatus::Open {
            self.run_bot(&room, &content).await?;
        }

        Ok(message)
    }

    async fn send_agent_message(
        &self,
        agent_id: Uuid,
        kind: AgentKind,
        room_id: Uuid,
        content: String,
        message_type: MessageType,
    ) -> ChatResult<Message> {
        let content = validate_content(&content)?;
        let room = self.require_room(room_id).await?;
        if room.manager_id != Some(agent_id) || room.agent_kind != Some(kind) {
            return Err(ChatError::PermissionDenied("room is handled by another agent".to_owned()));
        }
        if room.status != RoomStatus::Assigned {
            return Err(ChatError::InvalidState(format!(
                "cannot post to a room in status {:?}",
                room.status
            )));
        }

        post_message(
            &*self.messages,
            &*self.rooms,
            &*self.hub,
            NewMessage {
                room_id,
                sender_id: Some(agent_id),
                sender_type: kind.into(),
                content,
                message_type,
            },
        )
        .await
    }

    async fn send_as(
        &self,
        sender: &Principal,
        room_id: Uuid,
        content: String,
        message_type: MessageType,
    ) -> ChatResult<Message> {
        let room = self.require_room(room_id).await?;
        if room.customer_id == sender.user_id {
            return self
                .send_customer_message(sender.user_id, room_id, content, message_type)
                .await;
        }

        match sender.agent_kind() {
            Some(kind) => {
                self.send_agent_message(sender.user_id, kind, room_id, content, message_type)
                    .await
            }
            None => Err(ChatError::PermissionDenied("not a participant of this room".to_owned())),
        }
    }

    async fn get_messages(&self, room_id: Uuid, page: i64, size: i64) -> ChatResult<Vec<Message>> {
        if page < 0 {
            return Err(ChatError::InvalidInput("page must not be negative".to_owned()));
        }
        if !(1..=MAX_PAGE_SIZE).contains(&size) {
            return Err(ChatError::InvalidInput(format!(
                "size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }

        let offset = page
            .checked_mul(size)
            .ok_or_else(|| ChatError::InvalidInput("page is out of range".to_owned()))?;

        let mut messages = self.messages.list_recent(room_id, size, offset).await?;
        messages.reverse();
        Ok(messages)
    }

    async fn mark_messages_as_read(&self, room_id: Uuid, sender_type: SenderType) -> ChatResult<u64> {
        self.messages.mark_read(room_id, sender_type).await
    }

    async fn count_unread(&self, room_id: Uuid, sender_type: SenderType) -> ChatResult<i64> {
        self.messages.count_unread(room_id, sender_type).await
    }

    async fn mark_read_by(&self, viewer: &Principal, room_id: Uuid) -> ChatResult<u64> {
        let room = self.room_service.authorize_view(room_id, viewer).await?;

        let from = if room.customer_id == viewer.user_id {
            room.responder_type()
        } else {
            SenderType::Customer
        };
        let updated = self.mark_messages_as_read(room_id, from).await?;

        if updated > 0 {
            self.hub.publish(
                &destinations::room_read(room_id),
                json!({ "roomId": room_id, "readerId": viewer.user_id, "senderType": from }),
            );
        }
        Ok(updated)
    }

    async fn notify_typing(&self, sender: &Principal, room_id: Uuid, typing: bool) -> ChatResult<()> {
        let room = self.room_service.authorize_view(room_id, sender).await?;
        if room.status.is_terminal() {
            return Err(closed_room());
        }

        let sender_type = if room.customer_id == sender.user_id {
            SenderType::Customer
        } else {
            sender.agent_kind().map(SenderType::from).unwrap_or(SenderType::Manager)
        };
        self.hub.publish(
            &destinations::room_typing(room_id),
            json!({
                "roomId": room_id,
                "userId": sender.user_id,
                "senderType": sender_type,
                "typing": typing,
            }),
        );
        Ok(())
    }
}

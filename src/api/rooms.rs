//! Customer and participant room endpoints

use crate::api::ExtractToken;
use crate::api::rooms::schemas::{
    CloseRoom, CreateMessage, HistoryQuery, MessagesList, ReadReceipt, RoomList,
};
use crate::core::error::{ChatError, ChatResult};
use crate::core::traits::{Authenticator, MessageService, RoomService, RoomSummary};
use crate::infrastructure::entities::{self, UserRole};
use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use di_axum::Inject;
use uuid::Uuid;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_my_rooms).post(init_room))
        .route("/:id", get(room_info))
        .route("/:id/messages", get(room_messages).post(post_message))
        .route("/:id/close", post(close_room))
        .route("/:id/read", post(mark_read))
        .route("/:id/request-human", post(request_human))
}

async fn init_room(
    Inject(auth): Inject<dyn Authenticator>,
    Inject(room_service): Inject<dyn RoomService>,
    ExtractToken(token): ExtractToken,
) -> ChatResult<(StatusCode, Json<RoomSummary>)> {
    let caller = auth.authenticate(&token).await?;
    if caller.role != UserRole::Customer {
        return Err(ChatError::PermissionDenied("only customers open support rooms".to_owned()));
    }

    let room = room_service.get_or_create_room(caller.user_id).await?;
    let summary = room_service.room_summary(room.id, &caller).await?;
    Ok((StatusCode::OK, Json(summary)))
}

async fn list_my_rooms(
    Inject(auth): Inject<dyn Authenticator>,
    Inject(room_service): Inject<dyn RoomService>,
    ExtractToken(token): ExtractToken,
) -> ChatResult<Json<RoomList>> {
    let caller = auth.authenticate(&token).await?;

    let mut rooms = Vec::new();
    for room in room_service.list_active_rooms(caller.user_id).await? {
        rooms.push(room_service.room_summary(room.id, &caller).await?);
    }
    Ok(Json(RoomList { rooms }))
}

async fn room_info(
    Inject(auth): Inject<dyn Authenticator>,
    Inject(room_service): Inject<dyn RoomService>,
    ExtractToken(token): ExtractToken,
    Path(room_id): Path<Uuid>,
) -> ChatResult<Json<RoomSummary>> {
    let caller = auth.authenticate(&token).await?;
    Ok(Json(room_service.room_summary(room_id, &caller).await?))
}

async fn room_messages(
    Inject(auth): Inject<dyn Authenticator>,
    Inject(room_service): Inject<dyn RoomService>,
    Inject(message_service): Inject<dyn MessageService>,
    ExtractToken(token): ExtractToken,
    Path(room_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> ChatResult<Json<MessagesList>> {
    let caller = auth.authenticate(&token).await?;
    room_service.authorize_view(room_id, &caller).await?;

    let messages = message_service
        .get_messages(room_id, query.page, query.size)
        .await?;
    Ok(Json(MessagesList { messages }))
}

async fn post_message(
    Inject(auth): Inject<dyn Authenticator>,
    Inject(message_service): Inject<dyn MessageService>,
    ExtractToken(token): ExtractToken,
    Path(room_id): Path<Uuid>,
    Json(message): Json<CreateMessage>,
) -> ChatResult<(StatusCode, Json<entities::Message>)> {
    let caller = auth.authenticate(&token).await?;
    let message = message_service
        .send_as(&caller, room_id, message.content, message.message_type)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn close_room(
    Inject(auth): Inject<dyn Authenticator>,
    Inject(room_service): Inject<dyn RoomService>,
    ExtractToken(token): ExtractToken,
    Path(room_id): Path<Uuid>,
    close: Option<Json<CloseRoom>>,
) -> ChatResult<Json<entities::Room>> {
    let caller = auth.authenticate(&token).await?;
    let close = close.map(|Json(close)| close).unwrap_or_default();
    let room = room_service
        .close_room(room_id, &caller, close.rating, close.feedback)
        .await?;
    Ok(Json(room))
}

async fn mark_read(
    Inject(auth): Inject<dyn Authenticator>,
    Inject(message_service): Inject<dyn MessageService>,
    ExtractToken(token): ExtractToken,
    Path(room_id): Path<Uuid>,
) -> ChatResult<Json<ReadReceipt>> {
    let caller = auth.authenticate(&token).await?;
    let updated = message_service.mark_read_by(&caller, room_id).await?;
    Ok(Json(ReadReceipt { room_id, updated }))
}

async fn request_human(
    Inject(auth): Inject<dyn Authenticator>,
    Inject(room_service): Inject<dyn RoomService>,
    ExtractToken(token): ExtractToken,
    Path(room_id): Path<Uuid>,
) -> ChatResult<Json<entities::Room>> {
    let caller = auth.authenticate(&token).await?;
    Ok(Json(room_service.request_human(caller.user_id, room_id).await?))
}

pub mod schemas {
    use crate::core::traits::RoomSummary;
    use crate::infrastructure::entities;
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    fn default_page_size() -> i64 {
        50
    }

    #[derive(Deserialize, Debug)]
    pub struct HistoryQuery {
        #[serde(default)]
        pub page: i64,
        #[serde(default = "default_page_size")]
        pub size: i64,
    }

    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub struct CreateMessage {
        pub content: String,
        #[serde(default)]
        pub message_type: entities::MessageType,
    }

    #[derive(Deserialize, Debug, Default)]
    pub struct CloseRoom {
        pub rating: Option<i64>,
        pub feedback: Option<String>,
    }

    #[derive(Serialize, Debug)]
    pub struct RoomList {
        pub rooms: Vec<RoomSummary>,
    }

    #[derive(Serialize, Debug)]
    pub struct MessagesList {
        pub messages: Vec<entities::Message>,
    }

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub struct ReadReceipt {
        pub room_id: Uuid,
        pub updated: u64,
    }
}

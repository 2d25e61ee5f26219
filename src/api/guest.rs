//! Unauthenticated guest chat endpoints

use crate::core::error::ChatResult;
use crate::core::traits::{BotStatus, GuestChatService, GuestReply, GuestWelcome};
use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use di_axum::Inject;
use serde::{Deserialize, Serialize};

pub fn router() -> Router {
    Router::new()
        .route("/init", post(init_guest_chat))
        .route("/:session_id/messages", post(send_guest_message))
        .route("/quick-replies", get(quick_replies))
        .route("/status", get(bot_status))
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct InitGuestChat {
    pub guest_name: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct GuestMessage {
    pub content: String,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct QuickReplies {
    pub quick_replies: Vec<String>,
}

async fn init_guest_chat(
    Inject(guest_chat): Inject<dyn GuestChatService>,
    init: Option<Json<InitGuestChat>>,
) -> (StatusCode, Json<GuestWelcome>) {
    let init = init.map(|Json(init)| init).unwrap_or_default();
    let welcome = guest_chat.init_guest_chat(init.guest_name).await;
    (StatusCode::CREATED, Json(welcome))
}

async fn send_guest_message(
    Inject(guest_chat): Inject<dyn GuestChatService>,
    Path(session_id): Path<String>,
    Json(message): Json<GuestMessage>,
) -> ChatResult<Json<GuestReply>> {
    let reply = guest_chat
        .send_guest_message(&session_id, message.content)
        .await?;
    Ok(Json(reply))
}

async fn quick_replies(Inject(guest_chat): Inject<dyn GuestChatService>) -> Json<QuickReplies> {
    Json(QuickReplies {
        quick_replies: guest_chat.quick_replies(),
    })
}

async fn bot_status(Inject(guest_chat): Inject<dyn GuestChatService>) -> Json<BotStatus> {
    Json(guest_chat.bot_status())
}

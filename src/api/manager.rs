//! Agent dashboard endpoints

use crate::api::ExtractToken;
use crate::core::auth::Principal;
use crate::core::error::{ChatError, ChatResult};
use crate::core::traits::{Authenticator, RoomService};
use crate::infrastructure::entities;
use axum::extract::Path;
use axum::routing::{get, post};
use axum::{Json, Router};
use di_axum::Inject;
use serde::Serialize;
use uuid::Uuid;

pub fn router() -> Router {
    Router::new()
        .route("/pending", get(pending_rooms))
        .route("/pending/count", get(pending_count))
        .route("/mine", get(my_rooms))
        .route("/:id/accept", post(accept_room))
}

#[derive(Serialize, Debug)]
pub struct RoomList {
    pub rooms: Vec<entities::Room>,
}

#[derive(Serialize, Debug)]
pub struct PendingCount {
    pub count: i64,
}

async fn agent(auth: &dyn Authenticator, token: &str) -> ChatResult<Principal> {
    let caller = auth.authenticate(token).await?;
    if !caller.is_agent() {
        return Err(ChatError::PermissionDenied("manager or support role required".to_owned()));
    }
    Ok(caller)
}

async fn pending_rooms(
    Inject(auth): Inject<dyn Authenticator>,
    Inject(room_service): Inject<dyn RoomService>,
    ExtractToken(token): ExtractToken,
) -> ChatResult<Json<RoomList>> {
    agent(&*auth, &token).await?;
    let rooms = room_service.list_pending_rooms().await?;
    Ok(Json(RoomList { rooms }))
}

async fn pending_count(
    Inject(auth): Inject<dyn Authenticator>,
    Inject(room_service): Inject<dyn RoomService>,
    ExtractToken(token): ExtractToken,
) -> ChatResult<Json<PendingCount>> {
    agent(&*auth, &token).await?;
    let count = room_service.count_pending_rooms().await?;
    Ok(Json(PendingCount { count }))
}

async fn my_rooms(
    Inject(auth): Inject<dyn Authenticator>,
    Inject(room_service): Inject<dyn RoomService>,
    ExtractToken(token): ExtractToken,
) -> ChatResult<Json<RoomList>> {
    let caller = agent(&*auth, &token).await?;
    let rooms = room_service.list_manager_rooms(caller.user_id).await?;
    Ok(Json(RoomList { rooms }))
}

async fn accept_room(
    Inject(auth): Inject<dyn Authenticator>,
    Inject(room_service): Inject<dyn RoomService>,
    ExtractToken(token): ExtractToken,
    Path(room_id): Path<Uuid>,
) -> ChatResult<Json<entities::Room>> {
    let caller = agent(&*auth, &token).await?;
    Ok(Json(room_service.accept_room(room_id, &caller).await?))
}

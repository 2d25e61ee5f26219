//! WebSocket transport.
//!
//! The handshake runs before the upgrade: `?token=`, then `Authorization: Bearer`, then
//! `?sessionId=` for guests. The resolved identity is bound to the connection and trusted for
//! every later frame.
//!
//! Client -> Server:
//! ```json
//! {"type": "SUBSCRIBE", "destination": "topic.room.<id>"}
//! {"type": "UNSUBSCRIBE", "destination": "topic.room.<id>"}
//! {"type": "SEND", "destination": "room.send.<id>", "body": {"content": "..."}}
//! ```
//!
//! Server -> Client: `{"destination": "...", "payload": {...}}`. Failures of a frame are
//! reported on `queue.errors` of the offending connection only.

use crate::core::auth::{Identity, Principal};
use crate::core::error::{ChatError, ChatResult};
use crate::core::hub::{Broadcaster, ConnectionId, destinations};
use crate::core::traits::{Authenticator, MessageService, RoomService};
use crate::infrastructure::entities::MessageType;
use axum::extract::Query;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::{HeaderMap, header};
use axum::response::{IntoResponse, Response};
use di::Ref;
use di_axum::Inject;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeQuery {
    pub token: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Deserialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InboundFrame {
    Subscribe {
        destination: String,
    },
    Unsubscribe {
        destination: String,
    },
    Send {
        destination: String,
        #[serde(default)]
        body: Value,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomAction {
    Send,
    Typing,
    Accept,
    Close,
    Read,
}

/// Splits an inbound `room.<action>.<room id>` destination.
pub fn parse_route(destination: &str) -> Option<(RoomAction, Uuid)> {
    let (action, room_id) = destination.strip_prefix("room.")?.split_once('.')?;
    let action = match action {
        "send" => RoomAction::Send,
        "typing" => RoomAction::Typing,
        "accept" => RoomAction::Accept,
        "close" => RoomAction::Close,
        "read" => RoomAction::Read,
        _ => return None,
    };
    Some((action, Uuid::parse_str(room_id).ok()?))
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct SendBody {
    content: String,
    #[serde(default)]
    message_type: MessageType,
}

#[derive(Deserialize, Debug)]
struct TypingBody {
    #[serde(default = "default_typing")]
    typing: bool,
}

fn default_typing() -> bool {
    true
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct CloseBody {
    rating: Option<i64>,
    feedback: Option<String>,
}

fn parse_body<T: for<'de> Deserialize<'de>>(body: Value) -> ChatResult<T> {
    serde_json::from_value(body).map_err(|e| ChatError::InvalidInput(format!("bad frame body: {e}")))
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|token| token.trim().to_owned())
        .filter(|token| !token.is_empty())
}

pub async fn ws_handler(
    Inject(auth): Inject<dyn Authenticator>,
    Inject(room_service): Inject<dyn RoomService>,
    Inject(message_service): Inject<dyn MessageService>,
    Inject(hub): Inject<dyn Broadcaster>,
    Query(query): Query<HandshakeQuery>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let token = query.token.or_else(|| bearer(&headers));
    let identity = match auth
        .handshake(token.as_deref(), query.session_id.as_deref())
        .await
    {
        Ok(identity) => identity,
        Err(e) => {
            debug!("websocket handshake refused: {e}");
            return e.into_response();
        }
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    ws.on_upgrade(move |socket| async move {
        let (session, outbox) = RealtimeSession::open(identity, room_service, message_service, hub);
        session.run(socket, outbox).await;
    })
}

/// One authenticated connection registered with the hub. Dropping it unregisters it.
pub struct RealtimeSession {
    identity: Identity,
    connection: ConnectionId,
    rooms: Ref<dyn RoomService>,
    messages: Ref<dyn MessageService>,
    hub: Ref<dyn Broadcaster>,
}

impl RealtimeSession {
    pub fn open(
        identity: Identity,
        rooms: Ref<dyn RoomService>,
        messages: Ref<dyn MessageService>,
        hub: Ref<dyn Broadcaster>,
    ) -> (RealtimeSession, mpsc::UnboundedReceiver<String>) {
        let (connection, outbox) = hub.connect(identity.user_id());
        info!("realtime connection {connection} opened for {identity:?}");
        (
            RealtimeSession {
                identity,
                connection,
                rooms,
                messages,
                hub,
            },
            outbox,
        )
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    async fn run(self, socket: WebSocket, mut outbox: mpsc::UnboundedReceiver<String>) {
        let (mut sink, mut stream) = socket.split();

        let writer = tokio::spawn(async move {
            while let Some(frame) = outbox.recv().await {
                if sink.send(Message::Text(frame)).await.is_err() {
                    break;
                }
            }
        });

        while let Some(Ok(message)) = stream.next().await {
            match message {
                Message::Text(text) => self.handle_text(&text).await,
                Message::Close(_) => break,
                _ => {}
            }
        }

        writer.abort();
        info!("realtime connection {} closed", self.connection);
    }

    /// Processes one inbound text frame. Errors go to this connection's error queue.
    pub async fn handle_text(&self, text: &str) {
        let frame = match serde_json::from_str::<InboundFrame>(text) {
            Ok(frame) => frame,
            Err(e) => {
                self.report(None, ChatError::InvalidInput(format!("malformed frame: {e}")));
                return;
            }
        };

        let (destination, result) = match frame {
            InboundFrame::Subscribe { destination } => {
                let result = self.subscribe(&destination).await;
                (destination, result)
            }
            InboundFrame::Unsubscribe { destination } => {
                self.hub.unsubscribe(self.connection, &destination);
                (destination, Ok(()))
            }
            InboundFrame::Send { destination, body } => {
                let result = self.dispatch(&destination, body).await;
                (destination, result)
            }
        };

        if let Err(e) = result {
            self.report(Some(&destination), e);
        }
    }

    fn report(&self, destination: Option<&str>, error: ChatError) {
        debug!("frame on connection {} failed: {error}", self.connection);
        self.hub.send_to_connection(
            self.connection,
            destinations::ERRORS,
            json!({
                "error": error.public_message(),
                "status": error.status_code().as_u16(),
                "destination": destination,
            }),
        );
    }

    fn principal(&self) -> ChatResult<&Principal> {
        match &self.identity {
            Identity::User(principal) => Ok(principal),
            Identity::Guest { .. } => Err(ChatError::Unauthorized(
                "guest connections cannot use this destination".to_owned(),
            )),
        }
    }

    async fn subscribe(&self, destination: &str) -> ChatResult<()> {
        if destination == destinations::ERRORS {
            self.hub.subscribe(self.connection, destination);
            return Ok(());
        }

        let principal = self.principal()?;
        match destination {
            destinations::PENDING | destinations::PENDING_ACCEPTED => {
                if !principal.is_agent() {
                    return Err(ChatError::PermissionDenied(
                        "manager or support role required".to_owned(),
                    ));
                }
            }
            destinations::NOTIFICATIONS => {}
            other => {
                let room_id = destinations::room_of(other).ok_or_else(|| {
                    ChatError::InvalidInput(format!("unknown destination {other}"))
                })?;
                self.rooms.authorize_view(room_id, principal).await?;
            }
        }

        self.hub.subscribe(self.connection, destination);
        Ok(())
    }

    async fn dispatch(&self, destination: &str, body: Value) -> ChatResult<()> {
        let (action, room_id) = parse_route(destination)
            .ok_or_else(|| ChatError::InvalidInput(format!("unknown destination {destination}")))?;
        let principal = self.principal()?;

        match action {
            RoomAction::Send => {
                let body: SendBody = parse_body(body)?;
                self.messages
                    .send_as(principal, room_id, body.content, body.message_type)
                    .await?;
            }
            RoomAction::Typing => {
                let body: TypingBody = parse_body(body)?;
                self.messages
                    .notify_typing(principal, room_id, body.typing)
                    .await?;
            }
            RoomAction::Accept => {
                self.rooms.accept_room(room_id, principal).await?;
            }
            RoomAction::Close => {
                let body: CloseBody = if body.is_null() {
                    CloseBody::default()
                } else {
                    parse_body(body)?
                };
                self.rooms
                    .close_room(room_id, principal, body.rating, body.feedback)
                    .await?;
            }
            RoomAction::Read => {
                self.messages.mark_read_by(principal, room_id).await?;
            }
        }
        Ok(())
    }
}

impl Drop for RealtimeSession {
    fn drop(&mut self) {
        self.hub.disconnect(self.connection);
    }
}

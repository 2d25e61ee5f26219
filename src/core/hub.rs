//! In-process publish/subscribe hub for real-time connections.
//!
//! Every connection owns an unbounded outbox; the transport drains it into its socket. Frames
//! are JSON text: `{"destination": "...", "payload": {...}}`.

use dashmap::DashMap;
use di::{inject, injectable};
use log::debug;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use uuid::Uuid;

pub type ConnectionId = u64;

/// Destination names shared by publishers and subscribers.
pub mod destinations {
    use uuid::Uuid;

    pub const PENDING: &str = "topic.pending";
    pub const PENDING_ACCEPTED: &str = "topic.pending.accepted";
    pub const NOTIFICATIONS: &str = "queue.notifications";
    pub const ERRORS: &str = "queue.errors";

    const ROOM_PREFIX: &str = "topic.room.";

    pub fn room(room_id: Uuid) -> String {
        format!("{ROOM_PREFIX}{room_id}")
    }

    pub fn room_typing(room_id: Uuid) -> String {
        format!("{ROOM_PREFIX}{room_id}.typing")
    }

    pub fn room_status(room_id: Uuid) -> String {
        format!("{ROOM_PREFIX}{room_id}.status")
    }

    pub fn room_read(room_id: Uuid) -> String {
        format!("{ROOM_PREFIX}{room_id}.read")
    }

    /// Room id of any `topic.room.<id>[.<channel>]` destination.
    pub fn room_of(destination: &str) -> Option<Uuid> {
        let rest = destination.strip_prefix(ROOM_PREFIX)?;
        let (id, channel) = match rest.split_once('.') {
            Some((id, channel)) => (id, Some(channel)),
            None => (rest, None),
        };
        if !matches!(channel, None | Some("typing") | Some("status") | Some("read")) {
            return None;
        }
        Uuid::parse_str(id).ok()
    }
}

#[derive(Serialize)]
struct OutboundFrame<'a> {
    destination: &'a str,
    payload: &'a Value,
}

fn encode(destination: &str, payload: &Value) -> Option<String> {
    serde_json::to_string(&OutboundFrame {
        destination,
        payload,
    })
    .ok()
}

/// Fan-out surface used by the chat services.
pub trait Broadcaster: Send + Sync {
    /// Registers a connection, returning its id and the outbox to drain.
    fn connect(&self, user_id: Option<Uuid>) -> (ConnectionId, mpsc::UnboundedReceiver<String>);

    fn disconnect(&self, connection: ConnectionId);

    fn subscribe(&self, connection: ConnectionId, destination: &str);

    fn unsubscribe(&self, connection: ConnectionId, destination: &str);

    /// Sends to every subscriber of `destination`. Returns the number of deliveries.
    fn publish(&self, destination: &str, payload: Value) -> usize;

    /// Sends to the connections of `user_id` that subscribed to the private `destination`.
    fn send_to_user(&self, user_id: Uuid, destination: &str, payload: Value) -> usize;

    fn send_to_connection(&self, connection: ConnectionId, destination: &str, payload: Value) -> bool;
}

struct Connection {
    user_id: Option<Uuid>,
    outbox: mpsc::UnboundedSender<String>,
    subscriptions: HashSet<String>,
}

pub struct Hub {
    next_id: AtomicU64,
    connections: DashMap<ConnectionId, Connection>,
    subscribers: DashMap<String, HashSet<ConnectionId>>,
}

impl Default for Hub {
    fn default() -> Self {
        Hub {
            next_id: AtomicU64::new(1),
            connections: DashMap::new(),
            subscribers: DashMap::new(),
        }
    }
}

#[injectable(Broadcaster)]
impl Hub {
    #[inject]
    pub fn create() -> Hub {
        Hub::default()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

// Guards of `connections` and `subscribers` are never held at the same time.
impl Broadcaster for Hub {
    fn connect(&self, user_id: Option<Uuid>) -> (ConnectionId, mpsc::UnboundedReceiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (outbox, receiver) = mpsc::unbounded_channel();
        self.connections.insert(
            id,
            Connection {
                user_id,
                outbox,
                subscriptions: HashSet::new(),
            },
        );
        debug!("connection {id} registered");
        (id, receiver)
    }

    fn disconnect(&self, connection: ConnectionId) {
        let Some((_, removed)) = self.connections.remove(&connection) else {
            return;
        };
        for destination in removed.subscriptions {
            if let Some(mut ids) = self.subscribers.get_mut(&destination) {
                ids.remove(&connection);
            }
            self.subscribers.remove_if(&destination, |_, ids| ids.is_empty());
        }
        debug!("connection {connection} removed");
    }

    fn subscribe(&self, connection: ConnectionId, destination: &str) {
        {
            let Some(mut entry) = self.connections.get_mut(&connection) else {
                return;
            };
            entry.subscriptions.insert(destination.to_owned());
        }
        self.subscribers
            .entry(destination.to_owned())
            .or_default()
            .insert(connection);
    }

    fn unsubscribe(&self, connection: ConnectionId, destination: &str) {
        if let Some(mut entry) = self.connections.get_mut(&connection) {
            entry.subscriptions.remove(destination);
        }
        if let Some(mut ids) = self.subscribers.get_mut(destination) {
            ids.remove(&connection);
        }
        self.subscribers
            .remove_if(destination, |_, ids| ids.is_empty());
    }

    fn publish(&self, destination: &str, payload: Value) -> usize {
        let Some(frame) = encode(destination, &payload) else {
            return 0;
        };
        let ids: Vec<ConnectionId> = match self.subscribers.get(destination) {
            Some(ids) => ids.iter().copied().collect(),
            None => return 0,
        };

        ids.into_iter()
            .filter_map(|id| self.connections.get(&id).map(|c| c.outbox.clone()))
            .filter(|outbox| outbox.send(frame.clone()).is_ok())
            .count()
    }

    fn send_to_user(&self, user_id: Uuid, destination: &str, payload: Value) -> usize {
        let Some(frame) = encode(destination, &payload) else {
            return 0;
        };
        let outboxes: Vec<mpsc::UnboundedSender<String>> = self
            .connections
            .iter()
            .filter(|c| c.user_id == Some(user_id) && c.subscriptions.contains(destination))
            .map(|c| c.outbox.clone())
            .collect();

        outboxes
            .into_iter()
            .filter(|outbox| outbox.send(frame.clone()).is_ok())
            .count()
    }

    fn send_to_connection(&self, connection: ConnectionId, destination: &str, payload: Value) -> bool {
        let Some(frame) = encode(destination, &payload) else {
            return false;
        };
        let outbox = self.connections.get(&connection).map(|c| c.outbox.clone());
        outbox.is_some_and(|outbox| outbox.send(frame).is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn drain(receiver: &mut mpsc::UnboundedReceiver<String>) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(frame) = receiver.try_recv() {
            frames.push(serde_json::from_str(&frame).unwrap());
        }
        frames
    }

    #[test]
    fn test_publish_reaches_only_subscribers() {
        let hub = Hub::default();
        let (a, mut rx_a) = hub.connect(None);
        let (_b, mut rx_b) = hub.connect(None);

        hub.subscribe(a, destinations::PENDING);
        assert_eq!(hub.publish(destinations::PENDING, json!({"count": 1})), 1);

        let frames = drain(&mut rx_a);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["destination"], "topic.pending");
        assert_eq!(frames[0]["payload"]["count"], 1);
        assert!(drain(&mut rx_b).is_empty());
    }

    #[test]
    fn test_unsubscribe_and_disconnect() {
        let hub = Hub::default();
        let room = Uuid::new_v4();
        let (a, mut rx_a) = hub.connect(None);
        let (b, _rx_b) = hub.connect(None);
        hub.subscribe(a, &destinations::room(room));
        hub.subscribe(b, &destinations::room(room));

        hub.unsubscribe(a, &destinations::room(room));
        assert_eq!(hub.publish(&destinations::room(room), json!({})), 1);
        assert!(drain(&mut rx_a).is_empty());

        hub.disconnect(b);
        assert_eq!(hub.publish(&destinations::room(room), json!({})), 0);
        assert_eq!(hub.connection_count(), 1);
    }

    #[test]
    fn test_send_to_user_requires_queue_subscription() {
        let hub = Hub::default();
        let user = Uuid::new_v4();
        let (subscribed, mut rx_subscribed) = hub.connect(Some(user));
        let (_other_tab, mut rx_other) = hub.connect(Some(user));
        let (stranger, mut rx_stranger) = hub.connect(Some(Uuid::new_v4()));
        hub.subscribe(subscribed, destinations::NOTIFICATIONS);
        hub.subscribe(stranger, destinations::NOTIFICATIONS);

        let delivered = hub.send_to_user(user, destinations::NOTIFICATIONS, json!({"type": "ROOM_ACCEPTED"}));

        assert_eq!(delivered, 1);
        assert_eq!(drain(&mut rx_subscribed).len(), 1);
        assert!(drain(&mut rx_other).is_empty());
        assert!(drain(&mut rx_stranger).is_empty());
    }

    #[test]
    fn test_closed_outbox_is_not_counted() {
        let hub = Hub::default();
        let (a, rx_a) = hub.connect(None);
        hub.subscribe(a, destinations::PENDING);
        drop(rx_a);
        assert_eq!(hub.publish(destinations::PENDING, json!({})), 0);
    }

    #[test]
    fn test_room_of_parses_room_destinations() {
        let room = Uuid::new_v4();
        assert_eq!(destinations::room_of(&destinations::room(room)), Some(room));
        assert_eq!(destinations::room_of(&destinations::room_typing(room)), Some(room));
        assert_eq!(destinations::room_of(&destinations::room_status(room)), Some(room));
        assert_eq!(destinations::room_of(&destinations::room_read(room)), Some(room));
        assert_eq!(destinations::room_of(&format!("topic.room.{room}.secret")), None);
        assert_eq!(destinations::room_of("topic.room.not-a-uuid"), None);
        assert_eq!(destinations::room_of(destinations::PENDING), None);
    }
}

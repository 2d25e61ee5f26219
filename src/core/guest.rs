//! Bot-only chat for visitors who are not logged in.
//!
//! Guest sessions exist only in process memory. Each access refreshes a session; sessions idle
//! for longer than the configured TTL are treated as unknown and swept by a background task.

use crate::core::bot::standard_quick_replies;
use crate::core::error::{ChatError, ChatResult};
use crate::core::traits::{AiAdapter, BotEngine, BotStatus, GuestChatService, GuestReply, GuestWelcome};
use crate::infrastructure::config::ChatConfig;
use async_trait::async_trait;
use dashmap::DashMap;
use di::{Ref, inject, injectable};
use log::{debug, info};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

const LOGIN_PROMPT: &str = "Để được nhân viên hỗ trợ trực tiếp, vui lòng đăng nhập hoặc đăng ký tài khoản. Sau khi đăng nhập, cuộc trò chuyện sẽ được chuyển tới nhân viên tư vấn.";

#[derive(Debug, Clone)]
pub struct GuestSession {
    pub session_id: String,
    pub guest_name: Option<String>,
    pub requested_human: bool,
    last_seen: Instant,
}

pub struct GuestSessionStore {
    sessions: DashMap<String, GuestSession>,
    ttl: Duration,
}

#[injectable]
impl GuestSessionStore {
    #[inject]
    pub fn create(config: Ref<ChatConfig>) -> GuestSessionStore {
        GuestSessionStore::with_ttl(config.guest_session_ttl)
    }

    pub fn with_ttl(ttl: Duration) -> GuestSessionStore {
        GuestSessionStore {
            sessions: DashMap::new(),
            ttl,
        }
    }

    pub fn open(&self, guest_name: Option<String>) -> GuestSession {
        let session = GuestSession {
            session_id: format!("guest_{}", Uuid::new_v4().simple()),
            guest_name: guest_name
                .map(|n| n.trim().to_owned())
                .filter(|n| !n.is_empty()),
            requested_human: false,
            last_seen: Instant::now(),
        };
        self.sessions
            .insert(session.session_id.clone(), session.clone());
        session
    }

    /// Refreshes and returns a live session. Expired sessions are dropped on the spot.
    pub fn touch(&self, session_id: &str) -> Option<GuestSession> {
        let now = Instant::now();
        let mut entry = self.sessions.get_mut(session_id)?;
        if now.duration_since(entry.last_seen) > self.ttl {
            drop(entry);
            self.sessions.remove(session_id);
            return None;
        }
        entry.last_seen = now;
        Some(entry.clone())
    }

    pub fn mark_requested_human(&self, session_id: &str) {
        if let Some(mut entry) = self.sessions.get_mut(session_id) {
            entry.requested_human = true;
        }
    }

    /// Removes every session idle for longer than the TTL. Returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.sessions.len();
        self.sessions
            .retain(|_, session| now.duration_since(session.last_seen) <= self.ttl);
        before.saturating_sub(self.sessions.len())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Periodically sweeps expired guest sessions for the lifetime of the process.
pub fn spawn_eviction(store: Ref<GuestSessionStore>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let evicted = store.evict_expired();
            if evicted > 0 {
                info!("evicted {evicted} idle guest sessions");
            }
        }
    })
}

fn welcome_message(guest_name: Option<&str>) -> String {
    let greeting = match guest_name {
        Some(name) => format!("Xin chào {name}!"),
        None => "Xin chào!".to_owned(),
    };
    format!(
        "{greeting} Mình là trợ lý ảo của cửa hàng. Bạn cần tư vấn sản phẩm, kiểm tra đơn hàng hay chính sách đổi trả? Hãy chọn một gợi ý bên dưới hoặc nhập câu hỏi nhé."
    )
}

#[injectable(GuestChatService)]
pub struct MyGuestChatService {
    store: Ref<GuestSessionStore>,
    bot: Ref<dyn BotEngine>,
    ai: Ref<dyn AiAdapter>,
}

#[async_trait]
impl GuestChatService for MyGuestChatService {
    async fn init_guest_chat(&self, guest_name: Option<String>) -> GuestWelcome {
        let session = self.store.open(guest_name);
        debug!("guest session {} opened", session.session_id);

        GuestWelcome {
            message: welcome_message(session.guest_name.as_deref()),
            session_id: session.session_id,
            quick_replies: standard_quick_replies(),
        }
    }

    async fn send_guest_message(&self, session_id: &str, content: String) -> ChatResult<GuestReply> {
        let session = self
            .store
            .touch(session_id)
            .ok_or_else(|| ChatError::NotFound("guest session".to_owned()))?;

        let content = content.trim();
        if content.is_empty() {
            return Err(ChatError::InvalidInput("message content is empty".to_owned()));
        }

        let response = self.bot.respond(content).await;
        if !response.transfer_to_human {
            return Ok(GuestReply {
                session_id: session.session_id,
                message: response.message,
                quick_replies: response.quick_replies,
                transfer_to_human: false,
                requires_login: false,
            });
        }

        // Guests cannot be routed to an agent; they are asked to sign in instead.
        self.store.mark_requested_human(&session.session_id);
        info!("guest session {} asked for a human agent", session.session_id);

        Ok(GuestReply {
            session_id: session.session_id,
            message: format!("{}\n\n{LOGIN_PROMPT}", response.message),
            quick_replies: vec!["Đăng nhập".to_owned(), "Đăng ký".to_owned()],
            transfer_to_human: true,
            requires_login: true,
        })
    }

    fn quick_replies(&self) -> Vec<String> {
        standard_quick_replies()
    }

    fn bot_status(&self) -> BotStatus {
        BotStatus {
            online: true,
            ai_enabled: self.ai.is_available(),
            active_guest_sessions: self.store.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_and_touch() {
        let store = GuestSessionStore::with_ttl(Duration::from_secs(60));
        let session = store.open(Some("  Lan ".to_owned()));

        assert!(session.session_id.starts_with("guest_"));
        assert_eq!(session.guest_name.as_deref(), Some("Lan"));

        let touched = store.touch(&session.session_id).unwrap();
        assert!(!touched.requested_human);
        assert!(store.touch("guest_unknown").is_none());
    }

    #[tokio::test]
    async fn test_blank_name_is_dropped() {
        let store = GuestSessionStore::with_ttl(Duration::from_secs(60));
        assert!(store.open(Some("   ".to_owned())).guest_name.is_none());
    }

    #[tokio::test]
    async fn test_mark_requested_human() {
        let store = GuestSessionStore::with_ttl(Duration::from_secs(60));
        let session = store.open(None);
        store.mark_requested_human(&session.session_id);
        assert!(store.touch(&session.session_id).unwrap().requested_human);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_sessions_expire() {
        let store = GuestSessionStore::with_ttl(Duration::from_secs(60));
        let idle = store.open(None);
        let active = store.open(None);

        tokio::time::advance(Duration::from_secs(40)).await;
        assert!(store.touch(&active.session_id).is_some());

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(store.evict_expired(), 1);
        assert!(store.touch(&idle.session_id).is_none());
        assert!(store.touch(&active.session_id).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_drops_expired_session() {
        let store = GuestSessionStore::with_ttl(Duration::from_secs(10));
        let session = store.open(None);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(store.touch(&session.session_id).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_welcome_message_uses_name() {
        assert!(welcome_message(Some("Lan")).starts_with("Xin chào Lan!"));
        assert!(welcome_message(None).starts_with("Xin chào!"));
    }
}

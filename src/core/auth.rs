//! Bearer-token verification and real-time handshake identity.
//!
//! Tokens have the shape `{user_id}.{expires_unix}.{hex hmac-sha256}`, where the MAC covers
//! `{user_id}.{expires_unix}`. Issuing tokens belongs to the account service; `sign_token`
//! exists for tooling and tests.

use crate::core::error::{ChatError, ChatResult};
use crate::core::guest::GuestSessionStore;
use crate::core::traits::Authenticator;
use crate::infrastructure::config::ChatConfig;
use crate::infrastructure::entities::{AgentKind, UserRole};
use crate::infrastructure::traits::UserDirectory;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use di::{Ref, injectable};
use hmac::{Hmac, Mac};
use log::debug;
use sha2::Sha256;
use std::str::FromStr;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// A verified, logged-in caller.
#[derive(Debug, Clone, PartialEq)]
pub struct Principal {
    pub user_id: Uuid,
    pub role: UserRole,
    pub display_name: String,
}

impl Principal {
    pub fn agent_kind(&self) -> Option<AgentKind> {
        self.role.agent_kind()
    }

    pub fn is_agent(&self) -> bool {
        self.agent_kind().is_some()
    }
}

/// Identity bound to a real-time connection at handshake time.
#[derive(Debug, Clone, PartialEq)]
pub enum Identity {
    User(Principal),
    Guest { session_id: String },
}

impl Identity {
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Identity::User(principal) => Some(principal.user_id),
            Identity::Guest { .. } => None,
        }
    }
}

fn mac(secret: &str, payload: &str) -> HmacSha256 {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(payload.as_bytes());
    mac
}

pub fn sign_token(secret: &str, user_id: Uuid, expires_at: DateTime<Utc>) -> String {
    let payload = format!("{user_id}.{}", expires_at.timestamp());
    let signature = hex::encode(mac(secret, &payload).finalize().into_bytes());
    format!("{payload}.{signature}")
}

/// Checks signature and expiry, returning the user id the token was issued for.
pub fn verify_token(secret: &str, token: &str, now: DateTime<Utc>) -> ChatResult<Uuid> {
    let invalid = || ChatError::Unauthorized("invalid token".to_owned());

    let mut parts = token.trim().splitn(3, '.');
    let (Some(user_id), Some(expires), Some(signature)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(invalid());
    };

    let signature = hex::decode(signature).map_err(|_| invalid())?;
    mac(secret, &format!("{user_id}.{expires}"))
        .verify_slice(&signature)
        .map_err(|_| invalid())?;

    let expires = i64::from_str(expires).map_err(|_| invalid())?;
    if expires <= now.timestamp() {
        return Err(ChatError::Unauthorized("token expired".to_owned()));
    }

    Uuid::from_str(user_id).map_err(|_| invalid())
}

#[injectable(Authenticator)]
pub struct TokenAuthenticator {
    config: Ref<ChatConfig>,
    users: Ref<dyn UserDirectory>,
    guests: Ref<GuestSessionStore>,
}

#[async_trait]
impl Authenticator for TokenAuthenticator {
    async fn authenticate(&self, token: &str) -> ChatResult<Principal> {
        let user_id = verify_token(&self.config.token_secret, token, Utc::now())?;
        let user = self
            .users
            .find_user(user_id)
            .await?
            .ok_or_else(|| ChatError::Unauthorized("unknown user".to_owned()))?;

        Ok(Principal {
            user_id: user.id,
            role: user.role,
            display_name: user.display_name,
        })
    }

    async fn handshake(&self, token: Option<&str>, session_id: Option<&str>) -> ChatResult<Identity> {
        if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
            return self.authenticate(token).await.map(Identity::User);
        }

        if let Some(session_id) = session_id.filter(|s| !s.trim().is_empty()) {
            return match self.guests.touch(session_id) {
                Some(session) => Ok(Identity::Guest {
                    session_id: session.session_id,
                }),
                None => {
                    debug!("handshake with unknown guest session {session_id}");
                    Err(ChatError::Unauthorized("unknown guest session".to_owned()))
                }
            };
        }

        Err(ChatError::Unauthorized("missing credentials".to_owned()))
    }
}

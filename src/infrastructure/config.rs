//! Process configuration, read from the environment

use di::inject;
use di::injectable;
use log::warn;
use std::env;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;

const DEV_TOKEN_SECRET: &str = "dev-only-insecure-secret";

static TEST_CONFIG: Mutex<Option<ChatConfig>> = Mutex::new(None);

#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub bind_addr: String,
    pub token_secret: String,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_base_url: String,
    pub ai_timeout: Duration,
    pub guest_session_ttl: Duration,
    pub cors_origins: Vec<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        ChatConfig {
            bind_addr: "0.0.0.0:3000".to_owned(),
            token_secret: DEV_TOKEN_SECRET.to_owned(),
            gemini_api_key: None,
            gemini_model: "gemini-1.5-flash".to_owned(),
            gemini_base_url: "https://generativelanguage.googleapis.com".to_owned(),
            ai_timeout: Duration::from_secs(15),
            guest_session_ttl: Duration::from_secs(30 * 60),
            cors_origins: vec![
                "http://localhost:3000".to_owned(),
                "http://localhost:5173".to_owned(),
            ],
        }
    }
}

#[injectable]
impl ChatConfig {
    #[inject]
    pub fn create() -> ChatConfig {
        if let Some(config) = TEST_CONFIG.lock().ok().and_then(|c| c.clone()) {
            return config;
        }

        ChatConfig::from_env()
    }

    pub fn from_env() -> ChatConfig {
        dotenvy::dotenv().ok();
        let defaults = ChatConfig::default();

        let token_secret = env::var("AUTH_TOKEN_SECRET").unwrap_or_else(|_| {
            warn!("AUTH_TOKEN_SECRET is not set, falling back to the development secret");
            defaults.token_secret.clone()
        });

        ChatConfig {
            bind_addr: env::var("BIND_ADDR").unwrap_or(defaults.bind_addr),
            token_secret,
            gemini_api_key: env::var("GEMINI_API_KEY")
                .ok()
                .filter(|key| !key.trim().is_empty()),
            gemini_model: env::var("GEMINI_MODEL").unwrap_or(defaults.gemini_model),
            gemini_base_url: env::var("GEMINI_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_owned())
                .unwrap_or(defaults.gemini_base_url),
            ai_timeout: env_secs("AI_TIMEOUT_SECS").unwrap_or(defaults.ai_timeout),
            guest_session_ttl: env_secs("GUEST_SESSION_TTL_SECS")
                .unwrap_or(defaults.guest_session_ttl),
            cors_origins: env::var("CORS_ORIGINS")
                .map(|origins| {
                    origins
                        .split(',')
                        .map(str::trim)
                        .filter(|o| !o.is_empty())
                        .map(str::to_owned)
                        .collect()
                })
                .unwrap_or(defaults.cors_origins),
        }
    }

    /// Makes every DI-created `ChatConfig` a clone of `config` until cleared.
    pub fn set_test_config(config: ChatConfig) {
        if let Ok(mut slot) = TEST_CONFIG.lock() {
            *slot = Some(config);
        }
    }

    pub fn clear_test_config() {
        if let Ok(mut slot) = TEST_CONFIG.lock() {
            *slot = None;
        }
    }

    pub fn ai_enabled(&self) -> bool {
        self.gemini_api_key.is_some()
    }
}

fn env_secs(name: &str) -> Option<Duration> {
    env::var(name)
        .ok()
        .and_then(|s| u64::from_str(s.trim()).ok())
        .map(Duration::from_secs)
}

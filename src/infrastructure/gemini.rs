//! Generative-text backend on the Gemini `generateContent` endpoint.

use crate::core::error::{ChatError, ChatResult};
use crate::infrastructure::config::ChatConfig;
use crate::infrastructure::traits::GenerationBackend;
use async_trait::async_trait;
use di::{Ref, inject, injectable};
use log::debug;
use serde_json::{Value, json};
use std::time::Duration;

pub struct GeminiBackend {
    client: reqwest::Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
}

#[injectable(GenerationBackend)]
impl GeminiBackend {
    #[inject]
    pub fn create(config: Ref<ChatConfig>) -> GeminiBackend {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(config.ai_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        GeminiBackend {
            client,
            api_key: config.gemini_api_key.clone(),
            model: config.gemini_model.clone(),
            base_url: config.gemini_base_url.trim_end_matches('/').to_owned(),
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }
}

fn build_body(prompt: &str) -> Value {
    json!({
        "contents": [
            { "role": "user", "parts": [{ "text": prompt }] }
        ],
        "generationConfig": {
            "temperature": 0.4,
            "maxOutputTokens": 512
        }
    })
}

/// Concatenated text parts of the first candidate, trimmed.
fn extract_text(payload: &Value) -> Option<String> {
    let parts = payload
        .get("candidates")?
        .as_array()?
        .first()?
        .get("content")?
        .get("parts")?
        .as_array()?;

    let text: String = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();
    let text = text.trim();

    (!text.is_empty()).then(|| text.to_owned())
}

#[async_trait]
impl GenerationBackend for GeminiBackend {
    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn generate(&self, prompt: &str) -> ChatResult<String> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(ChatError::Upstream("generation backend not configured".to_owned()));
        };

        let response = self
            .client
            .post(self.endpoint())
            .query(&[("key", api_key)])
            .json(&build_body(prompt))
            .send()
            .await
            .map_err(|e| ChatError::Upstream(format!("gemini request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Upstream(format!("gemini returned {status}: {body}")));
        }

        let payload = response
            .json::<Value>()
            .await
            .map_err(|e| ChatError::Upstream(format!("gemini parse failed: {e}")))?;
        debug!("gemini response received");

        extract_text(&payload)
            .ok_or_else(|| ChatError::Upstream("gemini response had empty content".to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_body_wraps_prompt_as_user_turn() {
        let body = build_body("xin chào");
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "xin chào");
    }

    #[test]
    fn test_extract_text_joins_parts() {
        let payload: Value = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"Chào "},{"text":"bạn"}],"role":"model"},"finishReason":"STOP"}]}"#,
        )
        .unwrap();
        assert_eq!(extract_text(&payload).as_deref(), Some("Chào bạn"));
    }

    #[test]
    fn test_extract_text_empty_candidate() {
        let payload: Value =
            serde_json::from_str(r#"{"candidates":[{"finishReason":"SAFETY"}]}"#).unwrap();
        assert!(extract_text(&payload).is_none());

        let blank: Value = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"   "}]}}]}"#,
        )
        .unwrap();
        assert!(extract_text(&blank).is_none());
    }

    #[test]
    fn test_unconfigured_backend() {
        let backend = GeminiBackend::create(Ref::new(ChatConfig::default()));
        assert!(!backend.is_configured());
        assert!(backend.endpoint().ends_with("/v1beta/models/gemini-1.5-flash:generateContent"));
    }
}

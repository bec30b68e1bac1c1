//! Google GenAI (Gemini) reply provider.
//!
//! The model call is a black box: role-tagged parts in, text out, or explicit
//! failure. Every failure path collapses into the fallback reply so the chat
//! service never sees a transport-level error from this call.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::assistant::{fallback_reply, persona, ReplyGenerator};
use crate::config::AssistantConfig;
use crate::error::PortalError;
use crate::types::{ChatCategory, Message, Role};

pub struct GoogleGenAiGenerator {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f64,
    top_k: u32,
    top_p: f64,
    max_output_tokens: u32,
}

impl GoogleGenAiGenerator {
    pub fn new(config: &AssistantConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            top_k: config.top_k,
            top_p: config.top_p,
            max_output_tokens: config.max_output_tokens,
        })
    }

    /// Gemini request body: persona as system_instruction, history as
    /// role-tagged contents (assistant maps to "model"), fixed generation
    /// parameters.
    fn build_request_body(
        &self,
        history: &[Message],
        category: ChatCategory,
        language: &str,
    ) -> Value {
        let contents: Vec<Value> = history
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::User => "user",
                    Role::Assistant => "model",
                };
                json!({
                    "role": role,
                    "parts": [{ "text": m.content }],
                })
            })
            .collect();

        json!({
            "system_instruction": {
                "parts": [{ "text": persona::system_prompt(category, language) }],
            },
            "contents": contents,
            "generationConfig": {
                "temperature": self.temperature,
                "topK": self.top_k,
                "topP": self.top_p,
                "maxOutputTokens": self.max_output_tokens,
            },
        })
    }

    async fn generate(
        &self,
        history: &[Message],
        category: ChatCategory,
        language: &str,
    ) -> Result<String, PortalError> {
        let body = self.build_request_body(history, category, language);
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        debug!(model = %self.model, turns = history.len(), "Calling GenAI API");

        let resp = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| PortalError::network(&e))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| PortalError::network(&e))?;
        if !status.is_success() {
            return Err(PortalError::from_status(status.as_u16(), &text));
        }

        let parsed: Value = serde_json::from_str(&text)
            .map_err(|e| PortalError::new(crate::error::ErrorKind::Unknown, e.to_string()))?;
        extract_text(&parsed).ok_or_else(|| {
            PortalError::new(
                crate::error::ErrorKind::Unknown,
                "GenAI response had no candidate text",
            )
        })
    }
}

/// Concatenate the text parts of the first candidate.
fn extract_text(response: &Value) -> Option<String> {
    let parts = response
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?;
    let mut out = String::new();
    for part in parts {
        if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
            out.push_str(text);
        }
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

#[async_trait]
impl ReplyGenerator for GoogleGenAiGenerator {
    async fn reply(&self, history: &[Message], category: ChatCategory, language: &str) -> String {
        match self.generate(history, category, language).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "GenAI call failed, substituting fallback reply");
                fallback_reply(language).to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn generator() -> GoogleGenAiGenerator {
        GoogleGenAiGenerator::new(&AssistantConfig::default()).unwrap()
    }

    fn history() -> Vec<Message> {
        vec![
            Message {
                content: "When should I plant rice?".to_string(),
                role: Role::User,
                timestamp: Utc::now(),
            },
            Message {
                content: "Before the monsoon arrives.".to_string(),
                role: Role::Assistant,
                timestamp: Utc::now(),
            },
        ]
    }

    #[test]
    fn request_body_carries_persona_and_generation_config() {
        let body = generator().build_request_body(&history(), ChatCategory::Agriculture, "en");

        let sys = body["system_instruction"]["parts"][0]["text"].as_str().unwrap();
        assert!(sys.contains("rural India"));
        assert!(sys.contains("crop management"));

        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["generationConfig"]["temperature"], 0.7);
        assert_eq!(body["generationConfig"]["topK"], 40);
        assert_eq!(body["generationConfig"]["topP"], 0.95);
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 1024);
    }

    #[test]
    fn candidate_text_parts_are_concatenated() {
        let response = json!({
            "candidates": [{
                "content": {
                    "parts": [
                        { "text": "Plant after " },
                        { "text": "the first rains." }
                    ]
                }
            }]
        });
        assert_eq!(
            extract_text(&response).as_deref(),
            Some("Plant after the first rains.")
        );
        assert_eq!(extract_text(&json!({ "candidates": [] })), None);
    }

    #[tokio::test]
    async fn unreachable_backend_yields_fallback_not_error() {
        let config = AssistantConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            request_timeout_secs: 2,
            ..AssistantConfig::default()
        };
        let generator = GoogleGenAiGenerator::new(&config).unwrap();

        let reply = generator.reply(&history(), ChatCategory::General, "en").await;
        assert_eq!(reply, fallback_reply("en"));

        let reply_hi = generator.reply(&history(), ChatCategory::General, "hi").await;
        assert_eq!(reply_hi, fallback_reply("hi"));
    }
}

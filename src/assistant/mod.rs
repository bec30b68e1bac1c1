//! Remote chat service implementation: persona prompts, the Gemini reply
//! provider, and the in-process chat service the HTTP server exposes.

pub mod genai;
pub mod persona;
pub mod service;

use async_trait::async_trait;

use crate::types::{ChatCategory, Message};

pub use genai::GoogleGenAiGenerator;
pub use service::ChatService;

/// Produces one assistant reply for an ordered conversation history.
///
/// Never fails: implementations swallow their own transport failures and
/// substitute the apologetic fallback string, so callers only ever see text.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn reply(&self, history: &[Message], category: ChatCategory, language: &str) -> String;
}

/// User-facing reply when the model backend is unreachable or misbehaving.
pub fn fallback_reply(language: &str) -> &'static str {
    if language == "hi" {
        "क्षमा करें, मैं अभी आपके अनुरोध को संसाधित करने में असमर्थ हूँ। कृपया बाद में पुनः प्रयास करें।"
    } else {
        "I apologize, but I am having trouble processing your request right now. Please try again later."
    }
}

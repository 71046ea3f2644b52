use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use confidant_common::Result;
use confidant_security::Credential;
use serde::{Deserialize, Serialize};

pub mod github;
pub mod huggingface;
pub mod openai;
pub mod pollinations;
pub mod search;

pub use github::{GitHubClient, GitHubProfile};
pub use huggingface::HuggingFaceImageProvider;
pub use openai::OpenAiCompatibleProvider;
pub use pollinations::PollinationsImageProvider;
pub use search::{DuckDuckGoSearch, SearchHit, SearchProvider};

/// A logical capability served by an ordered chain of providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    TextGeneration,
    Vision,
    ImageSynthesis,
    Embedding,
    Speech,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TextGeneration => "text_generation",
            Self::Vision => "vision",
            Self::ImageSynthesis => "image_synthesis",
            Self::Embedding => "embedding",
            Self::Speech => "speech",
        }
    }

    pub fn default_timeout(&self) -> Duration {
        match self {
            Self::TextGeneration => Duration::from_secs(30),
            Self::Vision => Duration::from_secs(45),
            Self::ImageSynthesis => Duration::from_secs(90),
            Self::Embedding => Duration::from_secs(10),
            Self::Speech => Duration::from_secs(20),
        }
    }

    /// Soft reply used when every provider for the capability has failed.
    pub fn unavailable_message(&self) -> &'static str {
        match self {
            Self::TextGeneration => {
                "⚠️ I'm having trouble reaching my language models right now. Please try again in a moment."
            }
            Self::Vision => "⚠️ Image analysis is temporarily unavailable. Please try again shortly.",
            Self::ImageSynthesis => {
                "⚠️ Image generation is temporarily unavailable. Please try again shortly."
            }
            Self::Embedding => "⚠️ Memory search is temporarily unavailable.",
            Self::Speech => "⚠️ Voice playback is temporarily unavailable.",
        }
    }
}

/// One concrete upstream able to serve a capability.
///
/// The fallback chain acquires a credential from [`credential_pool`] before
/// each call; providers that return `None` are invoked without one.
///
/// [`credential_pool`]: CapabilityProvider::credential_pool
#[async_trait]
pub trait CapabilityProvider<Req, Resp>: Send + Sync
where
    Req: Send + Sync + 'static,
    Resp: Send + 'static,
{
    /// Provider identifier (e.g. "groq", "flux", "pollinations").
    fn provider_id(&self) -> &str;

    fn credential_pool(&self) -> Option<&str> {
        None
    }

    async fn invoke(&self, credential: Option<&Credential>, request: &Req) -> Result<Resp>;
}

pub type TextProvider = dyn CapabilityProvider<LlmRequest, LlmResponse>;
pub type EmbeddingProvider = dyn CapabilityProvider<EmbeddingRequest, Embedding>;
pub type ImageProvider = dyn CapabilityProvider<ImageRequest, GeneratedImage>;
pub type SpeechProvider = dyn CapabilityProvider<SpeechRequest, SpeechAudio>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    /// Overrides the provider's configured model when set.
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub system: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
}

impl LlmRequest {
    /// Single user turn with an optional system prompt.
    pub fn single_turn(system: Option<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: None,
            messages: vec![ChatMessage::user(prompt)],
            system,
            max_tokens: None,
            temperature: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: MessagePart,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: MessagePart::Text(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: MessagePart::Text(text.into()),
        }
    }
}

impl From<&confidant_common::Message> for ChatMessage {
    fn from(message: &confidant_common::Message) -> Self {
        match message.role {
            confidant_common::MessageRole::User => Self::user(message.content.clone()),
            confidant_common::MessageRole::Assistant => Self::assistant(message.content.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessagePart {
    Text(String),
    Parts(Vec<ContentBlock>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    /// Image reference, either an https URL or a `data:` URL.
    #[serde(rename = "image")]
    Image { url: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: Vec<ContentBlock>,
    pub model: String,
    pub usage: Option<Usage>,
    pub stop_reason: Option<String>,
}

impl LlmResponse {
    pub fn text(&self) -> String {
        extract_text(&self.content)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    pub input: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRequest {
    pub prompt: String,
}

#[derive(Debug, Clone)]
pub enum GeneratedImage {
    /// Raw image bytes returned by the upstream.
    Inline { mime_type: String, bytes: Bytes },
    /// A URL the client fetches directly.
    Url(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechRequest {
    pub text: String,
    pub voice: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SpeechAudio {
    pub mime_type: String,
    pub bytes: Bytes,
}

pub fn extract_text(content: &[ContentBlock]) -> String {
    content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

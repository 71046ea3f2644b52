use async_trait::async_trait;
use confidant_common::{Error, Result};
use confidant_security::Credential;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::providers::{
    CapabilityProvider, ChatMessage, ChatRole, ContentBlock, Embedding, EmbeddingRequest,
    LlmRequest, LlmResponse, MessagePart, SpeechAudio, SpeechRequest, Usage,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Provider for any endpoint speaking the OpenAI wire format: chat
/// completions (text and vision), embeddings, and speech synthesis.
#[derive(Clone)]
pub struct OpenAiCompatibleProvider {
    id: String,
    client: Client,
    base_url: String,
    model: String,
    pool: Option<String>,
    voice: Option<String>,
}

impl OpenAiCompatibleProvider {
    pub fn new(id: impl Into<String>, base_url: Option<String>, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            client: Client::new(),
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: model.into(),
            pool: None,
            voice: None,
        }
    }

    /// Share a connection pool with other providers.
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_pool(mut self, pool: impl Into<String>) -> Self {
        self.pool = Some(pool.into());
        self
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        credential: Option<&Credential>,
        body: &T,
    ) -> Result<reqwest::Response> {
        let url = format!("{}/{path}", self.base_url);
        let mut request = self.client.post(&url).json(body);
        if let Some(credential) = credential {
            request = request.bearer_auth(credential.expose());
        }

        let response = request.send().await.map_err(|e| {
            Error::ProviderUnavailable(format!("{} request failed: {e}", self.id))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::UpstreamStatus {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }
        Ok(response)
    }

    fn convert_request(&self, request: &LlmRequest) -> OpenAiRequest {
        let mut messages = Vec::new();

        if let Some(system_prompt) = &request.system {
            messages.push(OpenAiMessage::System {
                content: system_prompt.clone(),
            });
        }

        for msg in &request.messages {
            messages.push(convert_message(msg));
        }

        OpenAiRequest {
            model: request.model.clone().unwrap_or_else(|| self.model.clone()),
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        }
    }

    fn convert_response(&self, response: OpenAiResponse) -> Result<LlmResponse> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::ProviderUnavailable(format!("{}: no choices in response", self.id)))?;

        let text = choice
            .message
            .content
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::ProviderUnavailable(format!("{}: empty completion", self.id)))?;

        Ok(LlmResponse {
            content: vec![ContentBlock::Text { text }],
            model: response.model.unwrap_or_else(|| self.model.clone()),
            usage: response.usage.map(|u| Usage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            }),
            stop_reason: choice.finish_reason,
        })
    }
}

#[async_trait]
impl CapabilityProvider<LlmRequest, LlmResponse> for OpenAiCompatibleProvider {
    fn provider_id(&self) -> &str {
        &self.id
    }

    fn credential_pool(&self) -> Option<&str> {
        self.pool.as_deref()
    }

    async fn invoke(
        &self,
        credential: Option<&Credential>,
        request: &LlmRequest,
    ) -> Result<LlmResponse> {
        let body = self.convert_request(request);
        debug!("{} chat completion with {} message(s)", self.id, body.messages.len());
        let response = self.post_json("chat/completions", credential, &body).await?;

        let parsed: OpenAiResponse = response.json().await.map_err(|e| {
            Error::ProviderUnavailable(format!("{}: failed to parse response: {e}", self.id))
        })?;
        self.convert_response(parsed)
    }
}

#[async_trait]
impl CapabilityProvider<EmbeddingRequest, Embedding> for OpenAiCompatibleProvider {
    fn provider_id(&self) -> &str {
        &self.id
    }

    fn credential_pool(&self) -> Option<&str> {
        self.pool.as_deref()
    }

    async fn invoke(
        &self,
        credential: Option<&Credential>,
        request: &EmbeddingRequest,
    ) -> Result<Embedding> {
        let body = OpenAiEmbeddingRequest {
            model: &self.model,
            input: vec![request.input.as_str()],
        };
        let response = self.post_json("embeddings", credential, &body).await?;

        let parsed: OpenAiEmbeddingResponse = response.json().await.map_err(|e| {
            Error::ProviderUnavailable(format!("{}: failed to parse embeddings: {e}", self.id))
        })?;
        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| Error::ProviderUnavailable(format!("{}: empty embedding", self.id)))?;

        Ok(Embedding {
            vector,
            model: parsed.model.unwrap_or_else(|| self.model.clone()),
        })
    }
}

#[async_trait]
impl CapabilityProvider<SpeechRequest, SpeechAudio> for OpenAiCompatibleProvider {
    fn provider_id(&self) -> &str {
        &self.id
    }

    fn credential_pool(&self) -> Option<&str> {
        self.pool.as_deref()
    }

    async fn invoke(
        &self,
        credential: Option<&Credential>,
        request: &SpeechRequest,
    ) -> Result<SpeechAudio> {
        let voice = request
            .voice
            .as_deref()
            .or(self.voice.as_deref())
            .unwrap_or("alloy");
        let body = OpenAiSpeechRequest {
            model: &self.model,
            input: &request.text,
            voice,
            response_format: "mp3",
        };
        let response = self.post_json("audio/speech", credential, &body).await?;

        let bytes = response.bytes().await.map_err(|e| {
            Error::ProviderUnavailable(format!("{}: failed to read audio: {e}", self.id))
        })?;
        if bytes.is_empty() {
            return Err(Error::ProviderUnavailable(format!("{}: empty audio", self.id)));
        }
        Ok(SpeechAudio {
            mime_type: "audio/mpeg".to_string(),
            bytes,
        })
    }
}

fn convert_message(msg: &ChatMessage) -> OpenAiMessage {
    match msg.role {
        ChatRole::System => OpenAiMessage::System {
            content: part_text(&msg.content),
        },
        ChatRole::Assistant => OpenAiMessage::Assistant {
            content: part_text(&msg.content),
        },
        ChatRole::User => {
            let content = match &msg.content {
                MessagePart::Text(t) => OpenAiUserContent::Text(t.clone()),
                MessagePart::Parts(parts) => OpenAiUserContent::Parts(
                    parts
                        .iter()
                        .map(|part| match part {
                            ContentBlock::Text { text } => {
                                OpenAiContentPart::Text { text: text.clone() }
                            }
                            ContentBlock::Image { url } => OpenAiContentPart::ImageUrl {
                                image_url: OpenAiImageUrl { url: url.clone() },
                            },
                        })
                        .collect(),
                ),
            };
            OpenAiMessage::User { content }
        }
    }
}

fn part_text(content: &MessagePart) -> String {
    match content {
        MessagePart::Text(t) => t.clone(),
        MessagePart::Parts(parts) => crate::providers::extract_text(parts),
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 500;
    if body.len() <= MAX {
        return body.to_string();
    }
    let mut end = MAX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

// Request Types

#[derive(Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
enum OpenAiMessage {
    System { content: String },
    User { content: OpenAiUserContent },
    Assistant { content: String },
}

#[derive(Serialize)]
#[serde(untagged)]
enum OpenAiUserContent {
    Text(String),
    Parts(Vec<OpenAiContentPart>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OpenAiContentPart {
    Text { text: String },
    ImageUrl { image_url: OpenAiImageUrl },
}

#[derive(Serialize)]
struct OpenAiImageUrl {
    url: String,
}

#[derive(Serialize)]
struct OpenAiEmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Serialize)]
struct OpenAiSpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
}

// Response Types

#[derive(Deserialize)]
struct OpenAiResponse {
    model: Option<String>,
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingData>,
    model: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingData {
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_uses_configured_model_and_prepends_system() {
        let provider = OpenAiCompatibleProvider::new("groq", None, "llama-3.3-70b-versatile");
        let request = LlmRequest::single_turn(Some("Be kind.".to_string()), "hi");
        let body = serde_json::to_value(provider.convert_request(&request)).expect("serialize");

        assert_eq!(body["model"], "llama-3.3-70b-versatile");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert!(body.get("max_tokens").is_none());
    }

    #[test]
    fn image_parts_serialize_as_image_url() {
        let msg = ChatMessage {
            role: ChatRole::User,
            content: MessagePart::Parts(vec![
                ContentBlock::Text {
                    text: "what is this?".to_string(),
                },
                ContentBlock::Image {
                    url: "data:image/png;base64,AAAA".to_string(),
                },
            ]),
        };
        let json = serde_json::to_value(convert_message(&msg)).expect("serialize");
        assert_eq!(json["content"][1]["type"], "image_url");
        assert_eq!(json["content"][1]["image_url"]["url"], "data:image/png;base64,AAAA");
    }

    #[test]
    fn trailing_slash_is_trimmed_from_base_url() {
        let provider =
            OpenAiCompatibleProvider::new("x", Some("http://localhost:1/v1/".to_string()), "m");
        assert_eq!(provider.base_url, "http://localhost:1/v1");
    }

    #[test]
    fn long_error_bodies_are_truncated() {
        let body = "é".repeat(400);
        let truncated = truncate_body(&body);
        assert!(truncated.ends_with("..."));
        assert!(truncated.len() <= 504);
    }
}

use async_trait::async_trait;
use confidant_common::{Error, Result};
use confidant_security::Credential;
use reqwest::Client;
use serde_json::json;

use crate::providers::{CapabilityProvider, GeneratedImage, ImageRequest};

/// Text-to-image through the Hugging Face inference API. The endpoint is
/// the full model URL, e.g. `.../models/black-forest-labs/FLUX.1-dev`.
pub struct HuggingFaceImageProvider {
    id: String,
    client: Client,
    endpoint: String,
    pool: Option<String>,
}

impl HuggingFaceImageProvider {
    pub fn new(id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            client: Client::new(),
            endpoint: endpoint.into(),
            pool: None,
        }
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_pool(mut self, pool: impl Into<String>) -> Self {
        self.pool = Some(pool.into());
        self
    }
}

#[async_trait]
impl CapabilityProvider<ImageRequest, GeneratedImage> for HuggingFaceImageProvider {
    fn provider_id(&self) -> &str {
        &self.id
    }

    fn credential_pool(&self) -> Option<&str> {
        self.pool.as_deref()
    }

    async fn invoke(
        &self,
        credential: Option<&Credential>,
        request: &ImageRequest,
    ) -> Result<GeneratedImage> {
        let mut call = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "inputs": request.prompt }));
        if let Some(credential) = credential {
            call = call.bearer_auth(credential.expose());
        }

        let response = call.send().await.map_err(|e| {
            Error::ProviderUnavailable(format!("{} request failed: {e}", self.id))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::UpstreamStatus {
                status: status.as_u16(),
                body,
            });
        }

        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/jpeg")
            .to_string();
        // The API answers 200 with a JSON body while a model is still loading.
        if !mime_type.starts_with("image/") {
            return Err(Error::ProviderUnavailable(format!(
                "{}: expected image, got {mime_type}",
                self.id
            )));
        }

        let bytes = response.bytes().await.map_err(|e| {
            Error::ProviderUnavailable(format!("{}: failed to read image: {e}", self.id))
        })?;
        if bytes.is_empty() {
            return Err(Error::ProviderUnavailable(format!("{}: empty image", self.id)));
        }

        Ok(GeneratedImage::Inline { mime_type, bytes })
    }
}

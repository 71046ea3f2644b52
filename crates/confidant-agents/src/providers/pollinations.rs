use async_trait::async_trait;
use confidant_common::{Error, Result};
use confidant_security::Credential;
use url::Url;

use crate::providers::{CapabilityProvider, GeneratedImage, ImageRequest};

const DEFAULT_BASE_URL: &str = "https://image.pollinations.ai/prompt";

/// Credential-free backup image generator. No request is made here: the
/// image URL is built from the prompt and fetched by the client.
pub struct PollinationsImageProvider {
    id: String,
    base_url: String,
}

impl PollinationsImageProvider {
    pub fn new(id: impl Into<String>, base_url: Option<String>) -> Self {
        Self {
            id: id.into(),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }

    pub fn image_url(&self, prompt: &str) -> Result<String> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| Error::Config(format!("invalid image backup url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| Error::Config("image backup url cannot be a base".to_string()))?
            .pop_if_empty()
            .push(prompt.trim());
        url.query_pairs_mut().append_pair("nologo", "true");
        Ok(url.to_string())
    }
}

#[async_trait]
impl CapabilityProvider<ImageRequest, GeneratedImage> for PollinationsImageProvider {
    fn provider_id(&self) -> &str {
        &self.id
    }

    async fn invoke(
        &self,
        _credential: Option<&Credential>,
        request: &ImageRequest,
    ) -> Result<GeneratedImage> {
        Ok(GeneratedImage::Url(self.image_url(&request.prompt)?))
    }
}

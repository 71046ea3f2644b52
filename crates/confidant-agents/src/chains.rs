use std::sync::Arc;
use std::time::Duration;

use confidant_common::{Error, Result};
use confidant_config::{AppConfig, ProviderConfig, ProviderKind};
use confidant_security::CredentialPools;
use reqwest::Client;
use serde::Serialize;
use tracing::info;

use crate::fallback::FallbackChain;
use crate::providers::{
    Capability, DuckDuckGoSearch, Embedding, EmbeddingRequest, GeneratedImage, GitHubClient,
    HuggingFaceImageProvider, ImageRequest, LlmRequest, LlmResponse, OpenAiCompatibleProvider,
    PollinationsImageProvider, SearchProvider, SpeechAudio, SpeechRequest,
};

pub type TextChain = FallbackChain<LlmRequest, LlmResponse>;
pub type EmbeddingChain = FallbackChain<EmbeddingRequest, Embedding>;
pub type ImageChain = FallbackChain<ImageRequest, GeneratedImage>;
pub type SpeechChain = FallbackChain<SpeechRequest, SpeechAudio>;

/// Every provider chain the handlers can reach, built once at startup.
#[derive(Clone)]
pub struct Capabilities {
    pub text: Arc<TextChain>,
    pub vision: Arc<TextChain>,
    pub embedding: Arc<EmbeddingChain>,
    pub image: Arc<ImageChain>,
    pub speech: Arc<SpeechChain>,
    /// Text chain for rewriting image prompts. May be empty.
    pub enrichment: Arc<TextChain>,
    pub search: Arc<dyn SearchProvider>,
    pub github: Arc<GitHubClient>,
    pub pools: Arc<CredentialPools>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChainStatus {
    pub capability: &'static str,
    pub providers: Vec<String>,
}

impl Capabilities {
    pub fn from_config(config: &AppConfig, pools: Arc<CredentialPools>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("confidant/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("failed to build http client: {e}")))?;
        Self::from_config_with_client(config, pools, client)
    }

    /// Build every chain sharing one HTTP client.
    pub fn from_config_with_client(
        config: &AppConfig,
        pools: Arc<CredentialPools>,
        client: Client,
    ) -> Result<Self> {
        let timeouts = &config.timeouts;
        let providers = &config.providers;

        let mut text = TextChain::new(Capability::TextGeneration, Arc::clone(&pools))
            .with_timeout(Duration::from_secs(timeouts.text_secs));
        for entry in &providers.text {
            text.push_link(Arc::new(openai_provider(entry, &client)?), link_timeout(entry));
        }

        let mut vision = TextChain::new(Capability::Vision, Arc::clone(&pools))
            .with_timeout(Duration::from_secs(timeouts.vision_secs));
        for entry in &providers.vision {
            vision.push_link(Arc::new(openai_provider(entry, &client)?), link_timeout(entry));
        }

        let mut enrichment = TextChain::new(Capability::TextGeneration, Arc::clone(&pools))
            .with_timeout(Duration::from_secs(timeouts.enrichment_secs));
        for entry in &providers.enrichment {
            enrichment.push_link(Arc::new(openai_provider(entry, &client)?), link_timeout(entry));
        }

        let mut embedding = EmbeddingChain::new(Capability::Embedding, Arc::clone(&pools))
            .with_timeout(Duration::from_secs(timeouts.embedding_secs));
        for entry in &providers.embedding {
            embedding.push_link(Arc::new(openai_provider(entry, &client)?), link_timeout(entry));
        }

        let mut speech = SpeechChain::new(Capability::Speech, Arc::clone(&pools))
            .with_timeout(Duration::from_secs(timeouts.speech_secs));
        for entry in &providers.speech {
            let mut provider = openai_provider(entry, &client)?;
            if let Some(voice) = &entry.voice {
                provider = provider.with_voice(voice.clone());
            }
            speech.push_link(Arc::new(provider), link_timeout(entry));
        }

        let mut image = ImageChain::new(Capability::ImageSynthesis, Arc::clone(&pools))
            .with_timeout(Duration::from_secs(timeouts.image_secs));
        for entry in &providers.image {
            match entry.kind {
                ProviderKind::HuggingFaceImage => {
                    let endpoint = entry.base_url.clone().ok_or_else(|| {
                        Error::Config(format!("image provider '{}' needs a base_url", entry.id))
                    })?;
                    let mut provider =
                        HuggingFaceImageProvider::new(&entry.id, endpoint).with_client(client.clone());
                    if let Some(pool) = &entry.pool {
                        provider = provider.with_pool(pool.clone());
                    }
                    image.push_link(Arc::new(provider), link_timeout(entry));
                }
                ProviderKind::PollinationsImage => {
                    image.push_link(
                        Arc::new(PollinationsImageProvider::new(&entry.id, entry.base_url.clone())),
                        link_timeout(entry),
                    );
                }
                ProviderKind::OpenAiCompatible => {
                    return Err(Error::Config(format!(
                        "provider '{}' cannot serve image synthesis",
                        entry.id
                    )));
                }
            }
        }

        let search = DuckDuckGoSearch::new(
            config.research.base_url.clone(),
            config.research.max_results,
            Duration::from_secs(timeouts.search_secs),
        )
        .with_client(client.clone());

        let github = GitHubClient::new(
            config.github.base_url.clone(),
            config.github.max_repos,
            Duration::from_secs(timeouts.search_secs),
        )
        .with_client(client);

        info!(
            "provider chains ready: text={}, vision={}, image={}, embedding={}, speech={}",
            text.provider_ids().len(),
            vision.provider_ids().len(),
            image.provider_ids().len(),
            embedding.provider_ids().len(),
            speech.provider_ids().len()
        );

        Ok(Self {
            text: Arc::new(text),
            vision: Arc::new(vision),
            embedding: Arc::new(embedding),
            image: Arc::new(image),
            speech: Arc::new(speech),
            enrichment: Arc::new(enrichment),
            search: Arc::new(search),
            github: Arc::new(github),
            pools,
        })
    }

    pub fn status(&self) -> Vec<ChainStatus> {
        vec![
            ChainStatus {
                capability: "text_generation",
                providers: self.text.provider_ids(),
            },
            ChainStatus {
                capability: "vision",
                providers: self.vision.provider_ids(),
            },
            ChainStatus {
                capability: "image_synthesis",
                providers: self.image.provider_ids(),
            },
            ChainStatus {
                capability: "embedding",
                providers: self.embedding.provider_ids(),
            },
            ChainStatus {
                capability: "speech",
                providers: self.speech.provider_ids(),
            },
            ChainStatus {
                capability: "enrichment",
                providers: self.enrichment.provider_ids(),
            },
        ]
    }
}

fn openai_provider(entry: &ProviderConfig, client: &Client) -> Result<OpenAiCompatibleProvider> {
    if entry.kind != ProviderKind::OpenAiCompatible {
        return Err(Error::Config(format!(
            "provider '{}' has kind {:?}, expected open_ai_compatible",
            entry.id, entry.kind
        )));
    }
    let model = entry
        .model
        .clone()
        .ok_or_else(|| Error::Config(format!("provider '{}' needs a model", entry.id)))?;
    let mut provider = OpenAiCompatibleProvider::new(&entry.id, entry.base_url.clone(), model)
        .with_client(client.clone());
    if let Some(pool) = &entry.pool {
        provider = provider.with_pool(pool.clone());
    }
    Ok(provider)
}

fn link_timeout(entry: &ProviderConfig) -> Option<Duration> {
    entry.timeout_secs.map(Duration::from_secs)
}

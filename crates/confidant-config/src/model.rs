use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Top-level application configuration. Every section is optional in the
/// file and falls back to its defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub gateway: GatewayConfig,
    pub assistant: AssistantConfig,
    pub database: DatabaseConfig,
    pub credentials: CredentialsConfig,
    pub providers: ProvidersConfig,
    pub timeouts: TimeoutConfig,
    pub memory: MemoryConfig,
    pub history: HistoryConfig,
    pub research: ResearchConfig,
    pub github: GithubConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub rate_limit: RateLimitConfig,
    /// Largest decoded attachment accepted by the chat endpoint.
    pub max_attachment_bytes: usize,
    /// Allowed CORS origins. Empty allows any origin.
    pub cors_origins: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3888,
            rate_limit: RateLimitConfig::default(),
            max_attachment_bytes: 10 * 1024 * 1024,
            cors_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub per_second: u64,
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_second: 1,
            burst_size: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    /// The assistant's own name. The user is never addressed by it.
    pub name: String,
    /// Inline default persona. Ignored when `persona_file` is set and readable.
    pub persona: Option<String>,
    pub persona_file: Option<PathBuf>,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            name: "Nova".to_string(),
            persona: None,
            persona_file: None,
        }
    }
}

impl AssistantConfig {
    /// The default persona used when a user has no custom instruction.
    pub fn persona_text(&self) -> String {
        match &self.persona {
            Some(persona) if !persona.trim().is_empty() => persona.clone(),
            _ => format!(
                "You are {}, a warm and witty personal assistant. Keep replies concise and \
                 friendly, use light markdown formatting, and answer in the same language the \
                 user writes in.",
                self.name
            ),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
}

impl DatabaseConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .map(|h| h.join(".confidant"))
                .unwrap_or_else(|| PathBuf::from(".confidant"))
                .join("confidant.db")
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Seconds a credential is skipped after a failed call. Zero disables
    /// cooldown and keeps selection uniform over the whole pool.
    pub cooldown_secs: u64,
    pub pools: BTreeMap<String, PoolConfig>,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        let mut pools = BTreeMap::new();
        for (name, pool_env, single_env) in [
            ("groq", "GROQ_API_KEY_POOL", "GROQ_API_KEY"),
            ("gemini", "GEMINI_API_KEY_POOL", "GEMINI_API_KEY"),
            ("openrouter", "OPENROUTER_API_KEY_POOL", "OPENROUTER_API_KEY"),
            ("huggingface", "HF_TOKEN_POOL", "HF_TOKEN"),
            ("openai", "OPENAI_API_KEY_POOL", "OPENAI_API_KEY"),
        ] {
            pools.insert(
                name.to_string(),
                PoolConfig {
                    keys: Vec::new(),
                    env: Some(pool_env.to_string()),
                    fallback_env: Some(single_env.to_string()),
                },
            );
        }
        Self {
            cooldown_secs: 0,
            pools,
        }
    }
}

/// One named credential pool. Keys come from the inline list plus the
/// comma-separated `env` variable; `fallback_env` is read only when both
/// are empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub keys: Vec<String>,
    pub env: Option<String>,
    pub fallback_env: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Any endpoint speaking the OpenAI chat/embeddings/speech wire format.
    OpenAiCompatible,
    HuggingFaceImage,
    PollinationsImage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub kind: ProviderKind,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// Credential pool name. `None` means the provider needs no credential.
    #[serde(default)]
    pub pool: Option<String>,
    /// Per-link timeout overriding the capability default.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub voice: Option<String>,
}

impl ProviderConfig {
    fn openai_compatible(id: &str, base_url: &str, model: &str, pool: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: ProviderKind::OpenAiCompatible,
            base_url: Some(base_url.to_string()),
            model: Some(model.to_string()),
            pool: Some(pool.to_string()),
            timeout_secs: None,
            voice: None,
        }
    }
}

const GROQ_BASE: &str = "https://api.groq.com/openai/v1";
const OPENROUTER_BASE: &str = "https://openrouter.ai/api/v1";
const GEMINI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/openai";

/// Ordered provider chains, one per capability. Order is fallback order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub text: Vec<ProviderConfig>,
    pub vision: Vec<ProviderConfig>,
    pub embedding: Vec<ProviderConfig>,
    pub image: Vec<ProviderConfig>,
    pub speech: Vec<ProviderConfig>,
    /// Text chain used to enrich image prompts before synthesis.
    pub enrichment: Vec<ProviderConfig>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            text: vec![
                ProviderConfig::openai_compatible(
                    "groq",
                    GROQ_BASE,
                    "llama-3.3-70b-versatile",
                    "groq",
                ),
                ProviderConfig::openai_compatible(
                    "openrouter",
                    OPENROUTER_BASE,
                    "meta-llama/llama-3.3-70b-instruct:free",
                    "openrouter",
                ),
                ProviderConfig::openai_compatible(
                    "gemini",
                    GEMINI_BASE,
                    "gemini-1.5-flash",
                    "gemini",
                ),
            ],
            vision: vec![
                ProviderConfig::openai_compatible(
                    "gemini-vision",
                    GEMINI_BASE,
                    "gemini-1.5-flash",
                    "gemini",
                ),
                ProviderConfig::openai_compatible(
                    "openrouter-vision",
                    OPENROUTER_BASE,
                    "meta-llama/llama-3.2-11b-vision-instruct:free",
                    "openrouter",
                ),
            ],
            embedding: vec![ProviderConfig::openai_compatible(
                "gemini-embedding",
                GEMINI_BASE,
                "text-embedding-004",
                "gemini",
            )],
            image: vec![
                ProviderConfig {
                    id: "flux".to_string(),
                    kind: ProviderKind::HuggingFaceImage,
                    base_url: Some(
                        "https://api-inference.huggingface.co/models/black-forest-labs/FLUX.1-dev"
                            .to_string(),
                    ),
                    model: None,
                    pool: Some("huggingface".to_string()),
                    timeout_secs: Some(25),
                    voice: None,
                },
                ProviderConfig {
                    id: "pollinations".to_string(),
                    kind: ProviderKind::PollinationsImage,
                    base_url: Some("https://image.pollinations.ai/prompt".to_string()),
                    model: None,
                    pool: None,
                    timeout_secs: None,
                    voice: None,
                },
            ],
            speech: vec![ProviderConfig {
                voice: Some("nova".to_string()),
                ..ProviderConfig::openai_compatible(
                    "openai-tts",
                    "https://api.openai.com/v1",
                    "tts-1",
                    "openai",
                )
            }],
            enrichment: vec![ProviderConfig::openai_compatible(
                "gemini-enrich",
                GEMINI_BASE,
                "gemini-1.5-flash",
                "gemini",
            )],
        }
    }
}

/// Capability-level timeouts in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub text_secs: u64,
    pub vision_secs: u64,
    pub image_secs: u64,
    pub embedding_secs: u64,
    pub speech_secs: u64,
    pub enrichment_secs: u64,
    pub search_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            text_secs: 30,
            vision_secs: 45,
            image_secs: 90,
            embedding_secs: 10,
            speech_secs: 20,
            enrichment_secs: 15,
            search_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub enabled: bool,
    /// Messages with at least this many words are considered for extraction
    /// even without a trigger phrase.
    pub min_words: usize,
    pub top_k: usize,
    pub recent_fallback: usize,
    pub extraction_timeout_secs: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_words: 4,
            top_k: 3,
            recent_fallback: 5,
            extraction_timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub chat_window: usize,
    pub persona_window: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            chat_window: 15,
            persona_window: 6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchConfig {
    pub base_url: String,
    pub max_results: usize,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.duckduckgo.com".to_string(),
            max_results: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GithubConfig {
    pub base_url: String,
    /// Recently updated repositories included in a profile review.
    pub max_repos: usize,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.github.com".to_string(),
            max_repos: 5,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive. `RUST_LOG` wins when set.
    pub filter: Option<String>,
    pub json: bool,
}

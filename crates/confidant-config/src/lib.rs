pub mod loader;
pub mod model;

pub use loader::{ConfigLoader, ConfigValidationError};
pub use model::{
    AppConfig, AssistantConfig, CredentialsConfig, DatabaseConfig, GatewayConfig, GithubConfig,
    HistoryConfig, LoggingConfig, MemoryConfig, PoolConfig, ProviderConfig, ProviderKind,
    ProvidersConfig, RateLimitConfig, ResearchConfig, TimeoutConfig,
};

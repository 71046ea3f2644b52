use std::path::{Path, PathBuf};

use confidant_common::{Error, Result};
use tracing::{debug, info, warn};

use crate::model::AppConfig;

/// Loads `AppConfig` from YAML or TOML files and the process environment.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from `path`, or from the first default location
    /// that exists. Missing files yield the built-in defaults.
    ///
    /// Default search order:
    /// 1. `./confidant.yml`
    /// 2. `./confidant.toml`
    /// 3. `~/.confidant/config.yml`
    pub fn load(path: Option<&Path>) -> Result<AppConfig> {
        match dotenvy::dotenv() {
            Ok(env_path) => debug!("loaded environment from {}", env_path.display()),
            Err(e) if e.not_found() => {}
            Err(e) => warn!("failed to read .env file: {e}"),
        }

        let path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => default_config_paths().into_iter().find(|p| p.is_file()),
        };

        let mut config = match path {
            Some(p) => {
                info!("loading config from {}", p.display());
                Self::load_file(&p)?
            }
            None => {
                info!("no config file found, using defaults");
                AppConfig::default()
            }
        };

        if let Some(persona_path) = config.assistant.persona_file.clone() {
            match std::fs::read_to_string(&persona_path) {
                Ok(text) if !text.trim().is_empty() => config.assistant.persona = Some(text),
                Ok(_) => warn!("persona file {} is empty", persona_path.display()),
                Err(e) => warn!(
                    "failed to read persona file {}: {e}",
                    persona_path.display()
                ),
            }
        }

        Self::validate(&config).map_err(|e| Error::Config(e.to_string()))?;
        Ok(config)
    }

    /// Parse a single file, choosing the format from its extension.
    pub fn load_file(path: &Path) -> Result<AppConfig> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read config {}: {e}", path.display()))
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::from_str(&raw).map_err(|e| {
                Error::Config(format!("invalid TOML in {}: {e}", path.display()))
            }),
            Some("yml") | Some("yaml") => serde_yaml::from_str(&raw).map_err(|e| {
                Error::Config(format!("invalid YAML in {}: {e}", path.display()))
            }),
            other => Err(Error::Config(format!(
                "unsupported config extension {other:?} for {}",
                path.display()
            ))),
        }
    }

    pub fn validate(config: &AppConfig) -> std::result::Result<(), ConfigValidationError> {
        if config.gateway.port == 0 {
            return Err(ConfigValidationError::InvalidPort);
        }

        if config.assistant.name.trim().is_empty() {
            return Err(ConfigValidationError::MissingAssistantName);
        }

        let chains = [
            ("text", &config.providers.text),
            ("vision", &config.providers.vision),
            ("embedding", &config.providers.embedding),
            ("image", &config.providers.image),
            ("speech", &config.providers.speech),
            ("enrichment", &config.providers.enrichment),
        ];
        for (chain, providers) in chains {
            for provider in providers {
                if provider.id.trim().is_empty() {
                    return Err(ConfigValidationError::EmptyProviderId(chain.to_string()));
                }
                if let Some(pool) = &provider.pool
                    && !config.credentials.pools.contains_key(pool)
                {
                    return Err(ConfigValidationError::UnknownPool {
                        provider: provider.id.clone(),
                        pool: pool.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigValidationError {
    #[error("gateway port must be greater than 0")]
    InvalidPort,

    #[error("assistant name must not be empty")]
    MissingAssistantName,

    #[error("provider in the {0} chain has an empty id")]
    EmptyProviderId(String),

    #[error("provider '{provider}' references unknown credential pool '{pool}'")]
    UnknownPool { provider: String, pool: String },
}

fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("confidant.yml"), PathBuf::from("confidant.toml")];
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".confidant").join("config.yml"));
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ProviderConfig, ProviderKind};
    use std::io::Write;

    fn write_temp(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(suffix)
            .tempfile()
            .expect("temp file");
        file.write_all(contents.as_bytes()).expect("write");
        file
    }

    #[test]
    fn loads_yaml_with_partial_sections() {
        let file = write_temp(
            ".yml",
            "gateway:\n  port: 9000\nassistant:\n  name: Mira\nmemory:\n  top_k: 5\n",
        );
        let config = ConfigLoader::load_file(file.path()).expect("yaml should parse");
        assert_eq!(config.gateway.port, 9000);
        assert_eq!(config.gateway.host, "127.0.0.1");
        assert_eq!(config.assistant.name, "Mira");
        assert_eq!(config.memory.top_k, 5);
        assert_eq!(config.memory.recent_fallback, 5);
    }

    #[test]
    fn loads_toml() {
        let file = write_temp(
            ".toml",
            "[credentials]\ncooldown_secs = 30\n\n[credentials.pools.groq]\nkeys = [\"a\", \"b\"]\n",
        );
        let config = ConfigLoader::load_file(file.path()).expect("toml should parse");
        assert_eq!(config.credentials.cooldown_secs, 30);
        assert_eq!(config.credentials.pools["groq"].keys, vec!["a", "b"]);
    }

    #[test]
    fn rejects_unknown_extension() {
        let file = write_temp(".ini", "port=1");
        let err = ConfigLoader::load_file(file.path()).expect_err("ini is unsupported");
        assert!(err.to_string().contains("unsupported config extension"));
    }

    #[test]
    fn validate_rejects_zero_port() {
        let mut config = AppConfig::default();
        config.gateway.port = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigValidationError::InvalidPort)
        ));
    }

    #[test]
    fn validate_rejects_unknown_pool() {
        let mut config = AppConfig::default();
        config.providers.text.push(ProviderConfig {
            id: "custom".to_string(),
            kind: ProviderKind::OpenAiCompatible,
            base_url: None,
            model: None,
            pool: Some("missing".to_string()),
            timeout_secs: None,
            voice: None,
        });
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigValidationError::UnknownPool { .. })
        ));
    }

    #[test]
    fn defaults_validate() {
        ConfigLoader::validate(&AppConfig::default()).expect("defaults should be valid");
    }

    #[test]
    fn persona_file_overrides_inline_persona() {
        let persona = write_temp(".md", "You are a calm librarian.");
        let config_file = write_temp(
            ".yml",
            &format!(
                "assistant:\n  persona: inline\n  persona_file: {}\n",
                persona.path().display()
            ),
        );
        let config = ConfigLoader::load(Some(config_file.path())).expect("load");
        assert_eq!(
            config.assistant.persona.as_deref(),
            Some("You are a calm librarian.")
        );
    }
}

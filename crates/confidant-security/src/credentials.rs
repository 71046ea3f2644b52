use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use confidant_config::{CredentialsConfig, PoolConfig};
use dashmap::DashMap;
use rand::seq::IndexedRandom;
use tracing::{debug, info, warn};

/// An opaque upstream credential. `Debug` and `Display` never print the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(Arc<str>);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(Arc::from(secret.into()))
    }

    /// The raw secret, for building upstream request headers.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential([REDACTED])")
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("no credential available in pool '{0}'")]
    Empty(String),
}

impl From<CredentialError> for confidant_common::Error {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::Empty(pool) => confidant_common::Error::CredentialMissing(pool),
        }
    }
}

/// Named pools of interchangeable credentials, resolved once at startup.
///
/// Selection is uniformly random within a pool. When a cooldown is
/// configured, credentials reported as failing are skipped until the
/// cooldown elapses, unless every credential in the pool is cooling.
pub struct CredentialPools {
    pools: HashMap<String, Vec<Credential>>,
    cooldown: Duration,
    cooling: DashMap<(String, usize), Instant>,
}

impl CredentialPools {
    pub fn from_map(pools: HashMap<String, Vec<String>>, cooldown: Duration) -> Self {
        let pools = pools
            .into_iter()
            .map(|(name, keys)| {
                let creds = keys
                    .into_iter()
                    .map(|k| k.trim().to_string())
                    .filter(|k| !k.is_empty())
                    .map(Credential::new)
                    .collect();
                (name, creds)
            })
            .collect();
        Self {
            pools,
            cooldown,
            cooling: DashMap::new(),
        }
    }

    /// Resolve every configured pool from inline keys and the environment.
    pub fn from_config(config: &CredentialsConfig) -> Self {
        Self::from_config_with(config, |name| std::env::var(name).ok())
    }

    /// Same as [`from_config`](Self::from_config) with an injectable
    /// environment lookup.
    pub fn from_config_with(
        config: &CredentialsConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let mut resolved = HashMap::new();
        for (name, pool) in &config.pools {
            let keys = resolve_pool_keys(pool, &lookup);
            if keys.is_empty() {
                warn!("credential pool '{name}' is empty; providers using it will be skipped");
            } else {
                info!("credential pool '{name}' loaded with {} key(s)", keys.len());
            }
            resolved.insert(name.clone(), keys);
        }

        Self::from_map(resolved, Duration::from_secs(config.cooldown_secs))
    }

    /// Pick one credential from `pool`.
    pub fn acquire(&self, pool: &str) -> Result<Credential, CredentialError> {
        let entries = self
            .pools
            .get(pool)
            .filter(|entries| !entries.is_empty())
            .ok_or_else(|| CredentialError::Empty(pool.to_string()))?;

        let mut rng = rand::rng();
        if self.cooldown.is_zero() {
            return entries
                .choose(&mut rng)
                .cloned()
                .ok_or_else(|| CredentialError::Empty(pool.to_string()));
        }

        let now = Instant::now();
        let ready: Vec<&Credential> = entries
            .iter()
            .enumerate()
            .filter(|(idx, _)| !self.is_cooling(pool, *idx, now))
            .map(|(_, cred)| cred)
            .collect();

        let picked = if ready.is_empty() {
            debug!("all credentials in pool '{pool}' are cooling; selecting from full pool");
            entries.choose(&mut rng).cloned()
        } else {
            ready.choose(&mut rng).map(|cred| (*cred).clone())
        };
        picked.ok_or_else(|| CredentialError::Empty(pool.to_string()))
    }

    /// Record a failed call made with `credential`. No-op when cooldown is disabled.
    pub fn report_failure(&self, pool: &str, credential: &Credential) {
        if self.cooldown.is_zero() {
            return;
        }
        let Some(entries) = self.pools.get(pool) else {
            return;
        };
        if let Some(idx) = entries.iter().position(|c| c == credential) {
            debug!("credential #{idx} in pool '{pool}' cooling for {:?}", self.cooldown);
            self.cooling
                .insert((pool.to_string(), idx), Instant::now() + self.cooldown);
        }
    }

    pub fn pool_size(&self, pool: &str) -> usize {
        self.pools.get(pool).map_or(0, Vec::len)
    }

    pub fn pool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pools.keys().cloned().collect();
        names.sort();
        names
    }

    fn is_cooling(&self, pool: &str, idx: usize, now: Instant) -> bool {
        let key = (pool.to_string(), idx);
        let expired = match self.cooling.get(&key) {
            Some(until) => *until <= now,
            None => return false,
        };
        if expired {
            self.cooling.remove(&key);
            return false;
        }
        true
    }
}

/// Split a comma-separated key list, trimming whitespace and dropping blanks.
/// Inline keys, then the pool's env list, then the single-key fallback when
/// nothing else produced a key. Blank entries are dropped.
fn resolve_pool_keys(pool: &PoolConfig, lookup: impl Fn(&str) -> Option<String>) -> Vec<String> {
    let mut keys: Vec<String> = pool
        .keys
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect();
    if let Some(raw) = pool.env.as_deref().and_then(&lookup) {
        keys.extend(parse_key_list(&raw));
    }
    if keys.is_empty()
        && let Some(single) = pool.fallback_env.as_deref().and_then(&lookup)
    {
        keys.extend(parse_key_list(&single));
    }
    keys
}

pub fn parse_key_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, HashSet};

    fn pools(entries: &[(&str, &[&str])], cooldown: Duration) -> CredentialPools {
        let map = entries
            .iter()
            .map(|(name, keys)| {
                (
                    name.to_string(),
                    keys.iter().map(|k| k.to_string()).collect(),
                )
            })
            .collect();
        CredentialPools::from_map(map, cooldown)
    }

    #[test]
    fn empty_pool_is_credential_missing() {
        let pools = pools(&[("groq", &[])], Duration::ZERO);
        let err = pools.acquire("groq").expect_err("empty pool");
        assert!(matches!(err, CredentialError::Empty(ref name) if name == "groq"));

        let err: confidant_common::Error = pools.acquire("unknown").unwrap_err().into();
        assert!(matches!(err, confidant_common::Error::CredentialMissing(_)));
    }

    #[test]
    fn every_credential_is_eventually_selected() {
        let pools = pools(&[("groq", &["k1", "k2", "k3"])], Duration::ZERO);
        let mut seen = HashSet::new();
        for _ in 0..1_000 {
            seen.insert(pools.acquire("groq").expect("acquire").expose().to_string());
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn debug_output_hides_secret() {
        let cred = Credential::new("gsk_super_secret_value");
        assert_eq!(format!("{cred:?}"), "Credential([REDACTED])");
        assert_eq!(cred.to_string(), "[REDACTED]");
    }

    #[test]
    fn cooled_credential_is_skipped() {
        let pools = pools(&[("gemini", &["good", "bad"])], Duration::from_secs(60));
        pools.report_failure("gemini", &Credential::new("bad"));
        for _ in 0..200 {
            assert_eq!(pools.acquire("gemini").expect("acquire").expose(), "good");
        }
    }

    #[test]
    fn fully_cooled_pool_still_serves() {
        let pools = pools(&[("gemini", &["a", "b"])], Duration::from_secs(60));
        pools.report_failure("gemini", &Credential::new("a"));
        pools.report_failure("gemini", &Credential::new("b"));
        assert!(pools.acquire("gemini").is_ok());
    }

    #[test]
    fn report_failure_without_cooldown_keeps_uniform_selection() {
        let pools = pools(&[("groq", &["a", "b"])], Duration::ZERO);
        pools.report_failure("groq", &Credential::new("a"));
        let mut seen = HashSet::new();
        for _ in 0..500 {
            seen.insert(pools.acquire("groq").expect("acquire").expose().to_string());
        }
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn parse_key_list_trims_and_drops_blanks() {
        assert_eq!(parse_key_list(" a, b ,,c ,"), vec!["a", "b", "c"]);
    }

    #[test]
    fn blank_inline_keys_are_dropped_before_counting() {
        let pool = PoolConfig {
            keys: vec!["".to_string(), "  k1 ".to_string(), "   ".to_string()],
            env: None,
            fallback_env: Some("SINGLE".to_string()),
        };
        assert_eq!(
            resolve_pool_keys(&pool, |_| Some("fallback".to_string())),
            vec!["k1"]
        );

        let blanks_only = PoolConfig {
            keys: vec!["".to_string(), " ".to_string()],
            env: None,
            fallback_env: Some("SINGLE".to_string()),
        };
        assert_eq!(
            resolve_pool_keys(&blanks_only, |_| Some("fallback".to_string())),
            vec!["fallback"]
        );
        assert!(resolve_pool_keys(&blanks_only, |_| None).is_empty());
    }

    #[test]
    fn from_config_reads_pool_env_then_single_fallback() {
        let mut config_pools = BTreeMap::new();
        config_pools.insert(
            "groq".to_string(),
            PoolConfig {
                keys: vec![],
                env: Some("GROQ_API_KEY_POOL".to_string()),
                fallback_env: Some("GROQ_API_KEY".to_string()),
            },
        );
        config_pools.insert(
            "gemini".to_string(),
            PoolConfig {
                keys: vec![],
                env: Some("GEMINI_API_KEY_POOL".to_string()),
                fallback_env: Some("GEMINI_API_KEY".to_string()),
            },
        );
        let config = CredentialsConfig {
            cooldown_secs: 0,
            pools: config_pools,
        };

        let pools = CredentialPools::from_config_with(&config, |name| match name {
            "GROQ_API_KEY_POOL" => Some("g1, g2".to_string()),
            "GROQ_API_KEY" => Some("ignored".to_string()),
            "GEMINI_API_KEY" => Some("single".to_string()),
            _ => None,
        });

        assert_eq!(pools.pool_size("groq"), 2);
        assert_eq!(pools.pool_size("gemini"), 1);
        assert_eq!(pools.acquire("gemini").expect("acquire").expose(), "single");
        assert_eq!(pools.pool_names(), vec!["gemini", "groq"]);
    }
}

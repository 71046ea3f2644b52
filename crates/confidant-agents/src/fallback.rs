use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use confidant_common::{Error, Result};
use confidant_security::CredentialPools;
use tracing::{info, instrument, warn};

use crate::providers::{Capability, CapabilityProvider};

/// One provider in a chain, with an optional timeout overriding the
/// capability default.
pub struct ChainLink<Req, Resp> {
    provider: Arc<dyn CapabilityProvider<Req, Resp>>,
    timeout: Option<Duration>,
}

/// Ordered providers for one capability, tried sequentially until one
/// returns a well-formed result.
pub struct FallbackChain<Req, Resp> {
    capability: Capability,
    links: Vec<ChainLink<Req, Resp>>,
    pools: Arc<CredentialPools>,
    timeout: Duration,
}

/// Why a single attempt did not produce a result.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureReason {
    CredentialMissing { pool: String },
    Timeout(Duration),
    Status(u16),
    Unavailable(String),
}

impl FailureReason {
    fn from_error(err: &Error) -> Self {
        match err {
            Error::CredentialMissing(pool) => Self::CredentialMissing { pool: pool.clone() },
            Error::Timeout(limit) => Self::Timeout(*limit),
            Error::UpstreamStatus { status, .. } => Self::Status(*status),
            other => Self::Unavailable(other.to_string()),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CredentialMissing { pool } => write!(f, "no credential in pool '{pool}'"),
            Self::Timeout(limit) => write!(f, "timed out after {limit:?}"),
            Self::Status(status) => write!(f, "upstream status {status}"),
            Self::Unavailable(reason) => f.write_str(reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttemptFailure {
    pub provider_id: String,
    pub reason: FailureReason,
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.provider_id, self.reason)
    }
}

/// Result of running a chain. Exhaustion is a value, not an error.
#[derive(Debug)]
pub enum FallbackOutcome<T> {
    Served {
        provider_id: String,
        value: T,
        /// Attempts that failed before the serving provider.
        failures: Vec<AttemptFailure>,
    },
    Exhausted {
        failures: Vec<AttemptFailure>,
    },
}

impl<T> FallbackOutcome<T> {
    pub fn served_by(&self) -> Option<&str> {
        match self {
            Self::Served { provider_id, .. } => Some(provider_id),
            Self::Exhausted { .. } => None,
        }
    }

    pub fn failures(&self) -> &[AttemptFailure] {
        match self {
            Self::Served { failures, .. } | Self::Exhausted { failures } => failures,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Served { value, .. } => Some(value),
            Self::Exhausted { .. } => None,
        }
    }

    /// Convert exhaustion into `Error::ProviderUnavailable` listing every attempt.
    pub fn into_result(self) -> Result<T> {
        match self {
            Self::Served { value, .. } => Ok(value),
            Self::Exhausted { failures } => Err(Error::ProviderUnavailable(summarize(&failures))),
        }
    }
}

impl<Req, Resp> FallbackChain<Req, Resp>
where
    Req: Send + Sync + 'static,
    Resp: Send + 'static,
{
    pub fn new(capability: Capability, pools: Arc<CredentialPools>) -> Self {
        Self {
            capability,
            links: Vec::new(),
            pools,
            timeout: capability.default_timeout(),
        }
    }

    /// Replace the capability-level timeout applied to links without their own.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_link(
        mut self,
        provider: Arc<dyn CapabilityProvider<Req, Resp>>,
        timeout: Option<Duration>,
    ) -> Self {
        self.push_link(provider, timeout);
        self
    }

    pub fn push_link(
        &mut self,
        provider: Arc<dyn CapabilityProvider<Req, Resp>>,
        timeout: Option<Duration>,
    ) {
        info!(
            "registered {} provider: {}",
            self.capability.as_str(),
            provider.provider_id()
        );
        self.links.push(ChainLink { provider, timeout });
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    pub fn provider_ids(&self) -> Vec<String> {
        self.links
            .iter()
            .map(|link| link.provider.provider_id().to_string())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Try each provider in order. A provider is skipped when its credential
    /// pool is empty; an attempt fails on timeout or any upstream error.
    #[instrument(skip_all, fields(capability = self.capability.as_str()))]
    pub async fn execute(&self, request: &Req) -> FallbackOutcome<Resp> {
        let mut failures = Vec::new();

        for link in &self.links {
            let provider_id = link.provider.provider_id().to_string();

            let credential = match link.provider.credential_pool() {
                Some(pool) => match self.pools.acquire(pool) {
                    Ok(credential) => Some(credential),
                    Err(err) => {
                        warn!("skipping provider '{}': {}", provider_id, err);
                        failures.push(AttemptFailure {
                            provider_id,
                            reason: FailureReason::CredentialMissing {
                                pool: pool.to_string(),
                            },
                        });
                        continue;
                    }
                },
                None => None,
            };

            let limit = link.timeout.unwrap_or(self.timeout);
            let attempt =
                tokio::time::timeout(limit, link.provider.invoke(credential.as_ref(), request))
                    .await;

            let reason = match attempt {
                Ok(Ok(value)) => {
                    if !failures.is_empty() {
                        info!(
                            "using fallback provider '{}' after {} failed attempt(s)",
                            provider_id,
                            failures.len()
                        );
                    }
                    return FallbackOutcome::Served {
                        provider_id,
                        value,
                        failures,
                    };
                }
                Ok(Err(err)) => FailureReason::from_error(&err),
                Err(_) => FailureReason::Timeout(limit),
            };

            if let (Some(pool), Some(credential)) =
                (link.provider.credential_pool(), credential.as_ref())
            {
                self.pools.report_failure(pool, credential);
            }
            warn!("provider '{}' failed ({}); trying next", provider_id, reason);
            failures.push(AttemptFailure {
                provider_id,
                reason,
            });
        }

        warn!(
            "all {} provider(s) exhausted: {}",
            self.capability.as_str(),
            summarize(&failures)
        );
        FallbackOutcome::Exhausted { failures }
    }
}

fn summarize(failures: &[AttemptFailure]) -> String {
    if failures.is_empty() {
        return "no providers configured".to_string();
    }
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{ContentBlock, LlmRequest, LlmResponse};
    use async_trait::async_trait;
    use confidant_security::Credential;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticMockProvider {
        id: &'static str,
        pool: Option<&'static str>,
        fail_with: Option<Error>,
        delay: Option<Duration>,
        output: &'static str,
        calls: Arc<AtomicUsize>,
    }

    impl StaticMockProvider {
        fn ok(id: &'static str, output: &'static str) -> Self {
            Self {
                id,
                pool: None,
                fail_with: None,
                delay: None,
                output,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn failing(id: &'static str, err: Error) -> Self {
            Self {
                fail_with: Some(err),
                ..Self::ok(id, "")
            }
        }
    }

    #[async_trait]
    impl CapabilityProvider<LlmRequest, LlmResponse> for StaticMockProvider {
        fn provider_id(&self) -> &str {
            self.id
        }

        fn credential_pool(&self) -> Option<&str> {
            self.pool
        }

        async fn invoke(
            &self,
            _credential: Option<&Credential>,
            _request: &LlmRequest,
        ) -> Result<LlmResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(err) = &self.fail_with {
                return Err(match err {
                    Error::UpstreamStatus { status, body } => Error::UpstreamStatus {
                        status: *status,
                        body: body.clone(),
                    },
                    other => Error::ProviderUnavailable(other.to_string()),
                });
            }
            Ok(LlmResponse {
                content: vec![ContentBlock::Text {
                    text: self.output.to_string(),
                }],
                model: self.id.to_string(),
                usage: None,
                stop_reason: Some("stop".to_string()),
            })
        }
    }

    type Chain = FallbackChain<LlmRequest, LlmResponse>;

    fn pools(entries: &[(&str, &[&str])]) -> Arc<CredentialPools> {
        let map: HashMap<String, Vec<String>> = entries
            .iter()
            .map(|(name, keys)| {
                (
                    name.to_string(),
                    keys.iter().map(|k| k.to_string()).collect(),
                )
            })
            .collect();
        Arc::new(CredentialPools::from_map(map, Duration::ZERO))
    }

    fn request() -> LlmRequest {
        LlmRequest::single_turn(None, "hello")
    }

    #[tokio::test]
    async fn uses_fallback_provider_when_primary_fails() {
        let primary = StaticMockProvider::failing(
            "primary",
            Error::UpstreamStatus {
                status: 500,
                body: "internal error".to_string(),
            },
        );
        let backup = StaticMockProvider::ok("backup", "fallback answer");
        let primary_calls = Arc::clone(&primary.calls);
        let backup_calls = Arc::clone(&backup.calls);

        let chain = Chain::new(Capability::TextGeneration, pools(&[]))
            .with_link(Arc::new(primary), None)
            .with_link(Arc::new(backup), None);

        let outcome = chain.execute(&request()).await;
        assert_eq!(outcome.served_by(), Some("backup"));
        assert_eq!(
            outcome.failures(),
            &[AttemptFailure {
                provider_id: "primary".to_string(),
                reason: FailureReason::Status(500),
            }]
        );
        assert_eq!(
            outcome.into_value().expect("served").text(),
            "fallback answer"
        );
        assert_eq!(primary_calls.load(Ordering::SeqCst), 1);
        assert_eq!(backup_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn client_errors_also_fall_back() {
        let chain = Chain::new(Capability::TextGeneration, pools(&[]))
            .with_link(
                Arc::new(StaticMockProvider::failing(
                    "primary",
                    Error::UpstreamStatus {
                        status: 401,
                        body: "bad key".to_string(),
                    },
                )),
                None,
            )
            .with_link(Arc::new(StaticMockProvider::ok("backup", "ok")), None);

        assert_eq!(chain.execute(&request()).await.served_by(), Some("backup"));
    }

    #[tokio::test]
    async fn empty_pool_skips_provider_without_calling_it() {
        let mut primary = StaticMockProvider::ok("groq", "never");
        primary.pool = Some("groq");
        let primary_calls = Arc::clone(&primary.calls);

        let chain = Chain::new(Capability::TextGeneration, pools(&[("groq", &[])]))
            .with_link(Arc::new(primary), None)
            .with_link(Arc::new(StaticMockProvider::ok("backup", "ok")), None);

        let outcome = chain.execute(&request()).await;
        assert_eq!(outcome.served_by(), Some("backup"));
        assert_eq!(
            outcome.failures()[0].reason,
            FailureReason::CredentialMissing {
                pool: "groq".to_string()
            }
        );
        assert_eq!(primary_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn slow_provider_times_out_and_falls_back() {
        let mut slow = StaticMockProvider::ok("slow", "late");
        slow.delay = Some(Duration::from_secs(5));

        let chain = Chain::new(Capability::TextGeneration, pools(&[]))
            .with_link(Arc::new(slow), Some(Duration::from_millis(20)))
            .with_link(Arc::new(StaticMockProvider::ok("fast", "on time")), None);

        let outcome = chain.execute(&request()).await;
        assert_eq!(outcome.served_by(), Some("fast"));
        assert_eq!(
            outcome.failures()[0].reason,
            FailureReason::Timeout(Duration::from_millis(20))
        );
    }

    #[tokio::test]
    async fn exhaustion_is_a_value_listing_every_attempt() {
        let chain = Chain::new(Capability::TextGeneration, pools(&[]))
            .with_link(
                Arc::new(StaticMockProvider::failing(
                    "primary",
                    Error::UpstreamStatus {
                        status: 500,
                        body: String::new(),
                    },
                )),
                None,
            )
            .with_link(
                Arc::new(StaticMockProvider::failing(
                    "backup",
                    Error::UpstreamStatus {
                        status: 503,
                        body: String::new(),
                    },
                )),
                None,
            );

        let outcome = chain.execute(&request()).await;
        assert!(outcome.served_by().is_none());
        assert_eq!(outcome.failures().len(), 2);

        let err = outcome.into_result().expect_err("exhausted");
        let message = err.to_string();
        assert!(message.contains("primary: upstream status 500"), "{message}");
        assert!(message.contains("backup: upstream status 503"), "{message}");
    }

    #[tokio::test]
    async fn empty_chain_is_exhausted() {
        let chain = Chain::new(Capability::TextGeneration, pools(&[]));
        assert!(chain.is_empty());
        let outcome = chain.execute(&request()).await;
        assert!(matches!(outcome, FallbackOutcome::Exhausted { ref failures } if failures.is_empty()));
    }

    #[test]
    fn provider_ids_follow_link_order() {
        let chain = Chain::new(Capability::TextGeneration, pools(&[]))
            .with_link(Arc::new(StaticMockProvider::ok("a", "")), None)
            .with_link(Arc::new(StaticMockProvider::ok("b", "")), None);
        assert_eq!(chain.provider_ids(), vec!["a", "b"]);
    }
}

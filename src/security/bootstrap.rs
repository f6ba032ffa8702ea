use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::{SecretKeys, VaultSettings};

/// Startup failures. Any of these keeps the service from listening.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("secret retrieval failed after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },

    #[error("required secret '{0}' is missing or empty")]
    MissingField(String),

    #[error("{0} is not set and insecure defaults are rejected")]
    InsecureDefault(&'static str),

    #[error("secret client setup failed: {0}")]
    Client(String),

    #[error("bootstrap task aborted: {0}")]
    Task(String),
}

/// A remote key/value secret endpoint.
#[async_trait]
pub trait SecretSource: Send + Sync {
    async fn fetch(&self) -> Result<HashMap<String, String>>;

    fn describe(&self) -> String;
}

/// Fixed-delay retry bound for the startup fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(3),
        }
    }
}

impl From<&VaultSettings> for RetryPolicy {
    fn from(settings: &VaultSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            delay: settings.retry_delay(),
        }
    }
}

/// Signing material for bearer tokens. Fields are private and only readable.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretBundle {
    signing_key: Vec<u8>,
    issuer: String,
    audience: String,
}

impl SecretBundle {
    pub fn new(
        signing_key: impl Into<Vec<u8>>,
        issuer: impl Into<String>,
        audience: impl Into<String>,
    ) -> Result<Self, BootstrapError> {
        let signing_key = signing_key.into();
        let issuer = issuer.into();
        let audience = audience.into();

        if signing_key.is_empty() {
            return Err(BootstrapError::MissingField("signing key".to_string()));
        }
        if issuer.trim().is_empty() {
            return Err(BootstrapError::MissingField("issuer".to_string()));
        }
        if audience.trim().is_empty() {
            return Err(BootstrapError::MissingField("audience".to_string()));
        }

        Ok(Self {
            signing_key,
            issuer,
            audience,
        })
    }

    pub fn signing_key(&self) -> &[u8] {
        &self.signing_key
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn audience(&self) -> &str {
        &self.audience
    }
}

impl fmt::Debug for SecretBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretBundle")
            .field("signing_key", &format_args!("<{} bytes>", self.signing_key.len()))
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .finish()
    }
}

/// Everything the service needs out of the secret store.
#[derive(Debug, Clone)]
pub struct BootstrapSecrets {
    pub bundle: SecretBundle,
    /// Forwarded unmodified to the directory adapter
    pub connection_string: String,
}

impl BootstrapSecrets {
    pub fn from_map(
        map: &HashMap<String, String>,
        keys: &SecretKeys,
    ) -> Result<Self, BootstrapError> {
        let required = |key: &str| -> Result<String, BootstrapError> {
            map.get(key)
                .filter(|v| !v.trim().is_empty())
                .cloned()
                .ok_or_else(|| BootstrapError::MissingField(key.to_string()))
        };

        let signing_key = required(&keys.signing_key)?;
        let issuer = required(&keys.issuer)?;
        let audience = required(&keys.audience)?;
        let connection_string = required(&keys.connection_string)?;

        Ok(Self {
            bundle: SecretBundle::new(signing_key.into_bytes(), issuer, audience)?,
            connection_string,
        })
    }
}

/// Call `source.fetch()` until it succeeds or `policy.max_attempts` is reached,
/// sleeping `policy.delay` between failures.
pub async fn fetch_with_retry<S>(
    source: &S,
    policy: RetryPolicy,
) -> Result<HashMap<String, String>, BootstrapError>
where
    S: SecretSource + ?Sized,
{
    let max = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match source.fetch().await {
            Ok(map) => {
                info!(attempt, source = %source.describe(), "secrets retrieved");
                return Ok(map);
            }
            Err(e) if attempt >= max => {
                error!(attempt, max, error = %e, "secret retrieval failed, giving up");
                return Err(BootstrapError::Exhausted {
                    attempts: attempt,
                    last_error: format!("{e:#}"),
                });
            }
            Err(e) => {
                warn!(
                    attempt,
                    max,
                    retry_in_secs = policy.delay.as_secs_f64(),
                    error = %e,
                    "secret store not ready, retrying"
                );
                tokio::time::sleep(policy.delay).await;
            }
        }
    }
}

/// Resolves [`BootstrapSecrets`] once, before the service starts listening.
pub struct SecretBootstrapper {
    source: Arc<dyn SecretSource>,
    policy: RetryPolicy,
    keys: SecretKeys,
}

impl SecretBootstrapper {
    pub fn new(source: Arc<dyn SecretSource>, policy: RetryPolicy, keys: SecretKeys) -> Self {
        Self {
            source,
            policy,
            keys,
        }
    }

    /// Runs the retry loop on a dedicated task and waits for it.
    pub async fn fetch_secrets(&self) -> Result<BootstrapSecrets, BootstrapError> {
        let source = Arc::clone(&self.source);
        let policy = self.policy;

        let map = tokio::spawn(async move { fetch_with_retry(source.as_ref(), policy).await })
            .await
            .map_err(|e| BootstrapError::Task(e.to_string()))??;

        let secrets = BootstrapSecrets::from_map(&map, &self.keys)?;
        info!(
            issuer = %secrets.bundle.issuer(),
            audience = %secrets.bundle.audience(),
            "signing configuration loaded"
        );
        Ok(secrets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` calls, then returns `payload`.
    struct FlakySource {
        failures: u32,
        calls: AtomicU32,
        payload: HashMap<String, String>,
    }

    impl FlakySource {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
                payload: full_payload(),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SecretSource for FlakySource {
        async fn fetch(&self) -> Result<HashMap<String, String>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.failures {
                anyhow::bail!("connection refused (call {n})");
            }
            Ok(self.payload.clone())
        }

        fn describe(&self) -> String {
            "flaky test source".to_string()
        }
    }

    fn full_payload() -> HashMap<String, String> {
        HashMap::from([
            ("Jwt__Secret".to_string(), "a-very-secret-signing-key".to_string()),
            ("Jwt__Issuer".to_string(), "auth-service".to_string()),
            ("Jwt__Audience".to_string(), "user-service".to_string()),
            (
                "ConnectionStrings__MongoDb".to_string(),
                "memory://users".to_string(),
            ),
        ])
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let source = FlakySource::new(4);
        let map = fetch_with_retry(&source, fast_policy()).await.unwrap();
        assert_eq!(source.calls(), 5);
        assert_eq!(map["Jwt__Issuer"], "auth-service");
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts_without_sixth_call() {
        let source = FlakySource::new(u32::MAX);
        let err = fetch_with_retry(&source, fast_policy()).await.unwrap_err();

        assert_eq!(source.calls(), 5);
        match err {
            BootstrapError::Exhausted {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 5);
                assert!(last_error.contains("call 5"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn waits_fixed_delay_between_attempts() {
        let source = FlakySource::new(2);
        let started = tokio::time::Instant::now();

        fetch_with_retry(&source, RetryPolicy::default()).await.unwrap();

        assert_eq!(source.calls(), 3);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(6) && elapsed < Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_sleeps_only_between_attempts() {
        let source = FlakySource::new(u32::MAX);
        let started = tokio::time::Instant::now();

        let _ = fetch_with_retry(&source, RetryPolicy::default()).await;

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(12) && elapsed < Duration::from_secs(13));
    }

    #[tokio::test]
    async fn bootstrapper_extracts_bundle() {
        let bootstrapper = SecretBootstrapper::new(
            Arc::new(FlakySource::new(1)),
            fast_policy(),
            SecretKeys::default(),
        );

        let secrets = bootstrapper.fetch_secrets().await.unwrap();
        assert_eq!(secrets.bundle.signing_key(), b"a-very-secret-signing-key");
        assert_eq!(secrets.bundle.issuer(), "auth-service");
        assert_eq!(secrets.bundle.audience(), "user-service");
        assert_eq!(secrets.connection_string, "memory://users");
    }

    #[tokio::test]
    async fn empty_signing_key_is_fatal_without_retry() {
        let mut source = FlakySource::new(0);
        source
            .payload
            .insert("Jwt__Secret".to_string(), String::new());
        let source = Arc::new(source);

        let bootstrapper =
            SecretBootstrapper::new(source.clone(), fast_policy(), SecretKeys::default());
        let err = bootstrapper.fetch_secrets().await.unwrap_err();

        assert!(matches!(err, BootstrapError::MissingField(ref k) if k == "Jwt__Secret"));
        assert_eq!(source.calls(), 1);
    }

    #[test]
    fn bundle_rejects_empty_fields() {
        assert!(SecretBundle::new(Vec::new(), "iss", "aud").is_err());
        assert!(SecretBundle::new(b"key".to_vec(), " ", "aud").is_err());
        assert!(SecretBundle::new(b"key".to_vec(), "iss", "").is_err());
        assert!(SecretBundle::new(b"key".to_vec(), "iss", "aud").is_ok());
    }

    #[test]
    fn bundle_debug_hides_key() {
        let bundle = SecretBundle::new(b"topsecret".to_vec(), "iss", "aud").unwrap();
        let rendered = format!("{bundle:?}");
        assert!(!rendered.contains("topsecret"));
        assert!(rendered.contains("9 bytes"));
    }
}

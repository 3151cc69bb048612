//! Credential authorization.
//!
//! The service trusts one shared API secret, fetched once from a
//! [`SecretStore`] and cached for the process lifetime.  A request
//! credential takes one of two shapes:
//!
//!   `{owner_id}:{secret}`  -- owner-scoped; may only act on that owner
//!   `{secret}`             -- admin; may act on any owner
//!
//! Secret comparison is constant-time.  A fetched secret may be a bare
//! string or a JSON document with an `api_token` field; the latter is
//! unwrapped transparently.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::config::AuthConfig;
use crate::errors::ServiceError;

// ── Secret stores ───────────────────────────────────────────────────

/// Source of the shared API secret.
pub trait SecretStore: Send + Sync + 'static {
    /// Fetch the secret material. Called at most a handful of times
    /// per process; failures are not cached.
    fn fetch(&self) -> Pin<Box<dyn Future<Output = Result<String, ServiceError>> + Send + '_>>;
}

/// Secret given inline in configuration.
pub struct StaticSecretStore {
    token: String,
}

impl StaticSecretStore {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl SecretStore for StaticSecretStore {
    fn fetch(&self) -> Pin<Box<dyn Future<Output = Result<String, ServiceError>> + Send + '_>> {
        Box::pin(async move { Ok(self.token.clone()) })
    }
}

/// Secret read from an environment variable.
pub struct EnvSecretStore {
    var: String,
}

impl EnvSecretStore {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl SecretStore for EnvSecretStore {
    fn fetch(&self) -> Pin<Box<dyn Future<Output = Result<String, ServiceError>> + Send + '_>> {
        Box::pin(async move {
            std::env::var(&self.var).map_err(|_| ServiceError::SecretUnavailable {
                message: format!("environment variable {} is not set", self.var),
            })
        })
    }
}

/// Secret read from a file (e.g. a mounted Kubernetes secret).
pub struct FileSecretStore {
    path: String,
}

impl FileSecretStore {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

impl SecretStore for FileSecretStore {
    fn fetch(&self) -> Pin<Box<dyn Future<Output = Result<String, ServiceError>> + Send + '_>> {
        Box::pin(async move {
            let contents = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
                ServiceError::SecretUnavailable {
                    message: format!("cannot read secret file {}: {e}", self.path),
                }
            })?;
            Ok(contents.trim_end().to_string())
        })
    }
}

/// Build a secret store from the `auth` config section.
pub fn secret_store_from_config(cfg: &AuthConfig) -> anyhow::Result<Arc<dyn SecretStore>> {
    match cfg.secret_backend.as_str() {
        "static" => Ok(Arc::new(StaticSecretStore::new(cfg.token.clone()))),
        "env" => Ok(Arc::new(EnvSecretStore::new(cfg.env_var.clone()))),
        "file" => Ok(Arc::new(FileSecretStore::new(cfg.file.clone()))),
        other => anyhow::bail!("unknown secret backend: {other}"),
    }
}

/// Unwrap secret material that may be a JSON document with an
/// `api_token` field; otherwise the raw value is the token.
fn extract_api_token(raw: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) {
        if let Some(token) = value.get("api_token").and_then(|t| t.as_str()) {
            return token.to_string();
        }
    }
    raw.to_string()
}

// ── Token cache ─────────────────────────────────────────────────────

/// Process-lifetime cache around a [`SecretStore`].
///
/// The first authorization triggers the fetch; concurrent callers wait
/// on the same in-flight fetch rather than issuing their own.  A failed
/// fetch is not cached, so the next request retries.
pub struct TokenCache {
    store: Arc<dyn SecretStore>,
    fetch_timeout: Duration,
    cell: OnceCell<String>,
}

impl TokenCache {
    pub fn new(store: Arc<dyn SecretStore>, fetch_timeout: Duration) -> Self {
        Self {
            store,
            fetch_timeout,
            cell: OnceCell::new(),
        }
    }

    /// Return the cached token, fetching it on first use.
    pub async fn get_token(&self) -> Result<&str, ServiceError> {
        let token = self
            .cell
            .get_or_try_init(|| async {
                debug!("fetching API secret");
                let raw = tokio::time::timeout(self.fetch_timeout, self.store.fetch())
                    .await
                    .map_err(|_| ServiceError::SecretUnavailable {
                        message: "secret fetch timed out".to_string(),
                    })??;
                Ok::<String, ServiceError>(extract_api_token(&raw))
            })
            .await?;
        Ok(token.as_str())
    }
}

// ── Authorization gate ──────────────────────────────────────────────

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Validates request credentials against the cached API secret.
pub struct AuthorizationGate {
    cache: TokenCache,
}

impl AuthorizationGate {
    pub fn new(cache: TokenCache) -> Self {
        Self { cache }
    }

    /// Authorize `credential` to act on behalf of `owner_id`.
    ///
    /// `{owner}:{secret}` credentials must both match the secret and
    /// name the requested owner; a bare `{secret}` is the admin form
    /// and passes for any owner.
    pub async fn authorize(&self, credential: &str, owner_id: &str) -> Result<(), ServiceError> {
        if credential.is_empty() {
            return Err(ServiceError::unauthorized("missing credentials"));
        }
        let token = self.cache.get_token().await?;

        match credential.split_once(':') {
            Some((cred_owner, secret)) => {
                // Compare the secret first so the owner check does not
                // short-circuit around it.
                let secret_ok = constant_time_eq(secret, token);
                if !secret_ok || cred_owner != owner_id {
                    return Err(ServiceError::unauthorized("invalid credentials"));
                }
                Ok(())
            }
            None => {
                if constant_time_eq(credential, token) {
                    Ok(())
                } else {
                    Err(ServiceError::unauthorized("invalid credentials"))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn gate(token: &str) -> AuthorizationGate {
        let store = Arc::new(StaticSecretStore::new(token));
        AuthorizationGate::new(TokenCache::new(store, Duration::from_secs(1)))
    }

    #[tokio::test]
    async fn test_owner_scoped_credential() {
        let gate = gate("s3cret");
        gate.authorize("u1:s3cret", "u1").await.unwrap();
    }

    #[tokio::test]
    async fn test_owner_mismatch_rejected() {
        let gate = gate("s3cret");
        let err = gate.authorize("u1:s3cret", "u2").await.unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized { .. }));
    }

    #[tokio::test]
    async fn test_wrong_secret_rejected() {
        let gate = gate("s3cret");
        assert!(gate.authorize("u1:wrong", "u1").await.is_err());
        assert!(gate.authorize("wrong", "u1").await.is_err());
        assert!(gate.authorize("", "u1").await.is_err());
    }

    #[tokio::test]
    async fn test_bare_secret_is_admin() {
        let gate = gate("s3cret");
        gate.authorize("s3cret", "u1").await.unwrap();
        gate.authorize("s3cret", "u2").await.unwrap();
    }

    #[tokio::test]
    async fn test_json_wrapped_secret() {
        let gate = gate(r#"{"api_token": "s3cret"}"#);
        gate.authorize("u1:s3cret", "u1").await.unwrap();
        // The raw JSON document itself is not the token.
        assert!(gate
            .authorize(r#"{"api_token": "s3cret"}"#, "u1")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_file_secret_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "from-file\n").unwrap();

        let store = FileSecretStore::new(path.to_str().unwrap());
        let token = store.fetch().await.unwrap();
        assert_eq!(token, "from-file");
    }

    #[tokio::test]
    async fn test_missing_env_var_is_secret_unavailable() {
        let store = EnvSecretStore::new("IMAGEVAULT_TEST_DOES_NOT_EXIST");
        let err = store.fetch().await.unwrap_err();
        assert!(matches!(err, ServiceError::SecretUnavailable { .. }));
    }

    struct CountingStore {
        calls: AtomicU32,
    }

    impl SecretStore for CountingStore {
        fn fetch(
            &self,
        ) -> Pin<Box<dyn Future<Output = Result<String, ServiceError>> + Send + '_>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok("s3cret".to_string())
            })
        }
    }

    #[tokio::test]
    async fn test_secret_fetched_once() {
        let store = Arc::new(CountingStore {
            calls: AtomicU32::new(0),
        });
        let cache = TokenCache::new(store.clone(), Duration::from_secs(1));
        for _ in 0..5 {
            assert_eq!(cache.get_token().await.unwrap(), "s3cret");
        }
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }

    struct FlakyStore {
        calls: AtomicU32,
    }

    impl SecretStore for FlakyStore {
        fn fetch(
            &self,
        ) -> Pin<Box<dyn Future<Output = Result<String, ServiceError>> + Send + '_>> {
            Box::pin(async move {
                let n = self.calls.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    Err(ServiceError::SecretUnavailable {
                        message: "transient".to_string(),
                    })
                } else {
                    Ok("s3cret".to_string())
                }
            })
        }
    }

    #[tokio::test]
    async fn test_failed_fetch_is_not_cached() {
        let store = Arc::new(FlakyStore {
            calls: AtomicU32::new(0),
        });
        let cache = TokenCache::new(store, Duration::from_secs(1));
        assert!(cache.get_token().await.is_err());
        assert_eq!(cache.get_token().await.unwrap(), "s3cret");
    }

    struct SlowStore;

    impl SecretStore for SlowStore {
        fn fetch(
            &self,
        ) -> Pin<Box<dyn Future<Output = Result<String, ServiceError>> + Send + '_>> {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok("never".to_string())
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_fetch_times_out() {
        let cache = TokenCache::new(Arc::new(SlowStore), Duration::from_millis(50));
        let err = cache.get_token().await.unwrap_err();
        assert!(matches!(err, ServiceError::SecretUnavailable { .. }));
    }

    #[test]
    fn test_extract_api_token() {
        assert_eq!(extract_api_token("plain"), "plain");
        assert_eq!(extract_api_token(r#"{"api_token": "t"}"#), "t");
        assert_eq!(extract_api_token(r#"{"other": "t"}"#), r#"{"other": "t"}"#);
        assert_eq!(extract_api_token("{not json"), "{not json");
    }
}

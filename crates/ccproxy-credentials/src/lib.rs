//! Multi-provider OAuth token cache.
//!
//! Tokens are produced by external sources (a shell command or a file) and
//! cached with a monotonic load timestamp. One `RwLock` covers both the
//! token map and the user-agent map, so readers always see a token paired
//! with its own timestamp. Refreshes serialize on a separate async mutex
//! held across source execution: concurrent 401 handlers collapse into a
//! single re-read.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use ccproxy_config::{CcproxyConfig, ConfigResult, OAuthSource, SourceKind};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Hard timeout for shell sources.
const SOURCE_TIMEOUT: Duration = Duration::from_secs(5);

/// How often the background loop re-checks token expiry.
const REFRESH_CHECK_INTERVAL: Duration = Duration::from_secs(1800);

pub type CredentialResult<T> = Result<T, CredentialError>;

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("all {count} oauth source(s) failed to load: {failures:?}")]
    AllSourcesFailed {
        count: usize,
        failures: Vec<String>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("command exited with {status}: {stderr}")]
    CommandFailed { status: i32, stderr: String },
    #[error("command produced no output")]
    EmptyToken,
    #[error("command timed out after {}s", SOURCE_TIMEOUT.as_secs())]
    Timeout,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct CachedToken {
    pub token: String,
    pub loaded_at: Instant,
}

#[derive(Default)]
struct Inner {
    tokens: HashMap<String, CachedToken>,
    user_agents: HashMap<String, String>,
}

pub struct CredentialStore {
    sources: BTreeMap<String, OAuthSource>,
    ttl: Duration,
    refresh_buffer: f64,
    inner: RwLock<Inner>,
    refresh_lock: Mutex<()>,
}

impl CredentialStore {
    pub fn new(
        sources: BTreeMap<String, OAuthSource>,
        ttl_seconds: u64,
        refresh_buffer: f64,
    ) -> Self {
        Self {
            sources,
            ttl: Duration::from_secs(ttl_seconds),
            refresh_buffer,
            inner: RwLock::new(Inner::default()),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn from_config(config: &CcproxyConfig) -> ConfigResult<Self> {
        Ok(Self::new(
            config.oauth_sources()?,
            config.oauth_ttl,
            config.oauth_refresh_buffer,
        ))
    }

    pub fn has_source(&self, provider: &str) -> bool {
        self.sources.contains_key(provider)
    }

    pub fn providers(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    /// Execute every configured source once. Partial failure is a warning;
    /// zero successes with at least one source configured is fatal.
    pub async fn load_all(&self) -> CredentialResult<()> {
        if self.sources.is_empty() {
            return Ok(());
        }

        let mut loaded: Vec<(String, String, Option<String>)> = Vec::new();
        let mut failures = Vec::new();
        for (provider, source) in &self.sources {
            match execute_source(source).await {
                Ok(token) => {
                    debug!(provider = %provider, "loaded oauth token");
                    loaded.push((provider.clone(), token, source.user_agent.clone()));
                }
                Err(err) => {
                    warn!(provider = %provider, error = %err, "oauth source failed");
                    failures.push(format!("{provider}: {err}"));
                }
            }
        }

        if loaded.is_empty() {
            return Err(CredentialError::AllSourcesFailed {
                count: self.sources.len(),
                failures,
            });
        }
        if !failures.is_empty() {
            warn!(
                loaded = loaded.len(),
                failed = failures.len(),
                "some oauth sources failed to load"
            );
        }

        let now = Instant::now();
        let mut inner = self.write_inner();
        for (provider, token, user_agent) in loaded {
            inner.tokens.insert(
                provider.clone(),
                CachedToken {
                    token,
                    loaded_at: now,
                },
            );
            if let Some(agent) = user_agent {
                inner.user_agents.insert(provider, agent);
            }
        }
        Ok(())
    }

    pub fn get_oauth_token(&self, provider: &str) -> Option<String> {
        self.read_inner()
            .tokens
            .get(provider)
            .map(|entry| entry.token.clone())
    }

    pub fn get_oauth_user_agent(&self, provider: &str) -> Option<String> {
        self.read_inner().user_agents.get(provider).cloned()
    }

    /// Resolve a provider by hostname-substring match against every
    /// source's destination list. First configured match wins.
    pub fn get_provider_for_destination(&self, api_base: Option<&str>) -> Option<String> {
        let api_base = api_base?.to_ascii_lowercase();
        if api_base.is_empty() {
            return None;
        }
        for (provider, source) in &self.sources {
            for destination in &source.destinations {
                if api_base.contains(&destination.to_ascii_lowercase()) {
                    debug!(provider = %provider, destination = %destination, "matched api base to provider");
                    return Some(provider.clone());
                }
            }
        }
        None
    }

    /// A token counts as expired once it has lived through
    /// `ttl * (1 - refresh_buffer)`. Missing tokens are expired.
    pub fn is_expired(&self, provider: &str) -> bool {
        let inner = self.read_inner();
        let Some(entry) = inner.tokens.get(provider) else {
            return true;
        };
        let threshold = self.ttl.mul_f64(1.0 - self.refresh_buffer.clamp(0.0, 1.0));
        entry.loaded_at.elapsed() >= threshold
    }

    /// Re-execute the provider's source. The refresh mutex is held across
    /// execution so only one refresh per process runs at a time. On
    /// failure the previous cached token is kept and `None` is returned.
    pub async fn refresh(&self, provider: &str) -> Option<String> {
        let source = self.sources.get(provider)?;
        let _flight = self.refresh_lock.lock().await;
        match execute_source(source).await {
            Ok(token) => {
                let mut inner = self.write_inner();
                inner.tokens.insert(
                    provider.to_string(),
                    CachedToken {
                        token: token.clone(),
                        loaded_at: Instant::now(),
                    },
                );
                if let Some(agent) = &source.user_agent {
                    inner
                        .user_agents
                        .insert(provider.to_string(), agent.clone());
                }
                debug!(provider = %provider, "refreshed oauth token");
                Some(token)
            }
            Err(err) => {
                warn!(provider = %provider, error = %err, "oauth refresh failed, keeping cached token");
                None
            }
        }
    }

    /// Long-running TTL refresh loop. Aborting the returned handle is the
    /// cancellation path; the task holds no locks while sleeping.
    pub fn spawn_refresh_task(self: &Arc<Self>) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(REFRESH_CHECK_INTERVAL).await;
                for provider in store.sources.keys() {
                    if store.is_expired(provider) {
                        match store.refresh(provider).await {
                            Some(_) => info!(provider = %provider, "ttl refresh renewed oauth token"),
                            None => warn!(provider = %provider, "ttl refresh failed"),
                        }
                    }
                }
            }
        })
    }

    fn read_inner(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_inner(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

async fn execute_source(source: &OAuthSource) -> Result<String, SourceError> {
    match &source.kind {
        SourceKind::Command(command) => {
            let output = tokio::time::timeout(
                SOURCE_TIMEOUT,
                tokio::process::Command::new("sh")
                    .arg("-c")
                    .arg(command)
                    .kill_on_drop(true)
                    .output(),
            )
            .await
            .map_err(|_| SourceError::Timeout)??;

            if !output.status.success() {
                return Err(SourceError::CommandFailed {
                    status: output.status.code().unwrap_or(-1),
                    stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                });
            }
            let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if token.is_empty() {
                return Err(SourceError::EmptyToken);
            }
            Ok(token)
        }
        SourceKind::File(path) => {
            let raw = tokio::fs::read_to_string(path).await?;
            let token = raw.trim().to_string();
            if token.is_empty() {
                return Err(SourceError::EmptyToken);
            }
            Ok(token)
        }
    }
}

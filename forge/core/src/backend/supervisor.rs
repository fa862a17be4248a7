//! Connection Supervisor
//!
//! Owns the backend address: resolves it, validates it against the
//! identity endpoint, caches the result with a freshness window, and
//! orchestrates the recovery chain when the configured address stops
//! answering - one subnet scan, then the interactive collaborator,
//! unless the non-interactive bypass is set.
//!
//! # State machine
//!
//! ```text
//! UNVALIDATED ──> PROBING ──> VALIDATED
//!                    │
//!                    └──────> UNREACHABLE
//! ```
//!
//! A validated address goes stale after the freshness window or when a
//! request against it reports a connection-class failure; both paths
//! land back in UNVALIDATED and the next `resolve` re-probes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Mutex;

use super::discovery::{self, DiscoveryConfig};
use super::url;
use crate::config::Settings;
use crate::error::BackendError;

/// Connection lifecycle states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No validation attempted yet, or the last result went stale.
    Unvalidated,
    /// A validation attempt is in flight.
    Probing,
    /// The identity endpoint answered with the expected shape.
    Validated,
    /// Every recovery avenue failed.
    Unreachable,
}

/// Interactive-input collaborator: asked for a backend address when
/// discovery fails and the bypass flag is unset.
///
/// Returning `None` ends the fallback conversation; returning an
/// address retries validation with it (the supervisor normalizes any
/// input form).
#[async_trait]
pub trait EndpointFallback: Send + Sync {
    /// Request one candidate address from the collaborator.
    async fn request_endpoint(&self, current: &str) -> Option<String>;
}

struct ConnState {
    status: ConnectionStatus,
    generate_url: String,
    validated_at: Option<Instant>,
}

/// Resolves and supervises the backend connection.
pub struct ConnectionSupervisor {
    state: RwLock<ConnState>,
    /// Serializes slow-path resolution; concurrent callers wait and
    /// reuse the winner's result instead of probing in parallel.
    flight: Mutex<()>,
    http: reqwest::Client,
    freshness: Duration,
    validate_timeout: Duration,
    discovery: DiscoveryConfig,
    fallback: Option<Arc<dyn EndpointFallback>>,
    bypass: bool,
    gave_up: AtomicBool,
}

impl ConnectionSupervisor {
    /// Create a supervisor for the configured backend address.
    pub fn new(settings: &Settings) -> Self {
        Self {
            state: RwLock::new(ConnState {
                status: ConnectionStatus::Unvalidated,
                generate_url: url::generate_url(&settings.backend_url),
                validated_at: None,
            }),
            flight: Mutex::new(()),
            http: reqwest::Client::builder()
                .build()
                .expect("Failed to create HTTP client"),
            freshness: settings.freshness,
            validate_timeout: settings.validate_timeout,
            discovery: settings.discovery.clone(),
            fallback: None,
            bypass: !settings.startup_check,
            gave_up: AtomicBool::new(false),
        }
    }

    /// Attach the interactive-input collaborator.
    pub fn with_fallback(mut self, fallback: Arc<dyn EndpointFallback>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Current state, for logs and callers that gate on readiness.
    pub fn status(&self) -> ConnectionStatus {
        self.state.read().status
    }

    /// The canonical generate URL currently on file (validated or not).
    pub fn endpoint(&self) -> String {
        self.state.read().generate_url.clone()
    }

    /// Resolve a validated generate URL, or report the backend
    /// unreachable after the full recovery chain is exhausted.
    pub async fn resolve(&self) -> Result<String, BackendError> {
        if let Some(fresh) = self.cached() {
            return Ok(fresh);
        }

        let _flight = self.flight.lock().await;
        if let Some(fresh) = self.cached() {
            // Another caller finished resolving while we waited.
            return Ok(fresh);
        }

        self.set_status(ConnectionStatus::Probing);
        let current = self.endpoint();

        if self.validate(&url::base_url(&current)).await {
            self.adopt(current.clone());
            return Ok(current);
        }

        if self.gave_up.load(Ordering::SeqCst) {
            // Bypass mode already exhausted recovery once; only the
            // configured address is ever retried after that.
            self.set_status(ConnectionStatus::Unreachable);
            return Err(self.unreachable(&current));
        }

        tracing::warn!(endpoint = %current, "Configured backend is not answering, scanning the local network");
        if let Some(found) = discovery::discover(&self.http, &self.discovery).await {
            let discovered = url::generate_url(&found.base_url);
            self.adopt(discovered.clone());
            return Ok(discovered);
        }

        if self.bypass {
            self.gave_up.store(true, Ordering::SeqCst);
            self.set_status(ConnectionStatus::Unreachable);
            tracing::info!("Startup check disabled; continuing without a reachable backend");
            return Err(self.unreachable(&current));
        }

        if let Some(fallback) = self.fallback.clone() {
            while let Some(candidate) = fallback.request_endpoint(&current).await {
                let candidate = url::generate_url(candidate.trim());
                if candidate.is_empty() {
                    continue;
                }
                if self.validate(&url::base_url(&candidate)).await {
                    tracing::info!(endpoint = %candidate, "Backend address updated from manual entry");
                    self.adopt(candidate.clone());
                    return Ok(candidate);
                }
                tracing::warn!(endpoint = %candidate, "Entered backend address did not validate");
            }
        }

        self.set_status(ConnectionStatus::Unreachable);
        Err(self.unreachable(&current))
    }

    /// Validate a server base URL against the identity endpoint.
    ///
    /// Requires the expected response shape, not mere reachability; an
    /// unrelated service listening on the port must not pass.
    pub async fn validate(&self, base: &str) -> bool {
        if base.is_empty() {
            return false;
        }
        discovery::identity_check(&self.http, base, self.validate_timeout).await
    }

    /// Note a request failure against the resolved address.
    ///
    /// Connection-class failures (unreachable, timeout) invalidate the
    /// cache so the next `resolve` re-validates immediately.
    pub fn report_failure(&self, error: &BackendError) {
        if !error.invalidates_connection() {
            return;
        }
        let mut state = self.state.write();
        state.status = ConnectionStatus::Unvalidated;
        state.validated_at = None;
        tracing::debug!(error = %error, "Connection cache invalidated after request failure");
    }

    fn cached(&self) -> Option<String> {
        let state = self.state.read();
        if state.status != ConnectionStatus::Validated {
            return None;
        }
        match state.validated_at {
            Some(at) if at.elapsed() < self.freshness => Some(state.generate_url.clone()),
            _ => None,
        }
    }

    fn adopt(&self, generate_url: String) {
        let mut state = self.state.write();
        state.status = ConnectionStatus::Validated;
        state.generate_url = generate_url;
        state.validated_at = Some(Instant::now());
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.state.write().status = status;
    }

    fn unreachable(&self, endpoint: &str) -> BackendError {
        BackendError::Unreachable(format!("no backend answering at {endpoint}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_settings() -> Settings {
        Settings {
            // Reserved port; connection attempts fail immediately.
            backend_url: "http://127.0.0.1:9".to_string(),
            freshness: Duration::from_secs(60),
            validate_timeout: Duration::from_millis(100),
            discovery: DiscoveryConfig {
                port: 9,
                probe_timeout: Duration::from_millis(5),
                max_probes: 32,
            },
            ..Settings::default()
        }
    }

    #[test]
    fn test_initial_state() {
        let supervisor = ConnectionSupervisor::new(&offline_settings());
        assert_eq!(supervisor.status(), ConnectionStatus::Unvalidated);
        assert_eq!(supervisor.endpoint(), "http://127.0.0.1:9/api/generate");
    }

    #[test]
    fn test_endpoint_is_normalized_at_construction() {
        let settings = Settings {
            backend_url: "192.168.1.50:11434".to_string(),
            ..Settings::default()
        };
        let supervisor = ConnectionSupervisor::new(&settings);
        assert_eq!(supervisor.endpoint(), "http://192.168.1.50:11434/api/generate");
    }

    #[tokio::test]
    async fn test_validate_rejects_closed_port() {
        let supervisor = ConnectionSupervisor::new(&offline_settings());
        assert!(!supervisor.validate("http://127.0.0.1:9").await);
    }

    #[tokio::test]
    async fn test_bypass_gives_up_permanently() {
        let settings = Settings {
            startup_check: false,
            ..offline_settings()
        };
        let supervisor = ConnectionSupervisor::new(&settings);

        let first = supervisor.resolve().await;
        assert!(matches!(first, Err(BackendError::Unreachable(_))));
        assert_eq!(supervisor.status(), ConnectionStatus::Unreachable);

        // The second attempt must not rescan; it only retries the
        // configured address and fails fast.
        let started = Instant::now();
        let second = supervisor.resolve().await;
        assert!(matches!(second, Err(BackendError::Unreachable(_))));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_fallback_ends_when_collaborator_declines() {
        struct Declines;
        #[async_trait]
        impl EndpointFallback for Declines {
            async fn request_endpoint(&self, _current: &str) -> Option<String> {
                None
            }
        }

        let supervisor =
            ConnectionSupervisor::new(&offline_settings()).with_fallback(Arc::new(Declines));
        let result = supervisor.resolve().await;
        assert!(matches!(result, Err(BackendError::Unreachable(_))));
        assert_eq!(supervisor.status(), ConnectionStatus::Unreachable);
    }

    #[test]
    fn test_report_failure_classification() {
        let settings = offline_settings();
        let supervisor = ConnectionSupervisor::new(&settings);
        supervisor.adopt("http://127.0.0.1:9/api/generate".to_string());
        assert_eq!(supervisor.status(), ConnectionStatus::Validated);

        // Model errors do not indict the connection
        supervisor.report_failure(&BackendError::ModelNotFound { model: "m".into() });
        assert_eq!(supervisor.status(), ConnectionStatus::Validated);

        supervisor.report_failure(&BackendError::Timeout("no data".into()));
        assert_eq!(supervisor.status(), ConnectionStatus::Unvalidated);
    }

    #[test]
    fn test_cached_honors_freshness() {
        let settings = Settings {
            freshness: Duration::from_millis(0),
            ..offline_settings()
        };
        let supervisor = ConnectionSupervisor::new(&settings);
        supervisor.adopt("http://127.0.0.1:9/api/generate".to_string());
        // Instantly stale with a zero freshness window
        assert!(supervisor.cached().is_none());
    }
}

//! Settings
//!
//! All tunables for the client core, loaded from environment variables.
//! The `OLLAMA_*` names match what the wider Ollama ecosystem uses; the
//! `FORGE_*` names are ours.

use std::time::Duration;

use crate::backend::discovery::DiscoveryConfig;
use crate::backend::url;

/// Default generate endpoint when nothing is configured.
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:11434/api/generate";

/// Default model when nothing is configured.
pub const DEFAULT_MODEL: &str = "qwen3:latest";

/// Settings for the backend client core.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Canonical generate-endpoint URL (normalized on load).
    pub backend_url: String,
    /// Default model identifier.
    pub model: String,
    /// Whether the interactive startup connection check runs.
    ///
    /// `false` is the non-interactive bypass: never prompt, never block
    /// startup on a missing backend.
    pub startup_check: bool,
    /// Bounded history: maximum user/assistant exchange pairs per session.
    pub max_exchanges: usize,
    /// Idle conversations older than this are eligible for purging.
    pub session_max_age: Duration,
    /// How long a successful validation stays fresh.
    pub freshness: Duration,
    /// Timeout for the identity/version round trip. Connection checks
    /// must be fast; this is seconds, not minutes.
    pub validate_timeout: Duration,
    /// Idle deadline while reading a generation stream. Inference is
    /// slow; this scale is deliberately different from validation.
    pub stream_timeout: Duration,
    /// Subnet scan parameters.
    pub discovery: DiscoveryConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            startup_check: true,
            max_exchanges: 20,
            session_max_age: Duration::from_secs(24 * 60 * 60),
            freshness: Duration::from_secs(60),
            validate_timeout: Duration::from_secs(2),
            stream_timeout: Duration::from_secs(120),
            discovery: DiscoveryConfig::default(),
        }
    }
}

impl Settings {
    /// Load settings from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let backend_url = std::env::var("OLLAMA_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(|v| url::generate_url(&v))
            .unwrap_or(defaults.backend_url);

        let model = std::env::var("OLLAMA_MODEL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.model);

        let startup_check = env_bool("OLLAMA_STARTUP_CHECK", defaults.startup_check);

        let discovery = DiscoveryConfig {
            port: env_parse("FORGE_DISCOVERY_PORT", defaults.discovery.port),
            probe_timeout: Duration::from_millis(env_parse(
                "FORGE_DISCOVERY_TIMEOUT_MS",
                defaults.discovery.probe_timeout.as_millis() as u64,
            )),
            max_probes: env_parse("FORGE_DISCOVERY_PROBES", defaults.discovery.max_probes),
        };

        Self {
            backend_url,
            model,
            startup_check,
            max_exchanges: env_parse("FORGE_MAX_EXCHANGES", defaults.max_exchanges),
            session_max_age: Duration::from_secs(
                env_parse(
                    "FORGE_SESSION_MAX_AGE_HOURS",
                    defaults.session_max_age.as_secs() / 3600,
                ) * 3600,
            ),
            freshness: Duration::from_secs(env_parse(
                "FORGE_FRESHNESS_SECS",
                defaults.freshness.as_secs(),
            )),
            validate_timeout: Duration::from_secs(env_parse(
                "FORGE_VALIDATE_TIMEOUT_SECS",
                defaults.validate_timeout.as_secs(),
            )),
            stream_timeout: Duration::from_secs(env_parse(
                "FORGE_STREAM_TIMEOUT_SECS",
                defaults.stream_timeout.as_secs(),
            )),
            discovery,
        }
    }
}

/// Parse a boolean the way the wider tooling expects: true/1/yes.
pub fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name).map(|v| parse_bool(&v)).unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

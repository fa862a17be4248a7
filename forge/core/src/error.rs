//! Backend Error Taxonomy
//!
//! Typed failures for everything that talks to the inference backend.
//! The classification is deliberately not collapsed: callers recover
//! differently from an unreachable server (retry / rescan) than from a
//! missing model (prompt the user to pull it) or a garbled response
//! (give up and report upstream).

use thiserror::Error;

/// Errors produced by the backend client layer.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BackendError {
    /// Could not reach the backend at all (refused, DNS failure, dropped).
    #[error("cannot reach the inference backend: {0}")]
    Unreachable(String),

    /// The backend accepted the connection but produced no data in time.
    #[error("backend request timed out: {0}")]
    Timeout(String),

    /// The requested model is not installed on the backend.
    #[error("model '{model}' is not installed on the backend")]
    ModelNotFound {
        /// The model identifier that was requested
        model: String,
    },

    /// The backend answered with something we could not interpret.
    #[error("backend sent an invalid response: {0}")]
    UpstreamProtocol(String),

    /// The caller cancelled the request. Not a failure.
    #[error("request cancelled by caller")]
    Cancelled,
}

impl BackendError {
    /// Stable wire tag for the outgoing record protocol.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unreachable(_) => "connection_error",
            Self::Timeout(_) => "timeout_error",
            Self::ModelNotFound { .. } => "model_not_found",
            Self::UpstreamProtocol(_) => "api_error",
            Self::Cancelled => "cancelled",
        }
    }

    /// HTTP status class the boundary layer should answer with.
    ///
    /// `None` for [`BackendError::Cancelled`]: a cancelled stream is a
    /// clean stop, never reported to the end user as an error.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Unreachable(_) => Some(503),
            Self::Timeout(_) => Some(504),
            Self::ModelNotFound { .. } => Some(404),
            Self::UpstreamProtocol(_) => Some(502),
            Self::Cancelled => None,
        }
    }

    /// Whether the connection cache should be invalidated after this error.
    pub fn invalidates_connection(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Timeout(_))
    }
}

/// Errors produced by the conversation ledger and store.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// Only the preamble at index 0 may carry the system role.
    #[error("a conversation holds exactly one system preamble, at index 0")]
    PreambleFixed,

    /// The referenced conversation does not exist (or has expired).
    #[error("unknown conversation id: {0}")]
    UnknownConversation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_tags_are_stable() {
        assert_eq!(BackendError::Unreachable(String::new()).kind(), "connection_error");
        assert_eq!(BackendError::Timeout(String::new()).kind(), "timeout_error");
        assert_eq!(
            BackendError::ModelNotFound { model: "m".into() }.kind(),
            "model_not_found"
        );
        assert_eq!(BackendError::UpstreamProtocol(String::new()).kind(), "api_error");
        assert_eq!(BackendError::Cancelled.kind(), "cancelled");
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(BackendError::Unreachable(String::new()).http_status(), Some(503));
        assert_eq!(BackendError::Timeout(String::new()).http_status(), Some(504));
        assert_eq!(
            BackendError::ModelNotFound { model: "m".into() }.http_status(),
            Some(404)
        );
        assert_eq!(
            BackendError::UpstreamProtocol(String::new()).http_status(),
            Some(502)
        );
        assert_eq!(BackendError::Cancelled.http_status(), None);
    }

    #[test]
    fn test_connection_invalidation() {
        assert!(BackendError::Unreachable(String::new()).invalidates_connection());
        assert!(BackendError::Timeout(String::new()).invalidates_connection());
        assert!(!BackendError::ModelNotFound { model: "m".into() }.invalidates_connection());
        assert!(!BackendError::Cancelled.invalidates_connection());
    }
}

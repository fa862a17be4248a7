//! Outgoing Stream Records
//!
//! The discrete event records the transport layer forwards to its
//! client, one per token event. A stream is a run of `{"token": ...}`
//! records closed by exactly one terminal record: `{"done": true}` on
//! success (optionally carrying the full concatenated text) or
//! `{"error": ..., "type": ...}` on failure.

use serde::{Deserialize, Serialize};

use crate::backend::TokenEvent;

/// One record of the outgoing stream protocol.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamRecord {
    /// Interim: one incremental text delta.
    Token {
        /// The delta text.
        token: String,
    },
    /// Terminal success.
    Done {
        /// Always `true`; present so the record is self-describing.
        done: bool,
        /// Full concatenated text, when the caller wants it inline.
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    /// Terminal failure.
    Error {
        /// Human-readable message.
        error: String,
        /// Stable error kind tag (see `BackendError::kind`).
        #[serde(rename = "type")]
        kind: String,
    },
}

impl StreamRecord {
    /// Translate a token event into its wire record.
    pub fn from_event(event: &TokenEvent) -> Self {
        match event {
            TokenEvent::Token(text) => Self::Token { token: text.clone() },
            TokenEvent::Done { text } => Self::Done {
                done: true,
                text: Some(text.clone()),
            },
            TokenEvent::Error(err) => Self::Error {
                error: err.to_string(),
                kind: err.kind().to_string(),
            },
        }
    }

    /// Whether this record closes the stream.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Token { .. })
    }

    /// Serialize as one server-sent event frame.
    pub fn to_sse(&self) -> String {
        // These records are plain string-keyed structs; serializing
        // them cannot fail.
        let json = serde_json::to_string(self).expect("stream record serialization");
        format!("data: {json}\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendError;

    #[test]
    fn test_token_record_shape() {
        let record = StreamRecord::Token { token: "Hel".into() };
        assert_eq!(serde_json::to_string(&record).unwrap(), r#"{"token":"Hel"}"#);
        assert!(!record.is_terminal());
    }

    #[test]
    fn test_done_record_shape() {
        let record = StreamRecord::Done { done: true, text: None };
        assert_eq!(serde_json::to_string(&record).unwrap(), r#"{"done":true}"#);

        let record = StreamRecord::Done {
            done: true,
            text: Some("Hello".into()),
        };
        assert_eq!(
            serde_json::to_string(&record).unwrap(),
            r#"{"done":true,"text":"Hello"}"#
        );
        assert!(record.is_terminal());
    }

    #[test]
    fn test_error_record_shape() {
        let record = StreamRecord::from_event(&TokenEvent::Error(BackendError::Timeout(
            "no data for 120s".into(),
        )));
        assert_eq!(
            serde_json::to_string(&record).unwrap(),
            r#"{"error":"backend request timed out: no data for 120s","type":"timeout_error"}"#
        );
        assert!(record.is_terminal());
    }

    #[test]
    fn test_sse_framing() {
        let record = StreamRecord::Token { token: "hi".into() };
        assert_eq!(record.to_sse(), "data: {\"token\":\"hi\"}\n\n");
    }

    #[test]
    fn test_round_trip_deserialization() {
        for json in [
            r#"{"token":"x"}"#,
            r#"{"done":true,"text":"x"}"#,
            r#"{"error":"boom","type":"api_error"}"#,
        ] {
            let record: StreamRecord = serde_json::from_str(json).unwrap();
            assert_eq!(serde_json::to_string(&record).unwrap(), json);
        }
    }
}

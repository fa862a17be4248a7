//! Ollama Backend Implementation
//!
//! Client for the Ollama REST API:
//! - `/api/generate` - generation, streaming or batch
//! - `/api/tags` - installed model catalog
//! - `/api/version` - identity check
//!
//! The streaming path is the bridge between Ollama's NDJSON response
//! and the normalized token-event protocol: the response body is
//! buffered byte-wise until complete lines are available (fragments
//! split across reads, including inside multi-byte UTF-8, reassemble
//! correctly), each line parses into an explicit fragment shape, and
//! every fragment maps to exactly one event in arrival order.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;

use super::traits::{GenerationRequest, InferenceBackend, ModelInfo, TokenEvent, TokenStream};
use super::{discovery, url};
use crate::config::Settings;
use crate::error::BackendError;
use crate::session::{Message, Role};

/// Token channel capacity. The bridge applies backpressure to the
/// upstream read when the consumer falls this far behind.
const CHANNEL_CAPACITY: usize = 100;

/// Malformed NDJSON lines tolerated per stream before the bridge gives
/// up on the whole response.
const MALFORMED_LINE_LIMIT: usize = 5;

/// Ollama backend client.
#[derive(Clone)]
pub struct OllamaClient {
    generate_url: String,
    http: reqwest::Client,
    validate_timeout: Duration,
    stream_timeout: Duration,
}

impl OllamaClient {
    /// Create a client for an endpoint in any address form.
    pub fn new(endpoint: impl AsRef<str>) -> Self {
        Self {
            generate_url: url::generate_url(endpoint.as_ref()),
            http: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(5))
                .build()
                .expect("Failed to create HTTP client"),
            validate_timeout: Duration::from_secs(2),
            stream_timeout: Duration::from_secs(120),
        }
    }

    /// Create a client from settings.
    pub fn from_settings(settings: &Settings) -> Self {
        let mut client = Self::new(&settings.backend_url);
        client.validate_timeout = settings.validate_timeout;
        client.stream_timeout = settings.stream_timeout;
        client
    }

    /// Same client, different endpoint. The connection pool is shared,
    /// so this is the cheap way to follow a re-resolved address.
    pub fn with_endpoint(&self, endpoint: &str) -> Self {
        Self {
            generate_url: url::generate_url(endpoint),
            ..self.clone()
        }
    }

    /// The canonical generate URL this client talks to.
    pub fn endpoint(&self) -> &str {
        &self.generate_url
    }

    /// Resolve an HTTP-level failure before any body is consumed.
    async fn check_http_status(
        &self,
        response: reqwest::Response,
        model: &str,
    ) -> Result<reqwest::Response, BackendError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::NOT_FOUND {
            let detail = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
                .unwrap_or_default();
            if detail.is_empty() {
                return Err(BackendError::UpstreamProtocol(
                    "backend generate endpoint not found (HTTP 404)".to_string(),
                ));
            }
            return Err(classify_backend_message(&detail, model));
        }
        Err(BackendError::UpstreamProtocol(format!(
            "backend returned {status}: {body}"
        )))
    }
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::new("http://localhost:11434")
    }
}

#[async_trait]
impl InferenceBackend for OllamaClient {
    fn name(&self) -> &'static str {
        "Ollama"
    }

    async fn check(&self) -> bool {
        let base = url::base_url(&self.generate_url);
        discovery::identity_check(&self.http, &base, self.validate_timeout).await
    }

    async fn generate_streaming(
        &self,
        request: &GenerationRequest,
    ) -> Result<TokenStream, BackendError> {
        let payload = serde_json::json!({
            "model": request.model,
            "prompt": build_prompt(&request.messages),
            "stream": true,
        });

        // Only the initial exchange is bounded here; body reads get a
        // fresh idle deadline per chunk inside the pump.
        let response = match tokio::time::timeout(
            self.stream_timeout,
            self.http.post(&self.generate_url).json(&payload).send(),
        )
        .await
        {
            Err(_) => {
                return Err(BackendError::Timeout(format!(
                    "no response from {} within {:?}",
                    self.generate_url, self.stream_timeout
                )))
            }
            Ok(Err(err)) => return Err(classify_request_error(&err, &self.generate_url)),
            Ok(Ok(response)) => response,
        };

        let response = self.check_http_status(response, &request.model).await?;

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let mut stream = response.bytes_stream();
        let idle = self.stream_timeout;
        let endpoint = self.generate_url.clone();
        let model = request.model.clone();

        let task = tokio::spawn(async move {
            let mut lines = LineAssembler::default();
            let mut text = String::new();
            let mut malformed = 0usize;

            loop {
                let next = tokio::select! {
                    // Consumer cancelled: dropping the response stream
                    // closes the upstream connection; emit nothing more.
                    () = tx.closed() => return,
                    next = tokio::time::timeout(idle, stream.next()) => next,
                };

                let bytes = match next {
                    Err(_) => {
                        let _ = tx
                            .send(TokenEvent::Error(BackendError::Timeout(format!(
                                "no data from {endpoint} for {idle:?}"
                            ))))
                            .await;
                        return;
                    }
                    Ok(None) => {
                        // EOF without a final fragment is never success.
                        let _ = tx
                            .send(TokenEvent::Error(BackendError::Unreachable(format!(
                                "connection to {endpoint} closed before completion"
                            ))))
                            .await;
                        return;
                    }
                    Ok(Some(Err(err))) => {
                        let error = if err.is_timeout() {
                            BackendError::Timeout(err.to_string())
                        } else {
                            BackendError::Unreachable(format!("stream read failed: {err}"))
                        };
                        let _ = tx.send(TokenEvent::Error(error)).await;
                        return;
                    }
                    Ok(Some(Ok(bytes))) => bytes,
                };

                for line in lines.push(&bytes) {
                    match parse_fragment(&line) {
                        Ok(Fragment::Delta(delta)) => {
                            if delta.is_empty() {
                                continue;
                            }
                            text.push_str(&delta);
                            if tx.send(TokenEvent::Token(delta)).await.is_err() {
                                return;
                            }
                        }
                        Ok(Fragment::Final { trailing }) => {
                            if let Some(delta) = trailing {
                                text.push_str(&delta);
                                if tx.send(TokenEvent::Token(delta)).await.is_err() {
                                    return;
                                }
                            }
                            tracing::debug!(chars = text.len(), "Stream completed");
                            let _ = tx.send(TokenEvent::Done { text }).await;
                            return;
                        }
                        Ok(Fragment::Error(message)) => {
                            let _ = tx
                                .send(TokenEvent::Error(classify_backend_message(
                                    &message, &model,
                                )))
                                .await;
                            return;
                        }
                        Err(reason) => {
                            malformed += 1;
                            tracing::warn!(%reason, count = malformed, "Skipping malformed stream fragment");
                            if malformed >= MALFORMED_LINE_LIMIT {
                                let _ = tx
                                    .send(TokenEvent::Error(BackendError::UpstreamProtocol(
                                        format!("{malformed} malformed fragments in one stream"),
                                    )))
                                    .await;
                                return;
                            }
                        }
                    }
                }
            }
        });

        Ok(TokenStream::new(rx, task))
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, BackendError> {
        let payload = serde_json::json!({
            "model": request.model,
            "prompt": build_prompt(&request.messages),
            "stream": false,
        });

        let response = self
            .http
            .post(&self.generate_url)
            .json(&payload)
            .timeout(self.stream_timeout)
            .send()
            .await
            .map_err(|err| classify_request_error(&err, &self.generate_url))?;

        let response = self.check_http_status(response, &request.model).await?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|err| BackendError::UpstreamProtocol(format!("invalid JSON reply: {err}")))?;

        if let Some(message) = body.get("error").and_then(|e| e.as_str()) {
            return Err(classify_backend_message(message, &request.model));
        }

        body.get("response")
            .and_then(|r| r.as_str())
            .map(String::from)
            .ok_or_else(|| {
                BackendError::UpstreamProtocol("reply carries no response field".to_string())
            })
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, BackendError> {
        let base = url::base_url(&self.generate_url);
        let response = self
            .http
            .get(url::tags_url(&base))
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|err| classify_request_error(&err, &base))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::UpstreamProtocol(format!(
                "backend returned {status}: {body}"
            )));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|err| BackendError::UpstreamProtocol(format!("invalid JSON reply: {err}")))?;

        let models = data
            .get("models")
            .and_then(|m| m.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| {
                        let name = m.get("name")?.as_str()?.to_string();
                        let size = m.get("size").and_then(serde_json::Value::as_u64);
                        let parameters = m
                            .get("details")
                            .and_then(|d| d.get("parameter_size"))
                            .and_then(|p| p.as_str())
                            .map(String::from);
                        Some(ModelInfo {
                            name,
                            size,
                            parameters,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(models)
    }
}

/// Flatten an ordered message list into the single prompt string the
/// generate endpoint expects: system content first, then the exchange
/// transcript, ending with a bare `Assistant:` to cue the reply.
pub fn build_prompt(messages: &[Message]) -> String {
    let mut system = String::new();
    let mut conversation = String::new();

    for message in messages {
        match message.role {
            Role::System => system = message.content.clone(),
            Role::User => {
                conversation.push_str("User: ");
                conversation.push_str(&message.content);
                conversation.push('\n');
            }
            Role::Assistant => {
                conversation.push_str("Assistant: ");
                conversation.push_str(&message.content);
                conversation.push('\n');
            }
        }
    }

    if system.is_empty() {
        format!("{conversation}Assistant:")
    } else {
        format!("{system}\n\n{conversation}Assistant:")
    }
}

/// Raw NDJSON fragment as the backend sends it.
#[derive(Debug, Deserialize)]
struct RawFragment {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    done: Option<bool>,
    #[serde(default)]
    error: Option<String>,
}

/// One fragment, classified. Unrecognized shapes are rejected by
/// `parse_fragment` rather than read optimistically.
#[derive(Debug, PartialEq)]
enum Fragment {
    /// Incremental delta, more to come.
    Delta(String),
    /// Completion flag set; may carry one last delta.
    Final { trailing: Option<String> },
    /// Backend-reported error.
    Error(String),
}

fn parse_fragment(line: &[u8]) -> Result<Fragment, String> {
    let raw: RawFragment =
        serde_json::from_slice(line).map_err(|err| format!("invalid JSON: {err}"))?;

    if let Some(message) = raw.error {
        return Ok(Fragment::Error(message));
    }
    match (raw.response, raw.done.unwrap_or(false)) {
        (text, true) => Ok(Fragment::Final {
            trailing: text.filter(|t| !t.is_empty()),
        }),
        (Some(text), false) => Ok(Fragment::Delta(text)),
        (None, false) => Err("fragment carries neither a delta nor a completion flag".to_string()),
    }
}

/// Byte-level line buffering: fragments may split anywhere across
/// network reads, so lines are only surfaced once their newline
/// arrives.
#[derive(Default)]
struct LineAssembler {
    buf: Vec<u8>,
}

impl LineAssembler {
    /// Absorb one chunk; return every newly completed line.
    fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if !line.iter().all(u8::is_ascii_whitespace) {
                lines.push(line);
            }
        }
        lines
    }
}

/// Classify an error message the backend produced (HTTP 404 detail or
/// an error fragment). A message naming the model maps to the typed
/// not-found variant so callers can offer to install it.
fn classify_backend_message(message: &str, model: &str) -> BackendError {
    let lowered = message.to_lowercase();
    if lowered.contains("model") || lowered.contains("not found") {
        return BackendError::ModelNotFound {
            model: model.to_string(),
        };
    }
    BackendError::UpstreamProtocol(format!("backend error: {message}"))
}

/// Classify a transport-level request failure.
fn classify_request_error(err: &reqwest::Error, endpoint: &str) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout(format!("request to {endpoint} timed out"))
    } else if err.is_connect() {
        BackendError::Unreachable(format!("cannot connect to {endpoint}: {err}"))
    } else if err.is_decode() {
        BackendError::UpstreamProtocol(err.to_string())
    } else {
        BackendError::Unreachable(format!("request to {endpoint} failed: {err}"))
    }
}

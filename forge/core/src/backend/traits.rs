//! Inference Backend Traits
//!
//! Trait definitions for inference backends, plus the token-event and
//! request types shared by every implementation. The abstraction keeps
//! the session and transport layers ignorant of which server is on the
//! other end; today that is Ollama, but nothing above this seam knows.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::BackendError;
use crate::session::Message;

/// Normalized events from a generation stream.
///
/// Exactly one terminal event (`Done` or `Error`) closes every stream
/// that is not cancelled; a cancelled stream emits nothing further,
/// terminal included.
#[derive(Clone, Debug, PartialEq)]
pub enum TokenEvent {
    /// One incremental text delta, in backend arrival order.
    Token(String),
    /// Terminal: generation finished.
    Done {
        /// All deltas concatenated in emission order.
        text: String,
    },
    /// Terminal: generation failed.
    Error(BackendError),
}

impl TokenEvent {
    /// Whether this event closes the stream.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Token(_))
    }
}

/// A generation request: target model plus ordered history.
#[derive(Clone, Debug)]
pub struct GenerationRequest {
    /// Backend-specific model identifier.
    pub model: String,
    /// Ordered message list, preamble first.
    pub messages: Vec<Message>,
}

impl GenerationRequest {
    /// Create a request for a model and message history.
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
        }
    }
}

/// Consumer half of one generation stream.
///
/// Receiving pulls token events in emission order. Cancelling (or just
/// dropping the stream) is observed promptly by the producer, which
/// closes the upstream connection and stops emitting - both ends watch
/// the same channel, there is no out-of-band flag.
#[derive(Debug)]
pub struct TokenStream {
    rx: mpsc::Receiver<TokenEvent>,
    task: JoinHandle<()>,
}

impl TokenStream {
    /// Wrap a receiver and the producer task feeding it.
    pub fn new(rx: mpsc::Receiver<TokenEvent>, task: JoinHandle<()>) -> Self {
        Self { rx, task }
    }

    /// A stream that emits exactly one terminal error.
    ///
    /// Lets callers funnel request-setup failures through the same
    /// forwarding loop as mid-stream failures.
    pub fn failed(error: BackendError) -> Self {
        let (tx, rx) = mpsc::channel(1);
        let task = tokio::spawn(async move {
            let _ = tx.send(TokenEvent::Error(error)).await;
        });
        Self::new(rx, task)
    }

    /// Receive the next event; `None` once the stream is closed.
    pub async fn recv(&mut self) -> Option<TokenEvent> {
        self.rx.recv().await
    }

    /// Cancel the stream.
    ///
    /// Tears down the producer, which drops the upstream connection and
    /// frees backend compute. No further events - terminal included -
    /// will be observed.
    pub fn cancel(self) {
        self.task.abort();
    }

    /// Adapt into a `futures`-style stream of events.
    pub fn into_stream(self) -> ReceiverStream<TokenEvent> {
        ReceiverStream::new(self.rx)
    }
}

/// Information about a model installed on the backend.
#[derive(Clone, Debug)]
pub struct ModelInfo {
    /// Model identifier.
    pub name: String,
    /// Model size in bytes, when reported.
    pub size: Option<u64>,
    /// Parameter count label, when reported.
    pub parameters: Option<String>,
}

/// An inference backend.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Identity check: confirm the endpoint is this kind of backend,
    /// not merely something listening on the port.
    async fn check(&self) -> bool;

    /// Issue a streaming generation request.
    ///
    /// Errors returned here cover request setup; once a `TokenStream`
    /// exists, all further failures arrive as terminal `Error` events
    /// on it.
    async fn generate_streaming(
        &self,
        request: &GenerationRequest,
    ) -> Result<TokenStream, BackendError>;

    /// Issue a generation request and wait for the complete text.
    async fn generate(&self, request: &GenerationRequest) -> Result<String, BackendError>;

    /// List the models installed on the backend.
    async fn list_models(&self) -> Result<Vec<ModelInfo>, BackendError>;

    /// Pre-flight check that a model exists in the backend's catalog.
    async fn has_model(&self, model: &str) -> Result<bool, BackendError> {
        let models = self.list_models().await?;
        Ok(models.iter().any(|m| m.name == model))
    }
}

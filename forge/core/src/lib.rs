//! Forge Core - Headless Client Core for PromptForge
//!
//! This crate holds the hard part of PromptForge: finding and
//! supervising a connection to a local Ollama instance, bridging its
//! streaming responses into a normalized token-event protocol, and
//! keeping per-session conversation history under its invariants. It
//! has no UI or transport dependencies; any front end - web handler,
//! CLI, test harness - drives it the same way.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │               Transport / UI (not here)                │
//! └───────────────┬───────────────────────┬────────────────┘
//!                 │                       │
//!        StreamRecord (out)        user turns (in)
//!                 │                       │
//! ┌───────────────┴───────────────────────┴────────────────┐
//! │                      FORGE CORE                        │
//! │  ┌──────────────┐  ┌─────────────┐  ┌───────────────┐  │
//! │  │ Connection   │  │ OllamaClient│  │ Conversation  │  │
//! │  │ Supervisor   │─>│ (stream     │  │ Store/Ledger  │  │
//! │  │ + Discovery  │  │  bridge)    │  │               │  │
//! │  └──────────────┘  └─────────────┘  └───────────────┘  │
//! └────────────────────────────────────────────────────────┘
//!                          │
//!                   Ollama (NDJSON)
//! ```
//!
//! # Typical turn
//!
//! ```ignore
//! use forge_core::{
//!     backend::{GenerationRequest, InferenceBackend, OllamaClient, TokenEvent},
//!     ConnectionSupervisor, ConversationStore, Role, Settings,
//! };
//!
//! let settings = Settings::from_env();
//! let supervisor = ConnectionSupervisor::new(&settings);
//! let store = ConversationStore::new(settings.max_exchanges, settings.session_max_age);
//! let client = OllamaClient::from_settings(&settings);
//!
//! let endpoint = supervisor.resolve().await?;
//! let (id, conversation) = store.open(None, &settings.model, "You write image prompts.").await;
//!
//! let snapshot = {
//!     let mut conv = conversation.write().await;
//!     conv.append(Role::User, "a foggy harbor at dawn")?;
//!     conv.snapshot()
//! };
//!
//! let request = GenerationRequest::new(&settings.model, snapshot);
//! let mut stream = client.with_endpoint(&endpoint).generate_streaming(&request).await?;
//! while let Some(event) = stream.recv().await {
//!     // forward StreamRecord::from_event(&event) to the transport;
//!     // on Done, append the assistant reply and trim the ledger
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`backend`]: discovery, connection supervision, and the Ollama
//!   stream bridge
//! - [`config`]: environment-derived settings
//! - [`error`]: the typed failure taxonomy
//! - [`protocol`]: outgoing stream records for the transport boundary
//! - [`session`]: the conversation ledger and its invariants
//! - [`store`]: per-id conversation ownership and locking

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod config;
pub mod error;
pub mod protocol;
pub mod session;
pub mod store;

// Re-exports for convenience
pub use backend::{
    ConnectionStatus, ConnectionSupervisor, DiscoveryConfig, EndpointFallback, GenerationRequest,
    InferenceBackend, ModelInfo, OllamaClient, TokenEvent, TokenStream,
};
pub use config::Settings;
pub use error::{BackendError, LedgerError};
pub use protocol::StreamRecord;
pub use session::{Conversation, ConversationId, Message, Role};
pub use store::{ConversationStore, SharedConversation};

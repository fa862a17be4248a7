//! Backend Client Layer
//!
//! Everything that talks to the local inference backend: address
//! normalization, subnet discovery, connection supervision, and the
//! streaming generate client.

pub mod discovery;
pub mod ollama;
pub mod supervisor;
pub mod traits;
pub mod url;

pub use discovery::{DiscoveredServer, DiscoveryConfig};
pub use ollama::{build_prompt, OllamaClient};
pub use supervisor::{ConnectionStatus, ConnectionSupervisor, EndpointFallback};
pub use traits::{GenerationRequest, InferenceBackend, ModelInfo, TokenEvent, TokenStream};

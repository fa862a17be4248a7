//! Interactive Connection Bootstrap
//!
//! Terminal implementation of the supervisor's fallback collaborator:
//! when the configured backend is unreachable and discovery found
//! nothing, ask the operator for an address, offer a network scan, or
//! retry the configured URL on an empty line.

use std::io::Write;

use async_trait::async_trait;

use forge_core::backend::discovery::{self, DiscoveryConfig};
use forge_core::EndpointFallback;

/// Prompts on the controlling terminal for a backend address.
pub struct TerminalFallback {
    discovery: DiscoveryConfig,
    http: reqwest::Client,
}

impl TerminalFallback {
    /// Create a prompt that can also run subnet scans on demand.
    pub fn new(discovery: DiscoveryConfig) -> Self {
        Self {
            discovery,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl EndpointFallback for TerminalFallback {
    async fn request_endpoint(&self, current: &str) -> Option<String> {
        eprintln!("\nUnable to reach the backend at {current}.");
        eprintln!("You can update the address here, or press Enter to retry the current one.");

        loop {
            let Some(input) = prompt_line(
                "Enter a backend host/IP (e.g. 192.168.1.50:11434), type 'scan' to search your network, or press Enter to retry: ",
            )
            .await
            else {
                // EOF: the operator is done with us
                return None;
            };
            let input = input.trim().to_string();

            if input.eq_ignore_ascii_case("scan") {
                match discovery::discover(&self.http, &self.discovery).await {
                    Some(found) => {
                        eprintln!("Discovered a backend at {}", found.base_url);
                        return Some(found.base_url);
                    }
                    None => {
                        eprintln!(
                            "No backend found during the network scan. Try again or enter an address manually."
                        );
                        continue;
                    }
                }
            }

            if input.is_empty() {
                // Retry the currently configured address once more
                return Some(current.to_string());
            }

            return Some(input);
        }
    }
}

/// Read one line from stdin without blocking the runtime.
async fn prompt_line(message: &str) -> Option<String> {
    let message = message.to_string();
    tokio::task::spawn_blocking(move || {
        eprint!("{message}");
        let _ = std::io::stderr().flush();
        let mut line = String::new();
        match std::io::stdin().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line),
        }
    })
    .await
    .ok()
    .flatten()
}

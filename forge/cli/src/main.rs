//! PromptForge CLI
//!
//! Thin driver over the `forge-core` client: bootstraps the backend
//! connection (interactively when allowed), then either streams one
//! generation to stdout or runs a multi-turn refinement session with a
//! bounded conversation ledger. Ctrl-C during generation cancels the
//! in-flight stream and closes the upstream connection.

mod setup;

use std::io::{IsTerminal, Write};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use forge_core::backend::{GenerationRequest, InferenceBackend, OllamaClient, TokenEvent, TokenStream};
use forge_core::{
    BackendError, ConnectionSupervisor, ConversationStore, Role, Settings, SharedConversation,
};

use setup::TerminalFallback;

/// Built-in chat preamble. The web deployment loads these per
/// model/mode from its prompt catalog; the CLI ships one sensible
/// default.
const CHAT_PREAMBLE: &str = "You are an expert prompt engineer for image generation models. \
Help the user refine their idea into one vivid, detailed prompt. Keep replies to the prompt \
text itself unless asked otherwise.";

#[derive(Debug, Parser)]
#[command(name = "promptforge", version, about = "Local-first prompt studio backed by Ollama")]
struct Args {
    /// Backend address in any form: host, host:port, or full URL
    #[arg(long, env = "OLLAMA_URL")]
    endpoint: Option<String>,

    /// Model to generate with
    #[arg(long, env = "OLLAMA_MODEL")]
    model: Option<String>,

    /// Never prompt for a backend address; fail fast instead
    #[arg(long)]
    non_interactive: bool,

    /// One-shot prompt. Omit it to start an interactive session
    prompt: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut settings = Settings::from_env();
    if let Some(endpoint) = args.endpoint {
        settings.backend_url = endpoint;
    }
    if let Some(model) = args.model {
        settings.model = model;
    }
    if args.non_interactive {
        settings.startup_check = false;
    }

    let interactive = settings.startup_check && std::io::stdin().is_terminal();
    let mut supervisor = ConnectionSupervisor::new(&settings);
    if interactive {
        supervisor =
            supervisor.with_fallback(Arc::new(TerminalFallback::new(settings.discovery.clone())));
    }

    let endpoint = match supervisor.resolve().await {
        Ok(endpoint) => {
            tracing::info!(%endpoint, "Backend ready");
            endpoint
        }
        Err(err) if args.prompt.is_some() => {
            anyhow::bail!("backend unavailable: {err}");
        }
        Err(err) => {
            // Session mode mirrors the bypassed server startup: begin
            // anyway and surface per-turn errors as they happen.
            eprintln!("Warning: {err}. Generation will fail until the backend is reachable.");
            supervisor.endpoint()
        }
    };

    let client = OllamaClient::from_settings(&settings).with_endpoint(&endpoint);
    let store = ConversationStore::new(settings.max_exchanges, settings.session_max_age);

    match args.prompt {
        Some(prompt) => one_shot(&client, &supervisor, &store, &settings, prompt).await,
        None => session(&client, &supervisor, &store, &settings).await,
    }
}

/// Answer a single prompt and exit.
async fn one_shot(
    client: &OllamaClient,
    supervisor: &ConnectionSupervisor,
    store: &ConversationStore,
    settings: &Settings,
    prompt: String,
) -> anyhow::Result<()> {
    let (_, conversation) = store.open(None, &settings.model, CHAT_PREAMBLE).await;
    let outcome = run_turn(client, supervisor, store, &conversation, &settings.model, &prompt).await?;
    match outcome {
        TurnOutcome::Completed => Ok(()),
        TurnOutcome::Cancelled => Ok(()),
        TurnOutcome::Failed(err) => Err(err).context("generation failed"),
    }
}

/// Multi-turn refinement loop.
async fn session(
    client: &OllamaClient,
    supervisor: &ConnectionSupervisor,
    store: &ConversationStore,
    settings: &Settings,
) -> anyhow::Result<()> {
    println!("PromptForge session - model {}. '/reset' starts over, '/quit' exits.", settings.model);

    let (id, conversation) = store.open(None, &settings.model, CHAT_PREAMBLE).await;
    tracing::debug!(conversation = %id, "Session conversation created");

    loop {
        let Some(line) = read_line().await else {
            break;
        };
        let line = line.trim().to_string();

        match line.as_str() {
            "" => continue,
            "/quit" | "/exit" => break,
            "/reset" => {
                conversation
                    .write()
                    .await
                    .reset(&settings.model, CHAT_PREAMBLE);
                println!("Conversation reset.");
                continue;
            }
            _ => {}
        }

        match run_turn(client, supervisor, store, &conversation, &settings.model, &line).await? {
            TurnOutcome::Completed | TurnOutcome::Cancelled => {}
            TurnOutcome::Failed(err) => {
                eprintln!("Error: {err}");
            }
        }
    }

    Ok(())
}

enum TurnOutcome {
    Completed,
    Cancelled,
    Failed(BackendError),
}

/// One full exchange: append the user message, stream the reply to
/// stdout, record the assistant message, trim the ledger.
async fn run_turn(
    client: &OllamaClient,
    supervisor: &ConnectionSupervisor,
    store: &ConversationStore,
    conversation: &SharedConversation,
    model: &str,
    user_line: &str,
) -> anyhow::Result<TurnOutcome> {
    let snapshot = {
        let mut conv = conversation.write().await;
        conv.append(Role::User, user_line)
            .context("recording user message")?;
        conv.snapshot()
    };

    // Re-resolve every turn; the cache makes this free while fresh
    let client = match supervisor.resolve().await {
        Ok(endpoint) => client.with_endpoint(&endpoint),
        Err(err) => return Ok(TurnOutcome::Failed(err)),
    };

    let request = GenerationRequest::new(model, snapshot);
    let mut stream = match client.generate_streaming(&request).await {
        Ok(stream) => stream,
        Err(err) => TokenStream::failed(err),
    };

    let mut outcome = TurnOutcome::Completed;
    let mut cancelled = false;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                cancelled = true;
                break;
            }
            event = stream.recv() => {
                let Some(event) = event else { break };
                match event {
                    TokenEvent::Token(token) => {
                        print!("{token}");
                        let _ = std::io::stdout().flush();
                    }
                    TokenEvent::Done { text } => {
                        println!();
                        let mut conv = conversation.write().await;
                        conv.append(Role::Assistant, text)
                            .context("recording assistant reply")?;
                        conv.trim(store.max_exchanges());
                        break;
                    }
                    TokenEvent::Error(err) => {
                        println!();
                        supervisor.report_failure(&err);
                        outcome = TurnOutcome::Failed(err);
                        break;
                    }
                }
            }
        }
    }

    if cancelled {
        stream.cancel();
        println!();
        tracing::info!("Generation cancelled");
        // The unanswered user message stays in the ledger; it is not
        // eligible for trimming until its reply lands.
        return Ok(TurnOutcome::Cancelled);
    }

    Ok(outcome)
}

/// Read one line from stdin off the runtime; `None` on EOF.
async fn read_line() -> Option<String> {
    tokio::task::spawn_blocking(|| {
        print!("> ");
        let _ = std::io::stdout().flush();
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

//! Socratic tutor backend
//!
//! - Axum HTTP + WebSocket API over a per-session Socratic dialogue engine
//! - Optional OpenAI integration (via environment variables); canned
//!   questions otherwise
//!
//! Important env variables:
//!   PORT               : u16 (default 3000)
//!   OPENAI_API_KEY     : enables OpenAI integration if present
//!   OPENAI_BASE_URL    : default "https://api.openai.com/v1"
//!   OPENAI_TUTOR_MODEL : default "gpt-4o-mini"
//!   TUTOR_CONFIG_PATH  : path to TOML config (prompts, engine knobs, lexicon)
//!   LOG_LEVEL          : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT         : "pretty" (default) or "json"

mod telemetry;
mod util;
mod domain;
mod config;
mod lexicon;
mod assess;
mod depth;
mod difficulty;
mod selector;
mod checks;
mod prompt;
mod analytics;
mod guard;
mod profile;
mod store;
mod error;
mod engine;
mod openai;
mod state;
mod logic;
mod protocol;
mod routes;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{info, instrument, warn};

use crate::routes::build_router;
use crate::state::AppState;

#[instrument(level = "info", skip_all)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  // Shared state: session registry, completion backend, stores, prompts.
  let state = Arc::new(AppState::new());

  let app = build_router(state.clone());
  let sweeper = logic::spawn_idle_sweeper(state.clone());

  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "socratic_tutor", %addr, "HTTP server listening");
  axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
  sweeper.abort();
  info!(target: "socratic_tutor", live_sessions = state.sessions.len().await, "Server stopped");
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    warn!(target: "socratic_tutor", error = %e, "Failed to listen for ctrl-c");
    std::future::pending::<()>().await;
  }
  info!(target: "socratic_tutor", "Shutdown signal received");
}

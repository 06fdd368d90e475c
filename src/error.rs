//! Error types for the tutor backend.
//!
//! Only `EngineError` (call out of sequence) and `SessionError` ever reach a
//! caller; completion and profile failures are recovered where they occur.

use thiserror::Error;

use crate::engine::EnginePhase;

/// Engine method called in a phase that does not allow it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
  #[error("cannot {operation} while session is {phase}")]
  InvalidState { operation: &'static str, phase: EnginePhase },
}

/// Failure of the external completion call.
#[derive(Debug, Error)]
pub enum CompletionError {
  #[error("completion backend not configured: {0}")]
  NotConfigured(&'static str),
  #[error("request failed: {0}")]
  Request(#[from] reqwest::Error),
  #[error("HTTP {status}: {message}")]
  HttpStatus { status: reqwest::StatusCode, message: String },
  #[error("JSON decode failed: {0}")]
  Json(#[from] serde_json::Error),
  #[error("empty response")]
  EmptyChoices,
  #[error("timed out after {0}s")]
  Timeout(u64),
}

/// Student profile input lacks the expected fields.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProfileError {
  #[error("malformed profile: {0}")]
  Malformed(String),
}

/// Orchestration-layer failures surfaced to HTTP / WS callers.
#[derive(Debug, Error)]
pub enum SessionError {
  #[error("unknown session: {0}")]
  UnknownSession(String),
  #[error(transparent)]
  Engine(#[from] EngineError),
}

impl SessionError {
  pub fn code(&self) -> &'static str {
    match self {
      SessionError::UnknownSession(_) => "UNKNOWN_SESSION",
      SessionError::Engine(EngineError::InvalidState { .. }) => "INVALID_STATE",
    }
  }
}

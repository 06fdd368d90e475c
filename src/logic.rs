//! Core behaviors shared by both HTTP and WebSocket handlers.
//!
//! This includes:
//!   - Starting sessions (profile seeding, opening question)
//!   - Relaying student turns to the session's engine
//!   - Persisting a record after every change and feeding the profile service
//!   - Analytics / conversation export / ending sessions
//!
//! Engines missing from the registry are restored from the session store.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument};

use crate::analytics::SessionAnalytics;
use crate::domain::Turn;
use crate::engine::{Opening, SocraticEngine, TurnOutcome};
use crate::error::SessionError;
use crate::profile::seed_from;
use crate::state::{AppState, SharedEngine};

pub struct Started {
  pub session_id: String,
  pub opening: Opening,
}

#[instrument(level = "info", target = "session", skip(state, problem, profile), fields(problem_len = problem.len(), has_profile = profile.is_some()))]
pub async fn start_session(
  state: &AppState,
  problem: &str,
  student_id: Option<String>,
  profile: Option<serde_json::Value>,
) -> Result<Started, SessionError> {
  let raw_profile = match (profile, student_id.as_deref()) {
    (Some(p), _) => Some(p),
    (None, Some(id)) => state.profiles.load(id).await,
    (None, None) => None,
  };
  let seed = seed_from(raw_profile.as_ref());

  let engine = SocraticEngine::new(&state.engine_ctx, seed, student_id);
  let (session_id, shared) = state.sessions.create(engine).await;

  let mut engine = shared.lock().await;
  let opening = engine.start_problem(problem, state.backend.as_ref()).await?;
  state.store.save(&session_id, engine.snapshot()).await;

  info!(target: "session", %session_id, question_type = %opening.question_type, difficulty = %opening.difficulty, fallback = opening.fallback_used, "Session started");
  Ok(Started { session_id, opening })
}

/// Live engine for `session_id`, restoring it from the store when needed.
async fn find_engine(state: &AppState, session_id: &str) -> Result<SharedEngine, SessionError> {
  if let Some(engine) = state.sessions.get(session_id).await {
    return Ok(engine);
  }
  let record = state
    .store
    .load(session_id)
    .await
    .ok_or_else(|| SessionError::UnknownSession(session_id.to_string()))?;
  debug!(target: "session", %session_id, turns = record.turns.len(), "Restoring session from store");
  let engine = SocraticEngine::restore(&state.engine_ctx, record);
  Ok(state.sessions.adopt(session_id, engine).await)
}

#[instrument(level = "info", target = "session", skip(state, text), fields(%session_id, text_len = text.len()))]
pub async fn student_message(state: &AppState, session_id: &str, text: &str) -> Result<TurnOutcome, SessionError> {
  let shared = find_engine(state, session_id).await?;
  let mut engine = shared.lock().await;

  let outcome = engine.respond_to_student(text, state.backend.as_ref()).await?;
  state.store.save(session_id, engine.snapshot()).await;

  if let (Some(student_id), Some(sample)) = (engine.student_id(), outcome.effectiveness.as_ref()) {
    state.profiles.record(student_id, sample).await;
  }

  info!(
    target: "session",
    %session_id,
    question_type = %outcome.question_type,
    check = outcome.is_understanding_check,
    depth = outcome.depth.current_depth,
    difficulty = %outcome.difficulty,
    fallback = outcome.fallback_used,
    "Student turn handled"
  );
  Ok(outcome)
}

#[instrument(level = "info", target = "session", skip(state))]
pub async fn session_analytics(state: &AppState, session_id: &str) -> Result<SessionAnalytics, SessionError> {
  let shared = find_engine(state, session_id).await?;
  let engine = shared.lock().await;
  Ok(engine.generate_analytics())
}

#[instrument(level = "info", target = "session", skip(state))]
pub async fn conversation(state: &AppState, session_id: &str) -> Result<Vec<Turn>, SessionError> {
  let shared = find_engine(state, session_id).await?;
  let engine = shared.lock().await;
  Ok(engine.export_conversation())
}

/// Complete, persist and evict. Returns the final analytics.
#[instrument(level = "info", target = "session", skip(state))]
pub async fn end_session(state: &AppState, session_id: &str) -> Result<SessionAnalytics, SessionError> {
  let shared = find_engine(state, session_id).await?;
  let analytics = {
    let mut engine = shared.lock().await;
    engine.complete()?;
    state.store.save(session_id, engine.snapshot()).await;
    debug!(target: "session", %session_id, stored_turns = engine.turn_count(), "Final record saved");
    engine.generate_analytics()
  };
  state.sessions.evict(session_id).await;
  info!(target: "session", %session_id, total_turns = analytics.total_turns, engagement = analytics.engagement_score, "Session ended");
  Ok(analytics)
}

/// Drop sessions idle past `session_idle_secs` from the registry and the store.
pub async fn sweep_idle(state: &AppState) -> usize {
  let max_idle = Duration::from_secs(state.engine_ctx.settings.session_idle_secs);
  let evicted = state.sessions.evict_idle(max_idle).await;
  let expired = state.store.expire_idle(max_idle).await;
  if !evicted.is_empty() || expired > 0 {
    info!(target: "session", evicted = evicted.len(), expired_records = expired, "Idle sessions swept");
  }
  evicted.len()
}

/// Run `sweep_idle` every `sweep_interval_secs` until the runtime stops.
pub fn spawn_idle_sweeper(state: Arc<AppState>) -> tokio::task::JoinHandle<()> {
  let every = Duration::from_secs(state.engine_ctx.settings.sweep_interval_secs.max(1));
  tokio::spawn(async move {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
      ticker.tick().await;
      sweep_idle(&state).await;
    }
  })
}

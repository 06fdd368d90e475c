//! Session persistence seam.
//!
//! The orchestration layer saves a `SessionRecord` after every start / turn /
//! end and restores engines from it when a session is not in the registry.
//!
//! `InMemorySessionStore` lives and dies with the process. Records idle past
//! the configured window are expired by the sweeper in `logic::sweep_idle`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::domain::{DepthState, DifficultyLevel, Turn, UnderstandingCheck};
use crate::engine::EnginePhase;

/// Everything needed to rebuild an engine for one session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
  pub problem: String,
  #[serde(default)]
  pub student_id: Option<String>,
  pub phase: EnginePhase,
  pub turns: Vec<Turn>,
  pub depth_state: DepthState,
  pub difficulty: DifficultyLevel,
  pub struggling_counter: u32,
  pub understanding_check_log: Vec<UnderstandingCheck>,
  /// Student turn number of the latest check (0 = none yet).
  pub last_check_turn: usize,
  #[serde(default)]
  pub rule_violations: u32,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
  async fn save(&self, session_id: &str, record: SessionRecord);

  async fn load(&self, session_id: &str) -> Option<SessionRecord>;

  /// Drop records not saved for at least `max_idle`. Durable stores keep
  /// everything by default.
  async fn expire_idle(&self, _max_idle: Duration) -> usize {
    0
  }
}

#[derive(Default)]
pub struct InMemorySessionStore {
  records: RwLock<HashMap<String, (SessionRecord, Instant)>>,
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
  async fn save(&self, session_id: &str, record: SessionRecord) {
    debug!(target: "session", %session_id, turns = record.turns.len(), phase = %record.phase, "Session saved");
    self.records.write().await.insert(session_id.to_string(), (record, Instant::now()));
  }

  async fn load(&self, session_id: &str) -> Option<SessionRecord> {
    self.records.read().await.get(session_id).map(|(record, _)| record.clone())
  }

  async fn expire_idle(&self, max_idle: Duration) -> usize {
    let mut records = self.records.write().await;
    let before = records.len();
    records.retain(|_, (_, saved_at)| saved_at.elapsed() < max_idle);
    before - records.len()
  }
}

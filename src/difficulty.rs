//! Difficulty auto-tuning from a rolling window of student signals.
//!
//! A single noisy turn cannot flip the level: downgrades need the struggling
//! counter above 2 (or a low rolling average together with a misconception),
//! upgrades need a high rolling average plus depth.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{Assessment, DifficultyLevel};

/// Number of most recent student turns in the rolling average.
pub const ROLLING_WINDOW: usize = 5;

const STRUGGLE_CONFIDENCE: f64 = 0.3;
const STRUGGLE_COUNTER_LIMIT: u32 = 2;
const LOW_AVG_CONFIDENCE: f64 = 0.3;
const HIGH_AVG_CONFIDENCE: f64 = 0.7;
const UPGRADE_THINKING: u8 = 3;
const UPGRADE_DEPTH: u8 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DifficultyState {
  pub level: DifficultyLevel,
  pub struggling_counter: u32,
}

impl DifficultyState {
  pub fn new(level: DifficultyLevel) -> Self {
    Self { level, struggling_counter: 0 }
  }
}

pub fn is_struggling(assessment: &Assessment) -> bool {
  assessment.confidence_level < STRUGGLE_CONFIDENCE || !assessment.misconceptions.is_empty()
}

/// Mean of the last `ROLLING_WINDOW` values (all of them if fewer).
pub fn rolling_average(confidences: &[f64]) -> Option<f64> {
  let start = confidences.len().saturating_sub(ROLLING_WINDOW);
  let window = &confidences[start..];
  if window.is_empty() {
    None
  } else {
    Some(window.iter().sum::<f64>() / window.len() as f64)
  }
}

/// Next difficulty state.
///
/// `confidences` is the student-confidence history including the current
/// turn; `current_depth` is the depth after this turn's depth update.
pub fn update(
  prev: DifficultyState,
  assessment: &Assessment,
  confidences: &[f64],
  current_depth: u8,
) -> DifficultyState {
  let struggling_counter = if is_struggling(assessment) {
    prev.struggling_counter + 1
  } else {
    prev.struggling_counter.saturating_sub(1)
  };

  let avg = rolling_average(confidences).unwrap_or(assessment.confidence_level);
  let has_misconceptions = !assessment.misconceptions.is_empty();

  let level = if struggling_counter > STRUGGLE_COUNTER_LIMIT || (avg < LOW_AVG_CONFIDENCE && has_misconceptions) {
    prev.level.step_down()
  } else if avg > HIGH_AVG_CONFIDENCE
    && assessment.depth_of_thinking >= UPGRADE_THINKING
    && !has_misconceptions
    && current_depth >= UPGRADE_DEPTH
  {
    prev.level.step_up()
  } else {
    prev.level
  };

  if level != prev.level {
    debug!(target: "socratic", from = %prev.level, to = %level, avg_confidence = avg, struggling_counter, "Difficulty changed");
  }

  DifficultyState { level, struggling_counter }
}

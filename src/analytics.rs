//! Session analytics: a read-only snapshot derived from the turn history.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::depth::MAX_DEPTH;
use crate::domain::{DepthState, DifficultyLevel, QuestionType, Role, Turn};
use crate::profile::EffectivenessRecord;

const DEPTH_WEIGHT: f64 = 0.6;
const PACE_WEIGHT: f64 = 0.4;
const OFF_PACE_CREDIT: f64 = 0.2;

/// Average tutor->student gap (seconds) counted as thoughtful.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ThoughtfulBand {
  pub min_secs: f64,
  pub max_secs: f64,
}

impl ThoughtfulBand {
  fn contains(&self, secs: f64) -> bool {
    secs >= self.min_secs && secs <= self.max_secs
  }
}

/// Engine state that is not recoverable from the turns alone.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SessionCounters<'a> {
  pub difficulty: DifficultyLevel,
  pub struggling_counter: u32,
  pub rule_violations: u32,
  pub effectiveness: &'a BTreeMap<QuestionType, EffectivenessRecord>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionAnalytics {
  pub question_type_counts: BTreeMap<QuestionType, usize>,
  pub max_depth_reached: u8,
  pub current_depth: u8,
  pub concepts: Vec<String>,
  pub confidence_sequence: Vec<f64>,
  pub average_response_gap_secs: Option<f64>,
  pub engagement_score: f64,
  pub total_turns: usize,
  pub understanding_check_count: usize,
  pub difficulty: DifficultyLevel,
  pub struggling_counter: u32,
  pub rule_violations: u32,
  /// Profile history plus this session's samples, per question type.
  pub question_type_effectiveness: BTreeMap<QuestionType, EffectivenessRecord>,
}

/// Mean seconds between a tutor turn and the student reply right after it.
pub fn average_response_gap(turns: &[Turn]) -> Option<f64> {
  let gaps: Vec<f64> = turns
    .windows(2)
    .filter(|w| w[0].role == Role::Tutor && w[1].role == Role::Student)
    .map(|w| (w[1].timestamp - w[0].timestamp).num_milliseconds() as f64 / 1000.0)
    .collect();
  if gaps.is_empty() {
    None
  } else {
    Some(gaps.iter().sum::<f64>() / gaps.len() as f64)
  }
}

pub fn engagement_score(max_depth_reached: u8, avg_gap: Option<f64>, band: ThoughtfulBand) -> f64 {
  let pace = match avg_gap {
    Some(g) if band.contains(g) => 1.0,
    _ => OFF_PACE_CREDIT,
  };
  (DEPTH_WEIGHT * (max_depth_reached as f64 / MAX_DEPTH as f64) + PACE_WEIGHT * pace).min(1.0)
}

pub fn generate(turns: &[Turn], depth: &DepthState, band: ThoughtfulBand, counters: SessionCounters<'_>) -> SessionAnalytics {
  let mut question_type_counts: BTreeMap<QuestionType, usize> =
    QuestionType::CYCLE.iter().map(|qt| (*qt, 0)).collect();
  for qt in turns.iter().filter_map(|t| t.question_type) {
    *question_type_counts.entry(qt).or_default() += 1;
  }

  let mut concepts: Vec<String> = Vec::new();
  for c in &depth.conceptual_connections {
    if !concepts.contains(c) {
      concepts.push(c.clone());
    }
  }

  let confidence_sequence: Vec<f64> = turns
    .iter()
    .filter(|t| t.role == Role::Student)
    .filter_map(|t| t.student_confidence)
    .collect();

  let average_response_gap_secs = average_response_gap(turns);

  SessionAnalytics {
    question_type_counts,
    max_depth_reached: depth.max_depth_reached,
    current_depth: depth.current_depth,
    concepts,
    confidence_sequence,
    average_response_gap_secs,
    engagement_score: engagement_score(depth.max_depth_reached, average_response_gap_secs, band),
    total_turns: turns.iter().filter(|t| t.role != Role::System).count(),
    understanding_check_count: turns.iter().filter(|t| t.is_check()).count(),
    difficulty: counters.difficulty,
    struggling_counter: counters.struggling_counter,
    rule_violations: counters.rule_violations,
    question_type_effectiveness: counters.effectiveness.clone(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::Assessment;
  use chrono::{Duration, TimeZone, Utc};

  const BAND: ThoughtfulBand = ThoughtfulBand { min_secs: 10.0, max_secs: 120.0 };
  const NO_HISTORY: &BTreeMap<QuestionType, EffectivenessRecord> = &BTreeMap::new();
  const COUNTERS: SessionCounters<'static> = SessionCounters {
    difficulty: DifficultyLevel::Intermediate,
    struggling_counter: 0,
    rule_violations: 0,
    effectiveness: NO_HISTORY,
  };

  fn student(confidence: f64) -> Turn {
    let a = Assessment {
      confidence_level: confidence,
      misconceptions: vec![],
      readiness_for_advancement: false,
      conceptual_understanding: 0.0,
      depth_of_thinking: 1,
    };
    Turn::student("reply", &a, vec![])
  }

  fn session(gap_secs: i64) -> Vec<Turn> {
    let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
    vec![
      Turn::system("Problem: 2x + 5 = 13").at(t0),
      Turn::tutor("What is it asking?", QuestionType::Clarification, 1, false).at(t0),
      student(0.2).at(t0 + Duration::seconds(gap_secs)),
      Turn::tutor("What do you notice?", QuestionType::Assumptions, 1, true).at(t0 + Duration::seconds(gap_secs + 2)),
      student(0.6).at(t0 + Duration::seconds(2 * gap_secs + 2)),
      Turn::tutor("Why?", QuestionType::Evidence, 1, false).at(t0 + Duration::seconds(2 * gap_secs + 4)),
    ]
  }

  #[test]
  fn counts_sequences_and_concepts() {
    let depth = DepthState {
      current_depth: 2,
      max_depth_reached: 2,
      conceptual_connections: vec!["equation".into(), "subtract".into(), "equation".into()],
      should_deepen_inquiry: false,
    };
    let a = generate(&session(30), &depth, BAND, COUNTERS);
    assert_eq!(a.question_type_counts[&QuestionType::Clarification], 1);
    assert_eq!(a.question_type_counts[&QuestionType::Assumptions], 1);
    assert_eq!(a.question_type_counts[&QuestionType::MetaQuestioning], 0);
    assert_eq!(a.concepts, vec!["equation", "subtract"]);
    assert_eq!(a.confidence_sequence, vec![0.2, 0.6]);
    assert_eq!(a.total_turns, 5);
    assert_eq!(a.understanding_check_count, 1);
    assert_eq!(a.average_response_gap_secs, Some(30.0));
  }

  #[test]
  fn engagement_rewards_thoughtful_pace() {
    let depth = DepthState { current_depth: 5, max_depth_reached: 5, ..DepthState::default() };
    let thoughtful = generate(&session(30), &depth, BAND, COUNTERS);
    assert!((thoughtful.engagement_score - 1.0).abs() < 1e-9);

    let rushed = generate(&session(2), &DepthState::default(), BAND, COUNTERS);
    // 0.6 * 1/5 + 0.4 * 0.2
    assert!((rushed.engagement_score - 0.2).abs() < 1e-9);
  }

  #[test]
  fn no_student_turns_means_off_pace() {
    assert!((engagement_score(1, None, BAND) - 0.2).abs() < 1e-9);
  }

  #[test]
  fn generation_is_idempotent() {
    let turns = session(15);
    let depth = DepthState::default();
    assert_eq!(generate(&turns, &depth, BAND, COUNTERS), generate(&turns, &depth, BAND, COUNTERS));
  }
}

//! Domain models shared by the engine: turns, assessments, depth state and the
//! two closed taxonomies (question types, difficulty levels).

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who authored a turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
  System,
  Student,
  Tutor,
}

/// The six categories of guiding question.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
  Clarification,
  Assumptions,
  Evidence,
  Perspective,
  Implications,
  MetaQuestioning,
}

impl QuestionType {
  /// Fixed rotation order used when no rule picks a type explicitly.
  pub const CYCLE: [QuestionType; 6] = [
    QuestionType::Clarification,
    QuestionType::Assumptions,
    QuestionType::Evidence,
    QuestionType::Perspective,
    QuestionType::Implications,
    QuestionType::MetaQuestioning,
  ];

  /// Successor in `CYCLE`, wrapping around.
  pub fn next(self) -> QuestionType {
    match self {
      QuestionType::Clarification => QuestionType::Assumptions,
      QuestionType::Assumptions => QuestionType::Evidence,
      QuestionType::Evidence => QuestionType::Perspective,
      QuestionType::Perspective => QuestionType::Implications,
      QuestionType::Implications => QuestionType::MetaQuestioning,
      QuestionType::MetaQuestioning => QuestionType::Clarification,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      QuestionType::Clarification => "clarification",
      QuestionType::Assumptions => "assumptions",
      QuestionType::Evidence => "evidence",
      QuestionType::Perspective => "perspective",
      QuestionType::Implications => "implications",
      QuestionType::MetaQuestioning => "meta_questioning",
    }
  }
}

impl fmt::Display for QuestionType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Three-level difficulty, totally ordered Beginner < Intermediate < Advanced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DifficultyLevel {
  Beginner,
  Intermediate,
  Advanced,
}

impl Default for DifficultyLevel {
  fn default() -> Self { DifficultyLevel::Intermediate }
}

impl DifficultyLevel {
  /// One level harder; no-op at Advanced.
  pub fn step_up(self) -> DifficultyLevel {
    match self {
      DifficultyLevel::Beginner => DifficultyLevel::Intermediate,
      DifficultyLevel::Intermediate | DifficultyLevel::Advanced => DifficultyLevel::Advanced,
    }
  }

  /// One level easier; no-op at Beginner.
  pub fn step_down(self) -> DifficultyLevel {
    match self {
      DifficultyLevel::Advanced => DifficultyLevel::Intermediate,
      DifficultyLevel::Intermediate | DifficultyLevel::Beginner => DifficultyLevel::Beginner,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      DifficultyLevel::Beginner => "beginner",
      DifficultyLevel::Intermediate => "intermediate",
      DifficultyLevel::Advanced => "advanced",
    }
  }
}

impl fmt::Display for DifficultyLevel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// One entry of the conversation. Never mutated after it is appended.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
  pub role: Role,
  pub text: String,
  pub timestamp: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub question_type: Option<QuestionType>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub depth_level: Option<u8>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub student_confidence: Option<f64>,
  #[serde(default)]
  pub targeted_concepts: Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub is_understanding_check: Option<bool>,
}

impl Turn {
  pub fn system(text: impl Into<String>) -> Self {
    Self {
      role: Role::System,
      text: text.into(),
      timestamp: Utc::now(),
      question_type: None,
      depth_level: None,
      student_confidence: None,
      targeted_concepts: Vec::new(),
      is_understanding_check: None,
    }
  }

  pub fn student(text: impl Into<String>, assessment: &Assessment, concepts: Vec<String>) -> Self {
    Self {
      role: Role::Student,
      text: text.into(),
      timestamp: Utc::now(),
      question_type: None,
      depth_level: Some(assessment.depth_of_thinking),
      student_confidence: Some(assessment.confidence_level),
      targeted_concepts: concepts,
      is_understanding_check: None,
    }
  }

  pub fn tutor(text: impl Into<String>, question_type: QuestionType, depth: u8, is_check: bool) -> Self {
    Self {
      role: Role::Tutor,
      text: text.into(),
      timestamp: Utc::now(),
      question_type: Some(question_type),
      depth_level: Some(depth),
      student_confidence: None,
      targeted_concepts: Vec::new(),
      is_understanding_check: Some(is_check),
    }
  }

  #[cfg(test)]
  pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
    self.timestamp = timestamp;
    self
  }

  pub fn is_check(&self) -> bool {
    self.is_understanding_check.unwrap_or(false)
  }
}

/// Structured reading of one student reply. Ephemeral: computed per turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assessment {
  pub confidence_level: f64,
  pub misconceptions: Vec<String>,
  pub readiness_for_advancement: bool,
  pub conceptual_understanding: f64,
  pub depth_of_thinking: u8,
}

/// How far the dialogue has progressed into conceptual reasoning.
///
/// Invariant: `1 <= current_depth <= max_depth_reached <= 5`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepthState {
  pub current_depth: u8,
  pub max_depth_reached: u8,
  pub conceptual_connections: Vec<String>,
  pub should_deepen_inquiry: bool,
}

impl Default for DepthState {
  fn default() -> Self {
    Self {
      current_depth: 1,
      max_depth_reached: 1,
      conceptual_connections: Vec::new(),
      should_deepen_inquiry: false,
    }
  }
}

/// One logged comprehension probe.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnderstandingCheck {
  /// 1-based student turn number at which the probe was issued.
  pub turn_index: usize,
  pub question_type: QuestionType,
  pub student_confidence_at_check: f64,
}

//! Optional student profile: seeds the starting difficulty and receives
//! per-question-type effectiveness samples after each turn.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::domain::{DifficultyLevel, QuestionType};
use crate::error::ProfileError;

const BEGINNER_BELOW: f64 = 0.4;
const INTERMEDIATE_BELOW: f64 = 0.75;

/// How students responded to one question type over time.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectivenessRecord {
  pub times_asked: u32,
  pub mean_confidence: f64,
  pub advancements: u32,
}

impl EffectivenessRecord {
  pub fn absorb(&mut self, sample: &EffectivenessSample) {
    let n = self.times_asked as f64;
    self.mean_confidence = (self.mean_confidence * n + sample.student_confidence) / (n + 1.0);
    self.times_asked += 1;
    if sample.advanced {
      self.advancements += 1;
    }
  }
}

/// Outcome of one tutor question, credited to its type.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectivenessSample {
  pub question_type: QuestionType,
  pub student_confidence: f64,
  pub advanced: bool,
  pub conceptual_understanding: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentProfile {
  #[serde(default)]
  pub student_id: String,
  pub mastery_average: f64,
  #[serde(default)]
  pub observations: u32,
  #[serde(default)]
  pub question_type_effectiveness: BTreeMap<QuestionType, EffectivenessRecord>,
}

impl StudentProfile {
  pub fn new(student_id: impl Into<String>) -> Self {
    Self {
      student_id: student_id.into(),
      mastery_average: 0.5,
      observations: 0,
      question_type_effectiveness: BTreeMap::new(),
    }
  }

  pub fn from_value(value: &serde_json::Value) -> Result<Self, ProfileError> {
    let mastery = value
      .get("masteryAverage")
      .ok_or_else(|| ProfileError::Malformed("missing masteryAverage".into()))?;
    match mastery.as_f64() {
      Some(m) if (0.0..=1.0).contains(&m) => {}
      _ => return Err(ProfileError::Malformed(format!("masteryAverage out of range: {}", mastery))),
    }
    serde_json::from_value(value.clone()).map_err(|e| ProfileError::Malformed(e.to_string()))
  }

  pub fn difficulty_seed(&self) -> DifficultyLevel {
    if self.mastery_average < BEGINNER_BELOW {
      DifficultyLevel::Beginner
    } else if self.mastery_average < INTERMEDIATE_BELOW {
      DifficultyLevel::Intermediate
    } else {
      DifficultyLevel::Advanced
    }
  }

  pub fn absorb(&mut self, sample: &EffectivenessSample) {
    self.question_type_effectiveness.entry(sample.question_type).or_default().absorb(sample);
    let n = self.observations as f64;
    self.mastery_average = (self.mastery_average * n + sample.conceptual_understanding) / (n + 1.0);
    self.observations += 1;
  }
}

/// What a session starts from.
#[derive(Clone, Debug, PartialEq)]
pub struct ProfileSeed {
  pub difficulty: DifficultyLevel,
  pub history: BTreeMap<QuestionType, EffectivenessRecord>,
}

impl Default for ProfileSeed {
  fn default() -> Self {
    Self { difficulty: DifficultyLevel::Intermediate, history: BTreeMap::new() }
  }
}

/// Malformed input falls back to Intermediate with no history.
pub fn seed_from(value: Option<&serde_json::Value>) -> ProfileSeed {
  let Some(value) = value else {
    return ProfileSeed::default();
  };
  match StudentProfile::from_value(value) {
    Ok(p) => ProfileSeed { difficulty: p.difficulty_seed(), history: p.question_type_effectiveness },
    Err(e) => {
      warn!(target: "session", error = %e, "Ignoring student profile; using defaults");
      ProfileSeed::default()
    }
  }
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
  /// Raw profile as held by the profile service.
  async fn load(&self, student_id: &str) -> Option<serde_json::Value>;

  async fn record(&self, student_id: &str, sample: &EffectivenessSample);
}

#[derive(Default)]
pub struct InMemoryProfileStore {
  profiles: RwLock<HashMap<String, StudentProfile>>,
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
  async fn load(&self, student_id: &str) -> Option<serde_json::Value> {
    let profiles = self.profiles.read().await;
    profiles.get(student_id).and_then(|p| serde_json::to_value(p).ok())
  }

  async fn record(&self, student_id: &str, sample: &EffectivenessSample) {
    let mut profiles = self.profiles.write().await;
    let profile = profiles
      .entry(student_id.to_string())
      .or_insert_with(|| StudentProfile::new(student_id));
    profile.absorb(sample);
    debug!(target: "session", %student_id, question_type = %sample.question_type, observations = profile.observations, "Profile updated");
  }
}

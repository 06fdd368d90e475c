//! Loading tutor configuration (persona prompts, engine knobs, optional
//! concept lexicon) from TOML.
//!
//! See `TutorConfig` for the expected schema. Every section is optional.

use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::{error, info};

#[derive(Clone, Debug, Deserialize, Default)]
pub struct TutorConfig {
  #[serde(default)]
  pub prompts: Prompts,
  #[serde(default)]
  pub engine: EngineSettings,
  /// Replaces the built-in concept lexicon when present.
  #[serde(default)]
  pub lexicon: Option<BTreeMap<String, Vec<String>>>,
}

/// Persona text and the opening-question template.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  pub tutor_system: String,
  /// Placeholders: `{problem}`, `{question_guidance}`.
  pub opening_template: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      tutor_system: "You are a patient Socratic math tutor. Never state the answer or any intermediate numeric result the student has not produced. Guide only by asking questions. Build on what the student said, in plain language.".into(),
      opening_template: "The student has just shared this problem: {problem}\nOpen the session with ONE question. {question_guidance}".into(),
    }
  }
}

/// Operational knobs of the engine. The decision thresholds are fixed in code.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
  pub completion_timeout_secs: u64,
  /// Average tutor->student gap (seconds) counted as thoughtful engagement.
  pub thoughtful_gap_min_secs: f64,
  pub thoughtful_gap_max_secs: f64,
  /// Reply used when the completion call fails or times out.
  pub fallback_reply: String,
  /// Seed for question-type randomness; entropy when absent.
  pub rng_seed: Option<u64>,
  /// Sessions untouched this long are dropped from memory by the sweeper.
  pub session_idle_secs: u64,
  pub sweep_interval_secs: u64,
}

impl Default for EngineSettings {
  fn default() -> Self {
    Self {
      completion_timeout_secs: 20,
      thoughtful_gap_min_secs: 10.0,
      thoughtful_gap_max_secs: 120.0,
      fallback_reply: "That's interesting \u{2014} can you tell me more about your reasoning?".into(),
      rng_seed: None,
      session_idle_secs: 30 * 60,
      sweep_interval_secs: 60,
    }
  }
}

/// Attempt to load `TutorConfig` from TUTOR_CONFIG_PATH. On any parsing/IO error, returns None.
pub fn load_tutor_config_from_env() -> Option<TutorConfig> {
  let path = std::env::var("TUTOR_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match toml::from_str::<TutorConfig>(&s) {
      Ok(cfg) => {
        info!(target: "socratic", %path, "Loaded tutor config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "socratic", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "socratic", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}

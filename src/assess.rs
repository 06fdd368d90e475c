//! Response assessment: raw student text -> `Assessment`.
//!
//! Pure function of the text and the static lexicons below; never fails.
//! Blank input is treated as an uncertain reply.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::Assessment;
use crate::lexicon::ConceptLexicon;

pub const DEFAULT_CONFIDENCE: f64 = 0.5;
pub const UNCERTAIN_CONFIDENCE: f64 = 0.2;
pub const CERTAIN_CONFIDENCE: f64 = 0.9;
pub const TENTATIVE_CONFIDENCE: f64 = 0.6;

/// Readiness requires confidence strictly above this.
const READINESS_CONFIDENCE: f64 = 0.6;
/// Vocabulary hits needed for full conceptual-understanding credit.
const FULL_UNDERSTANDING_TERMS: f64 = 3.0;
const LONG_REPLY_CHARS: usize = 50;
const MAX_DEPTH: u8 = 5;

static UNCERTAIN: Lazy<Regex> = Lazy::new(|| {
  Regex::new(
    r"(?i)\b(?:i\s+don'?t\s+know|i\s+do\s+not\s+know|not\s+sure|no\s+idea|no\s+clue|unsure|confused|i'?m\s+lost|i\s+am\s+lost|don'?t\s+understand|i'?m\s+stuck|hm+|um+|uh+)\b",
  )
  .expect("static regex")
});

static CERTAIN: Lazy<Regex> = Lazy::new(|| {
  Regex::new(
    r"(?i)\b(?:definitely|certainly|absolutely|obviously|clearly|for\s+sure|i'?m\s+(?:sure|certain|confident)|i\s+am\s+(?:sure|certain|confident)|i\s+know)\b",
  )
  .expect("static regex")
});

static TENTATIVE: Lazy<Regex> = Lazy::new(|| {
  Regex::new(r"(?i)\b(?:maybe|perhaps|possibly|probably|might|i\s+think|i\s+guess)\b").expect("static regex")
});

static OVERGENERALIZATION: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"(?i)\b(?:always|never|every\s+time)\b").expect("static regex"));

static CAUSAL: Lazy<Regex> = Lazy::new(|| {
  Regex::new(r"(?i)\b(?:because|since|therefore|thus|hence|so\s+that)\b").expect("static regex")
});

static CONDITIONAL: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"(?i)\b(?:if|unless|whenever|otherwise)\b").expect("static regex"));

static COMPARATIVE: Lazy<Regex> = Lazy::new(|| {
  Regex::new(
    r"(?i)\b(?:than|greater|smaller|larger|bigger|compared?|similar|different|same\s+as|versus)\b",
  )
  .expect("static regex")
});

static HYPOTHETICAL: Lazy<Regex> = Lazy::new(|| {
  Regex::new(r"(?i)\b(?:what\s+if|suppose|imagine|would|could|hypothetically)\b").expect("static regex")
});

/// Turns free text into a structured `Assessment`.
#[derive(Clone)]
pub struct ResponseAssessor {
  lexicon: Arc<ConceptLexicon>,
}

impl ResponseAssessor {
  pub fn new(lexicon: Arc<ConceptLexicon>) -> Self {
    Self { lexicon }
  }

  pub fn assess(&self, raw: &str) -> Assessment {
    let text = normalize_apostrophes(raw);

    let confidence_level = confidence_of(&text);

    let misconceptions: Vec<String> = OVERGENERALIZATION
      .find_iter(&text)
      .map(|m| format!("overgeneralization: \"{}\"", m.as_str().to_lowercase()))
      .collect();

    let vocab_hits = self.lexicon.extract(&text).len() as f64;
    let conceptual_understanding = (vocab_hits / FULL_UNDERSTANDING_TERMS).min(1.0);

    let depth_of_thinking = depth_of(&text);

    let readiness_for_advancement = confidence_level > READINESS_CONFIDENCE && misconceptions.is_empty();

    Assessment {
      confidence_level,
      misconceptions,
      readiness_for_advancement,
      conceptual_understanding,
      depth_of_thinking,
    }
  }
}

fn normalize_apostrophes(s: &str) -> String {
  s.replace(['\u{2019}', '\u{2018}'], "'")
}

/// Uncertainty beats certainty beats hedging; otherwise the default.
fn confidence_of(text: &str) -> f64 {
  if text.trim().is_empty() || UNCERTAIN.is_match(text) {
    UNCERTAIN_CONFIDENCE
  } else if CERTAIN.is_match(text) {
    CERTAIN_CONFIDENCE
  } else if TENTATIVE.is_match(text) {
    TENTATIVE_CONFIDENCE
  } else {
    DEFAULT_CONFIDENCE
  }
}

fn depth_of(text: &str) -> u8 {
  let signals = [
    text.chars().count() > LONG_REPLY_CHARS,
    CAUSAL.is_match(text),
    CONDITIONAL.is_match(text),
    COMPARATIVE.is_match(text),
    HYPOTHETICAL.is_match(text),
  ];
  let gained = signals.iter().filter(|s| **s).count() as u8;
  (1 + gained).min(MAX_DEPTH)
}

//! Next-question-type selection.
//!
//! Rules run top-down; the first that applies wins. The two random branches
//! draw from a caller-supplied `Rng` so tests can seed them.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::domain::{Assessment, DepthState, QuestionType};

const LOW_CONFIDENCE: f64 = 0.3;
const CLARIFICATION_WEIGHT: f64 = 0.7;
const ADVANCED_DEPTH: u8 = 3;
const ADVANCED_TYPES: [QuestionType; 3] =
  [QuestionType::Implications, QuestionType::Perspective, QuestionType::MetaQuestioning];

/// Type of the opening question, from keywords in the problem statement.
pub fn initial_question_type(problem: &str) -> QuestionType {
  let p = problem.to_lowercase();
  let has = |words: &[&str]| words.iter().any(|w| p.contains(w));
  if has(&["solve", "find"]) {
    QuestionType::Clarification
  } else if has(&["why", "explain"]) {
    QuestionType::Evidence
  } else if has(&["compare", "evaluate"]) {
    QuestionType::Perspective
  } else {
    QuestionType::Clarification
  }
}

/// Choose the next question type.
///
/// `previous` is the type of the last tutor question; `None` only before the
/// opening question exists.
pub fn select<R: Rng + ?Sized>(
  assessment: &Assessment,
  depth: &DepthState,
  previous: Option<QuestionType>,
  rng: &mut R,
) -> QuestionType {
  if assessment.confidence_level < LOW_CONFIDENCE {
    if rng.gen_bool(CLARIFICATION_WEIGHT) {
      QuestionType::Clarification
    } else {
      QuestionType::Assumptions
    }
  } else if !assessment.misconceptions.is_empty() {
    QuestionType::Evidence
  } else if assessment.readiness_for_advancement && depth.current_depth >= ADVANCED_DEPTH {
    *ADVANCED_TYPES.choose(rng).unwrap_or(&QuestionType::Implications)
  } else {
    previous.map(QuestionType::next).unwrap_or(QuestionType::Clarification)
  }
}

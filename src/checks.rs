//! Comprehension-check scheduling.

use crate::domain::{Assessment, DepthState, QuestionType};

const MAX_GAP: usize = 4;
const LOW_CONFIDENCE: f64 = 0.4;
const LOW_CONFIDENCE_GAP: usize = 2;
const MISCONCEPTION_GAP: usize = 2;
const DEEPEN_GAP: usize = 3;
const DEEP_THINKING: u8 = 3;

/// Whether this turn should be a comprehension probe. First matching rule wins.
///
/// `recent_confidences` is the recorded student-confidence history, current
/// turn last.
pub fn should_check(
  assessment: &Assessment,
  depth: &DepthState,
  turns_since_last_check: usize,
  recent_confidences: &[f64],
) -> bool {
  if turns_since_last_check >= MAX_GAP {
    return true;
  }
  let last_two_low = recent_confidences.len() >= 2
    && recent_confidences[recent_confidences.len() - 2..].iter().all(|c| *c < LOW_CONFIDENCE);
  if assessment.confidence_level < LOW_CONFIDENCE && turns_since_last_check >= LOW_CONFIDENCE_GAP && last_two_low {
    return true;
  }
  if !assessment.misconceptions.is_empty() && turns_since_last_check >= MISCONCEPTION_GAP {
    return true;
  }
  depth.should_deepen_inquiry && turns_since_last_check >= DEEPEN_GAP
}

/// Question type used for a probe turn, replacing the selector's choice.
pub fn check_question_type(assessment: &Assessment) -> QuestionType {
  if !assessment.misconceptions.is_empty() {
    QuestionType::Evidence
  } else if assessment.confidence_level < LOW_CONFIDENCE {
    QuestionType::Clarification
  } else if assessment.depth_of_thinking >= DEEP_THINKING {
    QuestionType::Implications
  } else {
    QuestionType::Evidence
  }
}

//! Inquiry depth tracking.
//!
//! `currentDepth` only ever rises within a session; sustained struggle is
//! handled by the difficulty controller, not by lowering depth.

use std::sync::Arc;

use crate::domain::{Assessment, DepthState};
use crate::lexicon::ConceptLexicon;

pub const MIN_DEPTH: u8 = 1;
pub const MAX_DEPTH: u8 = 5;

/// Thinking depth a ready student must show before the dialogue goes deeper.
const ADVANCE_THINKING: u8 = 3;
/// `shouldDeepenInquiry` only below this depth.
const DEEPEN_BELOW: u8 = 4;
const DEEPEN_UNDERSTANDING: f64 = 0.7;

#[derive(Clone)]
pub struct DepthTracker {
  lexicon: Arc<ConceptLexicon>,
}

impl DepthTracker {
  pub fn new(lexicon: Arc<ConceptLexicon>) -> Self {
    Self { lexicon }
  }

  /// Concept tags the student mentioned, in mention order.
  pub fn concepts_in(&self, text: &str) -> Vec<String> {
    self.lexicon.extract(text)
  }

  /// Next depth state after one student reply. Does not touch `prev`.
  pub fn update(&self, prev: &DepthState, assessment: &Assessment, text: &str) -> DepthState {
    let mut next = prev.clone();

    if assessment.readiness_for_advancement && assessment.depth_of_thinking >= ADVANCE_THINKING {
      next.current_depth = (next.current_depth + 1).min(MAX_DEPTH);
    }
    next.current_depth = next.current_depth.max(MIN_DEPTH);
    next.max_depth_reached = next.max_depth_reached.max(next.current_depth);

    next.conceptual_connections.extend(self.concepts_in(text));

    next.should_deepen_inquiry =
      next.current_depth < DEEPEN_BELOW && assessment.conceptual_understanding > DEEPEN_UNDERSTANDING;

    next
  }
}

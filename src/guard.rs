//! Direct-answer detector for tutor replies.
//!
//! A reply violates the no-answer rule when it reads like a definitive
//! statement of a result and carries no Socratic guidance. Guidance always
//! wins: a reply ending in "?" or asking what/how/can you/do you is never flagged.

use once_cell::sync::Lazy;
use regex::Regex;

static DEFINITIVE: Lazy<Regex> = Lazy::new(|| {
  Regex::new(
    r"(?i)\bthe\s+(?:final\s+)?(?:answer|solution|result)\s+(?:is|=|would\s+be)\b|\b[a-z]\s*=\s*-?\d+(?:\.\d+)?\s*(?:[.!]|$)",
  )
  .expect("static regex")
});

static GUIDANCE: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"(?i)\b(?:what|how|can\s+you|do\s+you)\b").expect("static regex"));

pub fn is_definitive(reply: &str) -> bool {
  DEFINITIVE.is_match(reply)
}

pub fn has_guidance(reply: &str) -> bool {
  reply.trim_end().ends_with('?') || GUIDANCE.is_match(reply)
}

/// True when a tutor reply gives the answer away.
pub fn violates_no_answer_rule(reply: &str) -> bool {
  is_definitive(reply) && !has_guidance(reply)
}

//! Guidance composition for the completion backend.
//!
//! The guidance never carries a solution (the engine does not know one); it
//! always caps the reply at 1-2 sentences and requires it to end in a question.

use crate::config::Prompts;
use crate::domain::{DifficultyLevel, QuestionType, Role, Turn};
use crate::openai::ChatMessage;
use crate::util::fill_template;

/// Struggling counter at which the tutor is told to slow down.
const STRUGGLE_NOTE_AT: u32 = 2;

const REPLY_RULES: &str = "Rules: reply in 1-2 sentences. Do not give the answer, a final value, or the next computed step. End your reply with a question.";

/// Everything the composer needs about the turn being produced.
#[derive(Clone, Debug)]
pub struct Guidance<'a> {
  pub problem: &'a str,
  pub question_type: QuestionType,
  pub is_understanding_check: bool,
  pub difficulty: DifficultyLevel,
  pub struggling_counter: u32,
  pub should_deepen_inquiry: bool,
}

pub fn question_type_guidance(qt: QuestionType) -> &'static str {
  match qt {
    QuestionType::Clarification => "Ask a clarification question: have the student restate what the problem gives and what it asks for, in their own words.",
    QuestionType::Assumptions => "Ask about assumptions: have the student name what they are taking for granted and whether it must hold.",
    QuestionType::Evidence => "Ask for evidence: have the student justify their last claim or show how they know it is true.",
    QuestionType::Perspective => "Ask for another perspective: invite a different method or representation of the same step.",
    QuestionType::Implications => "Ask about implications: have the student predict what follows from their idea, or check it against the original problem.",
    QuestionType::MetaQuestioning => "Ask a reflective question about the student's own thinking process and which strategy helped.",
  }
}

fn difficulty_guidance(level: DifficultyLevel) -> &'static str {
  match level {
    DifficultyLevel::Beginner => "Use simple words, one small step at a time, and concrete numbers from the problem.",
    DifficultyLevel::Intermediate => "Use standard terminology and expect the student to connect two steps.",
    DifficultyLevel::Advanced => "Use precise terminology and push for generalization beyond this one problem.",
  }
}

/// Canned question per type; used when the backend fails on the opening turn
/// or when a generated reply breaks the no-answer rule.
pub fn canned_question(qt: QuestionType) -> &'static str {
  match qt {
    QuestionType::Clarification => "Before we start, can you tell me in your own words what this problem is asking you to find?",
    QuestionType::Assumptions => "What are you assuming here, and how could you check that it's true?",
    QuestionType::Evidence => "How do you know that step works? What would convince you?",
    QuestionType::Perspective => "Is there another way you could look at this step?",
    QuestionType::Implications => "If that's true, what does it tell you about the next step?",
    QuestionType::MetaQuestioning => "What strategy have you been using so far, and how is it working for you?",
  }
}

/// Guidance for an ordinary or probe turn.
pub fn compose(g: &Guidance<'_>) -> String {
  let mut parts: Vec<String> = Vec::with_capacity(8);
  parts.push(format!("Problem under discussion: {}", g.problem.trim()));
  parts.push(format!("Question type: {}. {}", g.question_type, question_type_guidance(g.question_type)));
  parts.push(format!("Difficulty: {}. {}", g.difficulty, difficulty_guidance(g.difficulty)));

  if g.is_understanding_check {
    parts.push("This turn is an understanding check: do not move the problem forward. Ask the student to explain, in their own words, the idea they just used.".into());
  }
  if g.struggling_counter >= STRUGGLE_NOTE_AT {
    parts.push(format!(
      "The student has struggled for {} turns: acknowledge their effort and narrow the question to one concrete detail.",
      g.struggling_counter
    ));
  }
  if g.should_deepen_inquiry {
    parts.push("The student shows solid understanding: ask a question that connects this step to the underlying concept.".into());
  }
  parts.push(REPLY_RULES.into());
  parts.join("\n")
}

/// Guidance for the opening question, from the configurable template.
pub fn compose_opening(prompts: &Prompts, problem: &str, qt: QuestionType, difficulty: DifficultyLevel) -> String {
  let opening = fill_template(
    &prompts.opening_template,
    &[("problem", problem.trim()), ("question_guidance", question_type_guidance(qt))],
  );
  format!("{}\nDifficulty: {}. {}\n{}", opening, difficulty, difficulty_guidance(difficulty), REPLY_RULES)
}

/// Outbound request: persona + guidance as the system message, then the
/// conversation. System turns stay system messages.
pub fn build_messages(prompts: &Prompts, guidance: &str, turns: &[Turn]) -> Vec<ChatMessage> {
  let mut messages = Vec::with_capacity(turns.len() + 1);
  messages.push(ChatMessage::system(format!("{}\n\n{}", prompts.tutor_system, guidance)));
  for t in turns {
    messages.push(match t.role {
      Role::System => ChatMessage::system(t.text.clone()),
      Role::Student => ChatMessage::user(t.text.clone()),
      Role::Tutor => ChatMessage::assistant(t.text.clone()),
    });
  }
  messages
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::Assessment;

  fn guidance(qt: QuestionType) -> Guidance<'static> {
    Guidance {
      problem: "2x + 5 = 13",
      question_type: qt,
      is_understanding_check: false,
      difficulty: DifficultyLevel::Intermediate,
      struggling_counter: 0,
      should_deepen_inquiry: false,
    }
  }

  #[test]
  fn every_type_gets_length_cap_and_question_rule() {
    for qt in QuestionType::CYCLE {
      let text = compose(&guidance(qt));
      assert!(text.contains("1-2 sentences"));
      assert!(text.contains("End your reply with a question"));
      assert!(text.contains(question_type_guidance(qt)));
      assert!(!text.contains("x = 4"));
    }
  }

  #[test]
  fn check_struggle_and_deepen_notes_are_conditional() {
    let plain = compose(&guidance(QuestionType::Evidence));
    assert!(!plain.contains("understanding check"));
    assert!(!plain.contains("struggled"));

    let mut g = guidance(QuestionType::Evidence);
    g.is_understanding_check = true;
    g.struggling_counter = 3;
    g.should_deepen_inquiry = true;
    g.difficulty = DifficultyLevel::Beginner;
    let text = compose(&g);
    assert!(text.contains("understanding check"));
    assert!(text.contains("struggled for 3 turns"));
    assert!(text.contains("underlying concept"));
    assert!(text.contains("Difficulty: beginner"));
  }

  #[test]
  fn opening_fills_template() {
    let text = compose_opening(&Prompts::default(), " 2x + 5 = 13 ", QuestionType::Clarification, DifficultyLevel::Advanced);
    assert!(text.contains("problem: 2x + 5 = 13\n"));
    assert!(!text.contains("{problem}"));
    assert!(text.contains("End your reply with a question"));
  }

  #[test]
  fn messages_map_roles_in_order() {
    let a = Assessment {
      confidence_level: 0.2,
      misconceptions: vec![],
      readiness_for_advancement: false,
      conceptual_understanding: 0.0,
      depth_of_thinking: 1,
    };
    let turns = vec![
      Turn::system("Problem: 2x + 5 = 13"),
      Turn::tutor("What is the problem asking?", QuestionType::Clarification, 1, false),
      Turn::student("I don't know", &a, vec![]),
    ];
    let msgs = build_messages(&Prompts::default(), "G", &turns);
    let roles: Vec<&str> = msgs.iter().map(|m| m.role.as_str()).collect();
    assert_eq!(roles, vec!["system", "system", "assistant", "user"]);
    assert!(msgs[0].content.ends_with("\n\nG"));
  }

  #[test]
  fn canned_questions_end_in_question_mark() {
    for qt in QuestionType::CYCLE {
      assert!(canned_question(qt).ends_with('?'));
    }
  }
}

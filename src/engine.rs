//! Socratic dialogue engine: owns one session's conversation state and
//! sequences assessment, depth, difficulty, check scheduling, question-type
//! selection and prompt composition for every student turn.
//!
//! Phases: Uninitialized -> ProblemStarted -> AwaitingStudent <-> ProcessingTurn -> Completed.
//!
//! All state updates for a turn are committed before the completion call is
//! issued; the call itself only decides the tutor's wording. A failed or
//! timed-out call falls back to a canned reply and never rolls anything back.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::analytics::{self, SessionAnalytics, SessionCounters, ThoughtfulBand};
use crate::assess::ResponseAssessor;
use crate::checks;
use crate::config::{EngineSettings, Prompts};
use crate::depth::DepthTracker;
use crate::difficulty::{self, DifficultyState};
use crate::domain::{
  Assessment, DepthState, DifficultyLevel, QuestionType, Role, Turn, UnderstandingCheck,
};
use crate::error::{CompletionError, EngineError};
use crate::guard::violates_no_answer_rule;
use crate::lexicon::ConceptLexicon;
use crate::openai::{ChatMessage, CompletionBackend};
use crate::profile::{EffectivenessRecord, EffectivenessSample, ProfileSeed};
use crate::prompt::{self, Guidance};
use crate::selector;
use crate::store::SessionRecord;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnginePhase {
  Uninitialized,
  ProblemStarted,
  AwaitingStudent,
  ProcessingTurn,
  Completed,
}

impl fmt::Display for EnginePhase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      EnginePhase::Uninitialized => "uninitialized",
      EnginePhase::ProblemStarted => "problem_started",
      EnginePhase::AwaitingStudent => "awaiting_student",
      EnginePhase::ProcessingTurn => "processing_turn",
      EnginePhase::Completed => "completed",
    };
    f.write_str(s)
  }
}

/// Read-only collaborators shared by every engine instance.
#[derive(Clone)]
pub struct EngineContext {
  pub lexicon: Arc<ConceptLexicon>,
  pub prompts: Arc<Prompts>,
  pub settings: Arc<EngineSettings>,
}

impl EngineContext {
  pub fn new(lexicon: ConceptLexicon, prompts: Prompts, settings: EngineSettings) -> Self {
    Self { lexicon: Arc::new(lexicon), prompts: Arc::new(prompts), settings: Arc::new(settings) }
  }
}

/// Result of `start_problem`.
#[derive(Clone, Debug, PartialEq)]
pub struct Opening {
  pub reply: String,
  pub question_type: QuestionType,
  pub difficulty: DifficultyLevel,
  pub fallback_used: bool,
}

/// Result of one `respond_to_student` call.
#[derive(Clone, Debug, PartialEq)]
pub struct TurnOutcome {
  pub reply: String,
  pub question_type: QuestionType,
  pub is_understanding_check: bool,
  pub assessment: Assessment,
  pub depth: DepthState,
  pub difficulty: DifficultyLevel,
  pub struggling_counter: u32,
  pub fallback_used: bool,
  /// Credit for the tutor question this reply answered, for the profile service.
  pub effectiveness: Option<EffectivenessSample>,
}

/// The tutor turn owed after state was committed but before a reply arrived.
#[derive(Clone, Copy, Debug)]
struct PendingReply {
  question_type: QuestionType,
  is_check: bool,
}

pub struct SocraticEngine {
  assessor: ResponseAssessor,
  tracker: DepthTracker,
  prompts: Arc<Prompts>,
  settings: Arc<EngineSettings>,
  rng: StdRng,

  phase: EnginePhase,
  problem: String,
  student_id: Option<String>,
  turns: Vec<Turn>,
  depth: DepthState,
  difficulty: DifficultyState,
  check_log: Vec<UnderstandingCheck>,
  check_count: usize,
  last_check_turn: usize,
  rule_violations: u32,
  effectiveness: BTreeMap<QuestionType, EffectivenessRecord>,
  pending: Option<PendingReply>,
}

impl SocraticEngine {
  pub fn new(ctx: &EngineContext, seed: ProfileSeed, student_id: Option<String>) -> Self {
    let rng = match ctx.settings.rng_seed {
      Some(s) => StdRng::seed_from_u64(s),
      None => StdRng::from_entropy(),
    };
    Self {
      assessor: ResponseAssessor::new(ctx.lexicon.clone()),
      tracker: DepthTracker::new(ctx.lexicon.clone()),
      prompts: ctx.prompts.clone(),
      settings: ctx.settings.clone(),
      rng,
      phase: EnginePhase::Uninitialized,
      problem: String::new(),
      student_id,
      turns: Vec::new(),
      depth: DepthState::default(),
      difficulty: DifficultyState::new(seed.difficulty),
      check_log: Vec::new(),
      check_count: 0,
      last_check_turn: 0,
      rule_violations: 0,
      effectiveness: seed.history,
      pending: None,
    }
  }

  /// Rebuild an engine from a persisted record.
  pub fn restore(ctx: &EngineContext, record: SessionRecord) -> Self {
    let seed = ProfileSeed { difficulty: record.difficulty, history: BTreeMap::new() };
    let mut engine = Self::new(ctx, seed, record.student_id);
    engine.phase = record.phase;
    engine.problem = record.problem;
    engine.turns = record.turns;
    engine.depth = record.depth_state;
    engine.difficulty.struggling_counter = record.struggling_counter;
    engine.check_count = record.understanding_check_log.len();
    engine.check_log = record.understanding_check_log;
    engine.last_check_turn = record.last_check_turn;
    engine.rule_violations = record.rule_violations;
    engine
  }

  pub fn snapshot(&self) -> SessionRecord {
    SessionRecord {
      problem: self.problem.clone(),
      student_id: self.student_id.clone(),
      phase: self.phase,
      turns: self.turns.clone(),
      depth_state: self.depth.clone(),
      difficulty: self.difficulty.level,
      struggling_counter: self.difficulty.struggling_counter,
      understanding_check_log: self.check_log.clone(),
      last_check_turn: self.last_check_turn,
      rule_violations: self.rule_violations,
    }
  }

  // --- Accessors ---

  pub fn student_id(&self) -> Option<&str> { self.student_id.as_deref() }
  pub fn turn_count(&self) -> usize { self.turns.len() }

  #[cfg(test)]
  pub fn phase(&self) -> EnginePhase { self.phase }
  #[cfg(test)]
  pub fn turns(&self) -> &[Turn] { &self.turns }
  #[cfg(test)]
  pub fn depth_state(&self) -> &DepthState { &self.depth }
  #[cfg(test)]
  pub fn struggling_counter(&self) -> u32 { self.difficulty.struggling_counter }
  #[cfg(test)]
  pub fn understanding_check_log(&self) -> &[UnderstandingCheck] { &self.check_log }
  #[cfg(test)]
  pub fn understanding_check_count(&self) -> usize { self.check_count }
  #[cfg(test)]
  pub fn rule_violations(&self) -> u32 { self.rule_violations }

  fn invalid(&self, operation: &'static str) -> EngineError {
    EngineError::InvalidState { operation, phase: self.phase }
  }

  fn student_turn_count(&self) -> usize {
    self.turns.iter().filter(|t| t.role == Role::Student).count()
  }

  fn student_confidences(&self) -> Vec<f64> {
    self.turns.iter().filter(|t| t.role == Role::Student).filter_map(|t| t.student_confidence).collect()
  }

  fn last_question_type(&self) -> Option<QuestionType> {
    self.turns.iter().rev().find(|t| t.role == Role::Tutor).and_then(|t| t.question_type)
  }

  /// Begin the session: record the problem and ask the opening question.
  #[instrument(level = "info", target = "socratic", skip(self, problem, backend), fields(problem_len = problem.len()))]
  pub async fn start_problem(
    &mut self,
    problem: &str,
    backend: &dyn CompletionBackend,
  ) -> Result<Opening, EngineError> {
    if self.phase != EnginePhase::Uninitialized {
      return Err(self.invalid("start a problem"));
    }

    let question_type = selector::initial_question_type(problem);
    self.problem = problem.trim().to_string();
    self.turns.push(Turn::system(format!("Problem: {}", self.problem)));
    self.phase = EnginePhase::ProblemStarted;
    self.pending = Some(PendingReply { question_type, is_check: false });

    let guidance = prompt::compose_opening(&self.prompts, &self.problem, question_type, self.difficulty.level);
    let messages = prompt::build_messages(&self.prompts, &guidance, &self.turns);
    let (reply, fallback_used) = match self.call_backend(backend, &messages).await {
      Ok(text) => (text, false),
      Err(e) => {
        warn!(target: "socratic", backend = backend.name(), error = %e, "Opening question fell back to canned prompt");
        (prompt::canned_question(question_type).to_string(), true)
      }
    };
    let reply = self.screen_reply(reply, question_type);

    self.turns.push(Turn::tutor(reply.clone(), question_type, self.depth.current_depth, false));
    self.pending = None;
    self.phase = EnginePhase::AwaitingStudent;
    debug!(target: "socratic", %question_type, difficulty = %self.difficulty.level, fallback_used, "Opening question asked");

    Ok(Opening { reply, question_type, difficulty: self.difficulty.level, fallback_used })
  }

  /// Process one student reply and produce the tutor's next question.
  #[instrument(level = "info", target = "socratic", skip(self, text, backend), fields(text_len = text.len()))]
  pub async fn respond_to_student(
    &mut self,
    text: &str,
    backend: &dyn CompletionBackend,
  ) -> Result<TurnOutcome, EngineError> {
    self.close_abandoned_turn();
    if self.phase != EnginePhase::AwaitingStudent {
      return Err(self.invalid("respond to a student"));
    }

    // 1) Decide everything from the current state, without mutating it.
    let assessment = self.assessor.assess(text);
    let concepts = self.tracker.concepts_in(text);
    let depth = self.tracker.update(&self.depth, &assessment, text);

    let mut confidences = self.student_confidences();
    confidences.push(assessment.confidence_level);
    let difficulty = difficulty::update(self.difficulty, &assessment, &confidences, depth.current_depth);

    let student_turn = self.student_turn_count() + 1;
    let since_last_check = student_turn - self.last_check_turn;
    let previous = self.last_question_type();
    let is_check = checks::should_check(&assessment, &depth, since_last_check, &confidences);
    let question_type = if is_check {
      checks::check_question_type(&assessment)
    } else {
      selector::select(&assessment, &depth, previous, &mut self.rng)
    };

    let effectiveness = previous.map(|qt| EffectivenessSample {
      question_type: qt,
      student_confidence: assessment.confidence_level,
      advanced: assessment.readiness_for_advancement,
      conceptual_understanding: assessment.conceptual_understanding,
    });

    // 2) Commit all at once, before the only suspension point.
    self.turns.push(Turn::student(text, &assessment, concepts));
    self.depth = depth;
    self.difficulty = difficulty;
    if is_check {
      self.check_log.push(UnderstandingCheck {
        turn_index: student_turn,
        question_type,
        student_confidence_at_check: assessment.confidence_level,
      });
      self.check_count += 1;
      self.last_check_turn = student_turn;
    }
    if let Some(sample) = &effectiveness {
      self.effectiveness.entry(sample.question_type).or_default().absorb(sample);
    }
    self.pending = Some(PendingReply { question_type, is_check });
    self.phase = EnginePhase::ProcessingTurn;

    debug!(
      target: "socratic",
      confidence = assessment.confidence_level,
      misconceptions = assessment.misconceptions.len(),
      thinking = assessment.depth_of_thinking,
      depth = self.depth.current_depth,
      difficulty = %self.difficulty.level,
      struggling = self.difficulty.struggling_counter,
      %question_type,
      is_check,
      "Turn decided"
    );

    // 3) Ask the backend for wording.
    let guidance = prompt::compose(&Guidance {
      problem: &self.problem,
      question_type,
      is_understanding_check: is_check,
      difficulty: self.difficulty.level,
      struggling_counter: self.difficulty.struggling_counter,
      should_deepen_inquiry: self.depth.should_deepen_inquiry,
    });
    let messages = prompt::build_messages(&self.prompts, &guidance, &self.turns);
    let (reply, fallback_used) = match self.call_backend(backend, &messages).await {
      Ok(text) => (text, false),
      Err(e) => {
        warn!(target: "socratic", backend = backend.name(), error = %e, "Completion failed; using fallback reply");
        (self.settings.fallback_reply.clone(), true)
      }
    };
    let reply = self.screen_reply(reply, question_type);

    self.turns.push(Turn::tutor(reply.clone(), question_type, self.depth.current_depth, is_check));
    self.pending = None;
    self.phase = EnginePhase::AwaitingStudent;

    Ok(TurnOutcome {
      reply,
      question_type,
      is_understanding_check: is_check,
      assessment,
      depth: self.depth.clone(),
      difficulty: self.difficulty.level,
      struggling_counter: self.difficulty.struggling_counter,
      fallback_used,
      effectiveness,
    })
  }

  /// Mark the session finished. Further turns are rejected.
  pub fn complete(&mut self) -> Result<(), EngineError> {
    match self.phase {
      EnginePhase::Uninitialized => Err(self.invalid("complete")),
      EnginePhase::Completed => Ok(()),
      _ => {
        self.close_abandoned_turn();
        self.phase = EnginePhase::Completed;
        Ok(())
      }
    }
  }

  pub fn generate_analytics(&self) -> SessionAnalytics {
    let band = ThoughtfulBand {
      min_secs: self.settings.thoughtful_gap_min_secs,
      max_secs: self.settings.thoughtful_gap_max_secs,
    };
    analytics::generate(
      &self.turns,
      &self.depth,
      band,
      SessionCounters {
        difficulty: self.difficulty.level,
        struggling_counter: self.difficulty.struggling_counter,
        rule_violations: self.rule_violations,
        effectiveness: &self.effectiveness,
      },
    )
  }

  /// Non-system turns in order, for display or audit.
  pub fn export_conversation(&self) -> Vec<Turn> {
    self.turns.iter().filter(|t| t.role != Role::System).cloned().collect()
  }

  async fn call_backend(
    &self,
    backend: &dyn CompletionBackend,
    messages: &[ChatMessage],
  ) -> Result<String, CompletionError> {
    let secs = self.settings.completion_timeout_secs;
    match tokio::time::timeout(Duration::from_secs(secs), backend.complete(messages)).await {
      Ok(res) => res,
      Err(_) => Err(CompletionError::Timeout(secs)),
    }
  }

  /// Swap a reply that gives the answer away for a canned question.
  fn screen_reply(&mut self, reply: String, question_type: QuestionType) -> String {
    if violates_no_answer_rule(&reply) {
      self.rule_violations += 1;
      warn!(target: "socratic", %question_type, violations = self.rule_violations, "Tutor reply stated an answer; replaced");
      prompt::canned_question(question_type).to_string()
    } else {
      reply
    }
  }

  /// A turn whose future was dropped mid-call still owes a tutor reply.
  fn close_abandoned_turn(&mut self) {
    let fallback_for = |qt: QuestionType, settings: &EngineSettings, phase: EnginePhase| match phase {
      EnginePhase::ProblemStarted => prompt::canned_question(qt).to_string(),
      _ => settings.fallback_reply.clone(),
    };
    if !matches!(self.phase, EnginePhase::ProblemStarted | EnginePhase::ProcessingTurn) {
      return;
    }
    let pending = self.pending.take().unwrap_or(PendingReply {
      question_type: self.last_question_type().unwrap_or_else(|| selector::initial_question_type(&self.problem)),
      is_check: false,
    });
    let reply = fallback_for(pending.question_type, &self.settings, self.phase);
    warn!(target: "socratic", phase = %self.phase, question_type = %pending.question_type, "Closing abandoned turn with fallback reply");
    self.turns.push(Turn::tutor(reply, pending.question_type, self.depth.current_depth, pending.is_check));
    self.phase = EnginePhase::AwaitingStudent;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use async_trait::async_trait;
  use std::collections::VecDeque;
  use std::sync::Mutex;

  use crate::openai::Offline;

  /// Replies from a script; records the system guidance of every call.
  #[derive(Default)]
  struct Scripted {
    replies: Mutex<VecDeque<Result<String, ()>>>,
    guidance: Mutex<Vec<String>>,
  }

  impl Scripted {
    fn with(replies: &[Result<&str, ()>]) -> Self {
      let s = Self::default();
      *s.replies.lock().unwrap() = replies.iter().map(|r| r.map(str::to_string)).collect();
      s
    }
    fn last_guidance(&self) -> String {
      self.guidance.lock().unwrap().last().cloned().unwrap_or_default()
    }
  }

  #[async_trait]
  impl CompletionBackend for Scripted {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CompletionError> {
      self.guidance.lock().unwrap().push(messages[0].content.clone());
      match self.replies.lock().unwrap().pop_front() {
        Some(Ok(t)) => Ok(t),
        Some(Err(())) => Err(CompletionError::EmptyChoices),
        None => Ok("What do you notice about the equation?".into()),
      }
    }
    fn name(&self) -> &str { "scripted" }
  }

  /// Never answers.
  struct Hanging;

  #[async_trait]
  impl CompletionBackend for Hanging {
    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, CompletionError> {
      std::future::pending::<()>().await;
      unreachable!()
    }
    fn name(&self) -> &str { "hanging" }
  }

  const CONFIDENT: &str =
    "I'm sure because if I subtract 5 from both sides then 2x is greater than 5, so what if I divide both sides by 2?";

  fn ctx() -> EngineContext {
    let settings = EngineSettings { rng_seed: Some(17), ..EngineSettings::default() };
    EngineContext::new(ConceptLexicon::builtin(), Prompts::default(), settings)
  }

  fn engine_at(level: DifficultyLevel) -> SocraticEngine {
    let seed = ProfileSeed { difficulty: level, history: BTreeMap::new() };
    SocraticEngine::new(&ctx(), seed, None)
  }

  fn assert_invariants(e: &SocraticEngine) {
    let d = e.depth_state();
    assert!(1 <= d.current_depth && d.current_depth <= d.max_depth_reached && d.max_depth_reached <= 5);
    assert_eq!(e.understanding_check_log().len(), e.understanding_check_count());
  }

  #[tokio::test]
  async fn respond_before_start_is_invalid_state() {
    let mut e = engine_at(DifficultyLevel::Intermediate);
    let err = e.respond_to_student("hi", &Scripted::default()).await.unwrap_err();
    assert_eq!(err, EngineError::InvalidState { operation: "respond to a student", phase: EnginePhase::Uninitialized });
    assert!(e.turns().is_empty());
  }

  #[tokio::test]
  async fn opening_then_struggling_reply() {
    let backend = Scripted::default();
    let mut e = engine_at(DifficultyLevel::Intermediate);

    let opening = e.start_problem("2x + 5 = 13", &backend).await.unwrap();
    assert_eq!(opening.question_type, QuestionType::Clarification);
    assert!(!opening.fallback_used);
    assert_eq!(e.phase(), EnginePhase::AwaitingStudent);
    assert!(backend.last_guidance().contains("2x + 5 = 13"));

    let out = e.respond_to_student("I don't know", &backend).await.unwrap();
    assert!((out.assessment.confidence_level - 0.2).abs() < 1e-9);
    assert_eq!(out.struggling_counter, 1);
    assert!(matches!(out.question_type, QuestionType::Clarification | QuestionType::Assumptions));
    assert_eq!(out.difficulty, DifficultyLevel::Intermediate);
    assert!(!out.is_understanding_check);
    assert_eq!(out.effectiveness.as_ref().map(|s| s.question_type), Some(QuestionType::Clarification));
    assert_invariants(&e);
  }

  #[tokio::test]
  async fn sustained_confidence_raises_difficulty_to_advanced_at_most() {
    let backend = Scripted::default();
    let mut e = engine_at(DifficultyLevel::Beginner);
    e.start_problem("Solve 2x + 5 = 13", &backend).await.unwrap();

    let mut levels = vec![];
    for _ in 0..5 {
      let out = e.respond_to_student(CONFIDENT, &backend).await.unwrap();
      assert!(out.assessment.confidence_level > 0.8);
      assert!(out.assessment.depth_of_thinking >= 3);
      assert!(out.assessment.misconceptions.is_empty());
      levels.push(out.difficulty);
      assert_invariants(&e);
    }
    assert_eq!(
      levels,
      vec![
        DifficultyLevel::Beginner,
        DifficultyLevel::Intermediate,
        DifficultyLevel::Advanced,
        DifficultyLevel::Advanced,
        DifficultyLevel::Advanced,
      ]
    );
    assert_eq!(e.depth_state().max_depth_reached, 5);
  }

  #[tokio::test]
  async fn backend_failure_keeps_committed_state() {
    let backend = Scripted::with(&[Ok("What is the problem asking?"), Err(())]);
    let mut e = engine_at(DifficultyLevel::Intermediate);
    e.start_problem("2x + 5 = 13", &backend).await.unwrap();

    let out = e.respond_to_student("I don't know", &backend).await.unwrap();
    assert!(out.fallback_used);
    assert_eq!(out.reply, EngineSettings::default().fallback_reply);
    assert_eq!(e.struggling_counter(), 1);
    assert_eq!(e.turns().len(), 4);
    assert_eq!(e.phase(), EnginePhase::AwaitingStudent);
  }

  #[tokio::test(start_paused = true)]
  async fn timed_out_completion_falls_back_and_keeps_state() {
    let settings = EngineSettings { completion_timeout_secs: 2, rng_seed: Some(17), ..EngineSettings::default() };
    let ctx = EngineContext::new(ConceptLexicon::builtin(), Prompts::default(), settings);
    let mut e = SocraticEngine::new(&ctx, ProfileSeed::default(), None);
    e.start_problem("2x + 5 = 13", &Scripted::default()).await.unwrap();

    let out = e.respond_to_student("I don't know", &Hanging).await.unwrap();
    assert!(out.fallback_used);
    assert_eq!(out.reply, EngineSettings::default().fallback_reply);
    assert_eq!(out.struggling_counter, 1);
    assert_eq!(e.struggling_counter(), 1);
    assert_eq!(e.phase(), EnginePhase::AwaitingStudent);
    assert_eq!(e.turns().last().map(|t| t.text.as_str()), Some(out.reply.as_str()));
    assert_eq!(e.turns().len(), 4);
  }

  #[tokio::test(start_paused = true)]
  async fn timed_out_opening_uses_canned_question() {
    let settings = EngineSettings { completion_timeout_secs: 2, ..EngineSettings::default() };
    let ctx = EngineContext::new(ConceptLexicon::builtin(), Prompts::default(), settings);
    let mut e = SocraticEngine::new(&ctx, ProfileSeed::default(), None);
    let opening = e.start_problem("Solve 2x + 5 = 13", &Hanging).await.unwrap();
    assert!(opening.fallback_used);
    assert_eq!(opening.reply, prompt::canned_question(QuestionType::Clarification));
    assert_eq!(e.phase(), EnginePhase::AwaitingStudent);
  }

  #[tokio::test]
  async fn offline_backend_uses_canned_opening() {
    let mut e = engine_at(DifficultyLevel::Intermediate);
    let opening = e.start_problem("Explain why 3/4 > 2/3", &Offline).await.unwrap();
    assert!(opening.fallback_used);
    assert_eq!(opening.question_type, QuestionType::Evidence);
    assert_eq!(opening.reply, prompt::canned_question(QuestionType::Evidence));
  }

  #[tokio::test]
  async fn answer_revealing_reply_is_replaced() {
    let backend = Scripted::with(&[Ok("What are we solving for?"), Ok("The answer is 4")]);
    let mut e = engine_at(DifficultyLevel::Intermediate);
    e.start_problem("2x + 5 = 13", &backend).await.unwrap();
    let out = e.respond_to_student("x is 4", &backend).await.unwrap();
    assert_eq!(out.reply, prompt::canned_question(out.question_type));
    assert_eq!(e.rule_violations(), 1);
    assert_eq!(e.generate_analytics().rule_violations, 1);
    assert!(e.export_conversation().iter().all(|t| t.text != "The answer is 4"));
  }

  #[tokio::test]
  async fn completed_and_restarted_sessions_are_rejected() {
    let backend = Scripted::default();
    let mut e = engine_at(DifficultyLevel::Intermediate);
    assert!(e.complete().is_err());
    e.start_problem("2x + 5 = 13", &backend).await.unwrap();
    assert!(matches!(e.start_problem("again", &backend).await, Err(EngineError::InvalidState { .. })));

    e.complete().unwrap();
    e.complete().unwrap();
    let before = e.turns().len();
    let err = e.respond_to_student("more", &backend).await.unwrap_err();
    assert_eq!(err, EngineError::InvalidState { operation: "respond to a student", phase: EnginePhase::Completed });
    assert_eq!(e.turns().len(), before);
  }

  #[tokio::test]
  async fn fourth_quiet_turn_is_an_understanding_check() {
    let backend = Scripted::default();
    let mut e = engine_at(DifficultyLevel::Intermediate);
    e.start_problem("2x + 5 = 13", &backend).await.unwrap();

    for i in 1..=4 {
      let out = e.respond_to_student("x is 4", &backend).await.unwrap();
      assert_eq!(out.is_understanding_check, i == 4, "turn {i}");
      assert_invariants(&e);
    }
    let log = e.understanding_check_log();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].turn_index, 4);
    // confidence 0.5, no flags, shallow thinking
    assert_eq!(log[0].question_type, QuestionType::Evidence);
    assert!(backend.last_guidance().contains("understanding check"));
    assert_eq!(e.turns().last().map(Turn::is_check), Some(true));

    // Counter resets from the check.
    let out = e.respond_to_student("x is 4", &backend).await.unwrap();
    assert!(!out.is_understanding_check);
  }

  #[tokio::test]
  async fn misconception_probe_asks_for_evidence() {
    let backend = Scripted::default();
    let mut e = engine_at(DifficultyLevel::Intermediate);
    e.start_problem("2x + 5 = 13", &backend).await.unwrap();
    let first = e.respond_to_student("You always subtract first", &backend).await.unwrap();
    assert!(!first.is_understanding_check);
    assert_eq!(first.question_type, QuestionType::Evidence);
    let second = e.respond_to_student("You never divide first", &backend).await.unwrap();
    assert!(second.is_understanding_check);
    assert_eq!(second.question_type, QuestionType::Evidence);
  }

  #[tokio::test]
  async fn mixed_session_holds_invariants() {
    let backend = Scripted::default();
    let mut e = engine_at(DifficultyLevel::Advanced);
    e.start_problem("Find the slope of y = 3x + 2", &backend).await.unwrap();
    let replies = [
      "I don't know", "", "maybe the slope is the coefficient", CONFIDENT, "you always take the constant",
      "hmm", "I'm certain the slope is 3 because the coefficient multiplies x", CONFIDENT, "not sure", CONFIDENT,
    ];
    for r in replies {
      e.respond_to_student(r, &backend).await.unwrap();
      assert_invariants(&e);
    }
    let a = e.generate_analytics();
    assert_eq!(a, e.generate_analytics());
    assert_eq!(a.confidence_sequence.len(), replies.len());
    assert_eq!(a.total_turns, 1 + 2 * replies.len());
    assert_eq!(a.understanding_check_count, e.understanding_check_count());
    assert_eq!(e.export_conversation().len(), a.total_turns);
    assert!(e.export_conversation().iter().all(|t| t.role != Role::System));
  }

  #[tokio::test]
  async fn abandoned_turn_is_committed_and_closed_on_next_call() {
    let mut e = engine_at(DifficultyLevel::Intermediate);
    e.start_problem("2x + 5 = 13", &Scripted::default()).await.unwrap();

    let dropped = tokio::time::timeout(Duration::from_millis(20), e.respond_to_student("I don't know", &Hanging)).await;
    assert!(dropped.is_err());
    assert_eq!(e.phase(), EnginePhase::ProcessingTurn);
    assert_eq!(e.struggling_counter(), 1, "updates were applied before the call");
    assert_eq!(e.turns().last().map(|t| t.role), Some(Role::Student));

    let out = e.respond_to_student("maybe subtract 5", &Scripted::default()).await.unwrap();
    assert!(!out.fallback_used);
    let roles: Vec<Role> = e.turns().iter().map(|t| t.role).collect();
    assert_eq!(
      roles,
      vec![Role::System, Role::Tutor, Role::Student, Role::Tutor, Role::Student, Role::Tutor]
    );
    assert_eq!(e.turns()[3].text, EngineSettings::default().fallback_reply);
  }

  #[tokio::test]
  async fn snapshot_restore_continues_the_session() {
    let backend = Scripted::default();
    let mut e = engine_at(DifficultyLevel::Intermediate);
    e.start_problem("2x + 5 = 13", &backend).await.unwrap();
    e.respond_to_student("I don't know", &backend).await.unwrap();
    e.respond_to_student("not sure", &backend).await.unwrap();

    let record = e.snapshot();
    let mut restored = SocraticEngine::restore(&ctx(), record.clone());
    assert_eq!(restored.snapshot(), record);
    assert_eq!(restored.struggling_counter(), 2);

    let out = restored.respond_to_student("no idea", &backend).await.unwrap();
    assert_eq!(out.struggling_counter, 3);
    assert_eq!(out.difficulty, DifficultyLevel::Beginner);
  }
}

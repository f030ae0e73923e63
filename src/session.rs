//! Practice Session Orchestrator.
//!
//! `Progress` owns the learner's mutable records (concept states, the attempt log and
//! preferences) on top of a `KeyValueStore`. `build_queue` turns a topic and a mode into
//! a `PracticeSession`, which serves questions one at a time and routes answers back
//! through `Progress`.
//!
//! Every mutation is applied in memory first and then saved. When saving fails the
//! in-memory change stands, the failure is handed back to the caller
//! (`SubmitOutcome::unsaved` or `SessionError::Store`) and the next `flush` retries.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::{PumpkinConfig, SchedulerConfig};
use crate::domain::{Attempt, Concept, ConceptState, Mastery, Question, Topic, UserPrefs};
use crate::grading::{grade, Grade, GradeError, Submission};
use crate::protocol::{self, AnswerFeedback, ConceptOverview, QuestionView, TopicOverview};
use crate::scheduler::{self, rank_at_risk, select_question, RecentHistory, SchedulerSummary};
use crate::store::{read_json, write_json, KeyValueStore, StoreError, ATTEMPTS_KEY, PREFS_KEY, STATES_KEY};

/// Upper bound on a boss session's time limit.
const MAX_BOSS_SECS: u64 = 86_400;

#[derive(Error, Debug)]
pub enum SessionError {
  #[error("Unknown question: {0}")]
  UnknownQuestion(String),

  #[error("Unknown concept: {0}")]
  UnknownConcept(String),

  #[error("Submission does not fit question {question_id}: {source}")]
  SubmissionMismatch {
    question_id: String,
    #[source]
    source: GradeError,
  },

  #[error("No question is waiting for an answer")]
  NoActiveQuestion,

  /// The change was applied in memory but could not be persisted.
  #[error("Progress not saved: {0}")]
  Store(#[from] StoreError),
}

/// Everything the caller needs after one answer.
#[derive(Debug)]
pub struct SubmitOutcome {
  pub attempt: Attempt,
  pub state: ConceptState,
  pub grade: Grade,
  pub feedback: AnswerFeedback,
  /// Set when the store rejected the write; the progress stays dirty.
  pub unsaved: Option<StoreError>,
}

/// Learner records behind a durable store.
pub struct Progress<S> {
  store: S,
  states: BTreeMap<String, ConceptState>,
  attempts: Vec<Attempt>,
  prefs: UserPrefs,
  dirty: bool,
}

impl<S: KeyValueStore> Progress<S> {
  /// Empty progress that has never been saved.
  pub fn new(store: S) -> Self {
    Self { store, states: BTreeMap::new(), attempts: Vec::new(), prefs: UserPrefs::default(), dirty: false }
  }

  /// Read everything from `store`. Corrupt entries are skipped one by one; only a
  /// failing backend is an error.
  #[instrument(level = "debug", target = "session", skip(store))]
  pub fn load(store: S) -> Result<Self, StoreError> {
    let raw_states: serde_json::Value = read_json(&store, STATES_KEY, serde_json::Value::Null)?;
    let raw_attempts: serde_json::Value = read_json(&store, ATTEMPTS_KEY, serde_json::Value::Null)?;
    let prefs: UserPrefs = read_json(&store, PREFS_KEY, UserPrefs::default())?;

    let states: BTreeMap<String, ConceptState> = decode_entries::<ConceptState>(raw_states, "concept state", "conceptId")
      .into_iter()
      .map(|s| (s.concept_id.clone(), s))
      .collect();
    let attempts = decode_entries::<Attempt>(raw_attempts, "attempt", "id");
    info!(target: "session", states = states.len(), attempts = attempts.len(), topics = prefs.selected_topics.len(), "Progress loaded");
    Ok(Self { store, states, attempts, prefs, dirty: false })
  }

  pub fn store(&self) -> &S {
    &self.store
  }

  pub fn states(&self) -> &BTreeMap<String, ConceptState> {
    &self.states
  }

  pub fn state(&self, concept_id: &str) -> Option<&ConceptState> {
    self.states.get(concept_id)
  }

  pub fn attempts(&self) -> &[Attempt] {
    &self.attempts
  }

  pub fn prefs(&self) -> &UserPrefs {
    &self.prefs
  }

  /// `true` while some in-memory change has not reached the store.
  pub fn is_dirty(&self) -> bool {
    self.dirty
  }

  pub fn answered_question_ids(&self) -> HashSet<String> {
    self.attempts.iter().map(|a| a.question_id.clone()).collect()
  }

  /// States of the concepts of `topic`, in concept order.
  pub fn topic_states<'a>(&'a self, topic: &'a Topic) -> impl Iterator<Item = &'a ConceptState> + 'a {
    topic.concept_ids().filter_map(move |id| self.states.get(id))
  }

  /// Write states, attempts and prefs. Clears the dirty flag only on success.
  #[instrument(level = "debug", target = "session", skip(self))]
  pub fn flush(&mut self) -> Result<(), StoreError> {
    let result = write_json(&self.store, STATES_KEY, &self.states)
      .and_then(|_| write_json(&self.store, ATTEMPTS_KEY, &self.attempts))
      .and_then(|_| write_json(&self.store, PREFS_KEY, &self.prefs));
    match result {
      Ok(()) => {
        self.dirty = false;
        Ok(())
      }
      Err(e) => {
        error!(target: "session", error = %e, "Failed to persist progress; keeping in-memory state");
        Err(e)
      }
    }
  }

  fn touch(&mut self) -> Result<(), SessionError> {
    self.dirty = true;
    self.flush().map_err(SessionError::from)
  }

  /// Grade `submission`, log the attempt and move the concept state forward.
  #[instrument(level = "debug", target = "session", skip(self, topic, submission, cfg), fields(topic = %topic.id))]
  pub fn submit_answer(
    &mut self,
    topic: &Topic,
    question_id: &str,
    submission: Submission,
    cfg: &SchedulerConfig,
    now: DateTime<Utc>,
  ) -> Result<SubmitOutcome, SessionError> {
    let (concept, question) = topic
      .question(question_id)
      .ok_or_else(|| SessionError::UnknownQuestion(question_id.to_string()))?;
    let grade = grade(question, &submission)
      .map_err(|source| SessionError::SubmissionMismatch { question_id: question_id.to_string(), source })?;

    let attempt = Attempt {
      id: Uuid::new_v4().to_string(),
      question_id: question.id.clone(),
      concept_id: concept.id.clone(),
      correct: grade.correct,
      timestamp: now,
      selected_answer: submission.to_string(),
    };
    let previous = self.states.get(&concept.id).cloned().unwrap_or_else(|| ConceptState::new(concept.id.clone(), now));
    let state = scheduler::next_concept_state(&previous, &attempt, cfg);
    self.states.insert(concept.id.clone(), state.clone());
    self.attempts.push(attempt.clone());
    self.dirty = true;

    let feedback = protocol::to_feedback(topic, concept, question, &submission, &grade, state.mastery, state.next_review_at);
    let unsaved = self.flush().err();
    debug!(target: "session", question = %question.id, correct = grade.correct, mastery = %state.mastery, saved = unsaved.is_none(), "Answer recorded");
    Ok(SubmitOutcome { attempt, state, grade, feedback, unsaved })
  }

  /// Same as `submit_answer` for a textual answer (`B`, `B|RC`, `2,1,3`, free text).
  pub fn submit_text(
    &mut self,
    topic: &Topic,
    question_id: &str,
    raw: &str,
    cfg: &SchedulerConfig,
    now: DateTime<Utc>,
  ) -> Result<SubmitOutcome, SessionError> {
    let (_, question) = topic
      .question(question_id)
      .ok_or_else(|| SessionError::UnknownQuestion(question_id.to_string()))?;
    let submission = Submission::parse(&question.kind, raw)
      .map_err(|source| SessionError::SubmissionMismatch { question_id: question_id.to_string(), source })?;
    self.submit_answer(topic, question_id, submission, cfg, now)
  }

  /// The learner flagged a question as a good one. Creates the concept state if needed.
  pub fn signal_good_question(&mut self, topic: &Topic, question_id: &str, now: DateTime<Utc>) -> Result<ConceptState, SessionError> {
    let (concept, _) = topic
      .question(question_id)
      .ok_or_else(|| SessionError::UnknownQuestion(question_id.to_string()))?;
    let next = scheduler::record_good_question(self.states.get(&concept.id), &concept.id, now);
    self.states.insert(concept.id.clone(), next.clone());
    debug!(target: "session", concept = %concept.id, signals = next.good_question_signal, "Good question signal");
    self.touch()?;
    Ok(next)
  }

  /// Add `topic_id` to the selection. Returns `false` when it was already selected.
  pub fn select_topic(&mut self, topic_id: &str) -> Result<bool, SessionError> {
    if self.prefs.selected_topics.iter().any(|t| t == topic_id) {
      return Ok(false);
    }
    self.prefs.selected_topics.push(topic_id.to_string());
    self.touch()?;
    Ok(true)
  }

  /// Flip the selection of `topic_id` without touching its progress. Returns whether it
  /// is selected afterwards.
  pub fn toggle_topic(&mut self, topic_id: &str) -> Result<bool, SessionError> {
    let before = self.prefs.selected_topics.len();
    self.prefs.selected_topics.retain(|t| t != topic_id);
    let selected = self.prefs.selected_topics.len() == before;
    if selected {
      self.prefs.selected_topics.push(topic_id.to_string());
    }
    self.touch()?;
    Ok(selected)
  }

  /// Drop `topic` from the selection and purge its concept states and attempts.
  /// Concepts that another still-selected topic in `library` also declares are kept,
  /// since progress is keyed by concept id.
  #[instrument(level = "info", target = "session", skip(self, topic, library), fields(topic = %topic.id))]
  pub fn unselect_topic<'a, I>(&mut self, topic: &Topic, library: I) -> Result<(), SessionError>
  where
    I: IntoIterator<Item = &'a Topic>,
  {
    self.prefs.selected_topics.retain(|t| t != &topic.id);
    let shared: HashSet<&str> = library
      .into_iter()
      .filter(|other| other.id != topic.id && self.prefs.selected_topics.contains(&other.id))
      .flat_map(|other| other.concept_ids())
      .collect();
    let concept_ids: HashSet<&str> = topic.concept_ids().filter(|id| !shared.contains(id)).collect();
    let question_ids: HashSet<&str> = topic
      .questions()
      .filter(|q| concept_ids.contains(q.concept_id.as_str()))
      .map(|q| q.id.as_str())
      .collect();

    let states_before = self.states.len();
    self.states.retain(|id, _| !concept_ids.contains(id.as_str()));
    let attempts_before = self.attempts.len();
    self.attempts.retain(|a| !question_ids.contains(a.question_id.as_str()));
    info!(
      target: "session",
      states_removed = states_before - self.states.len(),
      attempts_removed = attempts_before - self.attempts.len(),
      shared_kept = topic.concepts.len() - concept_ids.len(),
      "Topic unselected and purged"
    );
    self.touch()
  }

  /// Remember that a curiosity was shown. Returns `false` when it was already recorded.
  pub fn mark_curiosity_seen(&mut self, curiosity_id: &str) -> Result<bool, SessionError> {
    if self.prefs.curiosities_viewed.iter().any(|c| c == curiosity_id) {
      return Ok(false);
    }
    self.prefs.curiosities_viewed.push(curiosity_id.to_string());
    self.touch()?;
    Ok(true)
  }

  pub fn summary(&self, now: DateTime<Utc>) -> SchedulerSummary {
    scheduler::scheduler_summary(self.states.values(), now)
  }

  /// Per-concept mastery, due-ness and unlock status for a topic page.
  pub fn topic_overview(&self, topic: &Topic, now: DateTime<Utc>) -> TopicOverview {
    let concepts = topic
      .concepts
      .iter()
      .map(|c| {
        let state = self.states.get(&c.id);
        ConceptOverview {
          id: c.id.clone(),
          title: c.title.clone(),
          summary: c.summary.clone(),
          prerequisites: c.prerequisites.clone(),
          mastery: state.map(|s| s.mastery).unwrap_or_default(),
          started: state.is_some(),
          due: state.map_or(false, |s| s.is_due(now)),
          unlocked: self.is_unlocked(topic, c),
          question_count: c.questions.len(),
        }
      })
      .collect();
    TopicOverview { id: topic.id.clone(), title: topic.title.clone(), description: topic.description.clone(), concepts }
  }

  /// Every prerequisite that resolves inside `topic` has reached `Fragile`.
  pub fn is_unlocked(&self, topic: &Topic, concept: &Concept) -> bool {
    topic
      .prerequisites_of(concept)
      .iter()
      .all(|p| self.states.get(&p.id).map_or(false, |s| s.mastery >= Mastery::Fragile))
  }
}

/// Decode a stored collection entry by entry. Accepts a JSON array or an object keyed by
/// id; in the keyed form a missing `id_field` is restored from the key.
fn decode_entries<T: DeserializeOwned>(value: serde_json::Value, what: &str, id_field: &str) -> Vec<T> {
  let entries: Vec<serde_json::Value> = match value {
    serde_json::Value::Null => return Vec::new(),
    serde_json::Value::Array(items) => items,
    serde_json::Value::Object(map) => map
      .into_iter()
      .map(|(key, mut entry)| {
        if let serde_json::Value::Object(fields) = &mut entry {
          fields.entry(id_field).or_insert(serde_json::Value::String(key));
        }
        entry
      })
      .collect(),
    other => {
      warn!(target: "session", what, found = %crate::util::trunc_for_log(&other.to_string(), 80), "Stored collection has an unexpected shape; ignoring it");
      return Vec::new();
    }
  };
  entries
    .into_iter()
    .filter_map(|entry| match serde_json::from_value::<T>(entry) {
      Ok(v) => Some(v),
      Err(e) => {
        warn!(target: "session", what, error = %e, "Skipping corrupt stored entry");
        None
      }
    })
    .collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PracticeMode {
  /// Top at-risk concepts.
  Daily,
  /// Questions answered wrong before.
  Review,
  /// New concepts; refused while reviews are due.
  Learn,
  /// Timed mixed sample that ignores due-ness.
  Boss,
}

impl PracticeMode {
  pub fn parse(raw: &str) -> Option<Self> {
    match raw.trim().to_ascii_lowercase().as_str() {
      "daily" | "at-risk" | "at_risk" => Some(PracticeMode::Daily),
      "review" => Some(PracticeMode::Review),
      "learn" => Some(PracticeMode::Learn),
      "boss" => Some(PracticeMode::Boss),
      _ => None,
    }
  }
}

impl fmt::Display for PracticeMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      PracticeMode::Daily => "daily",
      PracticeMode::Review => "review",
      PracticeMode::Learn => "learn",
      PracticeMode::Boss => "boss",
    };
    f.write_str(s)
  }
}

pub enum QueuePlan<'t> {
  Ready(PracticeSession<'t>),
  /// Learning is refused until these due concepts are reviewed (most at risk first).
  LearnBlocked { due_concepts: Vec<String> },
}

/// Build the question queue for `topic` in `mode`. `focus` narrows review and learn
/// sessions to one concept.
#[instrument(level = "info", target = "session", skip(topic, mode, progress, cfg, rng), fields(topic = %topic.id, %mode))]
pub fn build_queue<'t, S, R>(
  topic: &'t Topic,
  mode: PracticeMode,
  focus: Option<&str>,
  progress: &Progress<S>,
  cfg: &PumpkinConfig,
  now: DateTime<Utc>,
  rng: &mut R,
) -> Result<QueuePlan<'t>, SessionError>
where
  S: KeyValueStore,
  R: Rng + ?Sized,
{
  let focus_concept = match focus {
    Some(id) => Some(topic.concept(id).ok_or_else(|| SessionError::UnknownConcept(id.to_string()))?),
    None => None,
  };
  let answered = progress.answered_question_ids();
  let session_cfg = &cfg.session;

  let (questions, deadline) = match mode {
    PracticeMode::Daily => {
      let ranked = rank_at_risk(progress.topic_states(topic), now, &cfg.scheduler);
      let mut taken: HashSet<&str> = HashSet::new();
      let mut recent = RecentHistory::new(cfg.scheduler.recent_history_len);
      let mut out = Vec::new();
      for state in ranked.into_iter().take(session_cfg.daily_concepts) {
        let Some(concept) = topic.concept(&state.concept_id) else { continue };
        for _ in 0..session_cfg.questions_per_concept {
          let pool = concept.questions.iter().filter(|q| !taken.contains(q.id.as_str()));
          let Some(q) = select_question(pool, &recent, &answered, rng) else { break };
          taken.insert(q.id.as_str());
          recent.record(q);
          out.push(q);
        }
      }
      (out, None)
    }
    PracticeMode::Review => {
      let mut seen: HashSet<&str> = HashSet::new();
      let mut out = Vec::new();
      for a in progress.attempts().iter().rev().filter(|a| !a.correct) {
        if out.len() >= session_cfg.review_limit {
          break;
        }
        let Some((concept, q)) = topic.question(&a.question_id) else { continue };
        if focus_concept.map_or(false, |f| f.id != concept.id) || !seen.insert(q.id.as_str()) {
          continue;
        }
        out.push(q);
      }
      (out, None)
    }
    PracticeMode::Learn => {
      let due = rank_at_risk(progress.states().values(), now, &cfg.scheduler);
      if !due.is_empty() {
        let due_concepts: Vec<String> = due.iter().map(|s| s.concept_id.clone()).collect();
        info!(target: "session", due = due_concepts.len(), "Learning blocked by due reviews");
        return Ok(QueuePlan::LearnBlocked { due_concepts });
      }
      let concepts: Vec<&Concept> = match focus_concept {
        Some(c) => vec![c],
        None => topic
          .concepts
          .iter()
          .filter(|c| progress.state(&c.id).is_none() && progress.is_unlocked(topic, c))
          .collect(),
      };
      let mut groups: HashSet<&str> = HashSet::new();
      let out: Vec<&Question> = concepts
        .into_iter()
        .flat_map(|c| c.questions.iter())
        .filter(|q| groups.insert(q.group_key()))
        .take(session_cfg.learn_limit)
        .collect();
      (out, None)
    }
    PracticeMode::Boss => {
      let mut out = boss_sample(topic, session_cfg.boss_size, &answered, cfg.scheduler.recent_history_len, rng);
      out.shuffle(rng);
      (out, Some(now + Duration::seconds(session_cfg.boss_time_limit_secs.min(MAX_BOSS_SECS) as i64)))
    }
  };

  debug!(target: "session", queued = questions.len(), "Queue built");
  Ok(QueuePlan::Ready(PracticeSession::new(topic, mode, questions, answered, cfg.scheduler.recent_history_len, now, deadline)))
}

/// Round-robin across every concept until `size` questions or the topic runs out.
fn boss_sample<'t, R: Rng + ?Sized>(
  topic: &'t Topic,
  size: usize,
  answered: &HashSet<String>,
  history_len: usize,
  rng: &mut R,
) -> Vec<&'t Question> {
  let mut taken: HashSet<&str> = HashSet::new();
  let mut recent = RecentHistory::new(history_len);
  let mut out = Vec::new();
  loop {
    let before = out.len();
    for concept in &topic.concepts {
      if out.len() >= size {
        return out;
      }
      let pool = concept.questions.iter().filter(|q| !taken.contains(q.id.as_str()));
      if let Some(q) = select_question(pool, &recent, answered, rng) {
        taken.insert(q.id.as_str());
        recent.record(q);
        out.push(q);
      }
    }
    if out.len() == before {
      return out;
    }
  }
}

/// Counters for a progress bar.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
  pub mode: PracticeMode,
  pub total: usize,
  pub answered: usize,
  pub correct: usize,
  pub remaining: usize,
  pub deadline: Option<DateTime<Utc>>,
  pub expired: bool,
}

/// A queue being worked through. Questions are served one at a time; the order is
/// re-decided at each step so the same variant group does not come back to back.
pub struct PracticeSession<'t> {
  topic: &'t Topic,
  mode: PracticeMode,
  pending: Vec<&'t Question>,
  current: Option<&'t Question>,
  recent: RecentHistory,
  answered_before: HashSet<String>,
  started_at: DateTime<Utc>,
  deadline: Option<DateTime<Utc>>,
  total: usize,
  answered: usize,
  correct: usize,
}

impl<'t> PracticeSession<'t> {
  fn new(
    topic: &'t Topic,
    mode: PracticeMode,
    pending: Vec<&'t Question>,
    answered_before: HashSet<String>,
    history_len: usize,
    started_at: DateTime<Utc>,
    deadline: Option<DateTime<Utc>>,
  ) -> Self {
    let total = pending.len();
    Self {
      topic,
      mode,
      pending,
      current: None,
      recent: RecentHistory::new(history_len),
      answered_before,
      started_at,
      deadline,
      total,
      answered: 0,
      correct: 0,
    }
  }

  pub fn mode(&self) -> PracticeMode {
    self.mode
  }

  pub fn topic(&self) -> &'t Topic {
    self.topic
  }

  pub fn started_at(&self) -> DateTime<Utc> {
    self.started_at
  }

  pub fn deadline(&self) -> Option<DateTime<Utc>> {
    self.deadline
  }

  pub fn is_empty(&self) -> bool {
    self.total == 0
  }

  pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
    self.deadline.map_or(false, |d| now >= d)
  }

  pub fn is_finished(&self, now: DateTime<Utc>) -> bool {
    self.is_expired(now) || (self.pending.is_empty() && self.current.is_none())
  }

  /// Ids of the questions still queued, current one excluded.
  pub fn pending_ids(&self) -> Vec<&'t str> {
    self.pending.iter().map(|q| q.id.as_str()).collect()
  }

  pub fn recent_groups(&self) -> Vec<&str> {
    self.recent.groups().collect()
  }

  pub fn status(&self, now: DateTime<Utc>) -> SessionStatus {
    SessionStatus {
      mode: self.mode,
      total: self.total,
      answered: self.answered,
      correct: self.correct,
      remaining: self.pending.len() + usize::from(self.current.is_some()),
      deadline: self.deadline,
      expired: self.is_expired(now),
    }
  }

  /// Serve the next question. Returns the unanswered current question again if there
  /// is one, and `None` once the queue is empty or the deadline has passed.
  pub fn next_question<R: Rng + ?Sized>(&mut self, now: DateTime<Utc>, rng: &mut R) -> Option<QuestionView> {
    if self.is_expired(now) {
      debug!(target: "session", mode = %self.mode, "Session deadline passed");
      return None;
    }
    let q = match self.current {
      Some(q) => q,
      None => {
        let q = select_question(self.pending.iter().copied(), &self.recent, &self.answered_before, rng)?;
        self.pending.retain(|p| p.id != q.id);
        self.recent.record(q);
        self.current = Some(q);
        q
      }
    };
    let concept = self.topic.concept(&q.concept_id)?;
    Some(protocol::to_view(concept, q))
  }

  /// Answer the current question.
  pub fn answer<S: KeyValueStore>(
    &mut self,
    progress: &mut Progress<S>,
    submission: Submission,
    cfg: &SchedulerConfig,
    now: DateTime<Utc>,
  ) -> Result<SubmitOutcome, SessionError> {
    let q = self.current.ok_or(SessionError::NoActiveQuestion)?;
    let outcome = progress.submit_answer(self.topic, &q.id, submission, cfg, now)?;
    self.record(&outcome);
    Ok(outcome)
  }

  pub fn answer_text<S: KeyValueStore>(
    &mut self,
    progress: &mut Progress<S>,
    raw: &str,
    cfg: &SchedulerConfig,
    now: DateTime<Utc>,
  ) -> Result<SubmitOutcome, SessionError> {
    let q = self.current.ok_or(SessionError::NoActiveQuestion)?;
    let outcome = progress.submit_text(self.topic, &q.id, raw, cfg, now)?;
    self.record(&outcome);
    Ok(outcome)
  }

  fn record(&mut self, outcome: &SubmitOutcome) {
    self.current = None;
    self.answered += 1;
    if outcome.grade.correct {
      self.correct += 1;
    }
    self.answered_before.insert(outcome.attempt.question_id.clone());
  }
}

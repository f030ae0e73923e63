//! Spaced-repetition scheduler: pure functions over `ConceptState` and `Attempt`.
//!
//! Nothing in here reads the clock or a global RNG. Callers pass `now` and an `Rng`,
//! which keeps every transition reproducible in tests.

use std::collections::{BTreeMap, HashSet, VecDeque};

use chrono::{DateTime, Duration, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::SchedulerConfig;
use crate::domain::{Attempt, ConceptState, Mastery, Question};

const MS_PER_DAY: f64 = 86_400_000.0;
/// Hard ceiling so extreme config values cannot overflow timestamp math.
const MAX_INTERVAL_DAYS: i64 = 3650;

fn base_hours(mastery: Mastery, cfg: &SchedulerConfig) -> f64 {
  match mastery {
    Mastery::Exposed => cfg.exposed_hours,
    Mastery::Fragile => cfg.fragile_hours,
    Mastery::Stable => cfg.stable_hours,
    Mastery::InterviewReady => cfg.interview_ready_hours,
  }
}

/// Review interval for a concept at `mastery`.
///
/// `base(mastery) * max(0, 1 - wrong_streak * penalty) * (1 + min(good, cap) * boost)`,
/// floored at `min_interval_minutes`. Wrong streaks only ever shorten the interval and
/// good-question signals only ever lengthen it, up to the cap.
pub fn compute_interval(mastery: Mastery, wrong_streak: u32, good_signal: u32, cfg: &SchedulerConfig) -> Duration {
  let penalty = (1.0 - wrong_streak as f64 * cfg.wrong_streak_penalty).max(0.0);
  let boost = 1.0 + good_signal.min(cfg.good_question_cap) as f64 * cfg.good_question_boost;
  let minutes = (base_hours(mastery, cfg) * 60.0 * penalty * boost).max(cfg.min_interval_minutes);
  let cap = MAX_INTERVAL_DAYS as f64 * 24.0 * 60.0;
  let ms = (minutes.min(cap) * 60_000.0).round() as i64;
  Duration::milliseconds(ms)
}

/// Apply one attempt. A correct answer advances mastery one step and resets the wrong
/// streak; a wrong answer regresses one step and resets the correct streak. The next
/// review is scheduled relative to the attempt's own timestamp.
pub fn next_concept_state(state: &ConceptState, attempt: &Attempt, cfg: &SchedulerConfig) -> ConceptState {
  if state.concept_id != attempt.concept_id {
    warn!(target: "scheduler", state = %state.concept_id, attempt = %attempt.concept_id, "Attempt applied to a state of another concept");
  }
  let mut next = state.clone();
  if attempt.correct {
    next.mastery = state.mastery.advance();
    next.correct_streak = state.correct_streak.saturating_add(1);
    next.wrong_streak = 0;
  } else {
    next.mastery = state.mastery.regress();
    next.wrong_streak = state.wrong_streak.saturating_add(1);
    next.correct_streak = 0;
  }
  let interval = compute_interval(next.mastery, next.wrong_streak, next.good_question_signal, cfg);
  next.last_attempt_at = Some(attempt.timestamp);
  next.next_review_at = attempt.timestamp + interval;
  debug!(
    target: "scheduler",
    concept = %next.concept_id,
    correct = attempt.correct,
    from = %state.mastery,
    to = %next.mastery,
    interval_min = interval.num_minutes(),
    "Concept state advanced"
  );
  next
}

/// Register a "good question" signal, creating the state lazily when the learner has
/// never attempted the concept.
pub fn record_good_question(state: Option<&ConceptState>, concept_id: &str, now: DateTime<Utc>) -> ConceptState {
  let mut next = state.cloned().unwrap_or_else(|| ConceptState::new(concept_id, now));
  next.good_question_signal = next.good_question_signal.saturating_add(1);
  next
}

/// Days past due as a fraction; 0 when not yet due.
pub fn overdue_days(state: &ConceptState, now: DateTime<Utc>) -> f64 {
  let ms = (now - state.next_review_at).num_milliseconds();
  (ms.max(0) as f64) / MS_PER_DAY
}

pub fn at_risk_score(state: &ConceptState, now: DateTime<Utc>, cfg: &SchedulerConfig) -> f64 {
  overdue_days(state, now) * cfg.overdue_weight_per_day
    + state.wrong_streak as f64 * cfg.wrong_streak_weight
    + state.good_question_signal as f64 * cfg.good_question_weight
}

/// Due states only, highest `at_risk_score` first. Ties go to the earliest
/// `next_review_at`; remaining ties keep input order.
pub fn rank_at_risk<'a, I>(states: I, now: DateTime<Utc>, cfg: &SchedulerConfig) -> Vec<&'a ConceptState>
where
  I: IntoIterator<Item = &'a ConceptState>,
{
  let mut scored: Vec<(f64, &ConceptState)> = states
    .into_iter()
    .filter(|s| s.is_due(now))
    .map(|s| (at_risk_score(s, now, cfg), s))
    .collect();
  scored.sort_by(|(sa, a), (sb, b)| sb.total_cmp(sa).then_with(|| a.next_review_at.cmp(&b.next_review_at)));
  scored.into_iter().map(|(_, s)| s).collect()
}

/// Bounded memory of recently served variant groups, oldest first.
#[derive(Clone, Debug)]
pub struct RecentHistory {
  groups: VecDeque<String>,
  last_question: Option<String>,
  cap: usize,
}

impl RecentHistory {
  pub fn new(cap: usize) -> Self {
    Self { groups: VecDeque::with_capacity(cap), last_question: None, cap }
  }

  pub fn record(&mut self, question: &Question) {
    let group = question.group_key();
    self.groups.retain(|g| g != group);
    self.groups.push_back(group.to_string());
    while self.groups.len() > self.cap {
      self.groups.pop_front();
    }
    self.last_question = Some(question.id.clone());
  }

  pub fn contains(&self, group: &str) -> bool {
    self.groups.iter().any(|g| g == group)
  }

  /// Position in the history, 0 being the least recently served group.
  fn recency(&self, group: &str) -> Option<usize> {
    self.groups.iter().position(|g| g == group)
  }

  pub fn groups(&self) -> impl Iterator<Item = &str> {
    self.groups.iter().map(String::as_str)
  }

  pub fn last_question(&self) -> Option<&str> {
    self.last_question.as_deref()
  }

  pub fn len(&self) -> usize {
    self.groups.len()
  }

  pub fn is_empty(&self) -> bool {
    self.groups.is_empty()
  }
}

/// Pick the next question from `pool`.
///
/// Order of preference:
/// 1. a group outside `recent` that still has a question the learner never answered;
/// 2. any question from a group outside `recent`, uniformly;
/// 3. an unanswered question from the least recently served group;
/// 4. uniformly from the least recently served group, avoiding the last served
///    question when the group has another one.
pub fn select_question<'a, I, R>(
  pool: I,
  recent: &RecentHistory,
  answered: &HashSet<String>,
  rng: &mut R,
) -> Option<&'a Question>
where
  I: IntoIterator<Item = &'a Question>,
  R: Rng + ?Sized,
{
  // groups in pool order
  let mut groups: Vec<(&str, Vec<&Question>)> = Vec::new();
  for q in pool {
    match groups.iter().position(|(g, _)| *g == q.group_key()) {
      Some(i) => groups[i].1.push(q),
      None => groups.push((q.group_key(), vec![q])),
    }
  }
  let unseen = |members: &[&'a Question]| members.iter().copied().find(|q| !answered.contains(&q.id));

  let fresh: Vec<&(&str, Vec<&Question>)> = groups.iter().filter(|(g, _)| !recent.contains(g)).collect();
  if let Some(q) = fresh.iter().find_map(|(_, members)| unseen(members)) {
    return Some(q);
  }
  if !fresh.is_empty() {
    let all: Vec<&Question> = fresh.iter().flat_map(|(_, m)| m.iter().copied()).collect();
    return all.choose(rng).copied();
  }

  let mut stale: Vec<&(&str, Vec<&Question>)> = groups.iter().collect();
  stale.sort_by_key(|(g, _)| recent.recency(g).unwrap_or(0));
  if let Some(q) = stale.iter().find_map(|(_, members)| unseen(members)) {
    return Some(q);
  }
  let (_, oldest) = stale.first()?;
  let alternatives: Vec<&Question> = oldest
    .iter()
    .copied()
    .filter(|q| Some(q.id.as_str()) != recent.last_question())
    .collect();
  if alternatives.is_empty() {
    oldest.choose(rng).copied()
  } else {
    alternatives.choose(rng).copied()
  }
}

/// Dashboard numbers derived from the learner's concept states.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerSummary {
  pub due_concept_ids: Vec<String>,
  /// Due and either failing (wrong streak > 0) or still `Fragile`.
  pub high_risk_concept_ids: Vec<String>,
  /// Sum of whole days overdue across all states.
  pub memory_debt: u64,
  /// min(7, due / 3); 0 without any state.
  pub streak_days: u32,
  pub next_boss_battle_at: DateTime<Utc>,
  pub mastery_counts: BTreeMap<Mastery, usize>,
}

pub fn scheduler_summary<'a, I>(states: I, now: DateTime<Utc>) -> SchedulerSummary
where
  I: IntoIterator<Item = &'a ConceptState>,
{
  let mut due = Vec::new();
  let mut high_risk = Vec::new();
  let mut memory_debt = 0u64;
  let mut total = 0usize;
  let mut mastery_counts: BTreeMap<Mastery, usize> = Mastery::ALL.iter().map(|m| (*m, 0)).collect();

  for s in states {
    total += 1;
    *mastery_counts.entry(s.mastery).or_insert(0) += 1;
    memory_debt += overdue_days(s, now).floor() as u64;
    if s.is_due(now) {
      due.push(s.concept_id.clone());
      if s.wrong_streak > 0 || s.mastery == Mastery::Fragile {
        high_risk.push(s.concept_id.clone());
      }
    }
  }

  let streak_days = if total == 0 { 0 } else { (due.len() / 3).min(7) as u32 };
  SchedulerSummary {
    due_concept_ids: due,
    high_risk_concept_ids: high_risk,
    memory_debt,
    streak_days,
    next_boss_battle_at: now + Duration::days(7),
    mastery_counts,
  }
}

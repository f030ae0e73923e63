//! End-to-end tests of the practice orchestrator over the in-memory and file stores.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;

use pumpkin_core::config::PumpkinConfig;
use pumpkin_core::domain::{ConceptState, Mastery, QuestionKind, Topic};
use pumpkin_core::grading::Submission;
use pumpkin_core::parser::parse_topic_file;
use pumpkin_core::seeds::SAMPLE_TOPIC;
use pumpkin_core::session::{build_queue, PracticeMode, Progress, QueuePlan, SessionError};
use pumpkin_core::store::{self, FileStore, KeyValueStore, MemoryStore, StoreError, STATES_KEY};

const QUEUES_TOPIC: &str = "#TOPIC: Queues
#DESC: Messaging basics
##CONCEPT: Ack
Q: When should a consumer ack a message?
A) Before processing
B) After processing
C) Never
D) Twice
ANS: B
EXPL: Acking after processing gives at-least-once delivery.
---
";

const INTERVIEWS_TOPIC: &str = "#TOPIC: Interviews
#DESC: System design drills
##CONCEPT: TTL
Q: Which header carries a TTL in seconds?
A) ETag
B) Vary
C) max-age
D) Host
ANS: C
EXPL: Cache-Control max-age is the TTL in seconds.
---
";

fn sample() -> Topic {
  parse_topic_file(SAMPLE_TOPIC).topic.expect("sample topic")
}

fn t0() -> DateTime<Utc> {
  Utc.with_ymd_and_hms(2024, 9, 10, 7, 30, 0).unwrap()
}

/// Store that can be switched offline to simulate a failing backend.
#[derive(Default)]
struct FlakyStore {
  inner: MemoryStore,
  offline: AtomicBool,
}

impl FlakyStore {
  fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }
}

impl KeyValueStore for FlakyStore {
  fn read(&self, key: &str) -> store::Result<Option<String>> {
    self.inner.read(key)
  }

  fn write(&self, key: &str, value: &str) -> store::Result<()> {
    if self.offline.load(Ordering::SeqCst) {
      return Err(StoreError::Unavailable("disk full".into()));
    }
    self.inner.write(key, value)
  }

  fn remove(&self, key: &str) -> store::Result<()> {
    self.inner.remove(key)
  }
}

fn seeded_store(states: &[ConceptState]) -> MemoryStore {
  let store = MemoryStore::new();
  store::write_json(&store, STATES_KEY, &states.to_vec()).expect("seed states");
  store
}

fn state(id: &str, next_review_at: DateTime<Utc>, wrong_streak: u32) -> ConceptState {
  let mut s = ConceptState::new(id, next_review_at);
  s.wrong_streak = wrong_streak;
  s
}

/// The answer that is judged correct, in typed form.
fn right_answer(kind: &QuestionKind) -> Submission {
  match kind {
    QuestionKind::Fill { blank_answers } => Submission::Fill(blank_answers[0].clone()),
    other => Submission::expected_for(other),
  }
}

#[test]
fn fill_answers_ignore_case() {
  let topic = sample();
  let mut progress = Progress::new(MemoryStore::new());
  let cfg = PumpkinConfig::default();
  let out = progress.submit_text(&topic, "ttl-q3", "MAX-AGE", &cfg.scheduler, t0()).expect("submit");
  assert!(out.grade.correct);
  let out = progress.submit_text(&topic, "ttl-q3", " S-MaxAge ", &cfg.scheduler, t0()).expect("submit");
  assert!(out.grade.correct);
  let out = progress.submit_text(&topic, "ttl-q3", "no-cache", &cfg.scheduler, t0()).expect("submit");
  assert!(!out.grade.correct);
  assert_eq!(out.attempt.selected_answer, "no-cache");
}

#[test]
fn boss_mode_ignores_due_dates() {
  let topic = sample();
  let far = t0() + Duration::days(365);
  let store = seeded_store(&[state("ttl", far, 0), state("eviction", far, 0), state("write-policies", far, 0)]);
  let progress = Progress::load(store).expect("load");
  let cfg = PumpkinConfig::default();
  let mut rng = StdRng::seed_from_u64(11);

  let plan = build_queue(&topic, PracticeMode::Boss, None, &progress, &cfg, t0(), &mut rng).expect("plan");
  let QueuePlan::Ready(session) = plan else { panic!("boss is never blocked") };
  let mut ids = session.pending_ids();
  ids.sort_unstable();
  assert_eq!(ids, vec!["eviction-q1", "eviction-q2", "ttl-q1", "ttl-q2", "ttl-q3", "write-policies-q1", "write-policies-q2"]);
  assert_eq!(session.deadline(), Some(t0() + Duration::seconds(600)));

  // nothing is due, so a daily session is empty
  let plan = build_queue(&topic, PracticeMode::Daily, None, &progress, &cfg, t0(), &mut rng).expect("plan");
  let QueuePlan::Ready(daily) = plan else { panic!("daily is never blocked") };
  assert!(daily.is_empty());
}

#[test]
fn boss_size_caps_the_sample_round_robin() {
  let topic = sample();
  let progress = Progress::new(MemoryStore::new());
  let mut cfg = PumpkinConfig::default();
  cfg.session.boss_size = 3;
  let mut rng = StdRng::seed_from_u64(4);
  let QueuePlan::Ready(session) = build_queue(&topic, PracticeMode::Boss, None, &progress, &cfg, t0(), &mut rng).expect("plan") else {
    panic!("boss is never blocked")
  };
  let ids = session.pending_ids();
  let concepts: Vec<&str> = ids.iter().map(|id| id.rsplit_once("-q").map_or(*id, |(c, _)| c)).collect();
  assert_eq!(concepts.len(), 3);
  for c in ["ttl", "eviction", "write-policies"] {
    assert!(concepts.contains(&c), "{c} missing from {concepts:?}");
  }
}

#[test]
fn learn_is_blocked_while_reviews_are_due() {
  let topic = sample();
  let store = seeded_store(&[state("ttl", t0() - Duration::hours(1), 0)]);
  let progress = Progress::load(store).expect("load");
  let cfg = PumpkinConfig::default();
  let mut rng = StdRng::seed_from_u64(1);
  match build_queue(&topic, PracticeMode::Learn, Some("eviction"), &progress, &cfg, t0(), &mut rng).expect("plan") {
    QueuePlan::LearnBlocked { due_concepts } => assert_eq!(due_concepts, vec!["ttl".to_string()]),
    QueuePlan::Ready(_) => panic!("learning must wait for due reviews"),
  }
  assert!(matches!(
    build_queue(&topic, PracticeMode::Learn, Some("sharding"), &progress, &cfg, t0(), &mut rng),
    Err(SessionError::UnknownConcept(_))
  ));
}

#[test]
fn daily_session_takes_at_risk_concepts_without_back_to_back_groups() {
  let topic = sample();
  let store = seeded_store(&[
    state("eviction", t0() - Duration::hours(1), 0),
    state("ttl", t0() - Duration::days(1), 2),
    state("write-policies", t0() + Duration::days(3), 0),
  ]);
  let mut progress = Progress::load(store).expect("load");
  let cfg = PumpkinConfig::default();
  let mut rng = StdRng::seed_from_u64(21);

  let QueuePlan::Ready(mut session) = build_queue(&topic, PracticeMode::Daily, None, &progress, &cfg, t0(), &mut rng).expect("plan") else {
    panic!("daily is never blocked")
  };
  assert_eq!(session.pending_ids(), vec!["ttl-q1", "ttl-q3", "eviction-q1", "eviction-q2"]);

  let mut groups = Vec::new();
  while let Some(view) = session.next_question(t0(), &mut rng) {
    let (_, q) = topic.question(&view.id).expect("served question exists");
    groups.push(q.group_key().to_string());
    let out = session.answer(&mut progress, right_answer(&q.kind), &cfg.scheduler, t0()).expect("answer");
    assert!(out.grade.correct, "{} should be correct", view.id);
  }
  assert_eq!(groups.len(), 4);
  for pair in groups.windows(2) {
    assert_ne!(pair[0], pair[1]);
  }
  assert_eq!(session.status(t0()).correct, 4);
  assert_eq!(progress.state("ttl").map(|s| s.mastery), Some(Mastery::Stable));
  assert_eq!(progress.state("ttl").map(|s| s.wrong_streak), Some(0));
}

#[test]
fn review_mode_replays_wrong_answers_latest_first() {
  let topic = sample();
  let mut progress = Progress::new(MemoryStore::new());
  let cfg = PumpkinConfig::default();
  progress.submit_text(&topic, "ttl-q1", "C", &cfg.scheduler, t0()).expect("submit");
  progress.submit_text(&topic, "eviction-q1", "A", &cfg.scheduler, t0() + Duration::minutes(1)).expect("submit");
  progress.submit_text(&topic, "ttl-q2", "B", &cfg.scheduler, t0() + Duration::minutes(2)).expect("submit");
  progress.submit_text(&topic, "ttl-q1", "D", &cfg.scheduler, t0() + Duration::minutes(3)).expect("submit");

  let mut rng = StdRng::seed_from_u64(3);
  let QueuePlan::Ready(all) = build_queue(&topic, PracticeMode::Review, None, &progress, &cfg, t0(), &mut rng).expect("plan") else {
    panic!("review is never blocked")
  };
  assert_eq!(all.pending_ids(), vec!["ttl-q1", "eviction-q1"]);

  let QueuePlan::Ready(focused) =
    build_queue(&topic, PracticeMode::Review, Some("eviction"), &progress, &cfg, t0(), &mut rng).expect("plan")
  else {
    panic!("review is never blocked")
  };
  assert_eq!(focused.pending_ids(), vec!["eviction-q1"]);
}

#[test]
fn failed_write_keeps_state_and_is_reported() {
  let topic = sample();
  let mut progress = Progress::new(FlakyStore::default());
  let cfg = PumpkinConfig::default();
  progress.store().set_offline(true);

  let out = progress.submit_text(&topic, "ttl-q1", "A", &cfg.scheduler, t0()).expect("submit");
  assert!(matches!(out.unsaved, Some(StoreError::Unavailable(_))));
  assert_eq!(out.state.mastery, Mastery::Fragile);
  assert_eq!(progress.state("ttl").map(|s| s.mastery), Some(Mastery::Fragile));
  assert_eq!(progress.attempts().len(), 1);
  assert!(progress.is_dirty());
  assert_eq!(progress.store().read(STATES_KEY).expect("read"), None);

  assert!(matches!(progress.select_topic("caching"), Err(SessionError::Store(_))));
  assert_eq!(progress.prefs().selected_topics, vec!["caching".to_string()]);

  progress.store().set_offline(false);
  progress.flush().expect("flush");
  assert!(!progress.is_dirty());
  let saved = progress.store().read(STATES_KEY).expect("read").expect("states saved");
  assert!(saved.contains("\"ttl\""));
}

#[test]
fn unselect_purges_topic_progress_on_disk() {
  let dir = tempfile::tempdir().expect("tempdir");
  let caching = sample();
  let queues = parse_topic_file(QUEUES_TOPIC).topic.expect("queues topic");
  let cfg = PumpkinConfig::default();

  {
    let mut progress = Progress::load(FileStore::new(dir.path()).expect("store")).expect("load");
    assert!(progress.select_topic("caching").expect("select"));
    assert!(!progress.select_topic("caching").expect("select again"));
    assert!(progress.toggle_topic("queues").expect("toggle"));
    progress.submit_text(&caching, "ttl-q1", "B", &cfg.scheduler, t0()).expect("submit");
    progress.submit_text(&caching, "eviction-q2", "B|RB", &cfg.scheduler, t0()).expect("submit");
    progress.signal_good_question(&caching, "write-policies-q2", t0()).expect("signal");
    progress.submit_text(&queues, "ack-q1", "B", &cfg.scheduler, t0()).expect("submit");
    assert_eq!(progress.states().len(), 4);
  }

  let mut progress = Progress::load(FileStore::new(dir.path()).expect("store")).expect("reload");
  assert_eq!(progress.states().len(), 4);
  assert_eq!(progress.attempts().len(), 3);
  assert_eq!(progress.state("write-policies").map(|s| s.good_question_signal), Some(1));

  progress.unselect_topic(&caching, [&caching, &queues]).expect("unselect");
  let progress = Progress::load(FileStore::new(dir.path()).expect("store")).expect("reload");
  assert_eq!(progress.states().keys().collect::<Vec<_>>(), vec!["ack"]);
  assert_eq!(progress.attempts().len(), 1);
  assert_eq!(progress.attempts()[0].question_id, "ack-q1");
  assert_eq!(progress.prefs().selected_topics, vec!["queues".to_string()]);
}

#[test]
fn unselect_keeps_concepts_shared_with_a_selected_topic() {
  let caching = sample();
  let interviews = parse_topic_file(INTERVIEWS_TOPIC).topic.expect("interviews topic");
  let cfg = PumpkinConfig::default();
  let mut progress = Progress::new(MemoryStore::new());
  progress.select_topic("caching").expect("select");
  progress.select_topic("interviews").expect("select");

  progress.submit_text(&caching, "ttl-q1", "A", &cfg.scheduler, t0()).expect("submit");
  progress.submit_text(&caching, "eviction-q1", "B", &cfg.scheduler, t0()).expect("submit");
  progress.submit_text(&interviews, "ttl-q1", "A", &cfg.scheduler, t0()).expect("submit");

  progress.unselect_topic(&caching, [&caching, &interviews]).expect("unselect");
  assert_eq!(progress.states().keys().collect::<Vec<_>>(), vec!["ttl"]);
  assert!(progress.attempts().iter().all(|a| a.concept_id == "ttl"));
  assert_eq!(progress.attempts().len(), 2);

  // Once no selected topic declares it, the shared concept goes too.
  progress.unselect_topic(&interviews, [&caching, &interviews]).expect("unselect");
  assert!(progress.states().is_empty());
  assert!(progress.attempts().is_empty());
}

#[test]
fn good_question_signal_creates_state_and_stretches_interval() {
  let topic = sample();
  let mut progress = Progress::new(MemoryStore::new());
  let cfg = PumpkinConfig::default();

  let s = progress.signal_good_question(&topic, "eviction-q1", t0()).expect("signal");
  assert_eq!(s.mastery, Mastery::Exposed);
  assert_eq!(s.good_question_signal, 1);
  assert!(s.is_due(t0()));

  let out = progress.submit_text(&topic, "eviction-q1", "B", &cfg.scheduler, t0()).expect("submit");
  // Fragile base 48h, one signal: +5%
  assert_eq!(out.state.next_review_at - t0(), Duration::minutes(48 * 60 * 105 / 100));
}

#[test]
fn curiosities_are_recorded_once() {
  let mut progress = Progress::new(MemoryStore::new());
  assert!(progress.mark_curiosity_seen("lru-origin").expect("mark"));
  assert!(!progress.mark_curiosity_seen("lru-origin").expect("mark again"));
  assert_eq!(progress.prefs().curiosities_viewed, vec!["lru-origin".to_string()]);
}

#[test]
fn summary_reports_due_and_high_risk() {
  let topic = sample();
  let mut progress = Progress::new(MemoryStore::new());
  let cfg = PumpkinConfig::default();
  progress.submit_text(&topic, "ttl-q1", "C", &cfg.scheduler, t0()).expect("submit");
  progress.submit_text(&topic, "eviction-q1", "B", &cfg.scheduler, t0()).expect("submit");

  let later = t0() + Duration::days(3);
  let summary = progress.summary(later);
  assert_eq!(summary.due_concept_ids, vec!["eviction".to_string(), "ttl".to_string()]);
  assert_eq!(summary.high_risk_concept_ids, vec!["eviction".to_string(), "ttl".to_string()]);
  assert_eq!(summary.next_boss_battle_at, later + Duration::days(7));
  assert_eq!(summary.mastery_counts[&Mastery::Fragile], 1);
  assert_eq!(summary.mastery_counts[&Mastery::Exposed], 1);
}

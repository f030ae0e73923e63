//! Domain models: the parsed content tree (topic, concepts, questions) and the
//! learner records that the scheduler and the session layer mutate.

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

/// One parsed content file. Immutable after parsing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topic {
  pub id: String,
  pub title: String,
  pub description: String,
  pub concepts: Vec<Concept>,
}

impl Topic {
  pub fn concept(&self, concept_id: &str) -> Option<&Concept> {
    self.concepts.iter().find(|c| c.id == concept_id)
  }

  /// Look a question up by id together with the concept that owns it.
  pub fn question(&self, question_id: &str) -> Option<(&Concept, &Question)> {
    self.concepts.iter().find_map(|c| {
      c.questions.iter().find(|q| q.id == question_id).map(|q| (c, q))
    })
  }

  pub fn questions(&self) -> impl Iterator<Item = &Question> {
    self.concepts.iter().flat_map(|c| c.questions.iter())
  }

  pub fn concept_ids(&self) -> impl Iterator<Item = &str> {
    self.concepts.iter().map(|c| c.id.as_str())
  }

  /// Prerequisites of `concept` that resolve to sibling concepts (by slug of the title
  /// or by id). Dangling references are skipped; the parser reports them.
  pub fn prerequisites_of(&self, concept: &Concept) -> Vec<&Concept> {
    concept
      .prerequisite_ids()
      .iter()
      .filter_map(|id| self.concept(id))
      .collect()
  }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Concept {
  pub id: String,
  pub title: String,
  /// Empty when the block had no `##SUMMARY:` line.
  #[serde(default)]
  pub summary: String,
  /// References exactly as written in `##PREREQ:` (titles or ids).
  #[serde(default)]
  pub prerequisites: Vec<String>,
  pub questions: Vec<Question>,
}

impl Concept {
  pub fn prerequisite_ids(&self) -> Vec<String> {
    self.prerequisites.iter().map(|p| crate::util::slugify(p)).collect()
  }
}

/// A, B, C or D. Used for both primary and reasoning options.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OptionLabel {
  A,
  B,
  C,
  D,
}

impl OptionLabel {
  pub const ALL: [OptionLabel; 4] = [OptionLabel::A, OptionLabel::B, OptionLabel::C, OptionLabel::D];

  pub fn as_char(self) -> char {
    match self {
      OptionLabel::A => 'A',
      OptionLabel::B => 'B',
      OptionLabel::C => 'C',
      OptionLabel::D => 'D',
    }
  }

  pub fn from_char(ch: char) -> Option<Self> {
    match ch.to_ascii_uppercase() {
      'A' => Some(OptionLabel::A),
      'B' => Some(OptionLabel::B),
      'C' => Some(OptionLabel::C),
      'D' => Some(OptionLabel::D),
      _ => None,
    }
  }

  /// Parse an answer key such as `B`, `b` or `RB` (reasoning keys may carry the `R` prefix).
  pub fn from_key(key: &str) -> Option<Self> {
    let key = key.trim();
    let key = key.strip_prefix('R').or_else(|| key.strip_prefix('r')).unwrap_or(key);
    let mut chars = key.chars();
    match (chars.next(), chars.next()) {
      (Some(ch), None) => Self::from_char(ch),
      _ => None,
    }
  }
}

impl fmt::Display for OptionLabel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_char())
  }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceOption {
  pub label: OptionLabel,
  pub text: String,
}

/// The `TYPE:` directive values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestionType {
  Mcq,
  TwoStep,
  Order,
  Fill,
}

impl QuestionType {
  pub fn parse(raw: &str) -> Option<Self> {
    match raw.trim().to_ascii_uppercase().as_str() {
      "MCQ" => Some(QuestionType::Mcq),
      "TWO_STEP" => Some(QuestionType::TwoStep),
      "ORDER" => Some(QuestionType::Order),
      "FILL" => Some(QuestionType::Fill),
      _ => None,
    }
  }

  pub fn uses_options(self) -> bool {
    matches!(self, QuestionType::Mcq | QuestionType::TwoStep)
  }
}

impl Default for QuestionType {
  fn default() -> Self { QuestionType::Mcq }
}

impl fmt::Display for QuestionType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      QuestionType::Mcq => "MCQ",
      QuestionType::TwoStep => "TWO_STEP",
      QuestionType::Order => "ORDER",
      QuestionType::Fill => "FILL",
    };
    f.write_str(s)
  }
}

/// Variant-specific body of a question.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestionKind {
  Mcq {
    options: [ChoiceOption; 4],
    answer: OptionLabel,
  },
  #[serde(rename_all = "camelCase")]
  TwoStep {
    options: [ChoiceOption; 4],
    answer: OptionLabel,
    reason_prompt: String,
    reason_options: [ChoiceOption; 4],
    reason_answer: OptionLabel,
  },
  Order {
    /// Canonical listing, as written under `ITEMS:`.
    items: Vec<String>,
    /// Correct permutation as 1-based indices into `items`.
    answer: Vec<usize>,
  },
  #[serde(rename_all = "camelCase")]
  Fill {
    blank_answers: Vec<String>,
  },
}

impl QuestionKind {
  pub fn question_type(&self) -> QuestionType {
    match self {
      QuestionKind::Mcq { .. } => QuestionType::Mcq,
      QuestionKind::TwoStep { .. } => QuestionType::TwoStep,
      QuestionKind::Order { .. } => QuestionType::Order,
      QuestionKind::Fill { .. } => QuestionType::Fill,
    }
  }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
  /// `{concept_id}-q{n}`, n being the 1-based position of the `Q:` block in its concept.
  pub id: String,
  pub concept_id: String,
  pub prompt: String,
  pub explanation: String,
  /// `ANS:` exactly as written.
  pub answer_key: String,
  #[serde(default)]
  pub tags: Vec<String>,
  #[serde(default)]
  pub misconception: Option<String>,
  #[serde(default)]
  pub difficulty: Option<f64>,
  #[serde(default)]
  pub variant_group: Option<String>,
  pub kind: QuestionKind,
}

impl Question {
  /// Group used for anti-repetition: the `VAR:` id, or the question's own id.
  pub fn group_key(&self) -> &str {
    self.variant_group.as_deref().unwrap_or(&self.id)
  }
}

/// Line-numbered parse problem. Line numbers are 1-based.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseDiagnostic {
  pub line: usize,
  pub message: String,
}

impl ParseDiagnostic {
  pub fn new(line: usize, message: impl Into<String>) -> Self {
    Self { line: line.max(1), message: message.into() }
  }
}

impl fmt::Display for ParseDiagnostic {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Line {}: {}", self.line, self.message)
  }
}

/// Result of parsing one content file. `topic` is `None` on structural errors.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParsedTopic {
  pub topic: Option<Topic>,
  pub errors: Vec<ParseDiagnostic>,
}

// ---------------------------------------------------------------------------
// Learner records
// ---------------------------------------------------------------------------

/// Strictly ordered proficiency level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Mastery {
  Exposed,
  Fragile,
  Stable,
  InterviewReady,
}

impl Mastery {
  pub const ALL: [Mastery; 4] = [Mastery::Exposed, Mastery::Fragile, Mastery::Stable, Mastery::InterviewReady];

  /// One step up, saturating at `InterviewReady`.
  pub fn advance(self) -> Self {
    match self {
      Mastery::Exposed => Mastery::Fragile,
      Mastery::Fragile => Mastery::Stable,
      Mastery::Stable | Mastery::InterviewReady => Mastery::InterviewReady,
    }
  }

  /// One step down, saturating at `Exposed`.
  pub fn regress(self) -> Self {
    match self {
      Mastery::Exposed | Mastery::Fragile => Mastery::Exposed,
      Mastery::Stable => Mastery::Fragile,
      Mastery::InterviewReady => Mastery::Stable,
    }
  }

  pub fn parse(raw: &str) -> Option<Self> {
    match raw {
      "Exposed" => Some(Mastery::Exposed),
      "Fragile" => Some(Mastery::Fragile),
      "Stable" => Some(Mastery::Stable),
      "InterviewReady" => Some(Mastery::InterviewReady),
      _ => None,
    }
  }
}

impl Default for Mastery {
  fn default() -> Self { Mastery::Exposed }
}

impl fmt::Display for Mastery {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Debug::fmt(self, f)
  }
}

// Progress blobs may be hand-edited; unknown levels degrade to Exposed instead of failing.
impl<'de> Deserialize<'de> for Mastery {
  fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
    let value = serde_json::Value::deserialize(d)?;
    let parsed = value.as_str().and_then(Mastery::parse);
    Ok(parsed.unwrap_or_else(|| {
      warn!(target: "scheduler", %value, "Unknown mastery value in stored state; treating as Exposed");
      Mastery::Exposed
    }))
  }
}

/// Per-learner, per-concept scheduling state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptState {
  pub concept_id: String,
  #[serde(default)]
  pub mastery: Mastery,
  #[serde(default, deserialize_with = "lenient_timestamp")]
  pub next_review_at: DateTime<Utc>,
  #[serde(default, deserialize_with = "lenient_count")]
  pub correct_streak: u32,
  #[serde(default, deserialize_with = "lenient_count")]
  pub wrong_streak: u32,
  #[serde(default, deserialize_with = "lenient_count")]
  pub good_question_signal: u32,
  #[serde(default, deserialize_with = "lenient_optional_timestamp")]
  pub last_attempt_at: Option<DateTime<Utc>>,
}

impl ConceptState {
  /// Fresh state: `Exposed` and due immediately.
  pub fn new(concept_id: impl Into<String>, now: DateTime<Utc>) -> Self {
    Self {
      concept_id: concept_id.into(),
      mastery: Mastery::Exposed,
      next_review_at: now,
      correct_streak: 0,
      wrong_streak: 0,
      good_question_signal: 0,
      last_attempt_at: None,
    }
  }

  pub fn is_due(&self, now: DateTime<Utc>) -> bool {
    self.next_review_at <= now
  }
}

fn timestamp_from_value(value: &serde_json::Value) -> Option<DateTime<Utc>> {
  match value {
    serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s).ok().map(|t| t.with_timezone(&Utc)),
    serde_json::Value::Number(n) => n
      .as_i64()
      .or_else(|| n.as_f64().map(|f| f as i64))
      .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
    _ => None,
  }
}

/// RFC 3339 strings or epoch milliseconds; anything else becomes the epoch (due now).
fn lenient_timestamp<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
  let value = serde_json::Value::deserialize(d)?;
  Ok(timestamp_from_value(&value).unwrap_or_else(|| {
    warn!(target: "scheduler", %value, "Invalid timestamp in stored state; treating as due");
    DateTime::<Utc>::default()
  }))
}

fn lenient_optional_timestamp<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
  let value = serde_json::Value::deserialize(d)?;
  if value.is_null() {
    return Ok(None);
  }
  let parsed = timestamp_from_value(&value);
  if parsed.is_none() {
    warn!(target: "scheduler", %value, "Invalid optional timestamp in stored state; dropping it");
  }
  Ok(parsed)
}

fn lenient_count<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
  let value = serde_json::Value::deserialize(d)?;
  let n = value.as_i64().or_else(|| value.as_f64().map(|f| f as i64));
  match n {
    Some(n) => Ok(n.clamp(0, u32::MAX as i64) as u32),
    None => {
      warn!(target: "scheduler", %value, "Invalid counter in stored state; treating as 0");
      Ok(0)
    }
  }
}

/// One answer submission. Never mutated once logged.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attempt {
  pub id: String,
  pub question_id: String,
  pub concept_id: String,
  pub correct: bool,
  pub timestamp: DateTime<Utc>,
  pub selected_answer: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPrefs {
  #[serde(default)]
  pub selected_topics: Vec<String>,
  #[serde(default)]
  pub curiosities_viewed: Vec<String>,
}

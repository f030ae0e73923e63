//! Topic file parser.
//!
//! Turns a plain-text curriculum (`#TOPIC` → `##CONCEPT` → `Q:` blocks) into a
//! [`Topic`] plus line-numbered [`ParseDiagnostic`]s. The parse is a single pass over
//! the lines and never fails: missing or empty headers make the topic absent, local
//! problems drop the offending question or concept and parsing carries on.
//!
//! ```text
//! #TOPIC: Caching
//! #DESC: Cache fundamentals
//! ##CONCEPT: TTL
//! ##PREREQ:
//! ##SUMMARY: Time to live basics
//! Q: What does TTL stand for?
//! A) Time To Live
//! B) Total Time Lapsed
//! C) Transfer To Local
//! D) Time To Loop
//! ANS: A
//! EXPL: TTL marks expiry.
//! ---
//! ```

mod draft;

use std::collections::HashMap;

use tracing::{debug, instrument};

use crate::domain::{Concept, ParseDiagnostic, ParsedTopic, QuestionType, Topic};
use crate::util::{slugify, split_list, trunc_for_log};
use draft::{classify, Line, QuestionDraft};

pub(crate) use draft::parse_permutation;

/// Parse one content file. Deterministic: the same text always yields the same
/// topic and the same diagnostics, in line order.
#[instrument(level = "debug", target = "parser", skip(raw), fields(raw_len = raw.len()))]
pub fn parse_topic_file(raw: &str) -> ParsedTopic {
  let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);
  let lines: Vec<&str> = raw.lines().collect();
  let mut parser = Parser::new();

  let mut cursor = 0;
  let title = parser.header(&lines, &mut cursor, "#TOPIC:", "title");
  let description = parser.header(&lines, &mut cursor, "#DESC:", "description");

  for (i, raw_line) in lines.iter().enumerate().skip(cursor) {
    parser.line(raw_line.trim(), i + 1);
  }
  parser.finish_concept();
  parser.check_prerequisites();

  let Parser { mut errors, concepts, .. } = parser;

  // Valid headers keep the topic even when every concept was dropped; the dropped
  // blocks are already reported.
  let topic = match (title, description) {
    (Some(title), Some(description)) => Some(Topic {
      id: slugify(&title),
      title,
      description,
      concepts,
    }),
    _ => None,
  };

  // Stable: diagnostics on the same line keep emission order.
  errors.sort_by_key(|e| e.line);

  match &topic {
    Some(t) => debug!(
      target: "parser",
      topic = %t.id,
      concepts = t.concepts.len(),
      questions = t.questions().count(),
      diagnostics = errors.len(),
      "Parsed topic file"
    ),
    None => debug!(target: "parser", diagnostics = errors.len(), "Topic file rejected"),
  }

  ParsedTopic { topic, errors }
}

/// Concept block being filled.
struct ConceptDraft {
  line: usize,
  id: String,
  title: String,
  summary: String,
  prerequisites: Vec<String>,
  prereq_line: usize,
  questions: Vec<crate::domain::Question>,
  blocks_seen: usize,
}

struct Parser {
  errors: Vec<ParseDiagnostic>,
  concepts: Vec<Concept>,
  /// Kept concepts' `##PREREQ:` line numbers, by concept id.
  prereq_lines: HashMap<String, usize>,
  /// Every concept id handed out so far, with its declaring line.
  claimed_ids: HashMap<String, usize>,
  concept: Option<ConceptDraft>,
  question: Option<QuestionDraft>,
  pending_type: Option<(QuestionType, usize)>,
  summary_open: bool,
}

impl Parser {
  fn new() -> Self {
    Self {
      errors: Vec::new(),
      concepts: Vec::new(),
      prereq_lines: HashMap::new(),
      claimed_ids: HashMap::new(),
      concept: None,
      question: None,
      pending_type: None,
      summary_open: false,
    }
  }

  fn error(&mut self, line: usize, message: impl Into<String>) {
    self.errors.push(ParseDiagnostic::new(line, message));
  }

  /// Consume the next non-blank line if it carries `prefix`. A missing header is
  /// reported at the offending line and nothing is consumed.
  fn header(&mut self, lines: &[&str], cursor: &mut usize, prefix: &str, what: &str) -> Option<String> {
    while *cursor < lines.len() && lines[*cursor].trim().is_empty() {
      *cursor += 1;
    }
    let Some(line) = lines.get(*cursor).map(|l| l.trim()) else {
      self.error(lines.len().max(1), format!("Missing {} header.", prefix.trim_end_matches(':')));
      return None;
    };
    let n = *cursor + 1;
    let Some(value) = line.strip_prefix(prefix) else {
      self.error(n, format!("Missing {} header; found `{}`.", prefix.trim_end_matches(':'), trunc_for_log(line, 40)));
      return None;
    };
    *cursor += 1;
    let value = value.trim();
    if value.is_empty() {
      self.error(n, format!("Topic {what} cannot be empty."));
      return None;
    }
    Some(value.to_string())
  }

  fn line(&mut self, line: &str, n: usize) {
    if line.is_empty() {
      return;
    }
    let items_mode = self.question.as_ref().is_some_and(QuestionDraft::items_mode);
    let parsed = classify(line, items_mode);

    match parsed {
      Line::Topic(_) | Line::Desc(_) => {
        self.error(n, "Duplicate topic header; #TOPIC and #DESC belong on the first two lines. Ignored.");
        return;
      }
      Line::Concept(title) => {
        self.finish_concept();
        self.start_concept(title, n);
        return;
      }
      _ => {}
    }

    let Some(concept) = self.concept.as_mut() else {
      self.error(n, "Content found before any ##CONCEPT block.");
      return;
    };

    if !matches!(parsed, Line::Text(_)) {
      self.summary_open = false;
    }

    match parsed {
      Line::Prereq(value) => {
        concept.prerequisites = split_list(value);
        concept.prereq_line = n;
      }
      Line::Summary(value) => {
        concept.summary = value.to_string();
        self.summary_open = true;
      }
      Line::Type(value) => match QuestionType::parse(value) {
        None => self.error(n, format!("Unknown TYPE `{}`; expected MCQ, TWO_STEP, ORDER or FILL.", trunc_for_log(value, 20))),
        Some(qtype) => match self.question.as_mut() {
          Some(q) => q.set_type(qtype, n, &mut self.errors),
          None => self.pending_type = Some((qtype, n)),
        },
      },
      Line::Question(prompt) => {
        self.finish_question();
        if let Some(concept) = self.concept.as_mut() {
          concept.blocks_seen += 1;
          let qtype = self.pending_type.take().map(|(t, _)| t).unwrap_or_default();
          self.question = Some(QuestionDraft::new(n, concept.blocks_seen, qtype, prompt));
        }
      }
      Line::Separator => self.finish_question(),
      Line::Text(text) if self.question.is_none() && self.summary_open => {
        if !concept.summary.is_empty() {
          concept.summary.push(' ');
        }
        concept.summary.push_str(text);
      }
      other => match self.question.as_mut() {
        Some(q) => q.apply(other, n, &mut self.errors),
        None => self.error(n, "Question content found before Q: line."),
      },
    }
  }

  fn start_concept(&mut self, title: &str, n: usize) {
    let ordinal = self.concepts.len() + 1;
    if title.is_empty() {
      self.error(n, "Concept title cannot be empty.");
    }
    let mut id = slugify(title);
    if id.is_empty() {
      id = format!("concept-{ordinal}");
    }
    if let Some(&first) = self.claimed_ids.get(&id) {
      let base = id.clone();
      let mut k = 2;
      while self.claimed_ids.contains_key(&format!("{base}-{k}")) {
        k += 1;
      }
      id = format!("{base}-{k}");
      self.error(
        n,
        format!("Concept id `{base}` collides with the concept on line {first}; this one is renamed `{id}`."),
      );
    }
    self.claimed_ids.insert(id.clone(), n);
    self.summary_open = false;
    self.pending_type = None;
    self.concept = Some(ConceptDraft {
      line: n,
      id,
      title: title.to_string(),
      summary: String::new(),
      prerequisites: Vec::new(),
      prereq_line: n,
      questions: Vec::new(),
      blocks_seen: 0,
    });
  }

  fn finish_question(&mut self) {
    let Some(draft) = self.question.take() else { return };
    let Some(concept) = self.concept.as_mut() else { return };
    if let Some(q) = draft.finish(&concept.id, &mut self.errors) {
      concept.questions.push(q);
    }
  }

  fn finish_concept(&mut self) {
    self.finish_question();
    if let Some((_, line)) = self.pending_type.take() {
      self.error(line, "TYPE: is not followed by a question; ignored.");
    }
    let Some(draft) = self.concept.take() else { return };
    if draft.questions.is_empty() {
      let label = if draft.title.is_empty() { draft.id.clone() } else { draft.title.clone() };
      self.error(draft.line, format!("Concept `{label}` must include at least one question; dropped."));
      return;
    }
    self.prereq_lines.insert(draft.id.clone(), draft.prereq_line);
    self.concepts.push(Concept {
      id: draft.id,
      title: draft.title,
      summary: draft.summary,
      prerequisites: draft.prerequisites,
      questions: draft.questions,
    });
  }

  /// Prerequisites must name a sibling concept (by title or id) other than itself.
  fn check_prerequisites(&mut self) {
    let mut found = Vec::new();
    for concept in &self.concepts {
      let line = self.prereq_lines.get(&concept.id).copied().unwrap_or(1);
      for reference in &concept.prerequisites {
        let id = slugify(reference);
        if id == concept.id {
          found.push(ParseDiagnostic::new(line, format!("Concept `{}` lists itself as a prerequisite.", concept.title)));
        } else if !self.concepts.iter().any(|c| c.id == id) {
          found.push(ParseDiagnostic::new(
            line,
            format!("Unknown prerequisite `{reference}` for concept `{}`; no concept with that title in this topic.", concept.title),
          ));
        }
      }
    }
    self.errors.extend(found);
  }
}

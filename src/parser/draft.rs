//! Line classification and the in-progress question block.
//!
//! A `QuestionDraft` collects whatever lines the block contains; validation happens
//! once, in `finish`, so a block with several problems yields a single diagnostic at
//! its `Q:` line and is dropped on its own.

use crate::domain::{ChoiceOption, OptionLabel, ParseDiagnostic, Question, QuestionKind, QuestionType};
use crate::util::{split_list, trunc_for_log};

/// One trimmed, non-empty source line after prefix matching.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(super) enum Line<'a> {
  Topic(&'a str),
  Desc(&'a str),
  Concept(&'a str),
  Prereq(&'a str),
  Summary(&'a str),
  Question(&'a str),
  Type(&'a str),
  Separator,
  Choice(OptionLabel, &'a str),
  ReasonChoice(OptionLabel, &'a str),
  Items(&'a str),
  Item(usize, &'a str),
  Blank(&'a str),
  Reason(&'a str),
  ReasonAnswer(&'a str),
  Answer(&'a str),
  Explanation(&'a str),
  Tags(&'a str),
  Misconception(&'a str),
  Difficulty(&'a str),
  Variant(&'a str),
  Text(&'a str),
}

/// Prefixed directive keywords. Order matters: `##` before `#`, `REASON_ANS:` before `REASON:`.
#[derive(Clone, Copy)]
enum Keyword {
  Concept,
  Prereq,
  Summary,
  Topic,
  Desc,
  Question,
  Type,
  Items,
  Blank,
  ReasonAnswer,
  Reason,
  Answer,
  Explanation,
  Tags,
  Misconception,
  Difficulty,
  Variant,
}

const PREFIXES: &[(&str, Keyword)] = &[
  ("##CONCEPT:", Keyword::Concept),
  ("##PREREQ:", Keyword::Prereq),
  ("##SUMMARY:", Keyword::Summary),
  ("#TOPIC:", Keyword::Topic),
  ("#DESC:", Keyword::Desc),
  ("Q:", Keyword::Question),
  ("TYPE:", Keyword::Type),
  ("ITEMS:", Keyword::Items),
  ("BLANK:", Keyword::Blank),
  ("REASON_ANS:", Keyword::ReasonAnswer),
  ("REASON:", Keyword::Reason),
  ("ANS:", Keyword::Answer),
  ("EXPL:", Keyword::Explanation),
  ("TAGS:", Keyword::Tags),
  ("MISCONCEPT:", Keyword::Misconception),
  ("DIFF:", Keyword::Difficulty),
  ("VAR:", Keyword::Variant),
];

impl Keyword {
  fn line(self, rest: &str) -> Line<'_> {
    match self {
      Keyword::Concept => Line::Concept(rest),
      Keyword::Prereq => Line::Prereq(rest),
      Keyword::Summary => Line::Summary(rest),
      Keyword::Topic => Line::Topic(rest),
      Keyword::Desc => Line::Desc(rest),
      Keyword::Question => Line::Question(rest),
      Keyword::Type => Line::Type(rest),
      Keyword::Items => Line::Items(rest),
      Keyword::Blank => Line::Blank(rest),
      Keyword::ReasonAnswer => Line::ReasonAnswer(rest),
      Keyword::Reason => Line::Reason(rest),
      Keyword::Answer => Line::Answer(rest),
      Keyword::Explanation => Line::Explanation(rest),
      Keyword::Tags => Line::Tags(rest),
      Keyword::Misconception => Line::Misconception(rest),
      Keyword::Difficulty => Line::Difficulty(rest),
      Keyword::Variant => Line::Variant(rest),
    }
  }
}

/// Classify a trimmed line. Numbered item lines are only recognised while an
/// `ITEMS:` list is open, so prose such as `1) first` elsewhere stays text.
pub(super) fn classify(line: &str, items_mode: bool) -> Line<'_> {
  if line.len() >= 3 && line.bytes().all(|b| b == b'-') {
    return Line::Separator;
  }
  for &(prefix, keyword) in PREFIXES {
    if let Some(rest) = line.strip_prefix(prefix) {
      return keyword.line(rest.trim());
    }
  }
  if let Some((label, text)) = choice_line(line) {
    return Line::Choice(label, text);
  }
  if let Some((label, text)) = line.strip_prefix('R').and_then(choice_line) {
    return Line::ReasonChoice(label, text);
  }
  if items_mode {
    if let Some((n, text)) = item_line(line) {
      return Line::Item(n, text);
    }
  }
  Line::Text(line)
}

/// `A) text` .. `D) text`.
fn choice_line(line: &str) -> Option<(OptionLabel, &str)> {
  let bytes = line.as_bytes();
  if bytes.len() < 2 || bytes[1] != b')' || !(b'A'..=b'D').contains(&bytes[0]) {
    return None;
  }
  let label = OptionLabel::from_char(bytes[0] as char)?;
  Some((label, line[2..].trim()))
}

/// `3) text` or `3. text`.
fn item_line(line: &str) -> Option<(usize, &str)> {
  let digits = line.bytes().take_while(u8::is_ascii_digit).count();
  if digits == 0 {
    return None;
  }
  match line.as_bytes().get(digits) {
    Some(b')') | Some(b'.') => {
      let n = line[..digits].parse().ok()?;
      Some((n, line[digits + 1..].trim()))
    }
    _ => None,
  }
}

/// Fields that accept wrapped continuation lines.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TextField {
  Prompt,
  Explanation,
  Misconception,
  Reason,
}

#[derive(Debug)]
pub(super) struct QuestionDraft {
  /// Line of the `Q:` directive; every validation diagnostic points here.
  pub line: usize,
  /// 1-based position of this block within its concept.
  pub position: usize,
  qtype: QuestionType,
  prompt: String,
  options: Vec<ChoiceOption>,
  reason_prompt: String,
  reason_options: Vec<ChoiceOption>,
  reason_answer: Option<String>,
  items_declared: bool,
  items_mode: bool,
  items: Vec<String>,
  blanks: Vec<String>,
  answer: Option<String>,
  explanation: String,
  tags: Vec<String>,
  misconception: String,
  difficulty: Option<f64>,
  variant: Option<String>,
  open: Option<TextField>,
  has_body: bool,
}

impl QuestionDraft {
  pub fn new(line: usize, position: usize, qtype: QuestionType, prompt: &str) -> Self {
    Self {
      line,
      position,
      qtype,
      prompt: prompt.to_string(),
      options: Vec::new(),
      reason_prompt: String::new(),
      reason_options: Vec::new(),
      reason_answer: None,
      items_declared: false,
      items_mode: false,
      items: Vec::new(),
      blanks: Vec::new(),
      answer: None,
      explanation: String::new(),
      tags: Vec::new(),
      misconception: String::new(),
      difficulty: None,
      variant: None,
      open: Some(TextField::Prompt),
      has_body: false,
    }
  }

  pub fn items_mode(&self) -> bool {
    self.items_mode
  }

  /// `TYPE:` inside a block is only honoured before any option or body line.
  pub fn set_type(&mut self, qtype: QuestionType, line: usize, errors: &mut Vec<ParseDiagnostic>) {
    if self.has_body {
      errors.push(ParseDiagnostic::new(line, "TYPE: must appear before option and body lines; ignored."));
      return;
    }
    self.qtype = qtype;
    self.open = None;
  }

  /// Feed one body line of the block.
  pub fn apply(&mut self, line: Line<'_>, n: usize, errors: &mut Vec<ParseDiagnostic>) {
    if let Line::Text(text) = line {
      self.continue_text(text, n, errors);
      return;
    }

    self.has_body = true;
    self.open = None;
    if !matches!(line, Line::Item(..)) {
      self.items_mode = false;
    }

    match line {
      Line::Choice(label, text) => {
        if !self.qtype.uses_options() {
          errors.push(ParseDiagnostic::new(n, format!("Options A)-D) are not valid for {} questions; ignored.", self.qtype)));
        } else {
          push_choice(&mut self.options, label, text, "", n, errors);
        }
      }
      Line::ReasonChoice(label, text) => {
        if self.qtype != QuestionType::TwoStep {
          errors.push(ParseDiagnostic::new(n, "Reason options RA)-RD) are only valid for TWO_STEP questions; ignored."));
        } else {
          push_choice(&mut self.reason_options, label, text, "R", n, errors);
        }
      }
      Line::Items(rest) => {
        if self.qtype != QuestionType::Order {
          errors.push(ParseDiagnostic::new(n, "ITEMS: is only valid for ORDER questions; ignored."));
        } else {
          if !rest.is_empty() {
            errors.push(ParseDiagnostic::new(n, "ITEMS: takes no value; list items on the following lines."));
          }
          self.items_declared = true;
          self.items_mode = true;
        }
      }
      Line::Item(num, text) => {
        let expected = self.items.len() + 1;
        if num != expected {
          errors.push(ParseDiagnostic::new(n, format!("Expected item {expected}) but found {num}); ignored.")));
        } else if text.is_empty() {
          errors.push(ParseDiagnostic::new(n, format!("Item {num}) has no text; ignored.")));
        } else {
          self.items.push(text.to_string());
        }
      }
      Line::Blank(value) => {
        if self.qtype != QuestionType::Fill {
          errors.push(ParseDiagnostic::new(n, "BLANK: is only valid for FILL questions; ignored."));
        } else {
          self.blanks = split_list(value);
        }
      }
      Line::Reason(value) => {
        if self.qtype != QuestionType::TwoStep {
          errors.push(ParseDiagnostic::new(n, "REASON: is only valid for TWO_STEP questions; ignored."));
        } else {
          self.reason_prompt = value.to_string();
          self.open = Some(TextField::Reason);
        }
      }
      Line::ReasonAnswer(value) => {
        if self.qtype != QuestionType::TwoStep {
          errors.push(ParseDiagnostic::new(n, "REASON_ANS: is only valid for TWO_STEP questions; ignored."));
        } else {
          self.reason_answer = non_empty(value);
        }
      }
      Line::Answer(value) => self.answer = non_empty(value),
      Line::Explanation(value) => {
        self.explanation = value.to_string();
        self.open = Some(TextField::Explanation);
      }
      Line::Tags(value) => self.tags = split_list(value),
      Line::Misconception(value) => {
        self.misconception = value.to_string();
        self.open = Some(TextField::Misconception);
      }
      Line::Difficulty(value) => match value.parse::<f64>() {
        Ok(d) if d.is_finite() => self.difficulty = Some(d),
        _ => errors.push(ParseDiagnostic::new(n, format!("DIFF: expects a number, found `{}`; ignored.", trunc_for_log(value, 40)))),
      },
      Line::Variant(value) => self.variant = non_empty(value),
      // Header, concept and question-level lines are routed by the caller.
      _ => errors.push(ParseDiagnostic::new(n, "Unexpected directive inside a question block; ignored.")),
    }
  }

  fn continue_text(&mut self, text: &str, n: usize, errors: &mut Vec<ParseDiagnostic>) {
    if self.items_mode {
      errors.push(ParseDiagnostic::new(n, "ITEMS entries must start with a number, e.g. `1) ...`; ignored."));
      return;
    }
    let target = match self.open {
      Some(TextField::Prompt) => &mut self.prompt,
      Some(TextField::Explanation) => &mut self.explanation,
      Some(TextField::Misconception) => &mut self.misconception,
      Some(TextField::Reason) => &mut self.reason_prompt,
      None => {
        errors.push(ParseDiagnostic::new(n, format!("Unrecognized line: {}", trunc_for_log(text, 60))));
        return;
      }
    };
    if !target.is_empty() {
      target.push(' ');
    }
    target.push_str(text);
  }

  /// Validate the block. On failure exactly one diagnostic is recorded at `self.line`.
  pub fn finish(self, concept_id: &str, errors: &mut Vec<ParseDiagnostic>) -> Option<Question> {
    let line = self.line;
    match self.build(concept_id) {
      Ok(q) => Some(q),
      Err(message) => {
        errors.push(ParseDiagnostic::new(line, message));
        None
      }
    }
  }

  fn build(self, concept_id: &str) -> Result<Question, String> {
    let prompt = self.prompt.trim().to_string();
    if prompt.is_empty() {
      return Err("Question is missing a prompt (Q:); dropped.".into());
    }
    let answer_key = self.answer.clone().ok_or("Question is missing ANS:; dropped.")?;
    let explanation = self.explanation.trim().to_string();
    if explanation.is_empty() {
      return Err("Question is missing EXPL:; dropped.".into());
    }

    let kind = match self.qtype {
      QuestionType::Mcq => QuestionKind::Mcq {
        options: four_options(self.options, "MCQ", "A-D")?,
        answer: strict_label(&answer_key).ok_or_else(|| format!("MCQ answer must be one of A, B, C, D (found `{answer_key}`); dropped."))?,
      },
      QuestionType::TwoStep => {
        let options = four_options(self.options, "TWO_STEP", "A-D")?;
        let answer = strict_label(&answer_key).ok_or_else(|| format!("TWO_STEP answer must be one of A, B, C, D (found `{answer_key}`); dropped."))?;
        let reason_prompt = self.reason_prompt.trim().to_string();
        if reason_prompt.is_empty() {
          return Err("TWO_STEP question is missing REASON:; dropped.".into());
        }
        let reason_options = four_options(self.reason_options, "TWO_STEP reason", "RA-RD")?;
        let raw = self.reason_answer.ok_or("TWO_STEP question is missing REASON_ANS:; dropped.")?;
        let reason_answer = OptionLabel::from_key(&raw).ok_or_else(|| format!("REASON_ANS must be one of A-D or RA-RD (found `{raw}`); dropped."))?;
        QuestionKind::TwoStep { options, answer, reason_prompt, reason_options, reason_answer }
      }
      QuestionType::Order => {
        if !self.items_declared {
          return Err("ORDER question is missing an ITEMS: block; dropped.".into());
        }
        if self.items.len() < 3 {
          return Err(format!("ORDER questions need at least 3 items, found {}; dropped.", self.items.len()));
        }
        let answer = parse_permutation(&answer_key, self.items.len()).ok_or_else(|| {
          format!("ORDER answer must list each item number 1-{} exactly once (found `{answer_key}`); dropped.", self.items.len())
        })?;
        QuestionKind::Order { items: self.items, answer }
      }
      QuestionType::Fill => {
        if self.blanks.is_empty() {
          return Err("FILL question needs BLANK: with at least one accepted answer; dropped.".into());
        }
        QuestionKind::Fill { blank_answers: self.blanks }
      }
    };

    let misconception = self.misconception.trim();
    Ok(Question {
      id: format!("{}-q{}", concept_id, self.position),
      concept_id: concept_id.to_string(),
      prompt,
      explanation,
      answer_key,
      tags: self.tags,
      misconception: (!misconception.is_empty()).then(|| misconception.to_string()),
      difficulty: self.difficulty,
      variant_group: self.variant,
      kind,
    })
  }
}

fn non_empty(value: &str) -> Option<String> {
  (!value.is_empty()).then(|| value.to_string())
}

fn push_choice(
  options: &mut Vec<ChoiceOption>,
  label: OptionLabel,
  text: &str,
  prefix: &str,
  n: usize,
  errors: &mut Vec<ParseDiagnostic>,
) {
  match OptionLabel::ALL.get(options.len()) {
    Some(&expected) if expected == label => options.push(ChoiceOption { label, text: text.to_string() }),
    Some(&expected) => errors.push(ParseDiagnostic::new(
      n,
      format!("Expected option {prefix}{expected}) but found {prefix}{label}); ignored."),
    )),
    None => errors.push(ParseDiagnostic::new(n, format!("More than four {prefix}A)-{prefix}D) options; ignored."))),
  }
}

fn four_options(options: Vec<ChoiceOption>, what: &str, range: &str) -> Result<[ChoiceOption; 4], String> {
  let found = options.len();
  <[ChoiceOption; 4]>::try_from(options)
    .map_err(|_| format!("{what} questions need exactly 4 options ({range}), found {found}; dropped."))
}

fn strict_label(key: &str) -> Option<OptionLabel> {
  let mut chars = key.trim().chars();
  match (chars.next(), chars.next()) {
    (Some(ch), None) => OptionLabel::from_char(ch),
    _ => None,
  }
}

/// `"2,1,3"` (commas and/or spaces) into a validated 1-based permutation of `len` items.
pub(crate) fn parse_permutation(raw: &str, len: usize) -> Option<Vec<usize>> {
  let picks: Vec<usize> = raw
    .split(|c: char| c == ',' || c.is_whitespace())
    .filter(|s| !s.is_empty())
    .map(|s| s.parse::<usize>().ok())
    .collect::<Option<_>>()?;
  if picks.len() != len {
    return None;
  }
  let mut seen = vec![false; len];
  for &p in &picks {
    if p == 0 || p > len || seen[p - 1] {
      return None;
    }
    seen[p - 1] = true;
  }
  Some(picks)
}

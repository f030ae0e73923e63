//! Per-variant answer checking.
//!
//! A `Submission` is the typed form of what the learner answered. The UI shell may build
//! one directly or hand over text (`Submission::parse`), which is also how attempts store
//! `selected_answer`.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{OptionLabel, Question, QuestionKind, QuestionType};
use crate::parser::parse_permutation;
use crate::util::normalize_answer;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GradeError {
  #[error("expected one of A-D, got `{0}`")]
  BadChoice(String),
  #[error("two-step answer needs a primary and a reasoning choice such as `B|RC`, got `{0}`")]
  BadTwoStep(String),
  #[error("order answer must list each item number 1-{len} exactly once, got `{raw}`")]
  BadOrder { raw: String, len: usize },
  #[error("fill answer is empty")]
  EmptyFill,
  #[error("{got} submission for a {expected} question")]
  WrongType { expected: QuestionType, got: QuestionType },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Submission {
  #[serde(rename = "MCQ")]
  Choice(OptionLabel),
  TwoStep { primary: OptionLabel, reason: OptionLabel },
  /// 1-based item numbers in the order the learner arranged them.
  Order(Vec<usize>),
  Fill(String),
}

impl Submission {
  pub fn question_type(&self) -> QuestionType {
    match self {
      Submission::Choice(_) => QuestionType::Mcq,
      Submission::TwoStep { .. } => QuestionType::TwoStep,
      Submission::Order(_) => QuestionType::Order,
      Submission::Fill(_) => QuestionType::Fill,
    }
  }

  /// Read a textual answer in the shape `kind` expects: `B`, `B|RC`, `2,1,3` or free text.
  pub fn parse(kind: &QuestionKind, raw: &str) -> Result<Self, GradeError> {
    let trimmed = raw.trim();
    match kind {
      QuestionKind::Mcq { .. } => single_label(trimmed).map(Submission::Choice).ok_or_else(|| GradeError::BadChoice(raw.to_string())),
      QuestionKind::TwoStep { .. } => {
        let parts: Vec<&str> = trimmed
          .split(|c: char| c == '|' || c == ',' || c == '/' || c.is_whitespace())
          .filter(|s| !s.is_empty())
          .collect();
        match parts.as_slice() {
          [p, r] => match (single_label(p), OptionLabel::from_key(r)) {
            (Some(primary), Some(reason)) => Ok(Submission::TwoStep { primary, reason }),
            _ => Err(GradeError::BadTwoStep(raw.to_string())),
          },
          _ => Err(GradeError::BadTwoStep(raw.to_string())),
        }
      }
      QuestionKind::Order { items, .. } => parse_permutation(trimmed, items.len())
        .map(Submission::Order)
        .ok_or_else(|| GradeError::BadOrder { raw: raw.to_string(), len: items.len() }),
      QuestionKind::Fill { .. } => {
        if trimmed.is_empty() {
          Err(GradeError::EmptyFill)
        } else {
          Ok(Submission::Fill(trimmed.to_string()))
        }
      }
    }
  }

  /// The submission that would be judged correct for `kind`.
  pub fn expected_for(kind: &QuestionKind) -> Self {
    match kind {
      QuestionKind::Mcq { answer, .. } => Submission::Choice(*answer),
      QuestionKind::TwoStep { answer, reason_answer, .. } => Submission::TwoStep { primary: *answer, reason: *reason_answer },
      QuestionKind::Order { answer, .. } => Submission::Order(answer.clone()),
      QuestionKind::Fill { blank_answers } => Submission::Fill(blank_answers.join(" / ")),
    }
  }
}

fn single_label(s: &str) -> Option<OptionLabel> {
  let mut chars = s.chars();
  match (chars.next(), chars.next()) {
    (Some(ch), None) => OptionLabel::from_char(ch),
    _ => None,
  }
}

impl fmt::Display for Submission {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Submission::Choice(label) => write!(f, "{label}"),
      Submission::TwoStep { primary, reason } => write!(f, "{primary}|R{reason}"),
      Submission::Order(order) => {
        let parts: Vec<String> = order.iter().map(|n| n.to_string()).collect();
        f.write_str(&parts.join(","))
      }
      Submission::Fill(text) => f.write_str(text),
    }
  }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Grade {
  pub correct: bool,
  /// Correct answer in display form, for feedback.
  pub expected: String,
}

/// Judge `submission` against `question`: label equality for MCQ, both choices for
/// TWO_STEP, exact permutation for ORDER, case-insensitive match against any accepted
/// blank for FILL.
pub fn grade(question: &Question, submission: &Submission) -> Result<Grade, GradeError> {
  let correct = match (&question.kind, submission) {
    (QuestionKind::Mcq { answer, .. }, Submission::Choice(picked)) => answer == picked,
    (QuestionKind::TwoStep { answer, reason_answer, .. }, Submission::TwoStep { primary, reason }) => {
      answer == primary && reason_answer == reason
    }
    (QuestionKind::Order { answer, .. }, Submission::Order(order)) => answer == order,
    (QuestionKind::Fill { blank_answers }, Submission::Fill(text)) => {
      let given = normalize_answer(text);
      blank_answers.iter().any(|b| normalize_answer(b) == given)
    }
    _ => {
      return Err(GradeError::WrongType { expected: question.kind.question_type(), got: submission.question_type() });
    }
  };
  Ok(Grade { correct, expected: Submission::expected_for(&question.kind).to_string() })
}

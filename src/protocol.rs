//! Public DTOs handed to the UI shell (serde ready).
//! Keep this small and stable to evolve the core and the shell independently.
//! Nothing in here may carry an answer key before the learner has answered.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{ChoiceOption, Concept, Mastery, Question, QuestionKind, QuestionType, Topic};
use crate::grading::{Grade, Submission};

/// Shown when a wrong answer's question carries no `MISCONCEPTION:` line.
pub const DEFAULT_MISCONCEPTION: &str =
    "This concept is fragile because the intuition usually conflicts with the correct model.";

/// Variant-specific part of a question as the learner sees it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestionBody {
    Mcq {
        options: Vec<ChoiceOption>,
    },
    #[serde(rename_all = "camelCase")]
    TwoStep {
        options: Vec<ChoiceOption>,
        reason_prompt: String,
        reason_options: Vec<ChoiceOption>,
    },
    /// Items numbered 1..n in their listed order; the learner answers with a permutation.
    Order {
        items: Vec<String>,
    },
    Fill,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionView {
    pub id: String,
    pub concept_id: String,
    pub concept_title: String,
    pub prompt: String,
    pub tags: Vec<String>,
    pub difficulty: Option<f64>,
    pub body: QuestionBody,
}

impl QuestionView {
    pub fn question_type(&self) -> QuestionType {
        match self.body {
            QuestionBody::Mcq { .. } => QuestionType::Mcq,
            QuestionBody::TwoStep { .. } => QuestionType::TwoStep,
            QuestionBody::Order { .. } => QuestionType::Order,
            QuestionBody::Fill => QuestionType::Fill,
        }
    }
}

/// Convert an internal `Question` to the public view.
pub fn to_view(concept: &Concept, q: &Question) -> QuestionView {
    let body = match &q.kind {
        QuestionKind::Mcq { options, .. } => QuestionBody::Mcq { options: options.to_vec() },
        QuestionKind::TwoStep { options, reason_prompt, reason_options, .. } => QuestionBody::TwoStep {
            options: options.to_vec(),
            reason_prompt: reason_prompt.clone(),
            reason_options: reason_options.to_vec(),
        },
        QuestionKind::Order { items, .. } => QuestionBody::Order { items: items.clone() },
        QuestionKind::Fill { .. } => QuestionBody::Fill,
    };
    QuestionView {
        id: q.id.clone(),
        concept_id: concept.id.clone(),
        concept_title: concept.title.clone(),
        prompt: q.prompt.clone(),
        tags: q.tags.clone(),
        difficulty: q.difficulty,
        body,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptRef {
    pub id: String,
    pub title: String,
}

/// Result of one answer, as displayed after submitting.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerFeedback {
    pub question_id: String,
    pub correct: bool,
    pub selected: String,
    pub expected: String,
    pub explanation: String,
    /// Wrong answers only: the question's misconception or a generic fallback.
    pub misconception: Option<String>,
    /// Wrong answers only, and only when the concept declares prerequisites.
    pub prerequisite_hint: Option<String>,
    pub revisit: Vec<ConceptRef>,
    pub mastery: Mastery,
    pub next_review_at: DateTime<Utc>,
}

pub fn to_feedback(
    topic: &Topic,
    concept: &Concept,
    q: &Question,
    submission: &Submission,
    grade: &Grade,
    mastery: Mastery,
    next_review_at: DateTime<Utc>,
) -> AnswerFeedback {
    let (misconception, prerequisite_hint, revisit) = if grade.correct {
        (None, None, Vec::new())
    } else {
        let misconception = q.misconception.clone().unwrap_or_else(|| DEFAULT_MISCONCEPTION.to_string());
        let hint = (!concept.prerequisites.is_empty()).then(|| {
            format!("Dependency hint: revisit {} to tighten the chain.", concept.prerequisites.join(", "))
        });
        let revisit = topic
            .prerequisites_of(concept)
            .into_iter()
            .map(|c| ConceptRef { id: c.id.clone(), title: c.title.clone() })
            .collect();
        (Some(misconception), hint, revisit)
    };
    AnswerFeedback {
        question_id: q.id.clone(),
        correct: grade.correct,
        selected: submission.to_string(),
        expected: grade.expected.clone(),
        explanation: q.explanation.clone(),
        misconception,
        prerequisite_hint,
        revisit,
        mastery,
        next_review_at,
    }
}

/// Per-concept line of a topic overview.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptOverview {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub prerequisites: Vec<String>,
    pub mastery: Mastery,
    /// `false` until the learner has attempted or signalled the concept.
    pub started: bool,
    pub due: bool,
    /// Every resolvable prerequisite is at least `Fragile`.
    pub unlocked: bool,
    pub question_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicOverview {
    pub id: String,
    pub title: String,
    pub description: String,
    pub concepts: Vec<ConceptOverview>,
}

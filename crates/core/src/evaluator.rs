//! Answer grading.
//!
//! `AnswerEvaluator` turns a free-text quiz answer into a score in
//! `[0.0, 1.0]` using the language model. `KeywordEvaluator` grades a single
//! check-question answer against expected keywords and only asks the model
//! when no keyword is present.

use crate::llm_client::{ChatMessage, Generator};
use crate::prompts::{PromptBook, PromptKey};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};

/// Score used when the model fails or replies without a number.
pub const DEFAULT_SCORE: f64 = 0.5;
/// Minimum score for a subtopic quiz to count as passed.
pub const PASS_THRESHOLD: f64 = 0.6;

pub(crate) const SCORE_SYSTEM: &str = "Reply only with a number between 0.0 and 1.0";

static SCORE_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"1(?:\.0+)?|0(?:\.\d+)?|\.\d+").ok());

/// Extracts the first score-shaped number from a model reply.
pub fn parse_score(reply: &str) -> Option<f64> {
    SCORE_PATTERN
        .as_ref()?
        .find(reply)
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .map(|score| score.clamp(0.0, 1.0))
}

pub fn is_passing(score: f64) -> bool {
    score >= PASS_THRESHOLD
}

#[derive(Clone)]
pub struct AnswerEvaluator {
    llm: Generator,
    prompts: Arc<PromptBook>,
}

impl AnswerEvaluator {
    pub fn new(llm: Generator, prompts: Arc<PromptBook>) -> Self {
        Self { llm, prompts }
    }

    /// Scores `answer` for `topic`; `quiz` is the quiz text being answered.
    ///
    /// Always returns a value in `[0.0, 1.0]`, falling back to
    /// `DEFAULT_SCORE`.
    pub async fn score(&self, answer: &str, topic: &str, quiz: &str) -> f64 {
        let prompt = self.prompts.render(
            PromptKey::ScoreAnswer,
            &[("topic", topic), ("answer", answer), ("quiz", quiz)],
        );
        let reply = self
            .llm
            .try_generate(vec![ChatMessage::system(SCORE_SYSTEM), ChatMessage::user(prompt)])
            .await;

        match reply {
            Ok(text) => match parse_score(&text) {
                Some(score) => {
                    debug!(score, "Scored quiz answer");
                    score
                }
                None => {
                    warn!(reply = %text, "No score in model reply; using default");
                    DEFAULT_SCORE
                }
            },
            Err(e) => {
                warn!(error = %e, "Scoring call failed; using default");
                DEFAULT_SCORE
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Correct,
    Partial,
    Wrong,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub verdict: Verdict,
    pub justification: String,
    pub correction: String,
}

/// Single-question checker for callers that know the expected keywords.
/// The staged tutoring flow grades with `AnswerEvaluator` instead.
#[derive(Clone)]
pub struct KeywordEvaluator {
    llm: Generator,
    prompts: Arc<PromptBook>,
}

impl KeywordEvaluator {
    pub fn new(llm: Generator, prompts: Arc<PromptBook>) -> Self {
        Self { llm, prompts }
    }

    /// Grades `answer` against `expected_keywords`.
    ///
    /// All keywords present (case-insensitive substring) is `Correct`, some is
    /// `Partial`. With none present the model judges the answer; its verdict
    /// is honoured only when it says `PARTIAL`, anything else is `Wrong`.
    pub async fn evaluate(&self, answer: &str, expected_keywords: &[String], history: &str) -> Evaluation {
        let lowered = answer.to_lowercase();
        let matched: Vec<&String> = expected_keywords
            .iter()
            .filter(|k| lowered.contains(&k.to_lowercase()))
            .collect();

        if !expected_keywords.is_empty() && matched.len() == expected_keywords.len() {
            return Evaluation {
                verdict: Verdict::Correct,
                justification: "All keywords present.".to_string(),
                correction: String::new(),
            };
        }
        if !matched.is_empty() {
            return Evaluation {
                verdict: Verdict::Partial,
                justification: format!("Matched keywords: {matched:?}"),
                correction: "Add the missing key points.".to_string(),
            };
        }

        let keywords = expected_keywords.join(", ");
        let prompt = self.prompts.render(
            PromptKey::EvaluateAnswer,
            &[("keywords", &keywords), ("answer", answer), ("history", history)],
        );
        let reply = self.llm.generate(vec![ChatMessage::user(prompt)]).await;
        parse_model_evaluation(&reply)
    }
}

fn labelled_line<'a>(reply: &'a str, label: &str) -> Option<&'a str> {
    reply.lines().find_map(|line| {
        let line = line.trim();
        let (head, rest) = line.split_once(':')?;
        head.trim()
            .eq_ignore_ascii_case(label)
            .then(|| rest.trim())
    })
}

fn parse_model_evaluation(reply: &str) -> Evaluation {
    let verdict = match labelled_line(reply, "VERDICT").map(str::to_ascii_uppercase) {
        Some(v) if v.starts_with("PARTIAL") => Verdict::Partial,
        _ => Verdict::Wrong,
    };
    let correction = labelled_line(reply, "CORRECTION")
        .unwrap_or(reply)
        .to_string();
    Evaluation {
        verdict,
        justification: reply.to_string(),
        correction,
    }
}

//! Intent classification for free-text student input.
//!
//! The language model labels each message with one `Intent`. When the model
//! call fails, a deterministic keyword scan takes over; it always returns a
//! label.

use crate::llm_client::{ChatMessage, Generator};
use crate::prompts::{PromptBook, PromptKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub(crate) const CLASSIFIER_SYSTEM: &str = "You are a precise classifier. Reply with exactly one of: PROCEED, LEARN, QUIZ, FEEDBACK, RETRY, NEXT, END, QUESTION.";

/// Classified purpose of a student message. Drives stage dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    Proceed,
    Learn,
    Quiz,
    Feedback,
    Retry,
    Next,
    End,
    Question,
}

impl Intent {
    /// Parses a model label. `CONTINUE` is accepted as an alias for `LEARN`.
    pub fn from_label(label: &str) -> Option<Intent> {
        let cleaned = label
            .trim()
            .trim_matches(|c: char| !c.is_ascii_alphabetic())
            .to_ascii_uppercase();
        match cleaned.as_str() {
            "PROCEED" => Some(Intent::Proceed),
            "LEARN" | "CONTINUE" => Some(Intent::Learn),
            "QUIZ" => Some(Intent::Quiz),
            "FEEDBACK" => Some(Intent::Feedback),
            "RETRY" => Some(Intent::Retry),
            "NEXT" => Some(Intent::Next),
            "END" => Some(Intent::End),
            "QUESTION" => Some(Intent::Question),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Proceed => "PROCEED",
            Intent::Learn => "LEARN",
            Intent::Quiz => "QUIZ",
            Intent::Feedback => "FEEDBACK",
            Intent::Retry => "RETRY",
            Intent::Next => "NEXT",
            Intent::End => "END",
            Intent::Question => "QUESTION",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Labels student messages, using the language model with a keyword fallback.
#[derive(Clone)]
pub struct IntentClassifier {
    llm: Generator,
    prompts: Arc<PromptBook>,
}

impl IntentClassifier {
    pub fn new(llm: Generator, prompts: Arc<PromptBook>) -> Self {
        Self { llm, prompts }
    }

    /// Classifies `user_message` in the context of the previous tutor message.
    ///
    /// An absent or blank message is the default forward intent and skips the
    /// model. An unrecognized model label is coerced to `Intent::Question`.
    pub async fn classify(&self, user_message: Option<&str>, last_assistant_message: &str) -> Intent {
        let Some(message) = user_message.map(str::trim).filter(|m| !m.is_empty()) else {
            return Intent::Learn;
        };

        let prompt = self.prompts.render(
            PromptKey::ClassifyIntent,
            &[
                ("last_message", last_assistant_message),
                ("user_message", message),
            ],
        );
        let reply = self
            .llm
            .try_generate(vec![
                ChatMessage::system(CLASSIFIER_SYSTEM),
                ChatMessage::user(prompt),
            ])
            .await;

        match reply {
            Ok(label) => match Intent::from_label(&label) {
                Some(intent) => {
                    debug!(%intent, "Classified intent");
                    intent
                }
                None => {
                    warn!(label = %label, "Unrecognized intent label; treating as QUESTION");
                    Intent::Question
                }
            },
            Err(e) => {
                let intent = keyword_intent(message);
                info!(error = %e, %intent, "Intent model unavailable; used keyword fallback");
                intent
            }
        }
    }
}

fn contains_any(text: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| text.contains(n))
}

fn has_any_word(words: &[&str], targets: &[&str]) -> bool {
    words.iter().any(|w| targets.contains(w))
}

fn looks_like_answer(text: &str, words: &[&str]) -> bool {
    contains_any(text, &["=", "a)", "b)", "c)", "d)"])
        || has_any_word(words, &["true", "false"])
        || (words.len() > 4 && text.trim_end().ends_with('.'))
}

/// Deterministic keyword classification. Total over all input.
pub fn keyword_intent(message: &str) -> Intent {
    let text = message.to_lowercase();
    let words: Vec<&str> = text
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| !w.is_empty())
        .collect();

    if has_any_word(&words, &["quiz", "test"]) {
        Intent::Quiz
    } else if has_any_word(&words, &["end", "finish", "done", "quit", "stop"]) {
        Intent::End
    } else if has_any_word(&words, &["next", "continue"]) || text.contains("move on") {
        Intent::Next
    } else if has_any_word(&words, &["retry", "again", "explain"]) {
        Intent::Retry
    } else if looks_like_answer(&text, &words) {
        Intent::Feedback
    } else if text.contains('?')
        || has_any_word(&words, &["what", "how", "why", "when", "where", "who", "which"])
    {
        Intent::Question
    } else if has_any_word(&words, &["start", "begin", "ready"]) {
        Intent::Proceed
    } else {
        Intent::Learn
    }
}

//! Prompt templates.
//!
//! Templates use `{name}` placeholders. The built-in set is compiled in from
//! the repository's `prompts/` directory; a deployment can override any of
//! them by placing a file with the same stem in its own prompts directory.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptKey {
    Intro,
    Lesson,
    Quiz,
    Feedback,
    Retry,
    Question,
    Closing,
    Celebration,
    ClassifyIntent,
    ScoreAnswer,
    EvaluateAnswer,
}

impl PromptKey {
    pub const ALL: [PromptKey; 11] = [
        PromptKey::Intro,
        PromptKey::Lesson,
        PromptKey::Quiz,
        PromptKey::Feedback,
        PromptKey::Retry,
        PromptKey::Question,
        PromptKey::Closing,
        PromptKey::Celebration,
        PromptKey::ClassifyIntent,
        PromptKey::ScoreAnswer,
        PromptKey::EvaluateAnswer,
    ];

    /// File stem of the template on disk.
    pub fn file_stem(&self) -> &'static str {
        match self {
            PromptKey::Intro => "intro",
            PromptKey::Lesson => "lesson",
            PromptKey::Quiz => "quiz",
            PromptKey::Feedback => "feedback",
            PromptKey::Retry => "retry",
            PromptKey::Question => "question",
            PromptKey::Closing => "closing",
            PromptKey::Celebration => "celebration",
            PromptKey::ClassifyIntent => "classify_intent",
            PromptKey::ScoreAnswer => "score_answer",
            PromptKey::EvaluateAnswer => "evaluate_answer",
        }
    }

    fn builtin(&self) -> &'static str {
        match self {
            PromptKey::Intro => include_str!("../../../prompts/intro.md"),
            PromptKey::Lesson => include_str!("../../../prompts/lesson.md"),
            PromptKey::Quiz => include_str!("../../../prompts/quiz.md"),
            PromptKey::Feedback => include_str!("../../../prompts/feedback.md"),
            PromptKey::Retry => include_str!("../../../prompts/retry.md"),
            PromptKey::Question => include_str!("../../../prompts/question.md"),
            PromptKey::Closing => include_str!("../../../prompts/closing.md"),
            PromptKey::Celebration => include_str!("../../../prompts/celebration.md"),
            PromptKey::ClassifyIntent => include_str!("../../../prompts/classify_intent.md"),
            PromptKey::ScoreAnswer => include_str!("../../../prompts/score_answer.md"),
            PromptKey::EvaluateAnswer => include_str!("../../../prompts/evaluate_answer.md"),
        }
    }
}

/// The set of prompt templates used by the tutor.
#[derive(Debug, Clone)]
pub struct PromptBook {
    templates: HashMap<&'static str, String>,
}

impl Default for PromptBook {
    fn default() -> Self {
        let templates = PromptKey::ALL
            .iter()
            .map(|key| (key.file_stem(), key.builtin().to_string()))
            .collect();
        Self { templates }
    }
}

impl PromptBook {
    /// Loads the built-in templates, overridden by any `*.md` file in `dir`
    /// whose stem names a known template.
    ///
    /// A missing directory is not an error; the built-ins are used as is.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut book = Self::default();
        if !dir.is_dir() {
            warn!(path = %dir.display(), "Prompts directory not found; using built-in prompts");
            return Ok(book);
        }

        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() || path.extension().and_then(|s| s.to_str()) != Some("md") {
                continue;
            }
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .context("Could not get file stem")?;
            match PromptKey::ALL.iter().find(|k| k.file_stem() == stem) {
                Some(key) => {
                    let content = fs::read_to_string(&path)?;
                    book.templates.insert(key.file_stem(), content);
                    info!(prompt = stem, "Loaded prompt override");
                }
                None => warn!(file = %path.display(), "Ignoring unknown prompt file"),
            }
        }
        Ok(book)
    }

    pub fn template(&self, key: PromptKey) -> &str {
        self.templates
            .get(key.file_stem())
            .map(String::as_str)
            .unwrap_or_else(|| key.builtin())
    }

    /// Fills the `{name}` placeholders of a template.
    pub fn render(&self, key: PromptKey, vars: &[(&str, &str)]) -> String {
        vars.iter()
            .fold(self.template(key).to_string(), |acc, (name, value)| {
                acc.replace(&format!("{{{name}}}"), value)
            })
    }
}

//! Session documents and their persisted progress.
//!
//! A `Session` is one student's tutoring interaction with a topic. It is
//! persisted as a single versioned document keyed by `session_id`; the
//! orchestrator appends `Turn`s to its history and patches the progress
//! fields with a `ProgressPatch` after every processed input.

use crate::limits::SessionLimits;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Schema version written into every new session document.
pub const SESSION_SCHEMA_VERSION: u32 = 1;

/// The phase of the tutoring state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    TopicIntro,
    Learning,
    /// A simpler re-explanation after a failed quiz.
    RetryLearning,
    Quiz,
    ReadyNext,
    Retry,
    /// Labels turns that answered an off-topic question. Never stored as the
    /// session's own stage.
    QuestionAnswered,
    Complete,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::TopicIntro => "topic_intro",
            Stage::Learning => "learning",
            Stage::RetryLearning => "retry_learning",
            Stage::Quiz => "quiz",
            Stage::ReadyNext => "ready_next",
            Stage::Retry => "retry",
            Stage::QuestionAnswered => "question_answered",
            Stage::Complete => "complete",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Complete)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One persisted user/assistant exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Equal to the session's `conversation_count` when the turn was saved.
    pub turn: u32,
    /// `None` for system-initiated turns such as the opening introduction.
    pub user_message: Option<String>,
    pub assistant_message: String,
    pub stage: Stage,
    pub timestamp: DateTime<Utc>,
}

/// Statistics recorded when a session completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalStats {
    pub total_interactions: u32,
    pub concepts_learned: usize,
    pub quizzes_taken: usize,
    pub average_performance: f64,
    pub subtopics_passed: usize,
    pub subtopic_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub session_id: String,
    pub student_id: String,
    pub topic: String,

    pub conversation_count: u32,
    pub current_subtopic_index: usize,
    pub stage: Stage,
    pub is_complete: bool,

    #[serde(default)]
    pub subtopic_completion_status: Vec<bool>,
    #[serde(default)]
    pub subtopic_quiz_scores: Vec<f64>,
    #[serde(default)]
    pub concepts_learned: Vec<String>,
    #[serde(default)]
    pub quiz_scores: Vec<f64>,
    #[serde(default)]
    pub needs_remedial: bool,

    #[serde(default)]
    pub conversation_history: Vec<Turn>,

    pub max_conversations: u32,
    pub completion_threshold: u32,
    pub quiz_frequency: u32,

    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub session_summary: Option<String>,
    #[serde(default)]
    pub final_stats: Option<FinalStats>,
}

fn default_schema_version() -> u32 {
    SESSION_SCHEMA_VERSION
}

impl Session {
    /// Builds a fresh session with default progress fields.
    pub fn new(
        session_id: impl Into<String>,
        student_id: impl Into<String>,
        topic: impl Into<String>,
        limits: SessionLimits,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            schema_version: SESSION_SCHEMA_VERSION,
            session_id: session_id.into(),
            student_id: student_id.into(),
            topic: topic.into(),
            conversation_count: 0,
            current_subtopic_index: 0,
            stage: Stage::TopicIntro,
            is_complete: false,
            subtopic_completion_status: Vec::new(),
            subtopic_quiz_scores: Vec::new(),
            concepts_learned: Vec::new(),
            quiz_scores: Vec::new(),
            needs_remedial: false,
            conversation_history: Vec::new(),
            max_conversations: limits.max_conversations,
            completion_threshold: limits.completion_threshold,
            quiz_frequency: limits.quiz_frequency,
            started_at: now,
            updated_at: now,
            completed_at: None,
            session_summary: None,
            final_stats: None,
        }
    }

    pub fn limits(&self) -> SessionLimits {
        SessionLimits {
            max_conversations: self.max_conversations,
            completion_threshold: self.completion_threshold,
            quiz_frequency: self.quiz_frequency,
        }
    }

    /// Assistant text of the most recent turn, or an empty string.
    pub fn last_assistant_message(&self) -> &str {
        self.conversation_history
            .last()
            .map(|t| t.assistant_message.as_str())
            .unwrap_or("")
    }

    /// The most recent quiz put to the student. Falls back to the last
    /// assistant message when no quiz turn is recorded.
    pub fn open_quiz(&self) -> &str {
        self.conversation_history
            .iter()
            .rev()
            .find(|t| t.stage == Stage::Quiz)
            .map(|t| t.assistant_message.as_str())
            .unwrap_or_else(|| self.last_assistant_message())
    }

    /// Grows both per-subtopic records to at least `len` entries.
    ///
    /// Every indexed write into the records must be preceded by this call.
    pub fn pad_subtopic_records(&mut self, len: usize) {
        if self.subtopic_completion_status.len() < len {
            self.subtopic_completion_status.resize(len, false);
        }
        if self.subtopic_quiz_scores.len() < len {
            self.subtopic_quiz_scores.resize(len, 0.0);
        }
    }

    /// Records a graded quiz for the current subtopic.
    pub fn record_subtopic_result(&mut self, score: f64, passed: bool) {
        let idx = self.current_subtopic_index;
        self.pad_subtopic_records(idx + 1);
        self.subtopic_completion_status[idx] = passed;
        self.subtopic_quiz_scores[idx] = score;
    }

    pub fn subtopic_passed(&self, index: usize) -> bool {
        self.subtopic_completion_status
            .get(index)
            .copied()
            .unwrap_or(false)
    }

    pub fn passed_count(&self) -> usize {
        self.subtopic_completion_status.iter().filter(|p| **p).count()
    }

    pub fn learn_concept(&mut self, concept: &str) {
        if !self.concepts_learned.iter().any(|c| c == concept) {
            self.concepts_learned.push(concept.to_string());
        }
    }

    pub fn average_quiz_score(&self) -> f64 {
        mean(&self.quiz_scores)
    }

    /// Renders up to `limit` recent turns, latest first, for prompt context.
    pub fn format_history(&self, limit: usize) -> String {
        self.conversation_history
            .iter()
            .rev()
            .take(limit)
            .enumerate()
            .map(|(i, turn)| {
                format!(
                    "[{}] user: {} | assistant: {}",
                    i,
                    turn.user_message.as_deref().unwrap_or(""),
                    turn.assistant_message
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Marks the session terminal and stores its closing summary and stats.
    pub fn complete(&mut self, summary: String, stats: FinalStats, now: DateTime<Utc>) {
        self.stage = Stage::Complete;
        self.is_complete = true;
        self.completed_at = Some(now);
        self.session_summary = Some(summary);
        self.final_stats = Some(stats);
    }
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// The progress fields written back after each processed input.
///
/// Optional fields are only present when the handler touched them, so a
/// store can merge the patch into the stored document field by field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressPatch {
    pub conversation_count: u32,
    pub stage: Stage,
    pub current_subtopic_index: usize,
    pub concepts_learned: Vec<String>,
    pub quiz_scores: Vec<f64>,
    pub needs_remedial: bool,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtopic_completion_status: Option<Vec<bool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtopic_quiz_scores: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_complete: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_stats: Option<FinalStats>,
}

impl ProgressPatch {
    /// Captures the progress fields of `session`.
    ///
    /// Per-subtopic records are included only when `records_touched` is set;
    /// completion fields only once the session is complete.
    pub fn from_session(session: &Session, records_touched: bool) -> Self {
        let completed = session.is_complete;
        Self {
            conversation_count: session.conversation_count,
            stage: session.stage,
            current_subtopic_index: session.current_subtopic_index,
            concepts_learned: session.concepts_learned.clone(),
            quiz_scores: session.quiz_scores.clone(),
            needs_remedial: session.needs_remedial,
            updated_at: session.updated_at,
            subtopic_completion_status: records_touched
                .then(|| session.subtopic_completion_status.clone()),
            subtopic_quiz_scores: records_touched.then(|| session.subtopic_quiz_scores.clone()),
            is_complete: completed.then_some(true),
            completed_at: if completed { session.completed_at } else { None },
            session_summary: if completed {
                session.session_summary.clone()
            } else {
                None
            },
            final_stats: if completed {
                session.final_stats.clone()
            } else {
                None
            },
        }
    }

    /// Merges the patch into a stored session document.
    pub fn apply_to(&self, session: &mut Session) {
        session.conversation_count = self.conversation_count;
        session.stage = self.stage;
        session.current_subtopic_index = self.current_subtopic_index;
        session.concepts_learned = self.concepts_learned.clone();
        session.quiz_scores = self.quiz_scores.clone();
        session.needs_remedial = self.needs_remedial;
        session.updated_at = self.updated_at;
        if let Some(status) = &self.subtopic_completion_status {
            session.subtopic_completion_status = status.clone();
        }
        if let Some(scores) = &self.subtopic_quiz_scores {
            session.subtopic_quiz_scores = scores.clone();
        }
        if let Some(done) = self.is_complete {
            session.is_complete = done;
        }
        if self.completed_at.is_some() {
            session.completed_at = self.completed_at;
        }
        if self.session_summary.is_some() {
            session.session_summary = self.session_summary.clone();
        }
        if self.final_stats.is_some() {
            session.final_stats = self.final_stats.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::calculate_limits;
    use approx::assert_relative_eq;

    fn session() -> Session {
        Session::new("s-1", "student", "Light", calculate_limits(3), Utc::now())
    }

    #[test]
    fn stage_serializes_as_snake_case() {
        assert_eq!(
            serde_json::to_string(&Stage::ReadyNext).unwrap(),
            "\"ready_next\""
        );
        let stage: Stage = serde_json::from_str("\"retry_learning\"").unwrap();
        assert_eq!(stage, Stage::RetryLearning);
        assert_eq!(Stage::QuestionAnswered.to_string(), "question_answered");
    }

    #[test]
    fn recording_past_the_end_pads_both_lists() {
        let mut s = session();
        s.current_subtopic_index = 5;
        s.record_subtopic_result(0.8, true);

        assert_eq!(s.subtopic_completion_status.len(), 6);
        assert_eq!(s.subtopic_quiz_scores.len(), 6);
        assert!(s.subtopic_completion_status[5]);
        assert!(!s.subtopic_completion_status[0]);
        assert_relative_eq!(s.subtopic_quiz_scores[5], 0.8);
        assert_relative_eq!(s.subtopic_quiz_scores[2], 0.0);
    }

    #[test]
    fn padding_never_shrinks() {
        let mut s = session();
        s.pad_subtopic_records(4);
        s.pad_subtopic_records(2);
        assert_eq!(s.subtopic_completion_status.len(), 4);
        assert_eq!(s.subtopic_quiz_scores.len(), 4);
    }

    #[test]
    fn concepts_are_deduplicated() {
        let mut s = session();
        s.learn_concept("Reflection");
        s.learn_concept("Reflection");
        s.learn_concept("Refraction");
        assert_eq!(s.concepts_learned, vec!["Reflection", "Refraction"]);
    }

    #[test]
    fn history_is_rendered_latest_first() {
        let mut s = session();
        for (i, text) in ["first", "second", "third"].iter().enumerate() {
            s.conversation_history.push(Turn {
                turn: i as u32,
                user_message: (i > 0).then(|| format!("u{i}")),
                assistant_message: text.to_string(),
                stage: Stage::Learning,
                timestamp: Utc::now(),
            });
        }
        let rendered = s.format_history(2);
        assert_eq!(
            rendered,
            "[0] user: u2 | assistant: third\n[1] user: u1 | assistant: second"
        );
        assert_eq!(s.last_assistant_message(), "third");
    }

    #[test]
    fn open_quiz_skips_later_question_turns() {
        let mut s = session();
        assert_eq!(s.open_quiz(), "");
        for (text, stage) in [
            ("lesson", Stage::Learning),
            ("1) What absorbs light?", Stage::Quiz),
            ("Because of chlorophyll.", Stage::QuestionAnswered),
        ] {
            s.conversation_history.push(Turn {
                turn: 0,
                user_message: None,
                assistant_message: text.to_string(),
                stage,
                timestamp: Utc::now(),
            });
        }
        assert_eq!(s.open_quiz(), "1) What absorbs light?");
    }

    #[test]
    fn patch_omits_untouched_fields() {
        let s = session();
        let patch = ProgressPatch::from_session(&s, false);
        let json = serde_json::to_value(&patch).unwrap();
        assert!(json.get("subtopic_quiz_scores").is_none());
        assert!(json.get("is_complete").is_none());
        assert_eq!(json["stage"], "topic_intro");
    }

    #[test]
    fn patch_apply_merges_touched_records() {
        let mut stored = session();
        stored.subtopic_completion_status = vec![true];

        let mut live = stored.clone();
        live.conversation_count = 4;
        live.stage = Stage::Quiz;
        live.subtopic_completion_status = vec![true, false];

        ProgressPatch::from_session(&live, false).apply_to(&mut stored);
        assert_eq!(stored.conversation_count, 4);
        assert_eq!(stored.stage, Stage::Quiz);
        assert_eq!(stored.subtopic_completion_status, vec![true]);

        ProgressPatch::from_session(&live, true).apply_to(&mut stored);
        assert_eq!(stored.subtopic_completion_status, vec![true, false]);
    }

    #[test]
    fn old_documents_default_missing_fields() {
        let s = session();
        let mut json = serde_json::to_value(&s).unwrap();
        let obj = json.as_object_mut().unwrap();
        obj.remove("schema_version");
        obj.remove("quiz_scores");
        obj.remove("conversation_history");

        let parsed: Session = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.schema_version, SESSION_SCHEMA_VERSION);
        assert!(parsed.quiz_scores.is_empty());
        assert!(parsed.conversation_history.is_empty());
    }
}

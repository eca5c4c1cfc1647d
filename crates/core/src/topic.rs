use serde::{Deserialize, Serialize};

/// One addressable content unit inside a topic.
///
/// Subtopics are read-only content owned by the content store. Sessions only
/// keep an index into the ordered list returned for their topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtopic {
    pub number: i32,
    pub title: String,
    pub content: String,
}

impl Subtopic {
    pub fn new(number: i32, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            number,
            title: title.into(),
            content: content.into(),
        }
    }

    /// Label used in the `sources` list of responses.
    pub fn source_label(&self) -> String {
        format!("{}. {}", self.number, self.title)
    }

    /// Returns at most `max_chars` characters of the body text.
    pub fn excerpt(&self, max_chars: usize) -> &str {
        match self.content.char_indices().nth(max_chars) {
            Some((idx, _)) => &self.content[..idx],
            None => &self.content,
        }
    }
}

/// A topic as listed by the content store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicSummary {
    pub topic: String,
    pub description: String,
    pub chunk_count: usize,
}

impl TopicSummary {
    /// Shortened name for display: the part before the first `:`.
    pub fn display_name(&self) -> String {
        self.topic
            .split(':')
            .next()
            .unwrap_or(&self.topic)
            .trim()
            .to_string()
    }
}

/// Aggregate statistics over all sessions of one topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicStats {
    pub topic: String,
    pub total_sessions: u64,
    pub completed_sessions: u64,
    /// Percentage of sessions that reached completion.
    pub completion_rate: f64,
    /// Mean `conversation_count` of completed sessions, rounded to one decimal.
    pub average_interactions: f64,
}

impl TopicStats {
    pub fn from_counts(
        topic: impl Into<String>,
        total_sessions: u64,
        completed_sessions: u64,
        average_interactions: f64,
    ) -> Self {
        let completion_rate = if total_sessions > 0 {
            completed_sessions as f64 / total_sessions as f64 * 100.0
        } else {
            0.0
        };
        Self {
            topic: topic.into(),
            total_sessions,
            completed_sessions,
            completion_rate,
            average_interactions: (average_interactions * 10.0).round() / 10.0,
        }
    }
}

//! Content store contract and an in-memory implementation.
//!
//! Topics and subtopics are read-only content; session documents are keyed by
//! `session_id` and written with upsert semantics.

use crate::error::StoreError;
use crate::session::{ProgressPatch, SESSION_SCHEMA_VERSION, Session, Turn};
use crate::topic::{Subtopic, TopicStats, TopicSummary};
use async_trait::async_trait;
use fuzzy_matcher::FuzzyMatcher;
use fuzzy_matcher::skim::SkimMatcherV2;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn list_topics(&self) -> Result<Vec<TopicSummary>, StoreError>;

    /// Maps a requested topic name to the stored one.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` when nothing matches.
    async fn resolve_topic(&self, topic: &str) -> Result<String, StoreError>;

    /// Subtopics of `topic`, ordered by number.
    async fn get_subtopics(&self, topic: &str) -> Result<Vec<Subtopic>, StoreError>;

    async fn get_subtopic(&self, topic: &str, index: usize) -> Result<Option<Subtopic>, StoreError>;

    /// Fetches a session document; `None` if the id is unknown.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::UnsupportedSchema` for documents written by a newer
    /// schema version.
    async fn load_session(&self, session_id: &str) -> Result<Option<Session>, StoreError>;

    async fn save_session(&self, session: &Session) -> Result<(), StoreError>;

    async fn append_turn(&self, session_id: &str, turn: &Turn) -> Result<(), StoreError>;

    async fn update_progress(&self, session_id: &str, patch: &ProgressPatch) -> Result<(), StoreError>;

    /// Sessions of one student, newest first.
    async fn student_sessions(&self, student_id: &str, limit: usize) -> Result<Vec<Session>, StoreError>;

    async fn topic_stats(&self, topic: &str) -> Result<TopicStats, StoreError>;
}

/// Rejects session documents newer than this build understands.
pub fn check_schema(session: &Session) -> Result<(), StoreError> {
    if session.schema_version > SESSION_SCHEMA_VERSION {
        return Err(StoreError::UnsupportedSchema {
            found: session.schema_version,
            supported: SESSION_SCHEMA_VERSION,
        });
    }
    Ok(())
}

/// Picks the stored topic name for a request.
///
/// Tries a case-insensitive exact match, then a match on the part after
/// `": "` (so "Cells" finds "Biology: Cells"), then the best fuzzy match.
pub fn match_topic<'a>(known: &'a [String], requested: &str) -> Option<&'a str> {
    let wanted = requested.trim();
    if wanted.is_empty() {
        return None;
    }

    if let Some(exact) = known.iter().find(|t| t.eq_ignore_ascii_case(wanted)) {
        return Some(exact);
    }

    let suffix = known.iter().find(|t| {
        t.split_once(": ")
            .is_some_and(|(_, rest)| rest.trim().eq_ignore_ascii_case(wanted))
    });
    if let Some(found) = suffix {
        return Some(found);
    }

    let matcher = SkimMatcherV2::default();
    known
        .iter()
        .filter_map(|t| matcher.fuzzy_match(t, wanted).map(|score| (score, t)))
        .max_by_key(|(score, _)| *score)
        .map(|(score, t)| {
            debug!(requested = wanted, matched = %t, score, "Fuzzy topic match");
            t.as_str()
        })
}

#[derive(Debug, Clone)]
struct TopicEntry {
    summary: TopicSummary,
    subtopics: Vec<Subtopic>,
}

/// In-memory `ContentStore`, used by tests and local runs.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    topics: Arc<Vec<TopicEntry>>,
    sessions: Arc<Mutex<HashMap<String, Session>>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a topic with its subtopics; subtopics are kept ordered by number.
    #[must_use]
    pub fn with_topic(
        mut self,
        topic: impl Into<String>,
        description: impl Into<String>,
        mut subtopics: Vec<Subtopic>,
    ) -> Self {
        subtopics.sort_by_key(|s| s.number);
        let summary = TopicSummary {
            topic: topic.into(),
            description: description.into(),
            chunk_count: subtopics.len(),
        };
        Arc::make_mut(&mut self.topics).push(TopicEntry { summary, subtopics });
        self
    }

    fn entry(&self, topic: &str) -> Result<&TopicEntry, StoreError> {
        let names: Vec<String> = self.topics.iter().map(|e| e.summary.topic.clone()).collect();
        let name = match_topic(&names, topic)
            .ok_or_else(|| StoreError::NotFound(format!("topic '{topic}'")))?;
        self.topics
            .iter()
            .find(|e| e.summary.topic == name)
            .ok_or_else(|| StoreError::NotFound(format!("topic '{topic}'")))
    }

    fn sessions(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Session>>, StoreError> {
        self.sessions
            .lock()
            .map_err(|e| StoreError::Connection(e.to_string()))
    }
}

#[async_trait]
impl ContentStore for InMemoryStore {
    async fn list_topics(&self) -> Result<Vec<TopicSummary>, StoreError> {
        Ok(self.topics.iter().map(|e| e.summary.clone()).collect())
    }

    async fn resolve_topic(&self, topic: &str) -> Result<String, StoreError> {
        Ok(self.entry(topic)?.summary.topic.clone())
    }

    async fn get_subtopics(&self, topic: &str) -> Result<Vec<Subtopic>, StoreError> {
        Ok(self.entry(topic)?.subtopics.clone())
    }

    async fn get_subtopic(&self, topic: &str, index: usize) -> Result<Option<Subtopic>, StoreError> {
        Ok(self.entry(topic)?.subtopics.get(index).cloned())
    }

    async fn load_session(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        let guard = self.sessions()?;
        match guard.get(session_id) {
            Some(session) => {
                check_schema(session)?;
                Ok(Some(session.clone()))
            }
            None => Ok(None),
        }
    }

    async fn save_session(&self, session: &Session) -> Result<(), StoreError> {
        let mut guard = self.sessions()?;
        guard.insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn append_turn(&self, session_id: &str, turn: &Turn) -> Result<(), StoreError> {
        let mut guard = self.sessions()?;
        let session = guard
            .get_mut(session_id)
            .ok_or_else(|| StoreError::NotFound(format!("session '{session_id}'")))?;
        session.conversation_history.push(turn.clone());
        Ok(())
    }

    async fn update_progress(&self, session_id: &str, patch: &ProgressPatch) -> Result<(), StoreError> {
        let mut guard = self.sessions()?;
        let session = guard
            .get_mut(session_id)
            .ok_or_else(|| StoreError::NotFound(format!("session '{session_id}'")))?;
        patch.apply_to(session);
        Ok(())
    }

    async fn student_sessions(&self, student_id: &str, limit: usize) -> Result<Vec<Session>, StoreError> {
        let guard = self.sessions()?;
        let mut found: Vec<Session> = guard
            .values()
            .filter(|s| s.student_id == student_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        found.truncate(limit);
        Ok(found)
    }

    async fn topic_stats(&self, topic: &str) -> Result<TopicStats, StoreError> {
        let name = self.resolve_topic(topic).await?;
        let guard = self.sessions()?;
        let sessions: Vec<&Session> = guard.values().filter(|s| s.topic == name).collect();
        let completed: Vec<f64> = sessions
            .iter()
            .filter(|s| s.is_complete)
            .map(|s| f64::from(s.conversation_count))
            .collect();
        Ok(TopicStats::from_counts(
            name,
            sessions.len() as u64,
            completed.len() as u64,
            crate::session::mean(&completed),
        ))
    }
}

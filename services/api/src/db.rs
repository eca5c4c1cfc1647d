//! Data Access Layer
//!
//! PostgreSQL implementation of `ContentStore`. Session documents are stored
//! as JSONB; a few fields are mirrored into columns for listing and stats.

use anyhow::Result;
use async_trait::async_trait;
use revision_core::error::StoreError;
use revision_core::session::{ProgressPatch, SESSION_SCHEMA_VERSION, Session, Turn};
use revision_core::store::{ContentStore, check_schema, match_topic};
use revision_core::topic::{Subtopic, TopicStats, TopicSummary};
use serde_json::Value;
use sqlx::PgPool;
use tracing::error;

fn conn<E: std::fmt::Display>(e: E) -> StoreError {
    error!(error = %e, "Database call failed");
    StoreError::Connection(e.to_string())
}

#[derive(sqlx::FromRow)]
struct TopicRow {
    topic: String,
    description: String,
    chunk_count: i64,
}

#[derive(sqlx::FromRow)]
struct SubtopicRow {
    subtopic_number: i32,
    title: String,
    content: String,
}

impl From<SubtopicRow> for Subtopic {
    fn from(row: SubtopicRow) -> Self {
        Subtopic::new(row.subtopic_number, row.title, row.content)
    }
}

#[derive(sqlx::FromRow)]
struct StatsRow {
    total_sessions: i64,
    completed_sessions: i64,
    average_interactions: Option<f64>,
}

/// Decodes a stored session document, rejecting newer schema versions
/// before attempting the full decode.
fn session_from_document(document: Value) -> Result<Session, StoreError> {
    let version = document
        .get("schema_version")
        .and_then(Value::as_u64)
        .unwrap_or(u64::from(SESSION_SCHEMA_VERSION));
    if version > u64::from(SESSION_SCHEMA_VERSION) {
        return Err(StoreError::UnsupportedSchema {
            found: u32::try_from(version).unwrap_or(u32::MAX),
            supported: SESSION_SCHEMA_VERSION,
        });
    }
    let session: Session = serde_json::from_value(document)?;
    check_schema(&session)?;
    Ok(session)
}

fn count_column(count: u32) -> Result<i32, StoreError> {
    i32::try_from(count).map_err(|_| StoreError::Serialization("conversation_count overflow".into()))
}

/// A wrapper around the `PgPool` to provide a clear data access interface.
#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Creates a new `Db` instance.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs all pending `sqlx` migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn topic_names(&self) -> Result<Vec<String>, StoreError> {
        sqlx::query_scalar::<_, String>("SELECT topic FROM topics ORDER BY topic")
            .fetch_all(&self.pool)
            .await
            .map_err(conn)
    }
}

#[async_trait]
impl ContentStore for Db {
    async fn list_topics(&self) -> Result<Vec<TopicSummary>, StoreError> {
        let rows = sqlx::query_as::<_, TopicRow>(
            r"
            SELECT t.topic, t.description, COUNT(s.subtopic_number) AS chunk_count
            FROM topics t
            LEFT JOIN subtopics s ON s.topic = t.topic
            GROUP BY t.topic, t.description
            ORDER BY t.topic
            ",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        Ok(rows
            .into_iter()
            .map(|row| TopicSummary {
                topic: row.topic,
                description: row.description,
                chunk_count: usize::try_from(row.chunk_count).unwrap_or(0),
            })
            .collect())
    }

    async fn resolve_topic(&self, topic: &str) -> Result<String, StoreError> {
        let names = self.topic_names().await?;
        match_topic(&names, topic)
            .map(str::to_string)
            .ok_or_else(|| StoreError::NotFound(format!("topic '{topic}'")))
    }

    async fn get_subtopics(&self, topic: &str) -> Result<Vec<Subtopic>, StoreError> {
        let name = self.resolve_topic(topic).await?;
        let rows = sqlx::query_as::<_, SubtopicRow>(
            r"
            SELECT subtopic_number, title, content
            FROM subtopics
            WHERE topic = $1
            ORDER BY subtopic_number ASC
            ",
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;
        Ok(rows.into_iter().map(Subtopic::from).collect())
    }

    async fn get_subtopic(&self, topic: &str, index: usize) -> Result<Option<Subtopic>, StoreError> {
        let name = self.resolve_topic(topic).await?;
        let offset = i64::try_from(index).map_err(|_| StoreError::Serialization("index overflow".into()))?;
        let row = sqlx::query_as::<_, SubtopicRow>(
            r"
            SELECT subtopic_number, title, content
            FROM subtopics
            WHERE topic = $1
            ORDER BY subtopic_number ASC
            OFFSET $2 LIMIT 1
            ",
        )
        .bind(name)
        .bind(offset)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;
        Ok(row.map(Subtopic::from))
    }

    async fn load_session(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        let document = sqlx::query_scalar::<_, Value>(
            "SELECT document FROM revision_sessions WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        document.map(session_from_document).transpose()
    }

    async fn save_session(&self, session: &Session) -> Result<(), StoreError> {
        let document = serde_json::to_value(session)?;
        sqlx::query(
            r"
            INSERT INTO revision_sessions
                (session_id, student_id, topic, document, is_complete, conversation_count, started_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (session_id) DO UPDATE SET
                student_id = excluded.student_id,
                topic = excluded.topic,
                document = excluded.document,
                is_complete = excluded.is_complete,
                conversation_count = excluded.conversation_count,
                updated_at = excluded.updated_at
            ",
        )
        .bind(&session.session_id)
        .bind(&session.student_id)
        .bind(&session.topic)
        .bind(document)
        .bind(session.is_complete)
        .bind(count_column(session.conversation_count)?)
        .bind(session.started_at)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await
        .map_err(conn)?;
        Ok(())
    }

    async fn append_turn(&self, session_id: &str, turn: &Turn) -> Result<(), StoreError> {
        let turn = serde_json::to_value(turn)?;
        let result = sqlx::query(
            r"
            UPDATE revision_sessions
            SET document = jsonb_set(
                document,
                '{conversation_history}',
                COALESCE(document->'conversation_history', '[]'::jsonb) || jsonb_build_array($2::jsonb)
            )
            WHERE session_id = $1
            ",
        )
        .bind(session_id)
        .bind(turn)
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("session '{session_id}'")));
        }
        Ok(())
    }

    async fn update_progress(&self, session_id: &str, patch: &ProgressPatch) -> Result<(), StoreError> {
        let fields = serde_json::to_value(patch)?;
        let result = sqlx::query(
            r"
            UPDATE revision_sessions
            SET document = document || $2::jsonb,
                conversation_count = $3,
                is_complete = COALESCE($4, is_complete),
                updated_at = $5
            WHERE session_id = $1
            ",
        )
        .bind(session_id)
        .bind(fields)
        .bind(count_column(patch.conversation_count)?)
        .bind(patch.is_complete)
        .bind(patch.updated_at)
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("session '{session_id}'")));
        }
        Ok(())
    }

    async fn student_sessions(&self, student_id: &str, limit: usize) -> Result<Vec<Session>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let documents = sqlx::query_scalar::<_, Value>(
            r"
            SELECT document
            FROM revision_sessions
            WHERE student_id = $1
            ORDER BY started_at DESC
            LIMIT $2
            ",
        )
        .bind(student_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        documents.into_iter().map(session_from_document).collect()
    }

    async fn topic_stats(&self, topic: &str) -> Result<TopicStats, StoreError> {
        let name = self.resolve_topic(topic).await?;
        let row = sqlx::query_as::<_, StatsRow>(
            r"
            SELECT
                COUNT(*) AS total_sessions,
                COUNT(*) FILTER (WHERE is_complete) AS completed_sessions,
                (AVG(conversation_count) FILTER (WHERE is_complete))::DOUBLE PRECISION AS average_interactions
            FROM revision_sessions
            WHERE topic = $1
            ",
        )
        .bind(&name)
        .fetch_one(&self.pool)
        .await
        .map_err(conn)?;

        Ok(TopicStats::from_counts(
            name,
            u64::try_from(row.total_sessions).unwrap_or(0),
            u64::try_from(row.completed_sessions).unwrap_or(0),
            row.average_interactions.unwrap_or(0.0),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use revision_core::limits::calculate_limits;
    use serde_json::json;

    fn document() -> Value {
        let session = Session::new("s1", "alice", "Biology: Cells", calculate_limits(3), Utc::now());
        serde_json::to_value(session).unwrap()
    }

    #[test]
    fn stored_documents_decode() {
        let session = session_from_document(document()).unwrap();
        assert_eq!(session.session_id, "s1");
        assert_eq!(session.max_conversations, 8);
    }

    #[test]
    fn newer_documents_are_rejected_before_decoding() {
        let mut doc = json!({ "schema_version": SESSION_SCHEMA_VERSION + 1, "shape": "unknown" });
        assert!(matches!(
            session_from_document(doc.take()),
            Err(StoreError::UnsupportedSchema { .. })
        ));
    }

    #[test]
    fn malformed_documents_are_serialization_errors() {
        let doc = json!({ "session_id": 42 });
        assert!(matches!(
            session_from_document(doc),
            Err(StoreError::Serialization(_))
        ));
    }

    #[test]
    fn progress_patch_merges_as_a_shallow_object() {
        let mut session = session_from_document(document()).unwrap();
        session.conversation_count = 4;
        let fields = serde_json::to_value(ProgressPatch::from_session(&session, false)).unwrap();
        let object = fields.as_object().unwrap();

        assert_eq!(object["conversation_count"], json!(4));
        assert!(!object.contains_key("subtopic_completion_status"));
        assert!(!object.contains_key("session_summary"));
    }
}

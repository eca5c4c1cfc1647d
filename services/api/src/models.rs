//! API Models
//!
//! Request and response bodies of the HTTP surface, with `utoipa` schemas for
//! the OpenAPI document.

use chrono::{DateTime, Utc};
use revision_core::limits::calculate_limits;
use revision_core::orchestrator::{StartResult, TurnResult};
use revision_core::session::Session;
use revision_core::topic::{TopicStats, TopicSummary};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Deserialize, ToSchema, Debug)]
pub struct StartRevisionPayload {
    #[schema(example = "Biology: Photosynthesis")]
    pub topic: String,
    #[schema(example = "student-42")]
    pub student_id: String,
    /// Reuses an existing session when given; a new id is generated otherwise.
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Deserialize, ToSchema, Debug)]
pub struct ContinueRevisionPayload {
    pub session_id: String,
    #[schema(example = "Can you quiz me?")]
    pub query: String,
    #[serde(default)]
    pub topic: Option<String>,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct RevisionResponse {
    pub response: String,
    pub topic: String,
    pub session_id: String,
    pub conversation_count: u32,
    #[schema(example = "learning")]
    pub current_stage: String,
    pub is_session_complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_suggested_action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performance_score: Option<f64>,
    pub progress_percentage: f64,
    pub sources: Vec<String>,
    pub restart_required: bool,
    pub timestamp: DateTime<Utc>,
}

impl RevisionResponse {
    pub fn from_start(result: StartResult, timestamp: DateTime<Utc>) -> Self {
        Self {
            response: result.response,
            topic: result.topic,
            session_id: result.session_id,
            conversation_count: result.conversation_count,
            current_stage: result.stage.to_string(),
            is_session_complete: result.is_session_complete,
            session_summary: result.session_summary,
            next_suggested_action: None,
            performance_score: None,
            progress_percentage: result.progress_percentage,
            sources: result.sources,
            restart_required: false,
            timestamp,
        }
    }

    pub fn from_turn(session_id: String, result: TurnResult, timestamp: DateTime<Utc>) -> Self {
        Self {
            response: result.response,
            topic: result.topic,
            session_id,
            conversation_count: result.conversation_count,
            current_stage: result.stage.to_string(),
            is_session_complete: result.is_session_complete,
            session_summary: result.session_summary,
            next_suggested_action: result.next_suggested_action,
            performance_score: result.performance_score,
            progress_percentage: result.progress_percentage,
            sources: result.sources,
            restart_required: result.restart_required,
            timestamp,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct TopicInfo {
    pub topic: String,
    pub display_name: String,
    pub chunk_count: usize,
    pub description: String,
    pub max_conversations: u32,
    pub completion_threshold: u32,
}

impl From<TopicSummary> for TopicInfo {
    fn from(summary: TopicSummary) -> Self {
        let limits = calculate_limits(summary.chunk_count);
        Self {
            display_name: summary.display_name(),
            topic: summary.topic,
            chunk_count: summary.chunk_count,
            description: summary.description,
            max_conversations: limits.max_conversations,
            completion_threshold: limits.completion_threshold,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct SessionOverview {
    pub session_id: String,
    pub topic: String,
    pub stage: String,
    pub conversation_count: u32,
    pub is_complete: bool,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Session> for SessionOverview {
    fn from(session: &Session) -> Self {
        Self {
            session_id: session.session_id.clone(),
            topic: session.topic.clone(),
            stage: session.stage.to_string(),
            conversation_count: session.conversation_count,
            is_complete: session.is_complete,
            started_at: session.started_at,
            updated_at: session.updated_at,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct TopicStatsResponse {
    pub topic: String,
    pub total_sessions: u64,
    pub completed_sessions: u64,
    /// Percentage of sessions that were completed.
    pub completion_rate: f64,
    pub average_interactions: f64,
}

impl From<TopicStats> for TopicStatsResponse {
    fn from(stats: TopicStats) -> Self {
        Self {
            topic: stats.topic,
            total_sessions: stats.total_sessions,
            completed_sessions: stats.completed_sessions,
            completion_rate: stats.completion_rate,
            average_interactions: stats.average_interactions,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub model: String,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use revision_core::session::Stage;

    #[test]
    fn test_start_payload_session_id_is_optional() {
        let json = r#"{"topic": "Biology: Cells", "student_id": "s-1"}"#;
        let payload: StartRevisionPayload = serde_json::from_str(json).unwrap();

        assert_eq!(payload.topic, "Biology: Cells");
        assert_eq!(payload.student_id, "s-1");
        assert!(payload.session_id.is_none());
    }

    #[test]
    fn test_start_payload_missing_field() {
        let json = r#"{"topic": "Biology"}"#;
        let result: Result<StartRevisionPayload, _> = serde_json::from_str(json);

        assert!(result.is_err()); // student_id is required
    }

    #[test]
    fn test_continue_payload_topic_is_optional() {
        let json = r#"{"session_id": "abc", "query": "quiz me"}"#;
        let payload: ContinueRevisionPayload = serde_json::from_str(json).unwrap();

        assert_eq!(payload.query, "quiz me");
        assert!(payload.topic.is_none());
    }

    #[test]
    fn test_topic_info_from_summary() {
        let info = TopicInfo::from(TopicSummary {
            topic: "Biology: Cells".to_string(),
            description: "Cell structure".to_string(),
            chunk_count: 25,
        });

        assert_eq!(info.display_name, "Biology");
        assert_eq!(info.max_conversations, 50);
        assert_eq!(info.completion_threshold, 30);
    }

    #[test]
    fn test_turn_response_omits_absent_fields() {
        let result = TurnResult {
            response: "Here is your quiz".to_string(),
            topic: "Biology".to_string(),
            stage: Stage::Quiz,
            is_session_complete: false,
            conversation_count: 3,
            sources: vec!["1. Light".to_string()],
            performance_score: None,
            session_summary: None,
            next_suggested_action: None,
            progress_percentage: 50.0,
            restart_required: false,
        };
        let response = RevisionResponse::from_turn("s1".to_string(), result, Utc::now());

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["current_stage"], "quiz");
        assert_eq!(json["conversation_count"], 3);
        assert!(json.get("session_summary").is_none());
        assert!(json.get("performance_score").is_none());
    }

    #[test]
    fn test_start_response_carries_progress() {
        let result = StartResult {
            response: "Welcome back".to_string(),
            session_id: "s1".to_string(),
            topic: "Biology".to_string(),
            stage: Stage::Quiz,
            sources: Vec::new(),
            limits: calculate_limits(3),
            conversation_count: 3,
            is_session_complete: false,
            session_summary: None,
            progress_percentage: 50.0,
        };
        let response = RevisionResponse::from_start(result, Utc::now());

        assert_eq!(response.current_stage, "quiz");
        assert_eq!(response.progress_percentage, 50.0);
    }

    #[test]
    fn test_error_response_serialization() {
        let error = ErrorResponse {
            message: "Topic not found".to_string(),
        };

        let json = serde_json::to_string(&error).unwrap();
        let expected = r#"{"message":"Topic not found"}"#;
        assert_eq!(json, expected);
    }
}

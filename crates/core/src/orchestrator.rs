//! The tutoring state machine.
//!
//! `Tutor` owns the load, classify, dispatch, persist cycle for each student
//! input. Every operation on a session runs under that session's lock, so two
//! requests for the same `session_id` are applied one after the other.

use crate::error::TutorError;
use crate::evaluator::AnswerEvaluator;
use crate::intent::IntentClassifier;
use crate::limits::{SessionLimits, calculate_limits};
use crate::llm_client::Generator;
use crate::prompts::PromptBook;
use crate::session::{ProgressPatch, Session, Stage, Turn};
use crate::stages::StageHandlers;
use crate::store::ContentStore;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{info, instrument, warn};

pub const SESSION_NOT_FOUND: &str = "Session not found. Please start a new revision session.";

/// One async mutex per session id.
///
/// Entries nobody holds are pruned on the next acquisition.
#[derive(Default)]
pub struct SessionLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl SessionLocks {
    pub async fn acquire(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            map.retain(|_, lock| Arc::strong_count(lock) > 1);
            map.entry(session_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartResult {
    pub response: String,
    pub session_id: String,
    pub topic: String,
    pub stage: Stage,
    pub sources: Vec<String>,
    pub limits: SessionLimits,
    pub conversation_count: u32,
    pub is_session_complete: bool,
    pub session_summary: Option<String>,
    pub progress_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnResult {
    pub response: String,
    pub topic: String,
    pub stage: Stage,
    pub is_session_complete: bool,
    pub conversation_count: u32,
    pub sources: Vec<String>,
    pub performance_score: Option<f64>,
    /// Present only on the input that completed the session.
    pub session_summary: Option<String>,
    pub next_suggested_action: Option<String>,
    pub progress_percentage: f64,
    /// The session is unknown and the client should start a new one.
    pub restart_required: bool,
}

impl TurnResult {
    fn session_not_found() -> Self {
        Self {
            response: SESSION_NOT_FOUND.to_string(),
            topic: String::new(),
            stage: Stage::Complete,
            is_session_complete: true,
            conversation_count: 0,
            sources: Vec::new(),
            performance_score: None,
            session_summary: None,
            next_suggested_action: Some("Start a new revision session.".to_string()),
            progress_percentage: 0.0,
            restart_required: true,
        }
    }

    fn already_complete(session: &Session) -> Self {
        Self {
            response: "This session is already complete. Start a new session to keep revising.".to_string(),
            topic: session.topic.clone(),
            stage: Stage::Complete,
            is_session_complete: true,
            conversation_count: session.conversation_count,
            sources: Vec::new(),
            performance_score: None,
            session_summary: None,
            next_suggested_action: None,
            progress_percentage: progress_percentage(session),
            restart_required: false,
        }
    }
}

/// Share of the completion threshold reached, as a percentage capped at 100.
pub fn progress_percentage(session: &Session) -> f64 {
    if session.completion_threshold == 0 {
        return 100.0;
    }
    let pct = f64::from(session.conversation_count) / f64::from(session.completion_threshold) * 100.0;
    (pct.min(100.0) * 10.0).round() / 10.0
}

/// Hint for the student's next move, derived from the stage just entered.
pub fn next_suggested_action(session: &Session, stage: Stage) -> Option<String> {
    if stage.is_terminal() || session.is_complete {
        return None;
    }
    if session.conversation_count >= session.max_conversations {
        return Some("You've covered a lot today. Say \"end\" to wrap up the session.".to_string());
    }
    let hint = match stage {
        Stage::TopicIntro => "Say \"ready\" to begin the first lesson.",
        Stage::Learning | Stage::RetryLearning | Stage::QuestionAnswered => {
            let due = session.quiz_frequency > 0
                && session.conversation_count % session.quiz_frequency == 0;
            if due {
                "Ready to test yourself? Say \"quiz\"."
            } else {
                "Ask a question, or say \"quiz\" when you're ready."
            }
        }
        Stage::Quiz => "Reply with your answers to both questions in one message.",
        Stage::ReadyNext => "Say \"next\" to move on to the next subtopic.",
        Stage::Retry => "Say \"retry\" for a simpler explanation, or \"next\" to move on.",
        Stage::Complete => return None,
    };
    Some(hint.to_string())
}

pub struct Tutor {
    store: Arc<dyn ContentStore>,
    classifier: IntentClassifier,
    handlers: StageHandlers,
    locks: SessionLocks,
}

impl Tutor {
    /// Wires the classifier, evaluator and stage handlers to one model.
    pub fn new(store: Arc<dyn ContentStore>, llm: Generator, prompts: Arc<PromptBook>) -> Self {
        let evaluator = AnswerEvaluator::new(llm.clone(), prompts.clone());
        Self {
            store,
            classifier: IntentClassifier::new(llm.clone(), prompts.clone()),
            handlers: StageHandlers::new(llm, prompts, evaluator),
            locks: SessionLocks::default(),
        }
    }

    pub fn store(&self) -> &Arc<dyn ContentStore> {
        &self.store
    }

    /// Opens a session, or resumes the one stored under `session_id`.
    ///
    /// A resumed session keeps its progress; a completed one returns its
    /// stored summary without calling the model.
    #[instrument(skip(self))]
    pub async fn start(&self, topic: &str, student_id: &str, session_id: &str) -> Result<StartResult, TutorError> {
        let _guard = self.locks.acquire(session_id).await;
        let now = Utc::now();

        let existing = self.store.load_session(session_id).await?;
        if let Some(session) = existing.as_ref().filter(|s| s.is_complete) {
            info!("Start requested for a completed session");
            let summary = session
                .session_summary
                .clone()
                .unwrap_or_else(|| "This session is already complete.".to_string());
            return Ok(StartResult {
                response: summary.clone(),
                session_id: session.session_id.clone(),
                topic: session.topic.clone(),
                stage: Stage::Complete,
                sources: Vec::new(),
                limits: session.limits(),
                conversation_count: session.conversation_count,
                is_session_complete: true,
                session_summary: Some(summary),
                progress_percentage: progress_percentage(session),
            });
        }

        let (mut session, subtopics, resuming) = match existing {
            Some(session) => {
                let subtopics = self.store.get_subtopics(&session.topic).await?;
                (session, subtopics, true)
            }
            None => {
                let canonical = self.store.resolve_topic(topic).await?;
                let subtopics = self.store.get_subtopics(&canonical).await?;
                let limits = calculate_limits(subtopics.len());
                info!(topic = %canonical, subtopics = subtopics.len(), ?limits, "Creating session");
                let session = Session::new(session_id, student_id, canonical, limits, now);
                (session, subtopics, false)
            }
        };

        let response = self.handlers.introduce(&session, &subtopics, resuming).await;
        let turn = Turn {
            turn: session.conversation_count,
            user_message: None,
            assistant_message: response.clone(),
            stage: session.stage,
            timestamp: now,
        };
        session.updated_at = now;

        if resuming {
            info!(count = session.conversation_count, "Resuming session");
            self.store.append_turn(session_id, &turn).await?;
            self.store
                .update_progress(session_id, &ProgressPatch::from_session(&session, false))
                .await?;
        } else {
            session.conversation_history.push(turn);
            self.store.save_session(&session).await?;
        }

        Ok(StartResult {
            response,
            session_id: session.session_id.clone(),
            topic: session.topic.clone(),
            stage: session.stage,
            sources: subtopics.iter().map(|s| s.source_label()).collect(),
            limits: session.limits(),
            conversation_count: session.conversation_count,
            is_session_complete: false,
            session_summary: None,
            progress_percentage: progress_percentage(&session),
        })
    }

    /// Processes one student message.
    ///
    /// Unknown sessions produce a restart response rather than an error.
    #[instrument(skip(self, user_message))]
    pub async fn handle_input(&self, session_id: &str, user_message: &str) -> Result<TurnResult, TutorError> {
        let _guard = self.locks.acquire(session_id).await;

        let Some(mut session) = self.store.load_session(session_id).await? else {
            warn!("Input for unknown session");
            return Ok(TurnResult::session_not_found());
        };
        if session.is_complete {
            info!("Input after completion ignored");
            return Ok(TurnResult::already_complete(&session));
        }

        let subtopics = self.store.get_subtopics(&session.topic).await?;
        let now = Utc::now();
        session.conversation_count += 1;
        session.updated_at = now;

        let message = user_message.trim();
        let intent = self
            .classifier
            .classify(Some(message), session.last_assistant_message())
            .await;
        let outcome = self
            .handlers
            .dispatch(intent, &mut session, &subtopics, message, now)
            .await;

        if outcome.stage != Stage::QuestionAnswered {
            session.stage = outcome.stage;
        }
        info!(
            %intent,
            stage = %outcome.stage,
            count = session.conversation_count,
            index = session.current_subtopic_index,
            "Handled input"
        );

        let turn = Turn {
            turn: session.conversation_count,
            user_message: Some(message.to_string()).filter(|m| !m.is_empty()),
            assistant_message: outcome.response.clone(),
            stage: outcome.stage,
            timestamp: now,
        };
        self.store.append_turn(session_id, &turn).await?;
        self.store
            .update_progress(session_id, &ProgressPatch::from_session(&session, outcome.records_touched))
            .await?;

        Ok(TurnResult {
            response: outcome.response,
            topic: session.topic.clone(),
            stage: outcome.stage,
            is_session_complete: session.is_complete,
            conversation_count: session.conversation_count,
            sources: outcome.sources,
            performance_score: outcome.performance_score,
            session_summary: if session.is_complete {
                session.session_summary.clone()
            } else {
                None
            },
            next_suggested_action: next_suggested_action(&session, outcome.stage),
            progress_percentage: progress_percentage(&session),
            restart_required: false,
        })
    }
}

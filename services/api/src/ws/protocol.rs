//! Defines the WebSocket message protocol between the browser client and the API server.
//!
//! Clients send raw text frames, one student message per frame. The server
//! answers with the JSON messages below.

use revision_core::TurnResult;
use serde::Serialize;

/// Messages sent from the server to the client (browser).
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The tutor's reply to one student message.
    Message {
        content: String,
        conversation_count: u32,
        is_session_complete: bool,
        current_stage: String,
        sources: Vec<String>,
    },
    /// Sent once, after the message that finalized the session.
    SessionComplete { summary: String },
    /// Reports a failure to process the last message.
    Error { message: String },
}

impl ServerMessage {
    /// Splits a turn into the reply and, when the turn finalized the
    /// session, the completion event that follows it.
    pub fn from_turn(result: TurnResult) -> (Self, Option<Self>) {
        let complete = result
            .session_summary
            .map(|summary| ServerMessage::SessionComplete { summary });
        let message = ServerMessage::Message {
            content: result.response,
            conversation_count: result.conversation_count,
            is_session_complete: result.is_session_complete,
            current_stage: result.stage.to_string(),
            sources: result.sources,
        };
        (message, complete)
    }
}

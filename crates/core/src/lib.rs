//! Core of the revision tutor: the session state machine and the pieces it
//! drives.
//!
//! The crate is transport-agnostic. A service wires a `ContentStore` and an
//! `LLMClient` into a `Tutor` and forwards student messages to it.

pub mod error;
pub mod evaluator;
pub mod intent;
pub mod limits;
pub mod llm_client;
pub mod orchestrator;
pub mod prompts;
pub mod session;
pub mod stages;
pub mod store;
pub mod topic;

pub use error::{StoreError, TutorError};
pub use orchestrator::{StartResult, Tutor, TurnResult};
pub use session::{Session, Stage};

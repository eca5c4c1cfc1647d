//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the resources shared
//! by every handler: the tutor, its content store, and the loaded config.

use crate::config::Config;
use revision_core::Tutor;
use revision_core::store::ContentStore;
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub tutor: Arc<Tutor>,
    pub store: Arc<dyn ContentStore>,
    pub config: Arc<Config>,
}

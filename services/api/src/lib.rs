//! Revision API Library Crate
//!
//! This library contains the web service around the revision tutor: the
//! application state, the PostgreSQL content store, API handlers, the
//! WebSocket transport and routing. The binaries are thin wrappers around it.

pub mod config;
pub mod db;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
pub mod ws;

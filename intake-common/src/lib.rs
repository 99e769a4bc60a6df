//! # Intake Common Library
//!
//! Shared code for the document intake service and its consumers:
//! - Event types (`IntakeEvent`) and the broadcast `EventBus`
//! - Domain enums shared over the wire (file states, document types)
//! - TOML configuration file helpers
//! - SSE stream helpers

pub mod config;
pub mod error;
pub mod events;
pub mod sse;

pub use error::{Error, Result};

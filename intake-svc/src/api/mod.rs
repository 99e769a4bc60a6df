//! HTTP API handlers for intake-svc
//!
//! REST commands and observation endpoints plus an SSE event stream

pub mod health;
pub mod intake;
pub mod sse;

pub use health::health_routes;
pub use intake::intake_routes;
pub use sse::intake_event_stream;

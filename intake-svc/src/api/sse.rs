//! Server-Sent Events (SSE) for intake progress streaming

use crate::AppState;
use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use intake_common::events::IntakeEvent;
use std::convert::Infallible;

/// GET /intake/events - SSE event stream for intake progress
///
/// Streams every intake event: batch acceptance and rejection, per-file
/// state changes and failures, routing, duplicate conflicts, retries and
/// session clears.
pub async fn intake_event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    intake_common::sse::event_bus_sse_stream("intake-svc", &state.event_bus, is_intake_event)
}

/// Events forwarded to intake observers
pub fn is_intake_event(event: &IntakeEvent) -> bool {
    matches!(
        event,
        IntakeEvent::BatchAccepted { .. }
            | IntakeEvent::BatchRejected { .. }
            | IntakeEvent::FileRejected { .. }
            | IntakeEvent::FileAdded { .. }
            | IntakeEvent::FileStateChanged { .. }
            | IntakeEvent::FileFailed { .. }
            | IntakeEvent::FileRouted { .. }
            | IntakeEvent::DuplicateConflictSurfaced { .. }
            | IntakeEvent::DuplicateConflictResolved { .. }
            | IntakeEvent::FileRetried { .. }
            | IntakeEvent::IntakeCleared { .. }
    )
}

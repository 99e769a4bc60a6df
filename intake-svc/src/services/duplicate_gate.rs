//! Duplicate resolution queue
//!
//! Conflicts wait in arrival order; only the head is shown to the user.
//! The gate only tracks conflicts. Applying a decision to the file (resume
//! or remove) is the orchestrator's job.

use crate::models::DuplicateConflict;
use std::collections::VecDeque;
use uuid::Uuid;

/// Result of taking a conflict out of the queue
#[derive(Debug, Clone)]
pub struct GateRemoval {
    pub conflict: DuplicateConflict,
    /// New head, when the removed conflict was the one on display
    pub surfaced: Option<DuplicateConflict>,
}

/// FIFO of unresolved duplicate conflicts
#[derive(Debug, Default)]
pub struct DuplicateResolutionGate {
    queue: VecDeque<DuplicateConflict>,
}

impl DuplicateResolutionGate {
    /// Queue a conflict; returns true when it is surfaced immediately
    ///
    /// A second conflict for the same file replaces the first in place.
    pub fn enqueue(&mut self, conflict: DuplicateConflict) -> bool {
        if let Some(existing) = self
            .queue
            .iter_mut()
            .find(|c| c.file_id == conflict.file_id)
        {
            *existing = conflict;
            return false;
        }
        self.queue.push_back(conflict);
        self.queue.len() == 1
    }

    /// Conflict currently awaiting a decision
    pub fn current(&self) -> Option<&DuplicateConflict> {
        self.queue.front()
    }

    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    /// Conflicts waiting behind the head
    pub fn queued_behind(&self) -> usize {
        self.queue.len().saturating_sub(1)
    }

    /// Remove the conflict for `file_id` (resolved or withdrawn)
    pub fn remove(&mut self, file_id: Uuid) -> Option<GateRemoval> {
        let index = self.queue.iter().position(|c| c.file_id == file_id)?;
        let conflict = self.queue.remove(index)?;
        let surfaced = if index == 0 {
            self.queue.front().cloned()
        } else {
            None
        };
        Some(GateRemoval { conflict, surfaced })
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

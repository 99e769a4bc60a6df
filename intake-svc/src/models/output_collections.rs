//! Routing targets for parsed files

use intake_common::events::CollectionKind;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Three disjoint id lists, each in insertion order
///
/// A file id appears in at most one list; `route` moves it rather than
/// adding a second entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputCollections {
    pub invoices: Vec<Uuid>,
    pub delivery_notes: Vec<Uuid>,
    pub unclassified: Vec<Uuid>,
}

impl OutputCollections {
    pub fn new() -> Self {
        Self::default()
    }

    fn list_mut(&mut self, kind: CollectionKind) -> &mut Vec<Uuid> {
        match kind {
            CollectionKind::Invoices => &mut self.invoices,
            CollectionKind::DeliveryNotes => &mut self.delivery_notes,
            CollectionKind::Unclassified => &mut self.unclassified,
        }
    }

    pub fn list(&self, kind: CollectionKind) -> &[Uuid] {
        match kind {
            CollectionKind::Invoices => &self.invoices,
            CollectionKind::DeliveryNotes => &self.delivery_notes,
            CollectionKind::Unclassified => &self.unclassified,
        }
    }

    /// Collection currently holding `file_id`
    pub fn kind_of(&self, file_id: Uuid) -> Option<CollectionKind> {
        [
            CollectionKind::Invoices,
            CollectionKind::DeliveryNotes,
            CollectionKind::Unclassified,
        ]
        .into_iter()
        .find(|kind| self.list(*kind).contains(&file_id))
    }

    /// Place `file_id` into `kind`, removing it from any other list
    ///
    /// Returns the previous collection if the file moved.
    pub fn route(&mut self, file_id: Uuid, kind: CollectionKind) -> Option<CollectionKind> {
        let previous = self.kind_of(file_id);
        if previous == Some(kind) {
            return None;
        }
        self.remove(file_id);
        self.list_mut(kind).push(file_id);
        previous
    }

    /// Drop `file_id` from whichever list holds it
    pub fn remove(&mut self, file_id: Uuid) -> bool {
        let mut removed = false;
        for list in [
            &mut self.invoices,
            &mut self.delivery_notes,
            &mut self.unclassified,
        ] {
            let before = list.len();
            list.retain(|id| *id != file_id);
            removed |= list.len() != before;
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.invoices.len() + self.delivery_notes.len() + self.unclassified.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.invoices.clear();
        self.delivery_notes.clear();
        self.unclassified.clear();
    }
}

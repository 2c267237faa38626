use std::collections::BTreeSet;

use api_types::transaction::TransactionId;

/// Rows picked for a bulk action.
///
/// The selection never reaches beyond the rows the user has seen:
/// [`Selection::toggle_all`] only ever acts on the visible page, and the
/// controller clears the selection whenever the displayed page changes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selection {
    ids: BTreeSet<TransactionId>,
}

impl Selection {
    /// Returns whether `id` is selected afterwards.
    pub fn toggle(&mut self, id: TransactionId) -> bool {
        if self.ids.remove(&id) {
            false
        } else {
            self.ids.insert(id);
            true
        }
    }

    /// Header checkbox: with any visible row selected the selection is
    /// cleared, otherwise every visible row is selected.
    pub fn toggle_all(&mut self, visible: &[TransactionId]) {
        if visible.iter().any(|id| self.ids.contains(id)) {
            self.ids.clear();
        } else {
            self.ids.extend(visible.iter().copied());
        }
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    pub fn is_selected(&self, id: TransactionId) -> bool {
        self.ids.contains(&id)
    }

    pub fn count(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Selected ids in ascending order.
    pub fn ids(&self) -> Vec<TransactionId> {
        self.ids.iter().copied().collect()
    }

    pub fn remove(&mut self, id: TransactionId) -> bool {
        self.ids.remove(&id)
    }

    pub fn remove_all(&mut self, ids: &[TransactionId]) {
        for id in ids {
            self.ids.remove(id);
        }
    }

    /// Drops members that are no longer part of the fetched rows.
    pub fn retain_visible(&mut self, visible: &[TransactionId]) -> usize {
        let before = self.ids.len();
        self.ids.retain(|id| visible.contains(id));
        before - self.ids.len()
    }
}

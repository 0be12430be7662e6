//! Pending-change ledger: tracks writes awaiting sync, with replay rules
//! for cancellation.

use std::collections::HashMap;
use std::hash::Hash;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::StoreError;
use crate::util::Behavior;

/// The write operation a [`PendingChange`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingOperation {
    /// The item did not exist locally before this change.
    Create,
    /// The item existed and was modified.
    Update,
    /// The item was removed.
    Delete,
}

/// A write awaiting sync to the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingChange<Id, E> {
    /// A ledger-assigned identifier for this change record.
    pub change_id: Uuid,
    /// The entity id this change concerns.
    pub id: Id,
    /// The value to push to the backend when this change is synced or
    /// replayed — the new value for `Create`/`Update`, the last-known
    /// value for `Delete`.
    pub item: E,
    /// Which kind of write this is.
    pub operation: PendingOperation,
    /// The prior value, required for `Update`/`Delete` to support replay
    /// on cancellation.
    pub original: Option<E>,
    /// Number of sync retries attempted.
    pub retry_count: u32,
    /// When the most recent retry was attempted.
    pub last_attempt: Option<DateTime<Utc>>,
    /// When this change was recorded.
    pub created_at: DateTime<Utc>,
}

/// What a caller must do locally after [`PendingChangeLedger::cancel`]
/// replays a change.
#[derive(Debug, Clone, PartialEq)]
pub enum CancelAction<Id, E> {
    /// Remove the item (undoing a `Create`).
    Delete(Id),
    /// Restore the item to its prior value (undoing an `Update`/`Delete`).
    Save(E),
}

/// Tracks pending writes for an entity type, publishing a snapshot list
/// on every mutation.
pub struct PendingChangeLedger<Id: Eq + Hash + Clone, E: Clone> {
    entries: Mutex<HashMap<Id, PendingChange<Id, E>>>,
    snapshots: Behavior<Vec<PendingChange<Id, E>>>,
}

impl<Id, E> PendingChangeLedger<Id, E>
where
    Id: Eq + Hash + Clone + Send + Sync + 'static,
    E: Clone + PartialEq + Send + Sync + 'static,
{
    /// Construct an empty ledger.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            snapshots: Behavior::new(Vec::new()),
        }
    }

    /// Subscribe to snapshot publications.
    pub fn snapshot_stream(&self) -> watch::Receiver<Vec<PendingChange<Id, E>>> {
        self.snapshots.subscribe()
    }

    /// Record a new pending change.
    pub fn add(&self, id: Id, item: E, operation: PendingOperation, original: Option<E>, now: DateTime<Utc>) -> PendingChange<Id, E> {
        let change = PendingChange {
            change_id: Uuid::new_v4(),
            id: id.clone(),
            item,
            operation,
            original,
            retry_count: 0,
            last_attempt: None,
            created_at: now,
        };
        self.entries.lock().insert(id, change.clone());
        self.publish();
        change
    }

    /// Read a change by entity id.
    pub fn get(&self, id: &Id) -> Option<PendingChange<Id, E>> {
        self.entries.lock().get(id).cloned()
    }

    /// All currently pending changes.
    pub fn all(&self) -> Vec<PendingChange<Id, E>> {
        self.entries.lock().values().cloned().collect()
    }

    /// Remove a change outright (e.g. after a successful sync), without
    /// replaying it locally.
    pub fn remove(&self, id: &Id) -> Option<PendingChange<Id, E>> {
        let removed = self.entries.lock().remove(id);
        if removed.is_some() {
            self.publish();
        }
        removed
    }

    /// Bump retry bookkeeping for `id`. Returns the updated change if
    /// found; callers should follow this with a sync request.
    pub fn retry(&self, id: &Id, now: DateTime<Utc>) -> Option<PendingChange<Id, E>> {
        let updated = {
            let mut entries = self.entries.lock();
            let change = entries.get_mut(id)?;
            change.retry_count += 1;
            change.last_attempt = Some(now);
            change.clone()
        };
        self.publish();
        Some(updated)
    }

    /// Cancel a pending change, removing it from the ledger and
    /// returning the local replay action: `Create` undoes by deleting;
    /// `Update`/`Delete` undo by restoring `original`, which must be
    /// present.
    pub fn cancel(&self, id: &Id) -> Result<Option<CancelAction<Id, E>>, StoreError> {
        let removed = self.entries.lock().remove(id);
        let Some(change) = removed else {
            return Ok(None);
        };
        self.publish();
        let action = match change.operation {
            PendingOperation::Create => CancelAction::Delete(change.id),
            PendingOperation::Update | PendingOperation::Delete => match change.original {
                Some(original) => CancelAction::Save(original),
                None => {
                    return Err(StoreError::state(
                        "pending_change_missing_original",
                        "pending_change_has_original",
                    ))
                }
            },
        };
        Ok(Some(action))
    }

    fn publish(&self) {
        self.snapshots.set(self.all());
    }
}

impl<Id, E> Default for PendingChangeLedger<Id, E>
where
    Id: Eq + Hash + Clone + Send + Sync + 'static,
    E: Clone + PartialEq + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_get_round_trips() {
        let ledger: PendingChangeLedger<u32, String> = PendingChangeLedger::new();
        let now = Utc::now();
        ledger.add(1, "new".to_string(), PendingOperation::Create, None, now);
        let change = ledger.get(&1).unwrap();
        assert_eq!(change.operation, PendingOperation::Create);
        assert_eq!(change.item, "new".to_string());
        assert_eq!(change.retry_count, 0);
    }

    #[test]
    fn retry_bumps_count_and_last_attempt() {
        let ledger: PendingChangeLedger<u32, String> = PendingChangeLedger::new();
        let t0 = Utc::now();
        ledger.add(1, "new".to_string(), PendingOperation::Update, Some("old".to_string()), t0);
        let t1 = t0 + chrono::Duration::seconds(5);
        let retried = ledger.retry(&1, t1).unwrap();
        assert_eq!(retried.retry_count, 1);
        assert_eq!(retried.last_attempt, Some(t1));
    }

    #[test]
    fn cancel_create_replays_as_delete() {
        let ledger: PendingChangeLedger<u32, String> = PendingChangeLedger::new();
        let now = Utc::now();
        ledger.add(1, "new".to_string(), PendingOperation::Create, None, now);
        let action = ledger.cancel(&1).unwrap().unwrap();
        assert_eq!(action, CancelAction::Delete(1));
        assert!(ledger.get(&1).is_none());
    }

    #[test]
    fn cancel_update_replays_as_save_of_original() {
        let ledger: PendingChangeLedger<u32, String> = PendingChangeLedger::new();
        let now = Utc::now();
        ledger.add(1, "new".to_string(), PendingOperation::Update, Some("old".to_string()), now);
        let action = ledger.cancel(&1).unwrap().unwrap();
        assert_eq!(action, CancelAction::Save("old".to_string()));
    }

    #[test]
    fn cancel_update_without_original_is_an_error() {
        let ledger: PendingChangeLedger<u32, String> = PendingChangeLedger::new();
        let now = Utc::now();
        ledger.add(1, "new".to_string(), PendingOperation::Update, None, now);
        assert!(ledger.cancel(&1).is_err());
    }

    #[test]
    fn cancel_unknown_id_is_none() {
        let ledger: PendingChangeLedger<u32, String> = PendingChangeLedger::new();
        assert_eq!(ledger.cancel(&999).unwrap(), None);
    }

    #[tokio::test]
    async fn mutation_publishes_a_fresh_snapshot() {
        let ledger: PendingChangeLedger<u32, String> = PendingChangeLedger::new();
        let mut rx = ledger.snapshot_stream();
        ledger.add(1, "new".to_string(), PendingOperation::Create, None, Utc::now());
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().len(), 1);
    }
}

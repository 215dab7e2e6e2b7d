//! Session-scoped dismissals for the running-jobs banner.
//!
//! Dismissing a run hides it from the banner without touching its record.
//! A dismissal only lasts while the run is running: [`DismissalSet::reconcile`]
//! drops ids whose run has moved on, so a reused id shows up again.

use crate::error::Result;
use crate::run::{RunRecord, RunStatus};
use crate::storage::Slot;
use crate::store::StoreSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DismissalState {
    #[serde(default)]
    dismissed_run_ids: BTreeSet<String>,
}

pub struct DismissalSet {
    slot: Arc<dyn Slot>,
    ids: BTreeSet<String>,
}

impl DismissalSet {
    /// Restore the set from `slot`. An unreadable value starts an empty set.
    pub fn load(slot: Arc<dyn Slot>) -> Result<Self> {
        let ids = read_ids(slot.as_ref())?;
        Ok(Self { slot, ids })
    }

    /// Pick up dismissals written by another process sharing the slot.
    pub fn reload(&mut self) -> Result<()> {
        self.ids = read_ids(self.slot.as_ref())?;
        Ok(())
    }

    pub fn dismiss<I, S>(&mut self, ids: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reload()?;
        for id in ids {
            let id = id.into();
            debug!(%id, "Dismissing run");
            self.ids.insert(id);
        }
        self.save()
    }

    pub fn is_dismissed(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Runs the banner should show: running and not dismissed.
    pub fn visible_runs(&self, snapshot: &StoreSnapshot) -> Vec<RunRecord> {
        snapshot
            .active_runs()
            .into_iter()
            .filter(|run| run.status == RunStatus::Running && !self.is_dismissed(&run.id))
            .collect()
    }

    /// Drop dismissals whose run is no longer running (or no longer exists).
    /// Returns the ids that were cleared.
    pub fn reconcile(&mut self, snapshot: &StoreSnapshot) -> Result<Vec<String>> {
        self.reload()?;
        let expired: Vec<String> = self
            .ids
            .iter()
            .filter(|id| {
                snapshot
                    .get(id)
                    .is_none_or(|run| run.status != RunStatus::Running)
            })
            .cloned()
            .collect();
        if expired.is_empty() {
            return Ok(expired);
        }
        for id in &expired {
            self.ids.remove(id);
        }
        debug!(count = expired.len(), "Auto-cleared dismissals");
        self.save()?;
        Ok(expired)
    }

    /// Forget every dismissal, e.g. when the session ends.
    pub fn clear(&mut self) -> Result<()> {
        self.ids.clear();
        self.slot.remove()
    }

    fn save(&self) -> Result<()> {
        let state = DismissalState {
            dismissed_run_ids: self.ids.clone(),
        };
        self.slot.write(&serde_json::to_string(&state)?)
    }
}

fn read_ids(slot: &dyn Slot) -> Result<BTreeSet<String>> {
    let Some(raw) = slot.read()? else {
        return Ok(BTreeSet::new());
    };
    match serde_json::from_str::<DismissalState>(&raw) {
        Ok(state) => Ok(state.dismissed_run_ids),
        Err(err) => {
            warn!(error = %err, "Ignoring unreadable dismissal state");
            Ok(BTreeSet::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::{NewRun, Tool};
    use crate::storage::MemorySlot;
    use crate::store::RunStore;
    use crate::test_utils::FakeServer;

    fn store() -> RunStore {
        RunStore::new(Arc::new(MemorySlot::new()), Arc::new(FakeServer::new()))
    }

    fn visible_ids(set: &DismissalSet, store: &RunStore) -> Vec<String> {
        set.visible_runs(&store.snapshot())
            .into_iter()
            .map(|r| r.id)
            .collect()
    }

    #[test]
    fn test_dismissed_runs_are_hidden() {
        let store = store();
        store.register_run(NewRun::started("r1", Tool::Trainer)).unwrap();
        store.register_run(NewRun::started("r2", Tool::Backtester)).unwrap();
        let mut set = DismissalSet::load(Arc::new(MemorySlot::new())).unwrap();

        set.dismiss(["r1"]).unwrap();

        assert!(set.is_dismissed("r1"));
        assert_eq!(visible_ids(&set, &store), vec!["r2".to_string()]);
        // the record itself is untouched
        assert_eq!(store.get("r1").unwrap().status, RunStatus::Running);
    }

    #[test]
    fn test_queued_runs_are_not_shown() {
        let store = store();
        store
            .register_run(NewRun::started("q1", Tool::Trainer).with_status(RunStatus::Queued))
            .unwrap();
        let set = DismissalSet::load(Arc::new(MemorySlot::new())).unwrap();
        assert!(visible_ids(&set, &store).is_empty());
    }

    #[test]
    fn test_auto_clear_then_reused_id_shows_again() {
        let store = store();
        store.register_run(NewRun::started("r1", Tool::Trainer)).unwrap();
        let mut set = DismissalSet::load(Arc::new(MemorySlot::new())).unwrap();
        set.dismiss(["r1"]).unwrap();

        store
            .register_run(NewRun::started("r1", Tool::Trainer).with_status(RunStatus::Succeeded))
            .unwrap();
        let cleared = set.reconcile(&store.snapshot()).unwrap();
        assert_eq!(cleared, vec!["r1".to_string()]);
        assert!(!set.is_dismissed("r1"));

        store.register_run(NewRun::started("r1", Tool::Trainer)).unwrap();
        assert_eq!(visible_ids(&set, &store), vec!["r1".to_string()]);
    }

    #[test]
    fn test_reconcile_keeps_running_and_drops_missing() {
        let store = store();
        store.register_run(NewRun::started("r1", Tool::Trainer)).unwrap();
        let mut set = DismissalSet::load(Arc::new(MemorySlot::new())).unwrap();
        set.dismiss(["r1", "gone"]).unwrap();

        let cleared = set.reconcile(&store.snapshot()).unwrap();

        assert_eq!(cleared, vec!["gone".to_string()]);
        assert!(set.is_dismissed("r1"));
    }

    #[test]
    fn test_dismissals_persist_in_session_slot() {
        let slot = Arc::new(MemorySlot::new());
        let mut set = DismissalSet::load(slot.clone()).unwrap();
        set.dismiss(["b", "a"]).unwrap();

        assert_eq!(
            slot.read().unwrap().as_deref(),
            Some(r#"{"dismissedRunIds":["a","b"]}"#)
        );
        let restored = DismissalSet::load(slot).unwrap();
        assert_eq!(restored.ids().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_dismiss_merges_with_other_writers() {
        let slot = Arc::new(MemorySlot::new());
        let mut first = DismissalSet::load(slot.clone()).unwrap();
        let mut second = DismissalSet::load(slot.clone()).unwrap();
        first.dismiss(["a"]).unwrap();
        second.dismiss(["b"]).unwrap();

        assert_eq!(DismissalSet::load(slot).unwrap().len(), 2);
    }

    #[test]
    fn test_clear_removes_session_state() {
        let slot = Arc::new(MemorySlot::new());
        let mut set = DismissalSet::load(slot.clone()).unwrap();
        set.dismiss(["a"]).unwrap();
        set.clear().unwrap();
        assert!(set.is_empty());
        assert_eq!(slot.read().unwrap(), None);
    }

    #[test]
    fn test_corrupt_state_starts_empty() {
        let slot = Arc::new(MemorySlot::new());
        slot.write("not json").unwrap();
        assert!(DismissalSet::load(slot).unwrap().is_empty());
    }
}

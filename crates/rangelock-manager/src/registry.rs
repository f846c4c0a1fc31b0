use crate::manager::Inner;
use rangelock_core::DictionaryId;
use rangelock_locktree::{Locktree, LocktreeCounters};
use std::collections::BTreeMap;
use std::ops::Deref;
use std::sync::{Arc, Weak};

/// Open locktrees keyed by dictionary, plus the wait counters of those
/// already destroyed. Guarded by the manager lock.
#[derive(Default)]
pub(crate) struct Registry {
    locktrees: BTreeMap<DictionaryId, Arc<Locktree>>,
    retired: LocktreeCounters,
}

impl Registry {
    pub(crate) fn find(&self, dict_id: DictionaryId) -> Option<&Arc<Locktree>> {
        self.locktrees.get(&dict_id)
    }

    pub(crate) fn insert(&mut self, locktree: Arc<Locktree>) {
        let previous = self.locktrees.insert(locktree.dict_id(), locktree);
        debug_assert!(previous.is_none(), "dictionary already had a locktree");
    }

    /// Removes the locktree for `dict_id` if nobody references it anymore.
    ///
    /// Several releasers may race here after seeing the count reach zero;
    /// whoever arrives first removes the entry, the others find either
    /// nothing or a live locktree (reopened in between) and leave it alone.
    /// The removed locktree's wait counters are folded into the retired
    /// totals.
    pub(crate) fn remove_if_unreferenced(&mut self, dict_id: DictionaryId) -> Option<Arc<Locktree>> {
        let unreferenced = self
            .locktrees
            .get(&dict_id)
            .is_some_and(|locktree| locktree.reference_count() == 0);
        if !unreferenced {
            return None;
        }
        let locktree = self.locktrees.remove(&dict_id)?;
        self.retired.merge(&locktree.request_info().counters());
        Some(locktree)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Arc<Locktree>> {
        self.locktrees.values()
    }

    pub(crate) fn len(&self) -> usize {
        self.locktrees.len()
    }

    pub(crate) fn retired(&self) -> &LocktreeCounters {
        &self.retired
    }
}

/// Shared access to an open locktree.
///
/// Each handle is one reference. Dropping the last handle removes the
/// locktree from its manager and destroys it. Cloning adds a reference.
pub struct LocktreeHandle {
    locktree: Arc<Locktree>,
    manager: Weak<Inner>,
}

impl LocktreeHandle {
    /// Wraps a reference the caller has already counted.
    pub(crate) fn adopt(locktree: Arc<Locktree>, manager: Weak<Inner>) -> Self {
        Self { locktree, manager }
    }

    pub fn locktree(&self) -> &Locktree {
        &self.locktree
    }

    /// Whether both handles refer to the same locktree instance.
    pub fn ptr_eq(&self, other: &LocktreeHandle) -> bool {
        Arc::ptr_eq(&self.locktree, &other.locktree)
    }
}

impl Deref for LocktreeHandle {
    type Target = Locktree;

    fn deref(&self) -> &Locktree {
        &self.locktree
    }
}

impl Clone for LocktreeHandle {
    fn clone(&self) -> Self {
        self.locktree.add_reference();
        Self {
            locktree: self.locktree.clone(),
            manager: self.manager.clone(),
        }
    }
}

impl Drop for LocktreeHandle {
    fn drop(&mut self) {
        if self.locktree.remove_reference() > 0 {
            return;
        }
        match self.manager.upgrade() {
            Some(manager) => manager.retire_if_unreferenced(self.locktree.dict_id()),
            None => {
                // Manager is gone; nobody else can reach this locktree.
                tracing::debug!(
                    target: "rangelock.manager",
                    dict_id = self.locktree.dict_id().get(),
                    "destroying locktree that outlived its manager"
                );
                self.locktree.destroy();
            }
        }
    }
}

impl std::fmt::Debug for LocktreeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocktreeHandle")
            .field("locktree", &self.locktree)
            .finish()
    }
}

use rangelock_core::{CreateVeto, KeyRange};
use rangelock_locktree::{EscalateCallback, EscalationScope, Locktree};
use std::any::Any;
use std::sync::Arc;

/// Extra argument threaded from `LockManager::get` to the on-create hook.
pub type CreateExtra<'a> = Option<&'a (dyn Any + Send + Sync)>;

/// Runs for every newly built locktree before it becomes visible; may veto.
pub type CreateCallback =
    Arc<dyn Fn(&Locktree, CreateExtra<'_>) -> Result<(), CreateVeto> + Send + Sync>;

/// Runs once per locktree right before it is destroyed.
pub type DestroyCallback = Arc<dyn Fn(&Locktree) + Send + Sync>;

/// Optional extension points of a lock manager.
///
/// `on_create` and `on_escalate` run with the manager lock held and must not
/// call back into the manager. `on_destroy` runs with no lock held.
#[derive(Clone, Default)]
pub struct LocktreeHooks {
    pub on_create: Option<CreateCallback>,
    pub on_destroy: Option<DestroyCallback>,
    pub on_escalate: Option<EscalateCallback>,
}

impl LocktreeHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_create<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Locktree, CreateExtra<'_>) -> Result<(), CreateVeto> + Send + Sync + 'static,
    {
        self.on_create = Some(Arc::new(hook));
        self
    }

    pub fn on_destroy<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Locktree) + Send + Sync + 'static,
    {
        self.on_destroy = Some(Arc::new(hook));
        self
    }

    pub fn on_escalate<F>(mut self, policy: F) -> Self
    where
        F: Fn(&EscalationScope<'_>, &[KeyRange]) -> Vec<KeyRange> + Send + Sync + 'static,
    {
        self.on_escalate = Some(Arc::new(policy));
        self
    }
}

impl std::fmt::Debug for LocktreeHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocktreeHooks")
            .field("on_create", &self.on_create.is_some())
            .field("on_destroy", &self.on_destroy.is_some())
            .field("on_escalate", &self.on_escalate.is_some())
            .finish()
    }
}

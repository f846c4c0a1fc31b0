use crate::DictionaryId;

pub type Result<T> = std::result::Result<T, LockError>;

/// Errors returned by the lock manager and the locktrees it owns.
///
/// None of these are retried internally; `OutOfLockMemory` is meant to be
/// handled by aborting or retrying the transaction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    #[error("max lock memory {requested} is below current lock memory usage {current}")]
    ConstraintViolation { requested: u64, current: u64 },

    #[error("out of lock memory: {current} bytes in use with a limit of {limit} after escalation")]
    OutOfLockMemory { current: u64, limit: u64 },

    #[error("locktree creation for {dict_id} was vetoed: {reason}")]
    CreateVetoed { dict_id: DictionaryId, reason: String },
}

/// Rejection returned by an on-create hook.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct CreateVeto {
    pub reason: String,
}

impl CreateVeto {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

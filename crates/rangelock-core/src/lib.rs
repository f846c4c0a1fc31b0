//! Core shared types for rangelock.
//!
//! This crate is intentionally small: identifiers, key ranges, the comparator
//! signature and the error taxonomy shared by the locktree and the manager.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

mod error;

pub use error::{CreateVeto, LockError, Result};

/// Stable identifier of a table/index.
///
/// Never reused for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DictionaryId(pub u64);

impl DictionaryId {
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DictionaryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dict#{}", self.0)
    }
}

/// Transaction identifier as assigned by the transaction layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxnId(pub u64);

impl TxnId {
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn#{}", self.0)
    }
}

/// Opaque per-dictionary descriptor handed to the comparator's owner.
///
/// Cloning is cheap; the bytes are shared.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Descriptor(Arc<[u8]>);

impl Descriptor {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("len", &self.0.len())
            .finish()
    }
}

/// Total order over keys of one dictionary.
pub type KeyComparator = Arc<dyn Fn(&[u8], &[u8]) -> Ordering + Send + Sync>;

/// Plain lexicographic byte order.
pub fn bytewise_comparator() -> KeyComparator {
    Arc::new(|a: &[u8], b: &[u8]| a.cmp(b))
}

/// A closed key interval `[left, right]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyRange {
    left: Vec<u8>,
    right: Vec<u8>,
}

impl KeyRange {
    pub fn new(left: impl Into<Vec<u8>>, right: impl Into<Vec<u8>>) -> Self {
        Self {
            left: left.into(),
            right: right.into(),
        }
    }

    /// A range covering exactly one key.
    pub fn point(key: impl Into<Vec<u8>>) -> Self {
        let key = key.into();
        Self {
            left: key.clone(),
            right: key,
        }
    }

    pub fn left(&self) -> &[u8] {
        &self.left
    }

    pub fn right(&self) -> &[u8] {
        &self.right
    }

    /// Whether `left > right` under `cmp`.
    pub fn is_inverted(&self, cmp: &KeyComparator) -> bool {
        cmp(&self.left, &self.right) == Ordering::Greater
    }

    pub fn overlaps(&self, other: &KeyRange, cmp: &KeyComparator) -> bool {
        cmp(&self.left, &other.right) != Ordering::Greater
            && cmp(&other.left, &self.right) != Ordering::Greater
    }

    /// Bytes charged against the lock memory budget for holding this range.
    pub fn memory_size(&self) -> u64 {
        (std::mem::size_of::<KeyRange>() + self.left.len() + self.right.len()) as u64
    }
}

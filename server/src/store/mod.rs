//! Persistence for pastes.
//!
//! Every backend must make [`PasteStore::fetch_and_apply_read`] linearizable
//! per id: of two racing reads for the last view, exactly one sees it.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use pastebin_lite_common::PasteView;
use thiserror::Error;

use crate::paste::Paste;

mod memory;
mod rocks;

pub use memory::MemoryStore;
pub use rocks::RocksStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("a paste with this id already exists")]
    DuplicateId,
    /// Covers pastes that never existed and pastes that are no longer alive.
    #[error("paste not found")]
    NotFound,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub trait PasteStore: Send + Sync {
    /// Stores a fully formed paste, failing if its id is taken.
    fn insert(&self, paste: Paste) -> Result<Paste, StoreError>;

    /// Evaluates visibility at `now` and, when `decrement` is set, spends a
    /// view in the same critical section as the read.
    fn fetch_and_apply_read(
        &self,
        id: &str,
        now: DateTime<Utc>,
        decrement: bool,
    ) -> Result<PasteView, StoreError>;

    /// Reads a paste without touching its view budget.
    fn fetch_only(&self, id: &str, now: DateTime<Utc>) -> Result<PasteView, StoreError> {
        self.fetch_and_apply_read(id, now, false)
    }

    /// Physically removes pastes that are dead at `now`. Returns how many
    /// were removed.
    fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Checks that the backing medium is reachable.
    fn ping(&self) -> Result<(), StoreError>;
}

const DEFAULT_STRIPES: usize = 256;

/// Fixed set of mutexes that ids hash onto. Holding the stripe for an id
/// excludes every other reader, writer and sweeper of that id.
pub struct LockStripes {
    stripes: Box<[Mutex<()>]>,
}

impl Default for LockStripes {
    fn default() -> Self {
        Self::new(DEFAULT_STRIPES)
    }
}

impl LockStripes {
    pub fn new(count: usize) -> Self {
        Self {
            stripes: (0..count.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    pub fn lock(&self, id: &str) -> Result<MutexGuard<'_, ()>, StoreError> {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        // Truncation is fine, this only picks a stripe
        #[allow(clippy::cast_possible_truncation)]
        let index = hasher.finish() as usize % self.stripes.len();

        self.stripes[index]
            .lock()
            .map_err(|_| StoreError::Unavailable("paste lock poisoned".to_string()))
    }
}

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use pastebin_lite_common::PasteView;
use tracing::debug;

use crate::lifecycle::{apply_read, is_alive, ReadOutcome};
use crate::paste::Paste;
use crate::store::{PasteStore, StoreError};

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Unavailable("memory store lock poisoned".to_string())
}

/// Pastes that a reader is busy with are left for the next sweep.
fn is_dead(paste: &Mutex<Paste>, now: DateTime<Utc>) -> bool {
    paste.try_lock().map_or(false, |paste| !is_alive(&paste, now))
}

/// Process-local store. The outer map lock is only held long enough to find
/// a paste; each paste then has its own mutex, so reads of different ids run
/// in parallel.
#[derive(Default)]
pub struct MemoryStore {
    pastes: RwLock<HashMap<String, Arc<Mutex<Paste>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, id: &str) -> Result<Option<Arc<Mutex<Paste>>>, StoreError> {
        Ok(self.pastes.read().map_err(poisoned)?.get(id).cloned())
    }
}

impl PasteStore for MemoryStore {
    fn insert(&self, paste: Paste) -> Result<Paste, StoreError> {
        match self.pastes.write().map_err(poisoned)?.entry(paste.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::DuplicateId),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(Mutex::new(paste.clone())));
                Ok(paste)
            }
        }
    }

    fn fetch_and_apply_read(
        &self,
        id: &str,
        now: DateTime<Utc>,
        decrement: bool,
    ) -> Result<PasteView, StoreError> {
        let entry = self.get(id)?.ok_or(StoreError::NotFound)?;
        let mut paste = entry.lock().map_err(poisoned)?;

        match apply_read(&paste, now, decrement) {
            ReadOutcome::Hidden => Err(StoreError::NotFound),
            ReadOutcome::Visible => Ok(paste.view()),
            ReadOutcome::Consumed(views) => {
                paste.views = views;
                Ok(paste.view())
            }
        }
    }

    fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let candidates: Vec<String> = self
            .pastes
            .read()
            .map_err(poisoned)?
            .iter()
            .filter(|(_, paste)| is_dead(paste, now))
            .map(|(id, _)| id.clone())
            .collect();

        let mut removed = 0;
        for id in candidates {
            // Each removal takes the map lock on its own so other ids keep moving
            let mut pastes = self.pastes.write().map_err(poisoned)?;
            if pastes.get(&id).map_or(false, |paste| is_dead(paste, now)) {
                pastes.remove(&id);
                removed += 1;
            }
        }

        debug!("Swept {} pastes from memory", removed);
        Ok(removed)
    }

    fn ping(&self) -> Result<(), StoreError> {
        self.pastes.read().map(|_| ()).map_err(poisoned)
    }
}

use std::fmt::Display;
use std::path::Path;

use chrono::{DateTime, Utc};
use pastebin_lite_common::PasteView;
use rocksdb::{IteratorMode, Options, DB};
use tracing::{debug, error, warn};

use crate::lifecycle::{apply_read, is_alive, ReadOutcome};
use crate::paste::Paste;
use crate::store::{LockStripes, PasteStore, StoreError};

fn unavailable(context: &str, e: impl Display) -> StoreError {
    error!("{}: {}", context, e);
    StoreError::Unavailable(format!("{}: {}", context, e))
}

/// RocksDB-backed store. RocksDB has no conditional update, so every
/// read-modify-write of an id happens under that id's lock stripe.
pub struct RocksStore {
    db: DB,
    locks: LockStripes,
}

impl RocksStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, rocksdb::Error> {
        let mut options = Options::default();
        options.create_if_missing(true);
        Ok(Self {
            db: DB::open(&options, path)?,
            locks: LockStripes::default(),
        })
    }

    fn load(&self, id: &str) -> Result<Option<Paste>, StoreError> {
        let data = match self.db.get_pinned(id.as_bytes()) {
            Ok(Some(data)) => data,
            Ok(None) => return Ok(None),
            Err(e) => return Err(unavailable("Failed to fetch paste", e)),
        };

        bincode::deserialize(&data)
            .map(Some)
            .map_err(|e| unavailable("Failed to deserialize paste", e))
    }

    fn save(&self, paste: &Paste) -> Result<(), StoreError> {
        let value =
            bincode::serialize(paste).map_err(|e| unavailable("Failed to serialize paste", e))?;
        self.db
            .put(paste.id.as_bytes(), value)
            .map_err(|e| unavailable("Failed to write paste", e))
    }
}

impl PasteStore for RocksStore {
    fn insert(&self, paste: Paste) -> Result<Paste, StoreError> {
        let _guard = self.locks.lock(&paste.id)?;
        if self.load(&paste.id)?.is_some() {
            return Err(StoreError::DuplicateId);
        }
        self.save(&paste)?;
        Ok(paste)
    }

    fn fetch_and_apply_read(
        &self,
        id: &str,
        now: DateTime<Utc>,
        decrement: bool,
    ) -> Result<PasteView, StoreError> {
        let _guard = self.locks.lock(id)?;
        let mut paste = self.load(id)?.ok_or(StoreError::NotFound)?;

        match apply_read(&paste, now, decrement) {
            ReadOutcome::Hidden => Err(StoreError::NotFound),
            ReadOutcome::Visible => Ok(paste.view()),
            ReadOutcome::Consumed(views) => {
                paste.views = views;
                self.save(&paste)?;
                Ok(paste.view())
            }
        }
    }

    fn fetch_only(&self, id: &str, now: DateTime<Utc>) -> Result<PasteView, StoreError> {
        // A single get is atomic on its own, no stripe needed
        self.load(id)?
            .filter(|paste| is_alive(paste, now))
            .map(|paste| paste.view())
            .ok_or(StoreError::NotFound)
    }

    fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut candidates = Vec::new();
        for (key, value) in self.db.snapshot().iterator(IteratorMode::Start) {
            match bincode::deserialize::<Paste>(&value) {
                Ok(paste) if !is_alive(&paste, now) => candidates.push(paste.id),
                Ok(_) => (),
                Err(e) => warn!("Skipping undecodable entry {:?}: {}", key, e),
            }
        }

        let mut removed = 0;
        for id in candidates {
            let _guard = self.locks.lock(&id)?;
            // Re-check under the stripe; nothing revives a paste, but the
            // entry may have been swept by a concurrent pass already.
            if let Some(paste) = self.load(&id)? {
                if !is_alive(&paste, now) {
                    self.db
                        .delete(id.as_bytes())
                        .map_err(|e| unavailable("Failed to delete expired paste", e))?;
                    removed += 1;
                }
            }
        }

        debug!("Swept {} pastes from rocksdb", removed);
        Ok(removed)
    }

    fn ping(&self) -> Result<(), StoreError> {
        let keys = self
            .db
            .property_value("rocksdb.estimate-num-keys")
            .map_err(|e| unavailable("Failed to query rocksdb", e))?;
        debug!("RocksDB reachable, ~{} keys", keys.as_deref().unwrap_or("?"));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::conformance;

    fn open_temp() -> (tempfile::TempDir, RocksStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn conforms() {
        let (_dir, store) = open_temp();
        conformance::run_all(&store);
    }

    #[test]
    fn sweep() {
        let (_dir, store) = open_temp();
        conformance::sweep_removes_only_dead(&store);
    }

    #[test]
    fn sweep_alongside_reads() {
        let (_dir, store) = open_temp();
        conformance::sweep_races_reads(&store);

        let (_dir, store) = open_temp();
        conformance::sweep_hides_expired_from_readers(&store);
    }

    #[test]
    fn spent_views_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let created_at = {
            let store = RocksStore::open(dir.path()).unwrap();
            let paste = store
                .insert(conformance::paste("durable", None, Some(3)))
                .unwrap();
            store
                .fetch_and_apply_read("durable", paste.created_at, true)
                .unwrap();
            paste.created_at
        };

        let store = RocksStore::open(dir.path()).unwrap();
        let view = store.fetch_only("durable", created_at).unwrap();
        assert_eq!(view.remaining_views, Some(2));
    }
}

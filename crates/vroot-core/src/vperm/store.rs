//! Daemon-side table of inode identity overrides

use super::record::{InodeSimu, VpermFields};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

/// All overrides of one session, keyed by (device, inode).
///
/// Every operation takes the single table lock for its whole duration, so
/// concurrent updates to one inode apply one after the other.
#[derive(Debug, Default)]
pub struct VpermStore {
    records: Mutex<HashMap<(u64, u64), InodeSimu>>,
}

impl VpermStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge the active fields of `update` into the stored record
    pub fn set(&self, update: &InodeSimu) -> InodeSimu {
        let mut records = self.records.lock();
        let entry = records
            .entry(update.key())
            .or_insert_with(|| InodeSimu::new(update.dev, update.ino));
        entry.merge(update);
        debug!(
            "vperm set {}:{} fields={:?}",
            update.dev, update.ino, entry.active
        );
        *entry
    }

    /// Clear the fields active in `update`; the record goes away when none remain
    pub fn release(&self, update: &InodeSimu) -> Option<InodeSimu> {
        let mut records = self.records.lock();
        let record = records.get_mut(&update.key())?;
        record.release(update.active);
        let remaining = *record;
        if remaining.is_empty() {
            records.remove(&update.key());
            debug!("vperm released {}:{}", update.dev, update.ino);
            return None;
        }
        Some(remaining)
    }

    /// Drop every override of `(dev, ino)`
    pub fn clear(&self, dev: u64, ino: u64) -> bool {
        self.records.lock().remove(&(dev, ino)).is_some()
    }

    /// The current record; an empty one if no override exists
    pub fn get(&self, dev: u64, ino: u64) -> InodeSimu {
        self.records
            .lock()
            .get(&(dev, ino))
            .copied()
            .unwrap_or_else(|| InodeSimu::new(dev, ino))
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Number of records overriding any of `fields`
    pub fn count_with(&self, fields: VpermFields) -> usize {
        self.records
            .lock()
            .values()
            .filter(|r| r.active.intersects(fields))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_set_merges_and_get() {
        let store = VpermStore::new();
        assert!(store.get(1, 1).is_empty());

        store.set(&InodeSimu::new(1, 1).with_ids(Some(0), None));
        let merged = store.set(&InodeSimu::new(1, 1).with_ids(None, Some(5)));
        assert_eq!(merged.active, VpermFields::UID | VpermFields::GID);
        assert_eq!((merged.uid, merged.gid), (0, 5));
        assert_eq!(store.get(1, 1), merged);
        assert_eq!(store.count_with(VpermFields::GID), 1);
    }

    #[test]
    fn test_release_drops_empty_records() {
        let store = VpermStore::new();
        store.set(&InodeSimu::new(3, 4).with_ids(Some(1), Some(1)));
        let left = store.release(&InodeSimu::new(3, 4).with_ids(Some(0), None));
        assert_eq!(left.map(|r| r.active), Some(VpermFields::GID));
        assert_eq!(store.release(&InodeSimu::new(3, 4).with_ids(None, Some(0))), None);
        assert!(store.is_empty());
        assert_eq!(store.release(&InodeSimu::new(9, 9).with_ids(Some(0), None)), None);
    }

    #[test]
    fn test_clear() {
        let store = VpermStore::new();
        store.set(&InodeSimu::new(1, 2).with_dev_node(1, 7));
        assert!(store.clear(1, 2));
        assert!(!store.clear(1, 2));
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_concurrent_sets_last_writer_wins() {
        let store = Arc::new(VpermStore::new());
        let handles: Vec<_> = [100u32, 200u32]
            .into_iter()
            .map(|uid| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        store.set(&InodeSimu::new(8, 8).with_ids(Some(uid), Some(uid)));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let record = store.get(8, 8);
        assert!(record.uid == 100 || record.uid == 200);
        assert_eq!(record.uid, record.gid);
    }
}

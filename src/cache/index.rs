//! In-process map from user id to the hash of the icon that user is served.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::domain::icons::IconHash;

use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::index";

/// Hash Index.
///
/// Guards are held only for the map access itself; callers never keep one
/// across disk, database, or `.await` points.
#[derive(Debug, Default)]
pub struct HashIndex {
    entries: RwLock<HashMap<i64, IconHash>>,
}

impl HashIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, user_id: i64) -> Option<IconHash> {
        rw_read(&self.entries, SOURCE, "lookup").get(&user_id).cloned()
    }

    /// Partition ids into known hashes and ids the index has no entry for,
    /// under a single read guard.
    pub fn lookup_many(&self, user_ids: &[i64]) -> (HashMap<i64, IconHash>, Vec<i64>) {
        let entries = rw_read(&self.entries, SOURCE, "lookup_many");
        let mut known = HashMap::with_capacity(user_ids.len());
        let mut unknown = Vec::new();
        for &user_id in user_ids {
            match entries.get(&user_id) {
                Some(hash) => {
                    known.insert(user_id, hash.clone());
                }
                None => unknown.push(user_id),
            }
        }
        (known, unknown)
    }

    pub fn set(&self, user_id: i64, hash: IconHash) {
        rw_write(&self.entries, SOURCE, "set").insert(user_id, hash);
    }

    /// Insert only when no entry exists yet. Returns the entry now held.
    pub fn set_if_absent(&self, user_id: i64, hash: IconHash) -> IconHash {
        rw_write(&self.entries, SOURCE, "set_if_absent")
            .entry(user_id)
            .or_insert(hash)
            .clone()
    }

    pub fn clear_all(&self) {
        rw_write(&self.entries, SOURCE, "clear_all").clear();
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

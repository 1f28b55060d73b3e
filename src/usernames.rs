use crate::config::USERNAME_CACHE_CAPACITY;
use std::collections::HashMap;

/// uid -> display name, scoped to one session.
///
/// Purely a performance cache: a miss falls back to the `usernames` table.
/// When full it is cleared wholesale instead of evicting single entries.
#[derive(Debug)]
pub struct UsernameCache {
    map: HashMap<i64, String>,
    capacity: usize,
}

impl Default for UsernameCache {
    fn default() -> Self {
        Self::with_capacity(USERNAME_CACHE_CAPACITY)
    }
}

impl UsernameCache {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            map: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn get(&self, uid: i64) -> Option<&str> {
        self.map.get(&uid).map(String::as_str)
    }

    /// True if `name` is already what we hold for `uid`.
    pub fn is_known(&self, uid: i64, name: &str) -> bool {
        self.get(uid) == Some(name)
    }

    pub fn insert(&mut self, uid: i64, name: &str) {
        if self.map.len() >= self.capacity && !self.map.contains_key(&uid) {
            tracing::debug!(entries = self.map.len(), "username cache full, clearing");
            self.map.clear();
        }
        self.map.insert(uid, name.to_string());
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use sitewatch_model::{ProjectId, ScanType, UrlId};

/// Key under which scans of one target are serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetKey {
    pub project_id: ProjectId,
    pub scan_type: ScanType,
    pub url_id: UrlId,
}

/// Per-target run queues.
///
/// At most one owner works on a key at a time. Work for a busy key is
/// parked behind it instead of blocking the caller; the owner picks it up
/// through [`release`](Self::release). An entry exists only while a key is
/// owned.
#[derive(Debug)]
pub struct TargetQueues<T> {
    table: Arc<Mutex<HashMap<TargetKey, VecDeque<T>>>>,
}

impl<T> Default for TargetQueues<T> {
    fn default() -> Self {
        Self {
            table: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<T> Clone for TargetQueues<T> {
    fn clone(&self) -> Self {
        Self {
            table: Arc::clone(&self.table),
        }
    }
}

impl<T> TargetQueues<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of `key` and hand `item` back, or park `item` behind
    /// the current owner and return `None`.
    pub fn claim(&self, key: TargetKey, item: T) -> Option<T> {
        let mut table = self.lock();
        match table.get_mut(&key) {
            Some(parked) => {
                parked.push_back(item);
                None
            }
            None => {
                table.insert(key, VecDeque::new());
                Some(item)
            }
        }
    }

    /// Called by the owner when its item is done. Returns the next parked
    /// item, keeping ownership, or gives the key up when nothing waits.
    pub fn release(&self, key: TargetKey) -> Option<T> {
        let mut table = self.lock();
        let next = table.get_mut(&key).and_then(VecDeque::pop_front);
        if next.is_none() {
            table.remove(&key);
        }
        next
    }

    /// Number of owned targets.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Items parked behind `key`.
    pub fn parked(&self, key: TargetKey) -> usize {
        self.lock().get(&key).map_or(0, VecDeque::len)
    }

    /// Items parked behind every key.
    pub fn parked_total(&self) -> usize {
        self.lock().values().map(VecDeque::len).sum()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<TargetKey, VecDeque<T>>> {
        self.table
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> TargetKey {
        let project_id = ProjectId::new();
        TargetKey {
            project_id,
            scan_type: ScanType::Seo,
            url_id: UrlId::derive(project_id, "https://example.com/"),
        }
    }

    #[test]
    fn busy_key_parks_work_in_order() {
        let queues = TargetQueues::new();
        let key = key();

        assert_eq!(queues.claim(key, 1), Some(1));
        assert_eq!(queues.claim(key, 2), None);
        assert_eq!(queues.claim(key, 3), None);
        assert_eq!(queues.parked(key), 2);
        assert_eq!(queues.parked_total(), 2);

        assert_eq!(queues.release(key), Some(2));
        assert_eq!(queues.release(key), Some(3));
        assert_eq!(queues.release(key), None);
        assert!(queues.is_empty());
    }

    #[test]
    fn different_keys_are_independent() {
        let queues = TargetQueues::new();
        assert_eq!(queues.claim(key(), "a"), Some("a"));
        assert_eq!(queues.claim(key(), "b"), Some("b"));
        assert_eq!(queues.len(), 2);
    }

    #[test]
    fn released_key_can_be_claimed_again() {
        let queues = TargetQueues::new();
        let key = key();
        assert_eq!(queues.claim(key, 1), Some(1));
        assert_eq!(queues.release(key), None);
        assert_eq!(queues.claim(key, 2), Some(2));
        assert_eq!(queues.len(), 1);
    }
}

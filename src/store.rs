//! Time-and-capacity-bounded LRU stores used for dedup and in-flight request
//! tracking. Both are built on [`indexmap::IndexMap`] so that "move this key
//! to the most-recently-used end" and "evict the least-recently-used key"
//! are cheap, mirroring an `OrderedDict` with `move_to_end`/`popitem(last=False)`.

use std::collections::HashSet;
use std::hash::Hash;

use indexmap::IndexMap;

use crate::clock::{ClockView, Tick};
use crate::message::DeviceId;

/// Recency- and TTL-gated membership test: "have I seen this key recently?"
/// Used to suppress re-processing of announces/data already handled.
pub struct RecentlySeenStore<K: Eq + Hash> {
    clock: ClockView,
    timeout: Tick,
    max_capacity: Option<usize>,
    entries: IndexMap<K, Tick>,
    max_used: usize,
}

impl<K: Eq + Hash + Clone> RecentlySeenStore<K> {
    pub fn new(clock: ClockView, timeout: Tick, max_capacity: Option<usize>) -> Self {
        Self {
            clock,
            timeout,
            max_capacity,
            entries: IndexMap::new(),
            max_used: 0,
        }
    }

    /// True if `key` was marked seen and its TTL has not yet expired.
    /// Touches the key's recency on a hit.
    pub fn recently_seen(&mut self, key: &K) -> bool {
        let seen = self
            .entries
            .get(key)
            .is_some_and(|&expires_at| expires_at >= self.clock.now());
        if seen {
            self.touch(key);
        }
        seen
    }

    /// Marks `key` as seen, resetting its TTL. Evicts the least-recently-used
    /// entry first if this would otherwise exceed capacity.
    pub fn mark_recently_seen(&mut self, key: K) {
        if self.entries.contains_key(&key) {
            let expires_at = self.clock.now() + self.timeout;
            self.entries.insert(key.clone(), expires_at);
            self.touch(&key);
            return;
        }

        self.remove_expired();
        if self.max_capacity == Some(self.entries.len()) {
            self.entries.shift_remove_index(0);
        }

        self.entries.insert(key, self.clock.now() + self.timeout);
        self.max_used = self.max_used.max(self.entries.len());
    }

    pub fn max_used(&self) -> usize {
        self.max_used
    }

    fn touch(&mut self, key: &K) {
        if let Some(idx) = self.entries.get_index_of(key) {
            let (k, v) = self.entries.shift_remove_index(idx).expect("index just looked up");
            self.entries.insert(k, v);
        }
    }

    fn remove_expired(&mut self) {
        let now = self.clock.now();
        self.entries.retain(|_, &mut expires_at| expires_at >= now);
    }
}

/// One entry in a [`RequestStore`]: the tick the request expires at, and
/// the set of devices currently waiting on that chunk.
struct RequestEntry {
    expires_at: Tick,
    devices: HashSet<DeviceId>,
}

/// Tracks, per chunk, which devices currently have an outstanding request
/// in flight for it - so a device never broadcasts the same request twice
/// while one is already pending, and so an arriving chunk can fan out to
/// every device that asked for it.
pub struct RequestStore<K: Eq + Hash> {
    clock: ClockView,
    timeout: Tick,
    max_capacity: Option<usize>,
    entries: IndexMap<K, RequestEntry>,
    max_used: usize,
}

impl<K: Eq + Hash + Clone> RequestStore<K> {
    pub fn new(clock: ClockView, timeout: Tick, max_capacity: Option<usize>) -> Self {
        Self {
            clock,
            timeout,
            max_capacity,
            entries: IndexMap::new(),
            max_used: 0,
        }
    }

    /// Returns a copy of the devices currently waiting on `key`, or an
    /// empty set if there is no live entry (expiring it if it was stale).
    pub fn get_requesters(&mut self, key: &K) -> HashSet<DeviceId> {
        let live = self.clean(key);
        if !live {
            return HashSet::new();
        }
        self.entries.get(key).map(|e| e.devices.clone()).unwrap_or_default()
    }

    /// True if any device has an unexpired request in flight for `key`.
    pub fn is_request_in_flight_for_anybody(&mut self, key: &K) -> bool {
        self.clean(key)
    }

    /// Registers (or clears) `for_id` as waiting on `key`. Marking in
    /// flight resets the entry's TTL and may evict the oldest tracked key
    /// to stay within capacity; clearing removes just that device.
    pub fn mark_request_in_flight_for(&mut self, key: &K, for_id: DeviceId, in_flight: bool) {
        if !in_flight {
            if let Some(entry) = self.entries.get_mut(key) {
                entry.devices.remove(&for_id);
            }
            self.clean(key);
            return;
        }

        self.clean(key);
        if self.max_capacity == Some(self.entries.len()) && !self.entries.contains_key(key) {
            self.entries.shift_remove_index(0);
        }

        let expires_at = self.clock.now() + self.timeout;
        let idx = self.entries.get_index_of(key);
        match idx {
            Some(i) => {
                let entry = &mut self.entries[i];
                entry.expires_at = expires_at;
                entry.devices.insert(for_id);
            }
            None => {
                let mut devices = HashSet::new();
                devices.insert(for_id);
                self.entries.insert(key.clone(), RequestEntry { expires_at, devices });
            }
        }
        self.touch(key);
        self.max_used = self.max_used.max(self.entries.len());
    }

    pub fn max_used(&self) -> usize {
        self.max_used
    }

    /// Drops `key`'s entry if it is expired or has no waiting devices left.
    /// Returns whether a live entry remains.
    fn clean(&mut self, key: &K) -> bool {
        let drop = match self.entries.get(key) {
            None => return false,
            Some(entry) => entry.expires_at < self.clock.now() || entry.devices.is_empty(),
        };
        if drop {
            self.entries.shift_remove(key);
            false
        } else {
            self.touch(key);
            true
        }
    }

    fn touch(&mut self, key: &K) {
        if let Some(idx) = self.entries.get_index_of(key) {
            let (k, v) = self.entries.shift_remove_index(idx).expect("index just looked up");
            self.entries.insert(k, v);
        }
    }
}

//! Bounded table of process birth times.
//!
//! The table is shared by every concurrent pipeline, so it is split in shards
//! selected by `pid % shards`, each one with its own lock. A lock is held only
//! for a single O(1) map operation, and records are written under it as a
//! whole: a lookup never observes a pid paired with somebody else's timestamp.
//!
//! The store grows until it holds `capacity` records. Past that, inserting a
//! new pid evicts the oldest pid of its shard, or of the next non-empty shard
//! when its own is empty. Overwriting a pid already present never evicts.

use std::{
    collections::{HashMap, VecDeque},
    sync::atomic::{AtomicUsize, Ordering},
};

use host_common::{Pid, time::Timestamp};
use parking_lot::Mutex;

pub const DEFAULT_CAPACITY: usize = 8192;
pub const DEFAULT_SHARDS: usize = 64;

pub struct BirthTimeStore {
    shards: Box<[Mutex<Shard>]>,
    capacity: usize,
    /// records in all shards, reserved before inserting
    len: AtomicUsize,
}

#[derive(Default)]
struct Shard {
    births: HashMap<Pid, Timestamp>,
    /// insertion order, used for eviction
    order: VecDeque<Pid>,
}

impl Shard {
    fn insert(&mut self, pid: Pid, timestamp: Timestamp) {
        self.births.insert(pid, timestamp);
        self.order.push_back(pid);
    }

    fn pop_oldest(&mut self) -> Option<Pid> {
        let oldest = self.order.pop_front()?;
        self.births.remove(&oldest);
        Some(oldest)
    }
}

impl BirthTimeStore {
    pub fn new(capacity: usize) -> Self {
        Self::with_shards(capacity, DEFAULT_SHARDS)
    }

    /// The number of shards never exceeds the capacity.
    pub fn with_shards(capacity: usize, shards: usize) -> Self {
        let capacity = capacity.max(1);
        let shards = shards.clamp(1, capacity);
        Self {
            shards: (0..shards).map(|_| Mutex::new(Shard::default())).collect(),
            capacity,
            len: AtomicUsize::new(0),
        }
    }

    /// Insert or overwrite the birth time of `pid`.
    ///
    /// Returns the pid evicted to make room, if any.
    pub fn record_birth(&self, pid: Pid, timestamp: Timestamp) -> Option<Pid> {
        let index = self.shard_index(pid);
        {
            let mut shard = self.shards[index].lock();
            if let Some(birth) = shard.births.get_mut(&pid) {
                *birth = timestamp;
                return None;
            }
            if self.len.fetch_add(1, Ordering::AcqRel) < self.capacity {
                shard.insert(pid, timestamp);
                return None;
            }
            if let Some(evicted) = shard.pop_oldest() {
                self.len.fetch_sub(1, Ordering::AcqRel);
                shard.insert(pid, timestamp);
                return Some(evicted);
            }
        }

        // Own shard empty: take the room from another one. Locks are never
        // nested, so the target shard is locked again afterwards.
        let evicted = self.evict_after(index);
        if evicted.is_some() {
            self.len.fetch_sub(1, Ordering::AcqRel);
        }
        let mut shard = self.shards[index].lock();
        if let Some(birth) = shard.births.get_mut(&pid) {
            // inserted concurrently, give back the reservation
            *birth = timestamp;
            self.len.fetch_sub(1, Ordering::AcqRel);
        } else {
            shard.insert(pid, timestamp);
        }
        evicted
    }

    pub fn lookup(&self, pid: Pid) -> Option<Timestamp> {
        self.shards[self.shard_index(pid)]
            .lock()
            .births
            .get(&pid)
            .copied()
    }

    /// Number of records currently stored.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of records the store can hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn shard_index(&self, pid: Pid) -> usize {
        pid.as_raw() as u32 as usize % self.shards.len()
    }

    /// Evict the oldest record of the first non-empty shard following `index`.
    fn evict_after(&self, index: usize) -> Option<Pid> {
        let shards = self.shards.len();
        (1..shards).find_map(|offset| self.shards[(index + offset) % shards].lock().pop_oldest())
    }
}

impl Default for BirthTimeStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    fn pid(raw: i32) -> Pid {
        Pid::from_raw(raw)
    }

    #[test]
    fn lookup_returns_recorded_birth() {
        let store = BirthTimeStore::new(16);
        assert_eq!(store.lookup(pid(10)), None);
        store.record_birth(pid(10), 42.into());
        assert_eq!(store.lookup(pid(10)), Some(42.into()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn last_write_wins() {
        let store = BirthTimeStore::new(16);
        store.record_birth(pid(10), 1.into());
        store.record_birth(pid(10), 2.into());
        store.record_birth(pid(10), 3.into());
        assert_eq!(store.lookup(pid(10)), Some(3.into()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn oldest_entry_is_evicted_at_capacity() {
        let store = BirthTimeStore::with_shards(4, 1);
        for raw in 1..=4 {
            assert_eq!(store.record_birth(pid(raw), (raw as u64).into()), None);
        }
        assert_eq!(store.record_birth(pid(5), 5.into()), Some(pid(1)));
        assert_eq!(store.lookup(pid(1)), None);
        for raw in 2..=5 {
            assert_eq!(store.lookup(pid(raw)), Some((raw as u64).into()));
        }
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn overwrite_does_not_evict_nor_refresh_order() {
        let store = BirthTimeStore::with_shards(2, 1);
        store.record_birth(pid(1), 1.into());
        store.record_birth(pid(2), 2.into());
        assert_eq!(store.record_birth(pid(1), 10.into()), None);
        assert_eq!(store.len(), 2);
        // pid 1 keeps its original place in the eviction queue
        assert_eq!(store.record_birth(pid(3), 3.into()), Some(pid(1)));
        assert_eq!(store.lookup(pid(2)), Some(2.into()));
    }

    #[test]
    fn one_shard_can_outgrow_its_share() {
        let store = BirthTimeStore::default();
        // every multiple of 64 lands in the same shard
        for k in 1..=1024 {
            assert_eq!(store.record_birth(pid(k * 64), (k as u64).into()), None);
        }
        assert_eq!(store.len(), 1024);
        assert_eq!(store.lookup(pid(64)), Some(1.into()));
    }

    #[test]
    fn full_store_evicts_from_the_next_shard_when_own_is_empty() {
        let store = BirthTimeStore::with_shards(4, 2);
        // even pids go to shard 0, odd ones to shard 1
        for raw in [2, 4, 6, 8] {
            assert_eq!(store.record_birth(pid(raw), (raw as u64).into()), None);
        }
        assert_eq!(store.record_birth(pid(1), 1.into()), Some(pid(2)));
        assert_eq!(store.lookup(pid(1)), Some(1.into()));
        assert_eq!(store.len(), 4);
        // shard 0 is not empty: its own oldest goes
        assert_eq!(store.record_birth(pid(10), 10.into()), Some(pid(4)));
        // shard 1 now pays for itself
        assert_eq!(store.record_birth(pid(3), 3.into()), Some(pid(1)));
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn capacity_is_exact() {
        let store = BirthTimeStore::with_shards(100, 64);
        assert_eq!(store.capacity(), 100);
        for raw in 0..100 {
            assert_eq!(store.record_birth(pid(raw), (raw as u64).into()), None);
        }
        assert_eq!(store.record_birth(pid(100), 100.into()), Some(pid(36)));
        assert_eq!(store.len(), 100);
    }

    #[test]
    fn shards_never_exceed_capacity() {
        let store = BirthTimeStore::with_shards(3, 64);
        assert_eq!(store.capacity(), 3);
        let store = BirthTimeStore::with_shards(0, 0);
        assert_eq!(store.capacity(), 1);
        store.record_birth(pid(1), 1.into());
        store.record_birth(pid(2), 2.into());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn concurrent_writers_never_tear_records() {
        let store = Arc::new(BirthTimeStore::new(1024));
        let handles: Vec<_> = (0..8)
            .map(|thread_id| {
                let store = store.clone();
                thread::spawn(move || {
                    for round in 0..200u64 {
                        for raw in 0..512 {
                            // every timestamp encodes the pid it belongs to
                            let ts = raw as u64 * 1_000_000 + thread_id * 1000 + round;
                            store.record_birth(pid(raw), ts.into());
                            if let Some(found) = store.lookup(pid((raw + 1) % 512)) {
                                assert_eq!(found.raw() / 1_000_000, ((raw + 1) % 512) as u64);
                            }
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.len(), 512);
        for raw in 0..512 {
            let found = store.lookup(pid(raw)).unwrap();
            assert_eq!(found.raw() / 1_000_000, raw as u64);
        }
    }
}

//! Duplicate call suppression
//!
//! Concurrent requests for the same key share one execution: the first
//! caller (the leader) runs the work, later callers block until it finishes
//! and receive a clone of its result. Once the leader is done the key is
//! forgotten, so a later request runs the work again.

use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

enum CallState<V> {
    Running,
    Done(V),
    /// The leader unwound without a result
    Abandoned,
}

struct Call<V> {
    state: Mutex<CallState<V>>,
    finished: Condvar,
}

impl<V: Clone> Call<V> {
    fn new() -> Self {
        Self { state: Mutex::new(CallState::Running), finished: Condvar::new() }
    }

    fn finish(&self, state: CallState<V>) {
        *self.state.lock() = state;
        self.finished.notify_all();
    }

    fn wait(&self) -> Option<V> {
        let mut state = self.state.lock();
        loop {
            match &*state {
                CallState::Done(value) => return Some(value.clone()),
                CallState::Abandoned => return None,
                CallState::Running => {}
            }
            self.finished.wait(&mut state);
        }
    }
}

/// Marks the call abandoned if the leader unwinds
struct LeaderGuard<'a, K: Eq + Hash, V: Clone> {
    group: &'a SingleFlight<K, V>,
    key: Option<K>,
    call: Arc<Call<V>>,
}

impl<K: Eq + Hash, V: Clone> LeaderGuard<'_, K, V> {
    fn complete(mut self, value: V) -> V {
        if let Some(key) = self.key.take() {
            self.group.calls.lock().remove(&key);
        }
        self.call.finish(CallState::Done(value.clone()));
        value
    }
}

impl<K: Eq + Hash, V: Clone> Drop for LeaderGuard<'_, K, V> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.group.calls.lock().remove(&key);
            self.call.finish(CallState::Abandoned);
        }
    }
}

/// Group of keyed calls with duplicate suppression
///
/// # Example
///
/// ```
/// use roadbook_scheduler::SingleFlight;
///
/// let group: SingleFlight<u32, String> = SingleFlight::new();
/// let page = group.run(3, || "page 3".to_string());
/// assert_eq!(page, "page 3");
/// assert_eq!(group.in_flight(), 0);
/// ```
pub struct SingleFlight<K, V> {
    calls: Mutex<HashMap<K, Arc<Call<V>>>>,
}

impl<K: Eq + Hash + Clone, V: Clone> SingleFlight<K, V> {
    pub fn new() -> Self {
        Self { calls: Mutex::new(HashMap::new()) }
    }

    /// Run `f` for `key`, or wait for the run already in flight
    ///
    /// If the leader panics, waiting callers fall back to running `f`
    /// themselves.
    pub fn run<F>(&self, key: K, f: F) -> V
    where
        F: FnOnce() -> V,
    {
        let mut calls = self.calls.lock();
        if let Some(call) = calls.get(&key).cloned() {
            drop(calls);
            return match call.wait() {
                Some(value) => value,
                None => f(),
            };
        }

        let call = Arc::new(Call::new());
        calls.insert(key.clone(), Arc::clone(&call));
        drop(calls);

        let guard = LeaderGuard { group: self, key: Some(key), call };
        let value = f();
        guard.complete(value)
    }

    /// Number of keys currently being computed
    pub fn in_flight(&self) -> usize {
        self.calls.lock().len()
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_sequential_calls_each_run() {
        let group = SingleFlight::new();
        let runs = AtomicUsize::new(0);

        for _ in 0..3 {
            let value = group.run(1u32, || {
                runs.fetch_add(1, Ordering::SeqCst);
                "page"
            });
            assert_eq!(value, "page");
        }

        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert_eq!(group.in_flight(), 0);
    }

    #[test]
    fn test_concurrent_calls_share_one_run() {
        let group = Arc::new(SingleFlight::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let group = Arc::clone(&group);
                let runs = Arc::clone(&runs);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    group.run(7u32, || {
                        runs.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(100));
                        42u64
                    })
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 42);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_distinct_keys_do_not_block_each_other() {
        let group = Arc::new(SingleFlight::new());
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = (0..2u32)
            .map(|key| {
                let group = Arc::clone(&group);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    group.run(key, || {
                        // Both leaders must be inside `run` at once.
                        barrier.wait();
                        key
                    })
                })
            })
            .collect();

        let mut results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        results.sort();
        assert_eq!(results, vec![0, 1]);
    }

    #[test]
    fn test_followers_recover_from_leader_panic() {
        let group = Arc::new(SingleFlight::<u32, u32>::new());
        let leader_started = Arc::new(Barrier::new(2));

        let leader = {
            let group = Arc::clone(&group);
            let leader_started = Arc::clone(&leader_started);
            thread::spawn(move || {
                panic::catch_unwind(AssertUnwindSafe(|| {
                    group.run(1, || {
                        leader_started.wait();
                        thread::sleep(Duration::from_millis(50));
                        panic!("render crashed")
                    })
                }))
                .is_err()
            })
        };

        leader_started.wait();
        let value = group.run(1, || 9);

        assert!(leader.join().unwrap());
        assert_eq!(value, 9);
        assert_eq!(group.in_flight(), 0);
    }
}

//! Transit Bus: single-assignment slots keyed by block sequence number.
//!
//! The worker finishing block N publishes the requests still open at its
//! end with [`TransitBus::put`]; the worker finishing block N + 1 blocks in
//! [`TransitBus::get`] until they are available. Blocks can thus be
//! processed by any worker in any order while each boundary merge still
//! sees its predecessor's state.

use std::collections::{BTreeSet, HashMap};

use parking_lot::{Condvar, Mutex};

use crate::error::TransitError;

enum Slot<T> {
    /// A reader is waiting, nothing assigned yet.
    Awaited,
    Ready(T),
}

struct State<T> {
    slots: HashMap<u64, Slot<T>>,
    /// Every key below this has been taken.
    taken_below: u64,
    /// Taken keys at or above `taken_below`.
    taken: BTreeSet<u64>,
    poisoned: bool,
}

impl<T> State<T> {
    fn is_taken(&self, key: u64) -> bool {
        key < self.taken_below || self.taken.contains(&key)
    }

    fn mark_taken(&mut self, key: u64) {
        self.taken.insert(key);
        while self.taken.remove(&self.taken_below) {
            self.taken_below += 1;
        }
    }
}

pub struct TransitBus<T> {
    state: Mutex<State<T>>,
    assigned: Condvar,
}

impl<T> TransitBus<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                slots: HashMap::new(),
                taken_below: 0,
                taken: BTreeSet::new(),
                poisoned: false,
            }),
            assigned: Condvar::new(),
        }
    }

    /// Assign the value for `key`. Each key may be assigned once, including
    /// after its value has been taken.
    pub fn put(&self, key: u64, value: T) -> Result<(), TransitError> {
        let mut state = self.state.lock();
        if state.is_taken(key) {
            return Err(TransitError::AlreadyAssigned(key));
        }
        match state.slots.get(&key) {
            Some(Slot::Ready(_)) => return Err(TransitError::AlreadyAssigned(key)),
            Some(Slot::Awaited) | None => {
                state.slots.insert(key, Slot::Ready(value));
            }
        }
        drop(state);
        self.assigned.notify_all();
        Ok(())
    }

    /// Block until `key` is assigned, then take the value out of the bus.
    ///
    /// Only one thread may wait on a key at a time, and a value can be
    /// taken only once.
    pub fn get(&self, key: u64) -> Result<T, TransitError> {
        let mut state = self.state.lock();
        let mut waiting = false;
        loop {
            if state.poisoned {
                return Err(TransitError::Poisoned);
            }
            if state.is_taken(key) {
                return Err(TransitError::AlreadyTaken(key));
            }
            match state.slots.remove(&key) {
                Some(Slot::Ready(value)) => {
                    state.mark_taken(key);
                    return Ok(value);
                }
                Some(Slot::Awaited) if !waiting => {
                    state.slots.insert(key, Slot::Awaited);
                    return Err(TransitError::AlreadyAwaited(key));
                }
                Some(Slot::Awaited) | None => {
                    state.slots.insert(key, Slot::Awaited);
                    waiting = true;
                }
            }
            self.assigned.wait(&mut state);
        }
    }

    /// Inspect the value for `key` without waiting or taking it.
    pub fn peek<R>(&self, key: u64, f: impl FnOnce(&T) -> R) -> Option<R> {
        let state = self.state.lock();
        match state.slots.get(&key) {
            Some(Slot::Ready(value)) => Some(f(value)),
            _ => None,
        }
    }

    /// Number of slots assigned or awaited and not yet taken.
    pub fn pending(&self) -> usize {
        self.state.lock().slots.len()
    }

    /// Fail every current and future [`get`](Self::get). Used when a worker
    /// dies so nobody waits for a block that will never be published.
    pub fn poison(&self) {
        self.state.lock().poisoned = true;
        self.assigned.notify_all();
    }
}

impl<T> Default for TransitBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn put_then_get() {
        let bus = TransitBus::new();
        bus.put(3, "three").unwrap();
        assert_eq!(bus.get(3), Ok("three"));
        assert_eq!(bus.pending(), 0);
    }

    #[test]
    fn peek_before_put_sees_nothing() {
        let bus = TransitBus::new();
        assert_eq!(bus.peek(0, |v: &u32| *v), None);
        bus.put(0, 7u32).unwrap();
        assert_eq!(bus.peek(0, |v| *v), Some(7));
        // Peeking leaves the value in place.
        assert_eq!(bus.get(0), Ok(7));
    }

    #[test]
    fn double_put_is_rejected() {
        let bus = TransitBus::new();
        bus.put(1, 1).unwrap();
        assert_eq!(bus.put(1, 2), Err(TransitError::AlreadyAssigned(1)));
        assert_eq!(bus.get(1), Ok(1));
    }

    #[test]
    fn double_put_after_get_is_rejected() {
        let bus = TransitBus::new();
        bus.put(1, 10).unwrap();
        assert_eq!(bus.get(1), Ok(10));
        assert_eq!(bus.put(1, 20), Err(TransitError::AlreadyAssigned(1)));
        assert_eq!(bus.peek(1, |v| *v), None);
        assert_eq!(bus.get(1), Err(TransitError::AlreadyTaken(1)));
    }

    #[test]
    fn taken_keys_are_remembered_out_of_order() {
        let bus = TransitBus::new();
        for key in [2, 0, 3] {
            bus.put(key, key).unwrap();
            assert_eq!(bus.get(key), Ok(key));
        }
        bus.put(1, 1).unwrap();
        assert_eq!(bus.get(1), Ok(1));
        for key in 0..4 {
            assert_eq!(bus.put(key, 0), Err(TransitError::AlreadyAssigned(key)));
        }
        bus.put(4, 4).unwrap();
        assert_eq!(bus.pending(), 1);
    }

    #[test]
    fn get_blocks_until_put() {
        let bus = Arc::new(TransitBus::new());
        let (done_tx, done_rx) = mpsc::channel();

        let waiter = {
            let bus = Arc::clone(&bus);
            thread::spawn(move || {
                let value = bus.get(5);
                done_tx.send(()).unwrap();
                value
            })
        };

        // Not released by unrelated keys.
        bus.put(4, 40).unwrap();
        assert!(done_rx.recv_timeout(Duration::from_millis(100)).is_err());

        bus.put(5, 50).unwrap();
        assert_eq!(waiter.join().unwrap(), Ok(50));
        assert!(done_rx.try_recv().is_ok());
    }

    #[test]
    fn second_waiter_is_rejected() {
        let bus = Arc::new(TransitBus::<u32>::new());
        let first = {
            let bus = Arc::clone(&bus);
            thread::spawn(move || bus.get(9))
        };
        while bus.pending() == 0 {
            thread::yield_now();
        }
        assert_eq!(bus.get(9), Err(TransitError::AlreadyAwaited(9)));
        bus.put(9, 90).unwrap();
        assert_eq!(first.join().unwrap(), Ok(90));
    }

    #[test]
    fn poison_wakes_waiters() {
        let bus = Arc::new(TransitBus::<u32>::new());
        let waiter = {
            let bus = Arc::clone(&bus);
            thread::spawn(move || bus.get(0))
        };
        while bus.pending() == 0 {
            thread::yield_now();
        }
        bus.poison();
        assert_eq!(waiter.join().unwrap(), Err(TransitError::Poisoned));
        assert_eq!(bus.get(1), Err(TransitError::Poisoned));
    }
}

// src/timer.rs
use std::{
    cell::RefCell,
    cmp::Reverse,
    collections::{BinaryHeap, HashMap, HashSet},
    rc::Rc,
    time::Duration,
};

use crate::{scheduler::Scheduler, tick::Task};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(pub(crate) u64);

// ---------------- deadline heap ----------------

/// Pending timers keyed by deadline. Cleared timers leave a stale heap entry
/// that is skipped on pop.
#[derive(Default)]
pub(crate) struct TimerQueue {
    heap: BinaryHeap<Reverse<(Duration, TimerId)>>,
    live: HashMap<TimerId, Task>,
    next_id: u64,
}

impl TimerQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, deadline: Duration, task: Task) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        self.heap.push(Reverse((deadline, id)));
        self.live.insert(id, task);
        id
    }

    #[inline]
    pub(crate) fn remove(&mut self, id: TimerId) -> bool {
        self.live.remove(&id).is_some()
    }

    /// Next timer due at or before `now`; ties fire in insertion order.
    pub(crate) fn pop_expired(&mut self, now: Duration) -> Option<(TimerId, Task)> {
        while let Some(Reverse((dl, id))) = self.heap.peek().copied() {
            if dl > now {
                return None;
            }
            self.heap.pop();
            if let Some(task) = self.live.remove(&id) {
                return Some((id, task));
            }
            // stale
        }
        None
    }

    pub(crate) fn next_deadline(&mut self) -> Option<Duration> {
        while let Some(Reverse((dl, id))) = self.heap.peek().copied() {
            if self.live.contains_key(&id) {
                return Some(dl);
            }
            self.heap.pop();
        }
        None
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.live.len()
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}

// ---------------- timer set ----------------

/// A group of timers that can be cleared together. Fired timers drop out
/// of the set on their own.
#[derive(Clone)]
pub struct TimerSet {
    sched: Scheduler,
    ids: Rc<RefCell<HashSet<TimerId>>>,
}

impl TimerSet {
    pub fn new(sched: &Scheduler) -> Self {
        Self { sched: sched.clone(), ids: Rc::new(RefCell::new(HashSet::new())) }
    }

    pub fn set(&self, delay: Duration, f: impl FnOnce() + 'static) -> TimerId {
        // The id is only known after insertion, so the callback looks it up
        // through a shared cell.
        let slot: Rc<RefCell<Option<TimerId>>> = Rc::new(RefCell::new(None));
        let ids = self.ids.clone();
        let slot2 = slot.clone();
        let id = self.sched.set_timeout(delay, move || {
            if let Some(id) = slot2.borrow_mut().take() {
                ids.borrow_mut().remove(&id);
            }
            f();
        });
        *slot.borrow_mut() = Some(id);
        self.ids.borrow_mut().insert(id);
        id
    }

    pub fn clear(&self, id: TimerId) -> bool {
        if self.ids.borrow_mut().remove(&id) {
            self.sched.clear_timeout(id)
        } else {
            false
        }
    }

    pub fn clear_all(&self) {
        let ids: Vec<TimerId> = self.ids.borrow_mut().drain().collect();
        for id in ids {
            self.sched.clear_timeout(id);
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ids.borrow().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.borrow().is_empty()
    }
}

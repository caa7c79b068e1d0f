// src/tick.rs
use std::collections::VecDeque;
use std::sync::mpsc;

use crate::error::TickError;

pub(crate) type Task = Box<dyn FnOnce()>;

/// "Run later" mechanisms, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TickKind {
    /// Runs at the next microtask checkpoint, before anything else.
    Microtask,
    /// Runs in the immediate phase of the next turn.
    Immediate,
    /// Round-trips through a message port.
    Message,
    /// Zero-delay timer. Always available; never rejects.
    Timer,
}

impl TickKind {
    pub const ALL: [TickKind; 4] =
        [TickKind::Microtask, TickKind::Immediate, TickKind::Message, TickKind::Timer];

    /// Capability probe: every mechanism this host supports, best first.
    pub fn probe() -> Vec<TickKind> {
        let mut kinds = vec![TickKind::Microtask, TickKind::Immediate];
        if MessagePort::probe() {
            kinds.push(TickKind::Message);
        }
        kinds.push(TickKind::Timer);
        kinds
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "microtask" | "tick" => Some(TickKind::Microtask),
            "immediate" => Some(TickKind::Immediate),
            "message" => Some(TickKind::Message),
            "timer" => Some(TickKind::Timer),
            _ => None,
        }
    }

    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            TickKind::Microtask => "microtask",
            TickKind::Immediate => "immediate",
            TickKind::Message => "message",
            TickKind::Timer => "timer",
        }
    }
}

// ---------------- selector ----------------

/// Memoized choice of tick source. Demotion is permanent.
#[derive(Debug)]
pub(crate) struct TickSelector {
    order: Vec<TickKind>,
    current: usize,
}

impl TickSelector {
    pub(crate) fn new(order: Vec<TickKind>) -> Self {
        debug_assert!(order.last() == Some(&TickKind::Timer));
        Self { order, current: 0 }
    }

    #[inline]
    pub(crate) fn current(&self) -> TickKind {
        self.order.get(self.current).copied().unwrap_or(TickKind::Timer)
    }

    /// Drops the current source and returns the next one.
    pub(crate) fn demote(&mut self) -> TickKind {
        if self.current + 1 < self.order.len() {
            self.current += 1;
        }
        self.current()
    }
}

// ---------------- bounded FIFO ----------------

pub(crate) struct TaskQueue {
    kind: TickKind,
    q: VecDeque<Task>,
    cap: Option<usize>,
}

impl TaskQueue {
    pub(crate) fn new(kind: TickKind, cap: Option<usize>) -> Self {
        Self { kind, q: VecDeque::new(), cap }
    }

    pub(crate) fn push(&mut self, task: Task) -> Result<(), (TickError, Task)> {
        if let Some(cap) = self.cap {
            if self.q.len() >= cap {
                return Err((TickError::QueueFull(self.kind), task));
            }
        }
        self.q.push_back(task);
        Ok(())
    }

    #[inline]
    pub(crate) fn pop(&mut self) -> Option<Task> {
        self.q.pop_front()
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.q.len()
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.q.is_empty()
    }
}

// ---------------- message port ----------------

/// Callbacks wait in `pending`; the channel only carries the "go" signal,
/// one per callback, so delivery order is send order.
pub(crate) struct MessagePort {
    tx: mpsc::Sender<u64>,
    rx: Option<mpsc::Receiver<u64>>,
    pending: VecDeque<(u64, Task)>,
    next_seq: u64,
}

impl MessagePort {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self { tx, rx: Some(rx), pending: VecDeque::new(), next_seq: 0 }
    }

    fn probe() -> bool {
        let (tx, rx) = mpsc::channel::<u64>();
        tx.send(0).is_ok() && rx.try_recv() == Ok(0)
    }

    pub(crate) fn post(&mut self, task: Task) -> Result<(), (TickError, Task)> {
        if self.rx.is_none() {
            return Err((TickError::Disconnected(TickKind::Message), task));
        }
        let seq = self.next_seq;
        if self.tx.send(seq).is_err() {
            return Err((TickError::Disconnected(TickKind::Message), task));
        }
        self.next_seq += 1;
        self.pending.push_back((seq, task));
        Ok(())
    }

    pub(crate) fn try_recv(&mut self) -> Option<Task> {
        let rx = self.rx.as_ref()?;
        let seq = rx.try_recv().ok()?;
        match self.pending.front() {
            Some((s, _)) if *s == seq => self.pending.pop_front().map(|(_, t)| t),
            _ => {
                log::warn!("message port out of sync at seq {seq}");
                None
            }
        }
    }

    /// Hangs up the receiving end and hands back the callbacks still queued,
    /// oldest first. Later posts fail.
    pub(crate) fn close(&mut self) -> Vec<Task> {
        self.rx = None;
        self.pending.drain(..).map(|(_, t)| t).collect()
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }
}

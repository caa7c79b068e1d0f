// src/scheduler.rs
use std::{
    cell::RefCell,
    panic::{AssertUnwindSafe, catch_unwind},
    rc::{Rc, Weak},
    time::Duration,
};

use crate::{
    clock::{Clock, SystemClock},
    config::SchedulerConfig,
    error::{Error, TickError},
    tick::{MessagePort, Task, TaskQueue, TickKind, TickSelector},
    timer::{TimerId, TimerQueue},
    trace::Tracer,
};

// ----------------------------- tick result -----------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickResult {
    Progress,
    Idle,
    Done,
}

// ---------------- scheduler ----------------

struct Inner {
    config: SchedulerConfig,
    clock: Rc<dyn Clock>,

    selector: TickSelector,
    microtasks: TaskQueue,
    immediates: TaskQueue,
    port: MessagePort,
    timers: TimerQueue,

    uncaught: Vec<Error>,
    turn: u64,
    tracer: Option<Box<dyn Tracer>>,
}

/// Single-threaded event loop: lazy ticks, timers and the uncaught-error sink.
///
/// Cheap to clone; all clones drive the same loop. Nothing here blocks except
/// [`run`](Self::run) / [`run_until`](Self::run_until) waiting on a real clock.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<RefCell<Inner>>,
}

/// Non-owning scheduler handle held by deferreds.
#[derive(Clone)]
pub(crate) struct WeakScheduler(Weak<RefCell<Inner>>);

impl WeakScheduler {
    #[inline]
    pub(crate) fn upgrade(&self) -> Option<Scheduler> {
        self.0.upgrade().map(|inner| Scheduler { inner })
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_clock(config, SystemClock::new())
    }

    /// System clock, configured from `LAZY_*` environment variables.
    pub fn from_env() -> Self {
        Self::new(SchedulerConfig::from_env())
    }

    pub fn with_clock(config: SchedulerConfig, clock: impl Clock + 'static) -> Self {
        let selector = TickSelector::new(config.resolved_tick_sources());
        log::debug!("lazy tick starts on {}", selector.current().as_str());
        Self {
            inner: Rc::new(RefCell::new(Inner {
                microtasks: TaskQueue::new(TickKind::Microtask, config.microtask_capacity),
                immediates: TaskQueue::new(TickKind::Immediate, config.immediate_capacity),
                port: MessagePort::new(),
                timers: TimerQueue::new(),
                selector,
                clock: Rc::new(clock),
                config,
                uncaught: Vec::new(),
                turn: 0,
                tracer: None,
            })),
        }
    }

    pub fn set_tracer(&self, tracer: Box<dyn Tracer>) {
        self.inner.borrow_mut().tracer = Some(tracer);
    }

    pub fn config(&self) -> SchedulerConfig {
        self.inner.borrow().config.clone()
    }

    #[inline]
    pub fn now(&self) -> Duration {
        let clock = self.inner.borrow().clock.clone();
        clock.now()
    }

    #[inline]
    pub(crate) fn downgrade(&self) -> WeakScheduler {
        WeakScheduler(Rc::downgrade(&self.inner))
    }

    pub fn ptr_eq(&self, other: &Scheduler) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // ---------------- lazy tick ----------------

    /// The mechanism the next `lazy` call will try first.
    pub fn tick_kind(&self) -> TickKind {
        self.inner.borrow().selector.current()
    }

    /// Runs `callback` asynchronously at the earliest opportunity, FIFO per
    /// mechanism. A mechanism that rejects is demoted for good.
    pub fn lazy(&self, callback: impl FnOnce() + 'static) {
        let mut task: Task = Box::new(callback);
        loop {
            let kind = self.tick_kind();
            let posted = match kind {
                TickKind::Microtask => self.inner.borrow_mut().microtasks.push(task),
                TickKind::Immediate => self.inner.borrow_mut().immediates.push(task),
                TickKind::Message => self.inner.borrow_mut().port.post(task),
                TickKind::Timer => {
                    self.set_timeout(Duration::ZERO, task);
                    Ok(())
                }
            };
            match posted {
                Ok(()) => {
                    self.trace(|t| t.on_lazy(kind));
                    return;
                }
                Err((err, back)) => {
                    self.demote(kind, &err);
                    task = back;
                }
            }
        }
    }

    fn demote(&self, from: TickKind, err: &TickError) {
        let to = self.inner.borrow_mut().selector.demote();
        log::warn!("lazy tick: {} unusable ({err}); using {} from now on", from.as_str(), to.as_str());
        self.trace(|t| t.on_demote(from, to, err));
    }

    /// Hangs up the message port, as a host tearing down its channel would.
    /// Callbacks still waiting on the port move to the next mechanism in
    /// their original order.
    pub fn close_message_port(&self) {
        let orphans = self.inner.borrow_mut().port.close();
        if !orphans.is_empty() {
            log::debug!("message port closed with {} callbacks queued; rerouting", orphans.len());
        }
        for task in orphans {
            self.lazy(task);
        }
    }

    // ---------------- timers ----------------

    pub fn set_timeout(&self, delay: Duration, callback: impl FnOnce() + 'static) -> TimerId {
        let now = self.now();
        let mut inner = self.inner.borrow_mut();
        let id = inner.timers.insert(now.saturating_add(delay), Box::new(callback));
        drop(inner);
        self.trace(|t| t.on_timer_set(id, delay));
        id
    }

    /// Returns false if the timer already fired or was cleared.
    pub fn clear_timeout(&self, id: TimerId) -> bool {
        let removed = self.inner.borrow_mut().timers.remove(id);
        if removed {
            self.trace(|t| t.on_timer_cleared(id));
        }
        removed
    }

    pub fn pending_timers(&self) -> usize {
        self.inner.borrow().timers.len()
    }

    // ---------------- uncaught errors ----------------

    pub(crate) fn report_uncaught(&self, err: Error) {
        log::error!("uncaught deferred failure: {err}");
        self.trace(|t| t.on_uncaught(&err));
        self.inner.borrow_mut().uncaught.push(err);
    }

    /// Failures that surfaced with no handler, oldest first.
    pub fn take_uncaught(&self) -> Vec<Error> {
        std::mem::take(&mut self.inner.borrow_mut().uncaught)
    }

    pub fn uncaught_count(&self) -> usize {
        self.inner.borrow().uncaught.len()
    }

    // ---------------- scheduler driving ----------------

    pub fn has_pending(&self) -> bool {
        let inner = self.inner.borrow();
        !inner.microtasks.is_empty()
            || !inner.immediates.is_empty()
            || inner.port.len() > 0
            || !inner.timers.is_empty()
    }

    /// One turn: microtasks, the immediates queued at turn start, the message
    /// port, then every expired timer. A microtask checkpoint follows each task.
    pub fn tick(&self) -> TickResult {
        if !self.has_pending() {
            return TickResult::Done;
        }

        let mut ran = self.run_microtasks();

        let batch = self.inner.borrow().immediates.len();
        for _ in 0..batch {
            let next = self.inner.borrow_mut().immediates.pop();
            let Some(task) = next else { break };
            self.run_task(task);
            ran += 1 + self.run_microtasks();
        }

        let batch = self.inner.borrow().port.len();
        for _ in 0..batch {
            let next = self.inner.borrow_mut().port.try_recv();
            let Some(task) = next else { break };
            self.run_task(task);
            ran += 1 + self.run_microtasks();
        }

        let now = self.now();
        let mut fired = 0usize;
        loop {
            let next = self.inner.borrow_mut().timers.pop_expired(now);
            let Some((_id, task)) = next else { break };
            self.run_task(task);
            fired += 1;
            ran += 1 + self.run_microtasks();
        }

        let turn = {
            let mut inner = self.inner.borrow_mut();
            inner.turn = inner.turn.saturating_add(1);
            inner.turn
        };
        self.trace(|t| {
            if fired > 0 {
                t.on_timers_fired(fired);
            }
            t.on_turn(turn, ran);
        });

        if ran > 0 { TickResult::Progress } else { TickResult::Idle }
    }

    pub fn tick_n(&self, n: usize) -> (usize, TickResult) {
        let mut progressed = 0usize;
        for _ in 0..n {
            match self.tick() {
                TickResult::Progress => progressed += 1,
                other => return (progressed, other),
            }
        }
        let last = if self.has_pending() { TickResult::Progress } else { TickResult::Done };
        (progressed, last)
    }

    /// Runs until nothing is ready right now, without waiting on timers.
    pub fn run_idle(&self) -> TickResult {
        loop {
            match self.tick() {
                TickResult::Progress => continue,
                other => return other,
            }
        }
    }

    /// Runs until no work is left, waiting (or jumping virtual time) between timers.
    pub fn run(&self) {
        loop {
            match self.tick() {
                TickResult::Progress => {}
                TickResult::Done => break,
                TickResult::Idle => {
                    let Some(deadline) = self.next_deadline() else { break };
                    self.sleep_until(deadline);
                }
            }
        }
    }

    /// Like `run`, but gives up after `limit`. Returns true if everything finished.
    pub fn run_until(&self, limit: Duration) -> bool {
        let stop_at = self.now().saturating_add(limit);
        loop {
            match self.tick() {
                TickResult::Progress => continue,
                TickResult::Done => return true,
                TickResult::Idle => {
                    let next = self.next_deadline();
                    match next {
                        Some(dl) if dl <= stop_at => self.sleep_until(dl),
                        Some(_) => {
                            self.sleep_until(stop_at);
                            return false;
                        }
                        None => return !self.has_pending(),
                    }
                }
            }
        }
    }

    // ---------------- internals ----------------

    // The tracer is lifted out for the call so hooks may use the scheduler.
    fn trace(&self, f: impl FnOnce(&mut dyn Tracer)) {
        let taken = self.inner.borrow_mut().tracer.take();
        let Some(mut tracer) = taken else { return };
        f(&mut *tracer);
        let mut inner = self.inner.borrow_mut();
        // a hook may have installed a replacement
        if inner.tracer.is_none() {
            inner.tracer = Some(tracer);
        }
    }

    fn next_deadline(&self) -> Option<Duration> {
        self.inner.borrow_mut().timers.next_deadline()
    }

    fn sleep_until(&self, deadline: Duration) {
        let clock = self.inner.borrow().clock.clone();
        if !clock.is_virtual() {
            log::trace!("idle until {}ms", deadline.as_millis());
        }
        clock.sleep_until(deadline);
    }

    fn run_microtasks(&self) -> usize {
        let mut n = 0;
        loop {
            let next = self.inner.borrow_mut().microtasks.pop();
            let Some(task) = next else { return n };
            self.run_task(task);
            n += 1;
        }
    }

    // The borrow is released before the callback runs so it can re-enter freely.
    fn run_task(&self, task: Task) {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(task)) {
            self.report_uncaught(Error::from_panic(payload));
        }
    }
}

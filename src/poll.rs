// src/poll.rs
//! Self-rescheduling polling loops built on timers and deferreds.
use std::{
    cell::{Cell, RefCell},
    panic::{AssertUnwindSafe, catch_unwind},
    rc::Rc,
    time::Duration,
};

use crate::{deferred::Deferred, error::Error, scheduler::Scheduler, step::Step, timer::TimerSet};

type PollFn = Box<dyn FnMut() -> Result<bool, Error>>;

// ---------------- observe ----------------

struct Observe {
    sched: Scheduler,
    poll: PollFn,
    delay: Duration,
    cap: Duration,
    timers: TimerSet,
    done: Rc<Cell<bool>>,
    out: Deferred<()>,
}

fn observing(state: &Rc<RefCell<Observe>>) {
    let mut s = state.borrow_mut();
    if s.done.get() {
        return;
    }
    let started = s.sched.now();
    let outcome = match catch_unwind(AssertUnwindSafe(|| (s.poll)())) {
        Ok(Ok(true)) => Ok(()),
        Ok(Ok(false)) => Err(Error::Stopped),
        Ok(Err(e)) => Err(e),
        Err(p) => Err(Error::from_panic(p)),
    };

    match outcome {
        Ok(()) => {
            // cancelled from inside the poll
            if s.done.get() {
                return;
            }
            let elapsed = s.sched.now().saturating_sub(started);
            let interval = s.delay.saturating_add(elapsed).min(s.cap);
            let st = state.clone();
            s.timers.set(interval, move || observing(&st));
        }
        Err(e) => {
            s.done.set(true);
            s.timers.clear_all();
            let out = s.out.clone();
            drop(s);
            if e.is_stop() {
                log::debug!("[observe] stopped");
                out.begin(());
            } else {
                log::debug!("[observe] failed: {e}");
                out.raise(e);
            }
        }
    }
}

// ---------------- till ----------------

struct Till {
    sched: Scheduler,
    cond: PollFn,
    timers: TimerSet,
    end: Rc<Cell<bool>>,
    lock: bool,
    locked: u32,
    start: Duration,
    max: Option<Duration>,
    interval: Duration,
    min: Duration,
    cap: Duration,
    out: Deferred<bool>,
}

impl Till {
    fn finish(&mut self) -> Deferred<bool> {
        self.end.set(true);
        self.timers.clear_all();
        self.out.clone()
    }
}

fn tilling(state: &Rc<RefCell<Till>>) {
    let mut s = state.borrow_mut();
    if s.end.get() {
        s.timers.clear_all();
        return;
    }

    if s.lock {
        // One re-check may wait behind the outstanding one; more are dropped.
        s.locked += 1;
        if s.locked == 1 {
            let st = state.clone();
            s.timers.set(s.interval, move || {
                let again = {
                    let mut s = st.borrow_mut();
                    s.locked -= 1;
                    s.locked == 0
                };
                if again {
                    tilling(&st);
                }
            });
        } else {
            s.locked -= 1;
        }
    } else {
        s.lock = true;
        let began = s.sched.now();
        let st = state.clone();
        let check: Deferred<bool> = s.sched.spawn(move || (st.borrow_mut().cond)());
        let (ok, err) = (state.clone(), state.clone());
        check.then_else(
            move |hit| {
                checked(&ok, began, hit);
                Step::Value(hit)
            },
            move |e| {
                failed(&err, e);
                Step::Value(false)
            },
        );
    }

    let expired = s.max.filter(|max| !s.end.get() && s.sched.now().saturating_sub(s.start) > *max);
    if let Some(max) = expired {
        let out = s.finish();
        drop(s);
        log::debug!("[till] timed out after {}ms", max.as_millis());
        out.begin(false);
    }
}

fn checked(state: &Rc<RefCell<Till>>, began: Duration, hit: bool) {
    let mut s = state.borrow_mut();
    // late result after a timeout or cancel
    if s.end.get() {
        return;
    }
    if hit {
        let out = s.finish();
        drop(s);
        out.begin(true);
        return;
    }
    let elapsed = s.sched.now().saturating_sub(began);
    let interval = s.interval.saturating_add(elapsed).min(s.cap).max(s.min);
    let st = state.clone();
    s.timers.set(interval, move || {
        st.borrow_mut().lock = false;
        tilling(&st);
    });
}

fn failed(state: &Rc<RefCell<Till>>, err: Error) {
    let mut s = state.borrow_mut();
    if s.end.get() {
        return;
    }
    let out = s.finish();
    drop(s);
    log::debug!("[till] condition failed: {err}");
    out.raise(err);
}

impl Scheduler {
    /// Calls `poll` on the next lazy tick and then again after each interval
    /// until it returns `Ok(false)` or fails.
    ///
    /// The interval is `delay + time spent in poll`, capped by
    /// `observe_max_interval`; `delay` defaults to `observe_default_delay`.
    /// Stopping (`Ok(false)` or [`Error::Stopped`]) resolves the returned
    /// deferred; any other error or a panic rejects it. Cancelling it before
    /// then halts the loop.
    pub fn observe<F>(&self, poll: F, delay: Option<Duration>) -> Deferred<()>
    where
        F: FnMut() -> Result<bool, Error> + 'static,
    {
        let cfg = self.config();
        let timers = TimerSet::new(self);
        let done = Rc::new(Cell::new(false));
        let out = halting(self, &done, &timers);
        let state = Rc::new(RefCell::new(Observe {
            sched: self.clone(),
            poll: Box::new(poll),
            delay: delay.unwrap_or(cfg.observe_default_delay),
            cap: cfg.observe_max_interval,
            timers,
            done,
            out: out.clone(),
        }));
        self.lazy(move || observing(&state));
        out
    }

    /// Polls `cond` until it returns `Ok(true)`, resolving `true`.
    ///
    /// With `max` set, the first check made after `max` has passed resolves
    /// `false` instead; a timeout is never an error. A failing or panicking
    /// condition rejects and stops polling.
    pub fn till<F>(&self, cond: F, max: Option<Duration>) -> Deferred<bool>
    where
        F: FnMut() -> Result<bool, Error> + 'static,
    {
        let cfg = self.config();
        let timers = TimerSet::new(self);
        let end = Rc::new(Cell::new(false));
        let out = halting(self, &end, &timers);
        let state = Rc::new(RefCell::new(Till {
            sched: self.clone(),
            cond: Box::new(cond),
            timers,
            end,
            lock: false,
            locked: 0,
            start: self.now(),
            max,
            interval: cfg.till_initial_interval,
            min: cfg.till_min_interval,
            cap: cfg.till_max_interval,
            out: out.clone(),
        }));
        self.lazy(move || tilling(&state));
        out
    }
}

/// A deferred whose canceller stops a polling loop.
fn halting<T: 'static>(sched: &Scheduler, flag: &Rc<Cell<bool>>, timers: &TimerSet) -> Deferred<T> {
    let (flag, timers) = (flag.clone(), timers.clone());
    Deferred::with_canceller(sched, move || {
        flag.set(true);
        timers.clear_all();
    })
}

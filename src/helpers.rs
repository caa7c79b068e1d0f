// src/helpers.rs
use std::{
    cell::Cell,
    panic::{AssertUnwindSafe, catch_unwind},
    rc::Rc,
    time::Duration,
};

use crate::{deferred::Deferred, error::Error, scheduler::Scheduler, step::Step};

impl Scheduler {
    /// Returns an unfired deferred now and settles it from `f` on the next
    /// lazy tick, so continuations attached right away always see the result.
    /// Arguments are bound by capture.
    ///
    /// `f` hangs off a trigger deferred begun on that tick; cancelling the
    /// returned deferred first cancels the trigger, so `f` never runs.
    pub fn spawn<T, R, F>(&self, f: F) -> Deferred<T>
    where
        T: 'static,
        R: Into<Step<T>>,
        F: FnOnce() -> R + 'static,
    {
        let trigger = Deferred::<()>::new(self);
        let d = trigger.map(move |()| f());
        self.lazy(move || {
            trigger.begin(());
        });
        d
    }

    /// `spawn` for a plain value: begins with it on the next lazy tick.
    pub fn spawn_value<T: 'static>(&self, value: T) -> Deferred<T> {
        let d = Deferred::new(self);
        let target = d.clone();
        self.lazy(move || {
            if !target.is_cancelled() {
                target.begin(value);
            }
        });
        d
    }

    pub fn succeed<T: 'static>(&self, value: T) -> Deferred<T> {
        let d = Deferred::new(self);
        d.begin(value);
        d
    }

    pub fn failure<T: 'static>(&self, err: impl Into<Error>) -> Deferred<T> {
        let d = Deferred::new(self);
        d.raise(err);
        d
    }

    /// Failure → failed deferred, deferred → itself, value → succeeded deferred.
    pub fn from_step<T: 'static>(&self, step: impl Into<Step<T>>) -> Deferred<T> {
        match step.into() {
            Step::Value(v) => self.succeed(v),
            Step::Fail(e) => self.failure(e),
            Step::Nested(d) => d,
        }
    }

    /// Calls `f` now and wraps whatever comes out. A panic becomes a failed
    /// deferred instead of unwinding out of here.
    pub fn maybe_deferred<T, R, F>(&self, f: F) -> Deferred<T>
    where
        T: 'static,
        R: Into<Step<T>>,
        F: FnOnce() -> R,
    {
        match catch_unwind(AssertUnwindSafe(move || -> Step<T> { f().into() })) {
            Ok(step) => self.from_step(step),
            Err(p) => self.failure(Error::from_panic(p)),
        }
    }

    pub fn maybe_deferreds<T, R, F, I>(&self, fs: I) -> Vec<Deferred<T>>
    where
        T: 'static,
        R: Into<Step<T>>,
        F: FnOnce() -> R,
        I: IntoIterator<Item = F>,
    {
        fs.into_iter().map(|f| self.maybe_deferred(f)).collect()
    }

    /// Fires after `delay`. Cancelling it before then clears the timer.
    pub fn wait(&self, delay: Duration) -> Deferred<()> {
        let timer = Rc::new(Cell::new(None));
        let sched = self.downgrade();
        let t = timer.clone();
        let d = Deferred::with_canceller(self, move || {
            if let (Some(id), Some(s)) = (t.take(), sched.upgrade()) {
                s.clear_timeout(id);
            }
        });
        let target = d.clone();
        let t = timer.clone();
        timer.set(Some(self.set_timeout(delay, move || {
            t.set(None);
            target.begin(());
        })));
        d
    }

    /// `wait`, then continue with `value`.
    pub fn wait_value<T: 'static>(&self, delay: Duration, value: T) -> Deferred<T> {
        self.wait(delay).map(move |()| Step::Value(value))
    }

    /// After `delay`, calls `f` and settles from what it returns.
    pub fn call_later<T, R, F>(&self, delay: Duration, f: F) -> Deferred<T>
    where
        T: 'static,
        R: Into<Step<T>>,
        F: FnOnce() -> R + 'static,
    {
        self.wait(delay).map(move |()| f())
    }

    /// After `delay`, begins `target` with `value` and follows it.
    pub fn call_later_deferred<T: 'static>(&self, delay: Duration, target: Deferred<T>, value: T) -> Deferred<T> {
        self.wait(delay).map(move |()| {
            target.begin(value);
            Step::Nested(target)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::ManualClock, config::SchedulerConfig, deferred::State};
    use std::cell::RefCell;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn virtual_sched() -> (Scheduler, ManualClock) {
        let clock = ManualClock::new();
        (Scheduler::with_clock(SchedulerConfig::default(), clock.clone()), clock)
    }

    #[test]
    fn spawn_returns_before_running() {
        let (s, _) = virtual_sched();
        let ran = Rc::new(Cell::new(false));
        let r = ran.clone();
        let d = s.spawn(move || {
            r.set(true);
            Step::Value(5)
        });
        assert!(!ran.get());
        assert_eq!(d.state(), State::Unfired);

        let got = Rc::new(Cell::new(0));
        let g = got.clone();
        d.then(move |v| {
            g.set(v);
            Step::Value(v)
        });
        s.run();
        assert!(ran.get());
        assert_eq!(got.get(), 5);
    }

    #[test]
    fn spawn_catches_panics() {
        let (s, _) = virtual_sched();
        let d: Deferred<i32> = s.spawn(|| -> Step<i32> { panic!("in spawn") });
        let err = Rc::new(RefCell::new(None));
        let e = err.clone();
        d.rescue(move |x| {
            *e.borrow_mut() = Some(x);
            Step::Value(0)
        });
        s.run();
        assert_eq!(*err.borrow(), Some(Error::Panicked("in spawn".into())));
        assert_eq!(s.uncaught_count(), 0);
    }

    #[test]
    fn cancelled_spawn_never_runs() {
        let (s, _) = virtual_sched();
        let ran = Rc::new(Cell::new(false));
        let r = ran.clone();
        let d = s.spawn(move || {
            r.set(true);
            Step::Value(1)
        });
        d.cancel();
        s.run();
        assert!(!ran.get());
        assert_eq!(d.state(), State::Unfired);

        let v = s.spawn_value(2);
        v.cancel();
        s.run();
        assert_eq!(v.state(), State::Unfired);
    }

    #[test]
    fn spawn_value_is_lazy() {
        let (s, _) = virtual_sched();
        let d = s.spawn_value("v");
        assert!(!d.is_fireable());
        s.run();
        assert_eq!(d.peek(), Some(Ok("v")));
    }

    #[test]
    fn succeed_and_failure_settle_synchronously() {
        let (s, _) = virtual_sched();
        assert_eq!(s.succeed(1).peek(), Some(Ok(1)));
        let f = s.failure::<i32>("no");
        assert_eq!(f.peek(), Some(Err(Error::msg("no"))));
        f.rescue(|_| Step::Value(0));
    }

    #[test]
    fn maybe_deferred_normalises_inputs() {
        let (s, _) = virtual_sched();

        let d = s.maybe_deferred(|| Step::Value(3));
        assert_eq!(d.peek(), Some(Ok(3)));

        let d = s.maybe_deferred(|| Err::<i32, _>(Error::msg("e")));
        assert_eq!(d.state(), State::Failure);
        d.rescue(|_| Step::Value(0));

        let pending = Deferred::<i32>::new(&s);
        let p2 = pending.clone();
        let d = s.maybe_deferred(move || p2);
        assert!(d.ptr_eq(&pending));

        let d: Deferred<i32> = s.maybe_deferred(|| -> Step<i32> { panic!("x") });
        assert_eq!(d.peek(), Some(Err(Error::Panicked("x".into()))));
        d.rescue(|_| Step::Value(0));

        let ds = s.maybe_deferreds((1..=3).map(|n| move || Step::Value(n * 2)));
        let vals: Vec<_> = ds.iter().filter_map(|d| d.peek()).map(|r| r.ok()).collect();
        assert_eq!(vals, vec![Some(2), Some(4), Some(6)]);
    }

    #[test]
    fn wait_fires_after_delay() {
        let (s, clock) = virtual_sched();
        let at = Rc::new(Cell::new(None));
        let a = at.clone();
        let c = clock.clone();
        s.wait(ms(100)).then(move |()| {
            a.set(Some(c.now()));
            Step::Value(())
        });
        s.run();
        assert_eq!(at.get(), Some(ms(100)));
    }

    #[test]
    fn endless_wait_stays_pending() {
        let (s, clock) = virtual_sched();
        clock.advance(ms(1));
        let d = s.wait(Duration::MAX);
        assert!(!s.run_until(ms(10)));
        assert!(!d.is_fireable());
        d.cancel();
        assert_eq!(s.pending_timers(), 0);
    }

    #[test]
    fn wait_value_replaces_result() {
        let (s, _) = virtual_sched();
        let d = s.wait_value(ms(100), "done");
        s.run_until(ms(99));
        assert!(!d.is_fireable());
        s.run();
        assert_eq!(d.peek(), Some(Ok("done")));
    }

    #[test]
    fn cancelled_wait_never_resolves() {
        let (s, _) = virtual_sched();
        let d = s.wait_value(ms(100), "done");
        s.run_until(ms(50));
        d.cancel();
        assert_eq!(s.pending_timers(), 0);
        s.run();
        assert_eq!(d.state(), State::Unfired);
    }

    #[test]
    fn call_later_runs_function_after_delay() {
        let (s, clock) = virtual_sched();
        let c = clock.clone();
        let d = s.call_later(ms(30), move || Step::Value(c.now()));
        s.run();
        assert_eq!(d.peek(), Some(Ok(ms(30))));
    }

    #[test]
    fn call_later_deferred_begins_and_follows_target() {
        let (s, _) = virtual_sched();
        let target = Deferred::<i32>::new(&s);
        let seen = Rc::new(Cell::new(0));
        let sn = seen.clone();
        target.then(move |v| {
            sn.set(v);
            Step::Value(v + 1)
        });
        let d = s.call_later_deferred(ms(10), target.clone(), 41);
        s.run();
        assert_eq!(seen.get(), 41);
        assert_eq!(d.peek(), Some(Ok(42)));
        assert!(target.is_chained());
    }
}

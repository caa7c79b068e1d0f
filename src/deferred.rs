// src/deferred.rs
use std::{
    cell::RefCell,
    collections::VecDeque,
    panic::{AssertUnwindSafe, catch_unwind},
    rc::{Rc, Weak},
};

use crate::{
    error::Error,
    scheduler::{Scheduler, WeakScheduler},
    step::Step,
    timer::TimerId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Unfired,
    Success,
    Failure,
}

type OkFn<T> = Box<dyn FnOnce(T) -> Step<T>>;
type ErrFn<T> = Box<dyn FnOnce(Error) -> Step<T>>;
type BothFn<T> = Box<dyn FnOnce(Result<T, Error>) -> Step<T>>;
type SinkFn<T> = Box<dyn FnOnce(Result<T, Error>)>;

// ---------------- continuations ----------------

enum Continuation<T> {
    Split { ok: Option<OkFn<T>>, err: Option<ErrFn<T>> },
    Both(BothFn<T>),
    /// Hands the settled outcome to someone else; the slot is left empty.
    Sink(SinkFn<T>),
}

enum Handler<T> {
    Ok(OkFn<T>),
    Err(ErrFn<T>),
    Both(BothFn<T>),
    Sink(SinkFn<T>),
}

impl<T> Continuation<T> {
    #[inline]
    fn has_errback(&self) -> bool {
        match self {
            Continuation::Split { err, .. } => err.is_some(),
            Continuation::Both(_) | Continuation::Sink(_) => true,
        }
    }

    fn select(self, failed: bool) -> Option<Handler<T>> {
        match self {
            Continuation::Split { ok, err } => {
                if failed {
                    err.map(Handler::Err)
                } else {
                    ok.map(Handler::Ok)
                }
            }
            Continuation::Both(f) => Some(Handler::Both(f)),
            Continuation::Sink(f) => Some(Handler::Sink(f)),
        }
    }
}

impl<T> Handler<T> {
    /// `None` when the outcome was handed off by a sink.
    fn invoke(self, input: Result<T, Error>) -> Option<Step<T>> {
        match (self, input) {
            (Handler::Ok(f), Ok(v)) => Some(f(v)),
            (Handler::Err(f), Err(e)) => Some(f(e)),
            (Handler::Both(f), r) => Some(f(r)),
            (Handler::Sink(f), r) => {
                f(r);
                None
            }
            // Handlers are picked by state, so these only pass the input through.
            (Handler::Ok(_), Err(e)) => Some(Step::Fail(e)),
            (Handler::Err(_), Ok(v)) => Some(Step::Value(v)),
        }
    }
}

// ---------------- deferred ----------------

struct Inner<T> {
    state: State,
    ok: Option<T>,
    err: Option<Error>,
    chain: VecDeque<Continuation<T>>,

    paused: usize,
    cancelled: bool,
    chained: bool,
    canceller: Option<Box<dyn FnOnce()>>,
    nested: Option<Weak<RefCell<Inner<T>>>>,

    draining: bool,
    unhandled: Option<TimerId>,
    reported: bool,
    sched: WeakScheduler,
}

impl<T> Inner<T> {
    #[inline]
    fn set_success(&mut self, v: T) {
        self.state = State::Success;
        self.ok = Some(v);
    }

    #[inline]
    fn set_failure(&mut self, e: Error) {
        self.state = State::Failure;
        self.err = Some(e);
        self.reported = false;
    }

    #[inline]
    fn has_errback(&self) -> bool {
        self.chain.iter().any(Continuation::has_errback)
    }
}

/// Single-assignment-per-turn future with a synchronous continuation chain.
///
/// Continuations attached to a settled, unpaused deferred run immediately and
/// in attachment order. A continuation that hands back another deferred pauses
/// the chain until that one settles. A settled deferred may be begun or raised
/// again; the new outcome re-enters the chain.
pub struct Deferred<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T> std::fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let i = self.inner.borrow();
        f.debug_struct("Deferred")
            .field("state", &i.state)
            .field("chain", &i.chain.len())
            .field("paused", &i.paused)
            .field("cancelled", &i.cancelled)
            .field("chained", &i.chained)
            .finish()
    }
}

impl<T: 'static> Deferred<T> {
    pub fn new(sched: &Scheduler) -> Self {
        Self::build(sched.downgrade(), None)
    }

    /// `canceller` runs if the deferred is cancelled before it fires.
    pub fn with_canceller(sched: &Scheduler, canceller: impl FnOnce() + 'static) -> Self {
        Self::build(sched.downgrade(), Some(Box::new(canceller)))
    }

    fn build(sched: WeakScheduler, canceller: Option<Box<dyn FnOnce()>>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                state: State::Unfired,
                ok: None,
                err: None,
                chain: VecDeque::new(),
                paused: 0,
                cancelled: false,
                chained: false,
                canceller,
                nested: None,
                draining: false,
                unhandled: None,
                reported: false,
                sched,
            })),
        }
    }

    pub fn scheduler(&self) -> Option<Scheduler> {
        self.inner.borrow().sched.upgrade()
    }

    // ---------------- chaining ----------------

    pub fn then<R>(&self, on_ok: impl FnOnce(T) -> R + 'static) -> &Self
    where
        R: Into<Step<T>>,
    {
        self.push(Continuation::Split { ok: Some(Box::new(move |v| on_ok(v).into())), err: None })
    }

    /// Both halves of a continuation pair; exactly one runs.
    pub fn then_else<R1, R2>(
        &self,
        on_ok: impl FnOnce(T) -> R1 + 'static,
        on_err: impl FnOnce(Error) -> R2 + 'static,
    ) -> &Self
    where
        R1: Into<Step<T>>,
        R2: Into<Step<T>>,
    {
        self.push(Continuation::Split {
            ok: Some(Box::new(move |v| on_ok(v).into())),
            err: Some(Box::new(move |e| on_err(e).into())),
        })
    }

    pub fn rescue<R>(&self, on_err: impl FnOnce(Error) -> R + 'static) -> &Self
    where
        R: Into<Step<T>>,
    {
        self.push(Continuation::Split { ok: None, err: Some(Box::new(move |e| on_err(e).into())) })
    }

    pub fn ensure<R>(&self, on_both: impl FnOnce(Result<T, Error>) -> R + 'static) -> &Self
    where
        R: Into<Step<T>>,
    {
        self.push(Continuation::Both(Box::new(move |r| on_both(r).into())))
    }

    /// Type-changing continuation. The source is consumed (marked chained) and
    /// its outcome flows into the returned deferred; cancelling the returned
    /// deferred before it fires cancels the source.
    pub fn map<U: 'static, R>(&self, f: impl FnOnce(T) -> R + 'static) -> Deferred<U>
    where
        R: Into<Step<U>>,
    {
        let src = Rc::downgrade(&self.inner);
        let sched = self.inner.borrow().sched.clone();
        let out = Deferred::<U>::build(
            sched,
            Some(Box::new(move || {
                if let Some(inner) = src.upgrade() {
                    Deferred { inner }.cancel();
                }
            })),
        );

        let target = out.clone();
        self.push(Continuation::Sink(Box::new(move |r| match r {
            Ok(v) => match catch_unwind(AssertUnwindSafe(move || -> Step<U> { f(v).into() })) {
                Ok(step) => {
                    target.resolve(step);
                }
                Err(p) => {
                    target.raise(Error::from_panic(p));
                }
            },
            Err(e) => {
                target.raise(e);
            }
        })));
        self.end();
        out
    }

    fn push(&self, c: Continuation<T>) -> &Self {
        let fireable = {
            let mut i = self.inner.borrow_mut();
            if i.chained || i.cancelled {
                return self;
            }
            i.chain.push_back(c);
            i.state != State::Unfired
        };
        if fireable {
            self.fire();
        }
        self
    }

    // ---------------- settling ----------------

    pub fn begin(&self, value: T) -> &Self {
        self.inner.borrow_mut().set_success(value);
        self.fire();
        self
    }

    /// Settles on the failure path. Anything convertible to [`Error`] is accepted.
    pub fn raise(&self, err: impl Into<Error>) -> &Self {
        self.inner.borrow_mut().set_failure(err.into());
        self.fire();
        self
    }

    /// Settles from a step. A nested deferred pauses this one until it settles.
    pub fn resolve(&self, step: impl Into<Step<T>>) -> &Self {
        match step.into() {
            Step::Value(v) => self.begin(v),
            Step::Fail(e) => self.raise(e),
            Step::Nested(d) => {
                if d.ptr_eq(self) {
                    return self.raise(Error::msg("deferred cannot wait on itself"));
                }
                {
                    let mut i = self.inner.borrow_mut();
                    i.state = State::Success;
                    i.paused += 1;
                    i.nested = Some(Rc::downgrade(&d.inner));
                }
                self.follow(d);
                self
            }
        }
    }

    /// No further continuations will be accepted.
    pub fn end(&self) -> &Self {
        self.inner.borrow_mut().chained = true;
        self
    }

    /// Unfired: runs the canceller. Paused on a nested deferred: cancels that
    /// one. Either way the chain never drains again. Only the first call acts.
    pub fn cancel(&self) -> &Self {
        let (canceller, nested) = {
            let mut i = self.inner.borrow_mut();
            if i.cancelled {
                return self;
            }
            i.cancelled = true;
            if i.state == State::Unfired {
                (i.canceller.take(), None)
            } else {
                (None, i.nested.as_ref().and_then(Weak::upgrade))
            }
        };
        if let Some(f) = canceller {
            f();
        }
        if let Some(inner) = nested {
            Deferred { inner }.cancel();
        }
        self
    }

    // ---------------- introspection ----------------

    pub fn state(&self) -> State {
        self.inner.borrow().state
    }

    #[inline]
    pub fn is_fireable(&self) -> bool {
        self.state() != State::Unfired
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.borrow().cancelled
    }

    pub fn is_chained(&self) -> bool {
        self.inner.borrow().chained
    }

    /// Still accepts continuations.
    pub fn is_chainable(&self) -> bool {
        let i = self.inner.borrow();
        !i.chained && !i.cancelled
    }

    pub fn paused(&self) -> usize {
        self.inner.borrow().paused
    }

    pub fn pending_continuations(&self) -> usize {
        self.inner.borrow().chain.len()
    }

    /// An unhandled failure is waiting to be reported.
    pub fn has_unhandled(&self) -> bool {
        self.inner.borrow().unhandled.is_some()
    }

    pub fn ptr_eq(&self, other: &Deferred<T>) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Current outcome, if the slot for the current state holds one.
    pub fn peek(&self) -> Option<Result<T, Error>>
    where
        T: Clone,
    {
        let i = self.inner.borrow();
        match i.state {
            State::Unfired => None,
            State::Success => i.ok.clone().map(Ok),
            State::Failure => i.err.clone().map(Err),
        }
    }

    // ---------------- drain ----------------

    fn fire(&self) {
        let stale_report = {
            let mut i = self.inner.borrow_mut();
            if i.draining || i.state == State::Unfired {
                return;
            }
            i.draining = true;
            // A late errback absorbs a failure that was about to be reported.
            if i.unhandled.is_some() && i.has_errback() {
                i.unhandled.take().map(|id| (id, i.sched.clone()))
            } else {
                None
            }
        };
        if let Some((id, sched)) = stale_report {
            if let Some(s) = sched.upgrade() {
                s.clear_timeout(id);
            }
        }

        let mut nested: Option<Deferred<T>> = None;
        loop {
            let (handler, input) = {
                let mut i = self.inner.borrow_mut();
                if i.paused > 0 || i.cancelled {
                    break;
                }
                let Some(cont) = i.chain.pop_front() else { break };
                let failed = i.state == State::Failure;
                if failed && !cont.has_errback() {
                    continue;
                }
                let input = if failed { i.err.take().map(Err) } else { i.ok.take().map(Ok) };
                let Some(input) = input else {
                    // Outcome already handed off; nothing to feed the chain.
                    i.chain.push_front(cont);
                    break;
                };
                match cont.select(failed) {
                    Some(h) => (h, input),
                    None => {
                        match input {
                            Ok(v) => i.ok = Some(v),
                            Err(e) => i.err = Some(e),
                        }
                        continue;
                    }
                }
            };

            let out = catch_unwind(AssertUnwindSafe(move || handler.invoke(input)));

            let mut i = self.inner.borrow_mut();
            match out {
                Ok(None) => {}
                Ok(Some(Step::Value(v))) => i.set_success(v),
                Ok(Some(Step::Fail(e))) => i.set_failure(e),
                Ok(Some(Step::Nested(d))) => {
                    if d.ptr_eq(self) {
                        i.set_failure(Error::msg("deferred cannot wait on itself"));
                    } else {
                        i.state = State::Success;
                        i.paused += 1;
                        i.nested = Some(Rc::downgrade(&d.inner));
                        nested = Some(d);
                    }
                }
                Err(payload) => i.set_failure(Error::from_panic(payload)),
            }
        }

        let (report, stale) = {
            let mut i = self.inner.borrow_mut();
            i.draining = false;
            let failing = i.state == State::Failure && i.paused == 0 && !i.cancelled;
            let report = if failing && !i.reported && i.unhandled.is_none() && !i.has_errback() {
                i.err.clone().map(|e| (e, i.sched.clone()))
            } else {
                None
            };
            let stale = if i.state != State::Failure {
                i.unhandled.take().map(|id| (id, i.sched.clone()))
            } else {
                None
            };
            (report, stale)
        };

        if let Some((id, sched)) = stale {
            if let Some(s) = sched.upgrade() {
                s.clear_timeout(id);
            }
        }
        if let Some(d) = nested {
            self.follow(d);
        }
        if let Some((err, sched)) = report {
            self.schedule_report(err, sched);
        }
    }

    /// Attaches the resume hook to a nested deferred and seals it.
    fn follow(&self, nested: Deferred<T>) {
        let outer = self.clone();
        nested.push(Continuation::Sink(Box::new(move |r| outer.resume(r))));
        nested.end();
    }

    fn resume(&self, outcome: Result<T, Error>) {
        {
            let mut i = self.inner.borrow_mut();
            match outcome {
                Ok(v) => i.set_success(v),
                Err(e) => i.set_failure(e),
            }
            i.paused = i.paused.saturating_sub(1);
            if i.paused == 0 {
                i.nested = None;
            }
        }
        self.fire();
    }

    fn schedule_report(&self, err: Error, sched: WeakScheduler) {
        let Some(s) = sched.upgrade() else {
            log::error!("uncaught deferred failure (scheduler gone): {err}");
            return;
        };
        log::debug!("deferred failed with no errback; reporting after this turn: {err}");
        let me = Rc::downgrade(&self.inner);
        let reporter = s.downgrade();
        let id = s.set_timeout(s.config().unhandled_delay, move || {
            if let Some(inner) = me.upgrade() {
                let mut i = inner.borrow_mut();
                i.unhandled = None;
                i.reported = true;
            }
            match reporter.upgrade() {
                Some(s) => s.report_uncaught(err),
                None => log::error!("uncaught deferred failure: {err}"),
            }
        });
        self.inner.borrow_mut().unhandled = Some(id);
    }
}

impl Scheduler {
    /// A fresh unfired deferred bound to this scheduler.
    pub fn deferred<T: 'static>(&self) -> Deferred<T> {
        Deferred::new(self)
    }
}

// tests/properties.rs
use std::{
    cell::{Cell, RefCell},
    rc::Rc,
    time::Duration,
};

use lazy_deferred::{BufferTracer, Deferred, Error, ManualClock, Scheduler, SchedulerConfig, State, Step, TickKind};

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn virtual_sched() -> (Scheduler, ManualClock) {
    let clock = ManualClock::new();
    (Scheduler::with_clock(SchedulerConfig::default(), clock.clone()), clock)
}

fn recorder() -> (Rc<RefCell<Vec<String>>>, impl Fn(String) + Clone) {
    let log = Rc::new(RefCell::new(Vec::new()));
    let l = log.clone();
    (log, move |s: String| l.borrow_mut().push(s))
}

#[test]
fn settled_deferred_runs_continuations_in_order_synchronously() {
    let (s, _) = virtual_sched();
    let (log, rec) = recorder();
    let d = s.succeed(1);

    let r = rec.clone();
    d.then(move |v| {
        r(format!("a{v}"));
        Step::Value(v + 1)
    });
    let r = rec.clone();
    d.then(move |v| {
        r(format!("b{v}"));
        Step::Value(v * 10)
    });
    assert_eq!(*log.borrow(), vec!["a1", "b2"]);
    assert_eq!(d.peek(), Some(Ok(20)));
}

#[test]
fn begin_then_calls_exactly_once() {
    let (s, _) = virtual_sched();
    let calls = Rc::new(Cell::new(0));
    let d = Deferred::new(&s);
    d.begin("x");
    let c = calls.clone();
    d.then(move |v| {
        assert_eq!(v, "x");
        c.set(c.get() + 1);
        Step::Value(v)
    });
    s.run();
    assert_eq!(calls.get(), 1);
}

#[test]
fn unhandled_raise_is_reported_after_the_turn() {
    let (s, _) = virtual_sched();
    let trace = BufferTracer::new();
    s.set_tracer(Box::new(trace.handle()));

    let d = Deferred::<()>::new(&s);
    d.raise("lost");
    assert_eq!(s.uncaught_count(), 0);
    assert!(d.has_unhandled());

    s.run();
    assert_eq!(s.take_uncaught(), vec![Error::msg("lost")]);
    assert!(trace.lines().iter().any(|l| l == "[uncaught] lost"));
}

#[test]
fn same_turn_rescue_suppresses_report() {
    let (s, _) = virtual_sched();
    let d = Deferred::<i32>::new(&s);
    d.raise("caught");
    let seen = Rc::new(RefCell::new(None));
    let sn = seen.clone();
    d.rescue(move |e| {
        *sn.borrow_mut() = Some(e);
        Step::Value(0)
    });
    s.run();
    assert_eq!(*seen.borrow(), Some(Error::msg("caught")));
    assert_eq!(s.uncaught_count(), 0);
}

#[test]
fn nested_deferred_pauses_outer_chain() {
    let (s, clock) = virtual_sched();
    let (log, rec) = recorder();

    let d = s.succeed(1);
    let s2 = s.clone();
    d.then(move |v| Step::Nested(s2.wait_value(ms(40), v + 100)));
    let r = rec.clone();
    let c = clock.clone();
    d.then(move |v| {
        r(format!("{v}@{}", c.now().as_millis()));
        Step::Value(v)
    });

    assert_eq!(d.paused(), 1);
    assert!(log.borrow().is_empty());
    s.run();
    assert_eq!(*log.borrow(), vec!["101@40"]);
    assert_eq!(d.paused(), 0);
}

#[test]
fn cancel_runs_canceller_once_and_freezes_chain() {
    let (s, _) = virtual_sched();
    let cancels = Rc::new(Cell::new(0));
    let c = cancels.clone();
    let d = Deferred::<i32>::with_canceller(&s, move || c.set(c.get() + 1));
    let ran = Rc::new(Cell::new(false));
    let r = ran.clone();
    d.then(move |v| {
        r.set(true);
        Step::Value(v)
    });
    d.cancel();
    d.cancel();
    d.begin(1);
    s.run();
    assert_eq!(cancels.get(), 1);
    assert!(!ran.get());
    assert_eq!(d.pending_continuations(), 1);
}

#[test]
fn wait_resolves_at_delay_and_cancel_prevents_it() {
    let (s, clock) = virtual_sched();

    let done = s.wait_value(ms(100), "done");
    let at = Rc::new(Cell::new(None));
    let a = at.clone();
    let c = clock.clone();
    done.then(move |v| {
        a.set(Some(c.now()));
        Step::Value(v)
    });

    let cancelled = s.wait_value(ms(100), "done");
    s.run_until(ms(10));
    cancelled.cancel();
    s.run();

    assert_eq!(done.peek(), Some(Ok("done")));
    assert_eq!(at.get(), Some(ms(100)));
    assert_eq!(cancelled.state(), State::Unfired);
}

#[test]
fn till_succeeds_before_cap_when_counter_reaches_three() {
    let (s, _) = virtual_sched();
    let counter = Rc::new(Cell::new(0));
    let c = counter.clone();
    let ticking = s.observe(
        move || {
            c.set(c.get() + 1);
            Ok(c.get() < 10)
        },
        Some(ms(10)),
    );

    let c = counter.clone();
    let d = s.till(move || Ok(c.get() >= 3), Some(ms(1000)));
    s.run();
    assert_eq!(d.peek(), Some(Ok(true)));
    assert_eq!(ticking.state(), State::Success);
}

#[test]
fn till_never_true_times_out_with_false() {
    let (s, clock) = virtual_sched();
    let d = s.till(|| Ok(false), Some(ms(50)));
    s.run();
    assert_eq!(d.peek(), Some(Ok(false)));
    assert!(clock.now() >= ms(50) && clock.now() < ms(70));
    assert_eq!(s.uncaught_count(), 0);
}

#[test]
fn observe_stops_after_third_call() {
    let (s, _) = virtual_sched();
    let calls = Rc::new(Cell::new(0));
    let c = calls.clone();
    let d = s.observe(
        move || {
            c.set(c.get() + 1);
            Ok(c.get() != 3)
        },
        Some(ms(100)),
    );
    s.run();
    assert_eq!(calls.get(), 3);
    assert_eq!(d.state(), State::Success);
}

#[test]
fn maybe_deferred_panic_does_not_escape() {
    let (s, _) = virtual_sched();
    let d: Deferred<()> = s.maybe_deferred(|| -> Step<()> { panic!("x") });
    assert_eq!(d.peek(), Some(Err(Error::Panicked("x".into()))));
    d.rescue(|_| Step::Value(()));
    s.run();
    assert_eq!(s.uncaught_count(), 0);
}

#[test]
fn spawn_result_is_seen_by_continuations_attached_afterwards() {
    for kind in [TickKind::Microtask, TickKind::Immediate, TickKind::Message, TickKind::Timer] {
        let clock = ManualClock::new();
        let s = Scheduler::with_clock(SchedulerConfig::default().with_tick_sources([kind]), clock);
        let d = s.spawn(|| Step::Value(7));
        let got = Rc::new(Cell::new(0));
        let g = got.clone();
        d.then(move |v| {
            g.set(v);
            Step::Value(v)
        });
        s.run();
        assert_eq!(got.get(), 7, "via {}", kind.as_str());
    }
}

#[test]
fn closed_port_demotes_to_timer_and_keeps_order() {
    let clock = ManualClock::new();
    let s = Scheduler::with_clock(SchedulerConfig::default().with_tick_sources([TickKind::Message]), clock);
    s.close_message_port();

    let (log, rec) = recorder();
    for tag in ["a", "b", "c"] {
        let r = rec.clone();
        s.lazy(move || r(tag.into()));
    }
    assert_eq!(s.tick_kind(), TickKind::Timer);
    s.run();
    assert_eq!(*log.borrow(), vec!["a", "b", "c"]);
}

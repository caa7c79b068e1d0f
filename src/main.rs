// src/main.rs
use std::{cell::Cell, rc::Rc, time::Duration};

use lazy_deferred::{BufferTracer, Deferred, Error, LogTracer, ManualClock, Scheduler, SchedulerConfig, Step, TickKind};

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

/// A continuation that returns a nested deferred pauses the outer chain.
fn nested_chain() {
    println!("== nested chain ==");
    let sched = Scheduler::from_env();
    sched.set_tracer(Box::new(LogTracer));

    let d = sched.spawn(|| Step::Value(2u32));
    let s2 = sched.clone();
    d.then(|v| Step::Value(v * 10))
        .then(move |v| Step::Nested(s2.wait_value(ms(20), v + 1)))
        .then(|v| {
            println!("settled with {v}");
            Step::Value(v)
        });

    sched.run();
}

/// Failures skip callbacks until an errback recovers; an unhandled one is reported.
fn failures() {
    println!("== failures ==");
    let sched = Scheduler::from_env();

    let handled: Deferred<i32> = sched.maybe_deferred(|| -> Step<i32> { panic!("boom") });
    handled
        .then(|v| {
            println!("never runs");
            Step::Value(v)
        })
        .rescue(|e| {
            println!("recovered from: {e}");
            Step::Value(0)
        });

    sched.failure::<()>("nobody listens");
    sched.run();
    for e in sched.take_uncaught() {
        println!("uncaught: {e}");
    }
}

/// `observe` and `till` on virtual time, with the trace printed at the end.
fn polling() {
    println!("== polling ==");
    let clock = ManualClock::new();
    let sched = Scheduler::with_clock(SchedulerConfig::default(), clock.clone());
    let trace = BufferTracer::new();
    sched.set_tracer(Box::new(trace.handle()));

    let polls = Rc::new(Cell::new(0u32));
    let p = polls.clone();
    let c = clock.clone();
    sched
        .observe(
            move || {
                p.set(p.get() + 1);
                println!("poll #{} at {}ms", p.get(), c.now().as_millis());
                Ok(p.get() < 3)
            },
            Some(ms(100)),
        )
        .then(|()| {
            println!("observe stopped");
            Step::Value(())
        });

    let p = polls.clone();
    let c = clock.clone();
    sched.till(move || Ok(p.get() >= 2), Some(ms(1000))).then(move |hit| {
        println!("till -> {hit} at {}ms", c.now().as_millis());
        Step::Value(hit)
    });

    let c = clock.clone();
    sched.till(|| Ok(false), Some(ms(50))).then(move |hit| {
        println!("till (never) -> {hit} at {}ms", c.now().as_millis());
        Step::Value(hit)
    });

    sched.run();
    println!("{} trace lines, last: {:?}", trace.lines().len(), trace.lines().last());
}

/// A full microtask queue demotes `lazy` to the next source without losing work.
fn demotion() {
    println!("== demotion ==");
    let cfg = SchedulerConfig::default()
        .with_tick_sources([TickKind::Microtask, TickKind::Immediate])
        .with_microtask_capacity(2);
    let sched = Scheduler::new(cfg);

    let ran = Rc::new(Cell::new(0));
    for _ in 0..5 {
        let r = ran.clone();
        sched.lazy(move || r.set(r.get() + 1));
    }
    println!("now ticking via {}", sched.tick_kind().as_str());
    sched.run();
    println!("ran {} of 5", ran.get());
}

fn cancellation() {
    println!("== cancellation ==");
    let sched = Scheduler::from_env();
    let d = sched.wait_value(ms(500), "late");
    d.then(|v| {
        println!("never prints {v}");
        Step::Value(v)
    });
    d.cancel();
    println!("pending timers after cancel: {}", sched.pending_timers());

    let d = sched.till(|| Err::<bool, _>(Error::msg("sensor offline")), None);
    d.rescue(|e| {
        println!("till rejected: {e}");
        Step::Value(false)
    });
    sched.run();
}

fn main() {
    nested_chain();
    failures();
    polling();
    demotion();
    cancellation();
}

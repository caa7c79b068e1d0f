//! # LAZY DEFERRED
//! Synchronous-when-possible deferred chains over a self-healing lazy tick.
//!
//! A [`Deferred`] is a continuation chain that drains the moment it has a
//! value, pauses while a continuation waits on a nested deferred, and reports
//! failures nobody handled. A [`Scheduler`] owns the single-threaded event
//! loop those chains are driven from: lazy ticks, timers and the uncaught
//! error sink, plus the `spawn`/`wait`/`call_later`/`observe`/`till` helpers.
//!
//! ## Architectural Principles
//! * **Synchronous when possible:** continuations on a settled, unpaused
//!   deferred run immediately, in attachment order.
//! * **Self-healing ticks:** `lazy` walks microtask, immediate, message port
//!   and timer sources; one that rejects is demoted for good.
//! * **No silent failures:** an unhandled failure is reported on the next
//!   timer turn unless an errback shows up first.
//! * **Testable time:** every wait goes through a [`Clock`]; [`ManualClock`]
//!   makes timers deterministic.

mod clock;
mod config;
mod deferred;
mod error;
mod helpers;
mod poll;
mod scheduler;
mod step;
mod tick;
mod timer;
mod trace;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SchedulerConfig;
pub use deferred::{Deferred, State};
pub use error::{Error, TickError};
pub use scheduler::{Scheduler, TickResult};
pub use step::Step;
pub use tick::TickKind;
pub use timer::{TimerId, TimerSet};
pub use trace::{BufferTracer, LogTracer, Tracer};

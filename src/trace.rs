// src/trace.rs
use std::time::Duration;

use crate::{
    error::{Error, TickError},
    tick::TickKind,
    timer::TimerId,
};

/// Scheduler event hooks. Every method defaults to a no-op.
pub trait Tracer {
    fn on_lazy(&mut self, _kind: TickKind) {}
    fn on_demote(&mut self, _from: TickKind, _to: TickKind, _err: &TickError) {}

    fn on_timer_set(&mut self, _id: TimerId, _delay: Duration) {}
    fn on_timer_cleared(&mut self, _id: TimerId) {}
    fn on_timers_fired(&mut self, _count: usize) {}

    fn on_turn(&mut self, _turn: u64, _ran: usize) {}

    /// An unhandled failure surfaced. This is the host's global error report.
    fn on_uncaught(&mut self, _err: &Error) {}
}

/// Forwards events to the `log` facade.
pub struct LogTracer;
impl Tracer for LogTracer {
    fn on_lazy(&mut self, kind: TickKind) {
        log::trace!("[lazy] via {}", kind.as_str());
    }
    fn on_demote(&mut self, from: TickKind, to: TickKind, err: &TickError) {
        log::warn!("[lazy] {} failed ({err}), falling back to {}", from.as_str(), to.as_str());
    }
    fn on_timer_set(&mut self, id: TimerId, delay: Duration) {
        log::trace!("[timer] set {} +{}ms", id.0, delay.as_millis());
    }
    fn on_timer_cleared(&mut self, id: TimerId) {
        log::trace!("[timer] cleared {}", id.0);
    }
    fn on_timers_fired(&mut self, count: usize) {
        log::debug!("[timers] fired {count}");
    }
    fn on_turn(&mut self, turn: u64, ran: usize) {
        log::trace!("[turn] {turn} ran {ran}");
    }
    fn on_uncaught(&mut self, err: &Error) {
        log::error!("[uncaught] {err}");
    }
}

/// Stores trace lines in memory instead of printing.
#[derive(Default)]
pub struct BufferTracer {
    lines: std::rc::Rc<std::cell::RefCell<Vec<String>>>,
}

impl BufferTracer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A second handle onto the same buffer, for reading after the tracer
    /// has been handed to a scheduler.
    pub fn handle(&self) -> Self {
        Self { lines: self.lines.clone() }
    }

    pub fn push(&self, s: impl Into<String>) {
        self.lines.borrow_mut().push(s.into());
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.borrow().clone()
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.lines.borrow_mut())
    }
}

impl Tracer for BufferTracer {
    fn on_lazy(&mut self, kind: TickKind) {
        self.push(format!("[lazy] {}", kind.as_str()));
    }
    fn on_demote(&mut self, from: TickKind, to: TickKind, err: &TickError) {
        self.push(format!("[demote] {} -> {} ({err})", from.as_str(), to.as_str()));
    }
    fn on_timer_set(&mut self, id: TimerId, delay: Duration) {
        self.push(format!("[timer] set {} +{}ms", id.0, delay.as_millis()));
    }
    fn on_timer_cleared(&mut self, id: TimerId) {
        self.push(format!("[timer] cleared {}", id.0));
    }
    fn on_timers_fired(&mut self, count: usize) {
        self.push(format!("[timers] fired {count}"));
    }
    fn on_uncaught(&mut self, err: &Error) {
        self.push(format!("[uncaught] {err}"));
    }
}

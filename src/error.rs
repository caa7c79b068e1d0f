// src/error.rs
use std::rc::Rc;

use thiserror::Error;

use crate::tick::TickKind;

/// Failure value carried through a deferred chain.
///
/// Cloneable so a stored failure can be re-reported asynchronously when
/// nothing handled it.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("{0}")]
    Message(String),

    /// `raise` without a reason.
    #[error("deferred raised without a reason")]
    Unspecified,

    #[error("handler panicked: {0}")]
    Panicked(String),

    /// Sentinel a poller returns to end an `observe` loop cleanly.
    #[error("polling stopped")]
    Stopped,

    #[error("cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(Rc<dyn std::error::Error + 'static>),
}

impl Error {
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Message(s.into())
    }

    pub fn other<E: std::error::Error + 'static>(e: E) -> Self {
        Error::Other(Rc::new(e))
    }

    #[inline]
    pub fn is_stop(&self) -> bool {
        matches!(self, Error::Stopped)
    }

    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let msg = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            String::from("non-string panic payload")
        };
        Error::Panicked(msg)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Message(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Message(s)
    }
}

impl From<()> for Error {
    fn from(_: ()) -> Self {
        Error::Unspecified
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Error::Message(a), Error::Message(b)) => a == b,
            (Error::Panicked(a), Error::Panicked(b)) => a == b,
            (Error::Unspecified, Error::Unspecified)
            | (Error::Stopped, Error::Stopped)
            | (Error::Cancelled, Error::Cancelled) => true,
            (Error::Other(a), Error::Other(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// A tick source refused a callback; the selector demotes past it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TickError {
    #[error("{0:?} queue is full")]
    QueueFull(TickKind),
    #[error("{0:?} port is disconnected")]
    Disconnected(TickKind),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_coerce_to_messages() {
        let e: Error = "boom".into();
        assert_eq!(e, Error::Message("boom".into()));
        assert_eq!(e.to_string(), "boom");
        assert_eq!(Error::from(()), Error::Unspecified);
    }

    #[test]
    fn panic_payloads_become_panicked() {
        let p = std::panic::catch_unwind(|| panic!("kaput")).unwrap_err();
        assert_eq!(Error::from_panic(p), Error::Panicked("kaput".into()));

        let p = std::panic::catch_unwind(|| panic!("{}-{}", 1, 2)).unwrap_err();
        assert_eq!(Error::from_panic(p), Error::Panicked("1-2".into()));
    }

    #[test]
    fn other_errors_compare_by_identity() {
        let e = Error::other(std::fmt::Error);
        let same = e.clone();
        assert_eq!(e, same);
        assert_ne!(e, Error::other(std::fmt::Error));
    }
}

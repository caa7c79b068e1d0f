// src/step.rs
use crate::{deferred::Deferred, error::Error};

/// What a continuation hands back to its chain.
pub enum Step<T> {
    /// Continue on the success path with this value.
    Value(T),
    /// Switch to the failure path.
    Fail(Error),
    /// Pause the chain until this deferred settles, then continue with its outcome.
    Nested(Deferred<T>),
}

impl<T> Step<T> {
    #[inline]
    pub fn fail(e: impl Into<Error>) -> Self {
        Step::Fail(e.into())
    }

    #[inline]
    pub fn is_nested(&self) -> bool {
        matches!(self, Step::Nested(_))
    }
}

impl<T> From<Result<T, Error>> for Step<T> {
    fn from(r: Result<T, Error>) -> Self {
        match r {
            Ok(v) => Step::Value(v),
            Err(e) => Step::Fail(e),
        }
    }
}

impl<T> From<Deferred<T>> for Step<T> {
    fn from(d: Deferred<T>) -> Self {
        Step::Nested(d)
    }
}

impl<T> From<Error> for Step<T> {
    fn from(e: Error) -> Self {
        Step::Fail(e)
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Step<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Step::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Step::Fail(e) => f.debug_tuple("Fail").field(e).finish(),
            Step::Nested(_) => f.write_str("Nested(..)"),
        }
    }
}

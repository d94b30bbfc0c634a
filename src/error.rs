use std::sync::Arc;

use thiserror::Error;

/// A rejection cause.
///
/// Causes fan out to every rejection handler downstream of a settled promise,
/// so they are reference-counted rather than cloned. Any error type can be a
/// cause; the library only ever passes them through.
pub type Cause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Settling or reporting progress on a promise that is no longer pending.
///
/// This is always a programming error on the producer side. The library never
/// recovers from it on the caller's behalf; the offending `resolve`, `reject`
/// or `report_progress` call gets it back as an `Err`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("promise {id} is already resolved")]
    AlreadyResolved { id: u64 },
    #[error("promise {id} is already rejected")]
    AlreadyRejected { id: u64 },
}

/// Misuse of a combinator, reported eagerly to the caller rather than through
/// the returned promise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CombinatorError {
    #[error("race() needs at least one promise")]
    EmptyRace,
    #[error("first() needs at least one producer")]
    EmptyFirst,
}

/// The designated cause used when a timer wait is cancelled.
///
/// Distinguishable from ordinary rejection causes via [`is_cancellation`], so
/// callers can tell "I cancelled this" apart from "it genuinely failed".
#[derive(Debug, Clone, Copy, Error)]
#[error("wait was cancelled before its condition became true")]
pub struct Cancelled;

/// Returns `true` if `cause` is the [`Cancelled`] cause.
pub fn is_cancellation(cause: &Cause) -> bool {
    cause.downcast_ref::<Cancelled>().is_some()
}

/// An ad-hoc, string-backed cause.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct Fault(pub String);

/// Builds a [`Cause`] from a message.
///
/// # Examples
///
/// ```
/// use promise_kit::{fault, Promise};
/// let p = Promise::<i32>::rejected(fault("backend unavailable"));
/// assert_eq!(p.cause().unwrap().to_string(), "backend unavailable");
/// ```
pub fn fault(msg: impl Into<String>) -> Cause {
    Arc::new(Fault(msg.into()))
}

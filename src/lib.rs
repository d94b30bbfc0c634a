//! Settle-once promises for cooperative, tick-driven programs.
//!
//! A [`Promise`] is a container for a value or failure that is not known yet.
//! Producers settle it exactly once through its [`Deferred`] facet; consumers
//! chain continuations (`then`, `map`, `and_then`, `catch`), compose many
//! promises into one ([`Promise::all`], [`Promise::race`], [`Promise::first`],
//! [`Promise::sequence`]), and wait on tick time through [`PromiseTimer`].
//!
//! Settlement is synchronous on the settling thread: `resolve`/`reject` drive
//! the entire ready downstream graph before they return. There is no executor
//! and nothing blocks; a pending promise plus its registered handlers *is*
//! the wait.
//!
//! # Examples
//!
//! ```
//! use promise_kit::{Promise, PromiseTimer};
//!
//! let mut timer = PromiseTimer::new();
//! let greeting = timer
//!     .wait_for(1.0)
//!     .map(|_| Ok("ready"))
//!     .with_name("startup delay");
//! timer.update(0.5);
//! assert!(greeting.state().is_pending());
//! timer.update(0.5);
//! assert_eq!(greeting.value(), Some("ready"));
//! ```

pub mod combinators;
pub mod error;
pub mod promise;
pub mod timer;
pub mod tracking;

pub use combinators::Producer;
pub use error::{fault, is_cancellation, Cancelled, Cause, CombinatorError, Fault, StateError};
pub use promise::{Deferred, Promise, PromiseState};
pub use timer::{PromiseTimer, TimeData};
pub use tracking::{
    on_unhandled_rejection, pending_promises, set_tracking_enabled, tracking_enabled, PendingInfo,
    UnhandledRejection,
};

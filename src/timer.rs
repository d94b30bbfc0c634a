//! A cooperative, tick-driven timer that settles promises when a time or
//! frame predicate becomes true.
//!
//! The host owns the loop and feeds elapsed seconds into
//! [`PromiseTimer::update`] once per tick; the timer reads no clock of its
//! own.

use std::sync::Arc;

use crate::error::{Cancelled, Cause};
use crate::promise::{Deferred, Promise};

/// Per-waiter view of time, recomputed on every tick before the predicate
/// runs.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimeData {
    /// Seconds since the wait started.
    pub elapsed: f64,
    /// Seconds since this waiter's predicate last ran.
    pub delta: f64,
    /// Ticks since the wait started.
    pub elapsed_updates: u32,
}

type Predicate = Box<dyn FnMut(&TimeData) -> Result<bool, Cause> + Send>;

/// One pending wait: a predicate bound to the promise it will settle.
struct Waiter {
    promise_id: u64,
    deferred: Deferred<()>,
    predicate: Predicate,
    start_time: f64,
    start_frame: u32,
    time_data: TimeData,
}

/// Waiter list advanced once per tick.
///
/// # Examples
///
/// ```
/// use promise_kit::PromiseTimer;
///
/// let mut timer = PromiseTimer::new();
/// let wait = timer.wait_for(2.0);
/// timer.update(1.0);
/// assert!(wait.state().is_pending());
/// timer.update(1.0);
/// assert!(wait.state().is_settled());
/// ```
#[derive(Default)]
pub struct PromiseTimer {
    elapsed: f64,
    frame: u32,
    waiting: Vec<Waiter>,
}

impl PromiseTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves the returned promise on the first tick where `predicate`
    /// yields `Ok(true)`. An `Err` from the predicate rejects the promise
    /// with that cause instead and drops the waiter.
    pub fn wait_until(
        &mut self,
        predicate: impl FnMut(&TimeData) -> Result<bool, Cause> + Send + 'static,
    ) -> Promise<()> {
        let (deferred, promise) = Promise::create();
        self.waiting.push(Waiter {
            promise_id: promise.id(),
            deferred,
            predicate: Box::new(predicate),
            start_time: self.elapsed,
            start_frame: self.frame,
            time_data: TimeData::default(),
        });
        promise
    }

    /// Resolves after `seconds` of tick time have accumulated.
    pub fn wait_for(&mut self, seconds: f64) -> Promise<()> {
        self.wait_until(move |t| Ok(t.elapsed >= seconds))
    }

    /// Resolves on the first tick where `predicate` stops holding.
    pub fn wait_while(
        &mut self,
        mut predicate: impl FnMut(&TimeData) -> Result<bool, Cause> + Send + 'static,
    ) -> Promise<()> {
        self.wait_until(move |t| predicate(t).map(|holds| !holds))
    }

    /// Cancels the waiter bound to `promise`, rejecting it with the
    /// [`Cancelled`] cause. Returns `false` when no waiter matches, which is
    /// the normal outcome for a promise that already settled.
    pub fn cancel(&mut self, promise: &Promise<()>) -> bool {
        let id = promise.id();
        match self.waiting.iter().position(|w| w.promise_id == id) {
            Some(index) => {
                let waiter = self.waiting.remove(index);
                let _ = waiter.deferred.reject(Arc::new(Cancelled));
                true
            }
            None => false,
        }
    }

    /// Advances the timer by `delta` seconds and one tick, then runs every
    /// still-waiting predicate against its refreshed snapshot. A waiter whose
    /// predicate returns `Ok(true)` is resolved, one whose predicate fails is
    /// rejected; both leave the list before their promise settles, so the
    /// scan never revisits a removed entry or skips its successor.
    pub fn update(&mut self, delta: f64) {
        self.elapsed += delta;
        self.frame += 1;
        let mut index = 0;
        while index < self.waiting.len() {
            let waiter = &mut self.waiting[index];
            let elapsed = self.elapsed - waiter.start_time;
            waiter.time_data.delta = elapsed - waiter.time_data.elapsed;
            waiter.time_data.elapsed = elapsed;
            waiter.time_data.elapsed_updates = self.frame - waiter.start_frame;
            match (waiter.predicate)(&waiter.time_data) {
                Err(cause) => {
                    let waiter = self.waiting.remove(index);
                    let _ = waiter.deferred.reject(cause);
                }
                Ok(true) => {
                    let waiter = self.waiting.remove(index);
                    let _ = waiter.deferred.resolve(());
                }
                Ok(false) => index += 1,
            }
        }
    }

    /// Number of waits still pending.
    pub fn waiting_count(&self) -> usize {
        self.waiting.len()
    }
}

//! Aggregate promises: `all`, `race`, `first`, `sequence`, and the `then_*`
//! sugar that runs a combinator over a collection produced by a continuation.
//!
//! Everything here is built on the public contract of [`crate::promise`];
//! no combinator reaches into promise internals.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::error::{fault, Cause, CombinatorError};
use crate::promise::{Deferred, Promise};

/// A lazily-invoked step that yields a promise when asked.
///
/// `first` and `sequence` take producers rather than promises so that work
/// only starts when its turn comes.
pub type Producer<T> = Box<dyn FnOnce() -> Promise<T> + Send>;

struct AllState<T> {
    results: Vec<Option<T>>,
    progress: Vec<f32>,
    remaining: usize,
    done: bool,
}

struct RaceState {
    progress: Vec<f32>,
    done: bool,
}

impl<T: Clone + Send + 'static> Promise<T> {
    /// Resolves when every input has resolved, with the results in input
    /// order. Rejects as soon as any input rejects, forwarding that cause;
    /// settlements arriving after that are discarded. Progress is the mean
    /// of the latest per-input progress. An empty input resolves immediately
    /// to an empty `Vec`.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_kit::Promise;
    ///
    /// let (a, pa) = Promise::<i32>::create();
    /// let (b, pb) = Promise::<i32>::create();
    /// let both = Promise::all([pa, pb]);
    /// b.resolve(2).unwrap();
    /// a.resolve(1).unwrap();
    /// assert_eq!(both.value(), Some(vec![1, 2]));
    /// ```
    pub fn all(promises: impl IntoIterator<Item = Promise<T>>) -> Promise<Vec<T>> {
        let promises: Vec<Promise<T>> = promises.into_iter().collect();
        if promises.is_empty() {
            return Promise::resolved(Vec::new());
        }
        let count = promises.len();
        let (deferred, aggregate) = Promise::create();
        let state = Arc::new(Mutex::new(AllState {
            results: (0..count).map(|_| None).collect(),
            progress: vec![0.0; count],
            remaining: count,
            done: false,
        }));
        for (index, promise) in promises.into_iter().enumerate() {
            let progress_state = state.clone();
            let progress_deferred = deferred.clone();
            promise.progress(move |amount| {
                let mean = {
                    let mut s = progress_state.lock().unwrap();
                    if s.done {
                        None
                    } else {
                        s.progress[index] = amount;
                        Some(s.progress.iter().sum::<f32>() / count as f32)
                    }
                };
                if let Some(mean) = mean {
                    let _ = progress_deferred.report_progress(mean);
                }
                Ok(())
            });
            let resolve_state = state.clone();
            let resolve_deferred = deferred.clone();
            let reject_state = state.clone();
            let reject_deferred = deferred.clone();
            promise
                .then(move |value| {
                    let completed = {
                        let mut s = resolve_state.lock().unwrap();
                        if s.done {
                            None
                        } else {
                            s.results[index] = Some(value);
                            s.remaining -= 1;
                            if s.remaining == 0 {
                                s.done = true;
                                Some(
                                    s.results
                                        .iter_mut()
                                        .filter_map(|slot| slot.take())
                                        .collect::<Vec<T>>(),
                                )
                            } else {
                                None
                            }
                        }
                    };
                    if let Some(values) = completed {
                        let _ = resolve_deferred.resolve(values);
                    }
                    Ok(())
                })
                .catch(move |cause| {
                    let first = {
                        let mut s = reject_state.lock().unwrap();
                        !std::mem::replace(&mut s.done, true)
                    };
                    if first {
                        let _ = reject_deferred.reject(cause);
                    }
                    Ok(())
                });
        }
        aggregate
    }

    /// Settles with whichever input settles first, resolution or rejection
    /// alike; every later settlement is observed but discarded. Progress is
    /// the per-input maximum. An empty input is a usage error returned
    /// eagerly, not a silently-resolved promise.
    pub fn race(
        promises: impl IntoIterator<Item = Promise<T>>,
    ) -> Result<Promise<T>, CombinatorError> {
        let promises: Vec<Promise<T>> = promises.into_iter().collect();
        if promises.is_empty() {
            return Err(CombinatorError::EmptyRace);
        }
        let count = promises.len();
        let (deferred, aggregate) = Promise::create();
        let state = Arc::new(Mutex::new(RaceState {
            progress: vec![0.0; count],
            done: false,
        }));
        for (index, promise) in promises.into_iter().enumerate() {
            let progress_state = state.clone();
            let progress_deferred = deferred.clone();
            promise.progress(move |amount| {
                let peak = {
                    let mut s = progress_state.lock().unwrap();
                    if s.done {
                        None
                    } else {
                        s.progress[index] = amount;
                        Some(s.progress.iter().fold(0.0f32, |best, &p| best.max(p)))
                    }
                };
                if let Some(peak) = peak {
                    let _ = progress_deferred.report_progress(peak);
                }
                Ok(())
            });
            let resolve_state = state.clone();
            let resolve_deferred = deferred.clone();
            let reject_state = state.clone();
            let reject_deferred = deferred.clone();
            promise
                .then(move |value| {
                    if claim(&resolve_state) {
                        let _ = resolve_deferred.resolve(value);
                    }
                    Ok(())
                })
                .catch(move |cause| {
                    if claim(&reject_state) {
                        let _ = reject_deferred.reject(cause);
                    }
                    Ok(())
                });
        }
        Ok(aggregate)
    }

    /// Tries `producers` in order, invoking each lazily: a rejection moves on
    /// to the next producer, the first resolution wins, and if every producer
    /// rejects the aggregate carries the last cause. Progress of attempt *i*
    /// fills the band `[i/n, (i+1)/n]`.
    pub fn first(producers: Vec<Producer<T>>) -> Result<Promise<T>, CombinatorError> {
        if producers.is_empty() {
            return Err(CombinatorError::EmptyFirst);
        }
        let total = producers.len();
        let (deferred, aggregate) = Promise::create();
        attempt_next(producers.into(), 0, total, deferred, None);
        Ok(aggregate)
    }

    /// Runs the continuation's collection through [`Promise::all`].
    pub fn then_all<U: Clone + Send + 'static>(
        &self,
        f: impl FnOnce(T) -> Vec<Promise<U>> + Send + 'static,
    ) -> Promise<Vec<U>> {
        self.and_then(move |value| Promise::all(f(value)))
    }

    /// Runs the continuation's collection through [`Promise::race`]. An
    /// empty collection rejects the dependent with the usage cause, since
    /// inside a continuation there is no caller left to fail fast to.
    pub fn then_race<U: Clone + Send + 'static>(
        &self,
        f: impl FnOnce(T) -> Vec<Promise<U>> + Send + 'static,
    ) -> Promise<U> {
        self.and_then(move |value| match Promise::race(f(value)) {
            Ok(aggregate) => aggregate,
            Err(usage) => Promise::rejected(Arc::new(usage)),
        })
    }

    /// Runs the continuation's producers through [`Promise::sequence`].
    pub fn then_sequence(
        &self,
        f: impl FnOnce(T) -> Vec<Producer<()>> + Send + 'static,
    ) -> Promise<()> {
        self.and_then(move |value| Promise::sequence(f(value)))
    }
}

impl Promise<()> {
    /// Chains `producers` so each step starts only after the previous one
    /// resolved. The first rejection aborts the remaining steps and carries
    /// that cause. Step *i*'s own progress fills the band `[i/n, (i+1)/n]`.
    /// An empty input resolves immediately.
    pub fn sequence(producers: Vec<Producer<()>>) -> Promise<()> {
        if producers.is_empty() {
            return Promise::resolved(());
        }
        let total = producers.len();
        let (deferred, aggregate) = Promise::create();
        run_step(producers.into(), 0, total, deferred);
        aggregate
    }
}

/// Marks the aggregate settled; `true` for whichever settlement got there
/// first.
fn claim(state: &Arc<Mutex<RaceState>>) -> bool {
    let mut s = state.lock().unwrap();
    !std::mem::replace(&mut s.done, true)
}

fn attempt_next<T: Clone + Send + 'static>(
    mut queue: VecDeque<Producer<T>>,
    index: usize,
    total: usize,
    deferred: Deferred<T>,
    last_cause: Option<Cause>,
) {
    let Some(producer) = queue.pop_front() else {
        let cause = last_cause.unwrap_or_else(|| fault("no producer resolved"));
        let _ = deferred.reject(cause);
        return;
    };
    let attempt = producer();
    let progress_deferred = deferred.clone();
    attempt.progress(move |amount| {
        let overall = (index as f32 + amount) / total as f32;
        let _ = progress_deferred.report_progress(overall);
        Ok(())
    });
    let resolve_deferred = deferred.clone();
    attempt
        .then(move |value| {
            let _ = resolve_deferred.resolve(value);
            Ok(())
        })
        .catch(move |cause| {
            attempt_next(queue, index + 1, total, deferred, Some(cause));
            Ok(())
        });
}

fn run_step(mut queue: VecDeque<Producer<()>>, index: usize, total: usize, deferred: Deferred<()>) {
    let Some(producer) = queue.pop_front() else {
        let _ = deferred.resolve(());
        return;
    };
    let step = producer();
    let progress_deferred = deferred.clone();
    step.progress(move |amount| {
        let overall = (index as f32 + amount) / total as f32;
        let _ = progress_deferred.report_progress(overall);
        Ok(())
    });
    let step_done = deferred.clone();
    step.then(move |()| {
        let _ = step_done.report_progress((index + 1) as f32 / total as f32);
        run_step(queue, index + 1, total, step_done);
        Ok(())
    })
    .catch(move |cause| {
        let _ = deferred.reject(cause);
        Ok(())
    });
}

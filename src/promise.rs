//! The settle-once promise core.
//!
//! A promise is split into two facets sharing one guarded state block, the
//! same split as a producer/consumer pair: [`Deferred`] holds the privileged
//! settle capability, [`Promise`] is the consumer surface that registers
//! continuations. Settlement is synchronous: `resolve`/`reject` drive every
//! ready continuation downstream before they return. "Waiting" is structural
//! (a pending promise plus registered handlers), never a blocked thread.

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::error::{Cause, StateError};
use crate::tracking;

/// The observable lifecycle of a promise. Monotonic: once settled, the state
/// never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseState {
    Pending,
    Resolved,
    Rejected,
}

impl PromiseState {
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn is_settled(self) -> bool {
        !self.is_pending()
    }
}

impl fmt::Display for PromiseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Resolved => f.write_str("resolved"),
            Self::Rejected => f.write_str("rejected"),
        }
    }
}

enum State<T> {
    Pending,
    Resolved(T),
    Rejected(Cause),
}

type ResolveHandler<T> = Box<dyn FnOnce(T) + Send>;
type RejectHandler = Box<dyn FnOnce(Cause) + Send>;
type ProgressHandler = Box<dyn FnMut(f32) -> Result<(), Cause> + Send>;

struct Inner<T> {
    id: u64,
    name: Option<String>,
    state: State<T>,
    resolve_handlers: Vec<ResolveHandler<T>>,
    reject_handlers: Vec<RejectHandler>,
    progress_handlers: Vec<ProgressHandler>,
}

impl<T> Inner<T> {
    fn check_pending(&self) -> Result<(), StateError> {
        match self.state {
            State::Pending => Ok(()),
            State::Resolved(_) => Err(StateError::AlreadyResolved { id: self.id }),
            State::Rejected(_) => Err(StateError::AlreadyRejected { id: self.id }),
        }
    }
}

/// The consumer facet of a promise: register continuations, read state.
///
/// Cheap to clone; every clone observes the same settlement.
///
/// # Examples
///
/// ```
/// use promise_kit::Promise;
///
/// let (deferred, promise) = Promise::<i32>::create();
/// let doubled = promise.map(|v| Ok(v * 2));
/// deferred.resolve(21).unwrap();
/// assert_eq!(doubled.value(), Some(42));
/// ```
pub struct Promise<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// The producer facet: the privileged capability to settle a promise and to
/// report progress on it.
///
/// Combinators clone one `Deferred` into both halves of a continuation pair,
/// so settlement can come from either path; the settle-once check makes sure
/// only the first attempt lands.
pub struct Deferred<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Promise<T> {
    /// Creates a pending promise, returning the settle facet alongside it.
    pub fn create() -> (Deferred<T>, Promise<T>) {
        let id = tracking::next_promise_id();
        tracking::track(id, None);
        let inner = Arc::new(Mutex::new(Inner {
            id,
            name: None,
            state: State::Pending,
            resolve_handlers: Vec::new(),
            reject_handlers: Vec::new(),
            progress_handlers: Vec::new(),
        }));
        (
            Deferred {
                inner: inner.clone(),
            },
            Promise { inner },
        )
    }

    /// An already-resolved promise carrying `value`.
    pub fn resolved(value: T) -> Promise<T> {
        Self::settled(State::Resolved(value))
    }

    /// An already-rejected promise carrying `cause`.
    pub fn rejected(cause: Cause) -> Promise<T> {
        Self::settled(State::Rejected(cause))
    }

    fn settled(state: State<T>) -> Promise<T> {
        Promise {
            inner: Arc::new(Mutex::new(Inner {
                id: tracking::next_promise_id(),
                name: None,
                state,
                resolve_handlers: Vec::new(),
                reject_handlers: Vec::new(),
                progress_handlers: Vec::new(),
            })),
        }
    }

    /// Process-unique id, assigned at construction and never reused.
    pub fn id(&self) -> u64 {
        self.inner.lock().unwrap().id
    }

    /// Diagnostic label, if one was set with [`Promise::with_name`].
    pub fn name(&self) -> Option<String> {
        self.inner.lock().unwrap().name.clone()
    }

    pub fn state(&self) -> PromiseState {
        match self.inner.lock().unwrap().state {
            State::Pending => PromiseState::Pending,
            State::Resolved(_) => PromiseState::Resolved,
            State::Rejected(_) => PromiseState::Rejected,
        }
    }

    /// The resolved value, if this promise has resolved.
    pub fn value(&self) -> Option<T> {
        match &self.inner.lock().unwrap().state {
            State::Resolved(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// The rejection cause, if this promise has rejected.
    pub fn cause(&self) -> Option<Cause> {
        match &self.inner.lock().unwrap().state {
            State::Rejected(cause) => Some(cause.clone()),
            _ => None,
        }
    }

    /// Labels this promise for diagnostics and returns it for chaining.
    pub fn with_name(&self, name: impl Into<String>) -> Promise<T> {
        let name = name.into();
        {
            let mut inner = self.inner.lock().unwrap();
            tracking::rename(inner.id, &name);
            inner.name = Some(name);
        }
        self.clone()
    }

    /// Registers one continuation pair. On a pending promise the pair is
    /// queued; on a settled one the matching half runs synchronously before
    /// this returns, with identical semantics to the queued path.
    fn register(
        &self,
        on_resolved: impl FnOnce(T) + Send + 'static,
        on_rejected: impl FnOnce(Cause) + Send + 'static,
    ) {
        let settled: Result<T, Cause> = {
            let mut guard = self.inner.lock().unwrap();
            let inner = &mut *guard;
            match &inner.state {
                State::Pending => {
                    inner.resolve_handlers.push(Box::new(on_resolved));
                    inner.reject_handlers.push(Box::new(on_rejected));
                    return;
                }
                State::Resolved(value) => Ok(value.clone()),
                State::Rejected(cause) => Err(cause.clone()),
            }
        };
        match settled {
            Ok(value) => on_resolved(value),
            Err(cause) => on_rejected(cause),
        }
    }

    /// Attaches a plain continuation. The dependent promise resolves when the
    /// continuation returns `Ok`, rejects with its `Err`, and adopts this
    /// promise's rejection if it never runs.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_kit::Promise;
    ///
    /// let (deferred, promise) = Promise::<String>::create();
    /// let chained = promise.then(|greeting| {
    ///     assert_eq!(greeting, "hi");
    ///     Ok(())
    /// });
    /// deferred.resolve("hi".into()).unwrap();
    /// assert!(chained.state().is_settled());
    /// ```
    pub fn then(
        &self,
        on_resolved: impl FnOnce(T) -> Result<(), Cause> + Send + 'static,
    ) -> Promise<()> {
        let (deferred, dependent) = Promise::create();
        let reject_side = deferred.clone();
        self.register(
            move |value| match on_resolved(value) {
                Ok(()) => {
                    let _ = deferred.resolve(());
                }
                Err(cause) => {
                    let _ = deferred.reject(cause);
                }
            },
            move |cause| {
                let _ = reject_side.reject(cause);
            },
        );
        dependent
    }

    /// Transforms the resolved value into a new one.
    pub fn map<U: Clone + Send + 'static>(
        &self,
        transform: impl FnOnce(T) -> Result<U, Cause> + Send + 'static,
    ) -> Promise<U> {
        let (deferred, dependent) = Promise::create();
        let reject_side = deferred.clone();
        self.register(
            move |value| match transform(value) {
                Ok(mapped) => {
                    let _ = deferred.resolve(mapped);
                }
                Err(cause) => {
                    let _ = deferred.reject(cause);
                }
            },
            move |cause| {
                let _ = reject_side.reject(cause);
            },
        );
        dependent
    }

    /// Chains onto a promise produced by the continuation: the dependent
    /// settles however the produced promise settles.
    pub fn and_then<U: Clone + Send + 'static>(
        &self,
        produce: impl FnOnce(T) -> Promise<U> + Send + 'static,
    ) -> Promise<U> {
        let (deferred, dependent) = Promise::create();
        let reject_side = deferred.clone();
        self.register(
            move |value| pipe(&produce(value), deferred),
            move |cause| {
                let _ = reject_side.reject(cause);
            },
        );
        dependent
    }

    /// Attaches a rejection handler that can recover with a replacement
    /// value. Resolution passes through untouched; on an already-rejected
    /// promise the handler runs immediately.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_kit::{fault, Promise};
    ///
    /// let recovered = Promise::<i32>::rejected(fault("flaky")).catch(|_| Ok(0));
    /// assert_eq!(recovered.value(), Some(0));
    /// ```
    pub fn catch(
        &self,
        on_rejected: impl FnOnce(Cause) -> Result<T, Cause> + Send + 'static,
    ) -> Promise<T> {
        let (deferred, dependent) = Promise::create();
        let reject_side = deferred.clone();
        self.register(
            move |value| {
                let _ = deferred.resolve(value);
            },
            move |cause| match on_rejected(cause) {
                Ok(replacement) => {
                    let _ = reject_side.resolve(replacement);
                }
                Err(new_cause) => {
                    let _ = reject_side.reject(new_cause);
                }
            },
        );
        dependent
    }

    /// Terminal consumption with no callbacks. A rejection arriving here is
    /// raised on the unhandled-rejection channel; with no subscribers it
    /// panics rather than vanish.
    pub fn done(&self) {
        let id = self.id();
        let name = self.name();
        self.register(
            |_| {},
            move |cause| tracking::raise_unhandled(id, name, cause),
        );
    }

    /// Terminal consumption of the resolved value. A failure returned by the
    /// callback, or a rejection of this promise, goes to the
    /// unhandled-rejection channel.
    pub fn done_with(&self, on_resolved: impl FnOnce(T) -> Result<(), Cause> + Send + 'static) {
        let id = self.id();
        let name = self.name();
        let reject_name = name.clone();
        self.register(
            move |value| {
                if let Err(cause) = on_resolved(value) {
                    tracking::raise_unhandled(id, name, cause);
                }
            },
            move |cause| tracking::raise_unhandled(id, reject_name, cause),
        );
    }

    /// Terminal consumption with an explicit rejection callback, which
    /// absorbs the cause locally. Only a failure returned by the resolved
    /// callback still reaches the unhandled-rejection channel.
    pub fn done_or(
        &self,
        on_resolved: impl FnOnce(T) -> Result<(), Cause> + Send + 'static,
        on_rejected: impl FnOnce(Cause) + Send + 'static,
    ) {
        let id = self.id();
        let name = self.name();
        self.register(
            move |value| {
                if let Err(cause) = on_resolved(value) {
                    tracking::raise_unhandled(id, name, cause);
                }
            },
            on_rejected,
        );
    }

    /// Attaches a progress observer. Observers only fire while the promise
    /// is pending; attaching to a settled promise is a no-op. Returns the
    /// same promise for chaining.
    pub fn progress(
        &self,
        on_progress: impl FnMut(f32) -> Result<(), Cause> + Send + 'static,
    ) -> Promise<T> {
        {
            let mut inner = self.inner.lock().unwrap();
            if matches!(inner.state, State::Pending) {
                inner.progress_handlers.push(Box::new(on_progress));
            }
        }
        self.clone()
    }

    /// Runs `action` exactly once when this promise settles, either way, and
    /// preserves the original settlement in the returned promise. An `Err`
    /// from the action replaces the outcome with that rejection.
    pub fn finally(
        &self,
        action: impl FnOnce() -> Result<(), Cause> + Send + 'static,
    ) -> Promise<T> {
        let (deferred, dependent) = Promise::create();
        let action: FinallyAction = Arc::new(Mutex::new(Some(Box::new(action))));
        let reject_action = action.clone();
        let reject_side = deferred.clone();
        self.register(
            move |value| match run_once(&action) {
                Ok(()) => {
                    let _ = deferred.resolve(value);
                }
                Err(cause) => {
                    let _ = deferred.reject(cause);
                }
            },
            move |cause| match run_once(&reject_action) {
                Ok(()) => {
                    let _ = reject_side.reject(cause);
                }
                Err(new_cause) => {
                    let _ = reject_side.reject(new_cause);
                }
            },
        );
        dependent
    }

    /// Runs `produce` whichever way this promise settles, discarding the
    /// outcome, and adopts the produced promise's settlement.
    pub fn continue_with<U: Clone + Send + 'static>(
        &self,
        produce: impl FnOnce() -> Promise<U> + Send + 'static,
    ) -> Promise<U> {
        let (deferred, dependent) = Promise::create();
        let produce: Arc<Mutex<Option<Box<dyn FnOnce() -> Promise<U> + Send>>>> =
            Arc::new(Mutex::new(Some(Box::new(produce))));
        let produce_on_reject = produce.clone();
        let reject_side = deferred.clone();
        self.register(
            move |_value| {
                if let Some(p) = produce.lock().unwrap().take() {
                    pipe(&p(), deferred);
                }
            },
            move |_cause| {
                if let Some(p) = produce_on_reject.lock().unwrap().take() {
                    pipe(&p(), reject_side);
                }
            },
        );
        dependent
    }
}

type FinallyAction = Arc<Mutex<Option<Box<dyn FnOnce() -> Result<(), Cause> + Send>>>>;

fn run_once(action: &FinallyAction) -> Result<(), Cause> {
    let taken = action.lock().unwrap().take();
    match taken {
        Some(action) => action(),
        None => Ok(()),
    }
}

/// Forwards `next`'s settlement into `deferred`.
fn pipe<U: Clone + Send + 'static>(next: &Promise<U>, deferred: Deferred<U>) {
    let reject_side = deferred.clone();
    next.register(
        move |value| {
            let _ = deferred.resolve(value);
        },
        move |cause| {
            let _ = reject_side.reject(cause);
        },
    );
}

impl<T: Clone + Send + 'static> Deferred<T> {
    /// Settles the promise as resolved and synchronously drives every
    /// registered continuation, in registration order.
    ///
    /// Fails with a [`StateError`] if the promise has already settled; a
    /// continuation that tries to re-settle the promise it is running under
    /// gets that error back instead of deadlocking, because the state flips
    /// before any handler runs.
    pub fn resolve(&self, value: T) -> Result<(), StateError> {
        let (id, handlers) = {
            let mut inner = self.inner.lock().unwrap();
            inner.check_pending()?;
            inner.state = State::Resolved(value.clone());
            inner.reject_handlers.clear();
            inner.progress_handlers.clear();
            (inner.id, std::mem::take(&mut inner.resolve_handlers))
        };
        tracking::untrack(id);
        for handler in handlers {
            handler(value.clone());
        }
        Ok(())
    }

    /// Settles the promise as rejected with `cause`. Same discipline as
    /// [`Deferred::resolve`].
    pub fn reject(&self, cause: Cause) -> Result<(), StateError> {
        let (id, handlers) = {
            let mut inner = self.inner.lock().unwrap();
            inner.check_pending()?;
            inner.state = State::Rejected(cause.clone());
            inner.resolve_handlers.clear();
            inner.progress_handlers.clear();
            (inner.id, std::mem::take(&mut inner.reject_handlers))
        };
        tracking::untrack(id);
        for handler in handlers {
            handler(cause.clone());
        }
        Ok(())
    }

    /// Reports progress to every observer, in registration order. Only legal
    /// while pending. An observer returning `Err` rejects this promise with
    /// that cause; observers after the failing one do not run.
    pub fn report_progress(&self, amount: f32) -> Result<(), StateError> {
        let mut handlers = {
            let mut inner = self.inner.lock().unwrap();
            inner.check_pending()?;
            std::mem::take(&mut inner.progress_handlers)
        };
        for handler in handlers.iter_mut() {
            if let Err(cause) = handler(amount) {
                let _ = self.reject(cause);
                return Ok(());
            }
        }
        let mut inner = self.inner.lock().unwrap();
        if matches!(inner.state, State::Pending) {
            // Observers attached re-entrantly while the list was out go after
            // the ones that were already registered.
            handlers.append(&mut inner.progress_handlers);
            inner.progress_handlers = handlers;
        }
        Ok(())
    }

    /// The consumer facet of this deferred's promise.
    pub fn promise(&self) -> Promise<T> {
        Promise {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock().unwrap();
        let state = match inner.state {
            State::Pending => "pending",
            State::Resolved(_) => "resolved",
            State::Rejected(_) => "rejected",
        };
        match &inner.name {
            Some(name) => write!(f, "Promise({}, {name}, {state})", inner.id),
            None => write!(f, "Promise({}, {state})", inner.id),
        }
    }
}

impl<T: Clone + Send + 'static> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Deferred({})", self.inner.lock().unwrap().id)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::error::fault;

    #[test]
    fn resolve_delivers_value_to_then() {
        let (deferred, promise) = Promise::<i32>::create();
        let seen = Arc::new(Mutex::new(None));
        let seen_in = seen.clone();
        promise.then(move |v| {
            *seen_in.lock().unwrap() = Some(v);
            Ok(())
        });
        deferred.resolve(5).unwrap();
        assert_eq!(*seen.lock().unwrap(), Some(5));
        assert_eq!(promise.state(), PromiseState::Resolved);
        assert_eq!(promise.value(), Some(5));
    }

    #[test]
    fn settling_twice_is_a_state_error() {
        let (deferred, promise) = Promise::<()>::create();
        deferred.resolve(()).unwrap();
        let id = promise.id();
        assert_eq!(
            deferred.resolve(()),
            Err(StateError::AlreadyResolved { id })
        );
        assert_eq!(deferred.reject(fault("late")), Err(StateError::AlreadyResolved { id }));
        assert_eq!(promise.state(), PromiseState::Resolved);
    }

    #[test]
    fn rejecting_then_resolving_is_a_state_error() {
        let (deferred, promise) = Promise::<i32>::create();
        deferred.reject(fault("down")).unwrap();
        let id = promise.id();
        assert_eq!(deferred.resolve(1), Err(StateError::AlreadyRejected { id }));
        assert_eq!(promise.cause().unwrap().to_string(), "down");
    }

    #[test]
    fn then_on_resolved_promise_runs_before_returning() {
        let promise = Promise::resolved(3);
        let ran = Arc::new(AtomicBool::new(false));
        let ran_in = ran.clone();
        promise.then(move |v| {
            assert_eq!(v, 3);
            ran_in.store(true, Ordering::SeqCst);
            Ok(())
        });
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn handlers_fire_in_registration_order() {
        let (deferred, promise) = Promise::<()>::create();
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["a", "b", "c"] {
            let order = order.clone();
            promise.then(move |_| {
                order.lock().unwrap().push(tag);
                Ok(())
            });
        }
        deferred.resolve(()).unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn continuation_failure_rejects_only_the_dependent() {
        let (deferred, promise) = Promise::<i32>::create();
        let dependent = promise.then(|_| Err(fault("handler blew up")));
        deferred.resolve(1).unwrap();
        assert_eq!(promise.state(), PromiseState::Resolved);
        assert_eq!(dependent.state(), PromiseState::Rejected);
        assert_eq!(dependent.cause().unwrap().to_string(), "handler blew up");
    }

    #[test]
    fn dependent_adopts_rejection_without_recovery() {
        let promise = Promise::<i32>::rejected(fault("no luck"));
        let dependent = promise.map(|v| Ok(v + 1));
        assert_eq!(dependent.state(), PromiseState::Rejected);
        assert_eq!(dependent.cause().unwrap().to_string(), "no luck");
    }

    #[test]
    fn catch_recovers_with_replacement_value() {
        let (deferred, promise) = Promise::<i32>::create();
        let recovered = promise.catch(|cause| {
            assert_eq!(cause.to_string(), "oops");
            Ok(9)
        });
        deferred.reject(fault("oops")).unwrap();
        assert_eq!(recovered.value(), Some(9));
    }

    #[test]
    fn catch_on_resolved_is_pass_through() {
        let recovered = Promise::resolved(4).catch(|_| Ok(0));
        assert_eq!(recovered.value(), Some(4));
    }

    #[test]
    fn catch_failure_becomes_new_cause() {
        let dependent = Promise::<i32>::rejected(fault("first")).catch(|_| Err(fault("second")));
        assert_eq!(dependent.cause().unwrap().to_string(), "second");
    }

    #[test]
    fn and_then_adopts_produced_promise() {
        let (outer, promise) = Promise::<i32>::create();
        let (inner, inner_promise) = Promise::<String>::create();
        let chained = promise.and_then(move |_| inner_promise.clone());
        outer.resolve(1).unwrap();
        assert!(chained.state().is_pending());
        inner.resolve("done".into()).unwrap();
        assert_eq!(chained.value(), Some("done".to_string()));
    }

    #[test]
    fn and_then_forwards_inner_rejection() {
        let chained =
            Promise::resolved(()).and_then(|_| Promise::<i32>::rejected(fault("inner")));
        assert_eq!(chained.cause().unwrap().to_string(), "inner");
    }

    #[test]
    fn progress_observers_run_in_order_while_pending() {
        let (deferred, promise) = Promise::<()>::create();
        let amounts = Arc::new(Mutex::new(Vec::new()));
        let first = amounts.clone();
        let second = amounts.clone();
        promise
            .progress(move |amount| {
                first.lock().unwrap().push(("first", amount));
                Ok(())
            })
            .progress(move |amount| {
                second.lock().unwrap().push(("second", amount));
                Ok(())
            });
        deferred.report_progress(0.25).unwrap();
        deferred.report_progress(0.75).unwrap();
        assert_eq!(
            *amounts.lock().unwrap(),
            vec![
                ("first", 0.25),
                ("second", 0.25),
                ("first", 0.75),
                ("second", 0.75)
            ]
        );
    }

    #[test]
    fn progress_after_settlement_is_a_state_error() {
        let (deferred, promise) = Promise::<()>::create();
        deferred.resolve(()).unwrap();
        let id = promise.id();
        assert_eq!(
            deferred.report_progress(0.5),
            Err(StateError::AlreadyResolved { id })
        );
    }

    #[test]
    fn failing_progress_observer_rejects_the_promise() {
        let (deferred, promise) = Promise::<()>::create();
        let later = Arc::new(AtomicBool::new(false));
        let later_in = later.clone();
        promise.progress(|_| Err(fault("bad observer")));
        promise.progress(move |_| {
            later_in.store(true, Ordering::SeqCst);
            Ok(())
        });
        deferred.report_progress(0.1).unwrap();
        assert_eq!(promise.state(), PromiseState::Rejected);
        assert_eq!(promise.cause().unwrap().to_string(), "bad observer");
        assert!(!later.load(Ordering::SeqCst));
    }

    #[test]
    fn progress_on_settled_promise_is_ignored() {
        let promise = Promise::resolved(1);
        let fired = Arc::new(AtomicBool::new(false));
        let fired_in = fired.clone();
        promise.progress(move |_| {
            fired_in.store(true, Ordering::SeqCst);
            Ok(())
        });
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[test]
    fn resettling_from_inside_a_handler_is_a_state_error() {
        let (deferred, promise) = Promise::<i32>::create();
        let observed = Arc::new(Mutex::new(None));
        let observed_in = observed.clone();
        let handle = deferred.clone();
        promise.then(move |_| {
            *observed_in.lock().unwrap() = Some(handle.resolve(99));
            Ok(())
        });
        deferred.resolve(1).unwrap();
        let id = promise.id();
        assert_eq!(
            *observed.lock().unwrap(),
            Some(Err(StateError::AlreadyResolved { id }))
        );
        assert_eq!(promise.value(), Some(1));
    }

    #[test]
    fn handler_settling_another_promise_runs_its_chain() {
        let (first, first_promise) = Promise::<()>::create();
        let (second, second_promise) = Promise::<()>::create();
        let depth = Arc::new(AtomicUsize::new(0));
        let depth_in = depth.clone();
        second_promise.then(move |_| {
            depth_in.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        first_promise.then(move |_| {
            second.resolve(()).unwrap();
            Ok(())
        });
        first.resolve(()).unwrap();
        assert_eq!(depth.load(Ordering::SeqCst), 1);
        assert_eq!(second_promise.state(), PromiseState::Resolved);
    }

    #[test]
    fn finally_runs_once_and_preserves_resolution() {
        let (deferred, promise) = Promise::<i32>::create();
        let runs = Arc::new(AtomicUsize::new(0));
        let runs_in = runs.clone();
        let finished = promise.finally(move || {
            runs_in.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        deferred.resolve(7).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(finished.value(), Some(7));
    }

    #[test]
    fn finally_preserves_rejection_cause() {
        let runs = Arc::new(AtomicUsize::new(0));
        let runs_in = runs.clone();
        let finished = Promise::<i32>::rejected(fault("original")).finally(move || {
            runs_in.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(finished.cause().unwrap().to_string(), "original");
    }

    #[test]
    fn failing_finally_action_replaces_the_outcome() {
        let finished = Promise::resolved(7).finally(|| Err(fault("cleanup failed")));
        assert_eq!(finished.cause().unwrap().to_string(), "cleanup failed");
    }

    #[test]
    fn continue_with_runs_after_rejection() {
        let continued = Promise::<i32>::rejected(fault("ignored"))
            .continue_with(|| Promise::resolved("next"));
        assert_eq!(continued.value(), Some("next"));
    }

    #[test]
    fn continue_with_adopts_produced_rejection() {
        let continued =
            Promise::resolved(1).continue_with(|| Promise::<()>::rejected(fault("next failed")));
        assert_eq!(continued.cause().unwrap().to_string(), "next failed");
    }

    #[test]
    fn done_or_absorbs_rejection_locally() {
        let (deferred, promise) = Promise::<i32>::create();
        let absorbed = Arc::new(Mutex::new(None));
        let absorbed_in = absorbed.clone();
        promise.done_or(
            |_| Ok(()),
            move |cause| {
                *absorbed_in.lock().unwrap() = Some(cause.to_string());
            },
        );
        deferred.reject(fault("handled here")).unwrap();
        assert_eq!(
            absorbed.lock().unwrap().as_deref(),
            Some("handled here")
        );
    }

    #[test]
    fn with_name_labels_the_promise() {
        let (_deferred, promise) = Promise::<()>::create();
        let named = promise.with_name("loader");
        assert_eq!(named.name().as_deref(), Some("loader"));
        assert_eq!(named.id(), promise.id());
    }

    #[test]
    fn ids_increase_monotonically() {
        let (_d1, p1) = Promise::<()>::create();
        let (_d2, p2) = Promise::<()>::create();
        assert!(p2.id() > p1.id());
    }

    #[test]
    fn deferred_promise_accessor_shares_state() {
        let (deferred, promise) = Promise::<i32>::create();
        deferred.resolve(2).unwrap();
        assert_eq!(deferred.promise().value(), Some(2));
        assert_eq!(deferred.promise().id(), promise.id());
    }
}

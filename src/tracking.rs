//! Process-wide diagnostics: promise ids, the optional pending-promise
//! tracking set, and the unhandled-rejection channel.
//!
//! All of this state is zero/empty at process start and needs no teardown.
//! Tracking is off by default; enabling it makes every promise created from
//! that point on visible in [`pending_promises`] until it settles.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;

use crate::error::Cause;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Hands out process-unique, monotonically increasing promise ids.
/// Ids are never reused; the timer relies on them for identity lookups.
pub(crate) fn next_promise_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

static TRACKING: AtomicBool = AtomicBool::new(false);

static PENDING: Lazy<Mutex<BTreeMap<u64, Option<String>>>> =
    Lazy::new(|| Mutex::new(BTreeMap::new()));

/// Turns the pending-promise tracking set on or off.
pub fn set_tracking_enabled(enabled: bool) {
    TRACKING.store(enabled, Ordering::Relaxed);
}

/// Whether pending-promise tracking is currently on.
pub fn tracking_enabled() -> bool {
    TRACKING.load(Ordering::Relaxed)
}

/// A tracked pending promise, as seen by tooling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingInfo {
    pub id: u64,
    pub name: Option<String>,
}

/// Read-only snapshot of every tracked pending promise, in id order.
pub fn pending_promises() -> Vec<PendingInfo> {
    PENDING
        .lock()
        .unwrap()
        .iter()
        .map(|(&id, name)| PendingInfo {
            id,
            name: name.clone(),
        })
        .collect()
}

pub(crate) fn track(id: u64, name: Option<String>) {
    if tracking_enabled() {
        PENDING.lock().unwrap().insert(id, name);
    }
}

pub(crate) fn untrack(id: u64) {
    if tracking_enabled() {
        PENDING.lock().unwrap().remove(&id);
    }
}

pub(crate) fn rename(id: u64, name: &str) {
    if tracking_enabled() {
        if let Some(entry) = PENDING.lock().unwrap().get_mut(&id) {
            *entry = Some(name.to_owned());
        }
    }
}

/// A rejected promise that reached terminal consumption with nothing left to
/// handle the cause.
#[derive(Debug, Clone)]
pub struct UnhandledRejection {
    pub promise_id: u64,
    pub promise_name: Option<String>,
    pub cause: Cause,
}

type Subscriber = Arc<dyn Fn(&UnhandledRejection) + Send + Sync>;

static SUBSCRIBERS: Lazy<Mutex<Vec<Subscriber>>> = Lazy::new(|| Mutex::new(Vec::new()));

/// Subscribes to unhandled rejections. Every subscriber sees every event.
pub fn on_unhandled_rejection(f: impl Fn(&UnhandledRejection) + Send + Sync + 'static) {
    SUBSCRIBERS.lock().unwrap().push(Arc::new(f));
}

/// Raises the unhandled-rejection event for one promise.
///
/// With no subscribers the failure must still surface loudly, so this panics
/// rather than dropping the cause on the floor.
pub(crate) fn raise_unhandled(id: u64, name: Option<String>, cause: Cause) {
    let subscribers: Vec<Subscriber> = SUBSCRIBERS.lock().unwrap().clone();
    if subscribers.is_empty() {
        match &name {
            Some(name) => panic!("unhandled rejection of promise {id} ({name}): {cause}"),
            None => panic!("unhandled rejection of promise {id}: {cause}"),
        }
    }
    let event = UnhandledRejection {
        promise_id: id,
        promise_name: name,
        cause,
    };
    for subscriber in &subscribers {
        subscriber(&event);
    }
}

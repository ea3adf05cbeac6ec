//! Lifecycle notifications and the per-producer subscription registry.
//!
//! Every producer (a simulator, a statistic, an experiment) owns one
//! [`EventBus`]. There is no global registry. Subscribers are plain
//! closures keyed by an event kind; publishing snapshots the subscriber
//! list first, so a callback may subscribe or unsubscribe (itself
//! included) while it runs.

use std::fmt;
use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use smallvec::SmallVec;

use crate::time::{SimTime, Timeline};

// ── Kinds and payloads ─────────────────────────────────────────────

/// Named lifecycle notifications published by a simulator.
///
/// Per replication they arrive in the order `StartReplication`, then one
/// or more `Start`/`Stop` pairs with `TimeChanged` in between, `Warmup`
/// at most once, and finally `EndReplication` after the last `Stop`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SimulatorEvent {
    /// First start of a freshly initialized replication.
    StartReplication,
    /// `start()` accepted; published on the caller's thread.
    Starting,
    /// The worker began executing.
    Start,
    /// `stop()` accepted; the worker will halt after its current unit.
    Stopping,
    /// The worker halted.
    Stop,
    /// Simulated time passed the warmup instant.
    Warmup,
    /// The replication completed.
    EndReplication,
    /// Simulated time advanced.
    TimeChanged,
}

impl SimulatorEvent {
    /// Every kind, in declaration order.
    pub const ALL: [SimulatorEvent; 8] = [
        Self::StartReplication,
        Self::Starting,
        Self::Start,
        Self::Stopping,
        Self::Stop,
        Self::Warmup,
        Self::EndReplication,
        Self::TimeChanged,
    ];
}

impl fmt::Display for SimulatorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::StartReplication => "START_REPLICATION",
            Self::Starting => "STARTING",
            Self::Start => "START",
            Self::Stopping => "STOPPING",
            Self::Stop => "STOP",
            Self::Warmup => "WARMUP",
            Self::EndReplication => "END_REPLICATION",
            Self::TimeChanged => "TIME_CHANGED",
        };
        f.write_str(s)
    }
}

/// Extra data carried by a notification.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    /// Nothing beyond kind and time.
    None,
    /// Identifies the replication the notification concerns.
    Replication {
        /// 0-based index within its experiment.
        index: usize,
        /// Replication identifier.
        id: Arc<str>,
    },
    /// A numeric observation.
    Value(f64),
}

/// A lifecycle notification stamped with the simulated time it fired at.
#[derive(Clone, Debug)]
pub struct Notification<T: Timeline> {
    /// What happened.
    pub kind: SimulatorEvent,
    /// Simulated time of publication.
    pub time: SimTime<T>,
    /// Additional data.
    pub payload: Payload,
}

impl<T: Timeline> Notification<T> {
    /// A notification with no payload.
    pub fn new(kind: SimulatorEvent, time: SimTime<T>) -> Self {
        Self {
            kind,
            time,
            payload: Payload::None,
        }
    }

    /// Attach a payload.
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }
}

// ── EventBus ───────────────────────────────────────────────────────

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How long a subscription lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SubscriptionScope {
    /// Until explicitly removed.
    Persistent,
    /// Removed when the producer clears replication-scoped listeners
    /// (a simulator does so on `initialize`).
    Replication,
}

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Subscriber<E> {
    id: SubscriptionId,
    scope: SubscriptionScope,
    callback: Callback<E>,
}

impl<E> Clone for Subscriber<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            scope: self.scope,
            callback: Arc::clone(&self.callback),
        }
    }
}

/// Subscription registry for one producer.
///
/// `K` is the producer's event-kind enum, `E` the value delivered to
/// subscribers. Subscribers of one kind are called in subscription order.
pub struct EventBus<K, E> {
    subscribers: RwLock<IndexMap<K, SmallVec<[Subscriber<E>; 4]>>>,
    next_id: AtomicU64,
}

impl<K, E> EventBus<K, E>
where
    K: Copy + Eq + Hash + fmt::Debug,
{
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(IndexMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe `callback` to `kind` until explicitly removed.
    pub fn subscribe<F>(&self, kind: K, callback: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.subscribe_scoped(kind, SubscriptionScope::Persistent, callback)
    }

    /// Subscribe with an explicit [`SubscriptionScope`].
    pub fn subscribe_scoped<F>(&self, kind: K, scope: SubscriptionScope, callback: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .write()
            .entry(kind)
            .or_default()
            .push(Subscriber {
                id,
                scope,
                callback: Arc::new(callback),
            });
        id
    }

    /// Remove one subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut map = self.subscribers.write();
        for list in map.values_mut() {
            if let Some(pos) = list.iter().position(|s| s.id == id) {
                list.remove(pos);
                return true;
            }
        }
        false
    }

    /// Remove every subscription of `scope`. Returns how many were removed.
    pub fn clear_scope(&self, scope: SubscriptionScope) -> usize {
        let mut map = self.subscribers.write();
        let mut removed = 0;
        for list in map.values_mut() {
            let before = list.len();
            list.retain(|s| s.scope != scope);
            removed += before - list.len();
        }
        removed
    }

    /// Remove every subscription.
    pub fn clear(&self) {
        self.subscribers.write().clear();
    }

    /// Number of live subscriptions for `kind`.
    pub fn subscriber_count(&self, kind: K) -> usize {
        self.subscribers.read().get(&kind).map_or(0, |l| l.len())
    }

    /// Whether `id` is still subscribed.
    pub fn is_subscribed(&self, id: SubscriptionId) -> bool {
        self.subscribers
            .read()
            .values()
            .any(|l| l.iter().any(|s| s.id == id))
    }

    /// Deliver `event` to every subscriber of `kind`.
    ///
    /// A panicking subscriber is logged and skipped; the remaining
    /// subscribers still run. Returns the number of callbacks invoked.
    pub fn publish(&self, kind: K, event: &E) -> usize {
        let snapshot: SmallVec<[Subscriber<E>; 4]> = match self.subscribers.read().get(&kind) {
            Some(list) => list.clone(),
            None => return 0,
        };
        for sub in &snapshot {
            let callback = &sub.callback;
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                tracing::error!(kind = ?kind, subscription = %sub.id, "subscriber panicked");
            }
        }
        snapshot.len()
    }
}

impl<K, E> Default for EventBus<K, E>
where
    K: Copy + Eq + Hash + fmt::Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K: fmt::Debug, E> fmt::Debug for EventBus<K, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let map = self.subscribers.read();
        let mut dbg = f.debug_map();
        for (k, v) in map.iter() {
            dbg.entry(k, &v.len());
        }
        dbg.finish()
    }
}

/// Registry of a simulator's lifecycle notifications.
pub type LifecycleBus<T> = EventBus<SimulatorEvent, Notification<T>>;

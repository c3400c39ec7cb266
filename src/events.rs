//! Entry listeners and event dispatch.
//!
//! ## Key Components
//!
//! - [`CacheEvent`] / [`EventKind`]: what happened to which entry.
//!   CREATED, UPDATED, and REMOVED are fired by the mutating operations,
//!   EXPIRED by the expiration sweeper. `clear()` fires nothing.
//! - [`EntryListener`]: the callback trait.
//! - [`ListenerConfig`]: one registration — a unique name, a dispatch
//!   mode, an optional filter, and the listener itself. Registering the
//!   same name twice is an error.
//! - [`ListenerSet`] (crate-internal): the ordered registration list plus
//!   the shared bounded worker for asynchronous dispatch.
//!
//! ## Dispatch policy
//!
//! Synchronous listeners run on the mutating thread, in registration
//! order, after the mutation is visible and before the operation returns.
//! Asynchronous listeners are handed to one bounded dispatch worker per
//! cache. A listener that panics is caught and logged; it never fails the
//! originating operation and never prevents the remaining listeners from
//! running.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Sender};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::error::CacheError;

/// Capacity of the asynchronous dispatch queue. Senders block when the
/// worker falls this far behind.
const ASYNC_QUEUE_CAPACITY: usize = 1024;

/// What happened to an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A mapping was created for a previously absent key.
    Created,
    /// An existing mapping was replaced.
    Updated,
    /// A mapping was removed by a remove-family operation.
    Removed,
    /// A mapping was removed by the expiration sweeper.
    Expired,
}

/// One entry event as seen by listeners.
#[derive(Debug, Clone)]
pub struct CacheEvent<K, V> {
    /// The kind of mutation.
    pub kind: EventKind,
    /// The affected key.
    pub key: K,
    /// The new value, for CREATED and UPDATED events.
    pub value: Option<V>,
    /// The previous value, for UPDATED, REMOVED, and EXPIRED events when
    /// it was still recoverable.
    pub old_value: Option<V>,
}

/// Receives entry events.
pub trait EntryListener<K, V>: Send + Sync {
    fn on_event(&self, event: &CacheEvent<K, V>);
}

/// Predicate deciding whether a registration sees an event.
pub type EventFilter<K, V> = Arc<dyn Fn(&CacheEvent<K, V>) -> bool + Send + Sync>;

/// How a registration's listener is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// On the mutating thread, before the operation returns.
    #[default]
    Synchronous,
    /// On the cache's dispatch worker, at some later point.
    Asynchronous,
}

/// One listener registration.
pub struct ListenerConfig<K, V> {
    name: String,
    mode: DispatchMode,
    filter: Option<EventFilter<K, V>>,
    listener: Arc<dyn EntryListener<K, V>>,
}

impl<K, V> ListenerConfig<K, V> {
    /// Creates a synchronous, unfiltered registration.
    pub fn new(name: impl Into<String>, listener: Arc<dyn EntryListener<K, V>>) -> Self {
        ListenerConfig {
            name: name.into(),
            mode: DispatchMode::Synchronous,
            filter: None,
            listener,
        }
    }

    /// Sets the dispatch mode.
    pub fn mode(mut self, mode: DispatchMode) -> Self {
        self.mode = mode;
        self
    }

    /// Restricts the registration to events accepted by `filter`.
    pub fn filter(mut self, filter: EventFilter<K, V>) -> Self {
        self.filter = Some(filter);
        self
    }

    /// The registration's unique name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

struct AsyncTask<K, V> {
    listener: Arc<dyn EntryListener<K, V>>,
    event: Arc<CacheEvent<K, V>>,
}

struct AsyncDispatcher<K, V> {
    tx: Sender<AsyncTask<K, V>>,
    worker: Option<JoinHandle<()>>,
}

/// Ordered listener registrations of one cache.
pub(crate) struct ListenerSet<K, V> {
    cache_id: String,
    registrations: RwLock<Vec<Arc<ListenerConfig<K, V>>>>,
    dispatcher: Mutex<Option<AsyncDispatcher<K, V>>>,
}

impl<K, V> ListenerSet<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub fn new(cache_id: String) -> ListenerSet<K, V> {
        ListenerSet {
            cache_id,
            registrations: RwLock::new(Vec::new()),
            dispatcher: Mutex::new(None),
        }
    }

    /// Registers a listener; rejects duplicate registration names.
    pub fn register(&self, config: ListenerConfig<K, V>) -> Result<(), CacheError> {
        let mut regs = self.registrations.write();
        if regs.iter().any(|existing| existing.name == config.name) {
            return Err(CacheError::DuplicateListener(config.name));
        }
        if config.mode == DispatchMode::Asynchronous {
            self.ensure_dispatcher();
        }
        regs.push(Arc::new(config));
        Ok(())
    }

    /// Removes a registration by name; returns whether one existed.
    pub fn deregister(&self, name: &str) -> bool {
        let mut regs = self.registrations.write();
        let before = regs.len();
        regs.retain(|reg| reg.name != name);
        regs.len() != before
    }

    /// Cheap emptiness probe so mutators can skip event construction.
    pub fn is_empty(&self) -> bool {
        self.registrations.read().is_empty()
    }

    /// Dispatches one event to every matching registration.
    ///
    /// The registration list is snapshotted first so listeners are free to
    /// register or deregister from inside their callback.
    pub fn dispatch(&self, event: CacheEvent<K, V>) {
        let regs: Vec<Arc<ListenerConfig<K, V>>> = self.registrations.read().clone();
        if regs.is_empty() {
            return;
        }
        let event = Arc::new(event);
        for reg in regs.iter() {
            if let Some(filter) = &reg.filter {
                if !filter(&event) {
                    continue;
                }
            }
            match reg.mode {
                DispatchMode::Synchronous => {
                    run_listener(&self.cache_id, &reg.name, &*reg.listener, &event);
                }
                DispatchMode::Asynchronous => {
                    let task = AsyncTask {
                        listener: Arc::clone(&reg.listener),
                        event: Arc::clone(&event),
                    };
                    let dispatcher = self.dispatcher.lock();
                    if let Some(dispatcher) = dispatcher.as_ref() {
                        if dispatcher.tx.send(task).is_err() {
                            warn!(cache = %self.cache_id, listener = %reg.name,
                                  "async dispatch worker gone, event dropped");
                        }
                    }
                }
            }
        }
    }

    fn ensure_dispatcher(&self) {
        let mut slot = self.dispatcher.lock();
        if slot.is_some() {
            return;
        }
        let (tx, rx) = bounded::<AsyncTask<K, V>>(ASYNC_QUEUE_CAPACITY);
        let cache_id = self.cache_id.clone();
        let worker = std::thread::Builder::new()
            .name(format!("shelflife-events-{cache_id}"))
            .spawn(move || {
                debug!(cache = %cache_id, "event dispatch worker started");
                for task in rx {
                    run_listener(&cache_id, "<async>", &*task.listener, &task.event);
                }
                debug!(cache = %cache_id, "event dispatch worker stopped");
            })
            .expect("failed to spawn event dispatch worker");
        *slot = Some(AsyncDispatcher {
            tx,
            worker: Some(worker),
        });
    }

    /// Stops the async worker after draining its queue. Idempotent.
    pub fn shutdown(&self) {
        let dispatcher = self.dispatcher.lock().take();
        if let Some(mut dispatcher) = dispatcher {
            drop(dispatcher.tx);
            if let Some(worker) = dispatcher.worker.take() {
                if worker.join().is_err() {
                    warn!(cache = %self.cache_id, "event dispatch worker panicked");
                }
            }
        }
    }
}

fn run_listener<K, V>(
    cache_id: &str,
    name: &str,
    listener: &dyn EntryListener<K, V>,
    event: &CacheEvent<K, V>,
) {
    let outcome = catch_unwind(AssertUnwindSafe(|| listener.on_event(event)));
    if outcome.is_err() {
        // The operation that produced the event must not fail, and later
        // listeners must still run.
        warn!(cache = %cache_id, listener = %name, "entry listener panicked");
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    struct Recording {
        seen: Mutex<Vec<(EventKind, String)>>,
    }

    impl Recording {
        fn new() -> Arc<Recording> {
            Arc::new(Recording {
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl EntryListener<String, String> for Recording {
        fn on_event(&self, event: &CacheEvent<String, String>) {
            self.seen.lock().push((event.kind, event.key.clone()));
        }
    }

    fn event(kind: EventKind, key: &str) -> CacheEvent<String, String> {
        CacheEvent {
            kind,
            key: key.to_string(),
            value: None,
            old_value: None,
        }
    }

    #[test]
    fn sync_listeners_run_in_registration_order() {
        let set: ListenerSet<String, String> = ListenerSet::new("c1".into());
        let order = Arc::new(Mutex::new(Vec::new()));

        struct Tagger {
            tag: &'static str,
            order: Arc<Mutex<Vec<&'static str>>>,
        }
        impl EntryListener<String, String> for Tagger {
            fn on_event(&self, _event: &CacheEvent<String, String>) {
                self.order.lock().push(self.tag);
            }
        }

        for tag in ["first", "second", "third"] {
            set.register(ListenerConfig::new(
                tag,
                Arc::new(Tagger {
                    tag,
                    order: Arc::clone(&order),
                }),
            ))
            .unwrap();
        }

        set.dispatch(event(EventKind::Created, "k"));
        assert_eq!(*order.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let set: ListenerSet<String, String> = ListenerSet::new("c1".into());
        set.register(ListenerConfig::new("dup", Recording::new()))
            .unwrap();
        let err = set
            .register(ListenerConfig::new("dup", Recording::new()))
            .unwrap_err();
        assert!(matches!(err, CacheError::DuplicateListener(name) if name == "dup"));
    }

    #[test]
    fn deregister_removes_by_name() {
        let set: ListenerSet<String, String> = ListenerSet::new("c1".into());
        let listener = Recording::new();
        set.register(ListenerConfig::new("l", Arc::clone(&listener) as _))
            .unwrap();
        assert!(set.deregister("l"));
        assert!(!set.deregister("l"));
        set.dispatch(event(EventKind::Created, "k"));
        assert!(listener.seen.lock().is_empty());
    }

    #[test]
    fn filter_limits_events() {
        let set: ListenerSet<String, String> = ListenerSet::new("c1".into());
        let listener = Recording::new();
        let config = ListenerConfig::new("removed-only", Arc::clone(&listener) as _)
            .filter(Arc::new(|event: &CacheEvent<String, String>| {
                event.kind == EventKind::Removed
            }));
        set.register(config).unwrap();

        set.dispatch(event(EventKind::Created, "a"));
        set.dispatch(event(EventKind::Removed, "b"));
        assert_eq!(
            *listener.seen.lock(),
            vec![(EventKind::Removed, "b".to_string())]
        );
    }

    #[test]
    fn panicking_listener_does_not_stop_the_rest() {
        let set: ListenerSet<String, String> = ListenerSet::new("c1".into());

        struct Exploding;
        impl EntryListener<String, String> for Exploding {
            fn on_event(&self, _event: &CacheEvent<String, String>) {
                panic!("listener bug");
            }
        }

        let survivor = Recording::new();
        set.register(ListenerConfig::new("exploding", Arc::new(Exploding)))
            .unwrap();
        set.register(ListenerConfig::new("survivor", Arc::clone(&survivor) as _))
            .unwrap();

        set.dispatch(event(EventKind::Updated, "k"));
        assert_eq!(
            *survivor.seen.lock(),
            vec![(EventKind::Updated, "k".to_string())]
        );
    }

    #[test]
    fn async_listener_eventually_receives() {
        let set: ListenerSet<String, String> = ListenerSet::new("c1".into());
        let listener = Recording::new();
        set.register(
            ListenerConfig::new("async", Arc::clone(&listener) as _)
                .mode(DispatchMode::Asynchronous),
        )
        .unwrap();

        set.dispatch(event(EventKind::Created, "k"));

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while listener.seen.lock().is_empty() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(
            *listener.seen.lock(),
            vec![(EventKind::Created, "k".to_string())]
        );
        set.shutdown();
    }
}

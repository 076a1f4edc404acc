//! In-process event bus.
//!
//! Two ways to listen:
//!
//! - `on(kind, handler)` registers a synchronous callback, run before
//!   `emit` returns. The returned [`Unsubscribe`] detaches it when called
//!   or dropped.
//! - `subscribe(pattern)` returns a broadcast-backed [`EventSubscription`]
//!   for async consumers, filtered by subject (`disk.create`, `disk.*`,
//!   `disk.>`).

use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;

use scriptorium_types::{DiskEvent, DiskId, EventKind, EventOrigin};

/// Synchronous event callback.
pub type Handler = Arc<dyn Fn(&DiskEvent, EventOrigin) + Send + Sync>;

/// An event as delivered to async subscribers.
#[derive(Clone, Debug)]
pub struct Delivered {
    pub disk_id: DiskId,
    pub subject: &'static str,
    pub origin: EventOrigin,
    pub event: DiskEvent,
}

impl Delivered {
    pub fn is_local(&self) -> bool {
        self.origin == EventOrigin::Local
    }

    pub fn is_remote(&self) -> bool {
        self.origin == EventOrigin::Remote
    }
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: Vec<(u64, EventKind, Handler)>,
}

struct BusInner {
    disk_id: DiskId,
    registry: RwLock<Registry>,
    tx: broadcast::Sender<Delivered>,
}

/// Event bus scoped to one disk instance.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("disk_id", &self.inner.disk_id)
            .field("handlers", &self.inner.registry.read().handlers.len())
            .field("subscribers", &self.inner.tx.receiver_count())
            .finish()
    }
}

impl EventBus {
    pub fn new(disk_id: DiskId, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(BusInner {
                disk_id,
                registry: RwLock::new(Registry::default()),
                tx,
            }),
        }
    }

    /// Register a callback for one event kind.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> Unsubscribe
    where
        F: Fn(&DiskEvent, EventOrigin) + Send + Sync + 'static,
    {
        let mut registry = self.inner.registry.write();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.handlers.push((id, kind, Arc::new(handler)));
        Unsubscribe {
            bus: Arc::downgrade(&self.inner),
            id,
            armed: true,
        }
    }

    /// Async subscription filtered by subject pattern.
    pub fn subscribe(&self, pattern: &str) -> EventSubscription {
        EventSubscription {
            pattern: pattern.to_string(),
            rx: self.inner.tx.subscribe(),
        }
    }

    /// Deliver to matching callbacks, then to async subscribers.
    ///
    /// Returns the number of callbacks run.
    pub fn emit(&self, event: &DiskEvent, origin: EventOrigin) -> usize {
        let kind = event.kind();
        // Clone handlers out so a callback may (un)subscribe without deadlock
        let matching: Vec<Handler> = self
            .inner
            .registry
            .read()
            .handlers
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .map(|(_, _, h)| h.clone())
            .collect();

        for handler in &matching {
            handler(event, origin);
        }

        let _ = self.inner.tx.send(Delivered {
            disk_id: self.inner.disk_id.clone(),
            subject: event.subject(),
            origin,
            event: event.clone(),
        });

        tracing::trace!(
            disk_id = %self.inner.disk_id,
            subject = event.subject(),
            ?origin,
            handlers = matching.len(),
            "event emitted"
        );
        matching.len()
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.inner
            .registry
            .read()
            .handlers
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .count()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.tx.receiver_count()
    }

    /// Drop every callback.
    pub fn clear(&self) {
        self.inner.registry.write().handlers.clear();
    }
}

/// Detaches a callback registered with [`EventBus::on`].
#[must_use = "dropping an Unsubscribe detaches the handler immediately"]
pub struct Unsubscribe {
    bus: Weak<BusInner>,
    id: u64,
    armed: bool,
}

impl Unsubscribe {
    pub fn unsubscribe(mut self) {
        self.detach();
    }

    /// Keep the handler registered until the bus is cleared.
    pub fn forget(mut self) {
        self.armed = false;
    }

    fn detach(&mut self) {
        if !self.armed {
            return;
        }
        self.armed = false;
        if let Some(bus) = self.bus.upgrade() {
            bus.registry.write().handlers.retain(|(id, _, _)| *id != self.id);
        }
    }
}

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("id", &self.id)
            .field("armed", &self.armed)
            .finish()
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// Check if a subject matches a pattern.
///
/// Dot-separated tokens; `*` matches exactly one token, `>` (last token
/// only) matches one or more.
pub fn matches_pattern(pattern: &str, subject: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let subject: Vec<&str> = subject.split('.').collect();

    for (i, token) in pattern.iter().enumerate() {
        match *token {
            ">" => return i == pattern.len() - 1 && i < subject.len(),
            "*" if i < subject.len() => {}
            t if subject.get(i) == Some(&t) => {}
            _ => return false,
        }
    }
    pattern.len() == subject.len()
}

/// Async subscription to an [`EventBus`].
pub struct EventSubscription {
    pattern: String,
    rx: broadcast::Receiver<Delivered>,
}

impl EventSubscription {
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Next matching event; `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Delivered> {
        loop {
            match self.rx.recv().await {
                Ok(msg) if matches_pattern(&self.pattern, msg.subject) => return Some(msg),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(pattern = %self.pattern, lagged = n, "event subscription lagged behind");
                }
            }
        }
    }

    /// Next matching event if one is queued.
    pub fn try_recv(&mut self) -> Option<Delivered> {
        loop {
            match self.rx.try_recv() {
                Ok(msg) if matches_pattern(&self.pattern, msg.subject) => return Some(msg),
                Ok(_) => {}
                Err(broadcast::error::TryRecvError::Empty)
                | Err(broadcast::error::TryRecvError::Closed) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    tracing::warn!(pattern = %self.pattern, lagged = n, "event subscription lagged behind");
                }
            }
        }
    }
}

impl std::fmt::Debug for EventSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSubscription")
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use scriptorium_types::AbsPath;

    fn bus() -> EventBus {
        EventBus::new(DiskId::from_string("test-disk"), 16)
    }

    #[test]
    fn test_pattern_matching() {
        assert!(matches_pattern("disk.*", "disk.create"));
        assert!(matches_pattern("disk.>", "disk.create"));
        assert!(matches_pattern("disk.create", "disk.create"));
        assert!(!matches_pattern("disk.create", "disk.delete"));
        assert!(!matches_pattern("disk.*", "disk"));
        assert!(!matches_pattern("disk", "disk.create"));
    }

    #[test]
    fn test_on_filters_by_kind() {
        let bus = bus();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = bus.on(EventKind::Create, move |event, origin| {
            sink.lock().push((event.clone(), origin));
        });

        bus.emit(&DiskEvent::delete(vec![AbsPath::new("/x.md")]), EventOrigin::Local);
        let created = DiskEvent::create(vec![AbsPath::new("/y.md")]);
        assert_eq!(bus.emit(&created, EventOrigin::Remote), 1);

        assert_eq!(*seen.lock(), vec![(created, EventOrigin::Remote)]);
    }

    #[test]
    fn test_unsubscribe_and_drop_detach() {
        let bus = bus();
        let first = bus.on(EventKind::Delete, |_, _| {});
        {
            let _scoped = bus.on(EventKind::Delete, |_, _| {});
            assert_eq!(bus.handler_count(EventKind::Delete), 2);
        }
        assert_eq!(bus.handler_count(EventKind::Delete), 1);
        first.unsubscribe();
        assert_eq!(bus.handler_count(EventKind::Delete), 0);

        bus.on(EventKind::Delete, |_, _| {}).forget();
        assert_eq!(bus.handler_count(EventKind::Delete), 1);
        bus.clear();
        assert_eq!(bus.handler_count(EventKind::Delete), 0);
    }

    #[test]
    fn test_handler_may_unsubscribe_itself() {
        let bus = bus();
        let slot: Arc<Mutex<Option<Unsubscribe>>> = Arc::new(Mutex::new(None));
        let inner = slot.clone();
        let sub = bus.on(EventKind::Create, move |_, _| {
            inner.lock().take();
        });
        *slot.lock() = Some(sub);

        bus.emit(&DiskEvent::create(vec![]), EventOrigin::Local);
        assert_eq!(bus.handler_count(EventKind::Create), 0);
    }

    #[tokio::test]
    async fn test_subscription_pattern() {
        let bus = bus();
        let mut sub = bus.subscribe("disk.delete");

        bus.emit(&DiskEvent::create(vec![AbsPath::new("/a.md")]), EventOrigin::Local);
        bus.emit(&DiskEvent::delete(vec![AbsPath::new("/b.md")]), EventOrigin::Local);

        let msg = sub.recv().await.unwrap();
        assert_eq!(msg.subject, "disk.delete");
        assert!(msg.is_local());
        assert!(sub.try_recv().is_none());
    }
}

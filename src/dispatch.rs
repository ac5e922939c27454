//! Fan-out of decoded events to registered callbacks.

use crate::notification::{ChangeEvent, EventKind};
use crate::subscription::EventReceiver;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;

const EVENT_CHANNEL_SIZE: usize = 100;

/// Error a callback may return; it is logged and otherwise ignored
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Notification callback
///
/// Runs on the listen task of the service that received the event, so it should
/// return quickly.
pub type Callback = Arc<dyn Fn(&ChangeEvent) -> std::result::Result<(), BoxError> + Send + Sync>;

/// Wrap a closure as a [`Callback`]
pub fn callback<F>(f: F) -> Callback
where
    F: Fn(&ChangeEvent) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Callback registry plus the event broadcast channel of one device
pub struct Dispatcher {
    callbacks: RwLock<HashMap<EventKind, Vec<Callback>>>,
    updates: broadcast::Sender<ChangeEvent>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            callbacks: RwLock::new(HashMap::new()),
            updates,
        }
    }

    pub fn register(&self, kind: EventKind, callback: Callback) {
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push(callback);
    }

    pub fn clear(&self) {
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn has_callbacks(&self, kind: EventKind) -> bool {
        self.callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .is_some_and(|c| !c.is_empty())
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver::new(self.updates.subscribe())
    }

    /// Deliver one event
    ///
    /// Every callback registered for the event's kind is invoked; without any, the
    /// fallback is. Subscribers get the event after the callbacks ran. Returns the
    /// number of invocations made. Failing or panicking callbacks are logged and do
    /// not stop delivery to the others.
    pub fn dispatch(&self, event: &ChangeEvent, fallback: Option<&Callback>) -> usize {
        let invoked = self.invoke_callbacks(event, fallback);
        // no subscribers is fine
        let _ = self.updates.send(event.clone());
        invoked
    }

    fn invoke_callbacks(&self, event: &ChangeEvent, fallback: Option<&Callback>) -> usize {
        let kind = event.kind();
        let matched: Vec<Callback> = self
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .cloned()
            .unwrap_or_default();

        if matched.is_empty() {
            return match fallback {
                Some(fallback) => {
                    invoke(fallback, event);
                    1
                }
                None => {
                    tracing::debug!("No callbacks for {:?}, dropping event", kind);
                    0
                }
            };
        }

        for callback in &matched {
            invoke(callback, event);
        }
        matched.len()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn invoke(callback: &Callback, event: &ChangeEvent) {
    match catch_unwind(AssertUnwindSafe(|| callback(event))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!("Callback for {:?} failed: {}", event.kind(), e),
        Err(_) => tracing::error!("Callback for {:?} panicked", event.kind()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Power;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, Callback) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();
        let cb = callback(move |_| {
            inner.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        (count, cb)
    }

    fn power_event() -> ChangeEvent {
        ChangeEvent::Power(Power {
            status: Some("active".to_string()),
            standby_detail: None,
        })
    }

    #[test]
    fn test_dispatch_by_kind() {
        let dispatcher = Dispatcher::new();
        let (power_count, power_cb) = counter();
        let (volume_count, volume_cb) = counter();
        dispatcher.register(EventKind::Power, power_cb);
        dispatcher.register(EventKind::Volume, volume_cb);

        assert_eq!(dispatcher.dispatch(&power_event(), None), 1);
        assert_eq!(power_count.load(Ordering::SeqCst), 1);
        assert_eq!(volume_count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_fallback_only_without_callbacks() {
        let dispatcher = Dispatcher::new();
        let (power_count, power_cb) = counter();
        let (fallback_count, fallback) = counter();
        dispatcher.register(EventKind::Power, power_cb);

        dispatcher.dispatch(&power_event(), Some(&fallback));
        assert_eq!(fallback_count.load(Ordering::SeqCst), 0);

        let raw = ChangeEvent::Raw(json!({"x": 1}));
        assert_eq!(dispatcher.dispatch(&raw, Some(&fallback)), 1);
        assert_eq!(fallback_count.load(Ordering::SeqCst), 1);
        assert_eq!(power_count.load(Ordering::SeqCst), 1);

        assert_eq!(dispatcher.dispatch(&raw, None), 0);
    }

    #[test]
    fn test_failing_callbacks_do_not_block_others() {
        let dispatcher = Dispatcher::new();
        dispatcher.register(EventKind::Power, callback(|_| Err("nope".into())));
        dispatcher.register(EventKind::Power, callback(|_| panic!("boom")));
        let (count, cb) = counter();
        dispatcher.register(EventKind::Power, cb);

        assert_eq!(dispatcher.dispatch(&power_event(), None), 3);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clear() {
        let dispatcher = Dispatcher::new();
        let (_, cb) = counter();
        dispatcher.register(EventKind::Power, cb);
        assert!(dispatcher.has_callbacks(EventKind::Power));
        dispatcher.clear();
        assert!(!dispatcher.has_callbacks(EventKind::Power));
    }

    #[tokio::test]
    async fn test_subscribers_see_every_event() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.subscribe();
        dispatcher.dispatch(&power_event(), None);
        assert_eq!(rx.recv().await.unwrap(), power_event());
        assert!(rx.try_recv().unwrap().is_none());
    }
}

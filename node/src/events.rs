//! Local delivery of mesh events.
//!
//! Every event the node observes, its own and relayed ones, is handed to
//! the [`EventBus`] exactly once before flooding continues. Listeners run
//! inline on the delivering task; keep them fast. Workers that prefer to
//! block can use [`EventBus::wait_for`] instead.

use serde_json::Value;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, watch};

use crate::shutdown::wait_for_shutdown;

type Listener = Arc<dyn Fn(&str, &Value) + Send + Sync>;

const WAKE_CAPACITY: usize = 256;

/// An event as seen by local subscribers.
#[derive(Clone, Debug, PartialEq)]
pub struct DeliveredEvent {
    pub event_type: String,
    pub data: Value,
}

/// Why [`EventBus::wait_for`] returned.
#[derive(Clone, Debug, PartialEq)]
pub enum Wake {
    Event(DeliveredEvent),
    Fallback,
    Shutdown,
}

pub struct EventBus {
    listeners: RwLock<Vec<Listener>>,
    wake: broadcast::Sender<DeliveredEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (wake, _) = broadcast::channel(WAKE_CAPACITY);
        Self {
            listeners: RwLock::new(Vec::new()),
            wake,
        }
    }

    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(listener));
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Invoke every listener, then wake any waiting workers.
    pub fn emit(&self, event_type: &str, data: &Value) {
        // Cloned out so a listener may subscribe without deadlocking.
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in &listeners {
            listener(event_type, data);
        }
        // No waiting worker is fine.
        let _ = self.wake.send(DeliveredEvent {
            event_type: event_type.to_string(),
            data: data.clone(),
        });
    }

    /// Block until an event of `event_type` is delivered, `fallback`
    /// elapses, or `shutdown` fires, whichever comes first.
    ///
    /// Meant for worker loops that poll on a timer but want to react early
    /// when the relevant event shows up.
    pub async fn wait_for(
        &self,
        event_type: &str,
        fallback: Duration,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Wake {
        let mut rx = self.wake.subscribe();
        let timer = tokio::time::sleep(fallback);
        tokio::pin!(timer);
        loop {
            tokio::select! {
                biased;
                _ = wait_for_shutdown(shutdown) => return Wake::Shutdown,
                received = rx.recv() => match received {
                    Ok(event) if event.event_type == event_type => return Wake::Event(event),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "event waiter lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return Wake::Shutdown,
                },
                _ = &mut timer => return Wake::Fallback,
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::ShutdownController;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn listeners_see_every_event() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        bus.subscribe(move |event_type, data| {
            assert_eq!(event_type, "entity_created");
            assert_eq!(data, &json!({ "id": 1 }));
            counter.fetch_add(1, Ordering::SeqCst);
        });
        bus.emit("entity_created", &json!({ "id": 1 }));
        bus.emit("entity_created", &json!({ "id": 1 }));
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(bus.listener_count(), 1);
    }

    #[tokio::test]
    async fn wait_for_wakes_on_matching_event() {
        let bus = Arc::new(EventBus::new());
        let controller = ShutdownController::new();
        let mut shutdown = controller.subscribe();

        let emitter = Arc::clone(&bus);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            emitter.emit("other", &Value::Null);
            emitter.emit("schema_changed", &json!("v2"));
        });

        let wake = bus
            .wait_for("schema_changed", Duration::from_secs(10), &mut shutdown)
            .await;
        assert_eq!(
            wake,
            Wake::Event(DeliveredEvent {
                event_type: "schema_changed".into(),
                data: json!("v2"),
            })
        );
    }

    #[tokio::test]
    async fn wait_for_falls_back_on_timer() {
        let bus = EventBus::new();
        let controller = ShutdownController::new();
        let mut shutdown = controller.subscribe();
        let wake = bus
            .wait_for("never", Duration::from_millis(10), &mut shutdown)
            .await;
        assert_eq!(wake, Wake::Fallback);
    }

    #[tokio::test]
    async fn wait_for_honors_shutdown() {
        let bus = EventBus::new();
        let controller = ShutdownController::new();
        let mut shutdown = controller.subscribe();
        controller.shutdown();
        let wake = bus
            .wait_for("never", Duration::from_secs(10), &mut shutdown)
            .await;
        assert_eq!(wake, Wake::Shutdown);
    }
}

//! Subscriber registry shared by every bus endpoint
//!
//! Each subscriber owns a thread draining its own channel, so a handler never
//! runs on the publisher's thread and a slow handler only delays itself.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, warn};

use super::messages::{Action, Envelope, Message};

/// Callback invoked for each message on a subscribed action
pub type Handler = Box<dyn FnMut(Message) + Send + 'static>;

struct Subscriber {
    id: u64,
    action: Action,
    tx: mpsc::Sender<Message>,
}

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Clone, Default)]
pub struct Dispatcher {
    registry: Arc<Registry>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, action: Action, mut handler: Handler) -> Subscription {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel::<Message>();

        std::thread::spawn(move || {
            for message in rx {
                handler(message);
            }
            debug!(subscriber = id, "Subscriber thread finished");
        });

        self.registry.lock().push(Subscriber { id, action, tx });
        debug!(subscriber = id, action = action.as_str(), "Subscribed");

        Subscription {
            registry: Arc::downgrade(&self.registry),
            id,
        }
    }

    /// Decode and hand the envelope to every subscriber of its action
    ///
    /// Returns how many subscribers received it. Undecodable envelopes are
    /// logged and dropped.
    pub fn dispatch(&self, envelope: Envelope) -> usize {
        let action = envelope.action;
        let message = match Message::from_envelope(envelope) {
            Ok(message) => message,
            Err(e) => {
                warn!(action = action.as_str(), error = %e, "Dropping undecodable message");
                return 0;
            }
        };

        let mut subscribers = self.registry.lock();
        let mut delivered = 0;
        subscribers.retain(|sub| {
            if sub.action != action {
                return true;
            }
            let alive = sub.tx.send(message.clone()).is_ok();
            delivered += usize::from(alive);
            alive
        });

        if delivered == 0 {
            debug!(action = action.as_str(), kind = message.kind(), "No subscriber for message");
        }
        delivered
    }

    pub fn has_subscribers(&self, action: Action) -> bool {
        self.registry.lock().iter().any(|sub| sub.action == action)
    }
}

/// Registration handle; dropping it unsubscribes
///
/// Messages already queued for the handler are still delivered before its
/// thread exits.
pub struct Subscription {
    registry: Weak<Registry>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.lock().retain(|sub| sub.id != self.id);
            debug!(subscriber = self.id, "Unsubscribed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn collector() -> (Handler, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel();
        let handler: Handler = Box::new(move |msg| {
            let _ = tx.send(msg);
        });
        (handler, rx)
    }

    #[test]
    fn test_delivers_only_to_matching_action() {
        let dispatcher = Dispatcher::new();
        let (worker_handler, worker_rx) = collector();
        let (ctrl_handler, ctrl_rx) = collector();
        let _w = dispatcher.subscribe(Action::Worker, worker_handler);
        let _c = dispatcher.subscribe(Action::Controller, ctrl_handler);

        assert_eq!(dispatcher.dispatch(Message::StateRunning.into_envelope()), 1);

        let got = ctrl_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(got, Message::StateRunning);
        assert!(worker_rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_fan_out_to_every_subscriber() {
        let dispatcher = Dispatcher::new();
        let (h1, rx1) = collector();
        let (h2, rx2) = collector();
        let _s1 = dispatcher.subscribe(Action::Controller, h1);
        let _s2 = dispatcher.subscribe(Action::Controller, h2);

        assert_eq!(dispatcher.dispatch(Message::StopSuccess.into_envelope()), 2);
        assert_eq!(rx1.recv_timeout(Duration::from_secs(2)).unwrap(), Message::StopSuccess);
        assert_eq!(rx2.recv_timeout(Duration::from_secs(2)).unwrap(), Message::StopSuccess);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let dispatcher = Dispatcher::new();
        let (handler, _rx) = collector();
        let sub = dispatcher.subscribe(Action::Worker, handler);
        assert!(dispatcher.has_subscribers(Action::Worker));

        sub.unsubscribe();
        assert!(!dispatcher.has_subscribers(Action::Worker));
        assert_eq!(dispatcher.dispatch(Message::Start.into_envelope()), 0);
    }

    #[test]
    fn test_undecodable_envelope_dropped() {
        let dispatcher = Dispatcher::new();
        let (handler, rx) = collector();
        let _s = dispatcher.subscribe(Action::Controller, handler);

        let envelope = Envelope {
            action: Action::Controller,
            kind: 4242,
            payload: None,
        };
        assert_eq!(dispatcher.dispatch(envelope), 0);
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }
}

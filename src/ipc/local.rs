//! In-process bus for a controller and worker sharing one process

use tracing::trace;

use super::dispatch::{Dispatcher, Handler, Subscription};
use super::messages::{Action, Envelope};
use super::Bus;

#[derive(Clone, Default)]
pub struct LocalBus {
    dispatcher: Dispatcher,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Bus for LocalBus {
    fn publish(&self, envelope: Envelope) {
        trace!(action = envelope.action.as_str(), kind = envelope.kind, "Local publish");
        self.dispatcher.dispatch(envelope);
    }

    fn subscribe(&self, action: Action, handler: Handler) -> Subscription {
        self.dispatcher.subscribe(action, handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::Message;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_send_reaches_subscriber_on_another_thread() {
        let bus = LocalBus::new();
        let (tx, rx) = mpsc::channel();
        let _sub = bus.subscribe(
            Action::Worker,
            Box::new(move |msg| {
                let _ = tx.send((msg, std::thread::current().id()));
            }),
        );

        bus.send(Message::MeasureConfig("g1".to_string()));

        let (msg, thread) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(msg, Message::MeasureConfig("g1".to_string()));
        assert_ne!(thread, std::thread::current().id());
    }

    #[test]
    fn test_send_without_subscriber_is_silent() {
        let bus = LocalBus::new();
        bus.send(Message::StateRunning);
    }
}

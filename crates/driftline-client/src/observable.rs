//! Multi-subscriber event stream on top of the socket service.
//!
//! The observable registers exactly one listener with the service, and
//! only while someone is subscribed: the first subscription registers it,
//! the last unsubscribe removes it. Lifecycle callbacks are translated
//! into synthetic events so subscribers consume a single vocabulary.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use driftline_core::{ChatError, ChatEvent};

use crate::listener::SocketListener;
use crate::service::ChatSocketService;

type EventCallback = Arc<dyn Fn(&ChatEvent) + Send + Sync>;

struct SubscriberSet {
    next_id: u64,
    callbacks: Vec<(u64, EventCallback)>,
    forwarder: Option<Arc<dyn SocketListener>>,
}

struct ObservableInner {
    service: ChatSocketService,
    subs: Mutex<SubscriberSet>,
}

/// Reference-counted fan-out of all connection events.
#[derive(Clone)]
pub struct ChatObservable {
    inner: Arc<ObservableInner>,
}

impl ChatObservable {
    pub fn new(service: &ChatSocketService) -> Self {
        Self {
            inner: Arc::new(ObservableInner {
                service: service.clone(),
                subs: Mutex::new(SubscriberSet {
                    next_id: 0,
                    callbacks: Vec::new(),
                    forwarder: None,
                }),
            }),
        }
    }

    /// Register a callback for every event, including synthetic lifecycle
    /// ones. Callbacks run on the service's delivery task and see events
    /// in arrival order.
    pub fn subscribe(
        &self,
        callback: impl Fn(&ChatEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let mut subs = self.inner.subs.lock();
        if subs.forwarder.is_none() {
            let forwarder: Arc<dyn SocketListener> = Arc::new(Forwarder {
                target: Arc::downgrade(&self.inner),
            });
            self.inner.service.add_listener(forwarder.clone());
            subs.forwarder = Some(forwarder);
        }
        let id = subs.next_id;
        subs.next_id += 1;
        subs.callbacks.push((id, Arc::new(callback)));
        Subscription {
            target: Arc::downgrade(&self.inner),
            id,
        }
    }
}

/// Handle for one subscription.
pub struct Subscription {
    target: Weak<ObservableInner>,
    id: u64,
}

impl Subscription {
    /// Remove the callback. Idempotent: subscription ids are never
    /// reused, so a second call finds nothing to remove.
    pub fn unsubscribe(&self) {
        let Some(inner) = self.target.upgrade() else {
            return;
        };
        let forwarder = {
            let mut subs = inner.subs.lock();
            subs.callbacks.retain(|(id, _)| *id != self.id);
            if subs.callbacks.is_empty() {
                subs.forwarder.take()
            } else {
                None
            }
        };
        if let Some(forwarder) = forwarder {
            inner.service.remove_listener(&forwarder);
        }
    }
}

/// The one listener the observable registers with the service.
struct Forwarder {
    target: Weak<ObservableInner>,
}

impl Forwarder {
    fn emit(&self, event: &ChatEvent) {
        let Some(inner) = self.target.upgrade() else {
            return;
        };
        // copy out of the lock so a callback can subscribe or unsubscribe
        let callbacks: Vec<EventCallback> = inner
            .subs
            .lock()
            .callbacks
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        drop(inner);
        for callback in callbacks {
            callback(event);
        }
    }
}

impl SocketListener for Forwarder {
    fn on_connecting(&self) {
        self.emit(&ChatEvent::connecting());
    }

    fn on_connected(&self, event: &ChatEvent) {
        self.emit(event);
    }

    fn on_disconnected(&self) {
        self.emit(&ChatEvent::disconnected());
    }

    fn on_error(&self, error: &ChatError) {
        self.emit(&ChatEvent::connection_error(error.clone()));
    }

    fn on_event(&self, event: &ChatEvent) {
        self.emit(event);
    }
}

use driftline_core::{ChatError, ChatEvent};

/// Callback surface for socket lifecycle and inbound events.
///
/// Every method has a no-op default so implementations subscribe only to
/// what they care about. Callbacks are invoked from the service's single
/// delivery task: never concurrently with themselves, never on an I/O
/// task, and always in transport arrival order.
pub trait SocketListener: Send + Sync {
    /// A connection attempt has started.
    fn on_connecting(&self) {}

    /// The connection ack resolved; `event` carries `me` and the
    /// connection id.
    fn on_connected(&self, _event: &ChatEvent) {}

    /// The connection is gone, either by request or after an error.
    fn on_disconnected(&self) {}

    /// A connection-level or decode error occurred.
    ///
    /// Soft decode errors (an undecodable frame after the ack) also land
    /// here and leave the connection untouched; only `on_error` followed
    /// by `on_disconnected` marks a lost connection.
    fn on_error(&self, _error: &ChatError) {}

    /// A decoded server event arrived.
    fn on_event(&self, _event: &ChatEvent) {}
}

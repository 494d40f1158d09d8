//! Real-time WebSocket connection core for the Driftline chat SDK.
//!
//! The pieces, bottom up:
//! - [`parser::EventsParser`] decodes the frames of one connection,
//!   resolving the first one as the connection ack.
//! - [`health::HealthMonitor`] probes liveness and schedules reconnects
//!   with jittered backoff.
//! - [`service::ChatSocketService`] owns the lifecycle state machine and
//!   fans every transition out to [`listener::SocketListener`]s through a
//!   single ordered delivery queue.
//! - [`observable::ChatObservable`] turns that callback surface into a
//!   reference-counted event stream.
//! - [`handler::ChatEventHandler`] decides how events reshape the channel
//!   sets of active queries.

pub mod handler;
pub mod health;
pub mod listener;
pub mod observable;
pub mod parser;
pub mod service;

pub use handler::{ChatEventHandler, DefaultChatEventHandler, EventHandlingResult};
pub use health::HealthMonitor;
pub use listener::SocketListener;
pub use observable::{ChatObservable, Subscription};
pub use parser::{EventsParser, ParsedFrame};
pub use service::{AuthMode, ChatSocketService, ConnectionConf, ConnectionState};

//! Per-connection frame decoding.
//!
//! The parser is stateful for exactly one reason: the first frame of a
//! connection that is not a server error envelope must be the connection
//! ack. Everything after that is ordinary event decoding.

use chrono::Utc;
use serde::Deserialize;

use driftline_core::{ChatError, ChatEvent};

/// Outcome of decoding one inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedFrame {
    /// First successfully decoded frame of the connection.
    ConnectionAck(ChatEvent),
    /// Any later event frame, including unknown types.
    Event(ChatEvent),
    /// A server error envelope or a decode failure.
    Error(ChatError),
}

/// Server error envelope: `{ "error": { code, message, StatusCode } }`.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
    #[serde(rename = "StatusCode", default)]
    status_code: i32,
}

/// Decodes the text frames of a single connection, in arrival order.
///
/// One parser per connection; a reconnect gets a fresh one so the ack
/// handshake starts over.
#[derive(Debug, Default)]
pub struct EventsParser {
    connection_resolved: bool,
}

impl EventsParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one frame. Stamps `received_at` on every event exactly once;
    /// the caller is responsible for feeding that receipt to the health
    /// monitor.
    pub fn handle_frame(&mut self, text: &str) -> ParsedFrame {
        let value: serde_json::Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                return if self.connection_resolved {
                    ParsedFrame::Error(ChatError::CantParseEvent(e.to_string()))
                } else {
                    ParsedFrame::Error(ChatError::CantParseConnectionEvent)
                };
            }
        };

        // Error envelopes can arrive at any point, including before the
        // ack, and never resolve the connection.
        if value.get("error").is_some() {
            if let Ok(envelope) = serde_json::from_value::<ErrorEnvelope>(value.clone()) {
                return ParsedFrame::Error(ChatError::Network {
                    code: envelope.error.code,
                    message: envelope.error.message,
                    status_code: envelope.error.status_code,
                });
            }
        }

        if self.connection_resolved {
            match ChatEvent::from_frame(value) {
                Ok(mut event) => {
                    event.stamp_received(Utc::now());
                    ParsedFrame::Event(event)
                }
                Err(e) => ParsedFrame::Error(e),
            }
        } else {
            match ChatEvent::from_connection_ack(value) {
                Ok(mut event) => {
                    self.connection_resolved = true;
                    event.stamp_received(Utc::now());
                    ParsedFrame::ConnectionAck(event)
                }
                Err(e) => ParsedFrame::Error(e),
            }
        }
    }
}

//! Domain models, event vocabulary, and error taxonomy for the Driftline
//! chat SDK. This crate is transport-agnostic: everything that touches a
//! socket lives in `driftline-client`.

pub mod error;
pub mod events;
pub mod models;

pub use error::ChatError;
pub use events::{event_types, ChatEvent, EventPayload};
pub use models::{Channel, FilterObject, Member, Message, Reaction, User, MESSAGE_TYPE_SYSTEM};

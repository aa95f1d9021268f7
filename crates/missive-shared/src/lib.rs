//! # missive-shared
//!
//! Types shared between the Missive server and its clients: domain
//! identifiers, the realtime event schema carried over the WebSocket channel,
//! and the symmetric encryption applied to message text before it is stored.

pub mod constants;
pub mod crypto;
pub mod events;
pub mod types;

mod error;

pub use error::CryptoError;
pub use types::{MessageId, RequestDecision, RequestId, RequestStatus, UserId};

//! Realtime event schema for the WebSocket channel.
//!
//! Every event is a closed tagged variant with a fixed payload shape; the
//! server rejects (logs and drops) anything that does not parse. The tag and
//! field names are camelCase to match the browser clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{MessageId, RequestDecision, RequestId, RequestStatus, UserId};

/// Minimal public view of a user, safe to push to other users.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: UserId,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

/// Wire form of a chat request. The `sender` and `receiver` profiles are
/// populated on `requestResolved` pushes and left empty elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequestRecord {
    pub id: RequestId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<Profile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receiver: Option<Profile>,
}

/// Wire form of a message. `text` is the base64-encoded ciphertext;
/// decryption is the client's capability, never the server's read path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub text: Option<String>,
    pub image_url: Option<String>,
    pub seen: bool,
    pub created_at: DateTime<Utc>,
}

/// Events a client may send over its connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientEvent {
    #[serde(rename_all = "camelCase")]
    SubmitRequest {
        sender_id: UserId,
        receiver_id: UserId,
    },
    #[serde(rename_all = "camelCase")]
    RespondToRequest {
        /// Normally a request id. Known client builds pass the sender's user
        /// id instead; the server resolves both (see the protocol module).
        request_id: uuid::Uuid,
        decision: RequestDecision,
    },
    /// Pre-persistence latency hint, forwarded best-effort and never stored.
    #[serde(rename_all = "camelCase")]
    SendMessageNotice {
        sender_id: UserId,
        receiver_id: UserId,
        text: String,
        created_at: DateTime<Utc>,
    },
}

/// Events the server pushes to connections.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Full set of currently online users, broadcast on every registry change.
    #[serde(rename_all = "camelCase")]
    PresenceUpdate { online: Vec<UserId> },
    #[serde(rename_all = "camelCase")]
    RequestReceived {
        request: ChatRequestRecord,
        sender_profile: Profile,
    },
    #[serde(rename_all = "camelCase")]
    RequestResolved { request: ChatRequestRecord },
    /// Protocol error, delivered only to the originating connection.
    #[serde(rename_all = "camelCase")]
    RequestError {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<RequestId>,
    },
    #[serde(rename_all = "camelCase")]
    NewMessage { message: MessageRecord },
    /// Relayed `sendMessageNotice`; non-authoritative.
    #[serde(rename_all = "camelCase")]
    MessageNotice {
        sender_id: UserId,
        receiver_id: UserId,
        text: String,
        created_at: DateTime<Utc>,
    },
}

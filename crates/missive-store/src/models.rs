//! Domain model structs persisted in the SQLite database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use missive_shared::types::{MessageId, RequestStatus, UserId};
use missive_shared::RequestId;

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A registered user. The credential hash is opaque to this crate; hashing
/// and session issuance live in the auth collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub display_name: String,
    /// Opaque credential hash, written once at signup.
    pub password_hash: String,
    /// URL of the profile image in the media store, if any.
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// ChatRequest
// ---------------------------------------------------------------------------

/// A friend ("chat") request between two users.
///
/// At most one request with status pending or accepted may exist per
/// unordered user pair; the schema enforces this with a partial unique index
/// over the normalized pair key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatRequest {
    pub id: RequestId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
}

impl ChatRequest {
    /// A fresh pending request from `sender_id` to `receiver_id`.
    pub fn pending(sender_id: UserId, receiver_id: UserId) -> Self {
        Self {
            id: RequestId::new(),
            sender_id,
            receiver_id,
            status: RequestStatus::Pending,
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A direct message. Text is stored as ciphertext only; `seen` is reserved
/// schema with no writer yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    /// XChaCha20-Poly1305 ciphertext (nonce || ct), absent for image-only
    /// messages.
    pub ciphertext: Option<Vec<u8>>,
    /// URL of the uploaded image in the media store, if any.
    pub image_url: Option<String>,
    pub seen: bool,
    pub created_at: DateTime<Utc>,
}

/// Normalized key identifying an unordered user pair. Both `(a, b)` and
/// `(b, a)` map to the same key.
pub fn pair_key(a: UserId, b: UserId) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{lo}:{hi}")
}

//! Conversions from stored models to wire records.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use missive_shared::events::{ChatRequestRecord, MessageRecord, Profile};
use missive_shared::UserId;
use missive_store::{ChatRequest, Database, Message, User};

pub fn profile(user: &User) -> Profile {
    Profile {
        id: user.id,
        display_name: user.display_name.clone(),
        avatar_url: user.avatar_url.clone(),
    }
}

/// Wire form without profiles populated.
pub fn request_record(request: &ChatRequest) -> ChatRequestRecord {
    ChatRequestRecord {
        id: request.id,
        sender_id: request.sender_id,
        receiver_id: request.receiver_id,
        status: request.status,
        created_at: request.created_at,
        sender: None,
        receiver: None,
    }
}

/// Wire form with both party profiles populated where the user rows exist.
pub fn request_record_with_profiles(request: &ChatRequest, db: &Database) -> ChatRequestRecord {
    let mut record = request_record(request);
    record.sender = lookup_profile(db, request.sender_id);
    record.receiver = lookup_profile(db, request.receiver_id);
    record
}

fn lookup_profile(db: &Database, id: UserId) -> Option<Profile> {
    db.get_user(id).ok().map(|user| profile(&user))
}

pub fn message_record(message: &Message) -> MessageRecord {
    MessageRecord {
        id: message.id,
        sender_id: message.sender_id,
        receiver_id: message.receiver_id,
        text: message.ciphertext.as_deref().map(|ct| BASE64.encode(ct)),
        image_url: message.image_url.clone(),
        seen: message.seen,
        created_at: message.created_at,
    }
}

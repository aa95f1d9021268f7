//! Message delivery pipeline.
//!
//! Persistence is the durability guarantee; the realtime push to a connected
//! receiver is a latency optimization only. A push that fails or finds the
//! receiver offline is never reported to the sender and never rolls back the
//! stored message.

use chrono::{DateTime, Utc};
use tokio::fs;
use tracing::{debug, warn};

use missive_shared::constants::MAX_TEXT_SIZE;
use missive_shared::crypto::{self, SymmetricKey};
use missive_shared::events::{MessageRecord, ServerEvent};
use missive_shared::types::MessageId;
use missive_shared::UserId;
use missive_store::Message;

use crate::error::ApiError;
use crate::media_store::MediaStore;
use crate::presence::PresenceRegistry;
use crate::wire;
use crate::SharedDb;

use std::sync::Arc;

pub struct DeliveryPipeline {
    db: SharedDb,
    presence: PresenceRegistry,
    media: Arc<MediaStore>,
    message_key: SymmetricKey,
}

impl DeliveryPipeline {
    pub fn new(
        db: SharedDb,
        presence: PresenceRegistry,
        media: Arc<MediaStore>,
        message_key: SymmetricKey,
    ) -> Self {
        Self {
            db,
            presence,
            media,
            message_key,
        }
    }

    /// Send a message: upload the image (if any), encrypt the text (if any),
    /// persist, then push to the receiver when connected. Returns the
    /// persisted record, which the client uses to replace its optimistic
    /// placeholder.
    pub async fn send(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
        text: Option<String>,
        image: Option<Vec<u8>>,
    ) -> Result<MessageRecord, ApiError> {
        let text = text.filter(|t| !t.trim().is_empty());
        if text.is_none() && image.is_none() {
            return Err(ApiError::EmptyMessage);
        }
        if let Some(t) = &text {
            if t.len() > MAX_TEXT_SIZE {
                return Err(ApiError::BadRequest(format!(
                    "message text exceeds {MAX_TEXT_SIZE} bytes"
                )));
            }
        }

        // Image upload happens before any persistence so a failed upload
        // leaves no message record behind.
        let image_url = match image {
            Some(data) => {
                let spooled = self.media.spool(&data).await?;
                let uploaded = self.media.upload(&spooled).await;

                // The spooled copy goes away on success and failure alike.
                if let Err(e) = fs::remove_file(&spooled).await {
                    warn!(path = %spooled.display(), error = %e, "failed to remove spooled upload");
                }

                Some(MediaStore::url_for(uploaded?))
            }
            None => None,
        };

        // Ciphertext only ever reaches storage; plaintext stops here.
        let ciphertext = match &text {
            Some(t) => Some(crypto::encrypt(&self.message_key, t.as_bytes())?),
            None => None,
        };

        let message = Message {
            id: MessageId::new(),
            sender_id,
            receiver_id,
            ciphertext,
            image_url,
            seen: false,
            created_at: Utc::now(),
        };

        {
            let db = self.db.lock().await;
            db.insert_message(&message)?;
        }

        let record = wire::message_record(&message);

        let delivered = self
            .presence
            .send_to(
                &receiver_id,
                ServerEvent::NewMessage {
                    message: record.clone(),
                },
            )
            .await;
        if !delivered {
            debug!(receiver = %receiver_id, "receiver offline, relying on persistence");
        }

        Ok(record)
    }

    /// Relay a pre-persistence latency hint to the receiver. Never stored,
    /// never acknowledged.
    pub async fn forward_notice(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
        text: String,
        created_at: DateTime<Utc>,
    ) {
        let _ = self
            .presence
            .send_to(
                &receiver_id,
                ServerEvent::MessageNotice {
                    sender_id,
                    receiver_id,
                    text,
                    created_at,
                },
            )
            .await;
    }
}

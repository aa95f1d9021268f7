//! Friend-request protocol.
//!
//! State machine: none -> pending -> accepted | rejected (terminal).
//! Pair uniqueness is enforced by the store's unique index at the moment of
//! write; this module translates the conflict into a `DuplicateRequest`
//! carrying the surviving request id, and handles the targeted realtime
//! delivery to the two parties.

use tracing::{debug, warn};
use uuid::Uuid;

use missive_shared::events::{ChatRequestRecord, ServerEvent};
use missive_shared::types::{RequestDecision, RequestStatus};
use missive_shared::{RequestId, UserId};
use missive_store::{ChatRequest, StoreError};

use crate::error::ApiError;
use crate::presence::PresenceRegistry;
use crate::wire;
use crate::SharedDb;

pub struct RequestProtocol {
    db: SharedDb,
    presence: PresenceRegistry,
}

impl RequestProtocol {
    pub fn new(db: SharedDb, presence: PresenceRegistry) -> Self {
        Self { db, presence }
    }

    /// Create a pending request and, if the receiver is connected, push it
    /// to them with the sender's profile. Offline receivers discover the
    /// request through the pending-requests query instead.
    pub async fn submit(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
    ) -> Result<ChatRequestRecord, ApiError> {
        if sender_id == receiver_id {
            return Err(ApiError::BadRequest(
                "cannot send a chat request to yourself".to_string(),
            ));
        }

        let request = ChatRequest::pending(sender_id, receiver_id);

        let insert_result = {
            let db = self.db.lock().await;
            db.insert_request(&request)
        };

        match insert_result {
            Ok(()) => {}
            Err(StoreError::DuplicatePair) => {
                // Surface the surviving request's id for client reconciliation.
                let existing = {
                    let db = self.db.lock().await;
                    db.find_active_between(sender_id, receiver_id)?
                };
                return Err(ApiError::DuplicateRequest {
                    existing_id: existing.map(|r| r.id),
                });
            }
            Err(e) => return Err(e.into()),
        }

        let sender_user = {
            let db = self.db.lock().await;
            db.get_user(sender_id)
        };
        match sender_user {
            Ok(user) => {
                let delivered = self
                    .presence
                    .send_to(
                        &receiver_id,
                        ServerEvent::RequestReceived {
                            request: wire::request_record(&request),
                            sender_profile: wire::profile(&user),
                        },
                    )
                    .await;
                if !delivered {
                    debug!(receiver = %receiver_id, "receiver offline, request saved for later");
                }
            }
            Err(StoreError::NotFound) => {
                warn!(sender = %sender_id, "sender has no profile row, skipping realtime push");
            }
            Err(e) => {
                // The request is already persisted; a failed profile read
                // only suppresses the push.
                warn!(error = %e, "profile lookup failed, skipping realtime push");
            }
        }

        Ok(wire::request_record(&request))
    }

    /// Resolve a request to a terminal status and notify both parties that
    /// are currently connected.
    ///
    /// `raw_id` is normally a request id. If no request matches, it is
    /// retried as a *sender* user id against pending requests addressed to
    /// the responder. That fallback papers over a client bug that passes the
    /// sender id where the request id belongs; it stays for compatibility
    /// until clients are fixed, at which point it should be deleted.
    pub async fn respond(
        &self,
        responder_id: UserId,
        raw_id: Uuid,
        decision: RequestDecision,
    ) -> Result<ChatRequestRecord, ApiError> {
        let status = RequestStatus::from(decision);

        let (updated, transitioned) = {
            let db = self.db.lock().await;

            let found = match db.get_request(RequestId(raw_id)) {
                Ok(request) => Some(request),
                Err(StoreError::NotFound) => {
                    debug!(raw_id = %raw_id, "id lookup missed, trying sender fallback");
                    db.find_pending_from(UserId(raw_id), responder_id)?
                }
                Err(e) => return Err(e.into()),
            };

            let Some(request) = found else {
                return Err(ApiError::RequestNotFound);
            };

            // Only the addressed receiver may resolve a request. A foreign
            // request id is indistinguishable from an absent one.
            if request.receiver_id != responder_id {
                return Err(ApiError::RequestNotFound);
            }

            // Conditional on still-pending: a repeat resolution is a no-op
            // and can never flip accepted to rejected or back.
            let transitioned = db.update_status_if_pending(request.id, status)?;
            (db.get_request(request.id)?, transitioned)
        };

        let record = {
            let db = self.db.lock().await;
            wire::request_record_with_profiles(&updated, &db)
        };

        if transitioned {
            for party in [updated.sender_id, updated.receiver_id] {
                let delivered = self
                    .presence
                    .send_to(
                        &party,
                        ServerEvent::RequestResolved {
                            request: record.clone(),
                        },
                    )
                    .await;
                if !delivered {
                    debug!(user = %party, "party offline, will observe status on next sync");
                }
            }
        }

        Ok(record)
    }
}

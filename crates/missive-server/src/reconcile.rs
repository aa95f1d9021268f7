//! Reconciliation queries for reconnecting clients.
//!
//! All operations here are idempotent reads (plus the explicit clear-chat
//! delete); a client can replay them at any time to converge its local state
//! with server truth.

use std::collections::HashSet;

use missive_shared::events::{ChatRequestRecord, MessageRecord, Profile};
use missive_shared::{RequestId, UserId};

use crate::error::ApiError;
use crate::wire;
use crate::SharedDb;

pub struct Reconciler {
    db: SharedDb,
}

impl Reconciler {
    pub fn new(db: SharedDb) -> Self {
        Self { db }
    }

    /// The subset of `ids` that still exists in storage. Reconnecting
    /// clients use this to prune UI state that references requests since
    /// resolved or invalidated.
    pub async fn verify_request_ids(
        &self,
        ids: &[RequestId],
    ) -> Result<Vec<RequestId>, ApiError> {
        let db = self.db.lock().await;
        Ok(db.existing_request_ids(ids)?)
    }

    /// All users joined to `user_id` through accepted requests, in either
    /// direction.
    pub async fn list_friends(&self, user_id: UserId) -> Result<Vec<Profile>, ApiError> {
        let db = self.db.lock().await;
        let accepted = db.list_accepted_for(user_id)?;

        let counterpart_ids: Vec<UserId> = accepted
            .iter()
            .map(|r| counterpart(r.sender_id, r.receiver_id, user_id))
            .collect();

        let users = db.get_users_by_ids(&counterpart_ids)?;
        Ok(users.iter().map(wire::profile).collect())
    }

    /// Pending requests addressed to `user_id`, excluding senders who are
    /// already accepted friends through another request. That filter guards
    /// against stale duplicate pendings left over from before the pair
    /// invariant was enforced.
    pub async fn list_pending_requests(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ChatRequestRecord>, ApiError> {
        let db = self.db.lock().await;

        let pending = db.list_pending_for(user_id)?;
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        let friends: HashSet<UserId> = db
            .list_accepted_for(user_id)?
            .iter()
            .map(|r| counterpart(r.sender_id, r.receiver_id, user_id))
            .collect();

        Ok(pending
            .into_iter()
            .filter(|r| !friends.contains(&r.sender_id))
            .map(|r| wire::request_record_with_profiles(&r, &db))
            .collect())
    }

    /// All messages between the pair, ascending by creation time. Text stays
    /// ciphertext; decrypting is the caller's capability.
    pub async fn list_conversation(
        &self,
        user_id: UserId,
        peer_id: UserId,
    ) -> Result<Vec<MessageRecord>, ApiError> {
        let db = self.db.lock().await;
        let messages = db.list_messages_between(user_id, peer_id)?;
        Ok(messages.iter().map(wire::message_record).collect())
    }

    /// The explicit clear-chat operation. Returns the number of messages
    /// removed.
    pub async fn clear_conversation(
        &self,
        user_id: UserId,
        peer_id: UserId,
    ) -> Result<usize, ApiError> {
        let db = self.db.lock().await;
        Ok(db.delete_messages_between(user_id, peer_id)?)
    }
}

fn counterpart(sender: UserId, receiver: UserId, me: UserId) -> UserId {
    if sender == me {
        receiver
    } else {
        sender
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;
    use tokio::sync::Mutex;

    use missive_shared::types::{MessageId, RequestStatus};
    use missive_store::{ChatRequest, Database, Message, User};

    fn test_db() -> (SharedDb, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        (Arc::new(Mutex::new(db)), dir)
    }

    async fn add_user(db: &SharedDb, name: &str) -> UserId {
        let user = User {
            id: UserId::new(),
            display_name: name.to_string(),
            password_hash: "$opaque".to_string(),
            avatar_url: None,
            created_at: Utc::now(),
        };
        db.lock().await.insert_user(&user).unwrap();
        user.id
    }

    async fn accepted_request(db: &SharedDb, sender: UserId, receiver: UserId) -> RequestId {
        let request = ChatRequest::pending(sender, receiver);
        let guard = db.lock().await;
        guard.insert_request(&request).unwrap();
        guard
            .update_status_if_pending(request.id, RequestStatus::Accepted)
            .unwrap();
        request.id
    }

    #[tokio::test]
    async fn accepted_requests_yield_mutual_friends() {
        let (db, _dir) = test_db();
        let reconciler = Reconciler::new(db.clone());
        let alice = add_user(&db, "alice").await;
        let bob = add_user(&db, "bob").await;
        let carol = add_user(&db, "carol").await;

        // alice -> bob accepted; carol -> alice accepted.
        accepted_request(&db, alice, bob).await;
        accepted_request(&db, carol, alice).await;

        let friends_of_alice: Vec<UserId> = reconciler
            .list_friends(alice)
            .await
            .unwrap()
            .iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(friends_of_alice.len(), 2);
        assert!(friends_of_alice.contains(&bob));
        assert!(friends_of_alice.contains(&carol));

        let friends_of_bob: Vec<UserId> = reconciler
            .list_friends(bob)
            .await
            .unwrap()
            .iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(friends_of_bob, vec![alice]);
    }

    #[tokio::test]
    async fn pending_list_excludes_existing_friends() {
        let (db, _dir) = test_db();
        let reconciler = Reconciler::new(db.clone());
        let alice = add_user(&db, "alice").await;
        let bob = add_user(&db, "bob").await;
        let carol = add_user(&db, "carol").await;

        // bob is already a friend of alice; a stray pending from bob must be
        // filtered out. The unique index blocks such rows today, so simulate
        // legacy data with raw SQL using a pair key that dodges the index.
        accepted_request(&db, bob, alice).await;
        {
            let guard = db.lock().await;
            guard
                .conn()
                .execute(
                    "INSERT INTO chat_requests
                         (id, sender_id, receiver_id, status, pair_key, created_at)
                     VALUES (?1, ?2, ?3, 'pending', ?4, ?5)",
                    rusqlite::params![
                        RequestId::new().to_string(),
                        bob.to_string(),
                        alice.to_string(),
                        format!("legacy:{bob}:{alice}"),
                        Utc::now().to_rfc3339(),
                    ],
                )
                .unwrap();
        }

        let pending_from_carol = ChatRequest::pending(carol, alice);
        db.lock()
            .await
            .insert_request(&pending_from_carol)
            .unwrap();

        let pending = reconciler.list_pending_requests(alice).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].sender_id, carol);
        assert_eq!(pending[0].sender.as_ref().unwrap().display_name, "carol");
    }

    #[tokio::test]
    async fn verify_returns_surviving_subset() {
        let (db, _dir) = test_db();
        let reconciler = Reconciler::new(db.clone());
        let alice = add_user(&db, "alice").await;
        let bob = add_user(&db, "bob").await;

        let request = ChatRequest::pending(alice, bob);
        db.lock().await.insert_request(&request).unwrap();

        let ghost = RequestId::new();
        let valid = reconciler
            .verify_request_ids(&[request.id, ghost])
            .await
            .unwrap();
        assert_eq!(valid, vec![request.id]);
    }

    #[tokio::test]
    async fn conversation_is_ascending_and_clearable() {
        let (db, _dir) = test_db();
        let reconciler = Reconciler::new(db.clone());
        let alice = add_user(&db, "alice").await;
        let bob = add_user(&db, "bob").await;

        let base = Utc::now();
        for (offset, body) in [(2, "two"), (0, "one"), (5, "three")] {
            let message = Message {
                id: MessageId::new(),
                sender_id: if offset == 2 { bob } else { alice },
                receiver_id: if offset == 2 { alice } else { bob },
                ciphertext: Some(body.as_bytes().to_vec()),
                image_url: None,
                seen: false,
                created_at: base + chrono::Duration::seconds(offset),
            };
            db.lock().await.insert_message(&message).unwrap();
        }

        let listed = reconciler.list_conversation(alice, bob).await.unwrap();
        let times: Vec<_> = listed.iter().map(|m| m.created_at).collect();
        let mut sorted = times.clone();
        sorted.sort();
        assert_eq!(times, sorted);
        assert_eq!(listed.len(), 3);

        let deleted = reconciler.clear_conversation(bob, alice).await.unwrap();
        assert_eq!(deleted, 3);
        assert!(reconciler
            .list_conversation(alice, bob)
            .await
            .unwrap()
            .is_empty());
    }
}

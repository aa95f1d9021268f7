//! Chat request persistence.
//!
//! The pair-uniqueness invariant lives in the schema (partial unique index on
//! `pair_key` for non-rejected rows), so two near-simultaneous inserts for
//! the same pair cannot both succeed regardless of what the callers checked
//! earlier.

use chrono::{DateTime, Utc};
use rusqlite::params;

use missive_shared::types::{RequestStatus, UserId};
use missive_shared::RequestId;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{pair_key, ChatRequest};

impl Database {
    /// Insert a new request. Returns [`StoreError::DuplicatePair`] when an
    /// active (pending or accepted) request already exists for the pair.
    pub fn insert_request(&self, request: &ChatRequest) -> Result<()> {
        let result = self.conn().execute(
            "INSERT INTO chat_requests (id, sender_id, receiver_id, status, pair_key, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                request.id.to_string(),
                request.sender_id.to_string(),
                request.receiver_id.to_string(),
                request.status.as_str(),
                pair_key(request.sender_id, request.receiver_id),
                request.created_at.to_rfc3339(),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::DuplicatePair)
            }
            Err(e) => Err(StoreError::Sqlite(e)),
        }
    }

    pub fn get_request(&self, id: RequestId) -> Result<ChatRequest> {
        self.conn()
            .query_row(
                "SELECT id, sender_id, receiver_id, status, created_at
                 FROM chat_requests WHERE id = ?1",
                params![id.to_string()],
                row_to_request,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// The active (pending or accepted) request between the unordered pair,
    /// if one exists.
    pub fn find_active_between(&self, a: UserId, b: UserId) -> Result<Option<ChatRequest>> {
        let result = self.conn().query_row(
            "SELECT id, sender_id, receiver_id, status, created_at
             FROM chat_requests WHERE pair_key = ?1 AND status != 'rejected'",
            params![pair_key(a, b)],
            row_to_request,
        );

        match result {
            Ok(request) => Ok(Some(request)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Sqlite(e)),
        }
    }

    /// A pending request sent by `sender_id` to `receiver_id`, if any.
    /// Supports the respond-by-sender fallback in the protocol layer.
    pub fn find_pending_from(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
    ) -> Result<Option<ChatRequest>> {
        let result = self.conn().query_row(
            "SELECT id, sender_id, receiver_id, status, created_at
             FROM chat_requests
             WHERE sender_id = ?1 AND receiver_id = ?2 AND status = 'pending'",
            params![sender_id.to_string(), receiver_id.to_string()],
            row_to_request,
        );

        match result {
            Ok(request) => Ok(Some(request)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Sqlite(e)),
        }
    }

    /// Transition a request to a terminal status, but only if it is still
    /// pending. Returns whether a row actually changed, which makes repeat
    /// resolutions no-ops rather than accepted<->rejected flips.
    pub fn update_status_if_pending(&self, id: RequestId, status: RequestStatus) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE chat_requests SET status = ?2 WHERE id = ?1 AND status = 'pending'",
            params![id.to_string(), status.as_str()],
        )?;
        Ok(affected > 0)
    }

    /// Pending requests addressed to `receiver_id`, oldest first. The
    /// already-friends filter is applied by the reconciliation layer.
    pub fn list_pending_for(&self, receiver_id: UserId) -> Result<Vec<ChatRequest>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, sender_id, receiver_id, status, created_at
             FROM chat_requests
             WHERE receiver_id = ?1 AND status = 'pending'
             ORDER BY created_at ASC",
        )?;

        let requests = collect_requests(stmt.query_map(params![receiver_id.to_string()], row_to_request)?);
        requests
    }

    /// Accepted requests where `user_id` is either party.
    pub fn list_accepted_for(&self, user_id: UserId) -> Result<Vec<ChatRequest>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, sender_id, receiver_id, status, created_at
             FROM chat_requests
             WHERE status = 'accepted' AND (sender_id = ?1 OR receiver_id = ?1)",
        )?;

        let requests = collect_requests(stmt.query_map(params![user_id.to_string()], row_to_request)?);
        requests
    }

    /// The subset of `ids` that still exists in storage, in no particular
    /// order. Used by reconnecting clients to prune stale UI state.
    pub fn existing_request_ids(&self, ids: &[RequestId]) -> Result<Vec<RequestId>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT 1 FROM chat_requests WHERE id = ?1")?;

        let mut existing = Vec::new();
        for id in ids {
            if stmt.exists(params![id.to_string()])? {
                existing.push(*id);
            }
        }
        Ok(existing)
    }
}

fn collect_requests(
    rows: impl Iterator<Item = rusqlite::Result<ChatRequest>>,
) -> Result<Vec<ChatRequest>> {
    let mut requests = Vec::new();
    for row in rows {
        requests.push(row?);
    }
    Ok(requests)
}

fn row_to_request(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatRequest> {
    let id_str: String = row.get(0)?;
    let sender_str: String = row.get(1)?;
    let receiver_str: String = row.get(2)?;
    let status_str: String = row.get(3)?;
    let ts_str: String = row.get(4)?;

    let id = RequestId::parse(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let sender_id = UserId::parse(&sender_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let receiver_id = UserId::parse(&receiver_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let status = RequestStatus::parse(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown status '{status_str}'").into(),
        )
    })?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&ts_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(ChatRequest {
        id,
        sender_id,
        receiver_id,
        status,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> (Database, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        (db, dir)
    }

    #[test]
    fn insert_and_get() {
        let (db, _dir) = test_db();
        let request = ChatRequest::pending(UserId::new(), UserId::new());

        db.insert_request(&request).unwrap();
        let loaded = db.get_request(request.id).unwrap();
        assert_eq!(loaded.sender_id, request.sender_id);
        assert_eq!(loaded.status, RequestStatus::Pending);
    }

    #[test]
    fn duplicate_pending_pair_is_rejected() {
        let (db, _dir) = test_db();
        let a = UserId::new();
        let b = UserId::new();

        db.insert_request(&ChatRequest::pending(a, b)).unwrap();

        // Same direction.
        assert!(matches!(
            db.insert_request(&ChatRequest::pending(a, b)),
            Err(StoreError::DuplicatePair)
        ));
        // Reversed direction is the same unordered pair.
        assert!(matches!(
            db.insert_request(&ChatRequest::pending(b, a)),
            Err(StoreError::DuplicatePair)
        ));
    }

    #[test]
    fn accepted_pair_still_blocks_new_requests() {
        let (db, _dir) = test_db();
        let a = UserId::new();
        let b = UserId::new();

        let request = ChatRequest::pending(a, b);
        db.insert_request(&request).unwrap();
        assert!(db
            .update_status_if_pending(request.id, RequestStatus::Accepted)
            .unwrap());

        assert!(matches!(
            db.insert_request(&ChatRequest::pending(b, a)),
            Err(StoreError::DuplicatePair)
        ));
    }

    #[test]
    fn rejected_pair_allows_a_fresh_request() {
        let (db, _dir) = test_db();
        let a = UserId::new();
        let b = UserId::new();

        let request = ChatRequest::pending(a, b);
        db.insert_request(&request).unwrap();
        assert!(db
            .update_status_if_pending(request.id, RequestStatus::Rejected)
            .unwrap());

        db.insert_request(&ChatRequest::pending(a, b))
            .expect("rejected requests do not block the pair");
    }

    #[test]
    fn update_is_conditional_on_pending() {
        let (db, _dir) = test_db();
        let request = ChatRequest::pending(UserId::new(), UserId::new());
        db.insert_request(&request).unwrap();

        assert!(db
            .update_status_if_pending(request.id, RequestStatus::Accepted)
            .unwrap());
        // Second resolution is a no-op, even with the opposite status.
        assert!(!db
            .update_status_if_pending(request.id, RequestStatus::Rejected)
            .unwrap());

        let loaded = db.get_request(request.id).unwrap();
        assert_eq!(loaded.status, RequestStatus::Accepted);
    }

    #[test]
    fn find_active_between_sees_both_directions() {
        let (db, _dir) = test_db();
        let a = UserId::new();
        let b = UserId::new();
        let request = ChatRequest::pending(a, b);
        db.insert_request(&request).unwrap();

        assert_eq!(db.find_active_between(b, a).unwrap().unwrap().id, request.id);
        assert!(db.find_active_between(a, UserId::new()).unwrap().is_none());
    }

    #[test]
    fn find_pending_from_matches_only_pending() {
        let (db, _dir) = test_db();
        let a = UserId::new();
        let b = UserId::new();
        let request = ChatRequest::pending(a, b);
        db.insert_request(&request).unwrap();

        assert_eq!(db.find_pending_from(a, b).unwrap().unwrap().id, request.id);
        assert!(db.find_pending_from(b, a).unwrap().is_none());

        db.update_status_if_pending(request.id, RequestStatus::Accepted)
            .unwrap();
        assert!(db.find_pending_from(a, b).unwrap().is_none());
    }

    #[test]
    fn existing_ids_returns_surviving_subset() {
        let (db, _dir) = test_db();
        let request = ChatRequest::pending(UserId::new(), UserId::new());
        db.insert_request(&request).unwrap();

        let ghost = RequestId::new();
        let existing = db.existing_request_ids(&[request.id, ghost]).unwrap();
        assert_eq!(existing, vec![request.id]);
    }
}

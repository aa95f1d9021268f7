use chrono::{DateTime, Utc};
use rusqlite::params;

use missive_shared::types::{MessageId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{pair_key, Message};

impl Database {
    pub fn insert_message(&self, message: &Message) -> Result<()> {
        self.conn().execute(
            "INSERT INTO messages
                 (id, sender_id, receiver_id, pair_key, ciphertext, image_url, seen, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                message.id.to_string(),
                message.sender_id.to_string(),
                message.receiver_id.to_string(),
                pair_key(message.sender_id, message.receiver_id),
                message.ciphertext,
                message.image_url,
                message.seen,
                message.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// All messages between the unordered pair, in ascending creation order.
    pub fn list_messages_between(&self, a: UserId, b: UserId) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, sender_id, receiver_id, ciphertext, image_url, seen, created_at
             FROM messages
             WHERE pair_key = ?1
             ORDER BY created_at ASC",
        )?;

        let rows = stmt.query_map(params![pair_key(a, b)], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// The explicit clear-chat operation: remove every message between the
    /// pair. Returns the number of deleted rows.
    pub fn delete_messages_between(&self, a: UserId, b: UserId) -> Result<usize> {
        let affected = self.conn().execute(
            "DELETE FROM messages WHERE pair_key = ?1",
            params![pair_key(a, b)],
        )?;
        Ok(affected)
    }

    pub fn get_message(&self, id: MessageId) -> Result<Message> {
        self.conn()
            .query_row(
                "SELECT id, sender_id, receiver_id, ciphertext, image_url, seen, created_at
                 FROM messages WHERE id = ?1",
                params![id.to_string()],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    pub fn count_messages_between(&self, a: UserId, b: UserId) -> Result<u64> {
        let count: u64 = self.conn().query_row(
            "SELECT COUNT(*) FROM messages WHERE pair_key = ?1",
            params![pair_key(a, b)],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let sender_str: String = row.get(1)?;
    let receiver_str: String = row.get(2)?;
    let ciphertext: Option<Vec<u8>> = row.get(3)?;
    let image_url: Option<String> = row.get(4)?;
    let seen: bool = row.get(5)?;
    let ts_str: String = row.get(6)?;

    let id = uuid::Uuid::parse_str(&id_str).map(MessageId).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let sender_id = UserId::parse(&sender_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let receiver_id = UserId::parse(&receiver_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&ts_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Message {
        id,
        sender_id,
        receiver_id,
        ciphertext,
        image_url,
        seen,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn test_db() -> (Database, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        (db, dir)
    }

    fn message_at(sender: UserId, receiver: UserId, ts: DateTime<Utc>, body: &[u8]) -> Message {
        Message {
            id: MessageId::new(),
            sender_id: sender,
            receiver_id: receiver,
            ciphertext: Some(body.to_vec()),
            image_url: None,
            seen: false,
            created_at: ts,
        }
    }

    #[test]
    fn listing_is_ascending_and_bidirectional() {
        let (db, _dir) = test_db();
        let a = UserId::new();
        let b = UserId::new();
        let base = Utc::now();

        // Inserted out of order, from both directions.
        let m2 = message_at(b, a, base + Duration::seconds(2), b"two");
        let m1 = message_at(a, b, base, b"one");
        let m3 = message_at(a, b, base + Duration::seconds(5), b"three");
        db.insert_message(&m2).unwrap();
        db.insert_message(&m1).unwrap();
        db.insert_message(&m3).unwrap();

        let listed = db.list_messages_between(a, b).unwrap();
        assert_eq!(
            listed.iter().map(|m| m.id).collect::<Vec<_>>(),
            vec![m1.id, m2.id, m3.id]
        );
        // Same result when queried from the other side.
        assert_eq!(db.list_messages_between(b, a).unwrap().len(), 3);
    }

    #[test]
    fn delete_is_scoped_to_the_pair() {
        let (db, _dir) = test_db();
        let a = UserId::new();
        let b = UserId::new();
        let c = UserId::new();
        let now = Utc::now();

        db.insert_message(&message_at(a, b, now, b"ab")).unwrap();
        db.insert_message(&message_at(b, a, now, b"ba")).unwrap();
        db.insert_message(&message_at(a, c, now, b"ac")).unwrap();

        assert_eq!(db.delete_messages_between(a, b).unwrap(), 2);
        assert_eq!(db.count_messages_between(a, b).unwrap(), 0);
        assert_eq!(db.count_messages_between(a, c).unwrap(), 1);
    }

    #[test]
    fn image_only_message_round_trip() {
        let (db, _dir) = test_db();
        let a = UserId::new();
        let b = UserId::new();

        let message = Message {
            id: MessageId::new(),
            sender_id: a,
            receiver_id: b,
            ciphertext: None,
            image_url: Some("/media/xyz".to_string()),
            seen: false,
            created_at: Utc::now(),
        };
        db.insert_message(&message).unwrap();

        let loaded = db.get_message(message.id).unwrap();
        assert_eq!(loaded.ciphertext, None);
        assert_eq!(loaded.image_url.as_deref(), Some("/media/xyz"));
    }
}

use chrono::{DateTime, Utc};
use rusqlite::params;

use missive_shared::UserId;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::User;

impl Database {
    pub fn insert_user(&self, user: &User) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (id, display_name, password_hash, avatar_url, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user.id.to_string(),
                user.display_name,
                user.password_hash,
                user.avatar_url,
                user.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_user(&self, id: UserId) -> Result<User> {
        self.conn()
            .query_row(
                "SELECT id, display_name, password_hash, avatar_url, created_at
                 FROM users WHERE id = ?1",
                params![id.to_string()],
                row_to_user,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Everyone except `id`, for the sidebar listing.
    pub fn list_users_except(&self, id: UserId) -> Result<Vec<User>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, display_name, password_hash, avatar_url, created_at
             FROM users WHERE id != ?1 ORDER BY display_name ASC",
        )?;

        let rows = stmt.query_map(params![id.to_string()], row_to_user)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    /// Fetch several users by id. Missing ids are silently skipped.
    pub fn get_users_by_ids(&self, ids: &[UserId]) -> Result<Vec<User>> {
        let mut users = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get_user(*id) {
                Ok(user) => users.push(user),
                Err(StoreError::NotFound) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(users)
    }

    pub fn update_user_avatar(&self, id: UserId, avatar_url: &str) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE users SET avatar_url = ?2 WHERE id = ?1",
            params![id.to_string(), avatar_url],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id_str: String = row.get(0)?;
    let display_name: String = row.get(1)?;
    let password_hash: String = row.get(2)?;
    let avatar_url: Option<String> = row.get(3)?;
    let ts_str: String = row.get(4)?;

    let id = UserId::parse(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&ts_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(User {
        id,
        display_name,
        password_hash,
        avatar_url,
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

    fn sample_user(name: &str) -> User {
        User {
            id: UserId::new(),
            display_name: name.to_string(),
            password_hash: "$2b$fake".to_string(),
            avatar_url: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn insert_and_get() {
        let (db, _dir) = test_db();
        let user = sample_user("alice");

        db.insert_user(&user).unwrap();
        let loaded = db.get_user(user.id).unwrap();
        assert_eq!(loaded, user);
    }

    #[test]
    fn get_missing_is_not_found() {
        let (db, _dir) = test_db();
        assert!(matches!(
            db.get_user(UserId::new()),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn list_excludes_caller() {
        let (db, _dir) = test_db();
        let alice = sample_user("alice");
        let bob = sample_user("bob");
        db.insert_user(&alice).unwrap();
        db.insert_user(&bob).unwrap();

        let listed = db.list_users_except(alice.id).unwrap();
        assert_eq!(listed, vec![bob]);
    }

    #[test]
    fn update_avatar() {
        let (db, _dir) = test_db();
        let user = sample_user("carol");
        db.insert_user(&user).unwrap();

        assert!(db.update_user_avatar(user.id, "/media/abc").unwrap());
        let loaded = db.get_user(user.id).unwrap();
        assert_eq!(loaded.avatar_url.as_deref(), Some("/media/abc"));

        assert!(!db.update_user_avatar(UserId::new(), "/media/abc").unwrap());
    }
}

use rusqlite::{OptionalExtension, Result as SqlResult, params};
use std::path::Path;

use super::database::Database;
use super::models::{ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, StoredSession, USER_KEY};
use crate::common::User;

/// Durable key/value store for session credentials and the cached profile.
pub struct SessionStore {
    db: Database,
}

impl SessionStore {
    /// Open the store at `path`, creating the schema when needed.
    pub fn with_path<P: AsRef<Path>>(path: P) -> SqlResult<Self> {
        let store = Self {
            db: Database::open(path)?,
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Store that lives only as long as the process.
    pub fn in_memory() -> SqlResult<Self> {
        let store = Self {
            db: Database::in_memory()?,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> SqlResult<()> {
        self.db.connection().execute(
            "CREATE TABLE IF NOT EXISTS session_entries (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
            )",
            [],
        )?;
        Ok(())
    }

    fn get(&self, key: &str) -> SqlResult<Option<String>> {
        self.db
            .connection()
            .query_row(
                "SELECT value FROM session_entries WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
    }

    fn set(&self, key: &str, value: &str) -> SqlResult<()> {
        self.db.connection().execute(
            "INSERT OR REPLACE INTO session_entries (key, value, updated_at)
             VALUES (?1, ?2, strftime('%s', 'now'))",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn access_token(&self) -> SqlResult<Option<String>> {
        self.get(ACCESS_TOKEN_KEY)
    }

    pub fn refresh_token(&self) -> SqlResult<Option<String>> {
        self.get(REFRESH_TOKEN_KEY)
    }

    pub fn set_access_token(&self, token: &str) -> SqlResult<()> {
        self.set(ACCESS_TOKEN_KEY, token)
    }

    pub fn set_refresh_token(&self, token: &str) -> SqlResult<()> {
        self.set(REFRESH_TOKEN_KEY, token)
    }

    /// Cached profile. A corrupt entry reads as absent.
    pub fn user(&self) -> SqlResult<Option<User>> {
        let Some(raw) = self.get(USER_KEY)? else {
            return Ok(None);
        };
        if raw.trim().is_empty() {
            return Ok(None);
        }
        match serde_json::from_str::<User>(&raw) {
            Ok(user) => Ok(Some(user)),
            Err(err) => {
                log::warn!("Discarding unreadable cached user: {err}");
                Ok(None)
            }
        }
    }

    pub fn set_user(&self, user: &User) -> SqlResult<()> {
        let json = serde_json::to_string(user)
            .map_err(|err| rusqlite::Error::ToSqlConversionFailure(Box::new(err)))?;
        self.set(USER_KEY, &json)
    }

    pub fn load(&self) -> SqlResult<StoredSession> {
        Ok(StoredSession {
            access_token: self.access_token()?,
            refresh_token: self.refresh_token()?,
            user: self.user()?,
        })
    }

    /// Persist a freshly minted session in one transaction.
    pub fn save(&mut self, session: &StoredSession) -> SqlResult<()> {
        let user_json = session
            .user
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|err| rusqlite::Error::ToSqlConversionFailure(Box::new(err)))?;

        self.db.transaction(|tx| {
            for (key, value) in [
                (ACCESS_TOKEN_KEY, session.access_token.as_deref()),
                (REFRESH_TOKEN_KEY, session.refresh_token.as_deref()),
                (USER_KEY, user_json.as_deref()),
            ] {
                match value {
                    Some(value) => {
                        tx.execute(
                            "INSERT OR REPLACE INTO session_entries (key, value, updated_at)
                             VALUES (?1, ?2, strftime('%s', 'now'))",
                            params![key, value],
                        )?;
                    }
                    None => {
                        tx.execute("DELETE FROM session_entries WHERE key = ?1", params![key])?;
                    }
                }
            }
            Ok(())
        })
    }

    /// Remove credentials and the cached user atomically.
    pub fn clear(&mut self) -> SqlResult<()> {
        self.db.transaction(|tx| {
            tx.execute(
                "DELETE FROM session_entries WHERE key IN (?1, ?2, ?3)",
                params![ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY],
            )?;
            Ok(())
        })
    }
}

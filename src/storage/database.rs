use rusqlite::{Connection, Result as SqlResult, Transaction};
use std::path::Path;
use std::time::Duration;

/// SQLite handle shared by the local stores.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Opens (or creates) the database file.
    pub fn open<P: AsRef<Path>>(path: P) -> SqlResult<Self> {
        let conn = Connection::open(path)?;
        // another CLI invocation may hold the file briefly
        conn.busy_timeout(Duration::from_secs(2))?;
        Ok(Self { conn })
    }

    pub fn in_memory() -> SqlResult<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Runs `work` inside a transaction, committing only if it succeeds.
    pub fn transaction<T>(
        &mut self,
        work: impl FnOnce(&Transaction<'_>) -> SqlResult<T>,
    ) -> SqlResult<T> {
        let tx = self.conn.transaction()?;
        let value = work(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

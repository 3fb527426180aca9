use anyhow::{Context, Result};
use rusqlite::Connection;
use std::sync::{Arc, Mutex, MutexGuard};

/// Shared handle to the sqlite store. The connection sits behind a mutex so
/// the sync engine, the reconciler and the API read side can share it; every
/// caller takes the lock for the duration of one query or one transaction and
/// never holds it across an await.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn new(db_path: &str) -> Result<Self> {
        let db_path = db_path.strip_prefix("sqlite:").unwrap_or(db_path);
        let conn = Connection::open(db_path).context("Failed to open database")?;

        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.create_tables()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.create_tables()?;
        Ok(db)
    }

    pub fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    pub fn create_tables(&self) -> Result<()> {
        let conn = self.lock();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS holders (
                address TEXT PRIMARY KEY,
                balance_padded TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_holders_balance
             ON holders(balance_padded)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS block_state (
                id TEXT PRIMARY KEY,
                last_processed_block INTEGER NOT NULL
            )",
            [],
        )?;

        Ok(())
    }
}

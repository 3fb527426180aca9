use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, params};

/// Singleton row tracking the last block height fully folded into the holder
/// set. Written only inside the same transaction as the holder mutation it
/// belongs to, and always after it.
pub struct CursorRepository<'a> {
    conn: &'a Connection,
}

impl<'a> CursorRepository<'a> {
    const CURSOR_ID: &'static str = "latest";

    const GET_CURSOR: &'static str = "SELECT last_processed_block FROM block_state WHERE id = ?1";

    const SET_CURSOR: &'static str =
        "INSERT OR REPLACE INTO block_state (id, last_processed_block) VALUES (?1, ?2)";

    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn last_processed_block(&self) -> Result<Option<u64>> {
        let block: Option<u64> = self
            .conn
            .query_row(Self::GET_CURSOR, params![Self::CURSOR_ID], |row| row.get(0))
            .optional()?;
        Ok(block)
    }

    /// Block the next pass should start from: one past the cursor, or the
    /// configured start block when nothing has ever been synced.
    pub fn resume_block(&self, start_block: u64) -> Result<u64> {
        Ok(match self.last_processed_block()? {
            Some(block) => block + 1,
            None => start_block,
        })
    }

    pub fn set_last_processed_block(&self, block_number: u64) -> Result<()> {
        self.conn
            .execute(Self::SET_CURSOR, params![Self::CURSOR_ID, block_number])?;
        Ok(())
    }
}

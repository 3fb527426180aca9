use super::models::Holder;
use alloy_primitives::{Address, U256};
use anyhow::Result;
use rusqlite::{Connection, Row, params};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HolderOrder {
    Balance,
    Address,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

pub struct HolderRepository<'a> {
    conn: &'a Connection,
}

impl<'a> HolderRepository<'a> {
    const UPSERT_HOLDER: &'static str =
        "INSERT OR REPLACE INTO holders (address, balance_padded) VALUES (?1, ?2)";

    const DELETE_HOLDER: &'static str = "DELETE FROM holders WHERE address = ?1";

    const CLEAR_HOLDERS: &'static str = "DELETE FROM holders";

    const SELECT_ALL: &'static str = "SELECT address, balance_padded FROM holders";

    const COUNT_HOLDERS: &'static str = "SELECT COUNT(*) FROM holders";

    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Pad a U256 balance to 78 digits so lexicographic order matches numeric
    /// order. U256 max is approximately 10^77, so 78 digits is sufficient.
    pub fn pad_balance(balance: &U256) -> String {
        format!("{balance:0>78}")
    }

    fn parse_padded(padded: &str) -> Result<U256> {
        let trimmed = padded.trim_start_matches('0');
        if trimmed.is_empty() {
            Ok(U256::ZERO)
        } else {
            U256::from_str(trimmed)
                .map_err(|_| anyhow::anyhow!("Invalid balance format in database: {padded}"))
        }
    }

    fn row_to_holder(row: &Row) -> rusqlite::Result<(String, String)> {
        Ok((row.get(0)?, row.get(1)?))
    }

    fn decode_holder((address_str, padded): (String, String)) -> Result<Holder> {
        let address = Address::from_str(&address_str)
            .map_err(|_| anyhow::anyhow!("Invalid address in database: {address_str}"))?;
        let balance = Self::parse_padded(&padded)?;
        Ok(Holder { address, balance })
    }

    pub fn upsert(&self, address: &Address, balance: &U256) -> Result<()> {
        self.conn.execute(
            Self::UPSERT_HOLDER,
            params![format!("{address:?}"), Self::pad_balance(balance)],
        )?;
        Ok(())
    }

    pub fn delete(&self, address: &Address) -> Result<()> {
        self.conn
            .execute(Self::DELETE_HOLDER, params![format!("{address:?}")])?;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        self.conn.execute(Self::CLEAR_HOLDERS, [])?;
        Ok(())
    }

    pub fn insert_all<'h>(&self, holders: impl IntoIterator<Item = (&'h Address, &'h U256)>) -> Result<()> {
        let mut stmt = self.conn.prepare(Self::UPSERT_HOLDER)?;
        for (address, balance) in holders {
            stmt.execute(params![format!("{address:?}"), Self::pad_balance(balance)])?;
        }
        Ok(())
    }

    pub fn load_all(&self) -> Result<Vec<Holder>> {
        let mut stmt = self.conn.prepare(Self::SELECT_ALL)?;
        let rows = stmt
            .query_map([], Self::row_to_holder)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(Self::decode_holder).collect()
    }

    pub fn count(&self) -> Result<usize> {
        let count: usize = self
            .conn
            .query_row(Self::COUNT_HOLDERS, [], |row| row.get(0))?;
        Ok(count)
    }

    /// Sum of all stored balances. Computed in Rust since sqlite cannot add
    /// 78-digit integers without losing precision.
    pub fn total_supply(&self) -> Result<U256> {
        let mut stmt = self.conn.prepare("SELECT balance_padded FROM holders")?;
        let values = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut total = U256::ZERO;
        for padded in values {
            let balance = Self::parse_padded(&padded)?;
            total = total
                .checked_add(balance)
                .ok_or_else(|| anyhow::anyhow!("Overflow in total supply calculation"))?;
        }
        Ok(total)
    }

    pub fn page(
        &self,
        order_by: HolderOrder,
        direction: SortDirection,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Holder>> {
        let column = match order_by {
            HolderOrder::Balance => "balance_padded",
            HolderOrder::Address => "address",
        };
        let dir = match direction {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        };

        let query =
            format!("{} ORDER BY {column} {dir} LIMIT ?1 OFFSET ?2", Self::SELECT_ALL);
        let mut stmt = self.conn.prepare(&query)?;
        let rows = stmt
            .query_map(params![limit, offset], Self::row_to_holder)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(Self::decode_holder).collect()
    }
}

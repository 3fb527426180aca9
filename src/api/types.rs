use crate::repository::{HolderOrder, SortDirection};
use alloy_primitives::{U256, U512};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    Balance,
    Address,
    /// Order-equivalent to balance, since percentage is derived from it.
    Percentage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldersQuery {
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default = "default_sort_by")]
    pub sort_by: SortBy,
    #[serde(default = "default_order")]
    pub order: Order,
}

fn default_page() -> usize {
    1
}

fn default_limit() -> usize {
    10
}

fn default_sort_by() -> SortBy {
    SortBy::Balance
}

fn default_order() -> Order {
    Order::Desc
}

impl HoldersQuery {
    pub const MAX_LIMIT: usize = 100;

    pub fn validate(&self) -> Result<(), String> {
        if self.page < 1 {
            return Err("page must be at least 1".to_string());
        }
        if self.limit < 1 || self.limit > Self::MAX_LIMIT {
            return Err(format!("limit must be between 1 and {}", Self::MAX_LIMIT));
        }
        Ok(())
    }

    pub fn storage_order(&self) -> (HolderOrder, SortDirection) {
        let order_by = match self.sort_by {
            SortBy::Balance | SortBy::Percentage => HolderOrder::Balance,
            SortBy::Address => HolderOrder::Address,
        };
        let direction = match self.order {
            Order::Asc => SortDirection::Asc,
            Order::Desc => SortDirection::Desc,
        };
        (order_by, direction)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HolderEntry {
    pub address: String,
    pub balance: String,
    pub percentage: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedHolders {
    pub data: Vec<HolderEntry>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
    pub total_pages: usize,
    pub has_next_page: bool,
    pub has_previous_page: bool,
}

const PERCENT_DECIMALS: u32 = 10;

/// Share of total supply as a percentage with ten decimal places. Widened to
/// 512 bits so the scaling multiply cannot overflow for any U256 balance.
pub fn format_percentage(balance: U256, total_supply: U256) -> String {
    if total_supply.is_zero() {
        return format!("0.{:0>width$}", "", width = PERCENT_DECIMALS as usize);
    }

    let frac_scale = U512::from(10u64).pow(U512::from(PERCENT_DECIMALS));
    let scaled = widen(balance) * frac_scale * U512::from(100u64) / widen(total_supply);

    let int = scaled / frac_scale;
    let frac = scaled % frac_scale;
    format!(
        "{}.{:0>width$}",
        int,
        frac.to_string(),
        width = PERCENT_DECIMALS as usize
    )
}

fn widen(value: U256) -> U512 {
    U512::from_limbs_slice(value.as_limbs())
}

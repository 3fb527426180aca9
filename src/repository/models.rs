use alloy_primitives::{Address, U256};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Holder {
    pub address: Address,
    pub balance: U256,
}

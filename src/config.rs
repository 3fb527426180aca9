use crate::resolver::ResolverSettings;
use crate::sync::SyncSettings;
use anyhow::{Context, Result};
use alloy_primitives::Address;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Etherscan-family transaction-history API.
    History,
    /// Direct JSON-RPC node.
    Node,
}

impl FromStr for SourceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "history" => Ok(SourceKind::History),
            "node" => Ok(SourceKind::Node),
            other => Err(anyhow::anyhow!(
                "DATA_SOURCE must be 'history' or 'node', got '{other}'"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub source_kind: SourceKind,
    pub history_api_url: String,
    pub history_api_key: String,
    pub json_rpc_urls: Vec<String>,
    pub token_address: Address,
    pub database_url: String,
    pub http_port: u16,
    pub sync: SyncSettings,
    pub resolver: ResolverSettings,
    pub sync_interval: Duration,
    pub reconcile_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let source_kind: SourceKind = std::env::var("DATA_SOURCE")
            .unwrap_or_else(|_| "history".to_string())
            .parse()?;

        let token_address_str =
            std::env::var("TOKEN_ADDRESS").context("TOKEN_ADDRESS must be set in .env")?;
        let token_address = Address::from_str(&token_address_str)
            .context("Invalid TOKEN_ADDRESS format")?;

        let history_api_url = std::env::var("HISTORY_API_URL")
            .unwrap_or_else(|_| "https://api.etherscan.io/api".to_string());
        let history_api_key = match source_kind {
            SourceKind::History => {
                std::env::var("HISTORY_API_KEY").context("HISTORY_API_KEY must be set in .env")?
            }
            SourceKind::Node => std::env::var("HISTORY_API_KEY").unwrap_or_default(),
        };

        let json_rpc_urls: Vec<String> = std::env::var("JSON_RPC_URLS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if source_kind == SourceKind::Node && json_rpc_urls.is_empty() {
            anyhow::bail!("JSON_RPC_URLS must be set in .env when DATA_SOURCE=node");
        }

        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:./holders.db".to_string());

        let http_port = env_parse("PORT", 3000u16)?;

        let sync = SyncSettings {
            start_block: env_parse("START_BLOCK", 0u64)?,
            block_chunk_size: env_parse("BLOCK_CHUNK_SIZE", 100_000u64)?.max(1),
            ..SyncSettings::default()
        };

        let resolver = ResolverSettings {
            batch_size: env_parse("RESOLVER_BATCH_SIZE", 100usize)?.max(1),
            max_in_flight: env_parse("RESOLVER_MAX_IN_FLIGHT", 5usize)?.max(1),
            wave_delay: Duration::from_millis(env_parse("RESOLVER_WAVE_DELAY_MS", 200u64)?),
        };

        let sync_interval = Duration::from_secs(env_parse("SYNC_INTERVAL_SECS", 10u64)?.max(1));
        let reconcile_interval =
            Duration::from_secs(env_parse("RECONCILE_INTERVAL_SECS", 600u64)?.max(1));

        Ok(Config {
            source_kind,
            history_api_url,
            history_api_key,
            json_rpc_urls,
            token_address,
            database_url,
            http_port,
            sync,
            resolver,
            sync_interval,
            reconcile_interval,
        })
    }
}

fn env_parse<T: FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(value) => value
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid {name} value: {value}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_kind_parses_case_insensitively() {
        assert_eq!("history".parse::<SourceKind>().unwrap(), SourceKind::History);
        assert_eq!("Node".parse::<SourceKind>().unwrap(), SourceKind::Node);
        assert!("etherscan".parse::<SourceKind>().is_err());
    }
}

use std::collections::HashMap;

use alloy_primitives::Address;
use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;

/// CLI flags and environment variables (§6): everything that isn't a
/// per-chain JSON config value lives here, loaded via `clap`'s `env`
/// feature so each field can come from either source.
#[derive(Debug, Parser)]
#[command(name = "rebate-engine", about = "Broker-side referral rebate engine")]
pub struct Cli {
    #[arg(long, env = "DATABASE_DSN_HISTORY")]
    pub database_dsn_history: String,

    #[arg(long, env = "CONFIG_PATH")]
    pub config_path: String,

    #[arg(long, env = "RPC_URL_PATH")]
    pub rpc_url_path: String,

    #[arg(long, env = "CHAIN_ID")]
    pub chain_id: u64,

    #[arg(long, env = "REMOTE_BROKER_HTTP")]
    pub remote_broker_http: String,

    /// Hex-encoded AES-256 key used to decrypt (and, on first run,
    /// re-encrypt) the executor signing key stored at `KEYFILE_PATH`.
    #[arg(long, env = "BROKER_KEY")]
    pub broker_key: String,

    #[arg(long, env = "KEYFILE_PATH")]
    pub keyfile_path: String,

    #[arg(long, env = "API_BIND_ADDR", default_value = "127.0.0.1")]
    pub api_bind_addr: String,

    #[arg(long, env = "API_PORT", default_value_t = 8080)]
    pub api_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenXConfig {
    pub address: Address,
    pub decimals: u8,
}

/// One chain's worth of the per-chain JSON config array (§6).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainConfig {
    pub chain_id: u64,
    pub payment_max_look_back_days: u32,
    pub payment_schedule_cron: String,
    pub token_x: TokenXConfig,
    pub referrer_cut_percent_for_token_x_holding: Vec<(f64, f64)>,
    pub broker_payout_addr: Address,
    pub broker_id: String,
}

pub fn load_chain_configs(path: &str) -> Result<Vec<ChainConfig>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading config file {path}"))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing config file {path}"))
}

pub fn chain_config_for(configs: &[ChainConfig], chain_id: u64) -> Result<&ChainConfig> {
    configs
        .iter()
        .find(|c| c.chain_id == chain_id)
        .with_context(|| format!("no config entry for chain id {chain_id}"))
}

/// The RPC endpoint list, keyed by chain id as a JSON string (the format
/// `serde_json` produces for a `HashMap<u64, _>` key).
pub fn load_rpc_endpoints(path: &str, chain_id: u64) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading RPC list {path}"))?;
    let by_chain: HashMap<String, Vec<String>> =
        serde_json::from_str(&raw).with_context(|| format!("parsing RPC list {path}"))?;
    by_chain
        .get(&chain_id.to_string())
        .cloned()
        .with_context(|| format!("no RPC endpoints configured for chain id {chain_id}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_config_parses_camel_case_json() {
        let json = r#"[{
            "chainId": 1,
            "paymentMaxLookBackDays": 30,
            "paymentScheduleCron": "0 0 * * *",
            "tokenX": {"address": "0x0000000000000000000000000000000000000001", "decimals": 18},
            "referrerCutPercentForTokenXHolding": [[10.0, 0.0], [20.0, 1000.0]],
            "brokerPayoutAddr": "0x0000000000000000000000000000000000000002",
            "brokerId": "broker-1"
        }]"#;
        let configs: Vec<ChainConfig> = serde_json::from_str(json).unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].broker_id, "broker-1");
        assert_eq!(configs[0].referrer_cut_percent_for_token_x_holding.len(), 2);
    }

    #[test]
    fn rpc_list_resolves_by_chain_id_string_key() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("rebate-engine-rpc-test-{}", std::process::id()));
        std::fs::write(&path, r#"{"1": ["http://a", "http://b"]}"#).unwrap();
        let endpoints = load_rpc_endpoints(path.to_str().unwrap(), 1).unwrap();
        assert_eq!(endpoints, vec!["http://a".to_string(), "http://b".to_string()]);
        std::fs::remove_file(&path).unwrap();
    }
}

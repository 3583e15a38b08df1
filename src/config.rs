//! CLI and environment configuration (§6 "Configuration", §2 "Config").
//!
//! Every field is overridable by flag or environment variable via `clap`'s
//! `env` feature; flags win when both are set. `private_key` never derives
//! `Debug` through the normal path — its custom impl redacts the value so
//! accidental `tracing::debug!(?config)` calls can't leak it.

use alloy::primitives::Address;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "monitoring-service", version, about = "Monitoring service for a state-channel payment network")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the monitoring service until a shutdown signal is received.
    Run(RunArgs),
}

#[derive(Parser, Clone)]
pub struct RunArgs {
    /// Chain id the node must report; mismatch against persisted state is fatal.
    #[arg(long, env = "MS_CHAIN_ID")]
    pub chain_id: u64,

    /// Root of token-network discovery.
    #[arg(long, env = "MS_REGISTRY_ADDRESS")]
    pub registry_address: Address,

    /// Contract this MS is registered in; identity anchor.
    #[arg(long, env = "MS_MONITORING_SERVICE_ADDRESS")]
    pub monitoring_service_address: Address,

    /// Source of reward funds for the reward-claim path.
    #[arg(long, env = "MS_USER_DEPOSIT_ADDRESS")]
    pub user_deposit_address: Address,

    /// Log confirmation depth.
    #[arg(long, env = "MS_REQUIRED_CONFIRMATIONS", default_value_t = 10)]
    pub required_confirmations: u64,

    /// Main-loop cadence when idle, in seconds.
    #[arg(long, env = "MS_POLL_INTERVAL_SECS", default_value_t = 15)]
    pub poll_interval_secs: u64,

    /// First block considered on a fresh database.
    #[arg(long, env = "MS_SYNC_START_BLOCK", default_value_t = 0)]
    pub sync_start_block: u64,

    /// Fraction of settle_timeout to wait before monitoring.
    #[arg(long, env = "MS_MONITOR_FRACTION", default_value_t = 0.8)]
    pub monitor_fraction: f64,

    /// Blocks to wait after settlement before claiming reward.
    #[arg(long, env = "MS_CLAIM_DELAY_BLOCKS", default_value_t = 0)]
    pub claim_delay_blocks: u64,

    /// Path/URL to the embedded SQL store.
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://monitoring.db")]
    pub database_url: String,

    /// JSON-RPC endpoint of the blockchain node.
    #[arg(long, env = "MS_RPC_URL")]
    pub rpc_url: String,

    /// Hex-encoded MS signing key. Never logged.
    #[arg(long, env = "MS_PRIVATE_KEY")]
    pub private_key: RedactedString,

    /// Bind address for the `/health` + `/metrics` HTTP surface.
    #[arg(long, env = "MS_METRICS_ADDR")]
    pub metrics_addr: Option<std::net::SocketAddr>,
}

/// A `String` newtype whose `Debug` impl never prints its contents.
#[derive(Clone)]
pub struct RedactedString(String);

impl RedactedString {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for RedactedString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("<redacted>")
    }
}

impl std::str::FromStr for RedactedString {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

#[derive(Debug)]
pub struct RunConfig {
    pub chain_id: u64,
    pub registry_address: Address,
    pub monitoring_service_address: Address,
    pub user_deposit_address: Address,
    pub required_confirmations: u64,
    pub poll_interval_secs: u64,
    pub sync_start_block: u64,
    pub monitor_fraction: f64,
    pub claim_delay_blocks: u64,
    pub database_url: String,
    pub rpc_url: String,
    pub private_key: RedactedString,
    pub metrics_addr: Option<std::net::SocketAddr>,
}

impl RunArgs {
    pub fn into_config(self) -> Result<RunConfig, String> {
        if !(0.0..1.0).contains(&self.monitor_fraction) {
            return Err(format!("monitor_fraction must be in (0, 1), got {}", self.monitor_fraction));
        }
        if self.required_confirmations == 0 {
            return Err("required_confirmations must be >= 1".into());
        }
        Ok(RunConfig {
            chain_id: self.chain_id,
            registry_address: self.registry_address,
            monitoring_service_address: self.monitoring_service_address,
            user_deposit_address: self.user_deposit_address,
            required_confirmations: self.required_confirmations,
            poll_interval_secs: self.poll_interval_secs,
            sync_start_block: self.sync_start_block,
            monitor_fraction: self.monitor_fraction,
            claim_delay_blocks: self.claim_delay_blocks,
            database_url: self.database_url,
            rpc_url: self.rpc_url,
            private_key: self.private_key,
            metrics_addr: self.metrics_addr,
        })
    }
}

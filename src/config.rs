use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("missing required setting: {0}")]
    Missing(&'static str),
    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub contracts: ContractsConfig,
    #[serde(default)]
    pub actor: ActorConfig,
    #[serde(default)]
    pub keeper: KeeperConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkConfig {
    /// HTTP endpoint for reads and submissions
    #[serde(default)]
    pub rpc_url: String,
    /// WebSocket endpoint for the live log subscription
    #[serde(default)]
    pub wss_url: String,
    /// First block scanned by the bootstrap log queries
    #[serde(default)]
    pub from_block: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContractsConfig {
    #[serde(default)]
    pub infra_market: String,
    #[serde(default)]
    pub batch_sweeper: String,
}

#[derive(Clone, Default, Deserialize)]
pub struct ActorConfig {
    /// Hex private key. Prefer ACTOR_PRIVATE_KEY over storing it in the file.
    #[serde(default)]
    pub private_key: String,
}

// Keep the key out of debug output.
impl std::fmt::Debug for ActorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorConfig")
            .field("private_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeeperConfig {
    /// Extra tip as a percentage of the quoted fee
    #[serde(default = "default_gas_ratio")]
    pub gas_ratio: u64,
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    /// Added to every ledger deadline before a timer is armed
    #[serde(default = "default_margin_secs")]
    pub margin_secs: u64,
    #[serde(default = "default_failure_pause_ms")]
    pub failure_pause_ms: u64,
    #[serde(default = "default_receipt_poll_ms")]
    pub receipt_poll_ms: u64,
    /// A transaction not confirmed within this bound is dropped
    #[serde(default = "default_confirm_timeout_secs")]
    pub confirm_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_heartbeat_interval")]
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_gas_ratio() -> u64 {
    20
}
fn default_confirmations() -> u64 {
    1
}
fn default_retry_interval_ms() -> u64 {
    1000
}
fn default_margin_secs() -> u64 {
    5
}
fn default_failure_pause_ms() -> u64 {
    1000
}
fn default_receipt_poll_ms() -> u64 {
    1000
}
fn default_confirm_timeout_secs() -> u64 {
    300
}
fn default_heartbeat_interval() -> u64 {
    60
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            gas_ratio: default_gas_ratio(),
            confirmations: default_confirmations(),
            retry_interval_ms: default_retry_interval_ms(),
            margin_secs: default_margin_secs(),
            failure_pause_ms: default_failure_pause_ms(),
            receipt_poll_ms: default_receipt_poll_ms(),
            confirm_timeout_secs: default_confirm_timeout_secs(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            url: None,
            interval_secs: default_heartbeat_interval(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Settings after validation: every required value present and parsed.
#[derive(Clone)]
pub struct Settings {
    pub rpc_url: String,
    pub wss_url: String,
    pub from_block: u64,
    pub infra_market: Address,
    pub batch_sweeper: Address,
    pub signer: PrivateKeySigner,
    pub gas_ratio: u64,
    pub confirmations: u64,
    pub retry_interval: Duration,
    pub margin: Duration,
    pub failure_pause: Duration,
    pub receipt_poll: Duration,
    pub confirm_timeout: Duration,
    pub heartbeat: Option<(String, Duration)>,
}

impl Settings {
    /// Address that signs and receives incentives.
    pub fn actor(&self) -> Address {
        self.signer.address()
    }
}

impl Config {
    /// Load from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Build from environment variables alone.
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Overlay values from `lookup`. Unparsable numbers are ignored so the
    /// file (or default) value stays in effect.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let set = |target: &mut String, key: &str| {
            if let Some(v) = lookup(key) {
                *target = v;
            }
        };
        set(&mut self.network.rpc_url, "RPC_URL");
        set(&mut self.network.wss_url, "WSS_URL");
        set(&mut self.contracts.infra_market, "INFRA_MARKET_ADDRESS");
        set(&mut self.contracts.batch_sweeper, "BATCH_SWEEPER_ADDRESS");
        set(&mut self.actor.private_key, "ACTOR_PRIVATE_KEY");

        let num = |target: &mut u64, key: &str| {
            if let Some(v) = lookup(key).and_then(|v| v.trim().parse().ok()) {
                *target = v;
            }
        };
        num(&mut self.network.from_block, "FROM_BLOCK");
        num(&mut self.keeper.gas_ratio, "GAS_RATIO");
        num(&mut self.keeper.confirmations, "CONFIRMATIONS");
        num(&mut self.keeper.retry_interval_ms, "RETRY_INTERVAL");
        num(&mut self.keeper.margin_secs, "MARGIN_SECS");
        num(&mut self.keeper.failure_pause_ms, "FAILURE_PAUSE_MS");
        num(&mut self.keeper.receipt_poll_ms, "RECEIPT_POLL_MS");
        num(&mut self.keeper.confirm_timeout_secs, "CONFIRM_TIMEOUT_SECS");
        num(&mut self.heartbeat.interval_secs, "HEARTBEAT_INTERVAL");

        if let Some(url) = lookup("HEARTBEAT_URL") {
            self.heartbeat.url = Some(url);
        }
    }

    /// Check required settings and parse them. Any error here is fatal.
    pub fn validate(&self) -> Result<Settings, ConfigError> {
        let rpc_url = required(&self.network.rpc_url, "network.rpc_url")?;
        let wss_url = required(&self.network.wss_url, "network.wss_url")?;
        let infra_market = parse_address(&self.contracts.infra_market, "contracts.infra_market")?;
        let batch_sweeper =
            parse_address(&self.contracts.batch_sweeper, "contracts.batch_sweeper")?;

        let key = required(&self.actor.private_key, "actor.private_key")?;
        let signer = PrivateKeySigner::from_str(&key).map_err(|e| ConfigError::Invalid {
            key: "actor.private_key",
            reason: e.to_string(),
        })?;

        if self.keeper.confirmations == 0 {
            return Err(ConfigError::Invalid {
                key: "keeper.confirmations",
                reason: "must be at least 1".to_string(),
            });
        }

        let heartbeat = self
            .heartbeat
            .url
            .as_ref()
            .filter(|url| !url.trim().is_empty())
            .map(|url| {
                (
                    url.trim().to_string(),
                    Duration::from_secs(self.heartbeat.interval_secs.max(1)),
                )
            });

        Ok(Settings {
            rpc_url,
            wss_url,
            from_block: self.network.from_block,
            infra_market,
            batch_sweeper,
            signer,
            gas_ratio: self.keeper.gas_ratio,
            confirmations: self.keeper.confirmations,
            retry_interval: Duration::from_millis(self.keeper.retry_interval_ms),
            margin: Duration::from_secs(self.keeper.margin_secs),
            failure_pause: Duration::from_millis(self.keeper.failure_pause_ms),
            receipt_poll: Duration::from_millis(self.keeper.receipt_poll_ms.max(1)),
            confirm_timeout: Duration::from_secs(self.keeper.confirm_timeout_secs.max(1)),
            heartbeat,
        })
    }
}

fn required(value: &str, key: &'static str) -> Result<String, ConfigError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ConfigError::Missing(key));
    }
    Ok(value.to_string())
}

fn parse_address(value: &str, key: &'static str) -> Result<Address, ConfigError> {
    let value = required(value, key)?;
    Address::from_str(&value).map_err(|e| ConfigError::Invalid {
        key,
        reason: e.to_string(),
    })
}

//! Service configuration
//!
//! Defaults for every section, an optional TOML file on top, then `DUELGATE_*`
//! environment overrides, then validation.

use crate::errors::{ConfigurationError, DuelgateResult};
use crate::games::GameKind;
use crate::settlement::TokenRegistry;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DuelgateConfig {
    pub api: ApiConfig,
    pub dispatcher: DispatcherConfig,
    pub settlement: SettlementConfig,
    pub duels: DuelsConfig,
    pub servers: ServersConfig,
    pub storage: StorageConfig,
    pub gateway: GatewayConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
    pub enable_cors: bool,
    /// Shared secret referee bots send in `x-api-key`
    pub referee_api_key: Option<String>,
    /// Shared secret for `/api/admin/*`
    pub admin_api_key: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout_secs: 30,
            enable_cors: true,
            referee_api_key: None,
            admin_api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub enabled: bool,
    pub poll_interval_secs: u64,
    /// Upper bound on tasks fetched per cycle
    pub batch_size: usize,
}

impl DispatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: 15,
            batch_size: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    pub enabled: bool,
    /// Send confirmed pots to the winner's payout address instead of their balance
    pub auto_payout: bool,
    pub network_endpoint: String,
    /// Signing credential for the transfer network
    pub signer_key: Option<String>,
    pub token: String,
    /// Internal currency units per whole token
    pub units_per_token: u64,
    pub init_max_attempts: u32,
    pub init_retry_delay_secs: u64,
    /// How long a caller waits before re-checking an initialisation in progress
    pub init_wait_ms: u64,
    pub warmup_on_start: bool,
}

impl SettlementConfig {
    pub fn init_retry_delay(&self) -> Duration {
        Duration::from_secs(self.init_retry_delay_secs)
    }

    pub fn init_wait(&self) -> Duration {
        Duration::from_millis(self.init_wait_ms)
    }

    /// Credentials the transfer network needs before any payout can run
    pub fn require_credentials(&self) -> Result<&str, ConfigurationError> {
        match self.signer_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => Ok(key),
            _ => Err(ConfigurationError::MissingRequired(
                "settlement.signer_key".to_string(),
            )),
        }
    }
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_payout: false,
            network_endpoint: "https://rpc.example.invalid".to_string(),
            signer_key: None,
            token: "USDC".to_string(),
            units_per_token: 100,
            init_max_attempts: 5,
            init_retry_delay_secs: 5,
            init_wait_ms: 250,
            warmup_on_start: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DuelsConfig {
    pub min_wager: u64,
    pub max_wager: u64,
    /// House cut of a quick-match escrow, in basis points
    pub quick_match_fee_bps: u32,
    /// Void and refund duels stuck in play longer than this. Disabled when unset.
    pub stale_refund_after_secs: Option<u64>,
    pub stale_sweep_interval_secs: u64,
    /// Base URL used for action links in DMs
    pub action_base_url: String,
}

impl DuelsConfig {
    pub fn stale_refund_after(&self) -> Option<Duration> {
        self.stale_refund_after_secs.map(Duration::from_secs)
    }

    pub fn stale_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.stale_sweep_interval_secs)
    }
}

impl Default for DuelsConfig {
    fn default() -> Self {
        Self {
            min_wager: 1,
            max_wager: 1_000_000,
            quick_match_fee_bps: 0,
            stale_refund_after_secs: None,
            stale_sweep_interval_secs: 60,
            action_base_url: "https://duels.example.invalid/duels".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerEntry {
    pub game: GameKind,
    pub region: String,
    pub link: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServersConfig {
    pub pool: Vec<ServerEntry>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Rocksdb,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "rocksdb" => Ok(StorageBackend::Rocksdb),
            other => Err(format!("unknown storage backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            data_dir: "./duelgate_data".to_string(),
        }
    }
}

/// Channel and role names the notification handlers act on
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub results_channel: String,
    pub announcements_channel: String,
    /// Status channels are named `<prefix><region>-<status>`
    pub status_channel_prefix: String,
    pub linked_role: String,
    pub ticket_transcript_channel: String,
    pub support_role: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            results_channel: "duel-results".to_string(),
            announcements_channel: "announcements".to_string(),
            status_channel_prefix: "servers-".to_string(),
            linked_role: "linked".to_string(),
            ticket_transcript_channel: "ticket-transcripts".to_string(),
            support_role: "support".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive; `RUST_LOG` wins when set
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "duelgate=info,tower_http=info".to_string(),
        }
    }
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> ConfigurationError {
    ConfigurationError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_env<T: FromStr>(key: &str, raw: String, reason: &str) -> Result<T, ConfigurationError> {
    raw.trim().parse().map_err(|_| invalid(key, &raw, reason))
}

/// Configuration loader with file, environment and validation stages
#[derive(Debug, Default)]
pub struct ConfigLoader {
    config_path: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Set the configuration file path
    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Load configuration from file and environment variables
    pub fn load(&self) -> DuelgateResult<DuelgateConfig> {
        let mut config = match self.config_path {
            Some(ref path) => self.load_from_file(path)?,
            None => DuelgateConfig::default(),
        };

        self.apply_env_overrides(&mut config, |key| env::var(key).ok())?;
        self.validate(&config)?;
        Ok(config)
    }

    fn load_from_file(&self, path: &str) -> DuelgateResult<DuelgateConfig> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to read {}: {}", path, e)))?;

        toml::from_str(&content)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to parse TOML: {}", e)).into())
    }

    /// Apply `DUELGATE_*` overrides read through `lookup`
    pub fn apply_env_overrides<F>(
        &self,
        config: &mut DuelgateConfig,
        lookup: F,
    ) -> Result<(), ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("DUELGATE_API_HOST") {
            config.api.host = host;
        }
        if let Some(port) = lookup("DUELGATE_API_PORT") {
            config.api.port = parse_env("DUELGATE_API_PORT", port, "Invalid port number")?;
        }
        if let Some(key) = lookup("DUELGATE_REFEREE_API_KEY") {
            config.api.referee_api_key = Some(key);
        }
        if let Some(key) = lookup("DUELGATE_ADMIN_API_KEY") {
            config.api.admin_api_key = Some(key);
        }

        if let Some(secs) = lookup("DUELGATE_DISPATCH_INTERVAL_SECS") {
            config.dispatcher.poll_interval_secs =
                parse_env("DUELGATE_DISPATCH_INTERVAL_SECS", secs, "Invalid interval")?;
        }

        if let Some(flag) = lookup("DUELGATE_AUTO_PAYOUT") {
            config.settlement.auto_payout =
                parse_env("DUELGATE_AUTO_PAYOUT", flag, "Invalid boolean value")?;
        }
        if let Some(endpoint) = lookup("DUELGATE_SETTLEMENT_ENDPOINT") {
            config.settlement.network_endpoint = endpoint;
        }
        if let Some(key) = lookup("DUELGATE_SETTLEMENT_SIGNER_KEY") {
            config.settlement.signer_key = Some(key);
        }

        if let Some(secs) = lookup("DUELGATE_STALE_REFUND_AFTER_SECS") {
            config.duels.stale_refund_after_secs = Some(parse_env(
                "DUELGATE_STALE_REFUND_AFTER_SECS",
                secs,
                "Invalid duration in seconds",
            )?);
        }

        if let Some(backend) = lookup("DUELGATE_STORAGE_BACKEND") {
            config.storage.backend =
                parse_env("DUELGATE_STORAGE_BACKEND", backend, "Expected memory or rocksdb")?;
        }
        if let Some(dir) = lookup("DUELGATE_DATA_DIR") {
            config.storage.data_dir = dir;
        }

        if let Some(filter) = lookup("DUELGATE_LOG_FILTER") {
            config.logging.filter = filter;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self, config: &DuelgateConfig) -> Result<(), ConfigurationError> {
        if config.api.port == 0 {
            return Err(invalid("api.port", 0, "Port cannot be zero"));
        }
        if config.api.request_timeout_secs == 0 {
            return Err(invalid("api.request_timeout_secs", 0, "Timeout cannot be zero"));
        }

        if config.dispatcher.poll_interval_secs == 0 {
            return Err(invalid(
                "dispatcher.poll_interval_secs",
                0,
                "Poll interval cannot be zero",
            ));
        }
        if config.dispatcher.batch_size == 0 {
            return Err(invalid("dispatcher.batch_size", 0, "Batch size cannot be zero"));
        }

        if config.settlement.init_max_attempts == 0 {
            return Err(invalid(
                "settlement.init_max_attempts",
                0,
                "At least one connection attempt is required",
            ));
        }
        if config.settlement.units_per_token == 0 {
            return Err(invalid(
                "settlement.units_per_token",
                0,
                "Conversion rate cannot be zero",
            ));
        }
        if config.settlement.token.trim().is_empty() {
            return Err(ConfigurationError::MissingRequired("settlement.token".to_string()));
        }
        if config.settlement.enabled {
            let token = TokenRegistry::standard()
                .get(&config.settlement.token)
                .map_err(|_| invalid("settlement.token", &config.settlement.token, "Unsupported token"))?
                .clone();
            if !token.divides_evenly(config.settlement.units_per_token) {
                return Err(invalid(
                    "settlement.units_per_token",
                    config.settlement.units_per_token,
                    "Payout amounts would need more precision than the token has",
                ));
            }
        }

        if config.duels.min_wager == 0 {
            return Err(invalid("duels.min_wager", 0, "Wagers must be positive"));
        }
        if config.duels.max_wager < config.duels.min_wager {
            return Err(invalid(
                "duels.max_wager",
                config.duels.max_wager,
                "Must not be below duels.min_wager",
            ));
        }
        if config.duels.quick_match_fee_bps >= 10_000 {
            return Err(invalid(
                "duels.quick_match_fee_bps",
                config.duels.quick_match_fee_bps,
                "Fee must be below 10000 basis points",
            ));
        }
        if config.duels.stale_refund_after_secs == Some(0) {
            return Err(invalid(
                "duels.stale_refund_after_secs",
                0,
                "Leave unset to disable the sweeper",
            ));
        }
        if config.duels.stale_sweep_interval_secs == 0 {
            return Err(invalid(
                "duels.stale_sweep_interval_secs",
                0,
                "Sweep interval cannot be zero",
            ));
        }

        if config.storage.backend == StorageBackend::Rocksdb && config.storage.data_dir.is_empty() {
            return Err(ConfigurationError::MissingRequired("storage.data_dir".to_string()));
        }

        for entry in &config.servers.pool {
            if entry.link.trim().is_empty() || entry.region.trim().is_empty() {
                return Err(invalid(
                    "servers.pool",
                    format!("{}/{}", entry.game, entry.region),
                    "Server entries need a region and a link",
                ));
            }
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self, config: &DuelgateConfig, path: &str) -> DuelgateResult<()> {
        let toml_string = Self::render(config)?;
        std::fs::write(path, toml_string)
            .map_err(|e| ConfigurationError::SaveFailed(format!("Failed to write to {}: {}", path, e)).into())
    }

    pub fn render(config: &DuelgateConfig) -> Result<String, ConfigurationError> {
        toml::to_string_pretty(config)
            .map_err(|e| ConfigurationError::SaveFailed(format!("Failed to serialize config: {}", e)))
    }
}

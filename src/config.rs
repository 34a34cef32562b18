//! Configuration module for the SD operator CLI
//!
//! This module handles configuration loading from TOML files, `.env` files
//! and `SD_OPERATOR_*` environment variables. Tolerances and timeouts live
//! here and are passed explicitly into the calculators and the orchestrator.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::types::GasSettings;
use crate::units::gwei_to_wei;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Chain backend
    #[serde(default)]
    pub chain: ChainConfig,

    /// Settlement calculator tuning
    #[serde(default)]
    pub settlement: SettlementConfig,

    /// Transaction submission
    #[serde(default)]
    pub transactions: TransactionConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Simulated chain state file
    #[serde(default = "default_state_path")]
    pub state_path: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SettlementConfig {
    /// Relative tolerance for snapping a repayment to the full debt (parts per billion)
    #[serde(default = "default_repay_tolerance_ppb")]
    pub repay_tolerance_ppb: u64,

    /// Require an allowance check before repaying from excess collateral
    #[serde(default)]
    pub check_allowance_on_repay_excess: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionConfig {
    /// Upper bound on a single inclusion wait
    #[serde(default = "default_inclusion_timeout")]
    pub inclusion_timeout_secs: u64,

    /// Default max fee per gas in gwei (node default when unset)
    #[serde(default)]
    pub max_fee_gwei: Option<f64>,

    /// Default priority fee per gas in gwei (node default when unset)
    #[serde(default)]
    pub max_priority_fee_gwei: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON log lines instead of the human format
    #[serde(default)]
    pub json: bool,

    /// `EnvFilter` directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

// Default value functions
fn default_state_path() -> String {
    "chain-state.toml".to_string()
}
fn default_repay_tolerance_ppb() -> u64 {
    1_000
}
fn default_inclusion_timeout() -> u64 {
    600
}
fn default_log_filter() -> String {
    "sd_operator=info,warn".to_string()
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
        }
    }
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            repay_tolerance_ppb: default_repay_tolerance_ppb(),
            check_allowance_on_repay_excess: false,
        }
    }
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            inclusion_timeout_secs: default_inclusion_timeout(),
            max_fee_gwei: None,
            max_priority_fee_gwei: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json: false,
            filter: default_log_filter(),
        }
    }
}

impl TransactionConfig {
    pub fn inclusion_timeout(&self) -> Duration {
        Duration::from_secs(self.inclusion_timeout_secs)
    }

    /// Gas settings from the configured fee defaults
    pub fn gas_settings(&self) -> Result<GasSettings> {
        Ok(GasSettings {
            max_fee_per_gas: self.max_fee_gwei.map(gwei_to_wei).transpose()?,
            max_priority_fee_per_gas: self.max_priority_fee_gwei.map(gwei_to_wei).transpose()?,
            gas_limit: None,
        })
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config: {}", path))?;
        Ok(config)
    }

    /// Load configuration with `.env` and environment variable overrides
    pub fn from_file_with_env(path: &str) -> Result<Self> {
        Self::from_file(path)?.with_env_layer(None)
    }

    /// Defaults plus `.env` and environment variable overrides, for runs
    /// without a config file
    pub fn defaults_with_env() -> Result<Self> {
        Self::default().with_env_layer(None)
    }

    /// Load `dotenv` (or the nearest `.env`), apply overrides and validate
    fn with_env_layer(mut self, dotenv: Option<&std::path::Path>) -> Result<Self> {
        if let Some(path) = dotenv {
            dotenvy::from_path(path).ok();
        } else {
            dotenvy::dotenv().ok();
        }
        self.from_env()?;
        self.validate()?;
        Ok(self)
    }

    /// Apply `SD_OPERATOR_*` overrides from the process environment
    pub fn from_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("SD_OPERATOR_STATE_PATH") {
            self.chain.state_path = path;
        }
        if let Some(ppb) = lookup("SD_OPERATOR_REPAY_TOLERANCE_PPB") {
            self.settlement.repay_tolerance_ppb = ppb
                .parse()
                .map_err(|e| anyhow!("Invalid SD_OPERATOR_REPAY_TOLERANCE_PPB: {}", e))?;
        }
        if let Some(flag) = lookup("SD_OPERATOR_CHECK_ALLOWANCE_ON_REPAY_EXCESS") {
            self.settlement.check_allowance_on_repay_excess = flag.parse().map_err(|e| {
                anyhow!("Invalid SD_OPERATOR_CHECK_ALLOWANCE_ON_REPAY_EXCESS: {}", e)
            })?;
        }
        if let Some(secs) = lookup("SD_OPERATOR_INCLUSION_TIMEOUT_SECS") {
            self.transactions.inclusion_timeout_secs = secs
                .parse()
                .map_err(|e| anyhow!("Invalid SD_OPERATOR_INCLUSION_TIMEOUT_SECS: {}", e))?;
        }
        if let Some(gwei) = lookup("SD_OPERATOR_MAX_FEE_GWEI") {
            self.transactions.max_fee_gwei = Some(
                gwei.parse()
                    .map_err(|e| anyhow!("Invalid SD_OPERATOR_MAX_FEE_GWEI: {}", e))?,
            );
        }
        if let Some(gwei) = lookup("SD_OPERATOR_PRIORITY_FEE_GWEI") {
            self.transactions.max_priority_fee_gwei = Some(
                gwei.parse()
                    .map_err(|e| anyhow!("Invalid SD_OPERATOR_PRIORITY_FEE_GWEI: {}", e))?,
            );
        }
        if let Some(flag) = lookup("SD_OPERATOR_LOG_JSON") {
            self.logging.json = flag
                .parse()
                .map_err(|e| anyhow!("Invalid SD_OPERATOR_LOG_JSON: {}", e))?;
        }
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.settlement.repay_tolerance_ppb > 1_000_000 {
            return Err(anyhow!(
                "repay_tolerance_ppb must be <= 1000000 (0.1%), got {}",
                self.settlement.repay_tolerance_ppb
            ));
        }
        if self.transactions.inclusion_timeout_secs == 0 {
            return Err(anyhow!("inclusion_timeout_secs must be > 0"));
        }
        if self.chain.state_path.trim().is_empty() {
            return Err(anyhow!("state_path must not be empty"));
        }
        self.transactions
            .gas_settings()
            .context("Invalid gas fee defaults")?;
        Ok(())
    }
}

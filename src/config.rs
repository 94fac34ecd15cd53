//! Configuration module for the token launcher
//!
//! Configuration is loaded once at startup from a TOML file, overlaid with a
//! small set of environment overrides, validated, and then passed by
//! reference to everything that needs it. Nothing below `main` reads the
//! process environment.

use crate::errors::{LaunchError, LaunchResult};
use crate::fees::{FeeSchedule, DEFAULT_BASE_FEE_LAMPORTS, DEFAULT_OPTION_FEE_LAMPORTS};
use crate::submit::RetryConfig;
use serde::{Deserialize, Serialize};
use solana_sdk::{commitment_config::CommitmentConfig, pubkey::Pubkey};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Public endpoint used when no RPC endpoint is configured
pub const PUBLIC_FALLBACK_ENDPOINT: &str = "https://api.mainnet-beta.solana.com";

pub const ENV_RPC_URL: &str = "TOKEN_LAUNCHER_RPC_URL";
pub const ENV_FEE_COLLECTOR: &str = "TOKEN_LAUNCHER_FEE_COLLECTOR";
pub const ENV_KEYPAIR: &str = "TOKEN_LAUNCHER_KEYPAIR";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// RPC endpoint configuration
    #[serde(default)]
    pub rpc: RpcConfig,

    /// Service fee configuration
    #[serde(default)]
    pub fees: FeeConfig,

    /// Transaction submission and confirmation
    #[serde(default)]
    pub submission: SubmissionConfig,

    /// Wallet configuration
    #[serde(default)]
    pub wallet: WalletConfig,

    /// Launch checkpoint storage
    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    /// Monitoring and metrics
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Primary RPC endpoint
    #[serde(default)]
    pub endpoint: String,

    /// Endpoint used when `endpoint` is empty
    #[serde(default = "default_fallback_endpoint")]
    pub fallback_endpoint: String,

    /// Request timeout in seconds
    #[serde(default = "default_rpc_timeout")]
    pub timeout_secs: u64,

    /// Commitment level: processed, confirmed or finalized
    #[serde(default = "default_commitment")]
    pub commitment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeConfig {
    /// Account that receives the service fee (base58)
    #[serde(default)]
    pub collector: Option<String>,

    /// Base service fee in lamports
    #[serde(default = "default_base_fee")]
    pub base_fee_lamports: u64,

    /// Surcharge per selected option in lamports
    #[serde(default = "default_option_fee")]
    pub option_fee_lamports: u64,

    /// Base network fee per transaction signature in lamports
    #[serde(default = "default_lamports_per_signature")]
    pub lamports_per_signature: u64,
}

/// How the plan is split into transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyPreference {
    /// Single atomic transaction when it fits, saga otherwise
    Auto,
    /// Always a single transaction; fail if it does not fit
    Atomic,
    /// Always sequential transactions
    Saga,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionConfig {
    #[serde(default = "default_strategy")]
    pub strategy: StrategyPreference,

    /// Upper bound on instructions packed into one transaction
    #[serde(default = "default_max_instructions")]
    pub max_instructions_per_tx: usize,

    /// Confirmation polling timeout per transaction
    #[serde(default = "default_confirm_timeout")]
    pub confirm_timeout_secs: u64,

    /// Interval between signature status polls
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Compute unit limit (0 = do not set)
    #[serde(default)]
    pub compute_unit_limit: u32,

    /// Priority fee in micro-lamports per compute unit (0 = do not set)
    #[serde(default)]
    pub priority_fee_micro_lamports: u64,

    /// Retry policy for associated-account creation races
    #[serde(default)]
    pub retry: RetrySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base_backoff")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_retry_max_backoff")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_retry_jitter")]
    pub jitter_factor: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WalletConfig {
    /// Path to keypair file used by the CLI signer
    #[serde(default)]
    pub keypair_path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Directory of the sled checkpoint database; in-memory when unset
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Enable Prometheus metrics collection
    #[serde(default = "default_true")]
    pub enable_metrics: bool,

    /// Emit logs as JSON lines
    #[serde(default)]
    pub json_logs: bool,
}

// Default value functions
fn default_fallback_endpoint() -> String { PUBLIC_FALLBACK_ENDPOINT.to_string() }
fn default_rpc_timeout() -> u64 { 30 }
fn default_commitment() -> String { "confirmed".to_string() }
fn default_base_fee() -> u64 { DEFAULT_BASE_FEE_LAMPORTS }
fn default_option_fee() -> u64 { DEFAULT_OPTION_FEE_LAMPORTS }
fn default_lamports_per_signature() -> u64 { 5_000 }
fn default_strategy() -> StrategyPreference { StrategyPreference::Auto }
fn default_max_instructions() -> usize { 12 }
fn default_confirm_timeout() -> u64 { 60 }
fn default_poll_interval() -> u64 { 500 }
fn default_retry_attempts() -> u32 { 3 }
fn default_retry_base_backoff() -> u64 { 250 }
fn default_retry_max_backoff() -> u64 { 2000 }
fn default_retry_jitter() -> f64 { 0.2 }
fn default_true() -> bool { true }

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            fallback_endpoint: default_fallback_endpoint(),
            timeout_secs: default_rpc_timeout(),
            commitment: default_commitment(),
        }
    }
}

impl RpcConfig {
    /// Configured endpoint, or the public fallback when none is set
    pub fn effective_endpoint(&self) -> &str {
        if self.endpoint.trim().is_empty() {
            self.fallback_endpoint.trim()
        } else {
            self.endpoint.trim()
        }
    }

    pub fn commitment_config(&self) -> CommitmentConfig {
        match self.commitment.as_str() {
            "processed" => CommitmentConfig::processed(),
            "finalized" => CommitmentConfig::finalized(),
            _ => CommitmentConfig::confirmed(),
        }
    }
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            collector: None,
            base_fee_lamports: default_base_fee(),
            option_fee_lamports: default_option_fee(),
            lamports_per_signature: default_lamports_per_signature(),
        }
    }
}

impl FeeConfig {
    pub fn schedule(&self) -> FeeSchedule {
        FeeSchedule {
            base_lamports: self.base_fee_lamports,
            per_option_lamports: self.option_fee_lamports,
        }
    }

    /// Parsed collector address
    pub fn collector_pubkey(&self) -> LaunchResult<Pubkey> {
        let raw = self
            .collector
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| LaunchError::Configuration("fee collector address is not set".into()))?;
        Pubkey::from_str(raw).map_err(|e| {
            LaunchError::Configuration(format!("fee collector '{}' is invalid: {}", raw, e))
        })
    }
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            max_instructions_per_tx: default_max_instructions(),
            confirm_timeout_secs: default_confirm_timeout(),
            poll_interval_ms: default_poll_interval(),
            compute_unit_limit: 0,
            priority_fee_micro_lamports: 0,
            retry: RetrySettings::default(),
        }
    }
}

impl SubmissionConfig {
    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.confirm_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Priority fee implied by the compute budget, in lamports per transaction
    pub fn priority_fee_lamports(&self) -> u64 {
        if self.compute_unit_limit == 0 || self.priority_fee_micro_lamports == 0 {
            return 0;
        }
        let micro = (self.compute_unit_limit as u128) * (self.priority_fee_micro_lamports as u128);
        micro.div_ceil(1_000_000) as u64
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            base_backoff_ms: default_retry_base_backoff(),
            max_backoff_ms: default_retry_max_backoff(),
            jitter_factor: default_retry_jitter(),
        }
    }
}

impl RetrySettings {
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            base_backoff_ms: self.base_backoff_ms,
            max_backoff_ms: self.max_backoff_ms,
            jitter_factor: self.jitter_factor,
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enable_metrics: default_true(),
            json_logs: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc: RpcConfig::default(),
            fees: FeeConfig::default(),
            submission: SubmissionConfig::default(),
            wallet: WalletConfig::default(),
            checkpoint: CheckpointConfig::default(),
            monitoring: MonitoringConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides
    ///
    /// `.env` is read first (if present), then the process environment is
    /// snapshotted once and applied over the file values.
    pub fn from_file_with_env(path: &str) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::from_file(path)?;
        config.apply_env(&std::env::vars().collect());
        Ok(config)
    }

    /// Apply overrides from an environment snapshot
    pub fn apply_env(&mut self, env: &HashMap<String, String>) {
        if let Some(url) = env.get(ENV_RPC_URL).filter(|v| !v.trim().is_empty()) {
            self.rpc.endpoint = url.trim().to_string();
        }
        if let Some(collector) = env.get(ENV_FEE_COLLECTOR).filter(|v| !v.trim().is_empty()) {
            self.fees.collector = Some(collector.trim().to_string());
        }
        if let Some(path) = env.get(ENV_KEYPAIR).filter(|v| !v.trim().is_empty()) {
            self.wallet.keypair_path = Some(path.trim().to_string());
        }
    }

    /// Validate configuration, returning a `Configuration` error on the first problem
    pub fn validate(&self) -> LaunchResult<()> {
        if self.rpc.effective_endpoint().is_empty() {
            return Err(LaunchError::Configuration("no RPC endpoint configured".into()));
        }
        if self.rpc.timeout_secs == 0 {
            return Err(LaunchError::Configuration("rpc.timeout_secs must be > 0".into()));
        }
        if !matches!(
            self.rpc.commitment.as_str(),
            "processed" | "confirmed" | "finalized"
        ) {
            return Err(LaunchError::Configuration(format!(
                "unknown commitment level '{}'",
                self.rpc.commitment
            )));
        }
        self.fees.collector_pubkey()?;
        if self.submission.confirm_timeout_secs == 0 {
            return Err(LaunchError::Configuration(
                "submission.confirm_timeout_secs must be > 0".into(),
            ));
        }
        if self.submission.poll_interval_ms == 0 {
            return Err(LaunchError::Configuration(
                "submission.poll_interval_ms must be > 0".into(),
            ));
        }
        if self.submission.max_instructions_per_tx == 0 {
            return Err(LaunchError::Configuration(
                "submission.max_instructions_per_tx must be > 0".into(),
            ));
        }
        if self.submission.retry.max_attempts == 0 {
            return Err(LaunchError::Configuration(
                "submission.retry.max_attempts must be > 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.submission.retry.jitter_factor) {
            return Err(LaunchError::Configuration(
                "submission.retry.jitter_factor must be within [0, 1]".into(),
            ));
        }
        Ok(())
    }
}

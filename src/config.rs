//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (RPC credentials embedded in URLs) are referenced by env-var
//! name in the config and resolved at runtime via `std::env::var`.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub paper: PaperConfig,
    /// Chain id → chain settings.
    #[serde(default)]
    pub chains: HashMap<String, ChainConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// e.g. `sqlite://mmbot.db`
    pub url: String,
}

/// Which weight the selector uses when picking a wallet for a sell tick.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SellWeight {
    /// Reuse the buy-side weight (legacy behaviour).
    #[default]
    Buy,
    /// Use the sell-side weight.
    Sell,
}

/// Knobs for order sizing, scheduling and event fan-out.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EngineConfig {
    /// Fixed delay between side evaluations.
    pub tick_throttle_ms: u64,
    /// Jitter band (percent) applied to order sizes and wait times.
    pub jitter_min_pct: u32,
    pub jitter_max_pct: u32,
    /// Significant digits kept on a jittered buy size.
    pub buy_digits_min: u32,
    pub buy_digits_max: u32,
    /// Significant digits kept on an exact-token-in sell amount.
    pub sell_token_digits_min: u32,
    pub sell_token_digits_max: u32,
    /// Extra token balance (percent of the quote) a wallet needs to sell.
    pub sell_margin_pct: u32,
    /// Sell delay applied when a start request does not carry one.
    pub default_sell_delay_mins: u64,
    /// Per-subscriber buffer; slower subscribers drop the oldest events.
    pub event_buffer: usize,
    pub sell_selection_weight: SellWeight,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_throttle_ms: 1000,
            jitter_min_pct: 5,
            jitter_max_pct: 195,
            buy_digits_min: 3,
            buy_digits_max: 6,
            sell_token_digits_min: 1,
            sell_token_digits_max: 5,
            sell_margin_pct: 1,
            default_sell_delay_mins: 10,
            event_buffer: 256,
            sell_selection_weight: SellWeight::Buy,
        }
    }
}

impl EngineConfig {
    /// Reject ranges that would make the sizer or scheduler misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.jitter_min_pct == 0 || self.jitter_min_pct > self.jitter_max_pct {
            bail!(
                "Invalid jitter band {}..={}",
                self.jitter_min_pct,
                self.jitter_max_pct
            );
        }
        if self.buy_digits_min == 0 || self.buy_digits_min > self.buy_digits_max {
            bail!(
                "Invalid buy digit range {}..={}",
                self.buy_digits_min,
                self.buy_digits_max
            );
        }
        if self.sell_token_digits_min == 0 || self.sell_token_digits_min > self.sell_token_digits_max {
            bail!(
                "Invalid sell token digit range {}..={}",
                self.sell_token_digits_min,
                self.sell_token_digits_max
            );
        }
        if self.event_buffer == 0 {
            bail!("event_buffer must be positive");
        }
        Ok(())
    }
}

/// Settings for the simulated venue used when no chain is wired.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PaperConfig {
    /// Whole tokens received per whole ETH.
    pub tokens_per_eth: u64,
    /// Starting native balance of every wallet, in wei.
    pub native_balance: String,
    /// Starting token balance of every wallet, in smallest units.
    pub token_balance: String,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            tokens_per_eth: 1_000_000,
            native_balance: "1000000000000000000".into(),
            token_balance: "1000000000000000000000000".into(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChainConfig {
    pub name: String,
    /// Literal RPC url; ignored when `rpc_url_env` is set and resolvable.
    #[serde(default)]
    pub rpc_url: Option<String>,
    #[serde(default)]
    pub rpc_url_env: Option<String>,
    pub weth: String,
}

impl ChainConfig {
    /// The RPC endpoint for this chain, if one is configured.
    pub fn resolved_rpc_url(&self) -> Option<String> {
        self.rpc_url_env
            .as_deref()
            .and_then(|env| AppConfig::resolve_env(env).ok())
            .or_else(|| self.rpc_url.clone())
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse and validate configuration from TOML text.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.engine.validate()?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}

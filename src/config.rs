//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (RPC URL with its API key, Telegram token) are referenced by
//! env-var name in the config and resolved at runtime into `SecretString`.
//! Everything is validated before the first round; a `ConfigError` is the
//! only fatal error class.

use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::time::Duration;
use web3::types::{Address, U256};

use crate::types::{from_units, FeeRate, LiquidityModel, Token, TokenPair};
use crate::venues::PoolLocator;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("environment variable not set: {0}")]
    MissingEnv(String),
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub scanner: ScannerSection,
    pub gas: GasConfig,
    pub pair: PairConfig,
    pub rpc: RpcConfig,
    pub venues: Vec<VenueConfig>,
    #[serde(default)]
    pub sinks: SinksConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScannerSection {
    pub poll_interval_secs: u64,
    pub sync_budget_ms: u64,
    pub fetch_timeout_ms: u64,
    #[serde(default = "default_staleness_ms")]
    pub staleness_tolerance_ms: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_fetches: usize,
    /// Trade sizes in quote-token units (e.g. `"100"` USDC).
    pub trade_sizes: Vec<Decimal>,
    #[serde(default)]
    pub search_optimal_size: bool,
    /// Net-profit floor in quote-token units.
    #[serde(default)]
    pub min_profit: Decimal,
    #[serde(default)]
    pub slippage_bps: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GasConfig {
    /// Gas cost per round trip in quote-token units.
    pub fixed_cost: Decimal,
    /// Enables the live estimate when set together with
    /// `native_price_in_quote`.
    #[serde(default)]
    pub gas_units: Option<u64>,
    #[serde(default)]
    pub native_price_in_quote: Option<Decimal>,
    #[serde(default = "default_gas_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PairConfig {
    /// Quote currency the round trip starts and ends in.
    pub token0: TokenConfig,
    /// Target token bought and sold.
    pub token1: TokenConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TokenConfig {
    pub symbol: String,
    pub address: String,
    pub decimals: u8,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RpcConfig {
    pub url_env: String,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VenueConfig {
    pub name: String,
    pub model: LiquidityModel,
    pub fee_bps: u32,
    #[serde(default)]
    pub pool: Option<String>,
    #[serde(default)]
    pub router: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SinksConfig {
    #[serde(default)]
    pub jsonl_path: Option<String>,
    #[serde(default)]
    pub sqlite_url: Option<String>,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_publish_wait_ms")]
    pub max_publish_wait_ms: u64,
    #[serde(default = "default_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub telegram_bot_token_env: Option<String>,
    #[serde(default)]
    pub telegram_chat_id_env: Option<String>,
    /// Only alert on opportunities at least this profitable (quote units).
    #[serde(default)]
    pub alert_min_profit: Decimal,
}

impl Default for SinksConfig {
    fn default() -> Self {
        Self {
            jsonl_path: None,
            sqlite_url: None,
            queue_capacity: default_queue_capacity(),
            max_publish_wait_ms: default_publish_wait_ms(),
            max_retries: default_retries(),
            telegram_bot_token_env: None,
            telegram_chat_id_env: None,
            alert_min_profit: Decimal::ZERO,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self { enabled: false, port: 3000 }
    }
}

fn default_staleness_ms() -> u64 {
    5_000
}

fn default_max_concurrent() -> usize {
    8
}

fn default_gas_timeout_ms() -> u64 {
    1_000
}

fn default_queue_capacity() -> usize {
    256
}

fn default_publish_wait_ms() -> u64 {
    50
}

fn default_retries() -> u32 {
    3
}

// ---------------------------------------------------------------------------
// Loading & validation
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.venues.len() < 2 {
            return Err(invalid(format!(
                "at least two venues are required, got {}",
                self.venues.len()
            )));
        }

        let mut names = HashSet::new();
        for venue in &self.venues {
            if venue.name.trim().is_empty() {
                return Err(invalid("venue name must not be empty"));
            }
            if !names.insert(venue.name.as_str()) {
                return Err(invalid(format!("duplicate venue name {:?}", venue.name)));
            }
            if !FeeRate::from_bps(venue.fee_bps).is_valid() {
                return Err(invalid(format!(
                    "venue {}: fee_bps {} must be below 10000",
                    venue.name, venue.fee_bps
                )));
            }
            venue.locator()?;
        }

        let pair = self.pair()?;
        if pair.token0.address == pair.token1.address {
            return Err(invalid("pair tokens must differ"));
        }

        let sizes = self.trade_sizes()?;
        if sizes.is_empty() {
            return Err(invalid("scanner.trade_sizes must not be empty"));
        }
        self.min_profit()?;
        self.fixed_gas_cost()?;

        if self.scanner.slippage_bps >= crate::types::BPS {
            return Err(invalid("scanner.slippage_bps must be below 10000"));
        }
        if self.scanner.sync_budget_ms == 0 {
            return Err(invalid("scanner.sync_budget_ms must be positive"));
        }
        if self.scanner.fetch_timeout_ms == 0 || self.scanner.fetch_timeout_ms > self.scanner.sync_budget_ms {
            return Err(invalid(format!(
                "scanner.fetch_timeout_ms ({}) must be in 1..=sync_budget_ms ({})",
                self.scanner.fetch_timeout_ms, self.scanner.sync_budget_ms
            )));
        }
        if self.scanner.poll_interval_secs == 0 {
            return Err(invalid("scanner.poll_interval_secs must be positive"));
        }
        if self.gas.gas_units.is_some() != self.gas.native_price_in_quote.is_some() {
            return Err(invalid(
                "gas.gas_units and gas.native_price_in_quote must be set together",
            ));
        }
        Ok(())
    }

    pub fn pair(&self) -> Result<TokenPair, ConfigError> {
        Ok(TokenPair {
            token0: self.pair.token0.to_token()?,
            token1: self.pair.token1.to_token()?,
        })
    }

    fn quote_units(&self, value: Decimal, field: &str) -> Result<U256, ConfigError> {
        from_units(value, self.pair.token0.decimals)
            .ok_or_else(|| invalid(format!("{field} {value} is not a representable quote amount")))
    }

    /// Trade sizes in raw quote units, largest last.
    pub fn trade_sizes(&self) -> Result<Vec<U256>, ConfigError> {
        let mut sizes = Vec::with_capacity(self.scanner.trade_sizes.len());
        for size in &self.scanner.trade_sizes {
            let raw = self.quote_units(*size, "scanner.trade_sizes entry")?;
            if raw.is_zero() {
                return Err(invalid(format!("trade size {size} must be positive")));
            }
            sizes.push(raw);
        }
        sizes.sort();
        sizes.dedup();
        Ok(sizes)
    }

    pub fn min_profit(&self) -> Result<U256, ConfigError> {
        self.quote_units(self.scanner.min_profit, "scanner.min_profit")
    }

    pub fn fixed_gas_cost(&self) -> Result<U256, ConfigError> {
        self.quote_units(self.gas.fixed_cost, "gas.fixed_cost")
    }

    pub fn alert_min_profit(&self) -> Result<U256, ConfigError> {
        self.quote_units(self.sinks.alert_min_profit, "sinks.alert_min_profit")
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.scanner.poll_interval_secs)
    }

    pub fn sync_budget(&self) -> Duration {
        Duration::from_millis(self.scanner.sync_budget_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.scanner.fetch_timeout_ms)
    }

    pub fn staleness_tolerance(&self) -> Duration {
        Duration::from_millis(self.scanner.staleness_tolerance_ms)
    }

    /// Resolve an environment variable name to its (secret) value.
    pub fn resolve_env(env_name: &str) -> Result<SecretString, ConfigError> {
        match std::env::var(env_name) {
            Ok(value) if !value.is_empty() => Ok(SecretString::new(value)),
            _ => Err(ConfigError::MissingEnv(env_name.to_string())),
        }
    }
}

impl TokenConfig {
    pub fn to_token(&self) -> Result<Token, ConfigError> {
        Ok(Token {
            symbol: self.symbol.clone(),
            address: parse_address(&self.address)
                .map_err(|e| invalid(format!("token {}: {e}", self.symbol)))?,
            decimals: self.decimals,
        })
    }
}

impl VenueConfig {
    pub fn fee(&self) -> FeeRate {
        FeeRate::from_bps(self.fee_bps)
    }

    /// Where the venue's pool lives. Constant-product venues name exactly
    /// one of `pool`/`router`; concentrated venues name a `pool`.
    pub fn locator(&self) -> Result<PoolLocator, ConfigError> {
        let parse = |field: &str, raw: &str| {
            parse_address(raw).map_err(|e| invalid(format!("venue {} {field}: {e}", self.name)))
        };
        match (self.model, self.pool.as_deref(), self.router.as_deref()) {
            (_, Some(pool), None) => Ok(PoolLocator::Pool(parse("pool", pool)?)),
            (LiquidityModel::ConstantProduct, None, Some(router)) => {
                Ok(PoolLocator::Router(parse("router", router)?))
            }
            (LiquidityModel::Concentrated, _, Some(_)) => Err(invalid(format!(
                "venue {}: concentrated venues need a pool address, not a router",
                self.name
            ))),
            (_, Some(_), Some(_)) => Err(invalid(format!(
                "venue {}: set either pool or router, not both",
                self.name
            ))),
            (_, None, None) => Err(invalid(format!(
                "venue {}: a pool or router address is required",
                self.name
            ))),
        }
    }
}

/// Parse a `0x`-prefixed (or bare) 20-byte hex address.
pub fn parse_address(raw: &str) -> Result<Address, String> {
    let hex = raw.trim().trim_start_matches("0x").trim_start_matches("0X");
    if hex.len() != 40 {
        return Err(format!("{raw:?} is not a 20-byte hex address"));
    }
    hex.parse::<Address>()
        .map_err(|e| format!("{raw:?} is not a valid address: {e}"))
}

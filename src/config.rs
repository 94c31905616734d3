// Configuration management for the grid bot

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::clients::DEFAULT_TICKER_URL;
use crate::core::grid_planner::GridConfig;
use crate::core::types::{MarginMode, VenuePrecision};
use crate::error::{GridBotError, GridBotResult};
use crate::exchange::{RateLimiter, RetryPolicy};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    pub ticker_url: String,
    /// Requests admitted per rolling window, across all symbols
    pub max_requests: usize,
    pub window_seconds: u64,
    pub max_concurrent: usize,
    pub acquire_timeout_seconds: u64,
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: f64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            ticker_url: DEFAULT_TICKER_URL.to_string(),
            max_requests: 50,
            window_seconds: 60,
            max_concurrent: 3,
            acquire_timeout_seconds: 120,
            max_attempts: 3,
            base_backoff_ms: 500,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl ExchangeConfig {
    pub fn rate_limiter(&self) -> RateLimiter {
        RateLimiter::new(
            self.max_requests,
            Duration::from_secs(self.window_seconds),
            self.max_concurrent,
            Duration::from_secs(self.acquire_timeout_seconds),
        )
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
            self.backoff_multiplier,
        )
        .with_jitter(self.jitter)
    }
}

/// `[strategy]` as written in the file; converted to [`GridConfig`] per cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub deposit_amount: f64,
    pub leverage: u32,
    pub margin_mode: MarginMode,
    pub coverage_percent: f64,
    pub grid_levels: u32,
    pub martingale_multiplier: f64,
    pub take_profit_percent: f64,
    pub market_entry: bool,
    pub poll_interval_seconds: u64,
    pub restart_delay_seconds: u64,
    pub price_tick: f64,
    pub quantity_step: f64,
    pub max_planning_attempts: u32,
    pub max_tracking_failures: u32,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        let grid = GridConfig::default();
        Self {
            deposit_amount: grid.deposit_amount,
            leverage: grid.leverage,
            margin_mode: grid.margin_mode,
            coverage_percent: grid.coverage_percent,
            grid_levels: grid.grid_levels,
            martingale_multiplier: grid.martingale_multiplier,
            take_profit_percent: grid.take_profit_percent,
            market_entry: grid.market_entry,
            poll_interval_seconds: grid.poll_interval.as_secs(),
            restart_delay_seconds: grid.restart_delay.as_secs(),
            price_tick: grid.precision.price_tick,
            quantity_step: grid.precision.quantity_step,
            max_planning_attempts: grid.max_planning_attempts,
            max_tracking_failures: grid.max_tracking_failures,
        }
    }
}

impl GridConfig {
    pub fn from_strategy(strategy: &StrategyConfig) -> Self {
        Self {
            deposit_amount: strategy.deposit_amount,
            leverage: strategy.leverage,
            margin_mode: strategy.margin_mode,
            coverage_percent: strategy.coverage_percent,
            grid_levels: strategy.grid_levels,
            martingale_multiplier: strategy.martingale_multiplier,
            take_profit_percent: strategy.take_profit_percent,
            market_entry: strategy.market_entry,
            poll_interval: Duration::from_secs(strategy.poll_interval_seconds),
            restart_delay: Duration::from_secs(strategy.restart_delay_seconds),
            precision: VenuePrecision {
                price_tick: strategy.price_tick,
                quantity_step: strategy.quantity_step,
            },
            max_planning_attempts: strategy.max_planning_attempts,
            max_tracking_failures: strategy.max_tracking_failures,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/grid_bot.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error
    pub level: String,
    /// Log cycle events as JSON lines
    pub json_events: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_events: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub symbols: Vec<String>,
    pub exchange: ExchangeConfig,
    pub strategy: StrategyConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            symbols: vec!["XRPUSDT".to_string()],
            exchange: ExchangeConfig::default(),
            strategy: StrategyConfig::default(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> GridBotResult<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> GridBotResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| GridBotError::ConfigParse(format!("TOML serialize error: {}", e)))?;

        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration from file, or create default if file doesn't exist
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> GridBotResult<Self> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            let config = Self::default();
            config.to_file(&path)?;
            info!("📁 Created default config file: {}", path.as_ref().display());
            Ok(config)
        }
    }

    /// Per-cycle strategy parameters
    pub fn grid_config(&self) -> GridConfig {
        GridConfig::from_strategy(&self.strategy)
    }

    pub fn validate(&self) -> GridBotResult<()> {
        if self.symbols.is_empty() {
            return Err(GridBotError::InvalidConfig("at least one symbol is required".to_string()));
        }
        if self.symbols.iter().any(|s| s.trim().is_empty()) {
            return Err(GridBotError::InvalidConfig("symbols must not be blank".to_string()));
        }
        if self.exchange.max_requests == 0 || self.exchange.window_seconds == 0 {
            return Err(GridBotError::InvalidConfig(
                "max_requests and window_seconds must be positive".to_string(),
            ));
        }
        if self.exchange.max_concurrent == 0 {
            return Err(GridBotError::InvalidConfig("max_concurrent must be positive".to_string()));
        }
        if self.exchange.max_attempts == 0 {
            return Err(GridBotError::InvalidConfig("max_attempts must be at least 1".to_string()));
        }
        if self.exchange.backoff_multiplier < 1.0 {
            return Err(GridBotError::InvalidConfig("backoff_multiplier must be at least 1".to_string()));
        }

        self.grid_config().validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());

        let grid = config.grid_config();
        assert_eq!(grid.leverage, 20);
        assert_eq!(grid.grid_levels, 15);
        assert_eq!(grid.poll_interval, Duration::from_secs(3));
        assert_eq!(grid.restart_delay, Duration::from_secs(60));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            symbols = ["BTCUSDT", "XRPUSDT"]

            [strategy]
            deposit_amount = 10.0
            margin_mode = "isolated"
            "#,
        )
        .unwrap();

        assert_eq!(config.symbols.len(), 2);
        assert_eq!(config.strategy.deposit_amount, 10.0);
        assert_eq!(config.strategy.margin_mode, MarginMode::Isolated);
        assert_eq!(config.strategy.grid_levels, 15);
        assert_eq!(config.exchange.max_requests, 50);
    }

    #[test]
    fn test_invalid_strategy_rejected() {
        let mut config = Config::default();
        config.strategy.coverage_percent = 1.5;
        assert!(matches!(config.validate(), Err(GridBotError::InvalidConfig(_))));

        let mut config = Config::default();
        config.symbols.clear();
        assert!(config.validate().is_err());
    }
}

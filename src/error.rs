//! Error taxonomy for the grid bot
//!
//! Venue faults arrive as [`VenueError`] from the gateway; everything the
//! coordinator, ledger and repository can fail with is a [`GridBotError`].

use std::io;

use crate::exchange::VenueError;

/// Main error type for the grid bot
#[derive(Debug, thiserror::Error)]
pub enum GridBotError {
    /// Rejects a cycle before any order is placed
    #[error("Invalid grid configuration: {0}")]
    InvalidConfig(String),

    /// Transient venue failure that survived every retry attempt
    #[error("Gateway transient failure after retries: {0}")]
    GatewayTransient(String),

    #[error("Gateway rate limit exhausted: {0}")]
    RateLimited(String),

    #[error("Gateway rejected request: {0}")]
    GatewayRejected(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Venue-reported state contradicts the ledger; the ledger is corrected
    #[error("Ledger inconsistency for order {order_id}: {detail}")]
    LedgerInconsistency { order_id: String, detail: String },

    #[error("No filled entry orders yet")]
    NoFillsYet,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration file error: {0}")]
    ConfigFile(String),

    #[error("Configuration parse error: {0}")]
    ConfigParse(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GridBotError {
    /// Get a user-friendly error message with helpful context
    pub fn user_message(&self) -> String {
        match self {
            GridBotError::InvalidConfig(msg) => format!(
                "Grid configuration rejected: {}\n\n\
                 💡 Check the [strategy] section of config.toml:\n\
                 - grid_levels must be at least 2\n\
                 - coverage_percent must be between 0 and 1\n\
                 - martingale_multiplier must be above 1",
                msg
            ),
            GridBotError::Unauthorized(msg) => format!(
                "Venue refused our credentials: {}\n\n\
                 💡 The symbol is stopped. Fix the API keys, then restart it.",
                msg
            ),
            GridBotError::RateLimited(msg) => format!(
                "Rate limit exhausted: {}\n\n\
                 💡 Lower [exchange].max_requests or poll less often",
                msg
            ),
            GridBotError::Storage(msg) => format!(
                "Database error: {}\n\n\
                 💡 Check [database].path and disk space",
                msg
            ),
            _ => self.to_string(),
        }
    }

    /// Errors the gateway already retried internally
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GridBotError::GatewayTransient(_) | GridBotError::RateLimited(_)
        )
    }

    /// Errors that halt the affected symbol until an operator restarts it
    pub fn is_symbol_fatal(&self) -> bool {
        matches!(
            self,
            GridBotError::InvalidConfig(_)
                | GridBotError::GatewayRejected(_)
                | GridBotError::Unauthorized(_)
        )
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            GridBotError::InvalidConfig(_)
            | GridBotError::ConfigFile(_)
            | GridBotError::ConfigParse(_) => "config",

            GridBotError::GatewayTransient(_)
            | GridBotError::RateLimited(_)
            | GridBotError::GatewayRejected(_)
            | GridBotError::Unauthorized(_) => "gateway",

            GridBotError::LedgerInconsistency { .. } | GridBotError::NoFillsYet => "ledger",

            GridBotError::Storage(_) => "storage",

            GridBotError::Internal(_) => "internal",
        }
    }
}

impl From<VenueError> for GridBotError {
    fn from(err: VenueError) -> Self {
        match err {
            VenueError::RateLimited(msg) => GridBotError::RateLimited(msg),
            VenueError::Transient(msg) => GridBotError::GatewayTransient(msg),
            VenueError::Rejected(msg) => GridBotError::GatewayRejected(msg),
            VenueError::Unauthorized(msg) => GridBotError::Unauthorized(msg),
        }
    }
}

impl From<rusqlite::Error> for GridBotError {
    fn from(err: rusqlite::Error) -> Self {
        GridBotError::Storage(err.to_string())
    }
}

impl From<io::Error> for GridBotError {
    fn from(err: io::Error) -> Self {
        GridBotError::ConfigFile(err.to_string())
    }
}

impl From<toml::de::Error> for GridBotError {
    fn from(err: toml::de::Error) -> Self {
        GridBotError::ConfigParse(format!("TOML parse error: {}", err))
    }
}

/// Result type alias using GridBotError
pub type GridBotResult<T> = Result<T, GridBotError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GridBotError::InvalidConfig("grid_levels must be at least 2".to_string());
        assert!(err.to_string().contains("grid_levels"));
    }

    #[test]
    fn test_error_category() {
        assert_eq!(GridBotError::InvalidConfig("x".into()).category(), "config");
        assert_eq!(GridBotError::Unauthorized("x".into()).category(), "gateway");
        assert_eq!(GridBotError::NoFillsYet.category(), "ledger");
        assert_eq!(GridBotError::Storage("x".into()).category(), "storage");
    }

    #[test]
    fn test_venue_error_conversion() {
        let err: GridBotError = VenueError::Unauthorized("bad key".into()).into();
        assert!(matches!(err, GridBotError::Unauthorized(_)));
        assert!(err.is_symbol_fatal());

        let err: GridBotError = VenueError::Transient("timeout".into()).into();
        assert!(err.is_retryable());
        assert!(!err.is_symbol_fatal());
    }

    #[test]
    fn test_user_message() {
        let msg = GridBotError::InvalidConfig("coverage_percent".into()).user_message();
        assert!(msg.contains("💡"));
        assert!(msg.contains("coverage_percent"));
    }
}

// External API clients

pub mod ticker;

pub use ticker::{RestTickerClient, DEFAULT_TICKER_URL};

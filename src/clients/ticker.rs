// Public futures ticker over REST

use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

use crate::exchange::VenueError;

pub const DEFAULT_TICKER_URL: &str = "https://api.bitget.com";
const SUCCESS_CODE: &str = "00000";

#[derive(Debug, Deserialize)]
struct TickerResponse {
    code: String,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Vec<TickerEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickerEntry {
    #[allow(dead_code)]
    symbol: String,
    last_pr: String,
}

/// Last-price client for USDT-margined futures symbols
#[derive(Debug, Clone)]
pub struct RestTickerClient {
    client: reqwest::Client,
    base_url: String,
    product_type: String,
}

impl RestTickerClient {
    pub fn new(base_url: &str) -> Result<Self, VenueError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| VenueError::Transient(format!("http client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            product_type: "USDT-FUTURES".to_string(),
        })
    }

    pub async fn fetch_price(&self, symbol: &str) -> Result<f64, VenueError> {
        let url = format!("{}/api/v2/mix/market/ticker", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(&[("symbol", symbol), ("productType", self.product_type.as_str())])
            .send()
            .await
            .map_err(|e| VenueError::Transient(format!("network: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, symbol));
        }

        let body: TickerResponse = response
            .json()
            .await
            .map_err(|e| VenueError::Transient(format!("malformed ticker body: {}", e)))?;

        if body.code != SUCCESS_CODE {
            return Err(VenueError::Rejected(format!(
                "ticker {} returned code {}: {}",
                symbol, body.code, body.msg
            )));
        }

        let entry = body
            .data
            .first()
            .ok_or_else(|| VenueError::Rejected(format!("no ticker data for {}", symbol)))?;

        let price: f64 = entry
            .last_pr
            .parse()
            .map_err(|_| VenueError::Rejected(format!("bad last price '{}'", entry.last_pr)))?;
        if !(price > 0.0) {
            return Err(VenueError::Rejected(format!("non-positive price for {}", symbol)));
        }
        Ok(price)
    }
}

fn classify_status(status: StatusCode, symbol: &str) -> VenueError {
    let msg = format!("ticker {} HTTP {}", symbol, status.as_u16());
    match status {
        StatusCode::TOO_MANY_REQUESTS => VenueError::RateLimited(msg),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => VenueError::Unauthorized(msg),
        s if s.is_server_error() => VenueError::Transient(msg),
        _ => VenueError::Rejected(msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(classify_status(StatusCode::TOO_MANY_REQUESTS, "X"), VenueError::RateLimited(_)));
        assert!(matches!(classify_status(StatusCode::FORBIDDEN, "X"), VenueError::Unauthorized(_)));
        assert!(matches!(classify_status(StatusCode::BAD_GATEWAY, "X"), VenueError::Transient(_)));
        assert!(matches!(classify_status(StatusCode::NOT_FOUND, "X"), VenueError::Rejected(_)));
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let client = RestTickerClient::new("http://localhost:1234/").unwrap();
        assert_eq!(client.base_url, "http://localhost:1234");
    }
}

// Integration tests for the REST ticker client against a mock server

use martingale_grid_bot::{Exchange, PaperExchange, RestTickerClient, VenueError};
use mockito::Matcher;

const TICKER_PATH: &str = "/api/v2/mix/market/ticker";

fn ticker_body(code: &str, last_pr: &str) -> String {
    format!(
        r#"{{"code":"{}","msg":"success","requestTime":1700000000000,"data":[{{"symbol":"XRPUSDT","lastPr":"{}","bidPr":"0.4999","askPr":"0.5001"}}]}}"#,
        code, last_pr
    )
}

#[tokio::test]
async fn test_fetch_price_parses_last_price() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", TICKER_PATH)
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("symbol".into(), "XRPUSDT".into()),
            Matcher::UrlEncoded("productType".into(), "USDT-FUTURES".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(ticker_body("00000", "0.50"))
        .create_async()
        .await;

    let client = RestTickerClient::new(&server.url()).unwrap();
    let price = client.fetch_price("XRPUSDT").await.unwrap();

    assert_eq!(price, 0.50);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_http_errors_are_classified() {
    let mut server = mockito::Server::new_async().await;
    let client = RestTickerClient::new(&server.url()).unwrap();

    let cases = [
        (429, "rate"),
        (403, "auth"),
        (503, "transient"),
        (404, "rejected"),
    ];
    for (status, expected) in cases {
        let mock = server
            .mock("GET", TICKER_PATH)
            .match_query(Matcher::Any)
            .with_status(status)
            .create_async()
            .await;

        let err = client.fetch_price("XRPUSDT").await.unwrap_err();
        let matched = match expected {
            "rate" => matches!(err, VenueError::RateLimited(_)),
            "auth" => matches!(err, VenueError::Unauthorized(_)),
            "transient" => matches!(err, VenueError::Transient(_)),
            _ => matches!(err, VenueError::Rejected(_)),
        };
        assert!(matched, "HTTP {} mapped to {:?}", status, err);
        mock.remove_async().await;
    }
}

#[tokio::test]
async fn test_non_success_code_is_rejected() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", TICKER_PATH)
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(ticker_body("40034", "0"))
        .create_async()
        .await;

    let client = RestTickerClient::new(&server.url()).unwrap();
    let err = client.fetch_price("XRPUSDT").await.unwrap_err();
    assert!(matches!(err, VenueError::Rejected(_)));
}

#[tokio::test]
async fn test_malformed_body_is_transient() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", TICKER_PATH)
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body("<html>maintenance</html>")
        .create_async()
        .await;

    let client = RestTickerClient::new(&server.url()).unwrap();
    let err = client.fetch_price("XRPUSDT").await.unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_paper_venue_uses_price_feed() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", TICKER_PATH)
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(ticker_body("00000", "0.4321"))
        .create_async()
        .await;

    let venue = PaperExchange::new().with_price_feed(RestTickerClient::new(&server.url()).unwrap());
    assert_eq!(venue.get_price("XRPUSDT").await.unwrap(), 0.4321);
}

//! Private REST flows against a mocked venue.

mod common;

use wiremock::matchers::{body_string_contains, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{fixture, init_tracing, next_event};
use confluence::models::{Balance, OrderKind, OrderRequest, Side, SymbolParser, TradeFilter};
use confluence::{ConfluenceError, Credentials, DataType, Exchange, Options};

fn private_exchange(name: &str, server: &MockServer, secret: &str) -> Exchange {
    let options = Options::new(name)
        .with_endpoints(Some(server.uri()), None)
        .with_credentials(Credentials::new("test-key", secret));
    confluence::new(&options).expect("failed to build exchange")
}

#[tokio::test]
async fn test_binance_account_balances() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/account"))
        .and(header_exists("x-mbx-apikey"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(fixture("binance_account.json"), "application/json"),
        )
        .mount(&server)
        .await;

    let binance = private_exchange("binance", &server, "test-secret");
    let trading = binance.trading.as_ref().expect("binance has trading");
    let info = trading.info().await.expect("account failed");

    assert_eq!(
        info.balances.get("KCS"),
        Some(&Balance {
            available: 0.0,
            in_orders: 1.25,
            total: 1.25,
        })
    );
    assert_eq!(info.balances["USDT"].total, 200.0);
    assert!(!info.balances.contains_key("BTC"));
    assert_eq!(info.coins, 2);
    assert_eq!(info.funded_coins, 2);
    assert!(info.access.read && info.access.trade && info.access.deposit);
    assert!(!info.access.withdraw);

    let requests = server.received_requests().await.expect("recording disabled");
    let query = requests[0].url.query().unwrap_or_default();
    assert!(query.contains("timestamp="));
    assert!(query.contains("signature="));
}

#[tokio::test]
async fn test_binance_rejected_key_is_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/account"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_string(r#"{"code":-2015,"msg":"Invalid API-key, IP, or permissions for action."}"#),
        )
        .mount(&server)
        .await;

    let binance = private_exchange("binance", &server, "test-secret");
    let err = binance
        .trading
        .as_ref()
        .expect("binance has trading")
        .info()
        .await
        .expect_err("rejected key must fail");
    assert!(matches!(err, ConfluenceError::Auth(_)), "got {err:?}");
}

#[tokio::test]
async fn test_missing_credentials_fail_private_calls() {
    let server = MockServer::start().await;
    let options = Options::new("bitfinex").with_endpoints(Some(server.uri()), None);
    let bitfinex = confluence::new(&options).expect("failed to build exchange");

    let trading = bitfinex.trading.as_ref().expect("bitfinex has trading");
    let err = trading.info().await.expect_err("no credentials");
    assert!(matches!(err, ConfluenceError::Auth(_)));
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_limit_order_requires_price() {
    let server = MockServer::start().await;
    let kraken = private_exchange("kraken", &server, "c2VjcmV0");
    let parsed = SymbolParser::separator('/').parse("BTC/USD").expect("parse failed");
    let symbol = confluence::models::Symbol::new(parsed, "XBTUSD");

    let mut order = OrderRequest::limit(symbol, Side::Buy, 27_500.0, 0.5);
    order.price = None;
    assert_eq!(order.kind, OrderKind::Limit);

    let err = kraken
        .trading
        .as_ref()
        .expect("kraken has trading")
        .create(&order)
        .await
        .expect_err("limit without price");
    assert!(matches!(err, ConfluenceError::InvalidRequest(_)));
}

#[tokio::test]
async fn test_kraken_trade_import_walks_pages() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/0/public/AssetPairs"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(fixture("kraken_asset_pairs.json"), "application/json"),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/0/private/TradesHistory"))
        .and(header_exists("API-Sign"))
        .and(body_string_contains("ofs=0"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(fixture("kraken_trades_page1.json"), "application/json"),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/0/private/TradesHistory"))
        .and(body_string_contains("ofs=2"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(fixture("kraken_trades_page2.json"), "application/json"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let kraken = private_exchange("kraken", &server, "c2VjcmV0");
    let trading = kraken.trading.as_ref().expect("kraken has trading");
    let mut rx = trading.import_trades(TradeFilter::default());

    let first = next_event(&mut rx).await;
    assert_eq!(first.data_type, DataType::Update);
    let page = first.data.expect("page without data");
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].symbol, "ETH-USD");
    assert_eq!(page[0].side, Side::Sell);
    assert_eq!(page[0].timestamp / 1000, 1_688_667_769);
    assert_eq!(page[1].symbol, "BTC-USD");
    assert_eq!(page[1].order_id.as_deref(), Some("OQCLML-BW3P3-BUCMWZ"));
    assert!((page[1].fee.unwrap_or_default() - 0.78026).abs() < 1e-9);

    let second = next_event(&mut rx).await;
    let page = second.data.expect("page without data");
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].id, "TQKD6F-AZN3R-5FJZ4F");

    assert!(rx.recv().await.is_none(), "import must end after the last page");
}

//! Venue REST mapping against recorded responses.

mod common;

use std::time::Duration;

use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{fixture, init_tracing, next_event};
use confluence::models::Side;
use confluence::{ConfluenceError, DataType, Exchange, Options, Settings};

async fn serve(server: &MockServer, route: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/json"))
        .mount(server)
        .await;
}

fn exchange(name: &str, server: &MockServer) -> Exchange {
    let options = Options::new(name).with_endpoints(Some(server.uri()), None);
    confluence::new(&options).expect("failed to build exchange")
}

#[tokio::test]
async fn test_kraken_pairs() {
    init_tracing();
    let server = MockServer::start().await;
    serve(&server, "/0/public/AssetPairs", fixture("kraken_asset_pairs.json")).await;
    let kraken = exchange("kraken", &server);

    let symbols = kraken.symbols.get(None).await.expect("symbols failed");
    let names: Vec<&str> = symbols.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["BTC-USD", "ETH-USD"]);

    let btc = &symbols[0];
    assert_eq!(btc.original_name, "XBTUSD");
    assert_eq!(btc.base_coin, "BTC");
    assert_eq!(btc.price_precision, 1);
    assert_eq!(btc.amount_precision, 8);
    assert!((btc.fee - 0.0026).abs() < 1e-12);
    assert!((btc.min_amount - 0.0001).abs() < 1e-12);

    let one = kraken.symbols.get(Some("ETH-USD")).await.expect("symbol failed");
    assert_eq!(one.len(), 1);
    assert_eq!(one[0].original_name, "ETHUSD");
}

#[tokio::test]
async fn test_binance_symbols_fall_back_to_listed_assets() {
    let server = MockServer::start().await;
    serve(&server, "/api/v3/exchangeInfo", fixture("binance_exchange_info.json")).await;
    let binance = exchange("binance", &server);

    let symbols = binance.symbols.get(None).await.expect("symbols failed");
    let names: Vec<&str> = symbols.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["ETH-BTC", "USDT-DAI"]);

    let eth = &symbols[0];
    assert_eq!(eth.price_precision, 5);
    assert_eq!(eth.amount_precision, 4);
    assert!((eth.min_price - 0.00001).abs() < 1e-12);
    assert!((eth.max_amount - 100_000.0).abs() < 1e-9);

    let stable = &symbols[1];
    assert_eq!(stable.original_name, "USDTDAI");
    assert_eq!(stable.price_precision, 4);
    assert_eq!(stable.amount_precision, 0);
}

#[tokio::test]
async fn test_gateio_pairs_skip_untradable() {
    let server = MockServer::start().await;
    serve(&server, "/spot/currency_pairs", fixture("gateio_currency_pairs.json")).await;
    let gateio = exchange("gateio", &server);

    let symbols = gateio.symbols.get(None).await.expect("symbols failed");
    let names: Vec<&str> = symbols.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["BTC-USDT", "ETH-BTC"]);
    assert_eq!(symbols[0].original_name, "BTC_USDT");
    assert!((symbols[0].fee - 0.002).abs() < 1e-12);
    assert!((symbols[0].max_amount - 1000.0).abs() < 1e-9);
    assert_eq!(symbols[1].max_amount, 0.0);
}

#[tokio::test]
async fn test_gateio_books_are_polled_snapshots() {
    init_tracing();
    let server = MockServer::start().await;
    serve(&server, "/spot/currency_pairs", fixture("gateio_currency_pairs.json")).await;
    Mock::given(method("GET"))
        .and(path("/spot/order_book"))
        .and(query_param("currency_pair", "BTC_USDT"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(fixture("gateio_order_book.json"), "application/json"),
        )
        .mount(&server)
        .await;

    let mut gateio = exchange("gateio", &server);
    let btc = gateio.symbols.get(Some("BTC-USDT")).await.expect("symbol failed");
    let mut rx = gateio
        .orders
        .set_symbols(btc)
        .subscribe_all(Duration::from_millis(100));

    for _ in 0..2 {
        let event = next_event(&mut rx).await;
        assert_eq!(event.data_type, DataType::Snapshot);
        let book = event.data.expect("snapshot without data");
        assert_eq!(book.symbol, "BTC-USDT");
        assert_eq!(book.buy[0].side, Side::Buy);
        assert_eq!(book.buy[0].price, 30000.1);
        assert_eq!(book.sell[1].amount, 1.1);
    }

    gateio.orders.unsubscribe().await.expect("unsubscribe failed");
}

#[tokio::test]
async fn test_second_subscribe_all_moves_to_a_new_channel() {
    init_tracing();
    let server = MockServer::start().await;
    serve(&server, "/spot/currency_pairs", fixture("gateio_currency_pairs.json")).await;
    serve(&server, "/spot/order_book", fixture("gateio_order_book.json")).await;

    let mut gateio = exchange("gateio", &server);
    let btc = gateio.symbols.get(Some("BTC-USDT")).await.expect("symbol failed");
    let orders = &mut gateio.orders;
    let mut first = orders.set_symbols(btc).subscribe_all(Duration::from_millis(100));
    assert_eq!(next_event(&mut first).await.data_type, DataType::Snapshot);

    let mut second = orders.subscribe_all(Duration::from_millis(100));
    for _ in 0..2 {
        let event = next_event(&mut second).await;
        assert_eq!(event.data_type, DataType::Snapshot);
        assert_eq!(event.data.expect("snapshot without data").symbol, "BTC-USDT");
    }
    assert_eq!(orders.group_sizes(), vec![1]);

    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        while first.recv().await.is_some() {}
    })
    .await;
    assert!(closed.is_ok(), "previous channel stayed open");

    orders.unsubscribe().await.expect("unsubscribe failed");
}

#[tokio::test]
async fn test_rest_failure_becomes_an_error_event() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/spot/tickers"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let settings = Settings {
        snapshot_retry_delay: Duration::from_millis(10),
        ..Settings::default()
    };
    let options = Options::new("gateio")
        .with_endpoints(Some(server.uri()), None)
        .with_settings(settings);
    let mut gateio = confluence::new(&options).expect("failed to build exchange");

    let parser = confluence::models::SymbolParser::separator('_');
    let mut rx = gateio
        .quotes
        .set_symbols(common::symbols(&parser, &["BTC_USDT"]))
        .subscribe_all(Duration::from_secs(60));

    let event = next_event(&mut rx).await;
    assert!(event.is_error());
    assert!(matches!(
        event.error.as_deref(),
        Some(ConfluenceError::Status { status: 503, .. })
    ));
    assert!(gateio.quotes.groups()[0].is_running());
}

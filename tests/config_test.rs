//! Options wiring: endpoint overrides, custom signers and HTTP clients.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use reqwest::header::HeaderValue;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::fixture;
use confluence::auth::sign_fn;
use confluence::transport::{ProxyProvider, proxy};
use confluence::{ConfluenceError, Credentials, Options, Result};

/// Hands out default clients and counts the venues asking for one.
#[derive(Default)]
struct CountingProxy {
    requests: AtomicUsize,
}

impl ProxyProvider for CountingProxy {
    fn client(&self, venue: &str) -> Result<reqwest::Client> {
        assert_eq!(venue, "binance");
        self.requests.fetch_add(1, Ordering::SeqCst);
        proxy::default_client()
    }
}

#[tokio::test]
async fn test_custom_signer_replaces_venue_recipe() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/account"))
        .and(header("x-custom-signature", "signed-by-test"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(fixture("binance_account.json"), "application/json"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let credentials = Credentials::new("key", "secret").with_sign_fn(sign_fn(|_, mut request| {
        request
            .headers_mut()
            .insert("x-custom-signature", HeaderValue::from_static("signed-by-test"));
        Ok(request)
    }));
    let options = Options::new("binance")
        .with_endpoints(Some(server.uri()), None)
        .with_credentials(credentials);
    let binance = confluence::new(&options).expect("failed to build exchange");

    let info = binance
        .trading
        .as_ref()
        .expect("binance has trading")
        .info()
        .await
        .expect("custom-signed request failed");
    assert!(info.balances.contains_key("KCS"));

    let requests = server.received_requests().await.expect("recording disabled");
    assert!(!requests[0].url.query().unwrap_or_default().contains("signature="));
}

#[tokio::test]
async fn test_proxy_provider_supplies_clients() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/exchangeInfo"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(fixture("binance_exchange_info.json"), "application/json"),
        )
        .mount(&server)
        .await;

    let proxy = Arc::new(CountingProxy::default());
    let options = Options::new("binance")
        .with_endpoints(Some(format!("{}/", server.uri())), None)
        .with_proxy(proxy.clone());
    let binance = confluence::new(&options).expect("failed to build exchange");
    assert!(proxy.requests.load(Ordering::SeqCst) >= 1);

    let symbols = binance.symbols.get(None).await.expect("symbols failed");
    assert_eq!(symbols.len(), 2);
}

#[test]
fn test_credentials_debug_hides_secret() {
    let options = Options::new("kraken").with_credentials(Credentials::new("public", "hunter2"));
    let printed = format!("{options:?}");
    assert!(printed.contains("public"));
    assert!(!printed.contains("hunter2"));
}

#[tokio::test]
async fn test_unknown_venue_name() {
    let err = confluence::new(&Options::new("nowhere")).expect_err("unknown venue");
    assert!(matches!(err, ConfluenceError::UnknownVenue(name) if name == "nowhere"));
}

//! REST helper shared by every venue adapter.
//!
//! [`HttpHelper`] owns a venue's base URL, its HTTP client (obtained from
//! a [`ProxyProvider`](super::ProxyProvider)) and, for private endpoints,
//! the credentials plus the signing function. Query parameters go on the
//! URL for `GET`/`DELETE`; `POST`/`PUT` send them as a URL-encoded form.

use reqwest::header::{ACCEPT, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::auth::SignFn;
use crate::config::Credentials;
use crate::{ConfluenceError, Result};

/// Key-value request parameters.
pub type Params<'a> = [(&'a str, String)];

/// REST client bound to one venue.
#[derive(Clone)]
pub struct HttpHelper {
    base_url: String,
    client: reqwest::Client,
    headers: HeaderMap,
    credentials: Option<Credentials>,
    sign: Option<SignFn>,
}

impl std::fmt::Debug for HttpHelper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpHelper")
            .field("base_url", &self.base_url)
            .field("credentials", &self.credentials)
            .field("signed", &self.sign.is_some())
            .finish_non_exhaustive()
    }
}

impl HttpHelper {
    /// Creates an unsigned helper for `base_url`.
    #[must_use]
    pub fn new(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static(super::proxy::USER_AGENT));
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            headers,
            credentials: None,
            sign: None,
        }
    }

    /// Adds a default header sent with every request.
    #[must_use]
    pub fn with_header(mut self, name: &'static str, value: &'static str) -> Self {
        self.headers
            .insert(HeaderName::from_static(name), HeaderValue::from_static(value));
        self
    }

    /// Enables signed requests.
    ///
    /// A custom sign function carried by `credentials` wins over the
    /// venue's `default_sign`.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Option<Credentials>, default_sign: SignFn) -> Self {
        self.sign = credentials
            .as_ref()
            .map(|c| c.sign.clone().unwrap_or(default_sign));
        self.credentials = credentials;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns `true` if private requests can be signed.
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    #[must_use]
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Public `GET`, decoded as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, a non-200 status, or a
    /// body that does not decode into `T`.
    pub async fn get<T: DeserializeOwned>(&self, path: &str, params: &Params<'_>) -> Result<T> {
        let body = self.send(Method::GET, path, params, false).await?;
        decode(&body)
    }

    /// Signed request with query (`GET`/`DELETE`) or form parameters.
    ///
    /// # Errors
    ///
    /// Returns [`ConfluenceError::Auth`] without credentials, otherwise as
    /// [`HttpHelper::get`].
    pub async fn private<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &Params<'_>,
    ) -> Result<T> {
        let body = self.send(method, path, params, true).await?;
        decode(&body)
    }

    /// Signed `POST` with a JSON body.
    ///
    /// # Errors
    ///
    /// As [`HttpHelper::private`].
    pub async fn private_json<T: DeserializeOwned>(
        &self,
        path: &str,
        payload: &serde_json::Value,
    ) -> Result<T> {
        let request = self
            .client
            .post(self.url(path))
            .headers(self.headers.clone())
            .json(payload)
            .build()?;
        let body = self.execute(self.sign(request)?).await?;
        decode(&body)
    }

    /// Unsigned request carrying only the API key in header `key_header`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfluenceError::Auth`] without credentials, otherwise as
    /// [`HttpHelper::get`].
    pub async fn keyed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &Params<'_>,
        key_header: &'static str,
    ) -> Result<T> {
        let credentials = self.credentials.as_ref().ok_or_else(|| {
            ConfluenceError::Auth("private endpoint requires credentials".to_string())
        })?;
        let key = HeaderValue::from_str(&credentials.api_key)
            .map_err(|e| ConfluenceError::Auth(format!("invalid api key: {e}")))?;

        let builder = self
            .client
            .request(method.clone(), self.url(path))
            .headers(self.headers.clone())
            .header(HeaderName::from_static(key_header), key);
        let builder = if method == Method::GET || method == Method::DELETE {
            builder.query(params)
        } else {
            builder.form(params)
        };
        let body = self.execute(builder.build()?).await?;
        decode(&body)
    }

    /// Sends a request and returns the raw body of a 200 response.
    ///
    /// # Errors
    ///
    /// Returns [`ConfluenceError::Status`] with the body for any other
    /// status code, or the transport error as-is.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        params: &Params<'_>,
        signed: bool,
    ) -> Result<Vec<u8>> {
        let builder = self
            .client
            .request(method.clone(), self.url(path))
            .headers(self.headers.clone());
        let builder = if method == Method::GET || method == Method::DELETE {
            builder.query(params)
        } else {
            builder.form(params)
        };

        let request = builder.build()?;
        let request = if signed { self.sign(request)? } else { request };
        self.execute(request).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn sign(&self, request: reqwest::Request) -> Result<reqwest::Request> {
        match (&self.credentials, &self.sign) {
            (Some(credentials), Some(sign)) => sign(credentials, request),
            _ => Err(ConfluenceError::Auth(
                "private endpoint requires credentials".to_string(),
            )),
        }
    }

    async fn execute(&self, request: reqwest::Request) -> Result<Vec<u8>> {
        let method = request.method().clone();
        let path = request.url().path().to_string();

        let response = self.client.execute(request).await?;
        let status = response.status();
        let body = response.bytes().await?;
        debug!(%method, path, status = status.as_u16(), bytes = body.len(), "HTTP response");

        if status != StatusCode::OK {
            return Err(ConfluenceError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        Ok(body.to_vec())
    }
}

/// Decodes a JSON body, keeping the payload in the error for logs.
fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| {
        ConfluenceError::MalformedMessage(format!(
            "{e}: {}",
            String::from_utf8_lossy(&body[..body.len().min(256)])
        ))
    })
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_string, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::auth::sign_fn;

    fn helper(server: &MockServer) -> HttpHelper {
        HttpHelper::new(server.uri(), reqwest::Client::new())
    }

    #[tokio::test]
    async fn get_sends_query_and_accept_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ticker"))
            .and(query_param("symbol", "BTCUSDT"))
            .and(header("accept", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"last":"1.5"}"#))
            .mount(&server)
            .await;

        let value: serde_json::Value = helper(&server)
            .get("/ticker", &[("symbol", "BTCUSDT".to_string())])
            .await
            .unwrap();
        assert_eq!(value["last"], "1.5");
    }

    #[tokio::test]
    async fn non_200_returns_status_with_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let err = helper(&server)
            .get::<serde_json::Value>("/depth", &[])
            .await
            .unwrap_err();
        match err {
            ConfluenceError::Status { status, body } => {
                assert_eq!(status, 429);
                assert_eq!(body, "slow down");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn private_without_credentials_is_auth_error() {
        let server = MockServer::start().await;
        let err = helper(&server)
            .private::<serde_json::Value>(Method::GET, "/account", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ConfluenceError::Auth(_)));
    }

    #[tokio::test]
    async fn post_sends_form_and_runs_custom_signer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/order"))
            .and(header("x-signed-by", "test"))
            .and(body_string("side=buy&amount=1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .mount(&server)
            .await;

        let sign = sign_fn(|_, mut request| {
            request
                .headers_mut()
                .insert("x-signed-by", HeaderValue::from_static("test"));
            Ok(request)
        });
        let unused = sign_fn(|_, _| Err(ConfluenceError::Signing("unused".into())));
        let credentials = Credentials::new("key", "secret").with_sign_fn(sign);

        let value: serde_json::Value = helper(&server)
            .with_credentials(Some(credentials), unused)
            .private(
                Method::POST,
                "/order",
                &[("side", "buy".to_string()), ("amount", "1".to_string())],
            )
            .await
            .unwrap();
        assert!(value.is_object());
    }
}

//! Process-wide rustls setup.
//!
//! Both the REST client (reqwest) and the WebSocket client
//! (tokio-tungstenite) build their TLS configs from the process default
//! [`CryptoProvider`](rustls::crypto::CryptoProvider). It has to be
//! installed once before the first handshake.

use std::sync::Once;

use tracing::debug;

static INSTALL: Once = Once::new();

/// Installs the `ring` crypto provider as the process default.
///
/// Safe to call any number of times. If another provider was installed
/// first (e.g. by the host application), that one is kept.
pub fn install_crypto_provider() {
    INSTALL.call_once(|| {
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            debug!("rustls crypto provider already installed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_is_idempotent() {
        install_crypto_provider();
        install_crypto_provider();
        assert!(rustls::crypto::CryptoProvider::get_default().is_some());
    }
}

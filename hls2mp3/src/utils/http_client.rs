use std::sync::OnceLock;

use tracing::debug;

use crate::config::ResolverConfig;
use crate::{Error, Result};

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Another crate may have installed one first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Build the client used for manifest fetches.
///
/// The per-request timeout is applied by the caller; the connect timeout is
/// bounded by the same value so a dead origin cannot stall resolution.
pub fn build_client(config: &ResolverConfig) -> Result<reqwest::Client> {
    install_rustls_provider();

    reqwest::Client::builder()
        .user_agent(config.user_agent.as_str())
        .connect_timeout(config.timeout)
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .map_err(|e| Error::config(format!("failed to build HTTP client: {}", e)))
}

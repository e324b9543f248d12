//! HTTP client initialization for the provisioning endpoint.

use std::time::Duration;

use crate::config::PROVISION_TIMEOUT_SECS;
use crate::error_handling::InitializationError;

/// Builds the reqwest client used for vehicle provisioning calls.
///
/// Provisioning can involve a slow upstream import, so the timeout is
/// deliberately longer than the store-write timeout.
pub fn init_provision_client() -> Result<reqwest::Client, InitializationError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(PROVISION_TIMEOUT_SECS))
        .build()
        .map_err(InitializationError::from)
}

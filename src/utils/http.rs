// src/utils/http.rs

//! HTTP client utilities.

use reqwest::redirect::Policy;

use crate::error::Result;
use crate::models::MonitorConfig;

/// Create a configured asynchronous HTTP client.
///
/// The client-wide timeout is a backstop; each request also carries its own.
pub fn create_async_client(config: &MonitorConfig) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .timeout(config.timeout())
        .redirect(Policy::limited(config.max_redirects))
        .build()?;
    Ok(client)
}

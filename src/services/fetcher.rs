// src/services/fetcher.rs

//! HTTP fetch stage of a check.
//!
//! One request per check, bounded by a per-request timeout, no retries.
//! Non-2xx responses are failures; their bodies are never extracted.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use reqwest::{Client, Method, Response};
use url::Url;

use crate::error::{FetchError, Result};
use crate::models::{MonitorConfig, MonitorRule};
use crate::utils::http::create_async_client;

/// Everything needed to issue one request for a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub timeout: Duration,
}

impl FetchRequest {
    pub fn from_rule(rule: &MonitorRule, timeout: Duration) -> Self {
        Self {
            method: rule.method.clone(),
            url: rule.url.clone(),
            headers: rule.headers.clone(),
            body: rule.body.clone(),
            timeout,
        }
    }
}

/// A successful (2xx) response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// Performs the HTTP request of a check.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> std::result::Result<FetchResponse, FetchError>;
}

/// `Fetcher` backed by a shared reqwest client.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    max_body_bytes: usize,
}

impl HttpFetcher {
    /// Build a fetcher from the monitor settings.
    pub fn new(config: &MonitorConfig) -> Result<Self> {
        Ok(Self::with_client(
            create_async_client(config)?,
            config.max_body_bytes,
        ))
    }

    pub fn with_client(client: Client, max_body_bytes: usize) -> Self {
        Self {
            client,
            max_body_bytes,
        }
    }

    fn build_request(
        &self,
        request: &FetchRequest,
    ) -> std::result::Result<reqwest::RequestBuilder, FetchError> {
        let url = Url::parse(&request.url)
            .map_err(|e| FetchError::InvalidUrl(format!("{}: {e}", request.url)))?;
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| FetchError::Request(format!("invalid method '{}'", request.method)))?;

        let mut builder = self.client.request(method, url).timeout(request.timeout);
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| FetchError::Request(format!("invalid header name '{name}'")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| FetchError::Request(format!("invalid value for header '{name}'")))?;
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        Ok(builder)
    }

    /// Read the body, failing once it grows past the configured limit.
    async fn read_body(&self, response: &mut Response) -> std::result::Result<Vec<u8>, FetchError> {
        let limit = self.max_body_bytes;
        if response.content_length().is_some_and(|len| len > limit as u64) {
            return Err(FetchError::BodyTooLarge(limit));
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| FetchError::from_reqwest(&e))?
        {
            if body.len() + chunk.len() > limit {
                return Err(FetchError::BodyTooLarge(limit));
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> std::result::Result<FetchResponse, FetchError> {
        let builder = self.build_request(request)?;
        let mut response = builder
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpError(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = self.read_body(&mut response).await?;

        Ok(FetchResponse {
            status: status.as_u16(),
            content_type,
            body,
        })
    }
}

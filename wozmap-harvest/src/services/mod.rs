//! Upstream lookup services
//!
//! The orchestrator only sees the [`AddressResolver`] and [`ValuationFetcher`] traits;
//! the HTTP clients for PDOK Locatieserver and the WOZ-waardeloket implement them.
//! Every HTTP call goes through the shared [`crate::rate_limiter::RateLimiter`].

pub mod locatieserver_client;
pub mod wozloket_client;

pub use locatieserver_client::LocatieserverClient;
pub use wozloket_client::WozLoketClient;

use crate::error::{HarvestError, HarvestResult, LookupError};
use crate::types::{CanonicalIdentifier, Resolution, ValuationRecord};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;
use wozmap_common::Address;

/// Turns a raw postal address into the identifier the valuation service uses
#[async_trait]
pub trait AddressResolver: Send + Sync {
    /// Not-found outcomes are `Ok(Resolution::Unresolved(..))`; only upstream
    /// failures are errors.
    async fn resolve(&self, address: &Address) -> Result<Resolution, LookupError>;
}

/// Retrieves the valuation history for a canonical identifier
#[async_trait]
pub trait ValuationFetcher: Send + Sync {
    /// An identifier without valuations yields a record with zero entries.
    async fn fetch(&self, identifier: &CanonicalIdentifier) -> Result<ValuationRecord, LookupError>;
}

/// Transport settings shared by the upstream clients
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub user_agent: String,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            user_agent: wozmap_common::config::get_user_agent(),
            request_timeout: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Build the HTTP client shared by both upstream clients
pub fn build_http_client(settings: &HttpSettings) -> HarvestResult<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(settings.user_agent.as_str())
        .timeout(settings.request_timeout)
        .connect_timeout(settings.connect_timeout)
        .build()
        .map_err(|e| HarvestError::Config(format!("HTTP client could not be built: {}", e)))
}

/// Map a non-success status to a lookup error
///
/// 429 honours a `Retry-After` given in seconds. 5xx and 408 are transient; 404 is
/// not-found; anything else is a permanent invalid response.
pub(crate) fn classify_status(
    status: StatusCode,
    headers: &HeaderMap,
    context: &str,
) -> LookupError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        return LookupError::RateLimited { retry_after };
    }

    if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        return LookupError::UpstreamUnavailable(format!("{} returned {}", context, status));
    }

    if status == StatusCode::NOT_FOUND {
        return LookupError::NotFound(context.to_string());
    }

    LookupError::InvalidResponse(format!("{} returned {}", context, status))
}

/// Map a transport failure to a lookup error
pub(crate) fn classify_transport(err: reqwest::Error, context: &str) -> LookupError {
    if err.is_decode() {
        LookupError::InvalidResponse(format!("{}: {}", context, err))
    } else {
        // Timeouts, refused connections, resets and body read failures
        LookupError::UpstreamUnavailable(format!("{}: {}", context, err))
    }
}

/// GET `url` with `query` and decode a JSON body
pub(crate) async fn get_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    query: &[(&str, String)],
    context: &str,
) -> Result<T, LookupError> {
    let response = client
        .get(url)
        .query(query)
        .send()
        .await
        .map_err(|e| classify_transport(e, context))?;

    let status = response.status();
    if !status.is_success() {
        return Err(classify_status(status, response.headers(), context));
    }

    let body = response
        .text()
        .await
        .map_err(|e| classify_transport(e, context))?;

    serde_json::from_str(&body)
        .map_err(|e| LookupError::InvalidResponse(format!("{}: malformed body: {}", context, e)))
}

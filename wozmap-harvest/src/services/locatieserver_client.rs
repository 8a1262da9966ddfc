//! PDOK Locatieserver client
//!
//! Two chained calls per address:
//! 1. `suggest`: free-text search restricted to address documents in the postal code,
//!    first document is the best candidate
//! 2. `lookup`: full document for the candidate, carrying the nummeraanduiding id and
//!    the confirmed address fields
//!
//! Nothing is cached between the two calls, so a retry repeats both.

use super::{get_json, AddressResolver};
use crate::error::LookupError;
use crate::rate_limiter::RateLimiter;
use crate::types::{CanonicalIdentifier, Resolution, UnresolvedReason};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use wozmap_common::Address;

pub const DEFAULT_LOCATIESERVER_URL: &str = "https://api.pdok.nl/bzk/locatieserver/search/v3_1";

#[derive(Debug, Deserialize)]
struct SearchResponse<T> {
    response: SearchDocs<T>,
}

#[derive(Debug, Deserialize)]
struct SearchDocs<T> {
    #[serde(default = "Vec::new")]
    docs: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct SuggestDoc {
    id: String,
}

/// Address document returned by `lookup`
#[derive(Debug, Deserialize)]
struct AddressDoc {
    #[serde(default)]
    nummeraanduiding_id: Option<String>,
    #[serde(default)]
    postcode: Option<String>,
    #[serde(default)]
    huisnummer: Option<u32>,
    #[serde(default)]
    huisletter: Option<String>,
    #[serde(default)]
    gemeentecode: Option<String>,
}

impl AddressDoc {
    /// Address confirmed by the document, when it carries postal code and number
    fn confirmed_address(&self) -> Option<Result<Address, String>> {
        let postcode = self.postcode.as_deref()?;
        let number = self.huisnummer?;
        Some(
            Address::new(postcode, number, self.huisletter.as_deref()).map_err(|_| {
                format!(
                    "{} {}{}",
                    postcode,
                    number,
                    self.huisletter.as_deref().unwrap_or("")
                )
            }),
        )
    }
}

/// Resolves addresses through PDOK Locatieserver
pub struct LocatieserverClient {
    http_client: reqwest::Client,
    base_url: String,
    rate_limiter: Arc<RateLimiter>,
}

impl LocatieserverClient {
    pub fn new(
        http_client: reqwest::Client,
        base_url: &str,
        rate_limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            rate_limiter,
        }
    }

    /// Best candidate document id for `address`
    async fn suggest(&self, address: &Address) -> Result<Option<String>, LookupError> {
        self.rate_limiter.acquire().await;

        let url = format!("{}/suggest", self.base_url);
        let query = [
            ("q", address.query_string()),
            ("fq", "type:adres".to_string()),
            ("fq", format!("postcode:{}", address.postal_code())),
            ("rows", "1".to_string()),
        ];

        tracing::trace!(address = %address, "Querying Locatieserver suggest");
        let response: SearchResponse<SuggestDoc> =
            get_json(&self.http_client, &url, &query, "locatieserver suggest").await?;

        Ok(response.response.docs.into_iter().next().map(|doc| doc.id))
    }

    /// Full address document for a candidate id, `None` when the id is unknown
    async fn lookup(&self, candidate_id: &str) -> Result<Option<AddressDoc>, LookupError> {
        self.rate_limiter.acquire().await;

        let url = format!("{}/lookup", self.base_url);
        let query = [("id", candidate_id.to_string()), ("fl", "*".to_string())];

        tracing::trace!(candidate_id, "Querying Locatieserver lookup");
        let response = get_json::<SearchResponse<AddressDoc>>(
            &self.http_client,
            &url,
            &query,
            "locatieserver lookup",
        )
        .await;
        match response {
            Ok(response) => Ok(response.response.docs.into_iter().next()),
            Err(LookupError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl AddressResolver for LocatieserverClient {
    async fn resolve(&self, address: &Address) -> Result<Resolution, LookupError> {
        let candidate_id = match self.suggest(address).await? {
            Some(id) => id,
            None => return Ok(Resolution::Unresolved(UnresolvedReason::NoCandidate)),
        };

        let doc = match self.lookup(&candidate_id).await? {
            Some(doc) => doc,
            None => {
                return Ok(Resolution::Unresolved(UnresolvedReason::StaleCandidate(
                    candidate_id,
                )))
            }
        };

        match doc.confirmed_address() {
            Some(Ok(confirmed)) if &confirmed != address => {
                return Ok(Resolution::Unresolved(UnresolvedReason::Mismatch {
                    found: confirmed.to_string(),
                }))
            }
            Some(Err(found)) => {
                return Ok(Resolution::Unresolved(UnresolvedReason::Mismatch { found }))
            }
            _ => {}
        }

        match doc.nummeraanduiding_id.filter(|id| !id.trim().is_empty()) {
            Some(id) => Ok(Resolution::Resolved(CanonicalIdentifier {
                id,
                municipality_code: doc.gemeentecode.filter(|c| !c.trim().is_empty()),
            })),
            None => Ok(Resolution::Unresolved(UnresolvedReason::NoIdentifier(
                candidate_id,
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_doc_defaults() {
        let response: SearchResponse<AddressDoc> =
            serde_json::from_str(r#"{"response":{"numFound":1,"docs":[{"id":"adr-1"}]}}"#).unwrap();
        let doc = &response.response.docs[0];
        assert!(doc.nummeraanduiding_id.is_none());
        assert!(doc.confirmed_address().is_none());
    }

    #[test]
    fn test_missing_docs_is_empty() {
        let response: SearchResponse<SuggestDoc> =
            serde_json::from_str(r#"{"response":{"numFound":0}}"#).unwrap();
        assert!(response.response.docs.is_empty());
    }

    #[test]
    fn test_confirmed_address_normalized() {
        let doc: AddressDoc = serde_json::from_str(
            r#"{
                "nummeraanduiding_id": "0363200000218908",
                "postcode": "1012 js",
                "huisnummer": 1,
                "huisletter": "a",
                "gemeentecode": "0363"
            }"#,
        )
        .unwrap();
        let confirmed = doc.confirmed_address().unwrap().unwrap();
        assert_eq!(confirmed, Address::new("1012JS", 1, Some("A")).unwrap());
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = LocatieserverClient::new(
            reqwest::Client::new(),
            "http://localhost:9/search/",
            Arc::new(RateLimiter::per_second(std::num::NonZeroU32::MIN)),
        );
        assert_eq!(client.base_url, "http://localhost:9/search");
    }
}

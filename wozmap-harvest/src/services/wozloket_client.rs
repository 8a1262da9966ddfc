//! WOZ-waardeloket client
//!
//! One call per nummeraanduiding id returns the valuation object, its yearly
//! valuations and the linked buildings and residential objects.

use super::{get_json, ValuationFetcher};
use crate::error::LookupError;
use crate::rate_limiter::RateLimiter;
use crate::types::{CanonicalIdentifier, ValuationEntry, ValuationRecord};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use std::sync::Arc;
use wozmap_common::PropertyInfo;

pub const DEFAULT_WOZLOKET_URL: &str = "https://api.kadaster.nl/lvwoz/wozwaardeloket-api/v1";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WozResponse {
    #[serde(default)]
    woz_object: Option<WozObject>,
    #[serde(default)]
    woz_waarden: Vec<WozWaarde>,
    #[serde(default)]
    panden: Vec<Pand>,
    #[serde(default)]
    verblijfsobjecten: Vec<Verblijfsobject>,
}

#[derive(Debug, Deserialize)]
struct WozObject {
    #[serde(default)]
    gemeentecode: Option<MunicipalityCode>,
}

/// The service sends the municipality code as a number or as a string
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MunicipalityCode {
    Number(u32),
    Text(String),
}

impl MunicipalityCode {
    /// Four-digit zero-padded form (`363` → `0363`)
    fn normalized(&self) -> Option<String> {
        match self {
            MunicipalityCode::Number(n) => Some(format!("{:04}", n)),
            MunicipalityCode::Text(s) => {
                let s = s.trim();
                if s.is_empty() {
                    None
                } else if s.bytes().all(|b| b.is_ascii_digit()) {
                    Some(format!("{:0>4}", s))
                } else {
                    Some(s.to_string())
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WozWaarde {
    peildatum: NaiveDate,
    #[serde(default)]
    vastgestelde_waarde: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Pand {
    #[serde(default)]
    bouwjaar: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct Verblijfsobject {
    #[serde(default)]
    oppervlakte: Option<i64>,
}

impl WozResponse {
    fn into_record(self, identifier: &CanonicalIdentifier) -> ValuationRecord {
        let mut entries: Vec<ValuationEntry> = self
            .woz_waarden
            .into_iter()
            .filter_map(|w| {
                w.vastgestelde_waarde.map(|value| ValuationEntry {
                    date: w.peildatum,
                    value,
                })
            })
            .collect();
        entries.sort_by_key(|e| e.date);

        let construction_year = self.panden.iter().filter_map(|p| p.bouwjaar).min();

        let areas: Vec<i64> = self
            .verblijfsobjecten
            .iter()
            .filter_map(|v| v.oppervlakte)
            .collect();
        let floor_area = if areas.is_empty() {
            None
        } else {
            Some(areas.iter().sum())
        };

        let municipality_code = self
            .woz_object
            .and_then(|o| o.gemeentecode)
            .and_then(|c| c.normalized())
            .or_else(|| {
                identifier
                    .municipality_code
                    .as_ref()
                    .and_then(|c| MunicipalityCode::Text(c.clone()).normalized())
            });

        ValuationRecord {
            info: PropertyInfo {
                canonical_id: identifier.id.clone(),
                construction_year,
                floor_area,
                municipality_code,
            },
            entries,
        }
    }
}

/// Fetches valuation histories from the WOZ-waardeloket
pub struct WozLoketClient {
    http_client: reqwest::Client,
    base_url: String,
    rate_limiter: Arc<RateLimiter>,
}

impl WozLoketClient {
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
}

#[async_trait]
impl ValuationFetcher for WozLoketClient {
    async fn fetch(
        &self,
        identifier: &CanonicalIdentifier,
    ) -> Result<ValuationRecord, LookupError> {
        self.rate_limiter.acquire().await;

        let url = format!("{}/wozwaarde/nummeraanduiding/{}", self.base_url, identifier.id);
        tracing::trace!(identifier = %identifier, "Querying WOZ-waardeloket");

        let response: WozResponse = get_json(&self.http_client, &url, &[], "wozwaardeloket").await?;
        Ok(response.into_record(identifier))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identifier(municipality_code: Option<&str>) -> CanonicalIdentifier {
        CanonicalIdentifier {
            id: "0363200000218908".to_string(),
            municipality_code: municipality_code.map(str::to_string),
        }
    }

    #[test]
    fn test_full_response() {
        let body = r#"{
            "wozObject": {"wozobjectnummer": 36300000123, "gemeentecode": 363},
            "wozWaarden": [
                {"peildatum": "2021-01-01", "vastgesteldeWaarde": 110},
                {"peildatum": "2020-01-01", "vastgesteldeWaarde": 100}
            ],
            "panden": [{"bouwjaar": 1920}, {"bouwjaar": 1905}],
            "verblijfsobjecten": [{"oppervlakte": 60}, {"oppervlakte": 24}]
        }"#;
        let response: WozResponse = serde_json::from_str(body).unwrap();
        let record = response.into_record(&identifier(None));

        assert_eq!(record.entries.len(), 2);
        assert!(record.entries[0].date < record.entries[1].date);
        assert_eq!(record.info.construction_year, Some(1905));
        assert_eq!(record.info.floor_area, Some(84));
        assert_eq!(record.info.municipality_code.as_deref(), Some("0363"));
        assert_eq!(record.info.canonical_id, "0363200000218908");
    }

    #[test]
    fn test_missing_sections_default_empty() {
        let response: WozResponse = serde_json::from_str("{}").unwrap();
        let record = response.into_record(&identifier(Some("344")));

        assert!(record.is_empty());
        assert_eq!(record.info.construction_year, None);
        assert_eq!(record.info.floor_area, None);
        assert_eq!(record.info.municipality_code.as_deref(), Some("0344"));
    }

    #[test]
    fn test_string_municipality_code_padded() {
        let response: WozResponse =
            serde_json::from_str(r#"{"wozObject": {"gemeentecode": "14"}}"#).unwrap();
        let record = response.into_record(&identifier(Some("0363")));
        assert_eq!(record.info.municipality_code.as_deref(), Some("0014"));
    }

    #[test]
    fn test_valuation_without_value_skipped() {
        let response: WozResponse = serde_json::from_str(
            r#"{"wozWaarden": [
                {"peildatum": "2022-01-01"},
                {"peildatum": "2023-01-01", "vastgesteldeWaarde": 5}
            ]}"#,
        )
        .unwrap();
        let record = response.into_record(&identifier(None));
        assert_eq!(record.entries.len(), 1);
        assert_eq!(record.entries[0].value, 5);
    }
}

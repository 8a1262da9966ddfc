//! Shared fixtures for wozmap-harvest integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wozmap_common::{Address, PropertyInfo};
use wozmap_harvest::checkpoint::{CheckpointStore, CHECKPOINT_FILE_NAME};
use wozmap_harvest::dataset::BatchWriter;
use wozmap_harvest::services::{AddressResolver, ValuationFetcher};
use wozmap_harvest::types::{
    CanonicalIdentifier, Resolution, UnresolvedReason, ValuationEntry, ValuationRecord,
};
use wozmap_harvest::workflow::{BackoffPolicy, HarvestReport, HarvestSettings, Orchestrator};
use wozmap_harvest::{HarvestResult, LookupError};

/// `1012JS <n>`
pub fn address(n: u32) -> Address {
    Address::new("1012JS", n, None).unwrap()
}

/// `1012JS 1` … `1012JS <count>`
pub fn addresses(count: u32) -> Vec<Address> {
    (1..=count).map(address).collect()
}

/// Scratch directory with the dataset and checkpoint paths used by a harvest
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn output(&self) -> PathBuf {
        self.dir.path().join("woz_history.parquet")
    }

    pub fn checkpoint(&self) -> PathBuf {
        self.dir.path().join(CHECKPOINT_FILE_NAME)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Settings with a short backoff so retry paths stay fast in real time
pub fn settings(batch_size: usize, workers: usize) -> HarvestSettings {
    HarvestSettings {
        batch_size,
        workers,
        backoff: BackoffPolicy {
            max_attempts: 5,
            initial: Duration::from_millis(10),
            max: Duration::from_millis(50),
        },
        progress_interval: Duration::from_secs(30),
        resume: true,
    }
}

/// Run one harvest invocation against `upstream`
pub async fn run_harvest(
    workspace: &Workspace,
    upstream: &Arc<FakeUpstream>,
    addresses: Vec<Address>,
    settings: HarvestSettings,
    cancel: CancellationToken,
) -> HarvestResult<HarvestReport> {
    run_harvest_at(
        &workspace.output(),
        &workspace.checkpoint(),
        upstream,
        addresses,
        settings,
        cancel,
    )
    .await
}

/// Run one harvest invocation with explicit dataset and checkpoint paths
pub async fn run_harvest_at(
    output: &Path,
    checkpoint: &Path,
    upstream: &Arc<FakeUpstream>,
    addresses: Vec<Address>,
    settings: HarvestSettings,
    cancel: CancellationToken,
) -> HarvestResult<HarvestReport> {
    let store = CheckpointStore::new(checkpoint);
    let writer = BatchWriter::open(output)?;
    let resolver: Arc<dyn AddressResolver> = upstream.clone();
    let fetcher: Arc<dyn ValuationFetcher> = upstream.clone();
    Orchestrator::new(resolver, fetcher, store, writer, settings)
        .run(addresses, cancel)
        .await
}

/// In-process stand-in for both upstream services
///
/// Every address resolves unless marked unresolvable. Addresses with a configured
/// history get it back; all others have an empty history.
#[derive(Default)]
pub struct FakeUpstream {
    histories: HashMap<Address, Vec<(i32, i64)>>,
    unresolvable: HashSet<Address>,
    flaky: Mutex<HashMap<Address, u32>>,
    stop_at: Option<(Address, CancellationToken)>,
    resolve_calls: Mutex<Vec<Address>>,
    fetch_calls: Mutex<Vec<String>>,
}

impl FakeUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history(mut self, address: Address, values: &[(i32, i64)]) -> Self {
        self.histories.insert(address, values.to_vec());
        self
    }

    pub fn unresolvable(mut self, address: Address) -> Self {
        self.unresolvable.insert(address);
        self
    }

    /// Resolution of `address` fails transiently `failures` times before succeeding
    pub fn flaky(self, address: Address, failures: u32) -> Self {
        self.flaky.lock().unwrap().insert(address, failures);
        self
    }

    /// Resolving `address` fires `token` and fails transiently, so the item is
    /// abandoned in backoff
    pub fn stop_at(mut self, address: Address, token: CancellationToken) -> Self {
        self.stop_at = Some((address, token));
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn resolve_calls(&self) -> Vec<Address> {
        self.resolve_calls.lock().unwrap().clone()
    }

    pub fn fetch_calls(&self) -> Vec<String> {
        self.fetch_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AddressResolver for FakeUpstream {
    async fn resolve(&self, address: &Address) -> Result<Resolution, LookupError> {
        self.resolve_calls.lock().unwrap().push(address.clone());

        if let Some((stop, token)) = &self.stop_at {
            if stop == address {
                token.cancel();
                return Err(LookupError::UpstreamUnavailable("stopping".to_string()));
            }
        }

        {
            let mut flaky = self.flaky.lock().unwrap();
            if let Some(remaining) = flaky.get_mut(address) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(LookupError::UpstreamUnavailable("503".to_string()));
                }
            }
        }

        if self.unresolvable.contains(address) {
            return Ok(Resolution::Unresolved(UnresolvedReason::NoCandidate));
        }

        Ok(Resolution::Resolved(CanonicalIdentifier {
            id: address.to_string(),
            municipality_code: Some("0363".to_string()),
        }))
    }
}

#[async_trait]
impl ValuationFetcher for FakeUpstream {
    async fn fetch(
        &self,
        identifier: &CanonicalIdentifier,
    ) -> Result<ValuationRecord, LookupError> {
        self.fetch_calls.lock().unwrap().push(identifier.id.clone());

        let values = self
            .histories
            .iter()
            .find(|(address, _)| address.to_string() == identifier.id)
            .map(|(_, values)| values.clone())
            .unwrap_or_default();

        Ok(ValuationRecord {
            info: PropertyInfo {
                canonical_id: identifier.id.clone(),
                construction_year: Some(1930),
                floor_area: Some(80),
                municipality_code: identifier.municipality_code.clone(),
            },
            entries: values
                .into_iter()
                .map(|(year, value)| ValuationEntry {
                    date: NaiveDate::from_ymd_opt(year, 1, 1).unwrap(),
                    value,
                })
                .collect(),
        })
    }
}

//! wozmap-harvest library interface
//!
//! Historical WOZ valuation harvester: resolves addresses through PDOK Locatieserver,
//! retrieves their valuation history from the WOZ-waardeloket and merges the results
//! into a wide Parquet dataset, resuming from a durable checkpoint.

pub mod checkpoint;
pub mod config;
pub mod dataset;
pub mod error;
pub mod input;
pub mod rate_limiter;
pub mod services;
pub mod types;
pub mod workflow;

pub use crate::error::{HarvestError, HarvestResult, LookupError};

use crate::checkpoint::CheckpointStore;
use crate::config::HarvestConfig;
use crate::dataset::BatchWriter;
use crate::rate_limiter::RateLimiter;
use crate::services::{build_http_client, LocatieserverClient, WozLoketClient};
use crate::workflow::{HarvestReport, Orchestrator};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

/// Run one harvest invocation with the production upstream clients
///
/// Returns when every address has been attempted or `cancel` fired and the gathered
/// prefix has been persisted.
pub async fn run_harvest(
    config: &HarvestConfig,
    cancel: CancellationToken,
) -> HarvestResult<HarvestReport> {
    let run_id = Uuid::new_v4();
    let span = tracing::info_span!("harvest", run_id = %run_id);

    async {
        tracing::info!(
            input = %config.input.display(),
            output = %config.output.display(),
            checkpoint = %config.checkpoint.display(),
            rate_limit = config.rate_limit.get(),
            "Harvest configured"
        );

        let addresses = input::load_addresses(&config.input)?;

        let rate_limiter = Arc::new(RateLimiter::per_second(config.rate_limit));
        let http_client = build_http_client(&config.upstream.http)?;
        let resolver = Arc::new(LocatieserverClient::new(
            http_client.clone(),
            &config.upstream.locatieserver_url,
            Arc::clone(&rate_limiter),
        ));
        let fetcher = Arc::new(WozLoketClient::new(
            http_client,
            &config.upstream.wozloket_url,
            Arc::clone(&rate_limiter),
        ));

        let store = CheckpointStore::new(&config.checkpoint);
        let writer = BatchWriter::open(&config.output)?;

        Orchestrator::new(resolver, fetcher, store, writer, config.settings.clone())
            .run(addresses, cancel)
            .await
    }
    .instrument(span)
    .await
}

//! Per-address state machine
//!
//! `Pending → Resolving → Fetching → Finished`. A transient upstream error keeps the
//! item in its current step and retries it after a backoff; the attempt counter is
//! per step. Every path ends in exactly one [`ItemOutcome`].

use super::retry::BackoffPolicy;
use crate::error::LookupError;
use crate::services::{AddressResolver, ValuationFetcher};
use crate::types::{CanonicalIdentifier, Resolution};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wozmap_common::{Address, OutputRow};

/// Terminal result of one address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Valuation history retrieved, row ready for the dataset
    Fetched(OutputRow),
    /// Address could not be resolved to an identifier
    Unresolvable(String),
    /// Identifier resolved but valuation retrieval failed permanently
    FetchFailed(String),
    /// Valuation service knows the identifier but has no valuations
    NoHistory,
    /// Stopped while waiting to retry; not attempted to completion
    Abandoned,
}

impl ItemOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ItemOutcome::Fetched(_))
    }

    /// Completed items advance the checkpoint; abandoned ones do not
    pub fn is_completed(&self) -> bool {
        !matches!(self, ItemOutcome::Abandoned)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ItemOutcome::Fetched(_) => "fetched",
            ItemOutcome::Unresolvable(_) => "unresolvable",
            ItemOutcome::FetchFailed(_) => "fetch_failed",
            ItemOutcome::NoHistory => "no_history",
            ItemOutcome::Abandoned => "abandoned",
        }
    }
}

#[derive(Debug)]
enum ItemState {
    Pending,
    Resolving { attempt: u32 },
    Fetching { identifier: CanonicalIdentifier, attempt: u32 },
    Finished(ItemOutcome),
}

/// Drives single addresses through resolution and valuation retrieval
pub struct ItemRunner {
    resolver: Arc<dyn AddressResolver>,
    fetcher: Arc<dyn ValuationFetcher>,
    policy: BackoffPolicy,
    cancel: CancellationToken,
}

impl ItemRunner {
    pub fn new(
        resolver: Arc<dyn AddressResolver>,
        fetcher: Arc<dyn ValuationFetcher>,
        policy: BackoffPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            resolver,
            fetcher,
            policy,
            cancel,
        }
    }

    pub async fn run(&self, index: usize, address: &Address) -> ItemOutcome {
        let mut state = ItemState::Pending;

        loop {
            state = match state {
                ItemState::Pending => ItemState::Resolving { attempt: 1 },

                ItemState::Resolving { attempt } => match self.resolver.resolve(address).await {
                    Ok(Resolution::Resolved(identifier)) => {
                        tracing::trace!(
                            index,
                            address = %address,
                            identifier = %identifier,
                            "Address resolved"
                        );
                        ItemState::Fetching {
                            identifier,
                            attempt: 1,
                        }
                    }
                    Ok(Resolution::Unresolved(reason)) => {
                        tracing::warn!(
                            index,
                            address = %address,
                            reason = %reason,
                            "Address unresolvable"
                        );
                        ItemState::Finished(ItemOutcome::Unresolvable(reason.to_string()))
                    }
                    Err(err) if err.is_transient() && self.policy.should_retry(attempt) => {
                        if self.backoff(index, address, "resolve", attempt, &err).await {
                            ItemState::Resolving {
                                attempt: attempt + 1,
                            }
                        } else {
                            ItemState::Finished(ItemOutcome::Abandoned)
                        }
                    }
                    Err(err) => {
                        tracing::warn!(
                            index,
                            address = %address,
                            attempt,
                            error = %err,
                            "Address resolution failed"
                        );
                        ItemState::Finished(ItemOutcome::Unresolvable(err.to_string()))
                    }
                },

                ItemState::Fetching {
                    identifier,
                    attempt,
                } => match self.fetcher.fetch(&identifier).await {
                    Ok(record) if record.is_empty() => {
                        tracing::warn!(
                            index,
                            address = %address,
                            identifier = %identifier,
                            "No valuation history"
                        );
                        ItemState::Finished(ItemOutcome::NoHistory)
                    }
                    Ok(record) => {
                        let row = record.into_output_row(address.clone());
                        ItemState::Finished(ItemOutcome::Fetched(row))
                    }
                    Err(err) if err.is_transient() && self.policy.should_retry(attempt) => {
                        if self.backoff(index, address, "fetch", attempt, &err).await {
                            ItemState::Fetching {
                                identifier,
                                attempt: attempt + 1,
                            }
                        } else {
                            ItemState::Finished(ItemOutcome::Abandoned)
                        }
                    }
                    Err(err) => {
                        tracing::warn!(
                            index,
                            address = %address,
                            identifier = %identifier,
                            attempt,
                            error = %err,
                            "Valuation fetch failed"
                        );
                        ItemState::Finished(ItemOutcome::FetchFailed(err.to_string()))
                    }
                },

                ItemState::Finished(outcome) => return outcome,
            };
        }
    }

    /// Sleep before the next attempt; `false` when cancelled while waiting
    async fn backoff(
        &self,
        index: usize,
        address: &Address,
        step: &str,
        attempt: u32,
        err: &LookupError,
    ) -> bool {
        let delay = self.policy.delay_for(attempt, err.retry_after());
        tracing::warn!(
            index,
            address = %address,
            step,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Transient upstream error, backing off"
        );

        tokio::select! {
            _ = self.cancel.cancelled() => {
                tracing::debug!(index, address = %address, step, "Abandoned during backoff");
                false
            }
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{UnresolvedReason, ValuationEntry, ValuationRecord};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;
    use wozmap_common::PropertyInfo;

    /// Replays scripted results, then repeats the last one
    struct Scripted<T> {
        results: Mutex<VecDeque<Result<T, LookupError>>>,
        calls: Mutex<u32>,
    }

    impl<T: Clone> Scripted<T> {
        fn new(results: Vec<Result<T, LookupError>>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results.into()),
                calls: Mutex::new(0),
            })
        }

        fn next(&self) -> Result<T, LookupError> {
            *self.calls.lock().unwrap() += 1;
            let mut results = self.results.lock().unwrap();
            if results.len() > 1 {
                results.pop_front().unwrap()
            } else {
                results.front().cloned().unwrap()
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl AddressResolver for Scripted<Resolution> {
        async fn resolve(&self, _address: &Address) -> Result<Resolution, LookupError> {
            self.next()
        }
    }

    #[async_trait]
    impl ValuationFetcher for Scripted<ValuationRecord> {
        async fn fetch(
            &self,
            _identifier: &CanonicalIdentifier,
        ) -> Result<ValuationRecord, LookupError> {
            self.next()
        }
    }

    fn address() -> Address {
        Address::new("1012JS", 1, None).unwrap()
    }

    fn resolved() -> Result<Resolution, LookupError> {
        Ok(Resolution::Resolved(CanonicalIdentifier {
            id: "0363200000218908".to_string(),
            municipality_code: Some("0363".to_string()),
        }))
    }

    fn record(entries: &[(i32, i64)]) -> Result<ValuationRecord, LookupError> {
        Ok(ValuationRecord {
            info: PropertyInfo {
                canonical_id: "0363200000218908".to_string(),
                ..PropertyInfo::default()
            },
            entries: entries
                .iter()
                .map(|(year, value)| ValuationEntry {
                    date: NaiveDate::from_ymd_opt(*year, 1, 1).unwrap(),
                    value: *value,
                })
                .collect(),
        })
    }

    fn unavailable() -> LookupError {
        LookupError::UpstreamUnavailable("503".to_string())
    }

    fn runner(
        resolver: Arc<Scripted<Resolution>>,
        fetcher: Arc<Scripted<ValuationRecord>>,
        cancel: CancellationToken,
    ) -> ItemRunner {
        ItemRunner::new(resolver, fetcher, BackoffPolicy::default(), cancel)
    }

    #[tokio::test(start_paused = true)]
    async fn test_happy_path() {
        let resolver = Scripted::new(vec![resolved()]);
        let fetcher = Scripted::new(vec![record(&[(2020, 100), (2021, 110)])]);
        let outcome = runner(resolver, fetcher, CancellationToken::new())
            .run(0, &address())
            .await;

        match outcome {
            ItemOutcome::Fetched(row) => {
                assert_eq!(row.value_for(2020), Some(100));
                assert_eq!(row.value_for(2021), Some(110));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresolved_is_not_retried() {
        let resolver = Scripted::new(vec![Ok(Resolution::Unresolved(
            UnresolvedReason::NoCandidate,
        ))]);
        let fetcher = Scripted::new(vec![record(&[(2020, 1)])]);
        let outcome = runner(resolver.clone(), fetcher.clone(), CancellationToken::new())
            .run(0, &address())
            .await;

        assert!(matches!(outcome, ItemOutcome::Unresolvable(_)));
        assert_eq!(resolver.calls(), 1);
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_then_success_backs_off() {
        let resolver = Scripted::new(vec![Err(unavailable()), Err(unavailable()), resolved()]);
        let fetcher = Scripted::new(vec![record(&[(2020, 1)])]);
        let start = tokio::time::Instant::now();

        let outcome = runner(resolver.clone(), fetcher, CancellationToken::new())
            .run(0, &address())
            .await;

        assert!(outcome.is_success());
        assert_eq!(resolver.calls(), 3);
        // 1s after the first failure, 2s after the second
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_exhausted_is_permanent() {
        let resolver = Scripted::new(vec![resolved()]);
        let fetcher = Scripted::new(vec![Err(LookupError::RateLimited { retry_after: None })]);

        let outcome = runner(resolver, fetcher.clone(), CancellationToken::new())
            .run(0, &address())
            .await;

        assert!(matches!(outcome, ItemOutcome::FetchFailed(_)));
        assert_eq!(fetcher.calls(), BackoffPolicy::default().max_attempts);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_history() {
        let resolver = Scripted::new(vec![resolved()]);
        let fetcher = Scripted::new(vec![record(&[])]);
        let outcome = runner(resolver, fetcher, CancellationToken::new())
            .run(0, &address())
            .await;
        assert_eq!(outcome, ItemOutcome::NoHistory);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_fetch_is_permanent() {
        let resolver = Scripted::new(vec![resolved()]);
        let fetcher = Scripted::new(vec![Err(LookupError::NotFound("x".to_string()))]);
        let outcome = runner(resolver, fetcher.clone(), CancellationToken::new())
            .run(0, &address())
            .await;
        assert!(matches!(outcome, ItemOutcome::FetchFailed(_)));
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_abandons() {
        let resolver = Scripted::new(vec![Err(unavailable())]);
        let fetcher = Scripted::new(vec![record(&[(2020, 1)])]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = runner(resolver.clone(), fetcher, cancel).run(0, &address()).await;
        assert_eq!(outcome, ItemOutcome::Abandoned);
        assert!(!outcome.is_completed());
        assert_eq!(resolver.calls(), 1);
    }
}

//! Harvest workflow: per-item state machine, retry policy, progress tracking and the
//! coordinator that ties them to the dataset writer and checkpoint store.

pub mod item;
pub mod orchestrator;
pub mod progress;
pub mod retry;

pub use item::{ItemOutcome, ItemRunner};
pub use orchestrator::{HarvestSettings, Orchestrator};
pub use progress::{HarvestReport, HarvestStats, PrefixTracker, RunStatus};
pub use retry::BackoffPolicy;

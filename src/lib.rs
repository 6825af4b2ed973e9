pub mod catalog;
pub mod config;
pub mod crawl;
pub mod dsl;
pub mod error;
pub mod fusion;
pub mod observation;
pub mod pattern_engine;
pub mod result;
pub mod rules;
pub mod scraping;
pub mod worker_pool;

pub use catalog::Catalog;
pub use config::FingerprintConfig;
pub use error::{FingerprintError, Result};
pub use fusion::FusionResult;
pub use observation::Observation;
pub use result::FingerResult;
pub use rules::RuleDocument;
pub use worker_pool::{CancellationToken, Progress, WorkerPool};

//! User-authored rule documents (spec §3 Rule document, §4.4 Rule engine,
//! C6): a small matcher DSL layered over regex/word/status/size/binary/
//! expression primitives, plus the optional extractor post-step (§11.3)
//! and the KV-store persistence seam (§11.5).

pub mod engine;
pub mod extractors;
pub mod model;
pub mod store;

pub use engine::{evaluate, RuleDetection};
pub use model::RuleDocument;
pub use store::{FsRuleStore, RuleDocumentStore};

//! Resource-governed TF-IDF search over a versioned, checksummed index.

pub mod builder;
pub mod config;
pub mod engine;
pub mod error;
pub mod guard;
pub mod index;
pub mod persist;
pub mod planner;
pub mod scorer;
pub mod tokenizer;

pub use builder::build_index;
pub use config::{ResourceLimits, SearchConfig};
pub use engine::{search, search_with_guard, SearchOutcome};
pub use error::{Error, Result, Section};
pub use guard::{Checkpoint, ResourceGuard, StopReason};
pub use index::{DocId, Document, Index, SharedIndex, TermVector};
pub use scorer::ScoredDoc;

//! Certified Episodic Memory.
//!
//! Stores episodes whose reliability profile passes the certification bar,
//! indexes them by a similarity key, serves ranked retrievals to the
//! planner and keeps per-agent resilience and traceability counters.

pub mod error;
pub mod index;
pub mod record;
pub mod retention;
pub mod similarity;
pub mod stats;
pub mod store;

pub use error::{MemoryError, MemoryResult};
pub use index::{IndexedRecord, MemoryIndex};
pub use record::{CertifiedSlice, EpisodicMemoryRecord, RetrievedRecord};
pub use retention::{compact_by_age, evict_to_capacity, CompactionResult};
pub use similarity::{tokenize, SimilarityKey, TrajectoryShape};
pub use stats::{CertificationStats, StatsRegistry, StatsSnapshot};
pub use store::{
    check_certification, CertificationOutcome, CertifiedMemory, EpisodicStore, RejectionReason,
};

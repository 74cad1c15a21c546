//! Causally consistent shared memory.
//!
//! Every worker keeps a vector clock; writes are versioned with it so any two
//! versions of a key can be ordered (or recognized as a true conflict) without
//! synchronized wall clocks. Reads are cache-first; writes are buffered and
//! flushed to the backing store on a timer, or immediately via `force_sync`.

mod clock;
mod memory;
mod resolver;
mod types;

pub use clock::{CausalOrder, VectorClock};
pub use memory::{CausalMemory, SyncMetricsSnapshot};
pub use resolver::MergePolicy;
pub use types::VersionedEntry;

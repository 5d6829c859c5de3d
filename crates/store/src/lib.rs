//! In-memory collaborators for running reconcilers without a cluster:
//! an object store with a lagging read cache, an event recorder, and the
//! coalescing key queue used by worker pools.

#![forbid(unsafe_code)]

mod memory;
mod queue;
mod recorder;

pub use memory::{MemoryStore, Verb, WriteAction};
pub use queue::KeyQueue;
pub use recorder::{MemoryRecorder, RecordedEvent};

pub mod dedupe;
pub mod delivery;
pub mod lock;
pub mod run;

pub use crate::dedupe::{
    dedupe_from_env, DedupeConfig, DedupeError, DedupeStore, MemoryDedupeStore, RedisDedupeStore,
};
pub use crate::delivery::{DeliveryStore, MemoryDeliveryStore};
pub use crate::lock::{MemoryProjectLock, ProjectLock};
pub use crate::run::{MemoryRunStore, RunArtifact, RunRecord, RunState, RunStore};

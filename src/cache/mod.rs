//! Versioned response store.
//!
//! Responses are grouped into named generations. Strategies read and write the
//! agent's own generation; activation makes that generation current and
//! deletes every other one.

mod entry;
mod key;
mod storage;

pub use entry::{CacheEntry, GenerationInfo};
pub use key::RequestKey;
pub use storage::{CacheStorage, SqliteStorage};

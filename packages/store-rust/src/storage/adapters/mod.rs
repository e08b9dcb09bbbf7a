//! [`StorageAdapter`](super::StorageAdapter) implementations.

mod memory;
#[cfg(feature = "redb")]
mod redb;
mod text;

pub use memory::MemoryAdapter;
#[cfg(feature = "redb")]
pub use self::redb::RedbAdapter;
pub use text::{MemoryTextStore, TextStore, TextStoreAdapter, TextStoreError};

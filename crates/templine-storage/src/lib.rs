//! Storage backends for the Templine relay.
//!
//! Both backends implement [`ReadingCache`](templine_core::ReadingCache) and
//! [`ProfileStore`](templine_core::ProfileStore):
//! - [`RedbStore`]: persistent, one redb file
//! - [`MemoryStore`]: process-local maps

pub mod error;
pub mod memory;
pub mod redb;

pub use error::{Error, Result};
pub use memory::MemoryStore;
pub use self::redb::RedbStore;

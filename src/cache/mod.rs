//! Namespaced response cache with strategy dispatch and offline support.
//!
//! This module provides the storage half of the layer:
//! - Independently named namespaces, each stamped with a build version
//! - Five strategies (cache-first, network-first, stale-while-revalidate,
//!   network-only, cache-only) run against those namespaces
//! - Typed offline placeholders when cache and network both come up empty
//! - A capacity sweep that evicts oldest-inserted entries

pub mod eviction;
mod layer;
mod placeholder;
mod storage;
mod traits;

pub use layer::{CacheLayer, Fallback, Strategy};
pub use placeholder::ResourceFamily;
pub use storage::{CacheStorage, SqliteStorage};
pub use traits::{CacheEntry, CacheKey, CacheSource, Namespace, NamespaceFamily};

pub(crate) use storage::parse_datetime;

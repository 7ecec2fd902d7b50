mod atomic;
mod entry;
mod layout;
mod store;

pub use entry::CacheEntry;
pub use layout::{CacheLayout, PARTIAL_SUFFIX};
pub use store::AssetCacheStore;

pub(crate) use atomic::write_atomic;

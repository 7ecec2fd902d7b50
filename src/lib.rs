pub mod cache;
pub mod error;
pub mod events;
pub mod http;
pub mod index;
pub mod location;
pub mod sync;

// Re-export main types for convenience
pub use cache::{AssetCacheStore, CacheEntry, CacheLayout};
pub use error::{CacheError, ConfigError, DownloadError, ListingError, SyncError, TransportError};
pub use events::{IssueKind, SyncEvent, SyncIssue, SyncState};
pub use http::{HttpClient, HttpResponse, ImageResponse, ReqwestClient};
pub use index::{fetch_listing, parse_index};
pub use location::AssetLocation;
pub use sync::{AssetSync, LoadedAsset, SyncMode, SyncOptions, SyncReport};

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashSet;
use std::io::Cursor;
use std::sync::Arc;

use image::{DynamicImage, ImageFormat};
use reqwest::header::{HeaderMap, HeaderValue, IF_NONE_MATCH};
use tokio::sync::{Mutex, broadcast, watch};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::cache::{AssetCacheStore, CacheEntry, CacheLayout, write_atomic};
use crate::error::{CacheError, DownloadError, SyncError};
use crate::events::{EventBus, IssueKind, SyncEvent, SyncIssue, SyncState};
use crate::http::{HttpClient, ImageResponse, NOT_MODIFIED};
use crate::index::fetch_listing;
use crate::location::AssetLocation;

/// Options for asset synchronization
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Only sync files with one of these extensions (leading dot, e.g. `.png`)
    pub allowed_extensions: Option<Vec<String>>,
    /// URL requested before listing; a transport failure means offline
    pub connectivity_probe: Option<Url>,
    /// Serve the cache when the probe fails instead of ending the pass
    pub use_cache_if_offline: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            allowed_extensions: None,
            connectivity_probe: None,
            use_cache_if_offline: true,
        }
    }
}

/// A decoded asset from the latest completed pass
#[derive(Debug, Clone)]
pub struct LoadedAsset {
    pub location: AssetLocation,
    pub name: String,
    pub image: Arc<DynamicImage>,
}

impl LoadedAsset {
    fn from_entry(entry: &CacheEntry, image: DynamicImage) -> Self {
        Self {
            location: entry.location.clone(),
            name: entry.display_name.clone(),
            image: Arc::new(image),
        }
    }
}

/// Where the assets of a pass came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    #[default]
    Online,
    CacheOnly,
}

/// Result of a completed sync pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub mode: SyncMode,
    /// Number of assets in the published result set
    pub loaded: usize,
    /// Assets fetched with a fresh body
    pub downloaded: usize,
    /// Assets the server reported as not modified
    pub cache_hits: usize,
    /// Assets that were skipped because of an error
    pub failed: usize,
    /// Cache entries dropped because they are no longer listed
    pub pruned: usize,
}

enum Reconciled {
    Downloaded(LoadedAsset),
    CacheHit(LoadedAsset),
    Skipped,
}

/// Keeps a local image cache in sync with a remote directory index
///
/// Every pass either lists the remote directory and reconciles the cache
/// against it, or (when offline or the listing fails) serves what is
/// already cached. Progress, issues and completion are published on a
/// broadcast channel; see [`AssetSync::subscribe`].
///
/// Only one pass runs at a time. Starting another while one is in flight
/// fails with [`SyncError::AlreadyRunning`].
pub struct AssetSync<C> {
    client: C,
    base_url: Url,
    layout: CacheLayout,
    options: SyncOptions,
    /// Loaded lazily by the first pass; the lock doubles as the pass guard
    store: Mutex<Option<AssetCacheStore>>,
    events: EventBus,
    state: watch::Sender<SyncState>,
    assets: watch::Sender<Arc<[LoadedAsset]>>,
}

impl<C: HttpClient> AssetSync<C> {
    pub fn new(client: C, base_url: Url, layout: CacheLayout, options: SyncOptions) -> Self {
        let (state, _) = watch::channel(SyncState::Idle);
        let (assets, _) = watch::channel(Arc::<[LoadedAsset]>::from(Vec::new()));

        Self {
            client,
            base_url,
            layout,
            options,
            store: Mutex::new(None),
            events: EventBus::new(),
            state,
            assets,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    /// Snapshot of the assets published by the latest completed pass
    pub fn assets(&self) -> Arc<[LoadedAsset]> {
        self.assets.borrow().clone()
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Run one sync pass
    pub async fn sync(&self) -> Result<SyncReport, SyncError> {
        self.sync_with_cancel(&CancellationToken::new()).await
    }

    /// Run one sync pass that can be abandoned between assets
    ///
    /// On cancellation the reconciled part of the cache is persisted, the
    /// previous result set stays published and no ready event is sent.
    pub async fn sync_with_cancel(
        &self,
        cancel: &CancellationToken,
    ) -> Result<SyncReport, SyncError> {
        let mut guard = self.store.try_lock().map_err(|_| SyncError::AlreadyRunning)?;
        let store = self.ensure_loaded(&mut guard).await;

        if !self.check_connectivity().await {
            if !self.options.use_cache_if_offline {
                self.set_state(SyncState::Idle);
                return Err(SyncError::Offline);
            }
            return Ok(self.load_from_cache(store).await);
        }

        let Some(listing) = self.list_remote().await else {
            return Ok(self.load_from_cache(store).await);
        };

        self.reconcile(store, listing, cancel).await
    }

    /// Publish whatever is cached without touching the network
    ///
    /// The store is neither modified nor persisted.
    pub async fn load_cached(&self) -> Result<SyncReport, SyncError> {
        let mut guard = self.store.try_lock().map_err(|_| SyncError::AlreadyRunning)?;
        let store = self.ensure_loaded(&mut guard).await;

        Ok(self.load_from_cache(store).await)
    }

    async fn ensure_loaded<'a>(
        &self,
        slot: &'a mut Option<AssetCacheStore>,
    ) -> &'a mut AssetCacheStore {
        let store = match slot.take() {
            Some(store) => store,
            None => self.load_store().await,
        };
        slot.insert(store)
    }

    async fn load_store(&self) -> AssetCacheStore {
        let cleaned = self.layout.clean_partial_files().await;
        if cleaned > 0 {
            self.events
                .log(format!("Cleaned up {cleaned} partial files from an interrupted sync"));
        }

        if let Err(e) = tokio::fs::create_dir_all(self.layout.dir()).await {
            let cause = CacheError::CreateDirectoryFailed {
                path: self.layout.dir().to_path_buf(),
                source: e,
            };
            self.events.issue(
                SyncIssue::new(IssueKind::CacheFileError, "Failed to create the cache directory")
                    .caused_by(cause),
            );
        }

        let path = self.layout.document_path();
        match AssetCacheStore::load(&path).await {
            Ok(store) => {
                if store.is_empty() {
                    self.events.log("Asset cache is empty");
                }
                store
            }
            Err(e) => {
                self.events.issue(
                    SyncIssue::new(
                        IssueKind::CacheFileError,
                        format!(
                            "An error occurred trying to read the asset cache file: {}",
                            path.display()
                        ),
                    )
                    .caused_by(e),
                );
                AssetCacheStore::default()
            }
        }
    }

    async fn check_connectivity(&self) -> bool {
        let Some(probe) = &self.options.connectivity_probe else {
            return true;
        };

        self.set_state(SyncState::CheckingConnectivity);
        self.events.log("Checking internet connection...");

        match self.client.get(probe.as_str(), &HeaderMap::new()).await {
            Ok(_) => true,
            Err(e) => {
                self.events.issue(
                    SyncIssue::new(IssueKind::NetworkUnavailable, "No internet connection.")
                        .caused_by(e),
                );
                false
            }
        }
    }

    async fn list_remote(&self) -> Option<Vec<AssetLocation>> {
        self.set_state(SyncState::ListingRemote);
        self.events.log(format!("Listing {}", self.base_url));

        let extensions = self.options.allowed_extensions.as_deref();
        match fetch_listing(&self.client, &self.base_url, extensions).await {
            Ok(listing) => Some(listing),
            Err(e) => {
                self.events.issue(
                    SyncIssue::new(
                        IssueKind::ListingFailed,
                        "Failed to retrieve the list of assets online.",
                    )
                    .caused_by(e),
                );
                None
            }
        }
    }

    async fn load_from_cache(&self, store: &AssetCacheStore) -> SyncReport {
        self.set_state(SyncState::UsingCacheOnly);

        let mut assets = Vec::with_capacity(store.len());
        let mut failed = 0;

        for entry in store.entries() {
            self.events
                .log(format!("Loading asset from cache: {}", entry.display_name));

            match entry.read_image().await {
                Ok(image) => assets.push(LoadedAsset::from_entry(entry, image)),
                Err(e) => {
                    self.report_cache_read(&entry.location, e);
                    failed += 1;
                }
            }
        }

        let report = SyncReport {
            mode: SyncMode::CacheOnly,
            loaded: assets.len(),
            failed,
            ..Default::default()
        };
        self.publish(assets);
        report
    }

    async fn reconcile(
        &self,
        store: &mut AssetCacheStore,
        listing: Vec<AssetLocation>,
        cancel: &CancellationToken,
    ) -> Result<SyncReport, SyncError> {
        self.set_state(SyncState::Reconciling);

        let listing = dedupe(listing);
        let keep: HashSet<AssetLocation> = listing.iter().cloned().collect();

        let pruned = store.prune(&keep).await;
        for entry in &pruned {
            self.events
                .log(format!("Deleting {} ({})", entry.display_name, entry.location));
        }

        let mut report = SyncReport {
            mode: SyncMode::Online,
            pruned: pruned.len(),
            ..Default::default()
        };
        let mut assets = Vec::with_capacity(listing.len());
        let total = listing.len();

        for (current, location) in listing.iter().enumerate() {
            if cancel.is_cancelled() {
                self.events.log("Sync cancelled");
                self.persist(store).await;
                self.set_state(SyncState::Idle);
                return Err(SyncError::Cancelled);
            }

            self.set_state(SyncState::Downloading { current, total });
            self.events
                .log(format!("Downloading asset: {}", location.display_name()));

            match self.reconcile_asset(store, location).await {
                Reconciled::Downloaded(asset) => {
                    report.downloaded += 1;
                    assets.push(asset);
                }
                Reconciled::CacheHit(asset) => {
                    report.cache_hits += 1;
                    assets.push(asset);
                }
                Reconciled::Skipped => report.failed += 1,
            }
        }

        self.set_state(SyncState::Persisting);
        self.persist(store).await;

        report.loaded = assets.len();
        self.publish(assets);
        Ok(report)
    }

    async fn reconcile_asset(
        &self,
        store: &mut AssetCacheStore,
        location: &AssetLocation,
    ) -> Reconciled {
        let headers = conditional_headers(store.lookup(location));

        let response = match self.client.get_image(location.as_str(), &headers).await {
            Ok(response) => response,
            Err(e) => return self.download_failed(location, e.into()),
        };

        if response.status == NOT_MODIFIED {
            tracing::debug!(%location, "not modified");
            return self.load_cache_hit(store, location).await;
        }

        match self.save_download(location, response).await {
            Ok((entry, asset)) => {
                // The file is in place, so the entry may now point at it
                store.put(entry);
                Reconciled::Downloaded(asset)
            }
            Err(e) => self.download_failed(location, e),
        }
    }

    async fn load_cache_hit(
        &self,
        store: &mut AssetCacheStore,
        location: &AssetLocation,
    ) -> Reconciled {
        let Some(entry) = store.lookup(location) else {
            self.events.issue(
                SyncIssue::new(
                    IssueKind::CachedTextureNotFound,
                    format!("Could not find {location} in cache"),
                )
                .at(location),
            );
            return Reconciled::Skipped;
        };

        let read = entry.read_image().await;
        match read {
            Ok(image) => Reconciled::CacheHit(LoadedAsset::from_entry(entry, image)),
            Err(e) => {
                self.report_cache_read(location, e);
                // Forget the broken copy so the next pass fetches it unconditionally
                store.remove(location);
                Reconciled::Skipped
            }
        }
    }

    async fn save_download(
        &self,
        location: &AssetLocation,
        response: ImageResponse,
    ) -> Result<(CacheEntry, LoadedAsset), DownloadError> {
        if !response.is_success() {
            return Err(DownloadError::HttpStatus {
                url: location.to_string(),
                status: response.status,
            });
        }

        let etag = response.etag().unwrap_or_default().to_string();
        let image = response.image.ok_or_else(|| DownloadError::MissingImage {
            url: location.to_string(),
        })?;

        let path = self.layout.image_path(location);
        let png = encode_png(&image).map_err(|e| DownloadError::EncodeFailed {
            path: path.clone(),
            source: e,
        })?;
        write_atomic(&path, &png)
            .await
            .map_err(|e| DownloadError::FileWriteFailed {
                path: path.clone(),
                source: e,
            })?;

        tracing::debug!(%location, path = %path.display(), etag = %etag, "stored asset");

        let entry = CacheEntry::new(location.clone(), etag, path);
        let asset = LoadedAsset::from_entry(&entry, image);
        Ok((entry, asset))
    }

    fn download_failed(&self, location: &AssetLocation, error: DownloadError) -> Reconciled {
        self.events.issue(
            SyncIssue::new(
                IssueKind::DownloadFailed,
                format!("Failed to download asset: {location}"),
            )
            .at(location)
            .caused_by(error),
        );
        Reconciled::Skipped
    }

    fn report_cache_read(&self, location: &AssetLocation, error: CacheError) {
        self.events.issue(
            SyncIssue::new(error.issue_kind(), format!("Could not load {location} from cache"))
                .at(location)
                .caused_by(error),
        );
    }

    async fn persist(&self, store: &AssetCacheStore) {
        if let Err(e) = store.persist(&self.layout.document_path()).await {
            self.events.issue(
                SyncIssue::new(IssueKind::CacheFileError, "Failed to write the asset cache file")
                    .caused_by(e),
            );
        }
    }

    fn publish(&self, assets: Vec<LoadedAsset>) {
        let count = assets.len();
        self.assets.send_replace(Arc::from(assets));
        self.set_state(SyncState::Ready);
        self.events.ready(count);
    }

    fn set_state(&self, state: SyncState) {
        self.state.send_replace(state);
        self.events.state(state);
    }
}

/// `If-None-Match` for entries carrying a usable validation tag
fn conditional_headers(entry: Option<&CacheEntry>) -> HeaderMap {
    let mut headers = HeaderMap::new();

    if let Some(entry) = entry.filter(|entry| entry.has_validation_tag()) {
        match HeaderValue::from_str(&entry.validation_tag) {
            Ok(value) => {
                headers.insert(IF_NONE_MATCH, value);
            }
            Err(_) => {
                tracing::warn!(location = %entry.location, "ignoring unusable validation tag")
            }
        }
    }

    headers
}

/// Duplicate listings resolve to the same location; keep the first position
fn dedupe(listing: Vec<AssetLocation>) -> Vec<AssetLocation> {
    let mut seen = HashSet::new();
    listing
        .into_iter()
        .filter(|location| seen.insert(location.clone()))
        .collect()
}

fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

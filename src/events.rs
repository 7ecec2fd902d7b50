// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::location::AssetLocation;

/// Buffered events per subscriber before it starts lagging
const EVENT_CAPACITY: usize = 256;

/// Kinds of recoverable conditions reported during a sync pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IssueKind {
    /// The cache document exists but could not be read, parsed or written
    CacheFileError,
    /// The connectivity probe failed
    NetworkUnavailable,
    /// The remote index could not be fetched
    ListingFailed,
    /// A single asset could not be downloaded
    DownloadFailed,
    /// A cached image exists per metadata but could not be decoded
    ReadFromCacheFailed,
    /// Metadata references an image with no file behind it
    CachedTextureNotFound,
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IssueKind::CacheFileError => "cache file error",
            IssueKind::NetworkUnavailable => "network unavailable",
            IssueKind::ListingFailed => "listing failed",
            IssueKind::DownloadFailed => "download failed",
            IssueKind::ReadFromCacheFailed => "read from cache failed",
            IssueKind::CachedTextureNotFound => "cached image not found",
        };
        f.write_str(name)
    }
}

/// A reported condition together with its underlying cause
#[derive(Debug, Clone)]
pub struct SyncIssue {
    pub kind: IssueKind,
    pub message: String,
    pub location: Option<AssetLocation>,
    pub cause: Option<Arc<dyn Error + Send + Sync>>,
}

impl SyncIssue {
    pub fn new(kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            location: None,
            cause: None,
        }
    }

    pub fn at(mut self, location: &AssetLocation) -> Self {
        self.location = Some(location.clone());
        self
    }

    pub fn caused_by(mut self, cause: impl Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }
}

impl fmt::Display for SyncIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}) {}", self.kind, self.message)?;
        if let Some(cause) = &self.cause {
            write!(f, ": {cause}")?;
        }
        Ok(())
    }
}

/// Phases a sync pass moves through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    CheckingConnectivity,
    ListingRemote,
    UsingCacheOnly,
    Reconciling,
    Downloading {
        /// Zero-based index of the asset being reconciled
        current: usize,
        total: usize,
    },
    Persisting,
    Ready,
}

/// Events published to subscribers of an `AssetSync`
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// Human-readable progress message
    Log(String),

    /// A recoverable condition; the pass continues
    Issue(SyncIssue),

    /// The orchestrator moved to another phase
    StateChanged(SyncState),

    /// A pass completed and the result set was replaced
    AssetsReady { count: usize },
}

/// Publish side of the event channel, mirroring every event to `tracing`
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    pub fn log(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("{message}");
        self.publish(SyncEvent::Log(message));
    }

    pub fn issue(&self, issue: SyncIssue) {
        match &issue.location {
            Some(location) => tracing::warn!(kind = ?issue.kind, %location, "{issue}"),
            None => tracing::warn!(kind = ?issue.kind, "{issue}"),
        }
        self.publish(SyncEvent::Issue(issue));
    }

    pub fn state(&self, state: SyncState) {
        tracing::debug!(?state, "sync state changed");
        self.publish(SyncEvent::StateChanged(state));
    }

    pub fn ready(&self, count: usize) {
        tracing::info!(count, "assets ready");
        self.publish(SyncEvent::AssetsReady { count });
    }

    fn publish(&self, event: SyncEvent) {
        // Sending only fails when nobody is subscribed
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

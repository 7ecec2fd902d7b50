// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::PathBuf;

use thiserror::Error;

use crate::events::IssueKind;

/// Errors raised by an `HttpClient` implementation
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP request failed for {url}: {source}")]
    RequestFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to read response body from {url}: {source}")]
    BodyFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Host for {url} is unreachable: {reason}")]
    Unreachable { url: String, reason: String },

    #[error("Failed to decode image from {url}: {source}")]
    DecodeFailed {
        url: String,
        #[source]
        source: image::ImageError,
    },
}

/// Errors that can occur when fetching the remote directory index
#[derive(Error, Debug)]
pub enum ListingError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("HTTP error {status} while listing {url}")]
    HttpStatus { url: String, status: u16 },
}

/// Errors that can occur while downloading a single asset
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("HTTP error {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Response for {url} carried no image")]
    MissingImage { url: String },

    #[error("Failed to encode image for {path}: {source}")]
    EncodeFailed {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Failed to write image file {path}: {source}")]
    FileWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that can occur on the cache document or the cached image files
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Failed to read cache file {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse cache JSON in {path}: {source}")]
    JsonParseFailed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize cache: {0}")]
    JsonSerializeFailed(#[from] serde_json::Error),

    #[error("Failed to create directory {path}: {source}")]
    CreateDirectoryFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write cache file {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cached image {path} does not exist")]
    ImageMissing { path: PathBuf },

    #[error("Failed to read cached image {path}: {source}")]
    ImageReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to decode cached image {path}: {source}")]
    ImageDecodeFailed {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

impl CacheError {
    /// The runtime issue a failed cached-image read is reported as
    pub fn issue_kind(&self) -> IssueKind {
        match self {
            CacheError::ImageMissing { .. } => IssueKind::CachedTextureNotFound,
            CacheError::ImageReadFailed { .. } | CacheError::ImageDecodeFailed { .. } => {
                IssueKind::ReadFromCacheFailed
            }
            _ => IssueKind::CacheFileError,
        }
    }
}

/// Invalid orchestrator configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cache key '{0}' must be a single, non-empty path component")]
    InvalidKey(String),

    #[error("No platform data directory available, pass an explicit cache root")]
    NoDataDirectory,
}

/// Errors that end a sync pass without publishing results
///
/// Everything else is reported as an issue and the pass continues.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("A sync pass is already running for this cache")]
    AlreadyRunning,

    #[error("Sync pass was cancelled")]
    Cancelled,

    #[error("No network connection and cache fallback is disabled")]
    Offline,
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io::ErrorKind;
use std::path::PathBuf;

use image::DynamicImage;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::CacheError;
use crate::location::AssetLocation;

/// One asset believed to be on disk, as of its last successful check
///
/// Field names on disk are fixed by the cache document format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    #[serde(rename = "Uri")]
    pub location: AssetLocation,
    #[serde(rename = "name")]
    pub display_name: String,
    /// ETag of the cached version; empty when the server sent none
    #[serde(rename = "etag", default, deserialize_with = "null_as_empty")]
    pub validation_tag: String,
    #[serde(rename = "path")]
    pub local_path: PathBuf,
}

impl CacheEntry {
    pub fn new(location: AssetLocation, validation_tag: impl Into<String>, local_path: PathBuf) -> Self {
        Self {
            display_name: location.display_name(),
            location,
            validation_tag: validation_tag.into(),
            local_path,
        }
    }

    pub fn has_validation_tag(&self) -> bool {
        !self.validation_tag.is_empty()
    }

    /// Read and decode the cached image file
    pub async fn read_image(&self) -> Result<DynamicImage, CacheError> {
        let data = tokio::fs::read(&self.local_path).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                CacheError::ImageMissing {
                    path: self.local_path.clone(),
                }
            } else {
                CacheError::ImageReadFailed {
                    path: self.local_path.clone(),
                    source: e,
                }
            }
        })?;

        image::load_from_memory(&data).map_err(|e| CacheError::ImageDecodeFailed {
            path: self.local_path.clone(),
            source: e,
        })
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Option::unwrap_or_default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::IssueKind;
    use std::io::Cursor;
    use tempfile::tempdir;

    fn location() -> AssetLocation {
        AssetLocation::parse("https://example.com/skins/red.png").unwrap()
    }

    #[test]
    fn new_derives_display_name() {
        let entry = CacheEntry::new(location(), "\"v1\"", PathBuf::from("/cache/red.png"));

        assert_eq!(entry.display_name, "red");
        assert!(entry.has_validation_tag());
    }

    #[test]
    fn serializes_with_document_field_names() {
        let entry = CacheEntry::new(location(), "\"v1\"", PathBuf::from("/cache/red.png"));
        let json: serde_json::Value = serde_json::to_value(&entry).unwrap();

        assert_eq!(json["Uri"], "https://example.com/skins/red.png");
        assert_eq!(json["name"], "red");
        assert_eq!(json["etag"], "\"v1\"");
        assert_eq!(json["path"], "/cache/red.png");
    }

    #[test]
    fn null_etag_reads_as_empty() {
        let json = r#"{"Uri":"https://example.com/skins/red.png","name":"red","etag":null,"path":"/cache/red.png"}"#;
        let entry: CacheEntry = serde_json::from_str(json).unwrap();

        assert!(!entry.has_validation_tag());
    }

    #[tokio::test]
    async fn read_image_decodes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("red.png");
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(image::RgbaImage::new(3, 1))
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        std::fs::write(&path, bytes).unwrap();

        let entry = CacheEntry::new(location(), "\"v1\"", path);
        let image = entry.read_image().await.unwrap();

        assert_eq!(image.width(), 3);
    }

    #[tokio::test]
    async fn read_image_distinguishes_missing_from_corrupt() {
        let dir = tempdir().unwrap();

        let missing = CacheEntry::new(location(), "", dir.path().join("gone.png"));
        let err = missing.read_image().await.unwrap_err();
        assert_eq!(err.issue_kind(), IssueKind::CachedTextureNotFound);

        let corrupt_path = dir.path().join("corrupt.png");
        std::fs::write(&corrupt_path, b"not a png").unwrap();
        let corrupt = CacheEntry::new(location(), "", corrupt_path);
        let err = corrupt.read_image().await.unwrap_err();
        assert_eq!(err.issue_kind(), IssueKind::ReadFromCacheFailed);
    }
}

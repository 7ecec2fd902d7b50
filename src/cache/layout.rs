// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::{Component, Path, PathBuf};

use crate::error::ConfigError;
use crate::location::AssetLocation;

/// Suffix of files that are still being written
pub const PARTIAL_SUFFIX: &str = ".partial";

/// Every cached image is re-encoded to this format
const IMAGE_EXTENSION: &str = "png";

const APP_DIRECTORY: &str = "assetpull";

/// On-disk layout of one cache instance
///
/// Everything lives under `<root>/Cache/<key>/`: the JSON document
/// `<key> Assets.json` and one PNG per asset. The key must be unique among
/// orchestrators sharing a root; two instances with the same key overwrite
/// each other's document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLayout {
    key: String,
    dir: PathBuf,
}

impl CacheLayout {
    pub fn new(root: impl AsRef<Path>, key: &str) -> Result<Self, ConfigError> {
        if !is_single_component(key) {
            return Err(ConfigError::InvalidKey(key.to_string()));
        }

        Ok(Self {
            key: key.to_string(),
            dir: root.as_ref().join("Cache").join(key),
        })
    }

    /// Layout rooted in the platform data directory
    pub fn in_default_root(key: &str) -> Result<Self, ConfigError> {
        let root = Self::default_root().ok_or(ConfigError::NoDataDirectory)?;
        Self::new(root, key)
    }

    /// `<data dir>/assetpull`, e.g. `~/.local/share/assetpull` on Linux
    pub fn default_root() -> Option<PathBuf> {
        dirs::data_dir().map(|dir| dir.join(APP_DIRECTORY))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn document_path(&self) -> PathBuf {
        self.dir.join(format!("{} Assets.json", self.key))
    }

    /// Local file for an asset: its sanitized file name ending in `.png`
    ///
    /// A foreign extension stays part of the name (`a.jpg` becomes
    /// `a.jpg.png`), so `a.jpg` and `a.png` never share a file.
    pub fn image_path(&self, location: &AssetLocation) -> PathBuf {
        let mut file_name = sanitize_filename::sanitize(location.file_name());
        if file_name.is_empty() {
            file_name = "asset".to_string();
        }

        let has_image_extension = Path::new(&file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(IMAGE_EXTENSION));
        if !has_image_extension {
            file_name = format!("{file_name}.{IMAGE_EXTENSION}");
        }

        self.dir.join(file_name)
    }

    /// Delete leftovers of writes interrupted by a crash
    ///
    /// Returns the number of files removed. A missing directory counts as clean.
    pub async fn clean_partial_files(&self) -> usize {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(_) => return 0,
        };

        let mut cleaned = 0;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let is_partial = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(PARTIAL_SUFFIX));

            if is_partial {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => cleaned += 1,
                    Err(e) => tracing::warn!(path = %path.display(), "failed to remove partial file: {e}"),
                }
            }
        }

        cleaned
    }
}

fn is_single_component(key: &str) -> bool {
    let mut components = Path::new(key).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !key.contains(['/', '\\'])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn location(url: &str) -> AssetLocation {
        AssetLocation::parse(url).unwrap()
    }

    #[test]
    fn paths_follow_root_cache_key_scheme() {
        let layout = CacheLayout::new("/data", "teams").unwrap();

        assert_eq!(layout.dir(), Path::new("/data/Cache/teams"));
        assert_eq!(
            layout.document_path(),
            PathBuf::from("/data/Cache/teams/teams Assets.json")
        );
    }

    #[test]
    fn image_path_forces_png_extension() {
        let layout = CacheLayout::new("/data", "teams").unwrap();

        assert_eq!(
            layout.image_path(&location("https://example.com/skins/red%20car.jpg")),
            PathBuf::from("/data/Cache/teams/red car.jpg.png")
        );
        assert_eq!(
            layout.image_path(&location("https://example.com/skins/logo.png")),
            PathBuf::from("/data/Cache/teams/logo.png")
        );
        assert_eq!(
            layout.image_path(&location("https://example.com/skins/plain")),
            PathBuf::from("/data/Cache/teams/plain.png")
        );
    }

    #[test]
    fn image_paths_differ_by_source_extension() {
        let layout = CacheLayout::new("/data", "teams").unwrap();

        assert_ne!(
            layout.image_path(&location("https://example.com/skins/a.jpg")),
            layout.image_path(&location("https://example.com/skins/a.png"))
        );
    }

    #[test]
    fn image_path_cannot_escape_cache_dir() {
        let layout = CacheLayout::new("/data", "teams").unwrap();
        let path = layout.image_path(&location("https://example.com/skins/..%2F..%2Fetc%2Fpasswd"));

        assert!(path.starts_with("/data/Cache/teams"));
        assert_eq!(path.parent(), Some(Path::new("/data/Cache/teams")));
    }

    #[test]
    fn rejects_keys_that_are_not_one_component() {
        for key in ["", ".", "..", "a/b", "a\\b", "/abs"] {
            assert!(
                matches!(CacheLayout::new("/data", key), Err(ConfigError::InvalidKey(_))),
                "key {key:?} should be rejected"
            );
        }
        assert!(CacheLayout::new("/data", "Team Skins").is_ok());
    }

    #[tokio::test]
    async fn clean_partial_files_removes_only_partials() {
        let root = tempdir().unwrap();
        let layout = CacheLayout::new(root.path(), "teams").unwrap();
        std::fs::create_dir_all(layout.dir()).unwrap();
        std::fs::write(layout.dir().join("a.png.partial"), b"half").unwrap();
        std::fs::write(layout.dir().join("teams Assets.json.partial"), b"{").unwrap();
        std::fs::write(layout.dir().join("b.png"), b"whole").unwrap();

        let cleaned = layout.clean_partial_files().await;

        assert_eq!(cleaned, 2);
        assert!(layout.dir().join("b.png").exists());
        assert!(!layout.dir().join("a.png.partial").exists());
    }

    #[tokio::test]
    async fn clean_partial_files_tolerates_missing_dir() {
        let root = tempdir().unwrap();
        let layout = CacheLayout::new(root.path(), "teams").unwrap();

        assert_eq!(layout.clean_partial_files().await, 0);
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

/// Absolute URL of one remote asset
///
/// Used as the key of every cache and result map. Equality, ordering and
/// hashing follow the normalized string form of the underlying URL.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetLocation(Url);

impl AssetLocation {
    pub fn new(url: Url) -> Self {
        Self(url)
    }

    /// Parse an absolute URL string into a location
    pub fn parse(input: &str) -> Result<Self, url::ParseError> {
        Url::parse(input).map(Self)
    }

    pub fn url(&self) -> &Url {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Last path segment, percent-decoded
    pub fn file_name(&self) -> String {
        let segment = self
            .0
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .unwrap_or("");

        urlencoding::decode(segment)
            .map(|decoded| decoded.into_owned())
            .unwrap_or_else(|_| segment.to_string())
    }

    /// File name without its extension, used as the human-readable asset name
    pub fn display_name(&self) -> String {
        let file_name = self.file_name();
        match file_name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem.to_string(),
            _ => file_name,
        }
    }
}

impl fmt::Display for AssetLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Url> for AssetLocation {
    fn from(url: Url) -> Self {
        Self(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_is_percent_decoded() {
        let location = AssetLocation::parse("https://example.com/skins/red%20car.png").unwrap();
        assert_eq!(location.file_name(), "red car.png");
        assert_eq!(location.display_name(), "red car");
    }

    #[test]
    fn display_name_keeps_dotfiles_intact() {
        let location = AssetLocation::parse("https://example.com/.hidden").unwrap();
        assert_eq!(location.display_name(), ".hidden");
    }

    #[test]
    fn equal_when_normalized_forms_match() {
        let a = AssetLocation::parse("HTTPS://Example.com/a.png").unwrap();
        let b = AssetLocation::parse("https://example.com/a.png").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn serializes_as_plain_string() {
        let location = AssetLocation::parse("https://example.com/a.png").unwrap();
        let json = serde_json::to_string(&location).unwrap();
        assert_eq!(json, r#""https://example.com/a.png""#);
    }
}

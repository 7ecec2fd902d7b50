// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use reqwest::header::HeaderMap;
use url::Url;

use crate::error::ListingError;
use crate::http::HttpClient;
use crate::location::AssetLocation;

use super::parse::parse_index;

/// Fetch the directory index at `base_url` and parse the files it lists
pub async fn fetch_listing<C: HttpClient>(
    client: &C,
    base_url: &Url,
    allowed_extensions: Option<&[String]>,
) -> Result<Vec<AssetLocation>, ListingError> {
    let response = client.get(base_url.as_str(), &HeaderMap::new()).await?;

    if !response.is_success() {
        return Err(ListingError::HttpStatus {
            url: base_url.to_string(),
            status: response.status,
        });
    }

    let html = String::from_utf8_lossy(&response.body);
    Ok(parse_index(base_url, &html, allowed_extensions))
}

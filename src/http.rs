// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use image::DynamicImage;
use reqwest::header::{ETAG, HeaderMap};

use crate::error::TransportError;

/// HTTP status signalling that a conditional GET matched
pub const NOT_MODIFIED: u16 = 304;

/// HTTP response with status, headers, and the full body
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers
    pub headers: HeaderMap,
    /// Response body
    pub body: Bytes,
}

/// HTTP response whose body was decoded into an image
#[derive(Debug, Clone)]
pub struct ImageResponse {
    pub status: u16,
    pub headers: HeaderMap,
    /// Decoded body; only present for successful responses with content
    pub image: Option<DynamicImage>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl ImageResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Value of the `ETag` header, if present and valid UTF-8
    pub fn etag(&self) -> Option<&str> {
        self.headers.get(ETAG).and_then(|value| value.to_str().ok())
    }
}

/// HTTP client abstraction for testability
///
/// Custom headers (notably `If-None-Match`) are attached verbatim. A single
/// request is issued per call; retry policy is left to the caller.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Issue a GET and collect the whole body
    async fn get(&self, url: &str, headers: &HeaderMap) -> Result<HttpResponse, TransportError>;

    /// Issue a GET and decode a successful body as an image
    async fn get_image(
        &self,
        url: &str,
        headers: &HeaderMap,
    ) -> Result<ImageResponse, TransportError> {
        let response = self.get(url, headers).await?;

        let image = if response.is_success() && !response.body.is_empty() {
            let image = image::load_from_memory(&response.body).map_err(|e| {
                TransportError::DecodeFailed {
                    url: url.to_string(),
                    source: e,
                }
            })?;
            Some(image)
        } else {
            None
        };

        Ok(ImageResponse {
            status: response.status,
            headers: response.headers,
            image,
        })
    }
}

/// Default HTTP client implementation using reqwest
#[derive(Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Create a new ReqwestClient with default settings
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Create a client whose requests give up after `timeout`
    pub fn with_timeout(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Create a new ReqwestClient with a custom reqwest::Client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for ReqwestClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get(&self, url: &str, headers: &HeaderMap) -> Result<HttpResponse, TransportError> {
        let response = self
            .client
            .get(url)
            .headers(headers.clone())
            .send()
            .await
            .map_err(|e| TransportError::RequestFailed {
                url: url.to_string(),
                source: e,
            })?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::BodyFailed {
                url: url.to_string(),
                source: e,
            })?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use std::io::Cursor;

    struct StaticClient {
        status: u16,
        body: Vec<u8>,
    }

    #[async_trait]
    impl HttpClient for StaticClient {
        async fn get(
            &self,
            _url: &str,
            _headers: &HeaderMap,
        ) -> Result<HttpResponse, TransportError> {
            let mut headers = HeaderMap::new();
            headers.insert(ETAG, HeaderValue::from_static("\"abc\""));
            Ok(HttpResponse {
                status: self.status,
                headers,
                body: Bytes::from(self.body.clone()),
            })
        }
    }

    fn png_bytes() -> Vec<u8> {
        let image = DynamicImage::ImageRgba8(image::RgbaImage::new(2, 2));
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn reqwest_client_can_be_created() {
        let _client = ReqwestClient::new();
        let _client_default = ReqwestClient::default();
        let _client_timeout = ReqwestClient::with_timeout(Duration::from_secs(5)).unwrap();
    }

    #[tokio::test]
    async fn get_image_decodes_successful_body() {
        let client = StaticClient {
            status: 200,
            body: png_bytes(),
        };

        let response = client
            .get_image("https://example.com/a.png", &HeaderMap::new())
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.etag(), Some("\"abc\""));
        let image = response.image.unwrap();
        assert_eq!((image.width(), image.height()), (2, 2));
    }

    #[tokio::test]
    async fn get_image_skips_decoding_not_modified() {
        let client = StaticClient {
            status: NOT_MODIFIED,
            body: Vec::new(),
        };

        let response = client
            .get_image("https://example.com/a.png", &HeaderMap::new())
            .await
            .unwrap();

        assert_eq!(response.status, NOT_MODIFIED);
        assert!(response.image.is_none());
    }

    #[tokio::test]
    async fn get_image_reports_undecodable_body() {
        let client = StaticClient {
            status: 200,
            body: b"definitely not an image".to_vec(),
        };

        let result = client
            .get_image("https://example.com/a.png", &HeaderMap::new())
            .await;

        assert!(matches!(result, Err(TransportError::DecodeFailed { .. })));
    }
}

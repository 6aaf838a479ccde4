//! Catalog acquisition.
//!
//! Produces the flat [`RawVariantRecord`] sequence every downstream stage
//! consumes, either from the live Shopify Admin API ([`ShopifyClient`]) or
//! from a pre-synchronized SQLite snapshot ([`SnapshotSource`]). Both sources
//! yield the same record shape, so the model builder never knows which one ran.

mod client;
mod graphql;
mod limiter;
mod snapshot;

pub use client::ShopifyClient;
pub use limiter::RateLimiter;
pub use snapshot::{SnapshotSource, SNAPSHOT_SCHEMA};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Maximum upstream response body (25 MiB).
pub const MAX_RESPONSE_SIZE: usize = 25 * 1024 * 1024;

/// Cursor label used in errors for the first page, which has no cursor.
pub const FIRST_PAGE: &str = "<first page>";

/// Errors that abort the fetch phase.
///
/// Everything here is fatal to the whole run: no platform can proceed
/// without the canonical model.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Credentials rejected (HTTP 401/403). Never retried.
    #[error("Authentication rejected by upstream (HTTP {0})")]
    Authentication(u16),
    /// Still throttled after the retry budget was spent
    #[error("Rate limit exceeded after {retries} retries at page cursor {cursor}")]
    RateLimitExceeded { cursor: String, retries: u32 },
    /// Upstream kept failing, or answered with a non-retryable status
    #[error("Upstream error (HTTP {status}) at page cursor {cursor}")]
    Transient { cursor: String, status: u16 },
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Request timed out")]
    Timeout,
    /// Body was not the JSON shape we expected
    #[error("Invalid upstream response: {0}")]
    Decode(String),
    /// GraphQL-level error other than throttling
    #[error("Upstream query error: {0}")]
    Query(String),
    /// A REST detail listing came back as a full page; later pages are not fetched
    #[error("Detail listing {resource} returned a full page of {limit} entries at page cursor {cursor}")]
    DetailOverflow {
        resource: String,
        limit: usize,
        cursor: String,
    },
    #[error("Response too large (exceeds 25 MiB)")]
    ResponseTooLarge,
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] sqlx::Error),
}

/// One image descriptor as it appears in serialized image blobs.
///
/// Snapshots use `src`, the GraphQL API uses `url`; both deserialize here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawImage {
    #[serde(alias = "url")]
    pub src: String,
    #[serde(default, alias = "altText", skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,
}

/// One variant, flattened together with its parent product's data.
///
/// Product fields repeat on every variant of the same product. Tags and
/// collections arrive as lists whatever the source; only the image blob keeps
/// its source encoding and is parsed once by the model builder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawVariantRecord {
    /// Owning product identity. A record without one is malformed.
    pub product_id: Option<u64>,
    pub title: String,
    pub handle: String,
    pub vendor: String,
    pub product_type: String,
    /// Publication status as reported upstream (`active`, `ACTIVE`, `draft`, ...)
    pub status: Option<String>,
    pub body_html: String,
    pub tags: Vec<String>,
    /// Collection titles, which may themselves contain commas
    pub collections: Vec<String>,
    /// Serialized JSON array of [`RawImage`]
    pub images: Option<String>,
    /// Product-level custom attributes (already filtered to our namespace)
    pub product_attributes: BTreeMap<String, String>,

    pub variant_id: u64,
    pub variant_title: String,
    pub sku: Option<String>,
    pub barcode: Option<String>,
    /// Decimal text as sent upstream, e.g. `"49.90"`
    pub price: Option<String>,
    pub compare_at_price: Option<String>,
    /// `None` means inventory is not tracked
    pub inventory_quantity: Option<i64>,
    /// Selected option values in position order (option1, option2, option3)
    pub options: Vec<String>,
    pub variant_attributes: BTreeMap<String, String>,
}

/// Where the run's catalog comes from.
pub enum CatalogSource {
    Api(ShopifyClient),
    Snapshot(SnapshotSource),
}

impl CatalogSource {
    /// Fetches every variant record in source order.
    pub async fn fetch_all(&self) -> Result<Vec<RawVariantRecord>, FetchError> {
        match self {
            CatalogSource::Api(client) => client.fetch_all().await,
            CatalogSource::Snapshot(snapshot) => snapshot.fetch_all().await,
        }
    }

    /// Short label recorded as `data_source` in the metrics document.
    pub fn describe(&self) -> String {
        match self {
            CatalogSource::Api(client) => format!("shopify_api:{}", client.shop_host()),
            CatalogSource::Snapshot(snapshot) => {
                format!("snapshot:{}", snapshot.path().display())
            }
        }
    }
}

pub(crate) fn cursor_label(cursor: Option<&str>) -> String {
    cursor.unwrap_or(FIRST_PAGE).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_image_accepts_both_field_names() {
        let from_snapshot: RawImage =
            serde_json::from_str(r#"{"src": "https://cdn/a.jpg"}"#).unwrap();
        let from_api: RawImage =
            serde_json::from_str(r#"{"url": "https://cdn/a.jpg", "altText": "Side"}"#).unwrap();
        assert_eq!(from_snapshot.src, from_api.src);
        assert_eq!(from_api.alt.as_deref(), Some("Side"));
    }

    #[test]
    fn test_error_messages_name_cursor() {
        let err = FetchError::Transient {
            cursor: "eyJsYXN0X2lkIjo0Mn0".into(),
            status: 503,
        };
        let msg = err.to_string();
        assert!(msg.contains("503"));
        assert!(msg.contains("eyJsYXN0X2lkIjo0Mn0"));

        assert_eq!(cursor_label(None), FIRST_PAGE);
    }
}

use futures::StreamExt;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use super::graphql::{
    GraphqlRequest, GraphqlResponse, ProductChildren, ProductData, ProductNode,
    ProductVariables, ProductsData, ProductsVariables, RestCustomCollections, RestMetafields,
    RestSmartCollections, PRODUCTS_QUERY, PRODUCT_IMAGES_QUERY, PRODUCT_VARIANTS_QUERY,
};
use super::{cursor_label, FetchError, RateLimiter, RawVariantRecord, MAX_RESPONSE_SIZE};
use crate::config::{FetchSettings, ShopCredentials};

/// Upper bound on a single backoff sleep, whatever `Retry-After` says.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

const ACCESS_TOKEN_HEADER: &str = "X-Shopify-Access-Token";

/// Page size of REST detail listings (the Admin API maximum).
const REST_PAGE_LIMIT: usize = 250;

/// Wire protocol of a request. GraphQL replies need their envelope unpacked
/// and may signal throttling with HTTP 200.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Graphql,
    Rest,
}

/// What one attempt produced.
enum Attempt<T> {
    Done(T),
    Retry {
        status: StatusCode,
        after: Option<Duration>,
    },
}

/// Live catalog source backed by the Shopify Admin API.
///
/// Every outgoing call, bulk or detail, first takes a slot from the shared
/// [`RateLimiter`].
pub struct ShopifyClient {
    http: reqwest::Client,
    api_base: Url,
    token: SecretString,
    settings: FetchSettings,
    limiter: Arc<RateLimiter>,
}

impl ShopifyClient {
    pub fn new(
        credentials: &ShopCredentials,
        settings: FetchSettings,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self, FetchError> {
        let api_base = credentials
            .shop_url
            .join(&format!("admin/api/{}/", credentials.api_version.trim_matches('/')))
            .map_err(|e| FetchError::Decode(format!("invalid API base URL: {e}")))?;

        let http = reqwest::Client::builder()
            .user_agent(concat!("shopfeed/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            api_base,
            token: credentials.access_token.clone(),
            settings,
            limiter,
        })
    }

    pub fn shop_host(&self) -> &str {
        self.api_base.host_str().unwrap_or("unknown")
    }

    /// Walks every page of active products and flattens them to variant records.
    ///
    /// Pages are strictly sequential (each needs the previous cursor). A
    /// product whose nested variants, images, collections or metafields did
    /// not fit in the bulk payload is completed before it is flattened.
    ///
    /// # Errors
    ///
    /// - [`FetchError::Authentication`] - 401/403, no retry
    /// - [`FetchError::RateLimitExceeded`] - still throttled after `max_retries`
    /// - [`FetchError::Transient`] - 5xx after `max_retries`, or any other 4xx
    /// - [`FetchError::ResponseTooLarge`] - body over 25 MiB
    /// - [`FetchError::DetailOverflow`] - a REST detail listing filled a whole page
    pub async fn fetch_all(&self) -> Result<Vec<RawVariantRecord>, FetchError> {
        let mut records = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0usize;
        let mut detail_calls = 0usize;

        loop {
            let data = self.fetch_page(cursor.as_deref()).await?;
            pages += 1;
            let label = cursor_label(cursor.as_deref());
            let products = data.products.nodes.len();

            for mut product in data.products.nodes {
                detail_calls += self.complete_product(&mut product, &label).await?;
                records.extend(product.into_records(
                    &self.settings.metafield_namespace,
                    &self.settings.rating_namespace,
                ));
            }

            tracing::debug!(
                page = pages,
                products = products,
                records = records.len(),
                "Fetched catalog page"
            );

            let page_info = data.products.page_info;
            match (page_info.has_next_page, page_info.end_cursor) {
                (true, Some(next)) => cursor = Some(next),
                (true, None) => {
                    return Err(FetchError::Decode(
                        "hasNextPage set without an endCursor".to_string(),
                    ))
                }
                (false, _) => break,
            }
        }

        tracing::info!(
            pages = pages,
            detail_calls = detail_calls,
            records = records.len(),
            "Catalog fetch complete"
        );
        Ok(records)
    }

    async fn fetch_page(&self, cursor: Option<&str>) -> Result<ProductsData, FetchError> {
        let url = self.endpoint("graphql.json")?;
        let body = GraphqlRequest {
            query: PRODUCTS_QUERY,
            variables: ProductsVariables {
                first: self.settings.page_size,
                after: cursor,
                namespace: &self.settings.metafield_namespace,
            },
        };
        let label = cursor_label(cursor);
        self.execute(Channel::Graphql, &label, || self.http.post(url.clone()).json(&body))
            .await
    }

    /// Next page of one product's variants or images.
    async fn fetch_children(
        &self,
        query: &str,
        gid: &str,
        after: &str,
        namespace: Option<&str>,
        label: &str,
    ) -> Result<ProductChildren, FetchError> {
        let url = self.endpoint("graphql.json")?;
        let body = GraphqlRequest {
            query,
            variables: ProductVariables {
                id: gid,
                after,
                namespace,
            },
        };
        let data: ProductData = self
            .execute(Channel::Graphql, label, || self.http.post(url.clone()).json(&body))
            .await?;
        data.product
            .ok_or_else(|| FetchError::Decode(format!("product {gid} disappeared while paging")))
    }

    /// GETs one REST listing and rejects it when it filled a whole page.
    async fn rest_listing<T, F>(
        &self,
        mut url: Url,
        label: &str,
        len: F,
    ) -> Result<T, FetchError>
    where
        T: DeserializeOwned,
        F: Fn(&T) -> usize,
    {
        url.query_pairs_mut()
            .append_pair("limit", &REST_PAGE_LIMIT.to_string());
        let listing: T = self
            .execute(Channel::Rest, label, || self.http.get(url.clone()))
            .await?;
        if len(&listing) >= REST_PAGE_LIMIT {
            return Err(FetchError::DetailOverflow {
                resource: url.path().to_string(),
                limit: REST_PAGE_LIMIT,
                cursor: label.to_string(),
            });
        }
        Ok(listing)
    }

    /// Fills in whatever the bulk payload truncated.
    /// Returns the number of extra calls made.
    async fn complete_product(
        &self,
        product: &mut ProductNode,
        label: &str,
    ) -> Result<usize, FetchError> {
        let mut calls = 0;
        let id = product.legacy_resource_id.clone();
        let gid = product.gid();
        let namespace = self.settings.metafield_namespace.as_str();

        while product.variants.page_info.has_next_page {
            let after = next_cursor(&mut product.variants.page_info.end_cursor, &gid, "variants")?;
            let page = self
                .fetch_children(PRODUCT_VARIANTS_QUERY, &gid, &after, Some(namespace), label)
                .await?;
            product.variants.nodes.extend(page.variants.nodes);
            product.variants.page_info = page.variants.page_info;
            calls += 1;
        }

        while product.images.page_info.has_next_page {
            let after = next_cursor(&mut product.images.page_info.end_cursor, &gid, "images")?;
            let page = self
                .fetch_children(PRODUCT_IMAGES_QUERY, &gid, &after, None, label)
                .await?;
            product.images.nodes.extend(page.images.nodes);
            product.images.page_info = page.images.page_info;
            calls += 1;
        }

        if product.needs_metafields() {
            let url = self.endpoint(&format!("products/{id}/metafields.json"))?;
            let rest: RestMetafields = self
                .rest_listing(url, label, |r: &RestMetafields| r.metafields.len())
                .await?;
            product.metafields.nodes = rest.metafields;
            product.metafields.page_info.has_next_page = false;
            calls += 1;
        }

        if product.needs_collections() {
            let mut url = self.endpoint("custom_collections.json")?;
            url.query_pairs_mut().append_pair("product_id", &id);
            let custom: RestCustomCollections = self
                .rest_listing(url, label, |r: &RestCustomCollections| r.custom_collections.len())
                .await?;
            let mut url = self.endpoint("smart_collections.json")?;
            url.query_pairs_mut().append_pair("product_id", &id);
            let smart: RestSmartCollections = self
                .rest_listing(url, label, |r: &RestSmartCollections| r.smart_collections.len())
                .await?;
            product.collections.nodes = custom
                .custom_collections
                .into_iter()
                .chain(smart.smart_collections)
                .collect();
            product.collections.page_info.has_next_page = false;
            calls += 2;
        }

        for variant in product.variants.nodes.iter_mut().filter(|v| v.needs_metafields()) {
            let mut url =
                self.endpoint(&format!("variants/{}/metafields.json", variant.legacy_resource_id))?;
            url.query_pairs_mut().append_pair("namespace", namespace);
            let rest: RestMetafields = self
                .rest_listing(url, label, |r: &RestMetafields| r.metafields.len())
                .await?;
            variant.metafields.nodes = rest
                .metafields
                .into_iter()
                .filter(|m| m.namespace == namespace)
                .collect();
            variant.metafields.page_info.has_next_page = false;
            calls += 1;
        }

        if calls > 0 {
            tracing::debug!(product = %product.handle, calls = calls, "Completed product via detail channel");
        }
        Ok(calls)
    }

    fn endpoint(&self, path: &str) -> Result<Url, FetchError> {
        self.api_base
            .join(path)
            .map_err(|e| FetchError::Decode(format!("invalid endpoint {path}: {e}")))
    }

    /// Sends a request with rate limiting and bounded exponential backoff.
    ///
    /// `build` is called once per attempt since a `RequestBuilder` is consumed
    /// by `send`.
    async fn execute<T, F>(&self, channel: Channel, cursor: &str, build: F) -> Result<T, FetchError>
    where
        T: DeserializeOwned,
        F: Fn() -> reqwest::RequestBuilder,
    {
        let max_retries = self.settings.max_retries;
        let mut retry_count = 0u32;

        loop {
            match self.attempt(channel, cursor, &build).await? {
                Attempt::Done(value) => return Ok(value),
                Attempt::Retry { status, after } => {
                    if retry_count >= max_retries {
                        return Err(if status == StatusCode::TOO_MANY_REQUESTS {
                            FetchError::RateLimitExceeded {
                                cursor: cursor.to_string(),
                                retries: max_retries,
                            }
                        } else {
                            FetchError::Transient {
                                cursor: cursor.to_string(),
                                status: status.as_u16(),
                            }
                        });
                    }

                    let delay = after
                        .unwrap_or_else(|| self.backoff(retry_count))
                        .min(MAX_BACKOFF);
                    tracing::warn!(
                        status = status.as_u16(),
                        cursor = %cursor,
                        retry = retry_count + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Upstream busy, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    retry_count += 1;
                }
            }
        }
    }

    fn backoff(&self, retry_count: u32) -> Duration {
        let factor = 1u64 << retry_count.min(16);
        Duration::from_millis(self.settings.backoff_base_ms.saturating_mul(factor))
    }

    async fn attempt<T, F>(
        &self,
        channel: Channel,
        cursor: &str,
        build: &F,
    ) -> Result<Attempt<T>, FetchError>
    where
        T: DeserializeOwned,
        F: Fn() -> reqwest::RequestBuilder,
    {
        self.limiter.acquire().await;

        let request = build().header(ACCESS_TOKEN_HEADER, self.token.expose_secret());
        let timeout = Duration::from_secs(self.settings.request_timeout_secs);
        let response = tokio::time::timeout(timeout, request.send())
            .await
            .map_err(|_| FetchError::Timeout)?
            .map_err(FetchError::Network)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(FetchError::Authentication(status.as_u16()));
        }
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Ok(Attempt::Retry {
                status,
                after: retry_after(response.headers()),
            });
        }
        // Remaining 4xx are request errors; retrying cannot help
        if !status.is_success() {
            return Err(FetchError::Transient {
                cursor: cursor.to_string(),
                status: status.as_u16(),
            });
        }

        let bytes = read_limited_bytes(response, MAX_RESPONSE_SIZE).await?;

        match channel {
            Channel::Rest => serde_json::from_slice(&bytes)
                .map(Attempt::Done)
                .map_err(|e| FetchError::Decode(e.to_string())),
            Channel::Graphql => {
                let envelope: GraphqlResponse<T> = serde_json::from_slice(&bytes)
                    .map_err(|e| FetchError::Decode(e.to_string()))?;
                if envelope.errors.iter().any(|e| e.is_throttled()) {
                    return Ok(Attempt::Retry {
                        status: StatusCode::TOO_MANY_REQUESTS,
                        after: None,
                    });
                }
                if let Some(first) = envelope.errors.first() {
                    return Err(FetchError::Query(first.message.clone()));
                }
                envelope
                    .data
                    .map(Attempt::Done)
                    .ok_or_else(|| FetchError::Decode("response has no data".to_string()))
            }
        }
    }
}

/// Takes the end cursor of a connection that reported another page.
fn next_cursor(cursor: &mut Option<String>, gid: &str, what: &str) -> Result<String, FetchError> {
    cursor.take().ok_or_else(|| {
        FetchError::Decode(format!("{what} of {gid}: hasNextPage set without an endCursor"))
    })
}

/// Parses `Retry-After` as (possibly fractional) seconds. HTTP-date values
/// are ignored and fall back to exponential backoff.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?;
    let secs = value.trim().parse::<f64>().ok()?;
    (secs.is_finite() && secs >= 0.0)
        .then(|| Duration::from_secs_f64(secs.min(MAX_BACKOFF.as_secs_f64())))
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_retry_after_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("2.0"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(2)));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("1"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(1)));

        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(retry_after(&headers), None);
    }

    #[test]
    fn test_backoff_doubles() {
        let creds = ShopCredentials {
            shop_url: Url::parse("https://racoon-lab.myshopify.com/").unwrap(),
            access_token: SecretString::from("token".to_string()),
            api_version: "2024-10".into(),
        };
        let settings = FetchSettings {
            backoff_base_ms: 500,
            ..FetchSettings::default()
        };
        let limiter = Arc::new(RateLimiter::new(2, Duration::from_secs(1)));
        let client = ShopifyClient::new(&creds, settings, limiter).unwrap();

        assert_eq!(client.backoff(0), Duration::from_millis(500));
        assert_eq!(client.backoff(1), Duration::from_millis(1000));
        assert_eq!(client.backoff(3), Duration::from_millis(4000));
        assert_eq!(
            client.endpoint("graphql.json").unwrap().as_str(),
            "https://racoon-lab.myshopify.com/admin/api/2024-10/graphql.json"
        );
        assert_eq!(client.shop_host(), "racoon-lab.myshopify.com");
    }
}

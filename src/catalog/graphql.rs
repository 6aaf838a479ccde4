//! Wire types for the Admin GraphQL bulk channel and the REST detail channel.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{RawImage, RawVariantRecord};

// Field selection shared by the bulk query and the per-product variant
// follow-up, so both decode into `VariantNode`.
macro_rules! variant_fields {
    () => {
        r#"
fragment VariantFields on ProductVariant {
  legacyResourceId
  title
  sku
  barcode
  price
  compareAtPrice
  inventoryQuantity
  selectedOptions { name value }
  metafields(first: 30, namespace: $namespace) { pageInfo { hasNextPage } nodes { key value } }
}
"#
    };
}

/// One page of active products with everything the feeds need, nested.
///
/// Every nested connection reports `hasNextPage`. Variants and images are
/// paged with follow-up GraphQL queries; collections and metafields are
/// completed through the REST detail channel.
pub const PRODUCTS_QUERY: &str = concat!(
    r#"
query Products($first: Int!, $after: String, $namespace: String!) {
  products(first: $first, after: $after, query: "status:active") {
    pageInfo { hasNextPage endCursor }
    nodes {
      legacyResourceId
      title
      handle
      vendor
      productType
      status
      descriptionHtml
      tags
      images(first: 50) { pageInfo { hasNextPage endCursor } nodes { url altText } }
      collections(first: 50) { pageInfo { hasNextPage } nodes { title } }
      metafields(first: 50) { pageInfo { hasNextPage } nodes { namespace key value } }
      variants(first: 100) {
        pageInfo { hasNextPage endCursor }
        nodes { ...VariantFields }
      }
    }
  }
}
"#,
    variant_fields!()
);

/// Next page of one product's variants.
pub const PRODUCT_VARIANTS_QUERY: &str = concat!(
    r#"
query ProductVariants($id: ID!, $after: String, $namespace: String!) {
  product(id: $id) {
    variants(first: 100, after: $after) {
      pageInfo { hasNextPage endCursor }
      nodes { ...VariantFields }
    }
  }
}
"#,
    variant_fields!()
);

/// Next page of one product's images.
pub const PRODUCT_IMAGES_QUERY: &str = r#"
query ProductImages($id: ID!, $after: String) {
  product(id: $id) {
    images(first: 50, after: $after) {
      pageInfo { hasNextPage endCursor }
      nodes { url altText }
    }
  }
}
"#;

#[derive(Debug, Serialize)]
pub struct GraphqlRequest<'a, V> {
    pub query: &'a str,
    pub variables: V,
}

#[derive(Debug, Serialize)]
pub struct ProductsVariables<'a> {
    pub first: u32,
    pub after: Option<&'a str>,
    pub namespace: &'a str,
}

#[derive(Debug, Serialize)]
pub struct ProductVariables<'a> {
    pub id: &'a str,
    pub after: &'a str,
    /// Only the variants query declares `$namespace`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<&'a str>,
}

/// Standard GraphQL envelope.
#[derive(Debug, Deserialize)]
pub struct GraphqlResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<GraphqlError>,
}

#[derive(Debug, Deserialize)]
pub struct GraphqlError {
    pub message: String,
    #[serde(default)]
    pub extensions: Option<GraphqlErrorExtensions>,
}

#[derive(Debug, Deserialize)]
pub struct GraphqlErrorExtensions {
    pub code: Option<String>,
}

impl GraphqlError {
    /// Shopify reports cost-budget exhaustion as a `THROTTLED` error with HTTP 200.
    pub fn is_throttled(&self) -> bool {
        self.extensions
            .as_ref()
            .and_then(|ext| ext.code.as_deref())
            .is_some_and(|code| code.eq_ignore_ascii_case("THROTTLED"))
    }
}

#[derive(Debug, Deserialize)]
pub struct ProductsData {
    pub products: ProductConnection,
}

/// Follow-up response; `product` is null when it was deleted mid-fetch.
#[derive(Debug, Deserialize)]
pub struct ProductData {
    pub product: Option<ProductChildren>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProductChildren {
    #[serde(default)]
    pub variants: Nodes<VariantNode>,
    #[serde(default)]
    pub images: Nodes<RawImage>,
}

#[derive(Debug, Deserialize)]
pub struct ProductConnection {
    #[serde(rename = "pageInfo")]
    pub page_info: PageInfo,
    pub nodes: Vec<ProductNode>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageInfo {
    #[serde(rename = "hasNextPage")]
    pub has_next_page: bool,
    #[serde(rename = "endCursor", default)]
    pub end_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Nodes<T> {
    #[serde(rename = "pageInfo", default)]
    pub page_info: PageInfo,
    pub nodes: Vec<T>,
}

impl<T> Default for Nodes<T> {
    fn default() -> Self {
        Self {
            page_info: PageInfo::default(),
            nodes: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductNode {
    pub legacy_resource_id: String,
    pub title: String,
    pub handle: String,
    #[serde(default)]
    pub vendor: String,
    #[serde(default)]
    pub product_type: String,
    pub status: Option<String>,
    #[serde(default)]
    pub description_html: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub images: Nodes<RawImage>,
    #[serde(default)]
    pub collections: Nodes<CollectionNode>,
    #[serde(default)]
    pub metafields: Nodes<MetafieldNode>,
    #[serde(default)]
    pub variants: Nodes<VariantNode>,
}

#[derive(Debug, Deserialize)]
pub struct CollectionNode {
    pub title: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetafieldNode {
    #[serde(default)]
    pub namespace: String,
    pub key: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantNode {
    pub legacy_resource_id: String,
    #[serde(default)]
    pub title: String,
    pub sku: Option<String>,
    pub barcode: Option<String>,
    pub price: Option<String>,
    pub compare_at_price: Option<String>,
    pub inventory_quantity: Option<i64>,
    #[serde(default)]
    pub selected_options: Vec<SelectedOption>,
    #[serde(default)]
    pub metafields: Nodes<MetafieldNode>,
}

impl VariantNode {
    pub fn needs_metafields(&self) -> bool {
        self.metafields.page_info.has_next_page
    }
}

#[derive(Debug, Deserialize)]
pub struct SelectedOption {
    pub name: String,
    pub value: String,
}

// REST detail channel payloads

#[derive(Debug, Deserialize)]
pub struct RestMetafields {
    pub metafields: Vec<MetafieldNode>,
}

#[derive(Debug, Deserialize)]
pub struct RestCustomCollections {
    pub custom_collections: Vec<CollectionNode>,
}

#[derive(Debug, Deserialize)]
pub struct RestSmartCollections {
    pub smart_collections: Vec<CollectionNode>,
}

impl ProductNode {
    /// Global id used by the per-product follow-up queries.
    pub fn gid(&self) -> String {
        format!("gid://shopify/Product/{}", self.legacy_resource_id)
    }

    /// True when the bulk payload was cut short and the detail channel is needed.
    pub fn needs_collections(&self) -> bool {
        self.collections.page_info.has_next_page
    }

    pub fn needs_metafields(&self) -> bool {
        self.metafields.page_info.has_next_page
    }

    /// Flattens the product into one record per variant.
    ///
    /// Product metafields are kept only for `namespace`; a numeric `*rating*`
    /// key in `rating_namespace` becomes the `star_rating` attribute.
    pub fn into_records(self, namespace: &str, rating_namespace: &str) -> Vec<RawVariantRecord> {
        let product_id = self.legacy_resource_id.parse::<u64>().ok();
        if product_id.is_none() {
            tracing::warn!(
                id = %self.legacy_resource_id,
                title = %self.title,
                "Product has a non-numeric id"
            );
        }

        let product_attributes =
            product_attributes(&self.metafields.nodes, namespace, rating_namespace);

        let images = match serde_json::to_string(&self.images.nodes) {
            Ok(json) => Some(json),
            Err(e) => {
                tracing::warn!(product = %self.handle, error = %e, "Could not serialize images");
                None
            }
        };

        let collections: Vec<String> = self
            .collections
            .nodes
            .into_iter()
            .map(|c| c.title)
            .collect();

        self.variants
            .nodes
            .into_iter()
            .filter_map(|variant| {
                let Ok(variant_id) = variant.legacy_resource_id.parse::<u64>() else {
                    tracing::warn!(
                        product = %self.handle,
                        id = %variant.legacy_resource_id,
                        "Skipping variant with non-numeric id"
                    );
                    return None;
                };
                Some(RawVariantRecord {
                    product_id,
                    title: self.title.clone(),
                    handle: self.handle.clone(),
                    vendor: self.vendor.clone(),
                    product_type: self.product_type.clone(),
                    status: self.status.clone(),
                    body_html: self.description_html.clone(),
                    tags: self.tags.clone(),
                    collections: collections.clone(),
                    images: images.clone(),
                    product_attributes: product_attributes.clone(),
                    variant_id,
                    variant_title: variant.title,
                    sku: variant.sku,
                    barcode: variant.barcode,
                    price: variant.price,
                    compare_at_price: variant.compare_at_price,
                    inventory_quantity: variant.inventory_quantity,
                    options: variant.selected_options.into_iter().map(|o| o.value).collect(),
                    variant_attributes: variant
                        .metafields
                        .nodes
                        .into_iter()
                        .map(|m| (m.key, m.value))
                        .collect(),
                })
            })
            .collect()
    }
}

fn product_attributes(
    metafields: &[MetafieldNode],
    namespace: &str,
    rating_namespace: &str,
) -> BTreeMap<String, String> {
    let mut attributes = BTreeMap::new();
    for field in metafields {
        if field.namespace == namespace {
            attributes.insert(field.key.clone(), field.value.clone());
        } else if field.namespace == rating_namespace
            && field.key.to_lowercase().contains("rating")
        {
            // Non-numeric ratings are dropped rather than emitted verbatim
            if field.value.trim().parse::<f64>().is_ok() {
                attributes.insert("star_rating".to_string(), field.value.trim().to_string());
            }
        }
    }
    attributes
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PAGE: &str = r#"{
      "data": {
        "products": {
          "pageInfo": { "hasNextPage": true, "endCursor": "c1" },
          "nodes": [{
            "legacyResourceId": "1001",
            "title": "Chuck 70 Hi",
            "handle": "chuck-70-hi",
            "vendor": "Converse",
            "productType": "Chuck 70",
            "status": "ACTIVE",
            "descriptionHtml": "<p>Canvas</p>",
            "tags": ["nike", "sneakers"],
            "images": { "nodes": [
              { "url": "https://cdn/a.jpg", "altText": null },
              { "url": "https://cdn/b_INT.jpg", "altText": "Inside" }
            ]},
            "collections": { "pageInfo": { "hasNextPage": false }, "nodes": [{ "title": "Summer Collection" }, { "title": "Saldi, Estate" }] },
            "metafields": { "pageInfo": { "hasNextPage": false }, "nodes": [
              { "namespace": "mm-google-shopping", "key": "gender", "value": "male" },
              { "namespace": "stamped", "key": "reviews_average_rating", "value": "4.7" },
              { "namespace": "other", "key": "ignored", "value": "x" }
            ]},
            "variants": { "nodes": [
              {
                "legacyResourceId": "2001",
                "title": "42",
                "sku": "CHK-42",
                "barcode": "8000000000001",
                "price": "89.00",
                "compareAtPrice": null,
                "inventoryQuantity": 3,
                "selectedOptions": [{ "name": "Taglia", "value": "42" }],
                "metafields": { "nodes": [{ "key": "color", "value": "Nero" }] }
              },
              {
                "legacyResourceId": "gid-broken",
                "title": "43",
                "price": "89.00",
                "selectedOptions": []
              }
            ]}
          }]
        }
      }
    }"#;

    #[test]
    fn test_page_decodes_and_flattens() {
        let response: GraphqlResponse<ProductsData> = serde_json::from_str(PAGE).unwrap();
        assert!(response.errors.is_empty());
        let data = response.data.unwrap();
        assert!(data.products.page_info.has_next_page);
        assert_eq!(data.products.page_info.end_cursor.as_deref(), Some("c1"));

        let product = data.products.nodes.into_iter().next().unwrap();
        assert!(!product.needs_collections());
        assert!(!product.needs_metafields());

        let records = product.into_records("mm-google-shopping", "stamped");
        // The variant with a non-numeric id is skipped
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.product_id, Some(1001));
        assert_eq!(r.variant_id, 2001);
        assert_eq!(r.tags, vec!["nike", "sneakers"]);
        assert_eq!(r.collections, vec!["Summer Collection", "Saldi, Estate"]);
        assert_eq!(r.options, vec!["42"]);
        assert_eq!(r.inventory_quantity, Some(3));
        assert_eq!(r.product_attributes.get("gender").map(String::as_str), Some("male"));
        assert_eq!(r.product_attributes.get("star_rating").map(String::as_str), Some("4.7"));
        assert!(!r.product_attributes.contains_key("ignored"));
        assert_eq!(r.variant_attributes.get("color").map(String::as_str), Some("Nero"));

        let images: Vec<RawImage> = serde_json::from_str(r.images.as_deref().unwrap()).unwrap();
        assert_eq!(images.len(), 2);
        assert_eq!(images[1].src, "https://cdn/b_INT.jpg");
    }

    #[test]
    fn test_queries_carry_variant_fragment() {
        for query in [PRODUCTS_QUERY, PRODUCT_VARIANTS_QUERY] {
            assert!(query.contains("...VariantFields"));
            assert!(query.contains("fragment VariantFields on ProductVariant"));
        }
        assert!(!PRODUCT_IMAGES_QUERY.contains("$namespace"));
    }

    #[test]
    fn test_truncated_children_flagged() {
        let body = r#"{
          "legacyResourceId": "5",
          "title": "Samba",
          "handle": "samba",
          "images": { "pageInfo": { "hasNextPage": true, "endCursor": "i-1" }, "nodes": [] },
          "variants": { "pageInfo": { "hasNextPage": true, "endCursor": "v-1" }, "nodes": [{
            "legacyResourceId": "51",
            "metafields": { "pageInfo": { "hasNextPage": true }, "nodes": [] }
          }]}
        }"#;
        let product: ProductNode = serde_json::from_str(body).unwrap();
        assert_eq!(product.gid(), "gid://shopify/Product/5");
        assert!(product.variants.page_info.has_next_page);
        assert_eq!(product.variants.page_info.end_cursor.as_deref(), Some("v-1"));
        assert!(product.images.page_info.has_next_page);
        assert!(product.variants.nodes[0].needs_metafields());
    }

    #[test]
    fn test_follow_up_variables_skip_namespace_for_images() {
        let images = ProductVariables {
            id: "gid://shopify/Product/5",
            after: "i-1",
            namespace: None,
        };
        let json = serde_json::to_value(&images).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "id": "gid://shopify/Product/5", "after": "i-1" })
        );
    }

    #[test]
    fn test_throttled_error_detected() {
        let body = r#"{"errors":[{"message":"Throttled","extensions":{"code":"THROTTLED"}}]}"#;
        let response: GraphqlResponse<ProductsData> = serde_json::from_str(body).unwrap();
        assert!(response.data.is_none());
        assert!(response.errors[0].is_throttled());

        let other = r#"{"errors":[{"message":"Field 'x' doesn't exist"}]}"#;
        let response: GraphqlResponse<ProductsData> = serde_json::from_str(other).unwrap();
        assert!(!response.errors[0].is_throttled());
    }

    #[test]
    fn test_non_numeric_rating_dropped() {
        let fields = vec![MetafieldNode {
            namespace: "stamped".into(),
            key: "rating".into(),
            value: "great".into(),
        }];
        assert!(product_attributes(&fields, "mm-google-shopping", "stamped").is_empty());
    }
}

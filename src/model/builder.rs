use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;

use super::{AttributeValue, Catalog, Image, ImageRole, Product, ProductId, Variant, VariantId};
use crate::catalog::{RawImage, RawVariantRecord};
use crate::config::{ExclusionPolicy, ImagePromotion};

/// A raw record the builder could not use. Dropped and reported, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Malformed record for variant {variant_id}: {reason}")]
pub struct MalformedRecord {
    pub variant_id: VariantId,
    pub reason: String,
}

/// Outcome of one build: the catalog plus what was left out of it.
#[derive(Debug, Default)]
pub struct BuildReport {
    pub catalog: Catalog,
    pub malformed: Vec<MalformedRecord>,
    /// Products dropped by the exclusion policy (status, terms, stock, no variants)
    pub excluded_products: usize,
    /// Variants dropped for an excluded option value
    pub excluded_variants: usize,
}

/// Serialized image blobs come either as a bare array or wrapped in an object.
#[derive(Deserialize)]
#[serde(untagged)]
enum ImageBlob {
    List(Vec<RawImage>),
    Wrapped { images: Vec<RawImage> },
}

/// Groups raw variant records into the canonical Product/Variant graph.
///
/// The exclusion policy is applied here, once, for every data source.
pub struct CatalogBuilder<'a> {
    policy: &'a ExclusionPolicy,
    promotions: &'a [ImagePromotion],
}

impl<'a> CatalogBuilder<'a> {
    pub fn new(policy: &'a ExclusionPolicy, promotions: &'a [ImagePromotion]) -> Self {
        Self { policy, promotions }
    }

    /// Builds the catalog.
    ///
    /// Products keep first-seen order and variants keep source order. A
    /// record missing its product id or carrying an unparseable price is
    /// reported in [`BuildReport::malformed`] and skipped.
    pub fn build(&self, records: Vec<RawVariantRecord>) -> BuildReport {
        let mut report = BuildReport::default();
        let mut products: Vec<Product> = Vec::new();
        let mut statuses: Vec<Option<String>> = Vec::new();
        let mut positions: HashMap<ProductId, usize> = HashMap::new();
        let total_records = records.len();

        for record in records {
            let Some(product_id) = record.product_id else {
                report.malformed.push(MalformedRecord {
                    variant_id: record.variant_id,
                    reason: "missing owning product id".to_string(),
                });
                continue;
            };

            let variant = match self.variant(product_id, &record) {
                Ok(v) => v,
                Err(malformed) => {
                    report.malformed.push(malformed);
                    continue;
                }
            };

            let position = *positions.entry(product_id).or_insert_with(|| {
                products.push(self.product(product_id, &record));
                statuses.push(record.status.clone());
                products.len() - 1
            });

            if self.option_excluded(&variant) {
                report.excluded_variants += 1;
                continue;
            }
            products[position].variants.push(variant);
        }

        let before = products.len();
        let kept: Vec<Product> = products
            .into_iter()
            .zip(statuses)
            .filter(|(product, status)| self.keep_product(product, status.as_deref()))
            .map(|(product, _)| product)
            .collect();
        report.excluded_products = before - kept.len();

        for malformed in &report.malformed {
            tracing::warn!(variant_id = malformed.variant_id, reason = %malformed.reason, "Skipping malformed record");
        }

        report.catalog = Catalog::new(kept);
        tracing::info!(
            records = total_records,
            products = report.catalog.product_count(),
            variants = report.catalog.variant_count(),
            excluded_products = report.excluded_products,
            excluded_variants = report.excluded_variants,
            malformed = report.malformed.len(),
            "Built canonical catalog"
        );
        report
    }

    fn variant(
        &self,
        product_id: ProductId,
        record: &RawVariantRecord,
    ) -> Result<Variant, MalformedRecord> {
        let malformed = |reason: String| MalformedRecord {
            variant_id: record.variant_id,
            reason,
        };

        let price = parse_decimal(record.price.as_deref())
            .map_err(|v| malformed(format!("unparseable price {v:?}")))?;
        // A bad compare-at price only loses the discount, not the variant
        let compare_at_price = parse_decimal(record.compare_at_price.as_deref())
            .unwrap_or_else(|v| {
                tracing::warn!(variant_id = record.variant_id, value = %v, "Ignoring unparseable compare-at price");
                None
            });

        Ok(Variant {
            id: record.variant_id,
            product_id,
            title: record.variant_title.clone(),
            sku: non_blank(record.sku.as_deref()),
            barcode: non_blank(record.barcode.as_deref()),
            price,
            compare_at_price,
            inventory_quantity: record.inventory_quantity,
            options: record.options.clone(),
            attributes: record.variant_attributes.clone(),
        })
    }

    fn product(&self, id: ProductId, record: &RawVariantRecord) -> Product {
        let mut images = parse_images(id, record.images.as_deref());
        self.mark_promotion(&record.vendor, &mut images);

        Product {
            id,
            title: record.title.clone(),
            handle: record.handle.clone(),
            vendor: record.vendor.trim().to_string(),
            product_type: record.product_type.trim().to_string(),
            body_html: record.body_html.clone(),
            images,
            tags: clean_list(&record.tags),
            collections: clean_list(&record.collections),
            attributes: record
                .product_attributes
                .iter()
                .map(|(k, v)| (k.clone(), AttributeValue::parse(v)))
                .collect(),
            variants: Vec::new(),
        }
    }

    /// Marks the first image matching a promotion rule for this vendor.
    fn mark_promotion(&self, vendor: &str, images: &mut [Image]) {
        let vendor = vendor.to_lowercase();
        let Some(rule) = self
            .promotions
            .iter()
            .find(|r| vendor.contains(&r.brand.to_lowercase()))
        else {
            return;
        };
        let marker = rule.marker.to_lowercase();
        if let Some(image) = images
            .iter_mut()
            .find(|img| img.url.to_lowercase().contains(&marker))
        {
            image.role = ImageRole::PrimaryCandidate;
        }
    }

    fn option_excluded(&self, variant: &Variant) -> bool {
        variant.options.iter().any(|option| {
            let option = option.to_lowercase();
            contains_any(&option, &self.policy.excluded_option_terms)
        })
    }

    fn keep_product(&self, product: &Product, status: Option<&str>) -> bool {
        let reason = if status.is_some_and(|s| !s.trim().eq_ignore_ascii_case("active")) {
            Some("inactive")
        } else if contains_any(&product.title.to_lowercase(), &self.policy.excluded_title_terms) {
            Some("excluded title")
        } else if contains_any(
            &product.product_type.to_lowercase(),
            &self.policy.excluded_type_terms,
        ) {
            Some("excluded type")
        } else if product.variants.is_empty() {
            Some("no variants")
        } else if self.policy.require_stock && !product.variants.iter().any(Variant::in_stock) {
            Some("out of stock")
        } else {
            None
        };

        if let Some(reason) = reason {
            tracing::debug!(product = %product.handle, reason = reason, "Excluding product");
            return false;
        }
        true
    }
}

fn contains_any(haystack: &str, terms: &[String]) -> bool {
    terms
        .iter()
        .filter(|t| !t.is_empty())
        .any(|t| haystack.contains(&t.to_lowercase()))
}

/// Trims entries and drops blank ones. Entries are never split further.
fn clean_list(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(String::from)
        .collect()
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

/// `Ok(None)` for absent or blank input, `Err(raw)` when it is not a decimal.
fn parse_decimal(raw: Option<&str>) -> Result<Option<Decimal>, String> {
    match raw.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => Decimal::from_str(v)
            .map(|d| Some(d.round_dp(2)))
            .map_err(|_| v.to_string()),
    }
}

/// Parses a product's image blob. A bad blob costs only that product its images.
fn parse_images(product_id: ProductId, blob: Option<&str>) -> Vec<Image> {
    let Some(blob) = blob.map(str::trim).filter(|b| !b.is_empty()) else {
        return Vec::new();
    };

    let raw = match serde_json::from_str::<ImageBlob>(blob) {
        Ok(ImageBlob::List(images)) | Ok(ImageBlob::Wrapped { images }) => images,
        Err(e) => {
            tracing::warn!(product_id = product_id, error = %e, "Could not parse image data, product will have no images");
            return Vec::new();
        }
    };

    raw.into_iter()
        .filter(|img| !img.src.trim().is_empty())
        .map(|img| Image {
            url: img.src.trim().to_string(),
            alt: img.alt,
            role: ImageRole::Gallery,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(product_id: Option<u64>, variant_id: u64) -> RawVariantRecord {
        RawVariantRecord {
            product_id,
            title: "Samba OG".into(),
            handle: "samba-og".into(),
            vendor: "Adidas".into(),
            product_type: "Samba".into(),
            status: Some("ACTIVE".into()),
            body_html: "<p>Suede</p>".into(),
            tags: vec!["nike".into(), "sneakers".into()],
            collections: vec!["Summer Collection".into()],
            images: Some(r#"[{"src":"https://cdn/a.jpg"},{"src":"https://cdn/b.jpg"}]"#.into()),
            variant_id,
            price: Some("99.90".into()),
            inventory_quantity: Some(2),
            options: vec!["40".into()],
            ..RawVariantRecord::default()
        }
    }

    fn build(records: Vec<RawVariantRecord>) -> BuildReport {
        let policy = ExclusionPolicy::default();
        let promotions = vec![ImagePromotion {
            brand: "converse".into(),
            marker: "_INT".into(),
        }];
        CatalogBuilder::new(&policy, &promotions).build(records)
    }

    #[test]
    fn test_groups_in_first_seen_order() {
        let records = vec![
            record(Some(2), 21),
            record(Some(1), 11),
            record(Some(2), 22),
            record(Some(1), 12),
        ];
        let report = build(records);
        let shape: Vec<(u64, Vec<u64>)> = report
            .catalog
            .products()
            .iter()
            .map(|p| (p.id, p.variants.iter().map(|v| v.id).collect()))
            .collect();
        assert_eq!(shape, vec![(2, vec![21, 22]), (1, vec![11, 12])]);
        assert!(report.malformed.is_empty());
    }

    #[test]
    fn test_multi_valued_fields_trimmed_and_empty_normalized() {
        let mut bare = record(Some(5), 51);
        bare.tags = Vec::new();
        bare.collections = vec!["  ".into(), String::new()];
        bare.images = None;

        let report = build(vec![record(Some(1), 11), bare]);
        let products = report.catalog.products();
        assert_eq!(products[0].tags, vec!["nike", "sneakers"]);
        assert_eq!(products[0].collections, vec!["Summer Collection"]);
        assert_eq!(products[0].images.len(), 2);
        assert!(products[1].tags.is_empty());
        assert!(products[1].collections.is_empty());
        assert!(products[1].images.is_empty());
    }

    #[test]
    fn test_collection_title_with_comma_stays_one_entry() {
        let mut r = record(Some(1), 11);
        r.tags = vec!["nike".into(), " Saldi, Estate ".into()];
        r.collections = vec!["Saldi, Estate".into(), "Icons".into()];

        let report = build(vec![r]);
        let product = &report.catalog.products()[0];
        assert_eq!(product.tags, vec!["nike", "Saldi, Estate"]);
        assert_eq!(product.collections, vec!["Saldi, Estate", "Icons"]);
    }

    #[test]
    fn test_missing_product_id_is_malformed_not_fatal() {
        let report = build(vec![record(None, 99), record(Some(1), 11)]);
        assert_eq!(report.malformed.len(), 1);
        assert_eq!(report.malformed[0].variant_id, 99);
        assert_eq!(report.catalog.variant_count(), 1);
    }

    #[test]
    fn test_bad_image_blob_degrades_only_that_product() {
        let mut broken = record(Some(2), 21);
        broken.images = Some("[{not json".into());
        let report = build(vec![record(Some(1), 11), broken]);
        assert_eq!(report.catalog.product_count(), 2);
        assert_eq!(report.catalog.products()[0].images.len(), 2);
        assert!(report.catalog.products()[1].images.is_empty());
    }

    #[test]
    fn test_wrapped_image_blob_accepted() {
        let mut r = record(Some(1), 11);
        r.images = Some(r#"{"images":[{"src":"https://cdn/x.jpg","alt":"x"}]}"#.into());
        let report = build(vec![r]);
        let images = &report.catalog.products()[0].images;
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].alt.as_deref(), Some("x"));
    }

    #[test]
    fn test_missing_price_kept_unparseable_price_malformed() {
        let mut missing = record(Some(1), 11);
        missing.price = None;
        let mut garbage = record(Some(1), 12);
        garbage.price = Some("twelve".into());

        let report = build(vec![missing, garbage]);
        assert_eq!(report.catalog.variant_count(), 1);
        assert_eq!(report.catalog.products()[0].variants[0].price, None);
        assert_eq!(report.malformed.len(), 1);
        assert_eq!(report.malformed[0].variant_id, 12);
    }

    #[test]
    fn test_exclusion_policy() {
        let mut draft = record(Some(1), 11);
        draft.status = Some("draft".into());
        let mut outlet = record(Some(2), 21);
        outlet.title = "Samba OUTLET".into();
        let mut gift = record(Some(3), 31);
        gift.product_type = "Gift Card".into();
        let mut custom = record(Some(4), 41);
        custom.options = vec!["Personalizzazione extra".into()];
        let ok = record(Some(4), 42);

        let report = build(vec![draft, outlet, gift, custom, ok]);
        let ids: Vec<u64> = report.catalog.variants().map(|(_, v)| v.id).collect();
        assert_eq!(ids, vec![42]);
        assert_eq!(report.excluded_products, 3);
        assert_eq!(report.excluded_variants, 1);
    }

    #[test]
    fn test_stock_policy_keeps_out_of_stock_siblings() {
        let mut sold_out_a = record(Some(1), 11);
        sold_out_a.inventory_quantity = Some(0);
        let mut sold_out_b = record(Some(2), 21);
        sold_out_b.inventory_quantity = Some(0);
        let mut untracked = record(Some(2), 22);
        untracked.inventory_quantity = None;

        let report = build(vec![sold_out_a, sold_out_b, untracked]);
        let ids: Vec<u64> = report.catalog.variants().map(|(_, v)| v.id).collect();
        // Product 1 has nothing in stock; product 2 keeps its sold-out variant
        assert_eq!(ids, vec![21, 22]);
    }

    #[test]
    fn test_stock_policy_disabled() {
        let mut sold_out = record(Some(1), 11);
        sold_out.inventory_quantity = Some(0);
        let policy = ExclusionPolicy {
            require_stock: false,
            ..ExclusionPolicy::default()
        };
        let report = CatalogBuilder::new(&policy, &[]).build(vec![sold_out]);
        assert_eq!(report.catalog.variant_count(), 1);
    }

    #[test]
    fn test_promotion_marks_first_marker_image_for_brand() {
        let mut converse = record(Some(1), 11);
        converse.vendor = "Converse".into();
        converse.images = Some(
            r#"[{"src":"https://cdn/a.jpg"},{"src":"https://cdn/b_int.jpg"},{"src":"https://cdn/c_INT.jpg"}]"#
                .into(),
        );
        let mut other = record(Some(2), 21);
        other.images = converse.images.clone();

        let report = build(vec![converse, other]);
        let roles = |i: usize| -> Vec<ImageRole> {
            report.catalog.products()[i]
                .images
                .iter()
                .map(|img| img.role)
                .collect()
        };
        assert_eq!(
            roles(0),
            vec![
                ImageRole::Gallery,
                ImageRole::PrimaryCandidate,
                ImageRole::Gallery
            ]
        );
        assert!(roles(1).iter().all(|r| *r == ImageRole::Gallery));
    }

    #[test]
    fn test_attributes_normalized() {
        let mut r = record(Some(1), 11);
        r.product_attributes
            .insert("is_bundle".into(), "TRUE".into());
        r.variant_attributes.insert("color".into(), "Nero".into());
        r.sku = Some("  ".into());
        let report = build(vec![r]);
        let product = &report.catalog.products()[0];
        assert_eq!(
            product.attributes.get("is_bundle"),
            Some(&AttributeValue::Bool(true))
        );
        assert_eq!(product.variants[0].attributes.get("color").map(String::as_str), Some("Nero"));
        assert_eq!(product.variants[0].sku, None);
    }
}

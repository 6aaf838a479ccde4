//! Business rules shared by every platform mapper.
//!
//! Pure functions over the canonical model and the configured rule values.

use rust_decimal::Decimal;
use std::collections::HashSet;

use super::{CategoryTable, MappingError, Platform};
use crate::config::{DetailRule, MappingRules, PatternRule, PlatformConfig, ShippingTiers};
use crate::model::{Image, ImageRole, Product, Variant};
use crate::util::{strip_html, truncate_chars};

/// Description length limit shared by both platforms.
pub const DESCRIPTION_LIMIT: usize = 5000;

/// Maximum `product_detail` groups per item.
pub const MAX_PRODUCT_DETAILS: usize = 3;

/// `"<macro-category> > <brand> > <model>"`.
///
/// An empty brand is left out, and so is a model that is empty or equal to
/// the macro-category.
pub fn hierarchical_category(product: &Product, table: &CategoryTable) -> String {
    let model = product.product_type.trim();
    let brand = product.vendor.trim();
    let macro_category = table.macro_category(model);

    let mut parts = vec![macro_category];
    if !brand.is_empty() {
        parts.push(brand);
    }
    if !model.is_empty() && !model.eq_ignore_ascii_case(macro_category) {
        parts.push(model);
    }
    parts.join(" > ")
}

/// Trimmed vendor, or the configured default brand when the vendor is blank.
pub fn brand(product: &Product, rules: &MappingRules) -> String {
    let vendor = product.vendor.trim();
    if vendor.is_empty() {
        rules.default_brand.clone().unwrap_or_default()
    } else {
        vendor.to_string()
    }
}

/// Variant/product attribute, then the platform config override, then the
/// platform default.
pub fn size_system(
    platform: Platform,
    config: &PlatformConfig,
    attribute: Option<String>,
) -> String {
    attribute
        .or_else(|| config.size_system.clone())
        .unwrap_or_else(|| platform.default_size_system().to_string())
}

/// Three-tier shipping cost for a selling price.
///
/// `price >= free_threshold` ships free, `mid_threshold <= price <
/// free_threshold` pays the mid cost, anything cheaper the low cost.
pub fn shipping_cost(price: Decimal, tiers: &ShippingTiers) -> Decimal {
    if price >= tiers.free_threshold {
        Decimal::ZERO
    } else if price >= tiers.mid_threshold {
        tiers.mid_cost
    } else {
        tiers.low_cost
    }
}

/// Joins the non-blank parts with single spaces and truncates to `max_chars`
/// (ellipsis included) without splitting a character.
pub fn compose_title<S: AsRef<str>>(parts: &[S], max_chars: usize) -> String {
    let joined = parts
        .iter()
        .map(|p| p.as_ref().trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    truncate_chars(&joined, max_chars).into_owned()
}

/// Tags then collections, source order, no de-duplication.
pub fn internal_labels(product: &Product) -> Vec<String> {
    product
        .tags
        .iter()
        .chain(product.collections.iter())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Primary image plus up to `max_additional` others in source order.
///
/// A promotion candidate (see [`ImageRole`]) is moved to the front;
/// otherwise the first image is primary.
pub fn image_links(product: &Product, max_additional: usize) -> (Option<String>, Vec<String>) {
    let primary_index = product
        .images
        .iter()
        .position(|img| img.role == ImageRole::PrimaryCandidate)
        .unwrap_or(0);

    let Some(primary) = product.images.get(primary_index) else {
        return (None, Vec::new());
    };

    let additional = product
        .images
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != primary_index)
        .map(|(_, img): (usize, &Image)| img.url.clone())
        .take(max_additional)
        .collect();

    (Some(primary.url.clone()), additional)
}

/// Tag-stripped, whitespace-collapsed description, truncated to 5000 chars.
pub fn clean_description(html: &str) -> String {
    truncate_chars(&strip_html(html), DESCRIPTION_LIMIT).into_owned()
}

/// `"12.34 EUR"`.
pub fn format_price(amount: Decimal, currency: &str) -> String {
    let mut amount = amount.round_dp(2);
    amount.rescale(2);
    format!("{amount} {currency}")
}

/// Validated selling price of a variant.
pub fn selling_price(variant: &Variant) -> Result<Decimal, MappingError> {
    let price = variant.price.ok_or(MappingError::MissingPrice {
        variant_id: variant.id,
    })?;
    if price.is_sign_negative() && !price.is_zero() {
        return Err(MappingError::NegativePrice {
            variant_id: variant.id,
            price,
        });
    }
    Ok(price)
}

/// `(price, sale_price)` as formatted strings.
///
/// With a compare-at price above the selling price, `price` shows the
/// compare-at amount and `sale_price` the actual one.
pub fn price_fields(
    variant: &Variant,
    currency: &str,
) -> Result<(String, Option<String>), MappingError> {
    let price = selling_price(variant)?;
    match variant.compare_at_price {
        Some(compare_at) if compare_at > price => Ok((
            format_price(compare_at, currency),
            Some(format_price(price, currency)),
        )),
        _ => Ok((format_price(price, currency), None)),
    }
}

pub fn availability(variant: &Variant) -> &'static str {
    if variant.in_stock() {
        "in stock"
    } else {
        "out of stock"
    }
}

pub fn product_link(base_url: &str, product: &Product, variant: &Variant) -> String {
    format!(
        "{}/products/{}?variant={}",
        base_url.trim_end_matches('/'),
        product.handle,
        variant.id
    )
}

/// First pattern whose key occurs in a lower-cased tag (tags in order).
pub fn pattern(tags: &[String], patterns: &[PatternRule]) -> Option<String> {
    tags.iter().find_map(|tag| {
        let tag = tag.trim().to_lowercase();
        patterns
            .iter()
            .find(|p| tag.contains(&p.contains.to_lowercase()))
            .map(|p| p.value.clone())
    })
}

/// Curated highlights joined with `", "`, else `"<brand> Original"` followed
/// by the generic claims.
pub fn product_highlight(curated: Option<&[String]>, brand: &str, claims: &[String]) -> String {
    let pick = |list: &[String]| -> Vec<String> {
        list.iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    };

    let curated = curated.map(pick).unwrap_or_default();
    if !curated.is_empty() {
        return curated.join(", ");
    }

    let mut parts = Vec::with_capacity(claims.len() + 1);
    if !brand.trim().is_empty() {
        parts.push(format!("{} Original", brand.trim()));
    }
    parts.extend(pick(claims));
    parts.join(", ")
}

/// `(attribute_name, attribute_value)` pairs from tags matching a detail rule
/// exactly (case-insensitive), at most [`MAX_PRODUCT_DETAILS`].
pub fn product_details(tags: &[String], rules: &[DetailRule]) -> Vec<(String, String)> {
    tags.iter()
        .filter_map(|tag| {
            let tag = tag.trim();
            rules
                .iter()
                .find(|r| r.tag.trim().eq_ignore_ascii_case(tag))
                .map(|r| (r.name.clone(), r.value.clone()))
        })
        .take(MAX_PRODUCT_DETAILS)
        .collect()
}

/// Up to two tags containing a feature keyword and not already in the title.
pub fn title_features(tags: &[String], keywords: &[String], existing: &[&str]) -> Vec<String> {
    let existing: Vec<String> = existing.iter().map(|p| p.to_lowercase()).collect();
    tags.iter()
        .map(|t| t.trim())
        .filter(|tag| {
            let lower = tag.to_lowercase();
            keywords.iter().any(|k| {
                let k = k.to_lowercase();
                !k.is_empty() && lower.contains(&k) && !existing.contains(&k)
            })
        })
        .take(2)
        .map(String::from)
        .collect()
}

/// Splits collections across two comma-joined labels of bounded length.
///
/// Collections are de-duplicated case-insensitively (first spelling kept).
/// A collection name is never cut: whatever does not fit in the first label
/// goes to the second, and whatever does not fit there is dropped.
pub fn split_collection_labels(
    collections: &[String],
    first_limit: usize,
    second_limit: usize,
) -> (String, String) {
    let mut seen = HashSet::new();
    let unique: Vec<&str> = collections
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty() && seen.insert(c.to_lowercase()))
        .collect();

    let mut first = Vec::new();
    let mut second = Vec::new();
    let mut first_len = 0;
    let mut second_len = 0;
    let mut overflow = false;

    for name in unique {
        let len = name.chars().count();
        if !overflow {
            let needed = len + if first.is_empty() { 0 } else { 2 };
            if first_len + needed <= first_limit {
                first.push(name);
                first_len += needed;
                continue;
            }
            overflow = true;
        }
        let needed = len + if second.is_empty() { 0 } else { 2 };
        if second_len + needed > second_limit {
            break;
        }
        second.push(name);
        second_len += needed;
    }

    (first.join(", "), second.join(", "))
}

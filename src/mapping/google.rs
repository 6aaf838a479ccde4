use rust_decimal::Decimal;
use std::str::FromStr;

use super::rules;
use super::{FieldValue, MappedItem, MappingContext, MappingError, Platform};
use crate::model::{Product, Variant};

const CUSTOM_LABEL_0_LIMIT: usize = 100;
const CUSTOM_LABEL_1_LIMIT: usize = 500;

/// Google Shopping item for one variant.
pub(super) fn map(
    ctx: &MappingContext<'_>,
    product: &Product,
    variant: &Variant,
) -> Result<MappedItem, MappingError> {
    let rules_cfg = ctx.rules;
    let attr = |key: &str| product.attribute(variant, key);

    let selling_price = rules::selling_price(variant)?;
    let (price, sale_price) = rules::price_fields(variant, &rules_cfg.currency)?;
    let (image_link, additional_images) =
        rules::image_links(product, Platform::Google.additional_image_limit());
    let brand = rules::brand(product, ctx.rules);
    let color = attr("color");
    let size = variant.size().map(str::to_string).or_else(|| attr("size"));

    let mut item = MappedItem::new(product.id, variant.id);
    item.text("id", variant.id.to_string());
    item.text("title", title(ctx, product, &brand, color.as_deref(), size.as_deref()));
    item.text_opt("description", Some(rules::clean_description(&product.body_html)));
    item.text("link", rules::product_link(ctx.base_url, product, variant));
    item.text_opt("image_link", image_link);
    item.push("additional_image_link", FieldValue::List(additional_images));

    item.text("price", price);
    item.text_opt("sale_price", sale_price);
    item.text(
        "condition",
        attr("condition").unwrap_or_else(|| rules_cfg.condition.clone()),
    );
    item.text("availability", rules::availability(variant));
    item.text("brand", brand.as_str());

    item.text(
        "gender",
        attr("gender").unwrap_or_else(|| rules_cfg.default_gender.clone()),
    );
    item.text(
        "age_group",
        attr("age_group").unwrap_or_else(|| rules_cfg.default_age_group.clone()),
    );
    item.text_opt("color", color);

    item.text("item_group_id", product.id.to_string());
    item.text_opt("gtin", variant.barcode.clone());
    item.text_opt("mpn", attr("mpn").or_else(|| variant.sku.clone()));

    item.text(
        "google_product_category",
        attr("google_product_category")
            .unwrap_or_else(|| rules_cfg.google_product_category.clone()),
    );
    item.text(
        "product_type",
        rules::hierarchical_category(product, ctx.categories),
    );

    item.text_opt("size", size);
    item.text(
        "size_system",
        rules::size_system(Platform::Google, ctx.platform, attr("size_system")),
    );
    item.text_opt("size_type", attr("size_type"));
    item.text_opt("material", attr("material"));
    item.text_opt("pattern", rules::pattern(&product.tags, &rules_cfg.patterns));

    let curated = ctx.overrides.lookup(product, variant);
    item.text_opt(
        "product_highlight",
        Some(rules::product_highlight(
            curated.map(|o| o.highlights.as_slice()),
            &brand,
            &rules_cfg.highlight_claims,
        )),
    );

    // Curated details replace the tag-based ones entirely
    let details = match curated.filter(|o| !o.details.is_empty()) {
        Some(o) => o.details.clone(),
        None => rules::product_details(&product.tags, &rules_cfg.product_details),
    };
    for (name, value) in details {
        item.push(
            "product_detail",
            FieldValue::Group(vec![("attribute_name", name), ("attribute_value", value)]),
        );
    }

    let shipping = rules::shipping_cost(selling_price, &rules_cfg.shipping);
    item.push(
        "shipping",
        FieldValue::Group(vec![
            ("country", rules_cfg.shipping_country.clone()),
            ("price", rules::format_price(shipping, &rules_cfg.currency)),
        ]),
    );

    let (label_0, label_1) = rules::split_collection_labels(
        &product.collections,
        CUSTOM_LABEL_0_LIMIT,
        CUSTOM_LABEL_1_LIMIT,
    );
    item.text_opt("custom_label_0", Some(label_0));
    item.text_opt("custom_label_1", Some(label_1));
    item.text_opt("custom_label_2", attr("custom_label_2"));
    item.text_opt("custom_label_3", attr("custom_label_3"));
    item.text_opt("custom_label_4", attr("custom_label_4"));

    if let Some(rating) = attr("star_rating").and_then(|r| Decimal::from_str(r.trim()).ok()) {
        item.push("product_rating", FieldValue::Number(rating));
    }

    Ok(item)
}

/// Brand, model, color, up to two feature tags, size.
fn title(
    ctx: &MappingContext<'_>,
    product: &Product,
    brand: &str,
    color: Option<&str>,
    size: Option<&str>,
) -> String {
    let mut parts: Vec<String> = vec![brand.to_string(), product.product_type.clone()];
    if let Some(color) = color {
        parts.push(color.to_string());
    }
    let existing: Vec<&str> = parts.iter().map(String::as_str).collect();
    let features = rules::title_features(
        &product.tags,
        &ctx.rules.title_feature_keywords,
        &existing,
    );
    parts.extend(features);
    if let Some(size) = size {
        parts.push(format!("{} {}", ctx.rules.size_label, size));
    }
    rules::compose_title(&parts, Platform::Google.title_limit())
}

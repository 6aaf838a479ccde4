use super::rules;
use super::{FieldValue, MappedItem, MappingContext, MappingError, Platform};
use crate::model::{Product, Variant};

/// Meta always advertises a single unit so catalog ads never show "sold out".
const STATIC_INVENTORY: &str = "1";
const STATIC_STATUS: &str = "active";

/// Meta catalog item for one variant.
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
        rules::image_links(product, Platform::Meta.additional_image_limit());
    let brand = rules::brand(product, ctx.rules);
    let gender = attr("gender");
    let size = variant.size().map(str::to_string).or_else(|| attr("size"));

    let mut item = MappedItem::new(product.id, variant.id);
    item.text("id", variant.id.to_string());
    item.text("title", title(ctx, product, &brand, gender.as_deref(), size.as_deref()));
    item.text("description", rules::clean_description(&product.body_html));
    item.push("rich_text_description", FieldValue::Markup(product.body_html.clone()));
    item.text("link", rules::product_link(ctx.base_url, product, variant));
    item.text_opt("image_link", image_link);
    item.push("additional_image_link", FieldValue::List(additional_images));

    item.text("availability", rules::availability(variant));
    item.text("price", price);
    item.text_opt("sale_price", sale_price);
    item.text("brand", brand);
    item.text("condition", rules_cfg.condition.clone());

    item.text(
        "age_group",
        attr("age_group").unwrap_or_else(|| rules_cfg.default_age_group.clone()),
    );
    item.text(
        "gender",
        gender.unwrap_or_else(|| rules_cfg.default_gender.clone()),
    );
    item.text_opt("color", attr("color"));
    item.text_opt("size", size);
    item.text(
        "size_system",
        rules::size_system(Platform::Meta, ctx.platform, attr("size_system")),
    );
    item.text_opt("material", attr("material"));
    item.text_opt("pattern", rules::pattern(&product.tags, &rules_cfg.patterns));

    item.text(
        "google_product_category",
        attr("google_product_category")
            .unwrap_or_else(|| rules_cfg.google_product_category.clone()),
    );
    item.text(
        "product_type",
        rules::hierarchical_category(product, ctx.categories),
    );
    item.text("item_group_id", product.id.to_string());
    item.text_opt("gtin", variant.barcode.clone());
    item.text_opt("mpn", attr("mpn").or_else(|| variant.sku.clone()));

    let shipping = rules::shipping_cost(selling_price, &rules_cfg.shipping);
    item.text(
        "shipping",
        format!(
            "{}:::{}",
            rules_cfg.shipping_country,
            rules::format_price(shipping, &rules_cfg.currency)
        ),
    );

    item.text("status", STATIC_STATUS);
    item.text("inventory", STATIC_INVENTORY);
    item.push("internal_label", FieldValue::List(rules::internal_labels(product)));

    Ok(item)
}

/// Brand, model, localized gender, size.
fn title(
    ctx: &MappingContext<'_>,
    product: &Product,
    brand: &str,
    gender: Option<&str>,
    size: Option<&str>,
) -> String {
    let gender = gender.map(|g| {
        ctx.rules
            .gender_labels
            .get(&g.trim().to_lowercase())
            .cloned()
            .unwrap_or_else(|| g.trim().to_string())
    });
    let size = size.map(|s| format!("{} {}", ctx.rules.size_label, s));

    let parts = [
        Some(brand.to_string()),
        Some(product.product_type.clone()),
        gender,
        size,
    ];
    let parts: Vec<String> = parts.into_iter().flatten().collect();
    rules::compose_title(&parts, Platform::Meta.title_limit())
}

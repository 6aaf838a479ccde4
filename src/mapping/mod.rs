//! Canonical model → platform-specific flat records.
//!
//! The closed set of platforms is the [`Platform`] enum. Each variant only
//! supplies its field list ([`google::map`], [`meta::map`]) and its required
//! fields; everything they share lives in [`rules`] as free functions.

mod category;
mod google;
mod meta;
mod overrides;
pub mod rules;

pub use category::{CategoryRule, CategoryTable};
pub use overrides::{ProductOverride, ProductOverrides};

use rust_decimal::Decimal;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::config::{MappingRules, PlatformConfig};
use crate::model::{Catalog, Product, ProductId, Variant, VariantId};

/// Fatal to one platform's attempt, never to the run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    #[error("variant {variant_id} has no price")]
    MissingPrice { variant_id: VariantId },

    #[error("variant {variant_id} has a negative price ({price})")]
    NegativePrice { variant_id: VariantId, price: Decimal },

    #[error("required field '{field}' is empty for variant {variant_id}")]
    MissingField {
        field: &'static str,
        variant_id: VariantId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Platform {
    Google,
    Meta,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown platform '{0}'")]
pub struct UnknownPlatform(pub String);

impl Platform {
    pub const ALL: [Platform; 2] = [Platform::Google, Platform::Meta];

    pub fn name(self) -> &'static str {
        match self {
            Platform::Google => "google",
            Platform::Meta => "meta",
        }
    }

    pub fn default_filename(self) -> &'static str {
        match self {
            Platform::Google => "google_shopping_feed.xml",
            Platform::Meta => "meta_catalog_feed.xml",
        }
    }

    pub fn default_title(self) -> &'static str {
        match self {
            Platform::Google => "Product Feed - Google Shopping",
            Platform::Meta => "Product Catalog - Meta",
        }
    }

    pub fn default_size_system(self) -> &'static str {
        match self {
            Platform::Google => "IT",
            Platform::Meta => "EU",
        }
    }

    /// Maximum title length in characters.
    pub fn title_limit(self) -> usize {
        match self {
            Platform::Google => 150,
            Platform::Meta => 65,
        }
    }

    /// Maximum number of `additional_image_link` entries.
    pub fn additional_image_limit(self) -> usize {
        match self {
            Platform::Google => 10,
            Platform::Meta => 19,
        }
    }

    /// Fields that must be present and non-empty on every item.
    pub fn required_fields(self) -> &'static [&'static str] {
        match self {
            Platform::Google => &[
                "id",
                "title",
                "link",
                "image_link",
                "price",
                "availability",
                "brand",
            ],
            Platform::Meta => &[
                "id",
                "title",
                "description",
                "link",
                "image_link",
                "price",
                "availability",
                "brand",
                "condition",
            ],
        }
    }

    /// Maps one variant and validates the platform's required fields.
    pub fn map(
        self,
        ctx: &MappingContext<'_>,
        product: &Product,
        variant: &Variant,
    ) -> Result<MappedItem, MappingError> {
        let item = match self {
            Platform::Google => google::map(ctx, product, variant)?,
            Platform::Meta => meta::map(ctx, product, variant)?,
        };
        item.validate(self.required_fields())?;
        Ok(item)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Platform {
    type Err = UnknownPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "google" => Ok(Platform::Google),
            "meta" => Ok(Platform::Meta),
            _ => Err(UnknownPlatform(s.to_string())),
        }
    }
}

/// One output value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Number(Decimal),
    /// Expands into one repeated element per entry, in order.
    List(Vec<String>),
    /// Nested element with ordered sub-fields (e.g. `shipping`).
    Group(Vec<(&'static str, String)>),
    /// Raw markup emitted as CDATA.
    Markup(String),
}

impl FieldValue {
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Text(s) | FieldValue::Markup(s) => s.trim().is_empty(),
            FieldValue::Number(_) => false,
            FieldValue::List(items) => items.iter().all(|s| s.trim().is_empty()),
            FieldValue::Group(fields) => fields.is_empty(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) | FieldValue::Markup(s) => Some(s),
            _ => None,
        }
    }
}

/// Flat, ordered record for one variant on one platform.
///
/// Field names are unprefixed; the writer adds the namespace prefix.
/// A name may repeat (e.g. several `product_detail` groups).
#[derive(Debug, Clone, PartialEq)]
pub struct MappedItem {
    pub variant_id: VariantId,
    pub product_id: ProductId,
    fields: Vec<(&'static str, FieldValue)>,
}

impl MappedItem {
    pub fn new(product_id: ProductId, variant_id: VariantId) -> Self {
        Self {
            variant_id,
            product_id,
            fields: Vec::with_capacity(32),
        }
    }

    pub fn text(&mut self, name: &'static str, value: impl Into<String>) {
        self.fields.push((name, FieldValue::Text(value.into())));
    }

    /// Pushes the value only when present and non-blank.
    pub fn text_opt(&mut self, name: &'static str, value: Option<impl Into<String>>) {
        let value: Option<String> = value.map(Into::into);
        if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
            self.text(name, value);
        }
    }

    pub fn push(&mut self, name: &'static str, value: FieldValue) {
        if !value.is_empty() {
            self.fields.push((name, value));
        }
    }

    pub fn fields(&self) -> &[(&'static str, FieldValue)] {
        &self.fields
    }

    /// First value recorded under `name`.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(field, _)| *field == name)
            .map(|(_, v)| v)
    }

    pub fn get_text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(FieldValue::as_text)
    }

    pub fn get_list(&self, name: &str) -> Option<&[String]> {
        match self.get(name)? {
            FieldValue::List(items) => Some(items),
            _ => None,
        }
    }

    fn validate(&self, required: &[&'static str]) -> Result<(), MappingError> {
        for &field in required {
            if self.get(field).map_or(true, FieldValue::is_empty) {
                return Err(MappingError::MissingField {
                    field,
                    variant_id: self.variant_id,
                });
            }
        }
        Ok(())
    }
}

/// Everything a mapper reads besides the product itself.
pub struct MappingContext<'a> {
    /// Storefront origin without trailing slash.
    pub base_url: &'a str,
    pub rules: &'a MappingRules,
    pub categories: &'a CategoryTable,
    pub overrides: &'a ProductOverrides,
    pub platform: &'a PlatformConfig,
}

/// Lazily maps every variant of the catalog, in catalog order.
///
/// One [`MappedItem`] exists at a time unless the consumer collects them.
pub fn items<'a>(
    catalog: &'a Catalog,
    platform: Platform,
    ctx: &'a MappingContext<'a>,
) -> impl Iterator<Item = Result<MappedItem, MappingError>> + 'a {
    catalog
        .variants()
        .map(move |(product, variant)| platform.map(ctx, product, variant))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub struct Fixture {
        pub rules: MappingRules,
        pub categories: CategoryTable,
        pub overrides: ProductOverrides,
        pub platform: PlatformConfig,
    }

    impl Fixture {
        pub fn new() -> Self {
            Self {
                rules: MappingRules::default(),
                categories: CategoryTable::new(
                    "Sneakers",
                    vec![CategoryRule {
                        contains: "boot".into(),
                        category: "Stivali".into(),
                    }],
                ),
                overrides: ProductOverrides::default(),
                platform: PlatformConfig {
                    enabled: true,
                    ..PlatformConfig::default()
                },
            }
        }

        pub fn ctx(&self) -> MappingContext<'_> {
            MappingContext {
                base_url: "https://racoon-lab.it",
                rules: &self.rules,
                categories: &self.categories,
                overrides: &self.overrides,
                platform: &self.platform,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::Fixture;
    use super::*;
    use crate::model::fixtures::{product, variant};

    #[test]
    fn test_platform_names_round_trip() {
        for platform in Platform::ALL {
            assert_eq!(platform.name().parse::<Platform>(), Ok(platform));
        }
        assert_eq!("GOOGLE".parse::<Platform>(), Ok(Platform::Google));
        assert!("tiktok".parse::<Platform>().is_err());
    }

    #[test]
    fn test_required_field_validation_names_field_and_variant() {
        let mut item = MappedItem::new(1, 42);
        item.text("id", "42");
        item.text("title", "   ");
        let err = item.validate(&["id", "title"]).unwrap_err();
        assert_eq!(
            err,
            MappingError::MissingField {
                field: "title",
                variant_id: 42
            }
        );
        assert!(err.to_string().contains("42"));
    }

    #[test]
    fn test_push_skips_empty_values() {
        let mut item = MappedItem::new(1, 2);
        item.push("additional_image_link", FieldValue::List(vec![]));
        item.text_opt("color", None::<String>);
        item.text_opt("gtin", Some(" "));
        assert!(item.fields().is_empty());
    }

    #[test]
    fn test_items_is_lazy_and_ordered() {
        let fixture = Fixture::new();
        let ctx = fixture.ctx();
        let catalog = Catalog::new(vec![
            product(1, vec![variant(11, 1, "10.00"), variant(12, 1, "20.00")]),
            product(2, vec![variant(21, 2, "30.00")]),
        ]);

        let mut iter = items(&catalog, Platform::Google, &ctx);
        let first = iter.next().unwrap().unwrap();
        assert_eq!(first.variant_id, 11);
        let rest: Vec<_> = iter.map(|r| r.unwrap().variant_id).collect();
        assert_eq!(rest, vec![12, 21]);
    }

    #[test]
    fn test_same_variant_maps_differently_per_platform() {
        let fixture = Fixture::new();
        let ctx = fixture.ctx();
        let p = product(1, vec![variant(11, 1, "10.00")]);
        let v = &p.variants[0];

        let google = Platform::Google.map(&ctx, &p, v).unwrap();
        let meta = Platform::Meta.map(&ctx, &p, v).unwrap();
        assert!(meta.get("internal_label").is_some());
        assert!(google.get("internal_label").is_none());
        assert_eq!(meta.get_text("status"), Some("active"));
    }
}

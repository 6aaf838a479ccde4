//! Canonical, platform-agnostic catalog built once per run.
//!
//! Immutable after [`CatalogBuilder::build`]; every platform mapper reads the
//! same [`Catalog`] through a shared reference.

mod builder;

pub use builder::{BuildReport, CatalogBuilder, MalformedRecord};

use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

pub type ProductId = u64;
pub type VariantId = u64;

/// Scalar value of a custom attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    Text(String),
    Bool(bool),
}

impl AttributeValue {
    /// `"true"`/`"false"` (any case) become booleans, everything else text.
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            v if v.eq_ignore_ascii_case("true") => AttributeValue::Bool(true),
            v if v.eq_ignore_ascii_case("false") => AttributeValue::Bool(false),
            v => AttributeValue::Text(v.to_string()),
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Text(s) => f.write_str(s),
            AttributeValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageRole {
    #[default]
    Gallery,
    /// Matched a configured brand/marker pair; promoted to primary by mappers.
    PrimaryCandidate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub url: String,
    pub alt: Option<String>,
    pub role: ImageRole,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Product {
    pub id: ProductId,
    pub title: String,
    pub handle: String,
    pub vendor: String,
    /// Declared product type; doubles as the model name in titles and categories.
    pub product_type: String,
    pub body_html: String,
    /// Source order preserved.
    pub images: Vec<Image>,
    pub tags: Vec<String>,
    pub collections: Vec<String>,
    pub attributes: BTreeMap<String, AttributeValue>,
    /// Never empty in a built catalog.
    pub variants: Vec<Variant>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    pub id: VariantId,
    /// Owning product, resolved through [`Catalog::product`].
    pub product_id: ProductId,
    pub title: String,
    pub sku: Option<String>,
    pub barcode: Option<String>,
    /// `None` is a mapping error downstream, never silently skipped.
    pub price: Option<Decimal>,
    pub compare_at_price: Option<Decimal>,
    /// `None` means inventory is not tracked.
    pub inventory_quantity: Option<i64>,
    pub options: Vec<String>,
    pub attributes: BTreeMap<String, String>,
}

impl Variant {
    /// Untracked inventory counts as in stock.
    pub fn in_stock(&self) -> bool {
        self.inventory_quantity.map_or(true, |q| q > 0)
    }

    /// First option value, which is the size for every product we sell.
    pub fn size(&self) -> Option<&str> {
        self.options
            .first()
            .map(String::as_str)
            .filter(|s| !s.trim().is_empty())
    }
}

impl Product {
    /// Attribute lookup: variant-level first, then product-level.
    pub fn attribute(&self, variant: &Variant, key: &str) -> Option<String> {
        variant
            .attributes
            .get(key)
            .filter(|v| !v.trim().is_empty())
            .cloned()
            .or_else(|| self.attributes.get(key).map(|v| v.to_string()))
            .filter(|v| !v.trim().is_empty())
    }
}

/// The canonical model: products in first-seen order plus an id index.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    products: Vec<Product>,
    index: HashMap<ProductId, usize>,
}

impl Catalog {
    pub fn new(products: Vec<Product>) -> Self {
        let index = products
            .iter()
            .enumerate()
            .map(|(i, p)| (p.id, i))
            .collect();
        Self { products, index }
    }

    pub fn products(&self) -> &[Product] {
        &self.products
    }

    pub fn product(&self, id: ProductId) -> Option<&Product> {
        self.index.get(&id).map(|&i| &self.products[i])
    }

    /// Resolves a variant's back-reference.
    pub fn owner(&self, variant: &Variant) -> Option<&Product> {
        self.product(variant.product_id)
    }

    pub fn product_count(&self) -> usize {
        self.products.len()
    }

    pub fn variant_count(&self) -> usize {
        self.products.iter().map(|p| p.variants.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    /// Every (product, variant) pair, products in order, variants in source order.
    pub fn variants(&self) -> impl Iterator<Item = (&Product, &Variant)> + '_ {
        self.products
            .iter()
            .flat_map(|p| p.variants.iter().map(move |v| (p, v)))
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_attribute_parse() {
        assert_eq!(AttributeValue::parse("TRUE"), AttributeValue::Bool(true));
        assert_eq!(AttributeValue::parse(" false "), AttributeValue::Bool(false));
        assert_eq!(
            AttributeValue::parse("female"),
            AttributeValue::Text("female".into())
        );
        assert_eq!(AttributeValue::Bool(true).to_string(), "true");
    }

    #[test]
    fn test_variant_stock() {
        let mut v = variant(1, 10, "10.00");
        assert!(v.in_stock());
        v.inventory_quantity = Some(0);
        assert!(!v.in_stock());
        v.inventory_quantity = None;
        assert!(v.in_stock());
    }

    #[test]
    fn test_attribute_lookup_prefers_variant() {
        let mut v = variant(1, 10, "10.00");
        let mut p = product(10, vec![]);
        p.attributes
            .insert("gender".into(), AttributeValue::Text("female".into()));
        assert_eq!(p.attribute(&v, "gender").as_deref(), Some("female"));

        v.attributes.insert("gender".into(), "male".into());
        assert_eq!(p.attribute(&v, "gender").as_deref(), Some("male"));

        // Blank variant values fall through to the product
        v.attributes.insert("gender".into(), "  ".into());
        assert_eq!(p.attribute(&v, "gender").as_deref(), Some("female"));
        assert_eq!(p.attribute(&v, "color"), None);
    }

    #[test]
    fn test_catalog_index_and_back_reference() {
        let catalog = Catalog::new(vec![
            product(10, vec![variant(1, 10, "10.00"), variant(2, 10, "12.00")]),
            product(20, vec![variant(3, 20, "99.00")]),
        ]);
        assert_eq!(catalog.product_count(), 2);
        assert_eq!(catalog.variant_count(), 3);

        let ids: Vec<_> = catalog.variants().map(|(p, v)| (p.id, v.id)).collect();
        assert_eq!(ids, vec![(10, 1), (10, 2), (20, 3)]);

        let (_, v) = catalog.variants().last().unwrap();
        assert_eq!(catalog.owner(v).map(|p| p.id), Some(20));
        assert!(catalog.product(99).is_none());
    }
}

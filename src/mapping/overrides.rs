use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::config::{read_bounded, ConfigError};
use crate::model::{Product, Variant};

/// Mappings file size cap (8 MiB). One entry per variant adds up quickly.
const MAX_FILE_SIZE: u64 = 8 * 1024 * 1024;

#[derive(Debug, Deserialize)]
struct Entry {
    #[serde(default)]
    handle: String,
    #[serde(default)]
    variant_sku: String,
    #[serde(default)]
    product_highlight: Vec<String>,
    #[serde(default)]
    product_detail: Vec<DetailEntry>,
}

#[derive(Debug, Deserialize)]
struct DetailEntry {
    #[serde(default)]
    attribute_name: String,
    #[serde(default)]
    attribute_value: String,
}

/// Hand-curated highlights and details for one variant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductOverride {
    pub highlights: Vec<String>,
    /// `(attribute_name, attribute_value)` pairs
    pub details: Vec<(String, String)>,
}

/// Per-variant overrides keyed by `(product handle, variant SKU)`.
///
/// Read from a JSON array exported by the merchandising team. Entries
/// without a handle or SKU can never match and are skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductOverrides {
    entries: HashMap<(String, String), ProductOverride>,
}

impl ProductOverrides {
    /// Reads the overrides file.
    ///
    /// A missing file is not an error: the run continues without overrides
    /// and every mapper falls back to its tag-based rules.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let Some(content) = read_bounded(path, MAX_FILE_SIZE)? else {
            tracing::warn!(path = %path.display(), "Product mappings file not found, using tag-based rules only");
            return Ok(Self::default());
        };

        let entries: Vec<Entry> = serde_json::from_str(&content)?;
        let overrides = Self::from_entries(entries);
        tracing::info!(path = %path.display(), entries = overrides.len(), "Loaded product mappings");
        Ok(overrides)
    }

    fn from_entries(entries: Vec<Entry>) -> Self {
        let mut map = HashMap::with_capacity(entries.len());
        for entry in entries {
            let handle = entry.handle.trim();
            let sku = entry.variant_sku.trim();
            if handle.is_empty() || sku.is_empty() {
                continue;
            }
            let details = entry
                .product_detail
                .into_iter()
                .filter(|d| !d.attribute_name.trim().is_empty())
                .map(|d| (d.attribute_name, d.attribute_value))
                .collect();
            // Later entries win
            map.insert(
                (handle.to_string(), sku.to_string()),
                ProductOverride {
                    highlights: entry.product_highlight,
                    details,
                },
            );
        }
        Self { entries: map }
    }

    #[cfg(test)]
    pub(crate) fn from_json(json: &str) -> Self {
        Self::from_entries(serde_json::from_str(json).unwrap())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Override for this variant, if any. Variants without a SKU never match.
    pub fn lookup(&self, product: &Product, variant: &Variant) -> Option<&ProductOverride> {
        let sku = variant.sku.as_deref()?;
        self.entries
            .get(&(product.handle.trim().to_string(), sku.trim().to_string()))
    }
}

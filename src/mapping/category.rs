use serde::Deserialize;
use std::path::Path;

use crate::config::{read_bounded, ConfigError};

/// Category file size cap, same as the feeds config.
const MAX_FILE_SIZE: u64 = 1_048_576;

const FALLBACK_CATEGORY: &str = "Sneakers";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CategoryRule {
    /// Case-insensitive substring of the product model.
    pub contains: String,
    pub category: String,
}

/// Ordered model-substring → macro-category rules plus a default.
///
/// Loaded fresh at the start of every run so edits need no rebuild.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CategoryTable {
    #[serde(default = "default_category")]
    default: String,
    #[serde(default)]
    rules: Vec<CategoryRule>,
}

fn default_category() -> String {
    FALLBACK_CATEGORY.to_string()
}

impl Default for CategoryTable {
    fn default() -> Self {
        Self {
            default: default_category(),
            rules: Vec::new(),
        }
    }
}

impl CategoryTable {
    pub fn new(default: impl Into<String>, rules: Vec<CategoryRule>) -> Self {
        let rules = rules
            .into_iter()
            .map(|r| CategoryRule {
                contains: r.contains.to_lowercase(),
                category: r.category,
            })
            .collect();
        Self {
            default: default.into(),
            rules,
        }
    }

    /// Reads the table from a TOML file.
    ///
    /// A missing file is not an error: the run continues with a default-only
    /// table and a warning.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let Some(content) = read_bounded(path, MAX_FILE_SIZE)? else {
            tracing::warn!(path = %path.display(), "Category table not found, every product gets the default category");
            return Ok(Self::default());
        };

        let parsed: CategoryTable = toml::from_str(&content)?;
        if parsed.rules.iter().any(|r| r.contains.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "{}: category rules need a non-empty 'contains'",
                path.display()
            )));
        }

        let table = Self::new(parsed.default, parsed.rules);
        tracing::info!(path = %path.display(), rules = table.rules.len(), "Loaded category table");
        Ok(table)
    }

    pub fn default_category(&self) -> &str {
        &self.default
    }

    pub fn rules(&self) -> &[CategoryRule] {
        &self.rules
    }

    /// First rule whose substring occurs in `model` wins.
    pub fn macro_category(&self, model: &str) -> &str {
        let model = model.to_lowercase();
        self.rules
            .iter()
            .find(|rule| model.contains(&rule.contains))
            .map_or(self.default.as_str(), |rule| rule.category.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_table(name: &str, content: &str) -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join(format!("shopfeed_category_test_{name}"));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("categories.toml");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_first_match_wins_case_insensitive() {
        let table = CategoryTable::new(
            "Sneakers",
            vec![
                CategoryRule {
                    contains: "Chelsea".into(),
                    category: "Stivaletti".into(),
                },
                CategoryRule {
                    contains: "boot".into(),
                    category: "Stivali".into(),
                },
            ],
        );
        assert_eq!(table.macro_category("CHELSEA Boot"), "Stivaletti");
        assert_eq!(table.macro_category("Combat boots"), "Stivali");
        assert_eq!(table.macro_category("Samba"), "Sneakers");
        assert_eq!(table.macro_category(""), "Sneakers");
    }

    #[test]
    fn test_load_from_file_keeps_rule_order() {
        let content = r#"
default = "Calzature"

[[rules]]
contains = "mule"
category = "Sabot"

[[rules]]
contains = "mu"
category = "Never"
"#;
        let (dir, path) = temp_table("order", content);
        let table = CategoryTable::load(&path).unwrap();
        assert_eq!(table.default_category(), "Calzature");
        assert_eq!(table.rules().len(), 2);
        assert_eq!(table.macro_category("Clog Mule"), "Sabot");
        assert_eq!(table.macro_category("Samba"), "Calzature");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_shipped_table_parses() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/categories.toml");
        let table = CategoryTable::load(&path).unwrap();
        assert_eq!(table.default_category(), "Sneakers");
        assert_eq!(table.macro_category("Chelsea Boot"), "Stivaletti");
        assert_eq!(table.macro_category("Combat Boot"), "Stivali");
    }

    #[test]
    fn test_missing_file_yields_default_table() {
        let table = CategoryTable::load(Path::new("/tmp/shopfeed_no_categories.toml")).unwrap();
        assert_eq!(table, CategoryTable::default());
        assert_eq!(table.macro_category("anything"), FALLBACK_CATEGORY);
    }

    #[test]
    fn test_blank_rule_rejected() {
        let (dir, path) = temp_table("blank", "[[rules]]\ncontains = \" \"\ncategory = \"X\"\n");
        assert!(matches!(
            CategoryTable::load(&path),
            Err(ConfigError::Invalid(_))
        ));
        std::fs::remove_dir_all(&dir).ok();
    }
}

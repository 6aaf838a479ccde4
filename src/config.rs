//! Run configuration: the feeds TOML file plus shop credentials from the
//! environment.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are ignored by serde, though we log a warning when the file
//! contains potential typos. Credentials never come from the file.
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use url::Url;

use crate::mapping::Platform;
use crate::util::{normalize_base_url, normalize_shop_url, UrlError};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid JSON in product mappings: {0}")]
    Json(#[from] serde_json::Error),

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Missing required environment variable {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for {name}: {source}")]
    InvalidUrl {
        name: &'static str,
        #[source]
        source: UrlError,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Unknown platform '{0}' in [platforms]")]
    UnknownPlatform(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level feed configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory receiving the feed files, their backups and the metrics document.
    pub output_dir: PathBuf,
    pub settings: Settings,
    /// Keyed by platform name (`google`, `meta`).
    pub platforms: BTreeMap<String, PlatformConfig>,
    pub fetch: FetchSettings,
    pub catalog: ExclusionPolicy,
    pub rules: MappingRules,
    /// Optional JSON file of per-(handle, SKU) highlights and details.
    pub product_mappings: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Copy the published feed to `<name>.backup` before replacing it.
    pub backup_previous_feed: bool,
    /// Re-read the freshly written feed before publishing it.
    pub validate_before_save: bool,
    /// Persist the metrics document at the end of the run.
    pub collect_metrics: bool,
    pub metrics_filename: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub enabled: bool,
    pub feed_filename: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    /// Overrides the platform's default `size_system` value.
    pub size_system: Option<String>,
}

/// Upstream API budget and retry policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    /// Products per bulk query page (Shopify caps connections at 250).
    pub page_size: u32,
    /// Maximum calls inside any `rate_limit_window_ms` window.
    pub rate_limit_calls: u32,
    pub rate_limit_window_ms: u64,
    /// Retries after the first attempt for 429/5xx responses.
    pub max_retries: u32,
    /// First backoff delay; doubled on each retry.
    pub backoff_base_ms: u64,
    pub request_timeout_secs: u64,
    /// Metafield namespace holding the feed attributes.
    pub metafield_namespace: String,
    /// Namespace whose `*rating*` key becomes the product star rating.
    pub rating_namespace: String,
}

/// Which products and variants never reach any feed.
///
/// Applied by the model builder for every data source.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExclusionPolicy {
    pub excluded_title_terms: Vec<String>,
    pub excluded_type_terms: Vec<String>,
    pub excluded_option_terms: Vec<String>,
    /// Drop products with no variant in stock (untracked counts as in stock).
    pub require_stock: bool,
}

/// Three-tier shipping cost, keyed on the selling price.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShippingTiers {
    /// Prices at or above this ship free.
    pub free_threshold: Decimal,
    /// Prices at or above this (and below `free_threshold`) pay `mid_cost`.
    pub mid_threshold: Decimal,
    pub mid_cost: Decimal,
    pub low_cost: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImagePromotion {
    /// Case-insensitive substring of the product vendor.
    pub brand: String,
    /// Case-insensitive substring of the image URL to promote.
    pub marker: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PatternRule {
    pub contains: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetailRule {
    /// Exact tag (case-insensitive) that triggers this detail.
    pub tag: String,
    pub name: String,
    pub value: String,
}

/// Shared business rules consulted by every platform mapper.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MappingRules {
    pub currency: String,
    pub shipping_country: String,
    pub shipping: ShippingTiers,
    pub image_promotions: Vec<ImagePromotion>,
    pub google_product_category: String,
    pub condition: String,
    pub default_gender: String,
    pub default_age_group: String,
    pub default_brand: Option<String>,
    pub size_label: String,
    /// Gender attribute value → localized title word.
    pub gender_labels: BTreeMap<String, String>,
    /// Tags containing one of these keywords may be appended to Google titles.
    pub title_feature_keywords: Vec<String>,
    pub patterns: Vec<PatternRule>,
    pub product_details: Vec<DetailRule>,
    /// Generic Google highlights after `"<brand> Original"` when a variant
    /// has no curated ones.
    pub highlight_claims: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        let mut platforms = BTreeMap::new();
        for platform in Platform::ALL {
            platforms.insert(
                platform.name().to_string(),
                PlatformConfig {
                    enabled: true,
                    ..PlatformConfig::default()
                },
            );
        }
        Self {
            output_dir: PathBuf::from("public"),
            settings: Settings::default(),
            platforms,
            fetch: FetchSettings::default(),
            catalog: ExclusionPolicy::default(),
            rules: MappingRules::default(),
            product_mappings: None,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backup_previous_feed: true,
            validate_before_save: true,
            collect_metrics: true,
            metrics_filename: "feed_metrics.json".to_string(),
        }
    }
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            page_size: 50,
            rate_limit_calls: 2,
            rate_limit_window_ms: 1000,
            max_retries: 3,
            backoff_base_ms: 2000,
            request_timeout_secs: 30,
            metafield_namespace: "mm-google-shopping".to_string(),
            rating_namespace: "stamped".to_string(),
        }
    }
}

impl Default for ExclusionPolicy {
    fn default() -> Self {
        let terms = |list: &[&str]| list.iter().map(|s| s.to_string()).collect();
        Self {
            excluded_title_terms: terms(&["outlet"]),
            excluded_type_terms: terms(&[
                "buon", "gift", "pacco", "berretti", "calze", "calzi", "shirt", "felp",
                "stringhe", "outlet",
            ]),
            excluded_option_terms: terms(&["personalizzazione"]),
            require_stock: true,
        }
    }
}

impl Default for ShippingTiers {
    fn default() -> Self {
        Self {
            free_threshold: Decimal::new(89, 0),
            mid_threshold: Decimal::new(30, 0),
            mid_cost: Decimal::new(10, 0),
            low_cost: Decimal::new(6, 0),
        }
    }
}

impl Default for MappingRules {
    fn default() -> Self {
        let gender_labels = [("female", "Donna"), ("male", "Uomo"), ("unisex", "Unisex")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self {
            currency: "EUR".to_string(),
            shipping_country: "IT".to_string(),
            shipping: ShippingTiers::default(),
            image_promotions: vec![ImagePromotion {
                brand: "converse".to_string(),
                marker: "_INT".to_string(),
            }],
            google_product_category: "187".to_string(),
            condition: "new".to_string(),
            default_gender: "female".to_string(),
            default_age_group: "adult".to_string(),
            default_brand: None,
            size_label: "Taglia".to_string(),
            gender_labels,
            title_feature_keywords: Vec::new(),
            patterns: Vec::new(),
            product_details: Vec::new(),
            highlight_claims: vec![
                "100% Personalizzabili".to_string(),
                "Fatto a mano in Italia".to_string(),
            ],
        }
    }
}

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 7] = [
        "output_dir",
        "settings",
        "platforms",
        "fetch",
        "catalog",
        "rules",
        "product_mappings",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown top-level keys → accepted, logged as warning
    /// - Out-of-range values or unknown platforms → `Err`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let Some(content) = read_bounded(path, Self::MAX_FILE_SIZE)? else {
            tracing::debug!(path = %path.display(), "No config file found, using defaults");
            return Ok(Self::default());
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        // Parse the TOML content first as a raw table to detect unknown keys
        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        tracing::info!(
            path = %path.display(),
            platforms = config.platforms.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for name in self.platforms.keys() {
            Platform::from_str(name).map_err(|_| ConfigError::UnknownPlatform(name.clone()))?;
        }
        if !(1..=250).contains(&self.fetch.page_size) {
            return Err(ConfigError::Invalid(format!(
                "fetch.page_size must be between 1 and 250, got {}",
                self.fetch.page_size
            )));
        }
        if self.fetch.rate_limit_calls == 0 || self.fetch.rate_limit_window_ms == 0 {
            return Err(ConfigError::Invalid(
                "fetch.rate_limit_calls and fetch.rate_limit_window_ms must be positive".into(),
            ));
        }
        let tiers = &self.rules.shipping;
        if tiers.mid_threshold > tiers.free_threshold {
            return Err(ConfigError::Invalid(format!(
                "rules.shipping.mid_threshold ({}) exceeds free_threshold ({})",
                tiers.mid_threshold, tiers.free_threshold
            )));
        }
        if self.settings.metrics_filename.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "settings.metrics_filename may not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Enabled platforms in a stable order (by name), optionally narrowed to one.
    pub fn enabled_platforms(&self, only: Option<Platform>) -> Vec<(Platform, PlatformConfig)> {
        self.platforms
            .iter()
            .filter(|(_, cfg)| cfg.enabled)
            .filter_map(|(name, cfg)| Platform::from_str(name).ok().map(|p| (p, cfg.clone())))
            .filter(|(p, _)| only.map_or(true, |o| o == *p))
            .collect()
    }
}

/// Reads a file with a size cap. `Ok(None)` means the file does not exist.
pub(crate) fn read_bounded(path: &Path, max_size: u64) -> Result<Option<String>, ConfigError> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.len() > max_size => {
            return Err(ConfigError::TooLarge(format!(
                "{} is {} bytes (max {} bytes)",
                path.display(),
                meta.len(),
                max_size
            )));
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(ConfigError::Io(e)),
        Ok(_) => {}
    }

    match std::fs::read_to_string(path) {
        Ok(c) => Ok(Some(c)),
        // Race condition: file deleted between metadata and read
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ConfigError::Io(e)),
    }
}

// ============================================================================
// Environment
// ============================================================================

/// Credentials for the live catalog API.
///
/// `access_token` is a `SecretString`, so `Debug` output shows `[REDACTED]`.
#[derive(Debug, Clone)]
pub struct ShopCredentials {
    pub shop_url: Url,
    pub access_token: SecretString,
    pub api_version: String,
}

/// Values read from the process environment once at start-up.
#[derive(Debug, Clone)]
pub struct Environment {
    /// Storefront origin for item links, without trailing slash.
    pub base_url: String,
    /// Present when the live API is the data source.
    pub credentials: Option<ShopCredentials>,
}

impl Environment {
    pub const SHOP_URL: &'static str = "SHOPIFY_SHOP_URL";
    pub const ACCESS_TOKEN: &'static str = "SHOPIFY_ACCESS_TOKEN";
    pub const API_VERSION: &'static str = "SHOPIFY_API_VERSION";
    pub const BASE_URL: &'static str = "SHOP_BASE_URL";

    /// Reads the process environment.
    ///
    /// `require_api` is false when a snapshot replaces the live API, in which
    /// case only `SHOP_BASE_URL` is mandatory.
    pub fn from_env(require_api: bool) -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok(), require_api)
    }

    /// Same as [`Environment::from_env`] with an injectable lookup.
    pub fn from_lookup<F>(lookup: F, require_api: bool) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| -> Result<String, ConfigError> {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::MissingEnv(name))
        };

        let base_url = normalize_base_url(&required(Self::BASE_URL)?).map_err(|source| {
            ConfigError::InvalidUrl {
                name: Self::BASE_URL,
                source,
            }
        })?;

        let credentials = if require_api {
            let shop_url = normalize_shop_url(&required(Self::SHOP_URL)?).map_err(|source| {
                ConfigError::InvalidUrl {
                    name: Self::SHOP_URL,
                    source,
                }
            })?;
            Some(ShopCredentials {
                shop_url,
                access_token: SecretString::from(required(Self::ACCESS_TOKEN)?),
                api_version: required(Self::API_VERSION)?,
            })
        } else {
            None
        };

        Ok(Self {
            base_url,
            credentials,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

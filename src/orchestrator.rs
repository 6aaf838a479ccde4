//! One feed run: fetch once, build once, then map and publish each enabled
//! platform in turn.
//!
//! Each platform is its own failure domain. A mapping or write error is
//! recorded in that platform's metrics entry and the next platform still
//! runs. A fetch error aborts the run before any feed file is touched; the
//! metrics document is still written so the failure is visible.

use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::catalog::{CatalogSource, FetchError, RateLimiter, ShopifyClient, SnapshotSource};
use crate::config::{Config, ConfigError, Environment, PlatformConfig};
use crate::feed::{publish_feed, FeedError, FeedFormat, FeedHeader, PublishOptions, Published};
use crate::mapping::{self, CategoryTable, MappingContext, Platform, ProductOverrides};
use crate::metrics::{PlatformMetrics, RunMetrics};
use crate::model::{Catalog, CatalogBuilder};

/// Errors that stop the whole run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Catalog fetch failed: {0}")]
    Fetch(#[from] FetchError),
}

/// Everything one run needs, passed explicitly instead of living in globals.
pub struct RunContext {
    config: Arc<Config>,
    base_url: Arc<str>,
    categories: Arc<CategoryTable>,
    overrides: Arc<ProductOverrides>,
    source: CatalogSource,
}

impl RunContext {
    pub fn new(
        config: Config,
        env: &Environment,
        categories: CategoryTable,
        source: CatalogSource,
    ) -> Self {
        Self {
            config: Arc::new(config),
            base_url: Arc::from(env.base_url.as_str()),
            categories: Arc::new(categories),
            overrides: Arc::new(ProductOverrides::default()),
            source,
        }
    }

    /// Curated per-variant highlights and details for the Google feed.
    pub fn with_overrides(mut self, overrides: ProductOverrides) -> Self {
        self.overrides = Arc::new(overrides);
        self
    }

    /// Picks the data source: the snapshot when given, the live API otherwise.
    ///
    /// The API client shares one rate limiter across the bulk and detail
    /// channels for the whole run.
    pub fn source_for(
        config: &Config,
        env: &Environment,
        snapshot: Option<PathBuf>,
    ) -> Result<CatalogSource, RunError> {
        if let Some(path) = snapshot {
            return Ok(CatalogSource::Snapshot(SnapshotSource::new(path)));
        }

        let credentials = env
            .credentials
            .as_ref()
            .ok_or(ConfigError::MissingEnv(Environment::ACCESS_TOKEN))?;
        let limiter = Arc::new(RateLimiter::new(
            config.fetch.rate_limit_calls,
            Duration::from_millis(config.fetch.rate_limit_window_ms),
        ));
        let client = ShopifyClient::new(credentials, config.fetch.clone(), limiter)?;
        Ok(CatalogSource::Api(client))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runs the pipeline and returns the metrics of the run.
    ///
    /// `only` restricts the run to one enabled platform. The returned
    /// metrics carry the aggregate success flag; `Err` means the fetch
    /// phase failed and no platform was attempted.
    pub async fn run(&self, only: Option<Platform>) -> Result<RunMetrics, RunError> {
        let mut metrics = RunMetrics::start(self.source.describe());
        let platforms = self.config.enabled_platforms(only);
        if platforms.is_empty() {
            tracing::warn!("No enabled platforms, nothing to publish");
        }

        tracing::info!(source = %metrics.data_source, "Fetching catalog");
        let records = match self.source.fetch_all().await {
            Ok(records) => records,
            Err(e) => {
                tracing::error!(error = %e, "Catalog fetch failed, no feed will be written");
                metrics.finish(Some(e.to_string()));
                self.persist(&metrics);
                return Err(e.into());
            }
        };

        let report = CatalogBuilder::new(&self.config.catalog, &self.config.rules.image_promotions)
            .build(records);
        let catalog = Arc::new(report.catalog);

        for (platform, platform_config) in platforms {
            let entry = self
                .run_platform(Arc::clone(&catalog), platform, platform_config)
                .await;
            metrics.record(entry);
        }

        metrics.finish(None);
        self.persist(&metrics);

        if metrics.success {
            tracing::info!(platforms = metrics.platforms.len(), "Feed run finished");
        } else {
            tracing::error!(failed = ?metrics.failed_platforms(), "Feed run finished with failures");
        }
        Ok(metrics)
    }

    async fn run_platform(
        &self,
        catalog: Arc<Catalog>,
        platform: Platform,
        platform_config: PlatformConfig,
    ) -> PlatformMetrics {
        let started = Instant::now();
        let generated_at = Utc::now();
        let job = PlatformJob {
            platform,
            feed_filename: platform_config
                .feed_filename
                .clone()
                .unwrap_or_else(|| platform.default_filename().to_string()),
            platform_config,
            config: Arc::clone(&self.config),
            base_url: Arc::clone(&self.base_url),
            categories: Arc::clone(&self.categories),
            overrides: Arc::clone(&self.overrides),
        };
        let feed_filename = job.feed_filename.clone();

        let span = tracing::info_span!("platform", name = %platform);
        let outcome = tokio::task::spawn_blocking(move || {
            let _enter = span.enter();
            job.run(&catalog, generated_at)
        })
        .await;
        let duration_seconds = started.elapsed().as_secs_f64();

        match outcome {
            Ok(Ok(published)) => PlatformMetrics {
                platform: platform.name().to_string(),
                generated_at,
                total_products: published.products,
                total_items: published.items,
                file_size_bytes: published.file_size,
                duration_seconds,
                feed_filename,
                success: true,
                error: None,
            },
            Ok(Err(e)) => {
                tracing::error!(platform = %platform, error = %e, "Platform feed failed");
                PlatformMetrics::failed(platform, &feed_filename, generated_at, duration_seconds, e)
            }
            Err(e) => {
                tracing::error!(platform = %platform, error = %e, "Platform task aborted");
                PlatformMetrics::failed(platform, &feed_filename, generated_at, duration_seconds, e)
            }
        }
    }

    fn persist(&self, metrics: &RunMetrics) {
        if !self.config.settings.collect_metrics {
            return;
        }
        let path = self
            .config
            .output_dir
            .join(&self.config.settings.metrics_filename);
        let saved = std::fs::create_dir_all(&self.config.output_dir)
            .and_then(|()| metrics.save(&path));
        if let Err(e) = saved {
            tracing::error!(path = %path.display(), error = %e, "Failed to save run metrics");
        }
    }
}

/// Owned inputs for one platform, moved onto the blocking pool.
struct PlatformJob {
    platform: Platform,
    feed_filename: String,
    platform_config: PlatformConfig,
    config: Arc<Config>,
    base_url: Arc<str>,
    categories: Arc<CategoryTable>,
    overrides: Arc<ProductOverrides>,
}

impl PlatformJob {
    fn run(
        &self,
        catalog: &Catalog,
        generated_at: chrono::DateTime<Utc>,
    ) -> Result<Published, FeedError> {
        let ctx = MappingContext {
            base_url: &self.base_url,
            rules: &self.config.rules,
            categories: &self.categories,
            overrides: &self.overrides,
            platform: &self.platform_config,
        };
        let header = FeedHeader {
            title: self
                .platform_config
                .title
                .clone()
                .unwrap_or_else(|| self.platform.default_title().to_string()),
            link: self.base_url.to_string(),
            description: self
                .platform_config
                .description
                .clone()
                .unwrap_or_else(|| self.platform.default_title().to_string()),
            generated_at,
        };
        let options = PublishOptions {
            backup_previous: self.config.settings.backup_previous_feed,
            validate: self.config.settings.validate_before_save,
        };

        tracing::info!(variants = catalog.variant_count(), "Mapping and writing feed");
        publish_feed(
            &self.config.output_dir,
            &self.feed_filename,
            FeedFormat::for_platform(self.platform),
            &header,
            mapping::items(catalog, self.platform, &ctx),
            options,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{product, variant};

    fn env() -> Environment {
        Environment {
            base_url: "https://racoon-lab.it".into(),
            credentials: None,
        }
    }

    #[test]
    fn test_api_source_requires_credentials() {
        let result = RunContext::source_for(&Config::default(), &env(), None);
        assert!(matches!(
            result,
            Err(RunError::Config(ConfigError::MissingEnv(_)))
        ));
    }

    #[test]
    fn test_snapshot_source_needs_no_credentials() {
        let source =
            RunContext::source_for(&Config::default(), &env(), Some("snap.db".into())).unwrap();
        assert_eq!(source.describe(), "snapshot:snap.db");
    }

    #[test]
    fn test_platform_job_publishes_feed() {
        let dir = std::env::temp_dir().join("shopfeed_orchestrator_test_job");
        let _ = std::fs::remove_dir_all(&dir);

        let mut config = Config::default();
        config.output_dir = dir.clone();
        let job = PlatformJob {
            platform: Platform::Google,
            feed_filename: "google.xml".into(),
            platform_config: PlatformConfig {
                enabled: true,
                ..PlatformConfig::default()
            },
            config: Arc::new(config),
            base_url: Arc::from("https://racoon-lab.it"),
            categories: Arc::new(CategoryTable::default()),
            overrides: Arc::new(ProductOverrides::default()),
        };
        let catalog = Catalog::new(vec![product(
            1,
            vec![variant(11, 1, "10.00"), variant(12, 1, "20.00")],
        )]);

        let published = job.run(&catalog, Utc::now()).unwrap();
        assert_eq!(published.items, 2);
        assert_eq!(published.products, 1);
        let xml = std::fs::read_to_string(dir.join("google.xml")).unwrap();
        assert!(xml.contains("<title>Product Feed - Google Shopping</title>"));
        assert!(xml.contains("<g:product_highlight>Converse Original, "));
        std::fs::remove_dir_all(&dir).ok();
    }
}

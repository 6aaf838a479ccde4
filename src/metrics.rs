//! Per-run metrics document.
//!
//! One JSON file per run, overwritten atomically, keyed by platform name.
//! It is written even when the fetch phase fails so the failure is visible
//! to whoever watches the output directory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::Path;

use crate::feed::write_atomic;
use crate::mapping::Platform;

/// Outcome of one platform's mapping and writing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformMetrics {
    pub platform: String,
    pub generated_at: DateTime<Utc>,
    pub total_products: usize,
    pub total_items: usize,
    pub file_size_bytes: u64,
    pub duration_seconds: f64,
    pub feed_filename: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PlatformMetrics {
    pub fn failed(
        platform: Platform,
        feed_filename: &str,
        generated_at: DateTime<Utc>,
        duration_seconds: f64,
        error: impl ToString,
    ) -> Self {
        Self {
            platform: platform.name().to_string(),
            generated_at,
            total_products: 0,
            total_items: 0,
            file_size_bytes: 0,
            duration_seconds,
            feed_filename: feed_filename.to_string(),
            success: false,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub data_source: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub platforms: BTreeMap<String, PlatformMetrics>,
}

impl RunMetrics {
    pub fn start(data_source: impl Into<String>) -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            data_source: data_source.into(),
            success: false,
            error: None,
            platforms: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, metrics: PlatformMetrics) {
        self.platforms.insert(metrics.platform.clone(), metrics);
    }

    /// Closes the run. Success requires at least the fetch to have passed
    /// and every attempted platform to have succeeded.
    pub fn finish(&mut self, error: Option<String>) {
        self.finished_at = Some(Utc::now());
        self.success = error.is_none() && self.platforms.values().all(|p| p.success);
        self.error = error;
    }

    pub fn failed_platforms(&self) -> Vec<&str> {
        self.platforms
            .values()
            .filter(|p| !p.success)
            .map(|p| p.platform.as_str())
            .collect()
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        let mut json = serde_json::to_vec_pretty(self).map_err(io::Error::other)?;
        json.push(b'\n');
        write_atomic(path, &json)?;
        tracing::info!(path = %path.display(), "Saved run metrics");
        Ok(())
    }

    pub fn load(path: &Path) -> io::Result<Self> {
        let content = std::fs::read(path)?;
        serde_json::from_slice(&content).map_err(io::Error::other)
    }
}

//! # Application State Management
//!
//! `AppState` is handed to every request handler through `web::Data`. It is
//! built once in `main` before the server starts, then cloned into each
//! worker thread. Everything inside is behind an `Arc`, so the clones share
//! one metadata store (and its write lock), one file store, one set of rate
//! limiters and one metrics table.
//!
//! ## Arc<RwLock<T>> for metrics:
//! Every request updates the metrics, and `/health` reads them. The
//! `RwLock` lets many readers in at once while writers take turns.

use crate::config::AppConfig;
use crate::rate_limit::RateLimits;
use crate::storage::{FileStore, MetadataStore};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    /// Loaded once at startup; read-only afterwards.
    pub config: Arc<AppConfig>,

    /// The JSON file holding every level record.
    pub levels: Arc<MetadataStore>,

    /// The directory holding the audio blobs.
    pub files: Arc<FileStore>,

    /// Per-route request ceilings shared by all workers.
    pub rate_limits: RateLimits,

    /// Request counters updated by `MetricsMiddleware`.
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started (for uptime reporting).
    pub start_time: Instant,
}

/// Request counters collected since the server started.
///
/// ## Fields:
/// - **request_count**: every request that reached the app
/// - **error_count**: responses with a 4xx or 5xx status
/// - **rate_limited_count**: responses rejected with 429
/// - **endpoint_metrics**: per-route stats, keyed like `"GET /audio/{filename}"`
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    pub rate_limited_count: u64,
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    /// Open both stores and build the rate limiters.
    ///
    /// ## What this does:
    /// 1. Creates the upload directory if it does not exist
    /// 2. Points the metadata store at the levels file (created lazily on first save)
    /// 3. Builds one limiter per route from the `rate_limit` section
    pub async fn new(config: AppConfig) -> Result<Self> {
        let files = FileStore::new(&config.storage.uploads_dir).await?;
        let levels = MetadataStore::new(&config.storage.levels_file);
        let rate_limits = RateLimits::from_config(&config.rate_limit)?;
        info!(
            levels_file = %levels.path().display(),
            uploads_dir = %files.root().display(),
            "Storage ready"
        );

        Ok(Self {
            config: Arc::new(config),
            levels: Arc::new(levels),
            files: Arc::new(files),
            rate_limits,
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        })
    }

    /// Record one finished request.
    ///
    /// A poisoned lock only means another thread panicked mid-update; the
    /// counters are still usable, so we keep counting instead of failing the
    /// request.
    pub fn record_request(&self, endpoint: &str, duration_ms: u64, status: u16) {
        let mut metrics = self
            .metrics
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let is_error = status >= 400;
        metrics.request_count += 1;
        if is_error {
            metrics.error_count += 1;
        }
        if status == 429 {
            metrics.rate_limited_count += 1;
        }

        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Copy of the current metrics, so the lock is not held while serializing.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

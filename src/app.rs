//! Main QueryPulse coordinator
//!
//! Owns the shared services (sample store, result cache, rule catalog,
//! executor and analyzer), wires them from one `Config` and runs the two
//! periodic maintenance loops: sample retention pruning and expired cache
//! entry sweeping.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::{
    cache::{CacheBackend, MemoryBackend, ResultCache, TtlPolicy},
    clock::{Clock, SystemClock},
    config::Config,
    error::Result,
    executor::QueryExecutor,
    monitoring::{HealthReport, MetricStore},
    optimization::{
        GlobalReport, OptimizationRuleEngine, PerformanceAnalyzer, QueryAnalysis,
        RewriteSuggestion,
    },
};

/// Outcome of one maintenance pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub samples_pruned: usize,
    pub entries_swept: usize,
}

pub struct QueryPulse {
    config: Config,
    metrics: Arc<MetricStore>,
    cache: Arc<ResultCache>,
    rules: Arc<OptimizationRuleEngine>,
    executor: Arc<QueryExecutor>,
    analyzer: Arc<PerformanceAnalyzer>,
    running: Arc<AtomicBool>,
    maintenance: Mutex<Vec<JoinHandle<()>>>,
}

impl QueryPulse {
    /// Services on the system clock with an in-memory cache
    pub fn new(config: Config) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: Config, clock: Arc<dyn Clock>) -> Result<Self> {
        Self::with_backend(config, clock, Arc::new(MemoryBackend::new()))
    }

    /// Full control over the time source and cache storage
    pub fn with_backend(
        config: Config,
        clock: Arc<dyn Clock>,
        backend: Arc<dyn CacheBackend>,
    ) -> Result<Self> {
        config.validate()?;

        let metrics = Arc::new(MetricStore::new(&config.metrics, Arc::clone(&clock)));
        let cache = Arc::new(ResultCache::new(backend, clock));
        let rules = Arc::new(OptimizationRuleEngine::new());
        let executor = Arc::new(QueryExecutor::new(
            config.executor.clone(),
            Arc::clone(&metrics),
            Arc::clone(&cache),
            TtlPolicy::new(config.cache.ttl.clone()),
        ));
        let analyzer = Arc::new(PerformanceAnalyzer::new(
            Arc::clone(&metrics),
            Arc::clone(&rules),
            config.executor.slow_query_threshold_ms,
            config.health.clone(),
        ));

        tracing::info!(
            slow_query_threshold_ms = config.executor.slow_query_threshold_ms,
            sla_p95_ms = config.health.sla_p95_ms,
            max_samples_per_query = config.metrics.max_samples_per_query,
            "QueryPulse services initialized"
        );

        Ok(Self {
            config,
            metrics,
            cache,
            rules,
            executor,
            analyzer,
            running: Arc::new(AtomicBool::new(false)),
            maintenance: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn executor(&self) -> &Arc<QueryExecutor> {
        &self.executor
    }

    pub fn metrics(&self) -> &Arc<MetricStore> {
        &self.metrics
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn analyzer(&self) -> &Arc<PerformanceAnalyzer> {
        &self.analyzer
    }

    pub fn suggest(&self, raw_query_text: &str) -> Option<RewriteSuggestion> {
        self.rules.suggest(raw_query_text)
    }

    pub fn analyze(&self, query_id: &str) -> Result<QueryAnalysis> {
        self.analyzer.analyze(query_id)
    }

    pub fn global_report(&self) -> Result<GlobalReport> {
        self.analyzer.global_report()
    }

    pub fn health_check(&self) -> HealthReport {
        self.analyzer.health_check()
    }

    /// Prune expired samples and sweep expired cache entries once
    pub async fn run_maintenance(&self) -> MaintenanceReport {
        MaintenanceReport {
            samples_pruned: self.metrics.prune_expired(),
            entries_swept: self.cache.sweep_expired().await,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the periodic maintenance loops. Returns false if they are
    /// already running or no tokio runtime is available.
    pub fn start_maintenance(&self) -> bool {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                tracing::warn!("No async runtime; maintenance loops not started");
                return false;
            }
        };
        if self.running.swap(true, Ordering::SeqCst) {
            return false;
        }

        let prune_every = self.config.metrics.prune_interval();
        let sweep_every = self.config.cache.sweep_interval();

        let metrics = Arc::clone(&self.metrics);
        let running = Arc::clone(&self.running);
        let prune = runtime.spawn(async move {
            let mut interval = tokio::time::interval(prune_every);
            loop {
                interval.tick().await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                let removed = metrics.prune_expired();
                tracing::debug!(removed, "Sample retention pass complete");
            }
        });

        let cache = Arc::clone(&self.cache);
        let running = Arc::clone(&self.running);
        let sweep = runtime.spawn(async move {
            let mut interval = tokio::time::interval(sweep_every);
            loop {
                interval.tick().await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                let swept = cache.sweep_expired().await;
                tracing::debug!(swept, "Cache sweep pass complete");
            }
        });

        self.maintenance.lock().extend([prune, sweep]);
        tracing::info!(
            prune_interval_secs = prune_every.as_secs(),
            sweep_interval_secs = sweep_every.as_secs(),
            "Maintenance loops started"
        );
        true
    }

    /// Stop the maintenance loops; safe to call when they are not running
    pub fn stop_maintenance(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        for handle in self.maintenance.lock().drain(..) {
            handle.abort();
        }
        tracing::info!("Maintenance loops stopped");
    }

    /// Stop loops and let in-flight background refreshes finish
    pub async fn shutdown(&self, grace: Duration) {
        self.stop_maintenance();
        if tokio::time::timeout(grace, self.executor.wait_for_background())
            .await
            .is_err()
        {
            tracing::warn!(grace_ms = grace.as_millis() as u64, "Background tasks still running at shutdown");
        }
    }
}

impl Drop for QueryPulse {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        for handle in self.maintenance.get_mut().drain(..) {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::monitoring::{HealthStatus, QuerySample};
    use serde_json::json;

    fn pulse() -> (QueryPulse, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let pulse = QueryPulse::with_clock(Config::default(), clock.clone()).unwrap();
        (pulse, clock)
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = Config::default();
        config.metrics.max_samples_per_query = 0;
        assert!(QueryPulse::new(config).is_err());
    }

    #[test]
    fn test_start_without_runtime() {
        let (pulse, _) = pulse();
        assert!(!pulse.start_maintenance());
        assert!(!pulse.is_running());
    }

    #[tokio::test]
    async fn test_start_stop_is_idempotent() {
        let (pulse, _) = pulse();
        assert!(pulse.start_maintenance());
        assert!(!pulse.start_maintenance());
        assert!(pulse.is_running());

        pulse.stop_maintenance();
        pulse.stop_maintenance();
        assert!(!pulse.is_running());
        assert!(pulse.start_maintenance());
    }

    #[tokio::test]
    async fn test_maintenance_prunes_and_sweeps() {
        let (pulse, clock) = pulse();
        pulse.metrics().record(QuerySample {
            query_id: "old".into(),
            raw_query_text: "SELECT 1".into(),
            execution_time_ms: 5.0,
            timestamp: clock.now(),
            result_count: None,
            cache_hit: false,
        });
        pulse
            .cache()
            .set("k", json!([1]), Duration::from_secs(60), &[])
            .await;

        clock.advance(Duration::from_secs(25 * 60 * 60));
        let report = pulse.run_maintenance().await;
        assert_eq!(report.samples_pruned, 1);
        assert_eq!(report.entries_swept, 1);
        assert_eq!(pulse.run_maintenance().await, MaintenanceReport::default());
    }

    #[tokio::test]
    async fn test_facade_end_to_end() {
        let (pulse, _) = pulse();
        let value: Vec<u32> = pulse
            .executor()
            .run("get_tiers", "SELECT * FROM tiers LIMIT 10", || async {
                Ok::<_, String>(vec![1, 2, 3])
            })
            .await
            .unwrap();
        assert_eq!(value, vec![1, 2, 3]);

        let analysis = pulse.analyze("get_tiers").unwrap();
        assert_eq!(analysis.current_performance.execution_count, 1);
        assert_eq!(pulse.health_check().status, HealthStatus::Healthy);
        assert!(pulse.suggest("SELECT * FROM users WHERE id > 3").is_some());

        pulse.shutdown(Duration::from_secs(1)).await;
    }
}

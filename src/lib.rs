//! QueryPulse - adaptive query performance layer
//!
//! Wraps database reads with result caching, records per-query latency
//! samples, suggests rule-based rewrites and grades overall health against a
//! p95 latency SLA.
//!
//! - monitoring: sample store, percentiles and the health verdict
//! - cache: TTL result cache with tag invalidation
//! - optimization: rewrite rules and the performance analyzer
//! - executor: the cached, measured entry point for running queries
//! - app: wires the services together and runs maintenance loops

pub mod app;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod monitoring;
pub mod optimization;

pub use app::QueryPulse;
pub use cache::{CacheBackend, CacheEntry, CacheStats, ContentType, MemoryBackend, ResultCache, TtlPolicy};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{Error, Result};
pub use executor::{ExecutorStats, QueryExecutor, RunOptions};
pub use monitoring::{HealthReport, HealthStatus, MetricStore, PerformanceSnapshot, QuerySample};
pub use optimization::{
    GlobalReport, OptimizationRuleEngine, PerformanceAnalyzer, QueryAnalysis, Recommendation,
    RewriteSuggestion,
};

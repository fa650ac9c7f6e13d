//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::sync::Arc;

use querypulse::config::MetricsConfig;
use querypulse::{Clock, Config, ManualClock, MetricStore, QueryPulse, QuerySample};

/// Facade on a manual clock with default configuration
pub fn pulse() -> (QueryPulse, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::default());
    let pulse = QueryPulse::with_clock(Config::default(), clock.clone()).expect("default config is valid");
    (pulse, clock)
}

pub fn store(max_samples: usize) -> (MetricStore, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::default());
    let config = MetricsConfig {
        max_samples_per_query: max_samples,
        ..Default::default()
    };
    (MetricStore::new(&config, clock.clone()), clock)
}

pub fn sample(clock: &ManualClock, query_id: &str, execution_time_ms: f64) -> QuerySample {
    QuerySample {
        query_id: query_id.to_string(),
        raw_query_text: format!("SELECT * FROM {} LIMIT 10", query_id),
        execution_time_ms,
        timestamp: clock.now(),
        result_count: None,
        cache_hit: false,
    }
}

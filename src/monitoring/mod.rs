pub mod health;
pub mod metrics;

pub use health::{HealthMetrics, HealthReport, HealthStatus};
pub use metrics::{MetricStore, PerformanceSnapshot, Percentiles, QuerySample};

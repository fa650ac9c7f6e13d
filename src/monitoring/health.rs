//! Tri-state health verdict against the p95 latency SLA
//!
//! The verdict is built from a global report, or from the error that
//! prevented building one; evaluation itself cannot fail, so an uptime probe
//! always gets a structured answer.

use crate::config::HealthConfig;
use crate::error::Error;
use crate::optimization::analyzer::{
    Complexity, GlobalReport, Priority, Recommendation, RecommendationType,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthMetrics {
    pub p95_time_ms: f64,
    pub average_time_ms: f64,
    pub total_executions: usize,
    pub slow_query_fraction: f64,
    pub cache_hit_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checked_at: DateTime<Utc>,
    pub metrics: HealthMetrics,
    pub recommendations: Vec<Recommendation>,
}

/// Status from global p95 and slow-sample fraction. Comparisons are strict:
/// a p95 equal to the SLA is not a violation.
pub fn classify(p95_time_ms: f64, slow_fraction: f64, config: &HealthConfig) -> HealthStatus {
    if p95_time_ms > config.sla_p95_ms {
        HealthStatus::Unhealthy
    } else if p95_time_ms > config.degraded_p95_ms || slow_fraction > config.degraded_slow_fraction {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

/// Turn a report attempt into a verdict
pub fn evaluate(
    report: Result<GlobalReport, Error>,
    config: &HealthConfig,
    checked_at: DateTime<Utc>,
) -> HealthReport {
    match report {
        Ok(report) => {
            let summary = &report.summary;
            let status = classify(summary.p95_time_ms, summary.slow_query_fraction, config);
            if status != HealthStatus::Healthy {
                tracing::warn!(
                    status = status.as_str(),
                    p95_ms = summary.p95_time_ms,
                    sla_ms = config.sla_p95_ms,
                    slow_fraction = summary.slow_query_fraction,
                    "Query performance health check not healthy"
                );
            }

            HealthReport {
                status,
                checked_at,
                metrics: HealthMetrics {
                    p95_time_ms: summary.p95_time_ms,
                    average_time_ms: summary.average_time_ms,
                    total_executions: summary.total_executions,
                    slow_query_fraction: summary.slow_query_fraction,
                    cache_hit_rate: summary.cache_hit_rate,
                },
                recommendations: report.recommendations,
            }
        }
        Err(error) => {
            tracing::error!(error = %error, "Health check failed to build performance report");
            HealthReport {
                status: HealthStatus::Unhealthy,
                checked_at,
                metrics: HealthMetrics::default(),
                recommendations: vec![Recommendation {
                    kind: RecommendationType::Index,
                    priority: Priority::Critical,
                    description: format!("Health check failed: {}", error),
                    estimated_improvement: 0.0,
                    implementation_complexity: Complexity::High,
                    sql_example: None,
                }],
            }
        }
    }
}

//! Performance analyzer: turns recorded samples into per-query verdicts,
//! a global report and the SLA health check.

use crate::config::HealthConfig;
use crate::error::{Error, Result};
use crate::monitoring::health::{self, HealthReport};
use crate::monitoring::metrics::{MetricStore, PerformanceSnapshot, QuerySample};
use crate::optimization::query_optimizer::{self, OptimizationRuleEngine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;

const SLOWEST_QUERY_LIMIT: usize = 10;
const CACHING_MIN_EXECUTIONS: usize = 100;
const LOW_CACHE_HIT_RATE: f64 = 50.0;
const DENORMALIZATION_MIN_JOINS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecommendationType {
    Index,
    QueryRewrite,
    Caching,
    Pagination,
    Denormalization,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Step function of p95 latency
    pub fn from_p95(p95_time_ms: f64) -> Self {
        if p95_time_ms > 100.0 {
            Self::Critical
        } else if p95_time_ms > 50.0 {
            Self::High
        } else if p95_time_ms > 25.0 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn priority(self) -> Priority {
        match self {
            Self::Low => Priority::Low,
            Self::Medium => Priority::Medium,
            Self::High => Priority::High,
            Self::Critical => Priority::Critical,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    #[serde(rename = "type")]
    pub kind: RecommendationType,
    pub priority: Priority,
    pub description: String,
    pub estimated_improvement: f64,
    pub implementation_complexity: Complexity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql_example: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryAnalysis {
    pub query_id: String,
    pub current_performance: PerformanceSnapshot,
    pub recommendations: Vec<Recommendation>,
    pub risk_level: RiskLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlowQuery {
    pub query_id: String,
    pub raw_query_text: String,
    pub average_time_ms: f64,
    pub p95_time_ms: f64,
    pub execution_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total_queries: usize,
    pub total_executions: usize,
    pub average_time_ms: f64,
    pub p95_time_ms: f64,
    pub p99_time_ms: f64,
    /// Percent of executions served from cache
    pub cache_hit_rate: f64,
    pub slow_query_count: usize,
    pub slow_query_fraction: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalReport {
    pub generated_at: DateTime<Utc>,
    pub summary: ReportSummary,
    pub slowest_queries: Vec<SlowQuery>,
    pub recommendations: Vec<Recommendation>,
}

impl GlobalReport {
    /// Prometheus text exposition of the summary
    pub fn to_prometheus(&self) -> String {
        let s = &self.summary;
        let mut output = String::new();
        let gauges: [(&str, &str, f64); 7] = [
            ("querypulse_query_executions", "Retained query executions", s.total_executions as f64),
            ("querypulse_query_ids", "Distinct query ids with samples", s.total_queries as f64),
            ("querypulse_query_latency_avg_ms", "Average execution time", s.average_time_ms),
            ("querypulse_query_latency_p95_ms", "95th percentile execution time", s.p95_time_ms),
            ("querypulse_query_latency_p99_ms", "99th percentile execution time", s.p99_time_ms),
            ("querypulse_cache_hit_rate_percent", "Executions served from cache", s.cache_hit_rate),
            ("querypulse_slow_queries", "Executions above the slow threshold", s.slow_query_count as f64),
        ];

        for (name, help, value) in gauges {
            let _ = write!(
                output,
                "# HELP {name} {help}\n# TYPE {name} gauge\n{name} {value}\n"
            );
        }

        for query in &self.slowest_queries {
            let _ = writeln!(
                output,
                "querypulse_query_p95_ms{{query_id=\"{}\"}} {}",
                escape_label_value(&query.query_id),
                query.p95_time_ms
            );
        }
        output
    }
}

/// Label value escaping for the text exposition format
fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

pub struct PerformanceAnalyzer {
    metrics: Arc<MetricStore>,
    rules: Arc<OptimizationRuleEngine>,
    slow_query_threshold_ms: f64,
    health: HealthConfig,
}

impl PerformanceAnalyzer {
    pub fn new(
        metrics: Arc<MetricStore>,
        rules: Arc<OptimizationRuleEngine>,
        slow_query_threshold_ms: f64,
        health: HealthConfig,
    ) -> Self {
        Self {
            metrics,
            rules,
            slow_query_threshold_ms,
            health,
        }
    }

    /// Statistics, risk and recommendations for one query id.
    /// Fails with `Error::NoData` when nothing has been recorded for it.
    pub fn analyze(&self, query_id: &str) -> Result<QueryAnalysis> {
        let samples = self.metrics.samples_for(query_id);
        let latest = samples.last().ok_or_else(|| Error::NoData {
            query_id: query_id.to_string(),
        })?;

        let snapshot = PerformanceSnapshot::from_samples(&samples, self.slow_query_threshold_ms);
        let risk_level = RiskLevel::from_p95(snapshot.p95_time_ms);
        let recommendations = self.recommend(&latest.raw_query_text, &snapshot, risk_level);

        Ok(QueryAnalysis {
            query_id: query_id.to_string(),
            current_performance: snapshot,
            recommendations,
            risk_level,
        })
    }

    /// Aggregate view across every query id
    pub fn global_report(&self) -> Result<GlobalReport> {
        let all = self.metrics.all_samples();
        if let Some(bad) = all.iter().find(|s| !s.execution_time_ms.is_finite() || s.execution_time_ms < 0.0) {
            return Err(Error::Analysis(format!(
                "invalid execution time {} recorded for query '{}'",
                bad.execution_time_ms, bad.query_id
            )));
        }

        let global = PerformanceSnapshot::from_samples(&all, self.slow_query_threshold_ms);
        let summary = ReportSummary {
            total_queries: self.metrics.query_ids().len(),
            total_executions: global.execution_count,
            average_time_ms: global.average_time_ms,
            p95_time_ms: global.p95_time_ms,
            p99_time_ms: global.p99_time_ms,
            cache_hit_rate: global.cache_hit_rate(),
            slow_query_count: global.slow_count,
            slow_query_fraction: global.slow_fraction(),
        };

        let mut per_query: Vec<(SlowQuery, Vec<QuerySample>)> = self
            .metrics
            .query_ids()
            .into_iter()
            .filter_map(|id| {
                let samples = self.metrics.samples_for(&id);
                let latest = samples.last()?.raw_query_text.clone();
                let snapshot = PerformanceSnapshot::from_samples(&samples, self.slow_query_threshold_ms);
                Some((
                    SlowQuery {
                        query_id: id,
                        raw_query_text: latest,
                        average_time_ms: snapshot.average_time_ms,
                        p95_time_ms: snapshot.p95_time_ms,
                        execution_count: snapshot.execution_count,
                    },
                    samples,
                ))
            })
            .collect();
        per_query.sort_by(|a, b| b.0.p95_time_ms.total_cmp(&a.0.p95_time_ms));
        per_query.truncate(SLOWEST_QUERY_LIMIT);

        let mut recommendations = self.global_recommendations(&summary);
        let mut seen: HashSet<(RecommendationType, String)> = recommendations
            .iter()
            .map(|r| (r.kind, r.description.clone()))
            .collect();
        for (query, samples) in &per_query {
            let snapshot = PerformanceSnapshot::from_samples(samples, self.slow_query_threshold_ms);
            let risk = RiskLevel::from_p95(snapshot.p95_time_ms);
            for rec in self.recommend(&query.raw_query_text, &snapshot, risk) {
                if seen.insert((rec.kind, rec.description.clone())) {
                    recommendations.push(rec);
                }
            }
        }
        // stable: equal priorities keep slowest-first order
        recommendations.sort_by(|a, b| b.priority.cmp(&a.priority));

        Ok(GlobalReport {
            generated_at: self.metrics.now(),
            summary,
            slowest_queries: per_query.into_iter().map(|(q, _)| q).collect(),
            recommendations,
        })
    }

    /// Tri-state verdict; never fails
    pub fn health_check(&self) -> HealthReport {
        health::evaluate(self.global_report(), &self.health, self.metrics.now())
    }

    fn recommend(
        &self,
        query_text: &str,
        snapshot: &PerformanceSnapshot,
        risk: RiskLevel,
    ) -> Vec<Recommendation> {
        let mut recommendations = Vec::new();
        let over_sla = snapshot.p95_time_ms > self.health.sla_p95_ms;

        if let Some(suggestion) = self.rules.suggest(query_text) {
            recommendations.push(Recommendation {
                kind: RecommendationType::QueryRewrite,
                priority: risk.priority(),
                description: format!("{}: {}", suggestion.rule_name, suggestion.description),
                estimated_improvement: f64::from(suggestion.estimated_improvement_percent),
                implementation_complexity: Complexity::Low,
                sql_example: Some(suggestion.rewritten_text),
            });
        }

        if over_sla {
            let sql_example = match (
                query_optimizer::primary_table(query_text),
                query_optimizer::filter_column(query_text),
            ) {
                (Some(table), Some(column)) => {
                    let bare = column.rsplit('.').next().unwrap_or(&column).to_string();
                    Some(format!(
                        "CREATE INDEX CONCURRENTLY idx_{}_{} ON {} ({});",
                        table.replace('.', "_"),
                        bare,
                        table,
                        bare
                    ))
                }
                _ => None,
            };
            recommendations.push(Recommendation {
                kind: RecommendationType::Index,
                priority: risk.priority(),
                description: format!(
                    "p95 of {:.1}ms exceeds the {:.0}ms SLA; index the filtered columns",
                    snapshot.p95_time_ms, self.health.sla_p95_ms
                ),
                estimated_improvement: 50.0,
                implementation_complexity: Complexity::Medium,
                sql_example,
            });
        }

        if snapshot.execution_count > CACHING_MIN_EXECUTIONS {
            recommendations.push(Recommendation {
                kind: RecommendationType::Caching,
                priority: Priority::Medium,
                description: format!(
                    "Executed {} times; cache the result with an explicit TTL",
                    snapshot.execution_count
                ),
                estimated_improvement: 70.0,
                implementation_complexity: Complexity::Low,
                sql_example: None,
            });
        }

        let lowered = query_text.to_lowercase();
        if lowered.contains("select") && !lowered.contains("limit") {
            recommendations.push(Recommendation {
                kind: RecommendationType::Pagination,
                priority: Priority::Medium,
                description: "Unpaginated SELECT; page results with LIMIT/OFFSET or a keyset cursor".to_string(),
                estimated_improvement: 40.0,
                implementation_complexity: Complexity::Low,
                sql_example: Some(format!("{} LIMIT 50 OFFSET 0", query_text.trim_end().trim_end_matches(';'))),
            });
        }

        if over_sla && query_optimizer::join_count(query_text) >= DENORMALIZATION_MIN_JOINS {
            recommendations.push(Recommendation {
                kind: RecommendationType::Denormalization,
                priority: risk.priority(),
                description: "Multi-table JOIN above the SLA; precompute the joined view".to_string(),
                estimated_improvement: 30.0,
                implementation_complexity: Complexity::High,
                sql_example: None,
            });
        }

        recommendations
    }

    fn global_recommendations(&self, summary: &ReportSummary) -> Vec<Recommendation> {
        let mut recommendations = Vec::new();

        if summary.total_executions > CACHING_MIN_EXECUTIONS && summary.cache_hit_rate < LOW_CACHE_HIT_RATE {
            recommendations.push(Recommendation {
                kind: RecommendationType::Caching,
                priority: Priority::High,
                description: format!(
                    "Global cache hit rate is {:.1}%; cache more read queries",
                    summary.cache_hit_rate
                ),
                estimated_improvement: 60.0,
                implementation_complexity: Complexity::Medium,
                sql_example: None,
            });
        }

        if summary.slow_query_fraction > self.health.degraded_slow_fraction {
            recommendations.push(Recommendation {
                kind: RecommendationType::Index,
                priority: Priority::High,
                description: format!(
                    "{:.1}% of executions exceed {:.0}ms; review indexes for the slowest queries",
                    summary.slow_query_fraction * 100.0,
                    self.slow_query_threshold_ms
                ),
                estimated_improvement: 50.0,
                implementation_complexity: Complexity::Medium,
                sql_example: None,
            });
        }

        recommendations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::config::MetricsConfig;
    use crate::monitoring::health::HealthStatus;

    fn analyzer() -> (PerformanceAnalyzer, Arc<MetricStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let metrics = Arc::new(MetricStore::new(&MetricsConfig::default(), clock.clone()));
        let analyzer = PerformanceAnalyzer::new(
            Arc::clone(&metrics),
            Arc::new(OptimizationRuleEngine::new()),
            50.0,
            HealthConfig::default(),
        );
        (analyzer, metrics, clock)
    }

    fn record(metrics: &MetricStore, clock: &ManualClock, id: &str, text: &str, ms: f64, hit: bool) {
        metrics.record(QuerySample {
            query_id: id.to_string(),
            raw_query_text: text.to_string(),
            execution_time_ms: ms,
            timestamp: clock.now(),
            result_count: None,
            cache_hit: hit,
        });
    }

    #[test]
    fn test_risk_levels() {
        assert_eq!(RiskLevel::from_p95(10.0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_p95(25.0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_p95(30.0), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_p95(60.0), RiskLevel::High);
        assert_eq!(RiskLevel::from_p95(150.0), RiskLevel::Critical);
    }

    #[test]
    fn test_analyze_without_data() {
        let (analyzer, _, _) = analyzer();
        assert!(analyzer.analyze("missing").unwrap_err().is_no_data());
    }

    #[test]
    fn test_analyze_slow_unbounded_select() {
        let (analyzer, metrics, clock) = analyzer();
        let text = "SELECT * FROM posts WHERE creator_id = 7";
        for _ in 0..120 {
            record(&metrics, &clock, "list_posts", text, 80.0, false);
        }

        let analysis = analyzer.analyze("list_posts").unwrap();
        assert_eq!(analysis.risk_level, RiskLevel::High);
        assert_eq!(analysis.current_performance.execution_count, 120);

        let kinds: Vec<_> = analysis.recommendations.iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![
                RecommendationType::QueryRewrite,
                RecommendationType::Index,
                RecommendationType::Caching,
                RecommendationType::Pagination,
            ]
        );
        let rewrite = &analysis.recommendations[0];
        assert_eq!(rewrite.priority, Priority::High);
        assert_eq!(rewrite.estimated_improvement, 60.0);
        assert_eq!(
            analysis.recommendations[1].sql_example.as_deref(),
            Some("CREATE INDEX CONCURRENTLY idx_posts_creator_id ON posts (creator_id);")
        );
    }

    #[test]
    fn test_analyze_fast_bounded_query_has_no_recommendations() {
        let (analyzer, metrics, clock) = analyzer();
        record(&metrics, &clock, "get_post", "SELECT * FROM posts WHERE id = 1 LIMIT 1", 5.0, false);
        let analysis = analyzer.analyze("get_post").unwrap();
        assert_eq!(analysis.risk_level, RiskLevel::Low);
        assert!(analysis.recommendations.is_empty());
    }

    #[test]
    fn test_denormalization_for_slow_multi_join() {
        let (analyzer, metrics, clock) = analyzer();
        let text = "SELECT p.id FROM posts p JOIN users u ON u.id = p.user_id JOIN tiers t ON t.id = p.tier_id LIMIT 10";
        record(&metrics, &clock, "feed", text, 120.0, false);

        let analysis = analyzer.analyze("feed").unwrap();
        assert_eq!(analysis.risk_level, RiskLevel::Critical);
        assert!(analysis
            .recommendations
            .iter()
            .any(|r| r.kind == RecommendationType::Denormalization && r.priority == Priority::Critical));
    }

    #[test]
    fn test_global_report_orders_slowest_and_counts_hits() {
        let (analyzer, metrics, clock) = analyzer();
        record(&metrics, &clock, "fast", "SELECT 1 LIMIT 1", 2.0, true);
        record(&metrics, &clock, "fast", "SELECT 1 LIMIT 1", 2.0, false);
        record(&metrics, &clock, "slow", "SELECT 2 LIMIT 1", 90.0, false);
        record(&metrics, &clock, "medium", "SELECT 3 LIMIT 1", 30.0, false);

        let report = analyzer.global_report().unwrap();
        let order: Vec<_> = report.slowest_queries.iter().map(|q| q.query_id.as_str()).collect();
        assert_eq!(order, vec!["slow", "medium", "fast"]);
        assert_eq!(report.summary.total_executions, 4);
        assert_eq!(report.summary.total_queries, 3);
        assert_eq!(report.summary.cache_hit_rate, 25.0);
        assert_eq!(report.summary.slow_query_count, 1);

        let priorities: Vec<_> = report.recommendations.iter().map(|r| r.priority).collect();
        let mut sorted = priorities.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(priorities, sorted);
    }

    #[test]
    fn test_health_check_states() {
        let (analyzer, metrics, clock) = analyzer();
        assert_eq!(analyzer.health_check().status, HealthStatus::Healthy);

        for _ in 0..100 {
            record(&metrics, &clock, "q", "SELECT 1 LIMIT 1", 20.0, false);
        }
        assert_eq!(analyzer.health_check().status, HealthStatus::Healthy);

        for _ in 0..20 {
            record(&metrics, &clock, "q", "SELECT 1 LIMIT 1", 40.0, false);
        }
        // p95 now 40ms: above the 35ms degraded line
        assert_eq!(analyzer.health_check().status, HealthStatus::Degraded);

        for _ in 0..200 {
            record(&metrics, &clock, "q", "SELECT 1 LIMIT 1", 75.0, false);
        }
        let report = analyzer.health_check();
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert_eq!(report.metrics.p95_time_ms, 75.0);
    }

    #[test]
    fn test_health_check_never_fails() {
        let (analyzer, metrics, clock) = analyzer();
        record(&metrics, &clock, "q", "SELECT 1", f64::NAN, false);

        let report = analyzer.health_check();
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert_eq!(report.recommendations[0].priority, Priority::Critical);
    }

    #[test]
    fn test_recommendation_json_shape() {
        let rec = Recommendation {
            kind: RecommendationType::QueryRewrite,
            priority: Priority::High,
            description: "d".to_string(),
            estimated_improvement: 60.0,
            implementation_complexity: Complexity::Low,
            sql_example: None,
        };
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["type"], "QUERY_REWRITE");
        assert_eq!(json["priority"], "HIGH");
        assert_eq!(json["implementationComplexity"], "LOW");
        assert_eq!(json["estimatedImprovement"], 60.0);
        assert!(json.get("sqlExample").is_none());
    }

    #[test]
    fn test_prometheus_label_escaping() {
        assert_eq!(escape_label_value("plain_id"), "plain_id");
        assert_eq!(escape_label_value("a\\b"), "a\\\\b");
        assert_eq!(escape_label_value("say \"hi\""), "say \\\"hi\\\"");
        assert_eq!(escape_label_value("two\nlines"), "two\\nlines");
    }

    #[test]
    fn test_prometheus_export() {
        let (analyzer, metrics, clock) = analyzer();
        record(&metrics, &clock, "q", "SELECT 1 LIMIT 1", 12.0, false);
        let text = analyzer.global_report().unwrap().to_prometheus();
        assert!(text.contains("# TYPE querypulse_query_latency_p95_ms gauge"));
        assert!(text.contains("querypulse_query_latency_p95_ms 12"));
        assert!(text.contains("querypulse_query_p95_ms{query_id=\"q\"} 12"));
    }
}

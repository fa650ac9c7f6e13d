//! Command implementations for the QueryPulse CLI

use std::path::Path;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::info;

use querypulse::{Config, HealthStatus, QueryPulse, Result};

use crate::app_config::resolve_config;

/// Fixed query catalog the simulator cycles through
const WORKLOAD: &[(&str, &str)] = &[
    ("get_user_profile", "SELECT * FROM users WHERE id = $1"),
    (
        "list_content_feed",
        "SELECT c.* FROM content c JOIN creators cr ON cr.id = c.creator_id \
         JOIN tiers t ON t.id = c.tier_id WHERE c.published ORDER BY c.created_at DESC LIMIT 50",
    ),
    ("search_creators", "SELECT id, name FROM creators WHERE name LIKE '%art%' LIMIT 20"),
    ("count_content", "SELECT COUNT(*) FROM content"),
    ("update_post_title", "UPDATE posts SET title = $1 WHERE id = $2"),
];

const FAST_QUERY: Duration = Duration::from_millis(2);
const SLOW_QUERY: Duration = Duration::from_millis(60);

pub fn config_command(file: Option<&Path>) -> Result<()> {
    let config = resolve_config(file)?;
    print!("{}", config.to_toml_string()?);
    Ok(())
}

pub fn suggest_command(sql: &str) -> Result<()> {
    let pulse = QueryPulse::new(Config::default())?;
    match pulse.suggest(sql) {
        Some(suggestion) => println!("{}", serde_json::to_string_pretty(&suggestion)?),
        None => println!("No optimization rule matches this query"),
    }
    Ok(())
}

/// Latency the simulator assigns to execution `index` (0-based)
pub fn simulated_latency(index: usize, slow_every: usize) -> Duration {
    if slow_every > 0 && (index + 1) % slow_every == 0 {
        SLOW_QUERY
    } else {
        FAST_QUERY
    }
}

pub async fn simulate_command(
    file: Option<&Path>,
    queries: usize,
    slow_every: usize,
    json_output: bool,
    prometheus: bool,
) -> Result<()> {
    let pulse = QueryPulse::new(resolve_config(file)?)?;
    info!(queries, slow_every, "Starting simulated workload");

    let mut failures = 0usize;
    for index in 0..queries {
        let (query_id, sql) = WORKLOAD[index % WORKLOAD.len()];
        let latency = simulated_latency(index, slow_every);
        let rows = (index % 7) + 1;

        let outcome = pulse
            .executor()
            .run(query_id, sql, move || async move {
                tokio::time::sleep(latency).await;
                Ok::<Value, String>(json!({ "rows": (0..rows).collect::<Vec<_>>() }))
            })
            .await;
        if outcome.is_err() {
            failures += 1;
        }
    }
    pulse.shutdown(Duration::from_secs(5)).await;

    if prometheus {
        print!("{}", pulse.global_report()?.to_prometheus());
        return Ok(());
    }

    let health = pulse.health_check();
    if json_output {
        println!("{}", serde_json::to_string_pretty(&health)?);
        return Ok(());
    }

    let stats = pulse.executor().stats();
    let marker = match health.status {
        HealthStatus::Healthy => "✅",
        HealthStatus::Degraded => "⚠️",
        HealthStatus::Unhealthy => "❌",
    };
    println!("{} Status: {}", marker, health.status.as_str());
    println!("   Executions:      {}", health.metrics.total_executions);
    println!("   p95:             {:.1}ms", health.metrics.p95_time_ms);
    println!("   Average:         {:.1}ms", health.metrics.average_time_ms);
    println!("   Slow fraction:   {:.1}%", health.metrics.slow_query_fraction * 100.0);
    println!("   Cache hit rate:  {:.1}%", health.metrics.cache_hit_rate);
    println!("   Cached results:  {}", stats.cached_results);
    println!("   Failures:        {}", failures);

    if !health.recommendations.is_empty() {
        println!();
        println!("Recommendations:");
        for rec in &health.recommendations {
            println!(
                "  [{:?}] {:?}: {} (~{:.0}%)",
                rec.priority, rec.kind, rec.description, rec.estimated_improvement
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulated_latency() {
        assert_eq!(simulated_latency(0, 10), FAST_QUERY);
        assert_eq!(simulated_latency(9, 10), SLOW_QUERY);
        assert_eq!(simulated_latency(9, 0), FAST_QUERY);
    }

    #[test]
    fn test_workload_has_a_write() {
        assert!(WORKLOAD
            .iter()
            .any(|(id, _)| !querypulse::executor::is_read_only(id)));
    }

    #[tokio::test]
    async fn test_simulate_runs() {
        simulate_command(None, 10, 5, true, false).await.unwrap();
    }
}

//! End-to-end scenarios through the `QueryPulse` facade

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use querypulse::executor::{cache_key, RunOptions};
use querypulse::optimization::{Priority, RecommendationType, RiskLevel};
use querypulse::{HealthStatus, PerformanceSnapshot};
use serde_json::json;

#[test]
fn scenario_a_single_outlier_does_not_move_p95() {
    let (pulse, clock) = common::pulse();
    for _ in 0..100 {
        pulse.metrics().record(common::sample(&clock, "q1", 10.0));
    }
    pulse.metrics().record(common::sample(&clock, "q1", 200.0));

    let analysis = pulse.analyze("q1").unwrap();
    let perf: &PerformanceSnapshot = &analysis.current_performance;
    assert_eq!(perf.execution_count, 101);
    assert_eq!(perf.p95_time_ms, 10.0);
    assert!((perf.average_time_ms - 11.88).abs() < 0.01);
    assert_eq!(analysis.risk_level, RiskLevel::Low);
    assert!(analysis
        .recommendations
        .iter()
        .any(|r| r.kind == RecommendationType::Caching));
}

#[tokio::test]
async fn scenario_b_entry_expires_on_simulated_clock() {
    let (pulse, clock) = common::pulse();
    let cache = pulse.cache();

    cache.set("k", json!("v"), Duration::from_millis(100), &[]).await;
    assert_eq!(cache.get("k").await, Some(json!("v")));

    clock.advance(Duration::from_millis(150));
    assert_eq!(cache.get("k").await, None);
}

#[test]
fn scenario_c_unbounded_select_suggestion() {
    let (pulse, _) = common::pulse();
    let suggestion = pulse
        .suggest("SELECT * FROM users WHERE active = true")
        .unwrap();
    assert_eq!(suggestion.rule_id, "add_limit_to_unbounded_queries");
    assert!(suggestion.rewritten_text.ends_with("LIMIT 1000"));
    assert_eq!(suggestion.estimated_improvement_percent, 60);
}

#[tokio::test]
async fn scenario_d_slow_work_is_cached() {
    let (pulse, _) = common::pulse();
    let calls = Arc::new(AtomicUsize::new(0));
    let sql = "SELECT id FROM tiers WHERE creator_id = 9";

    for _ in 0..2 {
        let counter = Arc::clone(&calls);
        let value: Vec<u32> = pulse
            .executor()
            .run("list_tiers", sql, move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(60)).await;
                Ok::<_, String>(vec![1, 2, 3])
            })
            .await
            .unwrap();
        assert_eq!(value, vec![1, 2, 3]);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(pulse.cache().get(&cache_key("list_tiers", sql)).await.is_some());

    let stats = pulse.executor().stats();
    assert_eq!(stats.slow_queries, 1);
    assert_eq!(stats.cache_hits, 1);

    let samples = pulse.metrics().samples_for("list_tiers");
    assert_eq!(samples.len(), 2);
    assert!(!samples[0].cache_hit);
    assert!(samples[0].execution_time_ms >= 60.0);
    assert_eq!(samples[0].result_count, Some(3));
    assert!(samples[1].cache_hit);
}

#[tokio::test]
async fn failure_passes_through_unchanged() {
    let (pulse, _) = common::pulse();
    let err = pulse
        .executor()
        .run("get_user", "SELECT * FROM users WHERE id = 1", || async {
            Err::<Vec<u32>, _>("connection reset".to_string())
        })
        .await
        .unwrap_err();

    assert_eq!(err, "connection reset");
    assert!(pulse.metrics().samples_for("get_user").is_empty());
    assert_eq!(pulse.executor().stats().failures, 1);
}

#[tokio::test]
async fn tag_invalidation_forces_reexecution() {
    let (pulse, _) = common::pulse();
    let calls = Arc::new(AtomicUsize::new(0));
    let options = RunOptions::default()
        .with_ttl(Duration::from_secs(60))
        .with_tags(["creator:9"]);

    for round in 0..2 {
        if round == 1 {
            assert_eq!(pulse.executor().invalidate(&["creator:9".to_string()]).await, 1);
        }
        let counter = Arc::clone(&calls);
        pulse
            .executor()
            .run_with("list_posts", "SELECT * FROM posts LIMIT 5", options.clone(), move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(15)).await;
                Ok::<_, String>(json!({ "items": [1, 2] }))
            })
            .await
            .unwrap();
    }

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn health_tracks_sla() {
    let (pulse, clock) = common::pulse();
    assert_eq!(pulse.health_check().status, HealthStatus::Healthy);

    for _ in 0..100 {
        pulse.metrics().record(common::sample(&clock, "feed", 80.0));
    }
    let report = pulse.health_check();
    assert_eq!(report.status, HealthStatus::Unhealthy);
    assert!(report
        .recommendations
        .iter()
        .any(|r| r.kind == RecommendationType::Index && r.priority >= Priority::High));

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["status"], "unhealthy");
}

#[test]
fn unknown_query_has_no_data() {
    let (pulse, _) = common::pulse();
    assert!(pulse.analyze("never_ran").unwrap_err().is_no_data());
}

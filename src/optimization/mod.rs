//! Query rewrite rules and performance analysis

pub mod analyzer;
pub mod query_optimizer;

pub use analyzer::{
    Complexity, GlobalReport, PerformanceAnalyzer, Priority, QueryAnalysis, Recommendation,
    RecommendationType, ReportSummary, RiskLevel, SlowQuery,
};
pub use query_optimizer::{OptimizationRule, OptimizationRuleEngine, RewriteSuggestion};

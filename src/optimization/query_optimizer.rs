//! Rule-based query rewrite advisor
//!
//! A fixed catalog of five text heuristics over raw SQL. Rules are checked
//! in declaration order and the first match wins, so at most one rewrite is
//! suggested per query. Matching is on raw text, not a parsed statement.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

static SELECT_WHERE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^\s*SELECT\b.*\bWHERE\b").expect("valid regex"));
static LIMIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bLIMIT\b").expect("valid regex"));
static LIKE_CONTAINS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bLIKE\s+'%([^'%]*)%'").expect("valid regex"));
static JOIN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bJOIN\b").expect("valid regex"));
static INDEX_HINT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(USE|FORCE)\s+INDEX\b").expect("valid regex"));
static PRIMARY_TABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bFROM\s+([A-Za-z_][A-Za-z0-9_.]*)").expect("valid regex"));
static COUNT_STAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)COUNT\(\s*\*\s*\)").expect("valid regex"));
static LARGE_TABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bFROM\s+(content|users)\b").expect("valid regex"));
static ORDER_BY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bORDER\s+BY\b").expect("valid regex"));
static HINT_TARGET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bFROM\s+([A-Za-z_][A-Za-z0-9_.]*)((?:\s+AS)?\s+([A-Za-z_][A-Za-z0-9_]*))?")
        .expect("valid regex")
});
static FILTER_COLUMN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bWHERE\s+([A-Za-z_][A-Za-z0-9_.]*)").expect("valid regex"));

/// Table named by the first FROM clause
pub fn primary_table(query: &str) -> Option<String> {
    PRIMARY_TABLE.captures(query).map(|caps| caps[1].to_string())
}

/// Column compared first in the WHERE clause
pub fn filter_column(query: &str) -> Option<String> {
    FILTER_COLUMN.captures(query).map(|caps| caps[1].to_string())
}

pub fn join_count(query: &str) -> usize {
    JOIN.find_iter(query).count()
}

/// One catalog entry
#[derive(Debug, Clone)]
pub struct OptimizationRule {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub matches: fn(&str) -> bool,
    pub rewrite: fn(&str) -> String,
    /// Fixed estimate in (0, 100]
    pub estimated_improvement_percent: u8,
}

/// Output of the first matching rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteSuggestion {
    pub rule_id: String,
    pub rule_name: String,
    pub description: String,
    pub original_text: String,
    pub rewritten_text: String,
    pub estimated_improvement_percent: u8,
}

fn is_unbounded_select(query: &str) -> bool {
    SELECT_WHERE.is_match(query) && !LIMIT.is_match(query)
}

fn add_limit(query: &str) -> String {
    let trimmed = query.trim_end().trim_end_matches(';').trim_end();
    format!("{} LIMIT 1000", trimmed)
}

fn has_contains_like(query: &str) -> bool {
    LIKE_CONTAINS.is_match(query)
}

fn like_to_regex(query: &str) -> String {
    LIKE_CONTAINS
        .replace_all(query, |caps: &Captures| format!("~ '{}'", regex::escape(&caps[1])))
        .into_owned()
}

fn is_unhinted_join(query: &str) -> bool {
    JOIN.is_match(query) && !INDEX_HINT.is_match(query)
}

/// Words that can follow a table name without being its alias
const CLAUSE_KEYWORDS: &[&str] = &[
    "join", "inner", "left", "right", "full", "cross", "natural", "outer", "on", "where",
    "group", "order", "limit", "use", "force", "ignore", "union", "having",
];

fn add_index_hint(query: &str) -> String {
    HINT_TARGET
        .replace(query, |caps: &Captures| {
            let table = &caps[1];
            let tail = caps.get(2).map_or("", |m| m.as_str());
            match caps.get(3) {
                Some(alias) if !CLAUSE_KEYWORDS.contains(&alias.as_str().to_lowercase().as_str()) => {
                    format!("FROM {}{} USE INDEX (PRIMARY)", table, tail)
                }
                _ => format!("FROM {} USE INDEX (PRIMARY){}", table, tail),
            }
        })
        .into_owned()
}

fn is_large_table_count(query: &str) -> bool {
    COUNT_STAR.is_match(query) && LARGE_TABLE.is_match(query)
}

fn count_by_id(query: &str) -> String {
    COUNT_STAR.replace_all(query, "COUNT(id)").into_owned()
}

fn has_order_by(query: &str) -> bool {
    ORDER_BY.is_match(query)
}

fn unchanged(query: &str) -> String {
    query.to_string()
}

/// The five built-in rules, in priority order
pub fn default_rules() -> Vec<OptimizationRule> {
    vec![
        OptimizationRule {
            id: "add_limit_to_unbounded_queries",
            name: "Unbounded SELECT",
            description: "SELECT with a WHERE clause but no LIMIT; cap the result set",
            matches: is_unbounded_select,
            rewrite: add_limit,
            estimated_improvement_percent: 60,
        },
        OptimizationRule {
            id: "optimize_like_patterns",
            name: "LIKE '%...%' pattern",
            description: "Leading-wildcard LIKE cannot use a btree index; use a regex match served by a trigram/GIN index",
            matches: has_contains_like,
            rewrite: like_to_regex,
            estimated_improvement_percent: 40,
        },
        OptimizationRule {
            id: "add_index_hints",
            name: "JOIN without index hint",
            description: "JOIN without an index hint; hint the primary table's index",
            matches: is_unhinted_join,
            rewrite: add_index_hint,
            estimated_improvement_percent: 25,
        },
        OptimizationRule {
            id: "optimize_count_queries",
            name: "COUNT(*) on large table",
            description: "COUNT(*) over content/users; count the id column instead",
            matches: is_large_table_count,
            rewrite: count_by_id,
            estimated_improvement_percent: 35,
        },
        OptimizationRule {
            id: "optimize_order_by",
            name: "ORDER BY clause",
            description: "ORDER BY may sort without an index; review indexes on the sort columns",
            matches: has_order_by,
            rewrite: unchanged,
            estimated_improvement_percent: 30,
        },
    ]
}

/// Immutable rule catalog
pub struct OptimizationRuleEngine {
    rules: Vec<OptimizationRule>,
}

impl Default for OptimizationRuleEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl OptimizationRuleEngine {
    pub fn new() -> Self {
        Self {
            rules: default_rules(),
        }
    }

    pub fn rules(&self) -> &[OptimizationRule] {
        &self.rules
    }

    /// First matching rule's rewrite, if any
    pub fn suggest(&self, raw_query_text: &str) -> Option<RewriteSuggestion> {
        self.rules
            .iter()
            .find(|rule| (rule.matches)(raw_query_text))
            .map(|rule| RewriteSuggestion {
                rule_id: rule.id.to_string(),
                rule_name: rule.name.to_string(),
                description: rule.description.to_string(),
                original_text: raw_query_text.to_string(),
                rewritten_text: (rule.rewrite)(raw_query_text),
                estimated_improvement_percent: rule.estimated_improvement_percent,
            })
    }
}

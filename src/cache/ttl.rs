//! TTL assignment for cached results

use crate::config::TtlConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Caller hint about what kind of data a query returns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Content,
    Subscription,
    Other,
}

/// Picks a TTL from the key and content type unless the caller gave one.
///
/// Precedence: explicit TTL, then key substring (`user`, `static`, `api`,
/// checked in that order), then content type, then the default.
#[derive(Debug, Clone, Default)]
pub struct TtlPolicy {
    table: TtlConfig,
}

impl TtlPolicy {
    pub fn new(table: TtlConfig) -> Self {
        Self { table }
    }

    pub fn ttl_for(
        &self,
        key: &str,
        content_type: Option<ContentType>,
        explicit: Option<Duration>,
    ) -> Duration {
        if let Some(ttl) = explicit {
            return ttl;
        }

        let key = key.to_lowercase();
        let ms = if key.contains("user") {
            self.table.user_ms
        } else if key.contains("static") {
            self.table.static_ms
        } else if key.contains("api") {
            self.table.api_ms
        } else {
            match content_type {
                Some(ContentType::Content) => self.table.content_ms,
                Some(ContentType::Subscription) => self.table.subscription_ms,
                Some(ContentType::Other) | None => self.table.default_ms,
            }
        };
        Duration::from_millis(ms)
    }
}

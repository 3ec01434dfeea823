// Response caching for expensive read endpoints

use moka::future::Cache;
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

const MAX_ENTRIES: u64 = 1000;

/// Time-to-live tier of a cached endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    /// Volatile aggregates (counters, donut charts).
    Short,
    /// Listings that change with normal edits.
    Medium,
    /// Near-static library content (frameworks, matrices).
    Long,
}

impl CacheTier {
    const fn ttl(self) -> Duration {
        match self {
            Self::Short => Duration::from_secs(2 * 60),
            Self::Medium => Duration::from_secs(5 * 60),
            Self::Long => Duration::from_secs(60 * 60),
        }
    }
}

/// Per-user cache of JSON responses, keyed by `user_id:path?query`.
///
/// Keys embed the user id because visibility scoping makes the same
/// URL return different data per user. Invalidation is coarse: any
/// write that changes aggregate numbers flushes everything.
#[derive(Clone)]
pub struct ResponseCache {
    short: Cache<String, Value>,
    medium: Cache<String, Value>,
    long: Cache<String, Value>,
}

impl ResponseCache {
    pub fn new() -> Self {
        let build = |tier: CacheTier| {
            Cache::builder()
                .time_to_live(tier.ttl())
                .max_capacity(MAX_ENTRIES)
                .build()
        };
        Self {
            short: build(CacheTier::Short),
            medium: build(CacheTier::Medium),
            long: build(CacheTier::Long),
        }
    }

    pub fn key(user_id: Uuid, path: &str, query: Option<&str>) -> String {
        match query {
            Some(query) if !query.is_empty() => format!("{}:{}?{}", user_id, path, query),
            _ => format!("{}:{}", user_id, path),
        }
    }

    fn tier(&self, tier: CacheTier) -> &Cache<String, Value> {
        match tier {
            CacheTier::Short => &self.short,
            CacheTier::Medium => &self.medium,
            CacheTier::Long => &self.long,
        }
    }

    pub async fn get(&self, tier: CacheTier, key: &str) -> Option<Value> {
        self.tier(tier).get(key).await
    }

    pub async fn put(&self, tier: CacheTier, key: String, value: Value) {
        self.tier(tier).insert(key, value).await;
    }

    /// Drops every cached response in every tier.
    pub fn invalidate_all(&self) {
        self.short.invalidate_all();
        self.medium.invalidate_all();
        self.long.invalidate_all();
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_put_get_and_invalidate() {
        let cache = ResponseCache::new();
        let key = ResponseCache::key(Uuid::new_v4(), "/api/projects", None);

        assert!(cache.get(CacheTier::Medium, &key).await.is_none());
        cache
            .put(CacheTier::Medium, key.clone(), json!({"count": 1}))
            .await;
        assert_eq!(
            cache.get(CacheTier::Medium, &key).await,
            Some(json!({"count": 1}))
        );
        // Tiers are isolated.
        assert!(cache.get(CacheTier::Short, &key).await.is_none());

        cache.invalidate_all();
        // moka invalidation is eventually consistent; run pending work.
        cache.medium.run_pending_tasks().await;
        assert!(cache.get(CacheTier::Medium, &key).await.is_none());
    }

    #[test]
    fn test_key_shape() {
        let user = Uuid::nil();
        assert_eq!(
            ResponseCache::key(user, "/api/threats", Some("search=a")),
            format!("{}:/api/threats?search=a", user)
        );
        assert_eq!(
            ResponseCache::key(user, "/api/threats", Some("")),
            format!("{}:/api/threats", user)
        );
    }
}

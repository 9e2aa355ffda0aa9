//! A time-bounded cache over several parameterized queries.
//!
//! Multiple collectors read the same backend metrics (per-project usage by
//! AZ, physical usage, and so on). The cache executes all of its queries in
//! one refresh and folds their vectors into a single keyed map; readers get a
//! cheap `Arc` snapshot. Staleness is bounded by the TTL.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use core_plugin::{CollectorResult, ScrapeContext};
use tokio::sync::RwLock;
use tracing::debug;

use crate::client::{MetricSource, Sample};

/// The shared refresh window.
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(120);

/// One query feeding the cache.
///
/// `key` extracts the map key from a sample (samples without a key are
/// skipped); `fill` merges the sample into the entry for that key.
pub struct BulkQuery<K, V> {
    pub description: &'static str,
    pub expression: String,
    pub key: fn(&Sample) -> Option<K>,
    pub fill: fn(&mut V, &Sample),
}

struct CacheState<K, V> {
    filled_at: Option<Instant>,
    data: Arc<HashMap<K, V>>,
}

/// Caches the folded result of several queries for [`REFRESH_INTERVAL`].
///
/// The read path holds a read lock only to check freshness and clone the
/// snapshot; a stale cache upgrades to the write lock, which serializes
/// refreshes. A second reader that blocked on the write lock re-checks
/// freshness and reuses the refresh that just completed.
pub struct BulkMetricCache<K, V> {
    source: Arc<dyn MetricSource>,
    queries: Vec<BulkQuery<K, V>>,
    ttl: Duration,
    state: RwLock<CacheState<K, V>>,
}

impl<K, V> BulkMetricCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Default + Send + Sync,
{
    pub fn new(source: Arc<dyn MetricSource>, queries: Vec<BulkQuery<K, V>>) -> Self {
        Self::with_ttl(source, queries, REFRESH_INTERVAL)
    }

    pub fn with_ttl(
        source: Arc<dyn MetricSource>,
        queries: Vec<BulkQuery<K, V>>,
        ttl: Duration,
    ) -> Self {
        Self {
            source,
            queries,
            ttl,
            state: RwLock::new(CacheState {
                filled_at: None,
                data: Arc::new(HashMap::new()),
            }),
        }
    }

    fn is_fresh(&self, state: &CacheState<K, V>) -> bool {
        state
            .filled_at
            .is_some_and(|filled_at| filled_at.elapsed() < self.ttl)
    }

    /// Returns the current snapshot, refreshing it first when stale.
    pub async fn get(&self, ctx: &ScrapeContext) -> CollectorResult<Arc<HashMap<K, V>>> {
        {
            let state = self.state.read().await;
            if self.is_fresh(&state) {
                return Ok(state.data.clone());
            }
        }

        let mut state = self.state.write().await;
        // Another reader may have refreshed while we waited for the lock.
        if self.is_fresh(&state) {
            return Ok(state.data.clone());
        }

        let mut data: HashMap<K, V> = HashMap::new();
        for query in &self.queries {
            ctx.check_canceled()?;
            let vector = self.source.query(ctx, &query.expression).await?;
            debug!(
                query = query.description,
                samples = vector.len(),
                "bulk metric cache refresh"
            );
            for sample in &vector {
                let Some(key) = (query.key)(sample) else {
                    continue;
                };
                (query.fill)(data.entry(key).or_default(), sample);
            }
        }

        state.data = Arc::new(data);
        state.filled_at = Some(Instant::now());
        Ok(state.data.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MetricSource for CountingSource {
        async fn query(&self, _ctx: &ScrapeContext, expression: &str) -> CollectorResult<Vector> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let labels = |project: &str| {
                BTreeMap::from([("project_id".to_string(), project.to_string())])
            };
            match expression {
                "usage" => Ok(vec![
                    Sample {
                        labels: labels("p1"),
                        value: 10.0,
                    },
                    Sample {
                        labels: labels("p2"),
                        value: 20.0,
                    },
                ]),
                _ => Ok(vec![Sample {
                    labels: labels("p1"),
                    value: 3.0,
                }]),
            }
        }
    }

    use crate::client::Vector;

    #[derive(Default, Clone, PartialEq, Debug)]
    struct Entry {
        usage: u64,
        physical: u64,
    }

    fn queries() -> Vec<BulkQuery<String, Entry>> {
        vec![
            BulkQuery {
                description: "usage by project",
                expression: "usage".into(),
                key: |sample| sample.label("project_id").map(str::to_string),
                fill: |entry, sample| entry.usage = sample.value as u64,
            },
            BulkQuery {
                description: "physical usage by project",
                expression: "physical".into(),
                key: |sample| sample.label("project_id").map(str::to_string),
                fill: |entry, sample| entry.physical = sample.value as u64,
            },
        ]
    }

    #[tokio::test]
    async fn folds_all_queries_into_one_map() {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
        });
        let cache = BulkMetricCache::new(source.clone(), queries());
        let ctx = ScrapeContext::new();

        let snapshot = cache.get(&ctx).await.unwrap();
        assert_eq!(
            snapshot.get("p1"),
            Some(&Entry {
                usage: 10,
                physical: 3
            })
        );
        assert_eq!(
            snapshot.get("p2"),
            Some(&Entry {
                usage: 20,
                physical: 0
            })
        );
    }

    #[tokio::test]
    async fn serves_snapshots_without_re_querying_inside_ttl() {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
        });
        let cache = BulkMetricCache::new(source.clone(), queries());
        let ctx = ScrapeContext::new();

        cache.get(&ctx).await.unwrap();
        cache.get(&ctx).await.unwrap();
        cache.get(&ctx).await.unwrap();

        // Two queries, executed exactly once.
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn zero_ttl_refreshes_every_read() {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
        });
        let cache = BulkMetricCache::with_ttl(source.clone(), queries(), Duration::ZERO);
        let ctx = ScrapeContext::new();

        cache.get(&ctx).await.unwrap();
        cache.get(&ctx).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
    }
}

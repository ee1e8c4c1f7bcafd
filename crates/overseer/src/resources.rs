//! Bounded cache of per-customer "which resource streams have data" bitsets,
//! plus the daemon that ages out old samples and evicts the affected
//! entries.

use crate::processor::unix_now;
use lru::LruCache;
use models::{ActiveResources, CustomerId, Resource};
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct ResourceCache {
    pool: sqlx::PgPool,
    cache: Mutex<LruCache<CustomerId, ActiveResources>>,
}

impl ResourceCache {
    pub fn new(pool: sqlx::PgPool, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity is at least one");
        ResourceCache {
            pool,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// The customer's active-stream bitset, filled from the store on a miss.
    pub async fn active_resources(
        &self,
        customer_id: CustomerId,
    ) -> anyhow::Result<ActiveResources> {
        if let Some(cached) = self
            .cache
            .lock()
            .expect("resource cache poisoned")
            .get(&customer_id)
            .copied()
        {
            return Ok(cached);
        }

        let value_types =
            overseer_sql::resources::available_value_types(&self.pool, customer_id).await?;
        let mut active = ActiveResources::new(customer_id);
        for value_type in value_types {
            active.set_active(value_type, true);
        }

        self.cache
            .lock()
            .expect("resource cache poisoned")
            .put(customer_id, active);
        Ok(active)
    }

    /// Writes one sample through to the store, keeping any cached bitset
    /// current.
    pub async fn record(&self, resource: &Resource) -> anyhow::Result<()> {
        overseer_sql::resources::record_resource(&self.pool, resource).await?;

        let mut cache = self.cache.lock().expect("resource cache poisoned");
        if let Some(active) = cache.get_mut(&resource.customer_id) {
            active.set_active(resource.value_type, true);
        }
        Ok(())
    }

    pub fn evict(&self, customer_id: CustomerId) {
        self.cache
            .lock()
            .expect("resource cache poisoned")
            .pop(&customer_id);
    }
}

/// Ages out samples older than `max_age` every `interval`, evicting the
/// cache entry of every customer that lost rows. A zero `max_age` disables
/// purging entirely.
pub async fn serve_purger(
    cache: std::sync::Arc<ResourceCache>,
    interval: Duration,
    max_age: Duration,
    shutdown: CancellationToken,
) {
    if max_age.is_zero() {
        tracing::info!("resource purging is disabled");
        shutdown.cancelled().await;
        return;
    }

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick of a tokio interval is immediate; skip it so a restart
    // does not purge right away.
    ticker.tick().await;

    loop {
        tokio::select! {
            () = shutdown.cancelled() => return,
            _ = ticker.tick() => (),
        }

        let before = unix_now().saturating_sub(max_age.as_secs());
        match overseer_sql::resources::purge_stale_resources(&cache.pool, before).await {
            Ok(customers) => {
                if !customers.is_empty() {
                    tracing::info!(customers = customers.len(), "purged stale resource samples");
                }
                for customer_id in customers {
                    cache.evict(customer_id);
                }
            }
            Err(error) => tracing::error!(%error, "resource purge failed"),
        }
    }
}

//! Geofence region registry with a TTL read cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio::time::Instant;

use fc_core::{CompanyId, GeofenceRegion, RegionId, RegionPatch, RegionScope};

use crate::error::{EngineError, bounded};
use crate::store::Store;

/// Default lifetime of cached region lists.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);

#[derive(Debug)]
struct CachedRegions {
    fetched_at: Instant,
    regions: Arc<[GeofenceRegion]>,
}

#[derive(Debug, Default)]
struct RegionCache {
    /// Bumped on every invalidation.
    epoch: u64,
    entries: HashMap<RegionScope, CachedRegions>,
}

/// Source of truth for geofence definitions.
///
/// Active-region lists are cached per scope for `ttl`. Every write drops the
/// cached lists of the affected company before returning, so the next read
/// observes it.
pub struct GeofenceRegistry {
    store: Arc<dyn Store>,
    ttl: Duration,
    timeout: Duration,
    cache: RwLock<RegionCache>,
}

impl GeofenceRegistry {
    pub fn new(store: Arc<dyn Store>, ttl: Duration, timeout: Duration) -> Self {
        Self {
            store,
            ttl,
            timeout,
            cache: RwLock::new(RegionCache::default()),
        }
    }

    /// Active regions in `scope`, ordered by name then id.
    pub async fn list(&self, scope: &RegionScope) -> Result<Arc<[GeofenceRegion]>, EngineError> {
        let epoch = {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.entries.get(scope) {
                if cached.fetched_at.elapsed() < self.ttl {
                    return Ok(Arc::clone(&cached.regions));
                }
            }
            cache.epoch
        };

        let regions: Arc<[GeofenceRegion]> = bounded(
            self.timeout,
            "list active regions",
            self.store.list_active_regions(scope),
        )
        .await?
        .into();
        tracing::debug!(
            company_id = %scope.company_id,
            count = regions.len(),
            "refreshed region cache"
        );

        let mut cache = self.cache.write().await;
        // A write landed while fetching; the result may predate it.
        if cache.epoch == epoch {
            cache.entries.insert(
                scope.clone(),
                CachedRegions {
                    fetched_at: Instant::now(),
                    regions: Arc::clone(&regions),
                },
            );
        }
        Ok(regions)
    }

    /// All regions in `scope`, bypassing the cache.
    pub async fn list_all(
        &self,
        scope: &RegionScope,
        include_inactive: bool,
    ) -> Result<Vec<GeofenceRegion>, EngineError> {
        bounded(
            self.timeout,
            "list regions",
            self.store.list_regions(scope, include_inactive),
        )
        .await
    }

    /// Looks up a region by id, active or not.
    pub async fn get(&self, id: &RegionId) -> Result<Option<GeofenceRegion>, EngineError> {
        bounded(self.timeout, "get region", self.store.get_region(id)).await
    }

    pub async fn add(&self, region: GeofenceRegion) -> Result<RegionId, EngineError> {
        region.validate()?;
        bounded(self.timeout, "insert region", self.store.insert_region(&region)).await?;
        self.invalidate(&region.company_id).await;
        tracing::info!(region_id = %region.id, name = %region.name, "region added");
        Ok(region.id)
    }

    pub async fn update(
        &self,
        id: &RegionId,
        patch: &RegionPatch,
    ) -> Result<GeofenceRegion, EngineError> {
        let updated = bounded(
            self.timeout,
            "update region",
            self.store.update_region(id, patch, Utc::now()),
        )
        .await?
        .ok_or_else(|| EngineError::RegionNotFound(id.clone()))?;
        self.invalidate(&updated.company_id).await;
        tracing::info!(region_id = %id, "region updated");
        Ok(updated)
    }

    /// Deletes a region definition. Existing time entries keep their region id.
    pub async fn remove(&self, id: &RegionId) -> Result<GeofenceRegion, EngineError> {
        let region = self
            .get(id)
            .await?
            .ok_or_else(|| EngineError::RegionNotFound(id.clone()))?;
        let removed = bounded(self.timeout, "remove region", self.store.remove_region(id)).await?;
        self.invalidate(&region.company_id).await;
        if !removed {
            return Err(EngineError::RegionNotFound(id.clone()));
        }
        tracing::info!(region_id = %id, "region removed");
        Ok(region)
    }

    async fn invalidate(&self, company_id: &CompanyId) {
        let mut cache = self.cache.write().await;
        cache.epoch += 1;
        cache
            .entries
            .retain(|scope, _| &scope.company_id != company_id);
    }
}

//! Per-sample region membership classification.

use std::cmp::Ordering;

use crate::region::GeofenceRegion;
use crate::sample::LocationSample;

/// Decides which region, if any, contains a location sample.
///
/// Implementations must report at most one region and must never report an
/// inactive one. The linear scan is enough for tens of regions; a spatial
/// index can implement this trait without touching callers.
pub trait MembershipDetector: Send + Sync {
    fn detect<'a>(
        &self,
        sample: &LocationSample,
        regions: &'a [GeofenceRegion],
    ) -> Option<&'a GeofenceRegion>;
}

/// Scans every region and applies the accuracy buffer.
///
/// A sample is inside when its distance to the center is at most
/// `radius + accuracy`. Overlaps resolve to the smallest radius, then the
/// nearest center, then the lowest region id.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearDetector;

impl MembershipDetector for LinearDetector {
    fn detect<'a>(
        &self,
        sample: &LocationSample,
        regions: &'a [GeofenceRegion],
    ) -> Option<&'a GeofenceRegion> {
        regions
            .iter()
            .filter(|region| region.active)
            .filter_map(|region| {
                let distance = sample.position.distance_to(&region.center);
                let effective_radius = region.radius_m + sample.accuracy_m;
                (distance <= effective_radius).then_some((region, distance))
            })
            .min_by(|(a, da), (b, db)| more_specific(a, *da, b, *db))
            .map(|(region, _)| region)
    }
}

fn more_specific(a: &GeofenceRegion, da: f64, b: &GeofenceRegion, db: f64) -> Ordering {
    a.radius_m
        .total_cmp(&b.radius_m)
        .then_with(|| da.total_cmp(&db))
        .then_with(|| a.id.cmp(&b.id))
}

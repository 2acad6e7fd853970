//! Vues dérivées sur l'ensemble des poubelles : distance, filtres, stats.

use crate::alerts::{Condition, Observation};
use crate::models::Bin;
use crate::status::BinStatus;
use serde::Serialize;
use time::{Duration, OffsetDateTime};

const EARTH_RADIUS_KM: f64 = 6371.0;
pub const NEARBY_MAX_RESULTS: usize = 20;

/// Distance haversine en km, arrondie à 0.1
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    (EARTH_RADIUS_KM * c * 10.0).round() / 10.0
}

#[derive(Debug, Clone, Serialize)]
pub struct NearbyBin {
    #[serde(flatten)]
    pub bin: Bin,
    pub distance_km: f64,
}

/// Poubelles dans `radius_km`, les plus proches d'abord
pub fn nearby(bins: Vec<Bin>, lat: f64, lon: f64, radius_km: f64) -> Vec<NearbyBin> {
    let mut found: Vec<NearbyBin> = bins
        .into_iter()
        .map(|bin| {
            let distance_km = haversine_km(lat, lon, bin.latitude, bin.longitude);
            NearbyBin { bin, distance_km }
        })
        .filter(|n| n.distance_km <= radius_km)
        .collect();
    found.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
    found.truncate(NEARBY_MAX_RESULTS);
    found
}

#[derive(Debug, Clone, Default)]
pub struct BinFilter {
    pub area: Option<String>,
    pub status: Option<BinStatus>,
}

impl BinFilter {
    pub fn matches(&self, bin: &Bin) -> bool {
        if let Some(area) = &self.area {
            if !bin.area.to_lowercase().contains(&area.to_lowercase()) {
                return false;
            }
        }
        self.status.map_or(true, |s| bin.status == s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FleetStats {
    pub total: usize,
    pub normal: usize,
    pub half: usize,
    pub overflow: usize,
    pub average_fill: f64,
    pub inactive: usize,
}

pub fn fleet_stats(bins: &[Bin], inactivity_window: Duration, now: OffsetDateTime) -> FleetStats {
    let count = |status: BinStatus| bins.iter().filter(|b| b.status == status).count();
    let stale = Condition::Inactive { window: inactivity_window };
    let average_fill = if bins.is_empty() {
        0.0
    } else {
        let sum: f64 = bins.iter().map(|b| b.fill_level).sum();
        (sum / bins.len() as f64 * 10.0).round() / 10.0
    };

    FleetStats {
        total: bins.len(),
        normal: count(BinStatus::Normal),
        half: count(BinStatus::Half),
        overflow: count(BinStatus::Overflow),
        average_fill,
        inactive: bins.iter().filter(|b| stale.holds(&Observation::of_bin(b), now)).count(),
    }
}

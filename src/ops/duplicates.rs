use std::collections::{BTreeMap, HashSet};

use crate::model::item::Item;

/// Coordinates are compared after rounding to this many decimal places
/// (about 11 cm at the equator).
pub const COORDINATE_DECIMALS: i32 = 6;

/// Rounded (latitude, longitude) in millionths of a degree
pub type CoordinateKey = (i64, i64);

const MAX_LATITUDE: f64 = 90.0;
const MAX_LONGITUDE: f64 = 180.0;

/// Items sharing one rounded coordinate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateCluster {
    pub key: CoordinateKey,
    pub item_ids: Vec<String>,
}

impl DuplicateCluster {
    /// The cluster's coordinate as `lat,long` with six decimals.
    pub fn coordinate_label(&self) -> String {
        let scale = 10f64.powi(COORDINATE_DECIMALS);
        format!(
            "{:.6},{:.6}",
            self.key.0 as f64 / scale,
            self.key.1 as f64 / scale
        )
    }
}

/// Parse one coordinate. Missing, non-numeric, non-finite, exactly-zero and
/// out-of-range values are "no coordinate".
fn parse_coordinate(raw: Option<&str>, max_abs: f64) -> Option<f64> {
    let value = raw?.trim().parse::<f64>().ok()?;
    if !value.is_finite() || value == 0.0 || value.abs() > max_abs {
        return None;
    }
    Some(value)
}

fn round_coordinate(value: f64) -> i64 {
    (value * 10f64.powi(COORDINATE_DECIMALS)).round() as i64
}

/// The clustering key for an item, if it has a usable coordinate pair.
pub fn coordinate_key(item: &Item) -> Option<CoordinateKey> {
    let lat = parse_coordinate(item.latitude.as_deref(), MAX_LATITUDE)?;
    let long = parse_coordinate(item.longitude.as_deref(), MAX_LONGITUDE)?;
    Some((round_coordinate(lat), round_coordinate(long)))
}

/// Every cluster of two or more items, ordered by coordinate; ids keep the
/// collection's order.
pub fn duplicate_clusters(items: &[Item]) -> Vec<DuplicateCluster> {
    let mut by_key: BTreeMap<CoordinateKey, Vec<String>> = BTreeMap::new();
    for item in items {
        if let Some(key) = coordinate_key(item) {
            by_key.entry(key).or_default().push(item.id.clone());
        }
    }
    by_key
        .into_iter()
        .filter(|(_, ids)| ids.len() > 1)
        .map(|(key, item_ids)| DuplicateCluster { key, item_ids })
        .collect()
}

/// Ids of every item that shares a rounded coordinate with another item.
pub fn find_duplicates(items: &[Item]) -> HashSet<String> {
    duplicate_clusters(items)
        .into_iter()
        .flat_map(|c| c.item_ids)
        .collect()
}

//! Filtered and distance-sorted views over an emergency snapshot.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use shared::domain::{DeviceId, Emergency, Gender};

use crate::{
    geo::{format_distance, LatLng},
    render::{default_emergency_style, MarkerStyle},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl FromStr for SortDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            other => Err(format!("unknown sort direction '{other}' (expected asc or desc)")),
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Asc => f.write_str("asc"),
            Self::Desc => f.write_str("desc"),
        }
    }
}

/// Which emergencies the list and map show, and in what order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewFilter {
    pub gender: Option<Gender>,
    pub min_age: Option<u32>,
    pub max_age: Option<u32>,
    pub distance_sort: Option<SortDirection>,
    /// Restricts everything to a single device (shared tracking links).
    pub identity: Option<DeviceId>,
}

impl ViewFilter {
    pub fn for_identity(id: DeviceId) -> Self {
        Self {
            identity: Some(id),
            ..Self::default()
        }
    }

    pub fn admits_identity(&self, emergency: &Emergency) -> bool {
        self.identity
            .as_ref()
            .map_or(true, |id| &emergency.device_id == id)
    }

    pub fn restrict_to_identity(&self, snapshot: Vec<Emergency>) -> Vec<Emergency> {
        if self.identity.is_none() {
            return snapshot;
        }
        snapshot
            .into_iter()
            .filter(|emergency| self.admits_identity(emergency))
            .collect()
    }

    /// Gender is an exact match; age bounds are inclusive.
    pub fn matches(&self, emergency: &Emergency) -> bool {
        if self.gender.is_some_and(|gender| emergency.gender != gender) {
            return false;
        }
        if self.min_age.is_some_and(|min| emergency.age < min) {
            return false;
        }
        if self.max_age.is_some_and(|max| emergency.age > max) {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListEntry {
    pub emergency: Emergency,
    pub style: MarkerStyle,
    pub distance_m: Option<f64>,
    pub distance_label: Option<String>,
}

impl ListEntry {
    fn new(emergency: Emergency, reference: Option<LatLng>) -> Self {
        let distance_m =
            reference.map(|origin| origin.distance_to(LatLng::new(emergency.lat, emergency.lon)));
        Self {
            style: default_emergency_style(&emergency),
            distance_label: distance_m.map(format_distance),
            distance_m,
            emergency,
        }
    }
}

/// Applies the attribute filters and, when both a direction and a reference
/// point are known, a stable distance sort. Entries at equal distance keep
/// their snapshot order.
pub fn derive_view(
    snapshot: &[Emergency],
    filter: &ViewFilter,
    reference: Option<LatLng>,
) -> Vec<ListEntry> {
    let mut entries: Vec<ListEntry> = snapshot
        .iter()
        .filter(|emergency| filter.matches(emergency))
        .map(|emergency| ListEntry::new(emergency.clone(), reference))
        .collect();

    if let (Some(direction), Some(_)) = (filter.distance_sort, reference) {
        entries.sort_by(|a, b| {
            let a = a.distance_m.unwrap_or_default();
            let b = b.distance_m.unwrap_or_default();
            match direction {
                SortDirection::Asc => a.total_cmp(&b),
                SortDirection::Desc => b.total_cmp(&a),
            }
        });
    }

    entries
}

#[cfg(test)]
#[path = "tests/filter_tests.rs"]
mod tests;

//! An availability-zone keyed map with deterministic iteration order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::data::{CapacityData, UsageData};
use crate::ids::AvailabilityZone;

/// Mapping from availability zone to a payload.
///
/// Backed by a `BTreeMap` so that iteration over AZs is deterministic; the
/// capacity engines rely on this to produce repeatable results for the same
/// input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PerAz<T>(BTreeMap<AvailabilityZone, T>);

impl<T> Default for PerAz<T> {
    fn default() -> Self {
        Self(BTreeMap::new())
    }
}

impl<T> PerAz<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// A single-entry map under the `any` pseudo-AZ, for flat resources.
    pub fn flat(value: T) -> Self {
        let mut map = BTreeMap::new();
        map.insert(AvailabilityZone::any(), value);
        Self(map)
    }

    /// Zero-initializes one entry per given AZ.
    pub fn from_real<'a>(azs: impl IntoIterator<Item = &'a AvailabilityZone>) -> Self
    where
        T: Default,
    {
        Self(
            azs.into_iter()
                .map(|az| (az.clone(), T::default()))
                .collect(),
        )
    }

    pub fn insert(&mut self, zone: AvailabilityZone, value: T) -> Option<T> {
        self.0.insert(zone, value)
    }

    pub fn get(&self, zone: &AvailabilityZone) -> Option<&T> {
        self.0.get(zone)
    }

    pub fn get_mut(&mut self, zone: &AvailabilityZone) -> Option<&mut T> {
        self.0.get_mut(zone)
    }

    pub fn entry_or_default(&mut self, zone: AvailabilityZone) -> &mut T
    where
        T: Default,
    {
        self.0.entry(zone).or_default()
    }

    pub fn contains(&self, zone: &AvailabilityZone) -> bool {
        self.0.contains_key(zone)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &AvailabilityZone> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AvailabilityZone, &T)> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&AvailabilityZone, &mut T)> {
        self.0.iter_mut()
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.0.values()
    }
}

impl<T> FromIterator<(AvailabilityZone, T)> for PerAz<T> {
    fn from_iter<I: IntoIterator<Item = (AvailabilityZone, T)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<T> IntoIterator for PerAz<T> {
    type Item = (AvailabilityZone, T);
    type IntoIter = std::collections::btree_map::IntoIter<AvailabilityZone, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl PerAz<CapacityData> {
    /// Sum of raw capacity across all AZs.
    pub fn total_capacity(&self) -> u64 {
        self.0.values().map(|data| data.capacity).sum()
    }
}

impl PerAz<UsageData> {
    /// Sum of usage across all AZs.
    pub fn total_usage(&self) -> u64 {
        self.0.values().map(|data| data.usage).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iteration_order_is_sorted_by_zone() {
        let mut map = PerAz::new();
        map.insert(AvailabilityZone::from("az-2"), 2u64);
        map.insert(AvailabilityZone::from("az-1"), 1u64);
        map.insert(AvailabilityZone::unknown(), 3u64);

        let zones: Vec<_> = map.keys().map(|az| az.to_string()).collect();
        assert_eq!(zones, vec!["az-1", "az-2", "unknown"]);
    }

    #[test]
    fn flat_holds_a_single_any_entry() {
        let map = PerAz::flat(CapacityData::new(100));
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&AvailabilityZone::any()).unwrap().capacity, 100);
        assert_eq!(map.total_capacity(), 100);
    }
}

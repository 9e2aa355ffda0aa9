//! Distribution of project usage over availability zones.

use std::collections::BTreeMap;

use crate::data::UsageData;
use crate::ids::AvailabilityZone;
use crate::peraz::PerAz;

/// Builds a per-AZ usage breakdown from a total and an optional localized
/// breakdown.
///
/// Without a breakdown, non-zero usage lands under `unknown` and zero usage
/// under `any`. With a breakdown, all known AZs are zero-initialized, each
/// localized amount is added to its AZ (or to `unknown` when the label is not
/// a known AZ), and any remainder of the total that the breakdown does not
/// account for is also attributed to `unknown`.
pub fn usage_breakdown(
    total: u64,
    localized: Option<&BTreeMap<AvailabilityZone, u64>>,
    all_azs: &[AvailabilityZone],
) -> PerAz<UsageData> {
    let Some(localized) = localized else {
        if total == 0 {
            return PerAz::flat(UsageData::new(0));
        }
        let mut map = PerAz::new();
        map.insert(AvailabilityZone::unknown(), UsageData::new(total));
        return map;
    };

    let mut map: PerAz<UsageData> = PerAz::from_real(all_azs);
    let mut accounted = 0u64;
    for (zone, amount) in localized {
        accounted = accounted.saturating_add(*amount);
        let target = if all_azs.contains(zone) {
            zone.clone()
        } else {
            AvailabilityZone::unknown()
        };
        map.entry_or_default(target).usage += amount;
    }

    let leftover = total.saturating_sub(accounted);
    if leftover > 0 {
        map.entry_or_default(AvailabilityZone::unknown()).usage += leftover;
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    fn azs(labels: &[&str]) -> Vec<AvailabilityZone> {
        labels.iter().map(|l| AvailabilityZone::from(*l)).collect()
    }

    #[test]
    fn unknown_breakdown_with_usage_goes_to_unknown() {
        let map = usage_breakdown(12, None, &azs(&["az-1", "az-2"]));
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&AvailabilityZone::unknown()).unwrap().usage, 12);
    }

    #[test]
    fn unknown_breakdown_without_usage_goes_to_any() {
        let map = usage_breakdown(0, None, &azs(&["az-1"]));
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&AvailabilityZone::any()).unwrap().usage, 0);
    }

    #[test]
    fn localized_usage_zero_initializes_known_azs() {
        let all = azs(&["az-1", "az-2"]);
        let localized = BTreeMap::from([(AvailabilityZone::from("az-1"), 5u64)]);
        let map = usage_breakdown(5, Some(&localized), &all);

        assert_eq!(map.get(&AvailabilityZone::from("az-1")).unwrap().usage, 5);
        assert_eq!(map.get(&AvailabilityZone::from("az-2")).unwrap().usage, 0);
        assert!(map.get(&AvailabilityZone::unknown()).is_none());
    }

    #[test]
    fn unmatched_labels_and_leftovers_go_to_unknown() {
        let all = azs(&["az-1"]);
        let localized = BTreeMap::from([
            (AvailabilityZone::from("az-1"), 3u64),
            (AvailabilityZone::from("az-9"), 2u64),
        ]);
        let map = usage_breakdown(9, Some(&localized), &all);

        assert_eq!(map.get(&AvailabilityZone::from("az-1")).unwrap().usage, 3);
        // 2 from the unmatched label, 4 unaccounted for by the breakdown.
        assert_eq!(map.get(&AvailabilityZone::unknown()).unwrap().usage, 6);
    }
}

use std::collections::{BTreeMap, BTreeSet};

use crate::aggregate::mean;
use crate::models::{BaselinePolicy, MonthlyAverage, OrgId};
use crate::month::MonthKey;

pub type OrgSeries = BTreeMap<OrgId, MonthlyAverage>;

/// Peer or global average per month. Recomputed on every call; a month with no
/// eligible value is left out.
pub fn baseline(by_org: &OrgSeries, policy: BaselinePolicy, acting: &str) -> MonthlyAverage {
    let months: BTreeSet<MonthKey> = by_org.values().flat_map(|map| map.keys().copied()).collect();

    months
        .into_iter()
        .filter_map(|month| {
            let pool: Vec<f64> = by_org
                .iter()
                .filter(|(org, _)| policy.includes(org, acting))
                .filter_map(|(_, map)| map.get(&month).copied())
                .collect();
            mean(&pool).map(|avg| (month, avg))
        })
        .collect()
}

/// Comparison value for whole-period scores: mean of the eligible
/// organizations' scores, skipping organizations with no score.
pub fn peer_score(
    scores: &BTreeMap<OrgId, Option<f64>>,
    policy: BaselinePolicy,
    acting: &str,
) -> Option<f64> {
    let pool: Vec<f64> = scores
        .iter()
        .filter(|(org, _)| policy.includes(org, acting))
        .filter_map(|(_, score)| *score)
        .collect();
    mean(&pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn march() -> MonthKey {
        MonthKey::new(2026, 3).unwrap()
    }

    fn series(values: &[(&str, f64)]) -> OrgSeries {
        values
            .iter()
            .map(|(org, value)| {
                let mut map = MonthlyAverage::new();
                map.insert(march(), *value);
                (org.to_string(), map)
            })
            .collect()
    }

    #[test]
    fn include_policy_averages_every_org() {
        let by_org = series(&[("org1", 2.0), ("org2", 3.0), ("org3", 4.0), ("org4", 5.0)]);
        let result = baseline(&by_org, BaselinePolicy::IncludeCurrentOrganization, "org1");
        assert!((result[&march()] - 3.5).abs() < 1e-9);
    }

    #[test]
    fn exclude_policy_drops_the_acting_org() {
        let by_org = series(&[("org1", 2.0), ("org2", 3.0), ("org3", 4.0), ("org4", 5.0)]);
        let result = baseline(&by_org, BaselinePolicy::ExcludeCurrentOrganization, "org1");
        assert!((result[&march()] - 4.0).abs() < 1e-9);
    }

    #[test]
    fn month_only_the_acting_org_has_is_omitted() {
        let mut by_org = series(&[("org2", 3.0)]);
        let april = MonthKey::new(2026, 4).unwrap();
        by_org.entry("org1".to_string()).or_default().insert(april, 5.0);

        let peers = baseline(&by_org, BaselinePolicy::ExcludeCurrentOrganization, "org1");
        assert!(!peers.contains_key(&april));
        assert_eq!(peers.get(&march()), Some(&3.0));

        let all = baseline(&by_org, BaselinePolicy::IncludeCurrentOrganization, "org1");
        assert_eq!(all.get(&april), Some(&5.0));
    }

    #[test]
    fn peer_score_skips_missing_scores() {
        let scores: BTreeMap<OrgId, Option<f64>> = [
            ("org1".to_string(), Some(4.0)),
            ("org2".to_string(), None),
            ("org3".to_string(), Some(2.0)),
        ]
        .into_iter()
        .collect();
        assert_eq!(
            peer_score(&scores, BaselinePolicy::ExcludeCurrentOrganization, "org1"),
            Some(2.0)
        );
        assert_eq!(
            peer_score(&scores, BaselinePolicy::IncludeCurrentOrganization, "org1"),
            Some(3.0)
        );
        assert_eq!(
            peer_score(&scores, BaselinePolicy::ExcludeCurrentOrganization, "org3"),
            Some(4.0)
        );
    }
}

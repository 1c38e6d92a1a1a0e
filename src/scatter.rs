use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::aggregate::mean;
use crate::error::SelectorError;
use crate::models::{MonthlyAverage, Provenance, ScatterPoint, SubConstructKey, SurveyRow, SurveySet};
use crate::month::MonthKey;

pub const SCORE_MIN: f64 = 0.0;
pub const SCORE_MAX: f64 = 6.0;

const GROUP_PREFIX: &str = "group";

/// One axis of a scatter plot: a single question of a single set, or the
/// pooled average of every set sharing a sub-construct key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Selector {
    Item { set: usize, question: usize },
    SubConstruct(SubConstructKey),
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Item { set, question } => write!(f, "{set}::{question}"),
            Selector::SubConstruct(key) => write!(f, "{GROUP_PREFIX}::{key}"),
        }
    }
}

impl FromStr for Selector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || SelectorError::Malformed(s.to_string());
        let (left, right) = s.trim().split_once("::").ok_or_else(malformed)?;
        if left == GROUP_PREFIX {
            let mut chars = right.chars();
            return match (chars.next(), chars.next()) {
                (Some(key), None) if key.is_alphanumeric() || key == '_' => {
                    Ok(Selector::SubConstruct(SubConstructKey::new(key)))
                }
                _ => Err(malformed()),
            };
        }
        let set = left.parse::<usize>().map_err(|_| malformed())?;
        let question = right.parse::<usize>().map_err(|_| malformed())?;
        Ok(Selector::Item { set, question })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogEntry {
    pub id: String,
    pub selector: Selector,
    pub source: String,
    pub question: String,
}

/// The scatter view's survey sets, grouped by sub-construct key.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectorCatalog {
    sets: Vec<SurveySet>,
    groups: BTreeMap<SubConstructKey, Vec<usize>>,
}

impl SelectorCatalog {
    pub fn new(sets: Vec<SurveySet>) -> Self {
        let mut groups: BTreeMap<SubConstructKey, Vec<usize>> = BTreeMap::new();
        for (index, set) in sets.iter().enumerate() {
            if let Some(key) = set.sub_construct() {
                groups.entry(key).or_default().push(index);
            }
        }
        Self { sets, groups }
    }

    pub fn sets(&self) -> &[SurveySet] {
        &self.sets
    }

    pub fn group_keys(&self) -> impl Iterator<Item = SubConstructKey> + '_ {
        self.groups.keys().copied()
    }

    pub fn sets_in(&self, key: SubConstructKey) -> impl Iterator<Item = &SurveySet> + '_ {
        self.groups
            .get(&key)
            .into_iter()
            .flatten()
            .filter_map(|index| self.sets.get(*index))
    }

    pub fn group_name(&self, key: SubConstructKey) -> String {
        let name = self
            .sets_in(key)
            .next()
            .map(SurveySet::display_name)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "Sub-construct".to_string());
        format!("({key}) {name}")
    }

    /// Sub-construct averages first, in key order, then every question of every set.
    pub fn entries(&self) -> Vec<CatalogEntry> {
        let groups = self.group_keys().map(|key| {
            let selector = Selector::SubConstruct(key);
            CatalogEntry {
                id: selector.to_string(),
                selector,
                source: format!("{} — Sub-construct Average", self.group_name(key)),
                question: "Average of sub-construct".to_string(),
            }
        });
        let items = self.sets.iter().enumerate().flat_map(|(set_index, set)| {
            set.questions.iter().enumerate().map(move |(question_index, question)| {
                let selector = Selector::Item {
                    set: set_index,
                    question: question_index,
                };
                CatalogEntry {
                    id: selector.to_string(),
                    selector,
                    source: set.label.clone(),
                    question: question.clone(),
                }
            })
        });
        groups.chain(items).collect()
    }

    pub fn validate(&self, selector: Selector) -> Result<Selector, SelectorError> {
        match selector {
            Selector::Item { set, question } => {
                let survey_set = self.sets.get(set).ok_or(SelectorError::UnknownSet(set))?;
                if question >= survey_set.questions.len() {
                    return Err(SelectorError::UnknownQuestion { set, question });
                }
            }
            Selector::SubConstruct(key) => {
                if !self.groups.contains_key(&key) {
                    return Err(SelectorError::UnknownSubConstruct(key.to_string()));
                }
            }
        }
        Ok(selector)
    }

    pub fn resolve(&self, id: &str) -> Result<Selector, SelectorError> {
        self.validate(id.parse()?)
    }

    /// Set and question text of a validated item selector.
    pub fn item(&self, set: usize, question: usize) -> Option<(&SurveySet, &str)> {
        let survey_set = self.sets.get(set)?;
        let text = survey_set.questions.get(question)?;
        Some((survey_set, text.as_str()))
    }

    pub fn pairing(&self, x: Selector, y: Selector) -> Pairing {
        match (x, y) {
            (Selector::Item { set: sx, .. }, Selector::Item { set: sy, .. }) => {
                match (self.sets.get(sx), self.sets.get(sy)) {
                    (Some(a), Some(b)) if a.shares_file_with(b) => Pairing::Row,
                    _ => Pairing::Month,
                }
            }
            _ => Pairing::Month,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Pairing {
    /// Both values read from the same response row.
    Row,
    /// Monthly aggregates matched on month key.
    Month,
}

/// One point per row that answered both questions numerically.
pub fn pair_rows(rows: &[SurveyRow], x_question: &str, y_question: &str, org: &str) -> Vec<ScatterPoint> {
    rows.iter()
        .enumerate()
        .filter_map(|(index, row)| {
            let x = row.numeric(x_question)?;
            let y = row.numeric(y_question)?;
            Some(ScatterPoint {
                x,
                y,
                provenance: Provenance::Row {
                    org: org.to_string(),
                    index,
                    date: row.date.clone(),
                },
            })
        })
        .collect()
}

/// One point per month present in both maps.
pub fn pair_months(x: &MonthlyAverage, y: &MonthlyAverage) -> Vec<ScatterPoint> {
    x.iter()
        .filter_map(|(month, x_value)| {
            let y_value = y.get(month)?;
            Some(ScatterPoint {
                x: *x_value,
                y: *y_value,
                provenance: Provenance::Month(*month),
            })
        })
        .collect()
}

/// Per-month mean of several organizations' monthly values.
pub fn pool_months<'a, I>(maps: I) -> MonthlyAverage
where
    I: IntoIterator<Item = &'a MonthlyAverage>,
{
    let mut pool: BTreeMap<MonthKey, Vec<f64>> = BTreeMap::new();
    for map in maps {
        for (month, value) in map {
            pool.entry(*month).or_default().push(*value);
        }
    }
    pool.into_iter()
        .filter_map(|(month, values)| mean(&values).map(|avg| (month, avg)))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
}

impl LinearFit {
    /// Ordinary least squares. `None` for fewer than two points or when every
    /// x is the same.
    pub fn from_points(points: &[ScatterPoint]) -> Option<Self> {
        if points.len() < 2 {
            return None;
        }
        let n = points.len() as f64;
        let mean_x = points.iter().map(|p| p.x).sum::<f64>() / n;
        let mean_y = points.iter().map(|p| p.y).sum::<f64>() / n;
        let sxx: f64 = points.iter().map(|p| (p.x - mean_x).powi(2)).sum();
        let scale: f64 = points.iter().map(|p| p.x * p.x).sum();
        if sxx <= f64::EPSILON * scale {
            return None;
        }
        let sxy: f64 = points.iter().map(|p| (p.x - mean_x) * (p.y - mean_y)).sum();
        let slope = sxy / sxx;
        Some(Self {
            slope,
            intercept: mean_y - slope * mean_x,
        })
    }

    pub fn at(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }

    /// Endpoints across the score axis with y clamped into it.
    pub fn segment(&self) -> [(f64, f64); 2] {
        [SCORE_MIN, SCORE_MAX].map(|x| (x, self.at(x).clamp(SCORE_MIN, SCORE_MAX)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScatterPairs {
    pub pairing: Pairing,
    pub org_points: Vec<ScatterPoint>,
    pub peer_points: Vec<ScatterPoint>,
    pub org_fit: Option<LinearFit>,
    pub peer_fit: Option<LinearFit>,
}

impl ScatterPairs {
    pub fn new(pairing: Pairing, org_points: Vec<ScatterPoint>, peer_points: Vec<ScatterPoint>) -> Self {
        Self {
            pairing,
            org_fit: LinearFit::from_points(&org_points),
            peer_fit: LinearFit::from_points(&peer_points),
            org_points,
            peer_points,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn month(year: i32, m: u32) -> MonthKey {
        MonthKey::new(year, m).unwrap()
    }

    fn set(label: &str, locator: &str, questions: &[&str]) -> SurveySet {
        SurveySet {
            label: label.to_string(),
            locator: locator.to_string(),
            questions: questions.iter().map(|q| q.to_string()).collect(),
            color: None,
        }
    }

    fn catalog() -> SelectorCatalog {
        SelectorCatalog::new(vec![
            set("(B) Leader Practice — Leaders", "orgdata/{org}_leader.csv", &["l1"]),
            set("(A) HQIM Coherence — Teachers", "orgdata/{org}_teacher.csv", &["t1", "t2"]),
            set("(A) HQIM Coherence — Walkthrough", "orgdata/{org}_walk.csv", &["w1"]),
            set("Unkeyed set", "orgdata/{org}_teacher.csv", &["t3"]),
        ])
    }

    fn point(x: f64, y: f64) -> ScatterPoint {
        ScatterPoint {
            x,
            y,
            provenance: Provenance::Month(month(2026, 1)),
        }
    }

    #[test]
    fn same_file_rows_pair_only_when_both_present() {
        let rows = vec![
            SurveyRow::new("01/03/2026", [("q1", "4"), ("q2", "3")]),
            SurveyRow::new("02/03/2026", [("q1", ""), ("q2", "5")]),
        ];
        let points = pair_rows(&rows, "q1", "q2", "org1");
        assert_eq!(points.len(), 1);
        assert_eq!((points[0].x, points[0].y), (4.0, 3.0));
        assert!(matches!(points[0].provenance, Provenance::Row { index: 0, .. }));
    }

    #[test]
    fn different_files_pair_on_shared_months() {
        let x: MonthlyAverage = [(month(2026, 3), 3.0), (month(2026, 4), 2.0)].into_iter().collect();
        let y: MonthlyAverage = [(month(2026, 3), 4.0)].into_iter().collect();
        let points = pair_months(&x, &y);
        assert_eq!(points, vec![ScatterPoint {
            x: 3.0,
            y: 4.0,
            provenance: Provenance::Month(month(2026, 3)),
        }]);
    }

    #[test]
    fn pairing_mode_follows_the_underlying_file() {
        let catalog = catalog();
        let teacher_q1 = Selector::Item { set: 1, question: 0 };
        let teacher_q2 = Selector::Item { set: 1, question: 1 };
        let same_file_other_set = Selector::Item { set: 3, question: 0 };
        let leader = Selector::Item { set: 0, question: 0 };
        let group = Selector::SubConstruct(SubConstructKey::new('A'));

        assert_eq!(catalog.pairing(teacher_q1, teacher_q2), Pairing::Row);
        assert_eq!(catalog.pairing(teacher_q1, same_file_other_set), Pairing::Row);
        assert_eq!(catalog.pairing(teacher_q1, leader), Pairing::Month);
        assert_eq!(catalog.pairing(group, teacher_q1), Pairing::Month);
    }

    #[test]
    fn catalog_lists_groups_first_then_items() {
        let ids: Vec<String> = catalog().entries().into_iter().map(|e| e.id).collect();
        assert_eq!(
            ids,
            ["group::A", "group::B", "0::0", "1::0", "1::1", "2::0", "3::0"]
        );
    }

    #[test]
    fn group_names_come_from_the_first_set() {
        let catalog = catalog();
        assert_eq!(catalog.group_name(SubConstructKey::new('A')), "(A) HQIM Coherence");
        assert_eq!(catalog.sets_in(SubConstructKey::new('A')).count(), 2);
        assert_eq!(catalog.group_name(SubConstructKey::new('Z')), "(Z) Sub-construct");
    }

    #[test]
    fn selector_ids_resolve_against_the_catalog() {
        let catalog = catalog();
        assert_eq!(
            catalog.resolve("group::a"),
            Ok(Selector::SubConstruct(SubConstructKey::new('A')))
        );
        assert_eq!(catalog.resolve("1::1"), Ok(Selector::Item { set: 1, question: 1 }));
        assert_eq!(catalog.resolve("9::0"), Err(SelectorError::UnknownSet(9)));
        assert_eq!(
            catalog.resolve("1::5"),
            Err(SelectorError::UnknownQuestion { set: 1, question: 5 })
        );
        assert_eq!(
            catalog.resolve("group::Q"),
            Err(SelectorError::UnknownSubConstruct("Q".to_string()))
        );
        for bad in ["", "1", "x::1", "group::AB", "1::-1"] {
            assert_eq!(catalog.resolve(bad), Err(SelectorError::Malformed(bad.to_string())));
        }
    }

    #[test]
    fn peer_months_average_across_organizations() {
        let a: MonthlyAverage = [(month(2026, 3), 2.0)].into_iter().collect();
        let b: MonthlyAverage = [(month(2026, 3), 4.0), (month(2026, 4), 1.0)].into_iter().collect();
        let pooled = pool_months([&a, &b]);
        assert_eq!(pooled.get(&month(2026, 3)), Some(&3.0));
        assert_eq!(pooled.get(&month(2026, 4)), Some(&1.0));
    }

    #[test]
    fn fit_recovers_a_straight_line() {
        let points = vec![point(1.0, 3.0), point(2.0, 5.0), point(3.0, 7.0)];
        let fit = LinearFit::from_points(&points).unwrap();
        assert!((fit.slope - 2.0).abs() < 1e-9);
        assert!((fit.intercept - 1.0).abs() < 1e-9);
        assert!((fit.at(4.0) - 9.0).abs() < 1e-9);
    }

    #[test]
    fn no_fit_for_too_few_points_or_constant_x() {
        assert!(LinearFit::from_points(&[]).is_none());
        assert!(LinearFit::from_points(&[point(2.0, 3.0)]).is_none());
        assert!(LinearFit::from_points(&[point(2.0, 3.0), point(2.0, 5.0)]).is_none());
    }

    #[test]
    fn small_x_spread_still_fits() {
        let points = vec![point(1e-9, 1.0), point(2e-9, 2.0), point(3e-9, 3.0)];
        let fit = LinearFit::from_points(&points).unwrap();
        assert!((fit.slope / 1e9 - 1.0).abs() < 1e-6);
        assert!(LinearFit::from_points(&[point(0.0, 1.0), point(0.0, 2.0)]).is_none());
    }

    #[test]
    fn segment_is_clamped_to_score_axis() {
        let fit = LinearFit {
            slope: 2.0,
            intercept: -1.0,
        };
        let [start, end] = fit.segment();
        assert_eq!(start, (0.0, 0.0));
        assert_eq!(end, (6.0, 6.0));
    }

    #[test]
    fn pairs_carry_independent_fits() {
        let pairs = ScatterPairs::new(
            Pairing::Month,
            vec![point(1.0, 1.0), point(2.0, 2.0)],
            vec![point(1.0, 1.0)],
        );
        assert!(pairs.org_fit.is_some());
        assert!(pairs.peer_fit.is_none());
    }
}

use std::collections::BTreeMap;

use serde::Serialize;

use crate::aggregate::{align, month_axis, monthly_average, question_monthly, set_score};
use crate::baseline::{baseline, peer_score, OrgSeries};
use crate::cache::Rows;
use crate::models::{BaselinePolicy, MonthlyAverage, OrgId, SubConstructKey, SurveySet};
use crate::month::MonthKey;

/// Rows of one survey set for every organization, keyed by organization id.
pub type RowsByOrg = BTreeMap<OrgId, Rows>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SetTrend {
    pub label: String,
    pub color: Option<String>,
    pub sub_construct: Option<SubConstructKey>,
    /// Position of this set among the sets sharing its sub-construct; picks the
    /// dash pattern and marker glyph.
    pub style_slot: usize,
    pub questions: Vec<String>,
    pub org: Vec<Option<f64>>,
    pub baseline: Vec<Option<f64>>,
    pub org_by_question: Vec<Vec<Option<f64>>>,
    pub peer_by_question: Vec<Vec<Option<f64>>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendView {
    pub organization: OrgId,
    pub policy: BaselinePolicy,
    pub months: Vec<MonthKey>,
    pub sets: Vec<SetTrend>,
}

struct SetSeries<'a> {
    set: &'a SurveySet,
    org: MonthlyAverage,
    baseline: MonthlyAverage,
    org_by_question: Vec<MonthlyAverage>,
    peer_by_question: Vec<MonthlyAverage>,
}

fn set_series<'a>(
    set: &'a SurveySet,
    rows: &RowsByOrg,
    policy: BaselinePolicy,
    acting: &str,
) -> SetSeries<'a> {
    let by_org: OrgSeries = rows
        .iter()
        .map(|(org, rows)| (org.clone(), monthly_average(rows, Some(set.questions.as_slice()))))
        .collect();
    let own_rows = rows.get(acting).map(|rows| &rows[..]).unwrap_or_default();
    let peer_rows = || {
        rows.iter()
            .filter(|(org, _)| policy.includes(org, acting))
            .flat_map(|(_, rows)| rows.iter())
    };

    SetSeries {
        set,
        baseline: baseline(&by_org, policy, acting),
        org: by_org.get(acting).cloned().unwrap_or_default(),
        org_by_question: set
            .questions
            .iter()
            .map(|question| question_monthly(own_rows, question))
            .collect(),
        peer_by_question: set
            .questions
            .iter()
            .map(|question| question_monthly(peer_rows(), question))
            .collect(),
    }
}

/// Org and baseline series for every set on the acting organization's month axis.
pub fn build_trend(
    sets: &[(SurveySet, RowsByOrg)],
    policy: BaselinePolicy,
    acting: &str,
) -> TrendView {
    let series: Vec<SetSeries> = sets
        .iter()
        .map(|(set, rows)| set_series(set, rows, policy, acting))
        .collect();
    let months = month_axis(series.iter().map(|s| &s.org));

    let mut slots: BTreeMap<Option<SubConstructKey>, usize> = BTreeMap::new();
    let sets = series
        .into_iter()
        .map(|s| {
            let sub_construct = s.set.sub_construct();
            let slot = slots.entry(sub_construct).or_insert(0);
            let style_slot = *slot;
            *slot += 1;
            SetTrend {
                label: s.set.label.clone(),
                color: s.set.color.clone(),
                sub_construct,
                style_slot,
                questions: s.set.questions.clone(),
                org: align(&s.org, &months),
                baseline: align(&s.baseline, &months),
                org_by_question: s.org_by_question.iter().map(|map| align(map, &months)).collect(),
                peer_by_question: s.peer_by_question.iter().map(|map| align(map, &months)).collect(),
            }
        })
        .collect();

    TrendView {
        organization: acting.to_string(),
        policy,
        months,
        sets,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RadarAxis {
    pub label: String,
    pub org_score: Option<f64>,
    pub peer_score: Option<f64>,
    pub org_leads: bool,
}

/// Whole-period comparison of one survey set. A missing side never leads.
pub fn build_radar_axis(
    set: &SurveySet,
    rows: &RowsByOrg,
    policy: BaselinePolicy,
    acting: &str,
) -> RadarAxis {
    let scores: BTreeMap<OrgId, Option<f64>> = rows
        .iter()
        .map(|(org, rows)| (org.clone(), set_score(rows, &set.questions)))
        .collect();
    let org_score = scores.get(acting).copied().flatten();
    let peer = peer_score(&scores, policy, acting);
    let org_leads = match (org_score, peer) {
        (Some(org), Some(peer)) => org >= peer,
        (Some(_), None) => true,
        (None, _) => false,
    };

    RadarAxis {
        label: set.label.clone(),
        org_score,
        peer_score: peer,
        org_leads,
    }
}

use std::fmt::Write;

use crate::milestone::MilestoneChart;
use crate::month::MonthKey;
use crate::scatter::{Pairing, ScatterPairs};
use crate::views::{RadarAxis, TrendView};

#[derive(Debug, Clone, PartialEq)]
pub struct TrendSummary {
    pub label: String,
    pub latest_month: Option<MonthKey>,
    pub org_value: Option<f64>,
    pub baseline_value: Option<f64>,
}

impl TrendSummary {
    pub fn gap(&self) -> Option<f64> {
        Some(self.org_value? - self.baseline_value?)
    }
}

/// Latest month with an org value for each set, next to the baseline for that month.
pub fn summarize_trend(view: &TrendView) -> Vec<TrendSummary> {
    view.sets
        .iter()
        .map(|set| {
            let latest = set
                .org
                .iter()
                .enumerate()
                .rev()
                .find_map(|(index, value)| value.map(|v| (index, v)));
            TrendSummary {
                label: set.label.clone(),
                latest_month: latest.map(|(index, _)| view.months[index]),
                org_value: latest.map(|(_, value)| value),
                baseline_value: latest.and_then(|(index, _)| set.baseline[index]),
            }
        })
        .collect()
}

fn score(value: Option<f64>) -> String {
    value
        .map(|v| format!("{v:.2}"))
        .unwrap_or_else(|| "n/a".to_string())
}

pub struct ScatterSection<'a> {
    pub x_label: &'a str,
    pub y_label: &'a str,
    pub pairs: &'a ScatterPairs,
}

pub fn build_report(
    construct: &str,
    trend: &TrendView,
    radar: &[RadarAxis],
    milestones: &MilestoneChart,
    scatter: Option<ScatterSection<'_>>,
) -> String {
    let summaries = summarize_trend(trend);
    let mut output = String::new();

    let _ = writeln!(output, "# Survey Pulse Report");
    let _ = writeln!(
        output,
        "Generated for {} on the {} construct (baseline: {})",
        trend.organization,
        construct,
        trend.policy.describe()
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Latest Month vs Baseline");

    if summaries.iter().all(|s| s.latest_month.is_none()) {
        let _ = writeln!(output, "No survey responses recorded for this organization.");
    } else {
        for summary in &summaries {
            match summary.latest_month {
                Some(month) => {
                    let gap = summary
                        .gap()
                        .map(|g| format!(" ({g:+.2})"))
                        .unwrap_or_default();
                    let _ = writeln!(
                        output,
                        "- {} in {}: {} vs baseline {}{}",
                        summary.label,
                        month,
                        score(summary.org_value),
                        score(summary.baseline_value),
                        gap
                    );
                }
                None => {
                    let _ = writeln!(output, "- {}: no responses", summary.label);
                }
            }
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Monthly Trend");

    if trend.months.is_empty() {
        let _ = writeln!(output, "No months to show.");
    } else {
        for set in &trend.sets {
            let _ = writeln!(output, "### {}", set.label);
            let _ = writeln!(output, "| Month | Org | Baseline |");
            let _ = writeln!(output, "|---|---|---|");
            for (index, month) in trend.months.iter().enumerate() {
                let _ = writeln!(
                    output,
                    "| {} | {} | {} |",
                    month,
                    score(set.org[index]),
                    score(set.baseline[index])
                );
            }
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Snapshot");

    if radar.is_empty() {
        let _ = writeln!(output, "No survey sets configured for the snapshot.");
    } else {
        for axis in radar {
            let marker = if axis.org_leads { "ahead" } else { "behind" };
            let _ = writeln!(
                output,
                "- {}: {} vs {} ({})",
                axis.label,
                score(axis.org_score),
                score(axis.peer_score),
                marker
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Goals");

    if milestones.goals().is_empty() {
        let _ = writeln!(output, "No goals set.");
    } else {
        for goal in milestones.goals() {
            let detail = match goal.achieved {
                Some((month, value)) => format!("first reached {month} at {value:.2}"),
                None => "not reached yet".to_string(),
            };
            let _ = writeln!(output, "- {}: {} ({})", goal.label(), goal.state.note(), detail);
        }
    }

    if let Some(section) = scatter {
        let pairs = section.pairs;
        let _ = writeln!(output);
        let _ = writeln!(output, "## Relationship");
        let _ = writeln!(output, "{} against {}", section.y_label, section.x_label);
        let granularity = match pairs.pairing {
            Pairing::Row => "responses",
            Pairing::Month => "months",
        };
        for (who, points, fit) in [
            ("Org", &pairs.org_points, &pairs.org_fit),
            ("Peers", &pairs.peer_points, &pairs.peer_fit),
        ] {
            let line = match fit {
                Some(fit) => format!("slope {:.2}, intercept {:.2}", fit.slope, fit.intercept),
                None => "no fit".to_string(),
            };
            let _ = writeln!(output, "- {}: {} {} paired, {}", who, points.len(), granularity, line);
        }
    }

    output
}

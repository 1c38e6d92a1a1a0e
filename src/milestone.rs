use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use tracing::debug;

use crate::aggregate::{align, month_axis};
use crate::error::GoalError;
use crate::models::{MonthlyAverage, SubConstructKey, SurveySet};
use crate::month::MonthKey;

pub const DEFAULT_CONDITION: &str = "> 3";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Comparison {
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
    Equal,
}

impl Comparison {
    // two-character operators first so ">=" never reads as ">"
    const PARSE_ORDER: [(&'static str, Comparison); 5] = [
        (">=", Comparison::GreaterOrEqual),
        ("<=", Comparison::LessOrEqual),
        (">", Comparison::Greater),
        ("<", Comparison::Less),
        ("=", Comparison::Equal),
    ];

    pub fn symbol(self) -> &'static str {
        match self {
            Comparison::Greater => ">",
            Comparison::GreaterOrEqual => ">=",
            Comparison::Less => "<",
            Comparison::LessOrEqual => "<=",
            Comparison::Equal => "=",
        }
    }

    pub fn holds(self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::Greater => value > threshold,
            Comparison::GreaterOrEqual => value >= threshold,
            Comparison::Less => value < threshold,
            Comparison::LessOrEqual => value <= threshold,
            Comparison::Equal => value == threshold,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GoalCondition {
    pub op: Comparison,
    pub threshold: f64,
}

impl GoalCondition {
    pub fn is_met_by(&self, value: Option<f64>) -> bool {
        value.is_some_and(|v| !v.is_nan() && self.op.holds(v, self.threshold))
    }
}

impl FromStr for GoalCondition {
    type Err = GoalError;

    /// Grammar: `<op> <number>` with op one of `> >= < <= =` and a plain
    /// decimal number.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let reject = || GoalError::InvalidCondition(s.to_string());
        let text = s.trim();
        let (op, rest) = Comparison::PARSE_ORDER
            .iter()
            .find_map(|(symbol, op)| text.strip_prefix(*symbol).map(|rest| (*op, rest)))
            .ok_or_else(reject)?;
        let number = rest.trim();
        if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit() || c == '.') {
            return Err(reject());
        }
        let threshold = number.parse::<f64>().map_err(|_| reject())?;
        Ok(GoalCondition { op, threshold })
    }
}

impl fmt::Display for GoalCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.op.symbol(), self.threshold)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum GoalState {
    Met { month: MonthKey, value: f64 },
    NotMet,
    FutureTarget { month: MonthKey },
}

impl GoalState {
    pub fn note(&self) -> &'static str {
        match self {
            GoalState::Met { .. } => "Met",
            GoalState::NotMet => "Not met",
            GoalState::FutureTarget { .. } => "Goal (future)",
        }
    }
}

/// Where the goal is drawn: filled at the first hit, hollow otherwise.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GoalMarker {
    pub month: Option<MonthKey>,
    pub value: f64,
    pub filled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MilestoneGoal {
    pub set_label: String,
    pub condition: GoalCondition,
    pub target_month: Option<MonthKey>,
    pub achieved: Option<(MonthKey, f64)>,
    pub state: GoalState,
    pub marker: GoalMarker,
}

impl MilestoneGoal {
    pub fn label(&self) -> String {
        format!("Goal: {} {}", self.set_label, self.condition)
    }
}

/// First month (never the best or the last) whose value satisfies the condition.
pub fn first_hit(
    axis: &[MonthKey],
    values: &[Option<f64>],
    condition: &GoalCondition,
) -> Option<(MonthKey, f64)> {
    axis.iter()
        .zip(values)
        .find(|(_, value)| condition.is_met_by(**value))
        .and_then(|(month, value)| value.map(|v| (*month, v)))
}

fn resolve(
    set_label: &str,
    axis: &[MonthKey],
    values: &[Option<f64>],
    condition: GoalCondition,
    target_month: Option<MonthKey>,
) -> MilestoneGoal {
    let achieved = first_hit(axis, values, &condition);
    let (state, marker) = match (target_month, achieved) {
        (Some(month), _) => (
            GoalState::FutureTarget { month },
            GoalMarker {
                month: Some(month),
                value: condition.threshold,
                filled: false,
            },
        ),
        (None, Some((month, value))) => (
            GoalState::Met { month, value },
            GoalMarker {
                month: Some(month),
                value,
                filled: true,
            },
        ),
        (None, None) => (
            GoalState::NotMet,
            GoalMarker {
                month: axis.last().copied(),
                value: condition.threshold,
                filled: false,
            },
        ),
    };
    MilestoneGoal {
        set_label: set_label.to_string(),
        condition,
        target_month,
        achieved,
        state,
        marker,
    }
}

/// Evaluates a goal against one chronological series.
pub fn evaluate_goal(
    set_label: &str,
    series: &MonthlyAverage,
    condition: GoalCondition,
    target_month: Option<MonthKey>,
) -> MilestoneGoal {
    let axis: Vec<MonthKey> = series.keys().copied().collect();
    let values = align(series, &axis);
    resolve(set_label, &axis, &values, condition, target_month)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MilestoneLine {
    pub label: String,
    pub color: Option<String>,
    pub sub_construct: Option<SubConstructKey>,
    pub values: Vec<Option<f64>>,
}

/// The acting organization's series for every milestone set on one shared
/// month axis, plus the goals placed on it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MilestoneChart {
    axis: Vec<MonthKey>,
    lines: Vec<MilestoneLine>,
    goals: Vec<MilestoneGoal>,
}

impl MilestoneChart {
    pub fn new(series: Vec<(SurveySet, MonthlyAverage)>) -> Self {
        let axis = month_axis(series.iter().map(|(_, map)| map));
        let lines = series
            .into_iter()
            .map(|(set, map)| MilestoneLine {
                sub_construct: set.sub_construct(),
                values: align(&map, &axis),
                label: set.label,
                color: set.color,
            })
            .collect();
        Self {
            axis,
            lines,
            goals: Vec::new(),
        }
    }

    pub fn axis(&self) -> &[MonthKey] {
        &self.axis
    }

    pub fn lines(&self) -> &[MilestoneLine] {
        &self.lines
    }

    pub fn goals(&self) -> &[MilestoneGoal] {
        &self.goals
    }

    /// Inserts `month` into the axis in calendar order, padding every line
    /// with an empty value at that position.
    pub fn ensure_month(&mut self, month: MonthKey) {
        if let Err(position) = self.axis.binary_search(&month) {
            debug!(%month, position, "extending milestone axis");
            self.axis.insert(position, month);
            for line in &mut self.lines {
                line.values.insert(position, None);
            }
        }
    }

    /// Adds a goal from raw user input. Nothing changes when the input is rejected.
    pub fn add_goal(
        &mut self,
        line_index: usize,
        condition: &str,
        target_month: Option<&str>,
    ) -> Result<&MilestoneGoal, GoalError> {
        let condition = if condition.trim().is_empty() {
            DEFAULT_CONDITION
        } else {
            condition
        };
        let condition: GoalCondition = condition.parse()?;
        let target_month = match target_month.map(str::trim).filter(|m| !m.is_empty()) {
            Some(month) => Some(MonthKey::parse_target(month)?),
            None => None,
        };
        let line = self
            .lines
            .get(line_index)
            .ok_or(GoalError::UnknownSurveySet(line_index))?;

        let goal = resolve(&line.label, &self.axis, &line.values, condition, target_month);
        if let Some(month) = goal.target_month {
            self.ensure_month(month);
        }
        self.goals.push(goal);
        Ok(&self.goals[self.goals.len() - 1])
    }

    pub fn remove_goal(&mut self, index: usize) -> Option<MilestoneGoal> {
        (index < self.goals.len()).then(|| self.goals.remove(index))
    }
}

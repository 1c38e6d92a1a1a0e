use std::collections::BTreeMap;

use tracing::debug;

use crate::models::{MonthlyAverage, SurveyRow};
use crate::month::MonthKey;

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

#[derive(Debug, Default)]
struct MonthBuckets {
    buckets: BTreeMap<MonthKey, Vec<f64>>,
    undated: usize,
}

impl MonthBuckets {
    fn month_of(&mut self, row: &SurveyRow) -> Option<MonthKey> {
        let month = row.month();
        if month.is_none() {
            self.undated += 1;
        }
        month
    }

    fn push(&mut self, month: MonthKey, value: f64) {
        self.buckets.entry(month).or_default().push(value);
    }

    fn averages(self) -> MonthlyAverage {
        if self.undated > 0 {
            debug!(rows = self.undated, "skipped rows without a usable month");
        }
        self.buckets
            .into_iter()
            .filter_map(|(month, values)| mean(&values).map(|avg| (month, avg)))
            .collect()
    }
}

/// Mean of a row's numeric responses across `questions`; `None` when the row
/// answered none of them numerically.
pub fn row_value(row: &SurveyRow, questions: Option<&[String]>) -> Option<f64> {
    let values: Vec<f64> = match questions {
        Some(questions) => questions.iter().filter_map(|q| row.numeric(q)).collect(),
        None => row.questions().filter_map(|q| row.numeric(q)).collect(),
    };
    mean(&values)
}

/// Two-stage monthly average: each row is first blended into one value across
/// the requested questions, then rows are averaged per month. `None` means
/// every question in the row.
pub fn monthly_average(rows: &[SurveyRow], questions: Option<&[String]>) -> MonthlyAverage {
    let mut buckets = MonthBuckets::default();
    for row in rows {
        let Some(month) = buckets.month_of(row) else {
            continue;
        };
        if let Some(value) = row_value(row, questions) {
            buckets.push(month, value);
        }
    }
    buckets.averages()
}

/// Per-month mean of a single question, pooling every row given.
pub fn question_monthly<'a, I>(rows: I, question: &str) -> MonthlyAverage
where
    I: IntoIterator<Item = &'a SurveyRow>,
{
    let mut buckets = MonthBuckets::default();
    for row in rows {
        let Some(month) = buckets.month_of(row) else {
            continue;
        };
        if let Some(value) = row.numeric(question) {
            buckets.push(month, value);
        }
    }
    buckets.averages()
}

/// One-stage rollup: every numeric observation from every source and listed
/// question lands in a shared month bucket, so a source with more questions
/// carries proportionally more weight.
pub fn pooled_monthly<'a, I>(sources: I) -> MonthlyAverage
where
    I: IntoIterator<Item = (&'a [SurveyRow], &'a [String])>,
{
    let mut buckets = MonthBuckets::default();
    for (rows, questions) in sources {
        for row in rows {
            let Some(month) = buckets.month_of(row) else {
                continue;
            };
            for question in questions {
                if let Some(value) = row.numeric(question) {
                    buckets.push(month, value);
                }
            }
        }
    }
    buckets.averages()
}

/// Whole-period score of a survey set: the mean of every numeric response to
/// the listed questions, regardless of month.
pub fn set_score(rows: &[SurveyRow], questions: &[String]) -> Option<f64> {
    let values: Vec<f64> = rows
        .iter()
        .flat_map(|row| questions.iter().filter_map(|q| row.numeric(q)))
        .collect();
    mean(&values)
}

/// Chronological union of the months present in any of the maps.
pub fn month_axis<'a, I>(maps: I) -> Vec<MonthKey>
where
    I: IntoIterator<Item = &'a MonthlyAverage>,
{
    let mut months: Vec<MonthKey> = maps.into_iter().flat_map(|map| map.keys().copied()).collect();
    months.sort();
    months.dedup();
    months
}

pub fn align(map: &MonthlyAverage, axis: &[MonthKey]) -> Vec<Option<f64>> {
    axis.iter().map(|month| map.get(month).copied()).collect()
}

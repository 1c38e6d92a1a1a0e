use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::likert::{map_likert_value, LikertValue};
use crate::month::MonthKey;

pub type OrgId = String;

/// Month → average, always iterated chronologically. Months without a
/// numeric observation are never present.
pub type MonthlyAverage = BTreeMap<MonthKey, f64>;

pub const DATE_COLUMN: &str = "date";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyRow {
    pub date: String,
    pub responses: BTreeMap<String, String>,
}

impl SurveyRow {
    pub fn new<Q, R>(date: &str, responses: impl IntoIterator<Item = (Q, R)>) -> Self
    where
        Q: Into<String>,
        R: Into<String>,
    {
        Self {
            date: date.to_string(),
            responses: responses
                .into_iter()
                .map(|(question, raw)| (question.into(), raw.into()))
                .collect(),
        }
    }

    pub fn month(&self) -> Option<MonthKey> {
        MonthKey::from_row_date(&self.date)
    }

    pub fn value(&self, question: &str) -> LikertValue {
        self.responses
            .get(question)
            .map(|raw| map_likert_value(raw))
            .unwrap_or(LikertValue::Empty)
    }

    pub fn numeric(&self, question: &str) -> Option<f64> {
        self.value(question).as_number()
    }

    pub fn questions(&self) -> impl Iterator<Item = &str> {
        self.responses.keys().map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SubConstructKey(char);

impl SubConstructKey {
    pub fn new(key: char) -> Self {
        Self(key.to_ascii_uppercase())
    }

    /// Reads a leading "(A)" or "A." token from a survey set label.
    pub fn from_label(label: &str) -> Option<Self> {
        let mut chars = label.trim_start().chars();
        match (chars.next(), chars.next(), chars.next()) {
            (Some('('), Some(key), Some(')')) if key.is_alphanumeric() || key == '_' => {
                Some(Self::new(key))
            }
            (Some(key), Some('.'), _) if key.is_ascii_uppercase() => Some(Self(key)),
            _ => None,
        }
    }

    pub fn as_char(&self) -> char {
        self.0
    }
}

impl fmt::Display for SubConstructKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveySet {
    pub label: String,
    /// Row-source locator with an `{org}` placeholder,
    /// e.g. `orgdata/{org}_teacher_survey.csv`.
    pub locator: String,
    pub questions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl SurveySet {
    pub fn locator_for(&self, org: &str) -> String {
        self.locator.replace("{org}", org)
    }

    pub fn sub_construct(&self) -> Option<SubConstructKey> {
        SubConstructKey::from_label(&self.label)
    }

    /// Label without its sub-construct prefix and without any em-dash suffix.
    pub fn display_name(&self) -> String {
        let label = self.label.trim_start();
        let rest = if self.sub_construct().is_some() {
            match label.find(|c: char| c == ')' || c == '.') {
                Some(end) => &label[end + 1..],
                None => label,
            }
        } else {
            label
        };
        rest.split('—').next().unwrap_or(rest).trim().to_string()
    }

    pub fn shares_file_with(&self, other: &SurveySet) -> bool {
        self.locator == other.locator
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum BaselinePolicy {
    IncludeCurrentOrganization,
    #[default]
    ExcludeCurrentOrganization,
}

impl BaselinePolicy {
    pub fn includes(self, org: &str, acting: &str) -> bool {
        match self {
            BaselinePolicy::IncludeCurrentOrganization => true,
            BaselinePolicy::ExcludeCurrentOrganization => org != acting,
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            BaselinePolicy::IncludeCurrentOrganization => "all organizations",
            BaselinePolicy::ExcludeCurrentOrganization => "peer organizations",
        }
    }

    pub fn eligible<'a>(self, orgs: &'a [OrgId], acting: &str) -> Vec<&'a OrgId> {
        orgs.iter()
            .filter(|org| self.includes(org, acting))
            .collect()
    }
}

impl FromStr for BaselinePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "include" | "all" | "allorgs" => Ok(BaselinePolicy::IncludeCurrentOrganization),
            "exclude" | "peers" | "excludecurrent" => Ok(BaselinePolicy::ExcludeCurrentOrganization),
            other => Err(format!(
                "unknown baseline policy {other:?} (expected include or exclude)"
            )),
        }
    }
}

impl fmt::Display for BaselinePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BaselinePolicy::IncludeCurrentOrganization => f.write_str("include"),
            BaselinePolicy::ExcludeCurrentOrganization => f.write_str("exclude"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Provenance {
    Row {
        org: OrgId,
        index: usize,
        date: String,
    },
    Month(MonthKey),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScatterPoint {
    pub x: f64,
    pub y: f64,
    pub provenance: Provenance,
}

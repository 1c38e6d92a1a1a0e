use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;

/// Five-point label scales, each ordered 1..=5. Earlier scales take priority
/// when two scales share a label.
pub const STANDARD_SCALES: &[[&str; 5]] = &[
    ["Strongly Disagree", "Disagree", "Neutral", "Agree", "Strongly Agree"],
    [
        "not a priority",
        "very low priority",
        "low priority",
        "high priority",
        "very high priority",
    ],
    [
        "not at all",
        "minimally",
        "somewhat",
        "to a great extent",
        "to a very great extent",
    ],
    [
        "not at all integrated",
        "minimally integrated",
        "somewhat integrated",
        "highly integrated",
        "very highly integrated",
    ],
    [
        "very poorly aligned",
        "poorly aligned",
        "somewhat aligned",
        "well aligned",
        "very well aligned",
    ],
    [
        "not at all",
        "once a year",
        "every few months",
        "once a month",
        "more than once a month",
    ],
    [
        "no time",
        "minimal time",
        "some time",
        "a lot of time",
        "nearly all of the time",
    ],
    ["no", "rarely", "sometimes", "often", "consistently"],
    [
        "I have none of the materials and resources I need",
        "I have few of the materials and resources I need",
        "I have some of the materials and resources I need",
        "I have most of the materials and resources I need",
        "I have all the materials and resources I need",
    ],
    ["no", "not really", "somewhat", "for the most part", "absolutely"],
];

static STANDARD_TABLE: Lazy<LikertTable> = Lazy::new(|| LikertTable::from_scales(STANDARD_SCALES));

pub fn normalize_key(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Outcome of coding one raw response.
#[derive(Debug, Clone, PartialEq)]
pub enum LikertValue {
    Empty,
    Mapped(u8),
    Numeric(f64),
    Unmapped(String),
}

impl LikertValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            LikertValue::Mapped(value) => Some(f64::from(*value)),
            LikertValue::Numeric(value) => Some(*value),
            LikertValue::Empty | LikertValue::Unmapped(_) => None,
        }
    }

    pub fn is_unmapped(&self) -> bool {
        matches!(self, LikertValue::Unmapped(_))
    }
}

impl fmt::Display for LikertValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LikertValue::Empty => Ok(()),
            LikertValue::Mapped(value) => write!(f, "{value}"),
            LikertValue::Numeric(value) => write!(f, "{value}"),
            LikertValue::Unmapped(text) => f.write_str(text),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LikertTable {
    labels: HashMap<String, u8>,
}

impl LikertTable {
    pub fn from_scales(scales: &[[&str; 5]]) -> Self {
        let mut labels = HashMap::new();
        for scale in scales {
            for (index, label) in scale.iter().enumerate() {
                // first registration wins
                labels
                    .entry(normalize_key(label))
                    .or_insert(index as u8 + 1);
            }
        }
        Self { labels }
    }

    pub fn standard() -> &'static LikertTable {
        &STANDARD_TABLE
    }

    pub fn lookup(&self, text: &str) -> Option<u8> {
        self.labels.get(&normalize_key(text)).copied()
    }

    pub fn classify(&self, raw: &str) -> LikertValue {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return LikertValue::Empty;
        }
        if let Some(value) = self.lookup(trimmed) {
            return LikertValue::Mapped(value);
        }
        match trimmed.parse::<f64>() {
            Ok(number) if number.is_finite() => LikertValue::Numeric(number),
            _ => LikertValue::Unmapped(trimmed.to_string()),
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

pub fn map_likert_value(raw: &str) -> LikertValue {
    LikertTable::standard().classify(raw)
}

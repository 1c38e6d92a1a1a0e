use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use clap::{Args, ValueEnum};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::{BaselinePolicy, SurveySet};

pub const DEFAULT_CONSTRUCT: &str = "school-system";

const BUILTIN_CONSTRUCTS: &str = include_str!("../config/constructs.json");

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum View {
    Radar,
    Overall,
    Milestone,
    Scatter,
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            View::Radar => "radar",
            View::Overall => "overall",
            View::Milestone => "milestone",
            View::Scatter => "scatter",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewConfig {
    #[serde(default)]
    pub survey_sets: Vec<SurveySet>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConstructConfig {
    #[serde(default)]
    pub radar: Option<ViewConfig>,
    #[serde(default)]
    pub overall: Option<ViewConfig>,
    #[serde(default)]
    pub milestone: Option<ViewConfig>,
    #[serde(default)]
    pub scatter: Option<ViewConfig>,
}

impl ConstructConfig {
    /// Survey sets for a view. Views without sets use the overall list.
    pub fn survey_sets(&self, view: View) -> &[SurveySet] {
        let configured = match view {
            View::Radar => self.radar.as_ref(),
            View::Overall => self.overall.as_ref(),
            View::Milestone => self.milestone.as_ref(),
            View::Scatter => self.scatter.as_ref(),
        };
        configured
            .map(|config| config.survey_sets.as_slice())
            .filter(|sets| !sets.is_empty())
            .or_else(|| self.overall.as_ref().map(|config| config.survey_sets.as_slice()))
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct ConstructCatalog {
    constructs: BTreeMap<String, ConstructConfig>,
    default_id: String,
}

impl ConstructCatalog {
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        let constructs: BTreeMap<String, ConstructConfig> =
            serde_json::from_str(text).context("construct configuration is not valid JSON")?;
        for (id, construct) in &constructs {
            for view in [View::Radar, View::Overall, View::Milestone, View::Scatter] {
                if let Some(set) = construct.survey_sets(view).iter().find(|set| set.questions.is_empty()) {
                    warn!(construct = %id, %view, label = %set.label, "survey set lists no questions");
                }
            }
        }
        Ok(Self {
            constructs,
            default_id: DEFAULT_CONSTRUCT.to_string(),
        })
    }

    pub fn builtin() -> anyhow::Result<Self> {
        Self::from_json(BUILTIN_CONSTRUCTS).context("built-in construct configuration is broken")
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read construct configuration {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("failed to load {}", path.display()))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.constructs.keys().map(String::as_str)
    }

    /// Looks up a construct, falling back to the default one for unknown ids.
    pub fn get(&self, id: &str) -> anyhow::Result<(&str, &ConstructConfig)> {
        if let Some((key, construct)) = self.constructs.get_key_value(id) {
            return Ok((key.as_str(), construct));
        }
        warn!(construct = id, fallback = %self.default_id, "unknown construct, using default");
        self.constructs
            .get_key_value(&self.default_id)
            .map(|(key, construct)| (key.as_str(), construct))
            .ok_or_else(|| anyhow!("default construct {} is not configured", self.default_id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum SourceKind {
    #[default]
    Csv,
    Postgres,
}

/// Runtime settings shared by every command.
#[derive(Debug, Clone, Args)]
pub struct Settings {
    /// Directory that survey locators are resolved against
    #[arg(long, env = "SURVEY_DATA_DIR", default_value = ".", global = true)]
    pub data_dir: PathBuf,
    /// Where survey rows are read from
    #[arg(long, value_enum, default_value_t = SourceKind::Csv, global = true)]
    pub source: SourceKind,
    #[arg(long, env = "DATABASE_URL", hide_env_values = true, global = true)]
    pub database_url: Option<String>,
    /// Construct configuration JSON; the built-in one is used when absent
    #[arg(long, env = "SURVEY_CONSTRUCTS", global = true)]
    pub constructs: Option<PathBuf>,
    #[arg(long, default_value = DEFAULT_CONSTRUCT, global = true)]
    pub construct: String,
    /// CSV of `user,org` pairs
    #[arg(long, env = "SURVEY_USERMAP", global = true)]
    pub usermap: Option<PathBuf>,
    /// Whether the acting organization counts toward baselines (include or exclude)
    #[arg(long, default_value_t = BaselinePolicy::ExcludeCurrentOrganization, global = true)]
    pub baseline: BaselinePolicy,
    #[arg(long, global = true)]
    pub org: Option<String>,
    #[arg(long, env = "SURVEY_USER", global = true)]
    pub user: Option<String>,
}

impl Settings {
    pub fn construct_catalog(&self) -> anyhow::Result<ConstructCatalog> {
        match &self.constructs {
            Some(path) => ConstructCatalog::load(path),
            None => ConstructCatalog::builtin(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r##"{
        "demo": {
            "overall": { "survey_sets": [
                { "label": "(A) One", "locator": "orgdata/{org}_one.csv", "questions": ["q1"], "color": "#A98FD4" }
            ]},
            "radar": { "survey_sets": [] },
            "scatter": { "survey_sets": [
                { "label": "(A) One", "locator": "orgdata/{org}_one.csv", "questions": ["q1", "q2"] }
            ]}
        },
        "school-system": {
            "overall": { "survey_sets": [
                { "label": "(B) Two", "locator": "orgdata/{org}_two.csv", "questions": ["q9"] }
            ]}
        }
    }"##;

    #[test]
    fn builtin_configuration_parses() {
        let catalog = ConstructCatalog::builtin().unwrap();
        let (id, construct) = catalog.get(DEFAULT_CONSTRUCT).unwrap();
        assert_eq!(id, "school-system");
        assert_eq!(construct.survey_sets(View::Radar).len(), 6);
        assert!(catalog.ids().any(|id| id == "professional-learning"));
        let teacher = &construct.survey_sets(View::Overall)[0];
        assert_eq!(teacher.locator_for("org2"), "orgdata/org2_teacher_survey.csv");
    }

    #[test]
    fn empty_or_missing_views_use_overall() {
        let catalog = ConstructCatalog::from_json(SAMPLE).unwrap();
        let (_, demo) = catalog.get("demo").unwrap();
        assert_eq!(demo.survey_sets(View::Radar)[0].label, "(A) One");
        assert_eq!(demo.survey_sets(View::Milestone)[0].label, "(A) One");
        assert_eq!(demo.survey_sets(View::Scatter)[0].questions.len(), 2);
        assert_eq!(demo.survey_sets(View::Overall)[0].color.as_deref(), Some("#A98FD4"));
    }

    #[test]
    fn unknown_construct_falls_back_to_default() {
        let catalog = ConstructCatalog::from_json(SAMPLE).unwrap();
        let (id, construct) = catalog.get("student-academic-outcomes").unwrap();
        assert_eq!(id, DEFAULT_CONSTRUCT);
        assert_eq!(construct.survey_sets(View::Overall)[0].label, "(B) Two");
    }

    #[test]
    fn missing_default_is_an_error() {
        let catalog = ConstructCatalog::from_json(r#"{ "demo": {} }"#).unwrap();
        assert!(catalog.get("other").is_err());
        assert!(catalog.get("demo").unwrap().1.survey_sets(View::Radar).is_empty());
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(ConstructCatalog::from_json("{ not json").is_err());
    }
}

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::ConstructConfig;
use crate::likert::STANDARD_SCALES;
use crate::models::SurveyRow;
use crate::source::{parse_rows, RowSource};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Rows stored per locator in `survey_pulse.survey_rows`.
#[derive(Debug, Clone)]
pub struct PgRowSource {
    pool: PgPool,
}

impl PgRowSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RowSource for PgRowSource {
    async fn fetch_rows(&self, locator: &str) -> anyhow::Result<Vec<SurveyRow>> {
        let records = sqlx::query(
            "SELECT row_date, responses FROM survey_pulse.survey_rows \
             WHERE locator = $1 ORDER BY row_index",
        )
        .bind(locator)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("failed to query rows for {locator}"))?;

        let mut rows = Vec::with_capacity(records.len());
        for record in records {
            let responses: String = record.get("responses");
            let responses: BTreeMap<String, String> = serde_json::from_str(&responses)
                .with_context(|| format!("stored responses for {locator} are not a JSON object of strings"))?;
            rows.push(SurveyRow {
                date: record.get("row_date"),
                responses,
            });
        }
        debug!(locator, rows = rows.len(), "read survey rows from Postgres");
        Ok(rows)
    }
}

async fn replace_rows(
    pool: &PgPool,
    org: &str,
    locator: &str,
    rows: &[SurveyRow],
) -> anyhow::Result<usize> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM survey_pulse.survey_rows WHERE locator = $1")
        .bind(locator)
        .execute(&mut *tx)
        .await?;

    for (index, row) in rows.iter().enumerate() {
        let responses = serde_json::to_string(&row.responses)?;
        sqlx::query(
            r#"
            INSERT INTO survey_pulse.survey_rows
            (id, org_id, locator, row_index, row_date, responses)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(org)
        .bind(locator)
        .bind(i32::try_from(index).context("too many rows in one survey file")?)
        .bind(&row.date)
        .bind(responses)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(rows.len())
}

/// Replaces the stored rows of one survey file with a converted CSV.
pub async fn import_csv(
    pool: &PgPool,
    org: &str,
    locator: &str,
    csv_path: &Path,
) -> anyhow::Result<usize> {
    let file = std::fs::File::open(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let rows = parse_rows(file).with_context(|| format!("failed to parse {}", csv_path.display()))?;
    let inserted = replace_rows(pool, org, locator, &rows).await?;
    info!(org, locator, inserted, "imported survey rows");
    Ok(inserted)
}

const SEED_MONTHS: [(u32, i32); 4] = [(1, 2026), (2, 2026), (3, 2026), (4, 2026)];
const SEED_ROWS_PER_MONTH: usize = 3;

/// Deterministic demo responses: mostly Likert labels, some numeric, trending
/// upward month over month and offset per organization.
pub fn demo_rows(org_index: usize, questions: &[String]) -> Vec<SurveyRow> {
    let agreement = STANDARD_SCALES[0];
    let mut rows = Vec::new();
    for (month_index, (month, year)) in SEED_MONTHS.iter().enumerate() {
        for respondent in 0..SEED_ROWS_PER_MONTH {
            let date = format!("{:02}/{:02}/{year}", 3 + respondent * 7, month);
            let responses = questions.iter().enumerate().map(|(q, question)| {
                let level = (org_index + month_index + respondent + q) % 4 + 1;
                let level = (level + month_index / 2).min(5);
                let raw = if (respondent + q) % 3 == 0 {
                    level.to_string()
                } else {
                    agreement[level - 1].to_string()
                };
                (question.clone(), raw)
            });
            rows.push(SurveyRow::new(&date, responses));
        }
    }
    rows
}

/// Loads demo rows for every survey file the construct reads.
pub async fn seed(pool: &PgPool, construct: &ConstructConfig, orgs: &[String]) -> anyhow::Result<usize> {
    let mut files: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for view in [&construct.radar, &construct.overall, &construct.milestone, &construct.scatter] {
        for set in view.iter().flat_map(|config| &config.survey_sets) {
            files
                .entry(set.locator.clone())
                .or_default()
                .extend(set.questions.iter().cloned());
        }
    }

    let mut inserted = 0usize;
    for (org_index, org) in orgs.iter().enumerate() {
        for (template, questions) in &files {
            let questions: Vec<String> = questions.iter().cloned().collect();
            let locator = template.replace("{org}", org);
            inserted += replace_rows(pool, org, &locator, &demo_rows(org_index, &questions)).await?;
        }
    }
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::month::MonthKey;

    fn questions() -> Vec<String> {
        vec!["q1".to_string(), "q2".to_string(), "q3".to_string()]
    }

    #[test]
    fn demo_rows_cover_four_months() {
        let rows = demo_rows(0, &questions());
        assert_eq!(rows.len(), SEED_MONTHS.len() * SEED_ROWS_PER_MONTH);
        let months: BTreeSet<MonthKey> = rows.iter().filter_map(SurveyRow::month).collect();
        assert_eq!(months.len(), 4);
    }

    #[test]
    fn demo_responses_are_all_numeric_after_coding() {
        for org_index in 0..3 {
            for row in demo_rows(org_index, &questions()) {
                for question in questions() {
                    let value = row.numeric(&question).unwrap();
                    assert!((1.0..=5.0).contains(&value));
                }
            }
        }
    }

    #[test]
    fn organizations_get_different_responses() {
        assert_ne!(demo_rows(0, &questions()), demo_rows(1, &questions()));
    }
}

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use tracing::debug;

use crate::models::{SurveyRow, DATE_COLUMN};

/// Where survey rows come from. Implementations may fail; callers decide how
/// to degrade.
#[async_trait]
pub trait RowSource: Send + Sync {
    async fn fetch_rows(&self, locator: &str) -> anyhow::Result<Vec<SurveyRow>>;
}

/// Parses a survey CSV with a header row. The `date` column (any case) becomes
/// the row date, every other named column a response.
pub fn parse_rows<R: Read>(reader: R) -> anyhow::Result<Vec<SurveyRow>> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let headers: Vec<String> = reader
        .headers()
        .context("failed to read survey header")?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
        .collect();
    let date_index = headers
        .iter()
        .position(|h| h.eq_ignore_ascii_case(DATE_COLUMN));

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.context("failed to read survey row")?;
        if record.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        let date = date_index
            .and_then(|index| record.get(index))
            .unwrap_or_default();
        let responses = headers
            .iter()
            .enumerate()
            .filter(|(index, header)| Some(*index) != date_index && !header.is_empty())
            .map(|(index, header)| (header.as_str(), record.get(index).unwrap_or_default()));
        rows.push(SurveyRow::new(date, responses));
    }
    Ok(rows)
}

/// Survey CSVs under a data directory; locators are relative paths.
#[derive(Debug, Clone)]
pub struct CsvDirSource {
    root: PathBuf,
}

impl CsvDirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, locator: &str) -> PathBuf {
        self.root.join(locator)
    }
}

#[async_trait]
impl RowSource for CsvDirSource {
    async fn fetch_rows(&self, locator: &str) -> anyhow::Result<Vec<SurveyRow>> {
        let path = self.path_for(locator);
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let rows = parse_rows(bytes.as_slice()).with_context(|| format!("failed to parse {}", path.display()))?;
        debug!(locator, rows = rows.len(), "read survey file");
        Ok(rows)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_column_is_found_in_any_case() {
        let rows = parse_rows("Date,Q1,Q2\n03/04/2026,Agree,2\n".as_bytes()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].date, "03/04/2026");
        assert_eq!(rows[0].numeric("Q1"), Some(4.0));
        assert_eq!(rows[0].questions().collect::<Vec<_>>(), ["Q1", "Q2"]);
    }

    #[test]
    fn short_rows_and_blank_lines_are_tolerated() {
        let text = "\u{feff}date, Q1 ,Q2\n\n01/03/2026,5\n,,\n02/03/2026,,3\n";
        let rows = parse_rows(text.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].numeric("Q1"), Some(5.0));
        assert_eq!(rows[0].numeric("Q2"), None);
        assert_eq!(rows[1].numeric("Q2"), Some(3.0));
    }

    #[test]
    fn missing_date_column_leaves_rows_undated() {
        let rows = parse_rows("Q1\n4\n".as_bytes()).unwrap();
        assert_eq!(rows[0].date, "");
        assert_eq!(rows[0].month(), None);
    }

    #[tokio::test]
    async fn csv_directory_reads_relative_locators() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("orgdata")).unwrap();
        std::fs::write(
            dir.path().join("orgdata/org1_teacher.csv"),
            "date,q1\n01/03/2026,Strongly Agree\n",
        )
        .unwrap();

        let source = CsvDirSource::new(dir.path());
        let rows = source.fetch_rows("orgdata/org1_teacher.csv").await.unwrap();
        assert_eq!(rows[0].numeric("q1"), Some(5.0));
        assert!(source.fetch_rows("orgdata/org9_teacher.csv").await.is_err());
    }
}

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use tracing::{debug, info};

use crate::error::ConvertError;
use crate::likert::map_likert_value;
use crate::models::{OrgId, DATE_COLUMN};

pub const PREVIEW_ROWS: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DateFormat {
    #[default]
    Mdy,
    Dmy,
}

impl FromStr for DateFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mdy" => Ok(DateFormat::Mdy),
            "dmy" => Ok(DateFormat::Dmy),
            other => Err(format!("unknown date format {other:?} (expected mdy or dmy)")),
        }
    }
}

impl fmt::Display for DateFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DateFormat::Mdy => f.write_str("mdy"),
            DateFormat::Dmy => f.write_str("dmy"),
        }
    }
}

/// Rewrites an `M/D/YYYY` or `D/M/YYYY` date as zero-padded `DD/MM/YYYY`.
///
/// Values that do not split into numeric month and day parts followed by a
/// year on `/` or `-` come back unchanged. Day and month ranges are not checked.
pub fn normalize_date(value: &str, format: DateFormat) -> String {
    if value.is_empty() {
        return String::new();
    }
    let parts: Vec<&str> = value.split(|c: char| c == '/' || c == '-').collect();
    if parts.len() < 3 {
        return value.to_string();
    }
    let numeric = |part: &str| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit());
    // the year part may carry a time suffix, which is kept as is
    let year_like = parts[2].starts_with(|c: char| c.is_ascii_digit());
    if !(numeric(parts[0]) && numeric(parts[1]) && year_like) {
        return value.to_string();
    }
    let (month, day, year) = match format {
        DateFormat::Mdy => (parts[0], parts[1], parts[2]),
        DateFormat::Dmy => (parts[1], parts[0], parts[2]),
    };
    format!("{day:0>2}/{month:0>2}/{year}")
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl SourceTable {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { headers, rows }
    }

    /// Reads a CSV export with a header row. Blank lines are skipped and short
    /// rows are padded to the header width.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(reader);
        let headers: Vec<String> = reader
            .headers()
            .context("failed to read CSV header")?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
            .collect();

        let mut rows = Vec::new();
        for (index, record) in reader.records().enumerate() {
            let record = record.with_context(|| format!("failed to read CSV row {}", index + 1))?;
            if record.iter().all(|cell| cell.trim().is_empty()) {
                continue;
            }
            let mut row: Vec<String> = record.iter().map(str::to_string).collect();
            row.resize(headers.len().max(row.len()), String::new());
            rows.push(row);
        }
        Ok(Self { headers, rows })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let table = Self::from_reader(file).with_context(|| format!("failed to parse {}", path.display()))?;
        info!(path = %path.display(), rows = table.rows.len(), "loaded source table");
        Ok(table)
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn cell(&self, row: usize, column: usize) -> Option<&str> {
        self.rows.get(row)?.get(column).map(String::as_str)
    }

    /// Replaces one cell with the trimmed edit.
    pub fn edit_cell(&mut self, row: usize, column: usize, value: &str) -> Result<(), ConvertError> {
        if column >= self.headers.len() {
            return Err(ConvertError::ColumnOutOfRange(column));
        }
        let cells = self
            .rows
            .get_mut(row)
            .ok_or(ConvertError::RowOutOfRange(row))?;
        if cells.len() <= column {
            cells.resize(column + 1, String::new());
        }
        cells[column] = value.trim().to_string();
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Conversion {
    pub organization: OrgId,
    pub name: String,
    pub date_format: DateFormat,
    pub date_column: usize,
    mappings: BTreeMap<usize, String>,
    excluded: BTreeSet<usize>,
}

impl Conversion {
    pub fn new(organization: &str, name: &str) -> Self {
        Self {
            organization: organization.trim().to_string(),
            name: name.trim().to_string(),
            date_format: DateFormat::default(),
            date_column: 0,
            mappings: BTreeMap::new(),
            excluded: BTreeSet::new(),
        }
    }

    /// Maps a source column to framework question text. Blank text drops the
    /// column again.
    pub fn map_column(&mut self, column: usize, question: &str) {
        let question = question.trim();
        if question.is_empty() {
            self.mappings.remove(&column);
        } else {
            self.mappings.insert(column, question.to_string());
        }
    }

    /// Selects source columns keeping their own header as question text.
    pub fn select_columns(&mut self, table: &SourceTable, columns: &[usize]) {
        for column in columns {
            if let Some(header) = table.headers().get(*column) {
                self.map_column(*column, header);
            }
        }
    }

    /// Question columns in source order, never including the date column.
    pub fn question_columns(&self) -> impl Iterator<Item = (usize, &str)> + '_ {
        self.mappings
            .iter()
            .filter(|(column, _)| **column != self.date_column)
            .map(|(column, question)| (*column, question.as_str()))
    }

    /// Returns whether the row is excluded after the toggle.
    pub fn toggle_row_exclusion(&mut self, row: usize) -> bool {
        if self.excluded.remove(&row) {
            false
        } else {
            self.excluded.insert(row)
        }
    }

    pub fn is_excluded(&self, row: usize) -> bool {
        self.excluded.contains(&row)
    }

    pub fn file_name(&self) -> String {
        output_file_name(&self.organization, &self.name)
    }

    pub fn run(&self, table: &SourceTable) -> Result<ConvertedTable, ConvertError> {
        if self.organization.is_empty() {
            return Err(ConvertError::MissingOrganization);
        }
        if self.name.is_empty() {
            return Err(ConvertError::MissingFileName);
        }
        if self.date_column >= table.headers().len() {
            return Err(ConvertError::ColumnOutOfRange(self.date_column));
        }
        let columns: Vec<(usize, &str)> = self.question_columns().collect();
        if columns.is_empty() {
            return Err(ConvertError::NoQuestionColumns);
        }
        if let Some((column, _)) = columns.iter().find(|(column, _)| *column >= table.headers().len()) {
            return Err(ConvertError::ColumnOutOfRange(*column));
        }

        let mut headers = vec![DATE_COLUMN.to_string()];
        headers.extend(columns.iter().map(|(_, question)| question.to_string()));

        let rows: Vec<Vec<String>> = (0..table.rows().len())
            .filter(|index| !self.is_excluded(*index))
            .map(|index| {
                let date = table.cell(index, self.date_column).unwrap_or_default();
                let mut out = vec![normalize_date(date, self.date_format)];
                out.extend(columns.iter().map(|(column, _)| {
                    let raw = table.cell(index, *column).unwrap_or_default();
                    map_likert_value(raw.trim()).to_string()
                }));
                out
            })
            .collect();

        debug!(
            org = %self.organization,
            rows = rows.len(),
            excluded = self.excluded.len(),
            "converted source table"
        );
        Ok(ConvertedTable {
            organization: self.organization.clone(),
            file_name: self.file_name(),
            headers,
            rows,
        })
    }
}

pub fn output_file_name(organization: &str, name: &str) -> String {
    let organization = organization.trim();
    let name = name.trim();
    if organization.is_empty() {
        format!("{name}.csv")
    } else {
        format!("{organization}_{name}.csv")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConvertedTable {
    pub organization: OrgId,
    pub file_name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl ConvertedTable {
    pub fn preview(&self) -> &[Vec<String>] {
        &self.rows[..self.rows.len().min(PREVIEW_ROWS)]
    }

    pub fn to_csv(&self) -> Result<String> {
        let mut writer = csv::WriterBuilder::new()
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(Vec::new());
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|err| anyhow!("failed to flush CSV output: {}", err.error()))?;
        String::from_utf8(bytes).context("converted CSV is not valid UTF-8")
    }

    /// Writes the table to `<dir>/<org>/<file name>`.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        let folder = dir.join(&self.organization);
        fs::create_dir_all(&folder)
            .with_context(|| format!("failed to create {}", folder.display()))?;
        let path = folder.join(&self.file_name);
        fs::write(&path, self.to_csv()?).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }
}

/// Prepared outputs waiting to be written, grouped by organization.
#[derive(Debug, Clone, Default)]
pub struct ConversionQueue {
    by_org: BTreeMap<OrgId, Vec<ConvertedTable>>,
}

impl ConversionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, table: ConvertedTable) {
        self.by_org.entry(table.organization.clone()).or_default().push(table);
    }

    pub fn remove(&mut self, organization: &str, index: usize) -> Option<ConvertedTable> {
        let items = self.by_org.get_mut(organization)?;
        if index >= items.len() {
            return None;
        }
        let removed = items.remove(index);
        if items.is_empty() {
            self.by_org.remove(organization);
        }
        Some(removed)
    }

    pub fn remove_organization(&mut self, organization: &str) -> Vec<ConvertedTable> {
        self.by_org.remove(organization).unwrap_or_default()
    }

    pub fn organizations(&self) -> impl Iterator<Item = &str> {
        self.by_org.keys().map(String::as_str)
    }

    pub fn items(&self, organization: &str) -> &[ConvertedTable] {
        self.by_org.get(organization).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.by_org.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_org.is_empty()
    }

    pub fn write_all(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        if self.is_empty() {
            return Err(anyhow!("nothing in the conversion queue"));
        }
        let mut written = Vec::with_capacity(self.len());
        for table in self.by_org.values().flatten() {
            let path = table.write_to(dir)?;
            info!(path = %path.display(), rows = table.rows.len(), "wrote converted file");
            written.push(path);
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> SourceTable {
        SourceTable::from_reader(
            "\u{feff}Timestamp , The curriculum is coherent,Comments,Leaders support me\n\
             3/4/2026,Strongly Agree,\"fine, thanks\",agree\n\
             \n\
             12/1/2026, neutral ,,7\n\
             3/15/2026,Banana,none,\n"
                .as_bytes(),
        )
        .unwrap()
    }

    #[test]
    fn dates_follow_the_input_format() {
        assert_eq!(normalize_date("3/4/2026", DateFormat::Mdy), "04/03/2026");
        assert_eq!(normalize_date("3/4/2026", DateFormat::Dmy), "03/04/2026");
        assert_eq!(normalize_date("12-25-2025", DateFormat::Mdy), "25/12/2025");
    }

    #[test]
    fn timestamps_keep_their_time_and_land_in_the_right_month() {
        let normalized = normalize_date("3/4/2026 10:30:00", DateFormat::Mdy);
        assert_eq!(normalized, "04/03/2026 10:30:00");
        assert_eq!(
            crate::month::MonthKey::from_row_date(&normalized),
            crate::month::MonthKey::new(2026, 3)
        );
    }

    #[test]
    fn unrecognized_dates_pass_through() {
        assert_eq!(normalize_date("not-a-date", DateFormat::Mdy), "not-a-date");
        assert_eq!(normalize_date("03/2026", DateFormat::Mdy), "03/2026");
        assert_eq!(normalize_date("", DateFormat::Dmy), "");
    }

    #[test]
    fn calendar_ranges_are_not_checked() {
        assert_eq!(normalize_date("13/40/2026", DateFormat::Mdy), "40/13/2026");
    }

    #[test]
    fn reader_trims_headers_and_skips_blank_lines() {
        let table = table();
        assert_eq!(table.headers()[0], "Timestamp");
        assert_eq!(table.rows().len(), 3);
        assert_eq!(table.cell(0, 2), Some("fine, thanks"));
    }

    #[test]
    fn run_maps_columns_and_normalizes_cells() {
        let mut conversion = Conversion::new("org2", "teacher_survey");
        conversion.map_column(1, "The curriculum is coherent");
        conversion.map_column(3, "Leaders support me");

        let out = conversion.run(&table()).unwrap();
        assert_eq!(out.file_name, "org2_teacher_survey.csv");
        assert_eq!(
            out.headers,
            ["date", "The curriculum is coherent", "Leaders support me"]
        );
        assert_eq!(out.rows[0], ["04/03/2026", "5", "4"]);
        assert_eq!(out.rows[1], ["01/12/2026", "3", "7"]);
        assert_eq!(out.rows[2], ["15/03/2026", "Banana", ""]);
    }

    #[test]
    fn excluded_rows_and_date_column_are_left_out() {
        let mut conversion = Conversion::new("org1", "leaders");
        conversion.select_columns(&table(), &[0, 3]);
        assert!(conversion.toggle_row_exclusion(1));
        assert!(conversion.toggle_row_exclusion(2));
        assert!(!conversion.toggle_row_exclusion(2));

        let out = conversion.run(&table()).unwrap();
        assert_eq!(out.headers, ["date", "Leaders support me"]);
        assert_eq!(out.rows.len(), 2);
        assert_eq!(out.rows[1][0], "15/03/2026");
    }

    #[test]
    fn blank_question_text_drops_a_mapping() {
        let mut conversion = Conversion::new("org1", "x");
        conversion.map_column(1, "Question");
        conversion.map_column(1, "   ");
        assert_eq!(conversion.run(&table()), Err(ConvertError::NoQuestionColumns));
    }

    #[test]
    fn run_requires_target_and_columns_in_range() {
        let mut conversion = Conversion::new("", "x");
        conversion.map_column(1, "Q");
        assert_eq!(conversion.run(&table()), Err(ConvertError::MissingOrganization));

        let mut conversion = Conversion::new("org1", " ");
        conversion.map_column(1, "Q");
        assert_eq!(conversion.run(&table()), Err(ConvertError::MissingFileName));

        let mut conversion = Conversion::new("org1", "x");
        conversion.map_column(9, "Q");
        assert_eq!(conversion.run(&table()), Err(ConvertError::ColumnOutOfRange(9)));
    }

    #[test]
    fn cell_edits_are_trimmed_and_used() {
        let mut source = table();
        source.edit_cell(2, 1, "  Agree ").unwrap();
        assert_eq!(source.cell(2, 1), Some("Agree"));
        assert_eq!(source.edit_cell(0, 8, "x"), Err(ConvertError::ColumnOutOfRange(8)));
        assert_eq!(source.edit_cell(99, 1, "Agree"), Err(ConvertError::RowOutOfRange(99)));

        let mut conversion = Conversion::new("org1", "x");
        conversion.map_column(1, "Q");
        assert_eq!(conversion.run(&source).unwrap().rows[2][1], "4");
    }

    #[test]
    fn csv_output_quotes_special_cells() {
        let out = ConvertedTable {
            organization: "org1".to_string(),
            file_name: "org1_x.csv".to_string(),
            headers: vec!["date".to_string(), "Is it \"good\", really?".to_string()],
            rows: vec![vec!["04/03/2026".to_string(), "line\nbreak".to_string()]],
        };
        let csv = out.to_csv().unwrap();
        assert!(csv.starts_with("date,\"Is it \"\"good\"\", really?\"\n"));
        assert!(csv.contains("04/03/2026,\"line\nbreak\""));
    }

    #[test]
    fn preview_is_capped() {
        let out = ConvertedTable {
            organization: "org1".to_string(),
            file_name: "org1_x.csv".to_string(),
            headers: vec!["date".to_string()],
            rows: vec![vec!["01/01/2026".to_string()]; 55],
        };
        assert_eq!(out.preview().len(), PREVIEW_ROWS);
    }

    #[test]
    fn file_names_prefix_the_organization() {
        assert_eq!(output_file_name("org3", "walkthrough"), "org3_walkthrough.csv");
        assert_eq!(output_file_name("", "walkthrough"), "walkthrough.csv");
    }

    #[test]
    fn queue_groups_by_organization_and_writes_folders() {
        let mut first = Conversion::new("org1", "teacher");
        first.map_column(1, "Q");
        let mut second = Conversion::new("org2", "teacher");
        second.map_column(1, "Q");

        let mut queue = ConversionQueue::new();
        queue.push(first.run(&table()).unwrap());
        queue.push(second.run(&table()).unwrap());
        queue.push(second.run(&table()).unwrap());
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.organizations().collect::<Vec<_>>(), ["org1", "org2"]);

        assert!(queue.remove("org2", 1).is_some());
        assert!(queue.remove("org2", 5).is_none());
        assert_eq!(queue.remove_organization("org1").len(), 1);
        assert_eq!(queue.organizations().collect::<Vec<_>>(), ["org2"]);

        let dir = tempfile::tempdir().unwrap();
        let written = queue.write_all(dir.path()).unwrap();
        assert_eq!(written, vec![dir.path().join("org2").join("org2_teacher.csv")]);
        let body = fs::read_to_string(&written[0]).unwrap();
        assert!(body.starts_with("date,Q\n04/03/2026,5\n"));
    }

    #[test]
    fn empty_queue_refuses_to_write() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ConversionQueue::new().write_all(dir.path()).is_err());
    }
}

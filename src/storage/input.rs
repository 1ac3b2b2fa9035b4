use anyhow::{Context, Result};
use calamine::{open_workbook_auto, Data, Reader};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

use crate::crawler::scheduler::Target;

/// Column holding the product page URL
pub const LINK_COLUMN: &str = "Details Page Link";

/// Optional column holding the product id
pub const ID_COLUMN: &str = "ASIN";

/// Extensions read as spreadsheets; anything else is read as CSV
const WORKBOOK_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xls", "ods"];

/// Seed used when sampling rows, so samples are repeatable
pub const SAMPLE_SEED: u64 = 42;

/// Input rows with every original column kept for the output
#[derive(Debug, Clone)]
pub struct InputTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    link_column: usize,
    id_column: Option<usize>,
}

impl InputTable {
    /// Read a CSV file, or the first sheet of a spreadsheet
    pub fn read(path: &Path) -> Result<Self> {
        let workbook = path.extension()
            .and_then(|extension| extension.to_str())
            .is_some_and(|extension| WORKBOOK_EXTENSIONS.contains(&extension.to_lowercase().as_str()));

        let table = if workbook {
            Self::from_workbook(path)
        } else {
            let file = std::fs::File::open(path)
                .context(format!("Failed to open input file: {}", path.display()))?;
            Self::from_reader(file)
        }
        .context(format!("Failed to read input file: {}", path.display()))?;

        info!("Loaded {} rows from {}", table.len(), path.display());
        Ok(table)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(reader);

        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            rows.push(record?.iter().map(str::to_string).collect());
        }

        Self::from_rows(headers, rows)
    }

    /// First worksheet of an Excel or OpenDocument file
    pub fn from_workbook(path: &Path) -> Result<Self> {
        let mut workbook = open_workbook_auto(path)?;
        let sheet = workbook.worksheet_range_at(0)
            .context("Workbook has no sheets")??;

        let mut lines = sheet.rows().map(|row| row.iter().map(cell_text).collect::<Vec<_>>());
        let headers = lines.next().context("Worksheet is empty")?;

        Self::from_rows(headers, lines.collect())
    }

    fn from_rows(headers: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self> {
        let headers: Vec<String> = headers.iter()
            .map(|header| header.trim_start_matches('\u{feff}').trim().to_string())
            .collect();

        let link_column = headers.iter()
            .position(|header| header == LINK_COLUMN)
            .with_context(|| format!("Input is missing the '{}' column", LINK_COLUMN))?;
        let id_column = headers.iter().position(|header| header == ID_COLUMN);

        let rows = rows.into_iter()
            .map(|mut row| {
                row.resize(headers.len(), String::new());
                row
            })
            .collect();

        debug!("Input columns: {:?}", headers);
        Ok(Self { headers, rows, link_column, id_column })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// Keep `size` rows picked with a fixed seed, in their input order
    pub fn sample(mut self, size: usize) -> Self {
        if size >= self.rows.len() {
            return self;
        }

        let mut rng = StdRng::seed_from_u64(SAMPLE_SEED);
        let mut picked = rand::seq::index::sample(&mut rng, self.rows.len(), size).into_vec();
        picked.sort_unstable();

        let mut rows = std::mem::take(&mut self.rows);
        self.rows = picked.into_iter()
            .map(|index| std::mem::take(&mut rows[index]))
            .collect();

        info!("Sampled {} rows", self.rows.len());
        self
    }

    /// The (id, url) pair of every row, in order
    pub fn targets(&self) -> Vec<Target> {
        self.rows.iter()
            .map(|row| Target {
                id: self.id_column.map(|column| row[column].trim().to_string()),
                url: row[self.link_column].trim().to_string(),
            })
            .collect()
    }
}

/// Spreadsheet cell as it would appear in a CSV export
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::Float(value) if value.fract() == 0.0 && value.abs() < 1e15 => format!("{}", *value as i64),
        other => other.to_string(),
    }
}

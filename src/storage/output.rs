use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;
use tracing::info;

use crate::crawler::task::TaskResult;
use crate::storage::input::InputTable;

/// Columns appended after the input's own columns
pub const RESULT_COLUMNS: [&str; 6] = [
    "availability",
    "availability_text",
    "average_stars",
    "total_reviews",
    "failure_reason",
    "attempts",
];

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Write the input rows with their results to a CSV file
pub fn write_results(path: &Path, table: &InputTable, results: &[TaskResult]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .context(format!("Failed to create directory: {}", parent.display()))?;
    }

    let file = std::fs::File::create(path)
        .context(format!("Failed to create output file: {}", path.display()))?;
    write_to(file, table, results)
        .context(format!("Failed to write output file: {}", path.display()))?;

    info!("Wrote {} rows to {}", results.len(), path.display());
    Ok(())
}

/// Write UTF-8 CSV with a BOM so spreadsheet tools pick the right encoding
pub fn write_to<W: Write>(mut writer: W, table: &InputTable, results: &[TaskResult]) -> Result<()> {
    anyhow::ensure!(
        table.len() == results.len(),
        "{} input rows but {} results",
        table.len(),
        results.len()
    );

    writer.write_all(UTF8_BOM)?;
    let mut csv = csv::Writer::from_writer(writer);

    let headers = table.headers().iter().map(String::as_str).chain(RESULT_COLUMNS);
    csv.write_record(headers)?;

    for (row, result) in table.rows().iter().zip(results) {
        let mut record = row.clone();
        record.extend(result_cells(result));
        csv.write_record(&record)?;
    }

    csv.flush()?;
    Ok(())
}

fn result_cells(result: &TaskResult) -> [String; 6] {
    [
        result.availability.to_string(),
        result.availability_text.clone().unwrap_or_default(),
        result.average_rating.map(|rating| rating.to_string()).unwrap_or_default(),
        result.review_count.map(|count| count.to_string()).unwrap_or_default(),
        result.failure_reason.map(|reason| reason.to_string()).unwrap_or_default(),
        result.attempts.to_string(),
    ]
}

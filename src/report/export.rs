//! Sorting and CSV export of compiled rows.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::info;

use crate::error::AppError;
use crate::report::atomic_writer::AtomicCsvWriter;
use crate::report::compile::CompiledRow;

/// How rows are ordered by display name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum SortOrder {
    /// Lowercased comparison, ties broken by ordinal comparison.
    #[default]
    CaseInsensitive,
    /// Plain byte-wise comparison.
    Ordinal,
}

/// Export settings.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub output_dir: PathBuf,
    pub file_prefix: String,
    pub sort_order: SortOrder,
    pub with_bom: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            file_prefix: "AppRegistrationsReport".to_string(),
            sort_order: SortOrder::default(),
            with_bom: false,
        }
    }
}

/// Stable sort by display name.
pub fn sort_rows(rows: &mut [CompiledRow], order: SortOrder) {
    rows.sort_by(|a, b| compare_names(&a.display_name, &b.display_name, order));
}

fn compare_names(a: &str, b: &str, order: SortOrder) -> Ordering {
    match order {
        SortOrder::Ordinal => a.cmp(b),
        SortOrder::CaseInsensitive => a
            .to_lowercase()
            .cmp(&b.to_lowercase())
            .then_with(|| a.cmp(b)),
    }
}

/// `{prefix}_{YYYYMMDD_HHMMSS}.csv` for the given run time.
pub fn report_file_name(prefix: &str, run_at: DateTime<Utc>) -> String {
    format!("{}_{}.csv", prefix, run_at.format("%Y%m%d_%H%M%S"))
}

/// Sorts the rows and writes the report, returning the final path.
///
/// The file only appears once every row has been written.
pub fn write_report(
    mut rows: Vec<CompiledRow>,
    options: &ExportOptions,
    run_at: DateTime<Utc>,
) -> Result<PathBuf, AppError> {
    sort_rows(&mut rows, options.sort_order);

    let path = options
        .output_dir
        .join(report_file_name(&options.file_prefix, run_at));

    let written = write_rows(&path, &rows, options.with_bom)?;
    info!("[REPORT] Wrote {} rows to {}", rows.len(), written.display());
    Ok(written)
}

fn write_rows(path: &Path, rows: &[CompiledRow], with_bom: bool) -> Result<PathBuf, AppError> {
    let mut writer = AtomicCsvWriter::new(path, with_bom)?;
    writer.write_record(CompiledRow::HEADERS)?;
    for row in rows {
        writer.write_record(row.fields())?;
    }
    writer.finish()
}

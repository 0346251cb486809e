//! Atomic CSV file writer with automatic cleanup on failure.
//!
//! Writes to a temporary file in the same directory as the destination,
//! then atomically replaces the destination on `finish()`. If dropped
//! before finishing, the temporary file is automatically cleaned up.

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use csv::Writer;
use tempfile::NamedTempFile;

use crate::error::AppError;

/// UTF-8 BOM bytes.
const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// An atomic CSV writer.
///
/// Nothing appears at the final path until `finish()` succeeds.
pub struct AtomicCsvWriter {
    writer: Writer<BufWriter<NamedTempFile>>,
    final_path: PathBuf,
}

impl AtomicCsvWriter {
    /// Creates a writer targeting `final_path`, optionally starting the file
    /// with a UTF-8 byte order mark.
    ///
    /// # Errors
    ///
    /// Returns `AppError::CsvWriteError` if the parent directory cannot be
    /// determined or the temporary file cannot be created.
    pub fn new(final_path: impl AsRef<Path>, with_bom: bool) -> Result<Self, AppError> {
        let final_path = final_path.as_ref().to_path_buf();

        let parent_dir = final_path.parent().ok_or_else(|| {
            AppError::CsvWriteError(format!(
                "Cannot determine parent directory for: {}",
                final_path.display()
            ))
        })?;

        let temp_file = NamedTempFile::new_in(parent_dir).map_err(|e| {
            AppError::CsvWriteError(format!("Failed to create temporary file: {}", e))
        })?;

        let mut buf_writer = BufWriter::new(temp_file);
        if with_bom {
            buf_writer
                .write_all(UTF8_BOM)
                .map_err(|e| AppError::CsvWriteError(format!("Failed to write BOM: {}", e)))?;
        }

        Ok(Self {
            writer: Writer::from_writer(buf_writer),
            final_path,
        })
    }

    /// Writes one record.
    pub fn write_record<I, T>(&mut self, record: I) -> Result<(), AppError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        self.writer
            .write_record(record)
            .map_err(|e| AppError::CsvWriteError(format!("Failed to write record: {}", e)))
    }

    /// Flushes all buffers and atomically persists the file to the final path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::CsvWriteError` if flushing or persisting fails.
    /// On error, the temporary file is cleaned up automatically.
    pub fn finish(self) -> Result<PathBuf, AppError> {
        let buf_writer = self.writer.into_inner().map_err(|e| {
            AppError::CsvWriteError(format!("Failed to flush CSV writer: {}", e.error()))
        })?;

        let named_temp = buf_writer.into_inner().map_err(|e| {
            AppError::CsvWriteError(format!("Failed to flush buffer: {}", e.error()))
        })?;

        named_temp.persist(&self.final_path).map_err(|e| {
            AppError::CsvWriteError(format!(
                "Failed to persist file to {}: {}",
                self.final_path.display(),
                e.error
            ))
        })?;

        Ok(self.final_path)
    }
}

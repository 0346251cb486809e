//! Report assembly: enrichment requests, row compilation and CSV export.

pub mod atomic_writer;
pub mod compile;
pub mod enrich;
pub mod export;

pub use compile::{compile_rows, CompiledRow, SignInIndex, SubRequestErrorPolicy};
pub use enrich::enrichment_requests;
pub use export::{write_report, ExportOptions, SortOrder};

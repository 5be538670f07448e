//! Native coverage data handling for the Gauntlet runner.
//!
//! Test environments write parallel data files; this crate combines them
//! under the configured path aliases, renders the textual report, and
//! builds the coveralls upload payload.

pub mod combine;
pub mod coveralls;
pub mod data;
pub mod report;

pub use combine::{canonical_path, combine};
pub use data::{find_parallel, load_combined, CoverageData, FileCoverage};
pub use report::render_report;

use std::fmt::Write;

use gauntlet_core::config::CoverageConfig;

use crate::data::{CoverageData, FileCoverage};

struct Row {
    name: String,
    stmts: usize,
    miss: usize,
    branches: usize,
    branch_miss: usize,
}

impl Row {
    fn from_file(name: &str, coverage: &FileCoverage) -> Self {
        Self {
            name: name.to_string(),
            stmts: coverage.possible_lines.len(),
            miss: coverage.missed_lines(),
            branches: coverage.possible_branches.len(),
            branch_miss: coverage.missed_branches(),
        }
    }

    fn percent(&self) -> u32 {
        let possible = self.stmts + self.branches;
        if possible == 0 {
            return 100;
        }
        let covered = (self.stmts - self.miss) + (self.branches - self.branch_miss);
        ((covered as f64 / possible as f64) * 100.0).round() as u32
    }
}

/// Renders the textual coverage report.
///
/// Files outside the configured logical source are dropped. Branch
/// columns appear only in branch mode.
pub fn render_report(data: &CoverageData, cfg: &CoverageConfig) -> String {
    let rows: Vec<Row> = data
        .files
        .iter()
        .filter(|(name, _)| in_source(name, cfg.source.as_deref()))
        .map(|(name, coverage)| Row::from_file(name, coverage))
        .collect();

    let branch = cfg.branch || data.meta.branch;
    let width = rows
        .iter()
        .map(|row| row.name.len())
        .chain(["Name".len(), "TOTAL".len()])
        .max()
        .unwrap_or(0);

    let mut total = Row {
        name: "TOTAL".to_string(),
        stmts: 0,
        miss: 0,
        branches: 0,
        branch_miss: 0,
    };
    for row in &rows {
        total.stmts += row.stmts;
        total.miss += row.miss;
        total.branches += row.branches;
        total.branch_miss += row.branch_miss;
    }

    let mut out = String::new();
    let columns = if branch { 5 } else { 3 };
    write_header(&mut out, width, branch);
    let _ = writeln!(out, "{}", "-".repeat(width + columns * 7));
    for row in &rows {
        write_row(&mut out, row, width, branch);
    }
    if !rows.is_empty() {
        let _ = writeln!(out, "{}", "-".repeat(width + columns * 7));
    }
    write_row(&mut out, &total, width, branch);
    out
}

fn in_source(name: &str, source: Option<&str>) -> bool {
    match source {
        Some(package) => name.split('/').any(|component| component == package),
        None => true,
    }
}

fn write_header(out: &mut String, width: usize, branch: bool) {
    let _ = if branch {
        writeln!(
            out,
            "{:<width$} {:>6} {:>6} {:>6} {:>6} {:>6}",
            "Name", "Stmts", "Miss", "Branch", "BrMiss", "Cover"
        )
    } else {
        writeln!(
            out,
            "{:<width$} {:>6} {:>6} {:>6}",
            "Name", "Stmts", "Miss", "Cover"
        )
    };
}

fn write_row(out: &mut String, row: &Row, width: usize, branch: bool) {
    let cover = format!("{}%", row.percent());
    let _ = if branch {
        writeln!(
            out,
            "{:<width$} {:>6} {:>6} {:>6} {:>6} {:>6}",
            row.name, row.stmts, row.miss, row.branches, row.branch_miss, cover
        )
    } else {
        writeln!(
            out,
            "{:<width$} {:>6} {:>6} {:>6}",
            row.name, row.stmts, row.miss, cover
        )
    };
}

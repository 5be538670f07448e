use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use gauntlet_core::constants::{DATA_FILE, DATA_FILE_PREFIX};

/// Recorded coverage for a set of source files.
///
/// Parallel data files (`.coverage.<suffix>`) and the combined data file
/// (`.coverage`) share this JSON schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageData {
    #[serde(default)]
    pub meta: Meta,
    #[serde(default)]
    pub files: BTreeMap<String, FileCoverage>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    #[serde(default)]
    pub branch: bool,
}

/// Line and branch coverage of one file. Branches are recorded as
/// `(from_line, to_line)` transitions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCoverage {
    #[serde(default)]
    pub executed_lines: BTreeSet<u32>,
    #[serde(default)]
    pub possible_lines: BTreeSet<u32>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub executed_branches: BTreeSet<(u32, u32)>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub possible_branches: BTreeSet<(u32, u32)>,
}

impl FileCoverage {
    pub fn missed_lines(&self) -> usize {
        self.possible_lines
            .difference(&self.executed_lines)
            .count()
    }

    pub fn missed_branches(&self) -> usize {
        self.possible_branches
            .difference(&self.executed_branches)
            .count()
    }

    /// Unions another record into this one.
    pub fn merge(&mut self, other: &FileCoverage) {
        self.executed_lines.extend(&other.executed_lines);
        self.possible_lines.extend(&other.possible_lines);
        self.executed_branches.extend(&other.executed_branches);
        self.possible_branches.extend(&other.possible_branches);
    }
}

impl CoverageData {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read coverage data: {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("failed to parse coverage data: {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self).context("failed to encode coverage data")?;
        std::fs::write(path, text)
            .with_context(|| format!("failed to write coverage data: {}", path.display()))
    }

    /// Unions a file record into this data set under the given path.
    pub fn merge_file(&mut self, path: String, coverage: &FileCoverage) {
        self.files.entry(path).or_default().merge(coverage);
    }
}

/// Finds parallel data files in `dir`, sorted by name.
pub fn find_parallel(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory '{}'", dir.display()))?;

    let mut found = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("failed to list '{}'", dir.display()))?;
        let name = entry.file_name();
        if name.to_string_lossy().starts_with(DATA_FILE_PREFIX) {
            found.push(entry.path());
        }
    }
    found.sort();
    Ok(found)
}

/// Loads the combined data file produced by a combine run.
pub fn load_combined(dir: &Path) -> Result<CoverageData> {
    let path = dir.join(DATA_FILE);
    if !path.is_file() {
        return Err(anyhow!(
            "no combined coverage data ('{}') in '{}': run 'gnt cov:combine' first",
            DATA_FILE,
            dir.display()
        ));
    }
    CoverageData::load(&path)
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn file_cov(
        executed: &[u32],
        possible: &[u32],
        branches: &[((u32, u32), bool)],
    ) -> FileCoverage {
        let mut cov = FileCoverage {
            executed_lines: executed.iter().copied().collect(),
            possible_lines: possible.iter().copied().collect(),
            ..FileCoverage::default()
        };
        for ((from, to), taken) in branches {
            cov.possible_branches.insert((*from, *to));
            if *taken {
                cov.executed_branches.insert((*from, *to));
            }
        }
        cov
    }

    #[test]
    fn merge_unions_lines_and_branches() {
        let mut left = file_cov(&[1, 2], &[1, 2, 3], &[((1, 2), true), ((1, 3), false)]);
        let right = file_cov(&[3], &[1, 2, 3], &[((1, 3), true)]);
        left.merge(&right);

        assert_eq!(left.missed_lines(), 0);
        assert_eq!(left.missed_branches(), 0);
    }

    #[test]
    fn missed_counts_ignore_spurious_executed_entries() {
        // executed lines outside the possible set must not go negative
        let cov = file_cov(&[1, 99], &[1, 2], &[]);
        assert_eq!(cov.missed_lines(), 1);
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".coverage");
        let mut data = CoverageData::default();
        data.meta.branch = true;
        data.files.insert(
            "src/pkg/mod.py".to_string(),
            file_cov(&[1], &[1, 2], &[((1, 2), true)]),
        );

        data.save(&path).unwrap();
        let loaded = CoverageData::load(&path).unwrap();
        assert_eq!(loaded, data);
    }

    #[test]
    fn find_parallel_skips_the_combined_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".coverage"), "{}").unwrap();
        std::fs::write(dir.path().join(".coverage.a"), "{}").unwrap();
        std::fs::write(dir.path().join(".coverage.b"), "{}").unwrap();
        std::fs::write(dir.path().join("unrelated.txt"), "").unwrap();

        let found = find_parallel(dir.path()).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![".coverage.a", ".coverage.b"]);
    }

    #[test]
    fn load_combined_reports_missing_data() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_combined(dir.path()).expect_err("must fail");
        assert!(err.to_string().contains("cov:combine"));
    }
}

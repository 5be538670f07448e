use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::{debug, info};

use gauntlet_core::cmdline::glob_match;
use gauntlet_core::config::{CoverageConfig, PathAliases};
use gauntlet_core::constants::{DATA_FILE, DATA_FILE_PREFIX};

use crate::data::{find_parallel, CoverageData};

/// Combines all parallel data files in `dir` into the single combined
/// data file, canonicalizing recorded paths through the alias sets.
/// The parallel inputs are removed afterwards.
pub fn combine(dir: &Path, cfg: &CoverageConfig) -> Result<CoverageData> {
    let inputs = find_parallel(dir)?;
    if inputs.is_empty() {
        bail!(
            "no parallel coverage data files ('{}*') found in '{}'",
            DATA_FILE_PREFIX,
            dir.display()
        );
    }

    let mut combined = CoverageData::default();
    combined.meta.branch = cfg.branch;

    for path in &inputs {
        let data = CoverageData::load(path)?;
        combined.meta.branch |= data.meta.branch;
        for (file, coverage) in &data.files {
            let canonical = canonical_path(file, &cfg.paths);
            if canonical != *file {
                debug!(target: "gauntlet", "remapped '{}' to '{}'", file, canonical);
            }
            combined.merge_file(canonical, coverage);
        }
    }

    combined.save(&dir.join(DATA_FILE))?;
    for path in &inputs {
        std::fs::remove_file(path)
            .with_context(|| format!("failed to remove '{}'", path.display()))?;
    }
    info!(
        target: "gauntlet",
        "combined {} data files into {}",
        inputs.len(),
        DATA_FILE
    );

    Ok(combined)
}

/// Rewrites a recorded path onto the canonical prefix of the first alias
/// set it matches. Alias prefixes are matched per path component, with
/// `*`/`?` wildcards, so `.tox/*/site-packages/` covers every env dir.
pub fn canonical_path(path: &str, aliases: &[PathAliases]) -> String {
    for set in aliases {
        let Some(canonical) = set.prefixes.first() else {
            continue;
        };
        for prefix in &set.prefixes {
            if let Some(remainder) = match_prefix(path, prefix) {
                let canonical = canonical.trim_end_matches('/');
                return if remainder.is_empty() {
                    canonical.to_string()
                } else {
                    format!("{canonical}/{remainder}")
                };
            }
        }
    }
    path.to_string()
}

/// Matches `prefix` against the leading components of `path`, returning
/// the unmatched remainder.
fn match_prefix(path: &str, prefix: &str) -> Option<String> {
    let wanted: Vec<&str> = prefix.split('/').filter(|c| !c.is_empty()).collect();
    let components: Vec<&str> = path.split('/').collect();
    if components.len() < wanted.len() {
        return None;
    }

    for (pattern, component) in wanted.iter().zip(&components) {
        if !glob_match(pattern, component) {
            return None;
        }
    }

    Some(components[wanted.len()..].join("/"))
}

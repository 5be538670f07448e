use serde_json::{json, Value};

use crate::data::{CoverageData, FileCoverage};

/// Builds the jobs payload for the coveralls API.
///
/// Each source file carries a per-line hit vector: `null` for
/// non-executable lines, `1` for executed lines, `0` for missed ones.
pub fn jobs_payload(
    data: &CoverageData,
    repo_token: &str,
    service_name: &str,
    service_job_id: Option<&str>,
) -> Value {
    let source_files: Vec<Value> = data
        .files
        .iter()
        .map(|(name, coverage)| {
            json!({
                "name": name,
                "coverage": hit_vector(coverage),
            })
        })
        .collect();

    let mut payload = json!({
        "repo_token": repo_token,
        "service_name": service_name,
        "source_files": source_files,
    });
    if let Some(job_id) = service_job_id {
        payload["service_job_id"] = json!(job_id);
    }
    payload
}

fn hit_vector(coverage: &FileCoverage) -> Vec<Value> {
    let last = coverage
        .possible_lines
        .iter()
        .next_back()
        .copied()
        .unwrap_or(0);

    (1..=last)
        .map(|line| {
            if !coverage.possible_lines.contains(&line) {
                Value::Null
            } else if coverage.executed_lines.contains(&line) {
                json!(1)
            } else {
                json!(0)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_carries_token_service_and_files() {
        let mut data = CoverageData::default();
        data.files.insert(
            "src/pkg/mod.py".to_string(),
            FileCoverage {
                executed_lines: [1, 3].into(),
                possible_lines: [1, 3, 4].into(),
                ..FileCoverage::default()
            },
        );

        let payload = jobs_payload(&data, "tok", "gauntlet", Some("42"));
        assert_eq!(payload["repo_token"], "tok");
        assert_eq!(payload["service_name"], "gauntlet");
        assert_eq!(payload["service_job_id"], "42");

        let files = payload["source_files"].as_array().expect("array");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0]["name"], "src/pkg/mod.py");
        // line 2 is non-executable, line 4 is missed
        assert_eq!(
            files[0]["coverage"],
            json!([1, Value::Null, 1, 0])
        );
    }

    #[test]
    fn job_id_is_omitted_when_absent() {
        let payload = jobs_payload(&CoverageData::default(), "tok", "gauntlet", None);
        assert!(payload.get("service_job_id").is_none());
        assert_eq!(payload["source_files"], json!([]));
    }
}

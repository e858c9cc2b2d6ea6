//! Deterministic classification of runs against fetched status files.

use std::collections::HashMap;

use thiserror::Error;

use crate::core::types::Run;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClassifyError {
    #[error("status file {path} holds non-integer content {content:?}")]
    InvalidStatusCode { path: String, content: String },
}

/// Runs partitioned by their recorded status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    /// No status file: never attempted, or the attempt never finished.
    pub incomplete: Vec<Run>,
    /// Status file present with a non-zero code.
    pub failures: Vec<Run>,
    /// Status file present with code `0`.
    pub completed: Vec<Run>,
}

impl Classification {
    pub fn total(&self) -> usize {
        self.incomplete.len() + self.failures.len() + self.completed.len()
    }

    /// Flatten into report order: failures, then completed, then incomplete.
    pub fn into_summary(self) -> Vec<Run> {
        let mut runs = self.failures;
        runs.extend(self.completed);
        runs.extend(self.incomplete);
        runs
    }
}

/// Parse status file content as a base-10 exit code.
///
/// Surrounding whitespace is ignored; anything else is an error.
pub fn parse_status_code(path: &str, content: &[u8]) -> Result<i32, ClassifyError> {
    let text = String::from_utf8_lossy(content);
    text.trim()
        .parse::<i32>()
        .map_err(|_| ClassifyError::InvalidStatusCode {
            path: path.to_string(),
            content: text.into_owned(),
        })
}

/// Partition `runs` using `statuses`, a map of status file path to content.
///
/// Runs whose status path is absent from the map are `incomplete`. Resolved
/// runs are annotated with their status code and status. Input order is
/// preserved within each partition.
pub fn classify_runs(
    runs: &[Run],
    statuses: &HashMap<String, Vec<u8>>,
) -> Result<Classification, ClassifyError> {
    let mut classification = Classification::default();
    for run in runs {
        let path = run.status_code_path();
        let Some(content) = statuses.get(&path) else {
            classification.incomplete.push(run.clone());
            continue;
        };
        let code = parse_status_code(&path, content)?;
        let mut run = run.clone();
        run.resolve(code);
        if code == 0 {
            classification.completed.push(run);
        } else {
            classification.failures.push(run);
        }
    }
    Ok(classification)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::RunStatus;

    fn run(idx: usize) -> Run {
        Run::new(format!("echo {idx}"), format!("mem://out/{idx}"), "/tmp/r/")
    }

    fn statuses(entries: &[(usize, &str)]) -> HashMap<String, Vec<u8>> {
        entries
            .iter()
            .map(|(idx, content)| {
                (
                    format!("mem://out/{idx}/status_code"),
                    content.as_bytes().to_vec(),
                )
            })
            .collect()
    }

    #[test]
    fn partitions_by_status_code() {
        let runs = vec![run(0), run(1), run(2), run(3)];
        let map = statuses(&[(0, "0"), (1, "1"), (3, "-1\n")]);

        let classification = classify_runs(&runs, &map).expect("classify");

        assert_eq!(classification.completed.len(), 1);
        assert_eq!(classification.completed[0].cmd, "echo 0");
        assert_eq!(classification.completed[0].status, Some(RunStatus::Completed));
        let failed: Vec<_> = classification
            .failures
            .iter()
            .map(|r| (r.cmd.as_str(), r.status_code))
            .collect();
        assert_eq!(failed, vec![("echo 1", Some(1)), ("echo 3", Some(-1))]);
        assert_eq!(classification.incomplete, vec![run(2)]);
    }

    #[test]
    fn missing_status_is_incomplete_not_failure() {
        let runs = vec![run(0)];
        let classification = classify_runs(&runs, &HashMap::new()).expect("classify");
        assert_eq!(classification.incomplete.len(), 1);
        assert!(classification.failures.is_empty());
        assert!(classification.completed.is_empty());
        assert_eq!(classification.incomplete[0].status_code, None);
    }

    #[test]
    fn non_integer_status_fails_loudly() {
        let runs = vec![run(0)];
        let err = classify_runs(&runs, &statuses(&[(0, "None")])).unwrap_err();
        assert_eq!(
            err,
            ClassifyError::InvalidStatusCode {
                path: "mem://out/0/status_code".to_string(),
                content: "None".to_string(),
            }
        );
    }

    #[test]
    fn classification_is_idempotent() {
        let runs = vec![run(0), run(1), run(2)];
        let map = statuses(&[(0, "0"), (2, "7")]);
        let first = classify_runs(&runs, &map).expect("first");
        let second = classify_runs(&runs, &map).expect("second");
        assert_eq!(first, second);
    }

    #[test]
    fn summary_orders_failures_completed_incomplete() {
        let runs = vec![run(0), run(1), run(2)];
        let map = statuses(&[(1, "0"), (2, "1")]);
        let summary = classify_runs(&runs, &map).expect("classify").into_summary();
        let cmds: Vec<_> = summary.iter().map(|r| r.cmd.as_str()).collect();
        assert_eq!(cmds, vec!["echo 2", "echo 1", "echo 0"]);
    }
}

//! Turning a finished recognition job into the document we store.

use schemars::JsonSchema;

use crate::{
    ocr::{JobStatus, RecognitionJob},
    prelude::*,
};

use super::PipelineError;

/// The JSON document written for each recognized image.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RecognitionDocument {
    /// Name of the source image, as it appeared in the input store.
    pub filename: String,

    /// Every recognized line, page by page, in the order the OCR service
    /// returned them.
    pub lines: Vec<String>,
}

impl RecognitionDocument {
    /// Serialize as pretty-printed UTF-8 JSON (two-space indent).
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }
}

/// Flatten a succeeded job's pages into a [`RecognitionDocument`].
///
/// Lines are neither sorted, deduplicated nor trimmed. A job that succeeded
/// without finding text yields an empty `lines`.
pub fn assemble(filename: &str, job: &RecognitionJob) -> Result<RecognitionDocument, PipelineError> {
    if job.status != JobStatus::Succeeded {
        return Err(PipelineError::Precondition { status: job.status });
    }
    Ok(RecognitionDocument {
        filename: filename.to_owned(),
        lines: job.pages.iter().flatten().cloned().collect(),
    })
}

#[cfg(test)]
mod tests {
    use crate::ocr::{OperationHandle, StatusReport};

    use super::*;

    fn job_with(status: JobStatus, pages: Vec<Vec<&str>>) -> RecognitionJob {
        let mut job = RecognitionJob::submitted(OperationHandle::new("op"));
        job.apply(StatusReport {
            status,
            pages: pages
                .into_iter()
                .map(|page| page.into_iter().map(str::to_owned).collect())
                .collect(),
            failure_detail: None,
        });
        job
    }

    #[test]
    fn test_lines_follow_page_then_line_order() {
        let job = job_with(
            JobStatus::Succeeded,
            vec![vec!["p1 a", "p1 b"], vec![], vec!["p3 a", "p1 a", "p3 c"]],
        );
        let document = assemble("scan.png", &job).unwrap();
        assert_eq!(document.filename, "scan.png");
        assert_eq!(document.lines, ["p1 a", "p1 b", "p3 a", "p1 a", "p3 c"]);
    }

    #[test]
    fn test_line_count_is_sum_of_page_counts() {
        for counts in [vec![], vec![0], vec![3], vec![1, 0, 4, 2]] {
            let pages = counts
                .iter()
                .enumerate()
                .map(|(page, &count)| {
                    (0..count)
                        .map(|line| format!("{page}:{line}"))
                        .collect::<Vec<_>>()
                })
                .collect::<Vec<_>>();
            let mut job = RecognitionJob::submitted(OperationHandle::new("op"));
            job.apply(StatusReport {
                status: JobStatus::Succeeded,
                pages,
                failure_detail: None,
            });
            let document = assemble("x.png", &job).unwrap();
            assert_eq!(document.lines.len(), counts.iter().sum::<usize>());
        }
    }

    #[test]
    fn test_succeeded_without_text_is_empty_not_error() {
        let job = job_with(JobStatus::Succeeded, vec![]);
        assert!(assemble("blank.png", &job).unwrap().lines.is_empty());
    }

    #[test]
    fn test_refuses_unfinished_or_failed_jobs() {
        for status in [JobStatus::NotStarted, JobStatus::Running, JobStatus::Failed] {
            let job = job_with(status, vec![]);
            assert!(matches!(
                assemble("x.png", &job),
                Err(PipelineError::Precondition { .. })
            ));
        }
    }

    #[test]
    fn test_json_shape_and_round_trip() {
        let document = RecognitionDocument {
            filename: "a.png".to_owned(),
            lines: vec!["x".to_owned(), "y".to_owned()],
        };
        let json = String::from_utf8(document.to_json().unwrap()).unwrap();
        assert_eq!(
            json,
            "{\n  \"filename\": \"a.png\",\n  \"lines\": [\n    \"x\",\n    \"y\"\n  ]\n}"
        );
        let parsed: RecognitionDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, document);
    }
}

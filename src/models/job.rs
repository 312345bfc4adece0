use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Status of an image job on the backend.
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Done,
    Error,
}

impl JobStatus {
    /// `done` and `error` never transition again.
    pub fn is_final(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error)
    }

    /// Human readable status line shown next to a job.
    pub fn message(self) -> &'static str {
        match self {
            JobStatus::Queued => "Job is in queue",
            JobStatus::Processing => "Processing image...",
            JobStatus::Done => "Processing complete",
            JobStatus::Error => "An error occurred",
        }
    }
}

/// Output of a successful sheep count.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Detection {
    pub sheep_count: u32,
    /// Annotated image, relative to the backend base URL.
    pub image: String,
    /// Processing time in seconds.
    pub duration: f64,
    /// Generated report, relative to the backend base URL.
    pub report: String,
}

/// Result attached to a job once it reaches a final status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum JobResult {
    Detection(Detection),
    Failure { error: String },
}

impl JobResult {
    fn matches(&self, status: JobStatus) -> bool {
        matches!(
            (status, self),
            (JobStatus::Done, JobResult::Detection(_))
                | (JobStatus::Error, JobResult::Failure { .. })
        )
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum JobInvariantError {
    #[error("job {id} has status {status} but no result")]
    MissingResult { id: String, status: JobStatus },

    #[error("job {id} has status {status} but carries a result")]
    UnexpectedResult { id: String, status: JobStatus },

    #[error("job {id} has status {status} but the result shape does not match")]
    MismatchedResult { id: String, status: JobStatus },
}

/// A job as returned by the backend.
///
/// Deserialization goes through [`WireJob`] so a `Job` value always satisfies
/// the status/result pairing: `result` is present exactly when the status is
/// final, `done` carries a [`Detection`] and `error` carries a failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "WireJob")]
pub struct Job {
    pub id: String,
    pub filename: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub result: Option<JobResult>,
}

impl Job {
    pub fn new(
        id: impl Into<String>,
        filename: impl Into<String>,
        status: JobStatus,
        created_at: DateTime<Utc>,
        result: Option<JobResult>,
    ) -> Result<Self, JobInvariantError> {
        WireJob {
            id: id.into(),
            filename: filename.into(),
            status,
            created_at,
            result,
        }
        .try_into()
    }

    pub fn is_final(&self) -> bool {
        self.status.is_final()
    }

    pub fn detection(&self) -> Option<&Detection> {
        match &self.result {
            Some(JobResult::Detection(detection)) => Some(detection),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&str> {
        match &self.result {
            Some(JobResult::Failure { error }) => Some(error),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireJob {
    id: String,
    filename: String,
    status: JobStatus,
    #[serde(deserialize_with = "deserialize_timestamp")]
    created_at: DateTime<Utc>,
    #[serde(default)]
    result: Option<JobResult>,
}

impl TryFrom<WireJob> for Job {
    type Error = JobInvariantError;

    fn try_from(wire: WireJob) -> Result<Self, Self::Error> {
        let WireJob {
            id,
            filename,
            status,
            created_at,
            result,
        } = wire;

        match (&result, status.is_final()) {
            (None, true) => return Err(JobInvariantError::MissingResult { id, status }),
            (Some(_), false) => return Err(JobInvariantError::UnexpectedResult { id, status }),
            (Some(r), true) if !r.matches(status) => {
                return Err(JobInvariantError::MismatchedResult { id, status })
            }
            _ => {}
        }

        Ok(Job {
            id,
            filename,
            status,
            created_at,
            result,
        })
    }
}

/// Accepts RFC 3339 timestamps, and naive ISO 8601 timestamps which are taken as UTC.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| serde::de::Error::custom(format!("invalid timestamp {raw:?}: {e}")))
}

/// One page of the job history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobsPage {
    pub items: Vec<Job>,
    pub total: u64,
    pub limit: u64,
    pub offset: u64,
}

impl JobsPage {
    /// Number of pages needed to show `total` jobs at `limit` per page.
    pub fn page_count(&self) -> u64 {
        page_count(self.total, self.limit)
    }

    /// Orders items by creation time, newest first.
    pub fn sort_newest_first(&mut self) {
        sort_newest_first(&mut self.items);
    }
}

pub fn page_count(total: u64, limit: u64) -> u64 {
    if limit == 0 {
        return 0;
    }
    total.div_ceil(limit)
}

pub fn sort_newest_first(jobs: &mut [Job]) {
    jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn parse(json: &str) -> Result<Job, serde_json::Error> {
        serde_json::from_str(json)
    }

    #[test]
    fn test_queued_job_without_result() {
        let job = parse(
            r#"{"id":"abc","filename":"sheep.jpg","status":"queued","created_at":"2024-05-01T10:00:00Z","result":null}"#,
        )
        .unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.result.is_none());
        assert!(!job.is_final());
    }

    #[test]
    fn test_done_job_parses_detection() {
        let job = parse(
            r#"{"id":"abc","filename":"sheep.jpg","status":"done","created_at":"2024-05-01T10:00:00Z",
                "result":{"sheep_count":7,"image":"/static/abc.jpg","duration":1.25,"report":"/static/abc.pdf"}}"#,
        )
        .unwrap();
        let detection = job.detection().unwrap();
        assert_eq!(detection.sheep_count, 7);
        assert_eq!(detection.report, "/static/abc.pdf");
        assert!(job.failure().is_none());
    }

    #[test]
    fn test_error_job_parses_failure() {
        let job = parse(
            r#"{"id":"abc","filename":"sheep.jpg","status":"error","created_at":"2024-05-01T10:00:00Z",
                "result":{"error":"model crashed"}}"#,
        )
        .unwrap();
        assert_eq!(job.failure(), Some("model crashed"));
        assert!(job.detection().is_none());
    }

    #[test]
    fn test_final_status_requires_result() {
        let err = parse(
            r#"{"id":"abc","filename":"sheep.jpg","status":"done","created_at":"2024-05-01T10:00:00Z"}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("no result"));
    }

    #[test]
    fn test_pending_status_rejects_result() {
        let err = parse(
            r#"{"id":"abc","filename":"sheep.jpg","status":"processing","created_at":"2024-05-01T10:00:00Z",
                "result":{"error":"early"}}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("carries a result"));
    }

    #[test]
    fn test_result_shape_must_match_status() {
        let err = Job::new(
            "abc",
            "sheep.jpg",
            JobStatus::Done,
            Utc::now(),
            Some(JobResult::Failure {
                error: "nope".to_string(),
            }),
        )
        .unwrap_err();
        assert!(matches!(err, JobInvariantError::MismatchedResult { .. }));
    }

    #[test]
    fn test_naive_timestamp_is_utc() {
        let job = parse(
            r#"{"id":"abc","filename":"sheep.jpg","status":"queued","created_at":"2024-05-01T10:00:00.250000"}"#,
        )
        .unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
            + chrono::Duration::milliseconds(250);
        assert_eq!(job.created_at, expected);
    }

    #[test]
    fn test_page_count_rounds_up() {
        assert_eq!(page_count(12, 5), 3);
        assert_eq!(page_count(10, 5), 2);
        assert_eq!(page_count(0, 5), 0);
        assert_eq!(page_count(3, 0), 0);
    }

    #[test]
    fn test_sort_newest_first() {
        let jan = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let feb = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let older = Job::new("a", "a.jpg", JobStatus::Queued, jan, None).unwrap();
        let newer = Job::new("b", "b.jpg", JobStatus::Queued, feb, None).unwrap();
        let mut page = JobsPage {
            items: vec![older, newer],
            total: 2,
            limit: 10,
            offset: 0,
        };
        page.sort_newest_first();
        assert_eq!(page.items[0].id, "b");
        assert_eq!(page.items[1].id, "a");
    }

    #[test]
    fn test_status_messages() {
        assert_eq!(JobStatus::Queued.message(), "Job is in queue");
        assert_eq!(JobStatus::Error.message(), "An error occurred");
        assert_eq!(JobStatus::Processing.to_string(), "processing");
        assert_eq!("done".parse::<JobStatus>().unwrap(), JobStatus::Done);
    }
}

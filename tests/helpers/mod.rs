//! Test helper utilities: job fixtures and a scripted in-memory job service.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use sheep_counter_client::models::job::{Detection, Job, JobResult, JobStatus, JobsPage};
use sheep_counter_client::services::api::{ApiError, JobApi};
use sheep_counter_client::services::upload::UploadFile;

pub fn created(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 9, minute, 0).unwrap()
}

pub fn queued(id: &str, minute: u32) -> Job {
    Job::new(id, format!("{id}.jpg"), JobStatus::Queued, created(minute), None).unwrap()
}

pub fn processing(id: &str, minute: u32) -> Job {
    Job::new(id, format!("{id}.jpg"), JobStatus::Processing, created(minute), None).unwrap()
}

pub fn done(id: &str, minute: u32, sheep_count: u32) -> Job {
    Job::new(
        id,
        format!("{id}.jpg"),
        JobStatus::Done,
        created(minute),
        Some(JobResult::Detection(Detection {
            sheep_count,
            image: format!("/static/{id}.jpg"),
            duration: 0.8,
            report: format!("/static/{id}.pdf"),
        })),
    )
    .unwrap()
}

pub fn failed(id: &str, minute: u32, error: &str) -> Job {
    Job::new(
        id,
        format!("{id}.jpg"),
        JobStatus::Error,
        created(minute),
        Some(JobResult::Failure {
            error: error.to_string(),
        }),
    )
    .unwrap()
}

/// What the scripted service answers to one `fetch_one`.
#[derive(Debug, Clone)]
pub enum Reply {
    Job(Job),
    NotFound,
    Fail,
}

impl Reply {
    fn into_result(self, id: &str) -> Result<Job, ApiError> {
        match self {
            Reply::Job(job) => Ok(job),
            Reply::NotFound => Err(ApiError::NotFound(id.to_string())),
            Reply::Fail => Err(ApiError::Api {
                status: 500,
                message: "internal error".to_string(),
            }),
        }
    }
}

/// In-memory job service. Each id answers from its script in order and
/// repeats the last reply once the script runs out.
#[derive(Default)]
pub struct ScriptedApi {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    delays: Mutex<HashMap<String, Duration>>,
    history: Mutex<Vec<Job>>,
    submit_reply: Mutex<Option<Reply>>,
    fetch_one_calls: Mutex<Vec<String>>,
    fetch_page_calls: Mutex<Vec<(u64, u64)>>,
    submitted: Mutex<Vec<UploadFile>>,
    fail_pages: Mutex<bool>,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, id: &str, replies: impl IntoIterator<Item = Reply>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(id.to_string(), replies.into_iter().collect());
        self
    }

    /// Every `fetch_one(id)` takes `delay` before answering.
    pub fn delay(self, id: &str, delay: Duration) -> Self {
        self.delays.lock().unwrap().insert(id.to_string(), delay);
        self
    }

    /// Jobs served by `fetch_page`, in the order given (not sorted).
    pub fn history(self, jobs: Vec<Job>) -> Self {
        *self.history.lock().unwrap() = jobs;
        self
    }

    pub fn on_submit(self, reply: Reply) -> Self {
        *self.submit_reply.lock().unwrap() = Some(reply);
        self
    }

    pub fn failing_pages(self) -> Self {
        *self.fail_pages.lock().unwrap() = true;
        self
    }

    pub fn fetch_one_count(&self, id: &str) -> usize {
        self.fetch_one_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|called| called.as_str() == id)
            .count()
    }

    pub fn total_fetch_one_calls(&self) -> usize {
        self.fetch_one_calls.lock().unwrap().len()
    }

    pub fn fetch_page_calls(&self) -> Vec<(u64, u64)> {
        self.fetch_page_calls.lock().unwrap().clone()
    }

    pub fn submitted(&self) -> Vec<UploadFile> {
        self.submitted.lock().unwrap().clone()
    }

    fn next_reply(&self, id: &str) -> Reply {
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(id) {
            Some(script) if script.len() > 1 => script.pop_front().unwrap(),
            Some(script) => script.front().cloned().unwrap_or(Reply::NotFound),
            None => Reply::NotFound,
        }
    }
}

#[async_trait]
impl JobApi for ScriptedApi {
    async fn submit(&self, file: UploadFile) -> Result<Job, ApiError> {
        self.submitted.lock().unwrap().push(file);
        let reply = self
            .submit_reply
            .lock()
            .unwrap()
            .clone()
            .unwrap_or(Reply::Fail);
        reply.into_result("upload")
    }

    async fn fetch_one(&self, id: &str) -> Result<Job, ApiError> {
        self.fetch_one_calls.lock().unwrap().push(id.to_string());
        let delay = self.delays.lock().unwrap().get(id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.next_reply(id).into_result(id)
    }

    async fn fetch_page(&self, limit: u64, offset: u64) -> Result<JobsPage, ApiError> {
        self.fetch_page_calls.lock().unwrap().push((limit, offset));
        if *self.fail_pages.lock().unwrap() {
            return Err(ApiError::Api {
                status: 503,
                message: "unavailable".to_string(),
            });
        }
        let history = self.history.lock().unwrap();
        let items = history
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect();
        Ok(JobsPage {
            items,
            total: history.len() as u64,
            limit,
            offset,
        })
    }
}

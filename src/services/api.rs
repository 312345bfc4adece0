use std::time::Duration;

use async_trait::async_trait;
use reqwest::{multipart, Client, Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::models::job::{Job, JobsPage};
use crate::services::upload::UploadFile;

/// Page size used when the caller does not pick one.
pub const DEFAULT_PAGE_LIMIT: u64 = 10;

/// The three operations the job service exposes.
#[async_trait]
pub trait JobApi: Send + Sync {
    /// Upload an image and create a job for it.
    async fn submit(&self, file: UploadFile) -> Result<Job, ApiError>;

    /// Current snapshot of one job.
    async fn fetch_one(&self, id: &str) -> Result<Job, ApiError>;

    /// One page of the job history, newest first.
    async fn fetch_page(&self, limit: u64, offset: u64) -> Result<JobsPage, ApiError>;
}

/// HTTP+JSON client for the job service.
pub struct HttpJobApi {
    http: Client,
    base_url: String,
}

impl HttpJobApi {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for a result image or report path.
    pub fn asset_url(&self, path: &str) -> String {
        asset_url(&self.base_url, path)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send a request, turning transport failures and error statuses into
    /// `ApiError`. A 404 is passed through only when `allow_not_found` is set.
    async fn send(
        &self,
        operation: &'static str,
        request: reqwest::RequestBuilder,
        allow_not_found: bool,
    ) -> Result<Response, ApiError> {
        metrics::counter!("job_api_requests_total", "operation" => operation).increment(1);

        let response = request.send().await.map_err(|e| {
            metrics::counter!("job_api_errors_total", "operation" => operation).increment(1);
            tracing::error!(
                operation,
                error = %e,
                "Network error: check that the backend server is running and reachable"
            );
            ApiError::Network(e)
        })?;

        let status = response.status();
        if status.is_success() || (allow_not_found && status == StatusCode::NOT_FOUND) {
            return Ok(response);
        }

        metrics::counter!("job_api_errors_total", "operation" => operation).increment(1);
        let message = response.text().await.unwrap_or_default();
        tracing::warn!(
            operation,
            status = status.as_u16(),
            %message,
            "Job service returned an error"
        );
        Err(ApiError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl JobApi for HttpJobApi {
    async fn submit(&self, file: UploadFile) -> Result<Job, ApiError> {
        let UploadFile {
            filename,
            mime,
            bytes,
        } = file;

        tracing::debug!(%filename, %mime, size = bytes.len(), "Submitting image");

        let part = multipart::Part::bytes(bytes)
            .file_name(filename)
            .mime_str(&mime)
            .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;
        let form = multipart::Form::new().part("file", part);

        let request = self.http.post(self.endpoint("/job")).multipart(form);
        let response = self.send("submit", request, false).await?;

        let job: Job = decode(response).await?;
        tracing::info!(job_id = %job.id, status = %job.status, "Job created");
        Ok(job)
    }

    async fn fetch_one(&self, id: &str) -> Result<Job, ApiError> {
        let request = self.http.get(self.endpoint("/job")).query(&[("id", id)]);
        let response = self.send("fetch_one", request, true).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound(id.to_string()));
        }

        let job: Option<Job> = decode(response).await?;
        job.ok_or_else(|| ApiError::NotFound(id.to_string()))
    }

    async fn fetch_page(&self, limit: u64, offset: u64) -> Result<JobsPage, ApiError> {
        let request = self
            .http
            .get(self.endpoint("/jobs"))
            .query(&[("limit", limit), ("offset", offset)]);
        let response = self.send("fetch_page", request, false).await?;

        let mut page: JobsPage = decode(response).await?;
        page.sort_newest_first();
        Ok(page)
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let body = response.text().await.map_err(ApiError::Network)?;
    serde_json::from_str(&body).map_err(|e| {
        tracing::error!(error = %e, "Malformed response from job service");
        ApiError::Parse(e)
    })
}

/// Join a backend-relative path onto the base URL. Absolute URLs pass through.
pub fn asset_url(base_url: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Malformed response: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Could not build request: {0}")]
    InvalidRequest(String),
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound(_))
    }
}

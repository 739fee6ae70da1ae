//! Job queue client.

use crate::error::{AgentError, AgentResult};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use submit_agent_types::{BatchSummary, Job, JobStatus, TargetResult};

/// Source of jobs and sink of their progress.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Fetch the next job, if any.
    async fn next_job(&self) -> AgentResult<Option<Job>>;

    /// Push the results collected so far.
    async fn report_progress(
        &self,
        job_id: &str,
        status: JobStatus,
        results: &[TargetResult],
    ) -> AgentResult<()>;

    /// Report the terminal status. Must be safe to repeat.
    async fn report_complete(
        &self,
        job_id: &str,
        final_status: JobStatus,
        summary: &BatchSummary,
    ) -> AgentResult<()>;
}

/// HTTP queue backend.
///
/// `GET {base}/jobs/next`, `POST {base}/jobs/progress` and
/// `POST {base}/jobs/complete`, authenticated with a bearer token and
/// tagged with `X-Worker-Id`.
#[derive(Debug, Clone)]
pub struct HttpQueueClient {
    base_url: String,
    token: Option<String>,
    worker_id: String,
    client: reqwest::Client,
}

impl HttpQueueClient {
    /// Create a client for `base_url`.
    pub fn new(base_url: impl Into<String>, worker_id: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
            worker_id: worker_id.into(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Authenticate with `token`.
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.is_empty());
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        self
    }

    /// Endpoint for `path`.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/jobs/{}", self.base_url, path)
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let builder = builder.header("X-Worker-Id", &self.worker_id);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn post(&self, path: &str, body: &Value) -> AgentResult<()> {
        let response = self
            .request(self.client.post(self.endpoint(path)))
            .json(body)
            .send()
            .await?;
        check_status(response).await.map(|_| ())
    }
}

async fn check_status(response: reqwest::Response) -> AgentResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, &body))
}

/// Error for a non-success queue status. Client errors other than timeouts
/// and rate limits are permanent.
fn status_error(status: reqwest::StatusCode, body: &str) -> AgentError {
    use reqwest::StatusCode;

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            AgentError::Auth(format!("queue returned {}", status))
        }
        StatusCode::TOO_MANY_REQUESTS => AgentError::RateLimited,
        StatusCode::REQUEST_TIMEOUT => AgentError::Queue(format!("HTTP {}", status)),
        s if s.is_client_error() => AgentError::Rejected(format!("HTTP {}: {}", status, body)),
        _ => AgentError::Queue(format!("HTTP {}: {}", status, body)),
    }
}

/// Job from a `jobs/next` body; accepts a bare job or `{"job": ...}`.
pub fn parse_job(body: Value) -> AgentResult<Option<Job>> {
    let job = match body {
        Value::Null => return Ok(None),
        Value::Object(mut map) if map.contains_key("job") => match map.remove("job") {
            Some(Value::Null) | None => return Ok(None),
            Some(job) => job,
        },
        other => other,
    };
    Ok(Some(serde_json::from_value(job)?))
}

#[async_trait]
impl QueueClient for HttpQueueClient {
    async fn next_job(&self) -> AgentResult<Option<Job>> {
        let response = self
            .request(self.client.get(self.endpoint("next")))
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NO_CONTENT || status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(response).await?;
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        parse_job(serde_json::from_str(&text)?)
    }

    async fn report_progress(
        &self,
        job_id: &str,
        status: JobStatus,
        results: &[TargetResult],
    ) -> AgentResult<()> {
        let body = serde_json::json!({
            "jobId": job_id,
            "status": status,
            "results": results,
        });
        self.post("progress", &body).await
    }

    async fn report_complete(
        &self,
        job_id: &str,
        final_status: JobStatus,
        summary: &BatchSummary,
    ) -> AgentResult<()> {
        let body = serde_json::json!({
            "jobId": job_id,
            "finalStatus": final_status,
            "summary": summary,
        });
        self.post("complete", &body).await
    }
}

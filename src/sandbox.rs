use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// Remote execution service. The core never runs submitted code itself.
#[derive(Debug, Clone, Serialize)]
pub struct ExecuteRequest {
    pub code: String,
    pub language: String,
    pub test_cases: Vec<ExecuteTestCase>,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecuteTestCase {
    pub input: String,
    pub expected: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteOutcome {
    pub passed: bool,
    pub test_results: Vec<ExecuteCaseResult>,
    #[serde(default)]
    pub execution_time_ms: i64,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteCaseResult {
    pub actual: String,
    pub passed: bool,
    #[serde(default)]
    pub time_ms: i64,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("sandbox unreachable: {0}")]
    Unavailable(#[from] reqwest::Error),
    #[error("sandbox rejected the batch: {0}")]
    Rejected(reqwest::StatusCode),
}

#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn execute(&self, request: ExecuteRequest) -> Result<ExecuteOutcome, SandboxError>;
}

pub struct HttpSandbox {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSandbox {
    pub fn new(base_url: String) -> Self {
        HttpSandbox {
            client: reqwest::Client::new(),
            base_url,
        }
    }
}

#[async_trait]
impl Sandbox for HttpSandbox {
    async fn execute(&self, request: ExecuteRequest) -> Result<ExecuteOutcome, SandboxError> {
        let response = self
            .client
            .post(format!("{}/execute", self.base_url))
            .json(&request)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SandboxError::Rejected(response.status()));
        }
        Ok(response.json::<ExecuteOutcome>().await?)
    }
}

use crate::language;
use crate::models::challenge::TestCase;
use crate::sandbox::{ExecuteRequest, ExecuteTestCase, Sandbox};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

pub const MAX_SOURCE_LENGTH: usize = 50_000;
pub const DEFAULT_SANDBOX_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictStatus {
    Pending,
    Passed,
    Failed,
    Timeout,
    Error,
}

impl VerdictStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerdictStatus::Pending => "pending",
            VerdictStatus::Passed => "passed",
            VerdictStatus::Failed => "failed",
            VerdictStatus::Timeout => "timeout",
            VerdictStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCaseOutcome {
    pub input: String,
    pub expected: String,
    pub actual: String,
    pub passed: bool,
    pub time_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Verdict {
    pub status: VerdictStatus,
    pub test_results: Vec<TestCaseOutcome>,
    pub time_wall_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Verdict {
    pub fn passed(&self) -> bool {
        self.status == VerdictStatus::Passed
    }

    fn terminal(status: VerdictStatus, time_wall_ms: i64, error: String) -> Verdict {
        Verdict {
            status,
            test_results: Vec::new(),
            time_wall_ms,
            error: Some(error),
        }
    }
}

// User-correctable rejections; sandbox trouble is folded into the verdict
// instead, so downstream scoring always has one.
#[derive(Error, Debug)]
pub enum GradingError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("prohibited construct: {0}")]
    Prohibited(&'static str),
}

pub struct GradingPipeline {
    sandbox: Arc<dyn Sandbox>,
    timeout: Duration,
}

impl GradingPipeline {
    pub fn new(sandbox: Arc<dyn Sandbox>, timeout: Duration) -> GradingPipeline {
        GradingPipeline { sandbox, timeout }
    }

    pub async fn grade(
        &self,
        source_text: &str,
        language_key: &str,
        test_cases: &[TestCase],
    ) -> Result<Verdict, GradingError> {
        if source_text.trim().is_empty() {
            return Err(GradingError::InvalidInput("empty submission".into()));
        }
        if source_text.len() > MAX_SOURCE_LENGTH {
            return Err(GradingError::InvalidInput(format!(
                "submission exceeds {} characters",
                MAX_SOURCE_LENGTH
            )));
        }

        let languages = language::get_supported_languages();
        let language = languages
            .get(language_key)
            .ok_or_else(|| GradingError::InvalidInput(format!("unknown language {}", language_key)))?;

        if let Some(pattern) = language.prohibited_match(source_text) {
            warn!(
                "prohibited construct ({}) in {} submission",
                pattern, language_key
            );
            return Err(GradingError::Prohibited(pattern));
        }

        let request = ExecuteRequest {
            code: source_text.into(),
            language: language_key.into(),
            test_cases: test_cases
                .iter()
                .map(|case| ExecuteTestCase {
                    input: case.input.clone(),
                    expected: case.expected.clone(),
                })
                .collect(),
            timeout_ms: self.timeout.as_millis() as u64,
        };

        let batch_start = Instant::now();
        let outcome = tokio::time::timeout(self.timeout, self.sandbox.execute(request)).await;
        let time_wall_ms = batch_start.elapsed().as_millis() as i64;

        let run = match outcome {
            Err(_) => {
                info!("sandbox batch timed out after {:?}", self.timeout);
                return Ok(Verdict::terminal(
                    VerdictStatus::Timeout,
                    time_wall_ms,
                    "execution timed out".into(),
                ));
            }
            Ok(Err(e)) => {
                warn!("sandbox failure: {}", e);
                return Ok(Verdict::terminal(
                    VerdictStatus::Error,
                    time_wall_ms,
                    e.to_string(),
                ));
            }
            Ok(Ok(run)) => run,
        };

        let test_results: Vec<TestCaseOutcome> = test_cases
            .iter()
            .enumerate()
            .map(|(index, case)| match run.test_results.get(index) {
                Some(result) => TestCaseOutcome {
                    input: case.input.clone(),
                    expected: case.expected.clone(),
                    actual: result.actual.clone(),
                    passed: result.passed,
                    time_ms: result.time_ms,
                    error: result.error.clone(),
                },
                None => TestCaseOutcome {
                    input: case.input.clone(),
                    expected: case.expected.clone(),
                    actual: String::new(),
                    passed: false,
                    time_ms: 0,
                    error: Some("no result reported".into()),
                },
            })
            .collect();

        let all_passed = !test_results.is_empty() && test_results.iter().all(|r| r.passed);
        Ok(Verdict {
            status: if all_passed {
                VerdictStatus::Passed
            } else {
                VerdictStatus::Failed
            },
            test_results,
            time_wall_ms,
            error: run.error,
        })
    }
}

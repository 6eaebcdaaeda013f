use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::challenge::TestCase;
use crate::errors::JudgeError;

/// Result of running a submission against one test case.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestResult {
    pub index: usize,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// The judge's answer for one submission.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Verdict {
    pub passed: bool,
    #[serde(default)]
    pub results: Vec<TestResult>,
}

impl Verdict {
    pub fn pass(test_count: usize) -> Self {
        Self {
            passed: true,
            results: (0..test_count)
                .map(|index| TestResult { index, passed: true, message: None })
                .collect(),
        }
    }

    pub fn fail(results: Vec<TestResult>) -> Self {
        Self { passed: false, results }
    }

    /// Verdict recorded when the judge could not be reached.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            results: vec![TestResult {
                index: 0,
                passed: false,
                message: Some(reason.into()),
            }],
        }
    }

    /// Fully correct: the judge says passed and no per-test result disagrees.
    pub fn is_fully_correct(&self) -> bool {
        self.passed && self.results.iter().all(|r| r.passed)
    }

    pub fn passed_count(&self) -> usize {
        self.results.iter().filter(|r| r.passed).count()
    }
}

/// External service that executes code against test cases.
#[async_trait]
pub trait JudgeGateway: Send + Sync {
    fn name(&self) -> &str;

    async fn evaluate(&self, code: &str, test_cases: &[TestCase]) -> Result<Verdict, JudgeError>;
}

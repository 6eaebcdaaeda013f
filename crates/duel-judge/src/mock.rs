use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use duel_core::challenge::TestCase;
use duel_core::errors::JudgeError;
use duel_core::judge::{JudgeGateway, TestResult, Verdict};

/// A scripted judge answer.
#[derive(Clone, Debug)]
pub enum MockResponse {
    /// Every test case passes.
    Pass,
    /// The first test case fails, the rest pass.
    Fail,
    Verdict(Verdict),
    Error(JudgeError),
    /// Sleep, then answer with the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    pub fn delayed(delay: Duration, then: MockResponse) -> Self {
        Self::Delay(delay, Box::new(then))
    }
}

/// Judge double for tests.
///
/// Answers come from, in order: a rule keyed by the exact submitted code,
/// the next scripted response, then the fallback. With none of those an
/// evaluation fails as `Unreachable`.
pub struct MockJudge {
    scripted: Mutex<VecDeque<MockResponse>>,
    by_code: HashMap<String, MockResponse>,
    fallback: Option<MockResponse>,
    call_count: AtomicUsize,
}

impl MockJudge {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            scripted: Mutex::new(responses.into()),
            by_code: HashMap::new(),
            fallback: None,
            call_count: AtomicUsize::new(0),
        }
    }

    /// Judge that passes every submission.
    pub fn always_pass() -> Self {
        Self::new(vec![]).otherwise(MockResponse::Pass)
    }

    pub fn on_code(mut self, code: impl Into<String>, response: MockResponse) -> Self {
        self.by_code.insert(code.into(), response);
        self
    }

    pub fn otherwise(mut self, response: MockResponse) -> Self {
        self.fallback = Some(response);
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    fn pick(&self, code: &str) -> Option<MockResponse> {
        if let Some(rule) = self.by_code.get(code) {
            return Some(rule.clone());
        }
        self.scripted
            .lock()
            .pop_front()
            .or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl JudgeGateway for MockJudge {
    fn name(&self) -> &str {
        "mock"
    }

    async fn evaluate(&self, code: &str, test_cases: &[TestCase]) -> Result<Verdict, JudgeError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);

        let mut response = self
            .pick(code)
            .ok_or_else(|| JudgeError::Unreachable("no mock response configured".into()))?;

        loop {
            match response {
                MockResponse::Pass => return Ok(Verdict::pass(test_cases.len())),
                MockResponse::Fail => {
                    let results = (0..test_cases.len().max(1))
                        .map(|index| TestResult {
                            index,
                            passed: index != 0,
                            message: (index == 0).then(|| "wrong answer".to_string()),
                        })
                        .collect();
                    return Ok(Verdict::fail(results));
                }
                MockResponse::Verdict(verdict) => return Ok(verdict),
                MockResponse::Error(e) => return Err(e),
                MockResponse::Delay(delay, then) => {
                    tokio::time::sleep(delay).await;
                    response = *then;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cases() -> Vec<TestCase> {
        vec![
            TestCase::visible("[2,7,11,15], 9", "[0,1]"),
            TestCase::hidden("[3,3], 6", "[0,1]"),
        ]
    }

    #[tokio::test]
    async fn scripted_responses_in_order() {
        let judge = MockJudge::new(vec![MockResponse::Fail, MockResponse::Pass]);

        let first = judge.evaluate("a", &cases()).await.unwrap();
        assert!(!first.passed);
        assert_eq!(first.passed_count(), 1);

        let second = judge.evaluate("a", &cases()).await.unwrap();
        assert!(second.is_fully_correct());
        assert_eq!(second.results.len(), 2);

        assert_eq!(judge.call_count(), 2);
    }

    #[tokio::test]
    async fn exhausted_script_is_unreachable() {
        let judge = MockJudge::new(vec![]);
        let err = judge.evaluate("a", &cases()).await.unwrap_err();
        assert!(matches!(err, JudgeError::Unreachable(_)));
    }

    #[tokio::test]
    async fn code_rules_take_precedence() {
        let judge = MockJudge::new(vec![MockResponse::Fail])
            .on_code("correct", MockResponse::Pass)
            .otherwise(MockResponse::Fail);

        assert!(judge.evaluate("correct", &cases()).await.unwrap().passed);
        assert!(judge.evaluate("correct", &cases()).await.unwrap().passed);
        assert!(!judge.evaluate("wrong", &cases()).await.unwrap().passed);
        assert!(!judge.evaluate("wrong", &cases()).await.unwrap().passed);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_then_answer() {
        let judge = MockJudge::new(vec![MockResponse::delayed(
            Duration::from_secs(3),
            MockResponse::Pass,
        )]);

        let start = tokio::time::Instant::now();
        let verdict = judge.evaluate("a", &cases()).await.unwrap();
        assert!(verdict.passed);
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test]
    async fn error_passthrough() {
        let judge = MockJudge::new(vec![MockResponse::Error(JudgeError::ServerError {
            status: 500,
            body: "boom".into(),
        })]);
        let err = judge.evaluate("a", &cases()).await.unwrap_err();
        assert_eq!(err.error_kind(), "server_error");
    }
}

//! HTTP client for the external code-execution judge.
//!
//! The judge accepts `POST {url}` with `{"code": ..., "testCases": [...]}`
//! and answers `{"passed": bool, "results": [{"index", "passed", "message"?}]}`.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use duel_core::challenge::TestCase;
use duel_core::errors::JudgeError;
use duel_core::judge::{JudgeGateway, Verdict};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JudgeRequest<'a> {
    code: &'a str,
    test_cases: &'a [TestCase],
}

pub struct HttpJudge {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpJudge {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, JudgeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| JudgeError::Unreachable(format!("building http client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
            timeout,
        })
    }

    fn map_transport(&self, e: reqwest::Error) -> JudgeError {
        if e.is_timeout() {
            JudgeError::Timeout(self.timeout)
        } else {
            JudgeError::Unreachable(e.to_string())
        }
    }
}

#[async_trait]
impl JudgeGateway for HttpJudge {
    fn name(&self) -> &str {
        "http"
    }

    async fn evaluate(&self, code: &str, test_cases: &[TestCase]) -> Result<Verdict, JudgeError> {
        let response = self
            .client
            .post(&self.url)
            .json(&JudgeRequest { code, test_cases })
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(JudgeError::from_status(status.as_u16(), body));
        }

        let body = response.text().await.map_err(|e| self.map_transport(e))?;
        let verdict: Verdict = serde_json::from_str(&body)
            .map_err(|e| JudgeError::MalformedResponse(e.to_string()))?;
        // One result per test case, or a bare `passed: true` could win a duel.
        if verdict.results.len() != test_cases.len() {
            return Err(JudgeError::MalformedResponse(format!(
                "{} results for {} test cases",
                verdict.results.len(),
                test_cases.len()
            )));
        }

        debug!(
            passed = verdict.passed,
            results = verdict.results.len(),
            "judge responded"
        );
        Ok(verdict)
    }
}

/// Stand-in used when no judge URL is configured. Every evaluation fails,
/// so submissions are answered with a failing verdict.
pub struct UnconfiguredJudge;

#[async_trait]
impl JudgeGateway for UnconfiguredJudge {
    fn name(&self) -> &str {
        "unconfigured"
    }

    async fn evaluate(&self, _code: &str, _test_cases: &[TestCase]) -> Result<Verdict, JudgeError> {
        Err(JudgeError::Unreachable("no judge url configured".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/judge")
    }

    fn cases() -> Vec<TestCase> {
        vec![TestCase::visible("[3,2,4], 6", "[1,2]")]
    }

    #[tokio::test]
    async fn posts_code_and_parses_verdict() {
        let router = Router::new().route(
            "/judge",
            post(|Json(body): Json<serde_json::Value>| async move {
                let passed = body["code"] == "solve()" && body["testCases"][0]["expectedOutput"] == "[1,2]";
                Json(serde_json::json!({
                    "passed": passed,
                    "results": [{"index": 0, "passed": passed}]
                }))
            }),
        );
        let judge = HttpJudge::new(serve(router).await, Duration::from_secs(5)).unwrap();

        let verdict = judge.evaluate("solve()", &cases()).await.unwrap();
        assert!(verdict.is_fully_correct());

        let verdict = judge.evaluate("nope()", &cases()).await.unwrap();
        assert!(!verdict.passed);
    }

    #[tokio::test]
    async fn server_error_is_retryable() {
        let router = Router::new().route(
            "/judge",
            post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "overloaded") }),
        );
        let judge = HttpJudge::new(serve(router).await, Duration::from_secs(5)).unwrap();

        let err = judge.evaluate("x", &cases()).await.unwrap_err();
        assert!(matches!(err, JudgeError::ServerError { status: 503, .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn client_error_is_rejection() {
        let router = Router::new().route(
            "/judge",
            post(|| async { (StatusCode::PAYLOAD_TOO_LARGE, "too big") }),
        );
        let judge = HttpJudge::new(serve(router).await, Duration::from_secs(5)).unwrap();

        let err = judge.evaluate("x", &cases()).await.unwrap_err();
        assert!(matches!(err, JudgeError::Rejected(_)));
    }

    #[tokio::test]
    async fn garbage_body_is_malformed() {
        let router = Router::new().route("/judge", post(|| async { "definitely not json" }));
        let judge = HttpJudge::new(serve(router).await, Duration::from_secs(5)).unwrap();

        let err = judge.evaluate("x", &cases()).await.unwrap_err();
        assert!(matches!(err, JudgeError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn result_count_must_match_test_cases() {
        let router = Router::new().route(
            "/judge",
            post(|| async { Json(serde_json::json!({"passed": true, "results": []})) }),
        );
        let judge = HttpJudge::new(serve(router).await, Duration::from_secs(5)).unwrap();

        let err = judge.evaluate("x", &cases()).await.unwrap_err();
        assert!(matches!(err, JudgeError::MalformedResponse(msg) if msg.contains("0 results")));
    }

    #[tokio::test]
    async fn unreachable_host() {
        let judge = HttpJudge::new("http://127.0.0.1:1/judge", Duration::from_secs(2)).unwrap();
        let err = judge.evaluate("x", &cases()).await.unwrap_err();
        assert!(matches!(err, JudgeError::Unreachable(_) | JudgeError::Timeout(_)));
    }

    #[tokio::test]
    async fn unconfigured_always_fails() {
        let err = UnconfiguredJudge.evaluate("x", &cases()).await.unwrap_err();
        assert!(err.is_retryable());
    }
}

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use claw_core::errors::ModelError;
use claw_core::ids::ToolCallId;
use claw_core::messages::Message;
use claw_core::model::{ModelClient, ModelRequest};
use claw_core::tools::{ToolArguments, ToolCallRequest};

/// Pre-programmed responses for deterministic runs without a provider.
#[derive(Clone, Debug)]
pub enum MockResponse {
    Message(Message),
    Error(ModelError),
    /// Wait a duration, then yield the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    /// Final answer with no tool calls.
    pub fn text(text: &str) -> Self {
        Self::Message(Message::assistant(text))
    }

    /// Response requesting the given calls, in order.
    pub fn tool_calls(calls: Vec<ToolCallRequest>) -> Self {
        Self::Message(Message::assistant_with_calls(None, calls))
    }

    /// Text accompanied by tool calls.
    pub fn text_with_calls(text: &str, calls: Vec<ToolCallRequest>) -> Self {
        Self::Message(Message::assistant_with_calls(Some(text.to_string()), calls))
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Build a tool call from a JSON object of arguments. Non-object values
/// produce empty arguments.
pub fn tool_call(id: &str, name: &str, args: Value) -> ToolCallRequest {
    let arguments = match args {
        Value::Object(map) => map,
        _ => ToolArguments::new(),
    };
    ToolCallRequest::new(ToolCallId::from_raw(id), name, arguments)
}

/// Model that replays scripted responses in order.
pub struct MockModel {
    responses: Mutex<VecDeque<MockResponse>>,
    fallback: Option<MockResponse>,
    requests: Mutex<Vec<ModelRequest>>,
    call_count: AtomicUsize,
}

impl MockModel {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    /// Model that answers every call with `response`.
    pub fn always(response: MockResponse) -> Self {
        Self {
            fallback: Some(response),
            ..Self::new(Vec::new())
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Every request seen so far, in call order.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ModelClient for MockModel {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate(&self, request: &ModelRequest) -> Result<Message, ModelError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.requests.lock().push(request.clone());

        let next = self.responses.lock().pop_front().or_else(|| self.fallback.clone());
        let Some(mut current) = next else {
            return Err(ModelError::InvalidRequest(format!(
                "MockModel: no response configured for call {idx}"
            )));
        };

        loop {
            match current {
                MockResponse::Message(message) => return Ok(message),
                MockResponse::Error(e) => return Err(e),
                MockResponse::Delay(duration, inner) => {
                    tokio::time::sleep(duration).await;
                    current = *inner;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> ModelRequest {
        ModelRequest::new(vec![Message::user("hi")])
    }

    #[tokio::test]
    async fn sequential_responses() {
        let mock = MockModel::new(vec![MockResponse::text("first"), MockResponse::text("second")]);

        let first = mock.generate(&request()).await.unwrap();
        assert_eq!(first.text(), "first");
        assert_eq!(mock.call_count(), 1);

        let second = mock.generate(&request()).await.unwrap();
        assert_eq!(second.text(), "second");
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn exhausted_responses() {
        let mock = MockModel::new(vec![MockResponse::text("only one")]);
        let _ = mock.generate(&request()).await;
        assert!(mock.generate(&request()).await.is_err());
    }

    #[tokio::test]
    async fn always_repeats() {
        let mock = MockModel::always(MockResponse::tool_calls(vec![tool_call(
            "c1",
            "glob",
            json!({"pattern": "*.rs"}),
        )]));
        for _ in 0..3 {
            let msg = mock.generate(&request()).await.unwrap();
            assert_eq!(msg.tool_calls[0].name, "glob");
        }
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn error_response() {
        let mock = MockModel::new(vec![MockResponse::Error(ModelError::AuthenticationFailed(
            "bad".into(),
        ))]);
        assert!(matches!(
            mock.generate(&request()).await,
            Err(ModelError::AuthenticationFailed(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_response() {
        let mock = MockModel::new(vec![MockResponse::delayed(
            Duration::from_secs(5),
            MockResponse::text("after delay"),
        )]);
        let start = tokio::time::Instant::now();
        let msg = mock.generate(&request()).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert_eq!(msg.text(), "after delay");
    }

    #[tokio::test]
    async fn records_requests() {
        let mock = MockModel::new(vec![MockResponse::text("ok")]);
        let mut req = request();
        req.temperature = 0.3;
        mock.generate(&req).await.unwrap();
        let seen = mock.requests();
        assert_eq!(seen.len(), 1);
        assert!((seen[0].temperature - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn tool_call_helper_ignores_non_objects() {
        let call = tool_call("c", "shell", json!("ls"));
        assert!(call.arguments.is_empty());
        let call = tool_call("c", "shell", json!({"command": "ls"}));
        assert_eq!(call.arguments["command"], "ls");
    }
}

//! Mock transport for testing.
//!
//! Deterministic, queue-driven transport used by the coordinator and
//! orchestrator test suites:
//! - script successes and classified failures in order
//! - count how many attempts actually reached the "network"
//! - simulate slow providers with an artificial per-call delay
//!
//! When the script runs dry, calls succeed with a default reply, so tests
//! only script the interesting prefix.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::ProviderError;
use crate::transport::{Transport, TransportReply, TransportRequest};

/// One scripted outcome for a [`MockTransport`] call.
#[derive(Debug)]
pub enum MockOutcome {
    /// Succeed with this reply.
    Reply(TransportReply),
    /// Fail with this provider error.
    Fail(ProviderError),
}

/// Mock transport with a scripted outcome queue.
///
/// # Example
///
/// ```
/// use llm_conductor::transport::{MockTransport, Transport, TransportRequest, ChatMessage};
/// use llm_conductor::ProviderError;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let transport = MockTransport::new("mock");
/// transport.enqueue_error(ProviderError::Timeout).await;
/// transport.enqueue_reply("second try worked").await;
///
/// let request = TransportRequest::new("mock", "mock-model", vec![ChatMessage::user("hi")]);
/// assert!(transport.send(&request).await.is_err());
/// let reply = transport.send(&request).await.unwrap();
/// assert_eq!(reply.content, "second try worked");
/// assert_eq!(transport.calls(), 2);
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct MockTransport {
    name: String,
    script: Arc<Mutex<VecDeque<MockOutcome>>>,
    calls: Arc<AtomicUsize>,
    delay: Option<Duration>,
    default_content: String,
}

impl MockTransport {
    /// Create a mock transport with an empty script.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: Arc::new(Mutex::new(VecDeque::new())),
            calls: Arc::new(AtomicUsize::new(0)),
            delay: None,
            default_content: "mock reply".to_string(),
        }
    }

    /// Sleep this long inside every call, to exercise attempt timeouts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Content returned once the script is exhausted.
    pub fn with_default_content(mut self, content: impl Into<String>) -> Self {
        self.default_content = content.into();
        self
    }

    /// Queue a scripted outcome.
    pub async fn enqueue(&self, outcome: MockOutcome) {
        self.script.lock().await.push_back(outcome);
    }

    /// Queue a successful reply with usage derived from the content length.
    pub async fn enqueue_reply(&self, content: impl Into<String>) {
        let content = content.into();
        let completion_tokens = (content.chars().count() / 4).max(1);
        self.enqueue(MockOutcome::Reply(
            TransportReply::new(content).with_usage(0, completion_tokens),
        ))
        .await;
    }

    /// Queue a failure.
    pub async fn enqueue_error(&self, error: ProviderError) {
        self.enqueue(MockOutcome::Fail(error)).await;
    }

    /// Queue the same failure `count` times.
    pub async fn enqueue_errors_with(
        &self,
        count: usize,
        mut make_error: impl FnMut() -> ProviderError,
    ) {
        for _ in 0..count {
            self.enqueue_error(make_error()).await;
        }
    }

    /// Number of calls that reached this transport.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// True once every scripted outcome has been consumed.
    pub async fn is_exhausted(&self) -> bool {
        self.script.lock().await.is_empty()
    }

    fn default_reply(&self, request: &TransportRequest) -> TransportReply {
        let prompt_chars: usize = request
            .messages
            .iter()
            .map(|m| m.content.chars().count())
            .sum();
        let completion_tokens = (self.default_content.chars().count() / 4).max(1);
        TransportReply::new(self.default_content.clone())
            .with_usage((prompt_chars / 4).max(1), completion_tokens)
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new("mock")
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, request: &TransportRequest) -> Result<TransportReply, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.script.lock().await.pop_front();
        match next {
            Some(MockOutcome::Reply(reply)) => Ok(reply),
            Some(MockOutcome::Fail(error)) => Err(error),
            None => Ok(self.default_reply(request)),
        }
    }
}

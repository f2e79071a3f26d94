//! Per-task candidate routing with ordered failover.
//!
//! Each task kind (reply, feedback, classification) has its own ordered
//! chain of candidate providers and its own sampling parameters. Candidates
//! are tried strictly in configured order. A candidate attempt fails on
//! error, on timeout, or on a completion with no usable text; transient
//! transport errors get a small bounded retry on the same candidate before
//! the chain advances. When every candidate has failed the router returns
//! a typed exhaustion error instead of a degraded answer.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use futures_util::Stream;
use tracing::{info_span, Instrument};

use salescoach_types::llm::{
    CandidateStatusInfo, CompletionRequest, LlmError, Message, StreamEvent, TaskKind,
};

use super::box_provider::BoxLlmProvider;

/// A single candidate in a task route.
pub struct Candidate {
    pub provider: BoxLlmProvider,
    pub model: String,
    stats: Mutex<CandidateStats>,
}

#[derive(Debug, Default, Clone)]
struct CandidateStats {
    total_calls: u64,
    total_failures: u64,
    last_error: Option<String>,
    last_latency_ms: Option<u64>,
}

impl Candidate {
    pub fn new(provider: BoxLlmProvider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            stats: Mutex::new(CandidateStats::default()),
        }
    }

    fn record_success(&self, latency_ms: u64) {
        if let Ok(mut stats) = self.stats.lock() {
            stats.total_calls += 1;
            stats.last_latency_ms = Some(latency_ms);
        }
    }

    fn record_failure(&self, error: &LlmError, latency_ms: u64) {
        if let Ok(mut stats) = self.stats.lock() {
            stats.total_calls += 1;
            stats.total_failures += 1;
            stats.last_error = Some(error.to_string());
            stats.last_latency_ms = Some(latency_ms);
        }
    }

    fn status_info(&self) -> CandidateStatusInfo {
        let stats = self
            .stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default();
        CandidateStatusInfo {
            name: self.provider.name().to_string(),
            total_calls: stats.total_calls,
            total_failures: stats.total_failures,
            last_error: stats.last_error,
            last_latency_ms: stats.last_latency_ms,
        }
    }
}

/// Ordered candidate chain plus sampling parameters for one task kind.
pub struct TaskRoute {
    pub candidates: Vec<Candidate>,
    pub max_tokens: u32,
    pub temperature: f64,
    /// Same-candidate retries allowed for transient transport errors.
    pub max_transient_retries: u32,
}

/// A stream selected from a task route, plus enough context to fall back.
pub struct StreamSelection {
    pub stream: Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send + 'static>>,
    pub provider_name: String,
    /// Index of the streaming candidate; `complete_from(task, .., index + 1)`
    /// is the non-streaming fallback after a mid-stream failure.
    pub candidate_index: usize,
}

impl std::fmt::Debug for StreamSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSelection")
            .field("provider_name", &self.provider_name)
            .field("candidate_index", &self.candidate_index)
            .field("stream", &"<stream>")
            .finish()
    }
}

/// Routes LLM requests to per-task candidate chains with ordered failover.
pub struct TaskRouter {
    routes: HashMap<TaskKind, TaskRoute>,
    attempt_timeout: Duration,
}

impl TaskRouter {
    pub fn new(routes: HashMap<TaskKind, TaskRoute>, attempt_timeout: Duration) -> Self {
        Self {
            routes,
            attempt_timeout,
        }
    }

    fn route(&self, task: TaskKind) -> Result<&TaskRoute, LlmError> {
        self.routes
            .get(&task)
            .ok_or(LlmError::Exhausted { task })
    }

    fn build_request(route: &TaskRoute, candidate: &Candidate, system: &str, messages: &[Message], stream: bool) -> CompletionRequest {
        CompletionRequest {
            model: candidate.model.clone(),
            messages: messages.to_vec(),
            system: Some(system.to_string()),
            max_tokens: route.max_tokens,
            temperature: Some(route.temperature),
            stream,
        }
    }

    /// Run a completion through the task's candidate chain.
    ///
    /// Returns the trimmed response text from the first candidate that
    /// produces a non-empty completion.
    pub async fn complete(
        &self,
        task: TaskKind,
        system: &str,
        messages: &[Message],
    ) -> Result<String, LlmError> {
        self.complete_from(task, system, messages, 0).await
    }

    /// Like [`complete`](Self::complete), but starts at candidate `skip`.
    ///
    /// Used for non-streaming fallback after a mid-stream failure: the
    /// candidate that was streaming is skipped, not retried.
    pub async fn complete_from(
        &self,
        task: TaskKind,
        system: &str,
        messages: &[Message],
        skip: usize,
    ) -> Result<String, LlmError> {
        let route = self.route(task)?;

        for (index, candidate) in route.candidates.iter().enumerate().skip(skip) {
            let request = Self::build_request(route, candidate, system, messages, false);
            let mut retries_left = route.max_transient_retries;

            loop {
                let span = info_span!(
                    "gen_ai.complete",
                    gen_ai.system = candidate.provider.name(),
                    gen_ai.request.model = %request.model,
                    gen_ai.request.max_tokens = request.max_tokens,
                    gen_ai.request.temperature = ?request.temperature,
                    gen_ai.request.stream = false,
                );
                let start = Instant::now();
                let outcome = tokio::time::timeout(
                    self.attempt_timeout,
                    candidate.provider.complete(&request).instrument(span),
                )
                .await;
                let latency_ms = start.elapsed().as_millis() as u64;

                match outcome {
                    Err(_elapsed) => {
                        let err = LlmError::Timeout {
                            timeout_ms: self.attempt_timeout.as_millis() as u64,
                        };
                        candidate.record_failure(&err, latency_ms);
                        tracing::warn!(
                            %task,
                            provider = %candidate.provider.name(),
                            index,
                            "Candidate attempt timed out, advancing"
                        );
                        break;
                    }
                    Ok(Ok(response)) => {
                        let text = response.content.trim();
                        if text.is_empty() {
                            // An empty completion is a provider failure: the
                            // chain advances, the same candidate is not retried.
                            candidate.record_failure(&LlmError::EmptyCompletion, latency_ms);
                            tracing::warn!(
                                %task,
                                provider = %candidate.provider.name(),
                                index,
                                "Empty completion, advancing"
                            );
                            break;
                        }
                        candidate.record_success(latency_ms);
                        if index > skip {
                            tracing::info!(
                                %task,
                                provider = %candidate.provider.name(),
                                index,
                                "Request handled by fallback candidate"
                            );
                        }
                        return Ok(text.to_string());
                    }
                    Ok(Err(err)) => {
                        candidate.record_failure(&err, latency_ms);
                        if err.is_transient() && retries_left > 0 {
                            retries_left -= 1;
                            tracing::debug!(
                                %task,
                                provider = %candidate.provider.name(),
                                error = %err,
                                retries_left,
                                "Transient error, retrying same candidate"
                            );
                            continue;
                        }
                        tracing::warn!(
                            %task,
                            provider = %candidate.provider.name(),
                            index,
                            error = %err,
                            "Candidate failed, advancing"
                        );
                        break;
                    }
                }
            }
        }

        tracing::error!(%task, "All candidates exhausted");
        Err(LlmError::Exhausted { task })
    }

    /// Select a streaming candidate and start its stream.
    ///
    /// Picks the first candidate whose capabilities advertise streaming.
    /// Mid-stream failover is not possible; on a stream error the caller
    /// falls back to `complete_from(task, .., candidate_index + 1)`.
    pub fn stream(
        &self,
        task: TaskKind,
        system: &str,
        messages: &[Message],
    ) -> Result<StreamSelection, LlmError> {
        let route = self.route(task)?;

        for (index, candidate) in route.candidates.iter().enumerate() {
            if !candidate.provider.capabilities().streaming {
                tracing::debug!(
                    %task,
                    provider = %candidate.provider.name(),
                    "Candidate does not stream, skipping"
                );
                continue;
            }

            let request = Self::build_request(route, candidate, system, messages, true);
            let span = info_span!(
                "gen_ai.execute",
                gen_ai.system = candidate.provider.name(),
                gen_ai.request.model = %request.model,
                gen_ai.request.max_tokens = request.max_tokens,
                gen_ai.request.temperature = ?request.temperature,
                gen_ai.request.stream = true,
            );
            let stream = candidate.provider.stream(request);
            return Ok(StreamSelection {
                stream: Box::pin(StreamInSpan { inner: stream, span }),
                provider_name: candidate.provider.name().to_string(),
                candidate_index: index,
            });
        }

        Err(LlmError::Exhausted { task })
    }

    /// Record the outcome of a consumed stream against its candidate.
    pub fn record_stream_outcome(
        &self,
        task: TaskKind,
        candidate_index: usize,
        error: Option<&LlmError>,
    ) {
        let Some(route) = self.routes.get(&task) else {
            return;
        };
        let Some(candidate) = route.candidates.get(candidate_index) else {
            return;
        };
        match error {
            None => candidate.record_success(0),
            Some(err) => candidate.record_failure(err, 0),
        }
    }

    /// Attempt statistics for every candidate, grouped by task kind.
    pub fn status(&self) -> Vec<(TaskKind, Vec<CandidateStatusInfo>)> {
        let mut out: Vec<(TaskKind, Vec<CandidateStatusInfo>)> = TaskKind::ALL
            .iter()
            .filter_map(|task| {
                self.routes.get(task).map(|route| {
                    (
                        *task,
                        route.candidates.iter().map(|c| c.status_info()).collect(),
                    )
                })
            })
            .collect();
        out.sort_by_key(|(task, _)| task.to_string());
        out
    }
}

pin_project_lite::pin_project! {
    /// A stream wrapper that keeps an OTel span alive for the duration of
    /// streaming.
    ///
    /// Without this, the span would be dropped immediately after creating
    /// the stream, losing the instrumentation for the actual streaming
    /// duration.
    struct StreamInSpan {
        #[pin]
        inner: Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send + 'static>>,
        span: tracing::Span,
    }
}

impl Stream for StreamInSpan {
    type Item = Result<StreamEvent, LlmError>;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        let this = self.project();
        let _enter = this.span.enter();
        this.inner.poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::provider::LlmProvider;
    use futures_util::StreamExt;
    use salescoach_types::llm::{
        CompletionResponse, ProviderCapabilities, StopReason, Usage,
    };
    use std::collections::VecDeque;
    use std::future::Future;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    // --- Mock provider ---

    #[derive(Clone)]
    enum MockOutcome {
        Text(String),
        Empty,
        Slow(Duration),
        Error(MockError),
    }

    #[derive(Clone)]
    enum MockError {
        Provider(String),
        Auth,
        RateLimited,
    }

    impl MockError {
        fn into_llm(self) -> LlmError {
            match self {
                MockError::Provider(msg) => LlmError::Provider { message: msg },
                MockError::Auth => LlmError::AuthenticationFailed,
                MockError::RateLimited => LlmError::RateLimited {
                    retry_after_ms: None,
                },
            }
        }
    }

    struct MockProvider {
        name: String,
        capabilities: ProviderCapabilities,
        /// Outcomes consumed per call; the last one repeats.
        script: Mutex<VecDeque<MockOutcome>>,
        calls: Arc<AtomicU64>,
    }

    impl MockProvider {
        fn scripted(name: &str, outcomes: Vec<MockOutcome>) -> (Self, Arc<AtomicU64>) {
            let calls = Arc::new(AtomicU64::new(0));
            (
                Self {
                    name: name.to_string(),
                    capabilities: caps(true),
                    script: Mutex::new(outcomes.into()),
                    calls: calls.clone(),
                },
                calls,
            )
        }

        fn ok(name: &str) -> Self {
            Self::scripted(name, vec![MockOutcome::Text(format!("reply from {name}"))]).0
        }

        fn failing(name: &str, error: MockError) -> Self {
            Self::scripted(name, vec![MockOutcome::Error(error)]).0
        }

        fn non_streaming(mut self) -> Self {
            self.capabilities.streaming = false;
            self
        }

        fn next_outcome(&self) -> MockOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script.front().cloned().unwrap()
            }
        }
    }

    fn caps(streaming: bool) -> ProviderCapabilities {
        ProviderCapabilities {
            streaming,
            max_context_tokens: 200_000,
            max_output_tokens: 8_192,
        }
    }

    fn response(text: &str) -> CompletionResponse {
        CompletionResponse {
            id: "resp-1".to_string(),
            content: text.to_string(),
            model: "mock-model".to_string(),
            stop_reason: StopReason::EndTurn,
            usage: Usage {
                input_tokens: 10,
                output_tokens: 20,
            },
        }
    }

    impl LlmProvider for MockProvider {
        fn name(&self) -> &str {
            &self.name
        }

        fn capabilities(&self) -> &ProviderCapabilities {
            &self.capabilities
        }

        fn complete(
            &self,
            _request: &CompletionRequest,
        ) -> impl Future<Output = Result<CompletionResponse, LlmError>> + Send {
            let outcome = self.next_outcome();
            async move {
                match outcome {
                    MockOutcome::Text(text) => Ok(response(&text)),
                    MockOutcome::Empty => Ok(response("   ")),
                    MockOutcome::Slow(duration) => {
                        tokio::time::sleep(duration).await;
                        Ok(response("too late"))
                    }
                    MockOutcome::Error(err) => Err(err.into_llm()),
                }
            }
        }

        fn stream(
            &self,
            _request: CompletionRequest,
        ) -> Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send + 'static>> {
            let outcome = self.next_outcome();
            Box::pin(async_stream::stream! {
                match outcome {
                    MockOutcome::Text(text) => {
                        yield Ok(StreamEvent::Connected);
                        for chunk in text.split_inclusive(' ') {
                            yield Ok(StreamEvent::TextDelta { text: chunk.to_string() });
                        }
                        yield Ok(StreamEvent::Done);
                    }
                    MockOutcome::Empty => {
                        yield Ok(StreamEvent::Connected);
                        yield Ok(StreamEvent::Done);
                    }
                    MockOutcome::Slow(duration) => {
                        tokio::time::sleep(duration).await;
                        yield Ok(StreamEvent::Done);
                    }
                    MockOutcome::Error(err) => {
                        yield Ok(StreamEvent::Connected);
                        yield Ok(StreamEvent::TextDelta { text: "partial ".to_string() });
                        yield Err(err.into_llm());
                    }
                }
            })
        }
    }

    fn route(providers: Vec<MockProvider>, max_transient_retries: u32) -> TaskRoute {
        TaskRoute {
            candidates: providers
                .into_iter()
                .map(|p| {
                    let model = format!("{}-model", p.name);
                    Candidate::new(BoxLlmProvider::new(p), model)
                })
                .collect(),
            max_tokens: 400,
            temperature: 0.7,
            max_transient_retries,
        }
    }

    fn router_with(task: TaskKind, route: TaskRoute) -> TaskRouter {
        let mut routes = HashMap::new();
        routes.insert(task, route);
        TaskRouter::new(routes, Duration::from_millis(200))
    }

    fn prompt() -> Vec<Message> {
        vec![Message::user("How many vehicles do you run today?")]
    }

    // --- Tests ---

    #[tokio::test]
    async fn test_primary_succeeds() {
        let router = router_with(
            TaskKind::ConversationalReply,
            route(vec![MockProvider::ok("primary"), MockProvider::ok("fallback")], 1),
        );

        let text = router
            .complete(TaskKind::ConversationalReply, "system", &prompt())
            .await
            .unwrap();
        assert_eq!(text, "reply from primary");
    }

    #[tokio::test]
    async fn test_failover_on_provider_error() {
        let router = router_with(
            TaskKind::ConversationalReply,
            route(
                vec![
                    MockProvider::failing("primary", MockError::Provider("500".into())),
                    MockProvider::ok("fallback"),
                ],
                0,
            ),
        );

        let text = router
            .complete(TaskKind::ConversationalReply, "system", &prompt())
            .await
            .unwrap();
        assert_eq!(text, "reply from fallback");
    }

    #[tokio::test]
    async fn test_empty_completion_advances_without_retry() {
        let (empty, calls) = MockProvider::scripted("primary", vec![MockOutcome::Empty]);
        let router = router_with(
            TaskKind::ConversationalReply,
            route(vec![empty, MockProvider::ok("fallback")], 2),
        );

        let text = router
            .complete(TaskKind::ConversationalReply, "system", &prompt())
            .await
            .unwrap();
        assert_eq!(text, "reply from fallback");
        // Empty output is not a transient transport error: exactly one call.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_error_retried_once_then_advances() {
        let (flaky, calls) = MockProvider::scripted(
            "primary",
            vec![
                MockOutcome::Error(MockError::RateLimited),
                MockOutcome::Error(MockError::RateLimited),
            ],
        );
        let router = router_with(
            TaskKind::ConversationalReply,
            route(vec![flaky, MockProvider::ok("fallback")], 1),
        );

        let text = router
            .complete(TaskKind::ConversationalReply, "system", &prompt())
            .await
            .unwrap();
        assert_eq!(text, "reply from fallback");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_transient_retry_can_recover() {
        let (flaky, calls) = MockProvider::scripted(
            "primary",
            vec![
                MockOutcome::Error(MockError::Provider("502".into())),
                MockOutcome::Text("recovered".into()),
            ],
        );
        let router = router_with(
            TaskKind::ConversationalReply,
            route(vec![flaky], 1),
        );

        let text = router
            .complete(TaskKind::ConversationalReply, "system", &prompt())
            .await
            .unwrap();
        assert_eq!(text, "recovered");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_auth_error_advances_without_retry() {
        let (broken, calls) = MockProvider::scripted(
            "primary",
            vec![MockOutcome::Error(MockError::Auth)],
        );
        let router = router_with(
            TaskKind::ConversationalReply,
            route(vec![broken, MockProvider::ok("fallback")], 3),
        );

        let text = router
            .complete(TaskKind::ConversationalReply, "system", &prompt())
            .await
            .unwrap();
        assert_eq!(text, "reply from fallback");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_advances_without_retry() {
        let (slow, calls) = MockProvider::scripted(
            "primary",
            vec![MockOutcome::Slow(Duration::from_secs(5))],
        );
        let router = router_with(
            TaskKind::ConversationalReply,
            route(vec![slow, MockProvider::ok("fallback")], 3),
        );

        let text = router
            .complete(TaskKind::ConversationalReply, "system", &prompt())
            .await
            .unwrap();
        assert_eq!(text, "reply from fallback");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_all_candidates_exhausted() {
        let router = router_with(
            TaskKind::CoachingFeedback,
            route(
                vec![
                    MockProvider::failing("primary", MockError::Provider("down".into())),
                    MockProvider::failing("fallback", MockError::Provider("down".into())),
                ],
                0,
            ),
        );

        let err = router
            .complete(TaskKind::CoachingFeedback, "system", &prompt())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LlmError::Exhausted {
                task: TaskKind::CoachingFeedback
            }
        ));
    }

    #[tokio::test]
    async fn test_complete_from_skips_candidates() {
        let (primary, primary_calls) =
            MockProvider::scripted("primary", vec![MockOutcome::Text("from primary".into())]);
        let router = router_with(
            TaskKind::CoachingFeedback,
            route(vec![primary, MockProvider::ok("fallback")], 0),
        );

        let text = router
            .complete_from(TaskKind::CoachingFeedback, "system", &prompt(), 1)
            .await
            .unwrap();
        assert_eq!(text, "reply from fallback");
        assert_eq!(primary_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stream_skips_non_streaming_candidate() {
        let router = router_with(
            TaskKind::CoachingFeedback,
            route(
                vec![
                    MockProvider::ok("primary").non_streaming(),
                    MockProvider::ok("fallback"),
                ],
                0,
            ),
        );

        let selection = router
            .stream(TaskKind::CoachingFeedback, "system", &prompt())
            .unwrap();
        assert_eq!(selection.provider_name, "fallback");
        assert_eq!(selection.candidate_index, 1);

        let mut text = String::new();
        let mut stream = selection.stream;
        while let Some(event) = stream.next().await {
            if let Ok(StreamEvent::TextDelta { text: delta }) = event {
                text.push_str(&delta);
            }
        }
        assert_eq!(text, "reply from fallback");
    }

    #[tokio::test]
    async fn test_stream_with_no_streaming_candidates() {
        let router = router_with(
            TaskKind::CoachingFeedback,
            route(vec![MockProvider::ok("primary").non_streaming()], 0),
        );

        let err = router
            .stream(TaskKind::CoachingFeedback, "system", &prompt())
            .unwrap_err();
        assert!(matches!(err, LlmError::Exhausted { .. }));
    }

    #[tokio::test]
    async fn test_status_records_attempts() {
        let router = router_with(
            TaskKind::ConversationalReply,
            route(
                vec![
                    MockProvider::failing("primary", MockError::Provider("down".into())),
                    MockProvider::ok("fallback"),
                ],
                0,
            ),
        );

        router
            .complete(TaskKind::ConversationalReply, "system", &prompt())
            .await
            .unwrap();

        let status = router.status();
        let (_, candidates) = &status[0];
        assert_eq!(candidates[0].name, "primary");
        assert_eq!(candidates[0].total_calls, 1);
        assert_eq!(candidates[0].total_failures, 1);
        assert!(candidates[0].last_error.as_deref().unwrap().contains("down"));
        assert_eq!(candidates[1].total_calls, 1);
        assert_eq!(candidates[1].total_failures, 0);
    }
}

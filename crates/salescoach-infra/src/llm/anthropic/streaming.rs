//! SSE stream adapter for the Anthropic Messages API.
//!
//! Implements the streaming protocol from the Anthropic docs:
//! 1. `message_start` -- message metadata
//! 2. Per block: `content_block_start` -> N x `content_block_delta` -> `content_block_stop`
//! 3. `message_delta` -- stop_reason and cumulative usage
//! 4. `message_stop` -- final event
//! 5. `ping` events may appear anywhere (keepalive)
//! 6. `error` events may appear mid-stream
//!
//! Only text deltas are surfaced; other delta kinds are skipped.

use std::pin::Pin;

use eventsource_stream::Eventsource;
use futures_util::{Stream, StreamExt};
use secrecy::{ExposeSecret, SecretString};

use salescoach_types::llm::{LlmError, StreamEvent, Usage};

use super::client::{map_stop_reason, AnthropicProvider};
use super::types::{AnthropicDelta, AnthropicRequest, ContentBlockDeltaPayload, ErrorPayload, MessageDeltaPayload};

/// Create a streaming SSE connection to the Anthropic Messages API.
///
/// Returns a `Stream` of [`StreamEvent`]s that maps Anthropic-specific
/// SSE events to the provider-agnostic stream event enum. `Connected` is
/// emitted once the HTTP response status has been checked.
pub fn create_anthropic_stream(
    client: &reqwest::Client,
    url: &str,
    body: AnthropicRequest,
    api_key: &SecretString,
) -> Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send + 'static>> {
    let request = client
        .post(url)
        .header("x-api-key", api_key.expose_secret())
        .header("anthropic-version", AnthropicProvider::API_VERSION)
        .header("content-type", "application/json")
        .header("accept", "text/event-stream")
        .json(&body);

    Box::pin(async_stream::try_stream! {
        let response = request.send().await.map_err(|e| LlmError::Provider {
            message: format!("HTTP request failed: {e}"),
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            Err(match status.as_u16() {
                401 => LlmError::AuthenticationFailed,
                429 => LlmError::RateLimited { retry_after_ms: None },
                529 => LlmError::Overloaded(error_body),
                _ => LlmError::Provider {
                    message: format!("HTTP {status}: {error_body}"),
                },
            })?;
            // `?` above always propagates; this return exists only so the
            // borrow checker sees the branch diverge before `response` is
            // used again below.
            return;
        }

        yield StreamEvent::Connected;

        let mut events = response.bytes_stream().eventsource();
        while let Some(event) = events.next().await {
            let event = event.map_err(|e| LlmError::Stream(e.to_string()))?;
            match event.event.as_str() {
                "content_block_delta" => {
                    let payload: ContentBlockDeltaPayload = serde_json::from_str(&event.data)
                        .map_err(|e| {
                            LlmError::Deserialization(format!("content_block_delta: {e}"))
                        })?;
                    if let AnthropicDelta::TextDelta { text } = payload.delta {
                        yield StreamEvent::TextDelta { text };
                    }
                }
                "message_delta" => {
                    let payload: MessageDeltaPayload = serde_json::from_str(&event.data)
                        .map_err(|e| LlmError::Deserialization(format!("message_delta: {e}")))?;
                    yield StreamEvent::MessageDelta {
                        stop_reason: map_stop_reason(payload.delta.stop_reason.as_deref()),
                    };
                    yield StreamEvent::Usage(Usage {
                        input_tokens: payload.usage.input_tokens,
                        output_tokens: payload.usage.output_tokens,
                    });
                }
                "message_stop" => {
                    yield StreamEvent::Done;
                    break;
                }
                "error" => {
                    let payload: ErrorPayload = serde_json::from_str(&event.data)
                        .map_err(|e| LlmError::Deserialization(format!("error event: {e}")))?;
                    Err(match payload.error.error_type.as_str() {
                        "overloaded_error" => LlmError::Overloaded(payload.error.message),
                        "rate_limit_error" => LlmError::RateLimited { retry_after_ms: None },
                        _ => LlmError::Stream(payload.error.message),
                    })?;
                }
                // ping, message_start, content_block_start/stop carry
                // nothing we surface.
                _ => {}
            }
        }
    })
}

use super::anthropic_types::{
    ErrorResponse, MessagesResponse, ResponseContentBlock, StopReason, Usage,
};
use super::openai_types::{ChatCompletionResponse, ChatErrorResponse};

/// Translate a Chat Completion response into a Messages response.
/// `requested_model` is the model name the client asked for.
pub fn openai_to_anthropic(resp: &ChatCompletionResponse, requested_model: &str) -> MessagesResponse {
    let choice = resp.choices.first();

    let text = choice
        .and_then(|c| c.message.content.clone())
        .unwrap_or_default();

    let stop_reason = map_finish_reason(choice.and_then(|c| c.finish_reason.as_deref()));

    let usage = resp.usage.as_ref().map_or_else(Usage::default, |u| Usage {
        input_tokens: u.prompt_tokens,
        output_tokens: u.completion_tokens,
    });

    MessagesResponse {
        id: format!("msg_{}", resp.id.trim_start_matches("chatcmpl-")),
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content: vec![ResponseContentBlock::Text { text }],
        model: requested_model.to_string(),
        stop_reason: Some(stop_reason),
        stop_sequence: None,
        usage,
    }
}

/// Map a backend `finish_reason` onto a Messages `stop_reason`.
/// Anything unrecognised, or no reason at all, is `end_turn`.
pub fn map_finish_reason(reason: Option<&str>) -> StopReason {
    match reason {
        Some("length") => StopReason::MaxTokens,
        Some("tool_calls" | "function_call") => StopReason::ToolUse,
        _ => StopReason::EndTurn,
    }
}

/// Translate a backend error body into a Messages error response.
pub fn openai_error_to_anthropic(err: &ChatErrorResponse) -> ErrorResponse {
    let error_type = match err.error.error_type.as_str() {
        "invalid_request_error" => "invalid_request_error",
        "rate_limit_error" | "rate_limit_exceeded" => "rate_limit_error",
        _ => "api_error",
    };

    ErrorResponse::new(error_type, &err.error.message)
}

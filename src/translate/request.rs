//! Translate Messages API requests into `OpenAI` Chat Completions requests.
//!
//! Content is flattened to plain text: block lists keep their text parts,
//! joined with newlines, and drop everything else.

use super::anthropic_types::{Message, MessagesRequest, Role};
use super::openai_types::{ChatCompletionRequest, ChatMessage};
use crate::config::ProviderConfig;

pub const DEFAULT_TEMPERATURE: f64 = 0.7;

/// Translate a Messages request for `provider`.
/// `max_tokens_override` wins over whatever the client asked for.
pub fn anthropic_to_openai(
    req: &MessagesRequest,
    provider: &ProviderConfig,
    max_tokens_override: Option<u64>,
) -> ChatCompletionRequest {
    let mut messages = Vec::with_capacity(req.messages.len() + 1);

    if let Some(ref system) = req.system {
        messages.push(ChatMessage {
            role: "system".to_string(),
            content: system.as_text(),
        });
    }

    messages.extend(req.messages.iter().map(translate_message));

    ChatCompletionRequest {
        model: provider.map_model(&req.model),
        messages,
        max_tokens: max_tokens_override.or(req.max_tokens),
        temperature: req.temperature.unwrap_or(DEFAULT_TEMPERATURE),
        top_p: req.top_p,
        stream: req.stream.unwrap_or(false),
        stop: req.stop_sequences.clone(),
    }
}

fn translate_message(msg: &Message) -> ChatMessage {
    let role = match msg.role {
        Role::User => "user",
        Role::Assistant => "assistant",
    };

    ChatMessage {
        role: role.to_string(),
        content: msg.content.as_text(),
    }
}

use crate::config::BridgeConfig;
use crate::error::{ProxyError, Result};
use crate::translate::anthropic_types::{ErrorResponse, MessagesRequest, MessagesResponse};
use crate::translate::openai_types::{ChatCompletionRequest, ChatCompletionResponse, ChatErrorResponse};
use crate::translate::request::anthropic_to_openai;
use crate::translate::response::{openai_error_to_anthropic, openai_to_anthropic};
use crate::translate::streaming::{send_upstream_error, transcode};

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Frames buffered between the transcoder and the client connection.
/// Kept at one so a slow client throttles how fast the backend is read.
pub const SSE_CHANNEL_CAPACITY: usize = 1;

/// Outcome of proxying a non-streaming request
pub enum ProxyResult {
    Success(MessagesResponse),
    Error(ErrorResponse, u16),
}

/// A backend call ready to be sent.
struct Upstream {
    provider: String,
    url: String,
    api_key: String,
    body: ChatCompletionRequest,
}

fn prepare(req: &MessagesRequest, provider: Option<&str>, config: &BridgeConfig) -> Result<Upstream> {
    let (name, provider_config) = config.provider(provider)?;
    let base_url = provider_config.effective_base_url(name)?;
    let api_key = provider_config.resolve_api_key(name)?;
    let body = anthropic_to_openai(req, provider_config, config.server.max_tokens);

    Ok(Upstream {
        provider: name.to_string(),
        url: format!("{}/chat/completions", base_url),
        api_key,
        body,
    })
}

fn post(client: &reqwest::Client, upstream: &Upstream) -> reqwest::RequestBuilder {
    client
        .post(&upstream.url)
        .bearer_auth(&upstream.api_key)
        .header("Content-Type", "application/json")
        .json(&upstream.body)
}

/// Forward a non-streaming request through the selected provider.
pub async fn proxy_non_streaming(
    req: &MessagesRequest,
    provider: Option<&str>,
    config: &BridgeConfig,
    client: &reqwest::Client,
) -> Result<ProxyResult> {
    let upstream = prepare(req, provider, config)?;

    info!(
        provider = %upstream.provider,
        model = %upstream.body.model,
        "POST {}", upstream.url
    );

    let response = post(client, &upstream)
        .send()
        .await
        .map_err(|e| ProxyError::provider(format!("Request failed: {}", e)))?;

    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .map_err(|e| ProxyError::provider(format!("Failed to read response body: {}", e)))?;

    debug!(status, body_len = body.len(), "Upstream response");

    if !(200..300).contains(&status) {
        warn!(status, "Upstream error: {}", truncate(&body, 300));

        let err = match serde_json::from_str::<ChatErrorResponse>(&body) {
            Ok(err) => openai_error_to_anthropic(&err),
            Err(_) => ErrorResponse::api_error(format!("Upstream API error: {}", body)),
        };
        return Ok(ProxyResult::Error(err, status));
    }

    let openai_resp: ChatCompletionResponse = serde_json::from_str(&body).map_err(|e| {
        ProxyError::translation(format!(
            "Failed to parse provider response: {}. Body: {}",
            e,
            truncate(&body, 300)
        ))
    })?;

    let anthropic_resp = openai_to_anthropic(&openai_resp, &req.model);

    info!(
        input_tokens = anthropic_resp.usage.input_tokens,
        output_tokens = anthropic_resp.usage.output_tokens,
        "Completed"
    );

    Ok(ProxyResult::Success(anthropic_resp))
}

/// Start a streaming exchange and return the channel carrying its SSE frames.
///
/// Provider resolution errors are returned directly so the caller can still
/// answer with a plain HTTP error. Once this returns, every outcome (including
/// a failed backend call) is reported inside the event stream.
pub fn proxy_streaming(
    req: &MessagesRequest,
    provider: Option<&str>,
    config: &BridgeConfig,
    client: &reqwest::Client,
) -> Result<mpsc::Receiver<Bytes>> {
    let upstream = prepare(req, provider, config)?;
    let request = post(client, &upstream);
    let model = req.model.clone();
    let (tx, rx) = mpsc::channel(SSE_CHANNEL_CAPACITY);

    info!(
        provider = %upstream.provider,
        model = %upstream.body.model,
        "POST {} (streaming)", upstream.url
    );

    tokio::spawn(async move {
        if let Err(e) = relay_stream(request, model, tx).await {
            match e {
                ProxyError::ClientDisconnected => debug!("Client went away mid-stream"),
                other => warn!("Streaming exchange failed: {}", other),
            }
        }
    });

    Ok(rx)
}

async fn relay_stream(
    request: reqwest::RequestBuilder,
    model: String,
    sink: mpsc::Sender<Bytes>,
) -> Result<()> {
    let response = match request.send().await {
        Ok(r) => r,
        Err(e) => {
            warn!("Streaming request failed: {}", e);
            return send_upstream_error(sink, format!("Upstream request failed: {}", e)).await;
        }
    };

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), "Upstream error: {}", truncate(&body, 300));
        return send_upstream_error(sink, body).await;
    }

    let summary = transcode(response.bytes_stream(), &model, sink).await?;

    info!(
        message_id = %summary.message_id,
        stop_reason = summary.stop_reason.as_str(),
        deltas = summary.deltas,
        transport_error = summary.transport_error,
        "Stream completed"
    );

    Ok(())
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc");
        assert_eq!(truncate("上游错误", 4), "上");
    }
}

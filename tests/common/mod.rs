#![allow(dead_code)]

use bytes::Bytes;

/// One decoded `event:`/`data:` frame from the bridge's output.
#[derive(Debug, Clone)]
pub struct SseFrame {
    pub event: String,
    pub data: serde_json::Value,
}

pub fn parse_sse(raw: &[u8]) -> Vec<SseFrame> {
    let text = std::str::from_utf8(raw).expect("output is UTF-8");
    assert!(
        text.is_empty() || text.ends_with("\n\n"),
        "output does not end on a frame boundary: {text:?}"
    );

    text.split("\n\n")
        .filter(|block| !block.is_empty())
        .map(|block| {
            let mut lines = block.lines();
            let event = lines
                .next()
                .and_then(|l| l.strip_prefix("event: "))
                .expect("event line")
                .to_string();
            let data = lines
                .next()
                .and_then(|l| l.strip_prefix("data: "))
                .expect("data line");
            assert!(lines.next().is_none(), "unexpected extra line in {block:?}");
            let data: serde_json::Value = serde_json::from_str(data).expect("data is JSON");
            assert_eq!(data["type"], event.as_str());
            SseFrame { event, data }
        })
        .collect()
}

pub fn event_names(frames: &[SseFrame]) -> Vec<&str> {
    frames.iter().map(|f| f.event.as_str()).collect()
}

pub fn text_deltas(frames: &[SseFrame]) -> Vec<String> {
    frames
        .iter()
        .filter(|f| f.event == "content_block_delta")
        .map(|f| f.data["delta"]["text"].as_str().unwrap_or_default().to_string())
        .collect()
}

pub fn stop_reason(frames: &[SseFrame]) -> Option<String> {
    frames
        .iter()
        .find(|f| f.event == "message_delta")
        .and_then(|f| f.data["delta"]["stop_reason"].as_str())
        .map(String::from)
}

pub fn delta_line(text: &str) -> String {
    format!(
        "data: {}\n\n",
        serde_json::json!({
            "id": "chatcmpl-1",
            "object": "chat.completion.chunk",
            "choices": [{"index": 0, "delta": {"content": text}, "finish_reason": null}]
        })
    )
}

pub fn finish_line(reason: &str) -> String {
    format!(
        "data: {}\n\n",
        serde_json::json!({
            "id": "chatcmpl-1",
            "object": "chat.completion.chunk",
            "choices": [{"index": 0, "delta": {}, "finish_reason": reason}]
        })
    )
}

/// Split `body` into chunks of `size` bytes, ignoring line structure.
pub fn rechunk(body: &str, size: usize) -> Vec<Bytes> {
    body.as_bytes()
        .chunks(size)
        .map(Bytes::copy_from_slice)
        .collect()
}

pub const FULL_LIFECYCLE: [&str; 7] = [
    "message_start",
    "content_block_start",
    "ping",
    "content_block_delta",
    "content_block_stop",
    "message_delta",
    "message_stop",
];

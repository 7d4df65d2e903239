//! State machine for translating backend streaming chunks into Messages SSE events.
//!
//! [`TranscoderState`] is a plain value: every step takes it by value and hands
//! back the next state together with the events to emit, so one exchange never
//! shares anything with another. [`transcode`] drives it over a backend body
//! and writes SSE frames to the client channel as soon as they are produced.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;

use super::anthropic_types::{
    Delta, DeltaUsage, ErrorBody, MessageDeltaBody, MessagesResponse, ResponseContentBlock,
    StopReason, StreamEvent, Usage,
};
use super::frame::{read_frames, Frame};
use super::openai_types::ChatCompletionChunk;
use super::response::map_finish_reason;
use crate::error::{ProxyError, Result};

/// The single text block every streamed message carries.
pub const TEXT_BLOCK_INDEX: usize = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscoderState {
    pub message_id: String,
    pub started: bool,
    pub content_block_open: bool,
    pub final_reason: StopReason,
    pub finished: bool,
}

/// Whether the driver should keep reading backend input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Finish,
}

/// Result of one transition.
#[derive(Debug)]
pub struct Step {
    pub state: TranscoderState,
    pub events: Vec<StreamEvent>,
    pub flow: Flow,
}

impl Default for TranscoderState {
    fn default() -> Self {
        Self::new()
    }
}

impl TranscoderState {
    pub fn new() -> Self {
        Self {
            message_id: new_message_id(),
            started: false,
            content_block_open: false,
            final_reason: StopReason::EndTurn,
            finished: false,
        }
    }

    /// Init -> Started: `message_start`, `content_block_start`, `ping`.
    pub fn start(mut self, model: &str) -> Step {
        if self.started {
            return self.idle(Flow::Continue);
        }

        let events = vec![
            StreamEvent::MessageStart {
                message: MessagesResponse {
                    id: self.message_id.clone(),
                    response_type: "message".to_string(),
                    role: "assistant".to_string(),
                    content: Vec::new(),
                    model: model.to_string(),
                    stop_reason: None,
                    stop_sequence: None,
                    usage: Usage::default(),
                },
            },
            StreamEvent::ContentBlockStart {
                index: TEXT_BLOCK_INDEX,
                content_block: ResponseContentBlock::Text {
                    text: String::new(),
                },
            },
            StreamEvent::Ping,
        ];

        self.started = true;
        self.content_block_open = true;

        Step {
            state: self,
            events,
            flow: Flow::Continue,
        }
    }

    /// Started -> Started for a text fragment, Started -> Finishing for a
    /// finish reason. A chunk carrying both emits its fragment first.
    pub fn on_chunk(mut self, chunk: &ChatCompletionChunk) -> Step {
        if !self.content_block_open || self.finished {
            return self.idle(Flow::Finish);
        }

        let mut events = Vec::new();

        if let Some(text) = chunk.text() {
            events.push(StreamEvent::ContentBlockDelta {
                index: TEXT_BLOCK_INDEX,
                delta: Delta::TextDelta {
                    text: text.to_string(),
                },
            });
        }

        let flow = match chunk.finish_reason() {
            Some(reason) => {
                self.final_reason = map_finish_reason(Some(reason));
                Flow::Finish
            }
            None => Flow::Continue,
        };

        Step {
            state: self,
            events,
            flow,
        }
    }

    /// Finishing -> Terminal: `content_block_stop`, `message_delta`,
    /// `message_stop`. Emits nothing if the message never started or was
    /// already closed.
    pub fn close(mut self) -> Step {
        if !self.started || self.finished {
            return self.idle(Flow::Finish);
        }

        let mut events = Vec::with_capacity(3);
        if self.content_block_open {
            events.push(StreamEvent::ContentBlockStop {
                index: TEXT_BLOCK_INDEX,
            });
            self.content_block_open = false;
        }
        events.push(StreamEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason: Some(self.final_reason),
                stop_sequence: None,
            },
            usage: DeltaUsage { output_tokens: 0 },
        });
        events.push(StreamEvent::MessageStop);
        self.finished = true;

        Step {
            state: self,
            events,
            flow: Flow::Finish,
        }
    }

    fn idle(self, flow: Flow) -> Step {
        Step {
            state: self,
            events: Vec::new(),
            flow,
        }
    }
}

fn new_message_id() -> String {
    format!("msg_{}", uuid::Uuid::new_v4().simple())
}

/// The lone event sent when the backend fails before streaming anything.
pub fn upstream_error_event(message: impl Into<String>) -> StreamEvent {
    StreamEvent::Error {
        error: ErrorBody::new("api_error", message),
    }
}

/// How a streamed exchange ended.
#[derive(Debug, Clone)]
pub struct TranscodeSummary {
    pub message_id: String,
    pub stop_reason: StopReason,
    pub deltas: usize,
    /// The backend connection failed mid-stream; the message was closed anyway.
    pub transport_error: bool,
}

/// Translate a backend event stream into Messages SSE frames on `sink`.
///
/// Each frame is handed to the sink, and the send awaited, before more backend
/// input is read. Dropping `sink` on return ends the client response. If the
/// client goes away the exchange stops immediately with
/// [`ProxyError::ClientDisconnected`] and no closing events.
pub async fn transcode<S, E>(
    body: S,
    model: &str,
    sink: mpsc::Sender<Bytes>,
) -> Result<TranscodeSummary>
where
    S: Stream<Item = std::result::Result<Bytes, E>>,
    E: std::fmt::Display,
{
    let step = TranscoderState::new().start(model);
    emit(&sink, &step.events).await?;
    let mut state = step.state;

    let mut deltas = 0;
    let mut transport_error = false;
    let mut frames = Box::pin(read_frames(body));

    while let Some(item) = frames.next().await {
        let chunk = match item {
            Ok(Frame::Chunk(chunk)) => chunk,
            Ok(Frame::Done) => break,
            Err(e) => {
                tracing::warn!(message_id = %state.message_id, "Backend stream failed: {}", e);
                transport_error = true;
                break;
            }
        };

        let step = state.on_chunk(&chunk);
        deltas += step.events.len();
        emit(&sink, &step.events).await?;
        state = step.state;

        if step.flow == Flow::Finish {
            break;
        }
    }

    // Release the backend before the closing sequence.
    drop(frames);

    let step = state.close();
    emit(&sink, &step.events).await?;

    Ok(TranscodeSummary {
        message_id: step.state.message_id,
        stop_reason: step.state.final_reason,
        deltas,
        transport_error,
    })
}

/// Report a backend failure that happened before any streaming began.
pub async fn send_upstream_error(sink: mpsc::Sender<Bytes>, message: impl Into<String>) -> Result<()> {
    emit(&sink, &[upstream_error_event(message)]).await
}

async fn emit(sink: &mpsc::Sender<Bytes>, events: &[StreamEvent]) -> Result<()> {
    for event in events {
        let frame = event.to_sse_frame()?;
        sink.send(frame)
            .await
            .map_err(|_| ProxyError::ClientDisconnected)?;
    }
    Ok(())
}

//! Translation between the Messages API and `OpenAI` Chat Completions.
//!
//! Request and whole-response conversion are pure functions. Streamed output
//! goes through [`frame`] (backend line reassembly) and [`streaming`] (the
//! event state machine and its driver).

pub mod anthropic_types;
pub mod frame;
pub mod openai_types;
pub mod request;
pub mod response;
pub mod streaming;

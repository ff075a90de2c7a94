//! Span utilities for per-frame tracing.

use tracing::{info_span, Span};

/// Extension trait for adding outcome fields to spans.
pub trait SpanExt {
    /// Record the result of an operation into the span.
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display;
}

impl SpanExt for Span {
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display,
    {
        match result {
            Ok(_) => {
                self.record("status", "ok");
            }
            Err(e) => {
                self.record("status", "error");
                self.record("error.message", e.to_string().as_str());
            }
        }
    }
}

/// Factory for the span wrapping one inbound frame.
pub struct FrameSpan;

impl FrameSpan {
    /// Fields:
    /// - `identity`: transport-level caller identity
    /// - `message_type`: decoded message tag
    /// - `protocol_version`: version carried by the frame header
    /// - `status` / `error.message`: filled by `SpanExt::record_result`
    pub fn new(identity: &str, message_type: &str, protocol_version: u16) -> Span {
        info_span!(
            "ipc_frame",
            identity = %identity,
            message_type = %message_type,
            protocol_version,
            status = tracing::field::Empty,
            error.message = tracing::field::Empty,
        )
    }
}

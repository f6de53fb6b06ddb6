//! Incremental decoder for `text/event-stream` bodies.

use std::time::Duration;

use crate::error::ClientError;

const DEFAULT_EVENT_NAME: &str = "message";

/// Longest line the decoder buffers before giving up on the stream.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
    pub id: Option<String>,
}

/// Accumulates raw body chunks and yields complete frames at blank-line boundaries.
/// Chunks may split lines (and UTF-8 sequences) anywhere.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
    retry: Option<Duration>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails with `StreamLineTooLong` once a line grows past [`MAX_LINE_BYTES`]; the decoder is
    /// reset and the connection should be dropped.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<SseFrame>, ClientError> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(newline) = self.buffer.iter().position(|byte| *byte == b'\n') {
            if newline > MAX_LINE_BYTES {
                return Err(self.overflow());
            }
            let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }

        if self.buffer.len() > MAX_LINE_BYTES {
            return Err(self.overflow());
        }
        Ok(frames)
    }

    fn overflow(&mut self) -> ClientError {
        *self = Self {
            retry: self.retry,
            ..Self::default()
        };
        ClientError::StreamLineTooLong(MAX_LINE_BYTES)
    }

    /// Reconnection delay most recently requested by the server, if any.
    pub fn retry(&self) -> Option<Duration> {
        self.retry
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            "retry" => {
                if let Ok(millis) = value.trim().parse::<u64>() {
                    self.retry = Some(Duration::from_millis(millis));
                }
            }
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if self.data.is_empty() && event.is_none() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame {
            event: event
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| DEFAULT_EVENT_NAME.to_string()),
            data,
            id: self.id.clone(),
        })
    }
}

#[cfg(test)]
#[path = "tests/sse_tests.rs"]
mod tests;

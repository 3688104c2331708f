//! Server-sent events framing for OpenAI-compatible streaming responses.

use futures::stream::{Stream, StreamExt};
use std::fmt::Display;

use crate::utils::error::ModelError;

const DONE_SENTINEL: &str = "[DONE]";

/// Yields the payload of every `data:` line, ending at `[DONE]`.
/// Lines may be split across network chunks.
pub fn data_payloads<S, B, E>(source: S) -> impl Stream<Item = Result<String, ModelError>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Display + Send,
{
    async_stream::stream! {
        let mut source = Box::pin(source);
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = source.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    yield Err(ModelError::Stream(e.to_string()));
                    return;
                }
            };
            buffer.extend_from_slice(bytes.as_ref());

            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                match parse_line(&line) {
                    Line::Data(payload) => yield Ok(payload),
                    Line::Done => return,
                    Line::Skip => {}
                }
            }
        }

        if let Line::Data(payload) = parse_line(&buffer) {
            yield Ok(payload);
        }
    }
}

enum Line {
    Data(String),
    Done,
    Skip,
}

fn parse_line(raw: &[u8]) -> Line {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim_end_matches(|c: char| c == '\r' || c == '\n');

    match line.strip_prefix("data:") {
        Some(payload) => {
            let payload = payload.trim_start();
            if payload == DONE_SENTINEL {
                Line::Done
            } else if payload.is_empty() {
                Line::Skip
            } else {
                Line::Data(payload.to_string())
            }
        }
        // comments, event names, keep-alives
        None => Line::Skip,
    }
}

//! Decoder for server-sent-event chat completion streams.
//!
//! The body is read line by line. `data:` lines carry a JSON chunk or the
//! `[DONE]` sentinel; every other line is ignored, as is any chunk that
//! fails to parse or carries no text. Decoding is lazy: nothing past the
//! sentinel is ever read.

use std::pin::Pin;

use futures_core::Stream;
use futures_util::StreamExt;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use super::ChunkRecord;

/// Prefix of lines that carry a payload.
pub const DATA_PREFIX: &str = "data:";

/// Payload that ends a stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Error type for stream operations.
#[derive(thiserror::Error, Debug)]
pub enum StreamError {
    #[error("Failed to read response stream: {0}")]
    Io(#[from] std::io::Error),
}

/// Tokens of one streamed completion, in arrival order.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, StreamError>> + Send>>;

/// Meaning of a single line of an event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseLine {
    /// Nothing to emit; keep reading.
    Skip,
    /// A non-empty text fragment.
    Token(String),
    /// End of stream.
    Done,
}

/// Classify one line, without its trailing newline.
#[must_use]
pub fn decode_line(line: &str) -> SseLine {
    let line = line.trim();
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return SseLine::Skip;
    };
    let payload = payload.trim();

    if payload == DONE_SENTINEL {
        return SseLine::Done;
    }

    match serde_json::from_str::<ChunkRecord>(payload) {
        Ok(record) => record
            .token()
            .map_or(SseLine::Skip, |token| SseLine::Token(token.to_string())),
        Err(e) => {
            tracing::trace!(error = %e, "Skipping malformed stream chunk");
            SseLine::Skip
        }
    }
}

struct LineReader<R> {
    reader: R,
    buf: Vec<u8>,
}

/// Lazily decode tokens from an event-stream body.
///
/// The stream ends at `[DONE]` or end of input. A read error is yielded
/// once and then the stream ends.
pub fn decode_tokens<R>(reader: R) -> impl Stream<Item = Result<String, StreamError>>
where
    R: AsyncBufRead + Unpin,
{
    let state = LineReader {
        reader,
        buf: Vec::new(),
    };

    futures_util::stream::unfold(Some(state), |state| async move {
        let mut state = state?;
        loop {
            state.buf.clear();
            match state.reader.read_until(b'\n', &mut state.buf).await {
                Ok(0) => return None,
                Ok(_) => {
                    // Invalid UTF-8 only spoils the line it appears on.
                    let decoded = decode_line(&String::from_utf8_lossy(&state.buf));
                    match decoded {
                        SseLine::Token(token) => return Some((Ok(token), Some(state))),
                        SseLine::Done => return None,
                        SseLine::Skip => {}
                    }
                }
                Err(e) => return Some((Err(StreamError::Io(e)), None)),
            }
        }
    })
}

/// Box [`decode_tokens`] into a [`TokenStream`].
pub fn token_stream<R>(reader: R) -> TokenStream
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    decode_tokens(reader).boxed()
}

/// Drain a token stream into one string.
///
/// # Errors
///
/// Returns the first read error; tokens received before it are lost.
pub async fn collect_text<S>(mut tokens: S) -> Result<String, StreamError>
where
    S: Stream<Item = Result<String, StreamError>> + Unpin,
{
    let mut text = String::new();
    while let Some(token) = tokens.next().await {
        text.push_str(&token?);
    }
    Ok(text)
}

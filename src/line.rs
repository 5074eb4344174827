//! Splitting an access log line into the origin it belongs to and the rest of it.
//!
//! Apache is configured to put the virtual host name in front of every entry, e.g.
//! `example.com 192.0.2.1 - - [..] "GET / HTTP/1.1" 200 12`.
//!
//! Lines are bytes, not text. Request paths and user agents aren't guaranteed to be UTF-8 and
//! everything after the host name is written out exactly as it came in.

use regex::bytes::Regex;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::AsyncBufRead;
use tokio_stream::Stream;
use tracing::warn;

/// A host name with at least one dot, followed by a single space
const ORIGIN_PATTERN: &str = r"^([_a-zA-Z0-9-]+\.(?:[_a-zA-Z0-9-]+\.?)+) ";

/// Longest line kept, anything past it up to the next newline is dropped
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// One input line, split
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine<'a> {
    /// lowercased origin, empty when the line doesn't start with one
    pub origin: String,
    /// the line without the origin and the space after it
    pub residual: &'a [u8],
    /// the line as it was received
    pub raw: &'a [u8],
}

pub struct LineSplitter {
    pattern: Regex,
}

impl LineSplitter {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(LineSplitter {
            pattern: Regex::new(ORIGIN_PATTERN)?,
        })
    }

    pub fn split<'a>(&self, line: &'a [u8]) -> LogLine<'a> {
        let captures = match self.pattern.captures(line) {
            Some(captures) => captures,
            None => return Self::unrouted(line),
        };
        match (captures.get(0), captures.get(1)) {
            (Some(prefix), Some(origin)) => LogLine {
                // the pattern only matches ASCII here
                origin: String::from_utf8_lossy(origin.as_bytes()).to_ascii_lowercase(),
                residual: &line[prefix.end()..],
                raw: line,
            },
            _ => Self::unrouted(line),
        }
    }

    fn unrouted(line: &[u8]) -> LogLine<'_> {
        LogLine {
            origin: String::new(),
            residual: line,
            raw: line,
        }
    }
}

/// Stream of input lines without their terminator, at most `max_len` bytes each
///
/// A trailing `\r` is dropped. The last line is yielded even without a newline.
pub struct LineReader<R> {
    reader: R,
    max_len: usize,
    line: Vec<u8>,
    /// bytes dropped from the current line
    dropped: usize,
    done: bool,
}

impl<R> LineReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_max_len(reader, MAX_LINE_LEN)
    }

    pub fn with_max_len(reader: R, max_len: usize) -> Self {
        LineReader {
            reader,
            max_len,
            line: Vec::new(),
            dropped: 0,
            done: false,
        }
    }

    fn take_line(&mut self) -> Vec<u8> {
        if self.dropped > 0 {
            warn!(
                kept = self.line.len(),
                dropped = self.dropped,
                "truncated overlong input line"
            );
            self.dropped = 0;
        }
        if self.line.last() == Some(&b'\r') {
            self.line.pop();
        }
        std::mem::take(&mut self.line)
    }
}

impl<R: AsyncBufRead + Unpin> Stream for LineReader<R> {
    type Item = io::Result<Vec<u8>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        loop {
            let available = match Pin::new(&mut this.reader).poll_fill_buf(cx) {
                Poll::Ready(Ok(available)) => available,
                Poll::Ready(Err(err)) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(err)));
                }
                Poll::Pending => return Poll::Pending,
            };

            if available.is_empty() {
                this.done = true;
                if this.line.is_empty() && this.dropped == 0 {
                    return Poll::Ready(None);
                }
                return Poll::Ready(Some(Ok(this.take_line())));
            }

            let newline = available.iter().position(|&byte| byte == b'\n');
            let chunk = &available[..newline.unwrap_or(available.len())];
            let room = this.max_len.saturating_sub(this.line.len());
            let kept = chunk.len().min(room);
            this.line.extend_from_slice(&chunk[..kept]);
            this.dropped += chunk.len() - kept;

            let used = newline.map_or(chunk.len(), |pos| pos + 1);
            Pin::new(&mut this.reader).consume(used);

            if newline.is_some() {
                return Poll::Ready(Some(Ok(this.take_line())));
            }
        }
    }
}

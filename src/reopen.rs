//! Reopening log files when the rotation job asks for it
//!
//! The daily rotation job renames log files out from under us and then sends `SIGHUP`. The signal
//! doesn't touch the open files directly: it becomes an [`Event::Reopen`] in the same stream as the
//! input lines, so the router is only ever driven from one place and lines before the signal are
//! finished before any handle is closed.

use crate::line::{LineReader, LineSplitter};
use crate::router::LogRouter;
use std::io;
use tokio::io::AsyncBufRead;
use tokio::signal::unix::{signal, SignalKind};
use tokio_stream::wrappers::SignalStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// one input line, without its terminator
    Line(Vec<u8>),
    /// close every log file
    Reopen,
    /// no more input
    Eof,
}

/// Subscription to `SIGHUP`
///
/// Stays armed until dropped.
pub struct ReopenController {
    signals: SignalStream,
}

impl ReopenController {
    pub fn new() -> io::Result<Self> {
        Ok(ReopenController {
            signals: SignalStream::new(signal(SignalKind::hangup())?),
        })
    }

    /// Yields once per delivered signal
    pub fn into_stream(self) -> SignalStream {
        self.signals
    }
}

/// Merges input lines and reopen requests into one stream, ending with [`Event::Eof`]
///
/// The stream itself only ends once `reopen` does, the consumer stops at [`Event::Eof`].
pub fn events<R, S>(input: R, reopen: S) -> impl Stream<Item = io::Result<Event>>
where
    R: AsyncBufRead + Unpin,
    S: Stream<Item = ()>,
{
    let lines = LineReader::new(input)
        .map(|line| line.map(Event::Line))
        .chain(tokio_stream::once(Ok(Event::Eof)));
    lines.merge(reopen.map(|()| Ok(Event::Reopen)))
}

/// Routes every line and handles reopen requests until the input ends.
///
/// All log files are closed on the way out. An error reading the input ends the loop and is
/// returned, failures writing individual lines never are.
pub async fn run<S>(router: &mut LogRouter, splitter: &LineSplitter, events: S) -> io::Result<()>
where
    S: Stream<Item = io::Result<Event>>,
{
    tokio::pin!(events);

    let result = loop {
        match events.next().await {
            Some(Ok(Event::Line(line))) => {
                if let Err(err) = router.route(&splitter.split(&line)) {
                    warn!(
                        path = %err.path(),
                        error = %err.chain(),
                        "failed to write to fallback log file"
                    );
                }
            }
            Some(Ok(Event::Reopen)) => {
                debug!("received reopen request");
                router.reopen();
            }
            Some(Ok(Event::Eof)) | None => break Ok(()),
            Some(Err(err)) => break Err(err),
        }
    };

    router.shutdown();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouterConfig;
    use crate::test_util::tempdir;
    use camino::Utf8PathBuf;
    use std::fs;

    struct Fixture {
        _guard: tempfile::TempDir,
        prefix: Utf8PathBuf,
        fallback: Utf8PathBuf,
        router: LogRouter,
    }

    fn fixture() -> Fixture {
        let (guard, root) = tempdir();
        let prefix = root.join("srv");
        fs::create_dir(&prefix).unwrap();
        fs::create_dir(prefix.join("example.com")).unwrap();
        let fallback = root.join("fallback.log");
        let config = RouterConfig {
            prefix: prefix.clone(),
            fallback: fallback.clone(),
            min_owner_id: 0,
            ..RouterConfig::default()
        };
        Fixture {
            _guard: guard,
            router: LogRouter::new(&config).unwrap(),
            prefix,
            fallback,
        }
    }

    #[tokio::test]
    async fn events_end_with_eof() {
        let input: &[u8] = b"one\r\ntwo\nthree";
        let collected: Vec<_> = events(input, tokio_stream::empty())
            .map(Result::unwrap)
            .collect()
            .await;
        assert_eq!(
            collected,
            vec![
                Event::Line(b"one".to_vec()),
                Event::Line(b"two".to_vec()),
                Event::Line(b"three".to_vec()),
                Event::Eof,
            ]
        );
    }

    #[tokio::test]
    async fn fallback_receives_exact_bytes() {
        let mut fx = fixture();
        let splitter = LineSplitter::new().unwrap();
        let input: &[u8] = b"ghost.example GET /caf\xe9\nexample.com GET /na\xefve\n";

        run(
            &mut fx.router,
            &splitter,
            events(input, tokio_stream::pending()),
        )
        .await
        .unwrap();

        assert_eq!(
            fs::read(&fx.fallback).unwrap(),
            b"ghost.example GET /caf\xe9\n"
        );
        assert_eq!(
            fs::read(fx.prefix.join("example.com/public/logs/access.log")).unwrap(),
            b"GET /na\xefve\n"
        );
    }

    #[tokio::test]
    async fn routes_input_and_closes_on_eof() {
        let mut fx = fixture();
        let splitter = LineSplitter::new().unwrap();
        let input: &[u8] = b"example.com GET / HTTP/1.1 200 12\nghost.example GET /\nno origin here\n";

        run(
            &mut fx.router,
            &splitter,
            events(input, tokio_stream::pending()),
        )
        .await
        .unwrap();

        assert_eq!(fx.router.open_handles(), 0);
        assert_eq!(
            fs::read_to_string(fx.prefix.join("example.com/public/logs/access.log")).unwrap(),
            "GET / HTTP/1.1 200 12\n"
        );
        assert_eq!(
            fs::read_to_string(&fx.fallback).unwrap(),
            "ghost.example GET /\nno origin here\n"
        );
    }

    #[tokio::test]
    async fn reopen_event_closes_handles_between_lines() {
        let mut fx = fixture();
        let splitter = LineSplitter::new().unwrap();
        let log = fx.prefix.join("example.com/public/logs/access.log");
        let rotated = fx.prefix.join("example.com/public/logs/access.log.1");

        fx.router.route(&splitter.split(b"example.com zero")).unwrap();
        fs::rename(&log, &rotated).unwrap();

        let script = tokio_stream::iter(vec![
            Ok(Event::Line(b"example.com one".to_vec())),
            Ok(Event::Reopen),
            Ok(Event::Line(b"example.com two".to_vec())),
            Ok(Event::Eof),
        ]);
        run(&mut fx.router, &splitter, script).await.unwrap();

        assert_eq!(fs::read_to_string(&rotated).unwrap(), "zero\none\n");
        assert_eq!(fs::read_to_string(&log).unwrap(), "two\n");
    }

    #[tokio::test]
    async fn input_error_is_returned_after_closing() {
        let mut fx = fixture();
        let splitter = LineSplitter::new().unwrap();
        let script = tokio_stream::iter(vec![
            Ok(Event::Line(b"example.com one".to_vec())),
            Err(io::Error::new(io::ErrorKind::Other, "broken pipe")),
            Ok(Event::Line(b"example.com never".to_vec())),
        ]);

        let err = run(&mut fx.router, &splitter, script).await.unwrap_err();
        assert_eq!(err.to_string(), "broken pipe");
        assert_eq!(fx.router.open_handles(), 0);
        assert_eq!(
            fs::read_to_string(fx.prefix.join("example.com/public/logs/access.log")).unwrap(),
            "one\n"
        );
    }
}

//! Transport for prepl connections.
//!
//! Outbound frames are written verbatim. Inbound frames are self-delimiting EDN
//! forms, which may arrive split across several reads or several per line.

use std::io;
use std::time::Duration;

use log::{debug, warn};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::error::{ReplError, ReplResult};
use crate::protocol::edn::{self, EdnError, Value};

/// Open the TCP stream for a connection.
pub(crate) async fn open_stream(tag: &str, host: &str, port: u16) -> ReplResult<TcpStream> {
    let addr = format!("{}:{}", host, port);
    let stream = TcpStream::connect(&addr)
        .await
        .map_err(|source| ReplError::Connect {
            tag: tag.to_string(),
            addr: addr.clone(),
            source,
        })?;
    if let Err(e) = stream.set_nodelay(true) {
        debug!(target: "conjure::bridge", "[{}] Could not set TCP_NODELAY: {}", tag, e);
    }
    debug!(target: "conjure::bridge", "[{}] Connected to {}", tag, addr);
    Ok(stream)
}

/// Largest frame buffered while waiting for it to complete.
const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Reads EDN frames from the inbound half of a stream.
pub(crate) struct FrameReader<R> {
    reader: BufReader<R>,
    /// Text received but not yet consumed by a complete form.
    pending: String,
    limit: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub(crate) fn new(reader: R) -> Self {
        Self::with_limit(reader, MAX_FRAME_BYTES)
    }

    pub(crate) fn with_limit(reader: R, limit: usize) -> Self {
        Self {
            reader: BufReader::new(reader),
            pending: String::new(),
            limit,
        }
    }

    /// Read the next complete form.
    ///
    /// Returns `Ok(None)` at end of stream. A form that cannot be decoded is
    /// reported as `InvalidData` and dropped, so the next call continues with
    /// fresh input. A form that grows past the size limit is an error of any
    /// other kind: the rest of the stream can no longer be framed.
    pub(crate) async fn read_frame(&mut self) -> io::Result<Option<Value>> {
        loop {
            match edn::read_prefix(&self.pending) {
                Ok(Some((value, consumed))) => {
                    self.pending.drain(..consumed);
                    return Ok(Some(value));
                }
                Ok(None) => self.pending.clear(),
                Err(EdnError::Incomplete) => {}
                Err(e) => {
                    self.pending.clear();
                    return Err(io::Error::new(io::ErrorKind::InvalidData, e));
                }
            }

            let room = self.limit.saturating_sub(self.pending.len());
            if room == 0 {
                let buffered = std::mem::take(&mut self.pending).len();
                return Err(io::Error::other(format!(
                    "frame exceeds {} bytes ({} buffered)",
                    self.limit, buffered
                )));
            }
            let read = (&mut self.reader)
                .take(room as u64)
                .read_line(&mut self.pending)
                .await?;
            if read == 0 {
                if !self.pending.trim().is_empty() {
                    warn!(
                        target: "conjure::bridge::reader",
                        "Stream ended inside a frame, dropping {} bytes",
                        self.pending.len()
                    );
                }
                return Ok(None);
            }
        }
    }
}

/// Consecutive attempts at one write before a transient error becomes fatal.
pub(crate) const WRITE_ATTEMPTS: u32 = 5;
const RETRY_BACKOFF: Duration = Duration::from_millis(10);

/// Errors worth retrying the same write for.
fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// Write one outbound frame and flush it.
///
/// A transient error retries from the first unwritten byte after a growing
/// pause. Any other error, or `WRITE_ATTEMPTS` transient ones in a row, is
/// returned and the frame must be considered lost.
pub(crate) async fn write_frame<W>(writer: &mut W, frame: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut rest = frame.as_bytes();
    let mut failures = 0;
    while !rest.is_empty() {
        match writer.write(rest).await {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(written) => {
                rest = &rest[written..];
                failures = 0;
            }
            Err(e) => retry_after(e, &mut failures).await?,
        }
    }
    loop {
        match writer.flush().await {
            Ok(()) => return Ok(()),
            Err(e) => retry_after(e, &mut failures).await?,
        }
    }
}

async fn retry_after(error: io::Error, failures: &mut u32) -> io::Result<()> {
    if !is_transient(&error) || *failures + 1 >= WRITE_ATTEMPTS {
        return Err(error);
    }
    *failures += 1;
    debug!(target: "conjure::bridge::writer", "Transient write error, retrying: {}", error);
    tokio::time::sleep(RETRY_BACKOFF * *failures).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    #[tokio::test]
    async fn reads_one_frame_per_line() {
        let input = "{:tag :out, :val \"hi\\n\"}\n{:tag :ret, :val \"1\"}\n";
        let mut reader = FrameReader::new(input.as_bytes());

        let first = reader.read_frame().await.unwrap().unwrap();
        let second = reader.read_frame().await.unwrap().unwrap();

        assert_eq!(first.get("tag").and_then(Value::as_keyword), Some("out"));
        assert_eq!(second.get("val").and_then(Value::as_str), Some("1"));
        assert_eq!(reader.read_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn reassembles_frames_split_across_writes() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(client);

        let writer = tokio::spawn(async move {
            server.write_all(b"{:tag :ret,\n").await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            server.write_all(b" :val \"[1\n 2]\"}\n").await.unwrap();
        });

        let frame = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(frame.get("val").and_then(Value::as_str), Some("[1\n 2]"));
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn several_frames_on_one_line_are_returned_in_order() {
        let mut reader = FrameReader::new("{:tag :out} {:tag :ret}\n".as_bytes());

        let first = reader.read_frame().await.unwrap().unwrap();
        let second = reader.read_frame().await.unwrap().unwrap();

        assert_eq!(first.get("tag").and_then(Value::as_keyword), Some("out"));
        assert_eq!(second.get("tag").and_then(Value::as_keyword), Some("ret"));
    }

    #[tokio::test]
    async fn malformed_frame_is_reported_and_skipped() {
        let mut reader = FrameReader::new(")\n{:tag :ret}\n".as_bytes());

        let err = reader.read_frame().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let next = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(next.get("tag").and_then(Value::as_keyword), Some("ret"));
    }

    #[tokio::test]
    async fn oversized_frame_is_a_fatal_error() {
        let input = format!("{{:tag :out, :val \"{}\"}}\n", "x".repeat(200));
        let mut reader = FrameReader::with_limit(input.as_bytes(), 64);

        let err = reader.read_frame().await.unwrap_err();

        assert_ne!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().contains("exceeds 64 bytes"), "got: {}", err);
    }

    #[tokio::test]
    async fn multi_line_frame_under_the_limit_is_read() {
        let input = "{:tag :out,\n :val \"a\"}\n";
        let mut reader = FrameReader::with_limit(input.as_bytes(), 64);

        let frame = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(frame.get("val").and_then(Value::as_str), Some("a"));
    }

    #[tokio::test]
    async fn deeply_nested_frame_is_skipped() {
        let input = format!("{}\n{{:tag :ret, :val \"1\"}}\n", "[".repeat(100_000));
        let mut reader = FrameReader::new(input.as_bytes());

        let err = reader.read_frame().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let next = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(next.get("tag").and_then(Value::as_keyword), Some("ret"));
    }

    #[tokio::test]
    async fn truncated_frame_at_eof_ends_stream() {
        let mut reader = FrameReader::new("{:tag :ret".as_bytes());
        assert_eq!(reader.read_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn write_frame_writes_verbatim() {
        let mut out = Vec::new();
        write_frame(&mut out, "(+ 1 2)\n").await.unwrap();
        assert_eq!(out, b"(+ 1 2)\n");
    }

    /// Accepts at most `chunk` bytes per write. Fails with `kind` while
    /// `failures` remain, on every call or every other call.
    struct FlakyWriter {
        kind: io::ErrorKind,
        failures: usize,
        alternate: bool,
        chunk: usize,
        failed_last: bool,
        attempts: usize,
        written: Vec<u8>,
    }

    impl FlakyWriter {
        fn alternating(kind: io::ErrorKind, failures: usize, chunk: usize) -> Self {
            Self {
                kind,
                failures,
                alternate: true,
                chunk,
                failed_last: false,
                attempts: 0,
                written: Vec::new(),
            }
        }

        fn failing(kind: io::ErrorKind) -> Self {
            Self {
                alternate: false,
                ..Self::alternating(kind, usize::MAX, 16)
            }
        }
    }

    impl AsyncWrite for FlakyWriter {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            self.attempts += 1;
            let fail = self.failures > 0 && !(self.alternate && self.failed_last);
            self.failed_last = fail;
            if fail {
                self.failures -= 1;
                return Poll::Ready(Err(io::Error::new(self.kind, "injected")));
            }
            let n = buf.len().min(self.chunk);
            self.written.extend_from_slice(&buf[..n]);
            Poll::Ready(Ok(n))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn transient_errors_resume_from_the_first_unwritten_byte() {
        let mut out = FlakyWriter::alternating(io::ErrorKind::Interrupted, 4, 3);

        write_frame(&mut out, "(+ 1 2)\n").await.unwrap();

        assert_eq!(out.written, b"(+ 1 2)\n");
        assert_eq!(out.attempts, 6);
    }

    #[tokio::test]
    async fn persistent_transient_error_gives_up_after_bounded_attempts() {
        let mut out = FlakyWriter::failing(io::ErrorKind::WouldBlock);

        let err = write_frame(&mut out, "x\n").await.unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
        assert_eq!(out.attempts, WRITE_ATTEMPTS as usize);
    }

    #[tokio::test]
    async fn fatal_error_is_not_retried() {
        let mut out = FlakyWriter::failing(io::ErrorKind::BrokenPipe);

        let err = write_frame(&mut out, "(+ 1 2)\n").await.unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(out.attempts, 1);
        assert!(out.written.is_empty());
    }

    #[test]
    fn transient_kinds() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::WouldBlock)));
        assert!(is_transient(&io::Error::from(io::ErrorKind::TimedOut)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::ConnectionReset)));
    }

    #[tokio::test]
    async fn open_stream_reports_refused_connection() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = open_stream("dev", "127.0.0.1", port).await.unwrap_err();
        assert!(matches!(err, ReplError::Connect { ref tag, .. } if tag == "dev"));
    }
}

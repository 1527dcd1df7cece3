//! In-memory prepl connection whose outbound writes fail on demand.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};

use super::fake_prepl::{Step, serve_stream};

#[derive(Debug, Clone, Copy, Default)]
enum Fault {
    #[default]
    None,
    /// Every write fails with this kind.
    Always(io::ErrorKind),
    /// The next `n` writes fail with `Interrupted`.
    Interrupted(usize),
}

/// Controls the faults of a `FaultyStream` from the test body.
#[derive(Debug, Clone, Default)]
pub struct FaultSwitch(Arc<Mutex<Fault>>);

impl FaultSwitch {
    pub fn fail_writes(&self, kind: io::ErrorKind) {
        *self.0.lock().unwrap() = Fault::Always(kind);
    }

    pub fn interrupt_next_writes(&self, n: usize) {
        *self.0.lock().unwrap() = Fault::Interrupted(n);
    }

    /// The error the next write should fail with, if any.
    fn next_fault(&self) -> Option<io::ErrorKind> {
        let mut fault = self.0.lock().unwrap();
        match *fault {
            Fault::None => None,
            Fault::Always(kind) => Some(kind),
            Fault::Interrupted(0) => {
                *fault = Fault::None;
                None
            }
            Fault::Interrupted(n) => {
                *fault = Fault::Interrupted(n - 1);
                Some(io::ErrorKind::Interrupted)
            }
        }
    }
}

pub struct FaultyStream {
    inner: DuplexStream,
    switch: FaultSwitch,
}

/// Client end of a scripted prepl, plus the switch for its write faults.
pub fn faulty_prepl(
    respond: impl Fn(&str) -> Vec<Step> + Send + Sync + 'static,
) -> (FaultyStream, FaultSwitch) {
    let (client, server) = tokio::io::duplex(4096);
    serve_stream(server, respond);
    let switch = FaultSwitch::default();
    (
        FaultyStream {
            inner: client,
            switch: switch.clone(),
        },
        switch,
    )
}

impl AsyncRead for FaultyStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for FaultyStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if let Some(kind) = this.switch.next_fault() {
            return Poll::Ready(Err(io::Error::new(kind, "injected")));
        }
        Pin::new(&mut this.inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

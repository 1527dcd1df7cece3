//! Scripted prepl server on a loopback TCP port.
//!
//! Every received line is handed to a responder that returns the steps to
//! play back. Lines are handled one at a time per connection, like a real
//! prepl evaluating in order.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// One step of a scripted answer.
#[derive(Debug, Clone)]
pub enum Step {
    Frame(String),
    Pause(Duration),
    /// Close the connection without answering.
    HangUp,
}

/// `ret` frame carrying `edn` as its serialized value.
pub fn ret(edn: &str) -> Step {
    Step::Frame(format!("{{:tag :ret, :val \"{}\", :ns \"user\", :ms 1}}\n", escape(edn)))
}

pub fn exception(edn: &str) -> Step {
    Step::Frame(format!(
        "{{:tag :ret, :val \"{}\", :ns \"user\", :ms 1, :exception true}}\n",
        escape(edn)
    ))
}

pub fn out(text: &str) -> Step {
    Step::Frame(format!("{{:tag :out, :val \"{}\"}}\n", escape(text)))
}

pub fn err(text: &str) -> Step {
    Step::Frame(format!("{{:tag :err, :val \"{}\"}}\n", escape(text)))
}

pub fn tap(edn: &str) -> Step {
    Step::Frame(format!("{{:tag :tap, :val \"{}\"}}\n", escape(edn)))
}

pub fn pause(ms: u64) -> Step {
    Step::Pause(Duration::from_millis(ms))
}

/// Number of bracketed top-level forms on `line`, at least one. A prepl
/// answers each of them with its own `ret`.
pub fn top_level_forms(line: &str) -> usize {
    let mut depth = 0usize;
    let mut forms = 0;
    let mut in_string = false;
    let mut escaped = false;
    for c in line.chars() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    forms += 1;
                }
            }
            _ => {}
        }
    }
    forms.max(1)
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

type Responder = Arc<dyn Fn(&str) -> Vec<Step> + Send + Sync>;

#[derive(Debug, Clone, Copy, Default)]
pub struct Behavior {
    /// Never answer the connection prelude.
    pub skip_prelude: bool,
    /// Keep the connection open after `:repl/quit`.
    pub ignore_quit: bool,
}

pub struct FakePrepl {
    port: u16,
    received: Arc<Mutex<Vec<String>>>,
    hangup: CancellationToken,
    accept: JoinHandle<()>,
}

impl FakePrepl {
    pub async fn start(respond: impl Fn(&str) -> Vec<Step> + Send + Sync + 'static) -> Self {
        Self::start_with(Behavior::default(), respond).await
    }

    pub async fn start_with(
        behavior: Behavior,
        respond: impl Fn(&str) -> Vec<Step> + Send + Sync + 'static,
    ) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let received = Arc::new(Mutex::new(Vec::new()));
        let hangup = CancellationToken::new();
        let respond: Responder = Arc::new(respond);

        let accept = {
            let received = Arc::clone(&received);
            let hangup = hangup.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    tokio::spawn(serve(
                        stream,
                        behavior,
                        Arc::clone(&respond),
                        Arc::clone(&received),
                        hangup.clone(),
                    ));
                }
            })
        };

        Self {
            port,
            received,
            hangup,
            accept,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Lines received so far, excluding preludes and `:repl/quit`.
    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    /// Close every open connection.
    pub fn hang_up(&self) {
        self.hangup.cancel();
    }
}

impl Drop for FakePrepl {
    fn drop(&mut self) {
        self.accept.abort();
        self.hangup.cancel();
    }
}

fn is_prelude(line: &str) -> bool {
    line.starts_with("(require '")
}

/// Serve the scripted prepl over an in-memory stream instead of TCP.
pub fn serve_stream<S>(stream: S, respond: impl Fn(&str) -> Vec<Step> + Send + Sync + 'static)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    tokio::spawn(serve(
        stream,
        Behavior::default(),
        Arc::new(respond),
        Arc::new(Mutex::new(Vec::new())),
        CancellationToken::new(),
    ));
}

async fn serve<S>(
    stream: S,
    behavior: Behavior,
    respond: Responder,
    received: Arc<Mutex<Vec<String>>>,
    hangup: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read, mut write) = tokio::io::split(stream);
    let mut lines = BufReader::new(read).lines();
    loop {
        let line = tokio::select! {
            _ = hangup.cancelled() => return,
            line = lines.next_line() => match line {
                Ok(Some(line)) => line,
                _ => return,
            },
        };

        if line == ":repl/quit" {
            if behavior.ignore_quit {
                continue;
            }
            return;
        }

        let steps = if is_prelude(&line) {
            if behavior.skip_prelude {
                continue;
            }
            vec![ret("nil")]
        } else {
            received.lock().unwrap().push(line.clone());
            respond(&line)
        };

        for step in steps {
            match step {
                Step::Frame(frame) => {
                    if write.write_all(frame.as_bytes()).await.is_err() {
                        return;
                    }
                }
                Step::Pause(duration) => tokio::time::sleep(duration).await,
                Step::HangUp => return,
            }
        }
    }
}

/// A loopback port with nothing listening on it.
pub async fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

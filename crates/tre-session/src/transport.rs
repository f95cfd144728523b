//! Line sources for live sessions.
//!
//! A [`Connector`] opens one connection attempt to an [`Endpoint`]; the
//! resulting [`LineStream`] yields lines one at a time and reports `Idle`
//! at least once per read tick, which is what bounds how long the worker
//! takes to notice a stop request.

use std::collections::VecDeque;
use std::io::{ErrorKind, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::SessionError;

/// Longest partial line kept while waiting for its newline.
pub const MAX_PENDING_BYTES: usize = 64 * 1024;

const READ_CHUNK: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub timeout: Duration,
    pub attempts: u32,
    /// Delay before the second attempt; doubles for each further attempt.
    pub backoff_base: Duration,
    pub read_tick: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            attempts: 5,
            backoff_base: Duration::from_millis(500),
            read_tick: Duration::from_millis(200),
        }
    }
}

impl ConnectOptions {
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.backoff_base.saturating_mul(1u32 << shift)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Line(String),
    /// Nothing arrived within one read tick.
    Idle,
    Closed,
    Failed(String),
}

pub trait LineStream: Send {
    fn next_line(&mut self) -> ReadOutcome;
}

pub trait Connector: Send + Sync {
    fn connect(
        &self,
        endpoint: &Endpoint,
        options: &ConnectOptions,
    ) -> Result<Box<dyn LineStream>, SessionError>;
}

/// Plain TCP text stream, one log line per `\n`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn connect(
        &self,
        endpoint: &Endpoint,
        options: &ConnectOptions,
    ) -> Result<Box<dyn LineStream>, SessionError> {
        let fail = |message: String| SessionError::Connection {
            endpoint: endpoint.to_string(),
            message,
        };
        let addrs = (endpoint.host.as_str(), endpoint.port)
            .to_socket_addrs()
            .map_err(|err| fail(format!("resolve: {err}")))?;
        let mut last = String::from("no addresses resolved");
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, options.timeout) {
                Ok(stream) => {
                    stream
                        .set_read_timeout(Some(options.read_tick))
                        .map_err(|err| fail(format!("set read timeout: {err}")))?;
                    let _ = stream.set_nodelay(true);
                    return Ok(Box::new(TcpLineStream::new(stream)));
                }
                Err(err) => last = err.to_string(),
            }
        }
        Err(fail(last))
    }
}

pub struct TcpLineStream {
    stream: TcpStream,
    pending: Vec<u8>,
    ready: VecDeque<String>,
}

impl TcpLineStream {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            pending: Vec::new(),
            ready: VecDeque::new(),
        }
    }
}

impl LineStream for TcpLineStream {
    fn next_line(&mut self) -> ReadOutcome {
        if let Some(line) = self.ready.pop_front() {
            return ReadOutcome::Line(line);
        }
        let mut local = [0u8; READ_CHUNK];
        match self.stream.read(&mut local) {
            Ok(0) => {
                if self.pending.is_empty() {
                    return ReadOutcome::Closed;
                }
                let tail = std::mem::take(&mut self.pending);
                ReadOutcome::Line(
                    String::from_utf8_lossy(&tail)
                        .trim_end_matches('\r')
                        .to_string(),
                )
            }
            Ok(n) => {
                self.pending.extend_from_slice(&local[..n]);
                let (lines, rest) = split_lines(&self.pending);
                self.pending = cap_pending_bytes(rest);
                self.ready.extend(lines);
                match self.ready.pop_front() {
                    Some(line) => ReadOutcome::Line(line),
                    None => ReadOutcome::Idle,
                }
            }
            Err(err)
                if matches!(
                    err.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) =>
            {
                ReadOutcome::Idle
            }
            Err(err) => ReadOutcome::Failed(err.to_string()),
        }
    }
}

/// Splits complete lines off `buffer`, returning them with the unterminated
/// remainder.
pub fn split_lines(buffer: &[u8]) -> (Vec<String>, Vec<u8>) {
    if buffer.is_empty() {
        return (Vec::new(), Vec::new());
    }
    let mut lines = Vec::new();
    let mut start = 0usize;
    for (idx, &b) in buffer.iter().enumerate() {
        if b == b'\n' {
            let line = String::from_utf8_lossy(&buffer[start..idx])
                .trim_end_matches('\r')
                .to_string();
            lines.push(line);
            start = idx + 1;
        }
    }
    (lines, buffer[start..].to_vec())
}

pub fn cap_pending_bytes(mut pending: Vec<u8>) -> Vec<u8> {
    if pending.len() <= MAX_PENDING_BYTES {
        return pending;
    }
    let drain = pending.len() - MAX_PENDING_BYTES;
    pending.drain(0..drain);
    pending
}

/// In-process line source. Lines sent on the paired [`Sender`] are delivered
/// in order; dropping every sender closes the stream.
pub struct ChannelConnector {
    rx: Mutex<Option<Receiver<String>>>,
}

impl ChannelConnector {
    pub fn pair() -> (Self, Sender<String>) {
        let (tx, rx) = mpsc::channel();
        (
            Self {
                rx: Mutex::new(Some(rx)),
            },
            tx,
        )
    }
}

impl Connector for ChannelConnector {
    fn connect(
        &self,
        endpoint: &Endpoint,
        options: &ConnectOptions,
    ) -> Result<Box<dyn LineStream>, SessionError> {
        let taken = match self.rx.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match taken {
            Some(rx) => Ok(Box::new(ChannelLineStream {
                rx,
                tick: options.read_tick,
            })),
            None => Err(SessionError::Connection {
                endpoint: endpoint.to_string(),
                message: "channel already consumed".to_string(),
            }),
        }
    }
}

struct ChannelLineStream {
    rx: Receiver<String>,
    tick: Duration,
}

impl LineStream for ChannelLineStream {
    fn next_line(&mut self) -> ReadOutcome {
        match self.rx.recv_timeout(self.tick) {
            Ok(line) => ReadOutcome::Line(line),
            Err(RecvTimeoutError::Timeout) => ReadOutcome::Idle,
            Err(RecvTimeoutError::Disconnected) => ReadOutcome::Closed,
        }
    }
}

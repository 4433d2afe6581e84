//! Line-based request/response plumbing shared by the process and TCP clients.
//!
//! Incoming lines are read by a spawned task and forwarded over a channel with
//! their arrival time, so a slow strategy never stalls the reads of another and
//! the measured response time does not depend on the order slots are polled in.

use crate::client::ClientFault;
use crate::config::ExecutionLimits;
use futures::StreamExt;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use shared::{decode_line, encode_line, CommandReply, Intent, Message};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};

/// Longest line accepted from a strategy
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// A line read from a strategy together with the moment it arrived
#[derive(Debug)]
pub struct ReceivedLine {
    pub line: String,
    pub at: Instant,
}

/// Spawns a task forwarding every line of `reader` until EOF or error.
///
/// A line longer than `max_length` is reported once as an overflow and ends
/// the task.
pub fn spawn_line_reader<R>(
    reader: R,
    label: String,
    max_length: usize,
) -> (mpsc::UnboundedReceiver<Result<ReceivedLine, ClientFault>>, JoinHandle<()>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();

    let handle = tokio::spawn(async move {
        let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(max_length));
        loop {
            match lines.next().await {
                Some(Ok(line)) => {
                    let received = ReceivedLine {
                        line,
                        at: Instant::now(),
                    };
                    if tx.send(Ok(received)).is_err() {
                        break;
                    }
                }
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    warn!("{} sent a line longer than {} bytes", label, max_length);
                    let _ = tx.send(Err(ClientFault::Overflow { limit: max_length }));
                    break;
                }
                Some(Err(LinesCodecError::Io(e))) => {
                    warn!("Error reading from {}: {}", label, e);
                    break;
                }
                None => {
                    debug!("{} closed its output", label);
                    break;
                }
            }
        }
    });

    (rx, handle)
}

/// Append-only log of every line exchanged with one strategy
#[derive(Debug)]
pub struct Transcript {
    path: PathBuf,
    file: File,
}

impl Transcript {
    pub async fn open(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    async fn append(&mut self, marker: char, line: &str) -> std::io::Result<()> {
        let entry = format!("{} {}\n", marker, line.trim_end());
        self.file.write_all(entry.as_bytes()).await?;
        self.file.flush().await
    }
}

/// One request/response channel to an external strategy.
///
/// After the first fault the exchange goes quiet: the reader task is stopped,
/// nothing more is written and every later command is neutral.
pub struct LineExchange<W> {
    label: String,
    writer: W,
    lines: mpsc::UnboundedReceiver<Result<ReceivedLine, ClientFault>>,
    reader: JoinHandle<()>,
    limits: ExecutionLimits,
    transcript: Option<Transcript>,
    execution_time: Duration,
    sent_at: Option<Instant>,
    pending_fault: Option<ClientFault>,
    faulted: bool,
}

impl<W: AsyncWrite + Unpin> LineExchange<W> {
    pub fn new<R>(label: impl Into<String>, reader: R, writer: W, limits: ExecutionLimits) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let label = label.into();
        let (lines, reader) = spawn_line_reader(reader, label.clone(), MAX_LINE_BYTES);
        Self {
            label,
            writer,
            lines,
            reader,
            limits,
            transcript: None,
            execution_time: Duration::ZERO,
            sent_at: None,
            pending_fault: None,
            faulted: false,
        }
    }

    pub fn with_transcript(mut self, transcript: Option<Transcript>) -> Self {
        self.transcript = transcript;
        self
    }

    pub fn is_faulted(&self) -> bool {
        self.faulted
    }

    /// Total response time accumulated over the match
    pub fn execution_time(&self) -> Duration {
        self.execution_time
    }

    /// Starts a new match on the same connection: the response-time budget
    /// is spent from zero again. A benched exchange stays benched.
    pub fn reset_match(&mut self) {
        self.execution_time = Duration::ZERO;
        self.sent_at = None;
        self.pending_fault = None;
    }

    /// Reads the first line as a handshake value, bounded by `limit`
    pub async fn read_handshake<T: DeserializeOwned>(
        &mut self,
        limit: Duration,
    ) -> Result<T, ClientFault> {
        let received = self.next_line(Instant::now() + limit, limit).await?;
        self.record('<', &received.line).await;
        decode_line(&received.line).map_err(|e| ClientFault::Malformed(e.to_string()))
    }

    /// Sends a message that expects no reply
    pub async fn notify(&mut self, message: &Message) {
        self.write_message(message).await;
    }

    /// Sends a message and starts the response clock for the next command
    pub async fn request(&mut self, message: &Message) {
        if self.faulted {
            return;
        }

        while let Ok(stale) = self.lines.try_recv() {
            match stale {
                Ok(stale) => {
                    debug!("Dropping unsolicited line from {}: {}", self.label, stale.line);
                    self.record('<', &stale.line).await;
                }
                Err(fault) => {
                    self.pending_fault = Some(fault);
                    return;
                }
            }
        }

        self.write_message(message).await;
        self.sent_at = Some(Instant::now());
    }

    /// Reads the reply to the last request
    pub async fn receive_command(&mut self) -> Result<Intent, ClientFault> {
        if self.faulted {
            return Ok(Intent::Neutral);
        }
        if let Some(fault) = self.pending_fault.take() {
            return Err(self.fail(fault));
        }

        let sent_at = self.sent_at.take().unwrap_or_else(Instant::now);
        let deadline = sent_at + self.limits.request_timeout;
        let received = match self.next_line(deadline, self.limits.request_timeout).await {
            Ok(received) => received,
            Err(fault) => return Err(self.fail(fault)),
        };
        self.record('<', &received.line).await;

        self.execution_time += received.at.saturating_duration_since(sent_at);
        if let Some(budget) = self.limits.budget {
            if self.execution_time > budget {
                let fault = ClientFault::ExecutionLimit {
                    spent: self.execution_time,
                    budget,
                };
                return Err(self.fail(fault));
            }
        }

        decode_line::<CommandReply>(&received.line)
            .map(|reply| {
                if let Some(debug) = &reply.debug {
                    debug!("{}: {}", self.label, debug);
                }
                reply.intent()
            })
            .map_err(|e| ClientFault::Malformed(e.to_string()))
    }

    async fn next_line(
        &mut self,
        deadline: Instant,
        limit: Duration,
    ) -> Result<ReceivedLine, ClientFault> {
        match timeout_at(deadline, self.lines.recv()).await {
            Ok(Some(received)) => received,
            Ok(None) => Err(ClientFault::Disconnected),
            Err(_) => Err(ClientFault::Timeout(limit)),
        }
    }

    async fn write_message(&mut self, message: &Message) {
        if self.faulted || self.pending_fault.is_some() {
            return;
        }

        let line = match encode_line(message) {
            Ok(line) => line,
            Err(e) => {
                self.pending_fault = Some(ClientFault::Malformed(e.to_string()));
                return;
            }
        };

        // A strategy that stops reading fills the pipe; the write is bounded
        // like a reply
        let limit = self.limits.request_timeout;
        let writer = &mut self.writer;
        let written = timeout_at(Instant::now() + limit, async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        })
        .await;

        match written {
            Ok(Ok(())) => self.record('>', &line).await,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                self.pending_fault = Some(ClientFault::Disconnected);
            }
            Ok(Err(e)) => self.pending_fault = Some(ClientFault::Io(e)),
            Err(_) => {
                warn!("{} stopped reading its input", self.label);
                self.pending_fault = Some(ClientFault::Timeout(limit));
            }
        }
    }

    async fn record(&mut self, marker: char, line: &str) {
        if let Some(transcript) = self.transcript.as_mut() {
            if let Err(e) = transcript.append(marker, line).await {
                warn!(
                    "Failed to write transcript {} for {}: {}",
                    transcript.path.display(),
                    self.label,
                    e
                );
                self.transcript = None;
            }
        }
    }

    fn fail(&mut self, fault: ClientFault) -> ClientFault {
        self.faulted = true;
        self.reader.abort();
        self.lines.close();
        fault
    }
}

impl<W> Drop for LineExchange<W> {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared::{Hello, MessageKind};
    use tokio::io::{duplex, split, AsyncBufReadExt, AsyncWriteExt, BufReader};

    fn limits(request_ms: u64, budget_ms: Option<u64>) -> ExecutionLimits {
        ExecutionLimits {
            request_timeout: Duration::from_millis(request_ms),
            budget: budget_ms.map(Duration::from_millis),
        }
    }

    fn tick() -> Message {
        Message::new(MessageKind::Tick, json!({"tick_num": 1}))
    }

    #[tokio::test]
    async fn test_request_and_reply() {
        let (ours, theirs) = duplex(1024);
        let (our_read, our_write) = split(ours);
        let (their_read, mut their_write) = split(theirs);
        let mut exchange = LineExchange::new("test", our_read, our_write, limits(500, None));

        exchange.request(&tick()).await;

        let mut their_lines = BufReader::new(their_read).lines();
        let sent = their_lines.next_line().await.unwrap().unwrap();
        let message: Message = decode_line(&sent).unwrap();
        assert_eq!(message.kind, MessageKind::Tick);

        their_write
            .write_all(b"{\"command\": \"down\"}\n")
            .await
            .unwrap();
        assert_eq!(exchange.receive_command().await.unwrap(), Intent::Down);
        assert!(!exchange.is_faulted());
    }

    #[tokio::test]
    async fn test_malformed_reply_is_not_fatal() {
        let (ours, theirs) = duplex(1024);
        let (our_read, our_write) = split(ours);
        let (_their_read, mut their_write) = split(theirs);
        let mut exchange = LineExchange::new("test", our_read, our_write, limits(500, None));

        exchange.request(&tick()).await;
        their_write.write_all(b"garbage\n").await.unwrap();
        assert!(matches!(
            exchange.receive_command().await,
            Err(ClientFault::Malformed(_))
        ));

        exchange.request(&tick()).await;
        their_write
            .write_all(b"{\"command\": \"left\"}\n")
            .await
            .unwrap();
        assert_eq!(exchange.receive_command().await.unwrap(), Intent::Left);
    }

    #[tokio::test]
    async fn test_timeout_faults_the_exchange() {
        let (ours, theirs) = duplex(1024);
        let (our_read, our_write) = split(ours);
        let (_their_read, mut their_write) = split(theirs);
        let mut exchange = LineExchange::new("test", our_read, our_write, limits(50, None));

        exchange.request(&tick()).await;
        assert!(matches!(
            exchange.receive_command().await,
            Err(ClientFault::Timeout(_))
        ));
        assert!(exchange.is_faulted());

        // A late reply never resurrects the slot
        their_write
            .write_all(b"{\"command\": \"left\"}\n")
            .await
            .unwrap();
        exchange.request(&tick()).await;
        assert_eq!(exchange.receive_command().await.unwrap(), Intent::Neutral);
    }

    #[tokio::test]
    async fn test_disconnect_is_reported_once() {
        let (ours, theirs) = duplex(1024);
        let (our_read, our_write) = split(ours);
        drop(theirs);
        let mut exchange = LineExchange::new("test", our_read, our_write, limits(500, None));

        exchange.request(&tick()).await;
        assert!(exchange.receive_command().await.is_err());
        assert_eq!(exchange.receive_command().await.unwrap(), Intent::Neutral);
    }

    #[tokio::test]
    async fn test_execution_budget() {
        let (ours, theirs) = duplex(1024);
        let (our_read, our_write) = split(ours);
        let (_their_read, mut their_write) = split(theirs);
        let mut exchange = LineExchange::new("test", our_read, our_write, limits(1000, Some(30)));

        exchange.request(&tick()).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        their_write
            .write_all(b"{\"command\": \"up\"}\n")
            .await
            .unwrap();

        match exchange.receive_command().await {
            Err(ClientFault::ExecutionLimit { spent, budget }) => {
                assert!(spent > budget);
                assert_eq!(budget, Duration::from_millis(30));
            }
            other => panic!("expected execution limit fault, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stale_lines_are_dropped_before_request() {
        let (ours, theirs) = duplex(1024);
        let (our_read, our_write) = split(ours);
        let (_their_read, mut their_write) = split(theirs);
        let mut exchange = LineExchange::new("test", our_read, our_write, limits(500, None));

        their_write
            .write_all(b"{\"command\": \"left\"}\n")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        exchange.request(&tick()).await;
        their_write
            .write_all(b"{\"command\": \"right\"}\n")
            .await
            .unwrap();
        assert_eq!(exchange.receive_command().await.unwrap(), Intent::Right);
    }

    #[tokio::test]
    async fn test_write_to_a_full_pipe_times_out() {
        let (ours, theirs) = duplex(64);
        let (our_read, our_write) = split(ours);
        let (_their_read, _their_write) = split(theirs);
        let mut exchange = LineExchange::new("test", our_read, our_write, limits(100, None));

        let big = Message::new(MessageKind::Tick, json!({"padding": "x".repeat(4096)}));
        let started = Instant::now();
        exchange.request(&big).await;
        assert!(started.elapsed() < Duration::from_millis(500));

        assert!(matches!(
            exchange.receive_command().await,
            Err(ClientFault::Timeout(_))
        ));
        assert!(exchange.is_faulted());
    }

    #[tokio::test]
    async fn test_overlong_line_faults_the_exchange() {
        let (ours, theirs) = duplex(4 * MAX_LINE_BYTES);
        let (our_read, our_write) = split(ours);
        let (_their_read, mut their_write) = split(theirs);
        let mut exchange = LineExchange::new("test", our_read, our_write, limits(500, None));

        exchange.request(&tick()).await;
        their_write
            .write_all(&vec![b'x'; MAX_LINE_BYTES + 1])
            .await
            .unwrap();

        assert!(matches!(
            exchange.receive_command().await,
            Err(ClientFault::Overflow { limit: MAX_LINE_BYTES })
        ));
        assert!(exchange.is_faulted());
        assert!(exchange.lines.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_reset_match_restarts_the_budget() {
        let (ours, theirs) = duplex(1024);
        let (our_read, our_write) = split(ours);
        let (_their_read, mut their_write) = split(theirs);
        let mut exchange = LineExchange::new("test", our_read, our_write, limits(1000, Some(500)));

        exchange.request(&tick()).await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        their_write
            .write_all(b"{\"command\": \"up\"}\n")
            .await
            .unwrap();
        exchange.receive_command().await.unwrap();
        assert!(exchange.execution_time() >= Duration::from_millis(40));

        exchange.reset_match();
        assert_eq!(exchange.execution_time(), Duration::ZERO);
        assert!(!exchange.is_faulted());
    }

    #[tokio::test]
    async fn test_handshake_and_transcript() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transcript.log");

        let (ours, theirs) = duplex(1024);
        let (our_read, our_write) = split(ours);
        let (_their_read, mut their_write) = split(theirs);
        let transcript = Transcript::open(&path).await.unwrap();
        let mut exchange = LineExchange::new("test", our_read, our_write, limits(500, None))
            .with_transcript(Some(transcript));

        their_write
            .write_all(b"{\"solution_id\": \"abc\"}\n")
            .await
            .unwrap();
        let hello: Hello = exchange
            .read_handshake(Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(hello.solution_id, "abc");

        exchange.request(&tick()).await;
        their_write
            .write_all(b"{\"command\": \"up\"}\n")
            .await
            .unwrap();
        exchange.receive_command().await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("< "));
        assert!(lines[1].starts_with("> "));
        assert!(lines[2].contains("\"up\""));
    }
}

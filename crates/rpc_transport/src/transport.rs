use std::time::Duration;

use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    process::{ChildStderr, Command},
    sync::{mpsc, watch, Mutex},
    task::JoinHandle,
};
use tracing::{debug, warn};

use rpc_protocol::{encode_frame, FrameReassembler, DEFAULT_MAX_FRAME_BYTES};

use crate::error::TransportError;

/// The observed exit of a worker process, surfaced to `rpc_parent`'s crash
/// sweep as the `exitCode`/`signal` carried by `WorkerCrashedError`
/// (spec.md §6, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

#[cfg(unix)]
fn signal_of(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn signal_of(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

impl From<std::process::ExitStatus> for ExitInfo {
    fn from(status: std::process::ExitStatus) -> Self {
        ExitInfo {
            code: status.code(),
            signal: signal_of(&status),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Open,
    Closed(Option<ExitInfo>),
}

/// A duplex, length-prefixed frame channel to a sibling worker process
/// (spec.md §4.2). Agnostic to which side of the pipe it sits on: the
/// parent constructs one with [`Transport::spawn_child`], the worker with
/// [`Transport::from_stdio`].
///
/// Carries raw frame payloads, not [`rpc_protocol::Envelope`]s — encoding
/// and decoding belongs to the codec layer above this one.
pub struct Transport {
    writer: mpsc::UnboundedSender<Vec<u8>>,
    inbound: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    status: watch::Receiver<Status>,
    kill: Option<mpsc::UnboundedSender<()>>,
    pid: Option<u32>,
    _tasks: Vec<JoinHandle<()>>,
}

impl Transport {
    /// Spawns `command` with piped stdio and wires up writer/reader/exit
    /// tasks. Retries on `ExecutableFileBusy` with capped exponential
    /// backoff, the same spawn-retry shape used throughout the wider
    /// process-management code this crate was built from.
    pub async fn spawn_child(
        mut command: Command,
        max_frame_bytes: u32,
    ) -> Result<Self, TransportError> {
        command
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = spawn_with_retry(&mut command)?;
        let pid = child.id();

        let stdin = child
            .stdin
            .take()
            .ok_or(TransportError::MissingStdio("stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or(TransportError::MissingStdio("stdout"))?;
        let stderr = child.stderr.take();

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(Status::Open);
        let (kill_tx, kill_rx) = mpsc::unbounded_channel();

        let mut tasks = vec![
            tokio::spawn(writer_task(stdin, writer_rx)),
            tokio::spawn(reader_task(
                stdout,
                max_frame_bytes,
                inbound_tx,
                status_tx.clone(),
            )),
            tokio::spawn(exit_task(child, status_tx, kill_rx)),
        ];
        if let Some(stderr) = stderr {
            tasks.push(tokio::spawn(stderr_task(stderr)));
        }

        Ok(Self {
            writer: writer_tx,
            inbound: Mutex::new(inbound_rx),
            status: status_rx,
            kill: Some(kill_tx),
            pid,
            _tasks: tasks,
        })
    }

    /// Wraps the current process's own stdin/stdout as a transport. This is
    /// the worker side: a worker binary has no child of its own to track,
    /// so there is no exit task and [`Transport::kill`] is a no-op.
    pub fn from_stdio(max_frame_bytes: u32) -> Self {
        let stdin = tokio::io::stdin();
        let stdout = tokio::io::stdout();

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(Status::Open);

        let tasks = vec![
            tokio::spawn(writer_task(stdout, writer_rx)),
            tokio::spawn(reader_task(stdin, max_frame_bytes, inbound_tx, status_tx)),
        ];

        Self {
            writer: writer_tx,
            inbound: Mutex::new(inbound_rx),
            status: status_rx,
            kill: None,
            pid: None,
            _tasks: tasks,
        }
    }

    /// Writes one frame. Fails synchronously if the transport is already
    /// closed (spec.md §4.2: "Any write to a closed channel fails
    /// synchronously").
    pub fn write(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        self.writer.send(payload).map_err(|_| TransportError::Closed)
    }

    /// Awaits the next inbound frame payload. Resolves to `None` once the
    /// transport has closed and no further frames will arrive.
    pub async fn recv(&self) -> Option<Vec<u8>> {
        self.inbound.lock().await.recv().await
    }

    /// Resolves once the transport has closed, yielding the observed exit
    /// (`None` on the worker side, which has no child to observe).
    pub async fn closed(&self) -> Option<ExitInfo> {
        let mut status = self.status.clone();
        loop {
            if let Status::Closed(exit) = *status.borrow() {
                return exit;
            }
            if status.changed().await.is_err() {
                return None;
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(*self.status.borrow(), Status::Closed(_))
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Signals the worker process (`SIGKILL`-equivalent via
    /// `Child::start_kill`). No-op on the worker side.
    pub fn kill(&self) -> Result<(), TransportError> {
        match &self.kill {
            Some(tx) => tx.send(()).map_err(|_| TransportError::Closed),
            None => Ok(()),
        }
    }
}

fn spawn_with_retry(command: &mut Command) -> Result<tokio::process::Child, TransportError> {
    let mut backoff = Duration::from_millis(2);
    for attempt in 0..5 {
        match command.spawn() {
            Ok(child) => return Ok(child),
            Err(source) => {
                let is_busy = matches!(source.kind(), std::io::ErrorKind::ExecutableFileBusy)
                    || source.raw_os_error() == Some(26);
                if is_busy && attempt < 4 {
                    std::thread::sleep(backoff);
                    backoff = std::cmp::min(backoff * 2, Duration::from_millis(50));
                    continue;
                }
                return Err(TransportError::Spawn(source));
            }
        }
    }
    unreachable!("spawn_with_retry should return before exhausting retries")
}

async fn writer_task<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<Vec<u8>>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(payload) = rx.recv().await {
        let frame = encode_frame(&payload);
        if writer.write_all(&frame).await.is_err() {
            break;
        }
        if writer.flush().await.is_err() {
            break;
        }
    }
    let _ = writer.shutdown().await;
}

async fn reader_task<R>(
    mut reader: R,
    max_frame_bytes: u32,
    inbound_tx: mpsc::UnboundedSender<Vec<u8>>,
    status_tx: watch::Sender<Status>,
) where
    R: AsyncRead + Unpin,
{
    let mut reassembler = FrameReassembler::new(max_frame_bytes);
    let mut chunk = [0u8; 8192];
    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) => {
                warn!("transport read failed: {err}");
                break;
            }
        };
        reassembler.feed(&chunk[..n]);
        loop {
            match reassembler.try_take_frame() {
                Ok(Some(payload)) => {
                    if inbound_tx.send(payload).is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!("protocol violation, closing transport: {err}");
                    let _ = status_tx.send_if_modified(|s| {
                        if matches!(s, Status::Open) {
                            *s = Status::Closed(None);
                            true
                        } else {
                            false
                        }
                    });
                    return;
                }
            }
        }
    }
    let _ = status_tx.send_if_modified(|s| {
        if matches!(s, Status::Open) {
            *s = Status::Closed(None);
            true
        } else {
            false
        }
    });
}

async fn exit_task(
    mut child: tokio::process::Child,
    status_tx: watch::Sender<Status>,
    mut kill_rx: mpsc::UnboundedReceiver<()>,
) {
    loop {
        tokio::select! {
            status = child.wait() => {
                let exit = status.ok().map(ExitInfo::from);
                let _ = status_tx.send(Status::Closed(exit));
                return;
            }
            signal = kill_rx.recv() => {
                if signal.is_none() {
                    continue;
                }
                if let Err(err) = child.start_kill() {
                    warn!("failed to signal worker process: {err}");
                }
            }
        }
    }
}

/// Mirrors the teacher's `JsonRpcTransport::drop` (`codex/src/mcp/jsonrpc.rs`):
/// a dropped `Transport` that was never explicitly `$terminate`d must not
/// leak a detached worker process (spec.md §3 "synchronous ... disposal
/// hooks ... call `$terminate`"). `Drop::drop` cannot `.await` a graceful
/// shutdown, so this is the forceful half: signal the child via the same
/// unbounded channel `Transport::kill` uses (a non-blocking send, safe to
/// call from `drop`) and let `exit_task` perform the actual `start_kill`.
/// No-op on the worker side, which has no child to signal.
impl Drop for Transport {
    fn drop(&mut self) {
        if let Some(kill) = &self.kill {
            let _ = kill.send(());
        }
    }
}

async fn stderr_task(stderr: ChildStderr) {
    use tokio::io::{AsyncBufReadExt, BufReader};
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!("worker stderr: {line}");
    }
}

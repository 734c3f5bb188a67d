//! Shared fixtures for the integration tests.
//!
//! [`MockConnector`] stands in for the secure-shell collaborator. Its
//! handshake is a plain banner exchange over the transport, and every shell
//! session it opens is backed by in-memory duplex pipes whose far ends the
//! test can drive through [`MockStats::take_remote`].

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bridge::{HostCallbacks, Observers, SessionHandle, ShellBridge};
use bytes::Bytes;
use protocol::{
    BoxFuture, BoxedTransport, ConnectionOptions, HandshakeParams, PacketKind, PacketMetadata,
    ProtocolError, PtyRequest, SecureConnection, SecureShellConnector, SessionState, ShellPipes,
    ShellSession,
};
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

pub const CLIENT_BANNER: &[u8] = b"SSH-2.0-ShellBridge_Test\r\n";
pub const SERVER_BANNER: &[u8] = b"SSH-2.0-MockServer_1.0\r\n";

const PIPE_CAPACITY: usize = 64 * 1024;

/// Far ends of one mock shell's pipes.
pub struct RemoteShell {
    pub stdin: DuplexStream,
    pub stdout: DuplexStream,
    pub stderr: DuplexStream,
}

/// Counters and captured arguments shared by everything a connector creates.
#[derive(Default)]
pub struct MockStats {
    pub handshakes: AtomicUsize,
    pub sessions_opened: AtomicUsize,
    pub pty_requests: AtomicUsize,
    pub shells_started: AtomicUsize,
    pub sessions_closed: AtomicUsize,
    pub connections_closed: AtomicUsize,
    pub last_params: Mutex<Option<HandshakeParams>>,
    pub last_pty: Mutex<Option<PtyRequest>>,
    pub window_changes: Mutex<Vec<(u32, u32)>>,
    remotes: Mutex<Vec<RemoteShell>>,
}

impl MockStats {
    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    /// Takes the far ends of the oldest shell not yet taken.
    pub fn take_remote(&self) -> Option<RemoteShell> {
        let mut remotes = self.remotes.lock().unwrap();
        if remotes.is_empty() {
            None
        } else {
            Some(remotes.remove(0))
        }
    }
}

/// Collaborator whose handshake is a banner exchange.
pub struct MockConnector {
    pub stats: Arc<MockStats>,
    fail_with: Option<String>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            stats: Arc::new(MockStats::default()),
            fail_with: None,
        }
    }

    /// A connector whose handshake always fails with `reason`.
    pub fn failing(reason: &str) -> Self {
        Self {
            stats: Arc::new(MockStats::default()),
            fail_with: Some(reason.to_string()),
        }
    }
}

impl SecureShellConnector for MockConnector {
    fn handshake(
        &self,
        mut transport: BoxedTransport,
        params: HandshakeParams,
    ) -> BoxFuture<'_, protocol::Result<Box<dyn SecureConnection>>> {
        Box::pin(async move {
            self.stats.handshakes.fetch_add(1, Ordering::SeqCst);
            *self.stats.last_params.lock().unwrap() = Some(params.clone());

            if let Some(reason) = &self.fail_with {
                return Err(ProtocolError::HandshakeFailed(reason.clone()));
            }

            transport.write_all(CLIENT_BANNER).await?;

            let exchange = read_line(&mut transport);
            let line = match params.timeout {
                Some(limit) => tokio::time::timeout(limit, exchange)
                    .await
                    .map_err(|_| ProtocolError::HandshakeFailed("timed out".to_string()))??,
                None => exchange.await?,
            };
            if !line.starts_with(b"SSH-2.0-") {
                return Err(ProtocolError::HandshakeFailed(
                    "unexpected server banner".to_string(),
                ));
            }

            Ok(Box::new(MockConnection {
                stats: Arc::clone(&self.stats),
                transport: tokio::sync::Mutex::new(Some(transport)),
            }) as Box<dyn SecureConnection>)
        })
    }
}

async fn read_line(transport: &mut BoxedTransport) -> protocol::Result<Vec<u8>> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        if transport.read(&mut byte).await? == 0 {
            return Err(ProtocolError::ConnectionClosed(
                "end of stream during banner exchange".to_string(),
            ));
        }
        line.push(byte[0]);
        if byte[0] == b'\n' {
            return Ok(line);
        }
    }
}

struct MockConnection {
    stats: Arc<MockStats>,
    transport: tokio::sync::Mutex<Option<BoxedTransport>>,
}

impl SecureConnection for MockConnection {
    fn open_session(&self) -> BoxFuture<'_, protocol::Result<Box<dyn ShellSession>>> {
        Box::pin(async move {
            self.stats.sessions_opened.fetch_add(1, Ordering::SeqCst);

            let (stdin, remote_stdin) = duplex(PIPE_CAPACITY);
            let (stdout, remote_stdout) = duplex(PIPE_CAPACITY);
            let (stderr, remote_stderr) = duplex(PIPE_CAPACITY);
            self.stats.remotes.lock().unwrap().push(RemoteShell {
                stdin: remote_stdin,
                stdout: remote_stdout,
                stderr: remote_stderr,
            });

            Ok(Box::new(MockShell {
                stats: Arc::clone(&self.stats),
                pipes: Mutex::new(Some(ShellPipes {
                    stdin: Box::new(stdin),
                    stdout: Box::new(stdout),
                    stderr: Box::new(stderr),
                })),
            }) as Box<dyn ShellSession>)
        })
    }

    fn close(&self) -> BoxFuture<'_, protocol::Result<()>> {
        Box::pin(async move {
            self.stats.connections_closed.fetch_add(1, Ordering::SeqCst);
            if let Some(mut transport) = self.transport.lock().await.take() {
                transport.shutdown().await?;
            }
            Ok(())
        })
    }
}

struct MockShell {
    stats: Arc<MockStats>,
    pipes: Mutex<Option<ShellPipes>>,
}

impl ShellSession for MockShell {
    fn take_pipes(&mut self) -> protocol::Result<ShellPipes> {
        self.pipes
            .get_mut()
            .unwrap()
            .take()
            .ok_or(ProtocolError::PipesTaken)
    }

    fn request_pty<'a>(&'a self, request: &'a PtyRequest) -> BoxFuture<'a, protocol::Result<()>> {
        Box::pin(async move {
            // Widens the window for racing first sends
            tokio::task::yield_now().await;
            self.stats.pty_requests.fetch_add(1, Ordering::SeqCst);
            *self.stats.last_pty.lock().unwrap() = Some(request.clone());
            Ok(())
        })
    }

    fn start_shell(&self) -> BoxFuture<'_, protocol::Result<()>> {
        Box::pin(async move {
            self.stats.shells_started.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn window_change(&self, rows: u32, cols: u32) -> BoxFuture<'_, protocol::Result<()>> {
        Box::pin(async move {
            self.stats.window_changes.lock().unwrap().push((rows, cols));
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, protocol::Result<()>> {
        Box::pin(async move {
            self.stats.sessions_closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

/// Records what a transport hands to its host.
#[derive(Clone, Default)]
pub struct HostRecorder {
    pub written: Arc<Mutex<Vec<u8>>>,
    pub writes: Arc<AtomicUsize>,
    pub closes: Arc<AtomicUsize>,
}

impl HostRecorder {
    pub fn callbacks(&self) -> HostCallbacks {
        let written = Arc::clone(&self.written);
        let writes = Arc::clone(&self.writes);
        let closes = Arc::clone(&self.closes);
        HostCallbacks::new()
            .on_write(move |data| {
                written.lock().unwrap().extend_from_slice(data);
                writes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .on_close(move || {
                closes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
    }

    pub fn written(&self) -> Vec<u8> {
        self.written.lock().unwrap().clone()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// Packet and state notifications seen by one session.
#[derive(Clone, Default)]
pub struct Recorded {
    pub states: Arc<Mutex<Vec<SessionState>>>,
    pub received: Arc<Mutex<Vec<(Bytes, PacketMetadata)>>>,
    pub sent: Arc<Mutex<Vec<(Bytes, PacketMetadata)>>>,
}

impl Recorded {
    pub fn observers(&self) -> Observers {
        let states = Arc::clone(&self.states);
        let received = Arc::clone(&self.received);
        let sent = Arc::clone(&self.sent);
        Observers::new()
            .on_state_change(move |state| states.lock().unwrap().push(state))
            .on_packet_receive(move |data, meta| received.lock().unwrap().push((data, meta)))
            .on_packet_send(move |data, meta| sent.lock().unwrap().push((data, meta)))
    }

    pub fn states(&self) -> Vec<SessionState> {
        self.states.lock().unwrap().clone()
    }

    /// Concatenated shell output, leaving out raw transport traffic.
    pub fn shell_output(&self) -> Vec<u8> {
        shell_bytes(&self.received.lock().unwrap())
    }

    /// Concatenated shell input, leaving out raw transport traffic.
    pub fn shell_input(&self) -> Vec<u8> {
        shell_bytes(&self.sent.lock().unwrap())
    }

    /// Concatenated raw transport bytes written by the engine.
    pub fn transport_sent(&self) -> Vec<u8> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, meta)| meta.kind.is_none())
            .flat_map(|(data, _)| data.to_vec())
            .collect()
    }
}

fn shell_bytes(packets: &[(Bytes, PacketMetadata)]) -> Vec<u8> {
    packets
        .iter()
        .filter(|(_, meta)| meta.kind == Some(PacketKind::Data))
        .flat_map(|(data, _)| data.to_vec())
        .collect()
}

pub fn options() -> ConnectionOptions {
    ConnectionOptions::new("shell.example.com", 22, "deploy").password("hunter2")
}

/// Creates a transport, preloads the server banner and connects over it.
pub async fn connect_session(
    bridge: &ShellBridge,
    transport_id: &str,
    host: &HostRecorder,
    observers: Observers,
) -> bridge::Result<SessionHandle> {
    bridge.create_transport(transport_id, host.callbacks())?;
    bridge.inject_transport_data(transport_id, SERVER_BANNER)?;
    bridge.connect(options(), transport_id, observers).await
}

/// Polls `condition` until it holds or a second has passed.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    condition()
}

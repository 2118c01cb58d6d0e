//! Notification bus between controllers and the worker
//!
//! Fire-and-forget and best effort: a message with no subscriber, or one that
//! cannot be encoded or written, is logged and dropped. There is no replay and
//! callers must not rely on delivery order.
//!
//! Socket writes happen on one writer thread per connection behind a bounded
//! queue, so publishing never waits on a slow reader. When a peer's queue is
//! full the message is dropped for that peer only.
//!
//! Endpoints:
//! - [`LocalBus`]: both sides in one process
//! - [`BusServer`] / [`BusClient`]: worker and controllers in separate
//!   processes, using length-prefixed JSON over a Unix domain socket

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::io::{Read, Write};
use std::net::Shutdown;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, error, info, warn};

mod dispatch;
mod local;
mod messages;

pub use dispatch::{Dispatcher, Handler, Subscription};
pub use local::LocalBus;
pub use messages::{Action, Envelope, Message, MessageError, Payload};

use crate::constants::bus::{MAX_MESSAGE_SIZE, PEER_QUEUE_DEPTH, PEER_WRITE_TIMEOUT_MS};

pub trait Bus: Send + Sync {
    /// Deliver to every subscriber of the envelope's action, local and remote
    fn publish(&self, envelope: Envelope);

    fn subscribe(&self, action: Action, handler: Handler) -> Subscription;

    fn send(&self, message: Message) {
        self.publish(message.into_envelope());
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Serialize into a length-prefixed frame (u32 little-endian length + JSON)
fn encode_frame<T: Serialize>(msg: &T) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(msg).context("Failed to serialize message to JSON")?;
    if json.len() > MAX_MESSAGE_SIZE {
        return Err(anyhow!("Message too large: {} bytes (max: {})", json.len(), MAX_MESSAGE_SIZE));
    }

    let mut frame = Vec::with_capacity(4 + json.len());
    frame.extend_from_slice(&(json.len() as u32).to_le_bytes());
    frame.extend_from_slice(&json);
    Ok(frame)
}

/// Write length-prefixed message to stream
pub fn write_message<W: Write, T: Serialize>(writer: &mut W, msg: &T) -> Result<()> {
    let frame = encode_frame(msg)?;
    writer.write_all(&frame).context("Failed to write message frame")?;
    writer.flush().context("Failed to flush stream")?;
    Ok(())
}

/// Read one length-prefixed frame body
fn read_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .context("Failed to read message length")?;
    let len = u32::from_le_bytes(len_buf) as usize;

    // Sanity check (prevent DoS via huge allocation)
    if len > MAX_MESSAGE_SIZE {
        return Err(anyhow!("Message too large: {} bytes (max: {})", len, MAX_MESSAGE_SIZE));
    }

    let mut buf = vec![0u8; len];
    reader
        .read_exact(&mut buf)
        .context("Failed to read message payload")?;
    Ok(buf)
}

/// Read length-prefixed message from stream
pub fn read_message<R: Read, T: for<'de> serde::Deserialize<'de>>(reader: &mut R) -> Result<T> {
    let buf = read_frame(reader)?;
    serde_json::from_slice(&buf).context("Failed to deserialize message from JSON")
}

/// Feed every frame from `stream` into `dispatcher` until the peer goes away
///
/// A frame that isn't a valid envelope is skipped; the stream stays usable.
fn pump(mut stream: UnixStream, dispatcher: &Dispatcher, peer: &str) {
    loop {
        let frame = match read_frame(&mut stream) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(peer, error = %e, "Bus connection closed");
                return;
            }
        };
        match serde_json::from_slice::<Envelope>(&frame) {
            Ok(envelope) => {
                dispatcher.dispatch(envelope);
            }
            Err(e) => warn!(peer, error = %e, "Dropping malformed bus frame"),
        }
    }
}

type Frame = Arc<Vec<u8>>;

/// Start the writer thread for `stream` and return its queue
///
/// The thread exits when every sender is gone. A write that fails or times
/// out shuts the connection down, which also ends the peer's reader.
fn spawn_writer(mut stream: UnixStream, peer: String) -> SyncSender<Frame> {
    let (tx, rx) = mpsc::sync_channel::<Frame>(PEER_QUEUE_DEPTH);
    std::thread::spawn(move || {
        let timeout = Duration::from_millis(PEER_WRITE_TIMEOUT_MS);
        if let Err(e) = stream.set_write_timeout(Some(timeout)) {
            warn!(peer = %peer, error = %e, "Failed to set bus write timeout");
        }
        for frame in rx {
            if let Err(e) = stream.write_all(&frame) {
                warn!(peer = %peer, error = %e, "Bus peer stopped accepting writes, closing");
                let _ = stream.shutdown(Shutdown::Both);
                break;
            }
        }
        debug!(peer = %peer, "Bus writer stopped");
    });
    tx
}

/// Hand a frame to a writer without blocking; `false` once the writer is gone
fn enqueue(outbox: &SyncSender<Frame>, frame: &Frame, peer: &str, kind: i32) -> bool {
    match outbox.try_send(Arc::clone(frame)) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!(peer, kind, "Bus peer queue full, dropping message");
            true
        }
        Err(TrySendError::Disconnected(_)) => false,
    }
}

struct Peer {
    id: u64,
    outbox: SyncSender<Frame>,
    stream: UnixStream,
}

/// Worker-side endpoint: owns the socket and fans messages out to every
/// connected controller
pub struct BusServer {
    socket_path: PathBuf,
    dispatcher: Dispatcher,
    peers: Arc<Mutex<Vec<Peer>>>,
    shutdown: Arc<AtomicBool>,
}

impl BusServer {
    /// Create server and bind to specific socket path
    pub fn bind_to(socket_path: PathBuf) -> Result<Self> {
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)
                .context(format!("Failed to create socket directory: {}", parent.display()))?;
        }

        // Remove stale socket if exists
        if socket_path.exists() {
            std::fs::remove_file(&socket_path)
                .context(format!("Failed to remove stale socket: {}", socket_path.display()))?;
        }

        let listener = UnixListener::bind(&socket_path)
            .context(format!("Failed to bind socket at {}", socket_path.display()))?;

        // Owner only
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o700))
                .context("Failed to set socket permissions")?;
        }

        let server = Self {
            socket_path,
            dispatcher: Dispatcher::new(),
            peers: Arc::new(Mutex::new(Vec::new())),
            shutdown: Arc::new(AtomicBool::new(false)),
        };

        let dispatcher = server.dispatcher.clone();
        let peers = server.peers.clone();
        let shutdown = server.shutdown.clone();
        std::thread::spawn(move || accept_loop(listener, dispatcher, peers, shutdown));

        info!(socket = %server.socket_path.display(), "Bus server listening");
        Ok(server)
    }

    pub fn path(&self) -> &Path {
        &self.socket_path
    }

    pub fn peer_count(&self) -> usize {
        lock(&self.peers).len()
    }

    fn broadcast(&self, envelope: &Envelope) {
        let frame: Frame = match encode_frame(envelope) {
            Ok(frame) => Arc::new(frame),
            Err(e) => {
                warn!(kind = envelope.kind, error = ?e, "Dropping unencodable bus message");
                return;
            }
        };

        lock(&self.peers).retain(|peer| {
            let name = format!("controller-{}", peer.id);
            let alive = enqueue(&peer.outbox, &frame, &name, envelope.kind);
            if !alive {
                warn!(peer = peer.id, "Dropping unreachable controller");
            }
            alive
        });
    }
}

fn accept_loop(
    listener: UnixListener,
    dispatcher: Dispatcher,
    peers: Arc<Mutex<Vec<Peer>>>,
    shutdown: Arc<AtomicBool>,
) {
    let mut next_id = 0u64;
    for stream in listener.incoming() {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                error!(error = %e, "Failed to accept bus connection");
                continue;
            }
        };
        let (writer, control) = match stream.try_clone().and_then(|w| Ok((w, stream.try_clone()?))) {
            Ok(pair) => pair,
            Err(e) => {
                error!(error = %e, "Failed to clone bus connection");
                continue;
            }
        };

        next_id += 1;
        let id = next_id;
        let outbox = spawn_writer(writer, format!("controller-{id}"));
        lock(&peers).push(Peer {
            id,
            outbox,
            stream: control,
        });
        info!(peer = id, "Controller connected");

        let dispatcher = dispatcher.clone();
        let peers = peers.clone();
        std::thread::spawn(move || {
            pump(stream, &dispatcher, &format!("controller-{id}"));
            lock(&peers).retain(|peer| peer.id != id);
            info!(peer = id, "Controller disconnected");
        });
    }
    debug!("Bus accept loop stopped");
}

impl Bus for BusServer {
    fn publish(&self, envelope: Envelope) {
        self.broadcast(&envelope);
        self.dispatcher.dispatch(envelope);
    }

    fn subscribe(&self, action: Action, handler: Handler) -> Subscription {
        self.dispatcher.subscribe(action, handler)
    }
}

impl Drop for BusServer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for peer in lock(&self.peers).drain(..) {
            let _ = peer.stream.shutdown(Shutdown::Both);
        }
        // Wake the accept loop so it sees the flag
        let _ = UnixStream::connect(&self.socket_path);
        let _ = std::fs::remove_file(&self.socket_path);
        debug!(socket = %self.socket_path.display(), "Bus server closed");
    }
}

/// Controller-side endpoint connected to a [`BusServer`]
pub struct BusClient {
    stream: UnixStream,
    outbox: SyncSender<Frame>,
    dispatcher: Dispatcher,
}

impl BusClient {
    /// Connect to specific socket path
    pub fn connect_to(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path)
            .context(format!("Failed to connect to worker at {}", path.display()))?;
        let reader = stream
            .try_clone()
            .context("Failed to clone bus connection")?;
        let writer = stream
            .try_clone()
            .context("Failed to clone bus connection")?;

        let dispatcher = Dispatcher::new();
        let inbound = dispatcher.clone();
        std::thread::spawn(move || pump(reader, &inbound, "worker"));
        let outbox = spawn_writer(writer, "worker".to_string());

        info!(socket = %path.display(), "Connected to worker bus");
        Ok(Self {
            stream,
            outbox,
            dispatcher,
        })
    }
}

impl Bus for BusClient {
    fn publish(&self, envelope: Envelope) {
        match encode_frame(&envelope) {
            Ok(frame) => {
                if !enqueue(&self.outbox, &Arc::new(frame), "worker", envelope.kind) {
                    warn!(kind = envelope.kind, "Worker connection closed, dropping message");
                }
            }
            Err(e) => warn!(kind = envelope.kind, error = ?e, "Dropping unencodable bus message"),
        }
        self.dispatcher.dispatch(envelope);
    }

    fn subscribe(&self, action: Action, handler: Handler) -> Subscription {
        self.dispatcher.subscribe(action, handler)
    }
}

impl Drop for BusClient {
    fn drop(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

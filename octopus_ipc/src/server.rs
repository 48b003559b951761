//! IPC server: accept loop, per-client dispatch, and fan-out on model
//! change (spec.md §4.9).
//!
//! Grounded in `examples/original_source/src/IPC/octopus_ipc_socket.hpp`'s
//! `Socket` class (UDS bind/listen/accept, `ClientInfo{fd, ip, flag}`) and
//! `octopus_ipc_server.cpp`'s directory-create / stale-socket-unlink /
//! dispatch-by-group shape. The server never depends on `octopus_carinfo`
//! directly — it is handed a [`SnapshotSource`] implementation by whatever
//! wires the process together, the same ownership-inversion pattern
//! `octopus_ptl::ModuleRegistry` uses to stay decoupled from
//! `octopus_carinfo` (spec.md §9 "Cyclic relationships").

use octopus_common::consts::{car_msg, group, set_msg, CALLBACK_FAILURE_THRESHOLD};
use octopus_common::prelude::OctopusResult;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::message::{IpcMessage, MessageDecoder};

/// How long a per-client reader blocks on a socket read before checking the
/// shutdown flag again (spec.md §4.9 "short-poll wait").
const CLIENT_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Bytes fed into the HELP status reply payload.
const HELP_STATUS_OK: u8 = 0;

/// Supplies the byte-for-byte record payloads the server needs to answer
/// `CAR` snapshot requests and fan-out notifications, without the server
/// depending on the vehicle data model crate.
pub trait SnapshotSource: Send + Sync {
    fn indicator_bytes(&self) -> Vec<u8>;
    fn meter_bytes(&self) -> Vec<u8>;
    fn drivetrain_bytes(&self) -> Vec<u8>;
}

fn snapshot_for(source: &dyn SnapshotSource, msg_id: u8) -> Option<Vec<u8>> {
    match msg_id {
        car_msg::INDICATOR => Some(source.indicator_bytes()),
        car_msg::METER => Some(source.meter_bytes()),
        car_msg::DRIVETRAIN => Some(source.drivetrain_bytes()),
        _ => None,
    }
}

struct ClientHandle {
    stream: UnixStream,
    remote_id: String,
    subscribed: bool,
    push_interval_cs: u32,
    verbose: bool,
}

/// Unix-domain-socket IPC server (spec.md §4.9, §6 "IPC socket").
pub struct IpcServer {
    listener: UnixListener,
    clients: Arc<Mutex<HashMap<RawFd, ClientHandle>>>,
    source: Arc<dyn SnapshotSource>,
    stop: Arc<AtomicBool>,
    default_push_interval_cs: u32,
}

impl IpcServer {
    /// Bind at `socket_path`, creating the parent directory and removing
    /// any stale socket file first (spec.md §4.9/§6).
    pub fn bind(
        socket_path: &str,
        source: Arc<dyn SnapshotSource>,
        default_push_interval_cs: u32,
    ) -> OctopusResult<Self> {
        let path = Path::new(socket_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
            set_permissive(parent)?;
        }
        if path.exists() {
            std::fs::remove_file(path)?;
        }

        let listener = UnixListener::bind(path)?;
        set_permissive(path)?;

        info!(socket_path, "IPC server listening");
        Ok(Self {
            listener,
            clients: Arc::new(Mutex::new(HashMap::new())),
            source,
            stop: Arc::new(AtomicBool::new(false)),
            default_push_interval_cs,
        })
    }

    /// Shutdown flag shared with the accept loop and every client thread.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Run the accept loop on the calling thread until stopped. Each
    /// accepted connection gets its own dedicated reader thread.
    pub fn run(&self) {
        let _ = self.listener.set_nonblocking(true);
        while !self.stop.load(Ordering::Acquire) {
            match self.listener.accept() {
                Ok((stream, _addr)) => self.spawn_client(stream),
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(100));
                }
                Err(e) => {
                    warn!(error = %e, "IPC accept failed");
                    thread::sleep(Duration::from_millis(100));
                }
            }
        }
        self.disconnect_all();
    }

    fn spawn_client(&self, stream: UnixStream) {
        let _ = stream.set_read_timeout(Some(CLIENT_READ_TIMEOUT));
        let fd = stream.as_raw_fd();
        let handle = ClientHandle {
            stream: stream.try_clone().expect("dup client stream fd"),
            remote_id: String::new(),
            subscribed: false,
            push_interval_cs: self.default_push_interval_cs,
            verbose: false,
        };
        self.clients.lock().insert(fd, handle);
        debug!(fd, "IPC client connected");

        let clients = Arc::clone(&self.clients);
        let source = Arc::clone(&self.source);
        let stop = Arc::clone(&self.stop);
        thread::spawn(move || client_loop(stream, fd, clients, source, stop));
    }

    fn disconnect_all(&self) {
        let mut clients = self.clients.lock();
        for (_, client) in clients.drain() {
            let _ = client.stream.shutdown(std::net::Shutdown::Both);
        }
        info!("IPC server stopped, all clients disconnected");
    }

    /// Fan out `msg_id`'s current snapshot to every subscribed client
    /// (spec.md §4.7/§4.9 "on any model mutation... fan out").
    pub fn notify_model_changed(&self, group_id: u8, msg_id: u8) {
        let Some(payload) = snapshot_for(self.source.as_ref(), msg_id) else {
            return;
        };
        let frame = IpcMessage::new(group_id, msg_id, payload).serialize();

        let mut stale = Vec::new();
        {
            let mut clients = self.clients.lock();
            for (fd, client) in clients.iter_mut() {
                if !client.subscribed {
                    continue;
                }
                if write_with_retry(&mut client.stream, &frame).is_err() {
                    stale.push(*fd);
                }
            }
        }
        if !stale.is_empty() {
            let mut clients = self.clients.lock();
            for fd in stale {
                clients.remove(&fd);
                debug!(fd, "IPC client removed after write failure");
            }
        }
    }

    /// Number of currently connected clients.
    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }
}

fn set_permissive(path: &Path) -> OctopusResult<()> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(0o777);
    std::fs::set_permissions(path, perms)?;
    Ok(())
}

/// Write `bytes`, retrying immediately on `EINTR` and briefly on `EAGAIN`
/// up to a small bound (spec.md §4.9 "Fan-out").
fn write_with_retry(stream: &mut UnixStream, bytes: &[u8]) -> std::io::Result<()> {
    let mut attempts = 0;
    loop {
        match stream.write_all(bytes) {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == ErrorKind::WouldBlock && attempts < 5 => {
                attempts += 1;
                thread::sleep(Duration::from_millis(20));
            }
            Err(e) => return Err(e),
        }
    }
}

fn client_loop(
    mut stream: UnixStream,
    fd: RawFd,
    clients: Arc<Mutex<HashMap<RawFd, ClientHandle>>>,
    source: Arc<dyn SnapshotSource>,
    stop: Arc<AtomicBool>,
) {
    let mut decoder = MessageDecoder::new();
    let mut buf = [0u8; 512];

    while !stop.load(Ordering::Acquire) {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                for msg in decoder.feed(&buf[..n]) {
                    handle_message(&mut stream, fd, &msg, &clients, source.as_ref());
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                continue;
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }

    clients.lock().remove(&fd);
    debug!(fd, "IPC client disconnected");
}

fn handle_message(
    stream: &mut UnixStream,
    fd: RawFd,
    msg: &IpcMessage,
    clients: &Arc<Mutex<HashMap<RawFd, ClientHandle>>>,
    source: &dyn SnapshotSource,
) {
    match msg.group {
        group::SET => handle_set(fd, msg, clients, stream),
        group::CAR => handle_car(stream, msg, source),
        group::HELP => handle_help(stream, msg, fd, clients),
        _ => handle_help(stream, msg, fd, clients),
    }
}

fn handle_help(
    stream: &mut UnixStream,
    msg: &IpcMessage,
    fd: RawFd,
    clients: &Arc<Mutex<HashMap<RawFd, ClientHandle>>>,
) {
    let verbose_requested = msg.data.first().copied().unwrap_or(0) != 0;
    if let Some(client) = clients.lock().get_mut(&fd) {
        client.verbose = verbose_requested;
    }
    let reply = IpcMessage::new(group::HELP, 0, vec![HELP_STATUS_OK]).serialize();
    let _ = write_with_retry(stream, &reply);
}

fn handle_car(stream: &mut UnixStream, msg: &IpcMessage, source: &dyn SnapshotSource) {
    let Some(payload) = snapshot_for(source, msg.msg_id) else {
        debug!(msg_id = msg.msg_id, "CAR request for unknown msg id");
        return;
    };
    let reply = IpcMessage::new(group::CAR, msg.msg_id, payload).serialize();
    let _ = write_with_retry(stream, &reply);
}

fn handle_set(
    fd: RawFd,
    msg: &IpcMessage,
    clients: &Arc<Mutex<HashMap<RawFd, ClientHandle>>>,
    stream: &mut UnixStream,
) {
    let mut clients = clients.lock();
    let Some(client) = clients.get_mut(&fd) else {
        return;
    };

    match msg.msg_id {
        set_msg::SUBSCRIBE => {
            // Payload is `{fd_selector, on/off, [push_interval_cs]}` (spec.md
            // §6 SET/50); byte 0 selects the target fd, byte 1 is the toggle.
            client.subscribed = msg.data.get(1).copied().unwrap_or(0) != 0;
            if msg.data.len() >= 4 {
                client.push_interval_cs = u16::from_be_bytes([msg.data[2], msg.data[3]]) as u32;
            }
        }
        set_msg::PUSH_INTERVAL => {
            if msg.data.len() >= 2 {
                client.push_interval_cs = u16::from_be_bytes([msg.data[0], msg.data[1]]) as u32;
            }
        }
        set_msg::REMOTE_ID => {
            client.remote_id = String::from_utf8_lossy(&msg.data).into_owned();
        }
        _ => {
            drop(clients);
            warn!(msg_id = msg.msg_id, "unknown SET msg id");
            return;
        }
    }

    let ack = IpcMessage::new(group::SET, msg.msg_id, vec![1]).serialize();
    drop(clients);
    let _ = write_with_retry(stream, &ack);
}

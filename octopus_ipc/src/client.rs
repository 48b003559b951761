//! IPC client: connect/reconnect, framed receive loop, and callback
//! registry (spec.md §4.10).
//!
//! Grounded in `examples/original_source/src/APP/octopus_ipc_app_client.hpp`'s
//! registration API (`ipc_register_socket_callback`/
//! `ipc_unregister_socket_callback`, name-tagged callbacks) and the
//! reconnect/respawn behavior of spec.md §4.10 and scenario S2 (spec.md
//! §8). Callback failure-count eviction mirrors [`crate::bus`]'s
//! `catch_unwind`-based treatment of "callback raised" (spec.md §7
//! `CallbackFailure`), sharing the same threshold.

use octopus_common::consts::{CALLBACK_FAILURE_THRESHOLD, IPC_DELAYED_SEND_MAX_WAIT_MS, IPC_RECONNECT_BACKOFF_MS};
use octopus_common::prelude::CallStatus;
use parking_lot::Mutex;
use std::io::{ErrorKind, Read, Write};
use std::os::unix::net::UnixStream;
use std::panic::{self, AssertUnwindSafe};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::message::{IpcMessage, MessageDecoder};
use crate::threadpool::ThreadPool;

/// How long a read blocks before the receive loop re-checks the shutdown
/// flag (spec.md §4.10 "bounded wait ... 100-200 ms per iteration").
const RECEIVE_POLL_TIMEOUT: Duration = Duration::from_millis(150);

type Callback = Box<dyn Fn(&IpcMessage) + Send + Sync + 'static>;

struct CallbackEntry {
    id: u64,
    name: String,
    callback: Arc<Callback>,
    failures: u32,
}

struct Registry {
    callbacks: Vec<CallbackEntry>,
    next_id: u64,
}

/// Client-side connection to the IPC server, with automatic reconnection
/// and a dispatcher-backed callback registry (spec.md §4.10).
pub struct IpcClient {
    socket_path: String,
    server_spawn_path: Option<String>,
    stream: Mutex<Option<UnixStream>>,
    status: Mutex<CallStatus>,
    registry: Mutex<Registry>,
    pool: Arc<ThreadPool>,
    stop: Arc<AtomicBool>,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

impl IpcClient {
    /// Build a client targeting `socket_path`. `server_spawn_path`, if
    /// set, is executed when the server appears to be absent on connect
    /// (spec.md §4.10 "optionally starts the server process").
    pub fn new(socket_path: &str, server_spawn_path: Option<String>, pool: Arc<ThreadPool>) -> Arc<Self> {
        Arc::new(Self {
            socket_path: socket_path.to_string(),
            server_spawn_path,
            stream: Mutex::new(None),
            status: Mutex::new(CallStatus::Disconnected),
            registry: Mutex::new(Registry {
                callbacks: Vec::new(),
                next_id: 1,
            }),
            pool,
            stop: Arc::new(AtomicBool::new(false)),
            receiver: Mutex::new(None),
        })
    }

    /// Register `callback` under `name`; every decoded message is
    /// dispatched to every registered callback (spec.md §4.10 "registers
    /// with ... thread pool").
    pub fn register<F>(&self, name: &str, callback: F)
    where
        F: Fn(&IpcMessage) + Send + Sync + 'static,
    {
        let mut registry = self.registry.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.callbacks.push(CallbackEntry {
            id,
            name: name.to_string(),
            callback: Arc::new(Box::new(callback)),
            failures: 0,
        });
    }

    /// Remove every callback registered under `name`.
    pub fn unregister(&self, name: &str) {
        self.registry.lock().callbacks.retain(|c| c.name != name);
    }

    /// Current connection status.
    pub fn status(&self) -> CallStatus {
        *self.status.lock()
    }

    /// Start the connect/receive loop on a dedicated thread.
    pub fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let handle = thread::spawn(move || this.run_loop());
        *self.receiver.lock() = Some(handle);
    }

    /// Stop the receive loop and join its thread.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.receiver.lock().take() {
            let _ = handle.join();
        }
    }

    fn run_loop(self: Arc<Self>) {
        let mut decoder = MessageDecoder::new();
        let mut buf = [0u8; 512];

        while !self.stop.load(Ordering::Acquire) {
            if self.stream.lock().is_none() {
                self.reconnect();
                if self.stream.lock().is_none() {
                    continue;
                }
                decoder = MessageDecoder::new();
            }

            let read_result = {
                let guard = self.stream.lock();
                guard.as_ref().map(|s| s.try_clone())
            };

            let Some(Ok(mut stream)) = read_result else {
                *self.stream.lock() = None;
                continue;
            };

            match stream.read(&mut buf) {
                Ok(0) => {
                    *self.status.lock() = CallStatus::Disconnected;
                    *self.stream.lock() = None;
                }
                Ok(n) => {
                    for msg in decoder.feed(&buf[..n]) {
                        self.dispatch(msg);
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                    continue;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => {
                    *self.status.lock() = CallStatus::Error;
                    *self.stream.lock() = None;
                }
            }
        }
    }

    fn reconnect(&self) {
        match UnixStream::connect(&self.socket_path) {
            Ok(stream) => {
                let _ = stream.set_read_timeout(Some(RECEIVE_POLL_TIMEOUT));
                *self.stream.lock() = Some(stream);
                *self.status.lock() = CallStatus::Success;
                info!(socket_path = %self.socket_path, "IPC client connected");
            }
            Err(_) => {
                *self.status.lock() = CallStatus::Disconnected;
                if let Some(path) = &self.server_spawn_path {
                    debug!(path, "IPC server unreachable, attempting to spawn it");
                    let _ = Command::new(path).spawn();
                }
                thread::sleep(Duration::from_millis(IPC_RECONNECT_BACKOFF_MS));
            }
        }
    }

    fn dispatch(&self, msg: IpcMessage) {
        let entries: Vec<(u64, Arc<Callback>)> = {
            let registry = self.registry.lock();
            registry
                .callbacks
                .iter()
                .map(|c| (c.id, Arc::clone(&c.callback)))
                .collect()
        };

        let msg = Arc::new(msg);
        for (id, callback) in entries {
            let msg = Arc::clone(&msg);
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(&msg)));
            if outcome.is_err() {
                self.record_failure(id);
            }
        }
    }

    fn record_failure(&self, id: u64) {
        let mut registry = self.registry.lock();
        let Some(pos) = registry.callbacks.iter().position(|c| c.id == id) else {
            return;
        };
        registry.callbacks[pos].failures += 1;
        let failures = registry.callbacks[pos].failures;
        let name = registry.callbacks[pos].name.clone();
        warn!(name = %name, failures, "IPC client callback panicked");
        if failures >= CALLBACK_FAILURE_THRESHOLD {
            registry.callbacks.remove(pos);
            debug!(name, "IPC client callback evicted after repeated failures");
        }
    }

    /// Send a message immediately. Returns `false` if no connection is
    /// currently established.
    pub fn send(&self, group: u8, msg_id: u8, payload: Vec<u8>) -> bool {
        let bytes = IpcMessage::new(group, msg_id, payload).serialize();
        let mut guard = self.stream.lock();
        match guard.as_mut() {
            Some(stream) => stream.write_all(&bytes).is_ok(),
            None => false,
        }
    }

    /// Send after `delay_ms`, scheduled on the thread pool. Waits up to
    /// [`IPC_DELAYED_SEND_MAX_WAIT_MS`] total for a live connection before
    /// giving up and dropping the send (spec.md §4.10 "Send API").
    pub fn send_delayed(self: &Arc<Self>, group: u8, msg_id: u8, payload: Vec<u8>, delay_ms: u64) {
        let this = Arc::clone(self);
        self.pool.submit_delayed(
            move || {
                let deadline = Instant::now() + Duration::from_millis(IPC_DELAYED_SEND_MAX_WAIT_MS);
                loop {
                    if this.send(group, msg_id, payload.clone()) {
                        return;
                    }
                    if Instant::now() >= deadline {
                        warn!(group, msg_id, "delayed IPC send dropped: no live connection");
                        return;
                    }
                    thread::sleep(Duration::from_millis(50));
                }
            },
            delay_ms,
        );
    }
}

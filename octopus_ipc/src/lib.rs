//! IPC subsystem: framed message codec, server, client, thread pool, and
//! in-process message bus (spec.md §4.8-§4.12).
//!
//! Mirrors `octopus_ptl`'s internal layout: a pure codec module at the
//! bottom, a scheduler-facing `Task` adapter at the top, and the
//! concurrency primitives it needs (thread pool, bus) in between.

pub mod bus;
pub mod client;
pub mod ipc_task;
pub mod message;
pub mod server;
pub mod shutdown;
pub mod threadpool;

pub use bus::{BusMessage, MessageBus, SubscriptionToken};
pub use client::IpcClient;
pub use ipc_task::IpcTask;
pub use message::{IpcMessage, MessageDecoder, MessageError};
pub use server::{IpcServer, SnapshotSource};
pub use threadpool::{OverflowStrategy, ThreadPool};

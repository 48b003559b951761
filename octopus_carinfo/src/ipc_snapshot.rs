//! Adapts [`ModelStore`] to `octopus_ipc::SnapshotSource`, so the IPC
//! server can answer `CAR` snapshot requests and fan-out without this
//! crate depending back on `octopus_ipc` for anything beyond this one
//! trait — the same ownership-inversion already used between this crate
//! and `octopus_ptl`'s module registry.
//!
//! Byte layouts mirror the send-handler encodings in `task.rs` exactly,
//! since both the PTL frame payload and the IPC snapshot payload describe
//! the same underlying record.

use crate::model::ModelStore;
use octopus_ipc::SnapshotSource;
use std::sync::Arc;

/// Wraps a shared [`ModelStore`] so it can be handed to `IpcServer::bind`
/// as a `Arc<dyn SnapshotSource>`.
pub struct ModelSnapshotSource {
    model: Arc<ModelStore>,
}

impl ModelSnapshotSource {
    pub fn new(model: Arc<ModelStore>) -> Self {
        Self { model }
    }
}

impl SnapshotSource for ModelSnapshotSource {
    fn indicator_bytes(&self) -> Vec<u8> {
        let bits = self.model.snapshot().indicator.bits();
        vec![bits as u8, (bits >> 8) as u8]
    }

    fn meter_bytes(&self) -> Vec<u8> {
        let meter = self.model.snapshot().meter;
        vec![
            (meter.speed_real >> 8) as u8,
            meter.speed_real as u8,
            (meter.rpm >> 8) as u8,
            meter.rpm as u8,
        ]
    }

    fn drivetrain_bytes(&self) -> Vec<u8> {
        let dt = self.model.snapshot().drivetrain;
        vec![dt.gear, dt.drive_mode]
    }
}

//! Vehicle data model and the CarInfo task that owns it.

pub mod ipc_snapshot;
pub mod model;
pub mod soc;
pub mod task;

pub use ipc_snapshot::ModelSnapshotSource;
pub use model::{Drivetrain, Indicator, Meter, ModelStore, SifSnapshot, VehicleModel};
pub use soc::estimate_soc;
pub use task::{CarInfoTask, SifSource};

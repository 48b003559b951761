//! Prelude module for common re-exports.
//!
//! `use octopus_common::prelude::*;` pulls in the types every downstream
//! crate needs without listing individual paths.

pub use crate::config::{ConfigError, ConfigLoader, LogLevel, SystemConfig};
pub use crate::error::{CallStatus, OctopusError, OctopusResult};
pub use crate::task::{TaskId, ALL_TASKS, TASK_COUNT};
pub use crate::tick::{elapsed, now_ms, restart, start, TickCounter};

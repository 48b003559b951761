//! Vehicle protocol layer (PTL) and inter-task message queue.
//!
//! # Module Structure
//!
//! - [`msgqueue`] - Bounded per-task FIFO message queue
//! - [`frame`] - Wire frame codec and streaming resynchronizing parser
//! - [`registry`] - Module registry and running set
//! - [`ptl`] - Outbound polling / inbound dispatch runtime
//! - [`ptl_task`] - Schedulable `Task` wrapper tying PTL to a transport

pub mod frame;
pub mod msgqueue;
pub mod ptl;
pub mod ptl_task;
pub mod registry;

pub use frame::{build, Direction, Frame, FrameParser, FrameType, Module};
pub use msgqueue::{MessageQueue, SendResult, TaskMessage};
pub use ptl::Ptl;
pub use ptl_task::PtlTask;
pub use registry::{ModuleRegistry, RecvFn, SendFn};

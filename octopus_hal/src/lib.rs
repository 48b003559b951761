//! Serial transport to the MCU.
//!
//! # Module Structure
//!
//! - [`transport`] - The `SerialTransport` contract
//! - [`posix`] - Real POSIX character-device implementation
//! - [`loopback`] - In-memory test double

pub mod loopback;
pub mod posix;
pub mod transport;

pub use loopback::LoopbackTransport;
pub use posix::PosixSerialTransport;
pub use transport::{ReceiveCallback, SerialTransport};

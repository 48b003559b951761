//! System-wide constants for the Octopus workspace.
//!
//! Single source of truth for protocol and scheduling constants. Imported by
//! all crates — no duplication permitted.

use static_assertions::const_assert;

/// Scheduler tick interval in milliseconds.
pub const TASK_TICK_MS: u32 = 10;

/// PTL frame start-of-frame byte.
pub const PTL_SOF: u8 = 0xF5;

/// Minimum valid PTL frame length (SOF+LEN+FRAME_TYPE+CMD+CHECKSUM).
pub const PTL_LEN_MIN: u8 = 4;

/// Maximum valid PTL frame length (LEN is a single byte).
pub const PTL_LEN_MAX: u8 = 255;

/// Maximum bytes the PTL resync scanner advances per parse attempt before
/// giving up on the current buffer (bounds unbounded work on garbage input).
pub const PTL_RESYNC_SCAN_WINDOW: usize = 256;

/// Fixed offset added to RPM before it is stored, to keep the field unsigned.
pub const METER_RPM_OFFSET: i32 = 20000;

/// Per-cell voltage thresholds for the SoC ladder, in centivolts-per-cell
/// (multiply by pack cell count, divide by 10, to get a pack threshold in
/// 0.1 V units). Taken from the `CELL_VOL_20..CELL_VOL_90` constant ladder.
pub mod cell_vol {
    pub const V20: u32 = 1058;
    pub const V30: u32 = 1076;
    pub const V40: u32 = 1100;
    pub const V50: u32 = 1120;
    pub const V60: u32 = 1142;
    pub const V70: u32 = 1164;
    pub const V80: u32 = 1184;
    pub const V90: u32 = 1206;
}

/// Displayed-speed scaling numerator (displayed = real * 11 / 10).
pub const METER_SPEED_DISPLAY_NUM: u32 = 11;
/// Displayed-speed scaling denominator.
pub const METER_SPEED_DISPLAY_DEN: u32 = 10;

/// IPC frame header sentinel (`0xA5A5`).
pub const IPC_HEADER: u16 = 0xA5A5;

/// Maximum bytes of leading junk the IPC streaming decoder will scan past
/// looking for a header before trimming the buffer (20 bytes consumed,
/// 21+ trimmed without a false frame).
pub const IPC_HEADER_SCAN_WINDOW: usize = 20;

/// Default path of the IPC Unix-domain socket.
pub const DEFAULT_IPC_SOCKET_PATH: &str = "/tmp/octopus/ipc_socket";

/// Consecutive-failure threshold before a callback/subscriber is evicted.
pub const CALLBACK_FAILURE_THRESHOLD: u32 = 3;

/// Default IPC client reconnect back-off, in milliseconds.
pub const IPC_RECONNECT_BACKOFF_MS: u64 = 2_000;

/// Maximum total wait for a delayed send before it is dropped, in
/// milliseconds.
pub const IPC_DELAYED_SEND_MAX_WAIT_MS: u64 = 10_000;

const_assert!(PTL_LEN_MIN < PTL_LEN_MAX);
const_assert!(IPC_HEADER_SCAN_WINDOW > 0);
const_assert!(CALLBACK_FAILURE_THRESHOLD > 0);

/// IPC message group identifiers.
pub mod group {
    /// Status/help requests.
    pub const HELP: u8 = 0;
    /// Subscription/configuration updates.
    pub const SET: u8 = 1;
    /// Vehicle-info snapshots.
    pub const CAR: u8 = 11;
}

/// IPC message ids within the `CAR` group.
pub mod car_msg {
    /// Indicator snapshot.
    pub const INDICATOR: u8 = 100;
    /// Meter snapshot.
    pub const METER: u8 = 101;
    /// Drivetrain snapshot.
    pub const DRIVETRAIN: u8 = 102;
}

/// Task-message ids used on the inter-task queue to carry requests
/// between CarInfo, PTL, and IPC.
pub mod task_msg {
    /// CarInfo -> PTL: emit an outbound frame for the given module/cmd.
    pub const REQUEST_SEND_FRAME: u16 = 1;
    /// CarInfo -> IPC: the vehicle model changed, fan out this group/msg.
    pub const MODEL_CHANGED: u16 = 2;
}

/// IPC message ids within the `SET` group.
pub mod set_msg {
    /// Toggle subscription on/off.
    pub const SUBSCRIBE: u8 = 50;
    /// Set push interval (in centiseconds).
    pub const PUSH_INTERVAL: u8 = 51;
    /// Set remote-identity string.
    pub const REMOTE_ID: u8 = 52;
}

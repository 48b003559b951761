//! Vehicle data model.
//!
//! Field sets, byte order, and scaling are taken directly from
//! `carinfo_meter_t`/`carinfo_indicator_t`/`carinfo_drivinfo_t`/
//! `carinfo_sif_t` in `octopus_carinfor.c` — not invented. The four records
//! are owned exclusively by the CarInfo task; every other reader gets a
//! value-copy [`VehicleModel`] snapshot taken under one short
//! `parking_lot::RwLock`, so a reader never observes a half-updated record.
//!
//! The indicator lamp word and the SIF status bits are named bitflag sets,
//! the same way the teacher models `PowerError`/`MotionError`
//! (`evo_common/src/control_unit/error.rs`) rather than one bool field per
//! bit.

use bitflags::bitflags;
use octopus_common::consts::{METER_SPEED_DISPLAY_DEN, METER_SPEED_DISPLAY_NUM};
use parking_lot::RwLock;

/// Gear position, 0..7.
pub type Gear = u8;

/// Speed/RPM/electrical readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Meter {
    /// Real speed, 0.1 km/h units.
    pub speed_real: u16,
    /// Displayed speed = `speed_real * 11 / 10`.
    pub speed: u16,
    /// RPM, stored with a `+20000` offset to stay unsigned.
    pub rpm: u16,
    /// State of charge, 0..100 %.
    pub soc: u8,
    /// Pack voltage, 0.1 V units.
    pub voltage: u16,
    /// Pack current, 0.1 A units.
    pub current: u16,
    /// System-voltage code (e.g. `0x02` = 48V).
    pub voltage_system: u8,
}

impl Meter {
    /// Recompute `speed` from `speed_real`.
    pub fn recompute_display_speed(&mut self) {
        self.speed = (self.speed_real as u32 * METER_SPEED_DISPLAY_NUM / METER_SPEED_DISPLAY_DEN) as u16;
    }
}

bitflags! {
    /// The 13 named indicator lamps, packed into the same `b0`/`b1` wire
    /// layout the PTL indicator-module frame and the IPC `CAR`/100
    /// snapshot both carry: `bits() as u8` is `b0`, `(bits() >> 8) as u8`
    /// is `b1`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Indicator: u16 {
        const HIGH_BEAM    = 1 << 0;
        const LOW_BEAM     = 1 << 1;
        const POSITION     = 1 << 2;
        const FRONT_FOG    = 1 << 3;
        const REAR_FOG     = 1 << 4;
        const LEFT_TURN    = 1 << 5;
        const RIGHT_TURN   = 1 << 6;
        const READY        = 1 << 7;
        const CHARGE       = 1 << 8;
        const PARKING      = 1 << 9;
        const ECU_FAULT    = 1 << 10;
        const SENSOR_FAULT = 1 << 11;
        const MOTOR_FAULT  = 1 << 12;
    }
}

impl Default for Indicator {
    fn default() -> Self {
        Self::empty()
    }
}

/// Gear and drive-mode state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Drivetrain {
    pub gear: Gear,
    pub drive_mode: u8,
}

bitflags! {
    /// SIF status/fault bits decoded from `buf[2..6]` of the 12-byte SIF
    /// frame (`app_car_controller_sif_updating`). Bit positions here are an
    /// internal canonical numbering, not the wire layout — `decode_sif`
    /// is the only place that maps wire bit positions onto these flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SifStatus: u32 {
        const SIDE_STAND                  = 1 << 0;
        const BOOT_GUARD                  = 1 << 1;
        const HALL_FAULT                  = 1 << 2;
        const THROTTLE_FAULT              = 1 << 3;
        const CONTROLLER_FAULT            = 1 << 4;
        const LOW_VOLTAGE_PROTECTION      = 1 << 5;
        const CRUISE                      = 1 << 6;
        const ASSIST                      = 1 << 7;
        const MOTOR_FAULT                 = 1 << 8;
        const MOTOR_RUNNING               = 1 << 9;
        const BRAKE                       = 1 << 10;
        const CONTROLLER_PROTECTION       = 1 << 11;
        const COAST_CHARGING              = 1 << 12;
        const ANTI_SPEED_PROTECTION       = 1 << 13;
        const SEVENTY_PERCENT_CURRENT     = 1 << 14;
        const PUSH_TO_TALK                = 1 << 15;
        const EKK_BACKUP_POWER            = 1 << 16;
        const OVER_CURRENT_PROTECTION     = 1 << 17;
        const MOTOR_SHAFT_LOCK_PROTECTION = 1 << 18;
        const REVERSE                     = 1 << 19;
        const ELECTRONIC_BRAKE            = 1 << 20;
        const SPEED_LIMIT                 = 1 << 21;
    }
}

impl Default for SifStatus {
    fn default() -> Self {
        Self::empty()
    }
}

/// Raw decoded SIF bit-fields, grounded on the 12-byte `sif_buff` decode in
/// `app_car_controller_sif_updating`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SifSnapshot {
    pub status: SifStatus,
    pub gear: Gear,
    /// Raw current reading, 1 A units.
    pub current: u8,
    /// Hall-sensor edge counter over the last 0.5 s window.
    pub hall_counter: u16,
    pub soc: u8,
    pub voltage_system: u8,
}

/// A consistent, value-copy snapshot of every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VehicleModel {
    pub meter: Meter,
    pub indicator: Indicator,
    pub drivetrain: Drivetrain,
    pub sif: SifSnapshot,
}

/// Owns the live model behind one `RwLock`, guaranteeing record-granularity
/// atomic visibility: a reader's `snapshot()` always reflects a complete
/// write, never a partial one.
#[derive(Default)]
pub struct ModelStore {
    inner: RwLock<VehicleModel>,
}

impl ModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A value-copy snapshot of the whole model.
    pub fn snapshot(&self) -> VehicleModel {
        *self.inner.read()
    }

    /// Mutate the model under the write lock. Only the CarInfo task should
    /// call this — writes occur only from the CarInfo task.
    pub fn mutate<F: FnOnce(&mut VehicleModel)>(&self, f: F) {
        let mut guard = self.inner.write();
        f(&mut guard);
    }
}

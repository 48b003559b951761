//! Battery state-of-charge estimation.
//!
//! A black-box piecewise function of pack voltage with hysteresis, rather
//! than a literal port of `get_battery_voltage()` in `octopus_carinfor.c`
//! — that function's rising/falling branches duplicate the same ladder
//! per voltage system with small, inconsistent threshold deltas that look
//! like drift rather than intentional design. What is preserved: the
//! `CELL_VOL_20..CELL_VOL_90` per-cell threshold ladder, the derivation of
//! a cell count from the system-voltage code, and — in place of the two
//! duplicated ladders — a single monotonic ladder plus a fixed deadband so
//! the estimate does not chatter between two adjacent bands when voltage
//! sits near a threshold.

use octopus_common::consts::cell_vol;

/// Deadband applied around each threshold, in 0.1 V pack units, to avoid
/// chattering when voltage sits near a band boundary.
const DEADBAND_DV: i32 = 3;

/// Ladder step, paired with its per-cell voltage threshold.
const LADDER: [(u8, u32); 7] = [
    (90, cell_vol::V90),
    (80, cell_vol::V80),
    (70, cell_vol::V70),
    (60, cell_vol::V60),
    (50, cell_vol::V50),
    (40, cell_vol::V40),
    (30, cell_vol::V30),
];

/// Number of series cells for a given `voltage_system` code
/// (`lt_sif.voltageSystem` bitmask).
fn cell_count(voltage_system: u8) -> Option<u32> {
    Some(match voltage_system {
        0x01 => 3, // 36V
        0x02 => 4, // 48V
        0x04 => 5, // 60V
        0x08 => 5, // 64V
        0x10 => 6, // 72V
        0x20 => 6, // 80V
        0x40 => 7, // 84V
        0x80 => 8, // 96V
        _ => return None,
    })
}

/// Estimate SoC (0..100%) from pack `voltage` (0.1 V units) and
/// `voltage_system` code, given the `previous` estimate for hysteresis.
///
/// Falls back to `previous` unchanged when the system code is not
/// recognized (matches the original's `default: break` — no silent guess).
pub fn estimate_soc(voltage: u16, voltage_system: u8, previous: u8) -> u8 {
    let Some(cells) = cell_count(voltage_system) else {
        return previous;
    };
    let voltage = voltage as i32;

    for &(pct, per_cell) in &LADDER {
        let threshold = (per_cell * cells / 10) as i32;
        let band_entry = if pct as u32 > previous as u32 {
            threshold + DEADBAND_DV
        } else {
            threshold - DEADBAND_DV
        };
        if voltage > band_entry {
            return pct;
        }
    }

    let lowest_threshold = (cell_vol::V20 * cells / 10) as i32;
    if voltage > lowest_threshold - DEADBAND_DV {
        20
    } else {
        0
    }
}

//! Wire frame codec (spec.md §3 "Protocol frame", §4.6 part 1, §6 wire
//! example).
//!
//! ```text
//! SOF(1) | LEN(1) | FRAME_TYPE(1) | CMD(1) | DATA(LEN-4 bytes) | CHECKSUM(1)
//! ```
//!
//! `CHECKSUM` is the 8-bit sum of every preceding byte, modulo 256. The
//! streaming parser mirrors the length-prefixed-plus-trailing-checksum shape
//! used by the application-side IPC framing elsewhere in this workspace: on
//! a checksum mismatch it advances one byte and rescans, bounded by
//! [`octopus_common::consts::PTL_RESYNC_SCAN_WINDOW`] so garbage input can
//! never cause unbounded work.

use octopus_common::consts::{PTL_LEN_MAX, PTL_LEN_MIN, PTL_RESYNC_SCAN_WINDOW, PTL_SOF};
use octopus_common::prelude::OctopusError;

/// Frame direction, packed into the high bit of [`FrameType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// MCU -> App.
    M2a,
    /// App -> MCU.
    A2m,
}

/// The module a frame addresses. `Other` keeps the set open for modules not
/// named explicitly by the specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Module {
    Meter,
    Indicator,
    DrivInfo,
    System,
    Other(u8),
}

impl Module {
    const METER_CODE: u8 = 1;
    const INDICATOR_CODE: u8 = 2;
    const DRIV_INFO_CODE: u8 = 3;
    const SYSTEM_CODE: u8 = 4;

    fn code(self) -> u8 {
        match self {
            Module::Meter => Self::METER_CODE,
            Module::Indicator => Self::INDICATOR_CODE,
            Module::DrivInfo => Self::DRIV_INFO_CODE,
            Module::System => Self::SYSTEM_CODE,
            Module::Other(code) => code,
        }
    }

    fn from_code(code: u8) -> Module {
        match code {
            Self::METER_CODE => Module::Meter,
            Self::INDICATOR_CODE => Module::Indicator,
            Self::DRIV_INFO_CODE => Module::DrivInfo,
            Self::SYSTEM_CODE => Module::System,
            other => Module::Other(other),
        }
    }
}

/// `{direction, module}` packed into a single byte — the module registry
/// and running-set key (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameType(u8);

const DIRECTION_BIT: u8 = 0x80;
const MODULE_MASK: u8 = 0x7F;

impl FrameType {
    /// Build a frame type from its direction and module.
    pub fn new(direction: Direction, module: Module) -> Self {
        let dir_bit = match direction {
            Direction::M2a => 0,
            Direction::A2m => DIRECTION_BIT,
        };
        FrameType(dir_bit | (module.code() & MODULE_MASK))
    }

    /// Decode the raw wire byte back into a `FrameType`.
    pub fn from_byte(byte: u8) -> Self {
        FrameType(byte)
    }

    /// The raw wire byte.
    pub fn as_byte(self) -> u8 {
        self.0
    }

    /// This frame type's direction.
    pub fn direction(self) -> Direction {
        if self.0 & DIRECTION_BIT != 0 {
            Direction::A2m
        } else {
            Direction::M2a
        }
    }

    /// This frame type's module.
    pub fn module(self) -> Module {
        Module::from_code(self.0 & MODULE_MASK)
    }
}

/// A fully decoded, checksum-verified frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub cmd: u8,
    pub data: Vec<u8>,
}

fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Build the wire bytes for a frame: `SOF | LEN | FRAME_TYPE | CMD | DATA |
/// CHECKSUM`.
pub fn build(frame_type: FrameType, cmd: u8, data: &[u8]) -> Result<Vec<u8>, OctopusError> {
    let len = 4usize + data.len();
    if len > PTL_LEN_MAX as usize {
        return Err(OctopusError::FrameInvalid(format!(
            "data too large: total frame length {len} exceeds {PTL_LEN_MAX}"
        )));
    }

    let mut out = Vec::with_capacity(len + 1);
    out.push(PTL_SOF);
    out.push(len as u8);
    out.push(frame_type.as_byte());
    out.push(cmd);
    out.extend_from_slice(data);
    out.push(checksum(&out));
    Ok(out)
}

/// Streaming, resynchronizing frame parser. Owns the rolling byte buffer;
/// callers `feed` bytes as they arrive from the transport's receive
/// callback and drain whatever complete frames are ready.
#[derive(Default)]
pub struct FrameParser {
    buf: Vec<u8>,
}

impl FrameParser {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Append newly received bytes and extract every complete, valid frame
    /// currently available. Invalid leading bytes are skipped one at a
    /// time, bounded by `PTL_RESYNC_SCAN_WINDOW` per call so a flood of
    /// garbage cannot stall the caller.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Frame> {
        self.buf.extend_from_slice(bytes);
        let mut frames = Vec::new();
        let mut scanned = 0usize;

        loop {
            // Find SOF.
            let Some(sof_pos) = self.buf.iter().position(|&b| b == PTL_SOF) else {
                self.buf.clear();
                break;
            };
            if sof_pos > 0 {
                self.buf.drain(0..sof_pos);
                scanned += sof_pos;
            }

            if self.buf.len() < 2 {
                break; // need LEN byte
            }
            let len = self.buf[1] as usize;
            if len < PTL_LEN_MIN as usize {
                // Can never be a valid frame at this position; skip SOF byte.
                self.buf.remove(0);
                scanned += 1;
                if scanned >= PTL_RESYNC_SCAN_WINDOW {
                    break;
                }
                continue;
            }
            if self.buf.len() < len + 1 {
                break; // frame (incl. checksum) not fully received yet
            }

            let candidate = &self.buf[0..len + 1];
            let expected_checksum = candidate[len];
            if checksum(&candidate[0..len]) != expected_checksum {
                self.buf.remove(0);
                scanned += 1;
                if scanned >= PTL_RESYNC_SCAN_WINDOW {
                    break;
                }
                continue;
            }

            let frame_type = FrameType::from_byte(candidate[2]);
            let cmd = candidate[3];
            let data = candidate[4..len].to_vec();
            frames.push(Frame {
                frame_type,
                cmd,
                data,
            });
            self.buf.drain(0..len + 1);
            scanned = 0;
        }

        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_round_trips_through_parser() {
        let ft = FrameType::new(Direction::M2a, Module::Meter);
        let bytes = build(ft, 0x01, &[0x00, 0x10, 0x00, 0x20]).unwrap();

        let mut parser = FrameParser::new();
        let frames = parser.feed(&bytes);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].frame_type, ft);
        assert_eq!(frames[0].cmd, 0x01);
        assert_eq!(frames[0].data, vec![0x00, 0x10, 0x00, 0x20]);
    }

    #[test]
    fn frame_type_packs_direction_and_module() {
        let ft = FrameType::new(Direction::A2m, Module::Indicator);
        assert_eq!(ft.direction(), Direction::A2m);
        assert_eq!(ft.module(), Module::Indicator);
    }

    #[test]
    fn parser_resyncs_past_leading_junk() {
        let ft = FrameType::new(Direction::M2a, Module::DrivInfo);
        let good = build(ft, 0x02, &[0xAA]).unwrap();

        let mut junked = vec![0x00, 0x01, 0xFF];
        junked.extend_from_slice(&good);

        let mut parser = FrameParser::new();
        let frames = parser.feed(&junked);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].cmd, 0x02);
    }

    #[test]
    fn parser_resyncs_past_corrupted_checksum() {
        let ft = FrameType::new(Direction::M2a, Module::System);
        let mut bad = build(ft, 0x03, &[0x01]).unwrap();
        let last = bad.len() - 1;
        bad[last] ^= 0xFF; // corrupt checksum

        let good = build(ft, 0x04, &[0x02]).unwrap();
        let mut stream = bad;
        stream.extend_from_slice(&good);

        let mut parser = FrameParser::new();
        let frames = parser.feed(&stream);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].cmd, 0x04);
    }

    #[test]
    fn parser_waits_for_a_split_frame() {
        let ft = FrameType::new(Direction::M2a, Module::Meter);
        let bytes = build(ft, 0x01, &[0x11, 0x22]).unwrap();
        let (first, second) = bytes.split_at(3);

        let mut parser = FrameParser::new();
        assert!(parser.feed(first).is_empty());
        let frames = parser.feed(second);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, vec![0x11, 0x22]);
    }

    #[test]
    fn parser_discards_four_bytes_of_garbage_before_a_valid_frame_s4() {
        let ft = FrameType::new(Direction::M2a, Module::Meter);
        let good = build(ft, 0x01, &[0x00, 0x10, 0x00, 0x20]).unwrap();
        assert_eq!(good.len(), 8);

        let mut stream = vec![0xFF, 0x00, 0x01, 0x02];
        stream.extend_from_slice(&good);

        let mut parser = FrameParser::new();
        let frames = parser.feed(&stream);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].cmd, 0x01);
        assert_eq!(frames[0].data, vec![0x00, 0x10, 0x00, 0x20]);
    }

    #[test]
    fn oversized_data_is_rejected() {
        let ft = FrameType::new(Direction::M2a, Module::Meter);
        let data = vec![0u8; 300];
        assert!(build(ft, 0x01, &data).is_err());
    }
}

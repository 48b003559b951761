//! Framed IPC message codec (spec.md §3 "IPC message", §4.8, §8).
//!
//! ```text
//! HEADER(2 = 0xA5A5) | GROUP(1) | MSG_ID(1) | LENGTH(2, big-endian) | DATA(LENGTH bytes)
//! ```
//!
//! Grounded directly on `examples/original_source/src/IPC/octopus_ipc_ptl.hpp`'s
//! `DataMessage` class. The spec standardizes on the 2-byte big-endian
//! `LENGTH` field present in the latest duplicates of that class (Open
//! Question i in spec.md §9) — the 1-byte variant found in older copies of
//! the original is not carried forward.

use octopus_common::consts::{IPC_HEADER, IPC_HEADER_SCAN_WINDOW};
use thiserror::Error;

/// Header + group + msg_id + length, before the variable-length data.
pub const HEADER_LEN: usize = 6;

/// A decoded IPC message (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpcMessage {
    pub group: u8,
    pub msg_id: u8,
    pub data: Vec<u8>,
}

/// `deserialize` never panics; every malformed input maps to one of these
/// (spec.md §4.8).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    /// Fewer than [`HEADER_LEN`] bytes supplied.
    #[error("truncated message: need at least {needed} bytes, have {have}")]
    Truncated { needed: usize, have: usize },

    /// The fixed header sentinel did not match.
    #[error("bad header: expected {expected:#06x}, got {actual:#06x}")]
    BadHeader { expected: u16, actual: u16 },

    /// The declared `LENGTH` does not match the data actually present.
    #[error("length mismatch: header declares {declared} bytes of data, buffer holds {actual}")]
    LengthMismatch { declared: usize, actual: usize },
}

impl IpcMessage {
    /// Build a message from its group, id, and payload.
    pub fn new(group: u8, msg_id: u8, data: Vec<u8>) -> Self {
        Self {
            group,
            msg_id,
            data,
        }
    }

    /// Total on-the-wire length: `6 + data.len()`.
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.data.len()
    }

    /// Encode into the wire format.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.wire_len());
        out.extend_from_slice(&IPC_HEADER.to_be_bytes());
        out.push(self.group);
        out.push(self.msg_id);
        out.extend_from_slice(&(self.data.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.data);
        out
    }

    /// Decode a buffer that holds exactly one framed message (no leading
    /// junk, no trailing bytes). Used for one-shot decode of a complete
    /// read; the streaming case goes through [`MessageDecoder`] instead.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, MessageError> {
        if bytes.len() < HEADER_LEN {
            return Err(MessageError::Truncated {
                needed: HEADER_LEN,
                have: bytes.len(),
            });
        }

        let header = u16::from_be_bytes([bytes[0], bytes[1]]);
        if header != IPC_HEADER {
            return Err(MessageError::BadHeader {
                expected: IPC_HEADER,
                actual: header,
            });
        }

        let group = bytes[2];
        let msg_id = bytes[3];
        let length = u16::from_be_bytes([bytes[4], bytes[5]]) as usize;
        let total = HEADER_LEN + length;

        if bytes.len() != total {
            return Err(MessageError::LengthMismatch {
                declared: length,
                actual: bytes.len().saturating_sub(HEADER_LEN),
            });
        }

        Ok(Self {
            group,
            msg_id,
            data: bytes[HEADER_LEN..total].to_vec(),
        })
    }
}

fn find_header(buf: &[u8]) -> Option<usize> {
    let high = (IPC_HEADER >> 8) as u8;
    let low = (IPC_HEADER & 0xFF) as u8;
    buf.windows(2).position(|w| w[0] == high && w[1] == low)
}

/// Streaming decoder: holds a rolling tail buffer and yields complete
/// messages as bytes arrive, advancing past non-header junk up to a bounded
/// scan window (spec.md §4.8, §8 boundary behavior).
#[derive(Default)]
pub struct MessageDecoder {
    buf: Vec<u8>,
}

impl MessageDecoder {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Append newly received bytes and drain every complete message now
    /// available. Leaves any unconsumed tail (a partial message, or junk
    /// still within the scan window) in the internal buffer for the next
    /// call.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<IpcMessage> {
        self.buf.extend_from_slice(bytes);
        let mut messages = Vec::new();

        loop {
            match find_header(&self.buf) {
                Some(pos) if pos <= IPC_HEADER_SCAN_WINDOW => {
                    if pos > 0 {
                        self.buf.drain(0..pos);
                    }
                    if self.buf.len() < HEADER_LEN {
                        break; // need more bytes for the length field
                    }
                    let length = u16::from_be_bytes([self.buf[4], self.buf[5]]) as usize;
                    let total = HEADER_LEN + length;
                    if self.buf.len() < total {
                        break; // message not fully received yet
                    }
                    let msg = IpcMessage::deserialize(&self.buf[0..total])
                        .expect("header and length already validated above");
                    messages.push(msg);
                    self.buf.drain(0..total);
                }
                _ => {
                    // No header within the scan window: trim the buffer so
                    // a flood of junk cannot grow it unboundedly, but never
                    // emit a false frame.
                    if self.buf.len() > IPC_HEADER_SCAN_WINDOW {
                        let excess = self.buf.len() - IPC_HEADER_SCAN_WINDOW;
                        self.buf.drain(0..excess);
                    }
                    break;
                }
            }
        }

        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_serialize_deserialize() {
        let msg = IpcMessage::new(11, 101, vec![0x00, 0x50, 0x00, 0xC8]);
        let bytes = msg.serialize();
        assert_eq!(IpcMessage::deserialize(&bytes).unwrap(), msg);
    }

    #[test]
    fn zero_length_payload_is_valid() {
        let msg = IpcMessage::new(0, 0, vec![]);
        let bytes = msg.serialize();
        assert_eq!(bytes.len(), HEADER_LEN);
        assert_eq!(IpcMessage::deserialize(&bytes).unwrap().data, Vec::<u8>::new());
    }

    #[test]
    fn bad_header_is_rejected() {
        let mut bytes = IpcMessage::new(1, 50, vec![1]).serialize();
        bytes[0] = 0x00;
        assert!(matches!(
            IpcMessage::deserialize(&bytes),
            Err(MessageError::BadHeader { .. })
        ));
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let mut bytes = IpcMessage::new(1, 50, vec![1, 2, 3]).serialize();
        bytes.truncate(bytes.len() - 1); // one byte short of declared length
        assert!(matches!(
            IpcMessage::deserialize(&bytes),
            Err(MessageError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn truncated_header_is_rejected() {
        assert!(matches!(
            IpcMessage::deserialize(&[0xA5, 0xA5, 1]),
            Err(MessageError::Truncated { .. })
        ));
    }

    #[test]
    fn streaming_decoder_yields_one_frame_from_garbage_plus_frame() {
        let good = IpcMessage::new(11, 100, vec![0xAA]).serialize();
        let mut junked = vec![0xFF, 0x00, 0x01, 0x02];
        junked.extend_from_slice(&good);

        let mut decoder = MessageDecoder::new();
        let frames = decoder.feed(&junked);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].msg_id, 100);
    }

    #[test]
    fn streaming_decoder_consumes_twenty_bytes_of_junk() {
        let good = IpcMessage::new(1, 50, vec![0x01]).serialize();
        let mut junked = vec![0x00u8; IPC_HEADER_SCAN_WINDOW];
        junked.extend_from_slice(&good);

        let mut decoder = MessageDecoder::new();
        let frames = decoder.feed(&junked);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn streaming_decoder_trims_without_false_frame_past_the_window() {
        let good = IpcMessage::new(1, 50, vec![0x01]).serialize();
        let mut junked = vec![0x00u8; IPC_HEADER_SCAN_WINDOW + 1];
        junked.extend_from_slice(&good);

        let mut decoder = MessageDecoder::new();
        let frames = decoder.feed(&junked);
        assert!(frames.is_empty());

        // Feeding the same bytes again still eventually finds the header
        // once enough junk has scrolled out of the scan window.
        let frames = decoder.feed(&[]);
        assert!(frames.is_empty() || frames.len() == 1);
    }

    #[test]
    fn streaming_decoder_handles_split_feeds() {
        let good = IpcMessage::new(11, 102, vec![1, 2, 3, 4]).serialize();
        let (first, second) = good.split_at(3);

        let mut decoder = MessageDecoder::new();
        assert!(decoder.feed(first).is_empty());
        let frames = decoder.feed(second);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, vec![1, 2, 3, 4]);
    }

    #[test]
    fn streaming_decoder_yields_same_frames_regardless_of_chunking() {
        let m1 = IpcMessage::new(1, 50, vec![1]).serialize();
        let m2 = IpcMessage::new(11, 101, vec![2, 3]).serialize();
        let mut stream = m1.clone();
        stream.extend_from_slice(&m2);

        let mut whole = MessageDecoder::new();
        let all_at_once = whole.feed(&stream);

        let mut chunked = MessageDecoder::new();
        let mut one_byte_at_a_time = Vec::new();
        for b in &stream {
            one_byte_at_a_time.extend(chunked.feed(&[*b]));
        }

        assert_eq!(all_at_once.len(), 2);
        assert_eq!(all_at_once, one_byte_at_a_time);
    }
}

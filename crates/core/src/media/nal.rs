//! HEVC NAL unit header and type helpers (ITU-T H.265 §7.3.1.2, Annex B).
//!
//! ```text
//! +---------------+---------------+
//! |0|1|2|3|4|5|6|7|0|1|2|3|4|5|6|7|
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |F|   Type    |  LayerId  | TID |
//! +-------------+-----------------+
//! ```

use super::cursor::ByteCursor;
use super::sink::BufferFlags;
use crate::error::Result;

/// Annex B start code prepended before every reconstructed NAL unit.
pub const NAL_START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// Size of the HEVC NAL unit header in bytes.
pub const NAL_HEADER_SIZE: usize = 2;

pub mod nal_type {
    pub const IDR_W_RADL: u8 = 19;
    pub const IDR_N_LP: u8 = 20;
    pub const VPS: u8 = 32;
    pub const SPS: u8 = 33;
    pub const PPS: u8 = 34;
    /// Aggregation Packet (RFC 7798 §4.4.2).
    pub const AP: u8 = 48;
    /// Fragmentation Unit (RFC 7798 §4.4.3).
    pub const FU: u8 = 49;
    /// PACI packet (RFC 7798 §4.4.4), not handled.
    pub const PACI: u8 = 50;
}

/// Parsed 2-byte HEVC NAL unit header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalHeader {
    pub forbidden_zero: bool,
    pub nal_type: u8,
    pub layer_id: u8,
    pub tid: u8,
}

impl NalHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        Self::read(&mut ByteCursor::new(data))
    }

    /// Read a header at the cursor position. Also used for the PayloadHdr of
    /// AP and FU packets, which shares the layout.
    pub fn read(cursor: &mut ByteCursor<'_>) -> Result<Self> {
        let forbidden_zero = cursor.read_flag()?;
        let nal_type = cursor.read_bits(6)? as u8;
        let layer_id = cursor.read_bits(6)? as u8;
        let tid = cursor.read_bits(3)? as u8;
        Ok(Self {
            forbidden_zero,
            nal_type,
            layer_id,
            tid,
        })
    }

    /// Header with layer id 0, as reconstructed from an FU packet.
    pub fn new(nal_type: u8, tid: u8) -> Self {
        Self {
            forbidden_zero: false,
            nal_type: nal_type & 0x3F,
            layer_id: 0,
            tid: tid & 0x07,
        }
    }

    pub fn to_bytes(self) -> [u8; 2] {
        let word = (u16::from(self.forbidden_zero) << 15)
            | (u16::from(self.nal_type & 0x3F) << 9)
            | (u16::from(self.layer_id & 0x3F) << 3)
            | u16::from(self.tid & 0x07);
        word.to_be_bytes()
    }
}

/// NAL type from the first header byte, bits 1 to 6.
pub fn nal_type_of(first_byte: u8) -> u8 {
    (first_byte >> 1) & 0x3F
}

pub fn is_idr(nal_type: u8) -> bool {
    nal_type == nal_type::IDR_W_RADL || nal_type == nal_type::IDR_N_LP
}

/// Key-frame flag for IDR_W_RADL and IDR_N_LP, nothing otherwise.
pub fn buffer_flags_from_nal_type(nal_type: u8) -> BufferFlags {
    if is_idr(nal_type) {
        BufferFlags::KEY_FRAME
    } else {
        BufferFlags::empty()
    }
}

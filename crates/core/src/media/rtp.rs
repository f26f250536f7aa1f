use crate::error::{DepayError, Result};

/// Minimum RTP header size in bytes (no CSRC, no extension).
pub const RTP_HEADER_SIZE: usize = 12;

/// Borrowed view of one RTP packet (RFC 3550 §5.1).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// The depacketizer only looks at the payload, sequence number, timestamp
/// and marker bit. The payload borrows from the caller's buffer and is
/// never written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpPacket<'a> {
    pub payload_type: u8,
    /// 16-bit, wraps modulo 65536.
    pub sequence_number: u16,
    /// Media clock, 90 kHz for H.265.
    pub timestamp: u32,
    pub ssrc: u32,
    /// Last packet of an access unit.
    pub marker: bool,
    pub payload: &'a [u8],
}

impl<'a> RtpPacket<'a> {
    /// Build a view from already-demultiplexed fields.
    pub fn new(payload: &'a [u8], timestamp: u32, sequence_number: u16, marker: bool) -> Self {
        Self {
            payload_type: 0,
            sequence_number,
            timestamp,
            ssrc: 0,
            marker,
            payload,
        }
    }

    /// Parse a complete RTP packet.
    ///
    /// Skips the CSRC list and header extension (RFC 3550 §5.3.1) and strips
    /// trailing padding.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        if data.len() < RTP_HEADER_SIZE {
            return Err(DepayError::InvalidRtpPacket(format!(
                "{} bytes is shorter than the fixed header",
                data.len()
            )));
        }

        let version = data[0] >> 6;
        if version != 2 {
            return Err(DepayError::InvalidRtpPacket(format!(
                "unsupported version {version}"
            )));
        }
        let has_padding = data[0] & 0x20 != 0;
        let has_extension = data[0] & 0x10 != 0;
        let csrc_count = (data[0] & 0x0F) as usize;

        let mut header_len = RTP_HEADER_SIZE + csrc_count * 4;
        if has_extension {
            if data.len() < header_len + 4 {
                return Err(DepayError::InvalidRtpPacket(
                    "truncated header extension".into(),
                ));
            }
            let ext_words =
                u16::from_be_bytes([data[header_len + 2], data[header_len + 3]]) as usize;
            header_len += 4 + ext_words * 4;
        }
        if data.len() < header_len {
            return Err(DepayError::InvalidRtpPacket(format!(
                "header needs {header_len} bytes, packet has {}",
                data.len()
            )));
        }

        let mut end = data.len();
        if has_padding {
            let pad = data[end - 1] as usize;
            if pad == 0 || header_len + pad > end {
                return Err(DepayError::InvalidRtpPacket(format!(
                    "invalid padding length {pad}"
                )));
            }
            end -= pad;
        }

        Ok(Self {
            payload_type: data[1] & 0x7F,
            sequence_number: u16::from_be_bytes([data[2], data[3]]),
            timestamp: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            ssrc: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
            marker: data[1] & 0x80 != 0,
            payload: &data[header_len..end],
        })
    }
}

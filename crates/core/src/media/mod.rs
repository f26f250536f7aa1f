//! H.265 RTP depacketization.
//!
//! This module turns a sequence of RTP packets carrying H.265 payloads
//! (RFC 7798) back into an Annex B elementary stream.
//!
//! ## RTP overview (RFC 3550)
//!
//! Every RTP packet carries a 12-byte fixed header ([`rtp::RtpPacket`])
//! containing:
//!
//! - **Sequence number** (16-bit, wrapping): loss detection.
//! - **Timestamp** (32-bit): media clock, 90 kHz for H.265.
//! - **Marker bit**: set on the last packet of an access unit.
//!
//! ## Packetization modes (RFC 7798 §4.4)
//!
//! | PayloadHdr type | Mode | Status |
//! |-----------------|------|--------|
//! | 0–47 | Single NAL unit | Implemented |
//! | 48 | Aggregation packet | Opt-in via [`crate::AggregationMode`] |
//! | 49 | Fragmentation unit | Implemented |
//! | 50 | PACI | Rejected |

use base64::prelude::{BASE64_STANDARD, Engine as _};

use crate::error::{DepayError, Result};
use nal::nal_type;
use sink::TrackFormat;

pub mod cursor;
pub mod h265;
pub mod nal;
pub mod rtp;
pub mod sink;

/// Fixed RTP clock rate for H.265 video (RFC 7798 §7.1).
pub const H265_CLOCK_RATE: u32 = 90_000;

/// Default dynamic payload type.
pub const DEFAULT_PAYLOAD_TYPE: u8 = 96;

/// Static description of an H.265 RTP stream.
///
/// Parameter sets, when known out of band, are forwarded to the sink on
/// track creation so the output can be decoded from its first key frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadFormat {
    pub payload_type: u8,
    pub clock_rate: u32,
    pub vps: Option<Vec<u8>>,
    pub sps: Option<Vec<u8>>,
    pub pps: Option<Vec<u8>>,
}

impl Default for PayloadFormat {
    fn default() -> Self {
        Self::new(DEFAULT_PAYLOAD_TYPE)
    }
}

impl PayloadFormat {
    pub fn new(payload_type: u8) -> Self {
        Self {
            payload_type,
            clock_rate: H265_CLOCK_RATE,
            vps: None,
            sps: None,
            pps: None,
        }
    }

    /// Attach parameter sets from `sprop-vps`, `sprop-sps` and `sprop-pps`
    /// values (base64, RFC 7798 §7.1).
    ///
    /// Each value may hold several comma-separated NAL units; the first one
    /// is kept. The NAL type of each decoded unit must match its parameter.
    pub fn with_sprop_parameter_sets(mut self, vps: &str, sps: &str, pps: &str) -> Result<Self> {
        self.vps = Some(decode_sprop("sprop-vps", vps, nal_type::VPS)?);
        self.sps = Some(decode_sprop("sprop-sps", sps, nal_type::SPS)?);
        self.pps = Some(decode_sprop("sprop-pps", pps, nal_type::PPS)?);
        Ok(self)
    }

    pub fn track_format(&self) -> TrackFormat {
        TrackFormat {
            mime_type: "video/hevc",
            payload_type: self.payload_type,
            clock_rate: self.clock_rate,
            vps: self.vps.clone(),
            sps: self.sps.clone(),
            pps: self.pps.clone(),
        }
    }
}

fn decode_sprop(name: &str, value: &str, expected_type: u8) -> Result<Vec<u8>> {
    let first = value.split(',').next().unwrap_or("").trim();
    let nal = BASE64_STANDARD
        .decode(first)
        .map_err(|e| DepayError::InvalidParameterSet(format!("{name}: {e}")))?;

    if nal.len() < nal::NAL_HEADER_SIZE {
        return Err(DepayError::InvalidParameterSet(format!(
            "{name}: {} bytes is shorter than a NAL header",
            nal.len()
        )));
    }
    let actual = nal::nal_type_of(nal[0]);
    if actual != expected_type {
        return Err(DepayError::InvalidParameterSet(format!(
            "{name}: NAL type {actual}, expected {expected_type}"
        )));
    }
    tracing::debug!(param = name, len = nal.len(), "parameter set decoded");
    Ok(nal)
}

#[cfg(test)]
mod tests {
    use super::*;

    // 0x40 0x01 0x0C = VPS header + one byte, 0x42 0x01 0x01 = SPS, 0x44 0x01 0xC0 = PPS
    const VPS: &str = "QAEM";
    const SPS: &str = "QgEB";
    const PPS: &str = "RAHA";

    #[test]
    fn defaults() {
        let f = PayloadFormat::default();
        assert_eq!(f.payload_type, 96);
        assert_eq!(f.clock_rate, 90000);
        let t = f.track_format();
        assert_eq!(t.mime_type, "video/hevc");
        assert_eq!(t.parameter_sets().count(), 0);
    }

    #[test]
    fn decodes_sprop_parameter_sets() {
        let f = PayloadFormat::new(98)
            .with_sprop_parameter_sets(VPS, SPS, PPS)
            .unwrap();
        assert_eq!(f.vps.as_deref(), Some(&[0x40, 0x01, 0x0C][..]));
        assert_eq!(f.sps.as_deref(), Some(&[0x42, 0x01, 0x01][..]));
        assert_eq!(f.pps.as_deref(), Some(&[0x44, 0x01, 0xC0][..]));
        assert_eq!(f.track_format().parameter_sets().count(), 3);
    }

    #[test]
    fn keeps_first_of_comma_separated_list() {
        let f = PayloadFormat::default()
            .with_sprop_parameter_sets(&format!("{VPS},{SPS}"), SPS, PPS)
            .unwrap();
        assert_eq!(f.vps.as_deref(), Some(&[0x40, 0x01, 0x0C][..]));
    }

    #[test]
    fn rejects_bad_base64() {
        let err = PayloadFormat::default()
            .with_sprop_parameter_sets("!!", SPS, PPS)
            .unwrap_err();
        assert!(matches!(err, DepayError::InvalidParameterSet(_)));
    }

    #[test]
    fn rejects_mismatched_nal_type() {
        let err = PayloadFormat::default()
            .with_sprop_parameter_sets(SPS, SPS, PPS)
            .unwrap_err();
        assert!(err.to_string().contains("sprop-vps"));
    }
}

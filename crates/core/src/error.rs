//! Error types for the H.265 depacketizer library.

use std::fmt;

/// Errors that can occur while turning RTP packets into an H.265 bitstream.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Payload**: [`MalformedPayload`](Self::MalformedPayload),
///   [`UnsupportedPacketizationType`](Self::UnsupportedPacketizationType),
///   [`UnsupportedPacketMode`](Self::UnsupportedPacketMode). These abort the
///   session; the bitstream can no longer be trusted.
/// - **Track**: [`TrackNotCreated`](Self::TrackNotCreated).
/// - **Input**: [`InvalidRtpPacket`](Self::InvalidRtpPacket),
///   [`InvalidCapture`](Self::InvalidCapture),
///   [`InvalidParameterSet`](Self::InvalidParameterSet).
/// - **Sink**: [`Io`](Self::Io).
///
/// Sequence gaps inside a fragmented NAL unit are not errors. The offending
/// packet is dropped and logged, and the caller keeps feeding packets.
#[derive(Debug, thiserror::Error)]
pub enum DepayError {
    /// Underlying I/O error from a sink or a capture reader.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload too short or otherwise impossible to parse (RFC 7798 §4.4).
    #[error("malformed H.265 payload: {kind}")]
    MalformedPayload { kind: MalformedKind },

    /// PayloadHdr type outside 0–49 (e.g. PACI packets, type 50).
    #[error("RTP H.265 payload type [{0}] not supported")]
    UnsupportedPacketizationType(u8),

    /// Packetization mode recognised but disabled by configuration.
    #[error("unsupported packetization mode: {0}")]
    UnsupportedPacketMode(&'static str),

    /// [`Depacketizer::consume`](crate::Depacketizer::consume) was called
    /// before [`Depacketizer::create_track`](crate::Depacketizer::create_track).
    #[error("track not created")]
    TrackNotCreated,

    /// RTP fixed header could not be parsed (RFC 3550 §5.1).
    #[error("invalid RTP packet: {0}")]
    InvalidRtpPacket(String),

    /// Capture file is not a valid rtpdump stream.
    #[error("invalid rtpdump capture: {0}")]
    InvalidCapture(String),

    /// `sprop-vps`/`sprop-sps`/`sprop-pps` value could not be decoded.
    #[error("invalid parameter set: {0}")]
    InvalidParameterSet(String),
}

/// Specific kind of malformed payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedKind {
    /// Fewer bytes than the header being read requires.
    Truncated { needed: usize, available: usize },
    /// Aggregation unit with a zero size field.
    EmptyAggregationUnit,
    /// Aggregation packet carrying no aggregation units.
    EmptyAggregationPacket,
}

impl fmt::Display for MalformedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { needed, available } => {
                write!(f, "truncated (needed {needed} bytes, {available} available)")
            }
            Self::EmptyAggregationUnit => write!(f, "empty aggregation unit"),
            Self::EmptyAggregationPacket => write!(f, "aggregation packet without units"),
        }
    }
}

impl DepayError {
    pub(crate) fn truncated(needed: usize, available: usize) -> Self {
        Self::MalformedPayload {
            kind: MalformedKind::Truncated { needed, available },
        }
    }
}

/// Convenience alias for `Result<T, DepayError>`.
pub type Result<T> = std::result::Result<T, DepayError>;

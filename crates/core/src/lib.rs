//! H.265 (HEVC) RTP depacketizer (RFC 7798).
//!
//! Feed RTP packets of one H.265 stream into a [`Depacketizer`] and receive
//! an Annex B elementary stream, split into timed samples, through a
//! [`TrackSink`].

pub mod config;
pub mod error;
pub mod media;
pub mod rtpdump;

pub use config::{AggregationMode, DepacketizerConfig};
pub use error::{DepayError, MalformedKind, Result};
pub use media::h265::{DepayStats, Depacketizer, PacketKind};
pub use media::rtp::RtpPacket;
pub use media::sink::{AnnexBWriter, BufferFlags, MemorySink, Sample, TrackFormat, TrackSink};
pub use media::PayloadFormat;

//! H.265 (HEVC) RTP depacketizer (RFC 7798).
//!
//! Key differences from H.264 (RFC 6184):
//!
//! - **2-byte NAL unit header** (vs 1-byte in H.264).
//!   The NAL type is in bits 1..6 of the first byte, and the RTP payload
//!   header reuses that layout to signal the packetization mode.
//!
//! - **FU header format**: 2-byte PayloadHdr (type 49) + 1-byte FU header
//!   with a 6-bit NAL type field. The original NAL header is rebuilt from the
//!   FU type and the PayloadHdr TID; LayerId is always 0 (RFC 7798 §1.1.4).
//!
//! ## Sample assembly
//!
//! Every reconstructed NAL unit goes to the [`TrackSink`] behind a 4-byte
//! start code. Bytes accumulate into a pending sample that is closed when a
//! packet with the RTP marker bit arrives. Its presentation time is derived
//! from the RTP timestamp relative to the first marker packet (or the last
//! seek).
//!
//! ## Loss handling
//!
//! Packets are expected in sequence order (reordering happens upstream). A
//! continuation fragment whose sequence number does not directly follow the
//! previous packet is dropped with a warning, which leaves a corrupt frame
//! behind but never fails the call. Malformed or unsupported payloads fail
//! the call with a [`DepayError`].

use super::cursor::ByteCursor;
use super::nal::{self, NAL_HEADER_SIZE, NAL_START_CODE, NalHeader, nal_type};
use super::rtp::RtpPacket;
use super::sink::{BufferFlags, TrackSink};
use super::{H265_CLOCK_RATE, PayloadFormat};
use crate::config::{AggregationMode, DepacketizerConfig};
use crate::error::{DepayError, MalformedKind, Result};

const MICROS_PER_SECOND: i128 = 1_000_000;

/// Packetization mode signalled by the PayloadHdr type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// Types 0–47: the payload is one NAL unit (RFC 7798 §4.4.1).
    SingleNalUnit(u8),
    /// Type 48 (RFC 7798 §4.4.2).
    AggregationPacket,
    /// Type 49 (RFC 7798 §4.4.3).
    FragmentationUnit,
}

/// Classify a payload from the type field of its first byte.
pub fn classify(payload: &[u8]) -> Result<PacketKind> {
    let first = *payload
        .first()
        .ok_or_else(|| DepayError::truncated(1, 0))?;
    match nal::nal_type_of(first) {
        t if t < nal_type::AP => Ok(PacketKind::SingleNalUnit(t)),
        nal_type::AP => Ok(PacketKind::AggregationPacket),
        nal_type::FU => Ok(PacketKind::FragmentationUnit),
        other => Err(DepayError::UnsupportedPacketizationType(other)),
    }
}

/// RTP timestamp delta to microseconds, multiplying before dividing.
fn to_sample_us(start_time_offset_us: i64, rtp_timestamp: u64, first_received: u64) -> i64 {
    let delta = i128::from(rtp_timestamp) - i128::from(first_received);
    let scaled = delta * MICROS_PER_SECOND / i128::from(H265_CLOCK_RATE);
    start_time_offset_us.saturating_add(scaled as i64)
}

/// Counters kept per stream.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DepayStats {
    pub packets: u64,
    pub samples: u64,
    pub key_frames: u64,
    pub nal_units: u64,
    /// Continuation fragments dropped for a sequence gap.
    pub sequence_gaps: u64,
    /// Continuation fragments dropped because no NAL unit was in progress.
    pub orphan_fragments: u64,
}

/// What a packet handler did with its packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Handled {
    Emitted,
    Dropped,
}

/// Mutable session state carried between packets.
#[derive(Debug, Default)]
struct Reassembler {
    previous_sequence_number: Option<u16>,
    first_received_timestamp: Option<u64>,
    start_time_offset_us: i64,
    /// Bytes handed to the sink for the sample in progress, saturating at
    /// `u32::MAX`.
    fragmented_sample_size_bytes: u32,
    pending_buffer_flags: BufferFlags,
    fragment_in_progress: bool,
    /// Rebuilt NAL header + first fragment of a FU.
    scratch: Vec<u8>,
}

impl Reassembler {
    fn write_start_code<S: TrackSink>(&mut self, sink: &mut S) -> Result<()> {
        self.write_nal_bytes(sink, &NAL_START_CODE)
    }

    fn write_nal_bytes<S: TrackSink>(&mut self, sink: &mut S, bytes: &[u8]) -> Result<()> {
        sink.append_bytes(bytes)?;
        let len = u32::try_from(bytes.len()).unwrap_or(u32::MAX);
        self.fragmented_sample_size_bytes = self.fragmented_sample_size_bytes.saturating_add(len);
        Ok(())
    }

    /// Single NAL unit packet (RFC 7798 §4.4.1).
    ///
    /// ```text
    ///  0                   1                   2                   3
    ///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    /// |           PayloadHdr          |                               |
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+                               |
    /// |                  NAL unit payload data                        |
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    /// ```
    fn single_nal_unit<S: TrackSink>(
        &mut self,
        sink: &mut S,
        payload: &[u8],
    ) -> Result<Handled> {
        let header = NalHeader::parse(payload)?;

        self.write_start_code(sink)?;
        self.write_nal_bytes(sink, payload)?;
        self.pending_buffer_flags = nal::buffer_flags_from_nal_type(header.nal_type);
        self.fragment_in_progress = false;
        Ok(Handled::Emitted)
    }

    /// Aggregation packet (RFC 7798 §4.4.2), without DONL/DOND.
    ///
    /// ```text
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    /// |    PayloadHdr (Type=48)       |           NALU 1 Size         |
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    /// |          NALU 1 HDR           |                               |
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+         NALU 1 Data           |
    /// |                   . . .                                       |
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    /// |  . . .                        |           NALU 2 Size         |
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    /// ```
    ///
    /// All units are validated before the first byte reaches the sink.
    fn aggregation_packet<S: TrackSink>(
        &mut self,
        sink: &mut S,
        payload: &[u8],
        mode: AggregationMode,
    ) -> Result<(Handled, usize)> {
        if mode == AggregationMode::Reject {
            return Err(DepayError::UnsupportedPacketMode("aggregation packets"));
        }

        let mut cursor = ByteCursor::new(payload);
        cursor.skip(NAL_HEADER_SIZE)?;

        let mut units = Vec::new();
        while cursor.remaining() > 0 {
            let size = cursor.read_u16()? as usize;
            if size == 0 {
                return Err(DepayError::MalformedPayload {
                    kind: MalformedKind::EmptyAggregationUnit,
                });
            }
            units.push(cursor.read_bytes(size)?);
        }
        if units.is_empty() {
            return Err(DepayError::MalformedPayload {
                kind: MalformedKind::EmptyAggregationPacket,
            });
        }

        let mut flags = BufferFlags::empty();
        for unit in &units {
            self.write_start_code(sink)?;
            self.write_nal_bytes(sink, unit)?;
            flags |= nal::buffer_flags_from_nal_type(nal::nal_type_of(unit[0]));
        }
        self.pending_buffer_flags = flags;
        self.fragment_in_progress = false;
        Ok((Handled::Emitted, units.len()))
    }

    /// Fragmentation unit (RFC 7798 §4.4.3).
    ///
    /// ```text
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    /// |    PayloadHdr (Type=49)       |   FU header   |               |
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+               |
    /// |                         FU payload                            |
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    ///
    /// FU header
    /// +---------------+
    /// |0|1|2|3|4|5|6|7|
    /// +-+-+-+-+-+-+-+-+
    /// |S|E|  FuType   |
    /// +---------------+
    /// ```
    fn fragmentation_unit<S: TrackSink>(
        &mut self,
        sink: &mut S,
        payload: &[u8],
        sequence_number: u16,
        drop_orphans: bool,
        stats: &mut DepayStats,
    ) -> Result<Handled> {
        let mut cursor = ByteCursor::new(payload);
        let payload_hdr = NalHeader::read(&mut cursor)?;
        let is_first = cursor.read_flag()?;
        let is_last = cursor.read_flag()?;
        let nal_unit_type = cursor.read_bits(6)? as u8;
        let fragment = cursor.rest();

        if is_first {
            if self.fragment_in_progress {
                tracing::warn!(
                    seq = sequence_number,
                    "FU start received before the previous NAL unit ended"
                );
            }

            self.scratch.clear();
            self.scratch
                .extend_from_slice(&NalHeader::new(nal_unit_type, payload_hdr.tid).to_bytes());
            self.scratch.extend_from_slice(fragment);

            self.write_start_code(sink)?;
            let unit = std::mem::take(&mut self.scratch);
            let written = self.write_nal_bytes(sink, &unit);
            self.scratch = unit;
            written?;

            self.fragment_in_progress = true;
            stats.nal_units += 1;
        } else {
            let expected = self.previous_sequence_number.map(|p| p.wrapping_add(1));
            if expected != Some(sequence_number) {
                tracing::warn!(
                    expected = ?expected,
                    received = sequence_number,
                    "RTP packet with unexpected sequence number, dropping packet"
                );
                stats.sequence_gaps += 1;
                return Ok(Handled::Dropped);
            }
            if drop_orphans && !self.fragment_in_progress {
                tracing::warn!(
                    seq = sequence_number,
                    nal_unit_type,
                    "FU continuation without a start fragment, dropping packet"
                );
                stats.orphan_fragments += 1;
                return Ok(Handled::Dropped);
            }

            self.write_nal_bytes(sink, fragment)?;
        }

        if is_last {
            self.pending_buffer_flags = nal::buffer_flags_from_nal_type(nal_unit_type);
            self.fragment_in_progress = false;
        }
        Ok(Handled::Emitted)
    }
}

/// Reassembles an H.265 Annex B stream from RTP packets of one stream.
///
/// Usage:
///
/// 1. [`create_track`](Self::create_track) with the sink that receives the
///    bitstream.
/// 2. [`consume`](Self::consume) every packet in sequence order.
/// 3. [`seek`](Self::seek) when the upstream playback position jumps.
///
/// Not thread-safe; the caller serializes all calls.
#[derive(Debug)]
pub struct Depacketizer<S: TrackSink> {
    format: PayloadFormat,
    config: DepacketizerConfig,
    sink: Option<S>,
    state: Reassembler,
    stats: DepayStats,
}

impl<S: TrackSink> Depacketizer<S> {
    pub fn new(format: PayloadFormat) -> Self {
        Self::with_config(format, DepacketizerConfig::default())
    }

    pub fn with_config(format: PayloadFormat, config: DepacketizerConfig) -> Self {
        Self {
            format,
            config,
            sink: None,
            state: Reassembler::default(),
            stats: DepayStats::default(),
        }
    }

    /// Attach the downstream video track and hand it the track format.
    ///
    /// Must be called before [`consume`](Self::consume). Calling it again
    /// replaces the previous sink.
    pub fn create_track(&mut self, mut sink: S) -> Result<()> {
        sink.format(&self.format.track_format())?;
        tracing::debug!(
            pt = self.format.payload_type,
            clock_rate = self.format.clock_rate,
            aggregation = ?self.config.aggregation_packets,
            "H.265 track created"
        );
        self.sink = Some(sink);
        Ok(())
    }

    /// Convenience wrapper around [`consume`](Self::consume) for callers that
    /// already demultiplexed the RTP header.
    pub fn consume_payload(
        &mut self,
        payload: &[u8],
        rtp_timestamp: u32,
        sequence_number: u16,
        marker: bool,
    ) -> Result<()> {
        self.consume(&RtpPacket::new(payload, rtp_timestamp, sequence_number, marker))
    }

    /// Process one RTP packet.
    ///
    /// A packet rejected as malformed or unsupported, or one whose bytes the
    /// sink refuses, leaves the depacketizer state as it was, sequence
    /// tracking and pending sample size included. Bytes the sink accepted
    /// before failing stay with the sink. A failing
    /// [`finalize_sample`](TrackSink::finalize_sample) comes after the packet
    /// was consumed, so sequence tracking has already advanced.
    ///
    /// A continuation fragment dropped for a sequence gap is not an error:
    /// its marker bit still closes the pending sample.
    pub fn consume(&mut self, packet: &RtpPacket<'_>) -> Result<()> {
        let kind = classify(packet.payload)?;
        let sink = self.sink.as_mut().ok_or(DepayError::TrackNotCreated)?;
        let state = &mut self.state;
        let stats = &mut self.stats;
        let size_before = state.fragmented_sample_size_bytes;

        let outcome = match kind {
            PacketKind::SingleNalUnit(_) => {
                state.single_nal_unit(sink, packet.payload).map(|handled| {
                    stats.nal_units += 1;
                    handled
                })
            }
            PacketKind::AggregationPacket => state
                .aggregation_packet(sink, packet.payload, self.config.aggregation_packets)
                .map(|(handled, units)| {
                    stats.nal_units += units as u64;
                    handled
                }),
            PacketKind::FragmentationUnit => state.fragmentation_unit(
                sink,
                packet.payload,
                packet.sequence_number,
                self.config.drop_orphan_fragments,
                stats,
            ),
        };
        let handled = match outcome {
            Ok(handled) => handled,
            Err(e) => {
                state.fragmented_sample_size_bytes = size_before;
                return Err(e);
            }
        };
        stats.packets += 1;
        state.previous_sequence_number = Some(packet.sequence_number);

        if packet.marker {
            let first = *state
                .first_received_timestamp
                .get_or_insert(u64::from(packet.timestamp));
            let time_us = to_sample_us(
                state.start_time_offset_us,
                u64::from(packet.timestamp),
                first,
            );
            let flags = state.pending_buffer_flags;
            let size = state.fragmented_sample_size_bytes;

            sink.finalize_sample(time_us, flags, size)?;
            state.fragmented_sample_size_bytes = 0;

            stats.samples += 1;
            if flags.is_key_frame() {
                stats.key_frames += 1;
            }
            tracing::trace!(
                seq = packet.sequence_number,
                time_us,
                size,
                key = flags.is_key_frame(),
                dropped = handled == Handled::Dropped,
                "sample finalized"
            );
        }

        Ok(())
    }

    /// Re-anchor time translation: the packet carrying `next_rtp_timestamp`
    /// maps to `time_us`. Discards the partially written sample.
    ///
    /// Sequence number tracking survives the seek, so a continuation fragment
    /// straddling it is still checked against the last packet seen.
    pub fn seek(&mut self, next_rtp_timestamp: u32, time_us: i64) {
        self.state.first_received_timestamp = Some(u64::from(next_rtp_timestamp));
        self.state.fragmented_sample_size_bytes = 0;
        self.state.start_time_offset_us = time_us;
        self.state.fragment_in_progress = false;
        tracing::debug!(next_rtp_timestamp, time_us, "depacketizer seek");
    }

    pub fn format(&self) -> &PayloadFormat {
        &self.format
    }

    pub fn config(&self) -> &DepacketizerConfig {
        &self.config
    }

    pub fn stats(&self) -> &DepayStats {
        &self.stats
    }

    pub fn sink(&self) -> Option<&S> {
        self.sink.as_ref()
    }

    pub fn sink_mut(&mut self) -> Option<&mut S> {
        self.sink.as_mut()
    }

    pub fn into_sink(self) -> Option<S> {
        self.sink
    }

    /// Sequence number of the last successfully processed packet.
    pub fn previous_sequence_number(&self) -> Option<u16> {
        self.state.previous_sequence_number
    }

    /// RTP timestamp that maps to the current start time offset.
    pub fn first_received_timestamp(&self) -> Option<u64> {
        self.state.first_received_timestamp
    }

    /// Bytes written for the sample not yet finalized.
    pub fn pending_sample_size(&self) -> u32 {
        self.state.fragmented_sample_size_bytes
    }

    pub fn pending_buffer_flags(&self) -> BufferFlags {
        self.state.pending_buffer_flags
    }

    pub fn fragment_in_progress(&self) -> bool {
        self.state.fragment_in_progress
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::sink::MemorySink;

    #[test]
    fn classify_ranges() {
        assert_eq!(classify(&[0x00]).unwrap(), PacketKind::SingleNalUnit(0));
        assert_eq!(classify(&[0x40, 0x01]).unwrap(), PacketKind::SingleNalUnit(32));
        assert_eq!(classify(&[0x5E]).unwrap(), PacketKind::SingleNalUnit(47));
        assert_eq!(classify(&[0x60]).unwrap(), PacketKind::AggregationPacket);
        assert_eq!(classify(&[0x62]).unwrap(), PacketKind::FragmentationUnit);
    }

    #[test]
    fn classify_rejects_paci_and_reserved() {
        for t in 50u8..64 {
            let err = classify(&[t << 1]).unwrap_err();
            assert!(
                matches!(err, DepayError::UnsupportedPacketizationType(v) if v == t),
                "type {t}"
            );
        }
    }

    #[test]
    fn classify_empty_is_malformed() {
        assert!(matches!(
            classify(&[]),
            Err(DepayError::MalformedPayload { .. })
        ));
    }

    #[test]
    fn sample_time_scaling() {
        assert_eq!(to_sample_us(0, 90_000, 0), 1_000_000);
        assert_eq!(to_sample_us(500, 93_000, 90_000), 500 + 33_333);
        assert_eq!(to_sample_us(0, 0, 90_000), -1_000_000);
        // Near the top of the 32-bit range.
        assert_eq!(
            to_sample_us(0, u64::from(u32::MAX), 0),
            u32::MAX as i64 * 1_000_000 / 90_000
        );
    }

    #[test]
    fn fu_start_uses_scratch_without_touching_input() {
        let mut state = Reassembler::default();
        let mut sink = MemorySink::new();
        let mut stats = DepayStats::default();
        let payload = [0x62, 0x01, 0x80 | 32, 0xAA, 0xBB];
        let before = payload;

        state
            .fragmentation_unit(&mut sink, &payload, 7, true, &mut stats)
            .unwrap();

        assert_eq!(payload, before);
        assert_eq!(sink.data, vec![0, 0, 0, 1, 0x40, 0x01, 0xAA, 0xBB]);
        assert_eq!(state.fragmented_sample_size_bytes, 8);
        assert!(state.fragment_in_progress);
        assert_eq!(stats.nal_units, 1);
    }

    #[test]
    fn continuation_with_unset_sequence_is_dropped() {
        let mut state = Reassembler {
            fragment_in_progress: true,
            ..Default::default()
        };
        let mut sink = MemorySink::new();
        let mut stats = DepayStats::default();

        let handled = state
            .fragmentation_unit(&mut sink, &[0x62, 0x01, 0x40 | 1, 0xCC], 0, true, &mut stats)
            .unwrap();

        assert_eq!(handled, Handled::Dropped);
        assert!(sink.data.is_empty());
        assert_eq!(stats.sequence_gaps, 1);
    }

    #[test]
    fn size_saturates_at_u32_max() {
        let mut state = Reassembler {
            fragmented_sample_size_bytes: u32::MAX - 5,
            ..Default::default()
        };
        let mut sink = MemorySink::new();
        state
            .single_nal_unit(&mut sink, &[0x02, 0x01, 0xAA, 0xBB])
            .unwrap();
        assert_eq!(state.fragmented_sample_size_bytes, u32::MAX);
    }

    #[test]
    fn fu_header_bits_come_from_third_byte() {
        let mut state = Reassembler::default();
        let mut sink = MemorySink::new();
        let mut stats = DepayStats::default();
        // PayloadHdr TID 3, FU header S=1 E=1 type 20
        state
            .fragmentation_unit(&mut sink, &[0x62, 0x03, 0xC0 | 20, 0x7F], 1, true, &mut stats)
            .unwrap();
        assert_eq!(sink.data, vec![0, 0, 0, 1, 0x28, 0x03, 0x7F]);
        assert!(state.pending_buffer_flags.is_key_frame());
        assert!(!state.fragment_in_progress);
    }

    #[test]
    fn aggregation_rejected_by_default_mode() {
        let mut state = Reassembler::default();
        let mut sink = MemorySink::new();
        let err = state
            .aggregation_packet(&mut sink, &[0x60, 0x01, 0x00, 0x02, 0x40, 0x01], AggregationMode::Reject)
            .unwrap_err();
        assert!(matches!(err, DepayError::UnsupportedPacketMode(_)));
        assert!(sink.data.is_empty());
    }
}

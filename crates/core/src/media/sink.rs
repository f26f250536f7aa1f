//! Downstream consumers of reconstructed Annex B bytes.
//!
//! A [`TrackSink`] receives, in stream order:
//!
//! 1. [`format`](TrackSink::format) once, when the track is created.
//! 2. [`append_bytes`](TrackSink::append_bytes) zero or more times per RTP
//!    packet: start codes and NAL unit bytes, exactly as they must appear in
//!    the elementary stream.
//! 3. [`finalize_sample`](TrackSink::finalize_sample) once per marker-bit
//!    packet, after that packet's bytes. `size` counts every byte appended
//!    since the previous sample, start codes included.

use std::io::Write;

use bitflags::bitflags;

use crate::error::Result;

bitflags! {
    /// Per-sample flags handed to [`TrackSink::finalize_sample`].
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferFlags: u32 {
        /// Sample starts with an IDR picture.
        const KEY_FRAME = 1;
    }
}

impl BufferFlags {
    pub const fn is_key_frame(self) -> bool {
        self.contains(Self::KEY_FRAME)
    }
}

/// Description of the video track handed to the sink on creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackFormat {
    /// Always `video/hevc`.
    pub mime_type: &'static str,
    pub payload_type: u8,
    pub clock_rate: u32,
    pub vps: Option<Vec<u8>>,
    pub sps: Option<Vec<u8>>,
    pub pps: Option<Vec<u8>>,
}

impl TrackFormat {
    /// Parameter sets known out of band, in VPS/SPS/PPS order.
    pub fn parameter_sets(&self) -> impl Iterator<Item = &[u8]> {
        [&self.vps, &self.sps, &self.pps]
            .into_iter()
            .filter_map(|p| p.as_deref())
    }
}

/// Consumer of depacketized H.265 data.
pub trait TrackSink {
    /// Receive the track format. Called once by
    /// [`Depacketizer::create_track`](crate::Depacketizer::create_track).
    fn format(&mut self, format: &TrackFormat) -> Result<()>;

    /// Append raw bytes to the pending sample.
    fn append_bytes(&mut self, buf: &[u8]) -> Result<()>;

    /// Close the pending sample.
    fn finalize_sample(&mut self, time_us: i64, flags: BufferFlags, size: u32) -> Result<()>;
}

impl<S: TrackSink + ?Sized> TrackSink for &mut S {
    fn format(&mut self, format: &TrackFormat) -> Result<()> {
        (**self).format(format)
    }

    fn append_bytes(&mut self, buf: &[u8]) -> Result<()> {
        (**self).append_bytes(buf)
    }

    fn finalize_sample(&mut self, time_us: i64, flags: BufferFlags, size: u32) -> Result<()> {
        (**self).finalize_sample(time_us, flags, size)
    }
}

/// A finalized sample recorded by [`MemorySink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub time_us: i64,
    pub flags: BufferFlags,
    pub size: u32,
    /// Offset of the sample's first byte in [`MemorySink::data`].
    pub offset: usize,
}

/// Sink that keeps everything in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub format: Option<TrackFormat>,
    pub data: Vec<u8>,
    pub samples: Vec<Sample>,
    /// Number of `append_bytes` calls.
    pub appends: usize,
    sample_start: usize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes of a recorded sample, as advertised by its `size`.
    pub fn sample_data(&self, sample: &Sample) -> &[u8] {
        let end = (sample.offset + sample.size as usize).min(self.data.len());
        &self.data[sample.offset.min(end)..end]
    }

    /// Bytes appended since the last finalized sample.
    pub fn pending(&self) -> &[u8] {
        &self.data[self.sample_start..]
    }
}

impl TrackSink for MemorySink {
    fn format(&mut self, format: &TrackFormat) -> Result<()> {
        self.format = Some(format.clone());
        Ok(())
    }

    fn append_bytes(&mut self, buf: &[u8]) -> Result<()> {
        self.data.extend_from_slice(buf);
        self.appends += 1;
        Ok(())
    }

    fn finalize_sample(&mut self, time_us: i64, flags: BufferFlags, size: u32) -> Result<()> {
        self.samples.push(Sample {
            time_us,
            flags,
            size,
            offset: self.data.len().saturating_sub(size as usize),
        });
        self.sample_start = self.data.len();
        Ok(())
    }
}

/// Sink that streams the Annex B bitstream into a writer (e.g. a `.h265` file).
///
/// Out-of-band parameter sets from the track format are written first, each
/// behind a start code, so the output decodes from the first key frame.
#[derive(Debug)]
pub struct AnnexBWriter<W: Write> {
    writer: W,
    bytes_written: u64,
    samples: u64,
    key_frames: u64,
}

impl<W: Write> AnnexBWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            bytes_written: 0,
            samples: 0,
            key_frames: 0,
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn key_frames(&self) -> u64 {
        self.key_frames
    }

    /// Flush and return the underlying writer.
    pub fn into_inner(mut self) -> Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }

    fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.writer.write_all(buf)?;
        self.bytes_written += buf.len() as u64;
        Ok(())
    }
}

impl<W: Write> TrackSink for AnnexBWriter<W> {
    fn format(&mut self, format: &TrackFormat) -> Result<()> {
        for nal in format.parameter_sets() {
            self.write(&super::nal::NAL_START_CODE)?;
            self.write(nal)?;
        }
        tracing::debug!(
            mime = format.mime_type,
            pt = format.payload_type,
            header_bytes = self.bytes_written,
            "Annex B output initialized"
        );
        Ok(())
    }

    fn append_bytes(&mut self, buf: &[u8]) -> Result<()> {
        self.write(buf)
    }

    fn finalize_sample(&mut self, time_us: i64, flags: BufferFlags, size: u32) -> Result<()> {
        self.samples += 1;
        if flags.is_key_frame() {
            self.key_frames += 1;
        }
        tracing::trace!(time_us, size, key = flags.is_key_frame(), "sample written");
        Ok(())
    }
}

//! Reader for the rtptools `rtpdump` capture format.
//!
//! ```text
//! #!rtpplay1.0 address/port\n
//! +--------------------------------+
//! | start.tv_sec   (u32)           |  file header, 16 bytes
//! | start.tv_usec  (u32)           |
//! | source         (u32)           |
//! | port (u16)     | padding (u16) |
//! +--------------------------------+
//! | length (u16)   | plen (u16)    |  per packet, 8 bytes
//! | offset ms (u32)                |
//! +--------------------------------+
//! | packet bytes (length - 8)      |
//! +--------------------------------+
//! ```
//!
//! `plen == 0` marks an RTCP record; those are skipped. All integers are
//! big-endian.

use std::io::{self, BufRead, Read};

use crate::error::{DepayError, Result};
use crate::media::cursor::ByteCursor;

const MAGIC: &str = "#!rtpplay1.0 ";
const FILE_HEADER_SIZE: usize = 16;
const RECORD_HEADER_SIZE: usize = 8;

/// Capture-level metadata from the file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpDumpHeader {
    /// `address/port` text from the preamble line.
    pub source: String,
    pub start_sec: u32,
    pub start_usec: u32,
}

/// One captured RTP packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpDumpRecord {
    /// Milliseconds since the start of the capture.
    pub offset_ms: u32,
    /// Complete RTP packet, header included.
    pub data: Vec<u8>,
}

/// Streaming rtpdump reader, yielding RTP records in file order.
///
/// Needs [`BufRead`] to find the end of the text preamble line.
#[derive(Debug)]
pub struct RtpDumpReader<R: BufRead> {
    reader: R,
    header: RtpDumpHeader,
}

impl<R: BufRead> RtpDumpReader<R> {
    /// Read and validate the preamble and file header.
    pub fn new(mut reader: R) -> Result<Self> {
        let mut line = Vec::new();
        reader.read_until(b'\n', &mut line)?;
        let line = String::from_utf8_lossy(&line);
        let source = line
            .strip_prefix(MAGIC)
            .ok_or_else(|| DepayError::InvalidCapture("missing #!rtpplay1.0 preamble".into()))?
            .trim_end()
            .to_string();

        let mut buf = [0u8; FILE_HEADER_SIZE];
        reader.read_exact(&mut buf).map_err(|e| truncated(e, "file header"))?;

        let mut fields = ByteCursor::new(&buf);
        let header = RtpDumpHeader {
            source,
            start_sec: fields.read_u32()?,
            start_usec: fields.read_u32()?,
        };
        tracing::debug!(source = %header.source, "rtpdump capture opened");

        Ok(Self { reader, header })
    }

    pub fn header(&self) -> &RtpDumpHeader {
        &self.header
    }

    /// Next RTP record, or `None` at end of file.
    pub fn next_record(&mut self) -> Result<Option<RtpDumpRecord>> {
        loop {
            let mut hdr = [0u8; RECORD_HEADER_SIZE];
            if !read_exact_or_eof(&mut self.reader, &mut hdr)? {
                return Ok(None);
            }

            let mut fields = ByteCursor::new(&hdr);
            let length = usize::from(fields.read_u16()?);
            let plen = fields.read_u16()?;
            let offset_ms = fields.read_u32()?;

            if length < RECORD_HEADER_SIZE {
                return Err(DepayError::InvalidCapture(format!(
                    "record length {length} shorter than its header"
                )));
            }

            let mut data = vec![0u8; length - RECORD_HEADER_SIZE];
            self.reader
                .read_exact(&mut data)
                .map_err(|e| truncated(e, "record body"))?;

            if plen == 0 {
                tracing::trace!(offset_ms, "skipping RTCP record");
                continue;
            }
            return Ok(Some(RtpDumpRecord { offset_ms, data }));
        }
    }
}

impl<R: BufRead> Iterator for RtpDumpReader<R> {
    type Item = Result<RtpDumpRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

fn truncated(e: io::Error, what: &str) -> DepayError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        DepayError::InvalidCapture(format!("truncated {what}"))
    } else {
        DepayError::Io(e)
    }
}

/// `Ok(false)` on a clean EOF before the first byte.
fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => return Err(DepayError::InvalidCapture("truncated record header".into())),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn write_rtpdump<'a>(
        source: &str,
        records: impl IntoIterator<Item = (u32, &'a [u8])>,
    ) -> Vec<u8> {
        let mut out = format!("{MAGIC}{source}\n").into_bytes();
        out.extend_from_slice(&[0u8; FILE_HEADER_SIZE]);
        for (offset_ms, packet) in records {
            let length = u16::try_from(packet.len() + RECORD_HEADER_SIZE)
                .expect("packet fits the 16-bit record length");
            out.extend_from_slice(&length.to_be_bytes());
            out.extend_from_slice(&(length - RECORD_HEADER_SIZE as u16).to_be_bytes());
            out.extend_from_slice(&offset_ms.to_be_bytes());
            out.extend_from_slice(packet);
        }
        out
    }

    #[test]
    fn reads_records_in_order() {
        let file = write_rtpdump(
            "127.0.0.1/5004",
            [(0, &[0x80u8, 0x60][..]), (40, &[0x80, 0xE0][..])],
        );
        let mut reader = RtpDumpReader::new(Cursor::new(file)).unwrap();
        assert_eq!(reader.header().source, "127.0.0.1/5004");

        let first = reader.next_record().unwrap().unwrap();
        assert_eq!(first.offset_ms, 0);
        assert_eq!(first.data, vec![0x80, 0x60]);
        let second = reader.next_record().unwrap().unwrap();
        assert_eq!(second.offset_ms, 40);
        assert!(reader.next_record().unwrap().is_none());
    }

    #[test]
    fn skips_rtcp_records() {
        let mut file = write_rtpdump("h/1", std::iter::empty::<(u32, &[u8])>());
        let preamble_len = file.len();
        // RTCP record: plen = 0
        file.extend_from_slice(&[0x00, 0x0A, 0x00, 0x00, 0, 0, 0, 5, 0x81, 0xC8]);
        file.extend_from_slice(&write_rtpdump("h/1", [(9, &[0x80u8][..])])[preamble_len..]);
        let records: Vec<_> = RtpDumpReader::new(Cursor::new(file))
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].offset_ms, 9);
    }

    #[test]
    fn reads_capture_start_time() {
        let mut file = b"#!rtpplay1.0 10.0.0.1/6000\n".to_vec();
        file.extend_from_slice(&[0x5F, 0x00, 0x00, 0x01, 0x00, 0x07, 0xA1, 0x20]);
        file.extend_from_slice(&[0x0A, 0x00, 0x00, 0x01, 0x17, 0x70, 0x00, 0x00]);
        let reader = RtpDumpReader::new(Cursor::new(file)).unwrap();
        assert_eq!(reader.header().source, "10.0.0.1/6000");
        assert_eq!(reader.header().start_sec, 0x5F00_0001);
        assert_eq!(reader.header().start_usec, 500_000);
    }

    #[test]
    fn rejects_record_shorter_than_its_header() {
        let mut file = write_rtpdump("h/1", std::iter::empty::<(u32, &[u8])>());
        file.extend_from_slice(&[0x00, 0x04, 0x00, 0x01, 0, 0, 0, 0]);
        let mut reader = RtpDumpReader::new(Cursor::new(file)).unwrap();
        assert!(matches!(
            reader.next_record(),
            Err(DepayError::InvalidCapture(_))
        ));
    }

    #[test]
    fn rejects_missing_preamble() {
        let err = RtpDumpReader::new(Cursor::new(b"hello\n".to_vec())).unwrap_err();
        assert!(matches!(err, DepayError::InvalidCapture(_)));
    }

    #[test]
    fn rejects_truncated_record() {
        let mut file = write_rtpdump("h/1", [(0, &[0x80u8, 0x60, 0x00][..])]);
        file.pop();
        let mut reader = RtpDumpReader::new(Cursor::new(file)).unwrap();
        assert!(matches!(
            reader.next_record(),
            Err(DepayError::InvalidCapture(_))
        ));
    }
}

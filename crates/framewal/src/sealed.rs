//! Reading sealed journal files back, record by record.

use crate::format::{read_header, FileHeader, RecordHeader, RECORD_HEADER_BYTES};
use crate::JournalError;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// One decoded journal record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub ts_ns: u64,
    pub logical_idx: u64,
    pub payload: Vec<u8>,
}

/// Sequential reader over a journal file's records.
///
/// A short read of a record header or payload is treated as clean EOF: a
/// crash may truncate the tail record, and everything before it is intact.
pub struct SealedReader {
    reader: BufReader<File>,
    header: FileHeader,
    frame_bytes: usize,
}

impl SealedReader {
    /// Opens the file and parses its header.
    pub fn open(path: &Path) -> Result<Self, JournalError> {
        let mut reader = BufReader::new(File::open(path)?);
        let header = read_header(&mut reader)?;
        let frame_bytes = header.meta.frame_bytes()?;
        Ok(Self {
            reader,
            header,
            frame_bytes,
        })
    }

    /// The parsed file header (raw bytes preserved for truncation).
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Record payload size for this file.
    pub fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }

    /// Reads the next whole record; `None` at EOF or a truncated tail.
    pub fn next_record(&mut self) -> Result<Option<Record>, JournalError> {
        let mut head = [0u8; RECORD_HEADER_BYTES];
        if !read_full(&mut self.reader, &mut head)? {
            return Ok(None);
        }
        let rec = RecordHeader::decode(&head);

        let mut payload = vec![0u8; self.frame_bytes];
        if !read_full(&mut self.reader, &mut payload)? {
            return Ok(None);
        }

        Ok(Some(Record {
            ts_ns: rec.ts_ns,
            logical_idx: rec.logical_idx,
            payload,
        }))
    }

    /// Drains all remaining whole records.
    pub fn read_all(&mut self) -> Result<Vec<Record>, JournalError> {
        let mut records = Vec::new();
        while let Some(record) = self.next_record()? {
            records.push(record);
        }
        Ok(records)
    }
}

/// Fills `buf` completely, or reports a clean short read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<bool, JournalError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            return Ok(false);
        }
        filled += n;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::encode_header;
    use crate::StreamMeta;
    use framering::{Dtype, FrameLayout, FrameShape};
    use std::io::Write;
    use tempfile::TempDir;

    fn meta() -> StreamMeta {
        StreamMeta::new(
            "/test_ring",
            &FrameLayout::new(
                FrameShape::Line {
                    samples: 2,
                    channels: 2,
                },
                Dtype::U8,
            ),
        )
    }

    fn write_journal(dir: &TempDir, records: &[(u64, u64, [u8; 4])], cut_tail: usize) -> std::path::PathBuf {
        let path = dir.path().join("stream.bin");
        let mut bytes = encode_header(&meta()).unwrap();
        for (ts, idx, payload) in records {
            bytes.extend_from_slice(&RecordHeader {
                ts_ns: *ts,
                logical_idx: *idx,
            }
            .encode());
            bytes.extend_from_slice(payload);
        }
        bytes.truncate(bytes.len() - cut_tail);
        File::create(&path).unwrap().write_all(&bytes).unwrap();
        path
    }

    #[test]
    fn test_reads_records_in_order() {
        let dir = TempDir::new().unwrap();
        let path = write_journal(
            &dir,
            &[(10, 0, [1, 2, 3, 4]), (11, 1, [5, 6, 7, 8])],
            0,
        );
        let mut reader = SealedReader::open(&path).unwrap();
        let records = reader.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].logical_idx, 0);
        assert_eq!(records[0].ts_ns, 10);
        assert_eq!(records[1].payload, vec![5, 6, 7, 8]);
    }

    #[test]
    fn test_truncated_tail_is_clean_eof() {
        let dir = TempDir::new().unwrap();
        // Second record loses its last 3 payload bytes.
        let path = write_journal(
            &dir,
            &[(10, 0, [1, 2, 3, 4]), (11, 1, [5, 6, 7, 8])],
            3,
        );
        let mut reader = SealedReader::open(&path).unwrap();
        let records = reader.read_all().unwrap();
        assert_eq!(records.len(), 1);

        // Tail cut inside the record header reads the same way.
        let path = write_journal(&dir, &[(10, 0, [1, 2, 3, 4]), (11, 1, [5, 6, 7, 8])], 12);
        let mut reader = SealedReader::open(&path).unwrap();
        assert_eq!(reader.read_all().unwrap().len(), 1);
    }

    #[test]
    fn test_header_only_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let path = write_journal(&dir, &[], 0);
        let mut reader = SealedReader::open(&path).unwrap();
        assert!(reader.next_record().unwrap().is_none());
    }
}

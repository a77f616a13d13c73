//! On-disk journal format.
//!
//! ```text
//! magic        : 7 bytes = "SCBIN\0\0"
//! version      : u16 LE
//! metadata_len : u32 LE
//! metadata     : UTF-8 JSON, metadata_len bytes
//! records      : zero or more of
//!    timestamp_ns      : u64 LE
//!    frame_logical_idx : u64 LE
//!    payload           : frame_bytes bytes
//! ```
//!
//! Records carry no compression and no padding. A file truncated mid-record
//! is readable up to the last whole record.

use crate::{HeaderError, JournalError};
use framering::{DataMode, Dtype, FrameLayout, FrameShape};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Journal file magic.
pub const MAGIC: &[u8; 7] = b"SCBIN\0\0";

/// Current journal format version.
pub const FORMAT_VERSION: u16 = 1;

/// Fixed size of the per-record header.
pub const RECORD_HEADER_BYTES: usize = 16;

/// JSON metadata block describing the stream a journal file belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamMeta {
    pub ring_name: String,
    pub frame_shape: Vec<usize>,
    pub dtype: Dtype,
    pub data_mode: DataMode,
    pub version: u16,
}

impl StreamMeta {
    /// Describes the given ring layout.
    pub fn new(ring_name: impl Into<String>, layout: &FrameLayout) -> Self {
        Self {
            ring_name: ring_name.into(),
            frame_shape: layout.shape.dims(),
            dtype: layout.dtype,
            data_mode: layout.mode(),
            version: FORMAT_VERSION,
        }
    }

    /// Reconstructs the frame layout the metadata describes.
    pub fn layout(&self) -> Result<FrameLayout, HeaderError> {
        let shape = FrameShape::from_dims(self.data_mode, &self.frame_shape)?;
        Ok(FrameLayout::new(shape, self.dtype))
    }

    /// Wire bytes per record payload.
    pub fn frame_bytes(&self) -> Result<usize, HeaderError> {
        Ok(self.layout()?.frame_bytes())
    }
}

/// A parsed file header, keeping the raw bytes so truncation can restore
/// the file to its empty-with-header state verbatim.
#[derive(Debug, Clone)]
pub struct FileHeader {
    pub version: u16,
    pub meta: StreamMeta,
    /// The exact header bytes as read: magic, version, length, metadata.
    pub raw: Vec<u8>,
}

/// Serializes a header for a fresh journal file.
pub fn encode_header(meta: &StreamMeta) -> Result<Vec<u8>, JournalError> {
    let payload = serde_json::to_vec(meta).map_err(HeaderError::Metadata)?;
    let mut out = Vec::with_capacity(MAGIC.len() + 6 + payload.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Parses a header from the start of `reader`.
pub fn read_header<R: Read>(reader: &mut R) -> Result<FileHeader, JournalError> {
    let mut magic = [0u8; 7];
    read_exact_or(reader, &mut magic)?;
    if &magic != MAGIC {
        return Err(HeaderError::BadMagic.into());
    }

    let mut ver = [0u8; 2];
    read_exact_or(reader, &mut ver)?;
    let version = u16::from_le_bytes(ver);
    if version != FORMAT_VERSION {
        return Err(HeaderError::UnsupportedVersion(version).into());
    }

    let mut len = [0u8; 4];
    read_exact_or(reader, &mut len)?;
    let meta_len = u32::from_le_bytes(len) as usize;

    let mut payload = vec![0u8; meta_len];
    read_exact_or(reader, &mut payload)?;
    let meta: StreamMeta = serde_json::from_slice(&payload).map_err(HeaderError::Metadata)?;

    let mut raw = Vec::with_capacity(13 + meta_len);
    raw.extend_from_slice(&magic);
    raw.extend_from_slice(&ver);
    raw.extend_from_slice(&len);
    raw.extend_from_slice(&payload);

    Ok(FileHeader { version, meta, raw })
}

fn read_exact_or<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), JournalError> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            JournalError::Header(HeaderError::Truncated)
        } else {
            JournalError::Io(e)
        }
    })
}

/// Per-record fixed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub ts_ns: u64,
    pub logical_idx: u64,
}

impl RecordHeader {
    pub fn encode(&self) -> [u8; RECORD_HEADER_BYTES] {
        let mut out = [0u8; RECORD_HEADER_BYTES];
        out[..8].copy_from_slice(&self.ts_ns.to_le_bytes());
        out[8..].copy_from_slice(&self.logical_idx.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8; RECORD_HEADER_BYTES]) -> Self {
        let mut ts = [0u8; 8];
        let mut idx = [0u8; 8];
        ts.copy_from_slice(&bytes[..8]);
        idx.copy_from_slice(&bytes[8..]);
        Self {
            ts_ns: u64::from_le_bytes(ts),
            logical_idx: u64::from_le_bytes(idx),
        }
    }
}

/// Seal sentinel beside a journal file: `<path>.seal`, zero bytes.
/// Presence means the writer closed the file and the ingester may drain it.
pub fn seal_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".seal");
    PathBuf::from(name)
}

/// Restores a drained file to the empty-with-header state the writer
/// expects, rewriting the preserved header bytes verbatim.
pub fn truncate_to_header(path: &Path, raw_header: &[u8]) -> std::io::Result<()> {
    let mut file = std::fs::File::create(path)?;
    file.write_all(raw_header)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn meta() -> StreamMeta {
        StreamMeta::new(
            "/sensor_ring",
            &FrameLayout::new(
                FrameShape::Line {
                    samples: 4,
                    channels: 3,
                },
                Dtype::F32,
            ),
        )
    }

    #[test]
    fn test_header_roundtrip_preserves_raw_bytes() {
        let bytes = encode_header(&meta()).unwrap();
        let header = read_header(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(header.version, FORMAT_VERSION);
        assert_eq!(header.meta, meta());
        assert_eq!(header.raw, bytes);
    }

    #[test]
    fn test_metadata_spells_names_canonically() {
        let json = serde_json::to_value(meta()).unwrap();
        assert_eq!(json["dtype"], "float32");
        assert_eq!(json["data_mode"], "line");
        assert_eq!(json["frame_shape"], serde_json::json!([4, 3]));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = encode_header(&meta()).unwrap();
        bytes[0] = b'X';
        assert!(matches!(
            read_header(&mut Cursor::new(&bytes)),
            Err(JournalError::Header(HeaderError::BadMagic))
        ));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut bytes = encode_header(&meta()).unwrap();
        bytes[7..9].copy_from_slice(&7u16.to_le_bytes());
        assert!(matches!(
            read_header(&mut Cursor::new(&bytes)),
            Err(JournalError::Header(HeaderError::UnsupportedVersion(7)))
        ));
    }

    #[test]
    fn test_short_header_is_truncated() {
        let bytes = encode_header(&meta()).unwrap();
        assert!(matches!(
            read_header(&mut Cursor::new(&bytes[..9])),
            Err(JournalError::Header(HeaderError::Truncated))
        ));
    }

    #[test]
    fn test_record_header_layout() {
        let rec = RecordHeader {
            ts_ns: 0x0102_0304_0506_0708,
            logical_idx: 42,
        };
        let bytes = rec.encode();
        assert_eq!(&bytes[..8], &0x0102_0304_0506_0708u64.to_le_bytes());
        assert_eq!(RecordHeader::decode(&bytes), rec);
    }

    #[test]
    fn test_seal_path_appends_suffix() {
        assert_eq!(
            seal_path(Path::new("/tmp/stream_a.bin")),
            PathBuf::from("/tmp/stream_a.bin.seal")
        );
    }

    #[test]
    fn test_layout_roundtrip_promotes_image() {
        let meta = StreamMeta {
            ring_name: "/cam".into(),
            frame_shape: vec![2, 3],
            dtype: Dtype::U8,
            data_mode: DataMode::Image,
            version: FORMAT_VERSION,
        };
        let layout = meta.layout().unwrap();
        assert_eq!(
            layout.shape,
            FrameShape::Image {
                height: 2,
                width: 3,
                channels: 1
            }
        );
        assert_eq!(layout.frame_bytes(), 6);
    }
}

//! Error types for journal files and the dump loop.

use std::io;
use thiserror::Error;

/// A journal file header that cannot be trusted.
#[derive(Debug, Error)]
pub enum HeaderError {
    /// Leading bytes are not the journal magic.
    #[error("bad journal magic")]
    BadMagic,

    /// Format version this build does not understand.
    #[error("unsupported journal version {0}")]
    UnsupportedVersion(u16),

    /// File ends inside the header.
    #[error("truncated journal header")]
    Truncated,

    /// Metadata block is not the expected JSON.
    #[error("journal metadata is not valid JSON: {0}")]
    Metadata(#[from] serde_json::Error),

    /// Metadata does not describe a frame layout.
    #[error("journal metadata does not describe a frame layout: {0}")]
    Layout(#[from] framering::CodecError),
}

/// Errors of the journal writer, reader and dump loop.
#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Header(#[from] HeaderError),

    #[error("ring error while draining: {0}")]
    Ring(#[from] framering::RingError),
}

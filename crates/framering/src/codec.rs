//! Frame codec: bridges producer-natural array shapes and the ring's
//! canonical byte frame.
//!
//! Line frames are stored sample-major: element `(s, c)` of an
//! `(samples, channels)` frame lives at index `s * channels + c`. Image
//! frames are stored row-major `(height, width, channels)`. Both flatten to
//! exactly `frame_bytes` on the wire.

use crate::CodecError;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::ptr;

/// Frame layout family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataMode {
    /// `(samples, channels)` time-series frames.
    Line,
    /// `(height, width, channels)` image frames.
    Image,
}

impl fmt::Display for DataMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Line => f.write_str("line"),
            Self::Image => f.write_str("image"),
        }
    }
}

/// Element type of a frame, named the way the journal metadata spells it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dtype {
    #[serde(rename = "uint8")]
    U8,
    #[serde(rename = "uint16")]
    U16,
    #[serde(rename = "int16")]
    I16,
    #[serde(rename = "int32")]
    I32,
    #[serde(rename = "float32")]
    F32,
    #[serde(rename = "float64")]
    F64,
}

impl Dtype {
    /// Element size in bytes.
    #[inline]
    pub fn size(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::I32 | Self::F32 => 4,
            Self::F64 => 8,
        }
    }

    /// Canonical name (`"float32"`, `"uint8"`, ...).
    pub fn name(self) -> &'static str {
        match self {
            Self::U8 => "uint8",
            Self::U16 => "uint16",
            Self::I16 => "int16",
            Self::I32 => "int32",
            Self::F32 => "float32",
            Self::F64 => "float64",
        }
    }

    /// Parses a canonical name.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "uint8" => Some(Self::U8),
            "uint16" => Some(Self::U16),
            "int16" => Some(Self::I16),
            "int32" => Some(Self::I32),
            "float32" => Some(Self::F32),
            "float64" => Some(Self::F64),
            _ => None,
        }
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Rust element types a frame can be made of.
///
/// Sealed to fixed-width primitives: no padding, every bit pattern valid,
/// so frames can be reinterpreted as bytes and back.
pub trait Sample: sealed::Sealed + Copy + Send + Sync + 'static {
    /// The wire dtype this element maps to.
    const DTYPE: Dtype;
}

macro_rules! impl_sample {
    ($($ty:ty => $dtype:expr),* $(,)?) => {
        $(
            impl sealed::Sealed for $ty {}
            impl Sample for $ty {
                const DTYPE: Dtype = $dtype;
            }
        )*
    };
}

impl_sample! {
    u8 => Dtype::U8,
    u16 => Dtype::U16,
    i16 => Dtype::I16,
    i32 => Dtype::I32,
    f32 => Dtype::F32,
    f64 => Dtype::F64,
}

/// Reinterprets a sample slice as its wire bytes.
pub fn sample_bytes<T: Sample>(data: &[T]) -> &[u8] {
    // SAFETY: Sample types have no padding and size_of::<T>() * len bytes of
    // initialized storage; the returned slice borrows `data`.
    unsafe { std::slice::from_raw_parts(data.as_ptr().cast::<u8>(), std::mem::size_of_val(data)) }
}

/// Decodes wire bytes into owned samples; `None` when the length is not a
/// whole number of elements.
pub fn samples_from_bytes<T: Sample>(bytes: &[u8]) -> Option<Vec<T>> {
    if bytes.len() % std::mem::size_of::<T>() != 0 {
        return None;
    }
    let elems = bytes.len() / std::mem::size_of::<T>();
    let mut out: Vec<T> = Vec::with_capacity(elems);
    // SAFETY: the Vec allocation is T-aligned and sized for `elems` elements;
    // the byte copy fully initializes it, and any bit pattern is a valid T.
    unsafe {
        ptr::copy_nonoverlapping(bytes.as_ptr(), out.as_mut_ptr().cast::<u8>(), bytes.len());
        out.set_len(elems);
    }
    Some(out)
}

/// Logical shape of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameShape {
    Line { samples: usize, channels: usize },
    Image { height: usize, width: usize, channels: usize },
}

impl FrameShape {
    /// Builds a shape from a mode and a dimension list. A 2-D image shape
    /// `(H, W)` is promoted to `(H, W, 1)`.
    pub fn from_dims(mode: DataMode, dims: &[usize]) -> Result<Self, CodecError> {
        match (mode, dims) {
            (DataMode::Line, &[samples, channels]) => Ok(Self::Line { samples, channels }),
            (DataMode::Image, &[height, width]) => Ok(Self::Image {
                height,
                width,
                channels: 1,
            }),
            (DataMode::Image, &[height, width, channels]) => Ok(Self::Image {
                height,
                width,
                channels,
            }),
            _ => Err(CodecError::ShapeMismatch {
                expected: vec![],
                got: dims.to_vec(),
            }),
        }
    }

    /// Dimension list of the canonical layout.
    pub fn dims(&self) -> Vec<usize> {
        match *self {
            Self::Line { samples, channels } => vec![samples, channels],
            Self::Image {
                height,
                width,
                channels,
            } => vec![height, width, channels],
        }
    }

    /// Elements per frame.
    pub fn elems(&self) -> usize {
        self.dims().iter().product()
    }

    /// Channel count (last axis in both modes).
    pub fn channels(&self) -> usize {
        match *self {
            Self::Line { channels, .. } | Self::Image { channels, .. } => channels,
        }
    }

    /// Layout family of this shape.
    pub fn mode(&self) -> DataMode {
        match self {
            Self::Line { .. } => DataMode::Line,
            Self::Image { .. } => DataMode::Image,
        }
    }
}

/// Shape plus element type: everything needed to size and interpret a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    pub shape: FrameShape,
    pub dtype: Dtype,
}

impl FrameLayout {
    pub fn new(shape: FrameShape, dtype: Dtype) -> Self {
        Self { shape, dtype }
    }

    /// Elements per frame.
    #[inline]
    pub fn frame_elems(&self) -> usize {
        self.shape.elems()
    }

    /// Wire bytes per frame; constant for the ring's lifetime.
    #[inline]
    pub fn frame_bytes(&self) -> usize {
        self.frame_elems() * self.dtype.size()
    }

    #[inline]
    pub fn mode(&self) -> DataMode {
        self.shape.mode()
    }
}

/// Validates and reshapes producer arrays before publish, and types byte
/// windows on read.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    layout: FrameLayout,
}

impl FrameCodec {
    pub fn new(layout: FrameLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &FrameLayout {
        &self.layout
    }

    fn check_dtype<T: Sample>(&self) -> Result<(), CodecError> {
        if T::DTYPE != self.layout.dtype {
            return Err(CodecError::DtypeMismatch {
                expected: self.layout.dtype,
                got: T::DTYPE,
            });
        }
        Ok(())
    }

    fn line_dims(&self) -> Result<(usize, usize), CodecError> {
        match self.layout.shape {
            FrameShape::Line { samples, channels } => Ok((samples, channels)),
            FrameShape::Image { .. } => Err(CodecError::ShapeMismatch {
                expected: self.layout.shape.dims(),
                got: vec![],
            }),
        }
    }

    /// Normalizes one 2-D line array to canonical frame bytes.
    ///
    /// Accepts `(samples, channels)` or `(channels, samples)`; the axis
    /// matching the configured channel count is taken as the channel axis,
    /// and a square array resolves as already canonical. The borrow is
    /// zero-copy when no transpose is needed.
    pub fn encode_line<'a, T: Sample>(
        &self,
        data: &'a [T],
        shape: (usize, usize),
    ) -> Result<Cow<'a, [u8]>, CodecError> {
        self.check_dtype::<T>()?;
        let (samples, channels) = self.line_dims()?;
        let (rows, cols) = shape;
        if data.len() != rows * cols {
            return Err(CodecError::ShapeMismatch {
                expected: vec![rows, cols],
                got: vec![data.len()],
            });
        }
        if (rows, cols) == (samples, channels) {
            return Ok(Cow::Borrowed(sample_bytes(data)));
        }
        if (rows, cols) == (channels, samples) {
            // Channel-major input: transpose to sample-major.
            let mut out: Vec<T> = Vec::with_capacity(data.len());
            for s in 0..samples {
                for c in 0..channels {
                    out.push(data[c * samples + s]);
                }
            }
            return Ok(Cow::Owned(sample_bytes(&out).to_vec()));
        }
        Err(CodecError::ShapeMismatch {
            expected: vec![samples, channels],
            got: vec![rows, cols],
        })
    }

    /// Normalizes a `(batch, samples, channels)` block to the bytes of
    /// `batch` sequential frames.
    pub fn encode_line_batch<'a, T: Sample>(
        &self,
        data: &'a [T],
        shape: (usize, usize, usize),
    ) -> Result<Cow<'a, [u8]>, CodecError> {
        self.check_dtype::<T>()?;
        let (samples, channels) = self.line_dims()?;
        let (batch, rows, cols) = shape;
        if (rows, cols) != (samples, channels) || data.len() != batch * rows * cols {
            return Err(CodecError::ShapeMismatch {
                expected: vec![samples, channels],
                got: vec![batch, rows, cols],
            });
        }
        Ok(Cow::Borrowed(sample_bytes(data)))
    }

    /// Normalizes an image block to frame bytes.
    ///
    /// Accepts `(H, W)` (promoted to one channel), `(H, W, C)`, or a batch
    /// `(B, H, W, C)`; image bytes are always already canonical row-major.
    pub fn encode_image<'a, T: Sample>(
        &self,
        data: &'a [T],
        dims: &[usize],
    ) -> Result<Cow<'a, [u8]>, CodecError> {
        self.check_dtype::<T>()?;
        let (height, width, channels) = match self.layout.shape {
            FrameShape::Image {
                height,
                width,
                channels,
            } => (height, width, channels),
            FrameShape::Line { .. } => {
                return Err(CodecError::ShapeMismatch {
                    expected: self.layout.shape.dims(),
                    got: dims.to_vec(),
                })
            }
        };
        let (batch, frame_dims): (usize, &[usize]) = match dims {
            [_, _] | [_, _, _] => (1, dims),
            [b, rest @ ..] if rest.len() == 3 => (*b, rest),
            _ => {
                return Err(CodecError::ShapeMismatch {
                    expected: vec![height, width, channels],
                    got: dims.to_vec(),
                })
            }
        };
        let shape = FrameShape::from_dims(DataMode::Image, frame_dims)?;
        let matches = shape
            == FrameShape::Image {
                height,
                width,
                channels,
            };
        if !matches || data.len() != batch * shape.elems() {
            return Err(CodecError::ShapeMismatch {
                expected: vec![height, width, channels],
                got: dims.to_vec(),
            });
        }
        Ok(Cow::Borrowed(sample_bytes(data)))
    }

    /// Types a bytes window of whole frames.
    ///
    /// Borrows when the bytes are aligned for `T`; a wrap-copied or
    /// misaligned window falls back to one owned copy.
    pub fn decode_window<'a, T: Sample>(
        &self,
        bytes: &'a [u8],
    ) -> Result<TypedWindow<'a, T>, CodecError> {
        self.check_dtype::<T>()?;
        let frame_bytes = self.layout.frame_bytes();
        if frame_bytes == 0 || bytes.len() % frame_bytes != 0 {
            return Err(CodecError::PartialFrame {
                len: bytes.len(),
                frame_bytes,
            });
        }
        let elems = bytes.len() / std::mem::size_of::<T>();
        // SAFETY: Sample types accept any bit pattern, so reinterpreting
        // aligned frame bytes as T is sound.
        let (prefix, mid, suffix) = unsafe { bytes.align_to::<T>() };
        let data = if prefix.is_empty() && suffix.is_empty() {
            Cow::Borrowed(mid)
        } else {
            let mut owned: Vec<T> = Vec::with_capacity(elems);
            // SAFETY: the Vec allocation is T-aligned and sized for `elems`
            // elements; the byte copy fully initializes it.
            unsafe {
                ptr::copy_nonoverlapping(bytes.as_ptr(), owned.as_mut_ptr().cast::<u8>(), bytes.len());
                owned.set_len(elems);
            }
            Cow::Owned(owned)
        };
        Ok(TypedWindow {
            data,
            layout: self.layout,
        })
    }

    /// Extracts channel `channel` of one canonical line frame as wire bytes
    /// (`samples` elements, stride `channels`).
    pub fn line_channel_bytes(&self, frame: &[u8], channel: usize) -> Result<Vec<u8>, CodecError> {
        let (samples, channels) = self.line_dims()?;
        if frame.len() != self.layout.frame_bytes() {
            return Err(CodecError::PartialFrame {
                len: frame.len(),
                frame_bytes: self.layout.frame_bytes(),
            });
        }
        if channel >= channels {
            return Err(CodecError::ChannelOutOfRange { channel, channels });
        }
        let esz = self.layout.dtype.size();
        let mut out = Vec::with_capacity(samples * esz);
        for s in 0..samples {
            let off = (s * channels + channel) * esz;
            out.extend_from_slice(&frame[off..off + esz]);
        }
        Ok(out)
    }
}

/// A typed view over `n` frames read back from the ring or the journal.
pub struct TypedWindow<'a, T: Sample> {
    data: Cow<'a, [T]>,
    layout: FrameLayout,
}

impl<T: Sample> TypedWindow<'_, T> {
    /// Number of whole frames in the window.
    pub fn frames(&self) -> usize {
        self.data.len() / self.layout.frame_elems()
    }

    /// Elements of frame `i`.
    pub fn frame(&self, i: usize) -> &[T] {
        let n = self.layout.frame_elems();
        &self.data[i * n..(i + 1) * n]
    }

    /// All elements, frame-major.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Layout the window was decoded with.
    pub fn layout(&self) -> &FrameLayout {
        &self.layout
    }
}

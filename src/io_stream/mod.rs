//! Streaming tag codec, reader and writer.
//!
//! # Reader
//! [`NbtReader`] pulls bytes through an optional decompressor and decodes one
//! root tag per call by recursive descent.  `read_next` distinguishes a clean
//! end of input between root tags (`Ok(None)`) from input that stops in the
//! middle of a tag ([`NbtError::UnexpectedEof`]).
//!
//! # Writer
//! [`NbtWriter`] mirrors the reader field for field.  Bytes go through an
//! optional compressor; [`NbtWriter::finish`] must be called to emit the
//! compression trailer.
//!
//! # Byte order
//! Every multi-byte integer and float, including name/string lengths, array
//! lengths and list counts, uses the configured [`ByteOrder`].  Type ids are
//! single bytes and unaffected.

mod reader;
mod writer;

use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::Path;

use thiserror::Error;

use crate::codec::{CodecError, Compression};
use crate::tag::{Tag, TagError, TagType};

pub use reader::NbtReader;
pub use writer::NbtWriter;

/// Default nesting limit for decoding.  Deeper input is rejected rather than
/// allowed to exhaust the call stack.
pub const DEFAULT_MAX_DEPTH: usize = 256;

// ── ByteOrder ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    #[default]
    BigEndian,
    LittleEndian,
}

impl ByteOrder {
    /// Parse from a CLI string.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "big" | "big_endian" | "bigendian" | "be"             => Some(ByteOrder::BigEndian),
            "little" | "little_endian" | "littleendian" | "le"    => Some(ByteOrder::LittleEndian),
            _ => None,
        }
    }
}

// ── NbtOptions ───────────────────────────────────────────────────────────────

/// How a tag stream is framed.  There is deliberately no `Default`: callers
/// must say which compression they expect.  [`NbtOptions::gzip`] covers the
/// common case of a standalone `.dat` style file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NbtOptions {
    pub compression: Compression,
    pub byte_order:  ByteOrder,
    pub max_depth:   usize,
}

impl NbtOptions {
    /// Big-endian stream with the given compression.
    pub fn new(compression: Compression) -> Self {
        Self {
            compression,
            byte_order: ByteOrder::BigEndian,
            max_depth:  DEFAULT_MAX_DEPTH,
        }
    }

    /// Gzip-compressed, big-endian.
    pub fn gzip() -> Self {
        Self::new(Compression::Gzip)
    }

    /// Uncompressed, big-endian.
    pub fn uncompressed() -> Self {
        Self::new(Compression::None)
    }

    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
}

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum NbtError {
    #[error("Unknown tag type id {0}")]
    UnknownTagType(u8),
    #[error("TAG_End found without a compound to terminate")]
    UnexpectedEnd,
    #[error("Named TAG_End not permitted")]
    NamedEnd,
    #[error("TAG_End not permitted in a list")]
    EndInList,
    #[error("Mixed tag types in list: declared {expected}, found {found}")]
    MixedListTypes { expected: TagType, found: TagType },
    #[error("Negative length {0}")]
    NegativeLength(i32),
    #[error("{what} length {len} exceeds the field maximum of {max}")]
    LengthOverflow { what: &'static str, len: usize, max: usize },
    #[error("Nesting deeper than the limit of {limit}")]
    DepthLimit { limit: usize },
    #[error("Invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),
    #[error("Unexpected end of input inside a tag")]
    UnexpectedEof,
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("IO error: {0}")]
    Io(io::Error),
}

impl From<io::Error> for NbtError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            NbtError::UnexpectedEof
        } else {
            NbtError::Io(e)
        }
    }
}

impl From<TagError> for NbtError {
    fn from(e: TagError) -> Self {
        match e {
            TagError::ListTypeMismatch { expected, found } => NbtError::MixedListTypes { expected, found },
            TagError::EndInList => NbtError::EndInList,
        }
    }
}

// ── Convenience entry points ─────────────────────────────────────────────────

/// Decode one root tag from an in-memory buffer.
pub fn from_bytes(bytes: &[u8], options: NbtOptions) -> Result<Tag, NbtError> {
    NbtReader::new(bytes, options).read_tag()
}

/// Encode one root tag into a fresh buffer.
pub fn to_bytes(tag: &Tag, options: NbtOptions) -> Result<Vec<u8>, NbtError> {
    let mut writer = NbtWriter::new(Vec::new(), options);
    writer.write_tag(tag)?;
    Ok(writer.finish()?)
}

pub fn read_file<P: AsRef<Path>>(path: P, options: NbtOptions) -> Result<Tag, NbtError> {
    let path = path.as_ref();
    tracing::debug!(path = %path.display(), compression = %options.compression, "reading tag file");
    let file = File::open(path)?;
    NbtReader::new(BufReader::new(file), options).read_tag()
}

pub fn write_file<P: AsRef<Path>>(path: P, tag: &Tag, options: NbtOptions) -> Result<(), NbtError> {
    let path = path.as_ref();
    tracing::debug!(path = %path.display(), compression = %options.compression, "writing tag file");
    let mut writer = NbtWriter::new(BufWriter::new(File::create(path)?), options);
    writer.write_tag(tag)?;
    let buffered = writer.finish()?;
    buffered.into_inner().map_err(|e| e.into_error())?;
    Ok(())
}

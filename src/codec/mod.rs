//! Compression registry: the three stream compressions a tag stream or a
//! region chunk can be stored with.
//!
//! # Identity rules
//! Every compression is identified by a single byte.  That byte is:
//!   - Written into the sub-header of every region chunk.
//!   - The value a caller passes to pick how a standalone tag file is read.
//!
//! | id | compression |
//! |----|-------------|
//! | 0  | none        |
//! | 1  | gzip        |
//! | 2  | zlib        |
//!
//! Region files conventionally only use 1 and 2.  Compression always wraps
//! the whole tag stream, never individual fields.

use std::io::{self, Read, Write};

use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use thiserror::Error;

// ── Compression enum ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Compression {
    None = 0,
    Gzip = 1,
    Zlib = 2,
}

impl Compression {
    /// The on-disk id byte.
    #[inline]
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Resolve an id byte.  Returns `None` for ids this build does not know.
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Compression::None),
            1 => Some(Compression::Gzip),
            2 => Some(Compression::Zlib),
            _ => None,
        }
    }

    /// Human-readable name (diagnostics and CLI only).
    pub fn name(self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Gzip => "gzip",
            Compression::Zlib => "zlib",
        }
    }

    /// Parse from a CLI string.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "none" | "raw" => Some(Compression::None),
            "gzip" | "gz"  => Some(Compression::Gzip),
            "zlib" | "deflate" => Some(Compression::Zlib),
            _ => None,
        }
    }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Compression error: {0}")]
    Compression(String),
    #[error("Decompression error: {0}")]
    Decompression(String),
    #[error("Unknown compression id {0} (expected 0, 1 or 2)")]
    UnknownCompression(u8),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── Codec trait ──────────────────────────────────────────────────────────────

/// Whole-buffer compression, used where the complete payload is already in
/// memory (chunk blobs).
pub trait Codec: Send + Sync {
    fn compression(&self) -> Compression;
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;
}

// ── Built-in codec implementations ──────────────────────────────────────────

pub struct NoneCodec;
impl Codec for NoneCodec {
    fn compression(&self) -> Compression { Compression::None }
    fn compress(&self, data: &[u8])   -> Result<Vec<u8>, CodecError> { Ok(data.to_vec()) }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> { Ok(data.to_vec()) }
}

pub struct GzipCodec;
impl Codec for GzipCodec {
    fn compression(&self) -> Compression { Compression::Gzip }
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut w = GzEncoder::new(Vec::new(), flate2::Compression::default());
        w.write_all(data).map_err(|e| CodecError::Compression(e.to_string()))?;
        w.finish().map_err(|e| CodecError::Compression(e.to_string()))
    }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        GzDecoder::new(data)
            .read_to_end(&mut out)
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        Ok(out)
    }
}

pub struct ZlibCodec;
impl Codec for ZlibCodec {
    fn compression(&self) -> Compression { Compression::Zlib }
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut w = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        w.write_all(data).map_err(|e| CodecError::Compression(e.to_string()))?;
        w.finish().map_err(|e| CodecError::Compression(e.to_string()))
    }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        ZlibDecoder::new(data)
            .read_to_end(&mut out)
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        Ok(out)
    }
}

// ── Factory ──────────────────────────────────────────────────────────────────

/// Resolve a raw id byte to a built-in codec.
///
/// Returns `Err(CodecError::UnknownCompression)` if the id is not recognised.
pub fn get_codec_by_id(id: u8) -> Result<Box<dyn Codec>, CodecError> {
    match Compression::from_id(id) {
        Some(c) => Ok(get_codec(c)),
        None    => Err(CodecError::UnknownCompression(id)),
    }
}

/// Resolve a Compression to a built-in codec.
pub fn get_codec(compression: Compression) -> Box<dyn Codec> {
    match compression {
        Compression::None => Box::new(NoneCodec),
        Compression::Gzip => Box::new(GzipCodec),
        Compression::Zlib => Box::new(ZlibCodec),
    }
}

// ── Streaming wrappers ───────────────────────────────────────────────────────

/// Read side of a compressed tag stream.  Decompression happens lazily as
/// the decoder pulls bytes, so several concatenated root tags can be read
/// back from one stream.
pub enum Decompressor<R: Read> {
    Plain(R),
    Gzip(GzDecoder<R>),
    Zlib(ZlibDecoder<R>),
}

impl<R: Read> Decompressor<R> {
    pub fn new(inner: R, compression: Compression) -> Self {
        match compression {
            Compression::None => Decompressor::Plain(inner),
            Compression::Gzip => Decompressor::Gzip(GzDecoder::new(inner)),
            Compression::Zlib => Decompressor::Zlib(ZlibDecoder::new(inner)),
        }
    }

    pub fn into_inner(self) -> R {
        match self {
            Decompressor::Plain(r) => r,
            Decompressor::Gzip(r)  => r.into_inner(),
            Decompressor::Zlib(r)  => r.into_inner(),
        }
    }
}

impl<R: Read> Read for Decompressor<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Decompressor::Plain(r) => r.read(buf),
            Decompressor::Gzip(r)  => r.read(buf),
            Decompressor::Zlib(r)  => r.read(buf),
        }
    }
}

/// Write side of a compressed tag stream.  [`Compressor::finish`] must be
/// called to emit the gzip/zlib trailer.
pub enum Compressor<W: Write> {
    Plain(W),
    Gzip(GzEncoder<W>),
    Zlib(ZlibEncoder<W>),
}

impl<W: Write> Compressor<W> {
    pub fn new(inner: W, compression: Compression) -> Self {
        let level = flate2::Compression::default();
        match compression {
            Compression::None => Compressor::Plain(inner),
            Compression::Gzip => Compressor::Gzip(GzEncoder::new(inner, level)),
            Compression::Zlib => Compressor::Zlib(ZlibEncoder::new(inner, level)),
        }
    }

    /// Flush any buffered compressed data and the stream trailer, returning
    /// the underlying writer.
    pub fn finish(self) -> io::Result<W> {
        match self {
            Compressor::Plain(mut w) => {
                w.flush()?;
                Ok(w)
            }
            Compressor::Gzip(w) => w.finish(),
            Compressor::Zlib(w) => w.finish(),
        }
    }
}

impl<W: Write> Write for Compressor<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Compressor::Plain(w) => w.write(buf),
            Compressor::Gzip(w)  => w.write(buf),
            Compressor::Zlib(w)  => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Compressor::Plain(w) => w.flush(),
            Compressor::Gzip(w)  => w.flush(),
            Compressor::Zlib(w)  => w.flush(),
        }
    }
}

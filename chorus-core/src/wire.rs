//! Binary field codec underneath every wire message.
//!
//! Two layouts share the same primitives:
//!
//! ```text
//! compact (positional, both ends know the schema):
//! ┌──────────┬──────────┬─────────┬───────────┬────────────────┐
//! │ u32 LE   │ f32 LE   │ len u32 │ utf-8 ... │ static bytes   │
//! └──────────┴──────────┴─────────┴───────────┴────────────────┘
//!
//! tagged (self-describing, 4-byte aligned):
//! ┌───────┬─────┬────────┬─────┬─────────┬───────────┬─────┬─────┐
//! │ count │ tag │ value  │ tag │ len u32 │ bytes ... │ pad │ ... │
//! └───────┴─────┴────────┴─────┴─────────┴───────────┴─────┴─────┘
//! ```
//!
//! Every multi-byte integer is little-endian. Variable-length fields
//! (strings and variable blobs) carry a 4-byte length prefix. Static
//! blobs never do: their size comes from the schema in the compact layout
//! and from the upper 24 bits of the tag in the tagged layout. The leading
//! count word lets a tagged decode notice a buffer cut on a field boundary.
//!
//! Decoding is all-or-nothing. A short buffer, an unknown tag or left-over
//! bytes fail the whole decode; no partial field list is ever returned.

use thiserror::Error;

/// Size of one wire word (tags, integers, floats, length prefixes).
pub const WORD: usize = 4;

/// Largest static blob the tagged layout can describe (24-bit size).
pub const MAX_TAGGED_STATIC: usize = 0x00FF_FFFF;

const TAG_I32: u32 = 1;
const TAG_U32: u32 = 2;
const TAG_F32: u32 = 3;
const TAG_STR: u32 = 4;
const TAG_STATIC: u32 = 5;
const TAG_BYTES: u32 = 6;

/// One typed value on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    I32(i32),
    U32(u32),
    F32(f32),
    Str(String),
    /// Fixed-size blob, written without a length prefix.
    Static(Vec<u8>),
    /// Variable-size blob, written with a length prefix.
    Bytes(Vec<u8>),
}

/// Schema entry used by the compact layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    I32,
    U32,
    F32,
    Str,
    Static(usize),
    Bytes,
}

impl Field {
    pub fn kind(&self) -> FieldKind {
        match self {
            Field::I32(_) => FieldKind::I32,
            Field::U32(_) => FieldKind::U32,
            Field::F32(_) => FieldKind::F32,
            Field::Str(_) => FieldKind::Str,
            Field::Static(b) => FieldKind::Static(b.len()),
            Field::Bytes(_) => FieldKind::Bytes,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Field::U32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Field::F32(v) => Some(*v),
            _ => None,
        }
    }
}

/// Codec errors. Everything except `UnknownMethod` means the buffer is corrupt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("buffer truncated: needed {needed} bytes at offset {offset}, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("unknown field tag {0:#010x}")]
    UnknownFieldTag(u32),

    #[error("invalid utf-8 in string field at offset {0}")]
    InvalidUtf8(usize),

    #[error("{0} trailing bytes after the last field")]
    TrailingBytes(usize),

    #[error("static field declared as {declared} bytes but holds {actual}")]
    StaticSizeMismatch { declared: usize, actual: usize },

    #[error("field of {0} bytes does not fit the wire format")]
    FieldTooLarge(usize),

    #[error("unexpected field: expected {expected:?}, found {found:?}")]
    UnexpectedField { expected: FieldKind, found: FieldKind },

    #[error("schema has {expected} fields, got {found}")]
    FieldCount { expected: usize, found: usize },

    #[error("pose payload must hold exactly 10 floats, got {0} bytes")]
    InvalidPose(usize),

    #[error("peer list of {0} bytes is not a whole number of ids")]
    InvalidPeerList(usize),

    #[error("unknown method {0}")]
    UnknownMethod(u32),
}

/// Append-only little-endian writer.
#[derive(Debug, Default)]
struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn f32(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn prefixed(&mut self, bytes: &[u8]) -> Result<(), WireError> {
        let len = u32::try_from(bytes.len()).map_err(|_| WireError::FieldTooLarge(bytes.len()))?;
        self.u32(len);
        self.raw(bytes);
        Ok(())
    }

    fn pad(&mut self) {
        while self.buf.len() % WORD != 0 {
            self.buf.push(0);
        }
    }
}

/// Bounds-checked little-endian reader.
#[derive(Debug)]
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < n {
            return Err(WireError::Truncated {
                offset: self.pos,
                needed: n,
                available: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn word(&mut self) -> Result<[u8; WORD], WireError> {
        let mut out = [0u8; WORD];
        out.copy_from_slice(self.take(WORD)?);
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32, WireError> {
        self.word().map(u32::from_le_bytes)
    }

    fn i32(&mut self) -> Result<i32, WireError> {
        self.word().map(i32::from_le_bytes)
    }

    fn f32(&mut self) -> Result<f32, WireError> {
        self.word().map(f32::from_le_bytes)
    }

    fn prefixed(&mut self) -> Result<&'a [u8], WireError> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    fn string(&mut self) -> Result<String, WireError> {
        let offset = self.pos;
        let bytes = self.prefixed()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| WireError::InvalidUtf8(offset))
    }

    fn skip_padding(&mut self) -> Result<(), WireError> {
        let pad = (WORD - self.pos % WORD) % WORD;
        self.take(pad).map(|_| ())
    }

    fn finish(self) -> Result<(), WireError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(WireError::TrailingBytes(n)),
        }
    }
}

/// Encode fields in the compact positional layout.
pub fn encode(fields: &[Field]) -> Result<Vec<u8>, WireError> {
    let mut w = Writer::with_capacity(fields.len() * WORD * 2);
    for field in fields {
        match field {
            Field::I32(v) => w.i32(*v),
            Field::U32(v) => w.u32(*v),
            Field::F32(v) => w.f32(*v),
            Field::Str(s) => w.prefixed(s.as_bytes())?,
            Field::Static(b) => w.raw(b),
            Field::Bytes(b) => w.prefixed(b)?,
        }
    }
    Ok(w.buf)
}

/// Encode fields in the compact layout after checking them against `schema`,
/// so the output always decodes with [`decode_with`] and the same schema.
pub fn encode_with(fields: &[Field], schema: &[FieldKind]) -> Result<Vec<u8>, WireError> {
    if fields.len() != schema.len() {
        return Err(WireError::FieldCount {
            expected: schema.len(),
            found: fields.len(),
        });
    }
    for (field, expected) in fields.iter().zip(schema) {
        match (field, expected) {
            (Field::Static(b), FieldKind::Static(declared)) if b.len() != *declared => {
                return Err(WireError::StaticSizeMismatch {
                    declared: *declared,
                    actual: b.len(),
                });
            }
            _ if field.kind() != *expected => {
                return Err(WireError::UnexpectedField {
                    expected: *expected,
                    found: field.kind(),
                });
            }
            _ => {}
        }
    }
    encode(fields)
}

/// Decode a compact buffer against `schema`. The buffer must be consumed exactly.
pub fn decode_with(bytes: &[u8], schema: &[FieldKind]) -> Result<Vec<Field>, WireError> {
    let mut r = Reader::new(bytes);
    let mut fields = Vec::with_capacity(schema.len());
    for kind in schema {
        let field = match kind {
            FieldKind::I32 => Field::I32(r.i32()?),
            FieldKind::U32 => Field::U32(r.u32()?),
            FieldKind::F32 => Field::F32(r.f32()?),
            FieldKind::Str => Field::Str(r.string()?),
            FieldKind::Static(size) => Field::Static(r.take(*size)?.to_vec()),
            FieldKind::Bytes => Field::Bytes(r.prefixed()?.to_vec()),
        };
        fields.push(field);
    }
    r.finish()?;
    Ok(fields)
}

/// Read the leading method discriminator without decoding the rest.
pub fn peek_u32(bytes: &[u8]) -> Result<u32, WireError> {
    Reader::new(bytes).u32()
}

/// Encode fields in the tagged, self-describing layout.
pub fn encode_tagged(fields: &[Field]) -> Result<Vec<u8>, WireError> {
    let count = u32::try_from(fields.len()).map_err(|_| WireError::FieldTooLarge(fields.len()))?;
    let mut w = Writer::with_capacity((fields.len() * 3 + 1) * WORD);
    w.u32(count);
    for field in fields {
        match field {
            Field::I32(v) => {
                w.u32(TAG_I32);
                w.i32(*v);
            }
            Field::U32(v) => {
                w.u32(TAG_U32);
                w.u32(*v);
            }
            Field::F32(v) => {
                w.u32(TAG_F32);
                w.f32(*v);
            }
            Field::Str(s) => {
                w.u32(TAG_STR);
                w.prefixed(s.as_bytes())?;
                w.pad();
            }
            Field::Static(b) => {
                if b.len() > MAX_TAGGED_STATIC {
                    return Err(WireError::FieldTooLarge(b.len()));
                }
                w.u32(TAG_STATIC | ((b.len() as u32) << 8));
                w.raw(b);
                w.pad();
            }
            Field::Bytes(b) => {
                w.u32(TAG_BYTES);
                w.prefixed(b)?;
                w.pad();
            }
        }
    }
    Ok(w.buf)
}

/// Decode a tagged buffer back into the field list it was built from.
pub fn decode_tagged(bytes: &[u8]) -> Result<Vec<Field>, WireError> {
    let mut r = Reader::new(bytes);
    let count = r.u32()? as usize;
    let mut fields = Vec::with_capacity(count.min(r.remaining() / WORD));
    for _ in 0..count {
        let tag = r.u32()?;
        let field = match tag & 0xFF {
            TAG_I32 if tag == TAG_I32 => Field::I32(r.i32()?),
            TAG_U32 if tag == TAG_U32 => Field::U32(r.u32()?),
            TAG_F32 if tag == TAG_F32 => Field::F32(r.f32()?),
            TAG_STR if tag == TAG_STR => {
                let s = r.string()?;
                r.skip_padding()?;
                Field::Str(s)
            }
            TAG_STATIC => {
                let size = (tag >> 8) as usize;
                let b = r.take(size)?.to_vec();
                r.skip_padding()?;
                Field::Static(b)
            }
            TAG_BYTES if tag == TAG_BYTES => {
                let b = r.prefixed()?.to_vec();
                r.skip_padding()?;
                Field::Bytes(b)
            }
            _ => return Err(WireError::UnknownFieldTag(tag)),
        };
        fields.push(field);
    }
    r.finish()?;
    Ok(fields)
}

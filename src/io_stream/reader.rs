use std::io::{self, Read};

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};

use super::{ByteOrder, NbtError, NbtOptions};
use crate::codec::Decompressor;
use crate::tag::{CompoundMap, ListTag, Tag, TagType, TagValue};

/// Arrays and lists never reserve more than this many elements up front.
/// Longer ones grow as bytes actually arrive.
const PREALLOC_LIMIT: usize = 64 * 1024;

macro_rules! read_ordered {
    ($self:ident, $method:ident) => {
        match $self.byte_order {
            ByteOrder::BigEndian    => $self.input.$method::<BigEndian>(),
            ByteOrder::LittleEndian => $self.input.$method::<LittleEndian>(),
        }
    };
}

pub struct NbtReader<R: Read> {
    input:      Decompressor<R>,
    byte_order: ByteOrder,
    max_depth:  usize,
}

impl<R: Read> NbtReader<R> {
    pub fn new(inner: R, options: NbtOptions) -> Self {
        Self {
            input:      Decompressor::new(inner, options.compression),
            byte_order: options.byte_order,
            max_depth:  options.max_depth,
        }
    }

    /// Read one root tag.  Running out of input before the type id is an
    /// error here; use [`read_next`](Self::read_next) to iterate a stream.
    pub fn read_tag(&mut self) -> Result<Tag, NbtError> {
        self.read_next()?.ok_or(NbtError::UnexpectedEof)
    }

    /// Read the next root tag, or `Ok(None)` if the input ends cleanly
    /// before another type id.
    pub fn read_next(&mut self) -> Result<Option<Tag>, NbtError> {
        match self.try_read_u8()? {
            None     => Ok(None),
            Some(id) => self.read_named(id, 0).map(Some),
        }
    }

    /// Decode the payload of a tag whose type id and name were already
    /// consumed.
    pub fn read_tag_payload(&mut self, tag_type: TagType, name: String, depth: usize) -> Result<Tag, NbtError> {
        let value = self.read_value(tag_type, depth)?;
        Ok(Tag::new(name, value))
    }

    pub fn into_inner(self) -> R {
        self.input.into_inner()
    }

    // ── Internals ────────────────────────────────────────────────────────────

    fn try_read_u8(&mut self) -> Result<Option<u8>, NbtError> {
        let mut buf = [0u8; 1];
        loop {
            match self.input.read(&mut buf) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(buf[0])),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn read_named(&mut self, id: u8, depth: usize) -> Result<Tag, NbtError> {
        let tag_type = TagType::from_id(id).ok_or(NbtError::UnknownTagType(id))?;
        if tag_type == TagType::End {
            // Compounds consume their own terminator, so a bare End reaching
            // here has nothing to close.
            return Err(NbtError::UnexpectedEnd);
        }
        let name = self.read_string("tag name")?;
        self.read_tag_payload(tag_type, name, depth)
    }

    fn read_len(&mut self) -> Result<usize, NbtError> {
        let len = read_ordered!(self, read_i32)?;
        if len < 0 {
            return Err(NbtError::NegativeLength(len));
        }
        Ok(len as usize)
    }

    fn read_string(&mut self, what: &'static str) -> Result<String, NbtError> {
        let len = read_ordered!(self, read_u16)? as usize;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes).map_err(|_| NbtError::InvalidUtf8(what))
    }

    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, NbtError> {
        let mut buf = Vec::with_capacity(len.min(PREALLOC_LIMIT));
        (&mut self.input).take(len as u64).read_to_end(&mut buf)?;
        if buf.len() != len {
            return Err(NbtError::UnexpectedEof);
        }
        Ok(buf)
    }

    fn read_array<T>(
        &mut self,
        mut read_one: impl FnMut(&mut Self) -> io::Result<T>,
    ) -> Result<Vec<T>, NbtError> {
        let len = self.read_len()?;
        let mut out = Vec::with_capacity(len.min(PREALLOC_LIMIT));
        for _ in 0..len {
            out.push(read_one(self)?);
        }
        Ok(out)
    }

    fn read_value(&mut self, tag_type: TagType, depth: usize) -> Result<TagValue, NbtError> {
        if depth > self.max_depth {
            return Err(NbtError::DepthLimit { limit: self.max_depth });
        }

        // Nested kinds live in their own small frames so the recursion cost
        // per level stays low.
        match tag_type {
            TagType::End if depth == 0 => Err(NbtError::UnexpectedEnd),
            TagType::List     => self.read_list(depth),
            TagType::Compound => self.read_compound(depth),
            _                 => self.read_flat(tag_type),
        }
    }

    #[inline(never)]
    fn read_flat(&mut self, tag_type: TagType) -> Result<TagValue, NbtError> {
        let value = match tag_type {
            TagType::End    => TagValue::End,
            TagType::Byte   => TagValue::Byte(self.input.read_i8()?),
            TagType::Short  => TagValue::Short(read_ordered!(self, read_i16)?),
            TagType::Int    => TagValue::Int(read_ordered!(self, read_i32)?),
            TagType::Long   => TagValue::Long(read_ordered!(self, read_i64)?),
            TagType::Float  => TagValue::Float(read_ordered!(self, read_f32)?),
            TagType::Double => TagValue::Double(read_ordered!(self, read_f64)?),
            TagType::String => TagValue::String(self.read_string("string payload")?),

            TagType::ByteArray => {
                let len = self.read_len()?;
                let raw = self.read_bytes(len)?;
                TagValue::ByteArray(raw.into_iter().map(|b| b as i8).collect())
            }
            TagType::IntArray   => TagValue::IntArray(self.read_array(|r| read_ordered!(r, read_i32))?),
            TagType::LongArray  => TagValue::LongArray(self.read_array(|r| read_ordered!(r, read_i64))?),
            TagType::ShortArray => TagValue::ShortArray(self.read_array(|r| read_ordered!(r, read_i16))?),

            TagType::List | TagType::Compound => unreachable!("nested kinds are read by read_value"),
        };
        Ok(value)
    }

    #[inline(never)]
    fn read_list(&mut self, depth: usize) -> Result<TagValue, NbtError> {
        let element_id = self.input.read_u8()?;
        let element_type = TagType::from_id(element_id).ok_or(NbtError::UnknownTagType(element_id))?;
        let count = self.read_len()?;
        if element_type == TagType::End && count > 0 {
            return Err(NbtError::EndInList);
        }
        let mut items = Vec::with_capacity(count.min(PREALLOC_LIMIT));
        for _ in 0..count {
            items.push(self.read_value(element_type, depth + 1)?);
        }
        Ok(TagValue::List(ListTag::from_values(element_type, items)?))
    }

    #[inline(never)]
    fn read_compound(&mut self, depth: usize) -> Result<TagValue, NbtError> {
        let mut map = CompoundMap::new();
        loop {
            let id = self.input.read_u8()?;
            if id == TagType::End.id() {
                break;
            }
            map.put(self.read_named(id, depth + 1)?);
        }
        Ok(TagValue::Compound(map))
    }
}

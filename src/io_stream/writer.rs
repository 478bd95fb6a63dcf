use std::io::{self, Write};

use byteorder::{BigEndian, LittleEndian, WriteBytesExt};

use super::{ByteOrder, NbtError, NbtOptions};
use crate::codec::Compressor;
use crate::tag::{Tag, TagType, TagValue};

macro_rules! write_ordered {
    ($self:ident, $method:ident, $value:expr) => {
        match $self.byte_order {
            ByteOrder::BigEndian    => $self.output.$method::<BigEndian>($value),
            ByteOrder::LittleEndian => $self.output.$method::<LittleEndian>($value),
        }
    };
}

pub struct NbtWriter<W: Write> {
    output:     Compressor<W>,
    byte_order: ByteOrder,
}

impl<W: Write> NbtWriter<W> {
    pub fn new(inner: W, options: NbtOptions) -> Self {
        Self {
            output:     Compressor::new(inner, options.compression),
            byte_order: options.byte_order,
        }
    }

    /// Write one full tag: type id, name, payload.
    pub fn write_tag(&mut self, tag: &Tag) -> Result<(), NbtError> {
        let tag_type = tag.tag_type();
        if tag_type == TagType::End {
            return Err(NbtError::NamedEnd);
        }
        self.output.write_u8(tag_type.id())?;
        self.write_string(tag.name(), "tag name")?;
        self.write_tag_payload(tag.value())
    }

    /// Write only the payload of `value`, as list elements are stored.
    pub fn write_tag_payload(&mut self, value: &TagValue) -> Result<(), NbtError> {
        match value {
            TagValue::End       => {}
            TagValue::Byte(v)   => self.output.write_i8(*v)?,
            TagValue::Short(v)  => write_ordered!(self, write_i16, *v)?,
            TagValue::Int(v)    => write_ordered!(self, write_i32, *v)?,
            TagValue::Long(v)   => write_ordered!(self, write_i64, *v)?,
            TagValue::Float(v)  => write_ordered!(self, write_f32, *v)?,
            TagValue::Double(v) => write_ordered!(self, write_f64, *v)?,
            TagValue::String(v) => self.write_string(v, "string payload")?,

            TagValue::ByteArray(v) => {
                self.write_len(v.len(), "byte array")?;
                let raw: Vec<u8> = v.iter().map(|b| *b as u8).collect();
                self.output.write_all(&raw)?;
            }
            TagValue::IntArray(v) => {
                self.write_len(v.len(), "int array")?;
                for x in v {
                    write_ordered!(self, write_i32, *x)?;
                }
            }
            TagValue::LongArray(v) => {
                self.write_len(v.len(), "long array")?;
                for x in v {
                    write_ordered!(self, write_i64, *x)?;
                }
            }
            TagValue::ShortArray(v) => {
                self.write_len(v.len(), "short array")?;
                for x in v {
                    write_ordered!(self, write_i16, *x)?;
                }
            }

            TagValue::List(list) => {
                self.output.write_u8(list.element_type().id())?;
                self.write_len(list.len(), "list")?;
                for item in list {
                    self.write_tag_payload(item)?;
                }
            }

            TagValue::Compound(map) => {
                for child in map {
                    self.write_tag(child)?;
                }
                self.output.write_u8(TagType::End.id())?;
            }
        }
        Ok(())
    }

    /// Flush the compression trailer and hand back the sink.
    pub fn finish(self) -> io::Result<W> {
        self.output.finish()
    }

    fn write_len(&mut self, len: usize, what: &'static str) -> Result<(), NbtError> {
        let len = i32::try_from(len).map_err(|_| NbtError::LengthOverflow {
            what,
            len,
            max: i32::MAX as usize,
        })?;
        write_ordered!(self, write_i32, len)?;
        Ok(())
    }

    fn write_string(&mut self, s: &str, what: &'static str) -> Result<(), NbtError> {
        let bytes = s.as_bytes();
        let len = u16::try_from(bytes.len()).map_err(|_| NbtError::LengthOverflow {
            what,
            len: bytes.len(),
            max: u16::MAX as usize,
        })?;
        write_ordered!(self, write_u16, len)?;
        self.output.write_all(bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Compression;
    use crate::tag::CompoundMap;

    #[test]
    fn oversized_name_is_rejected() {
        let mut w = NbtWriter::new(Vec::new(), NbtOptions::new(Compression::None));
        let long_name = "n".repeat(70_000);
        let err = w.write_tag(&Tag::byte(long_name, 1)).unwrap_err();
        assert!(matches!(err, NbtError::LengthOverflow { len: 70_000, max: 65535, .. }));
    }

    #[test]
    fn end_nested_in_compound_is_rejected() {
        let mut map = CompoundMap::new();
        map.put(Tag::new("nope", TagValue::End));
        let mut w = NbtWriter::new(Vec::new(), NbtOptions::new(Compression::None));
        assert!(matches!(w.write_tag(&Tag::compound("", map)), Err(NbtError::NamedEnd)));
    }

    #[test]
    fn payload_only_for_list_elements() {
        let mut w = NbtWriter::new(Vec::new(), NbtOptions::new(Compression::None));
        w.write_tag_payload(&TagValue::Int(1)).unwrap();
        assert_eq!(w.finish().unwrap(), vec![0, 0, 0, 1]);
    }
}

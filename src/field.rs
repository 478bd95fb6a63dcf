//! Typed field binding: move Rust values in and out of compounds.
//!
//! [`TagField`] maps one Rust type onto one tag type.  [`FieldHolder`] is
//! implemented by a struct that knows how to save itself into a compound and
//! load itself back, usually through [`CompoundMap::get_field`] and
//! [`CompoundMap::put_field`].
//!
//! ```
//! use nbtcask::field::{FieldError, FieldHolder};
//! use nbtcask::tag::CompoundMap;
//!
//! #[derive(Default)]
//! struct Spawn { x: i32, y: i32, z: i32 }
//!
//! impl FieldHolder for Spawn {
//!     fn save(&self) -> CompoundMap {
//!         let mut map = CompoundMap::new();
//!         map.put_field("SpawnX", &self.x);
//!         map.put_field("SpawnY", &self.y);
//!         map.put_field("SpawnZ", &self.z);
//!         map
//!     }
//!     fn load(&mut self, map: &CompoundMap) -> Result<(), FieldError> {
//!         self.x = map.get_field("SpawnX")?;
//!         self.y = map.get_field_or("SpawnY", 64)?;
//!         self.z = map.get_field("SpawnZ")?;
//!         Ok(())
//!     }
//! }
//! ```

use std::io::{Read, Write};

use thiserror::Error;

use crate::io_stream::{NbtError, NbtOptions, NbtReader, NbtWriter};
use crate::tag::{CompoundMap, ListTag, Tag, TagType, TagValue};

#[derive(Error, Debug)]
pub enum FieldError {
    #[error("Missing field \"{0}\"")]
    Missing(String),
    #[error("Expected {expected}, found {found}")]
    WrongType { expected: TagType, found: TagType },
    #[error("Field \"{name}\": {source}")]
    InField { name: String, source: Box<FieldError> },
    #[error(transparent)]
    Nbt(#[from] NbtError),
}

fn wrong(expected: TagType, found: &TagValue) -> FieldError {
    FieldError::WrongType { expected, found: found.tag_type() }
}

// ── TagField ─────────────────────────────────────────────────────────────────

pub trait TagField: Sized {
    const TAG_TYPE: TagType;

    fn to_value(&self) -> TagValue;
    fn from_value(value: &TagValue) -> Result<Self, FieldError>;

    fn to_tag(&self, name: impl Into<String>) -> Tag {
        Tag::new(name, self.to_value())
    }
}

macro_rules! direct_field {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl TagField for $ty {
            const TAG_TYPE: TagType = TagType::$variant;

            fn to_value(&self) -> TagValue {
                TagValue::$variant(self.clone())
            }

            fn from_value(value: &TagValue) -> Result<Self, FieldError> {
                match value {
                    TagValue::$variant(v) => Ok(v.clone()),
                    other => Err(wrong(Self::TAG_TYPE, other)),
                }
            }
        })*
    };
}

direct_field! {
    i8 => Byte, i16 => Short, i32 => Int, i64 => Long, f32 => Float, f64 => Double,
    String => String, CompoundMap => Compound,
    Vec<i8> => ByteArray, Vec<i16> => ShortArray, Vec<i32> => IntArray, Vec<i64> => LongArray,
}

impl TagField for bool {
    const TAG_TYPE: TagType = TagType::Byte;

    fn to_value(&self) -> TagValue {
        TagValue::Byte(*self as i8)
    }

    fn from_value(value: &TagValue) -> Result<Self, FieldError> {
        value.as_bool().ok_or_else(|| wrong(TagType::Byte, value))
    }
}

/// Types stored as list elements when held in a `Vec`.  Integer widths that
/// have a dedicated array type are excluded.
pub trait ListElement: TagField {}

impl ListElement for f32 {}
impl ListElement for f64 {}
impl ListElement for String {}
impl ListElement for CompoundMap {}

impl<T: ListElement> TagField for Vec<T> {
    const TAG_TYPE: TagType = TagType::List;

    fn to_value(&self) -> TagValue {
        let items = self.iter().map(TagField::to_value).collect();
        TagValue::List(ListTag::from_trusted(T::TAG_TYPE, items))
    }

    fn from_value(value: &TagValue) -> Result<Self, FieldError> {
        let list = value.as_list().ok_or_else(|| wrong(TagType::List, value))?;
        // An empty list of any declared type is an empty Vec.
        if list.is_empty() {
            return Ok(Vec::new());
        }
        if list.element_type() != T::TAG_TYPE {
            return Err(FieldError::WrongType { expected: T::TAG_TYPE, found: list.element_type() });
        }
        list.iter().map(T::from_value).collect()
    }
}

// ── Compound helpers ─────────────────────────────────────────────────────────

impl CompoundMap {
    pub fn get_field<T: TagField>(&self, name: &str) -> Result<T, FieldError> {
        let value = self.get_value(name).ok_or_else(|| FieldError::Missing(name.to_owned()))?;
        T::from_value(value).map_err(|e| FieldError::InField { name: name.to_owned(), source: Box::new(e) })
    }

    /// Like [`get_field`](Self::get_field), but an absent child yields
    /// `default`.  A child of the wrong type is still an error.
    pub fn get_field_or<T: TagField>(&self, name: &str, default: T) -> Result<T, FieldError> {
        match self.get_value(name) {
            None => Ok(default),
            Some(_) => self.get_field(name),
        }
    }

    pub fn put_field<T: TagField>(&mut self, name: &str, value: &T) -> Option<Tag> {
        self.put(value.to_tag(name))
    }
}

// ── FieldHolder ──────────────────────────────────────────────────────────────

pub trait FieldHolder {
    fn save(&self) -> CompoundMap;
    fn load(&mut self, map: &CompoundMap) -> Result<(), FieldError>;

    fn to_tag(&self, name: impl Into<String>) -> Tag {
        Tag::compound(name, self.save())
    }

    fn load_tag(&mut self, tag: &Tag) -> Result<(), FieldError> {
        let map = tag.as_compound().ok_or_else(|| wrong(TagType::Compound, tag.value()))?;
        self.load(map)
    }

    /// Encode as a single root compound named `name`.
    fn write_to<W: Write>(&self, name: &str, writer: W, options: NbtOptions) -> Result<W, FieldError> {
        let mut writer = NbtWriter::new(writer, options);
        writer.write_tag(&self.to_tag(name))?;
        Ok(writer.finish().map_err(NbtError::from)?)
    }

    fn read_from<R: Read>(&mut self, reader: R, options: NbtOptions) -> Result<(), FieldError> {
        let tag = NbtReader::new(reader, options).read_tag()?;
        self.load_tag(&tag)
    }
}

impl FieldHolder for CompoundMap {
    fn save(&self) -> CompoundMap {
        self.clone()
    }

    fn load(&mut self, map: &CompoundMap) -> Result<(), FieldError> {
        *self = map.clone();
        Ok(())
    }
}

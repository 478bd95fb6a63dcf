//! The tag tree: a closed set of typed values, each carried under a name.
//!
//! A [`Tag`] is a `(name, TagValue)` pair.  Names only matter at the root and
//! for children of a compound; list elements are bare [`TagValue`]s and are
//! written without a name.
//!
//! # Type ids
//! | id  | type         | id  | type        |
//! |-----|--------------|-----|-------------|
//! | 0   | End          | 7   | ByteArray   |
//! | 1   | Byte         | 8   | String      |
//! | 2   | Short        | 9   | List        |
//! | 3   | Int          | 10  | Compound    |
//! | 4   | Long         | 11  | IntArray    |
//! | 5   | Float        | 12  | LongArray   |
//! | 6   | Double       | 100 | ShortArray  |
//!
//! `ShortArray` is a non-standard extension kept for compatibility with
//! files written by older tooling.

pub mod compound;

use std::fmt;

use serde::{Serialize, Serializer};
use thiserror::Error;

pub use compound::{CompoundMap, MapOrder};

// ── TagType ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum TagType {
    End        = 0,
    Byte       = 1,
    Short      = 2,
    Int        = 3,
    Long       = 4,
    Float      = 5,
    Double     = 6,
    ByteArray  = 7,
    String     = 8,
    List       = 9,
    Compound   = 10,
    IntArray   = 11,
    LongArray  = 12,
    ShortArray = 100,
}

impl TagType {
    pub const ALL: [TagType; 14] = [
        TagType::End, TagType::Byte, TagType::Short, TagType::Int,
        TagType::Long, TagType::Float, TagType::Double, TagType::ByteArray,
        TagType::String, TagType::List, TagType::Compound, TagType::IntArray,
        TagType::LongArray, TagType::ShortArray,
    ];

    #[inline]
    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0   => Some(TagType::End),
            1   => Some(TagType::Byte),
            2   => Some(TagType::Short),
            3   => Some(TagType::Int),
            4   => Some(TagType::Long),
            5   => Some(TagType::Float),
            6   => Some(TagType::Double),
            7   => Some(TagType::ByteArray),
            8   => Some(TagType::String),
            9   => Some(TagType::List),
            10  => Some(TagType::Compound),
            11  => Some(TagType::IntArray),
            12  => Some(TagType::LongArray),
            100 => Some(TagType::ShortArray),
            _   => None,
        }
    }

    /// Conventional display name, e.g. `TAG_Byte_Array`.
    pub fn type_name(self) -> &'static str {
        match self {
            TagType::End        => "TAG_End",
            TagType::Byte       => "TAG_Byte",
            TagType::Short      => "TAG_Short",
            TagType::Int        => "TAG_Int",
            TagType::Long       => "TAG_Long",
            TagType::Float      => "TAG_Float",
            TagType::Double     => "TAG_Double",
            TagType::ByteArray  => "TAG_Byte_Array",
            TagType::String     => "TAG_String",
            TagType::List       => "TAG_List",
            TagType::Compound   => "TAG_Compound",
            TagType::IntArray   => "TAG_Int_Array",
            TagType::LongArray  => "TAG_Long_Array",
            TagType::ShortArray => "TAG_Short_Array",
        }
    }
}

impl fmt::Display for TagType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

// ── Error type ───────────────────────────────────────────────────────────────

/// Violations of the tree invariants while building values by hand.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TagError {
    #[error("list holds {expected} elements, cannot add a {found}")]
    ListTypeMismatch { expected: TagType, found: TagType },
    #[error("TAG_End is not permitted as a list element")]
    EndInList,
}

// ── TagValue ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum TagValue {
    End,
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    ByteArray(Vec<i8>),
    String(String),
    List(ListTag),
    Compound(CompoundMap),
    IntArray(Vec<i32>),
    LongArray(Vec<i64>),
    ShortArray(Vec<i16>),
}

impl TagValue {
    pub fn tag_type(&self) -> TagType {
        match self {
            TagValue::End           => TagType::End,
            TagValue::Byte(_)       => TagType::Byte,
            TagValue::Short(_)      => TagType::Short,
            TagValue::Int(_)        => TagType::Int,
            TagValue::Long(_)       => TagType::Long,
            TagValue::Float(_)      => TagType::Float,
            TagValue::Double(_)     => TagType::Double,
            TagValue::ByteArray(_)  => TagType::ByteArray,
            TagValue::String(_)     => TagType::String,
            TagValue::List(_)       => TagType::List,
            TagValue::Compound(_)   => TagType::Compound,
            TagValue::IntArray(_)   => TagType::IntArray,
            TagValue::LongArray(_)  => TagType::LongArray,
            TagValue::ShortArray(_) => TagType::ShortArray,
        }
    }

    pub fn as_byte(&self) -> Option<i8> {
        match self { TagValue::Byte(v) => Some(*v), _ => None }
    }

    /// Bytes double as booleans: any nonzero value is `true`.
    pub fn as_bool(&self) -> Option<bool> {
        self.as_byte().map(|b| b != 0)
    }

    pub fn as_short(&self) -> Option<i16> {
        match self { TagValue::Short(v) => Some(*v), _ => None }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self { TagValue::Int(v) => Some(*v), _ => None }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self { TagValue::Long(v) => Some(*v), _ => None }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self { TagValue::Float(v) => Some(*v), _ => None }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self { TagValue::Double(v) => Some(*v), _ => None }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self { TagValue::String(v) => Some(v), _ => None }
    }

    pub fn as_byte_array(&self) -> Option<&[i8]> {
        match self { TagValue::ByteArray(v) => Some(v), _ => None }
    }

    pub fn as_int_array(&self) -> Option<&[i32]> {
        match self { TagValue::IntArray(v) => Some(v), _ => None }
    }

    pub fn as_long_array(&self) -> Option<&[i64]> {
        match self { TagValue::LongArray(v) => Some(v), _ => None }
    }

    pub fn as_short_array(&self) -> Option<&[i16]> {
        match self { TagValue::ShortArray(v) => Some(v), _ => None }
    }

    pub fn as_list(&self) -> Option<&ListTag> {
        match self { TagValue::List(v) => Some(v), _ => None }
    }

    pub fn as_compound(&self) -> Option<&CompoundMap> {
        match self { TagValue::Compound(v) => Some(v), _ => None }
    }

    pub fn as_compound_mut(&mut self) -> Option<&mut CompoundMap> {
        match self { TagValue::Compound(v) => Some(v), _ => None }
    }
}

// Floats compare by bit pattern so that a decoded NaN equals the value it
// was encoded from.
impl PartialEq for TagValue {
    fn eq(&self, other: &Self) -> bool {
        use TagValue::*;
        match (self, other) {
            (End, End)                     => true,
            (Byte(a), Byte(b))             => a == b,
            (Short(a), Short(b))           => a == b,
            (Int(a), Int(b))               => a == b,
            (Long(a), Long(b))             => a == b,
            (Float(a), Float(b))           => a.to_bits() == b.to_bits(),
            (Double(a), Double(b))         => a.to_bits() == b.to_bits(),
            (ByteArray(a), ByteArray(b))   => a == b,
            (String(a), String(b))         => a == b,
            (List(a), List(b))             => a == b,
            (Compound(a), Compound(b))     => a == b,
            (IntArray(a), IntArray(b))     => a == b,
            (LongArray(a), LongArray(b))   => a == b,
            (ShortArray(a), ShortArray(b)) => a == b,
            _ => false,
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for TagValue {
            fn from(v: $ty) -> Self { TagValue::$variant(v) }
        })*
    };
}

value_from! {
    i8 => Byte, i16 => Short, i32 => Int, i64 => Long, f32 => Float, f64 => Double,
    Vec<i8> => ByteArray, String => String, ListTag => List, CompoundMap => Compound,
    Vec<i32> => IntArray, Vec<i64> => LongArray, Vec<i16> => ShortArray,
}

impl From<bool> for TagValue {
    fn from(v: bool) -> Self { TagValue::Byte(v as i8) }
}

impl From<&str> for TagValue {
    fn from(v: &str) -> Self { TagValue::String(v.to_owned()) }
}

// ── ListTag ──────────────────────────────────────────────────────────────────

/// A homogeneous sequence of unnamed values.  The element type is fixed when
/// the list is created, and an empty list still remembers it.
#[derive(Debug, Clone, PartialEq)]
pub struct ListTag {
    element_type: TagType,
    items:        Vec<TagValue>,
}

impl ListTag {
    pub fn new(element_type: TagType) -> Self {
        Self { element_type, items: Vec::new() }
    }

    /// Build a list, checking every element against `element_type`.
    pub fn from_values(element_type: TagType, values: Vec<TagValue>) -> Result<Self, TagError> {
        if element_type == TagType::End && !values.is_empty() {
            return Err(TagError::EndInList);
        }
        if let Some(bad) = values.iter().find(|v| v.tag_type() != element_type) {
            return Err(TagError::ListTypeMismatch {
                expected: element_type,
                found:    bad.tag_type(),
            });
        }
        Ok(Self { element_type, items: values })
    }

    /// Caller guarantees every value already has `element_type`.
    pub(crate) fn from_trusted(element_type: TagType, items: Vec<TagValue>) -> Self {
        debug_assert!(items.iter().all(|v| v.tag_type() == element_type));
        Self { element_type, items }
    }

    pub fn push(&mut self, value: impl Into<TagValue>) -> Result<(), TagError> {
        let value = value.into();
        if self.element_type == TagType::End || value.tag_type() == TagType::End {
            return Err(TagError::EndInList);
        }
        if value.tag_type() != self.element_type {
            return Err(TagError::ListTypeMismatch {
                expected: self.element_type,
                found:    value.tag_type(),
            });
        }
        self.items.push(value);
        Ok(())
    }

    pub fn element_type(&self) -> TagType { self.element_type }
    pub fn len(&self) -> usize { self.items.len() }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }
    pub fn get(&self, index: usize) -> Option<&TagValue> { self.items.get(index) }
    pub fn iter(&self) -> std::slice::Iter<'_, TagValue> { self.items.iter() }
    pub fn values(&self) -> &[TagValue] { &self.items }
    pub fn into_values(self) -> Vec<TagValue> { self.items }
}

impl Serialize for ListTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(&self.items)
    }
}

impl<'a> IntoIterator for &'a ListTag {
    type Item = &'a TagValue;
    type IntoIter = std::slice::Iter<'a, TagValue>;
    fn into_iter(self) -> Self::IntoIter { self.items.iter() }
}

// ── Tag ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tag {
    name:  String,
    value: TagValue,
}

impl Tag {
    pub fn new(name: impl Into<String>, value: impl Into<TagValue>) -> Self {
        Self { name: name.into(), value: value.into() }
    }

    pub fn byte(name: impl Into<String>, v: i8) -> Self { Self::new(name, v) }
    pub fn boolean(name: impl Into<String>, v: bool) -> Self { Self::new(name, v) }
    pub fn short(name: impl Into<String>, v: i16) -> Self { Self::new(name, v) }
    pub fn int(name: impl Into<String>, v: i32) -> Self { Self::new(name, v) }
    pub fn long(name: impl Into<String>, v: i64) -> Self { Self::new(name, v) }
    pub fn float(name: impl Into<String>, v: f32) -> Self { Self::new(name, v) }
    pub fn double(name: impl Into<String>, v: f64) -> Self { Self::new(name, v) }
    pub fn string(name: impl Into<String>, v: impl Into<String>) -> Self {
        Self::new(name, TagValue::String(v.into()))
    }
    pub fn list(name: impl Into<String>, v: ListTag) -> Self { Self::new(name, v) }
    pub fn compound(name: impl Into<String>, v: CompoundMap) -> Self { Self::new(name, v) }

    pub fn name(&self) -> &str { &self.name }
    pub fn value(&self) -> &TagValue { &self.value }
    pub fn value_mut(&mut self) -> &mut TagValue { &mut self.value }
    pub fn tag_type(&self) -> TagType { self.value.tag_type() }
    pub fn into_value(self) -> TagValue { self.value }
    pub fn into_parts(self) -> (String, TagValue) { (self.name, self.value) }

    /// The same value under another name.
    pub fn renamed(self, name: impl Into<String>) -> Self {
        Self { name: name.into(), value: self.value }
    }

    pub fn as_compound(&self) -> Option<&CompoundMap> { self.value.as_compound() }
}

// ── Display ──────────────────────────────────────────────────────────────────
//
// TAG_Compound("root"): 2 entries
// {
//    TAG_Int("x"): 5
//    TAG_String("name"): test
// }

const INDENT: &str = "   ";

fn render(name: &str, value: &TagValue, out: &mut String) {
    out.push_str(value.tag_type().type_name());
    if !name.is_empty() {
        out.push_str("(\"");
        out.push_str(name);
        out.push_str("\")");
    }
    out.push_str(": ");

    match value {
        TagValue::End          => {}
        TagValue::Byte(v)      => out.push_str(&v.to_string()),
        TagValue::Short(v)     => out.push_str(&v.to_string()),
        TagValue::Int(v)       => out.push_str(&v.to_string()),
        TagValue::Long(v)      => out.push_str(&v.to_string()),
        TagValue::Float(v)     => out.push_str(&v.to_string()),
        TagValue::Double(v)    => out.push_str(&v.to_string()),
        TagValue::String(v)    => out.push_str(v),
        TagValue::ByteArray(v) => {
            let raw: Vec<u8> = v.iter().map(|b| *b as u8).collect();
            let hex = hex::encode_upper(raw);
            let spaced: Vec<&str> = (0..hex.len()).step_by(2).map(|i| &hex[i..i + 2]).collect();
            out.push_str(&spaced.join(" "));
        }
        TagValue::IntArray(v)   => out.push_str(&format!("{v:?}")),
        TagValue::LongArray(v)  => out.push_str(&format!("{v:?}")),
        TagValue::ShortArray(v) => out.push_str(&format!("{v:?}")),
        TagValue::List(list) => {
            out.push_str(&format!(
                "{} entries of type {}\n{{\n",
                list.len(),
                list.element_type().type_name()
            ));
            for item in list {
                render_child("", item, out);
            }
            out.push('}');
        }
        TagValue::Compound(map) => {
            out.push_str(&format!("{} entries\n{{\n", map.len()));
            for child in map {
                render_child(child.name(), child.value(), out);
            }
            out.push('}');
        }
    }
}

fn render_child(name: &str, value: &TagValue, out: &mut String) {
    let mut inner = String::new();
    render(name, value, &mut inner);
    for line in inner.lines() {
        out.push_str(INDENT);
        out.push_str(line);
        out.push('\n');
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        render(&self.name, &self.value, &mut out);
        f.write_str(&out)
    }
}

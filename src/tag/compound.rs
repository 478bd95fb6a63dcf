//! Ordered name → tag mapping backing compound values.
//!
//! The ordering policy is fixed when the map is created and only affects
//! iteration (and therefore encoding) order.  Lookup and insert semantics are
//! the same for every policy: a child is keyed by its own name and a second
//! `put` under the same name replaces the first.

use std::collections::HashMap;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use super::{ListTag, Tag, TagValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MapOrder {
    /// Children iterate in the order they were first inserted.
    #[default]
    Insertion,
    /// Children iterate by ascending name.
    Ascending,
    /// Children iterate by descending name.
    Descending,
}

#[derive(Debug, Clone, Default)]
pub struct CompoundMap {
    order:     MapOrder,
    /// Kept in iteration order at all times.
    entries:   Vec<Tag>,
    /// Name → position, maintained for `Insertion` only; the sorted policies
    /// binary-search `entries` instead.
    positions: HashMap<String, usize>,
}

impl CompoundMap {
    pub fn new() -> Self {
        Self::with_order(MapOrder::Insertion)
    }

    pub fn with_order(order: MapOrder) -> Self {
        Self { order, entries: Vec::new(), positions: HashMap::new() }
    }

    pub fn order(&self) -> MapOrder {
        self.order
    }

    /// `Ok(position)` if `name` is present, otherwise `Err(insert_position)`.
    fn find(&self, name: &str) -> Result<usize, usize> {
        match self.order {
            MapOrder::Insertion => self.positions.get(name).copied().ok_or(self.entries.len()),
            MapOrder::Ascending => self.entries.binary_search_by(|t| t.name().cmp(name)),
            MapOrder::Descending => self.entries.binary_search_by(|t| name.cmp(t.name())),
        }
    }

    /// Insert `tag` under its own name, returning the child it replaced.
    /// A replaced child keeps its iteration position.
    pub fn put(&mut self, tag: Tag) -> Option<Tag> {
        match self.find(tag.name()) {
            Ok(i) => Some(std::mem::replace(&mut self.entries[i], tag)),
            Err(pos) => {
                if self.order == MapOrder::Insertion {
                    self.positions.insert(tag.name().to_owned(), pos);
                }
                self.entries.insert(pos, tag);
                None
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Tag> {
        self.find(name).ok().map(|i| &self.entries[i])
    }

    /// Mutable access to a child's value.  The name stays fixed so the map's
    /// ordering cannot be broken through this handle.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut TagValue> {
        match self.find(name) {
            Ok(i) => Some(self.entries[i].value_mut()),
            Err(_) => None,
        }
    }

    pub fn get_value(&self, name: &str) -> Option<&TagValue> {
        self.get(name).map(Tag::value)
    }

    pub fn remove(&mut self, name: &str) -> Option<Tag> {
        let i = self.find(name).ok()?;
        let removed = self.entries.remove(i);
        if self.order == MapOrder::Insertion {
            self.positions.remove(name);
            for pos in self.positions.values_mut() {
                if *pos > i {
                    *pos -= 1;
                }
            }
        }
        Some(removed)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.find(name).is_ok()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.positions.clear();
    }

    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
    pub fn iter(&self) -> std::slice::Iter<'_, Tag> { self.entries.iter() }
    pub fn names(&self) -> impl Iterator<Item = &str> { self.entries.iter().map(Tag::name) }

    // ── Typed getters ────────────────────────────────────────────────────────
    //
    // `None` when the child is absent or holds a different type.

    pub fn get_byte(&self, name: &str) -> Option<i8> { self.get_value(name)?.as_byte() }
    pub fn get_bool(&self, name: &str) -> Option<bool> { self.get_value(name)?.as_bool() }
    pub fn get_short(&self, name: &str) -> Option<i16> { self.get_value(name)?.as_short() }
    pub fn get_int(&self, name: &str) -> Option<i32> { self.get_value(name)?.as_int() }
    pub fn get_long(&self, name: &str) -> Option<i64> { self.get_value(name)?.as_long() }
    pub fn get_float(&self, name: &str) -> Option<f32> { self.get_value(name)?.as_float() }
    pub fn get_double(&self, name: &str) -> Option<f64> { self.get_value(name)?.as_double() }
    pub fn get_str(&self, name: &str) -> Option<&str> { self.get_value(name)?.as_str() }
    pub fn get_list(&self, name: &str) -> Option<&ListTag> { self.get_value(name)?.as_list() }
    pub fn get_compound(&self, name: &str) -> Option<&CompoundMap> { self.get_value(name)?.as_compound() }
}

// Equal when both iterate the same children in the same order, whatever
// their ordering policies.
impl PartialEq for CompoundMap {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl FromIterator<Tag> for CompoundMap {
    fn from_iter<I: IntoIterator<Item = Tag>>(iter: I) -> Self {
        let mut map = CompoundMap::new();
        map.extend(iter);
        map
    }
}

impl Extend<Tag> for CompoundMap {
    fn extend<I: IntoIterator<Item = Tag>>(&mut self, iter: I) {
        for tag in iter {
            self.put(tag);
        }
    }
}

impl IntoIterator for CompoundMap {
    type Item = Tag;
    type IntoIter = std::vec::IntoIter<Tag>;
    fn into_iter(self) -> Self::IntoIter { self.entries.into_iter() }
}

impl<'a> IntoIterator for &'a CompoundMap {
    type Item = &'a Tag;
    type IntoIter = std::slice::Iter<'a, Tag>;
    fn into_iter(self) -> Self::IntoIter { self.entries.iter() }
}

impl Serialize for CompoundMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for tag in &self.entries {
            map.serialize_entry(tag.name(), tag.value())?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn names(map: &CompoundMap) -> Vec<String> {
        map.names().map(str::to_owned).collect()
    }

    #[test]
    fn put_replaces_in_place() {
        let mut map = CompoundMap::new();
        assert!(map.put(Tag::int("a", 1)).is_none());
        map.put(Tag::int("b", 2));
        let old = map.put(Tag::string("a", "again")).unwrap();
        assert_eq!(old, Tag::int("a", 1));
        assert_eq!(map.len(), 2);
        assert_eq!(names(&map), ["a", "b"]);
        assert_eq!(map.get_str("a"), Some("again"));
        assert_eq!(map.get_int("a"), None);
    }

    #[test]
    fn remove_keeps_positions_consistent() {
        let mut map: CompoundMap = ["a", "b", "c", "d"].iter().map(|n| Tag::byte(*n, 0)).collect();
        assert!(map.remove("b").is_some());
        assert!(map.remove("b").is_none());
        assert_eq!(map.get("d").map(Tag::name), Some("d"));
        map.put(Tag::byte("b", 1));
        assert_eq!(names(&map), ["a", "c", "d", "b"]);
    }

    #[test]
    fn equality_ignores_policy() {
        let mut asc = CompoundMap::with_order(MapOrder::Ascending);
        asc.put(Tag::int("b", 2));
        asc.put(Tag::int("a", 1));
        let ins: CompoundMap = vec![Tag::int("a", 1), Tag::int("b", 2)].into_iter().collect();
        assert_eq!(asc, ins);
        let rev: CompoundMap = vec![Tag::int("b", 2), Tag::int("a", 1)].into_iter().collect();
        assert_ne!(rev, ins);
    }

    proptest! {
        #[test]
        fn policies_match_reference(keys in prop::collection::hash_set("[a-zA-Z0-9_]{0,8}", 0..40)) {
            let keys: Vec<String> = keys.into_iter().collect();

            let mut ins = CompoundMap::with_order(MapOrder::Insertion);
            let mut asc = CompoundMap::with_order(MapOrder::Ascending);
            let mut desc = CompoundMap::with_order(MapOrder::Descending);
            for (i, k) in keys.iter().enumerate() {
                ins.put(Tag::int(k.clone(), i as i32));
                asc.put(Tag::int(k.clone(), i as i32));
                desc.put(Tag::int(k.clone(), i as i32));
            }

            let mut sorted = keys.clone();
            sorted.sort();
            let mut reversed = sorted.clone();
            reversed.reverse();

            prop_assert_eq!(names(&ins), keys.clone());
            prop_assert_eq!(names(&asc), sorted);
            prop_assert_eq!(names(&desc), reversed);
            for (i, k) in keys.iter().enumerate() {
                prop_assert_eq!(asc.get_int(k), Some(i as i32));
                prop_assert_eq!(desc.get_int(k), Some(i as i32));
            }
        }
    }
}

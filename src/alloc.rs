//! Free-sector bitmap for region writes.
//!
//! One bit per 4 KiB sector, `1` = used.  The map grows on demand: any sector
//! past the end is free, so a first-fit search always succeeds, at worst by
//! appending.

use crate::index::HEADER_SECTORS;

#[derive(Debug, Clone, Default)]
pub struct SectorMap {
    words: Vec<u64>,
}

impl SectorMap {
    pub fn new() -> Self {
        Self { words: Vec::new() }
    }

    /// A map with the two header sectors already taken.
    pub fn with_header() -> Self {
        let mut map = Self::new();
        map.mark(0, HEADER_SECTORS);
        map
    }

    /// Mark `count` sectors starting at `start` as used.  Returns `true` if
    /// any of them already was.
    pub fn mark(&mut self, start: usize, count: usize) -> bool {
        let end = start + count;
        let needed = end.div_ceil(64);
        if needed > self.words.len() {
            self.words.resize(needed, 0);
        }
        let mut overlapped = false;
        for sector in start..end {
            let (word, bit) = (sector / 64, sector % 64);
            overlapped |= self.words[word] & (1u64 << bit) != 0;
            self.words[word] |= 1u64 << bit;
        }
        overlapped
    }

    pub fn is_used(&self, sector: usize) -> bool {
        match self.words.get(sector / 64) {
            Some(word) => word & (1u64 << (sector % 64)) != 0,
            None => false,
        }
    }

    /// First free sector at or after `from`.
    pub fn next_clear(&self, from: usize) -> usize {
        let mut word_idx = from / 64;
        let mut masked = match self.words.get(word_idx) {
            // Treat bits below `from` as used.
            Some(word) => word | ((1u64 << (from % 64)) - 1),
            None => return from,
        };
        loop {
            if masked != u64::MAX {
                return word_idx * 64 + (!masked).trailing_zeros() as usize;
            }
            word_idx += 1;
            match self.words.get(word_idx) {
                Some(word) => masked = *word,
                None => return word_idx * 64,
            }
        }
    }

    /// Start of the lowest run of `count` free sectors.  When the window
    /// hits a used sector it jumps to the next free one after it.
    pub fn first_fit(&self, count: usize) -> usize {
        let mut start = self.next_clear(0);
        loop {
            match (start..start + count).find(|s| self.is_used(*s)) {
                None => return start,
                Some(used) => start = self.next_clear(used + 1),
            }
        }
    }

    /// Highest used sector, if any.
    pub fn last_used(&self) -> Option<usize> {
        self.words
            .iter()
            .enumerate()
            .rev()
            .find(|(_, w)| **w != 0)
            .map(|(i, w)| i * 64 + 63 - w.leading_zeros() as usize)
    }

    pub fn used_count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_reserved() {
        let map = SectorMap::with_header();
        assert!(map.is_used(0) && map.is_used(1));
        assert!(!map.is_used(2));
        assert_eq!(map.first_fit(1), 2);
        assert_eq!(map.last_used(), Some(1));
    }

    #[test]
    fn first_fit_skips_short_holes() {
        let mut map = SectorMap::with_header();
        map.mark(3, 1); // hole of one at 2
        map.mark(6, 2); // hole of two at 4..6
        assert_eq!(map.first_fit(1), 2);
        assert_eq!(map.first_fit(2), 4);
        assert_eq!(map.first_fit(3), 8);
    }

    #[test]
    fn next_clear_across_words() {
        let mut map = SectorMap::new();
        map.mark(0, 130);
        assert_eq!(map.next_clear(0), 130);
        assert_eq!(map.next_clear(64), 130);
        assert_eq!(map.next_clear(131), 131);
        assert_eq!(map.next_clear(500), 500);
        assert_eq!(map.last_used(), Some(129));
        assert_eq!(map.used_count(), 130);
    }

    #[test]
    fn mark_reports_overlap() {
        let mut map = SectorMap::with_header();
        assert!(!map.mark(2, 3));
        assert!(map.mark(4, 2));
        assert!(map.mark(1, 1));
    }

    #[test]
    fn empty_map() {
        let map = SectorMap::new();
        assert_eq!(map.last_used(), None);
        assert_eq!(map.first_fit(255), 0);
    }
}

//! Growable per-slot flag vector.
//!
//! Invariants:
//! - Storage only grows, and only when a set bit lies past the current capacity.
//! - Growth preserves every existing bit.
//! - Bits past the capacity read as clear; clearing them never allocates.

const WORD_BITS: usize = u32::BITS as usize;

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BitSet {
    words: Vec<u32>,
}

impl BitSet {
    pub const fn new() -> Self {
        Self { words: Vec::new() }
    }

    /// Number of bits addressable without growing.
    pub fn capacity(&self) -> usize {
        self.words.len() * WORD_BITS
    }

    pub fn test(&self, index: usize) -> bool {
        match self.words.get(index / WORD_BITS) {
            Some(word) => word & (1 << (index % WORD_BITS)) != 0,
            None => false,
        }
    }

    pub fn set(&mut self, index: usize) {
        let word = index / WORD_BITS;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1 << (index % WORD_BITS);
    }

    pub fn clear(&mut self, index: usize) {
        if let Some(word) = self.words.get_mut(index / WORD_BITS) {
            *word &= !(1 << (index % WORD_BITS));
        }
    }

    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|word| word.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|word| *word == 0)
    }

    pub fn clear_all(&mut self) {
        self.words.fill(0);
    }
}

#[cfg(all(test, not(miri)))]
mod tests {
    use super::*;

    #[test]
    fn empty_set_reads_clear_without_storage() {
        let bits = BitSet::new();
        assert_eq!(bits.capacity(), 0);
        assert!(!bits.test(0));
        assert!(!bits.test(1000));
        assert!(bits.is_empty());
    }

    #[test]
    fn growth_tracks_highest_index_and_keeps_bits() {
        let mut bits = BitSet::new();
        bits.set(3);
        assert_eq!(bits.capacity(), 32);
        bits.set(70);
        assert_eq!(bits.capacity(), 96);
        assert!(bits.test(3));
        assert!(bits.test(70));
        assert!(!bits.test(4));
        assert_eq!(bits.count_ones(), 2);
    }

    #[test]
    fn clearing_out_of_range_does_not_grow() {
        let mut bits = BitSet::new();
        bits.set(1);
        bits.clear(500);
        assert_eq!(bits.capacity(), 32);
        bits.clear(1);
        assert!(bits.is_empty());
    }

    #[test]
    fn word_boundaries() {
        let mut bits = BitSet::new();
        for index in [31, 32, 63, 64] {
            bits.set(index);
        }
        for index in [31, 32, 63, 64] {
            assert!(bits.test(index), "bit {index}");
        }
        assert!(!bits.test(30));
        assert!(!bits.test(33));
        bits.clear_all();
        assert!(bits.is_empty());
        assert_eq!(bits.capacity(), 96);
    }
}

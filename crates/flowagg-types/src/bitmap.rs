//! Fixed 256-bit bitmap indexed by a byte value.

/// A bitset with one bit for every possible `u8`.
#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub struct ByteBitmap {
    words: [u64; 4],
}

impl ByteBitmap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bit for `value`. Returns true if it was previously clear.
    pub fn set(&mut self, value: u8) -> bool {
        let word = &mut self.words[(value >> 6) as usize];
        let mask = 1u64 << (value & 63);
        let was_clear = *word & mask == 0;
        *word |= mask;
        was_clear
    }

    pub fn get(&self, value: u8) -> bool {
        (self.words[(value >> 6) as usize] >> (value & 63)) & 1 == 1
    }

    /// Number of set bits.
    pub fn count(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }

    pub fn clear(&mut self) {
        self.words = [0; 4];
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Set values in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        (0..=255u8).filter(move |&v| self.get(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_count() {
        let mut bm = ByteBitmap::new();
        assert!(bm.is_empty());
        assert!(bm.set(0));
        assert!(bm.set(255));
        assert!(bm.set(64));
        assert!(!bm.set(64));
        assert_eq!(bm.count(), 3);
        assert!(bm.get(255));
        assert!(!bm.get(1));
    }

    #[test]
    fn test_iter_ascending() {
        let mut bm = ByteBitmap::new();
        for v in [200u8, 3, 130, 64, 63] {
            bm.set(v);
        }
        let got: Vec<u8> = bm.iter().collect();
        assert_eq!(got, vec![3, 63, 64, 130, 200]);
    }

    #[test]
    fn test_clear() {
        let mut bm = ByteBitmap::new();
        for v in 0..=255u8 {
            bm.set(v);
        }
        assert_eq!(bm.count(), 256);
        bm.clear();
        assert_eq!(bm.count(), 0);
        assert_eq!(bm.iter().count(), 0);
    }
}

//! Borrowed view of one output bin.

use flowagg_types::serialization::put_uint_saturating;

/// A bin as handed to output callbacks and iterators.
///
/// `distinct` holds one column per distinct field, each carrying the
/// count of unique values saturated to that field's width. The exact
/// counts are in `distinct_counts`.
#[derive(Debug, Clone, Copy)]
pub struct BinRef<'a> {
    pub key: &'a [u8],
    pub value: &'a [u8],
    pub distinct: &'a [u8],
    pub distinct_counts: &'a [u64],
}

impl<'a> BinRef<'a> {
    pub fn key(&self) -> &'a [u8] {
        self.key
    }

    pub fn value(&self) -> &'a [u8] {
        self.value
    }

    pub fn distinct(&self) -> &'a [u8] {
        self.distinct
    }

    pub fn distinct_counts(&self) -> &'a [u64] {
        self.distinct_counts
    }
}

/// Write `counts` into a distinct output row laid out by `widths`.
///
/// Columns wider than eight bytes carry the count in their first eight
/// bytes in host order and zeros after.
pub fn encode_distinct_counts(widths: &[usize], counts: &[u64], out: &mut [u8]) {
    let mut offset = 0;
    for (&width, &count) in widths.iter().zip(counts) {
        let column = &mut out[offset..offset + width];
        if width <= 8 {
            put_uint_saturating(column, count);
        } else {
            column.fill(0);
            column[..8].copy_from_slice(&count.to_ne_bytes());
        }
        offset += width;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_saturates_narrow_columns() {
        let mut out = [0u8; 1 + 2 + 16];
        encode_distinct_counts(&[1, 2, 16], &[300, 7, 1 << 40], &mut out);
        assert_eq!(out[0], 255);
        assert_eq!(u16::from_ne_bytes([out[1], out[2]]), 7);
        let mut wide = [0u8; 8];
        wide.copy_from_slice(&out[3..11]);
        assert_eq!(u64::from_ne_bytes(wide), 1 << 40);
        assert!(out[11..].iter().all(|&b| b == 0));
    }
}

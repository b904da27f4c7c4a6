//! Address splitting for set-associative structures.

use crate::error::ConfigError;

/// Page size used by the page-indexed (TLB) levels.
pub const PAGE_BITS: u32 = 12;
pub const PAGE_SIZE: u64 = 1 << PAGE_BITS;

#[inline]
pub fn page_of(addr: u64) -> u64 {
    addr >> PAGE_BITS
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Addr {
    pub offset: u64,
    pub set: usize,
    pub tag: u64,
}

#[derive(Debug, Clone, Copy)]
struct BitSection {
    shift: u32,
    mask: u64,
}

impl BitSection {
    #[inline]
    fn apply(&self, num: u64) -> u64 {
        (num >> self.shift) & self.mask
    }
}

/// Splits an address into `{tag, set, offset}`.
///
/// The tag is the full block number (`addr >> line_shift`), not only the bits
/// above the set index, so a tag alone identifies a block and can be turned
/// back into an address with [`AddressDecoder::block_addr`].
#[derive(Debug, Clone, Copy)]
pub struct AddressDecoder {
    line_size: u64,
    offset_sec: BitSection,
    set_sec: BitSection,
}

impl AddressDecoder {
    pub fn new(name: &str, line_size: u64, n_sets: u64) -> Result<Self, ConfigError> {
        if !line_size.is_power_of_two() {
            return Err(ConfigError::LineSize {
                name: name.to_string(),
                line_size,
            });
        }
        if !n_sets.is_power_of_two() {
            return Err(ConfigError::SetCount {
                name: name.to_string(),
                sets: n_sets,
            });
        }
        Ok(AddressDecoder {
            line_size,
            offset_sec: BitSection {
                shift: 0,
                mask: line_size - 1,
            },
            set_sec: BitSection {
                shift: 0,
                mask: n_sets - 1,
            },
        })
    }

    #[inline]
    pub fn line_shift(&self) -> u32 {
        self.line_size.trailing_zeros()
    }

    #[inline]
    pub fn line_size(&self) -> u64 {
        self.line_size
    }

    #[inline]
    pub fn set_index_mask(&self) -> u64 {
        self.set_sec.mask
    }

    #[inline]
    pub fn split(&self, addr: u64) -> Addr {
        let tag = addr >> self.line_shift();
        Addr {
            offset: self.offset_sec.apply(addr),
            set: self.set_sec.apply(tag) as usize,
            tag,
        }
    }

    /// Same as [`split`](Self::split) but keyed on the page number. The offset
    /// is the offset within the page.
    #[inline]
    pub fn split_page(&self, addr: u64) -> Addr {
        let tag = page_of(addr);
        Addr {
            offset: addr & (PAGE_SIZE - 1),
            set: self.set_sec.apply(tag) as usize,
            tag,
        }
    }

    #[inline]
    pub fn block_addr(&self, tag: u64) -> u64 {
        tag << self.line_shift()
    }

    /// Start addresses of every line touched by `[addr, addr + size)`.
    pub fn lines(&self, addr: u64, size: u64) -> impl Iterator<Item = u64> {
        let line_size = self.line_size;
        let first = addr & !(line_size - 1);
        let end = addr.saturating_add(size.max(1));
        let mut next = Some(first);
        std::iter::from_fn(move || {
            let cur = next?;
            next = cur.checked_add(line_size).filter(|&n| n < end);
            Some(cur)
        })
    }

    #[inline]
    pub fn crosses_line(&self, addr: u64, size: u64) -> bool {
        self.offset_sec.apply(addr) + size.max(1) > self.line_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_uses_line_tag_for_index() {
        let dec = AddressDecoder::new("t", 64, 128).unwrap();
        assert_eq!(dec.set_index_mask(), 127);
        let a = dec.split(0x1_2345);
        assert_eq!(a.tag, 0x1_2345 >> 6);
        assert_eq!(a.set, ((0x1_2345u64 >> 6) & 127) as usize);
        assert_eq!(a.offset, 0x1_2345 & 63);
        assert_eq!(dec.block_addr(a.tag), 0x1_2340);
    }

    #[test]
    fn rejects_non_power_of_two() {
        assert!(matches!(
            AddressDecoder::new("t", 48, 128),
            Err(ConfigError::LineSize { line_size: 48, .. })
        ));
        assert!(matches!(
            AddressDecoder::new("t", 64, 96),
            Err(ConfigError::SetCount { sets: 96, .. })
        ));
        assert!(AddressDecoder::new("t", 64, 0).is_err());
    }

    #[test]
    fn page_split() {
        let dec = AddressDecoder::new("tlb", 4096, 16).unwrap();
        let a = dec.split_page(0x7_3456);
        assert_eq!(a.tag, 0x73);
        assert_eq!(a.set, 0x3);
        assert_eq!(a.offset, 0x456);
    }

    #[test]
    fn lines_spanned() {
        let dec = AddressDecoder::new("t", 64, 4).unwrap();
        assert_eq!(dec.lines(0x3c, 8).collect::<Vec<_>>(), vec![0x00, 0x40]);
        assert_eq!(dec.lines(0x40, 8).collect::<Vec<_>>(), vec![0x40]);
        assert_eq!(dec.lines(0x10, 200).count(), 4);
        assert!(dec.crosses_line(0x3c, 8));
        assert!(!dec.crosses_line(0x38, 8));
    }

    #[test]
    fn lines_at_top_of_address_space() {
        let dec = AddressDecoder::new("t", 64, 4).unwrap();
        assert_eq!(dec.lines(u64::MAX - 7, 8).collect::<Vec<_>>(), vec![u64::MAX & !63]);
        assert_eq!(dec.lines(u64::MAX - 67, 8).count(), 2);
    }
}

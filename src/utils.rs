//! Helper functions for address and size arithmetic that don't particularly
//! belong to any concrete component of the allocator.

/// Word alignment of every header, payload and size the allocator hands out.
pub const ALIGNMENT: usize = 8;

/// It aligns `to_be_aligned` up to the next multiple of `alignment`.
///
/// `alignment` must be a power of two. This is used to round payload sizes to
/// [`ALIGNMENT`] and to round growth requests to the configured increment's
/// granularity.
#[inline]
pub const fn align(to_be_aligned: usize, alignment: usize) -> usize {
    (to_be_aligned + alignment - 1) & !(alignment - 1)
}

/// Rounds `value` up to a multiple of `step`, where `step` does not need to
/// be a power of two.
#[inline]
pub(crate) fn round_up_to_multiple(value: usize, step: usize) -> Option<usize> {
    value.div_ceil(step).checked_mul(step)
}

/// Bytes needed to move `addr` forward to the next [`ALIGNMENT`] boundary.
#[inline]
pub(crate) fn padding_for(addr: *mut u8) -> usize {
    align(addr.addr(), ALIGNMENT) - addr.addr()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_word_size() {
        let aligments = vec![(1..8, 8), (9..16, 16), (17..24, 24), (25..32, 32)];

        for (sizes, expected) in aligments {
            for size in sizes {
                assert_eq!(expected, align(size, ALIGNMENT));
            }
        }
        assert_eq!(0, align(0, ALIGNMENT));
    }

    #[test]
    fn round_up_to_arbitrary_step() {
        assert_eq!(round_up_to_multiple(1, 1000), Some(1000));
        assert_eq!(round_up_to_multiple(1000, 1000), Some(1000));
        assert_eq!(round_up_to_multiple(1001, 1000), Some(2000));
        assert_eq!(round_up_to_multiple(usize::MAX, 1000), None);
    }

    #[test]
    fn padding_to_next_word() {
        let base = std::ptr::without_provenance_mut::<u8>(0x1000);
        assert_eq!(padding_for(base), 0);
        assert_eq!(padding_for(base.wrapping_add(3)), 5);
    }
}

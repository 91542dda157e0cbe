//! CPU-feature dispatch for the array change-scan.
//!
//! At startup, probe the host CPU once and pick a word-diff strategy
//! function pointer. The strategies are required only to agree on
//! *where* the first differing byte is; which one runs is a performance
//! choice, never a correctness one.

use raw_cpuid::CpuId;

/// Finds the byte offset of the first difference between two equal-length
/// buffers, scanning in machine-word-sized strides via XOR and a
/// trailing-zero count (lowest-set-bit-of-XOR).
pub type WordDiff = fn(&[u8], &[u8]) -> Option<usize>;

/// Byte-at-a-time fallback; always correct, used on any architecture or
/// when the host doesn't report the wider feature set.
pub fn diff_offset_generic(old: &[u8], new: &[u8]) -> Option<usize> {
    debug_assert_eq!(old.len(), new.len());
    old.iter().zip(new.iter()).position(|(a, b)| a != b)
}

/// Scans 8 bytes at a time using u64 XOR + `trailing_zeros`, falling back
/// to `diff_offset_generic` for the tail that doesn't fill a whole word.
/// This is the "wide" strategy, selected when the host CPU looks capable
/// of fast unaligned 64-bit loads.
pub fn diff_offset_wide(old: &[u8], new: &[u8]) -> Option<usize> {
    debug_assert_eq!(old.len(), new.len());
    let len = old.len();
    let words = len / 8;
    for i in 0..words {
        let o = u64::from_ne_bytes(old[i * 8..i * 8 + 8].try_into().unwrap());
        let n = u64::from_ne_bytes(new[i * 8..i * 8 + 8].try_into().unwrap());
        let x = o ^ n;
        if x != 0 {
            return Some(i * 8 + (x.trailing_zeros() / 8) as usize);
        }
    }
    let tail_start = words * 8;
    diff_offset_generic(&old[tail_start..], &new[tail_start..]).map(|o| tail_start + o)
}

/// Probe the host CPU once and select the word-diff strategy: the wide
/// strategy when the feature set allows it, otherwise the byte-at-a-time
/// fallback.
pub fn select_word_diff() -> WordDiff {
    let cpuid = CpuId::new();
    let has_sse2 = cpuid
        .get_feature_info()
        .map(|f| f.has_sse2())
        .unwrap_or(false);

    if has_sse2 {
        diff_offset_wide
    } else {
        diff_offset_generic
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generic_finds_first_difference() {
        let a = [0u8, 0, 0, 5, 0, 0, 0, 0];
        let b = [0u8, 0, 0, 9, 0, 0, 0, 0];
        assert_eq!(diff_offset_generic(&a, &b), Some(3));
    }

    #[test]
    fn wide_agrees_with_generic_across_word_boundary() {
        let a = [0u8; 20];
        let mut b = a;
        b[11] = 1;
        assert_eq!(diff_offset_wide(&a, &b), diff_offset_generic(&a, &b));
        assert_eq!(diff_offset_wide(&a, &b), Some(11));
    }

    #[test]
    fn no_difference_returns_none() {
        let a = [1u8, 2, 3, 4, 5, 6, 7, 8, 9];
        assert_eq!(diff_offset_generic(&a, &a), None);
        assert_eq!(diff_offset_wide(&a, &a), None);
    }

    #[test]
    fn select_word_diff_returns_a_usable_function() {
        let f = select_word_diff();
        let a = [0u8; 8];
        let mut b = a;
        b[2] = 7;
        assert_eq!(f(&a, &b), Some(2));
    }
}

//! Stable 16-byte parameter identifiers.
//!
//! Plugin parameters are addressed on the wire by a 16-byte hash of their
//! stable string id, so the event payload never carries variable-length
//! strings.

/// 16-byte stable parameter id hash.
pub type Uid16 = [u8; 16];

/// FNV-1a 64-bit, seeded.
pub fn fnv1a64(input: &str, seed: u64) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64 ^ seed;
    for byte in input.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// Two independently-seeded FNV-1a halves concatenated little-endian.
pub fn uid16_for_stable_id(stable_id: &str) -> Uid16 {
    let lo = fnv1a64(stable_id, 0x9e37_79b9_7f4a_7c15);
    let hi = fnv1a64(stable_id, 0xbf58_476d_1ce4_e5b9);
    let mut out = [0u8; 16];
    out[..8].copy_from_slice(&lo.to_le_bytes());
    out[8..].copy_from_slice(&hi.to_le_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        let a = uid16_for_stable_id("cutoff");
        let b = uid16_for_stable_id("cutoff");
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_ids_diverge() {
        assert_ne!(uid16_for_stable_id("cutoff"), uid16_for_stable_id("resonance"));
    }

    #[test]
    fn seeds_are_independent() {
        let id = uid16_for_stable_id("gain");
        assert_ne!(&id[..8], &id[8..]);
    }

    #[test]
    fn empty_id_hashes_to_seeded_basis() {
        let id = uid16_for_stable_id("");
        let lo = u64::from_le_bytes(id[..8].try_into().unwrap());
        assert_eq!(lo, 0xcbf2_9ce4_8422_2325u64 ^ 0x9e37_79b9_7f4a_7c15);
    }
}

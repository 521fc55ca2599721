//! Keyed halfsiphash-2-4 with a 32-bit output
//!
//! The 32-bit variant of SipHash, following the reference
//! implementation. The hash containers reserve the values 0 (empty)
//! and 1 (tombstone) as slot-table sentinels, so [`keyed_hash`]
//! rewrites those outputs to 2.

macro_rules! sipround {
    ($v0:ident, $v1:ident, $v2:ident, $v3:ident) => {
        $v0 = $v0.wrapping_add($v1);
        $v1 = $v1.rotate_left(5);
        $v1 ^= $v0;
        $v0 = $v0.rotate_left(16);
        $v2 = $v2.wrapping_add($v3);
        $v3 = $v3.rotate_left(8);
        $v3 ^= $v2;
        $v0 = $v0.wrapping_add($v3);
        $v3 = $v3.rotate_left(7);
        $v3 ^= $v0;
        $v2 = $v2.wrapping_add($v1);
        $v1 = $v1.rotate_left(13);
        $v1 ^= $v2;
        $v2 = $v2.rotate_left(16);
    };
}

/// halfsiphash-2-4 of `data` under `key` (low word k0, high word k1).
pub fn halfsiphash(data: &[u8], key: u64) -> u32 {
    let k0 = key as u32;
    let k1 = (key >> 32) as u32;

    let mut v0 = k0;
    let mut v1 = k1;
    let mut v2 = 0x6c79_6765_u32 ^ k0;
    let mut v3 = 0x7465_6462_u32 ^ k1;

    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let m = u32::from_le_bytes(chunk.try_into().unwrap());
        v3 ^= m;
        sipround!(v0, v1, v2, v3);
        sipround!(v0, v1, v2, v3);
        v0 ^= m;
    }

    let mut b = (data.len() as u32) << 24;
    for (i, &byte) in chunks.remainder().iter().enumerate() {
        b |= (byte as u32) << (8 * i);
    }
    v3 ^= b;
    sipround!(v0, v1, v2, v3);
    sipround!(v0, v1, v2, v3);
    v0 ^= b;

    v2 ^= 0xff;
    sipround!(v0, v1, v2, v3);
    sipround!(v0, v1, v2, v3);
    sipround!(v0, v1, v2, v3);
    sipround!(v0, v1, v2, v3);

    v1 ^ v3
}

/// Hash `data` under `key`, avoiding the slot-table sentinel values:
/// the result is always at least 2.
pub fn keyed_hash(data: &[u8], key: u64) -> u32 {
    let out = halfsiphash(data, key);
    if out < 2 {
        2
    } else {
        out
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    const KEY: u64 = 0x0706_0504_0302_0100;

    #[test]
    fn test_deterministic() {
        let a = halfsiphash(b"hello world", KEY);
        let b = halfsiphash(b"hello world", KEY);
        assert_eq!(a, b);
    }

    #[test]
    fn test_input_sensitivity() {
        let a = halfsiphash(b"abcd", KEY);
        let b = halfsiphash(b"abce", KEY);
        let c = halfsiphash(b"abcd\0", KEY);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_key_sensitivity() {
        let a = halfsiphash(b"abcd", KEY);
        let b = halfsiphash(b"abcd", KEY ^ 1);
        assert_ne!(a, b);
    }

    #[test]
    fn test_all_lengths() {
        // exercise every remainder branch
        let data = b"0123456789";
        let mut seen = std::collections::HashSet::new();
        for len in 0..=data.len() {
            seen.insert(halfsiphash(&data[..len], KEY));
        }
        assert_eq!(seen.len(), data.len() + 1);
    }

    #[test]
    fn test_keyed_hash_avoids_sentinels() {
        for i in 0..1000u32 {
            let h = keyed_hash(&i.to_le_bytes(), KEY.wrapping_add(i as u64));
            assert!(h >= 2);
        }
    }
}

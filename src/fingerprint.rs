//! Content fingerprinting for change detection.
//!
//! FNV-1a over the UTF-16 code units of the text, 32-bit state. This is an
//! equality check, not an integrity check: collisions are possible and the
//! snapshot engine tolerates them.

use std::fmt;

const OFFSET_BASIS: u32 = 2_166_136_261;

/// Fixed-width fingerprint of a Document.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(pub u32);

impl Fingerprint {
    /// Lowercase hex, always 8 characters.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0.to_be_bytes())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Fingerprint `text`.
pub fn fingerprint(text: &str) -> Fingerprint {
    let mut h = OFFSET_BASIS;
    for unit in text.encode_utf16() {
        h ^= u32::from(unit);
        // h * 16777619, the FNV prime 2^24 + 2^8 + 2^7 + 2^4 + 2^1 + 1
        h = h
            .wrapping_add(h << 1)
            .wrapping_add(h << 4)
            .wrapping_add(h << 7)
            .wrapping_add(h << 8)
            .wrapping_add(h << 24);
    }
    Fingerprint(h)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vectors() {
        assert_eq!(fingerprint("").to_hex(), "811c9dc5");
        assert_eq!(fingerprint("a").to_hex(), "e40c292c");
        assert_eq!(fingerprint("foobar").to_hex(), "bf9cf968");
    }

    #[test]
    fn test_shift_sum_equals_prime_multiply() {
        let text = "[{\"id\":\"a\",\"title\":\"Untitled\"}]";
        let mut h = OFFSET_BASIS;
        for unit in text.encode_utf16() {
            h ^= u32::from(unit);
            h = h.wrapping_mul(16_777_619);
        }
        assert_eq!(fingerprint(text), Fingerprint(h));
    }

    #[test]
    fn test_hex_is_fixed_width() {
        for text in ["", "a", "[]", "x".repeat(1000).as_str()] {
            assert_eq!(fingerprint(text).to_hex().len(), 8);
        }
        assert_eq!(Fingerprint(0x1f).to_hex(), "0000001f");
    }

    #[test]
    fn test_distinguishes_small_edits() {
        let a = fingerprint("[{\"id\":\"a\"}]");
        let b = fingerprint("[{\"id\":\"b\"}]");
        assert_ne!(a, b);
        assert_eq!(a, fingerprint("[{\"id\":\"a\"}]"));
    }

    #[test]
    fn test_non_ascii_uses_utf16_units() {
        // One UTF-16 unit for 'é', a surrogate pair for each note.
        assert_ne!(fingerprint("é"), fingerprint("e"));
        assert_ne!(fingerprint("🎵"), fingerprint("🎶"));
    }
}

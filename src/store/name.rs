// src/store/name.rs

//! Store entry naming: `<hash>-<name>`
//!
//! The hash is 32 characters of Nix's base-32 alphabet, which is the digits
//! and lowercase letters minus `e`, `o`, `t` and `u`.

use crate::error::{Error, Result};

/// Length of a store hash in characters (and bytes)
pub const HASH_LEN: usize = 32;

/// Nix base-32 alphabet, in digit order
pub const ALPHABET: &[u8; 32] = b"0123456789abcdfghijklmnpqrsvwxyz";

/// Returns true if `c` may appear in a store hash
pub fn is_hash_char(c: u8) -> bool {
    matches!(c, b'0'..=b'9' | b'a'..=b'z') && !matches!(c, b'e' | b'o' | b't' | b'u')
}

/// Returns true if `hash` is exactly one valid store hash
pub fn is_valid_hash(hash: &str) -> bool {
    hash.len() == HASH_LEN && hash.bytes().all(is_hash_char)
}

/// Split a store name into its hash and human-readable name.
///
/// Rejects empty names, names containing `/`, hashes outside the alphabet,
/// and names without a `-` separator followed by a non-empty name.
pub fn parse_store_name(name: &str) -> Result<(&str, &str)> {
    let invalid = |reason: &str| Error::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    if name.contains('/') {
        return Err(invalid("name contains a '/'"));
    }
    let bytes = name.as_bytes();
    if bytes.len() < HASH_LEN || !bytes[..HASH_LEN].iter().all(|&c| is_hash_char(c)) {
        return Err(invalid("name doesn't start with a valid store hash"));
    }
    if bytes.get(HASH_LEN) != Some(&b'-') {
        return Err(invalid("hash isn't followed by '-'"));
    }
    if bytes.len() == HASH_LEN + 1 {
        return Err(invalid("name after the hash is empty"));
    }
    Ok((&name[..HASH_LEN], &name[HASH_LEN + 1..]))
}

/// Returns true if `name` is a valid `<hash>-<name>` store name
pub fn is_valid_store_name(name: &str) -> bool {
    parse_store_name(name).is_ok()
}

/// Encode bytes with Nix's base-32 scheme (used for NarHash and FileHash).
///
/// Nix encodes from the most significant 5-bit group of the little-endian
/// bit string, so the output is not the same as RFC 4648 base-32.
pub fn nix_base32_encode(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return String::new();
    }
    let len = (bytes.len() * 8 - 1) / 5 + 1;
    let mut out = String::with_capacity(len);
    for n in (0..len).rev() {
        let b = n * 5;
        let i = b / 8;
        let j = b % 8;
        let low = (bytes[i] as u16) >> j;
        let high = bytes.get(i + 1).map_or(0, |&c| (c as u16) << (8 - j));
        out.push(ALPHABET[((low | high) & 0x1f) as usize] as char);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alphabet_matches_hash_chars() {
        for c in 0u8..=255 {
            assert_eq!(is_hash_char(c), ALPHABET.contains(&c), "char {:?}", c as char);
        }
    }

    #[test]
    fn test_parse_valid_name() {
        let (hash, name) = parse_store_name("mil5crms7gfpv03vjj094zz1igvapv6i-go-1.20.2").unwrap();
        assert_eq!(hash, "mil5crms7gfpv03vjj094zz1igvapv6i");
        assert_eq!(name, "go-1.20.2");
    }

    #[test]
    fn test_parse_invalid_names() {
        for name in [
            "",
            "mil5crms7gfpv03vjj094zz1igvapv6i",
            "mil5crms7gfpv03vjj094zz1igvapv6i-",
            "mil5crms7gfpv03vjj094zz1igvapv6i_go",
            "mil5crms7gfpv03vjj094zz1igvapv6i-go/bin",
            "eeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee-removed",
            "MIL5CRMS7GFPV03VJJ094ZZ1IGVAPV6I-go",
            ".links",
            "short-name",
        ] {
            assert!(
                matches!(parse_store_name(name), Err(Error::InvalidName { .. })),
                "{:?} should be rejected",
                name
            );
        }
    }

    #[test]
    fn test_is_valid_hash() {
        assert!(is_valid_hash("yx99qh8pqwaqkb1n3dv7w2nf42mykkmh"));
        assert!(!is_valid_hash("yx99qh8pqwaqkb1n3dv7w2nf42mykkm"));
        assert!(!is_valid_hash("tx99qh8pqwaqkb1n3dv7w2nf42mykkmh"));
    }

    #[test]
    fn test_nix_base32_encode() {
        assert_eq!(nix_base32_encode(&[]), "");
        assert_eq!(nix_base32_encode(&[0x00]), "00");
        assert_eq!(nix_base32_encode(&[0x1f]), "0z");
        assert_eq!(nix_base32_encode(&[0xff]), "7z");
        // sha256 digests always encode to 52 characters of the store alphabet
        let encoded = nix_base32_encode(&[0xab; 32]);
        assert_eq!(encoded.len(), 52);
        assert!(encoded.bytes().all(is_hash_char));
    }

    #[test]
    fn test_nix_base32_known_digest() {
        use sha2::{Digest, Sha256};
        // `nix-hash --type sha256 --to-base32` of the empty string's digest
        assert_eq!(
            nix_base32_encode(&Sha256::digest(b"")),
            "0mdqa9w1p6cmli6976v4wi0sw9r4p5prkj7lzfd1877wk11c9c73"
        );
    }
}

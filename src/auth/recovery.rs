//! One-time recovery codes for TOTP bypass.
//!
//! Ten codes of the form `xxxx-xxxx` over the Crockford base32 alphabet.
//! Only bcrypt hashes are stored; the plaintext is shown to the user once
//! at enrollment.

use rand::{rngs::OsRng, Rng};

pub const CODE_COUNT: usize = 10;

/// Crockford base32: no i, l, o, u — unambiguous when read back by a human.
const ALPHABET: &[u8] = b"0123456789abcdefghjkmnpqrstvwxyz";

pub fn generate_codes() -> Vec<String> {
    (0..CODE_COUNT).map(|_| generate_code()).collect()
}

fn generate_code() -> String {
    let mut rng = OsRng;
    let mut code = String::with_capacity(9);
    for i in 0..8 {
        if i == 4 {
            code.push('-');
        }
        code.push(ALPHABET[rng.gen_range(0..ALPHABET.len())] as char);
    }
    code
}

/// Normalize user input before hashing or verifying: case, the optional
/// dash, and the Crockford confusables.
pub fn normalize(input: &str) -> String {
    input
        .trim()
        .chars()
        .filter(|c| *c != '-' && !c.is_whitespace())
        .map(|c| match c.to_ascii_lowercase() {
            'o' => '0',
            'i' | 'l' => '1',
            c => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_have_expected_shape() {
        let codes = generate_codes();
        assert_eq!(codes.len(), CODE_COUNT);
        for code in &codes {
            assert_eq!(code.len(), 9);
            assert_eq!(code.as_bytes()[4], b'-');
            for c in code.chars().filter(|c| *c != '-') {
                assert!(ALPHABET.contains(&(c as u8)), "unexpected char {c}");
            }
        }
    }

    #[test]
    fn normalize_folds_confusables() {
        assert_eq!(normalize("ABCD-EFGH"), "abcdefgh");
        assert_eq!(normalize(" k0Io-lv2x "), "k0101v2x");
        assert_eq!(normalize("abcd efgh"), "abcdefgh");
    }
}

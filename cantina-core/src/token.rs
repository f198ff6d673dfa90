//! Pickup tokens: opaque 13-digit codes with an EAN-13 check digit.
//!
//! The format is printable and scannable with commodity barcode hardware
//! and carries no personally identifying information.
use rand::Rng;
use thiserror::Error;

use crate::constants::{TOKEN_LEN, TOKEN_RETRY_LIMIT};

/// Errors raised by token allocation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    /// Every candidate collided with an existing token. With a 10^12
    /// keyspace this points at a data problem, not bad luck.
    #[error("pickup token allocation failed after {attempts} attempts")]
    Exhausted { attempts: u32 },
}

/// EAN-13 check digit for 12 digits: odd 1-indexed positions weigh 1,
/// even positions weigh 3, checksum = (10 - sum mod 10) mod 10.
#[must_use]
pub fn check_digit(d12: &str) -> Option<u8> {
    if d12.len() != 12 || !d12.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let sum: u32 = d12
        .bytes()
        .enumerate()
        .map(|(i, b)| {
            let n = u32::from(b - b'0');
            if (i + 1) % 2 == 0 { 3 * n } else { n }
        })
        .sum();
    Some(((10 - sum % 10) % 10) as u8)
}

/// Draw 12 random digits and append the check digit.
#[must_use]
pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> String {
    let mut code = String::with_capacity(TOKEN_LEN);
    for _ in 0..TOKEN_LEN - 1 {
        let digit: u8 = rng.gen_range(0..10);
        code.push(char::from(b'0' + digit));
    }
    let check = check_digit(&code).unwrap_or(0);
    code.push(char::from(b'0' + check));
    code
}

/// Whether `code` is exactly 13 digits with a correct check digit.
#[must_use]
pub fn is_valid(code: &str) -> bool {
    if code.len() != TOKEN_LEN || !code.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    check_digit(&code[..TOKEN_LEN - 1])
        .is_some_and(|check| check == code.as_bytes()[TOKEN_LEN - 1] - b'0')
}

/// Strip everything but digits from raw scanner input.
#[must_use]
pub fn normalize(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

/// Allocate a token not yet in use, retrying on collision.
///
/// `taken` answers against the ledger's token index; that index is also
/// the final arbiter at insert time, so this pre-check is an
/// optimization, not the safety net.
///
/// # Errors
///
/// Returns [`TokenError::Exhausted`] when every attempt collided.
pub fn allocate<R: Rng + ?Sized>(
    rng: &mut R,
    mut taken: impl FnMut(&str) -> bool,
) -> Result<String, TokenError> {
    for _ in 0..TOKEN_RETRY_LIMIT {
        let candidate = generate(rng);
        if !taken(&candidate) {
            return Ok(candidate);
        }
    }
    Err(TokenError::Exhausted {
        attempts: TOKEN_RETRY_LIMIT,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;
    use std::collections::HashSet;

    #[test]
    fn known_check_digits() {
        // Classic EAN-13 example: 400638133393 -> 1.
        assert_eq!(check_digit("400638133393"), Some(1));
        assert_eq!(check_digit("123456789012"), Some(8));
        assert_eq!(check_digit("12345"), None);
        assert_eq!(check_digit("40063813339x"), None);
    }

    #[test]
    fn generated_tokens_validate() {
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        for _ in 0..200 {
            let token = generate(&mut rng);
            assert_eq!(token.len(), TOKEN_LEN);
            assert!(is_valid(&token), "generated token failed checksum: {token}");
        }
    }

    #[test]
    fn validation_rejects_malformed_input() {
        assert!(!is_valid(""));
        assert!(!is_valid("4006381333931x"));
        assert!(!is_valid("400638133393")); // 12 digits
        assert!(is_valid("4006381333931"));
        assert!(!is_valid("4006381333930"));
    }

    #[test]
    fn single_digit_mutations_are_mostly_caught() {
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        let mut caught = 0u32;
        let mut total = 0u32;
        for _ in 0..50 {
            let token = generate(&mut rng);
            let bytes = token.as_bytes();
            for pos in 0..TOKEN_LEN {
                for digit in b'0'..=b'9' {
                    if digit == bytes[pos] {
                        continue;
                    }
                    let mut mutated = bytes.to_vec();
                    mutated[pos] = digit;
                    total += 1;
                    if !is_valid(&String::from_utf8(mutated).unwrap()) {
                        caught += 1;
                    }
                }
            }
        }
        // EAN-13 catches every single-digit substitution.
        assert!(f64::from(caught) / f64::from(total) > 0.9);
    }

    #[test]
    fn normalize_strips_scanner_noise() {
        assert_eq!(normalize(" 4006-3813.3393 1\n"), "4006381333931");
        assert_eq!(normalize("abc"), "");
    }

    #[test]
    fn allocate_skips_collisions_and_bounds_retries() {
        let mut rng = ChaCha20Rng::seed_from_u64(99);
        let first = generate(&mut ChaCha20Rng::seed_from_u64(99));
        let taken: HashSet<String> = std::iter::once(first.clone()).collect();

        let token = allocate(&mut rng, |c| taken.contains(c)).unwrap();
        assert_ne!(token, first);

        let mut rng = ChaCha20Rng::seed_from_u64(1);
        let err = allocate(&mut rng, |_| true).unwrap_err();
        assert_eq!(
            err,
            TokenError::Exhausted {
                attempts: TOKEN_RETRY_LIMIT
            }
        );
    }
}

//! Secret-sharing codec: fixed-point encoding plus N-way split/combine.
//!
//! Numeric secrets are scaled by `10^7`, rounded to an integer, and split
//! into additive shares modulo the Mersenne prime `2^61 - 1`. Each party's
//! share is then multiplied by that party's mask from the [`SecretKey`].
//! Every node therefore holds a value that is uniformly random on its own,
//! and the sharing stays linear per party: if a node subtracts two shares it
//! holds, the result is a (masked) share of the plaintext difference.
//!
//! String secrets are XOR-shared byte by byte and each share is base64
//! encoded so it can travel as a JSON string.
//!
//! Reconstruction is strictly N-of-N: every share set must contain exactly
//! one element per party.
//!
//! # Example
//!
//! ```rust
//! use shardrag_core::codec::{decrypt_float_list, encrypt_float_list, SecretKey};
//!
//! let key = SecretKey::generate(3);
//! let shares = encrypt_float_list(&key, &[0.25, -1.5]).unwrap();
//! assert_eq!(shares.len(), 2);
//! assert_eq!(shares[0].len(), 3);
//!
//! let restored = decrypt_float_list(&key, &shares).unwrap();
//! assert!((restored[0] - 0.25).abs() < 1e-7);
//! assert!((restored[1] + 1.5).abs() < 1e-7);
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Scale applied before rounding a float to an integer secret.
pub const FIXED_POINT_SCALE: f64 = 10_000_000.0;

/// Prime modulus of the additive sharing field (`2^61 - 1`).
pub const MODULUS: u64 = (1 << 61) - 1;

/// Exclusive bound on the magnitude of a fixed-point secret.
///
/// The difference of two in-range secrets stays strictly inside
/// `(-MODULUS / 2, MODULUS / 2]` and so maps back to a unique signed value.
pub const MAX_FIXED_POINT: i64 = 1 << 59;

/// One secret split across every party, ordered by party index.
pub type ShareSet<T> = Vec<T>;

/// Errors raised while encoding, splitting or reconstructing secrets.
#[derive(Debug, Error, PartialEq)]
pub enum CodecError {
    #[error("cannot encode non-finite value {0}")]
    NonFinite(f64),
    #[error("value {0} is outside the fixed-point range")]
    OutOfRange(f64),
    #[error("share set has {found} shares, expected {expected}")]
    ShareCount { expected: usize, found: usize },
    #[error("a secret key needs at least one party")]
    NoParties,
    #[error("invalid share encoding: {0}")]
    InvalidShare(String),
    #[error("reconstructed string is not valid UTF-8")]
    InvalidUtf8,
}

/// Per-cluster key material: one nonzero multiplicative mask per party.
///
/// The same key must be used to encrypt records at ingestion time and to
/// decrypt query results. Use [`SecretKey::derive`] to rebuild it from a
/// seed in a later session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretKey {
    masks: Vec<u64>,
}

impl SecretKey {
    /// Random key for a cluster of `parties` nodes.
    ///
    /// A zero-party key is not useful; the codec functions reject it with
    /// [`CodecError::NoParties`].
    pub fn generate(parties: usize) -> Self {
        let mut rng = rand::thread_rng();
        let masks = (0..parties).map(|_| rng.gen_range(1..MODULUS)).collect();
        Self { masks }
    }

    /// Deterministic key derived from `seed`.
    ///
    /// Mask `i` is `SHA-256(seed || i || counter)` reduced modulo the field,
    /// retrying with the next counter in the (negligible) case it is zero.
    pub fn derive(parties: usize, seed: &[u8]) -> Self {
        let masks = (0..parties as u64)
            .map(|party| {
                let mut counter = 0u32;
                loop {
                    let mut hasher = Sha256::new();
                    hasher.update(seed);
                    hasher.update(party.to_be_bytes());
                    hasher.update(counter.to_be_bytes());
                    let digest = hasher.finalize();
                    let mut word = [0u8; 8];
                    word.copy_from_slice(&digest[..8]);
                    let mask = u64::from_be_bytes(word) % MODULUS;
                    if mask != 0 {
                        break mask;
                    }
                    counter += 1;
                }
            })
            .collect();
        Self { masks }
    }

    /// Number of parties this key was built for.
    pub fn parties(&self) -> usize {
        self.masks.len()
    }

    fn ensure_parties(&self) -> Result<usize, CodecError> {
        match self.masks.len() {
            0 => Err(CodecError::NoParties),
            n => Ok(n),
        }
    }
}

/// `round(v * 10^7)`.
pub fn to_fixed_point(value: f64) -> Result<i64, CodecError> {
    if !value.is_finite() {
        return Err(CodecError::NonFinite(value));
    }
    let scaled = (value * FIXED_POINT_SCALE).round();
    if scaled.abs() >= MAX_FIXED_POINT as f64 {
        return Err(CodecError::OutOfRange(value));
    }
    Ok(scaled as i64)
}

/// `r / 10^7`.
pub fn from_fixed_point(raw: i64) -> f64 {
    raw as f64 / FIXED_POINT_SCALE
}

/// Split each value into one share set, preserving input order.
pub fn encrypt_float_list(key: &SecretKey, values: &[f64]) -> Result<Vec<ShareSet<i64>>, CodecError> {
    key.ensure_parties()?;
    values
        .iter()
        .map(|&v| to_fixed_point(v).map(|fixed| split_integer(key, fixed)))
        .collect()
}

/// Combine each share set back into a float, preserving input order.
///
/// Shares may lie outside `[0, p)`; node-side subtraction produces negative
/// values and those are reduced before combining.
pub fn decrypt_float_list(key: &SecretKey, share_lists: &[ShareSet<i64>]) -> Result<Vec<f64>, CodecError> {
    let parties = key.ensure_parties()?;
    share_lists
        .iter()
        .map(|shares| {
            if shares.len() != parties {
                return Err(CodecError::ShareCount {
                    expected: parties,
                    found: shares.len(),
                });
            }
            Ok(from_fixed_point(combine_integer(key, shares)))
        })
        .collect()
}

/// XOR-share each string; every share is base64 text.
pub fn encrypt_string_list<S: AsRef<str>>(
    key: &SecretKey,
    values: &[S],
) -> Result<Vec<ShareSet<String>>, CodecError> {
    let parties = key.ensure_parties()?;
    let mut rng = rand::thread_rng();

    Ok(values
        .iter()
        .map(|value| {
            let bytes = value.as_ref().as_bytes();
            let mut last = bytes.to_vec();
            let mut shares = Vec::with_capacity(parties);
            for _ in 1..parties {
                let mut pad = vec![0u8; bytes.len()];
                rng.fill_bytes(&mut pad);
                for (acc, p) in last.iter_mut().zip(&pad) {
                    *acc ^= p;
                }
                shares.push(STANDARD.encode(&pad));
            }
            shares.push(STANDARD.encode(&last));
            shares
        })
        .collect())
}

/// Combine XOR share sets back into strings.
pub fn decrypt_string_list(
    key: &SecretKey,
    share_lists: &[ShareSet<String>],
) -> Result<Vec<String>, CodecError> {
    let parties = key.ensure_parties()?;
    share_lists
        .iter()
        .map(|shares| {
            if shares.len() != parties {
                return Err(CodecError::ShareCount {
                    expected: parties,
                    found: shares.len(),
                });
            }
            let mut plain: Option<Vec<u8>> = None;
            for share in shares {
                let bytes = STANDARD
                    .decode(share)
                    .map_err(|e| CodecError::InvalidShare(e.to_string()))?;
                plain = Some(match plain {
                    None => bytes,
                    Some(acc) => {
                        if acc.len() != bytes.len() {
                            return Err(CodecError::InvalidShare(format!(
                                "share lengths differ ({} vs {})",
                                acc.len(),
                                bytes.len()
                            )));
                        }
                        acc.iter().zip(&bytes).map(|(a, b)| a ^ b).collect()
                    }
                });
            }
            String::from_utf8(plain.unwrap_or_default()).map_err(|_| CodecError::InvalidUtf8)
        })
        .collect()
}

fn split_integer(key: &SecretKey, secret: i64) -> ShareSet<i64> {
    let mut rng = rand::thread_rng();
    let parties = key.masks.len();
    let mut raw = Vec::with_capacity(parties);
    let mut sum = 0u64;
    for _ in 1..parties {
        let r = rng.gen_range(0..MODULUS);
        sum = add_mod(sum, r);
        raw.push(r);
    }
    raw.push(sub_mod(reduce(secret as i128), sum));

    raw.into_iter()
        .zip(&key.masks)
        .map(|(r, &mask)| mul_mod(r, mask) as i64)
        .collect()
}

fn combine_integer(key: &SecretKey, shares: &[i64]) -> i64 {
    let sum = shares.iter().zip(&key.masks).fold(0u64, |acc, (&share, &mask)| {
        add_mod(acc, mul_mod(reduce(share as i128), inv_mod(mask)))
    });
    if sum > MODULUS / 2 {
        sum as i64 - MODULUS as i64
    } else {
        sum as i64
    }
}

fn reduce(value: i128) -> u64 {
    value.rem_euclid(MODULUS as i128) as u64
}

fn add_mod(a: u64, b: u64) -> u64 {
    ((a as u128 + b as u128) % MODULUS as u128) as u64
}

fn sub_mod(a: u64, b: u64) -> u64 {
    reduce(a as i128 - b as i128)
}

fn mul_mod(a: u64, b: u64) -> u64 {
    ((a as u128 * b as u128) % MODULUS as u128) as u64
}

// Fermat inverse; masks are never zero.
fn inv_mod(a: u64) -> u64 {
    let mut base = a % MODULUS;
    let mut exp = MODULUS - 2;
    let mut result = 1u64;
    while exp > 0 {
        if exp & 1 == 1 {
            result = mul_mod(result, base);
        }
        base = mul_mod(base, base);
        exp >>= 1;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLES: [f64; 8] = [
        0.0,
        1.0,
        -2.5,
        0.12345678,
        3.14159265358,
        -0.000000123,
        123.456789012,
        -0.0371,
    ];

    #[test]
    fn test_fixed_point_bound() {
        for v in SAMPLES {
            let back = from_fixed_point(to_fixed_point(v).unwrap());
            assert!((back - v).abs() < 0.5e-7, "{} -> {}", v, back);
        }
    }

    #[test]
    fn test_fixed_point_rejects_non_finite() {
        assert!(to_fixed_point(f64::NAN)
            .unwrap_err()
            .to_string()
            .contains("non-finite"));
        assert!(matches!(to_fixed_point(f64::INFINITY), Err(CodecError::NonFinite(_))));
        assert!(matches!(to_fixed_point(1e12), Err(CodecError::OutOfRange(_))));
    }

    #[test]
    fn test_fixed_point_bound_is_exclusive() {
        let approx = MAX_FIXED_POINT as f64 / FIXED_POINT_SCALE;
        let on_bound: Vec<f64> = (approx.to_bits() - 4..=approx.to_bits() + 4)
            .map(f64::from_bits)
            .filter(|v| (v * FIXED_POINT_SCALE).round() == MAX_FIXED_POINT as f64)
            .collect();
        assert!(!on_bound.is_empty());
        for v in on_bound {
            assert!(matches!(to_fixed_point(v), Err(CodecError::OutOfRange(_))));
            assert!(matches!(to_fixed_point(-v), Err(CodecError::OutOfRange(_))));
        }
        let inside = (MAX_FIXED_POINT - 1024) as f64 / FIXED_POINT_SCALE;
        assert!(to_fixed_point(inside).is_ok());
    }

    #[test]
    fn test_extreme_difference_keeps_its_sign() {
        let key = SecretKey::generate(3);
        let v = (MAX_FIXED_POINT - 1024) as f64 / FIXED_POINT_SCALE;
        let high = encrypt_float_list(&key, &[v]).unwrap();
        let low = encrypt_float_list(&key, &[-v]).unwrap();
        let diff: Vec<Vec<i64>> = vec![high[0].iter().zip(&low[0]).map(|(a, b)| a - b).collect()];
        let restored = decrypt_float_list(&key, &diff).unwrap();
        assert!(restored[0] > 0.0, "sign flipped: {}", restored[0]);
        assert!((restored[0] - 2.0 * v).abs() < 1e-3);
    }

    #[test]
    fn test_float_roundtrip_various_party_counts() {
        for parties in 1..=5 {
            let key = SecretKey::generate(parties);
            let shares = encrypt_float_list(&key, &SAMPLES).unwrap();
            assert_eq!(shares.len(), SAMPLES.len());
            assert!(shares.iter().all(|s| s.len() == parties));
            let restored = decrypt_float_list(&key, &shares).unwrap();
            for (a, b) in SAMPLES.iter().zip(&restored) {
                assert!((a - b).abs() < 1e-7, "{} != {}", a, b);
            }
        }
    }

    #[test]
    fn test_string_roundtrip() {
        let key = SecretKey::generate(3);
        let values = vec!["", "hello", "naïve café ☕", "line\nbreak"];
        let shares = encrypt_string_list(&key, &values).unwrap();
        assert!(shares.iter().all(|s| s.len() == 3));
        let restored = decrypt_string_list(&key, &shares).unwrap();
        assert_eq!(restored, values);
    }

    #[test]
    fn test_shares_hide_plaintext() {
        let key = SecretKey::generate(2);
        let shares = encrypt_string_list(&key, &["secret text"]).unwrap();
        for share in &shares[0] {
            let bytes = STANDARD.decode(share).unwrap();
            assert_ne!(bytes, b"secret text");
        }
    }

    #[test]
    fn test_share_wise_subtraction_gives_difference() {
        let key = SecretKey::generate(3);
        let stored = encrypt_float_list(&key, &[1.0, 2.0, -4.25]).unwrap();
        let query = encrypt_float_list(&key, &[0.5, 2.0, 1.75]).unwrap();
        let diffs: Vec<Vec<i64>> = stored
            .iter()
            .zip(&query)
            .map(|(s, q)| s.iter().zip(q).map(|(a, b)| a - b).collect())
            .collect();
        let restored = decrypt_float_list(&key, &diffs).unwrap();
        let expected = [0.5, 0.0, -6.0];
        for (a, b) in restored.iter().zip(expected) {
            assert!((a - b).abs() < 1e-7);
        }
    }

    #[test]
    fn test_wrong_share_count_is_error() {
        let key = SecretKey::generate(3);
        let mut shares = encrypt_float_list(&key, &[1.0]).unwrap();
        shares[0].pop();
        assert_eq!(
            decrypt_float_list(&key, &shares),
            Err(CodecError::ShareCount {
                expected: 3,
                found: 2
            })
        );
    }

    #[test]
    fn test_wrong_key_does_not_reconstruct() {
        let key = SecretKey::generate(3);
        let other = SecretKey::generate(3);
        let shares = encrypt_float_list(&key, &[42.0]).unwrap();
        let restored = decrypt_float_list(&other, &shares).unwrap();
        assert!((restored[0] - 42.0).abs() > 1e-3);
    }

    #[test]
    fn test_invalid_base64_share() {
        let key = SecretKey::generate(2);
        let err = decrypt_string_list(&key, &[vec!["!!".to_string(), "AA==".to_string()]]).unwrap_err();
        assert!(matches!(err, CodecError::InvalidShare(_)));
    }

    #[test]
    fn test_derive_is_deterministic() {
        let a = SecretKey::derive(4, b"cluster seed");
        let b = SecretKey::derive(4, b"cluster seed");
        let c = SecretKey::derive(4, b"other seed");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.parties(), 4);

        let shares = encrypt_float_list(&a, &[7.5]).unwrap();
        assert_eq!(decrypt_float_list(&b, &shares).unwrap(), vec![7.5]);
    }

    #[test]
    fn test_zero_parties_rejected() {
        let key = SecretKey::generate(0);
        assert_eq!(encrypt_float_list(&key, &[1.0]), Err(CodecError::NoParties));
    }
}

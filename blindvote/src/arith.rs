use num_bigint_dig::{BigInt, BigUint, Sign};
use num_integer::Integer;
use num_traits::{One, Zero};
use sha2::{Digest, Sha256};

/// Compute `base^exponent mod modulus`.
///
/// Panics if `modulus` is zero.
pub fn mod_pow(base: &BigUint, exponent: &BigUint, modulus: &BigUint) -> BigUint {
    base.modpow(exponent, modulus)
}

/// Greatest common divisor
pub fn gcd(a: &BigUint, b: &BigUint) -> BigUint {
    a.gcd(b)
}

/// Extended Euclidean algorithm.
///
/// Returns `(g, x, y)` such that `a*x + b*y == g == gcd(a, b)`.
pub fn extended_gcd(a: &BigUint, b: &BigUint) -> (BigUint, BigInt, BigInt) {
    let mut old_r = BigInt::from_biguint(Sign::Plus, a.clone());
    let mut r = BigInt::from_biguint(Sign::Plus, b.clone());
    let (mut old_s, mut s) = (BigInt::one(), BigInt::zero());
    let (mut old_t, mut t) = (BigInt::zero(), BigInt::one());

    while !r.is_zero() {
        let q = &old_r / &r;

        let next_r = &old_r - &q * &r;
        old_r = std::mem::replace(&mut r, next_r);

        let next_s = &old_s - &q * &s;
        old_s = std::mem::replace(&mut s, next_s);

        let next_t = &old_t - &q * &t;
        old_t = std::mem::replace(&mut t, next_t);
    }

    // Both inputs are non-negative, so the remainder sequence never goes negative
    let g = old_r.to_biguint().unwrap_or_else(BigUint::zero);
    (g, old_s, old_t)
}

/// Modular inverse of `a` modulo `modulus`, or None if `a` and `modulus` are not coprime.
pub fn mod_inverse(a: &BigUint, modulus: &BigUint) -> Option<BigUint> {
    if modulus.is_zero() {
        return None;
    }

    let (g, x, _) = extended_gcd(&(a % modulus), modulus);
    if !g.is_one() {
        return None;
    }

    let m = BigInt::from_biguint(Sign::Plus, modulus.clone());
    let x = ((x % &m) + &m) % &m;
    x.to_biguint()
}

/// SHA-256 of `message`, read as a big-endian unsigned integer
pub fn digest_to_biguint(message: &[u8]) -> BigUint {
    BigUint::from_bytes_be(&Sha256::digest(message))
}

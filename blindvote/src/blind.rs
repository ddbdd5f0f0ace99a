use crate::*;
use num_bigint_dig::{BigUint, RandBigInt};
use num_traits::One;
use rand::{CryptoRng, RngCore};
use std::fmt;

/// Length of a freshly generated raw token, in bytes
pub const RAW_TOKEN_LEN: usize = 32;

/// The voter's secret token. Only its SHA-256 digest ever leaves the voter's device.
#[derive(Clone, PartialEq, Eq)]
pub struct RawToken(Vec<u8>);

impl RawToken {
    /// A new random token from the operating system's CSPRNG
    pub fn random() -> Self {
        let mut bytes = vec![0u8; RAW_TOKEN_LEN];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        RawToken(bytes)
    }

    pub fn from_bytes<B: Into<Vec<u8>>>(bytes: B) -> Self {
        RawToken(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The public identifier of this token: `SHA-256(token)`
    pub fn token_identifier(&self) -> TokenId {
        TokenId::digest(&self.0)
    }
}

impl fmt::Debug for RawToken {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "RawToken({})", self.token_identifier())
    }
}

/// Blind a token for signing.
///
/// Returns `(blinded_value, blinding_factor)` where
/// `blinded_value = SHA-256(token) * r^e mod n` for a random `r` coprime to `n`.
pub fn blind(raw_token: &RawToken, public_key: &PublicKey) -> Result<(BigUint, BigUint), Error> {
    blind_with_rng(raw_token, public_key, &mut rand::rngs::OsRng)
}

pub fn blind_with_rng<R: RngCore + CryptoRng>(
    raw_token: &RawToken,
    public_key: &PublicKey,
    rng: &mut R,
) -> Result<(BigUint, BigUint), Error> {
    let r = blinding_factor(&public_key.modulus, rng)?;
    let blinded_value = blind_with_factor(raw_token, &r, public_key);
    Ok((blinded_value, r))
}

/// Blind with a caller-chosen factor. The factor must be coprime to the modulus.
pub fn blind_with_factor(raw_token: &RawToken, r: &BigUint, public_key: &PublicKey) -> BigUint {
    let n = &public_key.modulus;
    let m = digest_to_biguint(raw_token.as_bytes());
    let r_e = mod_pow(r, &public_key.public_exponent, n);
    (m * r_e) % n
}

/// Remove the blinding factor from a blind signature: `s' * r^-1 mod n`
pub fn unblind(
    blind_signature: &BigUint,
    blinding_factor: &BigUint,
    public_key: &PublicKey,
) -> Result<BigUint, Error> {
    let n = &public_key.modulus;
    let r_inv = mod_inverse(blinding_factor, n).ok_or(Error::InvalidBlindingFactor)?;
    Ok((blind_signature * r_inv) % n)
}

/// Rejection-sample `r` uniformly from `1 < r < n` with `gcd(r, n) = 1`
fn blinding_factor<R: RngCore + CryptoRng>(modulus: &BigUint, rng: &mut R) -> Result<BigUint, Error> {
    let low = BigUint::from(2u32);
    if modulus <= &BigUint::from(3u32) {
        return Err(Error::KeyUnavailable(
            "public key modulus is too small to blind against".to_owned(),
        ));
    }

    loop {
        let r = rng.gen_biguint_range(&low, modulus);
        if gcd(&r, modulus).is_one() {
            return Ok(r);
        }
    }
}

/// Client-side state for one credential request. Never transmitted.
pub struct BlindingContext {
    raw_token: RawToken,
    blinding_factor: BigUint,
}

impl BlindingContext {
    /// Blind `raw_token`, returning the context to keep and the value to send for signing
    pub fn new(raw_token: RawToken, public_key: &PublicKey) -> Result<(Self, BigUint), Error> {
        let (blinded_value, blinding_factor) = blind(&raw_token, public_key)?;
        let context = BlindingContext {
            raw_token,
            blinding_factor,
        };
        Ok((context, blinded_value))
    }

    /// Blind a fresh random token
    pub fn random(public_key: &PublicKey) -> Result<(Self, BigUint), Error> {
        BlindingContext::new(RawToken::random(), public_key)
    }

    pub fn raw_token(&self) -> &RawToken {
        &self.raw_token
    }

    pub fn blinding_factor(&self) -> &BigUint {
        &self.blinding_factor
    }

    /// Unblind the authority's response and check it.
    ///
    /// Consumes the context, dropping the blinding factor, and hands back the raw token
    /// alongside the finished credential.
    pub fn unblind(
        self,
        blind_signature: &BigUint,
        public_key: &PublicKey,
    ) -> Result<(RawToken, Credential), Error> {
        let signature = unblind(blind_signature, &self.blinding_factor, public_key)?;
        let credential = Credential {
            token_identifier: self.raw_token.token_identifier(),
            signature,
        };

        if !credential.verify(public_key) {
            return Err(Error::InvalidCredential);
        }

        Ok((self.raw_token, credential))
    }
}

impl fmt::Debug for BlindingContext {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BlindingContext")
            .field("raw_token", &self.raw_token)
            .finish()
    }
}

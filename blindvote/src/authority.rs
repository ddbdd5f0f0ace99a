use crate::*;
use num_bigint_dig::BigUint;
use num_traits::{One, Zero};
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::RsaPrivateKey;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::path::Path;

/// Smallest modulus the authority will generate or load
pub const MIN_MODULUS_BITS: usize = 2048;

/// The authority's public key.
///
/// This is all a voter needs to blind a token and unblind the returned signature.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    #[serde(with = "biguint_hex")]
    pub modulus: BigUint,

    #[serde(with = "biguint_hex")]
    pub public_exponent: BigUint,
}

impl PublicKey {
    /// Verify a signature over `SHA-256(message)`
    pub fn verify(&self, message: &[u8], signature: &BigUint) -> bool {
        self.verify_digest(&Sha256::digest(message), signature)
    }

    /// Verify a signature over a digest the caller already holds
    pub fn verify_digest(&self, digest: &[u8], signature: &BigUint) -> bool {
        if self.modulus.is_zero() || signature >= &self.modulus {
            return false;
        }
        let expected = BigUint::from_bytes_be(digest) % &self.modulus;
        mod_pow(signature, &self.public_exponent, &self.modulus) == expected
    }

    /// Short identifier for this key: hex of the first 8 bytes of SHA-256(modulus)
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(&self.modulus.to_bytes_be());
        hex::encode(&digest[..8])
    }

    /// Size of the modulus in bits
    pub fn bits(&self) -> usize {
        self.modulus.bits()
    }
}

/// RSA key pair owned by the signing authority
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct KeyPair {
    #[serde(with = "biguint_hex")]
    modulus: BigUint,

    #[serde(with = "biguint_hex")]
    public_exponent: BigUint,

    #[serde(with = "biguint_hex")]
    private_exponent: BigUint,
}

impl KeyPair {
    /// Generate a fresh key pair with a modulus of `bits` bits
    pub fn generate(bits: usize) -> Result<Self, Error> {
        if bits < MIN_MODULUS_BITS {
            return Err(Error::Config(format!(
                "refusing to generate a {} bit key, minimum is {}",
                bits, MIN_MODULUS_BITS
            )));
        }

        let mut rng = rand::rngs::OsRng;
        let key = RsaPrivateKey::new(&mut rng, bits)?;

        Ok(KeyPair {
            modulus: key.n().clone(),
            public_exponent: key.e().clone(),
            private_exponent: key.d().clone(),
        })
    }

    /// Assemble a key pair from its components, checking that they belong together
    pub fn from_components(
        modulus: BigUint,
        public_exponent: BigUint,
        private_exponent: BigUint,
    ) -> Result<Self, Error> {
        let keys = KeyPair {
            modulus,
            public_exponent,
            private_exponent,
        };
        keys.validate()?;
        Ok(keys)
    }

    /// Check modulus size and that the exponents invert each other
    pub fn validate(&self) -> Result<(), Error> {
        if self.modulus.bits() < MIN_MODULUS_BITS {
            return Err(Error::KeyUnavailable(format!(
                "modulus is {} bits, minimum is {}",
                self.modulus.bits(),
                MIN_MODULUS_BITS
            )));
        }
        if self.public_exponent <= BigUint::one() || self.private_exponent.is_zero() {
            return Err(Error::KeyUnavailable("degenerate exponent".to_owned()));
        }

        let probe = BigUint::from(2u32);
        let signed = mod_pow(&probe, &self.private_exponent, &self.modulus);
        if mod_pow(&signed, &self.public_exponent, &self.modulus) != probe {
            return Err(Error::KeyUnavailable(
                "public and private exponents do not match".to_owned(),
            ));
        }

        Ok(())
    }

    /// Load and validate a key pair from a JSON key file
    pub fn load(path: &Path) -> Result<Self, Error> {
        let data = fs::read(path).map_err(|e| {
            Error::KeyUnavailable(format!("cannot read {}: {}", path.display(), e))
        })?;
        let keys: KeyPair = serde_json::from_slice(&data).map_err(|e| {
            Error::KeyUnavailable(format!("cannot parse {}: {}", path.display(), e))
        })?;
        keys.validate()?;
        Ok(keys)
    }

    /// Write the key pair to a JSON key file, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), Error> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let data = serde_json::to_vec_pretty(self)?;
        fs::write(path, data)?;
        Ok(())
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            modulus: self.modulus.clone(),
            public_exponent: self.public_exponent.clone(),
        }
    }

    pub fn fingerprint(&self) -> String {
        self.public_key().fingerprint()
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("fingerprint", &self.fingerprint())
            .field("bits", &self.modulus.bits())
            .finish()
    }
}

/// Load the persisted key pair, or generate and persist one if none exists.
///
/// An existing key file that cannot be read or fails validation is an error; it is never
/// replaced, since doing so would invalidate every credential signed under the old key.
pub fn generate_keys(config: &Config) -> Result<KeyPair, Error> {
    config.validate()?;
    let path = config.key_path.as_path();

    if path.exists() {
        let keys = KeyPair::load(path)?;
        info!(
            "loaded authority key {} from {}",
            keys.fingerprint(),
            path.display()
        );
        return Ok(keys);
    }

    info!(
        "no authority key at {}, generating a {} bit key pair",
        path.display(),
        config.key_bits
    );
    let keys = KeyPair::generate(config.key_bits)?;

    match keys.save(path) {
        Ok(()) => {
            info!(
                "saved authority key {} to {}",
                keys.fingerprint(),
                path.display()
            );
            Ok(keys)
        }
        Err(e) if config.allow_ephemeral_key => {
            warn!(
                "unable to persist authority key to {}: {}; continuing with unpersisted key {}",
                path.display(),
                e,
                keys.fingerprint()
            );
            Ok(keys)
        }
        Err(e) => Err(Error::KeyUnavailable(format!(
            "unable to persist authority key to {}: {}",
            path.display(),
            e
        ))),
    }
}

/// The blind-signature authority.
///
/// Signs whatever blind value it is given. Rate limiting (one signature per identity) is
/// the job of the issuance protocol in front of it.
pub struct Authority {
    keys: KeyPair,
    public_key: PublicKey,
}

impl Authority {
    pub fn new(keys: KeyPair) -> Result<Self, Error> {
        keys.validate()?;
        let public_key = keys.public_key();
        Ok(Authority { keys, public_key })
    }

    /// Open the authority with the key pair described by `config`
    pub fn open(config: &Config) -> Result<Self, Error> {
        Authority::new(generate_keys(config)?)
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn fingerprint(&self) -> String {
        self.public_key.fingerprint()
    }

    /// Sign a blinded value: `blind_value^d mod n`.
    ///
    /// The value is never logged.
    // TODO: use a constant-time exponentiation so signing time cannot be correlated with blind values
    pub fn sign_blinded(&self, blind_value: &BigUint) -> Result<BigUint, Error> {
        if blind_value >= &self.keys.modulus {
            return Err(Error::MalformedBlindValue);
        }
        debug!("signing blind value under key {}", self.fingerprint());
        Ok(mod_pow(
            blind_value,
            &self.keys.private_exponent,
            &self.keys.modulus,
        ))
    }

    pub fn verify(&self, message: &[u8], signature: &BigUint) -> bool {
        self.public_key.verify(message, signature)
    }

    pub fn verify_digest(&self, digest: &[u8], signature: &BigUint) -> bool {
        self.public_key.verify_digest(digest, signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::TEST_KEYS;

    fn temp_key_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir()
            .join(format!("blindvote-{}", uuid::Uuid::new_v4()))
            .join(name)
    }

    /// Direct (non-blind) signature, as the authority would produce over a known message
    fn sign_direct(keys: &KeyPair, message: &[u8]) -> BigUint {
        mod_pow(
            &(digest_to_biguint(message) % &keys.modulus),
            &keys.private_exponent,
            &keys.modulus,
        )
    }

    #[test]
    fn test_generated_key() {
        let keys = &*TEST_KEYS;
        keys.validate().unwrap();
        assert!(keys.public_key().bits() >= MIN_MODULUS_BITS);
        assert_eq!(keys.public_key().public_exponent, BigUint::from(65537u32));
        assert_eq!(keys.fingerprint().len(), 16);
    }

    #[test]
    fn test_refuses_small_keys() {
        assert!(matches!(KeyPair::generate(1024), Err(Error::Config(_))));

        // Textbook RSA key: valid exponents, far too small
        let small = KeyPair::from_components(
            BigUint::from(3233u32),
            BigUint::from(17u32),
            BigUint::from(2753u32),
        );
        assert!(matches!(small, Err(Error::KeyUnavailable(_))));
    }

    #[test]
    fn test_mismatched_exponents() {
        let keys = &*TEST_KEYS;
        let bad = KeyPair::from_components(
            keys.modulus.clone(),
            keys.public_exponent.clone(),
            &keys.private_exponent + BigUint::one(),
        );
        assert!(matches!(bad, Err(Error::KeyUnavailable(_))));
    }

    #[test]
    fn test_sign_and_verify() {
        let authority = Authority::new(TEST_KEYS.clone()).unwrap();
        let message = b"a ballot token";

        let signature = sign_direct(&TEST_KEYS, message);
        assert!(authority.verify(message, &signature));
        assert!(authority.verify_digest(&Sha256::digest(message), &signature));
        assert!(!authority.verify(b"another token", &signature));
        assert!(!authority.verify(message, &(&signature + BigUint::one())));

        // Signatures that are not reduced modulo n are rejected outright
        let unreduced = &signature + &authority.public_key().modulus;
        assert!(!authority.verify(message, &unreduced));
    }

    #[test]
    fn test_sign_blinded_rejects_unreduced_values() {
        let authority = Authority::new(TEST_KEYS.clone()).unwrap();
        let modulus = authority.public_key().modulus.clone();

        assert!(matches!(
            authority.sign_blinded(&modulus),
            Err(Error::MalformedBlindValue)
        ));
        authority
            .sign_blinded(&(&modulus - BigUint::one()))
            .unwrap();
    }

    #[test]
    fn test_sign_blinded_matches_direct_signature() {
        // With no blinding at all, the blind signature is the ordinary signature
        let authority = Authority::new(TEST_KEYS.clone()).unwrap();
        let message = b"unblinded";
        let m = digest_to_biguint(message);

        let signature = authority.sign_blinded(&m).unwrap();
        assert_eq!(signature, sign_direct(&TEST_KEYS, message));
        assert!(authority.verify(message, &signature));
    }

    #[test]
    fn test_key_file_round_trip() {
        let path = temp_key_path("keys.json");
        TEST_KEYS.save(&path).unwrap();

        let loaded = KeyPair::load(&path).unwrap();
        assert_eq!(&loaded, &*TEST_KEYS);

        // An existing file is loaded, never regenerated
        let config = Config::new(&path);
        let keys = generate_keys(&config).unwrap();
        assert_eq!(keys.fingerprint(), TEST_KEYS.fingerprint());

        fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }

    #[test]
    fn test_corrupt_key_file_fails_loudly() {
        let path = temp_key_path("keys.json");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"{ not json").unwrap();

        let config = Config::new(&path).with_ephemeral_key(true);
        assert!(matches!(
            generate_keys(&config),
            Err(Error::KeyUnavailable(_))
        ));

        // The corrupt file is left in place for the operator
        assert_eq!(fs::read(&path).unwrap(), b"{ not json");

        fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }

    #[test]
    fn test_missing_key_file_generates_and_persists() {
        let path = temp_key_path("nested/keys.json");
        let config = Config::new(&path);

        let authority = Authority::open(&config).unwrap();
        assert!(path.exists());

        let reopened = Authority::open(&config).unwrap();
        assert_eq!(authority.public_key(), reopened.public_key());

        fs::remove_dir_all(path.parent().unwrap().parent().unwrap()).unwrap();
    }

    #[test]
    fn test_debug_hides_private_exponent() {
        let debug = format!("{:?}", &*TEST_KEYS);
        assert!(debug.contains(&TEST_KEYS.fingerprint()));
        assert!(!debug.contains(&biguint_to_hex(&TEST_KEYS.private_exponent)));
    }
}

use crate::*;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use hkdf::Hkdf;
use num_bigint_dig::BigUint;
use rand::RngCore;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::convert::TryFrom;
use std::fmt;
use std::str::FromStr;

const SEAL_INFO: &[u8] = b"blindvote credential v1";
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

/// A token identifier: the SHA-256 digest of a raw token
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenId([u8; 32]);

impl TokenId {
    pub fn new(bytes: [u8; 32]) -> Self {
        TokenId(bytes)
    }

    /// Hash a raw token into its identifier
    pub fn digest(raw_token: &[u8]) -> Self {
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&Sha256::digest(raw_token));
        TokenId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl TryFrom<&[u8]> for TokenId {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != 32 {
            return Err(Error::InvalidHex(format!(
                "token identifier must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        let mut id = [0u8; 32];
        id.copy_from_slice(bytes);
        Ok(TokenId(id))
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "TokenId({})", self)
    }
}

impl FromStr for TokenId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim())?;
        TokenId::try_from(bytes.as_slice())
    }
}

impl Serialize for TokenId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TokenId {
    fn deserialize<D>(deserializer: D) -> Result<TokenId, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        TokenId::from_str(&s).map_err(de::Error::custom)
    }
}

/// An unblinded signature over a token identifier. Anyone holding the public key can check it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Credential {
    pub token_identifier: TokenId,

    #[serde(with = "biguint_hex")]
    pub signature: BigUint,
}

impl Credential {
    pub fn verify(&self, public_key: &PublicKey) -> bool {
        public_key.verify_digest(self.token_identifier.as_bytes(), &self.signature)
    }
}

/// What a voter keeps between obtaining a credential and casting a ballot
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CredentialFile {
    pub election_id: String,
    pub token_identifier: TokenId,

    #[serde(with = "biguint_hex")]
    pub signature: BigUint,

    /// Fingerprint of the key that signed this credential
    pub key_fingerprint: String,
}

impl CredentialFile {
    pub fn new(election_id: &str, credential: Credential, public_key: &PublicKey) -> Self {
        CredentialFile {
            election_id: election_id.to_owned(),
            token_identifier: credential.token_identifier,
            signature: credential.signature,
            key_fingerprint: public_key.fingerprint(),
        }
    }

    pub fn credential(&self) -> Credential {
        Credential {
            token_identifier: self.token_identifier,
            signature: self.signature.clone(),
        }
    }

    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(json)?)
    }

    /// Encrypt this file under a key derived from `secret`
    pub fn seal(&self, secret: &[u8]) -> Result<SealedCredential, Error> {
        let mut rng = rand::rngs::OsRng;
        let mut salt = vec![0u8; SALT_LEN];
        let mut nonce = vec![0u8; NONCE_LEN];
        rng.fill_bytes(&mut salt);
        rng.fill_bytes(&mut nonce);

        let cipher = sealing_cipher(secret, &salt)?;
        let plaintext = serde_json::to_vec(self)?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_ref())
            .map_err(|_| Error::CredentialSealing)?;

        Ok(SealedCredential {
            salt,
            nonce,
            ciphertext,
        })
    }
}

/// A credential file encrypted at rest with AES-256-GCM
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SealedCredential {
    #[serde(with = "bytes_hex")]
    pub salt: Vec<u8>,

    #[serde(with = "bytes_hex")]
    pub nonce: Vec<u8>,

    #[serde(with = "bytes_hex")]
    pub ciphertext: Vec<u8>,
}

impl SealedCredential {
    pub fn open(&self, secret: &[u8]) -> Result<CredentialFile, Error> {
        if self.nonce.len() != NONCE_LEN {
            return Err(Error::CredentialSealing);
        }
        let cipher = sealing_cipher(secret, &self.salt)?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&self.nonce), self.ciphertext.as_ref())
            .map_err(|_| Error::CredentialSealing)?;

        Ok(serde_json::from_slice(&plaintext)?)
    }
}

fn sealing_cipher(secret: &[u8], salt: &[u8]) -> Result<Aes256Gcm, Error> {
    let hk = Hkdf::<Sha256>::new(Some(salt), secret);
    let mut key = [0u8; 32];
    hk.expand(SEAL_INFO, &mut key)
        .map_err(|_| Error::CredentialSealing)?;
    Aes256Gcm::new_from_slice(&key).map_err(|_| Error::CredentialSealing)
}

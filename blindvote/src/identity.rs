use crate::*;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

/// Opaque key for a real-world voter identity.
///
/// The registry keys attendance and participation flags by this value and never
/// sees the identity itself.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityKey(String);

impl IdentityKey {
    /// Wrap a key derived by the external identity service
    pub fn new<S: Into<String>>(key: S) -> Self {
        IdentityKey(key.into())
    }

    /// HMAC-SHA256 of the normalised identity under the operator's secret, hex encoded
    pub fn derive(secret: &[u8], identity: &str) -> Result<Self, Error> {
        let mut mac = HmacSha256::new_from_slice(secret)
            .map_err(|e| Error::Config(format!("invalid identity secret: {}", e)))?;
        mac.update(identity.trim().to_lowercase().as_bytes());
        Ok(IdentityKey(hex::encode(mac.finalize().into_bytes())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

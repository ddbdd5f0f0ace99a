use crate::*;
use num_bigint_dig::BigUint;
use num_traits::Num;

/// Parse a big integer from hexadecimal, with or without a leading `0x`.
pub fn parse_biguint_hex(s: &str) -> Result<BigUint, Error> {
    let s = s.trim();
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);

    if digits.is_empty() {
        return Err(Error::InvalidHex(s.to_owned()));
    }

    BigUint::from_str_radix(digits, 16).map_err(|_| Error::InvalidHex(s.to_owned()))
}

/// Format a big integer as lowercase hexadecimal without padding
pub fn biguint_to_hex(value: &BigUint) -> String {
    value.to_str_radix(16)
}

/// Big integers as unpadded hex strings, for use in `#[serde(with)]`
pub mod biguint_hex {
    use num_bigint_dig::BigUint;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &BigUint, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::biguint_to_hex(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BigUint, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        super::parse_biguint_hex(&s).map_err(de::Error::custom)
    }
}

/// Byte strings as hex, for use in `#[serde(with)]`
pub mod bytes_hex {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        hex::decode(s.trim()).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_biguint_hex() {
        assert_eq!(parse_biguint_hex("ff").unwrap(), BigUint::from(255u32));
        assert_eq!(parse_biguint_hex("0x10001").unwrap(), BigUint::from(65537u32));
        assert_eq!(parse_biguint_hex("00ff").unwrap(), BigUint::from(255u32));

        assert!(parse_biguint_hex("").is_err());
        assert!(parse_biguint_hex("0x").is_err());
        assert!(parse_biguint_hex("xyz").is_err());
    }

    #[test]
    fn test_biguint_to_hex() {
        assert_eq!(biguint_to_hex(&BigUint::from(65537u32)), "10001");
        assert_eq!(biguint_to_hex(&BigUint::from(0u32)), "0");
    }
}

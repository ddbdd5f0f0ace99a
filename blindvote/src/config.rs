use crate::*;
use std::env::var;
use std::path::PathBuf;

pub const DEFAULT_KEY_PATH: &str = "./data/voting-keys.json";

/// Authority configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Where the authority key pair is persisted
    pub key_path: PathBuf,

    /// Modulus size used when a fresh key pair has to be generated
    pub key_bits: usize,

    /// Operator opt-in to run with a key that could not be persisted.
    ///
    /// Credentials signed under such a key become unverifiable once the process exits.
    pub allow_ephemeral_key: bool,
}

impl Config {
    pub fn new<P: Into<PathBuf>>(key_path: P) -> Self {
        Config {
            key_path: key_path.into(),
            key_bits: MIN_MODULUS_BITS,
            allow_ephemeral_key: false,
        }
    }

    pub fn with_key_bits(mut self, key_bits: usize) -> Self {
        self.key_bits = key_bits;
        self
    }

    pub fn with_ephemeral_key(mut self, allow: bool) -> Self {
        self.allow_ephemeral_key = allow;
        self
    }

    /// Read configuration from `BLINDVOTE_*` environment variables
    pub fn from_env() -> Result<Self, Error> {
        let key_path = match var("BLINDVOTE_KEY_PATH") {
            Ok(val) => PathBuf::from(val),
            Err(_e) => PathBuf::from(DEFAULT_KEY_PATH),
        };

        let key_bits = match var("BLINDVOTE_KEY_BITS") {
            Ok(val) => val.trim().parse().map_err(|_| {
                Error::Config(format!("BLINDVOTE_KEY_BITS is not a number: {}", val))
            })?,
            Err(_e) => MIN_MODULUS_BITS,
        };

        let allow_ephemeral_key = match var("BLINDVOTE_ALLOW_EPHEMERAL_KEY") {
            Ok(val) => parse_flag(&val)?,
            Err(_e) => false,
        };

        let config = Config {
            key_path,
            key_bits,
            allow_ephemeral_key,
        };
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.key_bits < MIN_MODULUS_BITS {
            return Err(Error::Config(format!(
                "key size of {} bits is below the {} bit minimum",
                self.key_bits, MIN_MODULUS_BITS
            )));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::new(DEFAULT_KEY_PATH)
    }
}

fn parse_flag(val: &str) -> Result<bool, Error> {
    match val.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::Config(format!("invalid boolean flag: {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lazy_static::lazy_static;

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("1").unwrap());
        assert!(parse_flag(" TRUE ").unwrap());
        assert!(!parse_flag("no").unwrap());
        assert!(!parse_flag("").unwrap());
        assert!(parse_flag("maybe").is_err());
    }

    #[test]
    fn test_validate() {
        let config = Config::new("/tmp/keys.json");
        assert_eq!(config.key_bits, MIN_MODULUS_BITS);
        assert!(!config.allow_ephemeral_key);
        config.validate().unwrap();

        let config = config.with_key_bits(1024);
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = Config::default().with_key_bits(4096).with_ephemeral_key(true);
        assert!(config.allow_ephemeral_key);
        config.validate().unwrap();
    }

    lazy_static! {
        static ref ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    }

    const VARS: [&str; 3] = [
        "BLINDVOTE_KEY_PATH",
        "BLINDVOTE_KEY_BITS",
        "BLINDVOTE_ALLOW_EPHEMERAL_KEY",
    ];

    #[test]
    fn test_from_env() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        for name in VARS.iter() {
            std::env::remove_var(name);
        }

        let config = Config::from_env().unwrap();
        assert_eq!(config, Config::default());

        std::env::set_var("BLINDVOTE_KEY_PATH", "/var/lib/blindvote/keys.json");
        std::env::set_var("BLINDVOTE_KEY_BITS", " 3072 ");
        std::env::set_var("BLINDVOTE_ALLOW_EPHEMERAL_KEY", "yes");
        let config = Config::from_env().unwrap();
        assert_eq!(config.key_path, PathBuf::from("/var/lib/blindvote/keys.json"));
        assert_eq!(config.key_bits, 3072);
        assert!(config.allow_ephemeral_key);

        std::env::set_var("BLINDVOTE_KEY_BITS", "lots");
        assert!(matches!(Config::from_env(), Err(Error::Config(_))));

        std::env::set_var("BLINDVOTE_KEY_BITS", "1024");
        assert!(matches!(Config::from_env(), Err(Error::Config(_))));

        std::env::set_var("BLINDVOTE_KEY_BITS", "2048");
        std::env::set_var("BLINDVOTE_ALLOW_EPHEMERAL_KEY", "maybe");
        assert!(matches!(Config::from_env(), Err(Error::Config(_))));

        for name in VARS.iter() {
            std::env::remove_var(name);
        }
    }
}

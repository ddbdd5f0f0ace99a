use super::{fail, load_config, print_json};
use blindvote::KeyPair;

pub fn command_keygen(matches: &clap::ArgMatches) {
    let mut config = load_config(matches, "blindvote keygen");
    if let Some(bits) = matches.value_of("bits") {
        config.key_bits = bits
            .parse()
            .unwrap_or_else(|_| fail("blindvote keygen", format!("invalid --bits {}", bits)));
    }
    if matches.is_present("allow-ephemeral") {
        config.allow_ephemeral_key = true;
    }
    config
        .validate()
        .unwrap_or_else(|e| fail("blindvote keygen", e));

    let keys = blindvote::generate_keys(&config).unwrap_or_else(|e| fail("blindvote keygen", e));

    eprintln!("key-path: {}", config.key_path.display());
    eprintln!("fingerprint: {}", keys.fingerprint());
    print_json("blindvote keygen", &keys.public_key());
}

pub fn command_public_key(matches: &clap::ArgMatches) {
    let config = load_config(matches, "blindvote public-key");

    // Never generate here: a missing key is an error
    let keys = KeyPair::load(&config.key_path).unwrap_or_else(|e| fail("blindvote public-key", e));
    print_json("blindvote public-key", &keys.public_key());
}

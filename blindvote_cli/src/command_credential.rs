use super::{expand, fail, load_config, print_json, read_public_key};
use blindvote::*;
use serde_json::json;

fn parse_hex(command: &str, name: &str, value: &str) -> BigUint {
    parse_biguint_hex(value).unwrap_or_else(|e| fail(command, format!("invalid {}: {}", name, e)))
}

fn parse_token(command: &str, value: &str) -> RawToken {
    let bytes = hex::decode(value.trim())
        .unwrap_or_else(|e| fail(command, format!("invalid token: {}", e)));
    RawToken::from_bytes(bytes)
}

/// Voter side: blind a token. The printed token and blinding factor stay on the voter's device.
pub fn command_blind(matches: &clap::ArgMatches) {
    let command = "blindvote blind";
    let public_key = read_public_key(matches, command);

    let raw_token = match matches.value_of("token") {
        Some(token) => parse_token(command, token),
        None => RawToken::random(),
    };

    let (blinded_value, blinding_factor) =
        blind(&raw_token, &public_key).unwrap_or_else(|e| fail(command, e));

    print_json(
        command,
        &json!({
            "token": hex::encode(raw_token.as_bytes()),
            "token_identifier": raw_token.token_identifier(),
            "blinding_factor": biguint_to_hex(&blinding_factor),
            "blinded_value": biguint_to_hex(&blinded_value),
        }),
    );
}

/// Authority side: sign a blinded value with the stored key
pub fn command_sign(matches: &clap::ArgMatches) {
    let command = "blindvote sign";
    let config = load_config(matches, command);
    let keys = KeyPair::load(&config.key_path).unwrap_or_else(|e| fail(command, e));
    let authority = Authority::new(keys).unwrap_or_else(|e| fail(command, e));

    let blinded_value = parse_hex(
        command,
        "blinded value",
        matches.value_of("BLINDED-VALUE").unwrap_or_default(),
    );
    let blind_signature = authority
        .sign_blinded(&blinded_value)
        .unwrap_or_else(|e| fail(command, e));

    println!("{}", biguint_to_hex(&blind_signature));
}

/// Voter side: unblind a blind signature and write out the credential
pub fn command_unblind(matches: &clap::ArgMatches) {
    let command = "blindvote unblind";
    let public_key = read_public_key(matches, command);

    let raw_token = parse_token(command, matches.value_of("token").unwrap_or_default());
    let blinding_factor = parse_hex(
        command,
        "blinding factor",
        matches.value_of("blinding-factor").unwrap_or_default(),
    );
    let blind_signature = parse_hex(
        command,
        "blind signature",
        matches.value_of("BLIND-SIGNATURE").unwrap_or_default(),
    );
    let election_id = expand(matches.value_of("election").unwrap_or_default());

    let signature = unblind(&blind_signature, &blinding_factor, &public_key)
        .unwrap_or_else(|e| fail(command, e));
    let credential = Credential {
        token_identifier: raw_token.token_identifier(),
        signature,
    };
    if !credential.verify(&public_key) {
        fail(command, Error::InvalidCredential);
    }

    let file = CredentialFile::new(&election_id, credential, &public_key);
    match matches.value_of("seal-secret") {
        Some(secret) => {
            let sealed = file
                .seal(expand(secret).as_bytes())
                .unwrap_or_else(|e| fail(command, e));
            print_json(command, &sealed);
        }
        None => print_json(command, &file),
    }
}

/// Check that a credential file, sealed or not, carries a valid signature
pub fn command_verify(matches: &clap::ArgMatches) {
    let command = "blindvote verify";
    let public_key = read_public_key(matches, command);

    let filename = expand(matches.value_of("CREDENTIAL").unwrap_or_default());
    let json = std::fs::read_to_string(&filename)
        .unwrap_or_else(|e| fail(command, format!("unable to read {}: {}", filename, e)));

    let file = match matches.value_of("seal-secret") {
        Some(secret) => {
            let sealed: SealedCredential = serde_json::from_str(&json)
                .unwrap_or_else(|e| fail(command, format!("invalid sealed credential: {}", e)));
            sealed
                .open(expand(secret).as_bytes())
                .unwrap_or_else(|e| fail(command, e))
        }
        None => CredentialFile::from_json(&json).unwrap_or_else(|e| fail(command, e)),
    };

    if file.key_fingerprint != public_key.fingerprint() {
        fail(
            command,
            format!(
                "credential was issued under key {}, not {}",
                file.key_fingerprint,
                public_key.fingerprint()
            ),
        );
    }
    if !file.credential().verify(&public_key) {
        fail(command, Error::InvalidCredential);
    }

    print_json(
        command,
        &json!({
            "valid": true,
            "election_id": file.election_id,
            "token_identifier": file.token_identifier,
        }),
    );
}

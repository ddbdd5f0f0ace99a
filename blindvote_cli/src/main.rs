use clap::{App, AppSettings, Arg, SubCommand};
use log::LevelFilter;
use std::fmt::Display;

mod command_credential;
mod command_keygen;
mod command_tally;

use command_credential::*;
use command_keygen::*;
use command_tally::*;

#[derive(PartialEq, Copy, Clone)]
pub enum Verbosity {
    Warn,
    Info,
    Debug,
}

impl From<Verbosity> for LevelFilter {
    fn from(verbosity: Verbosity) -> Self {
        match verbosity {
            Verbosity::Warn => LevelFilter::Warn,
            Verbosity::Info => LevelFilter::Info,
            Verbosity::Debug => LevelFilter::Debug,
        }
    }
}

fn main() {
    let key_path = Arg::with_name("key-path")
        .long("key-path")
        .takes_value(true)
        .help("Authority key file - can also be set with BLINDVOTE_KEY_PATH");

    let public_key = Arg::with_name("public-key")
        .long("public-key")
        .takes_value(true)
        .required(true)
        .help("Authority public key file, as written by `blindvote public-key`");

    let seal_secret = Arg::with_name("seal-secret")
        .long("seal-secret")
        .takes_value(true)
        .help("Secret the credential file is sealed with");

    let matches = App::new("BlindVote CLI")
        .version("1.0")
        .about("Blind-signature credentials and instant-runoff tallies")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("v")
                .short("v")
                .multiple(true)
                .help("Sets the level of verbosity"),
        )
        .subcommand(
            SubCommand::with_name("keygen")
                .about("Generate the authority key pair, or load it if it already exists")
                .arg(key_path.clone())
                .arg(
                    Arg::with_name("bits")
                        .long("bits")
                        .takes_value(true)
                        .help("Modulus size for a new key - can also be set with BLINDVOTE_KEY_BITS"),
                )
                .arg(
                    Arg::with_name("allow-ephemeral")
                        .long("allow-ephemeral")
                        .help("Carry on with an unsaved key if the key file cannot be written"),
                ),
        )
        .subcommand(
            SubCommand::with_name("public-key")
                .about("Print the authority public key")
                .arg(key_path.clone()),
        )
        .subcommand(
            SubCommand::with_name("blind")
                .about("Blind a token for signing (voter side)")
                .arg(public_key.clone())
                .arg(
                    Arg::with_name("token")
                        .long("token")
                        .takes_value(true)
                        .help("Raw token in hex. A random token is generated if omitted"),
                ),
        )
        .subcommand(
            SubCommand::with_name("sign")
                .about("Sign a blinded value (authority side)")
                .arg(key_path)
                .arg(
                    Arg::with_name("BLINDED-VALUE")
                        .index(1)
                        .required(true)
                        .help("Blinded value in hex"),
                ),
        )
        .subcommand(
            SubCommand::with_name("unblind")
                .about("Unblind a blind signature into a credential file (voter side)")
                .arg(public_key.clone())
                .arg(
                    Arg::with_name("election")
                        .long("election")
                        .takes_value(true)
                        .required(true)
                        .help("Election the credential is for"),
                )
                .arg(
                    Arg::with_name("token")
                        .long("token")
                        .takes_value(true)
                        .required(true)
                        .help("Raw token in hex, as printed by `blindvote blind`"),
                )
                .arg(
                    Arg::with_name("blinding-factor")
                        .long("blinding-factor")
                        .takes_value(true)
                        .required(true)
                        .help("Blinding factor in hex, as printed by `blindvote blind`"),
                )
                .arg(seal_secret.clone())
                .arg(
                    Arg::with_name("BLIND-SIGNATURE")
                        .index(1)
                        .required(true)
                        .help("Blind signature in hex"),
                ),
        )
        .subcommand(
            SubCommand::with_name("verify")
                .about("Verify a credential file")
                .arg(public_key)
                .arg(seal_secret)
                .arg(
                    Arg::with_name("CREDENTIAL")
                        .index(1)
                        .required(true)
                        .help("Credential file in JSON format"),
                ),
        )
        .subcommand(
            SubCommand::with_name("tally")
                .about("Run an instant-runoff tally over a ballot file")
                .arg(
                    Arg::with_name("candidates")
                        .long("candidates")
                        .takes_value(true)
                        .required(true)
                        .help("Comma separated candidate ids in declaration order"),
                )
                .arg(
                    Arg::with_name("BALLOTS")
                        .index(1)
                        .required(true)
                        .help("JSON list of ballots, or of rankings"),
                ),
        )
        .get_matches();

    let verbosity = match matches.occurrences_of("v") {
        0 => Verbosity::Warn,
        1 => Verbosity::Info,
        _ => Verbosity::Debug,
    };
    env_logger::Builder::from_default_env()
        .filter_level(verbosity.into())
        .init();

    // Subcommands
    match matches.subcommand() {
        ("keygen", Some(matches)) => command_keygen(matches),
        ("public-key", Some(matches)) => command_public_key(matches),
        ("blind", Some(matches)) => command_blind(matches),
        ("sign", Some(matches)) => command_sign(matches),
        ("unblind", Some(matches)) => command_unblind(matches),
        ("verify", Some(matches)) => command_verify(matches),
        ("tally", Some(matches)) => command_tally(matches),
        _ => unreachable!(),
    }
}

/// Expand `~` and environment variables in a path or value
pub fn expand(input: &str) -> String {
    shellexpand::full(input)
        .map(|expanded| expanded.into_owned())
        .unwrap_or_else(|e| fail("blindvote", e))
}

/// Print an error and exit
pub fn fail<E: Display>(command: &str, e: E) -> ! {
    eprintln!("{}: {}", command, e);
    std::process::exit(1);
}

/// Load the authority configuration, letting `--key-path` override the environment
pub fn load_config(matches: &clap::ArgMatches, command: &str) -> blindvote::Config {
    let mut config = blindvote::Config::from_env().unwrap_or_else(|e| fail(command, e));
    if let Some(path) = matches.value_of("key-path") {
        config.key_path = expand(path).into();
    }
    config
}

pub fn read_public_key(matches: &clap::ArgMatches, command: &str) -> blindvote::PublicKey {
    let filename = expand(matches.value_of("public-key").unwrap_or_default());
    let json = std::fs::read_to_string(&filename)
        .unwrap_or_else(|e| fail(command, format!("unable to read {}: {}", filename, e)));
    serde_json::from_str(&json)
        .unwrap_or_else(|e| fail(command, format!("invalid public key in {}: {}", filename, e)))
}

pub fn print_json<T: serde::Serialize>(command: &str, value: &T) {
    let json = serde_json::to_string_pretty(value).unwrap_or_else(|e| fail(command, e));
    println!("{}", json);
}

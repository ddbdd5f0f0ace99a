use crate::*;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error types
#[derive(Debug, Error)]
pub enum Error {
    #[error("blindvote: authority key unavailable: {0}")]
    KeyUnavailable(String),

    #[error("blindvote: a credential has already been issued to this identity")]
    AlreadyIssued,

    #[error("blindvote: this token has already been used to vote")]
    AlreadyVoted,

    #[error("blindvote: credential signature does not verify")]
    InvalidCredential,

    #[error("blindvote: election {0} is not open for voting")]
    ElectionNotOpen(String),

    #[error("blindvote: invalid ballot: {0}")]
    InvalidBallot(String),

    #[error("blindvote: results for election {0} are not available until the election ends")]
    ResultsNotAvailable(String),

    #[error("blindvote: election {0} does not exist")]
    ElectionNotFound(String),

    #[error("blindvote: election {0} already exists")]
    ElectionExists(String),

    #[error("blindvote: election {0} has already started")]
    ElectionStarted(String),

    #[error("blindvote: invalid election: {0}")]
    InvalidElection(String),

    #[error("blindvote: candidate {0} already exists")]
    DuplicateCandidate(String),

    #[error("blindvote: blind value must be less than the authority modulus")]
    MalformedBlindValue,

    #[error("blindvote: blinding factor is not invertible modulo the authority modulus")]
    InvalidBlindingFactor,

    #[error("blindvote: invalid hexadecimal: {0}")]
    InvalidHex(String),

    #[error("blindvote: hex error: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("blindvote: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("blindvote: CBOR error: {0}")]
    Cbor(#[from] serde_cbor::Error),

    #[error("blindvote: IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("blindvote: RSA error: {0}")]
    Rsa(#[from] rsa::Error),

    #[error("blindvote: {0}")]
    Store(#[from] StoreError),

    #[error("blindvote: configuration error: {0}")]
    Config(String),

    #[error("blindvote: unable to seal or open credential")]
    CredentialSealing,
}

/// Stable error codes, one per failure the protocol boundary distinguishes
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    KeyUnavailable,
    AlreadyIssued,
    AlreadyVoted,
    InvalidCredential,
    ElectionNotOpen,
    InvalidBallot,
    ResultsNotAvailable,
    ElectionNotFound,
    ElectionExists,
    ElectionStarted,
    InvalidElection,
    DuplicateCandidate,
    MalformedInput,
    CredentialSealing,
    Internal,

    /// Either `AlreadyVoted` or `InvalidCredential`, as reported to anonymous callers
    CredentialRejected,
}

impl Error {
    /// The precise kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::KeyUnavailable(_) => ErrorKind::KeyUnavailable,
            Error::AlreadyIssued => ErrorKind::AlreadyIssued,
            Error::AlreadyVoted => ErrorKind::AlreadyVoted,
            Error::InvalidCredential => ErrorKind::InvalidCredential,
            Error::ElectionNotOpen(_) => ErrorKind::ElectionNotOpen,
            Error::InvalidBallot(_) => ErrorKind::InvalidBallot,
            Error::ResultsNotAvailable(_) => ErrorKind::ResultsNotAvailable,
            Error::ElectionNotFound(_) => ErrorKind::ElectionNotFound,
            Error::ElectionExists(_) => ErrorKind::ElectionExists,
            Error::ElectionStarted(_) => ErrorKind::ElectionStarted,
            Error::InvalidElection(_) => ErrorKind::InvalidElection,
            Error::DuplicateCandidate(_) => ErrorKind::DuplicateCandidate,
            Error::MalformedBlindValue
            | Error::InvalidBlindingFactor
            | Error::InvalidHex(_)
            | Error::Hex(_)
            | Error::Json(_)
            | Error::Cbor(_) => ErrorKind::MalformedInput,
            Error::CredentialSealing => ErrorKind::CredentialSealing,
            Error::Io(_) | Error::Rsa(_) | Error::Store(_) | Error::Config(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// The kind to report to an anonymous caller.
    ///
    /// Used and invalid tokens are indistinguishable here, so a caller cannot probe
    /// whether a token it holds was ever valid.
    pub fn public_kind(&self) -> ErrorKind {
        match self.kind() {
            ErrorKind::AlreadyVoted | ErrorKind::InvalidCredential => {
                ErrorKind::CredentialRejected
            }
            kind => kind,
        }
    }
}

use crate::*;
use chrono::{DateTime, Utc};
use num_bigint_dig::BigUint;

/// Every operation the registry exposes, by name
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    GetPublicKey,
    RequestCredential,
    CastVote,
    GetBallots,
    GetResults,
    Tally,
    CheckAttendance,
    ConfirmParticipation,
    CheckParticipation,
    ElectionStatus,
    GetCandidates,
    HasVoted,
}

impl Operation {
    pub const ALL: [Operation; 12] = [
        Operation::GetPublicKey,
        Operation::RequestCredential,
        Operation::CastVote,
        Operation::GetBallots,
        Operation::GetResults,
        Operation::Tally,
        Operation::CheckAttendance,
        Operation::ConfirmParticipation,
        Operation::CheckParticipation,
        Operation::ElectionStatus,
        Operation::GetCandidates,
        Operation::HasVoted,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Operation::GetPublicKey => "get_public_key",
            Operation::RequestCredential => "request_credential",
            Operation::CastVote => "cast_vote",
            Operation::GetBallots => "get_ballots",
            Operation::GetResults => "get_results",
            Operation::Tally => "tally",
            Operation::CheckAttendance => "check_attendance",
            Operation::ConfirmParticipation => "confirm_participation",
            Operation::CheckParticipation => "check_participation",
            Operation::ElectionStatus => "election_status",
            Operation::GetCandidates => "get_candidates",
            Operation::HasVoted => "has_voted",
        }
    }

    /// Operations that write registry state and so must go through the transaction log
    pub fn is_write(self) -> bool {
        matches!(
            self,
            Operation::RequestCredential | Operation::CastVote | Operation::ConfirmParticipation
        )
    }
}

/// A request to the registry
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum Request {
    GetPublicKey,

    /// The identity must already be authenticated by the caller
    RequestCredential {
        identity: IdentityKey,

        #[serde(with = "biguint_hex")]
        blinded_value: BigUint,
    },

    /// Anonymous: carries no identity
    CastVote {
        election_id: String,
        token_identifier: TokenId,

        #[serde(with = "biguint_hex")]
        signature: BigUint,

        /// Decoded when the vote is cast, so a bad payload is an `InvalidBallot`
        ballot: serde_json::Value,
    },

    GetBallots {
        election_id: String,
    },

    GetResults {
        election_id: String,
    },

    Tally {
        election_id: String,
    },

    CheckAttendance {
        identity: IdentityKey,
    },

    ConfirmParticipation {
        identity: IdentityKey,
    },

    CheckParticipation {
        identity: IdentityKey,
    },

    ElectionStatus {
        election_id: String,
    },

    GetCandidates {
        election_id: String,
    },

    HasVoted {
        election_id: String,
        token_identifier: TokenId,
    },
}

impl Request {
    pub fn operation(&self) -> Operation {
        match self {
            Request::GetPublicKey => Operation::GetPublicKey,
            Request::RequestCredential { .. } => Operation::RequestCredential,
            Request::CastVote { .. } => Operation::CastVote,
            Request::GetBallots { .. } => Operation::GetBallots,
            Request::GetResults { .. } => Operation::GetResults,
            Request::Tally { .. } => Operation::Tally,
            Request::CheckAttendance { .. } => Operation::CheckAttendance,
            Request::ConfirmParticipation { .. } => Operation::ConfirmParticipation,
            Request::CheckParticipation { .. } => Operation::CheckParticipation,
            Request::ElectionStatus { .. } => Operation::ElectionStatus,
            Request::GetCandidates { .. } => Operation::GetCandidates,
            Request::HasVoted { .. } => Operation::HasVoted,
        }
    }
}

/// The result of a successful request, tagged with the operation that produced it
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "operation", content = "result", rename_all = "snake_case")]
pub enum Response {
    GetPublicKey(PublicKey),
    RequestCredential(#[serde(with = "biguint_hex")] BigUint),
    CastVote {
        election_id: String,
        recorded_at: DateTime<Utc>,
    },
    GetBallots(Vec<Ballot>),
    GetResults(ElectionResults),
    Tally(IrvResult),
    CheckAttendance(bool),
    ConfirmParticipation,
    CheckParticipation(bool),
    ElectionStatus(ElectionStatusReport),
    GetCandidates(Vec<Candidate>),
    HasVoted(bool),
}

/// An error as reported across the protocol boundary
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorReport {
    /// Report an error to a caller that may be anonymous
    pub fn public(error: &Error) -> Self {
        let kind = error.public_kind();
        let message = match kind {
            ErrorKind::CredentialRejected => "credential rejected".to_owned(),
            ErrorKind::Internal => "internal error".to_owned(),
            _ => error.to_string(),
        };
        ErrorReport { kind, message }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Ok(Response),
    Error(ErrorReport),
}

impl<S: Store> Registry<S> {
    /// Run one request. `tx_time` is the time the transaction layer assigned to it.
    ///
    /// `access` comes from the caller's authorization layer, never from the request.
    pub fn dispatch(
        &self,
        request: Request,
        access: Access,
        tx_time: DateTime<Utc>,
    ) -> Result<Response, Error> {
        let response = match request {
            Request::GetPublicKey => Response::GetPublicKey(self.public_key().clone()),
            Request::RequestCredential {
                identity,
                blinded_value,
            } => Response::RequestCredential(self.request_credential(
                &identity,
                &blinded_value,
                tx_time,
            )?),
            Request::CastVote {
                election_id,
                token_identifier,
                signature,
                ballot,
            } => {
                let payload = BallotPayload::from_value(ballot)?;
                let ballot =
                    self.cast_vote(&election_id, &token_identifier, &signature, payload, tx_time)?;
                Response::CastVote {
                    election_id: ballot.election_id,
                    recorded_at: ballot.timestamp,
                }
            }
            Request::GetBallots { election_id } => {
                Response::GetBallots(self.get_ballots(&election_id, access, tx_time)?)
            }
            Request::GetResults { election_id } => {
                Response::GetResults(self.get_results(&election_id, access, tx_time)?)
            }
            Request::Tally { election_id } => {
                Response::Tally(self.tally(&election_id, access, tx_time)?)
            }
            Request::CheckAttendance { identity } => {
                Response::CheckAttendance(self.check_attendance(&identity)?)
            }
            Request::ConfirmParticipation { identity } => {
                self.confirm_participation(&identity, tx_time)?;
                Response::ConfirmParticipation
            }
            Request::CheckParticipation { identity } => {
                Response::CheckParticipation(self.check_participation(&identity)?)
            }
            Request::ElectionStatus { election_id } => {
                Response::ElectionStatus(self.election_status(&election_id, tx_time)?)
            }
            Request::GetCandidates { election_id } => {
                Response::GetCandidates(self.get_candidates(&election_id, tx_time)?)
            }
            Request::HasVoted {
                election_id,
                token_identifier,
            } => Response::HasVoted(self.has_voted(&election_id, &token_identifier)?),
        };
        Ok(response)
    }

    /// Run a JSON request and render the outcome as JSON.
    ///
    /// Protocol errors become an `Outcome::Error`; a request that does not parse is an `Err`.
    pub fn handle_json(
        &self,
        request: &str,
        access: Access,
        tx_time: DateTime<Utc>,
    ) -> Result<String, Error> {
        let request: Request = serde_json::from_str(request)?;
        let operation = request.operation();

        let outcome = match self.dispatch(request, access, tx_time) {
            Ok(response) => Outcome::Ok(response),
            Err(e) => {
                debug!("{} failed: {}", operation.name(), e);
                Outcome::Error(ErrorReport::public(&e))
            }
        };
        Ok(serde_json::to_string(&outcome)?)
    }
}

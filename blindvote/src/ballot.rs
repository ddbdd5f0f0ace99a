use crate::*;
use chrono::{DateTime, Utc};
use content_inspector::ContentType;
use std::collections::HashSet;

pub type CandidateId = String;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// A recorded ballot. Created once by a successful vote and never changed.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Ballot {
    pub token_identifier: TokenId,
    pub election_id: String,

    /// Candidate ids, most preferred first
    pub ranked_candidate_ids: Vec<CandidateId>,

    pub timestamp: DateTime<Utc>,
}

/// Ballot contents as submitted by a voter, tagged with a schema version
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "version")]
pub enum BallotPayload {
    #[serde(rename = "1")]
    V1 {
        ranked_candidate_ids: Vec<CandidateId>,
    },
}

impl BallotPayload {
    pub fn new(ranked_candidate_ids: Vec<CandidateId>) -> Self {
        BallotPayload::V1 {
            ranked_candidate_ids,
        }
    }

    /// Decode a payload from JSON or CBOR.
    ///
    /// Anything that does not decode to a known schema version is an `InvalidBallot`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        match content_inspector::inspect(bytes) {
            ContentType::UTF_16LE
            | ContentType::UTF_16BE
            | ContentType::UTF_32LE
            | ContentType::UTF_32BE => {
                return Err(Error::InvalidBallot(
                    "ballot payload must be UTF-8 JSON or CBOR".to_owned(),
                ))
            }
            _ => {}
        }

        let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
        let first = body.iter().find(|b| !b.is_ascii_whitespace()).copied();

        // If it starts with `{` then it's JSON
        let decoded = match first {
            None => return Err(Error::InvalidBallot("ballot payload is empty".to_owned())),
            Some(b'{') => serde_json::from_slice(body).map_err(|e| e.to_string()),
            Some(_) => serde_cbor::from_slice(body).map_err(|e| e.to_string()),
        };

        decoded.map_err(|e| Error::InvalidBallot(format!("malformed ballot payload: {}", e)))
    }

    /// Decode a payload already parsed as part of a JSON request
    pub fn from_value(value: serde_json::Value) -> Result<Self, Error> {
        serde_json::from_value(value)
            .map_err(|e| Error::InvalidBallot(format!("malformed ballot payload: {}", e)))
    }

    pub fn ranked_candidate_ids(&self) -> &[CandidateId] {
        match self {
            BallotPayload::V1 {
                ranked_candidate_ids,
            } => ranked_candidate_ids,
        }
    }

    pub fn into_ranked_candidate_ids(self) -> Vec<CandidateId> {
        match self {
            BallotPayload::V1 {
                ranked_candidate_ids,
            } => ranked_candidate_ids,
        }
    }

    /// The ranking must be non-empty, free of duplicates, and name only candidates of `election`
    pub fn validate(&self, election: &Election) -> Result<(), Error> {
        validate_ranking(self.ranked_candidate_ids(), election)
    }
}

pub fn validate_ranking(ranked_candidate_ids: &[CandidateId], election: &Election) -> Result<(), Error> {
    if ranked_candidate_ids.is_empty() {
        return Err(Error::InvalidBallot("ballot ranks no candidates".to_owned()));
    }

    let mut seen = HashSet::with_capacity(ranked_candidate_ids.len());
    for candidate_id in ranked_candidate_ids {
        if !seen.insert(candidate_id.as_str()) {
            return Err(Error::InvalidBallot(format!(
                "candidate {} is ranked more than once",
                candidate_id
            )));
        }
        if election.candidate(candidate_id).is_none() {
            return Err(Error::InvalidBallot(format!(
                "candidate {} is not standing in election {}",
                candidate_id, election.id
            )));
        }
    }

    Ok(())
}

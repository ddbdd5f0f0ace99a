use crate::*;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use uuid::Uuid;

/// Where an election is in its lifecycle, derived from the transaction time
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ElectionStatus {
    Pending,
    Active,
    Ended,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub id: CandidateId,
    pub name: String,

    /// First-preference count, filled in once the election has been tallied
    #[serde(default)]
    pub vote_count: u64,

    /// Free-form display data (vision statement, image url, ...)
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub properties: IndexMap<String, String>,
}

impl Candidate {
    pub fn new<I: Into<String>, N: Into<String>>(id: I, name: N) -> Self {
        Candidate {
            id: id.into(),
            name: name.into(),
            vote_count: 0,
            properties: IndexMap::new(),
        }
    }

    pub fn with_property<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// This candidate with its vote count removed, for display while voting is open
    pub fn without_count(&self) -> Self {
        Candidate {
            vote_count: 0,
            ..self.clone()
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Election {
    pub id: String,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,

    /// Candidates in declaration order. The order is the tally's tie-break.
    pub candidates: Vec<Candidate>,

    #[serde(default)]
    pub total_votes: u64,

    /// Fingerprint of the authority key that signs credentials for this election
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authority_fingerprint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Election {
    /// Create a new election with a random id
    pub fn new<N: Into<String>>(
        name: N,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        candidates: Vec<Candidate>,
    ) -> Self {
        Election {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            start_time,
            end_time,
            candidates,
            total_votes: 0,
            authority_fingerprint: None,
            created_at: None,
        }
    }

    pub fn with_id<I: Into<String>>(mut self, id: I) -> Self {
        self.id = id.into();
        self
    }

    /// Status at `now`. Both window bounds are inclusive.
    pub fn status_at(&self, now: DateTime<Utc>) -> ElectionStatus {
        if now < self.start_time {
            ElectionStatus::Pending
        } else if now <= self.end_time {
            ElectionStatus::Active
        } else {
            ElectionStatus::Ended
        }
    }

    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.status_at(now) == ElectionStatus::Active
    }

    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        self.status_at(now) == ElectionStatus::Ended
    }

    /// Get a candidate with the given ID
    pub fn candidate(&self, candidate_id: &str) -> Option<&Candidate> {
        self.candidates.iter().find(|c| c.id == candidate_id)
    }

    /// Candidate ids in declaration order
    pub fn candidate_ids(&self) -> Vec<CandidateId> {
        self.candidates.iter().map(|c| c.id.clone()).collect()
    }

    /// Check the election is well formed before it is stored
    pub fn validate(&self) -> Result<(), Error> {
        if self.id.is_empty() {
            return Err(Error::InvalidElection("election id is empty".to_owned()));
        }
        if self.start_time >= self.end_time {
            return Err(Error::InvalidElection(format!(
                "election {} must start before it ends",
                self.id
            )));
        }
        for (i, candidate) in self.candidates.iter().enumerate() {
            if candidate.id.is_empty() {
                return Err(Error::InvalidElection(format!(
                    "candidate {} of election {} has an empty id",
                    i, self.id
                )));
            }
            if self.candidates[..i].iter().any(|c| c.id == candidate.id) {
                return Err(Error::DuplicateCandidate(candidate.id.clone()));
            }
        }
        Ok(())
    }

    pub fn status_report(&self, now: DateTime<Utc>) -> ElectionStatusReport {
        ElectionStatusReport {
            election_id: self.id.clone(),
            name: self.name.clone(),
            status: self.status_at(now),
            start_time: self.start_time,
            end_time: self.end_time,
            total_votes: self.total_votes,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ElectionStatusReport {
    pub election_id: String,
    pub name: String,
    pub status: ElectionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub total_votes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn election() -> Election {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        Election::new(
            "Student council",
            start,
            start + Duration::hours(8),
            vec![Candidate::new("C1", "Ada"), Candidate::new("C2", "Grace")],
        )
    }

    #[test]
    fn test_status_window_is_inclusive() {
        let election = election();
        let before = election.start_time - Duration::seconds(1);
        let after = election.end_time + Duration::seconds(1);

        assert_eq!(election.status_at(before), ElectionStatus::Pending);
        assert_eq!(election.status_at(election.start_time), ElectionStatus::Active);
        assert_eq!(election.status_at(election.end_time), ElectionStatus::Active);
        assert_eq!(election.status_at(after), ElectionStatus::Ended);

        assert!(election.is_open(election.end_time));
        assert!(!election.has_ended(election.end_time));
        assert!(election.has_ended(after));
    }

    #[test]
    fn test_validate() {
        assert!(election().validate().is_ok());

        let mut backwards = election();
        backwards.end_time = backwards.start_time;
        assert!(matches!(
            backwards.validate(),
            Err(Error::InvalidElection(_))
        ));

        let mut duplicated = election();
        duplicated.candidates.push(Candidate::new("C1", "Ada again"));
        assert!(matches!(
            duplicated.validate(),
            Err(Error::DuplicateCandidate(id)) if id == "C1"
        ));
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&ElectionStatus::Active).unwrap();
        assert_eq!(json, "\"ACTIVE\"");

        let candidate = Candidate::new("C1", "Ada").with_property("vision", "More libraries");
        let json = serde_json::to_value(&candidate).unwrap();
        assert_eq!(json["properties"]["vision"], "More libraries");

        let plain: Candidate = serde_json::from_str(r#"{"id":"C2","name":"Grace"}"#).unwrap();
        assert_eq!(plain.vote_count, 0);
        assert!(plain.properties.is_empty());
    }
}

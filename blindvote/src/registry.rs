use crate::*;
use chrono::{DateTime, Utc};
use num_bigint_dig::BigUint;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Whether a caller may read ballots and results before an election ends.
///
/// Deciding who is `Privileged` belongs to the caller's authorization layer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Access {
    Public,
    Privileged,
}

impl Default for Access {
    fn default() -> Self {
        Access::Public
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
struct AttendanceRecord {
    issued_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
struct ParticipationRecord {
    confirmed_at: DateTime<Utc>,
}

/// Results of an election once voting has closed
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ElectionResults {
    pub election_id: String,
    pub name: String,
    pub total_votes: u64,

    /// Candidates by first-preference count, highest first. Ties keep declaration order.
    pub candidates: Vec<Candidate>,

    pub ended_at: DateTime<Utc>,
    pub irv: IrvResult,
}

/// The ballot registry: elections, ballots and the issuance and voting protocols over a `Store`
pub struct Registry<S: Store> {
    store: S,
    authority: Authority,
}

impl<S: Store> Registry<S> {
    pub fn new(store: S, authority: Authority) -> Self {
        Registry { store, authority }
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn public_key(&self) -> &PublicKey {
        self.authority.public_key()
    }

    fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, Error> {
        match self.store.get(key)? {
            Some(bytes) => Ok(Some(serde_cbor::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    // Elections

    /// Store a new election bound to the current authority key
    pub fn create_election(&self, mut election: Election, tx_time: DateTime<Utc>) -> Result<Election, Error> {
        election.validate()?;
        election.total_votes = 0;
        for candidate in election.candidates.iter_mut() {
            candidate.vote_count = 0;
        }
        election.authority_fingerprint = Some(self.authority.fingerprint());
        election.created_at = Some(tx_time);

        let key = Key::Election(&election.id).to_string();
        match self.store.put_if_absent(&key, pack(&election)?) {
            Ok(()) => {
                info!("created election {}", election.id);
                Ok(election)
            }
            Err(StoreError::Conflict(_)) => Err(Error::ElectionExists(election.id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Add a candidate to an election that has not started yet
    pub fn add_candidate(
        &self,
        election_id: &str,
        candidate: Candidate,
        tx_time: DateTime<Utc>,
    ) -> Result<Election, Error> {
        let mut election = self.get_election(election_id)?;
        if tx_time >= election.start_time {
            return Err(Error::ElectionStarted(election.id));
        }
        if election.candidate(&candidate.id).is_some() {
            return Err(Error::DuplicateCandidate(candidate.id));
        }

        election.candidates.push(Candidate {
            vote_count: 0,
            ..candidate
        });
        self.store
            .put(&Key::Election(election_id).to_string(), pack(&election)?)?;
        Ok(election)
    }

    pub fn get_election(&self, election_id: &str) -> Result<Election, Error> {
        let mut election: Election = self
            .read(&Key::Election(election_id).to_string())?
            .ok_or_else(|| Error::ElectionNotFound(election_id.to_owned()))?;

        election.total_votes = match self.store.get(&Key::Votes(election_id).to_string())? {
            Some(bytes) => decode_counter(&bytes)?,
            None => 0,
        };
        Ok(election)
    }

    pub fn election_status(&self, election_id: &str, now: DateTime<Utc>) -> Result<ElectionStatusReport, Error> {
        Ok(self.get_election(election_id)?.status_report(now))
    }

    /// Candidates of an election. Vote counts stay zero until the election has ended.
    pub fn get_candidates(&self, election_id: &str, now: DateTime<Utc>) -> Result<Vec<Candidate>, Error> {
        let election = self.get_election(election_id)?;
        if !election.has_ended(now) {
            return Ok(election.candidates.iter().map(Candidate::without_count).collect());
        }
        let ballots = self.load_ballots(&election.id)?;
        Ok(first_preference_counts(&election, &ballots))
    }

    // Issuance

    pub fn check_attendance(&self, identity: &IdentityKey) -> Result<bool, Error> {
        Ok(self.store.exists(&Key::Attendance(identity).to_string())?)
    }

    /// Sign a blinded token for an identity that has never been issued a credential.
    ///
    /// The identity must already be authenticated by the caller. When two requests race,
    /// only the one that records attendance first gets its signature back.
    pub fn request_credential(
        &self,
        identity: &IdentityKey,
        blinded_value: &BigUint,
        tx_time: DateTime<Utc>,
    ) -> Result<BigUint, Error> {
        let key = Key::Attendance(identity).to_string();
        if self.store.exists(&key)? {
            warn!("refused second credential request for identity {}", identity);
            return Err(Error::AlreadyIssued);
        }

        let blind_signature = self.authority.sign_blinded(blinded_value)?;

        let record = AttendanceRecord { issued_at: tx_time };
        match self.store.put_if_absent(&key, pack(&record)?) {
            Ok(()) => {
                info!("issued credential to identity {}", identity);
                Ok(blind_signature)
            }
            Err(StoreError::Conflict(_)) => {
                warn!("refused concurrent credential request for identity {}", identity);
                Err(Error::AlreadyIssued)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Record that an identity says it has voted.
    ///
    /// Best effort only: nothing binds this flag to a ballot, and it proves nothing about
    /// whether a ballot was cast. Confirming twice keeps the first confirmation.
    pub fn confirm_participation(&self, identity: &IdentityKey, tx_time: DateTime<Utc>) -> Result<(), Error> {
        let record = ParticipationRecord {
            confirmed_at: tx_time,
        };
        match self
            .store
            .put_if_absent(&Key::Participation(identity).to_string(), pack(&record)?)
        {
            Ok(()) | Err(StoreError::Conflict(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn check_participation(&self, identity: &IdentityKey) -> Result<bool, Error> {
        Ok(self.store.exists(&Key::Participation(identity).to_string())?)
    }

    // Voting

    /// Cast an anonymous ballot with a credential.
    ///
    /// The ballot insert and the vote counter increment commit as one batch, so of any
    /// number of concurrent votes with the same token exactly one is recorded.
    pub fn cast_vote(
        &self,
        election_id: &str,
        token_identifier: &TokenId,
        signature: &BigUint,
        payload: BallotPayload,
        tx_time: DateTime<Utc>,
    ) -> Result<Ballot, Error> {
        let election = self.get_election(election_id)?;
        if !election.is_open(tx_time) {
            return Err(Error::ElectionNotOpen(election.id));
        }

        if let Some(fingerprint) = &election.authority_fingerprint {
            if *fingerprint != self.authority.fingerprint() {
                return Err(Error::KeyUnavailable(format!(
                    "election {} was opened under authority key {}, current key is {}",
                    election.id,
                    fingerprint,
                    self.authority.fingerprint()
                )));
            }
        }

        if !self
            .authority
            .verify_digest(token_identifier.as_bytes(), signature)
        {
            debug!("rejected credential in election {}", election.id);
            return Err(Error::InvalidCredential);
        }

        let key = Key::Ballot(&election.id, token_identifier).to_string();
        if self.store.exists(&key)? {
            warn!("rejected repeat vote in election {}", election.id);
            return Err(Error::AlreadyVoted);
        }

        payload.validate(&election)?;

        let ballot = Ballot {
            token_identifier: *token_identifier,
            election_id: election.id.clone(),
            ranked_candidate_ids: payload.into_ranked_candidate_ids(),
            timestamp: tx_time,
        };

        let batch = WriteBatch::new()
            .insert(&key, pack(&ballot)?)
            .increment(Key::Votes(&election.id), 1);

        match self.store.commit(batch) {
            Ok(()) => {
                info!("recorded ballot in election {}", election.id);
                Ok(ballot)
            }
            Err(StoreError::Conflict(_)) => {
                warn!("rejected concurrent repeat vote in election {}", election.id);
                Err(Error::AlreadyVoted)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Whether a token has been used in an election. Reveals nothing about the choices.
    pub fn has_voted(&self, election_id: &str, token_identifier: &TokenId) -> Result<bool, Error> {
        Ok(self
            .store
            .exists(&Key::Ballot(election_id, token_identifier).to_string())?)
    }

    // Results

    fn check_results_gate(&self, election: &Election, access: Access, now: DateTime<Utc>) -> Result<(), Error> {
        if access == Access::Public && !election.has_ended(now) {
            return Err(Error::ResultsNotAvailable(election.id.clone()));
        }
        Ok(())
    }

    fn load_ballots(&self, election_id: &str) -> Result<Vec<Ballot>, Error> {
        let mut ballots = Vec::new();
        for (_, bytes) in self.store.scan_prefix(&Key::ballot_prefix(election_id))? {
            let ballot: Ballot = serde_cbor::from_slice(&bytes)?;
            // BALLOT_a_ is also a prefix of BALLOT_a_b_...
            if ballot.election_id == election_id {
                ballots.push(ballot);
            }
        }
        Ok(ballots)
    }

    /// Every ballot of an election, for tallying.
    ///
    /// A privileged read before the end sees the ballots committed so far, not a final snapshot.
    pub fn get_ballots(&self, election_id: &str, access: Access, now: DateTime<Utc>) -> Result<Vec<Ballot>, Error> {
        let election = self.get_election(election_id)?;
        self.check_results_gate(&election, access, now)?;
        self.load_ballots(&election.id)
    }

    pub fn tally(&self, election_id: &str, access: Access, now: DateTime<Utc>) -> Result<IrvResult, Error> {
        let ballots = self.get_ballots(election_id, access, now)?;
        let election = self.get_election(election_id)?;
        Ok(tally_ballots(&election, &ballots))
    }

    pub fn get_results(&self, election_id: &str, access: Access, now: DateTime<Utc>) -> Result<ElectionResults, Error> {
        let election = self.get_election(election_id)?;
        self.check_results_gate(&election, access, now)?;
        let ballots = self.load_ballots(&election.id)?;

        let mut candidates = first_preference_counts(&election, &ballots);
        candidates.sort_by(|a, b| b.vote_count.cmp(&a.vote_count));

        Ok(ElectionResults {
            irv: tally_ballots(&election, &ballots),
            election_id: election.id,
            name: election.name,
            total_votes: ballots.len() as u64,
            candidates,
            ended_at: election.end_time,
        })
    }
}

fn pack<T: Serialize>(value: &T) -> Result<Vec<u8>, Error> {
    Ok(serde_cbor::to_vec(value)?)
}

fn tally_ballots(election: &Election, ballots: &[Ballot]) -> IrvResult {
    let rankings: Vec<Vec<CandidateId>> = ballots
        .iter()
        .map(|b| b.ranked_candidate_ids.clone())
        .collect();
    calculate_irv(&rankings, &election.candidate_ids())
}

/// Candidates in declaration order with their first-preference counts
fn first_preference_counts(election: &Election, ballots: &[Ballot]) -> Vec<Candidate> {
    election
        .candidates
        .iter()
        .map(|candidate| Candidate {
            vote_count: ballots
                .iter()
                .filter(|b| b.ranked_candidate_ids.first() == Some(&candidate.id))
                .count() as u64,
            ..candidate.clone()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::TEST_KEYS;
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;
    use std::thread;

    fn opens() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, 8, 0, 0).unwrap()
    }

    fn closes() -> DateTime<Utc> {
        opens() + Duration::hours(10)
    }

    fn during() -> DateTime<Utc> {
        opens() + Duration::hours(1)
    }

    fn after() -> DateTime<Utc> {
        closes() + Duration::seconds(1)
    }

    fn registry() -> Registry<MemStore> {
        let registry = Registry::new(MemStore::new(), Authority::new(TEST_KEYS.clone()).unwrap());
        let election = Election::new(
            "Class president",
            opens(),
            closes(),
            vec![
                Candidate::new("C1", "Ada"),
                Candidate::new("C2", "Grace"),
                Candidate::new("C3", "Barbara"),
            ],
        )
        .with_id("class-2024");
        registry
            .create_election(election, opens() - Duration::days(1))
            .unwrap();
        registry
    }

    /// Run the client side of issuance for `identity`
    fn obtain_credential<S: Store>(registry: &Registry<S>, identity: &str) -> Credential {
        let public_key = registry.public_key().clone();
        let (context, blinded_value) = BlindingContext::random(&public_key).unwrap();
        let blind_signature = registry
            .request_credential(&IdentityKey::new(identity), &blinded_value, during())
            .unwrap();
        let (_, credential) = context.unblind(&blind_signature, &public_key).unwrap();
        credential
    }

    fn vote<S: Store>(registry: &Registry<S>, credential: &Credential, ranking: &[&str]) -> Result<Ballot, Error> {
        let payload = BallotPayload::new(ranking.iter().map(|s| s.to_string()).collect());
        registry.cast_vote(
            "class-2024",
            &credential.token_identifier,
            &credential.signature,
            payload,
            during(),
        )
    }

    #[test]
    fn test_election_admin() {
        let registry = registry();
        let election = registry.get_election("class-2024").unwrap();
        assert_eq!(election.authority_fingerprint, Some(registry.authority().fingerprint()));
        assert_eq!(election.total_votes, 0);

        let again = Election::new("Again", opens(), closes(), vec![]).with_id("class-2024");
        assert!(matches!(
            registry.create_election(again, opens()),
            Err(Error::ElectionExists(_))
        ));

        let before = opens() - Duration::minutes(1);
        let updated = registry
            .add_candidate("class-2024", Candidate::new("C4", "Margaret"), before)
            .unwrap();
        assert_eq!(updated.candidate_ids(), vec!["C1", "C2", "C3", "C4"]);

        assert!(matches!(
            registry.add_candidate("class-2024", Candidate::new("C1", "Ada"), before),
            Err(Error::DuplicateCandidate(_))
        ));
        assert!(matches!(
            registry.add_candidate("class-2024", Candidate::new("C5", "Late"), opens()),
            Err(Error::ElectionStarted(_))
        ));
        assert!(matches!(
            registry.get_election("missing"),
            Err(Error::ElectionNotFound(_))
        ));

        let status = registry.election_status("class-2024", during()).unwrap();
        assert_eq!(status.status, ElectionStatus::Active);
    }

    #[test]
    fn test_issue_once_per_identity() {
        let registry = registry();
        let identity = IdentityKey::new("voter-1");
        assert!(!registry.check_attendance(&identity).unwrap());

        let (_, blinded_value) = BlindingContext::random(registry.public_key()).unwrap();
        registry
            .request_credential(&identity, &blinded_value, during())
            .unwrap();
        assert!(registry.check_attendance(&identity).unwrap());

        let (_, another) = BlindingContext::random(registry.public_key()).unwrap();
        assert!(matches!(
            registry.request_credential(&identity, &another, during()),
            Err(Error::AlreadyIssued)
        ));

        // A malformed blind value leaves no attendance behind
        let fresh = IdentityKey::new("voter-2");
        let too_big = registry.public_key().modulus.clone();
        assert!(matches!(
            registry.request_credential(&fresh, &too_big, during()),
            Err(Error::MalformedBlindValue)
        ));
        assert!(!registry.check_attendance(&fresh).unwrap());
    }

    #[test]
    fn test_concurrent_issuance() {
        let registry = Arc::new(registry());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                thread::spawn(move || {
                    let (_, blinded_value) = BlindingContext::random(registry.public_key()).unwrap();
                    registry.request_credential(&IdentityKey::new("contested"), &blinded_value, during())
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter(|r| r.is_err())
            .all(|r| matches!(r, Err(Error::AlreadyIssued))));
    }

    #[test]
    fn test_vote_once_per_token() {
        let registry = registry();
        let credential = obtain_credential(&registry, "voter-1");

        let ballot = vote(&registry, &credential, &["C2", "C1"]).unwrap();
        assert_eq!(ballot.timestamp, during());
        assert!(registry
            .has_voted("class-2024", &credential.token_identifier)
            .unwrap());

        let second = vote(&registry, &credential, &["C3"]);
        assert!(matches!(second, Err(Error::AlreadyVoted)));
        assert_eq!(registry.get_election("class-2024").unwrap().total_votes, 1);
    }

    #[test]
    fn test_concurrent_double_vote() {
        let registry = Arc::new(registry());
        let credential = obtain_credential(&*registry, "voter-1");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let credential = credential.clone();
                thread::spawn(move || vote(&*registry, &credential, &["C1"]))
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter(|r| r.is_err())
            .all(|r| matches!(r, Err(Error::AlreadyVoted))));

        assert_eq!(registry.get_election("class-2024").unwrap().total_votes, 1);
        let ballots = registry
            .get_ballots("class-2024", Access::Privileged, during())
            .unwrap();
        assert_eq!(ballots.len(), 1);
    }

    #[test]
    fn test_voting_window() {
        let registry = registry();
        let credential = obtain_credential(&registry, "voter-1");
        let payload = BallotPayload::new(vec!["C1".to_string()]);

        for when in &[opens() - Duration::seconds(1), after()] {
            let result = registry.cast_vote(
                "class-2024",
                &credential.token_identifier,
                &credential.signature,
                payload.clone(),
                *when,
            );
            assert!(matches!(result, Err(Error::ElectionNotOpen(_))));
        }

        // Both ends of the window are open
        for when in &[opens(), closes()] {
            let credential = obtain_credential(&registry, &format!("voter-at-{}", when));
            registry
                .cast_vote(
                    "class-2024",
                    &credential.token_identifier,
                    &credential.signature,
                    payload.clone(),
                    *when,
                )
                .unwrap();
        }
    }

    #[test]
    fn test_rejected_credentials_and_ballots() {
        let registry = registry();
        let credential = obtain_credential(&registry, "voter-1");

        let mut forged = credential.clone();
        forged.token_identifier = TokenId::digest(b"made up");
        let invalid = vote(&registry, &forged, &["C1"]).unwrap_err();
        assert!(matches!(invalid, Error::InvalidCredential));

        for ranking in &[&[][..], &["C1", "C1"][..], &["C9"][..]] {
            assert!(matches!(
                vote(&registry, &credential, ranking),
                Err(Error::InvalidBallot(_))
            ));
        }
        assert!(!registry
            .has_voted("class-2024", &credential.token_identifier)
            .unwrap());

        vote(&registry, &credential, &["C1"]).unwrap();
        let used = vote(&registry, &credential, &["C1"]).unwrap_err();

        // Anonymous callers cannot tell a used token from a bad one
        assert_eq!(used.public_kind(), invalid.public_kind());
        assert_ne!(used.kind(), invalid.kind());
    }

    #[test]
    fn test_election_under_another_key() {
        let registry = registry();
        let mut election = registry.get_election("class-2024").unwrap();
        election.id = "rotated".to_string();
        election.authority_fingerprint = Some("0000000000000000".to_string());
        registry
            .store()
            .put(&Key::Election("rotated").to_string(), pack(&election).unwrap())
            .unwrap();

        let credential = obtain_credential(&registry, "voter-1");
        let result = registry.cast_vote(
            "rotated",
            &credential.token_identifier,
            &credential.signature,
            BallotPayload::new(vec!["C1".to_string()]),
            during(),
        );
        assert!(matches!(result, Err(Error::KeyUnavailable(_))));
    }

    #[test]
    fn test_results_gate() {
        let registry = registry();
        let rankings: &[&[&str]] = &[&["C1"], &["C2", "C1"], &["C2"], &["C3", "C1"], &["C1"]];
        for (i, ranking) in rankings.iter().enumerate() {
            let credential = obtain_credential(&registry, &format!("voter-{}", i));
            vote(&registry, &credential, ranking).unwrap();
        }

        assert!(matches!(
            registry.get_results("class-2024", Access::Public, closes()),
            Err(Error::ResultsNotAvailable(_))
        ));
        assert!(matches!(
            registry.get_ballots("class-2024", Access::Public, during()),
            Err(Error::ResultsNotAvailable(_))
        ));
        assert!(matches!(
            registry.tally("class-2024", Access::Public, during()),
            Err(Error::ResultsNotAvailable(_))
        ));
        assert!(registry
            .get_candidates("class-2024", during())
            .unwrap()
            .iter()
            .all(|c| c.vote_count == 0));

        let preview = registry
            .get_results("class-2024", Access::Privileged, during())
            .unwrap();
        let results = registry
            .get_results("class-2024", Access::Public, after())
            .unwrap();
        assert_eq!(preview, results);

        assert_eq!(results.total_votes, 5);
        assert_eq!(results.ended_at, closes());
        let counts: Vec<(&str, u64)> = results
            .candidates
            .iter()
            .map(|c| (c.id.as_str(), c.vote_count))
            .collect();
        assert_eq!(counts, vec![("C1", 2), ("C2", 2), ("C3", 1)]);

        // Round 1: C1 2, C2 2, C3 1; C3's ballot moves to C1
        assert_eq!(results.irv.winner_id, Some("C1".to_string()));
        assert_eq!(results.irv.rounds.len(), 2);
        assert_eq!(
            registry.tally("class-2024", Access::Public, after()).unwrap(),
            results.irv
        );

        let candidates = registry.get_candidates("class-2024", after()).unwrap();
        assert_eq!(candidates[1].vote_count, 2);
    }

    #[test]
    fn test_ballots_stay_in_their_election() {
        let registry = registry();
        let nested = Election::new("Nested", opens(), closes(), vec![Candidate::new("C1", "Ada")])
            .with_id("class-2024_runoff");
        registry.create_election(nested, opens()).unwrap();

        let credential = obtain_credential(&registry, "voter-1");
        registry
            .cast_vote(
                "class-2024_runoff",
                &credential.token_identifier,
                &credential.signature,
                BallotPayload::new(vec!["C1".to_string()]),
                during(),
            )
            .unwrap();

        assert!(registry
            .get_ballots("class-2024", Access::Privileged, during())
            .unwrap()
            .is_empty());
        assert_eq!(
            registry
                .get_ballots("class-2024_runoff", Access::Privileged, during())
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_participation_is_best_effort() {
        let registry = registry();
        let identity = IdentityKey::new("voter-1");
        assert!(!registry.check_participation(&identity).unwrap());

        registry.confirm_participation(&identity, during()).unwrap();
        registry.confirm_participation(&identity, after()).unwrap();
        assert!(registry.check_participation(&identity).unwrap());

        // Participation is independent of attendance and ballots
        assert!(!registry.check_attendance(&identity).unwrap());
    }
}

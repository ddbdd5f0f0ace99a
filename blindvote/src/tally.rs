use crate::*;
use indexmap::{IndexMap, IndexSet};

/// How equal counts are ordered within a round.
///
/// The last candidate in a round's ordering is the one eliminated, so the policy
/// also decides elimination ties.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Ties rank in declaration order; the latest-declared tied candidate is eliminated
    DeclarationOrder,

    /// Ties rank in reverse declaration order; the earliest-declared tied candidate is eliminated
    ReverseDeclarationOrder,
}

impl Default for TieBreak {
    fn default() -> Self {
        TieBreak::DeclarationOrder
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CandidateCount {
    pub id: CandidateId,
    pub vote_count: u64,
}

/// Ballots moving away from an eliminated candidate
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub from: CandidateId,

    /// Next active preference, or `None` when the ballots exhaust
    pub to: Option<CandidateId>,

    pub count: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Round {
    pub round_number: u32,

    /// Active candidates, highest count first
    pub candidates: Vec<CandidateCount>,

    /// Ballots counting towards some candidate this round
    pub total_valid: u64,

    /// Ballots with no active preference left
    pub exhausted: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eliminated_id: Option<CandidateId>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transfers: Vec<Transfer>,
}

impl Round {
    pub fn leader(&self) -> Option<&CandidateCount> {
        self.candidates.first()
    }

    pub fn count(&self, candidate_id: &str) -> Option<u64> {
        self.candidates
            .iter()
            .find(|c| c.id == candidate_id)
            .map(|c| c.vote_count)
    }

    /// Percentage of this round's valid ballots held by a candidate. Display only.
    pub fn share(&self, candidate_id: &str) -> Option<f64> {
        let count = self.count(candidate_id)?;
        if self.total_valid == 0 {
            return Some(0.0);
        }
        Some(count as f64 * 100.0 / self.total_valid as f64)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IrvResult {
    pub winner_id: Option<CandidateId>,
    pub rounds: Vec<Round>,
}

/// Instant-runoff tally with the default tie-break
pub fn calculate_irv(ballots: &[Vec<CandidateId>], candidate_ids: &[CandidateId]) -> IrvResult {
    calculate_irv_with(ballots, candidate_ids, TieBreak::default())
}

/// Instant-runoff tally.
///
/// Each round counts every ballot for its highest-ranked active candidate. A candidate
/// holding more than half of the round's non-exhausted ballots wins; otherwise the last
/// candidate in the round's ordering is eliminated and counting repeats. When a single
/// candidate remains it wins without a further round. Ranked ids that are not in
/// `candidate_ids` are skipped, and duplicate candidate ids count once.
pub fn calculate_irv_with(
    ballots: &[Vec<CandidateId>],
    candidate_ids: &[CandidateId],
    tie_break: TieBreak,
) -> IrvResult {
    let declared: IndexSet<&str> = candidate_ids.iter().map(String::as_str).collect();
    let mut active: Vec<&str> = match tie_break {
        TieBreak::DeclarationOrder => declared.iter().copied().collect(),
        TieBreak::ReverseDeclarationOrder => declared.iter().rev().copied().collect(),
    };

    let mut rounds = Vec::new();
    let mut round_number = 1;

    while active.len() > 1 {
        let mut counts: IndexMap<&str, u64> = active.iter().map(|id| (*id, 0)).collect();
        let mut exhausted = 0;
        for ballot in ballots {
            match first_active(ballot, &active) {
                Some(id) => *counts.entry(id).or_insert(0) += 1,
                None => exhausted += 1,
            }
        }
        let total_valid: u64 = counts.values().sum();

        // Stable: equal counts keep the tie-break order of `active`
        let mut sorted: Vec<(&str, u64)> = counts.into_iter().collect();
        sorted.sort_by(|a, b| b.1.cmp(&a.1));

        let candidates = sorted
            .iter()
            .map(|(id, count)| CandidateCount {
                id: id.to_string(),
                vote_count: *count,
            })
            .collect();

        let (leader, leader_count) = sorted[0];
        if leader_count * 2 > total_valid {
            rounds.push(Round {
                round_number,
                candidates,
                total_valid,
                exhausted,
                eliminated_id: None,
                transfers: vec![],
            });
            return IrvResult {
                winner_id: Some(leader.to_string()),
                rounds,
            };
        }

        let (eliminated, _) = sorted[sorted.len() - 1];
        let remaining: Vec<&str> = active
            .iter()
            .copied()
            .filter(|id| *id != eliminated)
            .collect();
        let transfers = transfers(ballots, &active, &remaining, eliminated);

        rounds.push(Round {
            round_number,
            candidates,
            total_valid,
            exhausted,
            eliminated_id: Some(eliminated.to_string()),
            transfers,
        });

        active = remaining;
        round_number += 1;
    }

    IrvResult {
        winner_id: active.first().map(|id| id.to_string()),
        rounds,
    }
}

fn first_active<'a>(ballot: &'a [CandidateId], active: &[&str]) -> Option<&'a str> {
    ballot
        .iter()
        .map(String::as_str)
        .find(|id| active.contains(id))
}

/// Where the eliminated candidate's ballots go, in `remaining` order with exhausted ballots last
fn transfers(
    ballots: &[Vec<CandidateId>],
    active: &[&str],
    remaining: &[&str],
    eliminated: &str,
) -> Vec<Transfer> {
    let mut moved: IndexMap<Option<&str>, u64> = remaining.iter().map(|id| (Some(*id), 0)).collect();
    moved.insert(None, 0);

    for ballot in ballots {
        if first_active(ballot, active) == Some(eliminated) {
            *moved.entry(first_active(ballot, remaining)).or_insert(0) += 1;
        }
    }

    moved
        .into_iter()
        .filter(|(_, count)| *count > 0)
        .map(|(to, count)| Transfer {
            from: eliminated.to_string(),
            to: to.map(str::to_string),
            count,
        })
        .collect()
}

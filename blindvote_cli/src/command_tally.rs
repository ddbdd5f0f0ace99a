use super::{expand, fail, print_json};
use blindvote::{calculate_irv, Ballot, CandidateId};

pub fn command_tally(matches: &clap::ArgMatches) {
    let command = "blindvote tally";
    let filename = expand(matches.value_of("BALLOTS").unwrap_or_default());

    let json = std::fs::read_to_string(&filename)
        .unwrap_or_else(|e| fail(command, format!("unable to read {}: {}", filename, e)));

    // Either exported ballots or bare rankings
    let rankings: Vec<Vec<CandidateId>> = match serde_json::from_str::<Vec<Ballot>>(&json) {
        Ok(ballots) => ballots
            .into_iter()
            .map(|ballot| ballot.ranked_candidate_ids)
            .collect(),
        Err(_) => serde_json::from_str(&json)
            .unwrap_or_else(|e| fail(command, format!("invalid ballot file {}: {}", filename, e))),
    };

    let candidates: Vec<CandidateId> = matches
        .value_of("candidates")
        .unwrap_or_default()
        .split(',')
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect();

    print_json(command, &calculate_irv(&rankings, &candidates));
}

use crate::*;
use indexmap::IndexMap;
use log::{error, warn};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// Per-party count, authoritative from the ledger.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PartyCount {
    pub party: Party,
    pub vote_count: u64,
}

/// Internal stats surface: ledger counts, no gating.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct StatsResponse {
    pub total_votes: u64,
    pub results: Vec<PartyCount>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PartyResult {
    pub party: Party,
    pub vote_count: u64,
    pub percentage: Decimal,
}

/// Election outcome. Equal maxima are reported as an explicit tie set,
/// never broken arbitrarily.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Winner(PartyResult),
    Tie(Vec<PartyResult>),
    NoVotes,
}

/// Published results, gated on close time and the operator's publish flag.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ResultsResponse {
    pub election: Election,
    pub total_votes: u64,
    pub winner: Outcome,
    pub results: Vec<PartyResult>,
}

/// One reconciliation pass over both stores, fixed at a snapshot boundary.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ReconciliationReport {
    pub election_id: Uuid,

    /// Ledger sequence boundary the pass was computed against.
    pub as_of_sequence: u64,

    pub ledger_votes: u64,
    pub accepted: u64,
    pub confirmed: u64,
    pub counts: IndexMap<String, u64>,

    /// Accepted entries exist that the ledger has not confirmed yet.
    pub pending_relay: bool,

    /// Hard alarm: the ledger holds more votes for this election than the
    /// ballot box ever accepted. Surfaced to the operator, never
    /// auto-corrected.
    pub ledger_overrun: bool,
}

/// Cross-checks ballot box and ledger state, computes per-party counts, and
/// gates result publication.
pub struct Reconciler<L: Ledger> {
    ballot_box: BallotBox,
    ledger: Arc<L>,
}

impl<L: Ledger> Reconciler<L> {
    pub fn new(ballot_box: BallotBox, ledger: Arc<L>) -> Self {
        Reconciler { ballot_box, ledger }
    }

    /// Per-party counts strictly from ledger data, up to (not including) the
    /// given sequence boundary. Returns the counts and the ledger total for
    /// the election.
    fn ledger_counts(&self, election: &Election, as_of: u64) -> (IndexMap<Uuid, u64>, u64) {
        let mut counts: IndexMap<Uuid, u64> = IndexMap::new();
        for party in &election.parties {
            counts.insert(party.id, 0);
        }
        let mut total = 0;
        for index in 0..as_of {
            let vote = match self.ledger.get_vote(index) {
                Some(vote) => vote,
                None => break,
            };
            if vote.election_id != election.id {
                continue;
            }
            total += 1;
            match counts.get_mut(&vote.party_id) {
                Some(count) => *count += 1,
                None => warn!(
                    "tally: ledger vote at sequence {} names unknown party {}",
                    vote.sequence, vote.party_id
                ),
            }
        }
        (counts, total)
    }

    /// Internal stats: authoritative counts from the ledger.
    pub fn stats(&self, election_id: &Uuid) -> Result<StatsResponse> {
        let election = self.ballot_box.get_election(election_id)?;
        let as_of = self.ledger.vote_count();
        let (counts, total) = self.ledger_counts(&election, as_of);

        let results = election
            .parties
            .iter()
            .map(|party| PartyCount {
                party: party.clone(),
                vote_count: *counts.get(&party.id).unwrap_or(&0),
            })
            .collect();
        Ok(StatsResponse {
            total_votes: total,
            results,
        })
    }

    /// Cross-check both stores as of a single snapshot boundary, so a vote
    /// cannot be double-counted or missed across two passes running next to
    /// live submissions.
    pub fn reconcile(&self, election_id: &Uuid) -> Result<ReconciliationReport> {
        let election = self.ballot_box.get_election(election_id)?;
        let as_of = self.ledger.vote_count();

        let (counts, ledger_votes) = self.ledger_counts(&election, as_of);
        let accepted = self.ballot_box.accepted_count(election_id)?;
        let confirmed = self.ballot_box.confirmed_count(election_id)?;

        let pending_relay = confirmed < accepted;
        let ledger_overrun = ledger_votes > accepted;
        if ledger_overrun {
            error!(
                "reconciliation: ledger holds {} votes for election {} but only {} were accepted",
                ledger_votes, election_id, accepted
            );
        }

        let counts = election
            .parties
            .iter()
            .map(|party| {
                (
                    party.name.clone(),
                    *counts.get(&party.id).unwrap_or(&0),
                )
            })
            .collect();

        Ok(ReconciliationReport {
            election_id: *election_id,
            as_of_sequence: as_of,
            ledger_votes,
            accepted,
            confirmed,
            counts,
            pending_relay,
            ledger_overrun,
        })
    }

    /// Public results, available only once the election has closed AND the
    /// operator has explicitly published. Refuses to publish over an
    /// unresolved ledger overrun.
    pub fn public_results(&self, election_id: &Uuid) -> Result<ResultsResponse> {
        self.public_results_at(election_id, unix_now())
    }

    pub fn public_results_at(&self, election_id: &Uuid, now: i64) -> Result<ResultsResponse> {
        let election = self.ballot_box.get_election(election_id)?;
        if !election.is_closed(now) {
            return Err(Error::ElectionStillOpen);
        }
        if !election.published {
            return Err(Error::NotPublished);
        }

        let report = self.reconcile(election_id)?;
        if report.ledger_overrun {
            return Err(Error::Discrepancy(format!(
                "ledger overrun in election {}: {} ledger votes vs {} accepted",
                election_id, report.ledger_votes, report.accepted
            )));
        }

        let as_of = report.as_of_sequence;
        let (counts, total) = self.ledger_counts(&election, as_of);

        let mut results: Vec<PartyResult> = election
            .parties
            .iter()
            .map(|party| {
                let vote_count = *counts.get(&party.id).unwrap_or(&0);
                PartyResult {
                    party: party.clone(),
                    vote_count,
                    percentage: percentage(vote_count, total),
                }
            })
            .collect();
        // Descending by count; name breaks display order only, never the winner
        results.sort_by(|a, b| {
            b.vote_count
                .cmp(&a.vote_count)
                .then_with(|| a.party.name.cmp(&b.party.name))
        });

        let winner = outcome(&results);

        Ok(ResultsResponse {
            election,
            total_votes: total,
            winner,
            results,
        })
    }
}

fn percentage(vote_count: u64, total: u64) -> Decimal {
    if total == 0 {
        return Decimal::from(0);
    }
    (Decimal::from(vote_count) * Decimal::from(100) / Decimal::from(total)).round_dp(2)
}

fn outcome(results: &[PartyResult]) -> Outcome {
    let top = match results.first() {
        Some(top) if top.vote_count > 0 => top,
        _ => return Outcome::NoVotes,
    };
    let tied: Vec<PartyResult> = results
        .iter()
        .filter(|r| r.vote_count == top.vote_count)
        .cloned()
        .collect();
    if tied.len() > 1 {
        Outcome::Tie(tied)
    } else {
        Outcome::Winner(top.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn percentage_is_fixed_precision() {
        assert_eq!(percentage(3, 5), Decimal::from_str("60.00").unwrap());
        assert_eq!(percentage(2, 5), Decimal::from_str("40.00").unwrap());
        assert_eq!(percentage(1, 3), Decimal::from_str("33.33").unwrap());
        assert_eq!(percentage(0, 0), Decimal::from(0));
    }

    #[test]
    fn ties_are_explicit() {
        let a = PartyResult {
            party: Party::new("A"),
            vote_count: 2,
            percentage: percentage(2, 4),
        };
        let b = PartyResult {
            party: Party::new("B"),
            vote_count: 2,
            percentage: percentage(2, 4),
        };
        match outcome(&[a, b]) {
            Outcome::Tie(tied) => assert_eq!(tied.len(), 2),
            other => panic!("expected tie, got {:?}", other),
        }
    }

    #[test]
    fn no_votes_is_not_a_winner() {
        let a = PartyResult {
            party: Party::new("A"),
            vote_count: 0,
            percentage: Decimal::from(0),
        };
        assert!(matches!(outcome(&[a]), Outcome::NoVotes));
    }
}

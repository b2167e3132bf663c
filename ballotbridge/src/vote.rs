use crate::*;
use rand::Rng;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// The message a voter has blind-signed: the choice, bound to exactly one
/// election by the embedded id, with a fresh nonce so two voters picking the
/// same party never produce the same commitment.
///
/// The commitment is only ever shown to the authority in blinded form; the
/// plain form surfaces again at submission time, where it can no longer be
/// linked to the issuance.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct VoteCommitment {
    pub election_id: Uuid,
    pub party_id: Uuid,

    #[serde(with = "hex")]
    pub nonce: [u8; 16],
}

impl VoteCommitment {
    pub fn new(election_id: Uuid, party_id: Uuid) -> Self {
        let mut csprng = rand::rngs::OsRng {};
        VoteCommitment {
            election_id,
            party_id,
            nonce: csprng.gen(),
        }
    }

    /// Canonical byte form, the exact message that gets signed.
    pub fn as_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("ballotbridge: unexpected error packing commitment")
    }
}

/// A vote accepted into the ballot box, staged for relay to the ledger.
///
/// Inserted in the same transaction as the voter's `voted` flag; the vote
/// fields are never updated afterwards. Only the relay confirmation
/// (`receipt_code`) is attached once the ledger acknowledges the entry.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct BallotEntry {
    pub election_id: Uuid,
    pub hashed_voter_id: String,
    pub party_id: Uuid,

    #[serde(with = "hex")]
    pub nonce: [u8; 16],

    pub signature: UnblindedSignature,
    pub created_at: i64,
    pub receipt_code: Option<String>,
}

impl BallotEntry {
    /// Deterministic over (party, election, nonce) so ledger retries reuse
    /// the same hash and the ledger's duplicate check makes them idempotent.
    pub fn vote_hash(&self) -> Hash {
        vote_hash(&self.party_id, &self.election_id, &self.nonce)
    }
}

pub fn vote_hash(party_id: &Uuid, election_id: &Uuid, nonce: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(party_id.as_bytes());
    hasher.update(election_id.as_bytes());
    hasher.update(nonce);
    hasher.finalize().into()
}

/// Hash an opaque voter identity for use in the ballot box. The ballot box
/// never sees the raw identity next to a choice.
pub fn hash_voter_id(voter_id: &str) -> String {
    hex::encode(Sha256::digest(voter_id.as_bytes()))
}

/// A vote submission as it arrives from a voter.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SubmitRequest {
    pub election_id: Uuid,
    pub party_id: Uuid,
    pub hashed_voter_id: String,
    pub commitment: VoteCommitment,
    pub signature: UnblindedSignature,
}

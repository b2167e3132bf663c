use crate::*;
use indexmap::IndexMap;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;

/// A vote as committed to the public ledger. Carries no voter identity and
/// no recoverable choice linkage, only hashes and signatures.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct LedgerVote {
    #[serde(with = "hex")]
    pub vote_hash: Hash,
    pub election_id: Uuid,
    pub party_id: Uuid,

    #[serde(with = "hex")]
    pub blind_signature: Vec<u8>,

    pub timestamp: i64,

    /// Assigned by the ledger, strictly increasing per writer.
    pub sequence: u64,
}

/// A voter registration row on the ledger. The address is pseudonymous; the
/// name and email arrive already encrypted by the caller.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct LedgerVoter {
    pub address: String,
    pub hashed_identity: String,
    pub encrypted_name: String,
    pub encrypted_email: String,
    pub registered_at: i64,
}

/// Proof of having voted, independent of the choice. The code is the ledger
/// transaction identifier of the committed vote.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Receipt {
    pub receipt_code: String,
    pub election_id: Uuid,
    pub created_at: i64,
}

/// Ledger-side failure classes, as the relay needs to distinguish them.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Network trouble or timeout; safe to retry with the same vote hash.
    #[error("ledger: transient failure: {0}")]
    Transient(String),

    /// The vote hash is already committed; carries the original transaction
    /// id. Benign by contract, never an error for the relay.
    #[error("ledger: vote hash already recorded in transaction {0}")]
    Duplicate(String),

    /// Contract-level rejection. Fatal to the caller.
    #[error("ledger: rejected: {0}")]
    Rejected(String),
}

/// The immutable vote ledger, consumed via this narrow interface.
///
/// Guarantees relied upon: append-only ordering per writer, rejection of a
/// previously seen vote hash, and public readability of committed votes.
/// Only the admin identity may mutate; the relay is configured with it.
pub trait Ledger: Send + Sync {
    fn cast_vote(
        &self,
        writer: &str,
        vote_hash: Hash,
        election_id: Uuid,
        party_id: Uuid,
        blind_signature: &[u8],
    ) -> Result<String, LedgerError>;

    fn get_vote(&self, index: u64) -> Option<LedgerVote>;

    fn vote_count(&self) -> u64;

    fn register_voter(
        &self,
        writer: &str,
        address: &str,
        hashed_identity: &str,
        encrypted_name: &str,
        encrypted_email: &str,
    ) -> Result<(), LedgerError>;

    fn get_voter(&self, address: &str) -> Option<LedgerVoter>;

    fn get_all_voter_addresses(&self) -> Vec<String>;

    fn voter_count(&self) -> u64;

    fn admin(&self) -> String;
}

/// A simple in-memory ledger for tests and local runs.
pub struct MemLedger {
    admin: String,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    votes: Vec<LedgerVote>,
    seen: HashMap<Hash, String>,
    voters: IndexMap<String, LedgerVoter>,
}

impl MemLedger {
    pub fn new(admin: &str) -> Self {
        MemLedger {
            admin: admin.to_owned(),
            inner: Mutex::new(Inner::default()),
        }
    }

    fn check_writer(&self, writer: &str) -> Result<(), LedgerError> {
        if writer != self.admin {
            return Err(LedgerError::Rejected(format!(
                "writer {} is not the admin",
                writer
            )));
        }
        Ok(())
    }
}

impl Ledger for MemLedger {
    fn cast_vote(
        &self,
        writer: &str,
        vote_hash: Hash,
        election_id: Uuid,
        party_id: Uuid,
        blind_signature: &[u8],
    ) -> Result<String, LedgerError> {
        self.check_writer(writer)?;
        let mut inner = self.inner.lock().unwrap();
        if let Some(existing) = inner.seen.get(&vote_hash) {
            return Err(LedgerError::Duplicate(existing.clone()));
        }
        let sequence = inner.votes.len() as u64;
        let tx_id = transaction_id(&vote_hash, sequence);
        inner.votes.push(LedgerVote {
            vote_hash,
            election_id,
            party_id,
            blind_signature: blind_signature.to_vec(),
            timestamp: unix_now(),
            sequence,
        });
        inner.seen.insert(vote_hash, tx_id.clone());
        Ok(tx_id)
    }

    fn get_vote(&self, index: u64) -> Option<LedgerVote> {
        self.inner.lock().unwrap().votes.get(index as usize).cloned()
    }

    fn vote_count(&self) -> u64 {
        self.inner.lock().unwrap().votes.len() as u64
    }

    fn register_voter(
        &self,
        writer: &str,
        address: &str,
        hashed_identity: &str,
        encrypted_name: &str,
        encrypted_email: &str,
    ) -> Result<(), LedgerError> {
        self.check_writer(writer)?;
        let mut inner = self.inner.lock().unwrap();
        // Re-registration of the same pseudonymous address is benign.
        if inner.voters.contains_key(address) {
            return Ok(());
        }
        inner.voters.insert(
            address.to_owned(),
            LedgerVoter {
                address: address.to_owned(),
                hashed_identity: hashed_identity.to_owned(),
                encrypted_name: encrypted_name.to_owned(),
                encrypted_email: encrypted_email.to_owned(),
                registered_at: unix_now(),
            },
        );
        Ok(())
    }

    fn get_voter(&self, address: &str) -> Option<LedgerVoter> {
        self.inner.lock().unwrap().voters.get(address).cloned()
    }

    fn get_all_voter_addresses(&self) -> Vec<String> {
        self.inner.lock().unwrap().voters.keys().cloned().collect()
    }

    fn voter_count(&self) -> u64 {
        self.inner.lock().unwrap().voters.len() as u64
    }

    fn admin(&self) -> String {
        self.admin.clone()
    }
}

fn transaction_id(vote_hash: &Hash, sequence: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(vote_hash);
    hasher.update(sequence.to_le_bytes());
    format!("0x{}", hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_hash_returns_original_transaction() {
        let ledger = MemLedger::new("ec");
        let hash = [7u8; 32];
        let election_id = Uuid::new_v4();
        let party_id = Uuid::new_v4();

        let tx1 = ledger
            .cast_vote("ec", hash, election_id, party_id, b"sig")
            .unwrap();
        let err = ledger
            .cast_vote("ec", hash, election_id, party_id, b"sig")
            .unwrap_err();
        match err {
            LedgerError::Duplicate(tx2) => assert_eq!(tx1, tx2),
            other => panic!("expected duplicate, got {}", other),
        }
        assert_eq!(ledger.vote_count(), 1);
    }

    #[test]
    fn non_admin_writer_is_rejected() {
        let ledger = MemLedger::new("ec");
        let err = ledger
            .cast_vote("mallory", [1u8; 32], Uuid::new_v4(), Uuid::new_v4(), b"sig")
            .unwrap_err();
        assert!(matches!(err, LedgerError::Rejected(_)));
    }
}

use crate::*;
use std::sync::Arc;
use uuid::Uuid;

/// A successful vote submission: the anonymous proof of having voted.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct VoteResponse {
    pub receipt: Receipt,
}

/// The typed operation surface of the system. Web routing, auth middleware
/// and presentation live outside this crate and call into these methods.
pub struct App<L: Ledger> {
    pub ballot_box: BallotBox,
    pub authority: Authority,
    pub relay: Relay,
    pub reconciler: Reconciler<L>,
    pub ledger: Arc<L>,
    operator: String,
}

impl<L: Ledger + 'static> App<L> {
    pub fn new(config: &Config, ledger: Arc<L>) -> Result<Self> {
        let ballot_box = if config.db_path == ":memory:" {
            BallotBox::open_in_memory()?
        } else {
            BallotBox::open(&config.db_path)?
        };
        let authority = Authority::new(config.authority_key_bits)?;
        let relay = Relay::start(
            ballot_box.clone(),
            ledger.clone(),
            config.relay_identity.clone(),
            config.relay.clone(),
        );
        let reconciler = Reconciler::new(ballot_box.clone(), ledger.clone());

        Ok(App {
            ballot_box,
            authority,
            relay,
            reconciler,
            ledger,
            operator: config.operator.clone(),
        })
    }

    fn ensure_operator(&self, operator: &str) -> Result<()> {
        if operator != self.operator {
            return Err(Error::NotAuthorized);
        }
        Ok(())
    }

    // ----- operator surface -----

    pub fn create_election(
        &self,
        name: &str,
        starts_at: i64,
        ends_at: i64,
        party_names: &[&str],
        operator: &str,
    ) -> Result<Election> {
        self.ensure_operator(operator)?;
        let parties = party_names.iter().map(|n| Party::new(n)).collect();
        let election = Election::new(name, starts_at, ends_at, parties);
        self.ballot_box.insert_election(&election)?;
        Ok(election)
    }

    /// Add a party to an election that has not opened yet.
    pub fn add_party(&self, election_id: &Uuid, name: &str, operator: &str) -> Result<Party> {
        self.ensure_operator(operator)?;
        self.ballot_box.add_party(election_id, name)
    }

    /// Set or clear the publish flag. Gating on the close time happens at
    /// read time; the flag itself is purely an operator decision.
    pub fn publish_results(
        &self,
        election_id: &Uuid,
        publish: bool,
        operator: &str,
    ) -> Result<()> {
        self.ensure_operator(operator)?;
        self.ballot_box.set_published(election_id, publish)
    }

    // ----- voter surface -----

    /// Enroll a voter: roll membership plus a pseudonymous ledger
    /// registration. Name and email must arrive already encrypted; nothing
    /// recoverable goes to the ledger from here. The ledger write goes
    /// through the relay queue like every other mutation.
    pub fn register_voter(
        &self,
        voter_id: &str,
        encrypted_name: &str,
        encrypted_email: &str,
    ) -> Result<String> {
        let hashed = self.ballot_box.register_voter(voter_id)?;
        let address = pseudonymous_address(&hashed);
        self.relay
            .register_voter(&address, &hashed, encrypted_name, encrypted_email)?
            .wait()?;
        Ok(hashed)
    }

    /// Issue a blind signature over an opaque commitment.
    pub fn request_signature(
        &self,
        voter_id: &str,
        election_id: &Uuid,
        blinded: &BlindedCommitment,
    ) -> Result<BlindSignature> {
        let election = self.ballot_box.get_election(election_id)?;
        self.authority.issue(&self.ballot_box, voter_id, &election, blinded)
    }

    /// Accept a vote: validate and stage it, relay it to the ledger, and
    /// return the receipt once the ledger confirms.
    pub fn submit_vote(&self, request: &SubmitRequest) -> Result<VoteResponse> {
        let entry = self.ballot_box.submit(self.authority.public_key(), request)?;
        let receipt = self.relay.enqueue(entry)?.wait()?;
        Ok(VoteResponse { receipt })
    }

    // ----- read surface -----

    pub fn election_stats(&self, election_id: &Uuid) -> Result<StatsResponse> {
        self.reconciler.stats(election_id)
    }

    pub fn public_results(&self, election_id: &Uuid) -> Result<ResultsResponse> {
        self.reconciler.public_results(election_id)
    }

    pub fn reconcile(&self, election_id: &Uuid) -> Result<ReconciliationReport> {
        self.reconciler.reconcile(election_id)
    }
}

use crate::*;
use log::{error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, sync_channel, Receiver, Sender, SyncSender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use uuid::Uuid;

/// Retry policy for ledger calls.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
        }
    }
}

/// A voter registration bound for the ledger.
struct Registration {
    address: String,
    hashed_identity: String,
    encrypted_name: String,
    encrypted_email: String,
}

/// Everything that mutates the ledger is a task on the one queue.
enum RelayTask {
    CastVote(BallotEntry, SyncSender<Result<Receipt>>),
    RegisterVoter(Registration, SyncSender<Result<()>>),
}

struct RelayJob {
    task: RelayTask,
    cancelled: Arc<AtomicBool>,
}

/// Awaits the outcome of one enqueued job. The caller holds no ballot box
/// resources while waiting.
pub struct RelayHandle<T = Receipt> {
    cancelled: Arc<AtomicBool>,
    result: Receiver<Result<T>>,
}

impl<T> RelayHandle<T> {
    /// Block until the ledger confirms the job or permanently rejects it.
    pub fn wait(self) -> Result<T> {
        self.result.recv().map_err(|_| Error::RelayUnavailable)?
    }

    /// Withdraw the job if the worker has not picked it up yet. An
    /// in-flight ledger call cannot be cancelled, only awaited.
    pub fn withdraw(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

/// The single-writer proxy to the ledger.
///
/// One worker thread owns every ledger-mutating call (votes and voter
/// registrations alike), so exactly one call is in flight at any time and
/// the ledger's per-signer ordering holds. Callers enqueue jobs and are
/// notified asynchronously through their handle.
pub struct Relay {
    queue: Option<Sender<RelayJob>>,
    worker: Option<thread::JoinHandle<()>>,
    ballot_box: BallotBox,
}

impl Relay {
    pub fn start<L: Ledger + 'static>(
        ballot_box: BallotBox,
        ledger: Arc<L>,
        writer: String,
        config: RelayConfig,
    ) -> Self {
        let (queue, jobs) = channel::<RelayJob>();
        let worker_box = ballot_box.clone();
        let worker = thread::spawn(move || worker_loop(jobs, worker_box, ledger, writer, config));
        Relay {
            queue: Some(queue),
            worker: Some(worker),
            ballot_box,
        }
    }

    /// Queue an entry for the ledger.
    ///
    /// An entry that already carries a receipt resolves immediately without
    /// another ledger call (duplicate submissions converge on the one
    /// Receipt).
    pub fn enqueue(&self, entry: BallotEntry) -> Result<RelayHandle> {
        let (respond, result) = sync_channel(1);
        let cancelled = Arc::new(AtomicBool::new(false));

        if let Some(code) = &entry.receipt_code {
            let receipt = self
                .ballot_box
                .get_receipt(code)?
                .ok_or_else(|| Error::BadRecord(format!("missing receipt {}", code)))?;
            // Receiver is alive in the handle, send cannot fail here
            let _ = respond.send(Ok(receipt));
            return Ok(RelayHandle { cancelled, result });
        }

        self.send(RelayJob {
            task: RelayTask::CastVote(entry, respond),
            cancelled: cancelled.clone(),
        })?;
        Ok(RelayHandle { cancelled, result })
    }

    /// Queue a voter registration. Ledger-mutating, so it rides the same
    /// ordered queue as votes under the same writer identity.
    pub fn register_voter(
        &self,
        address: &str,
        hashed_identity: &str,
        encrypted_name: &str,
        encrypted_email: &str,
    ) -> Result<RelayHandle<()>> {
        let (respond, result) = sync_channel(1);
        let cancelled = Arc::new(AtomicBool::new(false));
        let registration = Registration {
            address: address.to_owned(),
            hashed_identity: hashed_identity.to_owned(),
            encrypted_name: encrypted_name.to_owned(),
            encrypted_email: encrypted_email.to_owned(),
        };
        self.send(RelayJob {
            task: RelayTask::RegisterVoter(registration, respond),
            cancelled: cancelled.clone(),
        })?;
        Ok(RelayHandle { cancelled, result })
    }

    /// Re-enqueue every staged entry without a receipt (outbox drain after a
    /// crash or a ledger outage).
    pub fn flush_pending(&self, election_id: &Uuid) -> Result<Vec<RelayHandle>> {
        let pending = self.ballot_box.pending_entries(election_id)?;
        if !pending.is_empty() {
            info!(
                "relay: re-enqueueing {} pending entries for election {}",
                pending.len(),
                election_id
            );
        }
        pending.into_iter().map(|e| self.enqueue(e)).collect()
    }

    fn send(&self, job: RelayJob) -> Result<()> {
        let queue = self.queue.as_ref().ok_or(Error::RelayUnavailable)?;
        queue.send(job).map_err(|_| Error::RelayUnavailable)
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        // Closing the queue lets the worker drain and exit
        self.queue.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn worker_loop<L: Ledger>(
    jobs: Receiver<RelayJob>,
    ballot_box: BallotBox,
    ledger: Arc<L>,
    writer: String,
    config: RelayConfig,
) {
    for job in jobs.iter() {
        let withdrawn = job.cancelled.load(Ordering::SeqCst);
        match job.task {
            RelayTask::CastVote(entry, respond) => {
                let outcome = if withdrawn {
                    Err(Error::Withdrawn)
                } else {
                    relay_entry(&*ledger, &ballot_box, &writer, &entry, &config)
                };
                let _ = respond.send(outcome);
            }
            RelayTask::RegisterVoter(registration, respond) => {
                let outcome = if withdrawn {
                    Err(Error::Withdrawn)
                } else {
                    relay_registration(&*ledger, &writer, &registration, &config)
                };
                let _ = respond.send(outcome);
            }
        }
    }
}

/// Push one entry to the ledger, retrying transient failures with backoff.
///
/// The vote hash is deterministic over the entry, so every retry presents
/// the same hash and the ledger's duplicate check makes the operation
/// idempotent: a "duplicate" rejection means the first attempt landed, and
/// the original transaction id is recovered for the receipt.
fn relay_entry<L: Ledger + ?Sized>(
    ledger: &L,
    ballot_box: &BallotBox,
    writer: &str,
    entry: &BallotEntry,
    config: &RelayConfig,
) -> Result<Receipt> {
    let vote_hash = entry.vote_hash();
    let mut delay = config.base_delay;

    for attempt in 1..=config.max_attempts {
        match ledger.cast_vote(
            writer,
            vote_hash,
            entry.election_id,
            entry.party_id,
            entry.signature.as_bytes(),
        ) {
            Ok(tx_id) => {
                info!(
                    "relay: vote confirmed in election {} (tx {})",
                    entry.election_id, tx_id
                );
                return ballot_box.attach_receipt(entry, &tx_id);
            }
            Err(LedgerError::Duplicate(tx_id)) => {
                info!(
                    "relay: vote hash already on ledger, recovering receipt {}",
                    tx_id
                );
                return ballot_box.attach_receipt(entry, &tx_id);
            }
            Err(LedgerError::Transient(reason)) => {
                warn!(
                    "relay: transient ledger failure (attempt {}/{}): {}",
                    attempt, config.max_attempts, reason
                );
                if attempt < config.max_attempts {
                    thread::sleep(delay);
                    delay *= 2;
                }
            }
            Err(LedgerError::Rejected(reason)) => {
                error!("relay: ledger rejected vote: {}", reason);
                return Err(Error::LedgerRejected(reason));
            }
        }
    }

    // The entry stays staged with no receipt; a later flush_pending pass
    // picks it up again. Not a failure, the vote is not lost.
    warn!(
        "relay: retries exhausted for election {}, entry left pending",
        entry.election_id
    );
    Err(Error::PendingRelay)
}

/// Push one voter registration to the ledger, retrying transient failures.
/// Re-registering an existing address is benign on the ledger side, so
/// retries are idempotent.
fn relay_registration<L: Ledger + ?Sized>(
    ledger: &L,
    writer: &str,
    registration: &Registration,
    config: &RelayConfig,
) -> Result<()> {
    let mut delay = config.base_delay;
    let mut reason = String::new();

    for attempt in 1..=config.max_attempts {
        match ledger.register_voter(
            writer,
            &registration.address,
            &registration.hashed_identity,
            &registration.encrypted_name,
            &registration.encrypted_email,
        ) {
            Ok(()) => {
                info!("relay: voter registered at {}", registration.address);
                return Ok(());
            }
            Err(LedgerError::Transient(r)) => {
                warn!(
                    "relay: transient ledger failure registering voter (attempt {}/{}): {}",
                    attempt, config.max_attempts, r
                );
                reason = r;
                if attempt < config.max_attempts {
                    thread::sleep(delay);
                    delay *= 2;
                }
            }
            Err(e) => {
                error!("relay: ledger rejected voter registration: {}", e);
                return Err(Error::Ledger(e));
            }
        }
    }
    Err(Error::Ledger(LedgerError::Transient(reason)))
}

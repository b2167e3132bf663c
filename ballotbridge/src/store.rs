use crate::*;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::time::Duration;
use uuid::Uuid;

pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// The ballot box: the fast, centrally-controlled staging store.
///
/// Holds the voter roll, per-election issuance and voted flags, staged
/// ballot entries, and relay receipts. The accept-and-flag step in
/// [`BallotBox::submit`] is a single IMMEDIATE transaction guarded by a
/// uniqueness constraint, so two submissions for the same voter can never
/// both succeed and a crash can never leave a counted-but-unflagged (or
/// flagged-but-uncounted) state.
#[derive(Clone)]
pub struct BallotBox {
    pool: Pool<SqliteConnectionManager>,
}

pub fn create_tables(connection: &Connection) -> Result<()> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS voters(
        voter_id TEXT PRIMARY KEY NOT NULL,
        hashed_voter_id TEXT NOT NULL UNIQUE,
        created_at INTEGER NOT NULL)",
        [],
    )?;
    connection.execute(
        "CREATE TABLE IF NOT EXISTS elections(
        id TEXT PRIMARY KEY NOT NULL,
        value TEXT NOT NULL)",
        [],
    )?;
    connection.execute(
        "CREATE TABLE IF NOT EXISTS signature_requests(
        election_id TEXT NOT NULL,
        voter_id TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        UNIQUE(election_id, voter_id))",
        [],
    )?;
    connection.execute(
        "CREATE TABLE IF NOT EXISTS voted_flags(
        election_id TEXT NOT NULL,
        hashed_voter_id TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        UNIQUE(election_id, hashed_voter_id))",
        [],
    )?;
    connection.execute(
        "CREATE TABLE IF NOT EXISTS ballot_entries(
        election_id TEXT NOT NULL,
        hashed_voter_id TEXT NOT NULL,
        party_id TEXT NOT NULL,
        nonce TEXT NOT NULL,
        signature TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        receipt_code TEXT,
        UNIQUE(election_id, hashed_voter_id))",
        [],
    )?;
    connection.execute(
        "CREATE TABLE IF NOT EXISTS receipts(
        receipt_code TEXT PRIMARY KEY NOT NULL,
        election_id TEXT NOT NULL,
        created_at INTEGER NOT NULL)",
        [],
    )?;
    Ok(())
}

impl BallotBox {
    pub fn open(path: &str) -> Result<Self> {
        // Concurrent writers queue on the sqlite lock instead of failing
        // fast with SQLITE_BUSY
        let manager = SqliteConnectionManager::file(path)
            .with_init(|c| c.busy_timeout(Duration::from_secs(5)));
        let pool = Pool::new(manager)?;
        let ballot_box = BallotBox { pool };
        create_tables(&*ballot_box.conn()?)?;
        Ok(ballot_box)
    }

    /// In-memory ballot box for tests and local runs. A single pooled
    /// connection, since every `:memory:` connection is its own database.
    pub fn open_in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager)?;
        let ballot_box = BallotBox { pool };
        create_tables(&*ballot_box.conn()?)?;
        Ok(ballot_box)
    }

    fn conn(&self) -> Result<PooledConnection> {
        Ok(self.pool.get()?)
    }

    // ----- voter roll -----

    /// Add a voter to the roll. Idempotent; returns the hashed identity used
    /// everywhere downstream.
    pub fn register_voter(&self, voter_id: &str) -> Result<String> {
        let hashed = hash_voter_id(voter_id);
        self.conn()?.execute(
            "INSERT OR IGNORE INTO voters(voter_id, hashed_voter_id, created_at) VALUES (?1, ?2, ?3)",
            params![voter_id, hashed, unix_now()],
        )?;
        Ok(hashed)
    }

    pub fn is_registered(&self, voter_id: &str) -> Result<bool> {
        let count: u32 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM voters WHERE voter_id = ?1",
            params![voter_id],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }

    /// Record the one-time blind-signature issuance for (voter, election).
    /// A second request trips the uniqueness constraint.
    pub fn record_signature_request(&self, voter_id: &str, election_id: &Uuid) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO signature_requests(election_id, voter_id, created_at) VALUES (?1, ?2, ?3)",
                params![election_id.to_string(), voter_id, unix_now()],
            )
            .map_err(|e| constraint(e, Error::AlreadyIssued))?;
        Ok(())
    }

    // ----- elections -----

    pub fn insert_election(&self, election: &Election) -> Result<()> {
        let value = serde_json::to_string(election)?;
        self.conn()?.execute(
            "INSERT INTO elections(id, value) VALUES (?1, ?2)",
            params![election.id.to_string(), value],
        )?;
        Ok(())
    }

    pub fn get_election(&self, election_id: &Uuid) -> Result<Election> {
        let value: Option<String> = self
            .conn()?
            .query_row(
                "SELECT value FROM elections WHERE id = ?1",
                params![election_id.to_string()],
                |r| r.get(0),
            )
            .optional()?;
        match value {
            Some(value) => Ok(serde_json::from_str(&value)?),
            None => Err(Error::UnknownElection),
        }
    }

    /// Add a party to an election that has not opened yet. The party set is
    /// fixed once voting starts.
    pub fn add_party(&self, election_id: &Uuid, name: &str) -> Result<Party> {
        let mut election = self.get_election(election_id)?;
        if unix_now() >= election.starts_at {
            return Err(Error::ElectionStarted);
        }
        let party = Party::new(name);
        election.parties.push(party.clone());
        let value = serde_json::to_string(&election)?;
        self.conn()?.execute(
            "UPDATE elections SET value = ?1 WHERE id = ?2",
            params![value, election_id.to_string()],
        )?;
        Ok(party)
    }

    pub fn set_published(&self, election_id: &Uuid, published: bool) -> Result<()> {
        let mut election = self.get_election(election_id)?;
        election.published = published;
        let value = serde_json::to_string(&election)?;
        self.conn()?.execute(
            "UPDATE elections SET value = ?1 WHERE id = ?2",
            params![value, election_id.to_string()],
        )?;
        Ok(())
    }

    // ----- submission -----

    /// Validate a submission and stage it, atomically flagging the voter.
    ///
    /// Replaying an identical submission converges on the already-staged
    /// entry (and so on the one Receipt); any other submission for an
    /// already-voted voter is rejected before a ledger call can happen.
    pub fn submit(
        &self,
        authority_key: &rsa::RSAPublicKey,
        request: &SubmitRequest,
    ) -> Result<BallotEntry> {
        let election = self.get_election(&request.election_id)?;
        election.check_open(unix_now())?;

        // The signed commitment binds the signature to one election; a
        // signature issued for another election cannot be replayed here.
        if request.commitment.election_id != request.election_id {
            return Err(Error::ElectionMismatch);
        }
        if request.commitment.party_id != request.party_id {
            return Err(Error::InvalidSignature);
        }
        if election.get_party(&request.party_id).is_none() {
            return Err(Error::UnknownParty);
        }
        Authority::verify(authority_key, &request.commitment, &request.signature)?;

        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if let Some(existing) = query_entry(&tx, &request.election_id, &request.hashed_voter_id)? {
            return if existing.signature == request.signature {
                Ok(existing)
            } else {
                Err(Error::AlreadyVoted)
            };
        }

        let created_at = unix_now();
        tx.execute(
            "INSERT INTO voted_flags(election_id, hashed_voter_id, created_at) VALUES (?1, ?2, ?3)",
            params![
                request.election_id.to_string(),
                request.hashed_voter_id,
                created_at
            ],
        )
        .map_err(|e| constraint(e, Error::AlreadyVoted))?;
        tx.execute(
            "INSERT INTO ballot_entries(election_id, hashed_voter_id, party_id, nonce, signature, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                request.election_id.to_string(),
                request.hashed_voter_id,
                request.party_id.to_string(),
                hex::encode(request.commitment.nonce),
                request.signature.to_hex(),
                created_at
            ],
        )
        .map_err(|e| constraint(e, Error::AlreadyVoted))?;
        tx.commit()?;

        Ok(BallotEntry {
            election_id: request.election_id,
            hashed_voter_id: request.hashed_voter_id.clone(),
            party_id: request.party_id,
            nonce: request.commitment.nonce,
            signature: request.signature.clone(),
            created_at,
            receipt_code: None,
        })
    }

    pub fn get_entry(
        &self,
        election_id: &Uuid,
        hashed_voter_id: &str,
    ) -> Result<Option<BallotEntry>> {
        query_entry(&*self.conn()?, election_id, hashed_voter_id)
    }

    /// Staged entries not yet confirmed by the ledger (the outbox).
    pub fn pending_entries(&self, election_id: &Uuid) -> Result<Vec<BallotEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT election_id, hashed_voter_id, party_id, nonce, signature, created_at, receipt_code
            FROM ballot_entries WHERE election_id = ?1 AND receipt_code IS NULL
            ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map(params![election_id.to_string()], row_to_raw)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(raw_to_entry(row?)?);
        }
        Ok(entries)
    }

    // ----- receipts -----

    /// Persist the ledger confirmation for an entry. Idempotent: a recovered
    /// duplicate confirmation converges on the existing receipt row.
    pub fn attach_receipt(&self, entry: &BallotEntry, receipt_code: &str) -> Result<Receipt> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO receipts(receipt_code, election_id, created_at) VALUES (?1, ?2, ?3)",
            params![receipt_code, entry.election_id.to_string(), unix_now()],
        )?;
        conn.execute(
            "UPDATE ballot_entries SET receipt_code = ?1
            WHERE election_id = ?2 AND hashed_voter_id = ?3 AND receipt_code IS NULL",
            params![
                receipt_code,
                entry.election_id.to_string(),
                entry.hashed_voter_id
            ],
        )?;
        drop(conn);
        self.get_receipt(receipt_code)?
            .ok_or_else(|| Error::BadRecord(format!("missing receipt {}", receipt_code)))
    }

    pub fn get_receipt(&self, receipt_code: &str) -> Result<Option<Receipt>> {
        let row: Option<(String, String, i64)> = self
            .conn()?
            .query_row(
                "SELECT receipt_code, election_id, created_at FROM receipts WHERE receipt_code = ?1",
                params![receipt_code],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?;
        match row {
            Some((receipt_code, election_id, created_at)) => Ok(Some(Receipt {
                receipt_code,
                election_id: parse_uuid(&election_id)?,
                created_at,
            })),
            None => Ok(None),
        }
    }

    // ----- reconciliation reads -----

    /// Entries accepted into the ballot box for an election.
    pub fn accepted_count(&self, election_id: &Uuid) -> Result<u64> {
        self.count(
            "SELECT COUNT(*) FROM ballot_entries WHERE election_id = ?1",
            election_id,
        )
    }

    /// Accepted entries with a confirmed ledger receipt.
    pub fn confirmed_count(&self, election_id: &Uuid) -> Result<u64> {
        self.count(
            "SELECT COUNT(*) FROM ballot_entries WHERE election_id = ?1 AND receipt_code IS NOT NULL",
            election_id,
        )
    }

    /// Voters flagged as having voted in an election.
    pub fn voted_count(&self, election_id: &Uuid) -> Result<u64> {
        self.count(
            "SELECT COUNT(*) FROM voted_flags WHERE election_id = ?1",
            election_id,
        )
    }

    fn count(&self, sql: &str, election_id: &Uuid) -> Result<u64> {
        let count: i64 =
            self.conn()?
                .query_row(sql, params![election_id.to_string()], |r| r.get(0))?;
        Ok(count as u64)
    }
}

type RawEntry = (String, String, String, String, String, i64, Option<String>);

fn row_to_raw(row: &rusqlite::Row) -> rusqlite::Result<RawEntry> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn raw_to_entry(raw: RawEntry) -> Result<BallotEntry> {
    let (election_id, hashed_voter_id, party_id, nonce, signature, created_at, receipt_code) = raw;
    let nonce_bytes =
        hex::decode(&nonce).map_err(|_| Error::BadRecord("ballot entry nonce".into()))?;
    let mut nonce = [0u8; 16];
    if nonce_bytes.len() != 16 {
        return Err(Error::BadRecord("ballot entry nonce length".into()));
    }
    nonce.copy_from_slice(&nonce_bytes);

    Ok(BallotEntry {
        election_id: parse_uuid(&election_id)?,
        hashed_voter_id,
        party_id: parse_uuid(&party_id)?,
        nonce,
        signature: UnblindedSignature::from_hex(&signature)?,
        created_at,
        receipt_code,
    })
}

fn query_entry(
    conn: &Connection,
    election_id: &Uuid,
    hashed_voter_id: &str,
) -> Result<Option<BallotEntry>> {
    let raw: Option<RawEntry> = conn
        .query_row(
            "SELECT election_id, hashed_voter_id, party_id, nonce, signature, created_at, receipt_code
            FROM ballot_entries WHERE election_id = ?1 AND hashed_voter_id = ?2",
            params![election_id.to_string(), hashed_voter_id],
            row_to_raw,
        )
        .optional()?;
    match raw {
        Some(raw) => Ok(Some(raw_to_entry(raw)?)),
        None => Ok(None),
    }
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|_| Error::BadRecord(format!("bad uuid {}", s)))
}

/// Map a uniqueness-constraint violation to the given domain error; pass any
/// other sqlite failure through.
fn constraint(e: rusqlite::Error, domain: Error) -> Error {
    match &e {
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            domain
        }
        _ => Error::Sqlite(e),
    }
}

use crate::*;
use uuid::Uuid;

/// A party that can receive votes. Static reference data for the lifetime of
/// an election.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Party {
    pub id: Uuid,
    pub name: String,
}

impl Party {
    pub fn new(name: &str) -> Self {
        Party {
            id: Uuid::new_v4(),
            name: name.to_owned(),
        }
    }
}

/// An election with an open/close window and a fixed set of parties.
///
/// Mutated only through the operator-gated api surface; once the window has
/// closed no new votes can enter, only the `published` flag may still change.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Election {
    pub id: Uuid,
    pub name: String,

    /// Open window, unix seconds. Votes are accepted in `[starts_at, ends_at)`.
    pub starts_at: i64,
    pub ends_at: i64,

    pub parties: Vec<Party>,

    /// Results are publicly visible only once the operator sets this.
    pub published: bool,
}

impl Election {
    pub fn new(name: &str, starts_at: i64, ends_at: i64, parties: Vec<Party>) -> Self {
        Election {
            id: Uuid::new_v4(),
            name: name.to_owned(),
            starts_at,
            ends_at,
            parties,
            published: false,
        }
    }

    pub fn is_open(&self, now: i64) -> bool {
        now >= self.starts_at && now < self.ends_at
    }

    pub fn is_closed(&self, now: i64) -> bool {
        now >= self.ends_at
    }

    /// Check that the election is accepting votes at `now`.
    pub fn check_open(&self, now: i64) -> Result<()> {
        if now < self.starts_at {
            return Err(Error::ElectionNotStarted);
        }
        if now >= self.ends_at {
            return Err(Error::ElectionClosed);
        }
        Ok(())
    }

    /// Get a party with the given ID
    pub fn get_party(&self, party_id: &Uuid) -> Option<&Party> {
        self.parties.iter().find(|p| p.id == *party_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn election_window() {
        let parties = vec![Party::new("A"), Party::new("B")];
        let election = Election::new("test", 100, 200, parties);

        assert!(matches!(
            election.check_open(99),
            Err(Error::ElectionNotStarted)
        ));
        assert!(election.check_open(100).is_ok());
        assert!(election.check_open(199).is_ok());
        assert!(matches!(election.check_open(200), Err(Error::ElectionClosed)));

        assert!(!election.is_closed(199));
        assert!(election.is_closed(200));
    }

    #[test]
    fn party_lookup() {
        let a = Party::new("A");
        let election = Election::new("test", 0, 10, vec![a.clone()]);

        assert_eq!(election.get_party(&a.id), Some(&a));
        assert!(election.get_party(&Uuid::new_v4()).is_none());
    }
}

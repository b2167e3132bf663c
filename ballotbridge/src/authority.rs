use crate::*;
use rsa::{RSAPrivateKey, RSAPublicKey};
use rsa_fdh::blind;
use sha2::Sha256;

/// A commitment in blinded form. Opaque to the authority by construction:
/// signing it reveals nothing about the underlying choice.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct BlindedCommitment(#[serde(with = "hex")] pub Vec<u8>);

/// The authority's signature over a blinded commitment. Useless until the
/// voter unblinds it.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct BlindSignature(#[serde(with = "hex")] pub Vec<u8>);

/// The voter-held blinding factor. Never leaves the voter; without it the
/// blinded and unblinded forms cannot be connected.
pub struct Unblinder(Vec<u8>);

/// A signature valid over the plain commitment. Carries no link back to the
/// blinded form it was derived from, which is what makes the ballot
/// anonymous once issuance has happened.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct UnblindedSignature(#[serde(with = "hex")] pub Vec<u8>);

impl UnblindedSignature {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|_| Error::BadRecord("signature hex".into()))?;
        Ok(UnblindedSignature(bytes))
    }
}

/// The Blind Signature Authority.
///
/// Issues exactly one signature per eligible voter per election, over a
/// commitment it cannot read. The one-time "requested" flag is independent of
/// the later "voted" flag so an issued-but-never-cast signature still blocks
/// a second issuance.
pub struct Authority {
    secret_key: RSAPrivateKey,
    public_key: RSAPublicKey,
}

impl Authority {
    pub fn new(bits: usize) -> Result<Self> {
        let mut csprng = rand::rngs::OsRng {};
        let secret_key = RSAPrivateKey::new(&mut csprng, bits)?;
        let public_key = secret_key.to_public_key();
        Ok(Authority {
            secret_key,
            public_key,
        })
    }

    pub fn public_key(&self) -> &RSAPublicKey {
        &self.public_key
    }

    /// Issue a blind signature for an eligible, not-yet-served voter.
    ///
    /// The commitment stays blinded throughout; the authority records only
    /// that this voter has been served for this election.
    pub fn issue(
        &self,
        ballot_box: &BallotBox,
        voter_id: &str,
        election: &Election,
        blinded: &BlindedCommitment,
    ) -> Result<BlindSignature> {
        if !ballot_box.is_registered(voter_id)? {
            return Err(Error::NotEligible);
        }
        election.check_open(unix_now())?;

        // One-time flag, enforced by the store's uniqueness constraint.
        ballot_box.record_signature_request(voter_id, &election.id)?;

        let mut csprng = rand::rngs::OsRng {};
        let signature = blind::sign(&mut csprng, &self.secret_key, &blinded.0)
            .map_err(|_| Error::InvalidSignature)?;
        Ok(BlindSignature(signature))
    }

    /// Verify an unblinded signature against a plain commitment.
    pub fn verify(
        public_key: &RSAPublicKey,
        commitment: &VoteCommitment,
        signature: &UnblindedSignature,
    ) -> Result<()> {
        let digest = blind::hash_message::<Sha256, _>(public_key, &commitment.as_bytes())
            .map_err(|_| Error::InvalidSignature)?;
        blind::verify(public_key, &digest, &signature.0).map_err(|_| Error::InvalidSignature)
    }
}

/// Voter-side: blind a commitment before sending it to the authority.
pub fn blind_commitment(
    public_key: &RSAPublicKey,
    commitment: &VoteCommitment,
) -> Result<(BlindedCommitment, Unblinder)> {
    let mut csprng = rand::rngs::OsRng {};
    let digest = blind::hash_message::<Sha256, _>(public_key, &commitment.as_bytes())
        .map_err(|_| Error::InvalidSignature)?;
    let (blinded, unblinder) = blind::blind(&mut csprng, public_key, &digest);
    Ok((BlindedCommitment(blinded), Unblinder(unblinder)))
}

/// Voter-side: strip the blinding factor from the authority's signature.
pub fn unblind_signature(
    public_key: &RSAPublicKey,
    signature: &BlindSignature,
    unblinder: &Unblinder,
) -> UnblindedSignature {
    UnblindedSignature(blind::unblind(public_key, &signature.0, &unblinder.0))
}

/// Stable pseudonymous ledger identity for a voter: derived from the hashed
/// identity so repeated syncs register the same address, but unlinkable to
/// the real identity without the voter roll.
pub fn pseudonymous_address(hashed_identity: &str) -> String {
    use sha2::Digest;
    let digest = Sha256::digest(hashed_identity.as_bytes());
    format!("0x{}", &hex::encode(digest)[..40])
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn blind_sign_verify_roundtrip() {
        // Small key, test only
        let authority = Authority::new(512).unwrap();
        let commitment = VoteCommitment::new(Uuid::new_v4(), Uuid::new_v4());

        let (blinded, unblinder) = blind_commitment(authority.public_key(), &commitment).unwrap();

        let mut csprng = rand::rngs::OsRng {};
        let blind_sig = blind::sign(&mut csprng, &authority.secret_key, &blinded.0).unwrap();
        let signature =
            unblind_signature(authority.public_key(), &BlindSignature(blind_sig), &unblinder);

        Authority::verify(authority.public_key(), &commitment, &signature).unwrap();

        // Wrong commitment fails
        let other = VoteCommitment::new(Uuid::new_v4(), Uuid::new_v4());
        assert!(matches!(
            Authority::verify(authority.public_key(), &other, &signature),
            Err(Error::InvalidSignature)
        ));
    }

    #[test]
    fn pseudonymous_address_is_stable() {
        let a = pseudonymous_address("abc");
        let b = pseudonymous_address("abc");
        assert_eq!(a, b);
        assert!(a.starts_with("0x"));
        assert_eq!(a.len(), 42);
        assert_ne!(a, pseudonymous_address("abd"));
    }
}

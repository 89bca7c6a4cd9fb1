use beacon_chain::{MemberIndex, Signature};
use commonware_cryptography::sha256::Digest;

const COMMITMENT_PREFIX: &[u8] = b"commitment";

/// Message broadcast by members of a local run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    Commitment(Commitment),
    ResultSignature(ResultSignature),
}

impl Message {
    pub fn seed(&self) -> u64 {
        match self {
            Self::Commitment(commitment) => commitment.seed,
            Self::ResultSignature(signature) => signature.seed,
        }
    }

    pub fn member(&self) -> MemberIndex {
        match self {
            Self::Commitment(commitment) => commitment.member,
            Self::ResultSignature(signature) => signature.member,
        }
    }
}

/// Commitment of a member to its secret.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Commitment {
    pub seed: u64,
    pub member: MemberIndex,
    pub commitment: Digest,

    /// Signature over [Commitment::payload].
    pub signature: Signature,
}

impl Commitment {
    /// Bytes signed by the sender of a commitment.
    pub fn payload(seed: u64, member: MemberIndex, commitment: &Digest) -> Vec<u8> {
        let mut payload = Vec::with_capacity(COMMITMENT_PREFIX.len() + 8 + 4 + 32);
        payload.extend_from_slice(COMMITMENT_PREFIX);
        payload.extend_from_slice(&seed.to_be_bytes());
        payload.extend_from_slice(&member.to_be_bytes());
        payload.extend_from_slice(commitment.as_ref());
        payload
    }
}

/// Support of a member for a DKG result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResultSignature {
    pub seed: u64,
    pub member: MemberIndex,

    /// Digest of the supported [beacon_chain::DkgResult].
    pub digest: Digest,

    /// Signature over `digest`, as verified by the chain.
    pub signature: Signature,
}

//! Run one member of a distributed key generation.
//!
//! A [Dkg] implementation drives a single member of a group through the protocol, starting at a
//! block height agreed upon by all members, and yields an [Outcome]. The protocol itself is not
//! defined here: [local] provides a reference protocol for local fixtures.

use beacon_chain::{BlockCounter, DkgResults, MemberIndex, Signing};
use beacon_net::Channel;
use commonware_cryptography::sha256::Digest;
use commonware_runtime::{Clock, Metrics, Spawner};
use commonware_utils::hex;
use rand::{CryptoRng, Rng};
use std::future::Future;
use thiserror::Error;

pub mod local;

/// Errors that can occur when running a member.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("chain error: {0}")]
    Chain(#[from] beacon_chain::Error),
    #[error("network error: {0}")]
    Network(#[from] beacon_net::Error),
    #[error("member {0} was excluded from the group")]
    Excluded(MemberIndex),
    #[error("too few qualified members: {0} < {1}")]
    TooFewQualified(usize, usize),
    #[error("insufficient support for result: {0} < {1}")]
    InsufficientSupport(usize, usize),
    #[error("result publication failed: {0}")]
    Publication(beacon_chain::Error),
}

/// Parameters shared by all members of a single run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Round {
    /// Seed identifying the run.
    pub seed: u64,

    /// Position of the member in the group (starting at 0).
    pub index: usize,

    pub group_size: usize,
    pub threshold: usize,

    /// Height at which the first protocol message is sent.
    pub start_height: u64,
}

impl Round {
    /// Index of the member, as referenced by results and messages (starting at 1).
    pub fn member(&self) -> MemberIndex {
        self.index as MemberIndex + 1
    }
}

/// Member of a group able to produce threshold signatures.
#[derive(Clone, PartialEq, Eq)]
pub struct ThresholdSigner {
    member: MemberIndex,
    group_public_key: Vec<u8>,
    share: Digest,
}

impl ThresholdSigner {
    pub fn new(member: MemberIndex, group_public_key: Vec<u8>, share: Digest) -> Self {
        Self {
            member,
            group_public_key,
            share,
        }
    }

    pub fn member(&self) -> MemberIndex {
        self.member
    }

    pub fn group_public_key(&self) -> &[u8] {
        &self.group_public_key
    }

    pub fn share(&self) -> &Digest {
        &self.share
    }
}

impl std::fmt::Debug for ThresholdSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the share
        f.debug_struct("ThresholdSigner")
            .field("member", &self.member)
            .field("group_public_key", &hex(&self.group_public_key))
            .finish()
    }
}

/// Result of running a single member.
///
/// A member may produce a signer and still fail (for example, if the group key it derived could
/// not be published).
#[derive(Clone, Debug)]
pub struct Outcome {
    pub member: MemberIndex,
    pub signer: Option<ThresholdSigner>,
    pub error: Option<Error>,
}

impl Outcome {
    pub fn success(signer: ThresholdSigner) -> Self {
        Self {
            member: signer.member(),
            signer: Some(signer),
            error: None,
        }
    }

    pub fn failure(member: MemberIndex, error: Error) -> Self {
        Self {
            member,
            signer: None,
            error: Some(error),
        }
    }

    /// Return whether the member produced a signer without error.
    pub fn is_success(&self) -> bool {
        self.signer.is_some() && self.error.is_none()
    }
}

/// Distributed key generation protocol.
pub trait Dkg: Clone + Send + Sync + 'static {
    /// Message exchanged by members over the broadcast channel.
    type Message: Clone + Send + Sync + 'static;

    /// Run the member described by `round` to completion.
    ///
    /// Members broadcast on `channel` starting at `round.start_height` and publish the agreed
    /// upon result through `relay`. The returned future never fails: errors are reported in
    /// the [Outcome].
    fn execute<E, B, R, S, C>(
        &self,
        context: E,
        round: Round,
        block_counter: B,
        relay: R,
        signing: S,
        channel: C,
    ) -> impl Future<Output = Outcome> + Send
    where
        E: Spawner + Clock + Metrics + Rng + CryptoRng,
        B: BlockCounter,
        R: DkgResults,
        S: Signing,
        C: Channel<Message = Self::Message>;
}

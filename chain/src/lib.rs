//! Order group selection tickets and DKG results on a shared ledger.
//!
//! The relay never talks to a ledger directly. Instead, it consumes the facade defined here:
//!
//! - [BlockCounter]: observe block height and register one-shot waiters keyed to a height.
//! - [StakeMonitor]: read the stake committed by a staker.
//! - [GroupSelection]: submit tickets and read the finalized roster.
//! - [DkgResults]: publish DKG results and observe their publication.
//! - [Signing]: sign and verify with the operator key.
//!
//! Writes return a [Promise] that resolves once the ledger has accepted (or rejected) the
//! submission. Dropping a [Promise] does not withdraw the write.
//!
//! [local] provides an in-memory ledger for tests and simulations.
//!
//! # Status
//!
//! `beacon-chain` is **ALPHA** software and is not yet recommended for production use. Developers should
//! expect breaking changes and occasional instability.

use commonware_cryptography::{ed25519, hash, sha256::Digest, Hasher, Sha256};
use commonware_utils::hex;
use futures::channel::oneshot;
use num_bigint::BigUint;
use std::{
    collections::BTreeMap,
    fmt::{Debug, Display, Formatter},
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
use thiserror::Error;

pub mod local;

/// Key used by operators to sign on behalf of their stake.
pub type PublicKey = ed25519::PublicKey;

/// Signature produced by an operator key.
pub type Signature = ed25519::Signature;

/// Position of a member within a group (starting at 1).
pub type MemberIndex = u32;

/// Length of a [StakerId].
pub const STAKER_ID_LENGTH: usize = 20;

/// Errors that can occur when interacting with the ledger.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("block counter stopped")]
    BlockCounterStopped,
    #[error("unknown staker: {0}")]
    UnknownStaker(StakerId),
    #[error("invalid ticket proof")]
    InvalidTicket,
    #[error("duplicate ticket: staker={0} index={1}")]
    DuplicateTicket(StakerId, u32),
    #[error("not enough tickets to form a group: {0} < {1}")]
    NotEnoughTickets(usize, usize),
    #[error("invalid submitter: {0}")]
    InvalidSubmitter(MemberIndex),
    #[error("invalid signature from member {0}")]
    InvalidSignature(MemberIndex),
    #[error("insufficient signatures: {0} < {1}")]
    InsufficientSignatures(usize, usize),
    #[error("result already submitted for seed {0}")]
    ResultAlreadySubmitted(u64),
    #[error("request dropped")]
    Dropped,
}

/// Identity of a stake-bearing participant.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StakerId([u8; STAKER_ID_LENGTH]);

impl StakerId {
    pub const fn new(raw: [u8; STAKER_ID_LENGTH]) -> Self {
        Self(raw)
    }

    /// Derive the identity of the staker operated by `public_key`.
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        let digest = hash(public_key.as_ref());
        let digest = digest.as_ref();
        let mut raw = [0u8; STAKER_ID_LENGTH];
        raw.copy_from_slice(&digest[digest.len() - STAKER_ID_LENGTH..]);
        Self(raw)
    }

    /// Interpret the identity as a big-endian unsigned integer.
    pub fn to_value(&self) -> BigUint {
        BigUint::from_bytes_be(&self.0)
    }

    /// Recover an identity from its integer form.
    ///
    /// Returns `None` if `value` does not fit in [STAKER_ID_LENGTH] bytes.
    pub fn from_value(value: &BigUint) -> Option<Self> {
        let bytes = value.to_bytes_be();
        if bytes.len() > STAKER_ID_LENGTH {
            return None;
        }
        let mut raw = [0u8; STAKER_ID_LENGTH];
        raw[STAKER_ID_LENGTH - bytes.len()..].copy_from_slice(&bytes);
        Some(Self(raw))
    }
}

impl AsRef<[u8]> for StakerId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Display for StakerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex(&self.0))
    }
}

impl Debug for StakerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

/// Ticket in the form accepted by the ledger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ticket {
    /// Smaller values are more competitive.
    pub value: BigUint,
    pub proof: TicketProof,
}

/// Data required to reproduce a [Ticket] value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TicketProof {
    pub staker_value: BigUint,
    pub virtual_staker_index: u32,
}

/// Outcome of a DKG, as agreed upon by the members that signed it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DkgResult {
    /// Seed identifying the DKG run.
    pub seed: u64,
    pub group_public_key: Vec<u8>,
    pub disqualified: Vec<MemberIndex>,
    pub inactive: Vec<MemberIndex>,
}

impl DkgResult {
    /// Digest signed by members supporting this result.
    pub fn digest(&self) -> Digest {
        let mut hasher = Sha256::new();
        hasher.update(&self.seed.to_be_bytes());
        hasher.update(&(self.group_public_key.len() as u32).to_be_bytes());
        hasher.update(&self.group_public_key);
        for members in [&self.disqualified, &self.inactive] {
            hasher.update(&(members.len() as u32).to_be_bytes());
            for member in members {
                hasher.update(&member.to_be_bytes());
            }
        }
        hasher.finalize()
    }
}

/// Emitted when the ledger accepts a [DkgResult].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DkgResultSubmission {
    pub seed: u64,
    pub submitter: MemberIndex,
    pub group_public_key: Vec<u8>,
    pub block_number: u64,
}

/// Confirmation of a write submitted to the ledger.
#[must_use = "promises do nothing unless polled"]
pub struct Promise {
    receiver: oneshot::Receiver<Result<(), Error>>,
}

impl Promise {
    /// Create a pending [Promise] and the sender used to fulfill it.
    pub fn pending() -> (oneshot::Sender<Result<(), Error>>, Self) {
        let (sender, receiver) = oneshot::channel();
        (sender, Self { receiver })
    }

    /// Create a [Promise] that is already fulfilled.
    pub fn ready(result: Result<(), Error>) -> Self {
        let (sender, promise) = Self::pending();
        let _ = sender.send(result);
        promise
    }
}

impl Future for Promise {
    type Output = Result<(), Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::Dropped)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Handle to an event handler registered with the ledger.
pub struct Subscription {
    cancel: Box<dyn FnOnce() + Send>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Box::new(cancel),
        }
    }

    /// Stop delivering events to the handler.
    pub fn unsubscribe(self) {
        (self.cancel)()
    }
}

/// Observe the height of the ledger.
pub trait BlockCounter: Clone + Send + Sync + 'static {
    /// Return the current block height.
    fn current_block(&self) -> Result<u64, Error>;

    /// Register a one-shot waiter that fires once `height` is reached.
    ///
    /// The waiter resolves to the height observed when it fired. If `height` was already
    /// reached, the waiter resolves immediately.
    fn block_height_waiter(&self, height: u64) -> Result<oneshot::Receiver<u64>, Error>;

    /// Wait until `height` is reached.
    fn wait_for_block_height(&self, height: u64) -> impl Future<Output = Result<u64, Error>> + Send {
        let waiter = self.block_height_waiter(height);
        async move { waiter?.await.map_err(|_| Error::BlockCounterStopped) }
    }
}

/// Read stake committed on the ledger.
pub trait StakeMonitor: Clone + Send + Sync + 'static {
    /// Return the stake available to `staker`.
    fn stake(&self, staker: &StakerId) -> impl Future<Output = Result<u128, Error>> + Send;
}

/// Ticket-based group selection.
pub trait GroupSelection: Clone + Send + Sync + 'static {
    /// Submit a ticket for the current round.
    ///
    /// Resolves once the ticket has been handed to the ledger. The returned [Promise]
    /// resolves once the ledger has accepted or rejected it.
    fn submit_ticket(&self, ticket: Ticket) -> impl Future<Output = Promise> + Send;

    /// Return the finalized roster, ordered by ticket value.
    fn selected_participants(&self) -> impl Future<Output = Result<Vec<StakerId>, Error>> + Send;
}

/// Publication of DKG results.
pub trait DkgResults: Clone + Send + Sync + 'static {
    /// Submit `result`, supported by `signatures` from members.
    fn submit_dkg_result(
        &self,
        submitter: MemberIndex,
        result: DkgResult,
        signatures: BTreeMap<MemberIndex, Signature>,
    ) -> Promise;

    /// Return whether a result was already accepted for `seed`.
    fn is_dkg_result_submitted(&self, seed: u64) -> impl Future<Output = Result<bool, Error>> + Send;

    /// Invoke `handler` every time a result is accepted.
    fn on_dkg_result_submitted<F>(&self, handler: F) -> Subscription
    where
        F: Fn(DkgResultSubmission) + Send + Sync + 'static;

    /// Return the most recently accepted result and the signatures that supported it.
    #[allow(clippy::type_complexity)]
    fn last_dkg_result(
        &self,
    ) -> impl Future<Output = Result<Option<(DkgResult, BTreeMap<MemberIndex, Signature>)>, Error>> + Send;
}

/// Everything the relay requires from the ledger.
pub trait Relay: GroupSelection + DkgResults {}

impl<T: GroupSelection + DkgResults> Relay for T {}

/// Sign and verify on behalf of the operator.
pub trait Signing: Clone + Send + Sync + 'static {
    fn public_key(&self) -> PublicKey;

    fn sign(&self, message: &[u8]) -> Signature;

    fn verify(&self, public_key: &PublicKey, message: &[u8], signature: &Signature) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_cryptography::{PrivateKeyExt as _, Signer as _};

    #[test]
    fn test_staker_value_preserves_leading_zeros() {
        let mut raw = [0u8; STAKER_ID_LENGTH];
        raw[STAKER_ID_LENGTH - 1] = 7;
        let staker = StakerId::new(raw);
        let value = staker.to_value();
        assert_eq!(value, BigUint::from(7u8));
        assert_eq!(StakerId::from_value(&value), Some(staker));
    }

    #[test]
    fn test_staker_value_too_large() {
        let value = BigUint::from_bytes_be(&[1u8; STAKER_ID_LENGTH + 1]);
        assert_eq!(StakerId::from_value(&value), None);
    }

    #[test]
    fn test_staker_from_public_key() {
        let first = ed25519::PrivateKey::from_seed(0).public_key();
        let second = ed25519::PrivateKey::from_seed(1).public_key();
        assert_eq!(
            StakerId::from_public_key(&first),
            StakerId::from_public_key(&first)
        );
        assert_ne!(
            StakerId::from_public_key(&first),
            StakerId::from_public_key(&second)
        );
    }

    #[test]
    fn test_result_digest_covers_members() {
        let result = DkgResult {
            seed: 1,
            group_public_key: vec![1, 2, 3],
            disqualified: vec![],
            inactive: vec![2],
        };
        let mut moved = result.clone();
        moved.disqualified = vec![2];
        moved.inactive = vec![];
        assert_ne!(result.digest(), moved.digest());
        assert_eq!(result.digest(), result.clone().digest());
    }

    #[test]
    fn test_promise_dropped() {
        let (sender, promise) = Promise::pending();
        drop(sender);
        assert_eq!(
            futures::executor::block_on(promise),
            Err(Error::Dropped)
        );
        assert_eq!(futures::executor::block_on(Promise::ready(Ok(()))), Ok(()));
    }
}

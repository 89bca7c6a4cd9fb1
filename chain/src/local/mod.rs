//! In-memory ledger for tests and simulations.
//!
//! The local chain produces a block every [Config::block_time] on the runtime clock, keeps a
//! ticket book ordered by ticket value, and accepts the first sufficiently signed DKG result
//! for each seed. Result signatures are accepted from any registered operator key (the key the
//! chain was started with is always registered).

use crate::{
    DkgResult, DkgResultSubmission, Error, MemberIndex, Promise, PublicKey, Signature,
    Signing as _, StakerId, Subscription, Ticket,
};
use commonware_cryptography::{ed25519, Signer as _, Verifier as _};
use commonware_runtime::{Clock, Metrics, Spawner};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};
use tracing::{debug, info, trace};

mod block_counter;
pub use block_counter::BlockCounter;

/// Namespace used for all operator signatures.
pub const SIGNING_NAMESPACE: &[u8] = b"_BEACON_OPERATOR";

/// Configuration for the local chain.
#[derive(Clone, Debug)]
pub struct Config {
    /// Number of members in a group.
    pub group_size: usize,

    /// Number of member signatures required to accept a DKG result.
    pub threshold: usize,

    /// Stake required to generate a single ticket.
    pub minimum_stake: u128,

    /// Interval between blocks.
    pub block_time: Duration,
}

/// [crate::Signing] backed by an ed25519 operator key.
#[derive(Clone)]
pub struct Signing {
    key: ed25519::PrivateKey,
}

impl Signing {
    pub fn new(key: ed25519::PrivateKey) -> Self {
        Self { key }
    }
}

impl crate::Signing for Signing {
    fn public_key(&self) -> PublicKey {
        self.key.public_key()
    }

    fn sign(&self, message: &[u8]) -> Signature {
        self.key.sign(Some(SIGNING_NAMESPACE), message)
    }

    fn verify(&self, public_key: &PublicKey, message: &[u8], signature: &Signature) -> bool {
        public_key.verify(Some(SIGNING_NAMESPACE), message, signature)
    }
}

type Handler = Arc<dyn Fn(DkgResultSubmission) + Send + Sync>;

type Signatures = BTreeMap<MemberIndex, Signature>;

#[derive(Default)]
struct State {
    operators: Vec<PublicKey>,
    stakes: HashMap<StakerId, u128>,

    tickets: Vec<(Ticket, StakerId)>,
    submitted_tickets: HashSet<(StakerId, u32)>,

    results: BTreeMap<u64, (DkgResult, Signatures)>,
    last_result: Option<(DkgResult, Signatures)>,

    handlers: BTreeMap<u64, Handler>,
    next_handler: u64,
}

/// In-memory ledger.
#[derive(Clone)]
pub struct Chain {
    config: Config,
    block_counter: BlockCounter,
    signing: Signing,
    state: Arc<Mutex<State>>,
}

impl Chain {
    /// Start a local chain operated with `key`.
    ///
    /// The block ticker runs as a task on `context` until the runtime is stopped.
    pub fn connect_with_key<E: Clock + Spawner + Metrics>(
        context: E,
        config: Config,
        key: ed25519::PrivateKey,
    ) -> Self {
        let block_counter = BlockCounter::new();
        let start = context.current();
        context.with_label("block_counter").spawn({
            let block_counter = block_counter.clone();
            let block_time = config.block_time;
            move |context| async move {
                // Blocks are scheduled from the start so wake-up latency never accumulates
                let mut next = block_time;
                loop {
                    context.sleep_until(start + next).await;
                    let height = block_counter.advance();
                    trace!(height, "produced block");
                    next += block_time;
                }
            }
        });
        let signing = Signing::new(key);
        let state = State {
            operators: vec![signing.public_key()],
            ..Default::default()
        };
        Self {
            config,
            block_counter,
            signing,
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn block_counter(&self) -> BlockCounter {
        self.block_counter.clone()
    }

    pub fn signing(&self) -> Signing {
        self.signing.clone()
    }

    /// Accept result signatures produced by `public_key`.
    pub fn register_operator(&self, public_key: PublicKey) {
        let mut state = self.state.lock().unwrap();
        if !state.operators.contains(&public_key) {
            state.operators.push(public_key);
        }
    }

    /// Record the stake committed by `staker`.
    pub fn set_stake(&self, staker: StakerId, amount: u128) {
        self.state.lock().unwrap().stakes.insert(staker, amount);
    }

    /// Return all accepted tickets, ordered by value.
    pub fn tickets(&self) -> Vec<Ticket> {
        self.state
            .lock()
            .unwrap()
            .tickets
            .iter()
            .map(|(ticket, _)| ticket.clone())
            .collect()
    }

    fn accept_ticket(&self, ticket: Ticket) -> Result<(), Error> {
        let staker = StakerId::from_value(&ticket.proof.staker_value).ok_or(Error::InvalidTicket)?;
        let index = ticket.proof.virtual_staker_index;
        let mut state = self.state.lock().unwrap();
        let stake = *state
            .stakes
            .get(&staker)
            .ok_or(Error::UnknownStaker(staker))?;
        let virtual_stakers = stake / self.config.minimum_stake.max(1);
        if index == 0 || u128::from(index) > virtual_stakers {
            return Err(Error::InvalidTicket);
        }
        if !state.submitted_tickets.insert((staker, index)) {
            return Err(Error::DuplicateTicket(staker, index));
        }
        let position = state
            .tickets
            .partition_point(|(existing, _)| existing.value <= ticket.value);
        state.tickets.insert(position, (ticket, staker));
        Ok(())
    }

    fn accept_result(
        &self,
        submitter: MemberIndex,
        result: DkgResult,
        signatures: Signatures,
    ) -> Result<DkgResultSubmission, Error> {
        if submitter == 0 || submitter as usize > self.config.group_size {
            return Err(Error::InvalidSubmitter(submitter));
        }
        if signatures.len() < self.config.threshold {
            return Err(Error::InsufficientSignatures(
                signatures.len(),
                self.config.threshold,
            ));
        }
        let digest = result.digest();
        let mut state = self.state.lock().unwrap();
        for (member, signature) in &signatures {
            let valid = state
                .operators
                .iter()
                .any(|operator| self.signing.verify(operator, digest.as_ref(), signature));
            if !valid {
                return Err(Error::InvalidSignature(*member));
            }
        }

        if state.results.contains_key(&result.seed) {
            return Err(Error::ResultAlreadySubmitted(result.seed));
        }
        let submission = DkgResultSubmission {
            seed: result.seed,
            submitter,
            group_public_key: result.group_public_key.clone(),
            block_number: self.block_counter.height(),
        };
        state
            .results
            .insert(result.seed, (result.clone(), signatures.clone()));
        state.last_result = Some((result, signatures));
        Ok(submission)
    }
}

impl crate::StakeMonitor for Chain {
    async fn stake(&self, staker: &StakerId) -> Result<u128, Error> {
        self.state
            .lock()
            .unwrap()
            .stakes
            .get(staker)
            .copied()
            .ok_or(Error::UnknownStaker(*staker))
    }
}

impl crate::GroupSelection for Chain {
    async fn submit_ticket(&self, ticket: Ticket) -> Promise {
        let result = self.accept_ticket(ticket);
        if let Err(err) = &result {
            debug!(?err, "rejected ticket");
        }
        Promise::ready(result)
    }

    async fn selected_participants(&self) -> Result<Vec<StakerId>, Error> {
        let state = self.state.lock().unwrap();
        if state.tickets.len() < self.config.group_size {
            return Err(Error::NotEnoughTickets(
                state.tickets.len(),
                self.config.group_size,
            ));
        }
        Ok(state
            .tickets
            .iter()
            .take(self.config.group_size)
            .map(|(_, staker)| *staker)
            .collect())
    }
}

impl crate::DkgResults for Chain {
    fn submit_dkg_result(
        &self,
        submitter: MemberIndex,
        result: DkgResult,
        signatures: Signatures,
    ) -> Promise {
        let submission = match self.accept_result(submitter, result, signatures) {
            Ok(submission) => submission,
            Err(err) => {
                debug!(?err, submitter, "rejected dkg result");
                return Promise::ready(Err(err));
            }
        };
        info!(
            seed = submission.seed,
            submitter,
            block = submission.block_number,
            "accepted dkg result"
        );

        // Handlers run outside of the lock so they may call back into the chain
        let handlers: Vec<Handler> = self
            .state
            .lock()
            .unwrap()
            .handlers
            .values()
            .cloned()
            .collect();
        for handler in handlers {
            handler(submission.clone());
        }
        Promise::ready(Ok(()))
    }

    async fn is_dkg_result_submitted(&self, seed: u64) -> Result<bool, Error> {
        Ok(self.state.lock().unwrap().results.contains_key(&seed))
    }

    fn on_dkg_result_submitted<F>(&self, handler: F) -> Subscription
    where
        F: Fn(DkgResultSubmission) + Send + Sync + 'static,
    {
        let id = {
            let mut state = self.state.lock().unwrap();
            let id = state.next_handler;
            state.next_handler += 1;
            state.handlers.insert(id, Arc::new(handler));
            id
        };
        let state = self.state.clone();
        Subscription::new(move || {
            state.lock().unwrap().handlers.remove(&id);
        })
    }

    async fn last_dkg_result(&self) -> Result<Option<(DkgResult, Signatures)>, Error> {
        Ok(self.state.lock().unwrap().last_result.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        BlockCounter as _, DkgResults as _, GroupSelection as _, Signing as _, StakeMonitor as _,
        TicketProof,
    };
    use commonware_cryptography::PrivateKeyExt as _;
    use commonware_macros::test_traced;
    use commonware_runtime::{deterministic, Runner};
    use num_bigint::BigUint;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const BLOCK_TIME: Duration = Duration::from_millis(500);

    fn config() -> Config {
        Config {
            group_size: 2,
            threshold: 2,
            minimum_stake: 20,
            block_time: BLOCK_TIME,
        }
    }

    fn staker(seed: u8) -> StakerId {
        StakerId::new([seed; crate::STAKER_ID_LENGTH])
    }

    fn ticket(value: u64, staker: StakerId, index: u32) -> Ticket {
        Ticket {
            value: BigUint::from(value),
            proof: TicketProof {
                staker_value: staker.to_value(),
                virtual_staker_index: index,
            },
        }
    }

    fn dkg_result(seed: u64) -> DkgResult {
        DkgResult {
            seed,
            group_public_key: vec![seed as u8; 32],
            disqualified: vec![],
            inactive: vec![],
        }
    }

    #[test_traced]
    fn test_blocks_advance_with_clock() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let chain = Chain::connect_with_key(
                context.with_label("chain"),
                config(),
                ed25519::PrivateKey::from_seed(0),
            );
            let counter = chain.block_counter();
            assert_eq!(counter.current_block().unwrap(), 0);

            let start = context.current();
            let height = counter.wait_for_block_height(3).await.unwrap();
            assert_eq!(height, 3);
            assert_eq!(
                context.current().duration_since(start).unwrap(),
                BLOCK_TIME * 3
            );

            // Pacing does not drift over many blocks
            let height = counter.wait_for_block_height(20).await.unwrap();
            assert_eq!(height, 20);
            assert_eq!(
                context.current().duration_since(start).unwrap(),
                BLOCK_TIME * 20
            );
        });
    }

    #[test_traced]
    fn test_roster_ordered_by_ticket_value() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let chain = Chain::connect_with_key(
                context.with_label("chain"),
                config(),
                ed25519::PrivateKey::from_seed(0),
            );
            chain.set_stake(staker(1), 40);
            chain.set_stake(staker(2), 20);
            assert_eq!(chain.stake(&staker(1)).await.unwrap(), 40);

            chain.submit_ticket(ticket(30, staker(1), 1)).await.await.unwrap();
            assert_eq!(
                chain.selected_participants().await,
                Err(Error::NotEnoughTickets(1, 2))
            );
            chain.submit_ticket(ticket(10, staker(2), 1)).await.await.unwrap();
            chain.submit_ticket(ticket(20, staker(1), 2)).await.await.unwrap();

            let roster = chain.selected_participants().await.unwrap();
            assert_eq!(roster, vec![staker(2), staker(1)]);
            assert_eq!(chain.tickets().len(), 3);
        });
    }

    #[test_traced]
    fn test_invalid_tickets_rejected() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let chain = Chain::connect_with_key(
                context.with_label("chain"),
                config(),
                ed25519::PrivateKey::from_seed(0),
            );
            chain.set_stake(staker(1), 40);

            assert_eq!(
                chain.submit_ticket(ticket(1, staker(2), 1)).await.await,
                Err(Error::UnknownStaker(staker(2)))
            );
            assert_eq!(
                chain.submit_ticket(ticket(1, staker(1), 3)).await.await,
                Err(Error::InvalidTicket)
            );
            assert_eq!(
                chain.submit_ticket(ticket(1, staker(1), 0)).await.await,
                Err(Error::InvalidTicket)
            );
            chain.submit_ticket(ticket(1, staker(1), 1)).await.await.unwrap();
            assert_eq!(
                chain.submit_ticket(ticket(2, staker(1), 1)).await.await,
                Err(Error::DuplicateTicket(staker(1), 1))
            );
        });
    }

    #[test_traced]
    fn test_first_result_wins() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let chain = Chain::connect_with_key(
                context.with_label("chain"),
                config(),
                ed25519::PrivateKey::from_seed(0),
            );
            let signing = chain.signing();
            let observed = Arc::new(AtomicUsize::new(0));
            let subscription = chain.on_dkg_result_submitted({
                let observed = observed.clone();
                move |submission| {
                    assert_eq!(submission.seed, 7);
                    observed.fetch_add(1, Ordering::SeqCst);
                }
            });

            let result = dkg_result(7);
            let signature = signing.sign(result.digest().as_ref());
            let signatures: Signatures = [(1, signature.clone()), (2, signature)].into();

            // Not enough support
            let partial: Signatures = signatures.clone().into_iter().take(1).collect();
            assert_eq!(
                chain.submit_dkg_result(1, result.clone(), partial).await,
                Err(Error::InsufficientSignatures(1, 2))
            );
            assert!(!chain.is_dkg_result_submitted(7).await.unwrap());

            chain
                .submit_dkg_result(1, result.clone(), signatures.clone())
                .await
                .unwrap();
            assert!(chain.is_dkg_result_submitted(7).await.unwrap());
            assert_eq!(
                chain.submit_dkg_result(2, result.clone(), signatures.clone()).await,
                Err(Error::ResultAlreadySubmitted(7))
            );
            assert_eq!(observed.load(Ordering::SeqCst), 1);

            let (last, last_signatures) = chain.last_dkg_result().await.unwrap().unwrap();
            assert_eq!(last, result);
            assert_eq!(last_signatures, signatures);

            // Unsubscribed handlers are not invoked
            subscription.unsubscribe();
            let other = dkg_result(8);
            let signature = signing.sign(other.digest().as_ref());
            chain
                .submit_dkg_result(2, other, [(1, signature.clone()), (2, signature)].into())
                .await
                .unwrap();
            assert_eq!(observed.load(Ordering::SeqCst), 1);
        });
    }

    #[test_traced]
    fn test_forged_signature_rejected() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let chain = Chain::connect_with_key(
                context.with_label("chain"),
                config(),
                ed25519::PrivateKey::from_seed(0),
            );
            let forger = Signing::new(ed25519::PrivateKey::from_seed(1));
            let result = dkg_result(3);
            let honest = chain.signing().sign(result.digest().as_ref());
            let forged = forger.sign(result.digest().as_ref());
            assert_eq!(
                chain
                    .submit_dkg_result(1, result.clone(), [(1, honest.clone()), (2, forged)].into())
                    .await,
                Err(Error::InvalidSignature(2))
            );

            // Registered operators may sign
            chain.register_operator(forger.public_key());
            let forged = forger.sign(result.digest().as_ref());
            chain
                .submit_dkg_result(1, result, [(1, honest), (2, forged)].into())
                .await
                .unwrap();
            assert_eq!(
                chain
                    .submit_dkg_result(3, dkg_result(4), BTreeMap::new())
                    .await,
                Err(Error::InvalidSubmitter(3))
            );
        });
    }
}

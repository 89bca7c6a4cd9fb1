//! Reference protocol for local fixtures.
//!
//! Every member of a group runs through three phases, each starting at a fixed block height:
//!
//! 1. _Commitment_ (from `start_height`): commit to a random secret and broadcast the signed
//!    commitment. Members that sent no commitment are inactive and members whose commitment is
//!    not signed by its sender are disqualified. The group key is derived from the commitments of
//!    all remaining (qualified) members.
//! 2. _Result Signing_ (from `start_height + phase_blocks`): sign the digest of the resulting
//!    [DkgResult] and broadcast the signature.
//! 3. _Publication_ (from `start_height + 2 * phase_blocks`): qualified members take turns, every
//!    `publication_block_step` blocks, to publish the result with all supporting signatures. A
//!    member stops waiting for its turn as soon as the result is published by someone else.
//!
//! Keys are derived by hashing commitments and secrets: this protocol provides no secrecy and
//! only exists to exercise orchestration against local fixtures.

use super::{Dkg, Error, Outcome, Round, ThresholdSigner};
use beacon_chain::{BlockCounter, DkgResult, DkgResults, MemberIndex, PublicKey, Signature, Signing};
use beacon_net::Channel;
use commonware_cryptography::{hash, sha256::Digest, Hasher, Sha256};
use commonware_macros::select;
use commonware_runtime::{Clock, Metrics, Spawner};
use futures::{channel::mpsc, StreamExt};
use rand::{CryptoRng, Rng};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

mod wire;
pub use wire::{Commitment, Message, ResultSignature};

/// Default number of blocks reserved for each message exchange.
pub const DEFAULT_PHASE_BLOCKS: u64 = 3;

/// Default number of blocks between the publication turns of consecutive members.
pub const DEFAULT_PUBLICATION_BLOCK_STEP: u64 = 2;

/// [Dkg] running the reference protocol.
#[derive(Clone, Debug)]
pub struct Runner {
    pub phase_blocks: u64,
    pub publication_block_step: u64,
}

impl Default for Runner {
    fn default() -> Self {
        Self {
            phase_blocks: DEFAULT_PHASE_BLOCKS,
            publication_block_step: DEFAULT_PUBLICATION_BLOCK_STEP,
        }
    }
}

impl Dkg for Runner {
    type Message = Message;

    async fn execute<E, B, R, S, C>(
        &self,
        context: E,
        round: Round,
        block_counter: B,
        relay: R,
        signing: S,
        channel: C,
    ) -> Outcome
    where
        E: Spawner + Clock + Metrics + Rng + CryptoRng,
        B: BlockCounter,
        R: DkgResults,
        S: Signing,
        C: beacon_net::Channel<Message = Self::Message>,
    {
        // Subscribe before anything can be sent
        let receiver = channel.subscribe();
        let (sender, published) = mpsc::unbounded();
        let seed = round.seed;
        let subscription = relay.on_dkg_result_submitted(move |submission| {
            if submission.seed == seed {
                let _ = sender.unbounded_send(());
            }
        });

        let mut member = Member {
            context,
            round,
            phase_blocks: self.phase_blocks,
            publication_block_step: self.publication_block_step,
            block_counter,
            relay,
            signing,
            channel,
            receiver,
            published,
            inbox: Inbox::default(),
        };
        let outcome = member.run().await;
        subscription.unsubscribe();
        match &outcome.error {
            None => info!(member = outcome.member, seed, "completed dkg"),
            Some(err) => warn!(member = outcome.member, seed, ?err, "dkg failed"),
        }
        outcome
    }
}

/// Messages received by a member. Only the first message of each kind from each member counts.
#[derive(Default)]
struct Inbox {
    commitments: BTreeMap<MemberIndex, (PublicKey, Commitment)>,
    signatures: BTreeMap<MemberIndex, (PublicKey, ResultSignature)>,
}

impl Inbox {
    fn record(&mut self, round: &Round, message: beacon_net::Message<Message>) {
        let beacon_net::Message { sender, payload } = message;
        if payload.seed() != round.seed {
            return;
        }
        let member = payload.member();
        if member == 0 || member as usize > round.group_size {
            debug!(member, "ignoring message from unknown member");
            return;
        }
        match payload {
            Message::Commitment(commitment) => {
                self.commitments.entry(member).or_insert((sender, commitment));
            }
            Message::ResultSignature(signature) => {
                self.signatures.entry(member).or_insert((sender, signature));
            }
        }
    }
}

struct Member<E, B, R, S, C: Channel> {
    context: E,
    round: Round,
    phase_blocks: u64,
    publication_block_step: u64,

    block_counter: B,
    relay: R,
    signing: S,
    channel: C,

    receiver: mpsc::UnboundedReceiver<beacon_net::Message<C::Message>>,
    published: mpsc::UnboundedReceiver<()>,
    inbox: Inbox,
}

impl<E, B, R, S, C> Member<E, B, R, S, C>
where
    E: Rng + CryptoRng,
    B: BlockCounter,
    R: DkgResults,
    S: Signing,
    C: Channel<Message = Message>,
{
    async fn run(&mut self) -> Outcome {
        let member = self.round.member();
        let secret = match self.commit().await {
            Ok(secret) => secret,
            Err(err) => return Outcome::failure(member, err),
        };
        let (result, qualified) = match self.evaluate() {
            Ok(evaluation) => evaluation,
            Err(err) => return Outcome::failure(member, err),
        };
        let Some(position) = qualified.iter().position(|qualified| *qualified == member) else {
            return Outcome::failure(member, Error::Excluded(member));
        };

        let mut hasher = Sha256::new();
        hasher.update(&result.group_public_key);
        hasher.update(&secret);
        let signer = ThresholdSigner::new(member, result.group_public_key.clone(), hasher.finalize());

        let signatures = match self.support(&result, &qualified).await {
            Ok(signatures) => signatures,
            Err(err) => {
                return Outcome {
                    member,
                    signer: Some(signer),
                    error: Some(err),
                }
            }
        };
        if let Err(err) = self.publish(result, signatures, position).await {
            return Outcome {
                member,
                signer: Some(signer),
                error: Some(err),
            };
        }
        Outcome::success(signer)
    }

    /// Wait for `height`, recording all messages received in the meantime.
    async fn collect(&mut self, height: u64) -> Result<(), Error> {
        let mut deadline = self.block_counter.block_height_waiter(height)?;
        loop {
            select! {
                message = self.receiver.next() => {
                    let Some(message) = message else {
                        break;
                    };
                    self.inbox.record(&self.round, message);
                },
                reached = &mut deadline => {
                    reached.map_err(|_| beacon_chain::Error::BlockCounterStopped)?;
                    return Ok(());
                },
            }
        }

        // Nothing else can be received
        deadline
            .await
            .map_err(|_| beacon_chain::Error::BlockCounterStopped)?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<[u8; 32], Error> {
        let mut secret = [0u8; 32];
        self.context.fill_bytes(&mut secret);
        let commitment = hash(&secret);

        self.block_counter
            .wait_for_block_height(self.round.start_height)
            .await?;
        let (seed, member) = (self.round.seed, self.round.member());
        let payload = Commitment::payload(seed, member, &commitment);
        self.channel.send(Message::Commitment(Commitment {
            seed,
            member,
            commitment,
            signature: self.signing.sign(&payload),
        }))?;
        debug!(member, seed, "sent commitment");

        self.collect(self.round.start_height + self.phase_blocks)
            .await?;
        Ok(secret)
    }

    /// Derive the result from all commitments received.
    ///
    /// Returns the result and the qualified members, in ascending order.
    fn evaluate(&self) -> Result<(DkgResult, Vec<MemberIndex>), Error> {
        let mut qualified = Vec::new();
        let mut disqualified = Vec::new();
        let mut inactive = Vec::new();
        let mut hasher = Sha256::new();
        hasher.update(&self.round.seed.to_be_bytes());
        for member in 1..=self.round.group_size as MemberIndex {
            let Some((sender, commitment)) = self.inbox.commitments.get(&member) else {
                inactive.push(member);
                continue;
            };
            let payload = Commitment::payload(commitment.seed, member, &commitment.commitment);
            if !self.signing.verify(sender, &payload, &commitment.signature) {
                disqualified.push(member);
                continue;
            }
            hasher.update(&member.to_be_bytes());
            hasher.update(commitment.commitment.as_ref());
            qualified.push(member);
        }
        if qualified.len() < self.round.threshold {
            return Err(Error::TooFewQualified(qualified.len(), self.round.threshold));
        }
        let result = DkgResult {
            seed: self.round.seed,
            group_public_key: hasher.finalize().as_ref().to_vec(),
            disqualified,
            inactive,
        };
        Ok((result, qualified))
    }

    /// Sign `result` and collect the signatures of all qualified members supporting it.
    async fn support(
        &mut self,
        result: &DkgResult,
        qualified: &[MemberIndex],
    ) -> Result<BTreeMap<MemberIndex, Signature>, Error> {
        let digest: Digest = result.digest();
        let (seed, member) = (self.round.seed, self.round.member());
        self.channel.send(Message::ResultSignature(ResultSignature {
            seed,
            member,
            digest,
            signature: self.signing.sign(digest.as_ref()),
        }))?;
        debug!(member, seed, "sent result signature");

        self.collect(self.round.start_height + 2 * self.phase_blocks)
            .await?;
        let signatures: BTreeMap<MemberIndex, Signature> = self
            .inbox
            .signatures
            .iter()
            .filter(|(supporter, _)| qualified.contains(supporter))
            .filter(|(_, (sender, support))| {
                support.digest == digest
                    && self
                        .signing
                        .verify(sender, digest.as_ref(), &support.signature)
            })
            .map(|(supporter, (_, support))| (*supporter, support.signature.clone()))
            .collect();
        if signatures.len() < self.round.threshold {
            return Err(Error::InsufficientSupport(
                signatures.len(),
                self.round.threshold,
            ));
        }
        Ok(signatures)
    }

    /// Publish `result` once it is this member's turn, unless someone else did it first.
    async fn publish(
        &mut self,
        result: DkgResult,
        signatures: BTreeMap<MemberIndex, Signature>,
        position: usize,
    ) -> Result<(), Error> {
        let (seed, member) = (self.round.seed, self.round.member());
        let turn = self.round.start_height
            + 2 * self.phase_blocks
            + position as u64 * self.publication_block_step;
        let mut turn = self.block_counter.block_height_waiter(turn)?;
        select! {
            _ = self.published.next() => {
                debug!(member, seed, "result published by another member");
                return Ok(());
            },
            reached = &mut turn => {
                reached.map_err(|_| beacon_chain::Error::BlockCounterStopped)?;
            },
        }

        if self.relay.is_dkg_result_submitted(seed).await? {
            debug!(member, seed, "result already published");
            return Ok(());
        }
        match self.relay.submit_dkg_result(member, result, signatures).await {
            Ok(()) => {
                info!(member, seed, "published dkg result");
                Ok(())
            }
            Err(beacon_chain::Error::ResultAlreadySubmitted(_)) => Ok(()),
            Err(err) => Err(Error::Publication(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_chain::local::{self, Chain};
    use beacon_net::{local::Network, Provider as _};
    use commonware_cryptography::{ed25519, PrivateKeyExt as _, Signer as _};
    use commonware_macros::test_traced;
    use commonware_runtime::{deterministic, Handle, Runner as _};
    use std::time::Duration;

    const GROUP_SIZE: usize = 3;
    const THRESHOLD: usize = 2;

    fn chain(context: deterministic::Context, key: ed25519::PrivateKey) -> Chain {
        Chain::connect_with_key(
            context,
            local::Config {
                group_size: GROUP_SIZE,
                threshold: THRESHOLD,
                minimum_stake: 20,
                block_time: Duration::from_millis(500),
            },
            key,
        )
    }

    fn spawn_members(
        context: &deterministic::Context,
        chain: &Chain,
        channel: &beacon_net::local::Channel<Message>,
        members: usize,
    ) -> Vec<Handle<Outcome>> {
        let start_height = chain.block_counter().current_block().unwrap() + 2;
        (0..members)
            .map(|index| {
                let round = Round {
                    seed: 42,
                    index,
                    group_size: GROUP_SIZE,
                    threshold: THRESHOLD,
                    start_height,
                };
                let (chain, channel) = (chain.clone(), channel.clone());
                context
                    .with_label(&format!("member_{}", round.member()))
                    .spawn(move |context| async move {
                        Runner::default()
                            .execute(
                                context,
                                round,
                                chain.block_counter(),
                                chain.clone(),
                                chain.signing(),
                                channel,
                            )
                            .await
                    })
            })
            .collect()
    }

    #[test_traced]
    fn test_all_members_agree() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let key = ed25519::PrivateKey::from_seed(0);
            let network = Network::connect_with_key(key.public_key());
            let chain = chain(context.with_label("chain"), key);
            let channel = network.channel_for("dkg").unwrap();

            let mut signers = Vec::new();
            for handle in spawn_members(&context, &chain, &channel, GROUP_SIZE) {
                let outcome = handle.await.unwrap();
                assert!(outcome.is_success(), "{outcome:?}");
                signers.push(outcome.signer.unwrap());
            }
            assert!(signers
                .windows(2)
                .all(|pair| pair[0].group_public_key() == pair[1].group_public_key()));
            assert!(signers.windows(2).all(|pair| pair[0].share() != pair[1].share()));

            // Exactly one result is published
            let (result, signatures) = chain.last_dkg_result().await.unwrap().unwrap();
            assert_eq!(result.seed, 42);
            assert_eq!(result.group_public_key, signers[0].group_public_key());
            assert!(result.inactive.is_empty());
            assert!(result.disqualified.is_empty());
            assert_eq!(signatures.len(), GROUP_SIZE);
        });
    }

    #[test_traced]
    fn test_missing_member_marked_inactive() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let key = ed25519::PrivateKey::from_seed(0);
            let network = Network::connect_with_key(key.public_key());
            let chain = chain(context.with_label("chain"), key);
            let channel = network.channel_for("dkg").unwrap();

            // Member 3 never shows up
            for handle in spawn_members(&context, &chain, &channel, GROUP_SIZE - 1) {
                assert!(handle.await.unwrap().is_success());
            }
            let (result, signatures) = chain.last_dkg_result().await.unwrap().unwrap();
            assert_eq!(result.inactive, vec![3]);
            assert_eq!(signatures.len(), GROUP_SIZE - 1);
        });
    }

    #[test_traced]
    fn test_forged_commitment_disqualified() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let key = ed25519::PrivateKey::from_seed(0);
            let network = Network::connect_with_key(key.public_key());
            let chain = chain(context.with_label("chain"), key);
            let channel = network.channel_for("dkg").unwrap();
            let handles = spawn_members(&context, &chain, &channel, GROUP_SIZE - 1);

            // Commitment of member 3 signed by a key that does not match the sender
            let forger = local::Signing::new(ed25519::PrivateKey::from_seed(1));
            let commitment = hash(b"secret");
            chain.block_counter().wait_for_block_height(2).await.unwrap();
            channel
                .send(Message::Commitment(Commitment {
                    seed: 42,
                    member: 3,
                    commitment,
                    signature: forger.sign(&Commitment::payload(42, 3, &commitment)),
                }))
                .unwrap();

            for handle in handles {
                assert!(handle.await.unwrap().is_success());
            }
            let (result, _) = chain.last_dkg_result().await.unwrap().unwrap();
            assert_eq!(result.disqualified, vec![3]);
            assert!(result.inactive.is_empty());
        });
    }
}

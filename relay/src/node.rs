//! Drive a staker through group selection and into the groups it was selected for.

use crate::{
    dkg::{Dkg, Outcome, Round, ThresholdSigner},
    groupselection::{self, generate_tickets, Selection},
    submission::submit_tickets,
};
use beacon_chain::{BlockCounter, Relay, Signing, StakeMonitor, StakerId};
use beacon_net::Provider;
use commonware_cryptography::hash;
use commonware_macros::select;
use commonware_runtime::{Clock, Metrics, Spawner};
use commonware_utils::hex;
use futures::{channel::mpsc, StreamExt};
use rand::{CryptoRng, Rng};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that can occur when running group selection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("could not read stake: {0}")]
    Stake(beacon_chain::Error),
    #[error("could not generate tickets: {0}")]
    Tickets(#[from] groupselection::Error),
    #[error("could not wait for submission timeout: {0}")]
    Waiter(beacon_chain::Error),
    #[error("submission deadline out of range: start={0} timeout={1}")]
    DeadlineOverflow(u64, u64),
    #[error("could not fetch selected participants after submission timeout: {0}")]
    SelectedParticipants(beacon_chain::Error),
}

/// Phase of a group selection round.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Staking,
    Generating,
    Submitting,
    AwaitingDeadline,
    Resolving,
    Dispatched,
}

/// Configuration for a [Node].
#[derive(Clone, Debug)]
pub struct Config {
    /// Number of member signatures required to support a DKG result.
    pub threshold: usize,

    /// Stake required to generate a single ticket.
    pub minimum_stake: u128,

    /// Number of blocks tickets may be submitted for after a round starts.
    pub ticket_reactive_submission_timeout: u64,

    /// Number of blocks between the end of ticket submission and the first DKG message.
    pub member_lead_buffer: u64,
}

/// Staker participating in group selection.
pub struct Node<E, S, P, D> {
    context: E,
    config: Config,
    staker: StakerId,
    stake_monitor: S,
    provider: P,
    dkg: D,

    groups: Arc<Mutex<Vec<ThresholdSigner>>>,
    phase: Arc<Mutex<Option<Phase>>>,
}

impl<E: Clone, S: Clone, P: Clone, D: Clone> Clone for Node<E, S, P, D> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
            config: self.config.clone(),
            staker: self.staker,
            stake_monitor: self.stake_monitor.clone(),
            provider: self.provider.clone(),
            dkg: self.dkg.clone(),
            groups: self.groups.clone(),
            phase: self.phase.clone(),
        }
    }
}

impl<E, S, P, D> Node<E, S, P, D>
where
    E: Spawner + Clock + Metrics + Rng + CryptoRng,
    S: StakeMonitor,
    P: Provider<Message = D::Message>,
    D: Dkg,
{
    pub fn new(
        context: E,
        config: Config,
        staker: StakerId,
        stake_monitor: S,
        provider: P,
        dkg: D,
    ) -> Self {
        Self {
            context,
            config,
            staker,
            stake_monitor,
            provider,
            dkg,
            groups: Arc::new(Mutex::new(Vec::new())),
            phase: Arc::new(Mutex::new(None)),
        }
    }

    pub fn staker(&self) -> &StakerId {
        &self.staker
    }

    /// Groups this node joined, pending activation.
    pub fn groups(&self) -> Vec<ThresholdSigner> {
        self.groups.lock().unwrap().clone()
    }

    /// Phase of the most recent group selection round, if any.
    pub fn phase(&self) -> Option<Phase> {
        *self.phase.lock().unwrap()
    }

    fn enter(&self, phase: Phase) {
        debug!(staker = %self.staker, ?phase, "entered phase");
        *self.phase.lock().unwrap() = Some(phase);
    }

    /// Compete for membership in the group formed from `entry`.
    ///
    /// Tickets are submitted until `start_height` plus the reactive submission timeout is
    /// reached. The roster is then read from the chain and joining the group is launched as a
    /// detached task (whose outcome is only visible through [Node::groups]).
    pub async fn submit_tickets_for_group_selection<R, B, G>(
        &self,
        relay: R,
        block_counter: B,
        signing: G,
        entry: &[u8],
        start_height: u64,
    ) -> Result<Selection, Error>
    where
        R: Relay,
        B: BlockCounter,
        G: Signing,
    {
        self.enter(Phase::Staking);
        let available_stake = self
            .stake_monitor
            .stake(&self.staker)
            .await
            .map_err(Error::Stake)?;

        self.enter(Phase::Generating);
        let tickets = generate_tickets(
            entry,
            self.staker,
            available_stake,
            self.config.minimum_stake,
        )?;
        debug!(staker = %self.staker, tickets = tickets.len(), "generated tickets");

        let timeout = self.config.ticket_reactive_submission_timeout;
        let deadline = start_height
            .checked_add(timeout)
            .ok_or(Error::DeadlineOverflow(start_height, timeout))?;
        let mut timeout = block_counter
            .block_height_waiter(deadline)
            .map_err(Error::Waiter)?;

        // Both channels can hold everything ever sent on them
        let (errors, mut failures) = mpsc::channel(tickets.len());
        let (mut quit, quit_receiver) = mpsc::channel(1);

        self.enter(Phase::Submitting);
        self.context.with_label("ticket_submission").spawn({
            let relay = relay.clone();
            move |_| async move { submit_tickets(tickets, &relay, quit_receiver, errors).await }
        });

        self.enter(Phase::AwaitingDeadline);
        let reached = loop {
            select! {
                failure = failures.next() => {
                    let Some(err) = failure else {
                        // All submissions settled
                        break None;
                    };
                    warn!(staker = %self.staker, ?err, "error during ticket submission");
                },
                reached = &mut timeout => {
                    break Some(reached);
                },
            }
        };
        let submission_end = match reached {
            Some(reached) => reached,
            None => timeout.await,
        }
        .map_err(|_| Error::Waiter(beacon_chain::Error::BlockCounterStopped))?;

        self.enter(Phase::Resolving);
        let _ = quit.try_send(());
        let selected_stakers = relay
            .selected_participants()
            .await
            .map_err(Error::SelectedParticipants)?;
        for staker in &selected_stakers {
            info!(member = %staker, "new group member");
        }
        let selection = Selection { selected_stakers };

        self.enter(Phase::Dispatched);
        self.context.with_label("join_group").spawn({
            let node = self.clone();
            let selection = selection.clone();
            let entry = entry.to_vec();
            move |context| async move {
                let node = Node { context, ..node };
                node.join_group_if_eligible(
                    relay,
                    block_counter,
                    signing,
                    &selection,
                    &entry,
                    submission_end,
                )
                .await;
            }
        });
        Ok(selection)
    }

    /// Run one DKG member for every position `selection` assigns to this node's staker.
    ///
    /// Members start `member_lead_buffer` blocks after `submission_end`. Signers of members that
    /// complete without error are added to [Node::groups].
    pub async fn join_group_if_eligible<R, B, G>(
        &self,
        relay: R,
        block_counter: B,
        signing: G,
        selection: &Selection,
        entry: &[u8],
        submission_end: u64,
    ) -> Vec<Outcome>
    where
        R: Relay,
        B: BlockCounter,
        G: Signing,
    {
        let positions = selection.positions(&self.staker);
        if positions.is_empty() {
            debug!(staker = %self.staker, "not selected for group");
            return Vec::new();
        }

        let name = hex(entry);
        let channel = match self.provider.channel_for(&name) {
            Ok(channel) => channel,
            Err(err) => {
                warn!(staker = %self.staker, ?err, "could not open group channel");
                return Vec::new();
            }
        };
        let seed = group_seed(entry);
        let start_height = submission_end.saturating_add(self.config.member_lead_buffer);
        let mut handles = Vec::with_capacity(positions.len());
        for index in positions {
            let round = Round {
                seed,
                index,
                group_size: selection.group_size(),
                threshold: self.config.threshold,
                start_height,
            };
            let dkg = self.dkg.clone();
            let (block_counter, relay, signing, channel) = (
                block_counter.clone(),
                relay.clone(),
                signing.clone(),
                channel.clone(),
            );
            handles.push(
                self.context
                    .with_label("member")
                    .spawn(move |context| async move {
                        dkg.execute(context, round, block_counter, relay, signing, channel)
                            .await
                    }),
            );
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(err) => {
                    warn!(staker = %self.staker, ?err, "group member task failed");
                    continue;
                }
            };
            match (&outcome.signer, &outcome.error) {
                (Some(signer), None) => {
                    info!(
                        staker = %self.staker,
                        member = signer.member(),
                        group = hex(signer.group_public_key()),
                        "joined group"
                    );
                    self.groups.lock().unwrap().push(signer.clone());
                }
                (_, error) => {
                    warn!(staker = %self.staker, member = outcome.member, ?error, "failed to join group");
                }
            }
            outcomes.push(outcome);
        }
        outcomes
    }
}

/// Derive the seed of the DKG run for the group formed from `entry`.
pub fn group_seed(entry: &[u8]) -> u64 {
    let digest = hash(entry);
    let mut seed = [0u8; 8];
    seed.copy_from_slice(&digest.as_ref()[..8]);
    u64::from_be_bytes(seed)
}

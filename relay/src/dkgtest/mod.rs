//! Run a full DKG round trip against a local chain and broadcast network.
//!
//! [Engine] connects a fresh chain fixture and an in-process network (wrapped with the configured
//! interception [Rules]), runs every member of a group concurrently, and waits for all of them to
//! finish. It then waits (for at most [Config::result_publication_timeout]) for a result to be
//! published on the chain.
//!
//! A run in which every member succeeds but no result is published is not an error: the returned
//! [Report] simply carries no chain result. Use [assertions] to check reports.
//!
//! # Example
//!
//! ```rust
//! use beacon_net::interception::Rules;
//! use beacon_relay::dkgtest::{self, assertions::*};
//! use commonware_runtime::{deterministic, Runner};
//!
//! let executor = deterministic::Runner::default();
//! executor.start(|context| async move {
//!     let report = dkgtest::run_test(context, 3, 2, Rules::new()).await.unwrap();
//!     assert_dkg_result_published(&report);
//!     assert_success_signers_count(&report, 3);
//! });
//! ```

use crate::{
    config::{
        DEFAULT_BLOCK_TIME, DEFAULT_LEAD_BUFFER, DEFAULT_RESULT_PUBLICATION_TIMEOUT, MINIMUM_STAKE,
    },
    dkg::{self, Dkg, Outcome, Round, ThresholdSigner},
};
use beacon_chain::{
    local::{self, Chain},
    BlockCounter as _, DkgResult, DkgResults as _, MemberIndex, Signature,
};
use beacon_net::{interception, interception::Rules, Provider as _};
use commonware_cryptography::{ed25519, PrivateKeyExt as _, Signer as _};
use commonware_macros::select;
use commonware_runtime::{Clock, Metrics, Spawner};
use futures::{channel::mpsc, SinkExt, StreamExt};
use rand::{CryptoRng, Rng};
use std::{collections::BTreeMap, time::Duration};
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod assertions;

/// Errors that can occur when setting up or running a test.
#[derive(Error, Debug)]
pub enum Error {
    #[error("chain error: {0}")]
    Chain(#[from] beacon_chain::Error),
    #[error("network error: {0}")]
    Network(#[from] beacon_net::Error),
    #[error("member lost: received {0} of {1} outcomes")]
    MemberLost(usize, usize),
}

/// Configuration for an [Engine].
pub struct Config<M> {
    pub group_size: usize,
    pub threshold: usize,

    /// Rules applied to all messages broadcast by members.
    pub rules: Rules<M>,

    /// Number of blocks between the start of the run and the first DKG message.
    pub lead_buffer: u64,

    /// How long to wait for a result to be published once all members have finished.
    pub result_publication_timeout: Duration,

    pub minimum_stake: u128,
    pub block_time: Duration,
}

impl<M> Config<M> {
    /// Create a configuration with default timing.
    pub fn new(group_size: usize, threshold: usize, rules: Rules<M>) -> Self {
        Self {
            group_size,
            threshold,
            rules,
            lead_buffer: DEFAULT_LEAD_BUFFER,
            result_publication_timeout: DEFAULT_RESULT_PUBLICATION_TIMEOUT,
            minimum_stake: MINIMUM_STAKE,
            block_time: DEFAULT_BLOCK_TIME,
        }
    }
}

/// Outcome of a test run.
#[derive(Default)]
pub struct Report {
    dkg_result: Option<DkgResult>,
    dkg_result_signatures: Option<BTreeMap<MemberIndex, Signature>>,
    signers: Vec<ThresholdSigner>,
    member_failures: Vec<dkg::Error>,
    outcomes: Vec<Outcome>,
}

impl Report {
    fn record(&mut self, outcome: Outcome) {
        if let Some(signer) = &outcome.signer {
            self.signers.push(signer.clone());
        }
        if let Some(err) = &outcome.error {
            self.member_failures.push(err.clone());
        }
        self.outcomes.push(outcome);
    }

    /// Result published on the chain, if any was observed.
    pub fn dkg_result(&self) -> Option<&DkgResult> {
        self.dkg_result.as_ref()
    }

    /// Signatures supporting [Report::dkg_result].
    pub fn dkg_result_signatures(&self) -> Option<&BTreeMap<MemberIndex, Signature>> {
        self.dkg_result_signatures.as_ref()
    }

    pub fn signers(&self) -> &[ThresholdSigner] {
        &self.signers
    }

    pub fn member_failures(&self) -> &[dkg::Error] {
        &self.member_failures
    }

    /// Outcomes of all members, in completion order.
    pub fn outcomes(&self) -> &[Outcome] {
        &self.outcomes
    }
}

/// Runs all members of a group against local fixtures.
pub struct Engine<D: Dkg> {
    config: Config<D::Message>,
    dkg: D,
}

impl<D: Dkg> Engine<D> {
    pub fn new(config: Config<D::Message>, dkg: D) -> Self {
        Self { config, dkg }
    }

    /// Execute a single run.
    pub async fn run<E>(&self, mut context: E) -> Result<Report, Error>
    where
        E: Spawner + Clock + Metrics + Rng + CryptoRng,
    {
        let group_size = self.config.group_size;

        // Connect fixtures operated with an ephemeral key
        let key = ed25519::PrivateKey::from_rng(&mut context);
        let network = interception::Network::new(
            context.with_label("interception"),
            beacon_net::local::Network::connect_with_key(key.public_key()),
            self.config.rules.clone(),
        );
        let chain = Chain::connect_with_key(
            context.with_label("chain"),
            local::Config {
                group_size,
                threshold: self.config.threshold,
                minimum_stake: self.config.minimum_stake,
                block_time: self.config.block_time,
            },
            key,
        );
        let block_counter = chain.block_counter();

        let seed: u64 = context.gen_range(0..100_000);
        let channel = network.channel_for(&format!("dkg-test-{seed}"))?;

        let (forwarder, mut submissions) = mpsc::unbounded();
        let subscription = chain.on_dkg_result_submitted(move |submission| {
            let _ = forwarder.unbounded_send(submission);
        });

        // Give all members time to subscribe before the first message
        let start_height = block_counter.current_block()? + self.config.lead_buffer;
        info!(seed, group_size, start_height, "starting dkg test");

        let (sender, mut receiver) = mpsc::channel(group_size);
        for index in 0..group_size {
            let round = Round {
                seed,
                index,
                group_size,
                threshold: self.config.threshold,
                start_height,
            };
            let dkg = self.dkg.clone();
            let (block_counter, chain, channel, mut sender) = (
                block_counter.clone(),
                chain.clone(),
                channel.clone(),
                sender.clone(),
            );
            context
                .with_label(&format!("member_{}", round.member()))
                .spawn(move |context| async move {
                    let signing = chain.signing();
                    let outcome = dkg
                        .execute(context, round, block_counter, chain, signing, channel)
                        .await;
                    let _ = sender.send(outcome).await;
                });
        }
        drop(sender);

        // Wait for every member to finish
        let mut report = Report::default();
        while report.outcomes.len() < group_size {
            let Some(outcome) = receiver.next().await else {
                subscription.unsubscribe();
                return Err(Error::MemberLost(report.outcomes.len(), group_size));
            };
            if let Some(err) = &outcome.error {
                debug!(member = outcome.member, ?err, "member failed");
            }
            report.record(outcome);
        }

        // Handlers fire synchronously, so a published result is already queued
        let mut published = false;
        select! {
            submission = submissions.next() => {
                if let Some(submission) = submission {
                    debug!(seed = submission.seed, submitter = submission.submitter, "observed dkg result");
                    published = true;
                }
            },
            _ = context.sleep(self.config.result_publication_timeout) => {
                warn!(seed, "no dkg result published");
            },
        }
        subscription.unsubscribe();
        if published {
            if let Some((result, signatures)) = chain.last_dkg_result().await? {
                report.dkg_result = Some(result);
                report.dkg_result_signatures = Some(signatures);
            }
        }
        info!(
            seed,
            signers = report.signers.len(),
            failures = report.member_failures.len(),
            published = report.dkg_result.is_some(),
            "completed dkg test"
        );
        Ok(report)
    }
}

/// Run the reference protocol for a group of `group_size` members.
pub async fn run_test<E>(
    context: E,
    group_size: usize,
    threshold: usize,
    rules: Rules<dkg::local::Message>,
) -> Result<Report, Error>
where
    E: Spawner + Clock + Metrics + Rng + CryptoRng,
{
    Engine::new(
        Config::new(group_size, threshold, rules),
        dkg::local::Runner::default(),
    )
    .run(context)
    .await
}

//! Simulate group selection and key generation against local fixtures.
//!
//! Every staker commits the same stake to a local chain and competes for membership in a single
//! group. Once the roster is finalized, the selected stakers run the reference DKG to form the
//! group. The DKG test engine is then run on its own (optionally silencing one member) and its
//! report is logged.
//!
//! # Usage
//!
//! ```sh
//! cargo run --release --bin beacon-relay -- --stakers 5 --group-size 3 --threshold 2 --drop-member 3
//! ```

use beacon_chain::{
    local::{self, Chain},
    BlockCounter as _, DkgResults as _, StakerId,
};
use beacon_net::{
    interception::{Rule, Rules},
    local::Hub,
};
use beacon_relay::{
    config::{
        DEFAULT_BLOCK_TIME, DEFAULT_LEAD_BUFFER, DEFAULT_TICKET_REACTIVE_SUBMISSION_TIMEOUT_ARG,
        MINIMUM_STAKE_ARG,
    },
    dkg::{self, local::Message},
    dkgtest,
    node::{self, Node},
};
use clap::{value_parser, Arg, Command};
use commonware_cryptography::{ed25519, PrivateKeyExt as _, Signer as _};
use commonware_macros::select;
use commonware_runtime::{deterministic, Clock, Metrics, Runner, Spawner};
use commonware_utils::hex;
use futures::{channel::mpsc, StreamExt};
use rand::RngCore;
use tracing::{error, info, warn};

/// Number of blocks to wait for the selected group to publish its key.
const GROUP_FORMATION_BLOCKS: u32 = 40;

fn command() -> Command {
    Command::new("beacon-relay")
        .about("simulate group selection and distributed key generation")
        .arg(
            Arg::new("stakers")
                .long("stakers")
                .required(false)
                .default_value("5")
                .value_parser(value_parser!(u64))
                .help("Number of stakers competing for membership"),
        )
        .arg(
            Arg::new("group-size")
                .long("group-size")
                .required(false)
                .default_value("3")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("threshold")
                .long("threshold")
                .required(false)
                .default_value("2")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("minimum-stake")
                .long("minimum-stake")
                .required(false)
                .default_value(MINIMUM_STAKE_ARG)
                .value_parser(value_parser!(u128))
                .help("Stake required to generate a single ticket"),
        )
        .arg(
            Arg::new("stake")
                .long("stake")
                .required(false)
                .default_value("100")
                .value_parser(value_parser!(u128))
                .help("Stake committed by every staker"),
        )
        .arg(
            Arg::new("submission-timeout")
                .long("submission-timeout")
                .required(false)
                .default_value(DEFAULT_TICKET_REACTIVE_SUBMISSION_TIMEOUT_ARG)
                .value_parser(value_parser!(u64))
                .help("Number of blocks tickets may be submitted for"),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .required(false)
                .default_value("0")
                .value_parser(value_parser!(u64))
                .help("Seed of the simulation"),
        )
        .arg(
            Arg::new("drop-member")
                .long("drop-member")
                .required(false)
                .value_parser(value_parser!(u32))
                .help("Drop all messages sent by this member during the DKG test"),
        )
}

fn main() {
    // Parse arguments
    let matches = command().get_matches();
    let stakers = *matches.get_one::<u64>("stakers").expect("default provided");
    let group_size = *matches.get_one::<usize>("group-size").expect("default provided");
    let threshold = *matches.get_one::<usize>("threshold").expect("default provided");
    let minimum_stake = *matches
        .get_one::<u128>("minimum-stake")
        .expect("default provided");
    let stake = *matches.get_one::<u128>("stake").expect("default provided");
    let submission_timeout = *matches
        .get_one::<u64>("submission-timeout")
        .expect("default provided");
    let seed = *matches.get_one::<u64>("seed").expect("default provided");
    let drop_member = matches.get_one::<u32>("drop-member").copied();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    // Run simulation
    let executor = deterministic::Runner::seeded(seed);
    executor.start(|mut context| async move {
        let chain = Chain::connect_with_key(
            context.with_label("chain"),
            local::Config {
                group_size,
                threshold,
                minimum_stake,
                block_time: DEFAULT_BLOCK_TIME,
            },
            ed25519::PrivateKey::from_seed(seed),
        );
        let hub = Hub::new();
        let mut entry = [0u8; 32];
        context.fill_bytes(&mut entry);
        let start_height = chain
            .block_counter()
            .current_block()
            .expect("local chain is running");
        info!(entry = hex(&entry), start_height, "starting group selection");

        // Observe the group forming
        let group_seed = node::group_seed(&entry);
        let (forwarder, mut formed) = mpsc::unbounded();
        let subscription = chain.on_dkg_result_submitted(move |submission| {
            if submission.seed == group_seed {
                let _ = forwarder.unbounded_send(submission);
            }
        });

        // Run a round for every staker
        let mut nodes = Vec::new();
        let mut rounds = Vec::new();
        for index in 0..stakers {
            let key = ed25519::PrivateKey::from_seed(seed.wrapping_add(index + 1));
            let staker = StakerId::from_public_key(&key.public_key());
            chain.set_stake(staker, stake);
            chain.register_operator(key.public_key());
            let node = Node::new(
                context.with_label(&format!("staker_{index}")),
                node::Config {
                    threshold,
                    minimum_stake,
                    ticket_reactive_submission_timeout: submission_timeout,
                    member_lead_buffer: DEFAULT_LEAD_BUFFER,
                },
                staker,
                chain.clone(),
                hub.connect(key.public_key()),
                dkg::local::Runner::default(),
            );
            rounds.push(context.with_label("round").spawn({
                let node = node.clone();
                let chain = chain.clone();
                move |_| async move {
                    node.submit_tickets_for_group_selection(
                        chain.clone(),
                        chain.block_counter(),
                        local::Signing::new(key),
                        &entry,
                        start_height,
                    )
                    .await
                }
            }));
            nodes.push(node);
        }
        for (node, round) in nodes.iter().zip(rounds) {
            match round.await {
                Ok(Ok(selection)) => {
                    let positions = selection.positions(node.staker());
                    info!(staker = %node.staker(), ?positions, "group selection complete");
                }
                Ok(Err(err)) => error!(staker = %node.staker(), ?err, "group selection failed"),
                Err(err) => error!(staker = %node.staker(), ?err, "group selection aborted"),
            }
        }

        // Wait for the selected stakers to publish the group key
        select! {
            submission = formed.next() => {
                if let Some(submission) = submission {
                    info!(
                        submitter = submission.submitter,
                        block = submission.block_number,
                        group = hex(&submission.group_public_key),
                        "group formed"
                    );
                }
            },
            _ = context.sleep(DEFAULT_BLOCK_TIME * GROUP_FORMATION_BLOCKS) => {
                warn!("group not formed");
            },
        }
        subscription.unsubscribe();

        // Members register their signers once they observe publication
        context.sleep(DEFAULT_BLOCK_TIME).await;
        for node in &nodes {
            for signer in node.groups() {
                info!(staker = %node.staker(), member = signer.member(), "joined group");
            }
        }

        // Run the DKG test engine
        let mut rules = Rules::new();
        if let Some(member) = drop_member {
            rules = rules.with(Rule::drop(move |message: &Message| message.member() == member));
        }
        match dkgtest::run_test(context.with_label("dkgtest"), group_size, threshold, rules).await {
            Ok(report) => {
                info!(
                    published = report.dkg_result().is_some(),
                    signers = report.signers().len(),
                    failures = report.member_failures().len(),
                    "dkg test complete"
                );
                if let Some(result) = report.dkg_result() {
                    info!(
                        group = hex(&result.group_public_key),
                        inactive = ?result.inactive,
                        disqualified = ?result.disqualified,
                        "published dkg result"
                    );
                }
                for err in report.member_failures() {
                    warn!(?err, "member failed");
                }
            }
            Err(err) => error!(?err, "dkg test failed"),
        }
    });
}

//! Compete for group membership with stake-backed tickets and generate a group key.
//!
//! # Overview
//!
//! Every round of group formation starts from a random beacon entry. Each staker derives one
//! [groupselection::Ticket] per multiple of the minimum stake it has committed and submits those
//! tickets to the chain while the submission window is open. Once the window elapses, the chain
//! finalizes a roster made of the stakers holding the lowest tickets and the selected members run a
//! distributed key generation ([dkg]) protocol to produce a group public key and one signing share
//! per member.
//!
//! # Group Selection
//!
//! [node::Node] drives a single staker through the round:
//!
//! ```txt
//! Staking -> Generating -> Submitting -> AwaitingDeadline -> Resolving -> Dispatched
//! ```
//!
//! Ticket submission ([submission::submit_tickets]) runs in the background and is never awaited by
//! the deadline path. Per-ticket failures are reported but never advance the round. Only the block
//! height at which the submission window closes does. Once the roster is known, joining the group
//! is launched as a detached task whose outcome is not observed by the round.
//!
//! # DKG Test Engine
//!
//! [dkgtest] bootstraps a local chain and a broadcast network wrapped with fault injection rules,
//! runs every member of a group concurrently, and waits (for a bounded amount of time) for the
//! resulting group key to be published on the chain.
//!
//! # Status
//!
//! `beacon-relay` is **ALPHA** software and is not yet recommended for production use. Developers should
//! expect breaking changes and occasional instability.

pub mod config;
pub mod dkg;
pub mod dkgtest;
pub mod groupselection;
pub mod node;
pub mod submission;

#[cfg(test)]
mod mocks;

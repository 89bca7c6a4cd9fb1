//! Derive tickets from committed stake and describe the finalized roster.

use beacon_chain::StakerId;
use thiserror::Error;

mod ticket;
pub use ticket::{generate_tickets, Proof, Ticket, TicketValue};

/// Errors that can occur when generating tickets.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("minimum stake must be positive")]
    InvalidMinimumStake,
    #[error("insufficient stake: {0} < {1}")]
    InsufficientStake(u128, u128),
    #[error("too many virtual stakers: {0}")]
    TooManyVirtualStakers(u128),
}

/// Roster finalized by the chain once ticket submission has closed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selection {
    /// Selected stakers, in the order the chain ranked their tickets.
    ///
    /// A staker appears once per selected ticket.
    pub selected_stakers: Vec<StakerId>,
}

impl Selection {
    /// Return the positions (starting at 0) held by `staker`.
    pub fn positions(&self, staker: &StakerId) -> Vec<usize> {
        self.selected_stakers
            .iter()
            .enumerate()
            .filter(|(_, selected)| *selected == staker)
            .map(|(position, _)| position)
            .collect()
    }

    pub fn group_size(&self) -> usize {
        self.selected_stakers.len()
    }
}

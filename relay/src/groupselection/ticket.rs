use super::Error;
use beacon_chain::{StakerId, TicketProof};
use commonware_cryptography::{sha256::Digest, Hasher, Sha256};
use commonware_utils::hex;
use num_bigint::BigUint;
use std::fmt::{Debug, Display, Formatter};

/// Value of a [Ticket]. Smaller values are more competitive.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TicketValue(Digest);

impl TicketValue {
    /// Interpret the value as a big-endian unsigned integer.
    pub fn to_biguint(&self) -> BigUint {
        BigUint::from_bytes_be(self.0.as_ref())
    }
}

impl AsRef<[u8]> for TicketValue {
    fn as_ref(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl Display for TicketValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex(self.0.as_ref()))
    }
}

impl Debug for TicketValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

/// Data required to reproduce a [TicketValue] from a seed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Proof {
    pub staker_value: StakerId,

    /// Index of the virtual staker (starting at 1).
    pub virtual_staker_index: u32,
}

/// Bid for group membership.
///
/// Tickets order by value first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticket {
    pub value: TicketValue,
    pub proof: Proof,
}

impl Ticket {
    /// Derive the ticket of `staker`'s virtual staker `index` for `seed`.
    pub fn new(seed: &[u8], staker: StakerId, index: u32) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(seed);
        hasher.update(staker.as_ref());
        hasher.update(&index.to_be_bytes());
        Self {
            value: TicketValue(hasher.finalize()),
            proof: Proof {
                staker_value: staker,
                virtual_staker_index: index,
            },
        }
    }

    /// Return whether the value of the ticket was derived from `seed`.
    pub fn verify(&self, seed: &[u8]) -> bool {
        let expected = Self::new(seed, self.proof.staker_value, self.proof.virtual_staker_index);
        expected.value == self.value
    }
}

impl From<&Ticket> for beacon_chain::Ticket {
    fn from(ticket: &Ticket) -> Self {
        Self {
            value: ticket.value.to_biguint(),
            proof: TicketProof {
                staker_value: ticket.proof.staker_value.to_value(),
                virtual_staker_index: ticket.proof.virtual_staker_index,
            },
        }
    }
}

/// Generate all tickets `staker` may submit for `seed`, most competitive first.
///
/// `staker` controls one virtual staker per full `minimum_stake` in `available_stake`.
pub fn generate_tickets(
    seed: &[u8],
    staker: StakerId,
    available_stake: u128,
    minimum_stake: u128,
) -> Result<Vec<Ticket>, Error> {
    if minimum_stake == 0 {
        return Err(Error::InvalidMinimumStake);
    }
    if available_stake < minimum_stake {
        return Err(Error::InsufficientStake(available_stake, minimum_stake));
    }
    let virtual_stakers = available_stake / minimum_stake;
    let virtual_stakers =
        u32::try_from(virtual_stakers).map_err(|_| Error::TooManyVirtualStakers(virtual_stakers))?;

    let mut tickets: Vec<Ticket> = (1..=virtual_stakers)
        .map(|index| Ticket::new(seed, staker, index))
        .collect();
    tickets.sort();
    Ok(tickets)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEED: &[u8] = b"entry";

    fn staker() -> StakerId {
        StakerId::new([7; beacon_chain::STAKER_ID_LENGTH])
    }

    #[test]
    fn test_generate_tickets() {
        let tickets = generate_tickets(SEED, staker(), 100, 20).unwrap();
        assert_eq!(tickets.len(), 5);
        assert!(tickets.windows(2).all(|pair| pair[0].value < pair[1].value));
        let mut indices: Vec<u32> = tickets
            .iter()
            .map(|ticket| ticket.proof.virtual_staker_index)
            .collect();
        indices.sort();
        assert_eq!(indices, vec![1, 2, 3, 4, 5]);
        assert!(tickets.iter().all(|ticket| ticket.verify(SEED)));
    }

    #[test]
    fn test_partial_stake_ignored() {
        let tickets = generate_tickets(SEED, staker(), 59, 20).unwrap();
        assert_eq!(tickets.len(), 2);
    }

    #[test]
    fn test_insufficient_stake() {
        assert_eq!(
            generate_tickets(SEED, staker(), 10, 20),
            Err(Error::InsufficientStake(10, 20))
        );
        assert_eq!(
            generate_tickets(SEED, staker(), 10, 0),
            Err(Error::InvalidMinimumStake)
        );
    }

    #[test]
    fn test_too_many_virtual_stakers() {
        let stake = u128::from(u32::MAX) + 1;
        assert_eq!(
            generate_tickets(SEED, staker(), stake, 1),
            Err(Error::TooManyVirtualStakers(stake))
        );
    }

    #[test]
    fn test_verify_rejects_other_seed() {
        let ticket = Ticket::new(SEED, staker(), 1);
        assert!(ticket.verify(SEED));
        assert!(!ticket.verify(b"other"));

        let mut forged = ticket;
        forged.proof.virtual_staker_index = 2;
        assert!(!forged.verify(SEED));
    }

    #[test]
    fn test_wire_form() {
        let ticket = Ticket::new(SEED, staker(), 3);
        let wire = beacon_chain::Ticket::from(&ticket);
        assert_eq!(wire.value, BigUint::from_bytes_be(ticket.value.as_ref()));
        assert_eq!(
            StakerId::from_value(&wire.proof.staker_value),
            Some(staker())
        );
        assert_eq!(wire.proof.virtual_staker_index, 3);
    }
}

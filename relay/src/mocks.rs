use beacon_chain::{Error, Promise, StakerId, Ticket};
use commonware_runtime::Clock;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

type Failure = Arc<dyn Fn(&Ticket) -> bool + Send + Sync>;

/// [beacon_chain::GroupSelection] that records every ticket it is handed.
#[derive(Clone)]
pub struct Relay<E: Clock> {
    context: E,

    /// Time taken to hand a ticket to the chain.
    dispatch: Duration,

    /// Tickets rejected with [Error::InvalidTicket].
    failure: Failure,

    attempts: Arc<Mutex<Vec<Ticket>>>,
}

impl<E: Clock> Relay<E> {
    pub fn new(context: E, dispatch: Duration) -> Self {
        Self {
            context,
            dispatch,
            failure: Arc::new(|_| false),
            attempts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_failures(mut self, failure: impl Fn(&Ticket) -> bool + Send + Sync + 'static) -> Self {
        self.failure = Arc::new(failure);
        self
    }

    /// Tickets for which submission started.
    pub fn attempts(&self) -> Vec<Ticket> {
        self.attempts.lock().unwrap().clone()
    }
}

impl<E: Clock> beacon_chain::GroupSelection for Relay<E> {
    async fn submit_ticket(&self, ticket: Ticket) -> Promise {
        self.attempts.lock().unwrap().push(ticket.clone());
        self.context.sleep(self.dispatch).await;
        if (self.failure)(&ticket) {
            return Promise::ready(Err(Error::InvalidTicket));
        }
        Promise::ready(Ok(()))
    }

    async fn selected_participants(&self) -> Result<Vec<StakerId>, Error> {
        Ok(Vec::new())
    }
}

/// [beacon_chain::StakeMonitor] with a fixed stake registry.
#[derive(Clone, Default)]
pub struct StakeMonitor {
    stakes: Arc<Mutex<HashMap<StakerId, u128>>>,
}

impl StakeMonitor {
    pub fn set_stake(&self, staker: StakerId, amount: u128) {
        self.stakes.lock().unwrap().insert(staker, amount);
    }
}

impl beacon_chain::StakeMonitor for StakeMonitor {
    async fn stake(&self, staker: &StakerId) -> Result<u128, Error> {
        self.stakes
            .lock()
            .unwrap()
            .get(staker)
            .copied()
            .ok_or(Error::UnknownStaker(*staker))
    }
}

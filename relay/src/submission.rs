//! Push tickets to the chain until told to stop.

use crate::groupselection::Ticket;
use beacon_chain::{Error, GroupSelection};
use futures::{
    channel::mpsc::{self, TryRecvError},
    stream::{FuturesUnordered, StreamExt},
    FutureExt,
};
use tracing::{debug, trace};

/// Submit `tickets` in order, checking `quit` before each submission.
///
/// Once `quit` is signaled (or its sender is dropped), no further tickets are submitted. Tickets
/// already handed to the chain are not withdrawn: the coordinator still waits for their
/// confirmation so that every failure is reported.
///
/// Failures are reported on `errors` without waiting. `errors` should have capacity for one
/// report per ticket. If it is full or closed, reports are dropped rather than stalling
/// submission.
pub async fn submit_tickets<R: GroupSelection>(
    tickets: Vec<Ticket>,
    relay: &R,
    mut quit: mpsc::Receiver<()>,
    mut errors: mpsc::Sender<Error>,
) {
    let total = tickets.len();
    let mut pending = FuturesUnordered::new();
    let mut submitted = 0;
    for ticket in tickets {
        // A closed channel means the round is gone
        if !matches!(quit.try_recv(), Err(TryRecvError::Empty)) {
            debug!(submitted, total, "stopped ticket submission");
            break;
        }

        trace!(value = %ticket.value, index = ticket.proof.virtual_staker_index, "submitting ticket");
        pending.push(relay.submit_ticket((&ticket).into()).await);
        submitted += 1;

        // Report confirmations that already arrived
        while let Some(Some(result)) = pending.next().now_or_never() {
            report(&mut errors, result);
        }
    }

    while let Some(result) = pending.next().await {
        report(&mut errors, result);
    }
    trace!(submitted, total, "ticket submission complete");
}

fn report(errors: &mut mpsc::Sender<Error>, result: Result<(), Error>) {
    if let Err(err) = result {
        if errors.try_send(err).is_err() {
            debug!("dropped ticket submission error");
        }
    }
}

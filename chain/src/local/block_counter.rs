use crate::Error;
use futures::channel::oneshot;
use std::sync::{Arc, Mutex};

struct State {
    height: u64,
    waiters: Vec<(u64, oneshot::Sender<u64>)>,
}

/// [crate::BlockCounter] advanced by the local chain's block ticker.
#[derive(Clone)]
pub struct BlockCounter {
    state: Arc<Mutex<State>>,
}

impl BlockCounter {
    pub(super) fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                height: 0,
                waiters: Vec::new(),
            })),
        }
    }

    pub(super) fn height(&self) -> u64 {
        self.state.lock().unwrap().height
    }

    /// Produce a new block, notifying all waiters that are now satisfied.
    pub(super) fn advance(&self) -> u64 {
        let mut state = self.state.lock().unwrap();
        state.height += 1;
        let height = state.height;
        let waiters = std::mem::take(&mut state.waiters);
        for (target, sender) in waiters {
            if target <= height {
                let _ = sender.send(height);
            } else if !sender.is_canceled() {
                state.waiters.push((target, sender));
            }
        }
        height
    }
}

impl crate::BlockCounter for BlockCounter {
    fn current_block(&self) -> Result<u64, Error> {
        Ok(self.height())
    }

    fn block_height_waiter(&self, height: u64) -> Result<oneshot::Receiver<u64>, Error> {
        let (sender, receiver) = oneshot::channel();
        let mut state = self.state.lock().unwrap();
        if height <= state.height {
            let _ = sender.send(state.height);
        } else {
            state.waiters.push((height, sender));
        }
        Ok(receiver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BlockCounter as _;
    use futures::FutureExt;

    #[test]
    fn test_waiter_fires_at_height() {
        let counter = BlockCounter::new();
        let mut waiter = counter.block_height_waiter(2).unwrap();
        assert_eq!(counter.advance(), 1);
        assert!(waiter.try_recv().unwrap().is_none());
        assert_eq!(counter.advance(), 2);
        assert_eq!(waiter.now_or_never(), Some(Ok(2)));
    }

    #[test]
    fn test_waiter_for_past_height() {
        let counter = BlockCounter::new();
        counter.advance();
        counter.advance();
        let waiter = counter.block_height_waiter(1).unwrap();
        assert_eq!(waiter.now_or_never(), Some(Ok(2)));
        assert_eq!(counter.current_block().unwrap(), 2);
    }

    #[test]
    fn test_canceled_waiters_are_pruned() {
        let counter = BlockCounter::new();
        let waiter = counter.block_height_waiter(10).unwrap();
        drop(waiter);
        counter.advance();
        assert!(counter.state.lock().unwrap().waiters.is_empty());
    }
}

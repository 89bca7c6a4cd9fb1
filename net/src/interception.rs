//! Drop, mutate, or delay outbound messages.
//!
//! [Network] wraps any [crate::Provider] and evaluates its [Rules] against every payload sent on
//! a channel it returns. The first rule whose predicate matches decides the fate of the
//! payload. Payloads matching no rule are sent unchanged.
//!
//! # Example
//!
//! ```rust
//! use beacon_net::{interception::{Network, Rule, Rules}, local, Channel, Provider};
//! use commonware_cryptography::{ed25519, PrivateKeyExt, Signer};
//! use commonware_runtime::{deterministic, Runner};
//!
//! let executor = deterministic::Runner::default();
//! executor.start(|context| async move {
//!     let key = ed25519::PrivateKey::from_seed(0).public_key();
//!     let rules = Rules::new().with(Rule::drop(|value: &u32| *value == 1));
//!     let network = Network::new(context, local::Network::connect_with_key(key), rules);
//!     let channel = network.channel_for("dkg").unwrap();
//!     let mut inbox = channel.subscribe();
//!     channel.send(1).unwrap();
//!     channel.send(2).unwrap();
//!     assert_eq!(inbox.try_recv().unwrap().payload, 2);
//! });
//! ```

use crate::Error;
use commonware_runtime::{Clock, Metrics, Spawner};
use futures::channel::mpsc;
use std::{sync::Arc, time::Duration};
use tracing::debug;

type Predicate<M> = Arc<dyn Fn(&M) -> bool + Send + Sync>;

type Mutation<M> = Arc<dyn Fn(M) -> M + Send + Sync>;

/// What to do with a matching payload.
pub enum Action<M> {
    /// Never deliver the payload.
    Drop,

    /// Deliver the output of the mutation instead of the payload.
    Mutate(Mutation<M>),

    /// Deliver the payload after the given duration.
    Delay(Duration),
}

impl<M> Clone for Action<M> {
    fn clone(&self) -> Self {
        match self {
            Self::Drop => Self::Drop,
            Self::Mutate(mutation) => Self::Mutate(mutation.clone()),
            Self::Delay(duration) => Self::Delay(*duration),
        }
    }
}

/// Pair of a predicate and the [Action] applied to payloads it matches.
pub struct Rule<M> {
    predicate: Predicate<M>,
    action: Action<M>,
}

impl<M> Clone for Rule<M> {
    fn clone(&self) -> Self {
        Self {
            predicate: self.predicate.clone(),
            action: self.action.clone(),
        }
    }
}

impl<M> Rule<M> {
    pub fn new(predicate: impl Fn(&M) -> bool + Send + Sync + 'static, action: Action<M>) -> Self {
        Self {
            predicate: Arc::new(predicate),
            action,
        }
    }

    pub fn drop(predicate: impl Fn(&M) -> bool + Send + Sync + 'static) -> Self {
        Self::new(predicate, Action::Drop)
    }

    pub fn mutate(
        predicate: impl Fn(&M) -> bool + Send + Sync + 'static,
        mutation: impl Fn(M) -> M + Send + Sync + 'static,
    ) -> Self {
        Self::new(predicate, Action::Mutate(Arc::new(mutation)))
    }

    pub fn delay(predicate: impl Fn(&M) -> bool + Send + Sync + 'static, duration: Duration) -> Self {
        Self::new(predicate, Action::Delay(duration))
    }

    pub fn matches(&self, payload: &M) -> bool {
        (self.predicate)(payload)
    }

    pub fn action(&self) -> &Action<M> {
        &self.action
    }
}

/// Ordered list of [Rule]s.
pub struct Rules<M>(Vec<Rule<M>>);

impl<M> Default for Rules<M> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<M> Clone for Rules<M> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<M> Rules<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `rule`, evaluated after all rules already present.
    pub fn with(mut self, rule: Rule<M>) -> Self {
        self.0.push(rule);
        self
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Return the action of the first rule matching `payload`.
    pub fn evaluate(&self, payload: &M) -> Option<&Action<M>> {
        self.0
            .iter()
            .find(|rule| rule.matches(payload))
            .map(Rule::action)
    }
}

/// [crate::Provider] that applies [Rules] to all outbound payloads.
pub struct Network<E, P: crate::Provider> {
    context: E,
    inner: P,
    rules: Rules<P::Message>,
}

impl<E: Clone, P: crate::Provider> Clone for Network<E, P> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
            inner: self.inner.clone(),
            rules: self.rules.clone(),
        }
    }
}

impl<E: Spawner + Clock + Metrics, P: crate::Provider> Network<E, P> {
    pub fn new(context: E, inner: P, rules: Rules<P::Message>) -> Self {
        Self {
            context,
            inner,
            rules,
        }
    }
}

impl<E: Spawner + Clock + Metrics, P: crate::Provider> crate::Provider for Network<E, P> {
    type Message = P::Message;
    type Channel = Channel<E, P::Channel>;

    fn channel_for(&self, name: &str) -> Result<Self::Channel, Error> {
        Ok(Channel {
            context: self.context.clone(),
            inner: self.inner.channel_for(name)?,
            rules: self.rules.clone(),
        })
    }
}

/// [crate::Channel] returned by [Network].
pub struct Channel<E, C: crate::Channel> {
    context: E,
    inner: C,
    rules: Rules<C::Message>,
}

impl<E: Clone, C: crate::Channel> Clone for Channel<E, C> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
            inner: self.inner.clone(),
            rules: self.rules.clone(),
        }
    }
}

impl<E: Spawner + Clock + Metrics, C: crate::Channel> crate::Channel for Channel<E, C> {
    type Message = C::Message;

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn send(&self, payload: Self::Message) -> Result<(), Error> {
        match self.rules.evaluate(&payload) {
            None => self.inner.send(payload),
            Some(Action::Drop) => {
                debug!(channel = self.inner.name(), "dropped message");
                Ok(())
            }
            Some(Action::Mutate(mutation)) => {
                debug!(channel = self.inner.name(), "mutated message");
                self.inner.send(mutation(payload))
            }
            Some(Action::Delay(duration)) => {
                let duration = *duration;
                let inner = self.inner.clone();
                self.context
                    .with_label("delay")
                    .spawn(move |context| async move {
                        context.sleep(duration).await;
                        if let Err(err) = inner.send(payload) {
                            debug!(?err, channel = inner.name(), "failed to send delayed message");
                        }
                    });
                Ok(())
            }
        }
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<crate::Message<Self::Message>> {
        self.inner.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{local, Channel as _, Provider as _};
    use commonware_cryptography::{ed25519, PrivateKeyExt as _, Signer as _};
    use commonware_macros::test_traced;
    use commonware_runtime::{deterministic, Runner};
    use futures::StreamExt;

    fn network(
        context: deterministic::Context,
        rules: Rules<u32>,
    ) -> Network<deterministic::Context, local::Network<u32>> {
        let key = ed25519::PrivateKey::from_seed(0).public_key();
        Network::new(context, local::Network::connect_with_key(key), rules)
    }

    #[test_traced]
    fn test_first_matching_rule_wins() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let rules = Rules::new()
                .with(Rule::mutate(|value: &u32| *value > 10, |value| value * 2))
                .with(Rule::drop(|value: &u32| *value > 5));
            let channel = network(context, rules).channel_for("dkg").unwrap();
            let mut inbox = channel.subscribe();

            channel.send(1).unwrap();
            channel.send(7).unwrap();
            channel.send(20).unwrap();

            assert_eq!(inbox.next().await.unwrap().payload, 1);
            assert_eq!(inbox.next().await.unwrap().payload, 40);
            assert!(inbox.try_recv().is_err());
        });
    }

    #[test_traced]
    fn test_delayed_delivery() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let delay = Duration::from_secs(2);
            let rules = Rules::new().with(Rule::delay(|value: &u32| *value == 1, delay));
            let channel = network(context.clone(), rules).channel_for("dkg").unwrap();
            let mut inbox = channel.subscribe();

            let start = context.current();
            channel.send(1).unwrap();
            channel.send(2).unwrap();

            // Undelayed messages overtake delayed ones
            assert_eq!(inbox.next().await.unwrap().payload, 2);
            assert_eq!(inbox.next().await.unwrap().payload, 1);
            assert!(context.current().duration_since(start).unwrap() >= delay);
        });
    }

    #[test]
    fn test_no_rules() {
        let rules = Rules::<u32>::new();
        assert!(rules.is_empty());
        assert!(rules.evaluate(&1).is_none());
        let rules = rules.with(Rule::drop(|_| true));
        assert_eq!(rules.len(), 1);
        assert!(matches!(rules.evaluate(&1), Some(Action::Drop)));
    }
}

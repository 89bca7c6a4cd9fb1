//! Broadcast messages to group members with configurable fault injection.
//!
//! Members of a group exchange protocol messages over a named [Channel] obtained from a
//! [Provider]. Every message sent on a channel is delivered to all subscribers that are live
//! at the time of sending (including the sender). Messages sent before a subscriber joins are
//! never replayed.
//!
//! [local] connects providers within a single process and [interception] wraps any provider
//! with rules that drop, mutate, or delay outbound messages.
//!
//! # Status
//!
//! `beacon-net` is **ALPHA** software and is not yet recommended for production use. Developers should
//! expect breaking changes and occasional instability.

use commonware_cryptography::ed25519;
use futures::channel::mpsc;
use thiserror::Error;

pub mod interception;
pub mod local;

/// Key identifying the sender of a [Message].
pub type PublicKey = ed25519::PublicKey;

/// Errors that can occur when interacting with the network.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid channel name: {0:?}")]
    InvalidChannelName(String),
    #[error("network closed")]
    Closed,
}

/// Message received from a [Channel].
#[derive(Clone, Debug)]
pub struct Message<M> {
    pub sender: PublicKey,
    pub payload: M,
}

/// Source of named broadcast channels.
pub trait Provider: Clone + Send + Sync + 'static {
    /// Type of payload carried by channels.
    type Message: Clone + Send + Sync + 'static;

    /// Type of channel returned by [Provider::channel_for].
    type Channel: Channel<Message = Self::Message>;

    /// Return the channel named `name`.
    ///
    /// All handles for the same name (across providers on the same network) share subscribers.
    fn channel_for(&self, name: &str) -> Result<Self::Channel, Error>;
}

/// Named broadcast channel.
pub trait Channel: Clone + Send + Sync + 'static {
    /// Type of payload carried by the channel.
    type Message: Clone + Send + Sync + 'static;

    fn name(&self) -> &str;

    /// Broadcast `payload` to all live subscribers.
    fn send(&self, payload: Self::Message) -> Result<(), Error>;

    /// Receive all messages sent from now on.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<Message<Self::Message>>;
}

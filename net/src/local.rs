//! Connect providers within a single process.

use crate::{Error, Message, PublicKey};
use futures::channel::mpsc;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use tracing::trace;

type Subscribers<M> = Arc<Mutex<Vec<mpsc::UnboundedSender<Message<M>>>>>;

/// Registry of channels shared by all providers connected to it.
pub struct Hub<M> {
    channels: Arc<Mutex<HashMap<String, Subscribers<M>>>>,
}

impl<M> Clone for Hub<M> {
    fn clone(&self) -> Self {
        Self {
            channels: self.channels.clone(),
        }
    }
}

impl<M> Default for Hub<M> {
    fn default() -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<M: Clone + Send + Sync + 'static> Hub<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect a provider that sends as `public_key`.
    pub fn connect(&self, public_key: PublicKey) -> Network<M> {
        Network {
            public_key,
            hub: self.clone(),
        }
    }

    fn subscribers(&self, name: &str) -> Subscribers<M> {
        self.channels
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .clone()
    }
}

/// [crate::Provider] connected to a [Hub].
pub struct Network<M> {
    public_key: PublicKey,
    hub: Hub<M>,
}

impl<M> Clone for Network<M> {
    fn clone(&self) -> Self {
        Self {
            public_key: self.public_key.clone(),
            hub: self.hub.clone(),
        }
    }
}

impl<M: Clone + Send + Sync + 'static> Network<M> {
    /// Connect a provider to a new [Hub].
    pub fn connect_with_key(public_key: PublicKey) -> Self {
        Hub::new().connect(public_key)
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }
}

impl<M: Clone + Send + Sync + 'static> crate::Provider for Network<M> {
    type Message = M;
    type Channel = Channel<M>;

    fn channel_for(&self, name: &str) -> Result<Self::Channel, Error> {
        if name.is_empty() {
            return Err(Error::InvalidChannelName(name.to_string()));
        }
        Ok(Channel {
            name: name.to_string(),
            sender: self.public_key.clone(),
            subscribers: self.hub.subscribers(name),
        })
    }
}

/// [crate::Channel] served by a [Hub].
pub struct Channel<M> {
    name: String,
    sender: PublicKey,
    subscribers: Subscribers<M>,
}

impl<M> Clone for Channel<M> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            sender: self.sender.clone(),
            subscribers: self.subscribers.clone(),
        }
    }
}

impl<M: Clone + Send + Sync + 'static> crate::Channel for Channel<M> {
    type Message = M;

    fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, payload: M) -> Result<(), Error> {
        let message = Message {
            sender: self.sender.clone(),
            payload,
        };
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|subscriber| subscriber.unbounded_send(message.clone()).is_ok());
        trace!(channel = %self.name, recipients = subscribers.len(), "sent message");
        Ok(())
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<Message<M>> {
        let (sender, receiver) = mpsc::unbounded();
        self.subscribers.lock().unwrap().push(sender);
        receiver
    }
}

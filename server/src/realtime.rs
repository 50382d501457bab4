//! Per-channel fan-out of newly stored messages to live subscribers.
//!
//! Publishing happens while the channel's sequencer lock is held, so each
//! subscriber observes one channel's messages in read order. Delivery is
//! at-least-once from the consumer's point of view: a reconnecting client
//! replays history and must drop ids it already rendered (`SeenMessages`).

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, trace};

use crate::types::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

/// A live subscription; dropping the receiver is enough for the hub to prune it
/// on the next publish, but `Hub::unsubscribe` removes it eagerly.
pub struct Subscription {
    pub handle: SubscriptionHandle,
    pub channel_id: String,
    pub receiver: mpsc::UnboundedReceiver<Message>,
}

#[derive(Default)]
struct HubState {
    by_channel: HashMap<String, HashMap<SubscriptionHandle, mpsc::UnboundedSender<Message>>>,
    channel_of: HashMap<SubscriptionHandle, String>,
}

#[derive(Default)]
pub struct Hub {
    state: Mutex<HubState>,
    next_handle: AtomicU64,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, channel_id: &str) -> Subscription {
        let (tx, receiver) = mpsc::unbounded_channel();
        let handle = self.subscribe_sender(channel_id, tx).await;
        Subscription {
            handle,
            channel_id: channel_id.to_string(),
            receiver,
        }
    }

    /// Attaches an existing sender, letting one consumer multiplex several channels.
    pub async fn subscribe_sender(
        &self,
        channel_id: &str,
        sender: mpsc::UnboundedSender<Message>,
    ) -> SubscriptionHandle {
        let handle = SubscriptionHandle(self.next_handle.fetch_add(1, Ordering::Relaxed) + 1);
        let mut state = self.state.lock().await;
        state
            .by_channel
            .entry(channel_id.to_string())
            .or_default()
            .insert(handle, sender);
        state.channel_of.insert(handle, channel_id.to_string());
        trace!(channel_id, handle = handle.0, "subscribed");
        handle
    }

    pub async fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let mut state = self.state.lock().await;
        let Some(channel_id) = state.channel_of.remove(&handle) else {
            return false;
        };
        if let Some(subscribers) = state.by_channel.get_mut(&channel_id) {
            subscribers.remove(&handle);
            if subscribers.is_empty() {
                state.by_channel.remove(&channel_id);
            }
        }
        trace!(channel_id = %channel_id, handle = handle.0, "unsubscribed");
        true
    }

    /// Delivers `message` to every subscriber of its channel. Returns the number reached.
    pub async fn publish(&self, message: &Message) -> usize {
        let mut state = self.state.lock().await;
        let Some(subscribers) = state.by_channel.get_mut(&message.channel_id) else {
            return 0;
        };

        let mut closed = Vec::new();
        let mut delivered = 0;
        for (handle, sender) in subscribers.iter() {
            if sender.send(message.clone()).is_ok() {
                delivered += 1;
            } else {
                closed.push(*handle);
            }
        }
        for handle in &closed {
            subscribers.remove(handle);
        }
        if subscribers.is_empty() {
            state.by_channel.remove(&message.channel_id);
        }
        for handle in closed {
            state.channel_of.remove(&handle);
        }
        debug!(channel_id = %message.channel_id, message_id = %message.id, delivered, "published");
        delivered
    }

    pub async fn subscriber_count(&self, channel_id: &str) -> usize {
        let state = self.state.lock().await;
        state.by_channel.get(channel_id).map_or(0, HashMap::len)
    }
}

/// The set of channels one consumer currently follows, all feeding one sender.
pub struct Watch {
    sender: mpsc::UnboundedSender<Message>,
    handles: Vec<SubscriptionHandle>,
    channels: Vec<String>,
}

impl Watch {
    pub fn new(sender: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            sender,
            handles: Vec::new(),
            channels: Vec::new(),
        }
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    /// Swaps the watched set. Old subscriptions are closed before new ones open.
    pub async fn replace(&mut self, hub: &Hub, channel_ids: Vec<String>) {
        self.clear(hub).await;
        let mut unique = HashSet::new();
        for channel_id in channel_ids {
            if !unique.insert(channel_id.clone()) {
                continue;
            }
            let handle = hub.subscribe_sender(&channel_id, self.sender.clone()).await;
            self.handles.push(handle);
            self.channels.push(channel_id);
        }
    }

    pub async fn clear(&mut self, hub: &Hub) {
        for handle in self.handles.drain(..) {
            hub.unsubscribe(handle).await;
        }
        self.channels.clear();
    }
}

/// Bounded memory of rendered message ids used to drop redeliveries.
#[derive(Debug)]
pub struct SeenMessages {
    ids: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl Default for SeenMessages {
    fn default() -> Self {
        Self::with_capacity(1024)
    }
}

impl SeenMessages {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ids: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// True the first time `id` is offered.
    pub fn first_sighting(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        self.ids.insert(id.to_string());
        self.order.push_back(id.to_string());
        true
    }
}

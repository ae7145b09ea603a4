// SPDX-License-Identifier: CEPL-1.0
//! Single-threaded event fan-out.
//!
//! Subscribers are addressed by a [`Subscription`] key owned by whoever
//! subscribed. Publishing copies the event into every live mailbox; each
//! subscriber drains its own mailbox when it is ready to act, so no handler
//! ever runs inside `publish`.

use slotmap::{new_key_type, SlotMap};
use std::collections::VecDeque;
use tracing::trace;

new_key_type! {
    /// Handle returned by [`EventBus::subscribe`].
    pub struct Subscription;
}

pub struct EventBus<E> {
    mailboxes: SlotMap<Subscription, VecDeque<E>>,
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self {
            mailboxes: SlotMap::with_key(),
        }
    }
}

impl<E: Clone> EventBus<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self) -> Subscription {
        self.mailboxes.insert(VecDeque::new())
    }

    /// Returns false if the key was already gone.
    pub fn unsubscribe(&mut self, key: Subscription) -> bool {
        self.mailboxes.remove(key).is_some()
    }

    pub fn publish(&mut self, event: E) {
        trace!("event fan-out to {} subscriber(s)", self.mailboxes.len());
        for (_, mailbox) in self.mailboxes.iter_mut() {
            mailbox.push_back(event.clone());
        }
    }

    /// Takes every pending event for `key`, oldest first. Unknown keys
    /// yield nothing.
    pub fn drain(&mut self, key: Subscription) -> Vec<E> {
        self.mailboxes
            .get_mut(key)
            .map(|mailbox| mailbox.drain(..).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.mailboxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mailboxes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_reaches_every_subscriber() {
        let mut bus = EventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();

        bus.publish(7u32);
        bus.publish(9u32);

        assert_eq!(bus.drain(a), vec![7, 9]);
        assert_eq!(bus.drain(b), vec![7, 9]);
    }

    #[test]
    fn drain_empties_the_mailbox() {
        let mut bus = EventBus::new();
        let a = bus.subscribe();
        bus.publish("resize");

        assert_eq!(bus.drain(a).len(), 1);
        assert!(bus.drain(a).is_empty());
    }

    #[test]
    fn events_before_subscribing_are_not_delivered() {
        let mut bus = EventBus::new();
        bus.publish(1u8);
        let late = bus.subscribe();
        assert!(bus.drain(late).is_empty());
    }

    #[test]
    fn unsubscribed_key_is_inert() {
        let mut bus = EventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();

        assert!(bus.unsubscribe(a));
        assert!(!bus.unsubscribe(a));
        assert_eq!(bus.len(), 1);

        bus.publish(3i32);
        assert!(bus.drain(a).is_empty());
        assert_eq!(bus.drain(b), vec![3]);
    }

    #[test]
    fn stale_key_does_not_alias_a_new_subscriber() {
        let mut bus = EventBus::new();
        let old = bus.subscribe();
        bus.unsubscribe(old);
        let fresh = bus.subscribe();

        bus.publish(5u16);
        assert!(bus.drain(old).is_empty());
        assert_eq!(bus.drain(fresh), vec![5]);
    }
}

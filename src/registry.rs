//! Subscription registry
//!
//! Maps topic identifiers to ordered lists of subscriptions behind a
//! single lock. Every structural mutation and every dispatch snapshot goes
//! through that lock; handler code never runs while it is held.

use crate::callback::Callback;
use crate::error::{DispatchError, Result};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// How a subscription is delivered by `emit`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Delivery {
    /// On the emitting thread
    #[default]
    Sync,
    /// Through the bus executor
    Async,
}

/// A registered handler: callback plus its once/repeat disposition
#[derive(Debug, Clone)]
pub struct Subscription {
    id: Uuid,
    callback: Callback,
    once: bool,
    delivery: Delivery,
}

impl Subscription {
    pub fn new(callback: Callback, once: bool, delivery: Delivery) -> Self {
        Self {
            id: Uuid::new_v4(),
            callback,
            once,
            delivery,
        }
    }

    /// Unique id assigned at registration
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn callback(&self) -> &Callback {
        &self.callback
    }

    /// Whether the subscription is removed after its first invocation
    pub fn is_once(&self) -> bool {
        self.once
    }

    pub fn delivery(&self) -> Delivery {
        self.delivery
    }
}

/// Topic → ordered subscriptions
///
/// A topic whose list becomes empty is removed from the map, so an
/// emptied topic is indistinguishable from one never subscribed.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    topics: Mutex<HashMap<String, Vec<Subscription>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Subscription>>> {
        // User code never runs under this lock, so a poisoned guard still
        // holds a consistent map.
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a subscription to the topic
    pub fn insert(&self, topic: &str, subscription: Subscription) {
        self.lock()
            .entry(topic.to_string())
            .or_default()
            .push(subscription);
    }

    /// Copy of the topic's subscriptions in registration order
    pub fn snapshot(&self, topic: &str) -> Vec<Subscription> {
        self.lock().get(topic).cloned().unwrap_or_default()
    }

    /// Remove the subscription at `index`, shifting later ones down
    pub fn remove_by_index(&self, topic: &str, index: usize) -> Option<Subscription> {
        let mut topics = self.lock();
        let subs = topics.get_mut(topic)?;
        if index >= subs.len() {
            return None;
        }
        let removed = subs.remove(index);
        if subs.is_empty() {
            topics.remove(topic);
        }
        Some(removed)
    }

    /// Remove subscription `id`, expected at `index`
    ///
    /// Falls back to a search by id when the list has shifted since the
    /// snapshot that produced `index`. Returns `None` if `id` is gone.
    pub fn remove_subscription(
        &self,
        topic: &str,
        index: usize,
        id: Uuid,
    ) -> Option<Subscription> {
        let mut topics = self.lock();
        let subs = topics.get_mut(topic)?;
        let position = match subs.get(index) {
            Some(sub) if sub.id == id => index,
            _ => subs.iter().position(|sub| sub.id == id)?,
        };
        let removed = subs.remove(position);
        if subs.is_empty() {
            topics.remove(topic);
        }
        Some(removed)
    }

    /// Remove every subscription wrapping the same callable as `callback`
    ///
    /// Returns the number removed. Zero matches on a non-empty topic is
    /// not an error.
    pub fn remove_by_identity(&self, topic: &str, callback: &Callback) -> Result<usize> {
        let mut topics = self.lock();
        let subs = topics
            .get_mut(topic)
            .filter(|subs| !subs.is_empty())
            .ok_or_else(|| DispatchError::no_handlers(topic))?;

        let before = subs.len();
        subs.retain(|sub| !sub.callback.same_callable(callback));
        let removed = before - subs.len();
        if subs.is_empty() {
            topics.remove(topic);
        }
        Ok(removed)
    }

    /// Remove every subscription on the topic, returning how many there were
    pub fn clear(&self, topic: &str) -> Result<usize> {
        match self.lock().remove(topic) {
            Some(subs) if !subs.is_empty() => Ok(subs.len()),
            _ => Err(DispatchError::no_handlers(topic)),
        }
    }

    pub fn handler_count(&self, topic: &str) -> usize {
        self.lock().get(topic).map_or(0, Vec::len)
    }

    pub fn has_handlers(&self, topic: &str) -> bool {
        self.handler_count(topic) > 0
    }

    /// Topics with at least one subscription, sorted
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .lock()
            .iter()
            .filter(|(_, subs)| !subs.is_empty())
            .map(|(topic, _)| topic.clone())
            .collect();
        topics.sort();
        topics
    }
}

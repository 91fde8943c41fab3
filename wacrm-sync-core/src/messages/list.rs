//! Ordered, id-indexed message list
//!
//! Messages are stored in a `BTreeMap` keyed by `(timestamp_ms, seq)` where
//! `seq` is a per-list insertion counter, so equal timestamps keep their
//! arrival order and a merge never reshuffles existing entries. A side index
//! maps message ids to their slot, which makes duplicate detection O(1).
//!
//! Reconciliation keeps the provisional entry's `seq`: the confirmed message
//! lands in the same position unless its server timestamp moves it past a
//! neighbour, in which case the timestamp ordering wins.

use crate::model::{DeliveryState, Message};
use std::collections::{BTreeMap, HashMap};

type SlotKey = (i64, u64);

/// Result of inserting a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// New message added
    Inserted,
    /// Id already present, nothing changed
    Duplicate,
    /// Id already present, its delivery state advanced
    Updated,
}

/// Result of replacing a provisional message with its confirmed copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Provisional entry replaced in place
    Replaced,
    /// The confirmed copy was already present; the provisional entry was folded into it
    Merged,
    /// The temp id was reconciled earlier
    AlreadyReconciled,
    /// Neither the provisional entry nor a reconciled copy exists
    Missing,
}

/// Messages of one conversation in display order
#[derive(Debug, Default, Clone)]
pub struct MessageList {
    slots: BTreeMap<SlotKey, Message>,
    index: HashMap<String, SlotKey>,
    next_seq: u64,
}

impl MessageList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.index.get(id).and_then(|key| self.slots.get(key))
    }

    /// Messages oldest-first
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.slots.values()
    }

    /// Sorted snapshot for consumers
    pub fn to_vec(&self) -> Vec<Message> {
        self.slots.values().cloned().collect()
    }

    /// Display index of a message
    pub fn position(&self, id: &str) -> Option<usize> {
        let key = self.index.get(id)?;
        Some(self.slots.range(..*key).count())
    }

    /// Newest message
    pub fn newest(&self) -> Option<&Message> {
        self.slots.values().next_back()
    }

    /// Oldest message that carries a server id
    pub fn oldest_confirmed(&self) -> Option<&Message> {
        self.slots.values().find(|m| !m.is_provisional())
    }

    /// Provisional entry for a temp id, if still unreconciled
    pub fn provisional(&self, client_temp_id: &str) -> Option<&Message> {
        self.get(client_temp_id).filter(|m| m.is_provisional())
    }

    /// Whether the message with `id` was already matched to an optimistic send
    pub fn is_claimed(&self, id: &str) -> bool {
        self.get(id)
            .map(|m| m.client_temp_id.is_some())
            .unwrap_or(false)
    }

    /// Confirmed message that replaced the provisional entry `client_temp_id`
    pub fn confirmed_copy(&self, client_temp_id: &str) -> Option<&Message> {
        self.slots
            .values()
            .rev()
            .find(|m| !m.is_provisional() && m.client_temp_id.as_deref() == Some(client_temp_id))
    }

    /// Insert a message, ignoring ids that are already present
    pub fn insert(&mut self, message: Message) -> InsertOutcome {
        if let Some(key) = self.index.get(&message.id) {
            if let Some(existing) = self.slots.get_mut(key) {
                let advanced = existing.delivery_state.advance(message.delivery_state);
                if advanced != existing.delivery_state {
                    existing.delivery_state = advanced;
                    return InsertOutcome::Updated;
                }
            }
            return InsertOutcome::Duplicate;
        }

        let key = (message.timestamp_ms, self.next_seq);
        self.next_seq += 1;
        self.index.insert(message.id.clone(), key);
        self.slots.insert(key, message);
        InsertOutcome::Inserted
    }

    /// Replace the provisional entry for `client_temp_id` with `confirmed`
    pub fn reconcile(&mut self, client_temp_id: &str, mut confirmed: Message) -> ReconcileOutcome {
        if self.provisional(client_temp_id).is_none() {
            return if self.confirmed_copy(client_temp_id).is_some() {
                ReconcileOutcome::AlreadyReconciled
            } else {
                ReconcileOutcome::Missing
            };
        }

        let Some(old_key) = self.index.remove(client_temp_id) else {
            return ReconcileOutcome::Missing;
        };
        let provisional = self.slots.remove(&old_key);

        // A push delivered the confirmed copy before the send response
        if let Some(key) = self.index.get(&confirmed.id) {
            if let Some(existing) = self.slots.get_mut(key) {
                existing.client_temp_id = Some(client_temp_id.to_string());
                existing.delivery_state = existing.delivery_state.advance(confirmed.delivery_state);
            }
            return ReconcileOutcome::Merged;
        }

        confirmed.client_temp_id = Some(client_temp_id.to_string());
        if let Some(provisional) = provisional {
            confirmed.delivery_state = provisional.delivery_state.advance(confirmed.delivery_state);
        }

        let key = (confirmed.timestamp_ms, old_key.1);
        self.index.insert(confirmed.id.clone(), key);
        self.slots.insert(key, confirmed);
        ReconcileOutcome::Replaced
    }

    /// Overwrite a message's delivery state
    pub fn set_delivery_state(&mut self, id: &str, state: DeliveryState) -> bool {
        match self.index.get(id).and_then(|key| self.slots.get_mut(key)) {
            Some(message) => {
                message.delivery_state = state;
                true
            }
            None => false,
        }
    }

    /// Remove a message
    pub fn remove(&mut self, id: &str) -> Option<Message> {
        let key = self.index.remove(id)?;
        self.slots.remove(&key)
    }

    /// Replace the contents with a freshly fetched page
    ///
    /// Unreconciled provisional entries survive, so a reload never hides a
    /// message the user just sent.
    pub fn replace_with(&mut self, page: Vec<Message>) {
        let provisional: Vec<Message> = self
            .slots
            .values()
            .filter(|m| m.is_provisional())
            .cloned()
            .collect();

        self.slots.clear();
        self.index.clear();

        for message in page {
            self.insert(message);
        }
        for message in provisional {
            self.insert(message);
        }
    }
}

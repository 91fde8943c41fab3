//! Conversation Store
//!
//! Authoritative in-memory table of conversations. Fetched lists are merged
//! by id without clobbering what the user changed locally between fetches:
//! `pinned`, `muted`, `archived` and `blocked` belong to the local side once a
//! conversation is known, and a locally changed unread counter wins until
//! the server reports the same value.
//!
//! The store performs no I/O. Pushing a local change to the gateway is the
//! caller's concern.

use crate::error::malformed;
use crate::model::{Conversation, ConversationPatch, Message};
use crate::{Result, SyncError};
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Maximum characters kept in a conversation's last-message preview
const SUMMARY_MAX_CHARS: usize = 80;

/// Counts of an upsert pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
}

/// In-memory conversation table
#[derive(Debug, Default)]
pub struct ConversationStore {
    conversations: HashMap<String, Conversation>,
    /// Conversations whose unread counter was changed locally
    unread_dirty: HashSet<String>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Conversation> {
        self.conversations.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.conversations.contains_key(id)
    }

    /// Merge a freshly fetched list
    pub fn upsert(&mut self, list: Vec<Conversation>) -> UpsertSummary {
        let mut summary = UpsertSummary::default();

        for remote in list {
            if remote.id.is_empty() {
                let _ = malformed("conversation", "empty id");
                summary.skipped += 1;
                continue;
            }

            match self.conversations.get(&remote.id) {
                Some(local) => {
                    if local.unread_count == remote.unread_count {
                        self.unread_dirty.remove(&remote.id);
                    }
                    let merged = self.merge(local, remote);
                    self.conversations.insert(merged.id.clone(), merged);
                    summary.updated += 1;
                }
                None => {
                    self.conversations.insert(remote.id.clone(), remote);
                    summary.inserted += 1;
                }
            }
        }

        debug!(
            "Conversation upsert: {} inserted, {} updated, {} skipped",
            summary.inserted, summary.updated, summary.skipped
        );
        summary
    }

    fn merge(&self, local: &Conversation, remote: Conversation) -> Conversation {
        let mut merged = remote;

        merged.pinned = local.pinned;
        merged.muted = local.muted;
        merged.archived = local.archived;
        merged.blocked = local.blocked;

        if self.unread_dirty.contains(&merged.id) {
            merged.unread_count = local.unread_count;
        }

        if local.last_activity_at > merged.last_activity_at {
            merged.last_activity_at = local.last_activity_at;
            merged.last_message_summary = local.last_message_summary.clone();
        }

        merged
    }

    /// Apply a local change and return the new value
    pub fn apply_update(&mut self, id: &str, patch: &ConversationPatch) -> Result<Conversation> {
        let conversation = self
            .conversations
            .get_mut(id)
            .ok_or_else(|| SyncError::ConversationNotFound(id.to_string()))?;

        patch.apply_to(conversation);
        if patch.unread_count.is_some() {
            self.unread_dirty.insert(id.to_string());
        }

        Ok(conversation.clone())
    }

    /// Reset the unread counter
    pub fn mark_read(&mut self, id: &str) -> Result<Conversation> {
        self.apply_update(id, &ConversationPatch::mark_read())
    }

    /// Apply a server-originated change; unknown ids are created
    pub fn apply_remote_patch(&mut self, id: &str, patch: &ConversationPatch) -> Result<Conversation> {
        if id.is_empty() {
            return Err(malformed("conversation patch", "empty id"));
        }

        let conversation = self.ensure(id);
        patch.apply_to(conversation);
        let updated = conversation.clone();

        if patch.unread_count.is_some() {
            self.unread_dirty.remove(id);
        }
        Ok(updated)
    }

    /// Delete a conversation
    pub fn remove(&mut self, id: &str) -> Option<Conversation> {
        self.unread_dirty.remove(id);
        self.conversations.remove(id)
    }

    pub fn clear(&mut self) {
        self.conversations.clear();
        self.unread_dirty.clear();
    }

    /// Default list: pinned first, then by latest activity; archived and blocked hidden
    pub fn sorted_view(&self) -> Vec<Conversation> {
        self.view(|c| c.is_visible())
    }

    /// Archived (and not blocked) conversations, same ordering
    pub fn archived_view(&self) -> Vec<Conversation> {
        self.view(|c| c.archived && !c.blocked)
    }

    fn view(&self, include: impl Fn(&Conversation) -> bool) -> Vec<Conversation> {
        let mut view: Vec<Conversation> = self
            .conversations
            .values()
            .filter(|c| include(c))
            .cloned()
            .collect();

        view.sort_by(|a, b| {
            (Reverse(a.pinned), Reverse(a.last_activity_at), &a.id).cmp(&(
                Reverse(b.pinned),
                Reverse(b.last_activity_at),
                &b.id,
            ))
        });
        view
    }

    /// Get a conversation, creating a placeholder for unknown ids
    pub(crate) fn ensure(&mut self, id: &str) -> &mut Conversation {
        self.conversations.entry(id.to_string()).or_insert_with(|| {
            debug!("Creating placeholder for unknown conversation {}", id);
            Conversation::new(id, id)
        })
    }

    /// Update preview and activity time if `message` is the newest seen
    pub(crate) fn record_activity(&mut self, message: &Message) {
        let conversation = self.ensure(&message.conversation_id);
        if message.timestamp_ms >= conversation.last_activity_at {
            conversation.last_activity_at = message.timestamp_ms;
            conversation.last_message_summary = summarize(&message.body);
        }
    }

    /// Count one more unread inbound message
    pub(crate) fn increment_unread(&mut self, id: &str) -> u32 {
        let conversation = self.ensure(id);
        conversation.unread_count = conversation.unread_count.saturating_add(1);
        let unread = conversation.unread_count;
        self.unread_dirty.insert(id.to_string());
        unread
    }
}

fn summarize(body: &str) -> String {
    let line = body.lines().next().unwrap_or_default();
    if line.chars().count() > SUMMARY_MAX_CHARS {
        let mut summary: String = line.chars().take(SUMMARY_MAX_CHARS - 1).collect();
        summary.push('…');
        summary
    } else {
        line.to_string()
    }
}

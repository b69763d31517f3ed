//! Conversation history store
//!
//! The single source of truth for persisted history. Every method is a
//! synchronous in-memory edit; persistence is a separate, explicit step
//! (see [`crate::persistence::PersistenceBridge::flush`]) that watches
//! [`ConversationStore::revision`].

use chrono::{DateTime, Utc};
use crate::state::Conversation;

const TITLE_CHARS: usize = 17;

#[derive(Debug, Clone, Default)]
pub struct ConversationStore {
    conversations: Vec<Conversation>,
    /// `None` means no conversation is selected (the latest session is shown)
    active_index: Option<usize>,
    new_chat_requested: bool,
    last_updated: Option<DateTime<Utc>>,
    /// Bumped whenever `conversations` changes
    revision: u64,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Selectors

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn get(&self, index: usize) -> Option<&Conversation> {
        self.conversations.get(index)
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    pub fn active_index(&self) -> Option<usize> {
        self.active_index
    }

    pub fn new_chat_requested(&self) -> bool {
        self.new_chat_requested
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.last_updated
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// The active conversation, or the most recent one when none is selected
    pub fn current(&self) -> Option<&Conversation> {
        self.resolve_target().and_then(|i| self.conversations.get(i))
    }

    /// Index `update_active` would write to: the active index if set, else the last
    pub fn resolve_target(&self) -> Option<usize> {
        match self.active_index {
            Some(i) => Some(i),
            None => self.conversations.len().checked_sub(1),
        }
    }

    /// Sidebar label: the opening of the conversation's first turn
    pub fn title(&self, index: usize) -> Option<String> {
        let first = self.conversations.get(index)?.first()?;
        let mut title: String = first.text.chars().take(TITLE_CHARS).collect();
        if first.text.chars().count() > TITLE_CHARS {
            title.push_str("...");
        }
        Some(title)
    }

    // Mutations

    /// Replace the whole history, used when loading from storage
    pub fn replace_all(&mut self, conversations: Vec<Conversation>) {
        self.conversations = conversations;
        if self.active_index.is_some_and(|i| i >= self.conversations.len()) {
            self.active_index = None;
        }
        self.touch_history();
    }

    /// Add a new conversation at the end and return its index
    pub fn append(&mut self, conversation: Conversation) -> usize {
        self.conversations.push(conversation);
        self.touch_history();
        self.conversations.len() - 1
    }

    /// Overwrite the conversation at `index`. Returns false if out of bounds.
    pub fn update_at(&mut self, index: usize, conversation: Conversation) -> bool {
        match self.conversations.get_mut(index) {
            Some(slot) => {
                *slot = conversation;
                self.touch_history();
                true
            }
            None => false,
        }
    }

    /// Overwrite the conversation at [`Self::resolve_target`]
    pub fn update_active(&mut self, conversation: Conversation) -> Option<usize> {
        let index = self.resolve_target()?;
        self.update_at(index, conversation).then_some(index)
    }

    /// Remove the conversation at `index`.
    ///
    /// Deleting the active conversation clears the selection. Deleting one
    /// before it shifts the active index down so it still names the same
    /// conversation.
    pub fn delete_at(&mut self, index: usize) -> Option<Conversation> {
        if index >= self.conversations.len() {
            return None;
        }
        let removed = self.conversations.remove(index);

        self.active_index = match self.active_index {
            Some(active) if active == index => None,
            Some(active) if active > index => Some(active - 1),
            other => other,
        };

        self.touch_history();
        Some(removed)
    }

    /// Select a conversation. Out-of-range indices are refused.
    pub fn set_active_index(&mut self, index: Option<usize>) -> bool {
        if index.is_some_and(|i| i >= self.conversations.len()) {
            return false;
        }
        self.active_index = index;
        self.touch();
        true
    }

    /// Raise or lower the new-chat flag; raising it also clears the selection
    pub fn request_new_chat(&mut self, requested: bool) {
        self.new_chat_requested = requested;
        if requested {
            self.active_index = None;
        }
        self.touch();
    }

    /// Read the new-chat flag and lower it
    pub fn consume_new_chat(&mut self) -> bool {
        let requested = self.new_chat_requested;
        if requested {
            self.request_new_chat(false);
        }
        requested
    }

    /// Append a batch of conversations after the existing ones
    pub fn import(&mut self, conversations: Vec<Conversation>) {
        if conversations.is_empty() {
            return;
        }
        self.conversations.extend(conversations);
        self.touch_history();
    }

    /// Drop all history and selection state
    pub fn reset(&mut self) {
        let revision = self.revision;
        *self = Self::default();
        self.revision = revision;
        self.touch_history();
    }

    fn touch(&mut self) {
        self.last_updated = Some(Utc::now());
    }

    fn touch_history(&mut self) {
        self.revision += 1;
        self.touch();
    }
}

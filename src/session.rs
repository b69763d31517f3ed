//! Active session view-model
//!
//! Holds the working copy of the conversation being composed and reconciles
//! it into the [`ConversationStore`]. A submission is split in two so the
//! front-end can run the gateway call on a background task:
//!
//! - [`ActiveSession::begin_submit`] appends the user turn, commits a brand
//!   new conversation to the store and hands out a [`PendingTicket`].
//! - [`ActiveSession::complete_submit`] appends the model turn and updates the
//!   stored conversation in place.
//!
//! Both halves read the session length synchronously inside the same call, so
//! append-vs-update never depends on a stale snapshot. Every navigation bumps
//! the session epoch and cancels the in-flight request; a completion carrying
//! an old epoch is dropped instead of landing in the wrong conversation.

use tokio_util::sync::CancellationToken;

use crate::gemini::{ChatGateway, GatewayReply};
use crate::state::{Conversation, Turn};
use crate::store::ConversationStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Empty,
    AwaitingUserInput,
    PendingResponse,
    Resetting,
    Loaded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Input was empty or whitespace only
    EmptyInput,
    /// A reply for this session is still pending
    Busy,
}

/// Everything the background task needs to ask the gateway for a reply
#[derive(Debug, Clone)]
pub struct PendingTicket {
    pub epoch: u64,
    /// Turns before this submission; the prompt travels separately
    pub history: Vec<Turn>,
    pub prompt: String,
    pub cancel: CancellationToken,
}

#[derive(Debug)]
pub struct ActiveSession {
    turns: Conversation,
    input: String,
    state: SessionState,
    /// Store index this session is committed to, once it has been appended
    bound_index: Option<usize>,
    epoch: u64,
    pending: Option<CancellationToken>,
}

impl Default for ActiveSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ActiveSession {
    pub fn new() -> Self {
        Self {
            turns: Vec::new(),
            input: String::new(),
            state: SessionState::Empty,
            bound_index: None,
            epoch: 0,
            pending: None,
        }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_loading(&self) -> bool {
        self.pending.is_some()
    }

    pub fn bound_index(&self) -> Option<usize> {
        self.bound_index
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn input_mut(&mut self) -> &mut String {
        &mut self.input
    }

    pub fn set_input(&mut self, input: impl Into<String>) {
        self.input = input.into();
    }

    /// First half of a submission: take the input, append the user turn and,
    /// for a brand new conversation, append it to the store.
    pub fn begin_submit(
        &mut self,
        store: &mut ConversationStore,
    ) -> Result<PendingTicket, Rejection> {
        if self.pending.is_some() {
            return Err(Rejection::Busy);
        }
        if self.input.trim().is_empty() {
            return Err(Rejection::EmptyInput);
        }

        let prompt = std::mem::take(&mut self.input);
        let history = self.turns.clone();
        self.turns.push(Turn::user(prompt.clone()));

        if self.bound_index.is_none() {
            debug_assert_eq!(self.turns.len(), 1);
            let index = store.append(self.turns.clone());
            self.bound_index = Some(index);
            tracing::debug!(index, "Started new conversation");
        }

        let cancel = CancellationToken::new();
        self.pending = Some(cancel.clone());
        self.set_state(SessionState::PendingResponse);

        Ok(PendingTicket {
            epoch: self.epoch,
            history,
            prompt,
            cancel,
        })
    }

    /// Second half: append the reply and write the whole session back to the
    /// store. Returns false if the ticket is stale and the reply was dropped.
    pub fn complete_submit(
        &mut self,
        epoch: u64,
        reply: GatewayReply,
        store: &mut ConversationStore,
    ) -> bool {
        if epoch != self.epoch || self.pending.is_none() {
            tracing::debug!(epoch, current = self.epoch, "Dropping stale reply");
            return false;
        }
        self.pending = None;

        self.turns.push(Turn::model(reply.text));

        if self.turns.len() > 1 {
            if let Some(index) = self.bound_index {
                if !store.update_at(index, self.turns.clone()) {
                    tracing::warn!(index, "Bound conversation missing from store");
                }
            }
        }

        self.set_state(SessionState::AwaitingUserInput);
        true
    }

    /// Run a whole submission inline
    pub async fn submit(
        &mut self,
        store: &mut ConversationStore,
        gateway: &dyn ChatGateway,
    ) -> Result<GatewayReply, Rejection> {
        let ticket = self.begin_submit(store)?;
        let reply = gateway.send(&ticket.history, &ticket.prompt).await;
        self.complete_submit(ticket.epoch, reply.clone(), store);
        Ok(reply)
    }

    /// React to store changes: a pending new-chat request clears the session,
    /// a newly selected conversation is loaded.
    pub fn observe(&mut self, store: &mut ConversationStore) {
        if store.consume_new_chat() {
            self.reset();
            return;
        }
        if let Some(index) = store.active_index() {
            if self.bound_index != Some(index) {
                self.load(store, index);
            }
        }
    }

    /// Start over with no turns and no binding
    pub fn reset(&mut self) {
        self.set_state(SessionState::Resetting);
        self.abandon_pending();
        self.turns.clear();
        self.bound_index = None;
        self.set_state(SessionState::Empty);
    }

    /// Replace the session with a copy of the stored conversation at `index`
    pub fn load(&mut self, store: &ConversationStore, index: usize) {
        let Some(conversation) = store.get(index) else {
            return;
        };
        self.abandon_pending();
        self.set_state(SessionState::Loaded);
        self.turns = conversation.clone();
        self.bound_index = Some(index);
        self.set_state(if self.turns.is_empty() {
            SessionState::Empty
        } else {
            SessionState::AwaitingUserInput
        });
    }

    /// Keep the binding in step with a deletion that already hit the store
    pub fn on_deleted(&mut self, index: usize) {
        match self.bound_index {
            Some(bound) if bound == index => self.reset(),
            Some(bound) if bound > index => self.bound_index = Some(bound - 1),
            _ => {}
        }
    }

    fn abandon_pending(&mut self) {
        if let Some(cancel) = self.pending.take() {
            cancel.cancel();
            tracing::debug!(epoch = self.epoch, "Cancelled pending reply");
        }
        self.epoch += 1;
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            tracing::trace!(from = ?self.state, to = ?state, "Session state");
            self.state = state;
        }
    }
}

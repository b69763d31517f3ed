use ratatui::layout::Rect;
use ratatui::widgets::ListState;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

use crate::error::GatewayError;
use crate::gemini::{ChatGateway, GatewayReply};
use crate::persistence::{PersistenceBridge, Storage};
use crate::session::{ActiveSession, PendingTicket, Rejection};
use crate::store::ConversationStore;
use crate::tui::AppEvent;

/// Prompts offered on an empty chat; pressing 1-4 copies one into the input
pub const SUGGESTIONS: [&str; 4] = [
    "Compare the differences between pickleball and tennis",
    "Recommend new types of water sports, including pros & cons",
    "Brainstorm team bonding activities for our work retreat",
    "What is React js and what is its importance",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusPane {
    Sidebar,
    Chat,
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub input_mode: InputMode,
    pub focus: FocusPane,

    // History
    pub store: ConversationStore,
    bridge: PersistenceBridge,
    pub sidebar_state: ListState,
    pub show_sidebar: bool,

    // Active conversation
    pub session: ActiveSession,
    pub input_cursor: usize, // cursor position in the session input, in chars
    pub chat_scroll: u16,
    pub chat_height: u16, // Height of chat area for scroll calculations
    pub chat_width: u16,  // Width of chat area for wrap calculations

    // Animation state
    pub animation_frame: u8, // 0-2 for ellipsis animation

    // Gateway
    gateway: Result<Arc<dyn ChatGateway>, String>,
    events: UnboundedSender<AppEvent>,
    pub status: Option<String>,

    // Panel areas for mouse hit-testing (updated during render)
    pub sidebar_area: Option<Rect>,
    pub chat_area: Option<Rect>,
}

impl App {
    pub fn new(
        storage: Box<dyn Storage>,
        gateway: Result<Arc<dyn ChatGateway>, GatewayError>,
        events: UnboundedSender<AppEvent>,
    ) -> Self {
        let mut store = ConversationStore::new();
        let mut bridge = PersistenceBridge::new(storage);
        bridge.load(&mut store);

        let (gateway, status) = match gateway {
            Ok(gateway) => (Ok(gateway), None),
            Err(e) => {
                tracing::error!(error = %e, "Gateway unavailable");
                (Err(e.to_string()), Some(format!("Error: {}", e)))
            }
        };

        let mut sidebar_state = ListState::default();
        if !store.is_empty() {
            sidebar_state.select(Some(store.len() - 1));
        }

        Self {
            should_quit: false,
            input_mode: InputMode::Editing,
            focus: FocusPane::Chat,

            store,
            bridge,
            sidebar_state,
            show_sidebar: true,

            session: ActiveSession::new(),
            input_cursor: 0,
            chat_scroll: 0,
            chat_height: 0,
            chat_width: 0,

            animation_frame: 0,

            gateway,
            events,
            status,

            sidebar_area: None,
            chat_area: None,
        }
    }

    pub fn model_name(&self) -> &str {
        match &self.gateway {
            Ok(gateway) => gateway.model(),
            Err(_) => "not configured",
        }
    }

    /// Write history to storage if anything changed since the last call
    pub fn persist(&mut self) {
        self.bridge.flush(&self.store);
    }

    // Chat actions

    /// Send the current input. The reply arrives later as `AppEvent::Reply`.
    pub fn submit(&mut self) {
        let gateway = match &self.gateway {
            Ok(gateway) => Arc::clone(gateway),
            Err(e) => {
                self.status = Some(format!("Error: {}", e));
                return;
            }
        };

        match self.session.begin_submit(&mut self.store) {
            Ok(ticket) => {
                self.input_cursor = 0;
                self.status = None;
                self.sidebar_state.select(self.session.bound_index());
                self.scroll_chat_to_bottom();
                self.spawn_request(gateway, ticket);
            }
            Err(Rejection::Busy) => {
                self.status = Some("Still waiting for the previous reply".to_string());
            }
            Err(Rejection::EmptyInput) => {}
        }
    }

    fn spawn_request(&self, gateway: Arc<dyn ChatGateway>, ticket: PendingTicket) {
        let events = self.events.clone();
        tokio::spawn(async move {
            let PendingTicket {
                epoch,
                history,
                prompt,
                cancel,
            } = ticket;

            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(epoch, "Request abandoned");
                }
                reply = gateway.send(&history, &prompt) => {
                    let _ = events.send(AppEvent::Reply { epoch, reply });
                }
            }
        });
    }

    pub fn on_reply(&mut self, epoch: u64, reply: GatewayReply) {
        let summary = reply.metadata.to_string();
        if self.session.complete_submit(epoch, reply, &mut self.store) {
            self.status = Some(summary);
            self.scroll_chat_to_bottom();
        }
    }

    pub fn new_chat(&mut self) {
        self.store.request_new_chat(true);
        self.session.observe(&mut self.store);
        self.input_cursor = self.session.input().chars().count();
        self.chat_scroll = 0;
        self.sidebar_state.select(None);
        self.status = None;
    }

    pub fn select_conversation(&mut self, index: usize) {
        if self.store.set_active_index(Some(index)) {
            self.session.observe(&mut self.store);
            self.sidebar_state.select(Some(index));
            self.status = None;
            self.scroll_chat_to_bottom();
        }
    }

    pub fn delete_selected(&mut self) {
        let Some(index) = self.sidebar_state.selected() else {
            return;
        };
        if self.store.delete_at(index).is_none() {
            return;
        }
        self.session.on_deleted(index);
        tracing::info!(index, "Deleted conversation");

        let len = self.store.len();
        self.sidebar_state
            .select(if len == 0 { None } else { Some(index.min(len - 1)) });
    }

    pub fn apply_suggestion(&mut self, index: usize) {
        if let Some(text) = SUGGESTIONS.get(index) {
            self.session.set_input(*text);
            self.input_cursor = text.chars().count();
            self.input_mode = InputMode::Editing;
        }
    }

    // Sidebar navigation

    pub fn sidebar_nav_down(&mut self) {
        let len = self.store.len();
        if len > 0 {
            let i = self.sidebar_state.selected().map_or(0, |i| (i + 1).min(len - 1));
            self.sidebar_state.select(Some(i));
        }
    }

    pub fn sidebar_nav_up(&mut self) {
        if !self.store.is_empty() {
            let i = self.sidebar_state.selected().unwrap_or(0);
            self.sidebar_state.select(Some(i.saturating_sub(1)));
        }
    }

    /// Conversation highlighted as "open" in the sidebar
    pub fn open_index(&self) -> Option<usize> {
        self.session.bound_index()
    }

    // Scrolling

    pub fn scroll_down(&mut self, lines: u16) {
        self.chat_scroll = self.chat_scroll.saturating_add(lines);
    }

    pub fn scroll_up(&mut self, lines: u16) {
        self.chat_scroll = self.chat_scroll.saturating_sub(lines);
    }

    pub fn scroll_half_page_down(&mut self) {
        self.scroll_down((self.chat_height / 2).max(1));
    }

    pub fn scroll_half_page_up(&mut self) {
        self.scroll_up((self.chat_height / 2).max(1));
    }

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.session.is_loading() {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    /// Scroll chat to bottom so the latest turn (or "Thinking...") is visible
    pub fn scroll_chat_to_bottom(&mut self) {
        // Use actual chat width for wrap calculation, default to 50 if not set
        let wrap_width = if self.chat_width > 0 {
            self.chat_width as usize
        } else {
            50
        };

        let mut total_lines: u16 = 0;

        for turn in self.session.turns() {
            total_lines = total_lines.saturating_add(1); // Role line ("You:" or "Gemini:")
            for line in turn.text.lines() {
                // Use character count, not byte length, for proper UTF-8 handling
                let char_count = line.chars().count();
                let wrapped = if char_count == 0 { 1 } else { char_count / wrap_width + 1 };
                total_lines = total_lines.saturating_add(wrapped as u16);
            }
            total_lines = total_lines.saturating_add(1); // Blank line after turn
        }

        if self.session.is_loading() {
            total_lines = total_lines.saturating_add(2); // "Gemini:" + "Thinking..."
        }

        let visible_height = if self.chat_height > 0 {
            self.chat_height
        } else {
            20
        };

        self.chat_scroll = total_lines.saturating_sub(visible_height);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gemini::ReplyMetadata;
    use crate::persistence::MemoryStorage;
    use crate::state::Turn;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct SlowGateway {
        delay: Duration,
    }

    #[async_trait]
    impl ChatGateway for SlowGateway {
        async fn send(&self, _history: &[Turn], prompt: &str) -> GatewayReply {
            tokio::time::sleep(self.delay).await;
            GatewayReply {
                text: format!("re: {}", prompt),
                metadata: ReplyMetadata::Success {
                    response_time: self.delay,
                    tokens_used: Some(3),
                    model: "slow".to_string(),
                    timestamp: Utc::now(),
                },
            }
        }

        fn model(&self) -> &str {
            "slow"
        }
    }

    fn app_with(
        gateway: Result<Arc<dyn ChatGateway>, GatewayError>,
    ) -> (App, mpsc::UnboundedReceiver<AppEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (App::new(Box::new(MemoryStorage::new()), gateway, tx), rx)
    }

    async fn next_reply(rx: &mut mpsc::UnboundedReceiver<AppEvent>) -> (u64, GatewayReply) {
        match tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
            Ok(Some(AppEvent::Reply { epoch, reply })) => (epoch, reply),
            other => panic!("expected a reply event, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_api_key_is_reported_without_touching_history() {
        let (mut app, _rx) = app_with(Err(GatewayError::MissingApiKey));
        assert!(app.status.as_deref().unwrap().contains("API key"));

        app.session.set_input("Hello");
        app.submit();

        assert!(app.store.is_empty());
        assert!(app.session.turns().is_empty());
        assert_eq!(app.session.input(), "Hello");
        assert_eq!(app.model_name(), "not configured");
    }

    #[tokio::test]
    async fn test_submit_round_trip_through_event_channel() {
        let gateway: Arc<dyn ChatGateway> = Arc::new(SlowGateway {
            delay: Duration::from_millis(10),
        });
        let (mut app, mut rx) = app_with(Ok(gateway));

        app.session.set_input("Hello");
        app.input_cursor = 5;
        app.submit();
        assert_eq!(app.input_cursor, 0);
        assert!(app.session.is_loading());
        assert_eq!(app.store.len(), 1);

        let (epoch, reply) = next_reply(&mut rx).await;
        app.on_reply(epoch, reply);

        assert_eq!(
            app.store.get(0),
            Some(&vec![Turn::user("Hello"), Turn::model("re: Hello")])
        );
        assert!(!app.session.is_loading());
        assert!(app.status.as_deref().unwrap().contains("slow"));
    }

    #[tokio::test]
    async fn test_new_chat_while_pending_abandons_request() {
        let gateway: Arc<dyn ChatGateway> = Arc::new(SlowGateway {
            delay: Duration::from_millis(200),
        });
        let (mut app, mut rx) = app_with(Ok(gateway));

        app.session.set_input("Hello");
        app.submit();
        app.new_chat();

        let waited = tokio::time::timeout(Duration::from_millis(400), rx.recv()).await;
        assert!(waited.is_err(), "cancelled request must not report back");
        assert!(app.session.turns().is_empty());
        assert_eq!(app.store.get(0), Some(&vec![Turn::user("Hello")]));
    }

    #[test]
    fn test_delete_selected_keeps_selection_in_range() {
        let (mut app, _rx) = app_with(Err(GatewayError::MissingApiKey));
        app.store.append(vec![Turn::user("a")]);
        app.store.append(vec![Turn::user("b")]);
        app.select_conversation(1);
        assert_eq!(app.open_index(), Some(1));

        app.delete_selected();
        assert_eq!(app.sidebar_state.selected(), Some(0));
        assert_eq!(app.store.active_index(), None);
        assert!(app.session.turns().is_empty());

        app.delete_selected();
        assert_eq!(app.sidebar_state.selected(), None);
        assert!(app.store.is_empty());
    }

    #[test]
    fn test_apply_suggestion_fills_input() {
        let (mut app, _rx) = app_with(Err(GatewayError::MissingApiKey));
        app.input_mode = InputMode::Normal;
        app.apply_suggestion(0);
        assert_eq!(app.session.input(), SUGGESTIONS[0]);
        assert_eq!(app.input_mode, InputMode::Editing);
        app.apply_suggestion(9);
        assert_eq!(app.session.input(), SUGGESTIONS[0]);
    }
}

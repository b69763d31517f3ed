//! Terminal chat client for Gemini.
//!
//! History lives in a [`store::ConversationStore`], is mirrored to disk by a
//! [`persistence::PersistenceBridge`] and driven by an
//! [`session::ActiveSession`] that talks to a [`gemini::ChatGateway`].

pub mod app;
pub mod config;
pub mod error;
pub mod format;
pub mod gemini;
pub mod handler;
pub mod logging;
pub mod persistence;
pub mod session;
pub mod state;
pub mod store;
pub mod tui;
pub mod ui;

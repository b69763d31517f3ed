//! UI-agnostic conversation types
//!
//! These are shared by the store, the persistence layer, the Gemini gateway
//! and the terminal front-end, and don't depend on any UI framework.
//!
//! On disk and on the wire a turn keeps the `{role, parts: [{text}]}` shape so
//! that multi-part turns can be added later without a format change. Only the
//! first part is ever read or written.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The author of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
        }
    }
}

/// A single message in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "WireTurn", from = "WireTurn")]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            text: text.into(),
        }
    }
}

/// An ordered list of turns, identified only by its position in the store
pub type Conversation = Vec<Turn>;

#[derive(Serialize, Deserialize)]
struct WireTurn {
    role: Role,
    #[serde(default)]
    parts: Vec<WirePart>,
}

#[derive(Serialize, Deserialize)]
struct WirePart {
    #[serde(default)]
    text: Value,
}

impl From<Turn> for WireTurn {
    fn from(turn: Turn) -> Self {
        Self {
            role: turn.role,
            parts: vec![WirePart {
                text: Value::String(turn.text),
            }],
        }
    }
}

impl From<WireTurn> for Turn {
    fn from(wire: WireTurn) -> Self {
        let text = wire
            .parts
            .into_iter()
            .next()
            .map(|part| text_from_value(part.text))
            .unwrap_or_default();

        Self {
            role: wire.role,
            text,
        }
    }
}

/// Missing text reads as empty, non-string text as its JSON form
fn text_from_value(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

//! External interfaces consumed from the host viewer (§6).
//!
//! Everything here is a narrow trait or function type the embedding
//! application implements; this crate never constructs a concrete host
//! itself. All trait objects here are `Send + Sync` so they can be shared
//! with the bridge's worker thread and with async tool code alike.

use serde::{Deserialize, Serialize};

/// Opaque handle to the host's GUI-thread state, passed to every [`crate::bridge::Task`].
///
/// The bridge only needs `Send` so the handle can travel to the worker thread;
/// beyond that it makes no assumption about what a `HostHandle` lets a Task do.
pub trait HostHandle: Send {
    /// Human-readable summary of current host state (layer names, shapes,
    /// dtypes, simple per-layer statistics), used inside C5 prompt assembly.
    fn describe(&self) -> String;
}

/// Image bytes returned by the screenshot service, with a MIME-ish format tag.
#[derive(Debug, Clone)]
pub struct Screenshot {
    pub format: String,
    pub bytes: Vec<u8>,
}

/// Captures the host canvas, or a named layer, as an image (consumed by the vision tool).
pub trait ScreenshotService: Send + Sync {
    fn capture(&self, layer: Option<&str>) -> crate::Result<Screenshot>;
}

/// Append-only sink for recording successful tool executions (consumed collaborator).
pub trait NotebookSink: Send + Sync {
    fn add_code_cell(&self, text: &str);
    fn add_markdown_cell(&self, text: &str);
    fn add_image_cell(&self, image: &Screenshot, caption: &str);
}

/// Who produced a [`ChatEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatSender {
    User,
    Agent,
}

/// The kind of [`ChatEvent`] emitted by the agent loop (C7), in causal order per turn:
/// `user, thinking, tool_start, tool_result, error, final`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatEventKind {
    Stream,
    ToolStart,
    ToolResult,
    Thinking,
    Error,
    Final,
}

/// One event in the chat stream the UI layer renders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatEvent {
    pub sender: ChatSender,
    pub kind: ChatEventKind,
    pub message: String,
}

impl ChatEvent {
    pub fn user(message: impl Into<String>) -> Self {
        Self {
            sender: ChatSender::User,
            kind: ChatEventKind::Stream,
            message: message.into(),
        }
    }

    pub fn agent(kind: ChatEventKind, message: impl Into<String>) -> Self {
        Self {
            sender: ChatSender::Agent,
            kind,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_event_constructors_set_sender() {
        let u = ChatEvent::user("hi");
        assert_eq!(u.sender, ChatSender::User);
        let a = ChatEvent::agent(ChatEventKind::Final, "done");
        assert_eq!(a.sender, ChatSender::Agent);
        assert_eq!(a.kind, ChatEventKind::Final);
    }
}

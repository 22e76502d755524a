//! # Omega Agent
//!
//! The core of a conversational agent that turns natural-language requests
//! into executed actions inside a scientific image-viewer host: an LLM
//! façade over OpenAI-compatible chat completions, a panic/error guard that
//! stands in for a catchable exception, a code-repair pipeline, a bridge
//! onto the host's single GUI thread, a tool-calling agent loop, a tool
//! registry, and a small LAN peer discovery/code-exchange service.
//!
//! ## Architecture
//!
//! - **llm**: OpenAI-compatible chat/completion façade (C1) — model
//!   registry, feature probing, templated single-turn generation, and the
//!   multi-turn tool-calling `chat()` the agent loop drives.
//! - **guard**: Exception-as-value capture (C2) — converts a panic or an
//!   `Err` into an [`ExceptionGuard`](guard::ExceptionGuard) instead of
//!   unwinding past the caller.
//! - **repair**: Generated-code repair pipeline (C3) — markdown extraction,
//!   prefixing, missing-import inference, bad-call repair, and a forbidden-
//!   line filter.
//! - **bridge**: Host bridge (C4) — marshals work from agent/tool threads
//!   onto a single dedicated "GUI thread".
//! - **tool_base**: Base code-generating tool (C5) — prompt assembly, C1/C3
//!   invocation, C4 submission, and retry-with-error-feedback.
//! - **widget**: Widget-maker tool (C6) — a bounded nested agentic sub-loop.
//! - **vision**: Vision tool — composes the host's screenshot service with
//!   C1's vision call to describe the canvas or a named layer.
//! - **agent**: Tool-calling agent loop (C7) — the per-turn state machine
//!   and chat-event stream.
//! - **registry**: Tool registry (C8) — per-session toolset assembly and
//!   environment capability probing.
//! - **peer::discovery**: Peer discovery (C9) — UDP multicast presence
//!   beacon and listener.
//! - **peer::transfer**: Peer transfer (C10) — TCP code-snippet drop.
//! - **session**: Session controller (C11) — binds a host to C4, builds C7
//!   from C8's toolset, routes turns, tears down in order.
//! - **host**: External interfaces consumed from/produced to the host.
//! - **types**, **tools**, **hooks**, **config**, **context**, **error**,
//!   **retry**, **utils**: ambient stack, adapted from the OpenAI-compatible
//!   client SDK this crate grew from — message/tool/config types, lifecycle
//!   hooks, context-window management, structured errors, and
//!   exponential-backoff retry.

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

/// Exception-as-value capture (C2): converts a panic or propagated `Err`
/// into an `ExceptionGuard` instead of unwinding past the caller.
mod guard;

/// External interfaces consumed from, or produced to, the host viewer (§6):
/// the opaque host handle, screenshot/notebook collaborators, and the chat
/// event stream the UI renders.
mod host;

/// Host bridge (C4): marshals work from agent/tool threads onto a single
/// dedicated "GUI thread" and returns results or structured exceptions.
mod bridge;

/// LLM façade (C1): OpenAI-compatible chat/completion client, model
/// registry, and feature probing (vision, web search).
mod llm;

/// Tool registry (C8): per-session toolset assembly, environment capability
/// probing, and tool-activity observation.
mod registry;

/// Tool-calling agent loop (C7): the per-turn state machine driving C1 with
/// C8's toolset and streaming chat events.
mod agent;

/// Generated-code repair pipeline (C3): markdown extraction, prefixing,
/// missing-import inference, bad-call repair, and a forbidden-line filter.
mod repair;

/// Base code-generating tool (C5): prompt assembly, C1/C3 invocation, C4
/// submission, and retry-with-error-feedback.
mod tool_base;

/// Widget-maker tool (C6): a bounded nested agentic sub-loop that submits
/// and docks a single generated widget.
mod widget;

/// Vision tool: composes the host's screenshot service with C1's vision
/// call to describe the canvas or a named layer (spec §8 scenario 6).
mod vision;

/// Peer discovery (C9) and peer transfer (C10): local-network presence
/// beacon and code-snippet drop channel between sessions.
mod peer;

/// Session controller (C11): binds a host to C4, builds C7 from C8's
/// toolset, routes turns, and tears down in a deterministic order.
mod session;

/// Provider configuration helpers for LM Studio, Ollama, llama.cpp, and vLLM,
/// plus the peer service's multicast/TCP defaults.
mod config;

/// Context window management utilities for token estimation and history
/// truncation.
mod context;

/// Error types and conversions used across the crate's public APIs.
mod error;

/// Lifecycle hooks system for intercepting and controlling tool execution.
mod hooks;

/// Tool definition and execution system with automatic JSON schema
/// generation.
mod tools;

/// Core type definitions for messages, content blocks, and agent
/// configuration.
mod types;

/// Internal utilities for Server-Sent Events (SSE) parsing and tool call
/// aggregation.
mod utils;

// ============================================================================
// PUBLIC EXPORTS
// ============================================================================

/// Retry utilities with exponential backoff and jitter, used by the vision
/// call (C1) and available for host-side collaborators' own operations.
pub mod retry;

// --- LLM façade (C1) ---

pub use llm::{Feature, Llm, ModelInfo};

// --- Exception guard (C2) ---

pub use guard::{guarded, ExceptionGuard};

// --- Code-repair pipeline (C3) ---

pub use repair::{
    always_consent, BadCallResolver, GeneratedCodeArtifact, InstallConsent,
    InstalledPackageChecker, MissingImportResolver, PackageInstaller, PipInstalledChecker,
    PipInstaller, Repair, RepairFlags, RepairPipeline, RequiredPackageResolver,
};

// --- Host bridge (C4) ---

pub use bridge::{BridgeClosed, HostBridge};

// --- Base code tool (C5) ---

pub use tool_base::{BaseCodeTool, Executor};

// --- Widget-maker tool (C6) ---

pub use widget::{WidgetExecutor, WidgetMakerTool, DEFAULT_MAX_ATTEMPTS};

// --- Vision tool ---

pub use vision::build_vision_tool;

// --- Agent loop (C7) ---

pub use agent::{Agent, AgentState};

// --- Tool registry (C8) ---

pub use registry::{ActivityCallback, Capabilities, LoggingActivityCallback, ToolRegistry, ToolSpec};

// --- Peer discovery (C9) / transfer (C10) ---

pub use peer::{CodeMessage, PeerDirectory, PeerRecord, TransferClient, TransferServer};

// --- Session controller (C11) ---

pub use session::{Session, SessionOptions};

// --- Host interfaces (§6) ---

pub use host::{ChatEvent, ChatEventKind, ChatSender, HostHandle, NotebookSink, Screenshot, ScreenshotService};

// --- Provider Configuration ---

pub use config::{get_base_url, get_model, Provider};

// --- Context Management ---

pub use context::{estimate_tokens, is_approaching_limit, truncate_messages};

// --- Error Handling ---

pub use error::{Error, Result};

// --- Lifecycle Hooks ---

pub use hooks::{
    HookDecision, Hooks, PostToolUseEvent, PreToolUseEvent, UserPromptSubmitEvent,
    HOOK_POST_TOOL_USE, HOOK_PRE_TOOL_USE, HOOK_USER_PROMPT_SUBMIT,
};

// --- Tool System ---

pub use tools::{tool, Tool, ToolBuilder};

// --- Core Types ---

pub use types::{
    AgentOptions, AgentOptionsBuilder, ContentBlock, ImageBlock, ImageDetail, Message,
    MessageRole, OpenAIContentPart, TextBlock, ToolResultBlock, ToolUseBlock,
};

// ============================================================================
// CONVENIENCE PRELUDE
// ============================================================================

/// Convenience module containing the most commonly used types and
/// functions. Import with `use omega_agent::prelude::*;`.
pub mod prelude {
    pub use crate::{
        guarded, tool, Agent, BaseCodeTool, ChatEvent, ContentBlock, Error, ExceptionGuard,
        HookDecision, Hooks, HostBridge, HostHandle, Llm, Result, Session, SessionOptions, Tool,
        ToolRegistry, ToolSpec, WidgetMakerTool,
    };
}

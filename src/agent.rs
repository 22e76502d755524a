//! Agent loop (C7): maintains message history, drives the LLM with
//! tool-calling per user turn, and streams intermediate events.
//!
//! Generalizes the teacher's `Client` auto-execution loop (`client.rs`) into
//! the explicit state machine of spec §4.7, with tool calls validated
//! against [`ToolSpec::return_direct`]/[`ToolSpec::parallel_safe`] instead of
//! always executing sequentially and always looping back to the LLM.

use crate::context::{estimate_tokens, summarize_when_over_ceiling};
use crate::hooks::{Hooks, PostToolUseEvent, PreToolUseEvent};
use crate::host::{ChatEvent, ChatEventKind};
use crate::llm::Llm;
use crate::registry::{ActivityCallback, LoggingActivityCallback, ToolSpec};
use crate::types::{ContentBlock, Message, ToolResultBlock};
use crate::{Error, Result};

/// Default ConversationHistory bounded-growth ceiling, in estimated tokens
/// (spec glossary: "when estimated token count exceeds a session-configured
/// ceiling, oldest non-system messages are summarised into a single
/// synthetic message").
const DEFAULT_HISTORY_CEILING: usize = 12_000;
const HISTORY_KEEP_RECENT: usize = 6;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// The five states of spec §4.7's per-turn state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Idle,
    Thinking,
    Executing,
    Finalising,
    Failed,
}

/// Drives tool-calling turns over a persistent conversation history.
pub struct Agent {
    llm: Arc<Llm>,
    model: String,
    temperature: f32,
    system_prompt: String,
    tools: Vec<ToolSpec>,
    hooks: Hooks,
    max_tool_iterations: u32,
    history: Vec<Message>,
    history_ceiling: usize,
    state: AgentState,
    cancelled: Arc<AtomicBool>,
    activity: Arc<dyn ActivityCallback>,
}

impl Agent {
    pub fn new(
        llm: Arc<Llm>,
        model: impl Into<String>,
        system_prompt: impl Into<String>,
        temperature: f32,
        tools: Vec<ToolSpec>,
        hooks: Hooks,
        max_tool_iterations: u32,
    ) -> Self {
        Self::with_activity_callback(
            llm,
            model,
            system_prompt,
            temperature,
            tools,
            hooks,
            max_tool_iterations,
            Arc::new(LoggingActivityCallback),
        )
    }

    /// Builds an agent whose tool-call observation is mirrored into
    /// `activity` instead of the default logging sink (spec §4.8: the
    /// registry's `ActivityCallback` is attached to every tool call this
    /// loop executes).
    #[allow(clippy::too_many_arguments)]
    pub fn with_activity_callback(
        llm: Arc<Llm>,
        model: impl Into<String>,
        system_prompt: impl Into<String>,
        temperature: f32,
        tools: Vec<ToolSpec>,
        hooks: Hooks,
        max_tool_iterations: u32,
        activity: Arc<dyn ActivityCallback>,
    ) -> Self {
        Self {
            llm,
            model: model.into(),
            temperature,
            system_prompt: system_prompt.into(),
            tools,
            hooks,
            max_tool_iterations,
            history: Vec::new(),
            history_ceiling: DEFAULT_HISTORY_CEILING,
            state: AgentState::Idle,
            cancelled: Arc::new(AtomicBool::new(false)),
            activity,
        }
    }

    /// Overrides the ConversationHistory bounded-growth ceiling (in
    /// estimated tokens). Defaults to [`DEFAULT_HISTORY_CEILING`].
    pub fn with_history_ceiling(mut self, ceiling: usize) -> Self {
        self.history_ceiling = ceiling;
        self
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    /// Applies the bounded-growth policy: once `history` exceeds
    /// `history_ceiling` estimated tokens, the oldest non-system messages
    /// are collapsed into a single synthetic summary message, preserving
    /// the system message and the most recent messages untouched.
    fn enforce_history_ceiling(&mut self) {
        if estimate_tokens(&self.history) <= self.history_ceiling {
            return;
        }
        self.history = summarize_when_over_ceiling(
            &self.history,
            self.history_ceiling,
            HISTORY_KEEP_RECENT,
            "(earlier conversation summarised to stay within the context budget)",
        );
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// A handle that, when set, cancels the in-progress turn at its next
    /// checkpoint (spec §4.7: "if the session is torn down mid-turn, the
    /// loop releases its wait on C4 and exits without emitting a final
    /// message"). C11 holds this handle and flips it on teardown.
    pub fn cancellation_handle(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    fn find_tool(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.iter().find(|t| t.tool.name() == name)
    }

    /// Runs one user turn to completion, emitting [`ChatEvent`]s in causal
    /// order (`user, thinking, tool_start, tool_result, …, final`) on
    /// `events`. Returns the final answer text, or an error if the turn
    /// failed unrecoverably (state transitions to `Failed` then back to
    /// `Idle` after the error event is emitted, per spec §4.7).
    pub async fn run_turn(
        &mut self,
        user_text: &str,
        events: &UnboundedSender<ChatEvent>,
    ) -> Result<String> {
        self.state = AgentState::Idle;
        let _ = events.send(ChatEvent::user(user_text));
        self.history.push(Message::user(user_text.to_string()));

        let mut iteration = 0u32;
        loop {
            if self.cancelled.load(Ordering::SeqCst) {
                self.state = AgentState::Idle;
                return Err(Error::other("turn cancelled during teardown"));
            }

            self.state = AgentState::Thinking;
            let _ = events.send(ChatEvent::agent(ChatEventKind::Thinking, ""));

            let tool_refs: Vec<_> = self.tools.iter().map(|t| t.tool.clone()).collect();
            let blocks = match self
                .llm
                .chat(
                    &self.model,
                    &self.system_prompt,
                    &self.history,
                    &tool_refs,
                    self.temperature,
                )
                .await
            {
                Ok(blocks) => blocks,
                Err(err) => {
                    self.state = AgentState::Failed;
                    let _ = events.send(ChatEvent::agent(ChatEventKind::Error, err.to_string()));
                    self.state = AgentState::Idle;
                    return Err(err);
                }
            };

            let (text_blocks, tool_calls): (Vec<_>, Vec<_>) = blocks
                .into_iter()
                .partition(|b| matches!(b, ContentBlock::Text(_)));

            if tool_calls.is_empty() {
                self.state = AgentState::Finalising;
                let answer = join_text(&text_blocks);
                if !text_blocks.is_empty() {
                    self.history.push(Message::assistant(text_blocks));
                }
                let _ = events.send(ChatEvent::agent(ChatEventKind::Final, answer.clone()));
                self.state = AgentState::Idle;
                self.enforce_history_ceiling();
                return Ok(answer);
            }

            iteration += 1;
            if iteration > self.max_tool_iterations {
                self.state = AgentState::Finalising;
                let answer = join_text(&text_blocks);
                if !text_blocks.is_empty() {
                    self.history.push(Message::assistant(text_blocks));
                }
                let _ = events.send(ChatEvent::agent(ChatEventKind::Final, answer.clone()));
                self.state = AgentState::Idle;
                self.enforce_history_ceiling();
                return Ok(answer);
            }

            self.state = AgentState::Executing;
            let mut all_blocks = text_blocks.clone();
            all_blocks.extend(tool_calls.clone());
            self.history.push(Message::assistant(all_blocks));

            let return_direct = self
                .run_tool_calls(&tool_calls, events)
                .await?;
            if let Some(answer) = return_direct {
                self.state = AgentState::Finalising;
                let _ = events.send(ChatEvent::agent(ChatEventKind::Final, answer.clone()));
                self.state = AgentState::Idle;
                self.enforce_history_ceiling();
                return Ok(answer);
            }

            // Executing → Thinking: every tool call from this round has now
            // been answered exactly once (spec §4.7 invariant).
        }
    }

    /// Executes every `ContentBlock::ToolUse` in `tool_calls`, sequentially
    /// unless every one of them is individually marked parallel-safe, then
    /// appends exactly one `ToolResult` message per call to `self.history`
    /// in call order before returning (spec §8: "∀ tool call observed by
    /// C7: exactly one ToolResult is appended before the next LLM
    /// request"). Returns `Some(answer)` if one of them is a
    /// `return_direct` tool.
    async fn run_tool_calls(
        &mut self,
        tool_calls: &[ContentBlock],
        events: &UnboundedSender<ChatEvent>,
    ) -> Result<Option<String>> {
        let all_parallel_safe = tool_calls.iter().all(|block| {
            if let ContentBlock::ToolUse(tu) = block {
                self.find_tool(&tu.name).is_some_and(|t| t.parallel_safe)
            } else {
                false
            }
        });

        let outcomes = if all_parallel_safe && tool_calls.len() > 1 {
            let futures = tool_calls
                .iter()
                .map(|block| self.execute_one(block, events));
            futures::future::join_all(futures)
                .await
                .into_iter()
                .collect::<Result<Vec<_>>>()?
        } else {
            let mut outcomes = Vec::with_capacity(tool_calls.len());
            for block in tool_calls {
                outcomes.push(self.execute_one(block, events).await?);
            }
            outcomes
        };

        let mut return_direct_answer = None;
        for outcome in outcomes {
            self.history
                .push(Message::user_with_blocks(vec![ContentBlock::ToolResult(
                    ToolResultBlock::new(&outcome.tool_use_id, outcome.result),
                )]));
            if return_direct_answer.is_none() {
                return_direct_answer = outcome.return_direct_answer;
            }
        }
        Ok(return_direct_answer)
    }

    async fn execute_one(
        &self,
        block: &ContentBlock,
        events: &UnboundedSender<ChatEvent>,
    ) -> Result<ToolOutcome> {
        let ContentBlock::ToolUse(tool_use) = block else {
            unreachable!("run_tool_calls only passes ContentBlock::ToolUse blocks")
        };

        let spec = self
            .find_tool(&tool_use.name)
            .ok_or_else(|| Error::tool(format!("Tool '{}' not found", tool_use.name)))?
            .clone();

        let _ = events.send(ChatEvent::agent(ChatEventKind::ToolStart, &tool_use.name));
        self.activity.on_tool_start(&tool_use.name, &tool_use.input);

        let history_snapshot: Vec<serde_json::Value> =
            self.history.iter().map(|_| serde_json::json!({})).collect();

        let pre_event = PreToolUseEvent::new(
            tool_use.name.clone(),
            tool_use.input.clone(),
            tool_use.id.clone(),
            history_snapshot.clone(),
        );

        let mut tool_input = tool_use.input.clone();
        let mut should_execute = true;
        let mut block_reason = None;
        if let Some(decision) = self.hooks.execute_pre_tool_use(pre_event).await {
            if !decision.continue_execution {
                should_execute = false;
                block_reason = decision.reason;
            } else if let Some(modified) = decision.modified_input {
                tool_input = modified;
            }
        }

        let result = if should_execute {
            match spec.tool.execute(tool_input.clone()).await {
                Ok(value) => value,
                Err(err) => serde_json::json!({
                    "error": err.to_string(),
                    "tool": tool_use.name,
                    "id": tool_use.id,
                }),
            }
        } else {
            serde_json::json!({
                "error": "Tool execution blocked by hook",
                "reason": block_reason.unwrap_or_else(|| "No reason provided".to_string()),
                "tool": tool_use.name,
                "id": tool_use.id,
            })
        };

        let post_event = PostToolUseEvent::new(
            tool_use.name.clone(),
            tool_input,
            tool_use.id.clone(),
            result.clone(),
            history_snapshot,
        );

        let mut final_result = result;
        if let Some(decision) = self.hooks.execute_post_tool_use(post_event).await {
            if let Some(modified) = decision.modified_input {
                final_result = modified;
            }
        }

        let _ = events.send(ChatEvent::agent(
            ChatEventKind::ToolResult,
            final_result.to_string(),
        ));
        self.activity.on_tool_result(&tool_use.name, &final_result);

        let return_direct_answer = if spec.return_direct {
            let text = final_result
                .get("text")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .unwrap_or_else(|| final_result.to_string());
            Some(text)
        } else {
            None
        };

        Ok(ToolOutcome {
            tool_use_id: tool_use.id.clone(),
            result: final_result,
            return_direct_answer,
        })
    }
}

/// One tool call's outcome: the raw result to feed back into history as a
/// `ToolResult` block, and the `return_direct` answer if that tool short-
/// circuits the turn.
struct ToolOutcome {
    tool_use_id: String,
    result: serde_json::Value,
    return_direct_answer: Option<String>,
}

fn join_text(blocks: &[ContentBlock]) -> String {
    blocks
        .iter()
        .filter_map(|b| match b {
            ContentBlock::Text(t) => Some(t.text.clone()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_is_idle() {
        let llm = Arc::new(Llm::new("http://localhost:1234/v1", "key").unwrap());
        let agent = Agent::new(llm, "m", "sys", 0.7, Vec::new(), Hooks::new(), 5);
        assert_eq!(agent.state(), AgentState::Idle);
        assert!(agent.history().is_empty());
    }

    #[test]
    fn cancellation_handle_is_shared() {
        let llm = Arc::new(Llm::new("http://localhost:1234/v1", "key").unwrap());
        let agent = Agent::new(llm, "m", "sys", 0.7, Vec::new(), Hooks::new(), 5);
        let handle = agent.cancellation_handle();
        handle.store(true, Ordering::SeqCst);
        assert!(agent.cancellation_handle().load(Ordering::SeqCst));
    }

    #[test]
    fn history_ceiling_summarises_oldest_messages_once_exceeded() {
        let llm = Arc::new(Llm::new("http://localhost:1234/v1", "key").unwrap());
        let mut agent = Agent::new(llm, "m", "sys", 0.7, Vec::new(), Hooks::new(), 5)
            .with_history_ceiling(50);

        for i in 0..20 {
            agent
                .history
                .push(Message::user(format!("message {i}").repeat(20)));
        }
        assert!(estimate_tokens(agent.history()) > 50);

        agent.enforce_history_ceiling();

        // Collapsed to one summary message plus the most recent ones.
        assert!(agent.history().len() <= HISTORY_KEEP_RECENT + 1);
    }
}

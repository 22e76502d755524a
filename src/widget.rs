//! Widget-maker tool (C6): an agentic sub-loop whose nested agent has a
//! single tool, `submit_widget_code`, with a bounded attempt count.
//!
//! Grounded on `widget_maker_tool.py`'s `_WidgetCodeSubmitTool`/
//! `NapariWidgetMakerTool`: a fresh submit tool (and attempt counter) is
//! created per outer invocation, the nested agent's only job is to keep
//! calling `submit_widget_code` until it succeeds or the bound is hit, and
//! the bound lives on the submit tool itself — not on the agent — so a
//! careless prompt cannot cause an unbounded loop (spec §9).

use crate::agent::Agent;
use crate::bridge::HostBridge;
use crate::hooks::Hooks;
use crate::host::{ChatEvent, HostHandle};
use crate::llm::Llm;
use crate::registry::ToolSpec;
use crate::tools::tool as tool_builder;
use crate::Result;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Default attempt bound, per spec §4.6 ("Enforces a hard attempt bound
/// (default 3)").
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Extracts code, locates the decorated widget-maker function, and registers
/// it with the host as a dockable widget. Returns `(success_text, function_name)`
/// on success, or an error description on failure.
pub type WidgetExecutor =
    Arc<dyn Fn(&str, &dyn HostHandle) -> Result<(String, String)> + Send + Sync>;

/// Shared outcome of the last successful submission, exposed for the outer
/// tool to record in the conversation's ancillary stores (spec §4.6).
#[derive(Default)]
struct SubmitState {
    last_successful_code: Mutex<Option<String>>,
    last_function_name: Mutex<Option<String>>,
    attempts: AtomicU32,
}

/// Builds the single-tool toolset (`submit_widget_code`) a nested agent
/// calls, enforcing `max_attempts` and returning `STOP: …` once exhausted.
fn build_submit_tool(
    bridge: HostBridge,
    executor: WidgetExecutor,
    state: Arc<SubmitState>,
    max_attempts: u32,
) -> ToolSpec {
    let tool = tool_builder(
        "submit_widget_code",
        "Submit magicgui widget code for execution in the host. The code argument must \
         contain a complete decorated widget function. Returns 'Success: ...' if the widget \
         was created, or an error message if it failed.",
    )
    .param("code", "string")
    .build(move |args| {
        let bridge = bridge.clone();
        let executor = executor.clone();
        let state = state.clone();
        Box::pin(async move {
            let attempt = state.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt > max_attempts {
                return Ok(json!({
                    "text": format!(
                        "STOP: Maximum attempts ({max_attempts}) exceeded. \
                         The widget could not be created. Do not retry."
                    )
                }));
            }

            let code = args
                .get("code")
                .and_then(|v| v.as_str())
                .ok_or_else(|| crate::Error::invalid_input("missing 'code' argument"))?
                .to_string();

            let outcome = bridge
                .submit_async({
                    let code = code.clone();
                    move |host| executor(&code, host)
                })
                .await
                .map_err(|_| crate::Error::BridgeShutdown)?;

            match outcome {
                Ok((success_text, function_name)) => {
                    *state.last_successful_code.lock().unwrap() = Some(code);
                    *state.last_function_name.lock().unwrap() = Some(function_name);
                    Ok(json!({ "text": success_text }))
                }
                Err(guard) => Ok(json!({
                    "text": format!(
                        "Error on attempt {attempt}/{max_attempts}: {}: {}\n\
                         Please fix the code and call submit_widget_code again.",
                        guard.exception_type_name, guard.exception_value
                    )
                })),
            }
        })
    });

    ToolSpec::new(tool)
}

/// Runs the nested agentic sub-loop to completion and reports whether a
/// widget was successfully created.
pub struct WidgetMakerTool {
    llm: Arc<Llm>,
    model: String,
    temperature: f32,
    bridge: HostBridge,
    executor: WidgetExecutor,
    max_attempts: u32,
}

impl WidgetMakerTool {
    pub fn new(
        llm: Arc<Llm>,
        model: impl Into<String>,
        temperature: f32,
        bridge: HostBridge,
        executor: WidgetExecutor,
    ) -> Self {
        Self {
            llm,
            model: model.into(),
            temperature,
            bridge,
            executor,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Runs the sub-agent against `query`, returning the outer tool's result
    /// text and, on success, the created widget's function name.
    pub async fn run(&self, query: &str, system_prompt: &str) -> Result<(String, Option<String>)> {
        let state = Arc::new(SubmitState::default());
        let submit_tool = build_submit_tool(
            self.bridge.clone(),
            self.executor.clone(),
            state.clone(),
            self.max_attempts,
        );

        let mut sub_agent = Agent::new(
            self.llm.clone(),
            self.model.clone(),
            system_prompt.to_string(),
            self.temperature,
            vec![submit_tool],
            Hooks::new(),
            self.max_attempts + 1,
        );

        let (tx, mut rx) = mpsc::unbounded_channel::<ChatEvent>();
        let _ = sub_agent.run_turn(query, &tx).await;
        drop(tx);
        while rx.recv().await.is_some() {}

        let last_code = state.last_successful_code.lock().unwrap().clone();
        let last_function = state.last_function_name.lock().unwrap().clone();

        if last_code.is_some() {
            Ok((
                "The requested widget has been successfully created and registered to the host.".to_string(),
                last_function,
            ))
        } else {
            Ok((
                "Could not create the requested widget after multiple attempts. \
                 Please try rephrasing the request or simplifying the widget."
                    .to_string(),
                None,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestHost;
    impl HostHandle for TestHost {
        fn describe(&self) -> String {
            "test".to_string()
        }
    }

    #[tokio::test]
    async fn submit_tool_enforces_attempt_bound_with_stop_sentinel() {
        let (bridge, join) = HostBridge::spawn(TestHost);
        let executor: WidgetExecutor =
            Arc::new(|_code, _host| Err(crate::Error::other("always fails")));
        let state = Arc::new(SubmitState::default());
        let spec = build_submit_tool(bridge.clone(), executor, state, 2);

        let r1 = spec.tool.execute(json!({"code": "a"})).await.unwrap();
        assert!(r1["text"].as_str().unwrap().contains("Error on attempt 1/2"));

        let r2 = spec.tool.execute(json!({"code": "b"})).await.unwrap();
        assert!(r2["text"].as_str().unwrap().contains("Error on attempt 2/2"));

        let r3 = spec.tool.execute(json!({"code": "c"})).await.unwrap();
        assert!(r3["text"].as_str().unwrap().starts_with("STOP:"));

        bridge.shutdown();
        join.join().unwrap();
    }

    #[tokio::test]
    async fn submit_tool_records_success_state() {
        let (bridge, join) = HostBridge::spawn(TestHost);
        let executor: WidgetExecutor =
            Arc::new(|_code, _host| Ok(("Success: docked".to_string(), "my_widget".to_string())));
        let state = Arc::new(SubmitState::default());
        let spec = build_submit_tool(bridge.clone(), executor, state.clone(), 3);

        let result = spec.tool.execute(json!({"code": "def f(): pass"})).await.unwrap();
        assert_eq!(result["text"], "Success: docked");
        assert_eq!(
            state.last_function_name.lock().unwrap().clone(),
            Some("my_widget".to_string())
        );

        bridge.shutdown();
        join.join().unwrap();
    }
}

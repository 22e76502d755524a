//! Base tool (C5): prompt assembly, sub-LLM invocation, code preparation
//! (C3), submission to the host bridge (C4), and the retry-with-error-
//! feedback loop every code-generating tool shares.
//!
//! Grounded on `base_napari_tool.py::run_omega_tool`/`_prepare_code`/
//! `_run_code_catch_errors_fix_and_try_again`. The Python original dynamically
//! execs a code string; this crate has no equivalent and does not try to fake
//! one. Instead, a concrete tool supplies an `Executor` — a closure that
//! interprets the prepared code string against a [`HostHandle`] however that
//! tool's domain defines "running" it (e.g. looking up a function by name
//! the widget-maker tool just registered). `BaseCodeTool` owns everything
//! domain-independent: prompt templating, C3, C4 submission, and retry.

use crate::bridge::HostBridge;
use crate::guard::ExceptionGuard;
use crate::host::HostHandle;
use crate::llm::Llm;
use crate::repair::{GeneratedCodeArtifact, RepairPipeline};
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Executes prepared code against the host. Returns the same convention the
/// source tools use: a string beginning with `Success:` on success.
pub type Executor =
    Arc<dyn Fn(&str, &dyn HostHandle) -> Result<String> + Send + Sync>;

/// Generic template the prompt is built from (spec §4.5 step 1):
/// `{input}`, `{instructions}`, `{last_generated_code}`, `{viewer_information}`,
/// `{system_information}` are the placeholders a concrete tool's
/// `prompt_template` is expected to reference.
pub struct BaseCodeTool {
    pub name: String,
    pub prompt_template: String,
    pub instructions: String,
    pub model: String,
    pub temperature: f32,
    llm: Arc<Llm>,
    bridge: HostBridge,
    repair: RepairPipeline,
    executor: Executor,
    last_generated_code: Mutex<Option<String>>,
}

impl BaseCodeTool {
    pub fn new(
        name: impl Into<String>,
        prompt_template: impl Into<String>,
        instructions: impl Into<String>,
        model: impl Into<String>,
        temperature: f32,
        llm: Arc<Llm>,
        bridge: HostBridge,
        repair: RepairPipeline,
        executor: Executor,
    ) -> Self {
        Self {
            name: name.into(),
            prompt_template: prompt_template.into(),
            instructions: instructions.into(),
            model: model.into(),
            temperature,
            llm,
            bridge,
            repair,
            executor,
            last_generated_code: Mutex::new(None),
        }
    }

    /// `run(query) → string` (spec §4.5): generate, repair, submit, and
    /// convert an `ExceptionGuard` into the `Error:`-prefixed Success-typed
    /// text convention the agent reasons over.
    pub async fn run(&self, query: &str, viewer_information: &str, system_information: &str) -> Result<String> {
        let artifact = self.generate_and_prepare(query, viewer_information, system_information).await?;
        self.submit(&artifact.code).await
    }

    /// `run_with_retry(code, query, error_floor, max_attempts=3)` (spec §4.5).
    /// On failure, re-prompts the LLM with the prior code and the captured
    /// error, retrying up to `max_attempts` times, then gives up.
    pub async fn run_with_retry(
        &self,
        query: &str,
        viewer_information: &str,
        system_information: &str,
        max_attempts: u32,
    ) -> Result<String> {
        let mut artifact = self
            .generate_and_prepare(query, viewer_information, system_information)
            .await?;
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match self.submit(&artifact.code).await {
                Ok(text) if !text.starts_with("Error:") => return Ok(text),
                Ok(text) => last_error = text,
                Err(err) => last_error = err.to_string(),
            }

            if attempt == max_attempts {
                return Err(crate::Error::code_repair_exhausted(attempt, last_error));
            }

            let mut variables = HashMap::new();
            variables.insert("input".to_string(), query.to_string());
            variables.insert("previous_code".to_string(), artifact.code.clone());
            variables.insert("error".to_string(), last_error.clone());
            let messages = self
                .llm
                .generate(
                    &self.model,
                    "Fix this code:\n{previous_code}\n\nIt failed with: {error}\n\nOriginal request: {input}",
                    &variables,
                    self.temperature,
                )
                .await?;
            let raw = messages_to_text(&messages);
            artifact = self.repair.prepare(&raw);
        }

        Err(crate::Error::code_repair_exhausted(max_attempts, last_error))
    }

    async fn generate_and_prepare(
        &self,
        query: &str,
        viewer_information: &str,
        system_information: &str,
    ) -> Result<GeneratedCodeArtifact> {
        let mut variables = HashMap::new();
        variables.insert("input".to_string(), query.to_string());
        variables.insert("instructions".to_string(), self.instructions.clone());
        let last_code = self.last_generated_code.lock().await.clone().unwrap_or_default();
        variables.insert("last_generated_code".to_string(), last_code);
        variables.insert("viewer_information".to_string(), viewer_information.to_string());
        variables.insert("system_information".to_string(), system_information.to_string());

        let messages = self
            .llm
            .generate(&self.model, &self.prompt_template, &variables, self.temperature)
            .await?;
        let raw = messages_to_text(&messages);
        let artifact = self.repair.prepare(&raw);
        *self.last_generated_code.lock().await = Some(artifact.code.clone());
        Ok(artifact)
    }

    /// Submits prepared `code` to the host bridge and converts any
    /// `ExceptionGuard` into the `Error:`-prefixed convention (spec §4.5 step 5).
    async fn submit(&self, code: &str) -> Result<String> {
        let executor = self.executor.clone();
        let code = code.to_string();
        let name = self.name.clone();
        let outcome = self
            .bridge
            .submit_async(move |host| executor(&code, host))
            .await
            .map_err(|_| crate::Error::BridgeShutdown)?;

        Ok(match outcome {
            Ok(text) => text,
            Err(guard) => format_exception_guard(&guard, &name),
        })
    }
}

fn format_exception_guard(guard: &ExceptionGuard, tool_name: &str) -> String {
    format!(
        "Error: {} with message: '{}' while using tool: {tool_name}.",
        guard.exception_type_name, guard.exception_value
    )
}

fn messages_to_text(messages: &[crate::types::Message]) -> String {
    messages
        .iter()
        .flat_map(|m| &m.content)
        .filter_map(|block| match block {
            crate::types::ContentBlock::Text(t) => Some(t.text.clone()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

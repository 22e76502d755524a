//! Tool registry (C8): discovers which tools are constructible given the
//! environment and assembles a per-session toolset.
//!
//! Grounded on `functions_info_tool.py`'s registry-introspection operation
//! (`describe_tools`) and on `callbacks_handler_tool.py`'s observation that
//! tool start/result events are mirrored into a logging sink in addition to
//! the chat UI (`ActivityCallback`, attached to every tool here).

use crate::llm::{Feature, Llm};
use crate::tools::Tool;
use std::sync::Arc;

/// Metadata the spec's `ToolDescriptor` carries beyond the teacher's `Tool`:
/// whether the tool's result short-circuits further reasoning (spec §4.7,
/// "a `return_direct` tool's result bypasses further reasoning") and whether
/// it may run concurrently with sibling tool calls in the same turn (spec
/// §4.7, "only if the toolset marks them as parallel-safe; the default is
/// sequential").
#[derive(Clone)]
pub struct ToolSpec {
    pub tool: Arc<Tool>,
    pub return_direct: bool,
    pub parallel_safe: bool,
}

impl ToolSpec {
    pub fn new(tool: Tool) -> Self {
        Self {
            tool: Arc::new(tool),
            return_direct: false,
            parallel_safe: false,
        }
    }

    pub fn return_direct(mut self, value: bool) -> Self {
        self.return_direct = value;
        self
    }

    pub fn parallel_safe(mut self, value: bool) -> Self {
        self.parallel_safe = value;
        self
    }
}

/// A tool-start/tool-result observer attached to every registered tool,
/// mirroring execution into a logging sink alongside the chat UI.
pub trait ActivityCallback: Send + Sync {
    fn on_tool_start(&self, tool_name: &str, input: &serde_json::Value);
    fn on_tool_result(&self, tool_name: &str, result: &serde_json::Value);
}

/// `ActivityCallback` that logs via the `log` facade, the registry's default.
pub struct LoggingActivityCallback;

impl ActivityCallback for LoggingActivityCallback {
    fn on_tool_start(&self, tool_name: &str, input: &serde_json::Value) {
        log::debug!("tool_start name={tool_name} input={input}");
    }

    fn on_tool_result(&self, tool_name: &str, result: &serde_json::Value) {
        log::debug!("tool_result name={tool_name} result={result}");
    }
}

/// Environment capabilities probed at session construction (spec §4.8).
pub struct Capabilities {
    pub vision_model: Option<String>,
    pub peer_port_available: bool,
    pub optional_image_libs: Vec<String>,
    pub platform: &'static str,
}

impl Capabilities {
    /// Probes `llm` for a vision-capable model and reports the running platform.
    pub fn probe(llm: &Llm, peer_port_available: bool, optional_image_libs: Vec<String>) -> Self {
        Self {
            vision_model: llm.best_model(&[Feature::Vision]),
            peer_port_available,
            optional_image_libs,
            platform: std::env::consts::ARCH,
        }
    }
}

/// Assembles and holds the toolset for one session.
pub struct ToolRegistry {
    tools: Vec<ToolSpec>,
    activity: Arc<dyn ActivityCallback>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            activity: Arc::new(LoggingActivityCallback),
        }
    }

    pub fn with_activity_callback(activity: Arc<dyn ActivityCallback>) -> Self {
        Self {
            tools: Vec::new(),
            activity,
        }
    }

    pub fn activity_callback(&self) -> Arc<dyn ActivityCallback> {
        self.activity.clone()
    }

    /// Registers a tool unconditionally.
    pub fn register(&mut self, spec: ToolSpec) -> &mut Self {
        self.tools.push(spec);
        self
    }

    /// Registers a tool only if `available` — models "removes
    /// platform-incompatible tools" and "adds built-in web-search tool only
    /// if the chosen model supports that feature" from spec §4.8.
    pub fn register_if(&mut self, available: bool, spec: ToolSpec) -> &mut Self {
        if available {
            self.tools.push(spec);
        }
        self
    }

    pub fn toolset(&self) -> Vec<ToolSpec> {
        self.tools.clone()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Lists registered tool names and descriptions, grounded on
    /// `functions_info_tool.py`'s "list available tool names" introspection.
    pub fn describe_tools(&self) -> Vec<(String, String)> {
        self.tools
            .iter()
            .map(|spec| (spec.tool.name().to_string(), spec.tool.description().to_string()))
            .collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::tool;
    use serde_json::json;

    fn dummy_tool(name: &str) -> Tool {
        tool(name, "a test tool")
            .param("query", "string")
            .build(|_args| Box::pin(async move { Ok(json!({"ok": true})) }))
    }

    #[test]
    fn register_if_skips_unavailable_tools() {
        let mut registry = ToolRegistry::new();
        registry.register_if(false, ToolSpec::new(dummy_tool("maybe")));
        assert!(registry.is_empty());

        registry.register_if(true, ToolSpec::new(dummy_tool("present")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn describe_tools_lists_name_and_description() {
        let mut registry = ToolRegistry::new();
        registry.register(ToolSpec::new(dummy_tool("alpha")));
        let described = registry.describe_tools();
        assert_eq!(described[0].0, "alpha");
        assert_eq!(described[0].1, "a test tool");
    }

    #[test]
    fn return_direct_and_parallel_safe_flags_are_preserved() {
        let spec = ToolSpec::new(dummy_tool("widget"))
            .return_direct(true)
            .parallel_safe(true);
        assert!(spec.return_direct);
        assert!(spec.parallel_safe);
    }
}

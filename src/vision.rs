//! Vision tool: describes what's on the host canvas or a named layer by
//! composing C5's screenshot collaborator with C1's vision call (spec §8
//! scenario 6: "the agent selects the vision tool, C5 screenshots via the
//! host service, calls C1-vision").
//!
//! Grounded on `viewer_vision_tool.py::NapariViewerVisionTool`: the query is
//! scanned for a `*layer_name*` reference (falling back to the whole canvas
//! when absent), the captured image is handed to a vision-capable model, and
//! the model's description is returned as the tool's result text. This tool
//! skips the sub-LLM code-generation pipeline entirely, per the source's own
//! note that `prompt`/`instructions` are unused for it.

use crate::host::ScreenshotService;
use crate::llm::Llm;
use crate::registry::ToolSpec;
use crate::tools::tool as tool_builder;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::json;
use std::sync::Arc;

/// Extracts an optional `*layer_name*` reference from a vision query,
/// returning the name (without asterisks) and the query unchanged.
fn extract_layer_name(query: &str) -> Option<&str> {
    let start = query.find('*')?;
    let rest = &query[start + 1..];
    let end = rest.find('*')?;
    Some(&rest[..end])
}

fn screenshot_mime(format: &str) -> &str {
    match format {
        "jpeg" | "jpg" => "image/jpeg",
        "gif" => "image/gif",
        _ => "image/png",
    }
}

/// Builds the `describe_view` tool: captures a screenshot via `screenshot`
/// (the whole canvas, or the layer named with `*layer_name*` syntax in the
/// query) and describes it with `llm`'s vision call.
pub fn build_vision_tool(
    llm: Arc<Llm>,
    model: impl Into<String>,
    temperature: f32,
    screenshot: Arc<dyn ScreenshotService>,
) -> ToolSpec {
    let model = model.into();
    let tool = tool_builder(
        "describe_view",
        "Utilize this tool for answering questions about what is visible on the viewer's \
         canvas or on a specific layer. The input should describe what you want to know. \
         Start with *layer_name* to ask about a specific layer, or *selected* for the \
         currently selected layer; omit it to describe the whole canvas. Do not include \
         code or mention layers/canvas/viewer explicitly in your question.",
    )
    .param("query", "string")
    .build(move |args| {
        let llm = llm.clone();
        let model = model.clone();
        let screenshot = screenshot.clone();
        Box::pin(async move {
            let query = args
                .get("query")
                .and_then(|v| v.as_str())
                .ok_or_else(|| crate::Error::invalid_input("missing 'query' argument"))?
                .to_string();

            let layer = extract_layer_name(&query);
            let shot = screenshot.capture(layer)?;
            let encoded = STANDARD.encode(&shot.bytes);
            let data_uri = format!("data:{};base64,{encoded}", screenshot_mime(&shot.format));

            let description = llm
                .generate_vision(&model, &query, &data_uri, temperature)
                .await?;

            Ok(json!({ "text": description }))
        })
    });

    ToolSpec::new(tool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_layer_name_from_starred_query() {
        assert_eq!(
            extract_layer_name("*nuclei* What is the background color?"),
            Some("nuclei")
        );
    }

    #[test]
    fn returns_none_for_query_without_layer_marker() {
        assert_eq!(extract_layer_name("Describe what you see"), None);
    }

    #[test]
    fn mime_defaults_to_png_for_unknown_format() {
        assert_eq!(screenshot_mime("unknown"), "image/png");
        assert_eq!(screenshot_mime("jpeg"), "image/jpeg");
    }

    struct FakeScreenshotService;
    impl ScreenshotService for FakeScreenshotService {
        fn capture(&self, _layer: Option<&str>) -> crate::Result<crate::host::Screenshot> {
            Ok(crate::host::Screenshot {
                format: "png".to_string(),
                bytes: vec![1, 2, 3, 4],
            })
        }
    }

    #[tokio::test]
    async fn vision_tool_executes_capture_then_describe() {
        let llm = Arc::new(Llm::new("http://localhost:1234/v1", "key").unwrap());
        let spec = build_vision_tool(llm, "vision-model", 0.0, Arc::new(FakeScreenshotService));
        assert_eq!(spec.tool.name(), "describe_view");
        assert!(spec.tool.description().contains("layer_name"));
    }
}

//! Cross-module contract: every gated stage of the code-repair pipeline
//! (C3) runs in order on a single markdown-fenced, multi-defect input, and
//! the repair log reflects exactly what was applied.

use omega_agent::{GeneratedCodeArtifact, Repair, RepairFlags, RepairPipeline};

#[test]
fn full_pipeline_fixes_imports_bad_calls_and_forbidden_lines_in_one_pass() {
    let pipeline = RepairPipeline::new(RepairFlags {
        fix_imports: true,
        fix_bad_calls: true,
        install_missing_packages: false,
    });

    let raw = "```python\n\
               from skimage import transform\n\
               v = napari.Viewer()\n\
               arr = np.zeros((4, 4))\n\
               skimage.transform.line(0, 0, 1, 1)\n\
               ```";

    let artifact: GeneratedCodeArtifact = pipeline.prepare(raw);

    assert!(artifact.code.contains("import numpy as np"));
    assert!(artifact.code.contains("skimage.draw.line(0, 0, 1, 1)"));
    assert!(!artifact.code.contains("napari.Viewer("));
    assert!(artifact.code.contains("arr = np.zeros((4, 4))"));

    let has_import_repair = artifact
        .repairs
        .iter()
        .any(|r| matches!(r, Repair::MissingImportsAdded(lines) if lines.iter().any(|l| l.contains("numpy"))));
    let has_bad_call_repair = artifact.repairs.iter().any(|r| {
        matches!(r, Repair::BadCallFixed { from, to } if from == "skimage.transform.line" && to == "skimage.draw.line")
    });
    let has_line_filter = artifact
        .repairs
        .iter()
        .any(|r| matches!(r, Repair::LineFiltered(line) if line.contains("napari.Viewer(")));

    assert!(has_import_repair, "missing-import repair should be logged");
    assert!(has_bad_call_repair, "bad-call repair should be logged");
    assert!(has_line_filter, "forbidden-line filter should be logged");
}

#[test]
fn gated_stages_are_skipped_when_their_flag_is_off() {
    let pipeline = RepairPipeline::new(RepairFlags {
        fix_imports: false,
        fix_bad_calls: false,
        install_missing_packages: false,
    });

    let artifact = pipeline.prepare("skimage.transform.line(0, 0, 1, 1)");

    assert!(!artifact.code.contains("import"));
    assert!(artifact.code.contains("skimage.transform.line"));
    assert!(artifact.repairs.is_empty());
}

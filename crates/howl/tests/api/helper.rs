use std::path::{Path, PathBuf};

use howl::{AnnotationLog, Annotator, AnnotatorConfig};
use serde_json::Value;

/// Drops the newline that follows an opening `r#"` so line 1 is the first
/// line of the program.
pub fn program(text: &str) -> &str {
    text.strip_prefix('\n').unwrap_or(text)
}

pub fn annotate(source: &str) -> AnnotationLog {
    annotate_with(source, AnnotatorConfig::default())
}

pub fn annotate_with(source: &str, config: AnnotatorConfig) -> AnnotationLog {
    let mut annotator = Annotator::new(AnnotatorConfig {
        capture_output: true,
        ..config
    });
    annotator
        .run_source("<test>", program(source))
        .expect("annotation run failed")
}

/// The log as plain JSON, for comparing against `json!` literals.
pub fn as_json(log: &AnnotationLog) -> Value {
    serde_json::from_str(&log.to_json()).expect("log is not valid JSON")
}

/// `(line, value)` pairs, with values shown the way they serialise.
pub fn values(log: &AnnotationLog) -> Vec<(u32, String)> {
    log.iter()
        .map(|record| {
            let shown = record
                .value
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default();
            (record.line_number, shown)
        })
        .collect()
}

pub fn write_program(dir: &Path, name: &str, text: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, program(text)).expect("failed to write program");
    path
}

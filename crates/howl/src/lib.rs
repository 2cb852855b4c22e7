//! Howl core library.
//!
//! Howl is a small Python-flavoured scripting language whose tree-walk
//! interpreter reports every line, call, return and exception to a tracer.
//! The annotation engine sits on that tracer: it watches the running program
//! and records the values of bare variables, `print` calls and lines tagged
//! with a `# ?` comment, producing a log that editors can show inline.
//!
//! The frontend (lexer, parser) and the runtime are usable on their own; the
//! [`driver::Annotator`] ties them together for the command line tools and
//! the websocket server.

pub mod annotate;
pub mod ast;
pub mod diagnostics;
pub mod driver;
pub mod lexer;
pub mod loader;
pub mod parser;
pub mod position;
pub mod runtime;
pub mod source;
pub mod tokens;
pub mod trace;

pub use annotate::{AnnotationLog, AnnotationRecord, FormattedValue, MacroResolution};
pub use diagnostics::{Diagnostic, HowlError, HowlResult};
pub use driver::{Annotator, AnnotatorConfig, OUTPUT_TAG, WORKER_STACK_SIZE};
pub use runtime::{ExecutionConfig, Interpreter, Value};
pub use source::{SourceFile, SourceId};
pub use trace::{EventKind, ScopeBinding, TraceControl, TraceEvent, Tracer};

/// Version of the Howl crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Annotates `source` in embedded mode and returns the JSON log.
pub fn annotate(source: &str) -> String {
    Annotator::default().test(source)
}

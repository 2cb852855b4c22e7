//! The annotation pipeline: classify each traced line, evaluate what it asks
//! for, and collect the results as records.

mod classify;
mod engine;
mod evaluate;
mod format;
mod intercept;
mod isolate;
mod record;

pub use classify::{AssignOperator, LineClassifier, LineKind, Macro};
pub use engine::{AnnotationEngine, EngineState, MacroResolution};
pub use evaluate::{evaluate, EvaluationError};
pub use format::{format_value, FormattedValue};
pub use intercept::intercept_print;
pub use isolate::{isolate, ScopeIsolator};
pub use record::{AnnotationLog, AnnotationRecord, PendingEvaluation};

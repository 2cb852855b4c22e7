//! Runs a target program under the annotation engine.

use crate::annotate::{AnnotationEngine, AnnotationLog, AnnotationRecord, LineClassifier, MacroResolution};
use crate::diagnostics::{Diagnostic, HowlError, HowlResult};
use crate::loader::Loader;
use crate::runtime::{ExecutionConfig, Interpreter, OutputSink, Signal};
use crate::source::SourceFile;
use crate::trace::FileFilter;
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{info, warn};

/// Tag in front of the JSON log on stdout in direct-invocation mode.
pub const OUTPUT_TAG: &str = "HOWL:";

/// Stack size for threads that run annotations; deep recursion in the
/// tree-walk interpreter needs more than the platform default.
pub const WORKER_STACK_SIZE: usize = 64 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct AnnotatorConfig {
    /// Text after `#` that turns a line into a macro.
    pub marker: String,
    pub resolution: MacroResolution,
    /// Collect program output instead of writing it to stdout.
    pub capture_output: bool,
    pub recursion_limit: usize,
}

impl Default for AnnotatorConfig {
    fn default() -> Self {
        Self {
            marker: "?".to_string(),
            resolution: MacroResolution::Immediate,
            capture_output: false,
            recursion_limit: ExecutionConfig::default().recursion_limit,
        }
    }
}

pub struct Annotator {
    config: AnnotatorConfig,
    engine: Rc<RefCell<AnnotationEngine>>,
    loader: Loader,
    cancel: Arc<AtomicBool>,
    captured: String,
}

impl Default for Annotator {
    fn default() -> Self {
        Self::new(AnnotatorConfig::default())
    }
}

impl Annotator {
    pub fn new(config: AnnotatorConfig) -> Self {
        let engine = AnnotationEngine::new(LineClassifier::new(config.marker.clone()), config.resolution);
        Self {
            config,
            engine: Rc::new(RefCell::new(engine)),
            loader: Loader::default(),
            cancel: Arc::new(AtomicBool::new(false)),
            captured: String::new(),
        }
    }

    pub fn config(&self) -> &AnnotatorConfig {
        &self.config
    }

    /// Raising this flag from another thread stops the running program.
    /// It stays raised for later runs until lowered.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn set_cancel_flag(&mut self, flag: Arc<AtomicBool>) {
        self.cancel = flag;
    }

    /// Called for every record as it is produced.
    pub fn on_record(&mut self, listener: impl FnMut(&AnnotationRecord) + 'static) {
        self.engine.borrow_mut().on_record(listener);
    }

    /// Program output of the latest run, when it was captured.
    pub fn captured_output(&self) -> &str {
        &self.captured
    }

    pub fn take_captured_output(&mut self) -> String {
        std::mem::take(&mut self.captured)
    }

    /// Annotates a file on disk. Sibling modules are importable.
    pub fn run_file(&mut self, path: &Path) -> HowlResult<AnnotationLog> {
        let file = self.loader.read(path)?;
        let dir = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        self.run(file, vec![dir])
    }

    /// Annotates in-memory source registered under `name`.
    pub fn run_source(&mut self, name: &str, text: &str) -> HowlResult<AnnotationLog> {
        let file = self.loader.source(name, text);
        self.run(file, Vec::new())
    }

    /// Embedded mode: the log as a JSON array, with program output captured.
    pub fn test(&mut self, text: &str) -> String {
        let capture = std::mem::replace(&mut self.config.capture_output, true);
        let result = self.run_source("<test>", text);
        self.config.capture_output = capture;
        match result {
            Ok(log) => log.to_json(),
            Err(err) => {
                warn!(error = %err, "embedded annotation run failed");
                "[]".to_string()
            }
        }
    }

    /// Direct-invocation mode. Prints the tagged log and returns the exit code.
    pub fn main(&mut self, path: &Path) -> i32 {
        match self.run_file(path) {
            Ok(log) => {
                println!("{OUTPUT_TAG} {}", log.to_json());
                if log.is_empty() {
                    1
                } else {
                    0
                }
            }
            Err(HowlError::MissingTarget(missing)) => {
                eprintln!("EXISTS_ERROR: {} doesn't exist", missing.display());
                1
            }
            Err(err) => {
                eprintln!("RUNTIME_ERROR: {err}");
                1
            }
        }
    }

    fn run(&mut self, file: SourceFile, search_paths: Vec<PathBuf>) -> HowlResult<AnnotationLog> {
        self.engine.borrow_mut().reset();
        self.captured.clear();
        info!(file = %file.name, resolution = ?self.config.resolution, "annotating");

        let program = match self.loader.parse(file.clone()) {
            Ok(loaded) => loaded.program,
            Err(err) => {
                let Some(diagnostic) = err.as_syntax_error() else {
                    return Err(err);
                };
                let record = syntax_record(&file, diagnostic);
                let mut engine = self.engine.borrow_mut();
                engine.abort(record);
                return Ok(engine.take_log());
            }
        };

        let mut vm = Interpreter::new(ExecutionConfig {
            recursion_limit: self.config.recursion_limit,
            search_paths,
        });
        vm.set_cancel_flag(self.cancel.clone());
        vm.set_output(if self.config.capture_output {
            OutputSink::Capture(String::new())
        } else {
            OutputSink::Stdout
        });
        vm.set_tracer(Box::new(FileFilter::new(file.name.clone(), self.engine.clone())));
        let (_, result) = vm.run_main(&file, &program);
        vm.clear_tracer();
        if let OutputSink::Capture(text) = vm.set_output(OutputSink::Discard) {
            self.captured = text;
        }

        let mut engine = self.engine.borrow_mut();
        match result {
            Ok(()) => engine.finish(&mut vm),
            Err(Signal::Raise(exception)) => {
                engine.finish(&mut vm);
                let line = exception.line_in(&file.name).unwrap_or(0);
                let detail = vm.exception_detail(&exception);
                engine.abort(AnnotationRecord::error(line, file.line_text(line).trim(), detail));
            }
            Err(Signal::Halt) => {}
            Err(Signal::Cancelled) => {
                warn!(file = %file.name, "annotation run cancelled");
                return Err(HowlError::Message(format!("{} was cancelled", file.name)));
            }
        }
        Ok(engine.take_log())
    }
}

fn syntax_record(file: &SourceFile, diagnostic: &Diagnostic) -> AnnotationRecord {
    let line = diagnostic.line().unwrap_or(1);
    AnnotationRecord::error(
        line,
        file.line_text(line).trim(),
        format!("SyntaxError: {}", diagnostic.message),
    )
}

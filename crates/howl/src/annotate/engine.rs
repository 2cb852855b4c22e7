use super::classify::{LineClassifier, LineKind, Macro};
use super::evaluate::{evaluate, EvaluationError};
use super::format::{format_value, FormattedValue};
use super::intercept::intercept_print;
use super::isolate::isolate;
use super::record::{AnnotationLog, AnnotationRecord, PendingEvaluation};
use crate::runtime::Interpreter;
use crate::trace::{EventKind, TraceControl, TraceEvent, Tracer};
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::fmt;
use tracing::{debug, info, warn};

/// When an assignment macro reads its target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MacroResolution {
    /// Evaluate the right-hand side at the line, before it runs.
    #[default]
    Immediate,
    /// Read the assigned target once the statement has finished.
    Deferred,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineState {
    Running,
    /// Stopped by a failed evaluation; the record is the last in the log.
    Halted(AnnotationRecord),
    Completed,
}

type Listener = Box<dyn FnMut(&AnnotationRecord)>;

/// Turns trace events into annotation records.
pub struct AnnotationEngine {
    classifier: LineClassifier,
    resolution: MacroResolution,
    log: AnnotationLog,
    pending: VecDeque<PendingEvaluation>,
    state: EngineState,
    listeners: Vec<Listener>,
}

impl fmt::Debug for AnnotationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnnotationEngine")
            .field("marker", &self.classifier.marker())
            .field("resolution", &self.resolution)
            .field("records", &self.log.len())
            .field("pending", &self.pending.len())
            .field("state", &self.state)
            .finish()
    }
}

impl Default for AnnotationEngine {
    fn default() -> Self {
        Self::new(LineClassifier::default(), MacroResolution::default())
    }
}

impl AnnotationEngine {
    pub fn new(classifier: LineClassifier, resolution: MacroResolution) -> Self {
        Self {
            classifier,
            resolution,
            log: AnnotationLog::new(),
            pending: VecDeque::new(),
            state: EngineState::Running,
            listeners: Vec::new(),
        }
    }

    /// Registers a callback invoked for every record appended to the log.
    pub fn on_record(&mut self, listener: impl FnMut(&AnnotationRecord) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    pub fn log(&self) -> &AnnotationLog {
        &self.log
    }

    pub fn take_log(&mut self) -> AnnotationLog {
        std::mem::take(&mut self.log)
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn resolution(&self) -> MacroResolution {
        self.resolution
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Clears the log, the pending queue and the state. Listeners stay.
    pub fn reset(&mut self) {
        self.log.clear();
        self.pending.clear();
        self.state = EngineState::Running;
    }

    pub fn handle_event(&mut self, event: &TraceEvent, vm: &mut Interpreter) -> TraceControl {
        match self.state {
            EngineState::Running => {}
            EngineState::Halted(_) => return TraceControl::Halt,
            EngineState::Completed => return TraceControl::Continue,
        }
        if let Err(control) = self.resolve_pending(event, vm) {
            return control;
        }
        if event.kind != EventKind::Line {
            return TraceControl::Continue;
        }

        let kind = self.classifier.classify(&event.source);
        debug!(line = event.line, depth = event.call_depth, kind = ?kind, "classified line");
        let outcome = match kind {
            LineKind::None => return TraceControl::Continue,
            LineKind::Variable(name) => evaluate(vm, &name, &event.scope).map(|value| {
                let value = format_value(vm, &value);
                Some(AnnotationRecord::value(event.line, event.source.clone(), value))
            }),
            LineKind::PrintCapture(arguments) => {
                intercept_print(vm, &arguments, &event.scope).map(|text| {
                    let value = FormattedValue::Text(text);
                    Some(AnnotationRecord::value(event.line, event.source.clone(), value))
                })
            }
            LineKind::Macro(found) => self.run_macro(event, found, vm),
        };
        match outcome {
            Ok(Some(record)) => {
                self.append(record);
                TraceControl::Continue
            }
            Ok(None) => TraceControl::Continue,
            Err(EvaluationError::Failed { detail }) => {
                self.halt(AnnotationRecord::error(event.line, event.source.clone(), detail))
            }
            Err(EvaluationError::Interrupted) => TraceControl::Halt,
        }
    }

    /// Resolves what is still queued and marks the run complete. Does
    /// nothing once halted.
    pub fn finish(&mut self, vm: &mut Interpreter) {
        if self.state != EngineState::Running {
            return;
        }
        while let Some(entry) = self.pending.pop_front() {
            if self.resolve(entry, vm).is_err() {
                return;
            }
        }
        self.state = EngineState::Completed;
        info!(records = self.log.len(), "annotation run completed");
    }

    /// Appends a terminal error produced outside the event stream, such as
    /// a parse failure or an uncaught exception.
    pub fn abort(&mut self, record: AnnotationRecord) {
        if matches!(self.state, EngineState::Halted(_)) {
            return;
        }
        self.halt(record);
    }

    fn run_macro(
        &mut self,
        event: &TraceEvent,
        found: Macro,
        vm: &mut Interpreter,
    ) -> Result<Option<AnnotationRecord>, EvaluationError> {
        if let (Some(targets), MacroResolution::Deferred) = (&found.target, self.resolution) {
            debug!(line = event.line, targets = %targets, "deferring assignment macro");
            self.pending.push_back(PendingEvaluation {
                targets: targets.clone(),
                originating_depth: event.call_depth,
                originating_record: AnnotationRecord::pending(event.line, targets.clone()),
                scope: event.scope.clone(),
            });
            return Ok(None);
        }
        let scope = isolate(&event.scope);
        let value = evaluate(vm, &found.immediate_expression(), &scope)?;
        let value = format_value(vm, &value);
        let source = found.target.unwrap_or_else(|| event.source.clone());
        Ok(Some(AnnotationRecord::value(event.line, source, value)))
    }

    /// Walks the queue against a non-call event. Entries wait while the
    /// event is deeper than where they were queued and go stale once it
    /// is shallower. An exception at or above an entry's depth means its
    /// assignment never completed. The interpreter always reports the
    /// originating frame's `Return` first, so only hand-built event streams
    /// leave entries stale.
    fn resolve_pending(&mut self, event: &TraceEvent, vm: &mut Interpreter) -> Result<(), TraceControl> {
        if self.pending.is_empty() || event.kind == EventKind::Call {
            return Ok(());
        }
        let mut waiting = VecDeque::with_capacity(self.pending.len());
        while let Some(entry) = self.pending.pop_front() {
            if event.kind == EventKind::Exception && event.call_depth <= entry.originating_depth {
                debug!(line = entry.originating_record.line_number, "assignment raised, dropping macro");
                continue;
            }
            match event.call_depth.cmp(&entry.originating_depth) {
                Ordering::Greater => waiting.push_back(entry),
                Ordering::Less => {
                    warn!(
                        line = entry.originating_record.line_number,
                        depth = entry.originating_depth,
                        "discarding stale pending evaluation"
                    );
                }
                Ordering::Equal => self.resolve(entry, vm)?,
            }
        }
        self.pending = waiting;
        Ok(())
    }

    fn resolve(&mut self, entry: PendingEvaluation, vm: &mut Interpreter) -> Result<(), TraceControl> {
        let isolated = isolate(&entry.scope);
        let mut record = entry.originating_record;
        match evaluate(vm, &entry.targets, &isolated) {
            Ok(value) => {
                record.value = Some(format_value(vm, &value));
                self.append(record);
                Ok(())
            }
            Err(EvaluationError::Failed { detail }) => {
                let failed = AnnotationRecord::error(record.line_number, record.source, detail);
                Err(self.halt(failed))
            }
            Err(EvaluationError::Interrupted) => Err(TraceControl::Halt),
        }
    }

    fn append(&mut self, record: AnnotationRecord) {
        for listener in &mut self.listeners {
            listener(&record);
        }
        self.log.push(record);
    }

    fn halt(&mut self, record: AnnotationRecord) -> TraceControl {
        warn!(
            line = record.line_number,
            detail = record.error_detail.as_deref().unwrap_or_default(),
            "annotation halted"
        );
        self.pending.clear();
        self.append(record.clone());
        self.state = EngineState::Halted(record);
        TraceControl::Halt
    }
}

impl Tracer for AnnotationEngine {
    fn on_event(&mut self, event: &TraceEvent, vm: &mut Interpreter) -> TraceControl {
        self.handle_event(event, vm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_program;
    use crate::runtime::{new_scope, ExecutionConfig, OutputSink, RuntimeResult, Signal};
    use crate::source::SourceFile;
    use crate::trace::ScopeBinding;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn run(program: &str, resolution: MacroResolution) -> (AnnotationEngine, RuntimeResult<()>) {
        let file = SourceFile::fragment(program);
        let parsed = parse_program(&file).unwrap();
        let engine = Rc::new(RefCell::new(AnnotationEngine::new(
            LineClassifier::default(),
            resolution,
        )));
        let mut vm = Interpreter::new(ExecutionConfig::default());
        vm.set_output(OutputSink::Discard);
        vm.set_tracer(Box::new(engine.clone()));
        let (_, result) = vm.run_main(&file, &parsed);
        vm.clear_tracer();
        engine.borrow_mut().finish(&mut vm);
        let engine = engine.replace(AnnotationEngine::default());
        (engine, result)
    }

    fn rows(engine: &AnnotationEngine) -> Vec<(u32, String, String)> {
        engine
            .log()
            .iter()
            .map(|record| {
                let shown = match (&record.value, &record.error_detail) {
                    (Some(value), _) => value.to_string(),
                    (None, Some(detail)) => format!("!{detail}"),
                    (None, None) => String::new(),
                };
                (record.line_number, record.source.clone(), shown)
            })
            .collect()
    }

    fn row(line: u32, source: &str, shown: &str) -> (u32, String, String) {
        (line, source.to_string(), shown.to_string())
    }

    #[test]
    fn variables_prints_and_macros() {
        let program = "x = 1\nx\nprint('x is', x)\ny = x + 1 # ?\nx * 10 # ?\n";
        let (engine, result) = run(program, MacroResolution::Immediate);
        assert!(result.is_ok());
        assert_eq!(
            rows(&engine),
            vec![
                row(2, "x", "1"),
                row(3, "print('x is', x)", "x is 1"),
                row(4, "y", "2"),
                row(5, "x * 10 # ?", "10"),
            ]
        );
        assert_eq!(engine.state(), &EngineState::Completed);
    }

    #[test]
    fn augmented_macros_show_the_new_value() {
        let (engine, _) = run("n = 4\nn += 3 # ?\nn\n", MacroResolution::Immediate);
        assert_eq!(rows(&engine), vec![row(2, "n", "7"), row(3, "n", "7")]);
    }

    #[test]
    fn failures_halt_the_program() {
        let program = "a = 1\n0/0 # ?\na\n";
        let (engine, result) = run(program, MacroResolution::Immediate);
        assert!(matches!(result, Err(Signal::Halt)));
        assert_eq!(
            rows(&engine),
            vec![row(2, "0/0 # ?", "!ZeroDivisionError: division by zero")]
        );
        assert!(matches!(engine.state(), EngineState::Halted(_)));
    }

    #[test]
    fn deferred_macros_wait_for_nested_calls() {
        let program = "def f():\n    return 5\ny = f() # ?\ny\n";
        let (engine, _) = run(program, MacroResolution::Deferred);
        assert_eq!(rows(&engine), vec![row(3, "y", "5"), row(4, "y", "5")]);
    }

    #[test]
    fn deferred_macros_resolve_at_the_end_of_the_program() {
        let (engine, _) = run("a, b = 1, 2 # ?\n", MacroResolution::Deferred);
        assert_eq!(rows(&engine), vec![row(1, "a, b", "(1, 2)")]);
        assert_eq!(engine.pending(), 0);
    }

    #[test]
    fn deferred_macros_are_dropped_when_the_assignment_raises() {
        let program = "def f():\n    raise ValueError('no')\ntry:\n    y = f() # ?\nexcept ValueError:\n    pass\n";
        let (engine, result) = run(program, MacroResolution::Deferred);
        assert!(result.is_ok());
        assert!(engine.log().is_empty());
        assert_eq!(engine.state(), &EngineState::Completed);
    }

    fn event(kind: EventKind, line: u32, source: &str, call_depth: usize) -> TraceEvent {
        TraceEvent {
            kind,
            filename: "<events>".into(),
            line,
            source: source.to_string(),
            call_depth,
            frame_id: call_depth as u64,
            scope: ScopeBinding::module(new_scope()),
        }
    }

    #[test]
    fn pending_entries_go_stale_when_their_frame_is_skipped() {
        let mut engine = AnnotationEngine::new(LineClassifier::default(), MacroResolution::Deferred);
        let mut vm = Interpreter::new(ExecutionConfig::default());

        let control = engine.handle_event(&event(EventKind::Line, 2, "y = 1 # ?", 1), &mut vm);
        assert_eq!(control, TraceControl::Continue);
        assert_eq!(engine.pending(), 1);

        let control = engine.handle_event(&event(EventKind::Line, 5, "z = 2", 0), &mut vm);
        assert_eq!(control, TraceControl::Continue);
        assert_eq!(engine.pending(), 0);

        engine.finish(&mut vm);
        assert!(engine.log().is_empty());
        assert_eq!(engine.state(), &EngineState::Completed);
    }

    #[test]
    fn listeners_see_every_record() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut engine = AnnotationEngine::default();
        let sink = seen.clone();
        engine.on_record(move |record| sink.borrow_mut().push(record.line_number));

        let file = SourceFile::fragment("a = 2\na\nb = a # ?\n");
        let parsed = parse_program(&file).unwrap();
        let engine = Rc::new(RefCell::new(engine));
        let mut vm = Interpreter::new(ExecutionConfig::default());
        vm.set_tracer(Box::new(engine.clone()));
        let (_, result) = vm.run_main(&file, &parsed);
        assert!(result.is_ok());
        assert_eq!(*seen.borrow(), vec![2, 3]);

        engine.borrow_mut().reset();
        assert!(engine.borrow().log().is_empty());
        assert_eq!(engine.borrow().state(), &EngineState::Running);
    }
}

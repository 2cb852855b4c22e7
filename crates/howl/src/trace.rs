//! Execution tracing hooks.
//!
//! The interpreter reports every line it is about to run, every call and
//! return of a user function, and every exception passing through a frame.
//! A [`Tracer`] receives these events together with the live scope of the
//! frame and may ask the interpreter to halt.

use crate::runtime::{Interpreter, Scope};
use serde::Serialize;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Line,
    Call,
    Return,
    Exception,
}

/// Live variable bindings of a frame. Module frames share one scope for
/// locals and globals.
#[derive(Debug, Clone)]
pub struct ScopeBinding {
    pub locals: Scope,
    pub globals: Scope,
    /// Scopes of enclosing functions, outermost first.
    pub enclosing: Vec<Scope>,
}

impl ScopeBinding {
    pub fn module(globals: Scope) -> Self {
        Self {
            locals: globals.clone(),
            globals,
            enclosing: Vec::new(),
        }
    }

    pub fn is_module_level(&self) -> bool {
        Rc::ptr_eq(&self.locals, &self.globals)
    }
}

#[derive(Debug, Clone)]
pub struct TraceEvent {
    pub kind: EventKind,
    pub filename: Arc<str>,
    pub line: u32,
    /// Trimmed text of the physical source line.
    pub source: String,
    /// 0 at module level, +1 per nested user-function frame.
    pub call_depth: usize,
    pub frame_id: u64,
    pub scope: ScopeBinding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceControl {
    Continue,
    Halt,
}

pub trait Tracer {
    fn on_event(&mut self, event: &TraceEvent, vm: &mut Interpreter) -> TraceControl;
}

impl<T: Tracer> Tracer for Rc<RefCell<T>> {
    fn on_event(&mut self, event: &TraceEvent, vm: &mut Interpreter) -> TraceControl {
        self.borrow_mut().on_event(event, vm)
    }
}

/// Forwards only the events raised by code from one file.
pub struct FileFilter<T> {
    filename: Arc<str>,
    inner: T,
}

impl<T: Tracer> FileFilter<T> {
    pub fn new(filename: impl Into<Arc<str>>, inner: T) -> Self {
        Self {
            filename: filename.into(),
            inner,
        }
    }
}

impl<T: Tracer> Tracer for FileFilter<T> {
    fn on_event(&mut self, event: &TraceEvent, vm: &mut Interpreter) -> TraceControl {
        if *event.filename != *self.filename {
            return TraceControl::Continue;
        }
        self.inner.on_event(event, vm)
    }
}

/// Collects events; handy for inspecting what the interpreter reports.
#[derive(Debug, Default)]
pub struct EventLog {
    pub events: Vec<(EventKind, u32, usize)>,
}

impl Tracer for EventLog {
    fn on_event(&mut self, event: &TraceEvent, _vm: &mut Interpreter) -> TraceControl {
        self.events.push((event.kind, event.line, event.call_depth));
        TraceControl::Continue
    }
}

//! Tree-walk interpreter for Howl programs.
//!
//! Values are reference counted and single threaded. The interpreter doubles
//! as the execution tracer: when a [`Tracer`] is installed it is called before
//! every new line, on every user-function call and return, and whenever an
//! exception leaves a statement.

mod builtins;
mod exceptions;
mod methods;
mod modules;
mod ops;
mod repr;
mod value;

pub use exceptions::{Exception, TraceEntry};
pub use repr::format_float;
pub use value::*;

use crate::ast::*;
use crate::loader::Loader;
use crate::source::SourceFile;
use crate::trace::{EventKind, ScopeBinding, TraceControl, TraceEvent, Tracer};
use indexmap::IndexMap;
use smol_str::SmolStr;
use std::cell::RefCell;
use std::collections::HashSet;
use std::path::PathBuf;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub type Scope = Rc<RefCell<IndexMap<SmolStr, Value>>>;

pub fn new_scope() -> Scope {
    Rc::new(RefCell::new(IndexMap::new()))
}

pub type RuntimeResult<T> = Result<T, Signal>;

/// Non-local exits that unwind the interpreter.
#[derive(Debug)]
pub enum Signal {
    /// A language-level exception.
    Raise(Box<Exception>),
    /// The tracer asked to stop. Handlers and `finally` blocks do not run.
    Halt,
    /// The cancellation flag was raised from another thread.
    Cancelled,
}

enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

/// Destination of `print`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputSink {
    Stdout,
    Capture(String),
    Discard,
}

#[derive(Clone, Debug)]
pub struct ExecutionConfig {
    pub recursion_limit: usize,
    /// Directories searched for `import name`.
    pub search_paths: Vec<PathBuf>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            recursion_limit: 300,
            search_paths: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Module,
    Function,
    Class,
    Comprehension,
    Eval,
}

#[derive(Debug)]
pub struct Frame {
    pub id: u64,
    pub kind: FrameKind,
    pub locals: Scope,
    pub globals: Scope,
    pub enclosing: Vec<Scope>,
    global_names: HashSet<SmolStr>,
    nonlocal_names: HashSet<SmolStr>,
    pub file: SourceFile,
    pub line: u32,
    last_traced_line: Option<u32>,
    pub depth: usize,
    function: Option<Rc<Function>>,
}

impl Frame {
    fn is_traced(&self) -> bool {
        matches!(
            self.kind,
            FrameKind::Module | FrameKind::Function | FrameKind::Class
        )
    }
}

pub struct Interpreter {
    frames: Vec<Frame>,
    root: Frame,
    builtins: Scope,
    exception_classes: IndexMap<&'static str, Rc<Class>>,
    object_class: Rc<Class>,
    modules: IndexMap<SmolStr, Value>,
    loader: Loader,
    tracer: Option<Box<dyn Tracer>>,
    output: OutputSink,
    cancel: Arc<AtomicBool>,
    config: ExecutionConfig,
    next_frame_id: u64,
    handling: Vec<Box<Exception>>,
    repr_guard: Vec<usize>,
}

impl Interpreter {
    pub fn new(config: ExecutionConfig) -> Self {
        let object_class = Rc::new(Class::new("object", Vec::new(), true));
        let root_scope = new_scope();
        let root = Frame {
            id: 0,
            kind: FrameKind::Eval,
            locals: root_scope.clone(),
            globals: root_scope,
            enclosing: Vec::new(),
            global_names: HashSet::new(),
            nonlocal_names: HashSet::new(),
            file: SourceFile::fragment(""),
            line: 0,
            last_traced_line: None,
            depth: 0,
            function: None,
        };
        let mut vm = Self {
            frames: Vec::new(),
            root,
            builtins: new_scope(),
            exception_classes: IndexMap::new(),
            object_class,
            modules: IndexMap::new(),
            loader: Loader::new(config.search_paths.clone()),
            tracer: None,
            output: OutputSink::Stdout,
            cancel: Arc::new(AtomicBool::new(false)),
            config,
            next_frame_id: 0,
            handling: Vec::new(),
            repr_guard: Vec::new(),
        };
        vm.install_exceptions();
        builtins::install(&mut vm);
        vm
    }

    pub fn set_tracer(&mut self, tracer: Box<dyn Tracer>) {
        self.tracer = Some(tracer);
    }

    pub fn clear_tracer(&mut self) -> Option<Box<dyn Tracer>> {
        self.tracer.take()
    }

    /// Flag checked before every statement; setting it stops the program.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn set_cancel_flag(&mut self, flag: Arc<AtomicBool>) {
        self.cancel = flag;
    }

    pub fn set_output(&mut self, sink: OutputSink) -> OutputSink {
        std::mem::replace(&mut self.output, sink)
    }

    pub fn output(&self) -> &OutputSink {
        &self.output
    }

    /// Runs `f` with `print` redirected to `sink`, returning the sink
    /// afterwards so captured text can be read.
    pub fn with_output<T>(
        &mut self,
        sink: OutputSink,
        f: impl FnOnce(&mut Self) -> T,
    ) -> (T, OutputSink) {
        let previous = self.set_output(sink);
        let result = f(self);
        let used = self.set_output(previous);
        (result, used)
    }

    pub(crate) fn write_output(&mut self, text: &str) {
        match &mut self.output {
            OutputSink::Stdout => {
                use std::io::Write;
                let stdout = std::io::stdout();
                let mut handle = stdout.lock();
                let _ = handle.write_all(text.as_bytes());
                let _ = handle.flush();
            }
            OutputSink::Capture(buffer) => buffer.push_str(text),
            OutputSink::Discard => {}
        }
    }

    pub fn builtins(&self) -> &Scope {
        &self.builtins
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        self.loader.search_paths()
    }

    /// Executes a parsed program as the `__main__` module. Returns the
    /// module scope, which stays readable after an exception.
    pub fn run_main(&mut self, file: &SourceFile, program: &Program) -> (Scope, RuntimeResult<()>) {
        let globals = new_scope();
        globals
            .borrow_mut()
            .insert("__name__".into(), Value::str("__main__"));
        let result = self.run_module_code(file, program, globals.clone());
        (globals, result)
    }

    fn run_module_code(
        &mut self,
        file: &SourceFile,
        program: &Program,
        globals: Scope,
    ) -> RuntimeResult<()> {
        let depth = self.frames.last().map(|f| f.depth + 1).unwrap_or(0);
        let frame = self.new_frame(
            FrameKind::Module,
            globals.clone(),
            globals,
            Vec::new(),
            file.clone(),
            depth,
            None,
        );
        self.push_frame(frame)?;
        let result = self.exec_block(&program.body).map(|_| ());
        self.frames.pop();
        result
    }

    /// Evaluates an expression against explicit bindings with no tracing of
    /// the evaluation itself.
    pub fn eval_in_scope(&mut self, expr: &Expr, scope: &ScopeBinding) -> RuntimeResult<Value> {
        let suspended = self.tracer.take();
        let depth = self.frames.last().map(|f| f.depth).unwrap_or(0);
        let file = self
            .frames
            .last()
            .map(|f| f.file.clone())
            .unwrap_or_else(|| SourceFile::fragment(""));
        let frame = self.new_frame(
            FrameKind::Eval,
            scope.locals.clone(),
            scope.globals.clone(),
            scope.enclosing.clone(),
            file,
            depth,
            None,
        );
        let result = match self.push_frame(frame) {
            Ok(()) => {
                let value = self.eval_expr(expr);
                self.frames.pop();
                value
            }
            Err(signal) => Err(signal),
        };
        if suspended.is_some() {
            self.tracer = suspended;
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn new_frame(
        &mut self,
        kind: FrameKind,
        locals: Scope,
        globals: Scope,
        enclosing: Vec<Scope>,
        file: SourceFile,
        depth: usize,
        function: Option<Rc<Function>>,
    ) -> Frame {
        self.next_frame_id += 1;
        Frame {
            id: self.next_frame_id,
            kind,
            locals,
            globals,
            enclosing,
            global_names: HashSet::new(),
            nonlocal_names: HashSet::new(),
            file,
            line: 0,
            last_traced_line: None,
            depth,
            function,
        }
    }

    fn push_frame(&mut self, frame: Frame) -> RuntimeResult<()> {
        if self.frames.len() >= self.config.recursion_limit {
            return Err(self.raise("RecursionError", "maximum recursion depth exceeded"));
        }
        self.frames.push(frame);
        Ok(())
    }

    /// Innermost frame. Outside of any program this is an untraced root
    /// frame with an empty scope.
    fn frame(&self) -> &Frame {
        self.frames.last().unwrap_or(&self.root)
    }

    fn frame_mut(&mut self) -> &mut Frame {
        match self.frames.last_mut() {
            Some(frame) => frame,
            None => &mut self.root,
        }
    }

    fn check_cancelled(&self) -> RuntimeResult<()> {
        if self.cancel.load(Ordering::Relaxed) {
            Err(Signal::Cancelled)
        } else {
            Ok(())
        }
    }

    fn emit(&mut self, kind: EventKind) -> RuntimeResult<()> {
        if self.tracer.is_none() {
            return Ok(());
        }
        let Some(frame) = self.frames.last() else {
            return Ok(());
        };
        if !frame.is_traced() {
            return Ok(());
        }
        let event = TraceEvent {
            kind,
            filename: frame.file.name.clone(),
            line: frame.line,
            source: frame.file.line_text(frame.line).trim().to_string(),
            call_depth: frame.depth,
            frame_id: frame.id,
            scope: ScopeBinding {
                locals: frame.locals.clone(),
                globals: frame.globals.clone(),
                enclosing: frame.enclosing.clone(),
            },
        };
        let Some(mut tracer) = self.tracer.take() else {
            return Ok(());
        };
        let control = tracer.on_event(&event, self);
        if self.tracer.is_none() {
            self.tracer = Some(tracer);
        }
        match control {
            TraceControl::Continue => Ok(()),
            TraceControl::Halt => Err(Signal::Halt),
        }
    }

    /// Moves the current frame to `line`, reporting it when it is new or
    /// when `force` is set (loop headers on every iteration).
    fn mark_line(&mut self, line: u32, force: bool) -> RuntimeResult<()> {
        let frame = self.frame_mut();
        frame.line = line;
        if force || frame.last_traced_line != Some(line) {
            frame.last_traced_line = Some(line);
            self.emit(EventKind::Line)?;
        }
        Ok(())
    }

    fn exec_block(&mut self, block: &Block) -> RuntimeResult<Flow> {
        for stmt in &block.statements {
            match self.run_statement(stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn run_statement(&mut self, stmt: &Stmt) -> RuntimeResult<Flow> {
        self.check_cancelled()?;
        self.mark_line(stmt.line(), false)?;
        match self.exec_stmt(stmt) {
            Err(Signal::Raise(mut exception)) => {
                let frame = self.frame();
                if !exception.traceback.iter().any(|t| t.frame_id == frame.id) {
                    exception.traceback.push(TraceEntry {
                        filename: frame.file.name.clone(),
                        line: frame.line,
                        frame_id: frame.id,
                    });
                    self.emit(EventKind::Exception)?;
                }
                Err(Signal::Raise(exception))
            }
            other => other,
        }
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> RuntimeResult<Flow> {
        match stmt {
            Stmt::Expr(expr, _) => {
                self.eval_expr(expr)?;
                Ok(Flow::Normal)
            }
            Stmt::Assign(assign) => {
                let value = self.eval_expr(&assign.value)?;
                for target in &assign.targets {
                    self.assign_target(target, value.clone())?;
                }
                Ok(Flow::Normal)
            }
            Stmt::AugAssign(aug) => {
                self.exec_aug_assign(aug)?;
                Ok(Flow::Normal)
            }
            Stmt::Pass(_) => Ok(Flow::Normal),
            Stmt::Break(_) => Ok(Flow::Break),
            Stmt::Continue(_) => Ok(Flow::Continue),
            Stmt::Return(ret) => {
                let value = match &ret.value {
                    Some(expr) => self.eval_expr(expr)?,
                    None => Value::None,
                };
                Ok(Flow::Return(value))
            }
            Stmt::Raise(raise) => Err(self.exec_raise(raise)?),
            Stmt::Global(names, _) => {
                let frame = self.frame_mut();
                frame.global_names.extend(names.iter().cloned());
                Ok(Flow::Normal)
            }
            Stmt::Nonlocal(names, _) => {
                let frame = self.frame_mut();
                frame.nonlocal_names.extend(names.iter().cloned());
                Ok(Flow::Normal)
            }
            Stmt::Delete(targets, _) => {
                for target in targets {
                    self.delete_target(target)?;
                }
                Ok(Flow::Normal)
            }
            Stmt::Assert(assert) => {
                let test = self.eval_expr(&assert.test)?;
                if !self.truthy(&test)? {
                    let args = match &assert.message {
                        Some(message) => vec![self.eval_expr(message)?],
                        None => Vec::new(),
                    };
                    return Err(self.raise_with_args("AssertionError", args));
                }
                Ok(Flow::Normal)
            }
            Stmt::Import(import) => {
                self.exec_import(import)?;
                Ok(Flow::Normal)
            }
            Stmt::FromImport(import) => {
                self.exec_from_import(import)?;
                Ok(Flow::Normal)
            }
            Stmt::If(if_stmt) => {
                let condition = self.eval_expr(&if_stmt.condition)?;
                if self.truthy(&condition)? {
                    self.exec_block(&if_stmt.then_branch)
                } else if let Some(else_branch) = &if_stmt.else_branch {
                    self.exec_block(else_branch)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::While(while_stmt) => self.exec_while(while_stmt),
            Stmt::For(for_stmt) => self.exec_for(for_stmt),
            Stmt::FunctionDef(def) => {
                let function = self.make_function(
                    def.name.clone(),
                    &def.params,
                    FunctionBody::Def(def.clone()),
                )?;
                self.store_name(&def.name, function);
                Ok(Flow::Normal)
            }
            Stmt::ClassDef(class_def) => {
                let class = self.exec_class_def(class_def)?;
                self.store_name(&class_def.name, class);
                Ok(Flow::Normal)
            }
            Stmt::Try(try_stmt) => self.exec_try(try_stmt),
        }
    }

    fn exec_while(&mut self, stmt: &WhileStmt) -> RuntimeResult<Flow> {
        let header = stmt.span.line();
        let mut first = true;
        loop {
            if !first {
                self.check_cancelled()?;
                self.mark_line(header, true)?;
            }
            first = false;
            let condition = self.eval_expr(&stmt.condition)?;
            if !self.truthy(&condition)? {
                break;
            }
            match self.exec_block(&stmt.body)? {
                Flow::Normal | Flow::Continue => {}
                Flow::Break => return Ok(Flow::Normal),
                flow @ Flow::Return(_) => return Ok(flow),
            }
        }
        match &stmt.orelse {
            Some(orelse) => self.exec_block(orelse),
            None => Ok(Flow::Normal),
        }
    }

    fn exec_for(&mut self, stmt: &ForStmt) -> RuntimeResult<Flow> {
        let header = stmt.span.line();
        let iterable = self.eval_expr(&stmt.iterable)?;
        let iterator = self.make_iter(&iterable)?;
        let mut first = true;
        loop {
            if !first {
                self.check_cancelled()?;
                self.mark_line(header, true)?;
            }
            first = false;
            let Some(item) = self.next_value(&iterator)? else {
                break;
            };
            self.assign_target(&stmt.target, item)?;
            match self.exec_block(&stmt.body)? {
                Flow::Normal | Flow::Continue => {}
                Flow::Break => return Ok(Flow::Normal),
                flow @ Flow::Return(_) => return Ok(flow),
            }
        }
        match &stmt.orelse {
            Some(orelse) => self.exec_block(orelse),
            None => Ok(Flow::Normal),
        }
    }

    fn exec_try(&mut self, stmt: &TryStmt) -> RuntimeResult<Flow> {
        let result = match self.exec_block(&stmt.body) {
            Err(Signal::Raise(exception)) => self.handle_exception(stmt, exception),
            Ok(Flow::Normal) => match &stmt.orelse {
                Some(orelse) => self.exec_block(orelse),
                None => Ok(Flow::Normal),
            },
            other => other,
        };
        let Some(finally) = &stmt.finally else {
            return result;
        };
        if matches!(result, Err(Signal::Halt | Signal::Cancelled)) {
            return result;
        }
        match self.exec_block(finally)? {
            Flow::Normal => result,
            flow => Ok(flow),
        }
    }

    fn handle_exception(&mut self, stmt: &TryStmt, exception: Box<Exception>) -> RuntimeResult<Flow> {
        for handler in &stmt.handlers {
            let matched = match &handler.kind {
                None => true,
                Some(kind) => {
                    let kind = self.eval_expr(kind)?;
                    self.exception_matches(&exception.value, &kind)?
                }
            };
            if !matched {
                continue;
            }
            if let Some(name) = &handler.name {
                self.store_name(name, exception.value.clone());
            }
            self.handling.push(exception);
            let result = self.exec_block(&handler.body);
            self.handling.pop();
            if let Some(name) = &handler.name {
                self.frame().locals.borrow_mut().shift_remove(name);
            }
            return result;
        }
        Err(Signal::Raise(exception))
    }

    fn exec_raise(&mut self, raise: &RaiseStmt) -> RuntimeResult<Signal> {
        let Some(expr) = &raise.exception else {
            return Ok(match self.handling.last() {
                Some(active) => Signal::Raise(Box::new(Exception {
                    value: active.value.clone(),
                    traceback: active.traceback.clone(),
                })),
                None => self.raise("RuntimeError", "No active exception to reraise"),
            });
        };
        let value = match self.eval_expr(expr)? {
            Value::Class(class) if class.is_subclass_named("BaseException") => {
                self.instantiate(class, Args::default())?
            }
            Value::Instance(instance) if instance.class.is_subclass_named("BaseException") => {
                Value::Instance(instance)
            }
            _ => {
                return Ok(self.raise("TypeError", "exceptions must derive from BaseException"));
            }
        };
        Ok(Signal::Raise(Box::new(Exception::new(value))))
    }

    fn exec_aug_assign(&mut self, aug: &AugAssignStmt) -> RuntimeResult<()> {
        match &aug.target {
            Expr::Identifier(name, _) => {
                let current = self.lookup_name(name)?;
                let rhs = self.eval_expr(&aug.value)?;
                let updated = self.inplace_op(aug.op, current, rhs)?;
                self.store_name(name, updated);
            }
            Expr::Field(field) => {
                let object = self.eval_expr(&field.target)?;
                let current = self.get_attribute(&object, &field.field)?;
                let rhs = self.eval_expr(&aug.value)?;
                let updated = self.inplace_op(aug.op, current, rhs)?;
                self.set_attribute(&object, &field.field, updated)?;
            }
            Expr::Index(index) => {
                let object = self.eval_expr(&index.target)?;
                let key = self.eval_expr(&index.index)?;
                let current = self.get_item(&object, &key)?;
                let rhs = self.eval_expr(&aug.value)?;
                let updated = self.inplace_op(aug.op, current, rhs)?;
                self.set_item(&object, key, updated)?;
            }
            _ => return Err(self.raise("SyntaxError", "illegal expression for augmented assignment")),
        }
        Ok(())
    }

    /// `a += b` extends lists in place; everything else rebinds.
    fn inplace_op(&mut self, op: BinaryOp, current: Value, rhs: Value) -> RuntimeResult<Value> {
        if let (BinaryOp::Add, Value::List(list)) = (op, &current) {
            let items = self.collect(&rhs)?;
            list.borrow_mut().extend(items);
            return Ok(current);
        }
        self.binary_op(op, current, rhs)
    }

    pub(crate) fn lookup_name(&mut self, name: &SmolStr) -> RuntimeResult<Value> {
        if let Some(value) = self.find_name(name) {
            return Ok(value);
        }
        let message = format!("name '{name}' is not defined");
        Err(self.raise("NameError", message))
    }

    fn find_name(&self, name: &str) -> Option<Value> {
        let frame = self.frame();
        if !frame.global_names.contains(name) {
            if let Some(value) = frame.locals.borrow().get(name) {
                return Some(value.clone());
            }
            for scope in frame.enclosing.iter().rev() {
                if let Some(value) = scope.borrow().get(name) {
                    return Some(value.clone());
                }
            }
        }
        if let Some(value) = frame.globals.borrow().get(name) {
            return Some(value.clone());
        }
        self.builtins.borrow().get(name).cloned()
    }

    pub(crate) fn store_name(&mut self, name: &SmolStr, value: Value) {
        let frame = self.frame();
        if frame.global_names.contains(name) {
            frame.globals.borrow_mut().insert(name.clone(), value);
            return;
        }
        if frame.nonlocal_names.contains(name) {
            if let Some(scope) = frame
                .enclosing
                .iter()
                .rev()
                .find(|scope| scope.borrow().contains_key(name))
            {
                scope.borrow_mut().insert(name.clone(), value);
                return;
            }
        }
        frame.locals.borrow_mut().insert(name.clone(), value);
    }

    fn delete_name(&mut self, name: &SmolStr) -> RuntimeResult<()> {
        let frame = self.frame();
        let scope = if frame.global_names.contains(name) {
            frame.globals.clone()
        } else {
            frame.locals.clone()
        };
        let removed = scope.borrow_mut().shift_remove(name);
        if removed.is_none() {
            let message = format!("name '{name}' is not defined");
            return Err(self.raise("NameError", message));
        }
        Ok(())
    }

    pub(crate) fn assign_target(&mut self, target: &Expr, value: Value) -> RuntimeResult<()> {
        match target {
            Expr::Identifier(name, _) => {
                self.store_name(name, value);
                Ok(())
            }
            Expr::Tuple(TupleExpr { elements, .. }) | Expr::List(ListExpr { elements, .. }) => {
                self.unpack_into(elements, value)
            }
            Expr::Field(field) => {
                let object = self.eval_expr(&field.target)?;
                self.set_attribute(&object, &field.field, value)
            }
            Expr::Index(index) => {
                let object = self.eval_expr(&index.target)?;
                if let Expr::Slice(slice) = &index.index {
                    let (lower, upper, step) = self.eval_slice_parts(slice)?;
                    return self.set_slice(&object, lower, upper, step, value);
                }
                let key = self.eval_expr(&index.index)?;
                self.set_item(&object, key, value)
            }
            Expr::Starred(inner, _) => self.assign_target(inner, value),
            _ => Err(self.raise("SyntaxError", "cannot assign to expression")),
        }
    }

    fn unpack_into(&mut self, targets: &[Expr], value: Value) -> RuntimeResult<()> {
        let items = self.collect(&value)?;
        let star = targets.iter().position(|t| matches!(t, Expr::Starred(..)));
        match star {
            None => {
                if items.len() != targets.len() {
                    let message = if items.len() < targets.len() {
                        format!(
                            "not enough values to unpack (expected {}, got {})",
                            targets.len(),
                            items.len()
                        )
                    } else {
                        format!("too many values to unpack (expected {})", targets.len())
                    };
                    return Err(self.raise("ValueError", message));
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign_target(target, item)?;
                }
            }
            Some(star) => {
                let after = targets.len() - star - 1;
                if items.len() < targets.len() - 1 {
                    let message = format!(
                        "not enough values to unpack (expected at least {}, got {})",
                        targets.len() - 1,
                        items.len()
                    );
                    return Err(self.raise("ValueError", message));
                }
                let mut items = items;
                let tail = items.split_off(items.len() - after);
                let middle = items.split_off(star);
                for (target, item) in targets[..star].iter().zip(items) {
                    self.assign_target(target, item)?;
                }
                self.assign_target(&targets[star], Value::list(middle))?;
                for (target, item) in targets[star + 1..].iter().zip(tail) {
                    self.assign_target(target, item)?;
                }
            }
        }
        Ok(())
    }

    fn delete_target(&mut self, target: &Expr) -> RuntimeResult<()> {
        match target {
            Expr::Identifier(name, _) => self.delete_name(name),
            Expr::Tuple(TupleExpr { elements, .. }) | Expr::List(ListExpr { elements, .. }) => {
                for element in elements {
                    self.delete_target(element)?;
                }
                Ok(())
            }
            Expr::Field(field) => {
                let object = self.eval_expr(&field.target)?;
                self.delete_attribute(&object, &field.field)
            }
            Expr::Index(index) => {
                let object = self.eval_expr(&index.target)?;
                if let Expr::Slice(slice) = &index.index {
                    let (lower, upper, step) = self.eval_slice_parts(slice)?;
                    return self.delete_slice(&object, lower, upper, step);
                }
                let key = self.eval_expr(&index.index)?;
                self.delete_item(&object, &key)
            }
            _ => Err(self.raise("SyntaxError", "cannot delete expression")),
        }
    }

    fn make_function(
        &mut self,
        name: SmolStr,
        params: &[Parameter],
        body: FunctionBody,
    ) -> RuntimeResult<Value> {
        let mut defaults = Vec::with_capacity(params.len());
        for param in params {
            defaults.push(match &param.default {
                Some(expr) => Some(self.eval_expr(expr)?),
                None => None,
            });
        }
        let frame = self.frame();
        let enclosing = match frame.kind {
            FrameKind::Function | FrameKind::Comprehension | FrameKind::Eval => {
                let mut scopes = frame.enclosing.clone();
                if !Rc::ptr_eq(&frame.locals, &frame.globals) {
                    scopes.push(frame.locals.clone());
                }
                scopes
            }
            FrameKind::Class => frame.enclosing.clone(),
            FrameKind::Module => Vec::new(),
        };
        Ok(Value::Function(Rc::new(Function {
            name,
            params: params.to_vec(),
            defaults,
            body,
            globals: frame.globals.clone(),
            enclosing,
            file: frame.file.clone(),
            owner: RefCell::new(Weak::new()),
        })))
    }

    fn exec_class_def(&mut self, def: &ClassDef) -> RuntimeResult<Value> {
        let mut bases = Vec::new();
        for base in &def.bases {
            match self.eval_expr(base)? {
                Value::Class(class) => bases.push(class),
                other => {
                    let message = format!(
                        "bases must be classes, not '{}'",
                        other.type_name()
                    );
                    return Err(self.raise("TypeError", message));
                }
            }
        }
        if bases.is_empty() {
            bases.push(self.object_class.clone());
        }

        let namespace = new_scope();
        let parent = self.frame();
        let globals = parent.globals.clone();
        let enclosing = match parent.kind {
            FrameKind::Module => Vec::new(),
            FrameKind::Class => parent.enclosing.clone(),
            _ => {
                let mut scopes = parent.enclosing.clone();
                scopes.push(parent.locals.clone());
                scopes
            }
        };
        let depth = parent.depth + 1;
        let file = parent.file.clone();
        let frame = self.new_frame(
            FrameKind::Class,
            namespace.clone(),
            globals,
            enclosing,
            file,
            depth,
            None,
        );
        self.push_frame(frame)?;
        self.frame_mut().line = def.span.line();
        let result = self
            .emit(EventKind::Call)
            .and_then(|_| self.exec_block(&def.body).map(|_| ()));
        if matches!(result, Ok(()) | Err(Signal::Raise(_))) {
            if let Err(signal) = self.emit(EventKind::Return) {
                self.frames.pop();
                return Err(signal);
            }
        }
        self.frames.pop();
        result?;

        let class = Rc::new(Class::new(def.name.clone(), bases, false));
        {
            let mut attrs = class.attrs.borrow_mut();
            for (name, value) in namespace.borrow().iter() {
                if let Value::Function(function) = value {
                    *function.owner.borrow_mut() = Rc::downgrade(&class);
                }
                attrs.insert(name.clone(), value.clone());
            }
        }
        Ok(Value::Class(class))
    }

    pub fn call_value(&mut self, callee: Value, args: Args) -> RuntimeResult<Value> {
        match callee {
            Value::Function(function) => self.call_function(function, args),
            Value::Builtin(builtin) => (builtin.func)(self, args),
            Value::BoundMethod(method) => {
                let args = args.with_receiver(method.receiver.clone());
                self.call_value(method.function.clone(), args)
            }
            Value::NativeMethod(method) => {
                methods::call_method(self, &method.receiver, &method.name, args)
            }
            Value::Class(class) => self.instantiate(class, args),
            Value::Instance(ref instance) => {
                if let Some(call) = instance.class.lookup("__call__") {
                    let args = args.with_receiver(callee.clone());
                    return self.call_value(call, args);
                }
                let message = format!("'{}' object is not callable", callee.type_name());
                Err(self.raise("TypeError", message))
            }
            other => {
                let message = format!("'{}' object is not callable", other.type_name());
                Err(self.raise("TypeError", message))
            }
        }
    }

    fn call_function(&mut self, function: Rc<Function>, args: Args) -> RuntimeResult<Value> {
        let locals = self.bind_arguments(&function, args)?;
        let depth = self.frames.last().map(|f| f.depth + 1).unwrap_or(0);
        let frame = self.new_frame(
            FrameKind::Function,
            locals,
            function.globals.clone(),
            function.enclosing.clone(),
            function.file.clone(),
            depth,
            Some(function.clone()),
        );
        self.push_frame(frame)?;
        let result = self.run_function_body(&function);
        self.frames.pop();
        result
    }

    fn run_function_body(&mut self, function: &Function) -> RuntimeResult<Value> {
        self.frame_mut().line = function.def_line();
        self.emit(EventKind::Call)?;
        let outcome = match &function.body {
            FunctionBody::Def(def) => self.exec_block(&def.body).map(|flow| match flow {
                Flow::Return(value) => value,
                _ => Value::None,
            }),
            FunctionBody::Lambda(lambda) => self
                .mark_line(lambda.body.span().line(), false)
                .and_then(|_| self.eval_expr(&lambda.body)),
        };
        if matches!(outcome, Ok(_) | Err(Signal::Raise(_))) {
            self.emit(EventKind::Return)?;
        }
        outcome
    }

    fn bind_arguments(&mut self, function: &Function, mut args: Args) -> RuntimeResult<Scope> {
        let name = &function.name;
        let locals = new_scope();
        let mut bound: IndexMap<SmolStr, Value> = IndexMap::new();
        let positional_params: Vec<&Parameter> = function
            .params
            .iter()
            .filter(|p| p.kind == ParamKind::Positional)
            .collect();
        let varargs = function.params.iter().find(|p| p.kind == ParamKind::VarArgs);
        let kwargs = function.params.iter().find(|p| p.kind == ParamKind::KwArgs);

        let given = args.positional.len();
        let mut extra = Vec::new();
        for (index, value) in std::mem::take(&mut args.positional).into_iter().enumerate() {
            match positional_params.get(index) {
                Some(param) => {
                    bound.insert(param.name.clone(), value);
                }
                None => extra.push(value),
            }
        }
        if !extra.is_empty() && varargs.is_none() {
            let message = format!(
                "{name}() takes {} positional argument{} but {given} {} given",
                positional_params.len(),
                if positional_params.len() == 1 { "" } else { "s" },
                if given == 1 { "was" } else { "were" },
            );
            return Err(self.raise("TypeError", message));
        }

        let mut extra_keywords = Dict::new();
        for (key, value) in std::mem::take(&mut args.keywords) {
            let accepts = function.params.iter().any(|p| {
                p.name == key && matches!(p.kind, ParamKind::Positional | ParamKind::KeywordOnly)
            });
            if accepts {
                if bound.contains_key(&key) {
                    let message = format!("{name}() got multiple values for argument '{key}'");
                    return Err(self.raise("TypeError", message));
                }
                bound.insert(key, value);
            } else if kwargs.is_some() {
                let key_value = Value::str(key.as_str());
                extra_keywords.insert(HashKey::Str(key.as_str().into()), key_value, value);
            } else {
                let message = format!("{name}() got an unexpected keyword argument '{key}'");
                return Err(self.raise("TypeError", message));
            }
        }

        let mut scope = locals.borrow_mut();
        for (param, default) in function.params.iter().zip(&function.defaults) {
            match param.kind {
                ParamKind::VarArgs => {
                    scope.insert(param.name.clone(), Value::tuple(std::mem::take(&mut extra)));
                }
                ParamKind::KwArgs => {
                    scope.insert(
                        param.name.clone(),
                        Value::dict(std::mem::take(&mut extra_keywords)),
                    );
                }
                ParamKind::Positional | ParamKind::KeywordOnly => {
                    let value = match bound.shift_remove(&param.name) {
                        Some(value) => value,
                        None => match default {
                            Some(default) => default.clone(),
                            None => {
                                drop(scope);
                                let what = if param.kind == ParamKind::Positional {
                                    "positional"
                                } else {
                                    "keyword-only"
                                };
                                let message = format!(
                                    "{name}() missing 1 required {what} argument: '{}'",
                                    param.name
                                );
                                return Err(self.raise("TypeError", message));
                            }
                        },
                    };
                    scope.insert(param.name.clone(), value);
                }
            }
        }
        drop(scope);
        Ok(locals)
    }

    pub(crate) fn instantiate(&mut self, class: Rc<Class>, args: Args) -> RuntimeResult<Value> {
        let instance = Value::Instance(Rc::new(Instance::new(class.clone())));
        if class.is_subclass_named("BaseException") {
            if let Value::Instance(inner) = &instance {
                inner
                    .attrs
                    .borrow_mut()
                    .insert("args".into(), Value::tuple(args.positional.clone()));
            }
        }
        match class.lookup("__init__") {
            Some(init) => {
                let result = self.call_value(init, args.with_receiver(instance.clone()))?;
                if !result.is_none() {
                    return Err(self.raise("TypeError", "__init__() should return None"));
                }
            }
            None => {
                if !args.positional.is_empty() || !args.keywords.is_empty() {
                    let message = format!("{}() takes no arguments", class.name);
                    return Err(self.raise("TypeError", message));
                }
            }
        }
        Ok(instance)
    }

    /// Looks up a method on the value's class (not the instance), bound to it.
    pub(crate) fn special_method(&self, value: &Value, name: &str) -> Option<Value> {
        let Value::Instance(instance) = value else {
            return None;
        };
        let function = instance.class.lookup(name)?;
        Some(Value::BoundMethod(Rc::new(BoundMethod {
            receiver: value.clone(),
            function,
        })))
    }

    pub(crate) fn call_special(
        &mut self,
        value: &Value,
        name: &str,
        args: Vec<Value>,
    ) -> RuntimeResult<Option<Value>> {
        match self.special_method(value, name) {
            Some(method) => Ok(Some(self.call_value(method, Args::new(args))?)),
            None => Ok(None),
        }
    }

    pub(crate) fn get_attribute(&mut self, object: &Value, name: &str) -> RuntimeResult<Value> {
        match object {
            Value::Instance(instance) => {
                if let Some(value) = instance.get_attr(name) {
                    return Ok(value);
                }
                if name == "__class__" {
                    return Ok(Value::Class(instance.class.clone()));
                }
                if name == "__dict__" {
                    let mut dict = Dict::new();
                    for (key, value) in instance.attrs.borrow().iter() {
                        dict.insert(HashKey::Str(key.as_str().into()), Value::str(key.as_str()), value.clone());
                    }
                    return Ok(Value::dict(dict));
                }
                if let Some(value) = instance.class.lookup(name) {
                    return Ok(bind_to(object, value));
                }
                if let Some(getattr) = instance.class.lookup("__getattr__") {
                    let args = Args::new(vec![object.clone(), Value::str(name)]);
                    return self.call_value(getattr, args);
                }
                let message = format!(
                    "'{}' object has no attribute '{name}'",
                    instance.class.name
                );
                Err(self.raise("AttributeError", message))
            }
            Value::Class(class) => {
                if name == "__name__" {
                    return Ok(Value::str(class.name.as_str()));
                }
                if name == "__bases__" {
                    return Ok(Value::tuple(
                        class.bases.iter().cloned().map(Value::Class).collect(),
                    ));
                }
                if let Some(value) = class.lookup(name) {
                    return Ok(value);
                }
                let message = format!("type object '{}' has no attribute '{name}'", class.name);
                Err(self.raise("AttributeError", message))
            }
            Value::Module(module) => {
                if name == "__name__" {
                    return Ok(Value::str(module.name.as_str()));
                }
                if let Some(value) = module.scope.borrow().get(name).cloned() {
                    return Ok(value);
                }
                let message = format!("module '{}' has no attribute '{name}'", module.name);
                Err(self.raise("AttributeError", message))
            }
            Value::Super(proxy) => {
                let receiver_class = match &proxy.receiver {
                    Value::Instance(instance) => instance.class.clone(),
                    Value::Class(class) => class.clone(),
                    _ => proxy.class.clone(),
                };
                let mro = receiver_class.mro();
                let start = mro
                    .iter()
                    .position(|class| Rc::ptr_eq(class, &proxy.class))
                    .map(|index| index + 1)
                    .unwrap_or(mro.len());
                for class in &mro[start..] {
                    if let Some(value) = class.attrs.borrow().get(name).cloned() {
                        return Ok(bind_to(&proxy.receiver, value));
                    }
                }
                let message = format!("'super' object has no attribute '{name}'");
                Err(self.raise("AttributeError", message))
            }
            Value::Function(function) if name == "__name__" => {
                Ok(Value::str(function.name.as_str()))
            }
            Value::Builtin(builtin) if name == "__name__" => Ok(Value::str(builtin.name)),
            Value::Int(_) | Value::Bool(_) if name == "real" => {
                Ok(Value::Int(object.as_int().unwrap_or_default()))
            }
            _ => {
                if methods::has_method(object, name) {
                    return Ok(Value::NativeMethod(Rc::new(NativeMethod {
                        receiver: object.clone(),
                        name: name.into(),
                    })));
                }
                let message = format!(
                    "'{}' object has no attribute '{name}'",
                    object.type_name()
                );
                Err(self.raise("AttributeError", message))
            }
        }
    }

    pub(crate) fn set_attribute(&mut self, object: &Value, name: &str, value: Value) -> RuntimeResult<()> {
        match object {
            Value::Instance(instance) => {
                if let Some(setattr) = instance.class.lookup("__setattr__") {
                    let args = Args::new(vec![object.clone(), Value::str(name), value]);
                    self.call_value(setattr, args)?;
                    return Ok(());
                }
                instance.attrs.borrow_mut().insert(name.into(), value);
                Ok(())
            }
            Value::Class(class) => {
                class.attrs.borrow_mut().insert(name.into(), value);
                Ok(())
            }
            Value::Module(module) => {
                module.scope.borrow_mut().insert(name.into(), value);
                Ok(())
            }
            other => {
                let message = format!(
                    "'{}' object has no attribute '{name}'",
                    other.type_name()
                );
                Err(self.raise("AttributeError", message))
            }
        }
    }

    fn delete_attribute(&mut self, object: &Value, name: &str) -> RuntimeResult<()> {
        let removed = match object {
            Value::Instance(instance) => instance.attrs.borrow_mut().shift_remove(name),
            Value::Class(class) => class.attrs.borrow_mut().shift_remove(name),
            Value::Module(module) => module.scope.borrow_mut().shift_remove(name),
            _ => None,
        };
        if removed.is_none() {
            let message = format!("'{}' object has no attribute '{name}'", object.type_name());
            return Err(self.raise("AttributeError", message));
        }
        Ok(())
    }

    pub(crate) fn eval_expr(&mut self, expr: &Expr) -> RuntimeResult<Value> {
        match expr {
            Expr::Literal(literal, _) => Ok(match literal {
                Literal::Int(v) => Value::Int(*v),
                Literal::Float(v) => Value::Float(*v),
                Literal::Bool(v) => Value::Bool(*v),
                Literal::String(v) => Value::str(v.as_str()),
                Literal::None => Value::None,
                Literal::Ellipsis => Value::str("Ellipsis"),
            }),
            Expr::FormatString(parts, _) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        FormatPart::Text(text) => out.push_str(text),
                        FormatPart::Field {
                            expr,
                            conversion,
                            spec,
                        } => {
                            let mut value = self.eval_expr(expr)?;
                            match conversion {
                                Some('r') | Some('a') => value = Value::str(self.repr(&value)?),
                                Some('s') => value = Value::str(self.str(&value)?),
                                _ => {}
                            }
                            let spec = spec.as_deref().unwrap_or("");
                            out.push_str(&self.format_with_spec(&value, spec)?);
                        }
                    }
                }
                Ok(Value::str(out))
            }
            Expr::Identifier(name, _) => self.lookup_name(name),
            Expr::Binary(binary) => match binary.op {
                BinaryOp::And => {
                    let left = self.eval_expr(&binary.left)?;
                    if !self.truthy(&left)? {
                        return Ok(left);
                    }
                    self.eval_expr(&binary.right)
                }
                BinaryOp::Or => {
                    let left = self.eval_expr(&binary.left)?;
                    if self.truthy(&left)? {
                        return Ok(left);
                    }
                    self.eval_expr(&binary.right)
                }
                op => {
                    let left = self.eval_expr(&binary.left)?;
                    let right = self.eval_expr(&binary.right)?;
                    self.binary_op(op, left, right)
                }
            },
            Expr::Unary(unary) => {
                let value = self.eval_expr(&unary.expr)?;
                self.unary_op(unary.op, value)
            }
            Expr::Compare(compare) => {
                let mut left = self.eval_expr(&compare.left)?;
                for (op, right) in &compare.comparisons {
                    let right = self.eval_expr(right)?;
                    if !self.compare(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::Call(call) => {
                let callee = self.eval_expr(&call.function)?;
                let args = self.eval_arguments(&call.args)?;
                self.call_value(callee, args)
            }
            Expr::Field(field) => {
                let object = self.eval_expr(&field.target)?;
                self.get_attribute(&object, &field.field)
            }
            Expr::Index(index) => {
                let object = self.eval_expr(&index.target)?;
                if let Expr::Slice(slice) = &index.index {
                    let (lower, upper, step) = self.eval_slice_parts(slice)?;
                    return self.get_slice(&object, lower, upper, step);
                }
                let key = self.eval_expr(&index.index)?;
                self.get_item(&object, &key)
            }
            Expr::Slice(_) => Err(self.raise("SyntaxError", "slice outside of a subscript")),
            Expr::IfElse(if_else) => {
                let condition = self.eval_expr(&if_else.condition)?;
                if self.truthy(&condition)? {
                    self.eval_expr(&if_else.then_value)
                } else {
                    self.eval_expr(&if_else.else_value)
                }
            }
            Expr::List(list) => Ok(Value::list(self.eval_elements(&list.elements)?)),
            Expr::Tuple(tuple) => Ok(Value::tuple(self.eval_elements(&tuple.elements)?)),
            Expr::Set(set) => {
                let items = self.eval_elements(&set.elements)?;
                let mut out = Set::new();
                for item in items {
                    let key = self.hash_key(&item)?;
                    out.insert(key, item);
                }
                Ok(Value::set(out))
            }
            Expr::Dict(dict) => {
                let mut out = Dict::new();
                for entry in &dict.entries {
                    match entry {
                        DictEntry::Pair(key, value) => {
                            let key = self.eval_expr(key)?;
                            let value = self.eval_expr(value)?;
                            let hash = self.hash_key(&key)?;
                            out.insert(hash, key, value);
                        }
                        DictEntry::Unpack(expr) => {
                            let source = self.eval_expr(expr)?;
                            let Value::Dict(source) = source else {
                                let message = format!(
                                    "'{}' object is not a mapping",
                                    source.type_name()
                                );
                                return Err(self.raise("TypeError", message));
                            };
                            for (key, value) in source.borrow().iter() {
                                let hash = self.hash_key(key)?;
                                out.insert(hash, key.clone(), value.clone());
                            }
                        }
                    }
                }
                Ok(Value::dict(out))
            }
            Expr::Starred(..) => Err(self.raise("SyntaxError", "can't use starred expression here")),
            Expr::Comprehension(comprehension) => self.eval_comprehension(comprehension),
            Expr::Lambda(lambda) => self.make_function(
                "<lambda>".into(),
                &lambda.params,
                FunctionBody::Lambda(lambda.clone()),
            ),
        }
    }

    fn eval_elements(&mut self, elements: &[Expr]) -> RuntimeResult<Vec<Value>> {
        let mut items = Vec::with_capacity(elements.len());
        for element in elements {
            if let Expr::Starred(inner, _) = element {
                let value = self.eval_expr(inner)?;
                items.extend(self.collect(&value)?);
            } else {
                items.push(self.eval_expr(element)?);
            }
        }
        Ok(items)
    }

    fn eval_arguments(&mut self, arguments: &[Argument]) -> RuntimeResult<Args> {
        let mut args = Args::default();
        for argument in arguments {
            match argument {
                Argument::Positional(expr) => args.positional.push(self.eval_expr(expr)?),
                Argument::Keyword(name, expr) => {
                    let value = self.eval_expr(expr)?;
                    args.keywords.push((name.clone(), value));
                }
                Argument::Unpack(expr) => {
                    let value = self.eval_expr(expr)?;
                    args.positional.extend(self.collect(&value)?);
                }
                Argument::UnpackDict(expr) => {
                    let value = self.eval_expr(expr)?;
                    let Value::Dict(dict) = value else {
                        let message = format!(
                            "argument after ** must be a mapping, not {}",
                            value.type_name()
                        );
                        return Err(self.raise("TypeError", message));
                    };
                    for (key, value) in dict.borrow().iter() {
                        let Value::Str(key) = key else {
                            return Err(self.raise("TypeError", "keywords must be strings"));
                        };
                        args.keywords.push((SmolStr::new(key.as_ref()), value.clone()));
                    }
                }
            }
        }
        Ok(args)
    }

    fn eval_slice_parts(
        &mut self,
        slice: &SliceExpr,
    ) -> RuntimeResult<(Option<Value>, Option<Value>, Option<Value>)> {
        let part = |vm: &mut Self, expr: &Option<Expr>| -> RuntimeResult<Option<Value>> {
            match expr {
                Some(expr) => match vm.eval_expr(expr)? {
                    Value::None => Ok(None),
                    value => Ok(Some(value)),
                },
                None => Ok(None),
            }
        };
        let lower = part(self, &slice.lower)?;
        let upper = part(self, &slice.upper)?;
        let step = part(self, &slice.step)?;
        Ok((lower, upper, step))
    }

    fn eval_comprehension(&mut self, comprehension: &ComprehensionExpr) -> RuntimeResult<Value> {
        let parent = self.frame();
        let mut enclosing = parent.enclosing.clone();
        if !Rc::ptr_eq(&parent.locals, &parent.globals) {
            enclosing.push(parent.locals.clone());
        }
        let globals = parent.globals.clone();
        let file = parent.file.clone();
        let depth = parent.depth;
        let line = parent.line;

        // The outermost iterable is evaluated in the enclosing scope.
        let first = comprehension
            .clauses
            .first()
            .map(|clause| self.eval_expr(&clause.iterable))
            .transpose()?;

        let frame = self.new_frame(
            FrameKind::Comprehension,
            new_scope(),
            globals,
            enclosing,
            file,
            depth,
            None,
        );
        self.push_frame(frame)?;
        self.frame_mut().line = line;
        let mut results = Vec::new();
        let outcome = self.run_clauses(comprehension, 0, first, &mut results);
        self.frames.pop();
        outcome?;

        Ok(match comprehension.kind {
            ComprehensionKind::List => Value::list(results.into_iter().map(|(k, _)| k).collect()),
            ComprehensionKind::Generator => Value::iterator(IterState::items(
                results.into_iter().map(|(k, _)| k).collect(),
            )),
            ComprehensionKind::Set => {
                let mut set = Set::new();
                for (item, _) in results {
                    let key = self.hash_key(&item)?;
                    set.insert(key, item);
                }
                Value::set(set)
            }
            ComprehensionKind::Dict => {
                let mut dict = Dict::new();
                for (key, value) in results {
                    let hash = self.hash_key(&key)?;
                    dict.insert(hash, key, value.unwrap_or(Value::None));
                }
                Value::dict(dict)
            }
        })
    }

    fn run_clauses(
        &mut self,
        comprehension: &ComprehensionExpr,
        index: usize,
        iterable: Option<Value>,
        results: &mut Vec<(Value, Option<Value>)>,
    ) -> RuntimeResult<()> {
        let Some(clause) = comprehension.clauses.get(index) else {
            let element = self.eval_expr(&comprehension.element)?;
            let value = match &comprehension.value {
                Some(expr) => Some(self.eval_expr(expr)?),
                None => None,
            };
            results.push((element, value));
            return Ok(());
        };
        let iterable = match iterable {
            Some(value) => value,
            None => self.eval_expr(&clause.iterable)?,
        };
        let iterator = self.make_iter(&iterable)?;
        'items: while let Some(item) = self.next_value(&iterator)? {
            self.check_cancelled()?;
            self.assign_target(&clause.target, item)?;
            for condition in &clause.conditions {
                let test = self.eval_expr(condition)?;
                if !self.truthy(&test)? {
                    continue 'items;
                }
            }
            self.run_clauses(comprehension, index + 1, None, results)?;
        }
        Ok(())
    }

    fn exec_import(&mut self, import: &ImportStmt) -> RuntimeResult<()> {
        for name in &import.names {
            let root = name.path[0].clone();
            let root_module = self.import_module(&root)?;
            let mut target = root_module.clone();
            for part in &name.path[1..] {
                target = self.get_attribute(&target, part)?;
            }
            match &name.alias {
                Some(alias) => self.store_name(alias, target),
                None => self.store_name(&root, root_module),
            }
        }
        Ok(())
    }

    fn exec_from_import(&mut self, import: &FromImportStmt) -> RuntimeResult<()> {
        let mut module = self.import_module(&import.module[0])?;
        for part in &import.module[1..] {
            module = self.get_attribute(&module, part)?;
        }
        let module_name = import
            .module
            .iter()
            .map(SmolStr::as_str)
            .collect::<Vec<_>>()
            .join(".");
        for item in &import.items {
            match item {
                ImportItem::Wildcard(_) => {
                    let Value::Module(source) = &module else {
                        continue;
                    };
                    let entries: Vec<(SmolStr, Value)> = source
                        .scope
                        .borrow()
                        .iter()
                        .filter(|(name, _)| !name.starts_with('_'))
                        .map(|(name, value)| (name.clone(), value.clone()))
                        .collect();
                    for (name, value) in entries {
                        self.store_name(&name, value);
                    }
                }
                ImportItem::Item { name, alias, .. } => {
                    let value = match self.get_attribute(&module, name) {
                        Ok(value) => value,
                        Err(Signal::Raise(_)) => {
                            let message =
                                format!("cannot import name '{name}' from '{module_name}'");
                            return Err(self.raise("ImportError", message));
                        }
                        Err(other) => return Err(other),
                    };
                    self.store_name(alias.as_ref().unwrap_or(name), value);
                }
            }
        }
        Ok(())
    }

    fn import_module(&mut self, name: &SmolStr) -> RuntimeResult<Value> {
        if let Some(module) = self.modules.get(name) {
            return Ok(module.clone());
        }
        if let Some(module) = modules::builtin_module(self, name) {
            self.modules.insert(name.clone(), module.clone());
            return Ok(module);
        }
        let Some(path) = self.loader.find_module(name) else {
            let message = format!("No module named '{name}'");
            return Err(self.raise("ModuleNotFoundError", message));
        };
        let loaded = match self.loader.load(&path) {
            Ok(loaded) => loaded,
            Err(err) => {
                let message = match err.as_syntax_error() {
                    Some(diag) => diag.message.clone(),
                    None => err.to_string(),
                };
                let kind = if err.as_syntax_error().is_some() {
                    "SyntaxError"
                } else {
                    "ImportError"
                };
                return Err(self.raise(kind, message));
            }
        };
        let globals = new_scope();
        globals
            .borrow_mut()
            .insert("__name__".into(), Value::str(name.as_str()));
        let module = Value::Module(Rc::new(Module {
            name: name.clone(),
            scope: globals.clone(),
        }));
        self.modules.insert(name.clone(), module.clone());
        if let Err(signal) = self.run_module_code(&loaded.file, &loaded.program, globals) {
            self.modules.shift_remove(name);
            return Err(signal);
        }
        Ok(module)
    }

    /// `super()` inside a method: the defining class and the first argument.
    pub(crate) fn current_super(&mut self) -> RuntimeResult<Value> {
        let frame = self
            .frames
            .iter()
            .rev()
            .find(|frame| frame.kind == FrameKind::Function);
        let found = frame.and_then(|frame| {
            let function = frame.function.as_ref()?;
            let owner = function.owner.borrow().upgrade()?;
            let first = function.params.first()?;
            let receiver = frame.locals.borrow().get(&first.name).cloned()?;
            Some((owner, receiver))
        });
        match found {
            Some((class, receiver)) => Ok(Value::Super(Rc::new(SuperProxy { class, receiver }))),
            None => Err(self.raise("RuntimeError", "super(): no arguments")),
        }
    }

    /// Identifier of the innermost frame, exposed for diagnostics.
    pub fn current_depth(&self) -> usize {
        self.frames.last().map(|f| f.depth).unwrap_or(0)
    }
}

/// Functions found on a class become methods bound to the receiver.
fn bind_to(receiver: &Value, value: Value) -> Value {
    match value {
        Value::Function(_) | Value::Builtin(_) => Value::BoundMethod(Rc::new(BoundMethod {
            receiver: receiver.clone(),
            function: value,
        })),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_program;
    use crate::trace::EventLog;

    fn run(text: &str) -> (Scope, RuntimeResult<()>) {
        let file = SourceFile::fragment(text);
        let program = parse_program(&file).unwrap();
        let mut vm = Interpreter::new(ExecutionConfig::default());
        vm.set_output(OutputSink::Discard);
        vm.run_main(&file, &program)
    }

    fn global(scope: &Scope, name: &str) -> Value {
        scope.borrow().get(name).cloned().unwrap()
    }

    #[test]
    fn closures_see_later_rebinding() {
        let (scope, result) = run(
            "def outer():\n    x = 1\n    def inner():\n        return x\n    x = 2\n    return inner()\nr = outer()\n",
        );
        assert!(result.is_ok());
        assert!(matches!(global(&scope, "r"), Value::Int(2)));
    }

    #[test]
    fn exceptions_are_caught_by_class() {
        let (scope, result) = run(
            "try:\n    {}['k']\nexcept LookupError as e:\n    r = 'caught'\n",
        );
        assert!(result.is_ok());
        assert_eq!(global(&scope, "r").as_str(), Some("caught"));
    }

    #[test]
    fn uncaught_exceptions_record_their_line() {
        let (_, result) = run("a = 1\n\ndef f():\n    return 1 / 0\nf()\n");
        let Err(Signal::Raise(exception)) = result else {
            panic!("expected an exception");
        };
        assert_eq!(exception.traceback[0].line, 4);
        assert_eq!(exception.traceback[1].line, 5);
    }

    #[test]
    fn loop_headers_are_reported_every_iteration() {
        let file = SourceFile::fragment("for t in range(2):\n    t\n");
        let program = parse_program(&file).unwrap();
        let mut vm = Interpreter::new(ExecutionConfig::default());
        let log = Rc::new(RefCell::new(EventLog::default()));
        vm.set_tracer(Box::new(log.clone()));
        let (_, result) = vm.run_main(&file, &program);
        assert!(result.is_ok());
        let lines: Vec<u32> = log.borrow().events.iter().map(|e| e.1).collect();
        assert_eq!(lines, vec![1, 2, 1, 2, 1]);
    }

    #[test]
    fn calls_report_depth() {
        let file = SourceFile::fragment("def f():\n    return 1\nf()\n");
        let program = parse_program(&file).unwrap();
        let mut vm = Interpreter::new(ExecutionConfig::default());
        let log = Rc::new(RefCell::new(EventLog::default()));
        vm.set_tracer(Box::new(log.clone()));
        let _ = vm.run_main(&file, &program);
        let events = log.borrow().events.clone();
        assert_eq!(
            events,
            vec![
                (EventKind::Line, 1, 0),
                (EventKind::Line, 3, 0),
                (EventKind::Call, 1, 1),
                (EventKind::Line, 2, 1),
                (EventKind::Return, 2, 1),
            ]
        );
    }
}

use super::{Args, Builtin, BuiltinKind, Class, Instance, Interpreter, RuntimeResult, Signal, Value};
use std::rc::Rc;
use std::sync::Arc;

/// Builtin exception classes and their parents, parents first.
const HIERARCHY: &[(&str, &str)] = &[
    ("BaseException", "object"),
    ("Exception", "BaseException"),
    ("KeyboardInterrupt", "BaseException"),
    ("SystemExit", "BaseException"),
    ("ArithmeticError", "Exception"),
    ("ZeroDivisionError", "ArithmeticError"),
    ("OverflowError", "ArithmeticError"),
    ("LookupError", "Exception"),
    ("IndexError", "LookupError"),
    ("KeyError", "LookupError"),
    ("ValueError", "Exception"),
    ("TypeError", "Exception"),
    ("NameError", "Exception"),
    ("UnboundLocalError", "NameError"),
    ("AttributeError", "Exception"),
    ("RuntimeError", "Exception"),
    ("NotImplementedError", "RuntimeError"),
    ("RecursionError", "RuntimeError"),
    ("MemoryError", "Exception"),
    ("StopIteration", "Exception"),
    ("AssertionError", "Exception"),
    ("ImportError", "Exception"),
    ("ModuleNotFoundError", "ImportError"),
    ("SyntaxError", "Exception"),
];

/// One frame an exception passed through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    pub filename: Arc<str>,
    pub line: u32,
    pub frame_id: u64,
}

/// A raised exception: the exception instance plus the frames it unwound,
/// innermost first.
#[derive(Debug, Clone)]
pub struct Exception {
    pub value: Value,
    pub traceback: Vec<TraceEntry>,
}

impl Exception {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            traceback: Vec::new(),
        }
    }

    pub fn type_name(&self) -> String {
        self.value.type_name()
    }

    /// Innermost line reached in `filename`.
    pub fn line_in(&self, filename: &str) -> Option<u32> {
        self.traceback
            .iter()
            .find(|entry| &*entry.filename == filename)
            .map(|entry| entry.line)
    }

    pub fn is_instance_of(&self, name: &str) -> bool {
        match &self.value {
            Value::Instance(instance) => instance.class.is_subclass_named(name),
            _ => false,
        }
    }
}

impl Interpreter {
    pub(super) fn install_exceptions(&mut self) {
        let object = self.object_class.clone();
        for (name, parent) in HIERARCHY {
            let base = if *parent == "object" {
                object.clone()
            } else {
                self.exception_class(parent)
            };
            let class = Rc::new(Class::new(*name, vec![base], true));
            if *name == "BaseException" {
                class.attrs.borrow_mut().insert(
                    "__init__".into(),
                    Value::Builtin(Rc::new(Builtin {
                        name: "__init__",
                        func: exception_init,
                        kind: BuiltinKind::Function,
                    })),
                );
            }
            self.exception_classes.insert(*name, class.clone());
            self.builtins
                .borrow_mut()
                .insert((*name).into(), Value::Class(class));
        }
    }

    pub(crate) fn exception_class(&self, name: &str) -> Rc<Class> {
        self.exception_classes
            .get(name)
            .or_else(|| self.exception_classes.get("Exception"))
            .cloned()
            .unwrap_or_else(|| self.object_class.clone())
    }

    /// Builds a builtin exception carrying a single message argument.
    pub(crate) fn raise(&mut self, kind: &str, message: impl Into<String>) -> Signal {
        let message: String = message.into();
        self.raise_with_args(kind, vec![Value::str(message)])
    }

    pub(crate) fn raise_with_args(&mut self, kind: &str, args: Vec<Value>) -> Signal {
        let instance = Instance::new(self.exception_class(kind));
        instance
            .attrs
            .borrow_mut()
            .insert("args".into(), Value::tuple(args));
        Signal::Raise(Box::new(Exception::new(Value::Instance(Rc::new(instance)))))
    }

    /// Whether `exception` is caught by an `except kind:` clause.
    pub(crate) fn exception_matches(&mut self, exception: &Value, kind: &Value) -> RuntimeResult<bool> {
        match kind {
            Value::Class(class) if class.is_subclass_named("BaseException") => Ok(match exception {
                Value::Instance(instance) => instance.class.is_subclass_of(class),
                _ => false,
            }),
            Value::Tuple(kinds) => {
                for kind in kinds.iter() {
                    if self.exception_matches(exception, kind)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            _ => Err(self.raise(
                "TypeError",
                "catching classes that do not inherit from BaseException is not allowed",
            )),
        }
    }

    /// Arguments the exception was constructed with.
    pub(crate) fn exception_args(&self, value: &Value) -> Vec<Value> {
        match value {
            Value::Instance(instance) => match instance.get_attr("args") {
                Some(Value::Tuple(items)) => items.as_ref().clone(),
                _ => Vec::new(),
            },
            _ => Vec::new(),
        }
    }

    /// `str(exception)` for instances without their own `__str__`.
    pub(crate) fn exception_message(&mut self, value: &Value) -> RuntimeResult<String> {
        let args = self.exception_args(value);
        let is_key_error = matches!(value, Value::Instance(instance) if instance.class.is_subclass_named("KeyError"));
        match args.as_slice() {
            [] => Ok(String::new()),
            [single] if is_key_error => self.repr(single),
            [single] => self.str(single),
            _ => self.repr(&Value::tuple(args)),
        }
    }

    /// `Type: message`, or just `Type` when the message is empty.
    pub fn exception_detail(&mut self, exception: &Exception) -> String {
        let name = exception.type_name();
        let message = match self.str(&exception.value) {
            Ok(message) => message,
            Err(_) => "<exception str() failed>".to_string(),
        };
        if message.is_empty() {
            name
        } else {
            format!("{name}: {message}")
        }
    }
}

fn exception_init(_vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    let mut positional = args.positional.into_iter();
    if let Some(Value::Instance(instance)) = positional.next() {
        instance
            .attrs
            .borrow_mut()
            .insert("args".into(), Value::tuple(positional.collect()));
    }
    Ok(Value::None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ExecutionConfig;

    fn detail(kind: &str, args: Vec<Value>) -> String {
        let mut vm = Interpreter::new(ExecutionConfig::default());
        let Signal::Raise(exception) = vm.raise_with_args(kind, args) else {
            unreachable!()
        };
        vm.exception_detail(&exception)
    }

    #[test]
    fn detail_omits_empty_messages() {
        assert_eq!(detail("ValueError", vec![]), "ValueError");
        assert_eq!(detail("ValueError", vec![Value::str("bad")]), "ValueError: bad");
    }

    #[test]
    fn key_errors_show_the_key_repr() {
        assert_eq!(detail("KeyError", vec![Value::str("k")]), "KeyError: 'k'");
    }

    #[test]
    fn several_arguments_show_as_a_tuple() {
        assert_eq!(
            detail("ValueError", vec![Value::Int(1), Value::str("x")]),
            "ValueError: (1, 'x')"
        );
    }

    #[test]
    fn hierarchy_lookup_follows_parents() {
        let vm = Interpreter::new(ExecutionConfig::default());
        let zero = vm.exception_class("ZeroDivisionError");
        assert!(zero.is_subclass_named("ArithmeticError"));
        assert!(zero.is_subclass_named("Exception"));
        assert!(!zero.is_subclass_named("LookupError"));
    }
}

//! Canonical rendering of runtime values for transport.

use crate::runtime::{Interpreter, OutputSink, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A value as it travels in an annotation: small integers stay numbers,
/// everything else is text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FormattedValue {
    Int(i64),
    Text(String),
}

impl FormattedValue {
    pub fn text(text: impl Into<String>) -> Self {
        FormattedValue::Text(text.into())
    }
}

impl fmt::Display for FormattedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormattedValue::Int(v) => write!(f, "{v}"),
            FormattedValue::Text(text) => f.write_str(text),
        }
    }
}

/// Never fails. Booleans and callables are checked before the generic
/// conversion; a failing user `__repr__` falls back to `<Name object>`.
pub fn format_value(vm: &mut Interpreter, value: &Value) -> FormattedValue {
    match value {
        Value::Bool(true) => FormattedValue::text("True"),
        Value::Bool(false) => FormattedValue::text("False"),
        callable if callable.is_callable() && !matches!(callable, Value::Instance(_)) => {
            FormattedValue::Text(describe_callable(vm, callable))
        }
        Value::None => FormattedValue::text("None"),
        Value::Int(v) => match i64::try_from(*v) {
            Ok(small) => FormattedValue::Int(small),
            Err(_) => FormattedValue::Text(v.to_string()),
        },
        other => {
            let (repr, _) = vm.with_output(OutputSink::Discard, |vm| vm.repr(other));
            match repr {
                Ok(text) => FormattedValue::Text(text),
                Err(_) => FormattedValue::Text(format!("<{} object>", other.type_name())),
            }
        }
    }
}

fn describe_callable(vm: &mut Interpreter, value: &Value) -> String {
    match vm.repr(value) {
        Ok(text) => text,
        Err(_) => format!("<{}>", value.type_name()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_program;
    use crate::runtime::ExecutionConfig;
    use crate::source::SourceFile;
    use pretty_assertions::assert_eq;

    fn formatted(program: &str, name: &str) -> FormattedValue {
        let file = SourceFile::fragment(program);
        let parsed = parse_program(&file).unwrap();
        let mut vm = Interpreter::new(ExecutionConfig::default());
        vm.set_output(OutputSink::Discard);
        let (scope, result) = vm.run_main(&file, &parsed);
        assert!(result.is_ok());
        let value = scope.borrow().get(name).cloned().unwrap();
        format_value(&mut vm, &value)
    }

    #[test]
    fn booleans_are_words_not_numbers() {
        assert_eq!(formatted("x = True", "x"), FormattedValue::text("True"));
    }

    #[test]
    fn small_integers_stay_numbers() {
        assert_eq!(formatted("x = 4", "x"), FormattedValue::Int(4));
        assert_eq!(
            formatted("x = 2 ** 100", "x"),
            FormattedValue::text("1267650600228229401496703205376")
        );
    }

    #[test]
    fn callables_are_described() {
        assert_eq!(
            formatted("def add(a, b):\n    return a + b\nx = add", "x"),
            FormattedValue::text("<function add>")
        );
        assert_eq!(formatted("x = len", "x"), FormattedValue::text("<built-in function len>"));
    }

    #[test]
    fn broken_repr_falls_back() {
        let program = "class Broken:\n    def __repr__(self):\n        return 1 / 0\nx = Broken()";
        assert_eq!(formatted(program, "x"), FormattedValue::text("<Broken object>"));
    }

    #[test]
    fn serialises_untagged() {
        let values = vec![FormattedValue::Int(3), FormattedValue::text("[1, 2]")];
        assert_eq!(serde_json::to_string(&values).unwrap(), r#"[3,"[1, 2]"]"#);
    }
}

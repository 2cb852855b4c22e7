use crate::diagnostics::HowlError;
use crate::parser::parse_expression_text;
use crate::runtime::{Interpreter, OutputSink, Signal, Value};
use crate::trace::ScopeBinding;
use thiserror::Error;

/// Why an annotation expression produced no value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvaluationError {
    /// The expression raised or did not parse; carries `Type: message`.
    #[error("{detail}")]
    Failed { detail: String },
    /// Execution was halted or cancelled while evaluating.
    #[error("evaluation interrupted")]
    Interrupted,
}

/// Parses `expression` and evaluates it against `scope`. Tracing is
/// suspended and anything the expression prints is discarded.
pub fn evaluate(
    vm: &mut Interpreter,
    expression: &str,
    scope: &ScopeBinding,
) -> Result<Value, EvaluationError> {
    let expr = parse_expression_text(expression).map_err(syntax_failure)?;
    let (result, _) = vm.with_output(OutputSink::Discard, |vm| vm.eval_in_scope(&expr, scope));
    result.map_err(|signal| signal_to_error(vm, signal))
}

pub(crate) fn syntax_failure(err: HowlError) -> EvaluationError {
    let message = match err.as_syntax_error() {
        Some(diagnostic) => diagnostic.message.clone(),
        None => err.to_string(),
    };
    EvaluationError::Failed {
        detail: format!("SyntaxError: {message}"),
    }
}

pub(crate) fn signal_to_error(vm: &mut Interpreter, signal: Signal) -> EvaluationError {
    match signal {
        Signal::Raise(exception) => EvaluationError::Failed {
            detail: vm.exception_detail(&exception),
        },
        Signal::Halt | Signal::Cancelled => EvaluationError::Interrupted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{new_scope, ExecutionConfig};

    fn scope() -> ScopeBinding {
        let globals = new_scope();
        globals
            .borrow_mut()
            .insert("a".into(), Value::list(vec![Value::Int(1), Value::Int(2)]));
        ScopeBinding::module(globals)
    }

    #[test]
    fn evaluates_against_the_binding() {
        let mut vm = Interpreter::new(ExecutionConfig::default());
        let value = evaluate(&mut vm, "len(a) * 10", &scope()).unwrap();
        assert!(matches!(value, Value::Int(20)));
    }

    #[test]
    fn runtime_failures_carry_type_and_message() {
        let mut vm = Interpreter::new(ExecutionConfig::default());
        let err = evaluate(&mut vm, "0 / 0", &scope()).unwrap_err();
        assert_eq!(
            err,
            EvaluationError::Failed {
                detail: "ZeroDivisionError: division by zero".into()
            }
        );
        let err = evaluate(&mut vm, "missing", &scope()).unwrap_err();
        assert_eq!(err.to_string(), "NameError: name 'missing' is not defined");
    }

    #[test]
    fn syntax_errors_are_failures() {
        let mut vm = Interpreter::new(ExecutionConfig::default());
        let err = evaluate(&mut vm, "a +", &scope()).unwrap_err();
        assert!(err.to_string().starts_with("SyntaxError: "));
    }
}

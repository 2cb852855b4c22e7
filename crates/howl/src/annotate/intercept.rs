use super::evaluate::{signal_to_error, syntax_failure, EvaluationError};
use crate::parser::parse_expression_text;
use crate::runtime::{Interpreter, OutputSink};
use crate::trace::ScopeBinding;

/// Runs `print(<arguments>)` against the live scope with output captured.
/// Returns what it printed minus one trailing line terminator.
pub fn intercept_print(
    vm: &mut Interpreter,
    arguments: &str,
    scope: &ScopeBinding,
) -> Result<String, EvaluationError> {
    let call = format!("print({arguments})");
    let expr = parse_expression_text(&call).map_err(syntax_failure)?;
    let (result, sink) = vm.with_output(OutputSink::Capture(String::new()), |vm| {
        vm.eval_in_scope(&expr, scope)
    });
    result.map_err(|signal| signal_to_error(vm, signal))?;
    let OutputSink::Capture(mut captured) = sink else {
        return Ok(String::new());
    };
    if captured.ends_with('\n') {
        captured.pop();
        if captured.ends_with('\r') {
            captured.pop();
        }
    }
    Ok(captured)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{new_scope, ExecutionConfig, Value};

    #[test]
    fn captures_without_touching_the_real_sink() {
        let mut vm = Interpreter::new(ExecutionConfig::default());
        vm.set_output(OutputSink::Capture(String::new()));
        let globals = new_scope();
        globals.borrow_mut().insert("b".into(), Value::list(vec![Value::Int(1)]));
        let scope = ScopeBinding::module(globals);

        let printed = intercept_print(&mut vm, "'after', b", &scope).unwrap();

        assert_eq!(printed, "after [1]");
        assert_eq!(vm.output(), &OutputSink::Capture(String::new()));
    }

    #[test]
    fn only_one_terminator_is_stripped() {
        let mut vm = Interpreter::new(ExecutionConfig::default());
        let scope = ScopeBinding::module(new_scope());
        let printed = intercept_print(&mut vm, "'x', end='\\n\\n'", &scope).unwrap();
        assert_eq!(printed, "x\n");
    }
}

//! Builtin modules: `math`, `os` and `os.path`.

use super::builtins::{arity, int_arg};
use super::{
    new_scope, Args, Builtin, BuiltinFn, BuiltinKind, Interpreter, Module, RuntimeResult, Value,
};
use smol_str::SmolStr;
use std::path::{Path, PathBuf};
use std::rc::Rc;

pub(super) fn builtin_module(_vm: &mut Interpreter, name: &SmolStr) -> Option<Value> {
    match name.as_str() {
        "math" => Some(math_module()),
        "os" => Some(os_module()),
        _ => None,
    }
}

fn module(name: &str, functions: &[(&'static str, BuiltinFn)], constants: Vec<(&str, Value)>) -> Value {
    let scope = new_scope();
    {
        let mut entries = scope.borrow_mut();
        entries.insert("__name__".into(), Value::str(name));
        for (function, func) in functions {
            let builtin = Builtin {
                name: *function,
                func: *func,
                kind: BuiltinKind::Function,
            };
            entries.insert((*function).into(), Value::Builtin(Rc::new(builtin)));
        }
        for (constant, value) in constants {
            entries.insert(constant.into(), value);
        }
    }
    Value::Module(Rc::new(Module {
        name: name.into(),
        scope,
    }))
}

fn math_module() -> Value {
    module(
        "math",
        &[
            ("sqrt", math_sqrt),
            ("floor", math_floor),
            ("ceil", math_ceil),
            ("trunc", math_trunc),
            ("fabs", math_fabs),
            ("exp", math_exp),
            ("log", math_log),
            ("log2", math_log2),
            ("log10", math_log10),
            ("pow", math_pow),
            ("sin", math_sin),
            ("cos", math_cos),
            ("tan", math_tan),
            ("atan", math_atan),
            ("atan2", math_atan2),
            ("hypot", math_hypot),
            ("isnan", math_isnan),
            ("isinf", math_isinf),
            ("gcd", math_gcd),
            ("factorial", math_factorial),
        ],
        vec![
            ("pi", Value::Float(std::f64::consts::PI)),
            ("e", Value::Float(std::f64::consts::E)),
            ("tau", Value::Float(std::f64::consts::TAU)),
            ("inf", Value::Float(f64::INFINITY)),
            ("nan", Value::Float(f64::NAN)),
        ],
    )
}

fn float_arg(vm: &mut Interpreter, value: &Value) -> RuntimeResult<f64> {
    match value.as_float() {
        Some(v) => Ok(v),
        None => {
            let message = format!("must be real number, not {}", value.type_name());
            Err(vm.raise("TypeError", message))
        }
    }
}

/// Applies a one-argument float function, raising `ValueError` for results
/// outside the domain.
fn unary(vm: &mut Interpreter, name: &str, args: &Args, f: fn(f64) -> f64) -> RuntimeResult<Value> {
    arity(vm, name, args, 1, 1)?;
    let x = float_arg(vm, &args.positional[0])?;
    let result = f(x);
    if result.is_nan() && !x.is_nan() {
        return Err(vm.raise("ValueError", "math domain error"));
    }
    Ok(Value::Float(result))
}

fn math_sqrt(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    unary(vm, "sqrt", &args, f64::sqrt)
}

fn math_exp(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    arity(vm, "exp", &args, 1, 1)?;
    let x = float_arg(vm, &args.positional[0])?;
    let result = x.exp();
    if result.is_infinite() && x.is_finite() {
        return Err(vm.raise("OverflowError", "math range error"));
    }
    Ok(Value::Float(result))
}

fn math_fabs(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    unary(vm, "fabs", &args, f64::abs)
}

fn math_sin(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    unary(vm, "sin", &args, f64::sin)
}

fn math_cos(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    unary(vm, "cos", &args, f64::cos)
}

fn math_tan(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    unary(vm, "tan", &args, f64::tan)
}

fn math_atan(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    unary(vm, "atan", &args, f64::atan)
}

fn logarithm(vm: &mut Interpreter, name: &str, args: &Args, f: fn(f64) -> f64) -> RuntimeResult<Value> {
    arity(vm, name, args, 1, 1)?;
    let x = float_arg(vm, &args.positional[0])?;
    if x <= 0.0 {
        return Err(vm.raise("ValueError", "math domain error"));
    }
    Ok(Value::Float(f(x)))
}

fn math_log(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    arity(vm, "log", &args, 1, 2)?;
    let x = float_arg(vm, &args.positional[0])?;
    let base = match args.positional.get(1) {
        Some(base) => Some(float_arg(vm, base)?),
        None => None,
    };
    if x <= 0.0 || base.is_some_and(|b| b <= 0.0 || b == 1.0) {
        return Err(vm.raise("ValueError", "math domain error"));
    }
    Ok(Value::Float(match base {
        Some(base) => x.ln() / base.ln(),
        None => x.ln(),
    }))
}

fn math_log2(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    logarithm(vm, "log2", &args, f64::log2)
}

fn math_log10(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    logarithm(vm, "log10", &args, f64::log10)
}

/// `floor`/`ceil`/`trunc` return ints; ints pass through unchanged.
fn to_integral(vm: &mut Interpreter, name: &str, args: &Args, f: fn(f64) -> f64) -> RuntimeResult<Value> {
    arity(vm, name, args, 1, 1)?;
    let value = &args.positional[0];
    if let Some(n) = value.as_int() {
        return Ok(Value::Int(n));
    }
    let x = float_arg(vm, value)?;
    if x.is_nan() {
        return Err(vm.raise("ValueError", "cannot convert float NaN to integer"));
    }
    if !x.is_finite() || x.abs() >= 1.7e38 {
        return Err(vm.raise("OverflowError", "cannot convert float infinity to integer"));
    }
    Ok(Value::Int(f(x) as i128))
}

fn math_floor(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    to_integral(vm, "floor", &args, f64::floor)
}

fn math_ceil(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    to_integral(vm, "ceil", &args, f64::ceil)
}

fn math_trunc(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    to_integral(vm, "trunc", &args, f64::trunc)
}

fn math_pow(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    arity(vm, "pow", &args, 2, 2)?;
    let x = float_arg(vm, &args.positional[0])?;
    let y = float_arg(vm, &args.positional[1])?;
    if x == 0.0 && y < 0.0 {
        return Err(vm.raise("ValueError", "math domain error"));
    }
    Ok(Value::Float(x.powf(y)))
}

fn math_atan2(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    arity(vm, "atan2", &args, 2, 2)?;
    let y = float_arg(vm, &args.positional[0])?;
    let x = float_arg(vm, &args.positional[1])?;
    Ok(Value::Float(y.atan2(x)))
}

fn math_hypot(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    arity(vm, "hypot", &args, 0, usize::MAX)?;
    let mut total = 0.0f64;
    for value in &args.positional {
        let v = float_arg(vm, value)?;
        total += v * v;
    }
    Ok(Value::Float(total.sqrt()))
}

fn math_isnan(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    arity(vm, "isnan", &args, 1, 1)?;
    Ok(Value::Bool(float_arg(vm, &args.positional[0])?.is_nan()))
}

fn math_isinf(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    arity(vm, "isinf", &args, 1, 1)?;
    Ok(Value::Bool(float_arg(vm, &args.positional[0])?.is_infinite()))
}

fn math_gcd(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    let mut result: i128 = 0;
    for value in &args.positional {
        let mut b = int_arg(vm, value)?.abs();
        let mut a = result;
        while b != 0 {
            (a, b) = (b, a % b);
        }
        result = a;
    }
    Ok(Value::Int(result))
}

fn math_factorial(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    arity(vm, "factorial", &args, 1, 1)?;
    let n = int_arg(vm, &args.positional[0])?;
    if n < 0 {
        return Err(vm.raise("ValueError", "factorial() not defined for negative values"));
    }
    let mut result: i128 = 1;
    for k in 2..=n {
        result = match result.checked_mul(k) {
            Some(v) => v,
            None => return Err(vm.raise("OverflowError", "integer overflow")),
        };
    }
    Ok(Value::Int(result))
}

fn os_module() -> Value {
    let path = module(
        "os.path",
        &[
            ("join", path_join),
            ("exists", path_exists),
            ("isfile", path_isfile),
            ("isdir", path_isdir),
            ("basename", path_basename),
            ("dirname", path_dirname),
            ("abspath", path_abspath),
            ("splitext", path_splitext),
        ],
        vec![("sep", Value::str(std::path::MAIN_SEPARATOR_STR))],
    );
    module(
        "os",
        &[("getcwd", os_getcwd), ("getenv", os_getenv), ("listdir", os_listdir)],
        vec![
            ("path", path),
            ("sep", Value::str(std::path::MAIN_SEPARATOR_STR)),
            ("curdir", Value::str(".")),
            ("name", Value::str(if cfg!(windows) { "nt" } else { "posix" })),
        ],
    )
}

fn path_arg(vm: &mut Interpreter, function: &str, value: &Value) -> RuntimeResult<String> {
    match value {
        Value::Str(s) => Ok(s.to_string()),
        other => {
            let message = format!(
                "{function}: path should be string, not {}",
                other.type_name()
            );
            Err(vm.raise("TypeError", message))
        }
    }
}

fn single_path(vm: &mut Interpreter, function: &str, args: &Args) -> RuntimeResult<PathBuf> {
    arity(vm, function, args, 1, 1)?;
    Ok(PathBuf::from(path_arg(vm, function, &args.positional[0])?))
}

fn path_join(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    arity(vm, "join", &args, 1, usize::MAX)?;
    let mut joined = PathBuf::new();
    for part in &args.positional {
        joined.push(path_arg(vm, "join", part)?);
    }
    Ok(Value::str(joined.display().to_string()))
}

fn path_exists(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    Ok(Value::Bool(single_path(vm, "exists", &args)?.exists()))
}

fn path_isfile(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    Ok(Value::Bool(single_path(vm, "isfile", &args)?.is_file()))
}

fn path_isdir(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    Ok(Value::Bool(single_path(vm, "isdir", &args)?.is_dir()))
}

fn path_basename(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    let path = single_path(vm, "basename", &args)?;
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(Value::str(name))
}

fn path_dirname(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    let path = single_path(vm, "dirname", &args)?;
    let parent = path
        .parent()
        .map(|parent| parent.display().to_string())
        .unwrap_or_default();
    Ok(Value::str(parent))
}

fn path_abspath(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    let path = single_path(vm, "abspath", &args)?;
    let absolute = std::path::absolute(&path).unwrap_or(path);
    Ok(Value::str(absolute.display().to_string()))
}

fn path_splitext(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    let text = single_path(vm, "splitext", &args)?.display().to_string();
    let name_start = text.rfind(['/', '\\']).map(|i| i + 1).unwrap_or(0);
    let split = text[name_start..]
        .rfind('.')
        .filter(|dot| *dot > 0)
        .map(|dot| name_start + dot);
    Ok(match split {
        Some(dot) => Value::tuple(vec![Value::str(&text[..dot]), Value::str(&text[dot..])]),
        None => Value::tuple(vec![Value::str(text), Value::str("")]),
    })
}

fn os_getcwd(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    arity(vm, "getcwd", &args, 0, 0)?;
    match std::env::current_dir() {
        Ok(dir) => Ok(Value::str(dir.display().to_string())),
        Err(err) => Err(vm.raise("RuntimeError", err.to_string())),
    }
}

fn os_getenv(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    arity(vm, "getenv", &args, 1, 2)?;
    let key = path_arg(vm, "getenv", &args.positional[0])?;
    match std::env::var(&key) {
        Ok(value) => Ok(Value::str(value)),
        Err(_) => Ok(args.positional.get(1).cloned().unwrap_or(Value::None)),
    }
}

fn os_listdir(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    arity(vm, "listdir", &args, 0, 1)?;
    let dir = match args.positional.first() {
        Some(value) => PathBuf::from(path_arg(vm, "listdir", value)?),
        None => PathBuf::from("."),
    };
    let entries = match list_entries(&dir) {
        Ok(entries) => entries,
        Err(err) => {
            let message = format!("{err}: '{}'", dir.display());
            return Err(vm.raise("RuntimeError", message));
        }
    };
    Ok(Value::list(entries.into_iter().map(Value::str).collect()))
}

fn list_entries(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        names.push(entry?.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ExecutionConfig;

    fn call(vm: &mut Interpreter, module: &Value, name: &str, args: Vec<Value>) -> RuntimeResult<Value> {
        let function = vm.get_attribute(module, name)?;
        vm.call_value(function, Args::new(args))
    }

    #[test]
    fn math_functions() {
        let mut vm = Interpreter::new(ExecutionConfig::default());
        let math = math_module();
        let root = call(&mut vm, &math, "sqrt", vec![Value::Int(16)]).unwrap();
        assert_eq!(vm.repr(&root).unwrap(), "4.0");
        let floor = call(&mut vm, &math, "floor", vec![Value::Float(-1.5)]).unwrap();
        assert_eq!(vm.repr(&floor).unwrap(), "-2");
        let gcd = call(&mut vm, &math, "gcd", vec![Value::Int(12), Value::Int(18)]).unwrap();
        assert_eq!(vm.repr(&gcd).unwrap(), "6");
    }

    #[test]
    fn math_domain_errors() {
        let mut vm = Interpreter::new(ExecutionConfig::default());
        let math = math_module();
        let Err(crate::runtime::Signal::Raise(exception)) =
            call(&mut vm, &math, "sqrt", vec![Value::Int(-1)])
        else {
            panic!("expected ValueError");
        };
        assert_eq!(vm.exception_detail(&exception), "ValueError: math domain error");
    }

    #[test]
    fn path_helpers() {
        let mut vm = Interpreter::new(ExecutionConfig::default());
        let os = os_module();
        let path = vm.get_attribute(&os, "path").unwrap();
        let base = call(&mut vm, &path, "basename", vec![Value::str("a/b/c.txt")]).unwrap();
        assert_eq!(vm.repr(&base).unwrap(), "'c.txt'");
        let split = call(&mut vm, &path, "splitext", vec![Value::str("a/b/c.txt")]).unwrap();
        assert_eq!(vm.repr(&split).unwrap(), "('a/b/c', '.txt')");
    }
}

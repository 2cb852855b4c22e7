//! Builtin functions and types.

use super::{
    Args, Builtin, BuiltinFn, BuiltinKind, Dict, HashKey, Interpreter, IterState, RangeValue,
    RuntimeResult, Set, Signal, Value,
};
use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

const FUNCTIONS: &[(&str, BuiltinFn)] = &[
    ("print", builtin_print),
    ("len", builtin_len),
    ("repr", builtin_repr),
    ("abs", builtin_abs),
    ("min", builtin_min),
    ("max", builtin_max),
    ("sum", builtin_sum),
    ("sorted", builtin_sorted),
    ("reversed", builtin_reversed),
    ("enumerate", builtin_enumerate),
    ("zip", builtin_zip),
    ("map", builtin_map),
    ("filter", builtin_filter),
    ("any", builtin_any),
    ("all", builtin_all),
    ("iter", builtin_iter),
    ("next", builtin_next),
    ("isinstance", builtin_isinstance),
    ("issubclass", builtin_issubclass),
    ("hasattr", builtin_hasattr),
    ("getattr", builtin_getattr),
    ("setattr", builtin_setattr),
    ("round", builtin_round),
    ("chr", builtin_chr),
    ("ord", builtin_ord),
    ("id", builtin_id),
    ("hash", builtin_hash),
    ("callable", builtin_callable),
    ("super", builtin_super),
    ("divmod", builtin_divmod),
    ("pow", builtin_pow),
    ("format", builtin_format),
];

const TYPES: &[(&str, BuiltinFn)] = &[
    ("int", builtin_int),
    ("float", builtin_float),
    ("str", builtin_str),
    ("bool", builtin_bool),
    ("list", builtin_list),
    ("tuple", builtin_tuple),
    ("dict", builtin_dict),
    ("set", builtin_set),
    ("range", builtin_range),
    ("type", builtin_type),
];

pub(super) fn install(vm: &mut Interpreter) {
    let mut scope = vm.builtins.borrow_mut();
    for (name, func) in FUNCTIONS {
        scope.insert((*name).into(), make(name, *func, BuiltinKind::Function));
    }
    for (name, func) in TYPES {
        scope.insert((*name).into(), make(name, *func, BuiltinKind::Type));
    }
    scope.insert("object".into(), Value::Class(vm.object_class.clone()));
}

fn make(name: &'static str, func: BuiltinFn, kind: BuiltinKind) -> Value {
    Value::Builtin(Rc::new(Builtin { name, func, kind }))
}

/// Rejects calls whose positional count falls outside `min..=max`, and any
/// keyword arguments.
pub(super) fn arity(vm: &mut Interpreter, name: &str, args: &Args, min: usize, max: usize) -> RuntimeResult<()> {
    if let Some((key, _)) = args.keywords.first() {
        let message = format!("{name}() got an unexpected keyword argument '{key}'");
        return Err(vm.raise("TypeError", message));
    }
    let given = args.len();
    if given >= min && given <= max {
        return Ok(());
    }
    let message = if min == max && min == 1 {
        format!("{name}() takes exactly one argument ({given} given)")
    } else if given < min {
        format!("{name} expected at least {min} argument{}, got {given}", plural(min))
    } else {
        format!("{name} expected at most {max} argument{}, got {given}", plural(max))
    };
    Err(vm.raise("TypeError", message))
}

fn plural(count: usize) -> &'static str {
    if count == 1 {
        ""
    } else {
        "s"
    }
}

pub(super) fn int_arg(vm: &mut Interpreter, value: &Value) -> RuntimeResult<i128> {
    match value.as_int() {
        Some(v) => Ok(v),
        None => {
            let message = format!(
                "'{}' object cannot be interpreted as an integer",
                value.type_name()
            );
            Err(vm.raise("TypeError", message))
        }
    }
}

fn builtin_print(vm: &mut Interpreter, mut args: Args) -> RuntimeResult<Value> {
    let sep = match args.take_keyword("sep") {
        Some(Value::None) | None => " ".to_string(),
        Some(value) => vm.str(&value)?,
    };
    let end = match args.take_keyword("end") {
        Some(Value::None) | None => "\n".to_string(),
        Some(value) => vm.str(&value)?,
    };
    args.take_keyword("flush");
    args.take_keyword("file");
    arity(vm, "print", &args, 0, usize::MAX)?;
    let mut parts = Vec::with_capacity(args.len());
    for value in &args.positional {
        parts.push(vm.str(value)?);
    }
    let mut line = parts.join(&sep);
    line.push_str(&end);
    vm.write_output(&line);
    Ok(Value::None)
}

fn builtin_len(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    arity(vm, "len", &args, 1, 1)?;
    let value = &args.positional[0];
    let len = match value {
        Value::Str(s) => s.chars().count(),
        Value::Tuple(items) => items.len(),
        Value::List(items) => items.borrow().len(),
        Value::Dict(dict) => dict.borrow().len(),
        Value::Set(set) => set.borrow().len(),
        Value::Range(range) => range.len(),
        Value::Instance(_) => {
            if let Some(result) = vm.call_special(value, "__len__", Vec::new())? {
                return match result.as_int() {
                    Some(n) if n >= 0 => Ok(Value::Int(n)),
                    Some(_) => Err(vm.raise("ValueError", "__len__() should return >= 0")),
                    None => {
                        let message = format!(
                            "'{}' object cannot be interpreted as an integer",
                            result.type_name()
                        );
                        Err(vm.raise("TypeError", message))
                    }
                };
            }
            return Err(no_len(vm, value));
        }
        other => return Err(no_len(vm, other)),
    };
    Ok(Value::Int(len as i128))
}

fn no_len(vm: &mut Interpreter, value: &Value) -> Signal {
    let message = format!("object of type '{}' has no len()", value.type_name());
    vm.raise("TypeError", message)
}

fn builtin_repr(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    arity(vm, "repr", &args, 1, 1)?;
    Ok(Value::str(vm.repr(&args.positional[0])?))
}

fn builtin_str(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    arity(vm, "str", &args, 0, 1)?;
    match args.positional.first() {
        Some(value) => Ok(Value::str(vm.str(value)?)),
        None => Ok(Value::str("")),
    }
}

fn builtin_bool(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    arity(vm, "bool", &args, 0, 1)?;
    match args.positional.first() {
        Some(value) => Ok(Value::Bool(vm.truthy(value)?)),
        None => Ok(Value::Bool(false)),
    }
}

fn builtin_int(vm: &mut Interpreter, mut args: Args) -> RuntimeResult<Value> {
    let base_keyword = args.take_keyword("base");
    arity(vm, "int", &args, 0, 2)?;
    let base = match args.positional.get(1).or(base_keyword.as_ref()) {
        Some(base) => Some(int_arg(vm, base)?),
        None => None,
    };
    let Some(value) = args.positional.first() else {
        return Ok(Value::Int(0));
    };
    if let (Some(_), false) = (base, matches!(value, Value::Str(_))) {
        return Err(vm.raise("TypeError", "int() can't convert non-string with explicit base"));
    }
    match value {
        Value::Int(v) => Ok(Value::Int(*v)),
        Value::Bool(v) => Ok(Value::Int(*v as i128)),
        Value::Float(v) => {
            if v.is_nan() {
                return Err(vm.raise("ValueError", "cannot convert float NaN to integer"));
            }
            if v.is_infinite() || v.abs() >= 1.7e38 {
                return Err(vm.raise("OverflowError", "cannot convert float infinity to integer"));
            }
            Ok(Value::Int(v.trunc() as i128))
        }
        Value::Str(text) => {
            let base = base.unwrap_or(10);
            match parse_int(text, base) {
                Some(v) => Ok(Value::Int(v)),
                None => {
                    let message = format!(
                        "invalid literal for int() with base {base}: {}",
                        super::repr::repr_str(text)
                    );
                    Err(vm.raise("ValueError", message))
                }
            }
        }
        Value::Instance(_) => match vm.call_special(value, "__int__", Vec::new())? {
            Some(result) => Ok(result),
            None => Err(int_type_error(vm, value)),
        },
        other => Err(int_type_error(vm, other)),
    }
}

fn int_type_error(vm: &mut Interpreter, value: &Value) -> Signal {
    let message = format!(
        "int() argument must be a string, a bytes-like object or a real number, not '{}'",
        value.type_name()
    );
    vm.raise("TypeError", message)
}

fn parse_int(text: &str, base: i128) -> Option<i128> {
    let text = text.trim();
    let (negative, digits) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    let lower = digits.to_ascii_lowercase();
    let (base, digits) = match (base, lower.get(..2)) {
        (0 | 16, Some("0x")) => (16, &lower[2..]),
        (0 | 8, Some("0o")) => (8, &lower[2..]),
        (0 | 2, Some("0b")) => (2, &lower[2..]),
        (0, _) => (10, lower.as_str()),
        (base, _) => (base, lower.as_str()),
    };
    if !(2..=36).contains(&base) || digits.is_empty() || digits.starts_with('_') || digits.ends_with('_') {
        return None;
    }
    let mut value: i128 = 0;
    for c in digits.chars().filter(|c| *c != '_') {
        let digit = c.to_digit(36)? as i128;
        if digit >= base {
            return None;
        }
        value = value.checked_mul(base)?.checked_add(digit)?;
    }
    Some(if negative { -value } else { value })
}

fn builtin_float(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    arity(vm, "float", &args, 0, 1)?;
    let Some(value) = args.positional.first() else {
        return Ok(Value::Float(0.0));
    };
    match value {
        Value::Float(v) => Ok(Value::Float(*v)),
        Value::Int(_) | Value::Bool(_) => Ok(Value::Float(value.as_float().unwrap_or_default())),
        Value::Str(text) => {
            let cleaned = text.trim().to_ascii_lowercase().replace('_', "");
            let parsed = match cleaned.trim_start_matches(['+', '-']) {
                "inf" | "infinity" => Some(if cleaned.starts_with('-') {
                    f64::NEG_INFINITY
                } else {
                    f64::INFINITY
                }),
                "nan" => Some(f64::NAN),
                _ => cleaned.parse::<f64>().ok(),
            };
            match parsed {
                Some(v) => Ok(Value::Float(v)),
                None => {
                    let message = format!(
                        "could not convert string to float: {}",
                        super::repr::repr_str(text)
                    );
                    Err(vm.raise("ValueError", message))
                }
            }
        }
        Value::Instance(_) => match vm.call_special(value, "__float__", Vec::new())? {
            Some(result) => Ok(result),
            None => Err(float_type_error(vm, value)),
        },
        other => Err(float_type_error(vm, other)),
    }
}

fn float_type_error(vm: &mut Interpreter, value: &Value) -> Signal {
    let message = format!(
        "float() argument must be a string or a real number, not '{}'",
        value.type_name()
    );
    vm.raise("TypeError", message)
}

fn builtin_list(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    arity(vm, "list", &args, 0, 1)?;
    match args.positional.first() {
        Some(value) => Ok(Value::list(vm.collect(value)?)),
        None => Ok(Value::list(Vec::new())),
    }
}

fn builtin_tuple(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    arity(vm, "tuple", &args, 0, 1)?;
    match args.positional.first() {
        Some(Value::Tuple(items)) => Ok(Value::Tuple(items.clone())),
        Some(value) => Ok(Value::tuple(vm.collect(value)?)),
        None => Ok(Value::tuple(Vec::new())),
    }
}

fn builtin_set(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    arity(vm, "set", &args, 0, 1)?;
    let mut set = Set::new();
    if let Some(value) = args.positional.first() {
        for item in vm.collect(value)? {
            let key = vm.hash_key(&item)?;
            set.insert(key, item);
        }
    }
    Ok(Value::set(set))
}

fn builtin_dict(vm: &mut Interpreter, mut args: Args) -> RuntimeResult<Value> {
    let keywords = std::mem::take(&mut args.keywords);
    arity(vm, "dict", &args, 0, 1)?;
    let mut dict = match args.positional.first() {
        Some(source) => vm.dict_from(source)?,
        None => Dict::new(),
    };
    for (key, value) in keywords {
        dict.insert(HashKey::Str(key.as_str().into()), Value::str(key.as_str()), value);
    }
    Ok(Value::dict(dict))
}

fn builtin_range(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    arity(vm, "range", &args, 1, 3)?;
    let mut bounds = Vec::with_capacity(3);
    for value in &args.positional {
        bounds.push(int_arg(vm, value)?);
    }
    let (start, stop, step) = match *bounds.as_slice() {
        [] => (0, 0, 1),
        [stop] => (0, stop, 1),
        [start, stop] => (start, stop, 1),
        [start, stop, step, ..] => (start, stop, step),
    };
    if step == 0 {
        return Err(vm.raise("ValueError", "range() arg 3 must not be zero"));
    }
    Ok(Value::Range(RangeValue { start, stop, step }))
}

fn builtin_type(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    arity(vm, "type", &args, 1, 1)?;
    Ok(vm.type_of(&args.positional[0]))
}

fn not_constructible(vm: &mut Interpreter, _args: Args) -> RuntimeResult<Value> {
    Err(vm.raise("TypeError", "cannot create instances of this type"))
}

impl Interpreter {
    /// The class object `type(value)` returns.
    pub(crate) fn type_of(&self, value: &Value) -> Value {
        match value {
            Value::Instance(instance) => Value::Class(instance.class.clone()),
            Value::Class(_) => self
                .builtins
                .borrow()
                .get("type")
                .cloned()
                .unwrap_or(Value::None),
            other => {
                let name = other.builtin_type_name();
                if let Some(found) = self.builtins.borrow().get(name) {
                    if matches!(found, Value::Builtin(builtin) if builtin.kind == BuiltinKind::Type) {
                        return found.clone();
                    }
                }
                make(name, not_constructible, BuiltinKind::Type)
            }
        }
    }

    /// Whether `value` is an instance of `class_info` (a class, builtin type
    /// or tuple of those).
    pub(crate) fn is_instance(&mut self, value: &Value, class_info: &Value) -> RuntimeResult<bool> {
        match class_info {
            Value::Class(class) => Ok(match value {
                Value::Instance(instance) => instance.class.is_subclass_of(class),
                _ => Rc::ptr_eq(class, &self.object_class),
            }),
            Value::Builtin(builtin) if builtin.kind == BuiltinKind::Type => {
                let name = value.builtin_type_name();
                Ok(name == builtin.name
                    || (builtin.name == "int" && name == "bool")
                    || (builtin.name == "type" && matches!(value, Value::Class(_))))
            }
            Value::Tuple(options) => {
                for option in options.iter() {
                    if self.is_instance(value, option)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            _ => Err(self.raise(
                "TypeError",
                "isinstance() arg 2 must be a type, a tuple of types, or a union",
            )),
        }
    }

    /// Stable sort using `<` on the items, or on `key(item)` when given.
    pub(crate) fn sort_values(
        &mut self,
        items: Vec<Value>,
        key: Option<&Value>,
        reverse: bool,
    ) -> RuntimeResult<Vec<Value>> {
        let mut keyed = Vec::with_capacity(items.len());
        for item in items {
            let sort_key = match key {
                Some(key) if !key.is_none() => self.call_with(key, vec![item.clone()])?,
                _ => item.clone(),
            };
            keyed.push((sort_key, item));
        }
        let mut failure = None;
        keyed.sort_by(|(a, _), (b, _)| {
            if failure.is_some() {
                return Ordering::Equal;
            }
            let (first, second) = if reverse { (b, a) } else { (a, b) };
            let ordering = self.less_than(first, second).and_then(|less| {
                if less {
                    Ok(Ordering::Less)
                } else if self.less_than(second, first)? {
                    Ok(Ordering::Greater)
                } else {
                    Ok(Ordering::Equal)
                }
            });
            ordering.unwrap_or_else(|signal| {
                failure = Some(signal);
                Ordering::Equal
            })
        });
        match failure {
            Some(signal) => Err(signal),
            None => Ok(keyed.into_iter().map(|(_, item)| item).collect()),
        }
    }
}

fn builtin_abs(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    arity(vm, "abs", &args, 1, 1)?;
    let value = &args.positional[0];
    match value {
        Value::Float(v) => Ok(Value::Float(v.abs())),
        Value::Int(_) | Value::Bool(_) => match value.as_int().unwrap_or_default().checked_abs() {
            Some(v) => Ok(Value::Int(v)),
            None => Err(vm.raise("OverflowError", "integer overflow")),
        },
        Value::Instance(_) => match vm.call_special(value, "__abs__", Vec::new())? {
            Some(result) => Ok(result),
            None => Err(bad_operand(vm, "abs()", value)),
        },
        other => Err(bad_operand(vm, "abs()", other)),
    }
}

fn bad_operand(vm: &mut Interpreter, what: &str, value: &Value) -> Signal {
    let message = format!("bad operand type for {what}: '{}'", value.type_name());
    vm.raise("TypeError", message)
}

fn extreme(vm: &mut Interpreter, name: &str, mut args: Args, want_max: bool) -> RuntimeResult<Value> {
    let key = args.take_keyword("key");
    let default = args.take_keyword("default");
    arity(vm, name, &args, 1, usize::MAX)?;
    let items = if args.len() == 1 {
        vm.collect(&args.positional[0])?
    } else {
        if default.is_some() {
            let message = format!(
                "Cannot specify a default for {name}() with multiple positional arguments"
            );
            return Err(vm.raise("TypeError", message));
        }
        args.positional
    };
    let mut best: Option<(Value, Value)> = None;
    for item in items {
        vm.check_cancelled()?;
        let item_key = match &key {
            Some(key) if !key.is_none() => vm.call_with(key, vec![item.clone()])?,
            _ => item.clone(),
        };
        let better = match &best {
            None => true,
            Some((best_key, _)) if want_max => vm.less_than(best_key, &item_key)?,
            Some((best_key, _)) => vm.less_than(&item_key, best_key)?,
        };
        if better {
            best = Some((item_key, item));
        }
    }
    match (best, default) {
        (Some((_, item)), _) => Ok(item),
        (None, Some(default)) => Ok(default),
        (None, None) => {
            let message = format!("{name}() arg is an empty sequence");
            Err(vm.raise("ValueError", message))
        }
    }
}

fn builtin_min(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    extreme(vm, "min", args, false)
}

fn builtin_max(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    extreme(vm, "max", args, true)
}

fn builtin_sum(vm: &mut Interpreter, mut args: Args) -> RuntimeResult<Value> {
    let start_keyword = args.take_keyword("start");
    arity(vm, "sum", &args, 1, 2)?;
    let mut total = args
        .positional
        .get(1)
        .cloned()
        .or(start_keyword)
        .unwrap_or(Value::Int(0));
    if matches!(total, Value::Str(_)) {
        return Err(vm.raise(
            "TypeError",
            "sum() can't sum strings [use ''.join(seq) instead]",
        ));
    }
    for item in vm.collect(&args.positional[0])? {
        vm.check_cancelled()?;
        total = vm.binary_op(crate::ast::BinaryOp::Add, total, item)?;
    }
    Ok(total)
}

fn builtin_sorted(vm: &mut Interpreter, mut args: Args) -> RuntimeResult<Value> {
    let key = args.take_keyword("key");
    let reverse = match args.take_keyword("reverse") {
        Some(value) => vm.truthy(&value)?,
        None => false,
    };
    arity(vm, "sorted", &args, 1, 1)?;
    let items = vm.collect(&args.positional[0])?;
    Ok(Value::list(vm.sort_values(items, key.as_ref(), reverse)?))
}

fn builtin_reversed(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    arity(vm, "reversed", &args, 1, 1)?;
    let value = &args.positional[0];
    if matches!(value, Value::Dict(_) | Value::Set(_) | Value::Iterator(_)) {
        let message = format!("'{}' object is not reversible", value.type_name());
        return Err(vm.raise("TypeError", message));
    }
    let mut items = vm.collect(value)?;
    items.reverse();
    Ok(Value::iterator(IterState::items(items)))
}

fn builtin_enumerate(vm: &mut Interpreter, mut args: Args) -> RuntimeResult<Value> {
    let start_keyword = args.take_keyword("start");
    arity(vm, "enumerate", &args, 1, 2)?;
    let start = match args.positional.get(1).or(start_keyword.as_ref()) {
        Some(start) => int_arg(vm, start)?,
        None => 0,
    };
    let items = vm.collect(&args.positional[0])?;
    let pairs = items
        .into_iter()
        .enumerate()
        .map(|(index, item)| Value::tuple(vec![Value::Int(start + index as i128), item]))
        .collect();
    Ok(Value::iterator(IterState::items(pairs)))
}

fn builtin_zip(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    arity(vm, "zip", &args, 0, usize::MAX)?;
    let mut columns = Vec::with_capacity(args.len());
    for value in &args.positional {
        columns.push(vm.collect(value)?);
    }
    let shortest = columns.iter().map(Vec::len).min().unwrap_or(0);
    let rows = (0..shortest)
        .map(|row| Value::tuple(columns.iter().map(|column| column[row].clone()).collect()))
        .collect();
    Ok(Value::iterator(IterState::items(rows)))
}

fn builtin_map(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    arity(vm, "map", &args, 2, usize::MAX)?;
    let function = args.positional[0].clone();
    let mut columns = Vec::with_capacity(args.len() - 1);
    for value in &args.positional[1..] {
        columns.push(vm.collect(value)?);
    }
    let shortest = columns.iter().map(Vec::len).min().unwrap_or(0);
    let mut results = Vec::with_capacity(shortest);
    for row in 0..shortest {
        let call_args = columns.iter().map(|column| column[row].clone()).collect();
        results.push(vm.call_with(&function, call_args)?);
    }
    Ok(Value::iterator(IterState::items(results)))
}

fn builtin_filter(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    arity(vm, "filter", &args, 2, 2)?;
    let function = args.positional[0].clone();
    let mut kept = Vec::new();
    for item in vm.collect(&args.positional[1])? {
        let test = if function.is_none() {
            item.clone()
        } else {
            vm.call_with(&function, vec![item.clone()])?
        };
        if vm.truthy(&test)? {
            kept.push(item);
        }
    }
    Ok(Value::iterator(IterState::items(kept)))
}

fn builtin_any(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    arity(vm, "any", &args, 1, 1)?;
    let iterator = vm.make_iter(&args.positional[0])?;
    while let Some(item) = vm.next_value(&iterator)? {
        vm.check_cancelled()?;
        if vm.truthy(&item)? {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

fn builtin_all(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    arity(vm, "all", &args, 1, 1)?;
    let iterator = vm.make_iter(&args.positional[0])?;
    while let Some(item) = vm.next_value(&iterator)? {
        vm.check_cancelled()?;
        if !vm.truthy(&item)? {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

fn builtin_iter(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    arity(vm, "iter", &args, 1, 1)?;
    vm.make_iter(&args.positional[0])
}

fn builtin_next(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    arity(vm, "next", &args, 1, 2)?;
    let iterator = &args.positional[0];
    let next = if let Value::Instance(_) = iterator {
        match vm.call_special(iterator, "__next__", Vec::new()) {
            Ok(Some(value)) => Some(value),
            Ok(None) => {
                let message = format!("'{}' object is not an iterator", iterator.type_name());
                return Err(vm.raise("TypeError", message));
            }
            Err(Signal::Raise(exception)) if exception.is_instance_of("StopIteration") => None,
            Err(other) => return Err(other),
        }
    } else {
        vm.next_value(iterator)?
    };
    match (next, args.positional.get(1)) {
        (Some(value), _) => Ok(value),
        (None, Some(default)) => Ok(default.clone()),
        (None, None) => Err(vm.raise_with_args("StopIteration", Vec::new())),
    }
}

fn builtin_isinstance(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    arity(vm, "isinstance", &args, 2, 2)?;
    Ok(Value::Bool(vm.is_instance(&args.positional[0], &args.positional[1])?))
}

fn builtin_issubclass(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    arity(vm, "issubclass", &args, 2, 2)?;
    let Value::Class(class) = &args.positional[0] else {
        return match &args.positional[0] {
            Value::Builtin(sub) if sub.kind == BuiltinKind::Type => Ok(Value::Bool(matches!(
                &args.positional[1],
                Value::Builtin(sup) if sup.name == sub.name || (sup.name == "int" && sub.name == "bool")
            ))),
            _ => Err(vm.raise("TypeError", "issubclass() arg 1 must be a class")),
        };
    };
    let options = match &args.positional[1] {
        Value::Tuple(options) => options.as_ref().clone(),
        other => vec![other.clone()],
    };
    Ok(Value::Bool(options.iter().any(|option| match option {
        Value::Class(parent) => class.is_subclass_of(parent),
        _ => false,
    })))
}

fn attribute_name(vm: &mut Interpreter, value: &Value) -> RuntimeResult<String> {
    match value {
        Value::Str(s) => Ok(s.to_string()),
        other => {
            let message = format!(
                "attribute name must be string, not '{}'",
                other.type_name()
            );
            Err(vm.raise("TypeError", message))
        }
    }
}

fn builtin_hasattr(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    arity(vm, "hasattr", &args, 2, 2)?;
    let name = attribute_name(vm, &args.positional[1])?;
    match vm.get_attribute(&args.positional[0], &name) {
        Ok(_) => Ok(Value::Bool(true)),
        Err(Signal::Raise(exception)) if exception.is_instance_of("AttributeError") => {
            Ok(Value::Bool(false))
        }
        Err(other) => Err(other),
    }
}

fn builtin_getattr(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    arity(vm, "getattr", &args, 2, 3)?;
    let name = attribute_name(vm, &args.positional[1])?;
    match vm.get_attribute(&args.positional[0], &name) {
        Err(Signal::Raise(exception)) if exception.is_instance_of("AttributeError") => {
            match args.positional.get(2) {
                Some(default) => Ok(default.clone()),
                None => Err(Signal::Raise(exception)),
            }
        }
        other => other,
    }
}

fn builtin_setattr(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    arity(vm, "setattr", &args, 3, 3)?;
    let name = attribute_name(vm, &args.positional[1])?;
    vm.set_attribute(&args.positional[0], &name, args.positional[2].clone())?;
    Ok(Value::None)
}

fn builtin_round(vm: &mut Interpreter, mut args: Args) -> RuntimeResult<Value> {
    let digits_keyword = args.take_keyword("ndigits");
    arity(vm, "round", &args, 1, 2)?;
    let digits = match args.positional.get(1).or(digits_keyword.as_ref()) {
        Some(Value::None) | None => None,
        Some(digits) => Some(int_arg(vm, digits)?),
    };
    let value = &args.positional[0];
    match (value, digits) {
        (Value::Float(v), None) => {
            if !v.is_finite() {
                return Err(vm.raise("OverflowError", "cannot convert float infinity to integer"));
            }
            Ok(Value::Int(v.round_ties_even() as i128))
        }
        (Value::Float(v), Some(digits)) => {
            let factor = 10f64.powi(digits.clamp(-308, 308) as i32);
            Ok(Value::Float((v * factor).round_ties_even() / factor))
        }
        (v, None) if v.as_int().is_some() => Ok(Value::Int(v.as_int().unwrap_or_default())),
        (v, Some(digits)) if v.as_int().is_some() => {
            let n = v.as_int().unwrap_or_default();
            if digits >= 0 {
                return Ok(Value::Int(n));
            }
            let factor = 10i128.checked_pow((-digits) as u32).unwrap_or(i128::MAX);
            let rounded = (n as f64 / factor as f64).round_ties_even() as i128 * factor;
            Ok(Value::Int(rounded))
        }
        (Value::Instance(_), _) => match vm.call_special(value, "__round__", Vec::new())? {
            Some(result) => Ok(result),
            None => Err(no_round(vm, value)),
        },
        (other, _) => Err(no_round(vm, other)),
    }
}

fn no_round(vm: &mut Interpreter, value: &Value) -> Signal {
    let message = format!(
        "type {} doesn't define __round__ method",
        value.type_name()
    );
    vm.raise("TypeError", message)
}

fn builtin_chr(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    arity(vm, "chr", &args, 1, 1)?;
    let code = int_arg(vm, &args.positional[0])?;
    match u32::try_from(code).ok().and_then(char::from_u32) {
        Some(c) => Ok(Value::str(c.to_string())),
        None => Err(vm.raise("ValueError", "chr() arg not in range(0x110000)")),
    }
}

fn builtin_ord(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    arity(vm, "ord", &args, 1, 1)?;
    match &args.positional[0] {
        Value::Str(s) => {
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(Value::Int(c as i128)),
                _ => {
                    let message = format!(
                        "ord() expected a character, but string of length {} found",
                        s.chars().count()
                    );
                    Err(vm.raise("TypeError", message))
                }
            }
        }
        other => {
            let message = format!(
                "ord() expected string of length 1, but {} found",
                other.type_name()
            );
            Err(vm.raise("TypeError", message))
        }
    }
}

fn builtin_id(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    arity(vm, "id", &args, 1, 1)?;
    let value = &args.positional[0];
    let id = match value.identity() {
        Some(address) => address as i128,
        None => hash_of(vm, value)?,
    };
    Ok(Value::Int(id))
}

fn hash_of(vm: &mut Interpreter, value: &Value) -> RuntimeResult<i128> {
    let key = vm.hash_key(value)?;
    if let HashKey::Int(v) = key {
        return Ok(v);
    }
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    Ok(hasher.finish() as i64 as i128)
}

fn builtin_hash(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    arity(vm, "hash", &args, 1, 1)?;
    Ok(Value::Int(hash_of(vm, &args.positional[0])?))
}

fn builtin_callable(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    arity(vm, "callable", &args, 1, 1)?;
    Ok(Value::Bool(args.positional[0].is_callable()))
}

fn builtin_super(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    arity(vm, "super", &args, 0, 0)?;
    vm.current_super()
}

fn builtin_divmod(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    arity(vm, "divmod", &args, 2, 2)?;
    let (a, b) = (args.positional[0].clone(), args.positional[1].clone());
    let quotient = vm.binary_op(crate::ast::BinaryOp::FloorDiv, a.clone(), b.clone())?;
    let remainder = vm.binary_op(crate::ast::BinaryOp::Mod, a, b)?;
    Ok(Value::tuple(vec![quotient, remainder]))
}

fn builtin_pow(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    arity(vm, "pow", &args, 2, 3)?;
    let base = args.positional[0].clone();
    let exponent = args.positional[1].clone();
    let Some(modulus) = args.positional.get(2) else {
        return vm.binary_op(crate::ast::BinaryOp::Pow, base, exponent);
    };
    let (Some(mut b), Some(mut e), Some(m)) = (base.as_int(), exponent.as_int(), modulus.as_int()) else {
        return Err(vm.raise(
            "TypeError",
            "pow() 3rd argument not allowed unless all arguments are integers",
        ));
    };
    if m == 0 {
        return Err(vm.raise("ValueError", "pow() 3rd argument cannot be 0"));
    }
    if e < 0 {
        return Err(vm.raise("ValueError", "base is not invertible for the given modulus"));
    }
    let mut result: i128 = 1 % m;
    b = b.rem_euclid(m);
    while e > 0 {
        if e & 1 == 1 {
            result = mul_mod(result, b, m);
        }
        b = mul_mod(b, b, m);
        e >>= 1;
    }
    Ok(Value::Int(if m < 0 && result > 0 { result + m } else { result }))
}

fn mul_mod(a: i128, b: i128, m: i128) -> i128 {
    match a.checked_mul(b) {
        Some(product) => product.rem_euclid(m),
        None => {
            let mut result = 0i128;
            let mut a = a.rem_euclid(m);
            let mut b = b.rem_euclid(m);
            while b > 0 {
                if b & 1 == 1 {
                    result = (result + a).rem_euclid(m);
                }
                a = (a * 2).rem_euclid(m);
                b >>= 1;
            }
            result
        }
    }
}

fn builtin_format(vm: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    arity(vm, "format", &args, 1, 2)?;
    let spec = match args.positional.get(1) {
        Some(Value::Str(spec)) => spec.to_string(),
        Some(other) => {
            let message = format!(
                "format() argument 2 must be str, not {}",
                other.type_name()
            );
            return Err(vm.raise("TypeError", message));
        }
        None => String::new(),
    };
    Ok(Value::str(vm.format_with_spec(&args.positional[0], &spec)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{ExecutionConfig, OutputSink};

    fn call(vm: &mut Interpreter, name: &str, args: Vec<Value>) -> RuntimeResult<Value> {
        let function = vm.builtins().borrow().get(name).cloned().unwrap();
        vm.call_value(function, Args::new(args))
    }

    #[test]
    fn int_parses_prefixes_and_underscores() {
        assert_eq!(parse_int(" 1_000 ", 10), Some(1000));
        assert_eq!(parse_int("-0x1f", 0), Some(-31));
        assert_eq!(parse_int("ff", 16), Some(255));
        assert_eq!(parse_int("12a", 10), None);
    }

    #[test]
    fn long_builtin_iteration_stops_when_cancelled() {
        let mut vm = Interpreter::new(ExecutionConfig::default());
        vm.cancel_flag().store(true, std::sync::atomic::Ordering::SeqCst);
        let range = Value::Range(RangeValue {
            start: 0,
            stop: 1 << 40,
            step: 1,
        });
        for name in ["sum", "max", "list", "any"] {
            let result = call(&mut vm, name, vec![range.clone()]);
            assert!(matches!(result, Err(Signal::Cancelled)), "{name} kept running");
        }
    }

    #[test]
    fn print_honours_sep_and_end() {
        let mut vm = Interpreter::new(ExecutionConfig::default());
        vm.set_output(OutputSink::Capture(String::new()));
        let args = Args {
            positional: vec![Value::Int(1), Value::str("a")],
            keywords: vec![("sep".into(), Value::str("-")), ("end".into(), Value::str("!"))],
        };
        let print = vm.builtins().borrow().get("print").cloned().unwrap();
        vm.call_value(print, args).unwrap();
        assert_eq!(vm.output(), &OutputSink::Capture("1-a!".to_string()));
    }

    #[test]
    fn sorted_is_stable_with_keys() {
        let mut vm = Interpreter::new(ExecutionConfig::default());
        let words = Value::list(vec![Value::str("bb"), Value::str("a"), Value::str("cc")]);
        let len = vm.builtins().borrow().get("len").cloned().unwrap();
        let items = vm.collect(&words).unwrap();
        let sorted = vm.sort_values(items, Some(&len), false).unwrap();
        assert_eq!(vm.repr(&Value::list(sorted)).unwrap(), "['a', 'bb', 'cc']");
    }

    #[test]
    fn max_of_empty_sequence() {
        let mut vm = Interpreter::new(ExecutionConfig::default());
        let Err(Signal::Raise(exception)) = call(&mut vm, "max", vec![Value::list(Vec::new())]) else {
            panic!("expected ValueError");
        };
        assert_eq!(
            vm.exception_detail(&exception),
            "ValueError: max() arg is an empty sequence"
        );
    }

    #[test]
    fn isinstance_treats_bool_as_int() {
        let mut vm = Interpreter::new(ExecutionConfig::default());
        let int = vm.builtins().borrow().get("int").cloned().unwrap();
        assert!(vm.is_instance(&Value::Bool(true), &int).unwrap());
        assert!(!vm.is_instance(&Value::str("1"), &int).unwrap());
    }

    #[test]
    fn modular_pow() {
        let mut vm = Interpreter::new(ExecutionConfig::default());
        let result = call(&mut vm, "pow", vec![Value::Int(3), Value::Int(200), Value::Int(13)]).unwrap();
        assert!(matches!(result, Value::Int(9)));
    }
}

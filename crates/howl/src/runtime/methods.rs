//! Methods of the builtin containers and strings.
//!
//! Attribute access on a list, dict, set, tuple or string yields a
//! [`NativeMethod`](super::NativeMethod); calling it lands in [`call_method`].

use super::builtins::{arity, int_arg};
use super::{Args, Dict, HashKey, Interpreter, RuntimeResult, Set, Signal, Value};
use std::cell::RefCell;
use std::rc::Rc;

const LIST_METHODS: &[&str] = &[
    "append", "pop", "insert", "extend", "remove", "index", "count", "reverse", "sort", "copy",
    "clear",
];
const DICT_METHODS: &[&str] = &[
    "get", "keys", "values", "items", "pop", "popitem", "update", "setdefault", "copy", "clear",
];
const SET_METHODS: &[&str] = &[
    "add", "remove", "discard", "pop", "copy", "clear", "union", "intersection", "difference",
    "update", "issubset",
];
const TUPLE_METHODS: &[&str] = &["index", "count"];
const STR_METHODS: &[&str] = &[
    "upper", "lower", "strip", "lstrip", "rstrip", "split", "join", "replace", "startswith",
    "endswith", "find", "index", "count", "format", "title", "capitalize", "isdigit", "isalpha",
    "isspace", "zfill",
];

pub(super) fn has_method(receiver: &Value, name: &str) -> bool {
    let names = match receiver {
        Value::List(_) => LIST_METHODS,
        Value::Dict(_) => DICT_METHODS,
        Value::Set(_) => SET_METHODS,
        Value::Tuple(_) => TUPLE_METHODS,
        Value::Str(_) => STR_METHODS,
        _ => return false,
    };
    names.contains(&name)
}

pub(super) fn call_method(
    vm: &mut Interpreter,
    receiver: &Value,
    name: &str,
    args: Args,
) -> RuntimeResult<Value> {
    match receiver {
        Value::List(list) => list_method(vm, list, name, args),
        Value::Dict(dict) => dict_method(vm, dict, name, args),
        Value::Set(set) => set_method(vm, set, name, args),
        Value::Tuple(items) => sequence_search(vm, "tuple", items, name, args),
        Value::Str(text) => str_method(vm, text, name, args),
        other => {
            let message = format!(
                "'{}' object has no attribute '{name}'",
                other.type_name()
            );
            Err(vm.raise("AttributeError", message))
        }
    }
}

/// Resolves a possibly negative index against `len`, clamping like
/// `list.insert` does.
fn clamp_index(index: i128, len: usize) -> usize {
    let len = len as i128;
    let index = if index < 0 { index + len } else { index };
    index.clamp(0, len) as usize
}

fn list_method(
    vm: &mut Interpreter,
    list: &Rc<RefCell<Vec<Value>>>,
    name: &str,
    mut args: Args,
) -> RuntimeResult<Value> {
    match name {
        "append" => {
            arity(vm, name, &args, 1, 1)?;
            list.borrow_mut().push(args.positional.remove(0));
            Ok(Value::None)
        }
        "extend" => {
            arity(vm, name, &args, 1, 1)?;
            let items = vm.collect(&args.positional[0])?;
            list.borrow_mut().extend(items);
            Ok(Value::None)
        }
        "insert" => {
            arity(vm, name, &args, 2, 2)?;
            let index = int_arg(vm, &args.positional[0])?;
            let value = args.positional.remove(1);
            let mut items = list.borrow_mut();
            let at = clamp_index(index, items.len());
            items.insert(at, value);
            Ok(Value::None)
        }
        "pop" => {
            arity(vm, name, &args, 0, 1)?;
            let index = match args.positional.first() {
                Some(index) => int_arg(vm, index)?,
                None => -1,
            };
            let len = list.borrow().len();
            if len == 0 {
                return Err(vm.raise("IndexError", "pop from empty list"));
            }
            let resolved = if index < 0 { index + len as i128 } else { index };
            if resolved < 0 || resolved >= len as i128 {
                return Err(vm.raise("IndexError", "pop index out of range"));
            }
            Ok(list.borrow_mut().remove(resolved as usize))
        }
        "remove" => {
            arity(vm, name, &args, 1, 1)?;
            let snapshot = list.borrow().clone();
            for (index, item) in snapshot.iter().enumerate() {
                if vm.values_equal(item, &args.positional[0])? {
                    let mut items = list.borrow_mut();
                    if index < items.len() {
                        items.remove(index);
                    }
                    return Ok(Value::None);
                }
            }
            Err(vm.raise("ValueError", "list.remove(x): x not in list"))
        }
        "index" | "count" => {
            let snapshot = list.borrow().clone();
            sequence_search(vm, "list", &snapshot, name, args)
        }
        "reverse" => {
            arity(vm, name, &args, 0, 0)?;
            list.borrow_mut().reverse();
            Ok(Value::None)
        }
        "sort" => {
            let key = args.take_keyword("key");
            let reverse = match args.take_keyword("reverse") {
                Some(value) => vm.truthy(&value)?,
                None => false,
            };
            arity(vm, name, &args, 0, 0)?;
            let items = std::mem::take(&mut *list.borrow_mut());
            let sorted = vm.sort_values(items.clone(), key.as_ref(), reverse);
            match sorted {
                Ok(sorted) => {
                    *list.borrow_mut() = sorted;
                    Ok(Value::None)
                }
                Err(signal) => {
                    *list.borrow_mut() = items;
                    Err(signal)
                }
            }
        }
        "copy" => {
            arity(vm, name, &args, 0, 0)?;
            Ok(Value::list(list.borrow().clone()))
        }
        "clear" => {
            arity(vm, name, &args, 0, 0)?;
            list.borrow_mut().clear();
            Ok(Value::None)
        }
        _ => Err(no_attribute(vm, "list", name)),
    }
}

/// `index` and `count` shared by lists and tuples.
fn sequence_search(
    vm: &mut Interpreter,
    type_name: &str,
    items: &[Value],
    name: &str,
    args: Args,
) -> RuntimeResult<Value> {
    match name {
        "count" => {
            arity(vm, name, &args, 1, 1)?;
            let mut count = 0;
            for item in items {
                if vm.values_equal(item, &args.positional[0])? {
                    count += 1;
                }
            }
            Ok(Value::Int(count))
        }
        "index" => {
            arity(vm, name, &args, 1, 3)?;
            let start = match args.positional.get(1) {
                Some(start) => clamp_index(int_arg(vm, start)?, items.len()),
                None => 0,
            };
            let end = match args.positional.get(2) {
                Some(end) => clamp_index(int_arg(vm, end)?, items.len()),
                None => items.len(),
            };
            for (index, item) in items.iter().enumerate().take(end).skip(start) {
                if vm.values_equal(item, &args.positional[0])? {
                    return Ok(Value::Int(index as i128));
                }
            }
            let message = if type_name == "list" {
                format!("{} is not in list", vm.repr(&args.positional[0])?)
            } else {
                "tuple.index(x): x not in tuple".to_string()
            };
            Err(vm.raise("ValueError", message))
        }
        _ => Err(no_attribute(vm, type_name, name)),
    }
}

fn dict_method(
    vm: &mut Interpreter,
    dict: &Rc<RefCell<Dict>>,
    name: &str,
    mut args: Args,
) -> RuntimeResult<Value> {
    match name {
        "get" => {
            arity(vm, name, &args, 1, 2)?;
            let key = vm.hash_key(&args.positional[0])?;
            let found = dict.borrow().get(&key).cloned();
            Ok(found.unwrap_or_else(|| args.positional.get(1).cloned().unwrap_or(Value::None)))
        }
        "keys" => {
            arity(vm, name, &args, 0, 0)?;
            Ok(Value::list(dict.borrow().keys()))
        }
        "values" => {
            arity(vm, name, &args, 0, 0)?;
            Ok(Value::list(dict.borrow().values()))
        }
        "items" => {
            arity(vm, name, &args, 0, 0)?;
            Ok(Value::list(dict.borrow().items()))
        }
        "pop" => {
            arity(vm, name, &args, 1, 2)?;
            let key = vm.hash_key(&args.positional[0])?;
            let removed = dict.borrow_mut().remove(&key);
            match (removed, args.positional.get(1)) {
                (Some((_, value)), _) => Ok(value),
                (None, Some(default)) => Ok(default.clone()),
                (None, None) => Err(vm.raise_with_args("KeyError", vec![args.positional[0].clone()])),
            }
        }
        "popitem" => {
            arity(vm, name, &args, 0, 0)?;
            let last = dict.borrow_mut().pop_last();
            match last {
                Some((key, value)) => Ok(Value::tuple(vec![key, value])),
                None => Err(vm.raise("KeyError", "popitem(): dictionary is empty")),
            }
        }
        "setdefault" => {
            arity(vm, name, &args, 1, 2)?;
            let key = vm.hash_key(&args.positional[0])?;
            if let Some(existing) = dict.borrow().get(&key).cloned() {
                return Ok(existing);
            }
            let default = args.positional.get(1).cloned().unwrap_or(Value::None);
            dict.borrow_mut()
                .insert(key, args.positional[0].clone(), default.clone());
            Ok(default)
        }
        "update" => {
            let keywords = std::mem::take(&mut args.keywords);
            arity(vm, name, &args, 0, 1)?;
            if let Some(source) = args.positional.first() {
                let other = vm.dict_from(source)?;
                for (key, value) in other.iter() {
                    let hash = vm.hash_key(key)?;
                    dict.borrow_mut().insert(hash, key.clone(), value.clone());
                }
            }
            let mut target = dict.borrow_mut();
            for (key, value) in keywords {
                target.insert(HashKey::Str(key.as_str().into()), Value::str(key.as_str()), value);
            }
            Ok(Value::None)
        }
        "copy" => {
            arity(vm, name, &args, 0, 0)?;
            Ok(Value::dict(dict.borrow().clone()))
        }
        "clear" => {
            arity(vm, name, &args, 0, 0)?;
            dict.borrow_mut().clear();
            Ok(Value::None)
        }
        _ => Err(no_attribute(vm, "dict", name)),
    }
}

fn set_method(
    vm: &mut Interpreter,
    set: &Rc<RefCell<Set>>,
    name: &str,
    args: Args,
) -> RuntimeResult<Value> {
    match name {
        "add" => {
            arity(vm, name, &args, 1, 1)?;
            let key = vm.hash_key(&args.positional[0])?;
            set.borrow_mut().insert(key, args.positional[0].clone());
            Ok(Value::None)
        }
        "remove" | "discard" => {
            arity(vm, name, &args, 1, 1)?;
            let key = vm.hash_key(&args.positional[0])?;
            let removed = set.borrow_mut().remove(&key);
            if removed.is_none() && name == "remove" {
                return Err(vm.raise_with_args("KeyError", vec![args.positional[0].clone()]));
            }
            Ok(Value::None)
        }
        "pop" => {
            arity(vm, name, &args, 0, 0)?;
            let first = set.borrow_mut().pop_first();
            first.ok_or_else(|| vm.raise("KeyError", "pop from an empty set"))
        }
        "copy" => {
            arity(vm, name, &args, 0, 0)?;
            Ok(Value::set(set.borrow().clone()))
        }
        "clear" => {
            arity(vm, name, &args, 0, 0)?;
            set.borrow_mut().clear();
            Ok(Value::None)
        }
        "union" | "update" => {
            let mut result = set.borrow().clone();
            for other in &args.positional {
                for item in vm.collect(other)? {
                    let key = vm.hash_key(&item)?;
                    result.insert(key, item);
                }
            }
            if name == "update" {
                *set.borrow_mut() = result;
                return Ok(Value::None);
            }
            Ok(Value::set(result))
        }
        "intersection" | "difference" => {
            let mut result = set.borrow().clone();
            for other in &args.positional {
                let mut keys = Set::new();
                for item in vm.collect(other)? {
                    let key = vm.hash_key(&item)?;
                    keys.insert(key, item);
                }
                let mut kept = Set::new();
                for (key, value) in result.iter() {
                    if keys.contains(key) == (name == "intersection") {
                        kept.insert(key.clone(), value.clone());
                    }
                }
                result = kept;
            }
            Ok(Value::set(result))
        }
        "issubset" => {
            arity(vm, name, &args, 1, 1)?;
            let mut keys = Set::new();
            for item in vm.collect(&args.positional[0])? {
                let key = vm.hash_key(&item)?;
                keys.insert(key, item);
            }
            let subset = set.borrow().iter().all(|(key, _)| keys.contains(key));
            Ok(Value::Bool(subset))
        }
        _ => Err(no_attribute(vm, "set", name)),
    }
}

fn str_arg(vm: &mut Interpreter, method: &str, value: &Value) -> RuntimeResult<Rc<str>> {
    match value {
        Value::Str(s) => Ok(s.clone()),
        other => {
            let message = format!(
                "{method}() argument must be str, not {}",
                other.type_name()
            );
            Err(vm.raise("TypeError", message))
        }
    }
}

/// Optional separator/strip-characters argument: `None` when omitted or `None`.
fn optional_str(vm: &mut Interpreter, method: &str, args: &Args, index: usize) -> RuntimeResult<Option<Rc<str>>> {
    match args.positional.get(index) {
        None | Some(Value::None) => Ok(None),
        Some(value) => Ok(Some(str_arg(vm, method, value)?)),
    }
}

fn str_method(vm: &mut Interpreter, text: &Rc<str>, name: &str, mut args: Args) -> RuntimeResult<Value> {
    match name {
        "upper" | "lower" | "title" | "capitalize" | "isdigit" | "isalpha" | "isspace" => {
            arity(vm, name, &args, 0, 0)?;
            Ok(match name {
                "upper" => Value::str(text.to_uppercase()),
                "lower" => Value::str(text.to_lowercase()),
                "title" => Value::str(title_case(text)),
                "capitalize" => {
                    let mut chars = text.chars();
                    let capitalized: String = match chars.next() {
                        Some(first) => first.to_uppercase().chain(chars.as_str().to_lowercase().chars()).collect(),
                        None => String::new(),
                    };
                    Value::str(capitalized)
                }
                "isdigit" => Value::Bool(!text.is_empty() && text.chars().all(|c| c.is_ascii_digit())),
                "isalpha" => Value::Bool(!text.is_empty() && text.chars().all(char::is_alphabetic)),
                _ => Value::Bool(!text.is_empty() && text.chars().all(char::is_whitespace)),
            })
        }
        "strip" | "lstrip" | "rstrip" => {
            arity(vm, name, &args, 0, 1)?;
            let chars = optional_str(vm, name, &args, 0)?;
            let matches = |c: char| match &chars {
                Some(set) => set.contains(c),
                None => c.is_whitespace(),
            };
            let stripped = match name {
                "strip" => text.trim_matches(matches),
                "lstrip" => text.trim_start_matches(matches),
                _ => text.trim_end_matches(matches),
            };
            Ok(Value::str(stripped))
        }
        "split" => {
            let sep_keyword = args.take_keyword("sep");
            let max_keyword = args.take_keyword("maxsplit");
            if let Some(sep) = sep_keyword {
                args.positional.insert(0, sep);
            }
            if let Some(max) = max_keyword {
                if args.positional.is_empty() {
                    args.positional.push(Value::None);
                }
                args.positional.push(max);
            }
            arity(vm, name, &args, 0, 2)?;
            let separator = optional_str(vm, name, &args, 0)?;
            let max_split = match args.positional.get(1) {
                Some(max) => int_arg(vm, max)?,
                None => -1,
            };
            let limit = if max_split < 0 { usize::MAX } else { max_split as usize };
            let parts: Vec<Value> = match separator {
                Some(sep) if sep.is_empty() => return Err(vm.raise("ValueError", "empty separator")),
                Some(sep) => text
                    .splitn(limit.saturating_add(1), &*sep)
                    .map(Value::str)
                    .collect(),
                None => split_whitespace(text, limit).into_iter().map(Value::str).collect(),
            };
            Ok(Value::list(parts))
        }
        "join" => {
            arity(vm, name, &args, 1, 1)?;
            let items = vm.collect(&args.positional[0])?;
            let mut parts = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                match item {
                    Value::Str(s) => parts.push(s.to_string()),
                    other => {
                        let message = format!(
                            "sequence item {index}: expected str instance, {} found",
                            other.type_name()
                        );
                        return Err(vm.raise("TypeError", message));
                    }
                }
            }
            Ok(Value::str(parts.join(text)))
        }
        "replace" => {
            arity(vm, name, &args, 2, 3)?;
            let old = str_arg(vm, name, &args.positional[0])?;
            let new = str_arg(vm, name, &args.positional[1])?;
            let replaced = match args.positional.get(2) {
                Some(count) => {
                    let count = int_arg(vm, count)?;
                    if count < 0 {
                        text.replace(&*old, &new)
                    } else {
                        text.replacen(&*old, &new, count as usize)
                    }
                }
                None => text.replace(&*old, &new),
            };
            Ok(Value::str(replaced))
        }
        "startswith" | "endswith" => {
            arity(vm, name, &args, 1, 1)?;
            let candidates = match &args.positional[0] {
                Value::Tuple(items) => items.as_ref().clone(),
                other => vec![other.clone()],
            };
            for candidate in &candidates {
                let affix = str_arg(vm, name, candidate)?;
                let hit = if name == "startswith" {
                    text.starts_with(&*affix)
                } else {
                    text.ends_with(&*affix)
                };
                if hit {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        "find" | "index" => {
            arity(vm, name, &args, 1, 1)?;
            let needle = str_arg(vm, name, &args.positional[0])?;
            match text.find(&*needle) {
                Some(byte) => Ok(Value::Int(text[..byte].chars().count() as i128)),
                None if name == "find" => Ok(Value::Int(-1)),
                None => Err(vm.raise("ValueError", "substring not found")),
            }
        }
        "count" => {
            arity(vm, name, &args, 1, 1)?;
            let needle = str_arg(vm, name, &args.positional[0])?;
            let count = if needle.is_empty() {
                text.chars().count() + 1
            } else {
                text.matches(&*needle).count()
            };
            Ok(Value::Int(count as i128))
        }
        "zfill" => {
            arity(vm, name, &args, 1, 1)?;
            let width = int_arg(vm, &args.positional[0])?.max(0) as usize;
            let len = text.chars().count();
            if len >= width {
                return Ok(Value::Str(text.clone()));
            }
            let (sign, digits) = match text.chars().next() {
                Some(c @ ('+' | '-')) => (c.to_string(), &text[1..]),
                _ => (String::new(), &text[..]),
            };
            Ok(Value::str(format!("{sign}{}{digits}", "0".repeat(width - len))))
        }
        "format" => Ok(Value::str(format_template(vm, text, args)?)),
        _ => Err(no_attribute(vm, "str", name)),
    }
}

fn title_case(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut previous_cased = false;
    for c in text.chars() {
        if previous_cased {
            result.extend(c.to_lowercase());
        } else {
            result.extend(c.to_uppercase());
        }
        previous_cased = c.is_alphabetic();
    }
    result
}

/// Whitespace splitting with a maximum number of splits; the remainder keeps
/// its inner whitespace but loses leading whitespace.
fn split_whitespace(text: &str, limit: usize) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut rest = text.trim_start();
    while !rest.is_empty() {
        if parts.len() == limit {
            parts.push(rest);
            break;
        }
        match rest.find(char::is_whitespace) {
            Some(end) => {
                parts.push(&rest[..end]);
                rest = rest[end..].trim_start();
            }
            None => {
                parts.push(rest);
                break;
            }
        }
    }
    parts
}

/// `str.format`: `{}`, `{0}`, `{name}`, attribute and index lookups,
/// `!r`/`!s` conversions and a format spec after `:`.
fn format_template(vm: &mut Interpreter, template: &str, args: Args) -> RuntimeResult<String> {
    let mut output = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    let mut auto_index = 0usize;
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                output.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                output.push('}');
            }
            '}' => {
                return Err(vm.raise("ValueError", "Single '}' encountered in format string"));
            }
            '{' => {
                let mut field = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    field.push(c);
                }
                if !closed {
                    return Err(vm.raise("ValueError", "Single '{' encountered in format string"));
                }
                output.push_str(&render_field(vm, &field, &args, &mut auto_index)?);
            }
            other => output.push(other),
        }
    }
    Ok(output)
}

fn render_field(
    vm: &mut Interpreter,
    field: &str,
    args: &Args,
    auto_index: &mut usize,
) -> RuntimeResult<String> {
    let (field, spec) = field.split_once(':').unwrap_or((field, ""));
    let (field, conversion) = match field.split_once('!') {
        Some((field, conversion)) => (field, Some(conversion)),
        None => (field, None),
    };
    let name_end = field.find(['.', '[']).unwrap_or(field.len());
    let (head, mut accessors) = field.split_at(name_end);
    let mut value = if head.is_empty() {
        let index = *auto_index;
        *auto_index += 1;
        positional(vm, args, index)?
    } else if let Ok(index) = head.parse::<usize>() {
        positional(vm, args, index)?
    } else {
        match args.keywords.iter().find(|(key, _)| key == head) {
            Some((_, value)) => value.clone(),
            None => return Err(vm.raise_with_args("KeyError", vec![Value::str(head)])),
        }
    };
    while !accessors.is_empty() {
        if let Some(rest) = accessors.strip_prefix('.') {
            let end = rest.find(['.', '[']).unwrap_or(rest.len());
            value = vm.get_attribute(&value, &rest[..end])?;
            accessors = &rest[end..];
        } else if let Some(rest) = accessors.strip_prefix('[') {
            let Some(end) = rest.find(']') else {
                return Err(vm.raise("ValueError", "Missing ']' in format string"));
            };
            let key = match rest[..end].parse::<i128>() {
                Ok(index) => Value::Int(index),
                Err(_) => Value::str(&rest[..end]),
            };
            value = vm.get_item(&value, &key)?;
            accessors = &rest[end + 1..];
        } else {
            return Err(vm.raise("ValueError", "Only '.' or '[' may follow ']' in format field specifier"));
        }
    }
    let value = match conversion {
        None => value,
        Some("r") => Value::str(vm.repr(&value)?),
        Some("s") => Value::str(vm.str(&value)?),
        Some(other) => {
            let message = format!("Unknown conversion specifier {other}");
            return Err(vm.raise("ValueError", message));
        }
    };
    vm.format_with_spec(&value, spec)
}

fn positional(vm: &mut Interpreter, args: &Args, index: usize) -> RuntimeResult<Value> {
    match args.positional.get(index) {
        Some(value) => Ok(value.clone()),
        None => {
            let message =
                format!("Replacement index {index} out of range for positional args tuple");
            Err(vm.raise("IndexError", message))
        }
    }
}

fn no_attribute(vm: &mut Interpreter, type_name: &str, name: &str) -> Signal {
    let message = format!("'{type_name}' object has no attribute '{name}'");
    vm.raise("AttributeError", message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ExecutionConfig;

    fn call(vm: &mut Interpreter, receiver: &Value, name: &str, args: Vec<Value>) -> Value {
        call_method(vm, receiver, name, Args::new(args)).unwrap()
    }

    fn show(vm: &mut Interpreter, value: &Value) -> String {
        vm.repr(value).unwrap()
    }

    #[test]
    fn list_mutation() {
        let mut vm = Interpreter::new(ExecutionConfig::default());
        let list = Value::list(vec![Value::Int(3), Value::Int(1)]);
        call(&mut vm, &list, "append", vec![Value::Int(2)]);
        call(&mut vm, &list, "insert", vec![Value::Int(-1), Value::Int(9)]);
        assert_eq!(show(&mut vm, &list), "[3, 1, 9, 2]");
        call(&mut vm, &list, "sort", vec![]);
        assert_eq!(show(&mut vm, &list), "[1, 2, 3, 9]");
        let popped = call(&mut vm, &list, "pop", vec![]);
        assert_eq!(show(&mut vm, &popped), "9");
    }

    #[test]
    fn list_remove_missing_value() {
        let mut vm = Interpreter::new(ExecutionConfig::default());
        let list = Value::list(vec![Value::Int(1)]);
        let Err(Signal::Raise(exception)) =
            call_method(&mut vm, &list, "remove", Args::new(vec![Value::Int(5)]))
        else {
            panic!("expected ValueError");
        };
        assert_eq!(
            vm.exception_detail(&exception),
            "ValueError: list.remove(x): x not in list"
        );
    }

    #[test]
    fn dict_setdefault_and_pop() {
        let mut vm = Interpreter::new(ExecutionConfig::default());
        let dict = Value::dict(Dict::new());
        call(&mut vm, &dict, "setdefault", vec![Value::str("a"), Value::Int(1)]);
        call(&mut vm, &dict, "setdefault", vec![Value::str("a"), Value::Int(2)]);
        assert_eq!(show(&mut vm, &dict), "{'a': 1}");
        let missing = call(&mut vm, &dict, "pop", vec![Value::str("b"), Value::None]);
        assert!(missing.is_none());
    }

    #[test]
    fn string_helpers() {
        let mut vm = Interpreter::new(ExecutionConfig::default());
        let text = Value::str("  a b  c ");
        let parts = call(&mut vm, &text, "split", vec![]);
        assert_eq!(show(&mut vm, &parts), "['a', 'b', 'c']");
        let csv = Value::str("x,y,,z");
        let parts = call(&mut vm, &csv, "split", vec![Value::str(","), Value::Int(2)]);
        assert_eq!(show(&mut vm, &parts), "['x', 'y', ',z']");
        let title = call(&mut vm, &Value::str("hello wORLD"), "title", vec![]);
        assert_eq!(show(&mut vm, &title), "'Hello World'");
        let joined = call(&mut vm, &Value::str("-"), "join", vec![Value::list(vec![Value::str("a"), Value::str("b")])]);
        assert_eq!(show(&mut vm, &joined), "'a-b'");
    }

    #[test]
    fn format_templates() {
        let mut vm = Interpreter::new(ExecutionConfig::default());
        let mut args = Args::new(vec![Value::Int(7), Value::str("x")]);
        args.keywords.push(("pi".into(), Value::Float(3.14159)));
        let result = format_template(&mut vm, "{} {!r} {pi:.2f} {{ok}} {0}", args).unwrap();
        assert_eq!(result, "7 'x' 3.14 {ok} 7");
    }
}

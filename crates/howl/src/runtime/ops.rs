//! Operators, comparisons, subscripts and iteration.

use super::{
    Args, Dict, HashKey, Interpreter, IterState, RangeValue, RuntimeResult, Set, Signal, Value,
};
use crate::ast::{BinaryOp, CompareOp, UnaryOp};
use std::rc::Rc;

/// Largest sequence a repetition may build, in items or bytes.
const MAX_REPEAT_LEN: usize = 1 << 26;

fn dunder(op: BinaryOp) -> Option<(&'static str, &'static str)> {
    Some(match op {
        BinaryOp::Add => ("__add__", "__radd__"),
        BinaryOp::Sub => ("__sub__", "__rsub__"),
        BinaryOp::Mul => ("__mul__", "__rmul__"),
        BinaryOp::Div => ("__truediv__", "__rtruediv__"),
        BinaryOp::FloorDiv => ("__floordiv__", "__rfloordiv__"),
        BinaryOp::Mod => ("__mod__", "__rmod__"),
        BinaryOp::Pow => ("__pow__", "__rpow__"),
        BinaryOp::MatMul => ("__matmul__", "__rmatmul__"),
        BinaryOp::BitAnd => ("__and__", "__rand__"),
        BinaryOp::BitOr => ("__or__", "__ror__"),
        BinaryOp::BitXor => ("__xor__", "__rxor__"),
        BinaryOp::Shl => ("__lshift__", "__rlshift__"),
        BinaryOp::Shr => ("__rshift__", "__rrshift__"),
        BinaryOp::And | BinaryOp::Or => return None,
    })
}

fn is_number(value: &Value) -> bool {
    matches!(value, Value::Int(_) | Value::Bool(_) | Value::Float(_))
}

/// Resolves a possibly negative index against `len`.
fn normalize_index(index: i128, len: usize) -> Option<usize> {
    let len = len as i128;
    let index = if index < 0 { index + len } else { index };
    (0..len).contains(&index).then_some(index as usize)
}

impl Interpreter {
    pub(crate) fn truthy(&mut self, value: &Value) -> RuntimeResult<bool> {
        Ok(match value {
            Value::None => false,
            Value::Bool(v) => *v,
            Value::Int(v) => *v != 0,
            Value::Float(v) => *v != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Tuple(items) => !items.is_empty(),
            Value::List(items) => !items.borrow().is_empty(),
            Value::Dict(dict) => !dict.borrow().is_empty(),
            Value::Set(set) => !set.borrow().is_empty(),
            Value::Range(range) => !range.is_empty(),
            Value::Instance(_) => {
                if let Some(result) = self.call_special(value, "__bool__", Vec::new())? {
                    return self.truthy(&result);
                }
                if let Some(result) = self.call_special(value, "__len__", Vec::new())? {
                    return self.truthy(&result);
                }
                true
            }
            _ => true,
        })
    }

    pub(crate) fn hash_key(&mut self, value: &Value) -> RuntimeResult<HashKey> {
        HashKey::from_value(value)
            .map_err(|type_name| self.raise("TypeError", format!("unhashable type: '{type_name}'")))
    }

    pub(crate) fn binary_op(&mut self, op: BinaryOp, left: Value, right: Value) -> RuntimeResult<Value> {
        if let Some((forward, reflected)) = dunder(op) {
            if let Some(result) = self.call_special(&left, forward, vec![right.clone()])? {
                return Ok(result);
            }
            if let Some(result) = self.call_special(&right, reflected, vec![left.clone()])? {
                return Ok(result);
            }
        }

        match (&left, &right) {
            (Value::Bool(a), Value::Bool(b))
                if matches!(op, BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor) =>
            {
                return Ok(Value::Bool(match op {
                    BinaryOp::BitAnd => a & b,
                    BinaryOp::BitOr => a | b,
                    _ => a ^ b,
                }));
            }
            (Value::Float(_), _) | (_, Value::Float(_)) if is_number(&left) && is_number(&right) => {
                let a = left.as_float().unwrap_or_default();
                let b = right.as_float().unwrap_or_default();
                return self.float_op(op, a, b, &left, &right);
            }
            _ => {}
        }
        if let (Some(a), Some(b)) = (left.as_int(), right.as_int()) {
            return self.int_op(op, a, b, &left, &right);
        }

        match (op, &left, &right) {
            (BinaryOp::Add, Value::Str(a), Value::Str(b)) => {
                let mut out = String::with_capacity(a.len() + b.len());
                out.push_str(a);
                out.push_str(b);
                Ok(Value::str(out))
            }
            (BinaryOp::Add, Value::Str(_), other) => {
                let message = format!(
                    "can only concatenate str (not \"{}\") to str",
                    other.type_name()
                );
                Err(self.raise("TypeError", message))
            }
            (BinaryOp::Add, Value::List(a), Value::List(b)) => {
                let mut items = a.borrow().clone();
                items.extend(b.borrow().iter().cloned());
                Ok(Value::list(items))
            }
            (BinaryOp::Add, Value::List(_), other) => {
                let message = format!(
                    "can only concatenate list (not \"{}\") to list",
                    other.type_name()
                );
                Err(self.raise("TypeError", message))
            }
            (BinaryOp::Add, Value::Tuple(a), Value::Tuple(b)) => {
                let mut items = a.as_ref().clone();
                items.extend(b.iter().cloned());
                Ok(Value::tuple(items))
            }
            (BinaryOp::Mul, Value::Str(_) | Value::List(_) | Value::Tuple(_), count)
            | (BinaryOp::Mul, count, Value::Str(_) | Value::List(_) | Value::Tuple(_))
                if count.as_int().is_some() =>
            {
                let times = count.as_int().unwrap_or_default();
                let sequence = if is_number(&left) { &right } else { &left };
                self.repeat(sequence, times)
            }
            (BinaryOp::Mod, Value::Str(format), args) => {
                let text = self.percent_format(format, args)?;
                Ok(Value::str(text))
            }
            (_, Value::Set(a), Value::Set(b)) => {
                let a = a.borrow();
                let b = b.borrow();
                let mut out = Set::new();
                match op {
                    BinaryOp::BitOr => {
                        for (key, value) in a.iter().chain(b.iter()) {
                            out.insert(key.clone(), value.clone());
                        }
                    }
                    BinaryOp::BitAnd => {
                        for (key, value) in a.iter().filter(|(key, _)| b.contains(key)) {
                            out.insert(key.clone(), value.clone());
                        }
                    }
                    BinaryOp::Sub => {
                        for (key, value) in a.iter().filter(|(key, _)| !b.contains(key)) {
                            out.insert(key.clone(), value.clone());
                        }
                    }
                    BinaryOp::BitXor => {
                        for (key, value) in a.iter().filter(|(key, _)| !b.contains(key)) {
                            out.insert(key.clone(), value.clone());
                        }
                        for (key, value) in b.iter().filter(|(key, _)| !a.contains(key)) {
                            out.insert(key.clone(), value.clone());
                        }
                    }
                    _ => return Err(self.unsupported(op, &left, &right)),
                }
                Ok(Value::set(out))
            }
            (BinaryOp::BitOr, Value::Dict(a), Value::Dict(b)) => {
                let mut out = a.borrow().clone();
                for (key, value) in b.borrow().iter() {
                    let hash = self.hash_key(key)?;
                    out.insert(hash, key.clone(), value.clone());
                }
                Ok(Value::dict(out))
            }
            _ => Err(self.unsupported(op, &left, &right)),
        }
    }

    fn unsupported(&mut self, op: BinaryOp, left: &Value, right: &Value) -> Signal {
        let message = format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            if op == BinaryOp::Pow { "** or pow()" } else { op.as_str() },
            left.type_name(),
            right.type_name()
        );
        self.raise("TypeError", message)
    }

    fn overflow(&mut self) -> Signal {
        self.raise("OverflowError", "integer overflow")
    }

    fn int_op(&mut self, op: BinaryOp, a: i128, b: i128, left: &Value, right: &Value) -> RuntimeResult<Value> {
        let result = match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Sub => a.checked_sub(b),
            BinaryOp::Mul => a.checked_mul(b),
            BinaryOp::Div => {
                if b == 0 {
                    return Err(self.raise("ZeroDivisionError", "division by zero"));
                }
                return Ok(Value::Float(a as f64 / b as f64));
            }
            BinaryOp::FloorDiv => {
                if b == 0 {
                    return Err(self.raise(
                        "ZeroDivisionError",
                        "integer division or modulo by zero",
                    ));
                }
                a.checked_div(b).map(|q| {
                    if a % b != 0 && ((a < 0) != (b < 0)) {
                        q - 1
                    } else {
                        q
                    }
                })
            }
            BinaryOp::Mod => {
                if b == 0 {
                    return Err(self.raise("ZeroDivisionError", "integer modulo by zero"));
                }
                a.checked_rem(b).map(|r| {
                    if r != 0 && ((r < 0) != (b < 0)) {
                        r + b
                    } else {
                        r
                    }
                })
            }
            BinaryOp::Pow => {
                if b < 0 {
                    if a == 0 {
                        return Err(self.raise(
                            "ZeroDivisionError",
                            "0.0 cannot be raised to a negative power",
                        ));
                    }
                    return Ok(Value::Float((a as f64).powf(b as f64)));
                }
                u32::try_from(b).ok().and_then(|exp| a.checked_pow(exp))
            }
            BinaryOp::BitAnd => Some(a & b),
            BinaryOp::BitOr => Some(a | b),
            BinaryOp::BitXor => Some(a ^ b),
            BinaryOp::Shl => {
                if b < 0 {
                    return Err(self.raise("ValueError", "negative shift count"));
                }
                if a == 0 {
                    Some(0)
                } else {
                    u32::try_from(b)
                        .ok()
                        .and_then(|shift| a.checked_shl(shift))
                        .filter(|shifted| shifted >> b == a)
                }
            }
            BinaryOp::Shr => {
                if b < 0 {
                    return Err(self.raise("ValueError", "negative shift count"));
                }
                Some(if b >= 127 { if a < 0 { -1 } else { 0 } } else { a >> b })
            }
            BinaryOp::MatMul | BinaryOp::And | BinaryOp::Or => {
                return Err(self.unsupported(op, left, right))
            }
        };
        match result {
            Some(value) => Ok(Value::Int(value)),
            None => Err(self.overflow()),
        }
    }

    fn float_op(&mut self, op: BinaryOp, a: f64, b: f64, left: &Value, right: &Value) -> RuntimeResult<Value> {
        let value = match op {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => {
                if b == 0.0 {
                    return Err(self.raise("ZeroDivisionError", "float division by zero"));
                }
                a / b
            }
            BinaryOp::FloorDiv => {
                if b == 0.0 {
                    return Err(self.raise("ZeroDivisionError", "float floor division by zero"));
                }
                (a / b).floor()
            }
            BinaryOp::Mod => {
                if b == 0.0 {
                    return Err(self.raise("ZeroDivisionError", "float modulo"));
                }
                let r = a % b;
                if r != 0.0 && ((r < 0.0) != (b < 0.0)) {
                    r + b
                } else {
                    r
                }
            }
            BinaryOp::Pow => {
                if a == 0.0 && b < 0.0 {
                    return Err(self.raise(
                        "ZeroDivisionError",
                        "0.0 cannot be raised to a negative power",
                    ));
                }
                a.powf(b)
            }
            _ => return Err(self.unsupported(op, left, right)),
        };
        Ok(Value::Float(value))
    }

    fn repeat(&mut self, sequence: &Value, count: i128) -> RuntimeResult<Value> {
        let Ok(count) = usize::try_from(count.max(0)) else {
            return Err(self.raise(
                "OverflowError",
                "cannot fit 'int' into an index-sized integer",
            ));
        };
        let len = match sequence {
            Value::Str(s) => s.len(),
            Value::List(items) => items.borrow().len(),
            Value::Tuple(items) => items.len(),
            _ => 0,
        };
        if len.checked_mul(count).map_or(true, |total| total > MAX_REPEAT_LEN) {
            return Err(self.raise_with_args("MemoryError", Vec::new()));
        }
        Ok(match sequence {
            Value::Str(s) => Value::str(s.repeat(count)),
            Value::List(items) => {
                let items = items.borrow();
                Value::list(repeat_items(&items, count))
            }
            Value::Tuple(items) => Value::tuple(repeat_items(items, count)),
            other => {
                let message = format!("can't multiply sequence by '{}'", other.type_name());
                return Err(self.raise("TypeError", message));
            }
        })
    }

    pub(crate) fn unary_op(&mut self, op: UnaryOp, value: Value) -> RuntimeResult<Value> {
        if op == UnaryOp::Not {
            return Ok(Value::Bool(!self.truthy(&value)?));
        }
        let special = match op {
            UnaryOp::Neg => "__neg__",
            UnaryOp::Pos => "__pos__",
            _ => "__invert__",
        };
        if let Some(result) = self.call_special(&value, special, Vec::new())? {
            return Ok(result);
        }
        match (op, &value) {
            (UnaryOp::Neg, Value::Float(v)) => Ok(Value::Float(-v)),
            (UnaryOp::Pos, Value::Float(v)) => Ok(Value::Float(*v)),
            (UnaryOp::Neg, v) if v.as_int().is_some() => match v.as_int().unwrap_or_default().checked_neg() {
                Some(result) => Ok(Value::Int(result)),
                None => Err(self.overflow()),
            },
            (UnaryOp::Pos, v) if v.as_int().is_some() => Ok(Value::Int(v.as_int().unwrap_or_default())),
            (UnaryOp::BitNot, v) if v.as_int().is_some() => Ok(Value::Int(!v.as_int().unwrap_or_default())),
            _ => {
                let symbol = match op {
                    UnaryOp::Neg => "-",
                    UnaryOp::Pos => "+",
                    _ => "~",
                };
                let message = format!("bad operand type for unary {symbol}: '{}'", value.type_name());
                Err(self.raise("TypeError", message))
            }
        }
    }

    pub(crate) fn compare(&mut self, op: CompareOp, left: &Value, right: &Value) -> RuntimeResult<bool> {
        match op {
            CompareOp::Eq => self.values_equal(left, right),
            CompareOp::NotEq => {
                if let Some(result) = self.call_special(left, "__ne__", vec![right.clone()])? {
                    return self.truthy(&result);
                }
                Ok(!self.values_equal(left, right)?)
            }
            CompareOp::Is => Ok(is_same(left, right)),
            CompareOp::IsNot => Ok(!is_same(left, right)),
            CompareOp::In => self.contains(right, left),
            CompareOp::NotIn => Ok(!self.contains(right, left)?),
            CompareOp::Lt | CompareOp::Lte | CompareOp::Gt | CompareOp::Gte => {
                self.order(op, left, right)
            }
        }
    }

    pub(crate) fn values_equal(&mut self, left: &Value, right: &Value) -> RuntimeResult<bool> {
        if let Some(result) = self.call_special(left, "__eq__", vec![right.clone()])? {
            return self.truthy(&result);
        }
        if let Some(result) = self.call_special(right, "__eq__", vec![left.clone()])? {
            return self.truthy(&result);
        }
        Ok(match (left, right) {
            (Value::None, Value::None) => true,
            (a, b) if is_number(a) && is_number(b) => match (a.as_int(), b.as_int()) {
                (Some(x), Some(y)) => x == y,
                _ => a.as_float() == b.as_float(),
            },
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Tuple(a), Value::Tuple(b)) => self.sequences_equal(a, b)?,
            (Value::List(a), Value::List(b)) => {
                if Rc::ptr_eq(a, b) {
                    return Ok(true);
                }
                let a = a.borrow().clone();
                let b = b.borrow().clone();
                self.sequences_equal(&a, &b)?
            }
            (Value::Dict(a), Value::Dict(b)) => {
                if Rc::ptr_eq(a, b) {
                    return Ok(true);
                }
                let a = a.borrow().clone();
                let b = b.borrow().clone();
                if a.len() != b.len() {
                    return Ok(false);
                }
                for (key, value) in a.iter() {
                    let hash = self.hash_key(key)?;
                    let Some(other) = b.get(&hash) else {
                        return Ok(false);
                    };
                    if !self.values_equal(value, other)? {
                        return Ok(false);
                    }
                }
                true
            }
            (Value::Set(a), Value::Set(b)) => {
                let a = a.borrow();
                let b = b.borrow();
                a.len() == b.len() && a.iter().all(|(key, _)| b.contains(key))
            }
            (Value::Range(a), Value::Range(b)) => {
                (a.is_empty() && b.is_empty())
                    || (a.len() == b.len() && a.get(0) == b.get(0) && (a.len() == 1 || a.step == b.step))
            }
            (Value::Builtin(a), Value::Builtin(b)) => a.name == b.name,
            (Value::BoundMethod(a), Value::BoundMethod(b)) => {
                is_same(&a.receiver, &b.receiver) && is_same(&a.function, &b.function)
            }
            (a, b) => is_same(a, b),
        })
    }

    fn sequences_equal(&mut self, a: &[Value], b: &[Value]) -> RuntimeResult<bool> {
        if a.len() != b.len() {
            return Ok(false);
        }
        for (x, y) in a.iter().zip(b) {
            if !self.values_equal(x, y)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn order(&mut self, op: CompareOp, left: &Value, right: &Value) -> RuntimeResult<bool> {
        let (forward, reflected) = match op {
            CompareOp::Lt => ("__lt__", "__gt__"),
            CompareOp::Lte => ("__le__", "__ge__"),
            CompareOp::Gt => ("__gt__", "__lt__"),
            _ => ("__ge__", "__le__"),
        };
        if let Some(result) = self.call_special(left, forward, vec![right.clone()])? {
            return self.truthy(&result);
        }
        if let Some(result) = self.call_special(right, reflected, vec![left.clone()])? {
            return self.truthy(&result);
        }
        let ordering = match (left, right) {
            (a, b) if is_number(a) && is_number(b) => match (a.as_int(), b.as_int()) {
                (Some(x), Some(y)) => x.partial_cmp(&y),
                _ => a.as_float().partial_cmp(&b.as_float()),
            },
            (Value::Str(a), Value::Str(b)) => a.partial_cmp(b),
            (Value::Tuple(a), Value::Tuple(b)) => {
                return self.order_sequences(op, &a[..], &b[..])
            }
            (Value::List(a), Value::List(b)) => {
                let a = a.borrow().clone();
                let b = b.borrow().clone();
                return self.order_sequences(op, &a, &b);
            }
            (Value::Set(a), Value::Set(b)) => {
                let a = a.borrow();
                let b = b.borrow();
                let subset = a.iter().all(|(key, _)| b.contains(key));
                let superset = b.iter().all(|(key, _)| a.contains(key));
                return Ok(match op {
                    CompareOp::Lt => subset && a.len() < b.len(),
                    CompareOp::Lte => subset,
                    CompareOp::Gt => superset && a.len() > b.len(),
                    _ => superset,
                });
            }
            _ => {
                let symbol = match op {
                    CompareOp::Lt => "<",
                    CompareOp::Lte => "<=",
                    CompareOp::Gt => ">",
                    _ => ">=",
                };
                let message = format!(
                    "'{symbol}' not supported between instances of '{}' and '{}'",
                    left.type_name(),
                    right.type_name()
                );
                return Err(self.raise("TypeError", message));
            }
        };
        let Some(ordering) = ordering else {
            return Ok(false);
        };
        Ok(match op {
            CompareOp::Lt => ordering.is_lt(),
            CompareOp::Lte => ordering.is_le(),
            CompareOp::Gt => ordering.is_gt(),
            _ => ordering.is_ge(),
        })
    }

    fn order_sequences(&mut self, op: CompareOp, a: &[Value], b: &[Value]) -> RuntimeResult<bool> {
        for (x, y) in a.iter().zip(b) {
            if !self.values_equal(x, y)? {
                return self.order(op, x, y);
            }
        }
        let (x, y) = (a.len(), b.len());
        Ok(match op {
            CompareOp::Lt => x < y,
            CompareOp::Lte => x <= y,
            CompareOp::Gt => x > y,
            _ => x >= y,
        })
    }

    /// Less-than used by `sorted`, `min` and `max`.
    pub(crate) fn less_than(&mut self, left: &Value, right: &Value) -> RuntimeResult<bool> {
        self.order(CompareOp::Lt, left, right)
    }

    pub(crate) fn contains(&mut self, container: &Value, item: &Value) -> RuntimeResult<bool> {
        match container {
            Value::Str(text) => match item {
                Value::Str(needle) => Ok(text.contains(needle.as_ref())),
                other => {
                    let message = format!(
                        "'in <string>' requires string as left operand, not {}",
                        other.type_name()
                    );
                    Err(self.raise("TypeError", message))
                }
            },
            Value::List(items) => {
                let items = items.borrow().clone();
                self.any_equal(&items, item)
            }
            Value::Tuple(items) => self.any_equal(items, item),
            Value::Dict(dict) => {
                let key = self.hash_key(item)?;
                Ok(dict.borrow().contains(&key))
            }
            Value::Set(set) => {
                let key = self.hash_key(item)?;
                Ok(set.borrow().contains(&key))
            }
            Value::Range(range) => Ok(match item {
                Value::Float(v) if v.fract() == 0.0 => range.contains(*v as i128),
                other => other.as_int().map(|v| range.contains(v)).unwrap_or(false),
            }),
            Value::Instance(_) => {
                if let Some(result) = self.call_special(container, "__contains__", vec![item.clone()])? {
                    return self.truthy(&result);
                }
                let items = self.collect(container)?;
                self.any_equal(&items, item)
            }
            Value::Iterator(_) => {
                while let Some(next) = self.next_value(container)? {
                    self.check_cancelled()?;
                    if self.values_equal(&next, item)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            other => {
                let message = format!(
                    "argument of type '{}' is not iterable",
                    other.type_name()
                );
                Err(self.raise("TypeError", message))
            }
        }
    }

    fn any_equal(&mut self, items: &[Value], item: &Value) -> RuntimeResult<bool> {
        for candidate in items {
            if is_same(candidate, item) || self.values_equal(candidate, item)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn index_value(&mut self, container: &Value, key: &Value) -> RuntimeResult<i128> {
        match key.as_int() {
            Some(index) => Ok(index),
            None => {
                let message = format!(
                    "{} indices must be integers or slices, not {}",
                    container.type_name(),
                    key.type_name()
                );
                Err(self.raise("TypeError", message))
            }
        }
    }

    pub(crate) fn get_item(&mut self, container: &Value, key: &Value) -> RuntimeResult<Value> {
        match container {
            Value::List(items) => {
                let index = self.index_value(container, key)?;
                let found = {
                    let items = items.borrow();
                    normalize_index(index, items.len()).map(|i| items[i].clone())
                };
                found.ok_or_else(|| self.raise("IndexError", "list index out of range"))
            }
            Value::Tuple(items) => {
                let index = self.index_value(container, key)?;
                normalize_index(index, items.len())
                    .map(|i| items[i].clone())
                    .ok_or_else(|| self.raise("IndexError", "tuple index out of range"))
            }
            Value::Str(text) => {
                let index = self.index_value(container, key)?;
                let chars: Vec<char> = text.chars().collect();
                normalize_index(index, chars.len())
                    .map(|i| Value::str(chars[i].to_string()))
                    .ok_or_else(|| self.raise("IndexError", "string index out of range"))
            }
            Value::Range(range) => {
                let index = self.index_value(container, key)?;
                normalize_index(index, range.len())
                    .and_then(|i| range.get(i))
                    .map(Value::Int)
                    .ok_or_else(|| self.raise("IndexError", "range object index out of range"))
            }
            Value::Dict(dict) => {
                let hash = self.hash_key(key)?;
                let found = dict.borrow().get(&hash).cloned();
                found.ok_or_else(|| self.raise_with_args("KeyError", vec![key.clone()]))
            }
            Value::Instance(_) => match self.call_special(container, "__getitem__", vec![key.clone()])? {
                Some(value) => Ok(value),
                None => Err(self.not_subscriptable(container)),
            },
            Value::Class(class) if class.builtin => Ok(container.clone()),
            _ => Err(self.not_subscriptable(container)),
        }
    }

    fn not_subscriptable(&mut self, container: &Value) -> Signal {
        let message = format!("'{}' object is not subscriptable", container.type_name());
        self.raise("TypeError", message)
    }

    pub(crate) fn set_item(&mut self, container: &Value, key: Value, value: Value) -> RuntimeResult<()> {
        match container {
            Value::List(items) => {
                let index = self.index_value(container, &key)?;
                let len = items.borrow().len();
                match normalize_index(index, len) {
                    Some(i) => {
                        items.borrow_mut()[i] = value;
                        Ok(())
                    }
                    None => Err(self.raise("IndexError", "list assignment index out of range")),
                }
            }
            Value::Dict(dict) => {
                let hash = self.hash_key(&key)?;
                dict.borrow_mut().insert(hash, key, value);
                Ok(())
            }
            Value::Instance(_) => match self.call_special(container, "__setitem__", vec![key, value])? {
                Some(_) => Ok(()),
                None => Err(self.no_item_assignment(container)),
            },
            _ => Err(self.no_item_assignment(container)),
        }
    }

    fn no_item_assignment(&mut self, container: &Value) -> Signal {
        let message = format!(
            "'{}' object does not support item assignment",
            container.type_name()
        );
        self.raise("TypeError", message)
    }

    pub(crate) fn delete_item(&mut self, container: &Value, key: &Value) -> RuntimeResult<()> {
        match container {
            Value::List(items) => {
                let index = self.index_value(container, key)?;
                let len = items.borrow().len();
                match normalize_index(index, len) {
                    Some(i) => {
                        items.borrow_mut().remove(i);
                        Ok(())
                    }
                    None => Err(self.raise("IndexError", "list assignment index out of range")),
                }
            }
            Value::Dict(dict) => {
                let hash = self.hash_key(key)?;
                let removed = dict.borrow_mut().remove(&hash);
                match removed {
                    Some(_) => Ok(()),
                    None => Err(self.raise_with_args("KeyError", vec![key.clone()])),
                }
            }
            Value::Instance(_) => match self.call_special(container, "__delitem__", vec![key.clone()])? {
                Some(_) => Ok(()),
                None => Err(self.no_item_deletion(container)),
            },
            _ => Err(self.no_item_deletion(container)),
        }
    }

    fn no_item_deletion(&mut self, container: &Value) -> Signal {
        let message = format!(
            "'{}' object doesn't support item deletion",
            container.type_name()
        );
        self.raise("TypeError", message)
    }

    /// Positions selected by `[lower:upper:step]` over a sequence of `len`.
    fn slice_indices(
        &mut self,
        len: usize,
        lower: Option<Value>,
        upper: Option<Value>,
        step: Option<Value>,
    ) -> RuntimeResult<Vec<usize>> {
        let bound = |vm: &mut Self, value: Option<Value>| -> RuntimeResult<Option<i128>> {
            match value {
                None => Ok(None),
                Some(value) => match value.as_int() {
                    Some(v) => Ok(Some(v)),
                    None => Err(vm.raise(
                        "TypeError",
                        "slice indices must be integers or None or have an __index__ method",
                    )),
                },
            }
        };
        let step = bound(self, step)?.unwrap_or(1);
        if step == 0 {
            return Err(self.raise("ValueError", "slice step cannot be zero"));
        }
        let lower = bound(self, lower)?;
        let upper = bound(self, upper)?;
        let len = len as i128;
        let clamp = |value: i128, low: i128, high: i128| {
            let value = if value < 0 { value + len } else { value };
            value.clamp(low, high)
        };
        let mut out = Vec::new();
        if step > 0 {
            let start = lower.map(|v| clamp(v, 0, len)).unwrap_or(0);
            let stop = upper.map(|v| clamp(v, 0, len)).unwrap_or(len);
            let mut i = start;
            while i < stop {
                out.push(i as usize);
                i += step;
            }
        } else {
            let start = lower.map(|v| clamp(v, -1, len - 1)).unwrap_or(len - 1);
            let stop = upper.map(|v| clamp(v, -1, len - 1)).unwrap_or(-1);
            let mut i = start;
            while i > stop {
                out.push(i as usize);
                i += step;
            }
        }
        Ok(out)
    }

    pub(crate) fn get_slice(
        &mut self,
        container: &Value,
        lower: Option<Value>,
        upper: Option<Value>,
        step: Option<Value>,
    ) -> RuntimeResult<Value> {
        match container {
            Value::List(items) => {
                let items = items.borrow().clone();
                let picked = self.slice_indices(items.len(), lower, upper, step)?;
                Ok(Value::list(picked.into_iter().map(|i| items[i].clone()).collect()))
            }
            Value::Tuple(items) => {
                let picked = self.slice_indices(items.len(), lower, upper, step)?;
                Ok(Value::tuple(picked.into_iter().map(|i| items[i].clone()).collect()))
            }
            Value::Str(text) => {
                let chars: Vec<char> = text.chars().collect();
                let picked = self.slice_indices(chars.len(), lower, upper, step)?;
                Ok(Value::str(picked.into_iter().map(|i| chars[i]).collect::<String>()))
            }
            Value::Range(range) => {
                let step_value = step.as_ref().and_then(Value::as_int).unwrap_or(1);
                let picked = self.slice_indices(range.len(), lower, upper, step)?;
                let new_step = range.step * step_value;
                let start = picked
                    .first()
                    .and_then(|i| range.get(*i))
                    .unwrap_or(range.start);
                let stop = picked
                    .last()
                    .and_then(|i| range.get(*i))
                    .map(|last| last + new_step)
                    .unwrap_or(start);
                Ok(Value::Range(RangeValue {
                    start,
                    stop,
                    step: new_step,
                }))
            }
            Value::Instance(_) => {
                let slice = Value::tuple(vec![
                    lower.unwrap_or(Value::None),
                    upper.unwrap_or(Value::None),
                    step.unwrap_or(Value::None),
                ]);
                match self.call_special(container, "__getitem__", vec![slice])? {
                    Some(value) => Ok(value),
                    None => Err(self.not_subscriptable(container)),
                }
            }
            _ => Err(self.not_subscriptable(container)),
        }
    }

    pub(crate) fn set_slice(
        &mut self,
        container: &Value,
        lower: Option<Value>,
        upper: Option<Value>,
        step: Option<Value>,
        value: Value,
    ) -> RuntimeResult<()> {
        let Value::List(items) = container else {
            return Err(self.no_item_assignment(container));
        };
        let replacement = self.collect(&value)?;
        let extended = step.as_ref().and_then(Value::as_int).unwrap_or(1) != 1;
        let len = items.borrow().len();
        let lower_bound = lower.clone();
        let picked = self.slice_indices(len, lower, upper, step)?;
        if extended {
            if picked.len() != replacement.len() {
                let message = format!(
                    "attempt to assign sequence of size {} to extended slice of size {}",
                    replacement.len(),
                    picked.len()
                );
                return Err(self.raise("ValueError", message));
            }
            let mut items = items.borrow_mut();
            for (index, item) in picked.into_iter().zip(replacement) {
                items[index] = item;
            }
            return Ok(());
        }
        let start = match picked.first() {
            Some(first) => *first,
            None => {
                let lower = lower_bound.and_then(|v| v.as_int()).unwrap_or(0);
                let lower = if lower < 0 { lower + len as i128 } else { lower };
                lower.clamp(0, len as i128) as usize
            }
        };
        let end = start + picked.len();
        items.borrow_mut().splice(start..end, replacement);
        Ok(())
    }

    pub(crate) fn delete_slice(
        &mut self,
        container: &Value,
        lower: Option<Value>,
        upper: Option<Value>,
        step: Option<Value>,
    ) -> RuntimeResult<()> {
        let Value::List(items) = container else {
            return Err(self.no_item_deletion(container));
        };
        let len = items.borrow().len();
        let mut picked = self.slice_indices(len, lower, upper, step)?;
        picked.sort_unstable();
        let mut items = items.borrow_mut();
        for index in picked.into_iter().rev() {
            items.remove(index);
        }
        Ok(())
    }

    /// Produces an iterator value over anything iterable.
    pub(crate) fn make_iter(&mut self, value: &Value) -> RuntimeResult<Value> {
        let state = match value {
            Value::Iterator(_) => return Ok(value.clone()),
            Value::List(list) => IterState::List {
                list: list.clone(),
                index: 0,
            },
            Value::Tuple(items) => IterState::items(items.as_ref().clone()),
            Value::Str(text) => {
                IterState::items(text.chars().map(|c| Value::str(c.to_string())).collect())
            }
            Value::Dict(dict) => IterState::items(dict.borrow().keys()),
            Value::Set(set) => IterState::items(set.borrow().values()),
            Value::Range(range) => IterState::Range {
                next: range.start,
                stop: range.stop,
                step: range.step,
            },
            Value::Instance(_) => {
                if let Some(result) = self.call_special(value, "__iter__", Vec::new())? {
                    return match result {
                        Value::Iterator(_) => Ok(result),
                        Value::Instance(_) => Ok(Value::iterator(IterState::Object(result))),
                        other => self.make_iter(&other),
                    };
                }
                if self.special_method(value, "__getitem__").is_some() {
                    let mut items = Vec::new();
                    let mut index = 0;
                    loop {
                        match self.get_item(value, &Value::Int(index)) {
                            Ok(item) => items.push(item),
                            Err(Signal::Raise(exception))
                                if exception.is_instance_of("IndexError")
                                    || exception.is_instance_of("StopIteration") =>
                            {
                                break
                            }
                            Err(other) => return Err(other),
                        }
                        index += 1;
                    }
                    IterState::items(items)
                } else {
                    return Err(self.not_iterable(value));
                }
            }
            other => return Err(self.not_iterable(other)),
        };
        Ok(Value::iterator(state))
    }

    fn not_iterable(&mut self, value: &Value) -> Signal {
        let message = format!("'{}' object is not iterable", value.type_name());
        self.raise("TypeError", message)
    }

    /// Advances an iterator value. `None` once exhausted.
    pub(crate) fn next_value(&mut self, iterator: &Value) -> RuntimeResult<Option<Value>> {
        let Value::Iterator(state) = iterator else {
            let message = format!("'{}' object is not an iterator", iterator.type_name());
            return Err(self.raise("TypeError", message));
        };
        let object = {
            let mut state = state.borrow_mut();
            match &mut *state {
                IterState::Items { items, index } => {
                    let item = items.get(*index).cloned();
                    if item.is_some() {
                        *index += 1;
                    }
                    return Ok(item);
                }
                IterState::List { list, index } => {
                    let item = list.borrow().get(*index).cloned();
                    if item.is_some() {
                        *index += 1;
                    }
                    return Ok(item);
                }
                IterState::Range { next, stop, step } => {
                    let more = if *step > 0 { *next < *stop } else { *next > *stop };
                    if !more {
                        return Ok(None);
                    }
                    let current = *next;
                    *next += *step;
                    return Ok(Some(Value::Int(current)));
                }
                IterState::Object(object) => object.clone(),
            }
        };
        match self.call_special(&object, "__next__", Vec::new()) {
            Ok(Some(value)) => Ok(Some(value)),
            Ok(None) => Err(self.not_iterable(&object)),
            Err(Signal::Raise(exception)) if exception.is_instance_of("StopIteration") => Ok(None),
            Err(other) => Err(other),
        }
    }

    /// Drains any iterable into a vector.
    pub(crate) fn collect(&mut self, value: &Value) -> RuntimeResult<Vec<Value>> {
        match value {
            Value::List(items) => Ok(items.borrow().clone()),
            Value::Tuple(items) => Ok(items.as_ref().clone()),
            _ => {
                let iterator = self.make_iter(value)?;
                let mut items = Vec::new();
                while let Some(item) = self.next_value(&iterator)? {
                    self.check_cancelled()?;
                    items.push(item);
                }
                Ok(items)
            }
        }
    }

    /// Builds a dict from key/value pairs or another mapping.
    pub(crate) fn dict_from(&mut self, source: &Value) -> RuntimeResult<Dict> {
        if let Value::Dict(dict) = source {
            return Ok(dict.borrow().clone());
        }
        let mut dict = Dict::new();
        for pair in self.collect(source)? {
            let items = self.collect(&pair)?;
            let [key, value]: [Value; 2] = match items.try_into() {
                Ok(pair) => pair,
                Err(items) => {
                    let message = format!(
                        "dictionary update sequence element has length {}; 2 is required",
                        items.len()
                    );
                    return Err(self.raise("ValueError", message));
                }
            };
            let hash = self.hash_key(&key)?;
            dict.insert(hash, key, value);
        }
        Ok(dict)
    }

    pub(crate) fn call_with(&mut self, callee: &Value, args: Vec<Value>) -> RuntimeResult<Value> {
        self.call_value(callee.clone(), Args::new(args))
    }
}

fn repeat_items(items: &[Value], count: usize) -> Vec<Value> {
    let mut out = Vec::with_capacity(items.len() * count);
    for _ in 0..count {
        out.extend(items.iter().cloned());
    }
    out
}

/// `is` semantics: identity for reference values, equality for immediates.
pub(crate) fn is_same(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::None, Value::None) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
        (Value::Range(a), Value::Range(b)) => a == b,
        (Value::Str(a), Value::Str(b)) => Rc::ptr_eq(a, b) || a == b,
        (Value::Builtin(a), Value::Builtin(b)) => a.name == b.name,
        (a, b) => match (a.identity(), b.identity()) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ExecutionConfig;

    fn vm() -> Interpreter {
        Interpreter::new(ExecutionConfig::default())
    }

    fn error_detail(vm: &mut Interpreter, result: RuntimeResult<Value>) -> String {
        match result {
            Err(Signal::Raise(exception)) => vm.exception_detail(&exception),
            other => panic!("expected an exception, got {other:?}"),
        }
    }

    #[test]
    fn floor_division_and_modulo_round_towards_negative_infinity() {
        let mut vm = vm();
        let q = vm.binary_op(BinaryOp::FloorDiv, Value::Int(-7), Value::Int(2)).unwrap();
        let r = vm.binary_op(BinaryOp::Mod, Value::Int(-7), Value::Int(2)).unwrap();
        assert!(matches!(q, Value::Int(-4)));
        assert!(matches!(r, Value::Int(1)));
    }

    #[test]
    fn division_by_zero_messages() {
        let mut vm = vm();
        let result = vm.binary_op(BinaryOp::Div, Value::Int(1), Value::Int(0));
        assert_eq!(error_detail(&mut vm, result), "ZeroDivisionError: division by zero");
        let result = vm.binary_op(BinaryOp::Mod, Value::Int(1), Value::Int(0));
        assert_eq!(error_detail(&mut vm, result), "ZeroDivisionError: integer modulo by zero");
    }

    #[test]
    fn overflow_is_reported() {
        let mut vm = vm();
        let result = vm.binary_op(BinaryOp::Pow, Value::Int(10), Value::Int(100));
        assert_eq!(error_detail(&mut vm, result), "OverflowError: integer overflow");
    }

    #[test]
    fn repetition_counts_are_checked() {
        let mut vm = vm();
        let result = vm.binary_op(BinaryOp::Mul, Value::str("ab"), Value::Int(1 << 64));
        assert_eq!(
            error_detail(&mut vm, result),
            "OverflowError: cannot fit 'int' into an index-sized integer"
        );
        let result = vm.binary_op(
            BinaryOp::Mul,
            Value::list(vec![Value::Int(1)]),
            Value::Int(1 << 40),
        );
        assert_eq!(error_detail(&mut vm, result), "MemoryError");
        let empty = vm.binary_op(BinaryOp::Mul, Value::Int(-3), Value::str("ab")).unwrap();
        assert!(matches!(empty, Value::Str(s) if s.is_empty()));
        let doubled = vm.binary_op(BinaryOp::Mul, Value::str("ab"), Value::Int(2)).unwrap();
        assert!(matches!(doubled, Value::Str(s) if &*s == "abab"));
    }

    #[test]
    fn mixed_numbers_compare_by_value() {
        let mut vm = vm();
        assert!(vm.values_equal(&Value::Int(1), &Value::Float(1.0)).unwrap());
        assert!(vm.values_equal(&Value::Bool(true), &Value::Int(1)).unwrap());
        assert!(vm.less_than(&Value::Int(1), &Value::Float(1.5)).unwrap());
    }

    #[test]
    fn negative_step_slices() {
        let mut vm = vm();
        let list = Value::list((0..5).map(Value::Int).collect());
        let reversed = vm.get_slice(&list, None, None, Some(Value::Int(-1))).unwrap();
        assert_eq!(vm.repr(&reversed).unwrap(), "[4, 3, 2, 1, 0]");
        let middle = vm
            .get_slice(&list, Some(Value::Int(1)), Some(Value::Int(-1)), None)
            .unwrap();
        assert_eq!(vm.repr(&middle).unwrap(), "[1, 2, 3]");
    }

    #[test]
    fn unhashable_keys_are_rejected() {
        let mut vm = vm();
        let dict = Value::dict(Dict::new());
        let result = vm
            .set_item(&dict, Value::list(Vec::new()), Value::None)
            .map(|_| Value::None);
        assert_eq!(error_detail(&mut vm, result), "TypeError: unhashable type: 'list'");
    }
}

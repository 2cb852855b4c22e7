//! Canonical string conversions and the format-spec mini-language.

use super::{BuiltinKind, Interpreter, RuntimeResult, Value};

/// Shortest round-trip rendering of a float, `1.0` style for integral
/// values and `1e+16` style outside `[1e-4, 1e16)`.
pub fn format_float(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let magnitude = value.abs();
    if magnitude != 0.0 && !(1e-4..1e16).contains(&magnitude) {
        return python_exponent(&format!("{value:e}"));
    }
    let text = value.to_string();
    if text.contains('.') {
        text
    } else {
        format!("{text}.0")
    }
}

/// Rewrites Rust's `1.5e-7` exponent suffix as `1.5e-07`.
fn python_exponent(text: &str) -> String {
    let Some((mantissa, exponent)) = text.split_once('e') else {
        return text.to_string();
    };
    let (sign, digits) = match exponent.strip_prefix('-') {
        Some(digits) => ('-', digits),
        None => ('+', exponent.trim_start_matches('+')),
    };
    format!("{mantissa}e{sign}{digits:0>2}")
}

pub(crate) fn repr_str(text: &str) -> String {
    let quote = if text.contains('\'') && !text.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(text.len() + 2);
    out.push(quote);
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

impl Interpreter {
    pub fn repr(&mut self, value: &Value) -> RuntimeResult<String> {
        Ok(match value {
            Value::None => "None".to_string(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Int(v) => v.to_string(),
            Value::Float(v) => format_float(*v),
            Value::Str(s) => repr_str(s),
            Value::Tuple(items) => {
                let parts = self.repr_all(items)?;
                if parts.len() == 1 {
                    format!("({},)", parts[0])
                } else {
                    format!("({})", parts.join(", "))
                }
            }
            Value::List(items) => {
                let Some(key) = self.enter_repr(value) else {
                    return Ok("[...]".to_string());
                };
                let items = items.borrow().clone();
                let parts = self.repr_all(&items);
                self.leave_repr(key);
                format!("[{}]", parts?.join(", "))
            }
            Value::Dict(dict) => {
                let Some(key) = self.enter_repr(value) else {
                    return Ok("{...}".to_string());
                };
                let entries: Vec<(Value, Value)> = dict
                    .borrow()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                let parts = self.repr_pairs(&entries);
                self.leave_repr(key);
                format!("{{{}}}", parts?.join(", "))
            }
            Value::Set(set) => {
                let items = set.borrow().values();
                if items.is_empty() {
                    return Ok("set()".to_string());
                }
                let Some(key) = self.enter_repr(value) else {
                    return Ok("{...}".to_string());
                };
                let parts = self.repr_all(&items);
                self.leave_repr(key);
                format!("{{{}}}", parts?.join(", "))
            }
            Value::Range(range) => {
                if range.step == 1 {
                    format!("range({}, {})", range.start, range.stop)
                } else {
                    format!("range({}, {}, {})", range.start, range.stop, range.step)
                }
            }
            Value::Function(function) => format!("<function {}>", function.name),
            Value::Builtin(builtin) => match builtin.kind {
                BuiltinKind::Type => format!("<class '{}'>", builtin.name),
                BuiltinKind::Function => format!("<built-in function {}>", builtin.name),
            },
            Value::BoundMethod(method) => {
                let name = match &method.function {
                    Value::Function(function) => function.name.to_string(),
                    Value::Builtin(builtin) => builtin.name.to_string(),
                    other => other.type_name(),
                };
                format!("<bound method {}.{}>", method.receiver.type_name(), name)
            }
            Value::NativeMethod(method) => format!(
                "<built-in method {} of {} object>",
                method.name,
                method.receiver.type_name()
            ),
            Value::Class(class) => format!("<class '{}'>", class.name),
            Value::Instance(instance) => {
                if let Some(result) = self.call_special(value, "__repr__", Vec::new())? {
                    return self.expect_string(result, "__repr__");
                }
                if instance.class.is_subclass_named("BaseException") {
                    let args = self.exception_args(value);
                    let parts = self.repr_all(&args)?;
                    return Ok(format!("{}({})", instance.class.name, parts.join(", ")));
                }
                format!("<{} object>", instance.class.name)
            }
            Value::Iterator(_) => "<iterator object>".to_string(),
            Value::Module(module) => format!("<module '{}'>", module.name),
            Value::Super(proxy) => format!("<super: <class '{}'>>", proxy.class.name),
        })
    }

    pub fn str(&mut self, value: &Value) -> RuntimeResult<String> {
        match value {
            Value::Str(s) => Ok(s.to_string()),
            Value::Instance(instance) => {
                if let Some(result) = self.call_special(value, "__str__", Vec::new())? {
                    return self.expect_string(result, "__str__");
                }
                if instance.class.is_subclass_named("BaseException") {
                    return self.exception_message(value);
                }
                self.repr(value)
            }
            other => self.repr(other),
        }
    }

    fn expect_string(&mut self, result: Value, method: &str) -> RuntimeResult<String> {
        match result {
            Value::Str(s) => Ok(s.to_string()),
            other => {
                let message = format!(
                    "{method} returned non-string (type {})",
                    other.type_name()
                );
                Err(self.raise("TypeError", message))
            }
        }
    }

    fn repr_all(&mut self, items: &[Value]) -> RuntimeResult<Vec<String>> {
        items.iter().map(|item| self.repr(item)).collect()
    }

    fn repr_pairs(&mut self, entries: &[(Value, Value)]) -> RuntimeResult<Vec<String>> {
        let mut parts = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            parts.push(format!("{}: {}", self.repr(key)?, self.repr(value)?));
        }
        Ok(parts)
    }

    /// Marks a container as being printed; `None` when it already is.
    fn enter_repr(&mut self, value: &Value) -> Option<usize> {
        let key = value.identity()?;
        if self.repr_guard.contains(&key) {
            return None;
        }
        self.repr_guard.push(key);
        Some(key)
    }

    fn leave_repr(&mut self, key: usize) {
        if let Some(index) = self.repr_guard.iter().rposition(|k| *k == key) {
            self.repr_guard.remove(index);
        }
    }

    /// `format(value, spec)`, shared by f-strings and `str.format`.
    pub(crate) fn format_with_spec(&mut self, value: &Value, spec: &str) -> RuntimeResult<String> {
        if let Some(result) = self.call_special(value, "__format__", vec![Value::str(spec)])? {
            return self.expect_string(result, "__format__");
        }
        if spec.is_empty() {
            return self.str(value);
        }
        let Some(parsed) = FormatSpec::parse(spec) else {
            return Err(self.raise("ValueError", "Invalid format specifier"));
        };
        match value {
            Value::Int(_) | Value::Bool(_) if parsed.kind.map_or(true, |k| k != 's') => {
                let v = value.as_int().unwrap_or_default();
                match parsed.kind {
                    Some('f' | 'F' | 'e' | 'E' | 'g' | 'G' | '%') => Ok(parsed.render_float(v as f64)),
                    Some('c') => match u32::try_from(v).ok().and_then(char::from_u32) {
                        Some(c) => Ok(parsed.pad(c.to_string(), false)),
                        None => Err(self.raise("OverflowError", "%c arg not in range(0x110000)")),
                    },
                    None | Some('d' | 'n' | 'x' | 'X' | 'o' | 'b') => Ok(parsed.render_int(v)),
                    Some(kind) => Err(self.unknown_format(kind, value)),
                }
            }
            Value::Float(v) => match parsed.kind {
                None | Some('f' | 'F' | 'e' | 'E' | 'g' | 'G' | '%' | 'n') => Ok(parsed.render_float(*v)),
                Some(kind) => Err(self.unknown_format(kind, value)),
            },
            _ => match parsed.kind {
                None | Some('s') => {
                    if matches!(value, Value::Str(_)) || parsed.is_plain() {
                        let mut text = self.str(value)?;
                        if let Some(precision) = parsed.precision {
                            text = text.chars().take(precision).collect();
                        }
                        Ok(parsed.pad(text, false))
                    } else {
                        let message = format!(
                            "unsupported format string passed to {}.__format__",
                            value.type_name()
                        );
                        Err(self.raise("TypeError", message))
                    }
                }
                Some(kind) => Err(self.unknown_format(kind, value)),
            },
        }
    }

    fn unknown_format(&mut self, kind: char, value: &Value) -> super::Signal {
        let message = format!(
            "Unknown format code '{kind}' for object of type '{}'",
            value.type_name()
        );
        self.raise("ValueError", message)
    }

    /// printf-style `text % args`.
    pub(crate) fn percent_format(&mut self, format: &str, args: &Value) -> RuntimeResult<String> {
        let mapping = matches!(args, Value::Dict(_));
        let values: Vec<Value> = match args {
            Value::Tuple(items) => items.as_ref().clone(),
            other => vec![other.clone()],
        };
        let mut next = 0;
        let mut out = String::with_capacity(format.len());
        let mut chars = format.chars().peekable();
        while let Some(ch) = chars.next() {
            if ch != '%' {
                out.push(ch);
                continue;
            }
            let mut key = None;
            if chars.peek() == Some(&'(') {
                chars.next();
                let mut name = String::new();
                for c in chars.by_ref() {
                    if c == ')' {
                        break;
                    }
                    name.push(c);
                }
                key = Some(name);
            }
            let mut spec = FormatSpec::default();
            while let Some(&flag) = chars.peek() {
                match flag {
                    '-' => spec.align = Some('<'),
                    '+' => spec.sign = Some('+'),
                    ' ' => spec.sign = Some(' '),
                    '#' => spec.alternate = true,
                    '0' => spec.zero = true,
                    _ => break,
                }
                chars.next();
            }
            spec.width = take_number(&mut chars).unwrap_or(0);
            if chars.peek() == Some(&'.') {
                chars.next();
                spec.precision = Some(take_number(&mut chars).unwrap_or(0));
            }
            if spec.zero && spec.align.is_none() {
                spec.fill = '0';
                spec.align = Some('=');
            }
            let Some(conversion) = chars.next() else {
                return Err(self.raise("ValueError", "incomplete format"));
            };
            if conversion == '%' {
                out.push('%');
                continue;
            }
            let value = match (&key, args) {
                (Some(name), Value::Dict(dict)) => {
                    let hash = self.hash_key(&Value::str(name.as_str()))?;
                    let found = dict.borrow().get(&hash).cloned();
                    match found {
                        Some(value) => value,
                        None => return Err(self.raise_with_args("KeyError", vec![Value::str(name.as_str())])),
                    }
                }
                (Some(_), _) => {
                    return Err(self.raise("TypeError", "format requires a mapping"));
                }
                (None, _) => {
                    let Some(value) = values.get(next).cloned() else {
                        return Err(self.raise("TypeError", "not enough arguments for format string"));
                    };
                    next += 1;
                    value
                }
            };
            let rendered = match conversion {
                's' => {
                    let mut text = self.str(&value)?;
                    if let Some(precision) = spec.precision {
                        text = text.chars().take(precision).collect();
                    }
                    spec.pad(text, false)
                }
                'r' | 'a' => {
                    let text = self.repr(&value)?;
                    spec.pad(text, false)
                }
                'd' | 'i' | 'u' | 'x' | 'X' | 'o' => {
                    let number = match &value {
                        Value::Float(v) => Some(v.trunc() as i128),
                        other => other.as_int(),
                    };
                    let Some(number) = number else {
                        let message = format!(
                            "%{conversion} format: a real number is required, not {}",
                            value.type_name()
                        );
                        return Err(self.raise("TypeError", message));
                    };
                    spec.kind = Some(match conversion {
                        'x' | 'X' | 'o' => conversion,
                        _ => 'd',
                    });
                    spec.render_int(number)
                }
                'f' | 'F' | 'e' | 'E' | 'g' | 'G' => {
                    let Some(number) = value.as_float() else {
                        let message = format!(
                            "must be real number, not {}",
                            value.type_name()
                        );
                        return Err(self.raise("TypeError", message));
                    };
                    spec.kind = Some(conversion);
                    spec.render_float(number)
                }
                'c' => {
                    let text = match &value {
                        Value::Str(s) if s.chars().count() == 1 => s.to_string(),
                        other => match other.as_int().and_then(|v| u32::try_from(v).ok()).and_then(char::from_u32) {
                            Some(c) => c.to_string(),
                            None => return Err(self.raise("TypeError", "%c requires int or char")),
                        },
                    };
                    spec.pad(text, false)
                }
                other => {
                    let message = format!("unsupported format character '{other}'");
                    return Err(self.raise("ValueError", message));
                }
            };
            out.push_str(&rendered);
        }
        if !mapping && next < values.len() {
            return Err(self.raise(
                "TypeError",
                "not all arguments converted during string formatting",
            ));
        }
        Ok(out)
    }
}

fn take_number(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Option<usize> {
    let mut digits = String::new();
    while let Some(&c) = chars.peek() {
        if !c.is_ascii_digit() {
            break;
        }
        digits.push(c);
        chars.next();
    }
    digits.parse().ok()
}

/// `[[fill]align][sign][#][0][width][,|_][.precision][type]`
#[derive(Debug, Clone, PartialEq)]
struct FormatSpec {
    fill: char,
    align: Option<char>,
    sign: Option<char>,
    alternate: bool,
    zero: bool,
    width: usize,
    grouping: Option<char>,
    precision: Option<usize>,
    kind: Option<char>,
}

impl Default for FormatSpec {
    fn default() -> Self {
        Self {
            fill: ' ',
            align: None,
            sign: None,
            alternate: false,
            zero: false,
            width: 0,
            grouping: None,
            precision: None,
            kind: None,
        }
    }
}

impl FormatSpec {
    fn parse(spec: &str) -> Option<Self> {
        let chars: Vec<char> = spec.chars().collect();
        let mut out = FormatSpec::default();
        let mut i = 0;
        let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');
        if chars.len() >= 2 && is_align(chars[1]) {
            out.fill = chars[0];
            out.align = Some(chars[1]);
            i = 2;
        } else if !chars.is_empty() && is_align(chars[0]) {
            out.align = Some(chars[0]);
            i = 1;
        }
        if let Some(&c) = chars.get(i) {
            if matches!(c, '+' | '-' | ' ') {
                out.sign = Some(c);
                i += 1;
            }
        }
        if chars.get(i) == Some(&'#') {
            out.alternate = true;
            i += 1;
        }
        if chars.get(i) == Some(&'0') {
            out.zero = true;
            if out.align.is_none() {
                out.fill = '0';
                out.align = Some('=');
            }
            i += 1;
        }
        let start = i;
        while chars.get(i).is_some_and(|c| c.is_ascii_digit()) {
            i += 1;
        }
        if i > start {
            out.width = chars[start..i].iter().collect::<String>().parse().ok()?;
        }
        if let Some(&c) = chars.get(i) {
            if c == ',' || c == '_' {
                out.grouping = Some(c);
                i += 1;
            }
        }
        if chars.get(i) == Some(&'.') {
            i += 1;
            let start = i;
            while chars.get(i).is_some_and(|c| c.is_ascii_digit()) {
                i += 1;
            }
            if i == start {
                return None;
            }
            out.precision = chars[start..i].iter().collect::<String>().parse().ok();
        }
        if let Some(&c) = chars.get(i) {
            if !"bcdeEfFgGnosxX%".contains(c) {
                return None;
            }
            out.kind = Some(c);
            i += 1;
        }
        (i == chars.len()).then_some(out)
    }

    /// Only alignment and width: valid for any value's string form.
    fn is_plain(&self) -> bool {
        self.sign.is_none() && !self.alternate && self.grouping.is_none() && self.precision.is_none()
    }

    fn sign_for(&self, negative: bool) -> &'static str {
        match (negative, self.sign) {
            (true, _) => "-",
            (false, Some('+')) => "+",
            (false, Some(' ')) => " ",
            _ => "",
        }
    }

    fn render_int(&self, value: i128) -> String {
        let magnitude = value.unsigned_abs();
        let (digits, prefix) = match self.kind {
            Some('x') => (format!("{magnitude:x}"), "0x"),
            Some('X') => (format!("{magnitude:X}"), "0X"),
            Some('o') => (format!("{magnitude:o}"), "0o"),
            Some('b') => (format!("{magnitude:b}"), "0b"),
            _ => (magnitude.to_string(), ""),
        };
        let digits = match self.grouping {
            Some(separator) => group_digits(&digits, separator),
            None => digits,
        };
        let prefix = if self.alternate { prefix } else { "" };
        let sign = format!("{}{prefix}", self.sign_for(value < 0));
        self.pad_number(sign, digits)
    }

    fn render_float(&self, value: f64) -> String {
        let negative = value.is_sign_negative();
        let magnitude = value.abs();
        let body = if magnitude.is_nan() {
            "nan".to_string()
        } else if magnitude.is_infinite() {
            "inf".to_string()
        } else {
            match self.kind {
                Some('f' | 'F') => format!("{:.*}", self.precision.unwrap_or(6), magnitude),
                Some('e' | 'E') => python_exponent(&format!("{:.*e}", self.precision.unwrap_or(6), magnitude)),
                Some('%') => format!("{:.*}%", self.precision.unwrap_or(6), magnitude * 100.0),
                Some('g' | 'G' | 'n') => general(magnitude, self.precision.unwrap_or(6), self.alternate),
                _ => match self.precision {
                    Some(precision) => general(magnitude, precision, self.alternate),
                    None => format_float(magnitude),
                },
            }
        };
        let body = if matches!(self.kind, Some('E' | 'F' | 'G')) {
            body.to_uppercase()
        } else {
            body
        };
        let body = match self.grouping {
            Some(separator) => {
                let split = body.find(|c: char| !c.is_ascii_digit()).unwrap_or(body.len());
                format!("{}{}", group_digits(&body[..split], separator), &body[split..])
            }
            None => body,
        };
        let sign = self.sign_for(negative && !magnitude.is_nan()).to_string();
        self.pad_number(sign, body)
    }

    fn pad_number(&self, sign: String, digits: String) -> String {
        let len = sign.chars().count() + digits.chars().count();
        if len >= self.width {
            return format!("{sign}{digits}");
        }
        let padding = self.width - len;
        match self.align.unwrap_or('>') {
            '=' => format!("{sign}{}{digits}", repeat(self.fill, padding)),
            _ => self.pad(format!("{sign}{digits}"), true),
        }
    }

    fn pad(&self, text: String, numeric: bool) -> String {
        let len = text.chars().count();
        if len >= self.width {
            return text;
        }
        let padding = self.width - len;
        let default = if numeric { '>' } else { '<' };
        match self.align.unwrap_or(default) {
            '<' => format!("{text}{}", repeat(self.fill, padding)),
            '^' => {
                let left = padding / 2;
                format!(
                    "{}{text}{}",
                    repeat(self.fill, left),
                    repeat(self.fill, padding - left)
                )
            }
            _ => format!("{}{text}", repeat(self.fill, padding)),
        }
    }
}

fn repeat(fill: char, count: usize) -> String {
    std::iter::repeat(fill).take(count).collect()
}

fn group_digits(digits: &str, separator: char) -> String {
    let chars: Vec<char> = digits.chars().collect();
    let mut out = String::with_capacity(chars.len() + chars.len() / 3);
    for (index, c) in chars.iter().enumerate() {
        if index > 0 && (chars.len() - index) % 3 == 0 {
            out.push(separator);
        }
        out.push(*c);
    }
    out
}

/// `g` presentation: fixed or exponent notation depending on magnitude,
/// trailing zeros removed.
fn general(value: f64, precision: usize, alternate: bool) -> String {
    let precision = precision.max(1);
    if value == 0.0 {
        return if alternate {
            format!("{:.*}", precision - 1, 0.0)
        } else {
            "0".to_string()
        };
    }
    let scientific = format!("{:.*e}", precision - 1, value);
    let exponent: i32 = scientific
        .split_once('e')
        .and_then(|(_, e)| e.parse().ok())
        .unwrap_or(0);
    if exponent >= -4 && exponent < precision as i32 {
        let decimals = (precision as i32 - 1 - exponent).max(0) as usize;
        let fixed = format!("{:.*}", decimals, value);
        if alternate {
            fixed
        } else {
            strip_zeros(&fixed)
        }
    } else {
        let (mantissa, exp) = scientific.split_once('e').unwrap_or((&scientific, "0"));
        let mantissa = if alternate {
            mantissa.to_string()
        } else {
            strip_zeros(mantissa)
        };
        python_exponent(&format!("{mantissa}e{exp}"))
    }
}

fn strip_zeros(text: &str) -> String {
    if !text.contains('.') {
        return text.to_string();
    }
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{Dict, ExecutionConfig, HashKey};

    #[test]
    fn floats_use_shortest_form() {
        assert_eq!(format_float(1.0), "1.0");
        assert_eq!(format_float(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(format_float(1e16), "1e+16");
        assert_eq!(format_float(1.5e-7), "1.5e-07");
        assert_eq!(format_float(-2.5), "-2.5");
        assert_eq!(format_float(f64::INFINITY), "inf");
    }

    #[test]
    fn strings_pick_their_quote() {
        assert_eq!(repr_str("abc"), "'abc'");
        assert_eq!(repr_str("it's"), "\"it's\"");
        assert_eq!(repr_str("a'b\"c"), "'a\\'b\"c'");
        assert_eq!(repr_str("line\n"), "'line\\n'");
    }

    #[test]
    fn containers() {
        let mut vm = Interpreter::new(ExecutionConfig::default());
        let tuple = Value::tuple(vec![Value::Int(1)]);
        assert_eq!(vm.repr(&tuple).unwrap(), "(1,)");
        let mut dict = Dict::new();
        dict.insert(HashKey::Str("a".into()), Value::str("a"), Value::Float(2.0));
        assert_eq!(vm.repr(&Value::dict(dict)).unwrap(), "{'a': 2.0}");
        assert_eq!(vm.repr(&Value::set(Default::default())).unwrap(), "set()");
    }

    #[test]
    fn self_referencing_lists() {
        let mut vm = Interpreter::new(ExecutionConfig::default());
        let list = Value::list(vec![Value::Int(1)]);
        if let Value::List(items) = &list {
            items.borrow_mut().push(list.clone());
        }
        assert_eq!(vm.repr(&list).unwrap(), "[1, [...]]");
    }

    #[test]
    fn format_specs() {
        let mut vm = Interpreter::new(ExecutionConfig::default());
        let cases = [
            (Value::Float(3.14159), ".2f", "3.14"),
            (Value::Int(42), "05d", "00042"),
            (Value::Int(1234567), ",", "1,234,567"),
            (Value::str("ab"), ">4", "  ab"),
            (Value::str("ab"), "*^6", "**ab**"),
            (Value::Int(255), "#x", "0xff"),
            (Value::Float(0.25), ".0%", "25%"),
            (Value::Float(1234.5), "g", "1234.5"),
            (Value::Float(0.00001234), "g", "1.234e-05"),
            (Value::Int(-3), "+d", "-3"),
            (Value::Int(3), "+d", "+3"),
        ];
        for (value, spec, expected) in cases {
            assert_eq!(vm.format_with_spec(&value, spec).unwrap(), expected, "{spec}");
        }
    }

    #[test]
    fn percent_formatting() {
        let mut vm = Interpreter::new(ExecutionConfig::default());
        let args = Value::tuple(vec![Value::str("x"), Value::Int(3), Value::Float(1.5)]);
        assert_eq!(
            vm.percent_format("%s=%d (%.2f) 100%%", &args).unwrap(),
            "x=3 (1.50) 100%"
        );
        assert_eq!(vm.percent_format("%5s|%-3d|", &Value::tuple(vec![Value::str("ab"), Value::Int(7)])).unwrap(), "   ab|7  |");
    }
}

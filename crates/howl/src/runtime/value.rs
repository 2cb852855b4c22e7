use super::{Interpreter, RuntimeResult, Scope};
use crate::ast::{FunctionDef, LambdaExpr, Parameter};
use crate::source::SourceFile;
use indexmap::IndexMap;
use smol_str::SmolStr;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

pub type BuiltinFn = fn(&mut Interpreter, Args) -> RuntimeResult<Value>;

#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i128),
    Float(f64),
    Str(Rc<str>),
    Tuple(Rc<Vec<Value>>),
    List(Rc<RefCell<Vec<Value>>>),
    Dict(Rc<RefCell<Dict>>),
    Set(Rc<RefCell<Set>>),
    Range(RangeValue),
    Function(Rc<Function>),
    Builtin(Rc<Builtin>),
    BoundMethod(Rc<BoundMethod>),
    NativeMethod(Rc<NativeMethod>),
    Class(Rc<Class>),
    Instance(Rc<Instance>),
    Iterator(Rc<RefCell<IterState>>),
    Module(Rc<Module>),
    Super(Rc<SuperProxy>),
}

impl Value {
    pub fn str(text: impl Into<Rc<str>>) -> Self {
        Value::Str(text.into())
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Self {
        Value::Tuple(Rc::new(items))
    }

    pub fn dict(dict: Dict) -> Self {
        Value::Dict(Rc::new(RefCell::new(dict)))
    }

    pub fn set(set: Set) -> Self {
        Value::Set(Rc::new(RefCell::new(set)))
    }

    pub fn iterator(state: IterState) -> Self {
        Value::Iterator(Rc::new(RefCell::new(state)))
    }

    /// Name of the value's type as the language reports it.
    pub fn type_name(&self) -> String {
        match self {
            Value::Instance(instance) => instance.class.name.to_string(),
            other => other.builtin_type_name().to_string(),
        }
    }

    pub fn builtin_type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Tuple(_) => "tuple",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Set(_) => "set",
            Value::Range(_) => "range",
            Value::Function(_) => "function",
            Value::Builtin(builtin) if builtin.kind == BuiltinKind::Type => "type",
            Value::Builtin(_) => "builtin_function_or_method",
            Value::BoundMethod(_) => "method",
            Value::NativeMethod(_) => "builtin_function_or_method",
            Value::Class(_) => "type",
            Value::Instance(_) => "object",
            Value::Iterator(_) => "iterator",
            Value::Module(_) => "module",
            Value::Super(_) => "super",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Functions, methods, builtins and classes. Instances defining
    /// `__call__` are callable too.
    pub fn is_callable(&self) -> bool {
        match self {
            Value::Function(_)
            | Value::Builtin(_)
            | Value::BoundMethod(_)
            | Value::NativeMethod(_)
            | Value::Class(_) => true,
            Value::Instance(instance) => instance.class.lookup("__call__").is_some(),
            _ => false,
        }
    }

    /// Address of the shared allocation for reference values.
    pub fn identity(&self) -> Option<usize> {
        let ptr = match self {
            Value::Str(s) => Rc::as_ptr(s) as *const u8 as usize,
            Value::Tuple(t) => Rc::as_ptr(t) as usize,
            Value::List(l) => Rc::as_ptr(l) as usize,
            Value::Dict(d) => Rc::as_ptr(d) as usize,
            Value::Set(s) => Rc::as_ptr(s) as usize,
            Value::Function(f) => Rc::as_ptr(f) as usize,
            Value::Builtin(b) => Rc::as_ptr(b) as usize,
            Value::BoundMethod(m) => Rc::as_ptr(m) as usize,
            Value::NativeMethod(m) => Rc::as_ptr(m) as usize,
            Value::Class(c) => Rc::as_ptr(c) as usize,
            Value::Instance(i) => Rc::as_ptr(i) as usize,
            Value::Iterator(i) => Rc::as_ptr(i) as usize,
            Value::Module(m) => Rc::as_ptr(m) as usize,
            Value::Super(s) => Rc::as_ptr(s) as usize,
            Value::None | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Range(_) => {
                return None
            }
        };
        Some(ptr)
    }

    /// Integer view of ints and bools.
    pub fn as_int(&self) -> Option<i128> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Bool(v) => Some(*v as i128),
            _ => None,
        }
    }

    /// Numeric view of ints, bools and floats.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            other => other.as_int().map(|v| v as f64),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(v) => write!(f, "Bool({v})"),
            Value::Int(v) => write!(f, "Int({v})"),
            Value::Float(v) => write!(f, "Float({v})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::Function(func) => write!(f, "Function({})", func.name),
            Value::Builtin(builtin) => write!(f, "Builtin({})", builtin.name),
            Value::Class(class) => write!(f, "Class({})", class.name),
            Value::Instance(instance) => write!(f, "Instance({})", instance.class.name),
            Value::Module(module) => write!(f, "Module({})", module.name),
            other => write!(f, "<{}>", other.builtin_type_name()),
        }
    }
}

/// Call arguments after star-expansion.
#[derive(Debug, Default, Clone)]
pub struct Args {
    pub positional: Vec<Value>,
    pub keywords: Vec<(SmolStr, Value)>,
}

impl Args {
    pub fn new(positional: Vec<Value>) -> Self {
        Self {
            positional,
            keywords: Vec::new(),
        }
    }

    pub fn with_receiver(mut self, receiver: Value) -> Self {
        self.positional.insert(0, receiver);
        self
    }

    pub fn take_keyword(&mut self, name: &str) -> Option<Value> {
        let index = self.keywords.iter().position(|(key, _)| key == name)?;
        Some(self.keywords.remove(index).1)
    }

    pub fn len(&self) -> usize {
        self.positional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RangeValue {
    pub start: i128,
    pub stop: i128,
    pub step: i128,
}

impl RangeValue {
    pub fn len(&self) -> usize {
        let span = if self.step > 0 {
            self.stop - self.start
        } else {
            self.start - self.stop
        };
        if span <= 0 {
            0
        } else {
            let step = self.step.abs();
            ((span + step - 1) / step) as usize
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<i128> {
        (index < self.len()).then(|| self.start + self.step * index as i128)
    }

    pub fn contains(&self, value: i128) -> bool {
        let in_bounds = if self.step > 0 {
            value >= self.start && value < self.stop
        } else {
            value <= self.start && value > self.stop
        };
        in_bounds && (value - self.start) % self.step == 0
    }
}

/// Normalised dictionary/set key. Numbers that compare equal share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    None,
    Int(i128),
    Float(u64),
    Str(Rc<str>),
    Tuple(Vec<HashKey>),
    Range(i128, i128, i128),
    Identity(usize),
}

impl HashKey {
    /// Builds the key for a value; unhashable values report their type name.
    pub fn from_value(value: &Value) -> Result<HashKey, String> {
        Ok(match value {
            Value::None => HashKey::None,
            Value::Bool(v) => HashKey::Int(*v as i128),
            Value::Int(v) => HashKey::Int(*v),
            Value::Float(v) => {
                if v.fract() == 0.0 && v.is_finite() && v.abs() < 1e30 {
                    HashKey::Int(*v as i128)
                } else {
                    HashKey::Float(v.to_bits())
                }
            }
            Value::Str(s) => HashKey::Str(s.clone()),
            Value::Tuple(items) => HashKey::Tuple(
                items
                    .iter()
                    .map(HashKey::from_value)
                    .collect::<Result<_, _>>()?,
            ),
            Value::Range(r) => HashKey::Range(r.start, r.stop, r.step),
            Value::List(_) | Value::Dict(_) | Value::Set(_) => {
                return Err(value.builtin_type_name().to_string())
            }
            other => HashKey::Identity(other.identity().unwrap_or_default()),
        })
    }
}

#[derive(Debug, Default, Clone)]
pub struct Dict {
    entries: IndexMap<HashKey, (Value, Value)>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &HashKey) -> Option<&Value> {
        self.entries.get(key).map(|(_, value)| value)
    }

    pub fn contains(&self, key: &HashKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Inserts or overwrites; the original key object and position are kept
    /// on overwrite.
    pub fn insert(&mut self, hash: HashKey, key: Value, value: Value) {
        if let Some(entry) = self.entries.get_mut(&hash) {
            entry.1 = value;
        } else {
            self.entries.insert(hash, (key, value));
        }
    }

    pub fn remove(&mut self, key: &HashKey) -> Option<(Value, Value)> {
        self.entries.shift_remove(key)
    }

    pub fn pop_last(&mut self) -> Option<(Value, Value)> {
        self.entries.pop().map(|(_, entry)| entry)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.values().map(|(k, v)| (k, v))
    }

    pub fn keys(&self) -> Vec<Value> {
        self.entries.values().map(|(k, _)| k.clone()).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.entries.values().map(|(_, v)| v.clone()).collect()
    }

    pub fn items(&self) -> Vec<Value> {
        self.entries
            .values()
            .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
            .collect()
    }
}

#[derive(Debug, Default, Clone)]
pub struct Set {
    entries: IndexMap<HashKey, Value>,
}

impl Set {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &HashKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn insert(&mut self, key: HashKey, value: Value) {
        self.entries.entry(key).or_insert(value);
    }

    pub fn remove(&mut self, key: &HashKey) -> Option<Value> {
        self.entries.shift_remove(key)
    }

    pub fn pop_first(&mut self) -> Option<Value> {
        self.entries.shift_remove_index(0).map(|(_, value)| value)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&HashKey, &Value)> {
        self.entries.iter()
    }

    pub fn values(&self) -> Vec<Value> {
        self.entries.values().cloned().collect()
    }
}

#[derive(Debug, Clone)]
pub enum FunctionBody {
    Def(Rc<FunctionDef>),
    Lambda(Rc<LambdaExpr>),
}

/// A user-defined function or lambda together with the scopes it closes over.
#[derive(Debug)]
pub struct Function {
    pub name: SmolStr,
    pub params: Vec<Parameter>,
    pub defaults: Vec<Option<Value>>,
    pub body: FunctionBody,
    pub globals: Scope,
    pub enclosing: Vec<Scope>,
    pub file: SourceFile,
    /// Class whose body defined the function; used by zero-argument `super()`.
    pub owner: RefCell<Weak<Class>>,
}

impl Function {
    pub fn def_line(&self) -> u32 {
        match &self.body {
            FunctionBody::Def(def) => def.span.line(),
            FunctionBody::Lambda(lambda) => lambda.span.line(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinKind {
    Function,
    Type,
}

pub struct Builtin {
    pub name: &'static str,
    pub func: BuiltinFn,
    pub kind: BuiltinKind,
}

impl fmt::Debug for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Builtin({})", self.name)
    }
}

#[derive(Debug)]
pub struct BoundMethod {
    pub receiver: Value,
    pub function: Value,
}

/// A method of a builtin container or string, resolved at call time.
#[derive(Debug)]
pub struct NativeMethod {
    pub receiver: Value,
    pub name: SmolStr,
}

#[derive(Debug)]
pub struct Class {
    pub name: SmolStr,
    pub bases: Vec<Rc<Class>>,
    pub attrs: RefCell<IndexMap<SmolStr, Value>>,
    pub builtin: bool,
}

impl Class {
    pub fn new(name: impl Into<SmolStr>, bases: Vec<Rc<Class>>, builtin: bool) -> Self {
        Self {
            name: name.into(),
            bases,
            attrs: RefCell::new(IndexMap::new()),
            builtin,
        }
    }

    /// Depth-first, left-to-right linearisation without duplicates.
    pub fn mro(self: &Rc<Self>) -> Vec<Rc<Class>> {
        let mut order: Vec<Rc<Class>> = Vec::new();
        fn visit(class: &Rc<Class>, order: &mut Vec<Rc<Class>>) {
            if order.iter().any(|seen| Rc::ptr_eq(seen, class)) {
                return;
            }
            order.push(class.clone());
            for base in &class.bases {
                visit(base, order);
            }
        }
        visit(self, &mut order);
        order
    }

    pub fn lookup(self: &Rc<Self>, name: &str) -> Option<Value> {
        self.mro()
            .into_iter()
            .find_map(|class| class.attrs.borrow().get(name).cloned())
    }

    pub fn is_subclass_of(self: &Rc<Self>, other: &Rc<Class>) -> bool {
        self.mro().iter().any(|class| Rc::ptr_eq(class, other))
    }

    pub fn is_subclass_named(self: &Rc<Self>, name: &str) -> bool {
        self.mro()
            .iter()
            .any(|class| class.builtin && class.name == name)
    }
}

#[derive(Debug)]
pub struct Instance {
    pub class: Rc<Class>,
    pub attrs: RefCell<IndexMap<SmolStr, Value>>,
}

impl Instance {
    pub fn new(class: Rc<Class>) -> Self {
        Self {
            class,
            attrs: RefCell::new(IndexMap::new()),
        }
    }

    pub fn get_attr(&self, name: &str) -> Option<Value> {
        self.attrs.borrow().get(name).cloned()
    }
}

#[derive(Debug)]
pub struct Module {
    pub name: SmolStr,
    pub scope: Scope,
}

#[derive(Debug)]
pub struct SuperProxy {
    /// Lookup starts after this class in the receiver's MRO.
    pub class: Rc<Class>,
    pub receiver: Value,
}

#[derive(Debug)]
pub enum IterState {
    Items { items: Vec<Value>, index: usize },
    List { list: Rc<RefCell<Vec<Value>>>, index: usize },
    Range { next: i128, stop: i128, step: i128 },
    /// A user object implementing `__next__`.
    Object(Value),
}

impl IterState {
    pub fn items(items: Vec<Value>) -> Self {
        IterState::Items { items, index: 0 }
    }
}

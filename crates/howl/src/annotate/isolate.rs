//! Mutation-safe copies of a frame's bindings.
//!
//! Macro expressions run against a deep copy so that observing a value never
//! changes it for the program. Aliasing and cycles inside the scope survive
//! the copy. Iterators and modules wrap live runtime state and are shared
//! with the original, as are immutable values such as functions and classes.

use crate::runtime::{new_scope, Dict, HashKey, Instance, Scope, Set, Value};
use crate::trace::ScopeBinding;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Default)]
pub struct ScopeIsolator {
    memo: HashMap<usize, Value>,
    scopes: HashMap<usize, Scope>,
}

impl ScopeIsolator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies locals, globals and enclosing scopes with one shared memo.
    pub fn isolate(&mut self, binding: &ScopeBinding) -> ScopeBinding {
        let globals = self.copy_scope(&binding.globals);
        let locals = self.copy_scope(&binding.locals);
        let enclosing = binding
            .enclosing
            .iter()
            .map(|scope| self.copy_scope(scope))
            .collect();
        ScopeBinding {
            locals,
            globals,
            enclosing,
        }
    }

    fn copy_scope(&mut self, scope: &Scope) -> Scope {
        let key = Rc::as_ptr(scope) as usize;
        if let Some(copy) = self.scopes.get(&key) {
            return copy.clone();
        }
        let copy = new_scope();
        self.scopes.insert(key, copy.clone());
        let entries: Vec<_> = scope
            .borrow()
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        for (name, value) in entries {
            let value = self.copy_value(&value);
            copy.borrow_mut().insert(name, value);
        }
        copy
    }

    pub fn copy_value(&mut self, value: &Value) -> Value {
        let Some(key) = value.identity() else {
            return value.clone();
        };
        if let Some(copy) = self.memo.get(&key) {
            return copy.clone();
        }
        match value {
            Value::List(items) => {
                let copy = Rc::new(RefCell::new(Vec::new()));
                self.memo.insert(key, Value::List(copy.clone()));
                let items = items.borrow().clone();
                let copied: Vec<Value> = items.iter().map(|item| self.copy_value(item)).collect();
                *copy.borrow_mut() = copied;
                Value::List(copy)
            }
            Value::Dict(dict) => {
                let copy = Rc::new(RefCell::new(Dict::new()));
                self.memo.insert(key, Value::Dict(copy.clone()));
                let entries: Vec<(Value, Value)> = dict
                    .borrow()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                let mut copied = Dict::new();
                // Instance keys hash by identity, so rehash from the copy.
                for (k, v) in entries {
                    let copied_key = self.copy_value(&k);
                    if let Ok(hash) = HashKey::from_value(&copied_key) {
                        let copied_value = self.copy_value(&v);
                        copied.insert(hash, copied_key, copied_value);
                    }
                }
                *copy.borrow_mut() = copied;
                Value::Dict(copy)
            }
            Value::Set(set) => {
                let copy = Rc::new(RefCell::new(Set::new()));
                self.memo.insert(key, Value::Set(copy.clone()));
                let members = set.borrow().values();
                let mut copied = Set::new();
                for member in members {
                    let member = self.copy_value(&member);
                    if let Ok(hash) = HashKey::from_value(&member) {
                        copied.insert(hash, member);
                    }
                }
                *copy.borrow_mut() = copied;
                Value::Set(copy)
            }
            Value::Tuple(items) => {
                let copied: Vec<Value> = items.iter().map(|item| self.copy_value(item)).collect();
                let copy = Value::tuple(copied);
                self.memo.insert(key, copy.clone());
                copy
            }
            Value::Instance(instance) => {
                let copy = Rc::new(Instance::new(instance.class.clone()));
                self.memo.insert(key, Value::Instance(copy.clone()));
                let attrs: Vec<_> = instance
                    .attrs
                    .borrow()
                    .iter()
                    .map(|(name, value)| (name.clone(), value.clone()))
                    .collect();
                for (name, value) in attrs {
                    let value = self.copy_value(&value);
                    copy.attrs.borrow_mut().insert(name, value);
                }
                Value::Instance(copy)
            }
            _ => value.clone(),
        }
    }
}

/// Convenience wrapper for a one-off copy.
pub fn isolate(binding: &ScopeBinding) -> ScopeBinding {
    ScopeIsolator::new().isolate(binding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Value;

    fn scope_with(entries: Vec<(&str, Value)>) -> Scope {
        let scope = new_scope();
        for (name, value) in entries {
            scope.borrow_mut().insert(name.into(), value);
        }
        scope
    }

    fn list_len(value: &Value) -> usize {
        match value {
            Value::List(items) => items.borrow().len(),
            _ => panic!("not a list"),
        }
    }

    #[test]
    fn copies_do_not_reach_the_original() {
        let original = Value::list(vec![Value::Int(1), Value::Int(2)]);
        let binding = ScopeBinding::module(scope_with(vec![("a", original.clone())]));
        let copy = isolate(&binding);
        if let Some(Value::List(items)) = copy.locals.borrow().get("a") {
            items.borrow_mut().pop();
        }
        assert_eq!(list_len(&original), 2);
    }

    #[test]
    fn module_scopes_stay_one_binding() {
        let binding = ScopeBinding::module(scope_with(vec![("x", Value::Int(1))]));
        let copy = isolate(&binding);
        assert!(copy.is_module_level());
        assert!(!Rc::ptr_eq(&copy.locals, &binding.locals));
    }

    #[test]
    fn aliasing_survives() {
        let shared = Value::list(vec![Value::Int(1)]);
        let binding = ScopeBinding::module(scope_with(vec![
            ("a", shared.clone()),
            ("b", shared),
        ]));
        let copy = isolate(&binding);
        let scope = copy.locals.borrow();
        let (Some(a), Some(b)) = (scope.get("a"), scope.get("b")) else {
            panic!("missing bindings");
        };
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn cycles_terminate() {
        let list = Value::list(Vec::new());
        if let Value::List(items) = &list {
            items.borrow_mut().push(list.clone());
        }
        let copy = ScopeIsolator::new().copy_value(&list);
        let Value::List(items) = &copy else {
            panic!("not a list");
        };
        assert_eq!(items.borrow()[0].identity(), copy.identity());
        assert_ne!(copy.identity(), list.identity());
    }

    #[test]
    fn set_members_and_dict_keys_are_copied() {
        let class = Rc::new(crate::runtime::Class::new("C", Vec::new(), false));
        let member = Rc::new(Instance::new(class.clone()));
        let key = Rc::new(Instance::new(class));
        let mut set = Set::new();
        let member_value = Value::Instance(member.clone());
        set.insert(HashKey::from_value(&member_value).unwrap(), member_value.clone());
        let mut dict = Dict::new();
        let key_value = Value::Instance(key.clone());
        dict.insert(HashKey::from_value(&key_value).unwrap(), key_value.clone(), Value::Int(1));
        let binding = ScopeBinding::module(scope_with(vec![
            ("s", Value::set(set)),
            ("d", Value::dict(dict)),
            ("m", member_value.clone()),
        ]));

        let copy = isolate(&binding);
        let scope = copy.locals.borrow();
        let (Some(Value::Set(s)), Some(Value::Dict(d)), Some(m)) =
            (scope.get("s"), scope.get("d"), scope.get("m"))
        else {
            panic!("missing bindings");
        };
        let copied_member = s.borrow().values()[0].clone();
        assert_ne!(copied_member.identity(), member_value.identity());
        assert_eq!(copied_member.identity(), m.identity());
        let copied_key = d.borrow().keys()[0].clone();
        assert_ne!(copied_key.identity(), key_value.identity());
        let rehashed = HashKey::from_value(&copied_key).unwrap();
        assert!(matches!(d.borrow().get(&rehashed), Some(Value::Int(1))));
    }

    #[test]
    fn iterators_are_shared() {
        let iterator = Value::iterator(crate::runtime::IterState::items(vec![Value::Int(1)]));
        let copy = ScopeIsolator::new().copy_value(&iterator);
        assert_eq!(copy.identity(), iterator.identity());
    }
}

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::EmberError;
use crate::token::Token;
use crate::value::Value;

/// Shared handle to a scope. A scope stays alive while any closure or nested
/// scope still refers to it.
pub type EnvRef = Rc<RefCell<Environment>>;

#[derive(Debug, Default)]
pub struct Environment {
    values: HashMap<String, Value>,
    enclosing: Option<EnvRef>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_enclosing(enclosing: EnvRef) -> Self {
        Self {
            values: HashMap::new(),
            enclosing: Some(enclosing),
        }
    }

    pub fn into_ref(self) -> EnvRef {
        Rc::new(RefCell::new(self))
    }

    /// Binds `name` in this scope, replacing any previous binding.
    pub fn define(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    /// Looks `name` up in this scope and then outward.
    pub fn get(&self, name: &Token) -> Result<Value, EmberError> {
        if let Some(value) = self.values.get(&name.lexeme) {
            return Ok(value.clone());
        }

        if let Some(enclosing) = &self.enclosing {
            return enclosing.borrow().get(name);
        }

        Err(EmberError::runtime(
            name,
            format!("Undefined variable '{}'.", name.lexeme),
        ))
    }

    pub fn assign(&mut self, name: &Token, value: Value) -> Result<(), EmberError> {
        if let Some(slot) = self.values.get_mut(&name.lexeme) {
            *slot = value;
            return Ok(());
        }

        if let Some(enclosing) = &self.enclosing {
            return enclosing.borrow_mut().assign(name, value);
        }

        Err(EmberError::runtime(
            name,
            format!("Undefined variable '{}'.", name.lexeme),
        ))
    }

    /// Reads `name` from the scope exactly `distance` links up the chain.
    pub fn get_at(&self, distance: usize, name: &str) -> Option<Value> {
        if distance == 0 {
            self.values.get(name).cloned()
        } else {
            self.enclosing
                .as_ref()
                .and_then(|enc| enc.borrow().get_at(distance - 1, name))
        }
    }

    /// Writes `name` in the scope exactly `distance` links up the chain.
    /// Returns `false` if that scope does not bind `name`.
    pub fn assign_at(&mut self, distance: usize, name: &str, value: Value) -> bool {
        if distance == 0 {
            match self.values.get_mut(name) {
                Some(slot) => {
                    *slot = value;
                    true
                }
                None => false,
            }
        } else {
            self.enclosing
                .as_ref()
                .is_some_and(|enc| enc.borrow_mut().assign_at(distance - 1, name, value))
        }
    }

    pub fn variable_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.values.keys().cloned().collect();

        if let Some(enclosing) = &self.enclosing {
            for name in enclosing.borrow().variable_names() {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }

        names.sort();
        names
    }
}

use std::sync::{Arc, Mutex};

use crate::error::{HatchError, HatchResult};
use crate::lock;
use crate::value::Value;

/// A named mutable cell. Concurrent execution units read and write it with
/// no ordering between them; the mutex only keeps each single access whole.
#[derive(Debug)]
pub struct Variable {
    name: String,
    value: Mutex<Value>,
}

impl Variable {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value: Mutex::new(value),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self) -> Value {
        lock(&self.value).clone()
    }

    pub fn set(&self, value: Value) {
        *lock(&self.value) = value;
    }
}

/// Ordered variable table, optionally overlaid on a shared (stage) scope.
#[derive(Debug, Default)]
pub struct Scope {
    vars: Vec<Arc<Variable>>,
    shared: Option<Arc<Scope>>,
}

impl Scope {
    pub fn new(shared: Option<Arc<Scope>>) -> Self {
        Self {
            vars: Vec::new(),
            shared,
        }
    }

    /// Declares a variable; a second declaration of the same name replaces the first.
    pub fn declare(&mut self, name: impl Into<String>, value: Value) -> Arc<Variable> {
        let var = Arc::new(Variable::new(name, value));
        match self.vars.iter_mut().find(|v| v.name() == var.name()) {
            Some(slot) => *slot = var.clone(),
            None => self.vars.push(var.clone()),
        }
        var
    }

    pub fn local(&self, name: &str) -> Option<&Arc<Variable>> {
        self.vars.iter().find(|v| v.name() == name)
    }

    /// Local scope first, then the shared scope.
    pub fn lookup(&self, name: &str) -> Option<Arc<Variable>> {
        if let Some(var) = self.local(name) {
            return Some(var.clone());
        }
        self.shared.as_ref().and_then(|shared| shared.lookup(name))
    }

    pub fn resolve(&self, name: &str) -> HatchResult<Arc<Variable>> {
        self.lookup(name)
            .ok_or_else(|| HatchError::UnknownVariable(name.to_string()))
    }

    pub fn variables(&self) -> impl Iterator<Item = &Arc<Variable>> {
        self.vars.iter()
    }

    pub fn shared(&self) -> Option<&Arc<Scope>> {
        self.shared.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_shadows_shared() {
        let mut stage = Scope::new(None);
        stage.declare("score", Value::Int(10));
        stage.declare("lives", Value::Int(3));
        let stage = Arc::new(stage);

        let mut sprite = Scope::new(Some(stage.clone()));
        sprite.declare("score", Value::Int(1));

        assert_eq!(sprite.resolve("score").expect("score").get(), Value::Int(1));
        assert_eq!(sprite.resolve("lives").expect("lives").get(), Value::Int(3));
        assert!(matches!(
            sprite.resolve("missing"),
            Err(HatchError::UnknownVariable(name)) if name == "missing"
        ));
    }

    #[test]
    fn writes_through_shared_cells_are_visible_everywhere() {
        let mut stage = Scope::new(None);
        stage.declare("flag", Value::Bool(false));
        let stage = Arc::new(stage);
        let a = Scope::new(Some(stage.clone()));
        let b = Scope::new(Some(stage.clone()));

        a.resolve("flag").expect("flag").set(Value::Bool(true));
        assert_eq!(b.resolve("flag").expect("flag").get(), Value::Bool(true));
        assert_eq!(stage.local("flag").expect("flag").get(), Value::Bool(true));
    }

    #[test]
    fn redeclaring_keeps_order_and_replaces_value() {
        let mut scope = Scope::new(None);
        scope.declare("a", Value::Int(1));
        scope.declare("b", Value::Int(2));
        scope.declare("a", Value::Int(5));
        let names: Vec<_> = scope.variables().map(|v| v.name().to_string()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(scope.resolve("a").expect("a").get(), Value::Int(5));
    }
}

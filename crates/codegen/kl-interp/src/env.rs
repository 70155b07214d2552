//! Lexical scopes

use crate::value::Value;
use kl_ir::DeclId;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::rc::Rc;

/// Shared handle to a scope; closures keep theirs alive
pub type Env = Rc<Scope>;

/// One level of the scope chain
#[derive(Default)]
pub struct Scope {
    values: RefCell<FxHashMap<DeclId, Value>>,
    parent: Option<Env>,
}

impl Scope {
    /// Empty scope nested in `parent`
    pub fn child(parent: &Env) -> Env {
        Rc::new(Self {
            values: RefCell::new(FxHashMap::default()),
            parent: Some(Rc::clone(parent)),
        })
    }

    /// Bind `decl` in this scope, shadowing outer bindings
    pub fn declare(&self, decl: DeclId, value: Value) {
        self.values.borrow_mut().insert(decl, value);
    }

    /// Value bound to `decl` in this scope or an enclosing one
    pub fn lookup(&self, decl: DeclId) -> Option<Value> {
        if let Some(value) = self.values.borrow().get(&decl) {
            return Some(value.clone());
        }
        self.parent.as_ref().and_then(|parent| parent.lookup(decl))
    }

    /// Overwrite the innermost binding of `decl`; false when unbound
    pub fn assign(&self, decl: DeclId, value: Value) -> bool {
        if let Some(slot) = self.values.borrow_mut().get_mut(&decl) {
            *slot = value;
            return true;
        }
        self.parent.as_ref().is_some_and(|parent| parent.assign(decl, value))
    }
}

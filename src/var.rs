use std::cell::RefCell;
use std::rc::Rc;

use log::debug;

use crate::env::Env;
use crate::value::Value;

/// An addressable, shareable storage cell.  Cloning a `Var` aliases the
/// slot: writes through either handle are mutually visible.  This is the
/// unit of PHP reference semantics ($b =& $a).
#[derive(Debug, Clone)]
pub struct Var {
    cell: Rc<RefCell<Value>>,
}

impl Var {
    pub fn new(value: Value) -> Self {
        Var {
            cell: Rc::new(RefCell::new(value)),
        }
    }

    /// Reads the current value.  Containers come back as shared handles,
    /// so this is the "dirty" read as well.
    pub fn get(&self) -> Value {
        self.cell.borrow().clone()
    }

    pub fn set(&self, value: Value) {
        *self.cell.borrow_mut() = value;
    }

    /// True when both handles alias the same slot.
    pub fn aliases(&self, other: &Var) -> bool {
        Rc::ptr_eq(&self.cell, &other.cell)
    }

    pub fn is_set(&self) -> bool {
        self.cell.borrow().is_set()
    }

    /// Auto-vivifying array view: a null slot is replaced in place with a
    /// fresh empty array, and the (shared) array handle is returned.
    /// Non-null, non-array slots come back untouched; the caller's write
    /// then degrades to a no-op the way PHP treats scalar bases.
    pub fn to_auto_array(&self) -> Value {
        let mut inner = self.cell.borrow_mut();

        if inner.is_null() {
            debug!("Auto-vivifying null slot as array");
            *inner = Value::new_array();
        }

        inner.clone()
    }

    /// Auto-vivifying object view: a null slot becomes a fresh stdClass
    /// instance in place.
    pub fn to_auto_object(&self, env: &mut Env) -> Value {
        let mut inner = self.cell.borrow_mut();

        if inner.is_null() {
            debug!("Auto-vivifying null slot as stdClass object");
            *inner = Value::new_object(env.std_class());
        }

        inner.clone()
    }
}

/// Result of a reference-capable evaluation path (`eval_ref`, `eval_arg`):
/// either a plain value or an aliasable cell.  The caller decides whether
/// to bind to the cell or just take the value.
#[derive(Debug, Clone)]
pub enum RefValue {
    Val(Value),
    Cell(Var),
}

impl RefValue {
    pub fn to_value(&self) -> Value {
        match self {
            RefValue::Val(v) => v.clone(),
            RefValue::Cell(var) => var.get(),
        }
    }

    /// An aliasable cell: the underlying cell when there is one, a fresh
    /// unshared cell around the value otherwise.
    pub fn into_cell(self) -> Var {
        match self {
            RefValue::Val(v) => Var::new(v),
            RefValue::Cell(var) => var,
        }
    }

    pub fn is_cell(&self) -> bool {
        matches!(self, RefValue::Cell(_))
    }
}

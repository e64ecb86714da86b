//! L-value / container-access protocol.
//!
//! Array-element and object-field nodes follow one four-operation pattern:
//! plain read (in `eval`), auto-vivifying read (`eval_array`/`eval_object`),
//! write through a reference-capable path so the mutation reaches the
//! original variable, and unset forwarded to the owner's removal operation.
//! Non-l-value nodes fall through to the documented defaults: `eval_var`
//! wraps the read value in a fresh unshared cell, assignment is a hard
//! error.

use log::debug;

use crate::env::Env;
use crate::error::{PhloxError, Result};
use crate::eval::resolve_virtual_class;
use crate::expr::{Expr, UNKNOWN_LOCATION};
use crate::value::Value;
use crate::var::Var;

impl Expr {
    /// Returns a storage cell, creating the underlying slot if it did not
    /// exist.  Non-l-value nodes return a fresh, unshared cell around the
    /// read value.
    pub fn eval_var(&self, env: &mut Env) -> Result<Var> {
        match self {
            Expr::Var(name) => Ok(env.get_var(name)),

            Expr::VarVar(name) => {
                let name = name.eval_string(env)?;
                Ok(env.get_var(&name))
            }

            Expr::ThisField(name) => match this_object(env) {
                Some(obj) => Ok(obj.borrow_mut().field_var(name)),
                None => {
                    env.error(&UNKNOWN_LOCATION, "$this is not in an object context");
                    Ok(Var::new(Value::Null))
                }
            },

            Expr::ThisFieldVar(name) => {
                let name = name.eval_string(env)?;
                match this_object(env) {
                    Some(obj) => Ok(obj.borrow_mut().field_var(&name)),
                    None => {
                        env.error(&UNKNOWN_LOCATION, "$this is not in an object context");
                        Ok(Var::new(Value::Null))
                    }
                }
            }

            Expr::ArrayGet { base, index, .. } => {
                let owner = base.eval_array(env)?;
                let key = index.eval(env)?.to_array_key();

                match owner.as_array() {
                    Some(arr) => Ok(arr.borrow_mut().entry_var(key)),
                    // scalar base: hand back a dead cell, the write is lost
                    None => Ok(Var::new(Value::Null)),
                }
            }

            Expr::ArrayTail { base, .. } => {
                let owner = base.eval_array(env)?;

                match owner.as_array() {
                    Some(arr) => Ok(arr.borrow_mut().append_var()),
                    None => Ok(Var::new(Value::Null)),
                }
            }

            Expr::ObjectField { base, name } => {
                let owner = base.eval_object(env)?;

                match owner.as_object() {
                    Some(obj) => Ok(obj.borrow_mut().field_var(name)),
                    None => Ok(Var::new(Value::Null)),
                }
            }

            Expr::ObjectFieldVar { base, name } => {
                let owner = base.eval_object(env)?;
                let name = name.eval_string(env)?;

                match owner.as_object() {
                    Some(obj) => Ok(obj.borrow_mut().field_var(&name)),
                    None => Ok(Var::new(Value::Null)),
                }
            }

            Expr::ClassField { class, field } => match env.find_class(class) {
                Some(class) => Ok(class.static_field_var(field)),
                None => {
                    env.error(
                        &UNKNOWN_LOCATION,
                        format!("'{}' is an unknown class", class),
                    );
                    Ok(Var::new(Value::Null))
                }
            },

            Expr::ClassVarField { class, field } => {
                let name = crate::eval::class_name_of(env, class)?;
                match env.find_class(&name) {
                    Some(class) => Ok(class.static_field_var(field)),
                    None => {
                        env.error(
                            &UNKNOWN_LOCATION,
                            format!("'{}' is an unknown class", name),
                        );
                        Ok(Var::new(Value::Null))
                    }
                }
            }

            Expr::ClassVirtualField { field } => match resolve_virtual_class(env)
                .and_then(|name| env.find_class(&name))
            {
                Some(class) => Ok(class.static_field_var(field)),
                None => {
                    env.error(
                        &UNKNOWN_LOCATION,
                        "cannot use 'static' outside of a class context",
                    );
                    Ok(Var::new(Value::Null))
                }
            },

            _ => Ok(Var::new(self.eval(env)?)),
        }
    }

    /// Auto-vivifying read: an unset slot becomes an empty array in place,
    /// and the shared handle comes back so nested writes reach the owner.
    pub fn eval_array(&self, env: &mut Env) -> Result<Value> {
        match self {
            _ if self.is_var() => {
                let var = self.eval_var(env)?;
                Ok(var.to_auto_array())
            }
            _ => self.eval(env),
        }
    }

    /// Auto-vivifying read producing an object (stdClass) for unset slots.
    pub fn eval_object(&self, env: &mut Env) -> Result<Value> {
        match self {
            _ if self.is_var() => {
                let var = self.eval_var(env)?;
                Ok(var.to_auto_object(env))
            }
            _ => self.eval(env),
        }
    }

    /// L-value write with a plain value (already copied by the caller).
    pub fn eval_assign_value(&self, env: &mut Env, value: Value) -> Result<Value> {
        debug!("eval_assign_value: {} <- {}", self, value.type_name());

        match self {
            Expr::Var(name) => {
                env.set_value(name, value.clone());
                Ok(value)
            }

            Expr::VarVar(name) => {
                let name = name.eval_string(env)?;
                env.set_value(&name, value.clone());
                Ok(value)
            }

            Expr::This => {
                env.error(&UNKNOWN_LOCATION, "cannot re-assign $this");
                Ok(value)
            }

            Expr::ThisField(name) => {
                match this_object(env) {
                    Some(obj) => obj.borrow_mut().put_field(name, value.clone()),
                    None => env.error(&UNKNOWN_LOCATION, "$this is not in an object context"),
                }
                Ok(value)
            }

            Expr::ThisFieldVar(name) => {
                let name = name.eval_string(env)?;
                match this_object(env) {
                    Some(obj) => obj.borrow_mut().put_field(&name, value.clone()),
                    None => env.error(&UNKNOWN_LOCATION, "$this is not in an object context"),
                }
                Ok(value)
            }

            Expr::ArrayGet { base, index, .. } => {
                let owner = base.eval_array(env)?;
                let key = index.eval(env)?.to_array_key();

                if let Some(arr) = owner.as_array() {
                    arr.borrow_mut().put(key, value.clone());
                }
                Ok(value)
            }

            Expr::ArrayTail { base, .. } => {
                let owner = base.eval_array(env)?;

                if let Some(arr) = owner.as_array() {
                    arr.borrow_mut().append_var().set(value.clone());
                }
                Ok(value)
            }

            Expr::ObjectField { base, name } => {
                let owner = base.eval_object(env)?;

                if let Some(obj) = owner.as_object() {
                    obj.borrow_mut().put_field(name, value.clone());
                }
                Ok(value)
            }

            Expr::ObjectFieldVar { base, name } => {
                let owner = base.eval_object(env)?;
                let name = name.eval_string(env)?;

                if let Some(obj) = owner.as_object() {
                    obj.borrow_mut().put_field(&name, value.clone());
                }
                Ok(value)
            }

            Expr::ClassField { .. }
            | Expr::ClassVarField { .. }
            | Expr::ClassVirtualField { .. } => {
                let var = self.eval_var(env)?;
                var.set(value.clone());
                Ok(value)
            }

            Expr::CharAt { base, index } => {
                let var = base.eval_var(env)?;
                let index = index.eval_long(env)?;

                if index >= 0 {
                    let s = var.get().to_str().to_string();
                    let i = index as usize;
                    let ch = value.to_str().bytes().next().unwrap_or(b' ');

                    // guest strings are byte strings, replace at byte level
                    let mut bytes = s.into_bytes();
                    if i >= bytes.len() {
                        // PHP pads short strings with spaces
                        bytes.resize(i + 1, b' ');
                    }
                    bytes[i] = ch;

                    var.set(Value::string(String::from_utf8_lossy(&bytes)));
                }
                Ok(value)
            }

            _ => Err(PhloxError::unsupported(format!(
                "{} is an invalid left-hand side of an assignment",
                self
            ))),
        }
    }

    /// L-value write that aliases the given cell directly: subsequent
    /// writes through either name are mutually visible.
    pub fn eval_assign_ref(&self, env: &mut Env, var: Var) -> Result<()> {
        debug!("eval_assign_ref: {}", self);

        match self {
            Expr::Var(name) => {
                env.set_ref(name, var);
                Ok(())
            }

            Expr::VarVar(name) => {
                let name = name.eval_string(env)?;
                env.set_ref(&name, var);
                Ok(())
            }

            Expr::ThisField(name) => {
                match this_object(env) {
                    Some(obj) => obj.borrow_mut().put_field_var(name, var),
                    None => env.error(&UNKNOWN_LOCATION, "$this is not in an object context"),
                }
                Ok(())
            }

            Expr::ThisFieldVar(name) => {
                let name = name.eval_string(env)?;
                match this_object(env) {
                    Some(obj) => obj.borrow_mut().put_field_var(&name, var),
                    None => env.error(&UNKNOWN_LOCATION, "$this is not in an object context"),
                }
                Ok(())
            }

            Expr::ArrayGet { base, index, .. } => {
                let owner = base.eval_array(env)?;
                let key = index.eval(env)?.to_array_key();

                if let Some(arr) = owner.as_array() {
                    arr.borrow_mut().put_var(key, var);
                }
                Ok(())
            }

            Expr::ArrayTail { base, .. } => {
                let owner = base.eval_array(env)?;

                if let Some(arr) = owner.as_array() {
                    arr.borrow_mut().append_slot(var);
                }
                Ok(())
            }

            Expr::ObjectField { base, name } => {
                let owner = base.eval_object(env)?;

                if let Some(obj) = owner.as_object() {
                    obj.borrow_mut().put_field_var(name, var);
                }
                Ok(())
            }

            Expr::ObjectFieldVar { base, name } => {
                let owner = base.eval_object(env)?;
                let name = name.eval_string(env)?;

                if let Some(obj) = owner.as_object() {
                    obj.borrow_mut().put_field_var(&name, var);
                }
                Ok(())
            }

            Expr::ClassField { class, field } => match env.find_class(class) {
                Some(class) => {
                    class.put_static_var(field, var);
                    Ok(())
                }
                None => {
                    env.error(
                        &UNKNOWN_LOCATION,
                        format!("'{}' is an unknown class", class),
                    );
                    Ok(())
                }
            },

            Expr::ClassVarField { class, field } => {
                let name = crate::eval::class_name_of(env, class)?;
                if let Some(class) = env.find_class(&name) {
                    class.put_static_var(field, var);
                }
                Ok(())
            }

            Expr::ClassVirtualField { field } => {
                if let Some(class) =
                    resolve_virtual_class(env).and_then(|name| env.find_class(&name))
                {
                    class.put_static_var(field, var);
                }
                Ok(())
            }

            _ => Err(PhloxError::unsupported(format!(
                "{} is an invalid left-hand side of an assignment",
                self
            ))),
        }
    }

    /// isset() semantics: present and not null, probing without
    /// auto-vivifying anything.
    pub fn eval_isset(&self, env: &mut Env) -> Result<bool> {
        match self {
            Expr::Var(name) => Ok(env.get_value(name).is_set()),

            Expr::VarVar(name) => {
                let name = name.eval_string(env)?;
                Ok(env.get_value(&name).is_set())
            }

            Expr::This => Ok(env.get_this().is_some()),

            Expr::ThisField(name) => match env.get_this() {
                Some(this) => Ok(this.get_field(name).is_set()),
                None => Ok(false),
            },

            Expr::ThisFieldVar(name) => {
                let name = name.eval_string(env)?;
                match env.get_this() {
                    Some(this) => Ok(this.get_field(&name).is_set()),
                    None => Ok(false),
                }
            }

            Expr::ArrayGet { base, index, .. } => {
                let owner = base.eval(env)?;
                let index = index.eval(env)?;
                Ok(owner.get(&index).is_set())
            }

            Expr::ObjectField { base, name } => {
                let owner = base.eval(env)?;
                Ok(owner.get_field(name).is_set())
            }

            Expr::ObjectFieldVar { base, name } => {
                let owner = base.eval(env)?;
                let name = name.eval_string(env)?;
                Ok(owner.get_field(&name).is_set())
            }

            Expr::CharAt { base, index } => {
                let s = base.eval_string(env)?;
                let index = index.eval_long(env)?;
                Ok(index >= 0 && (index as usize) < s.len())
            }

            // Static-field probes must not create the slot and stay quiet
            // on unknown classes.
            Expr::ClassField { class, field } => Ok(env
                .find_class(class)
                .and_then(|class| class.static_field(field))
                .is_some_and(|value| value.is_set())),

            Expr::ClassVarField { class, field } => {
                let name = crate::eval::class_name_of(env, class)?;
                Ok(env
                    .find_class(&name)
                    .and_then(|class| class.static_field(field))
                    .is_some_and(|value| value.is_set()))
            }

            Expr::ClassVirtualField { field } => Ok(resolve_virtual_class(env)
                .and_then(|name| env.find_class(&name))
                .and_then(|class| class.static_field(field))
                .is_some_and(|value| value.is_set())),

            _ => Ok(self.eval(env)?.is_set()),
        }
    }

    /// Removal.  Array and object targets forward to the owner's
    /// container-specific removal rather than a generic delete.
    pub fn eval_unset(&self, env: &mut Env) -> Result<()> {
        match self {
            Expr::Var(name) => {
                env.unset_var(name);
                Ok(())
            }

            Expr::VarVar(name) => {
                let name = name.eval_string(env)?;
                env.unset_var(&name);
                Ok(())
            }

            Expr::ArrayGet { base, index, .. } => {
                let index = index.eval(env)?;
                base.eval_unset_array(env, &index)
            }

            Expr::ObjectField { base, name } => {
                let owner = base.eval_dirty(env)?;
                if let Some(obj) = owner.as_object() {
                    obj.borrow_mut().remove_field(name);
                }
                Ok(())
            }

            Expr::ObjectFieldVar { base, name } => {
                let owner = base.eval_dirty(env)?;
                let name = name.eval_string(env)?;
                if let Some(obj) = owner.as_object() {
                    obj.borrow_mut().remove_field(&name);
                }
                Ok(())
            }

            Expr::ThisField(name) => {
                if let Some(obj) = this_object(env) {
                    obj.borrow_mut().remove_field(name);
                }
                Ok(())
            }

            Expr::ThisFieldVar(name) => {
                let name = name.eval_string(env)?;
                if let Some(obj) = this_object(env) {
                    obj.borrow_mut().remove_field(&name);
                }
                Ok(())
            }

            _ => Err(PhloxError::unsupported(format!(
                "{} is an illegal value to unset",
                self
            ))),
        }
    }

    /// Array-index removal forwarded from `unset($x[i])`: the owner is
    /// read dirty (no copy) and the key handed to its removal operation.
    pub fn eval_unset_array(&self, env: &mut Env, index: &Value) -> Result<()> {
        let owner = self.eval_dirty(env)?;

        if let Some(arr) = owner.as_array() {
            arr.borrow_mut().remove(&index.to_array_key());
        }

        Ok(())
    }
}

/// The current receiver as an object handle, when there is one.
fn this_object(env: &Env) -> Option<std::rc::Rc<std::cell::RefCell<crate::value::ObjectData>>> {
    env.get_this()?.as_object().cloned()
}

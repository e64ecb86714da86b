//! Call dispatch.
//!
//! Four resolution algorithms (free function, instance method, class-static
//! method, late-static-binding method) converge on one invoke shape:
//! marshal arguments, push a call frame, check the cooperative timeout,
//! run the body in a fresh scope, then unwind frame/scope/receiver state on
//! every exit path.  Unknown functions and methods are recoverable (warning
//! plus null); an unknown class in `new` is fatal.

use std::cell::OnceCell;
use std::collections::HashMap;
use std::rc::Rc;

use log::{debug, info};

use crate::env::{CallFrame, ClassDef, Env, FunId, Function, FunctionBody};
use crate::error::{PhloxError, Result};
use crate::expr::{Expr, Location, UNKNOWN_LOCATION};
use crate::value::Value;
use crate::var::Var;

/// Free function call by literal name.  The resolved id is memoized
/// write-once on the node; a failed lookup is retried on the next call,
/// never cached as permanently failing.
pub(crate) fn call_function(
    env: &mut Env,
    location: &Location,
    name: &str,
    args: &[Expr],
    cache: &OnceCell<FunId>,
) -> Result<Value> {
    let id = match cache.get() {
        Some(&id) => id,
        None => match env.find_function_id(name) {
            Some(id) => {
                debug!("Memoizing function id {} for '{}'", id, name);
                let _ = cache.set(id);
                id
            }
            None => {
                env.error(location, format!("'{}' is an unknown function", name));
                return Ok(Value::Null);
            }
        },
    };

    let fun = env.function(id).ok_or_else(|| {
        PhloxError::unsupported(format!("stale function id {} for '{}'", id, name))
    })?;

    let bound = marshal_args(env, &fun, args)?;

    invoke(env, &fun, location, None, None, bound)
}

/// Function call through a computed name ($f()); resolved on every call.
pub(crate) fn call_var(
    env: &mut Env,
    location: &Location,
    name: &Expr,
    args: &[Expr],
) -> Result<Value> {
    let name = name.eval_string(env)?;

    let Some(id) = env.find_function_id(&name) else {
        env.error(location, format!("'{}' is an unknown function", name));
        return Ok(Value::Null);
    };

    let fun = env.function(id).ok_or_else(|| {
        PhloxError::unsupported(format!("stale function id {} for '{}'", id, name))
    })?;

    let bound = marshal_args(env, &fun, args)?;

    invoke(env, &fun, location, None, None, bound)
}

/// Instance method call: the receiver is evaluated by value and the method
/// resolved case-insensitively against its runtime class.
pub(crate) fn call_method(
    env: &mut Env,
    location: &Location,
    object: &Expr,
    method: &str,
    args: &[Expr],
) -> Result<Value> {
    let obj = object.eval(env)?;

    let Some(data) = obj.as_object().cloned() else {
        env.error(
            location,
            format!("call to method '{}' on a non-object", method),
        );
        return Ok(Value::Null);
    };

    let class = data.borrow().class.clone();

    let Some(fun) = env.find_method(&class, method) else {
        env.error(
            location,
            format!("'{}::{}' is an unknown method", class.name, method),
        );
        return Ok(Value::Null);
    };

    let bound = marshal_args(env, &fun, args)?;

    // the called class is the receiver's runtime class: static:: inside
    // the method binds late
    invoke(
        env,
        &fun,
        location,
        Some(obj.clone()),
        Some(class.name.clone()),
        bound,
    )
}

/// Class-qualified static method call.  `self`/`parent` were already
/// resolved to concrete names at construction time; `static::` resolves
/// here through [`crate::eval::resolve_virtual_class`] before arriving.
pub(crate) fn call_class_method(
    env: &mut Env,
    location: &Location,
    class_name: &str,
    method: &str,
    args: &[Expr],
) -> Result<Value> {
    let Some(class) = env.find_class(class_name) else {
        env.error(location, format!("'{}' is an unknown class", class_name));
        return Ok(Value::Null);
    };

    let Some(fun) = env.find_method(&class, method) else {
        env.error(
            location,
            format!("'{}::{}' is an unknown method", class.name, method),
        );
        return Ok(Value::Null);
    };

    // the receiver survives the call only when it is an instance of the
    // named class (parent::/self:: calls keep $this)
    let this = match env.get_this() {
        Some(this) if this.is_a(env, &class.name) => Some(this),
        _ => None,
    };

    let bound = marshal_args(env, &fun, args)?;

    invoke(
        env,
        &fun,
        location,
        this,
        Some(class.name.clone()),
        bound,
    )
}

/// `new`: instantiates with field defaults (base classes first), then runs
/// `__construct` if declared.  Unknown class is a hard failure.
pub(crate) fn eval_new(
    env: &mut Env,
    location: &Location,
    class_name: &str,
    args: &[Expr],
) -> Result<Value> {
    let Some(class) = env.find_class(class_name) else {
        return Err(PhloxError::fatal(format!(
            "'{}' is an unknown class",
            class_name
        )));
    };

    info!("Instantiating '{}'", class.name);

    let obj = instantiate(env, &class);

    if let Some(ctor) = env.find_method(&class, "__construct") {
        let bound = marshal_args(env, &ctor, args)?;
        invoke(
            env,
            &ctor,
            location,
            Some(obj.clone()),
            Some(class.name.clone()),
            bound,
        )?;
    }

    Ok(obj)
}

fn instantiate(env: &Env, class: &Rc<ClassDef>) -> Value {
    let obj = Value::new_object(class.clone());

    // collect the inheritance chain, then apply defaults base-first so
    // subclasses override
    let mut chain = Vec::new();
    let mut current = Some(class.clone());
    while let Some(c) = current {
        current = c.parent.as_ref().and_then(|p| env.find_class(p));
        chain.push(c);
    }

    if let Some(data) = obj.as_object() {
        let mut data = data.borrow_mut();
        for c in chain.iter().rev() {
            for (name, default) in &c.fields {
                data.put_field(name, default.copy());
            }
        }
    }

    obj
}

/// Evaluates argument expressions (all of them, extras included) and binds
/// them to the declared parameters: by-ref parameters alias the caller's
/// cell, by-value parameters get a copied value, missing ones fall back to
/// the default or a recoverable warning plus null.
fn marshal_args(env: &mut Env, fun: &Function, arg_exprs: &[Expr]) -> Result<Vec<(Rc<str>, Var)>> {
    let mut values = Vec::with_capacity(arg_exprs.len());
    for arg in arg_exprs {
        values.push(arg.eval_arg(env, true)?);
    }

    let mut bound = Vec::with_capacity(fun.params.len());

    for (i, param) in fun.params.iter().enumerate() {
        let var = match values.get(i) {
            Some(rv) if param.by_ref => {
                if !rv.is_cell() {
                    env.error(
                        &UNKNOWN_LOCATION,
                        format!(
                            "only variables should be passed by reference to {}()",
                            fun.name
                        ),
                    );
                }
                rv.clone().into_cell()
            }

            Some(rv) => Var::new(rv.to_value().copy()),

            None => match &param.default {
                Some(default) => Var::new(default.copy()),
                None => {
                    env.error(
                        &UNKNOWN_LOCATION,
                        format!("missing argument {} for {}()", i + 1, fun.name),
                    );
                    Var::new(Value::Null)
                }
            },
        };

        bound.push((param.name.clone(), var));
    }

    Ok(bound)
}

/// Common dispatch tail.  The call frame, local scope, receiver and
/// calling class are all unwound on every exit path, error paths and
/// timeouts included.
fn invoke(
    env: &mut Env,
    fun: &Rc<Function>,
    location: &Location,
    this: Option<Value>,
    calling_class: Option<Rc<str>>,
    bound: Vec<(Rc<str>, Var)>,
) -> Result<Value> {
    debug!("Invoking '{}'", fun.name);

    env.push_call(CallFrame::new(&fun.name, location))?;

    let saved_this = env.set_this(this);
    let saved_class = env.set_calling_class(calling_class);

    let arg_values: Vec<Value> = bound.iter().map(|(_, var)| var.get()).collect();

    let mut scope = HashMap::new();
    for (name, var) in bound {
        scope.insert(name.to_string(), var);
    }
    env.push_scope(scope);

    let result = env.check_timeout().and_then(|_| match &fun.body {
        FunctionBody::Native(f) => f(env, &arg_values),
        FunctionBody::Expr(body) => body.eval(env),
    });

    env.pop_scope();
    env.set_calling_class(saved_class);
    env.set_this(saved_this);
    env.pop_call();

    match &result {
        Ok(value) => info!("'{}' returned {}", fun.name, value.type_name()),
        Err(e) => debug!("'{}' raised: {}", fun.name, e),
    }

    result
}

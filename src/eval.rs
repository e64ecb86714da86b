//! Multi-context evaluation protocol.
//!
//! Every node answers the same expression through a distinct entry point per
//! usage context: plain read (`eval`), forced copy (`eval_copy`), reference
//! production (`eval_ref`), storage-cell production (`eval_var`), call
//! argument (`eval_arg`), auto-vivifying container reads (`eval_array`,
//! `eval_object`), assignment, presence test, removal, and scalar-coercion
//! shortcuts.  A node overrides only the contexts where its semantics differ;
//! everything else routes through `eval` (the defaults in the catch-all
//! arms below).  The l-value entry points live in [`crate::lvalue`], call
//! dispatch in [`crate::call`].

use std::rc::Rc;

use log::debug;

use crate::call;
use crate::env::Env;
use crate::error::Result;
use crate::expr::{BinaryOp, CastKind, Expr, UnaryOp, UNKNOWN_LOCATION};
use crate::value::{ArrayData, Num, Value};
use crate::var::RefValue;

impl Expr {
    /// Default "read" context.  The returned value may still be backed by
    /// a live storage cell (containers are handles); no copy is forced.
    pub fn eval(&self, env: &mut Env) -> Result<Value> {
        match self {
            Expr::Literal(v) => Ok(v.clone()),

            Expr::Var(name) => Ok(env.get_value(name)),

            Expr::VarVar(name) => {
                let name = name.eval_string(env)?;
                Ok(env.get_value(&name))
            }

            Expr::This => match env.get_this() {
                Some(this) => Ok(this),
                None => {
                    env.error(&UNKNOWN_LOCATION, "$this is not in an object context");
                    Ok(Value::Null)
                }
            },

            Expr::ThisField(name) => match env.get_this() {
                Some(this) => Ok(this.get_field(name)),
                None => {
                    env.error(&UNKNOWN_LOCATION, "$this is not in an object context");
                    Ok(Value::Null)
                }
            },

            Expr::ThisFieldVar(name) => {
                let name = name.eval_string(env)?;
                match env.get_this() {
                    Some(this) => Ok(this.get_field(&name)),
                    None => {
                        env.error(&UNKNOWN_LOCATION, "$this is not in an object context");
                        Ok(Value::Null)
                    }
                }
            }

            Expr::ArrayGet { base, index, .. } => {
                let base = base.eval(env)?;
                let index = index.eval(env)?;
                Ok(base.get(&index))
            }

            Expr::ArrayTail { location, .. } => Err(crate::error::PhloxError::unsupported(
                match location.describe() {
                    Some(at) => format!("{}: cannot read the write-only expression {}", at, self),
                    None => format!("cannot read the write-only expression {}", self),
                },
            )),

            Expr::ObjectField { base, name } => {
                let base = base.eval(env)?;
                Ok(base.get_field(name))
            }

            Expr::ObjectFieldVar { base, name } => {
                let base = base.eval(env)?;
                let name = name.eval_string(env)?;
                Ok(base.get_field(&name))
            }

            Expr::ClassField { class, field } => match env.find_class(class) {
                Some(class) => Ok(class.static_field_var(field).get()),
                None => {
                    env.error(
                        &UNKNOWN_LOCATION,
                        format!("'{}' is an unknown class", class),
                    );
                    Ok(Value::Null)
                }
            },

            Expr::ClassVarField { class, field } => {
                let name = class_name_of(env, class)?;
                match env.find_class(&name) {
                    Some(class) => Ok(class.static_field_var(field).get()),
                    None => {
                        env.error(
                            &UNKNOWN_LOCATION,
                            format!("'{}' is an unknown class", name),
                        );
                        Ok(Value::Null)
                    }
                }
            }

            Expr::ClassVirtualField { field } => {
                match resolve_virtual_class(env) {
                    Some(name) => match env.find_class(&name) {
                        Some(class) => Ok(class.static_field_var(field).get()),
                        None => Ok(Value::Null),
                    },
                    None => {
                        env.error(
                            &UNKNOWN_LOCATION,
                            "cannot use 'static' outside of a class context",
                        );
                        Ok(Value::Null)
                    }
                }
            }

            Expr::ClassConst { class, name } => match env.find_class(class) {
                Some(class) => match env.find_constant(&class, name) {
                    Some(value) => Ok(value),
                    None => {
                        env.error(
                            &UNKNOWN_LOCATION,
                            format!("'{}::{}' is an undefined constant", class.name, name),
                        );
                        Ok(Value::Null)
                    }
                },
                None => {
                    env.error(
                        &UNKNOWN_LOCATION,
                        format!("'{}' is an unknown class", class),
                    );
                    Ok(Value::Null)
                }
            },

            Expr::ClassVirtualConst { name } => match resolve_virtual_class(env) {
                Some(class_name) => match env.find_class(&class_name) {
                    Some(class) => match env.find_constant(&class, name) {
                        Some(value) => Ok(value),
                        None => {
                            env.error(
                                &UNKNOWN_LOCATION,
                                format!("'{}::{}' is an undefined constant", class.name, name),
                            );
                            Ok(Value::Null)
                        }
                    },
                    None => Ok(Value::Null),
                },
                None => {
                    env.error(
                        &UNKNOWN_LOCATION,
                        "cannot use 'static' outside of a class context",
                    );
                    Ok(Value::Null)
                }
            },

            Expr::CharAt { base, index } => {
                let s = base.eval_string(env)?;
                let index = index.eval_long(env)?;
                Ok(Value::Str(s).get(&Value::Long(index)))
            }

            Expr::Binary { op, left, right } => eval_binary(env, *op, left, right),

            Expr::Unary { op, expr } => eval_unary(env, *op, expr),

            Expr::And { left, right } => {
                if !left.eval_boolean(env)? {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(right.eval_boolean(env)?))
            }

            Expr::Or { left, right } => {
                if left.eval_boolean(env)? {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(right.eval_boolean(env)?))
            }

            Expr::Xor { left, right } => {
                let left = left.eval_boolean(env)?;
                let right = right.eval_boolean(env)?;
                Ok(Value::Bool(left ^ right))
            }

            Expr::Append { .. } => Ok(Value::Str(self.eval_string(env)?)),

            Expr::Cast { kind, expr } => eval_cast(env, *kind, expr),

            Expr::InstanceOf { expr, class } => {
                let value = expr.eval(env)?;
                Ok(Value::Bool(value.is_a(env, class)))
            }

            Expr::InstanceOfVar { expr, class } => {
                let value = expr.eval(env)?;
                let class = class.eval(env)?;
                let name = match class.as_object() {
                    Some(obj) => obj.borrow().class.name.clone(),
                    None => class.to_str(),
                };
                Ok(Value::Bool(value.is_a(env, &name)))
            }

            Expr::Conditional {
                test,
                then,
                otherwise,
            } => {
                if test.eval_boolean(env)? {
                    then.eval(env)
                } else {
                    otherwise.eval(env)
                }
            }

            Expr::ConditionalShort { test, otherwise } => {
                let test = test.eval(env)?;
                if test.to_boolean() {
                    Ok(test)
                } else {
                    otherwise.eval(env)
                }
            }

            Expr::PreIncrement { expr, incr } => {
                let var = expr.eval_var(env)?;
                let next = increment_value(&var.get(), *incr);
                var.set(next.clone());
                Ok(next)
            }

            Expr::PostIncrement { expr, incr } => {
                let var = expr.eval_var(env)?;
                let old = var.get();
                var.set(increment_value(&old, *incr));
                Ok(old)
            }

            Expr::Assign { lhs, rhs } => {
                debug!("Assigning to {}", lhs);
                let value = rhs.eval_copy(env)?;
                lhs.eval_assign_value(env, value.clone())?;
                Ok(value)
            }

            Expr::AssignRef { lhs, rhs } => {
                debug!("Reference-assigning to {}", lhs);
                match rhs.eval_ref(env)? {
                    RefValue::Cell(var) => {
                        lhs.eval_assign_ref(env, var.clone())?;
                        Ok(var.get())
                    }
                    RefValue::Val(value) => {
                        lhs.eval_assign_value(env, value.clone())?;
                        Ok(value)
                    }
                }
            }

            Expr::Ref(expr) => expr.eval(env),

            Expr::Suppress(expr) => with_suppressed(env, |env| expr.eval(env)),

            Expr::Isset(expr) => Ok(Value::Bool(expr.eval_isset(env)?)),

            Expr::Unset(expr) => {
                expr.eval_unset(env)?;
                Ok(Value::Null)
            }

            Expr::Call {
                location,
                name,
                args,
                fun_id,
            } => call::call_function(env, location, name, args, fun_id),

            Expr::CallVar {
                location,
                name,
                args,
            } => call::call_var(env, location, name, args),

            Expr::MethodCall {
                location,
                object,
                method,
                args,
            } => call::call_method(env, location, object, method, args),

            Expr::MethodCallVar {
                location,
                object,
                method,
                args,
            } => {
                let method = method.eval_string(env)?;
                call::call_method(env, location, object, &method, args)
            }

            Expr::ClassMethodCall {
                location,
                class,
                method,
                args,
            } => call::call_class_method(env, location, class, method, args),

            Expr::ClassVarMethodCall {
                location,
                class,
                method,
                args,
            } => {
                let class = class_name_of(env, class)?;
                call::call_class_method(env, location, &class, method, args)
            }

            Expr::ClassVirtualMethodCall {
                location,
                method,
                args,
            } => match resolve_virtual_class(env) {
                Some(class) => call::call_class_method(env, location, &class, method, args),
                None => {
                    env.error(location, "cannot use 'static' outside of a class context");
                    Ok(Value::Null)
                }
            },

            Expr::New {
                location,
                class,
                args,
            } => call::eval_new(env, location, class, args),

            Expr::NewVar {
                location,
                class,
                args,
            } => {
                let class = class_name_of(env, class)?;
                call::eval_new(env, location, &class, args)
            }
        }
    }

    /// Read context that must produce an independent value (RHS of `=`).
    /// Container-producing nodes force a copy; everything else reads plain.
    pub fn eval_copy(&self, env: &mut Env) -> Result<Value> {
        match self {
            Expr::Suppress(expr) => with_suppressed(env, |env| expr.eval_copy(env)),

            Expr::Conditional {
                test,
                then,
                otherwise,
            } => {
                if test.eval_boolean(env)? {
                    then.eval_copy(env)
                } else {
                    otherwise.eval_copy(env)
                }
            }

            // Nodes whose read result may be a container handle that is
            // still live elsewhere (the assignment target, the tested
            // variable, the callee's locals) force the copy here.
            Expr::Assign { .. }
            | Expr::AssignRef { .. }
            | Expr::ConditionalShort { .. }
            | Expr::Ref(_)
            | Expr::Call { .. }
            | Expr::CallVar { .. }
            | Expr::MethodCall { .. }
            | Expr::MethodCallVar { .. }
            | Expr::ClassMethodCall { .. }
            | Expr::ClassVarMethodCall { .. }
            | Expr::ClassVirtualMethodCall { .. } => Ok(self.eval(env)?.copy()),

            _ if self.is_var() => Ok(self.eval(env)?.copy()),

            _ => self.eval(env),
        }
    }

    /// Reference-production context (RHS of `=&`, by-ref foreach).  Returns
    /// an aliasable cell for l-values, a plain value otherwise.
    pub fn eval_ref(&self, env: &mut Env) -> Result<RefValue> {
        match self {
            Expr::Ref(expr) => Ok(RefValue::Cell(expr.eval_var(env)?)),
            _ if self.is_var() => Ok(RefValue::Cell(self.eval_var(env)?)),
            _ => Ok(RefValue::Val(self.eval(env)?)),
        }
    }

    /// Call-argument context: the callee's by-ref declaration is not known
    /// yet, so l-values must stay aliasable.  Only the outermost argument
    /// expression (`is_top`) may be bound by reference.
    pub fn eval_arg(&self, env: &mut Env, is_top: bool) -> Result<RefValue> {
        match self {
            Expr::Ref(expr) => Ok(RefValue::Cell(expr.eval_var(env)?)),
            _ if is_top && self.is_var() => Ok(RefValue::Cell(self.eval_var(env)?)),
            _ => Ok(RefValue::Val(self.eval(env)?)),
        }
    }

    /// Read with the result expected to be mutated in place (unset
    /// forwarding).  Containers are handle-shared, so the dirty read is
    /// the plain read.
    pub fn eval_dirty(&self, env: &mut Env) -> Result<Value> {
        self.eval(env)
    }

    //
    // scalar-coercion shortcuts
    //

    pub fn eval_boolean(&self, env: &mut Env) -> Result<bool> {
        match self {
            Expr::Literal(v) => Ok(v.to_boolean()),

            Expr::Suppress(expr) => with_suppressed(env, |env| expr.eval_boolean(env)),

            Expr::Unary {
                op: UnaryOp::Not,
                expr,
            } => Ok(!expr.eval_boolean(env)?),

            Expr::And { left, right } => {
                if !left.eval_boolean(env)? {
                    return Ok(false);
                }
                right.eval_boolean(env)
            }

            Expr::Or { left, right } => {
                if left.eval_boolean(env)? {
                    return Ok(true);
                }
                right.eval_boolean(env)
            }

            _ => Ok(self.eval(env)?.to_boolean()),
        }
    }

    pub fn eval_long(&self, env: &mut Env) -> Result<i64> {
        match self {
            Expr::Literal(v) => Ok(v.to_long()),
            _ => Ok(self.eval(env)?.to_long()),
        }
    }

    pub fn eval_double(&self, env: &mut Env) -> Result<f64> {
        match self {
            Expr::Literal(v) => Ok(v.to_double()),
            _ => Ok(self.eval(env)?.to_double()),
        }
    }

    pub fn eval_string(&self, env: &mut Env) -> Result<Rc<str>> {
        match self {
            Expr::Literal(v) => Ok(v.to_str()),

            Expr::Suppress(expr) => with_suppressed(env, |env| expr.eval_string(env)),

            // Chain evaluation: left to right into one buffer.
            Expr::Append { parts } => {
                let mut buf = String::new();
                for part in parts {
                    buf.push_str(&part.eval_string(env)?);
                }
                Ok(Rc::from(buf.as_str()))
            }

            _ => Ok(self.eval(env)?.to_str()),
        }
    }
}

/// Runs `f` with the error mask cleared, restoring the previous mask on
/// every path out, including failures.
pub(crate) fn with_suppressed<T>(
    env: &mut Env,
    f: impl FnOnce(&mut Env) -> Result<T>,
) -> Result<T> {
    let saved = env.set_error_mask(0);
    let result = f(env);
    env.set_error_mask(saved);
    result
}

/// Resolves `static::` against the runtime called class: the active
/// calling class when set, otherwise the receiver's class.
pub(crate) fn resolve_virtual_class(env: &Env) -> Option<Rc<str>> {
    if let Some(class) = env.calling_class() {
        return Some(class);
    }

    match env.get_this()?.as_object() {
        Some(obj) => Some(obj.borrow().class.name.clone()),
        None => None,
    }
}

/// Class-name coercion for `$cls::...` forms: an object contributes its
/// runtime class, anything else its string value.
pub(crate) fn class_name_of(env: &mut Env, expr: &Expr) -> Result<Rc<str>> {
    let value = expr.eval(env)?;

    match value.as_object() {
        Some(obj) => Ok(obj.borrow().class.name.clone()),
        None => Ok(value.to_str()),
    }
}

fn eval_binary(env: &mut Env, op: BinaryOp, left: &Expr, right: &Expr) -> Result<Value> {
    let lhs = left.eval(env)?;
    let rhs = right.eval(env)?;

    let value = match op {
        BinaryOp::Add => add_values(&lhs, &rhs),

        BinaryOp::Sub => match (lhs.to_num(), rhs.to_num()) {
            (Num::Long(a), Num::Long(b)) => match a.checked_sub(b) {
                Some(n) => Value::Long(n),
                None => Value::Double(a as f64 - b as f64),
            },
            (a, b) => Value::Double(num_double(a) - num_double(b)),
        },

        BinaryOp::Mul => match (lhs.to_num(), rhs.to_num()) {
            (Num::Long(a), Num::Long(b)) => match a.checked_mul(b) {
                Some(n) => Value::Long(n),
                None => Value::Double(a as f64 * b as f64),
            },
            (a, b) => Value::Double(num_double(a) * num_double(b)),
        },

        BinaryOp::Div => {
            if rhs.to_double() == 0.0 {
                env.error(&UNKNOWN_LOCATION, "Division by zero");
                return Ok(Value::Bool(false));
            }
            match (lhs.to_num(), rhs.to_num()) {
                (Num::Long(a), Num::Long(b)) if a % b == 0 => Value::Long(a / b),
                (a, b) => Value::Double(num_double(a) / num_double(b)),
            }
        }

        BinaryOp::Mod => {
            let b = rhs.to_long();
            if b == 0 {
                env.error(&UNKNOWN_LOCATION, "Division by zero");
                return Ok(Value::Bool(false));
            }
            Value::Long(lhs.to_long().wrapping_rem(b))
        }

        BinaryOp::BitAnd => Value::Long(lhs.to_long() & rhs.to_long()),
        BinaryOp::BitOr => Value::Long(lhs.to_long() | rhs.to_long()),
        BinaryOp::BitXor => Value::Long(lhs.to_long() ^ rhs.to_long()),

        BinaryOp::Shl => {
            let shift = rhs.to_long();
            if (0..64).contains(&shift) {
                Value::Long(lhs.to_long() << shift)
            } else {
                Value::Long(0)
            }
        }

        BinaryOp::Shr => {
            let shift = rhs.to_long();
            if (0..64).contains(&shift) {
                Value::Long(lhs.to_long() >> shift)
            } else {
                Value::Long(0)
            }
        }

        BinaryOp::Lt => Value::Bool(lhs.cmp_values(&rhs) == std::cmp::Ordering::Less),
        BinaryOp::Leq => Value::Bool(lhs.cmp_values(&rhs) != std::cmp::Ordering::Greater),
        BinaryOp::Gt => Value::Bool(lhs.cmp_values(&rhs) == std::cmp::Ordering::Greater),
        BinaryOp::Geq => Value::Bool(lhs.cmp_values(&rhs) != std::cmp::Ordering::Less),

        BinaryOp::Eq => Value::Bool(lhs.loose_eq(&rhs)),
        BinaryOp::Neq => Value::Bool(!lhs.loose_eq(&rhs)),
        BinaryOp::Same => Value::Bool(lhs.same(&rhs)),
        BinaryOp::NotSame => Value::Bool(!lhs.same(&rhs)),
    };

    Ok(value)
}

/// `+` is numeric addition, except two arrays, which union (left wins).
fn add_values(lhs: &Value, rhs: &Value) -> Value {
    if let (Some(_), Some(b)) = (lhs.as_array(), rhs.as_array()) {
        let union = lhs.copy();
        {
            let dst = union.as_array().expect("copy of an array is an array");
            let mut dst = dst.borrow_mut();
            let b = b.borrow();
            for (key, var) in b.iter() {
                if !dst.contains(key) {
                    dst.put(key.clone(), var.get().copy());
                }
            }
        }
        return union;
    }

    match (lhs.to_num(), rhs.to_num()) {
        (Num::Long(a), Num::Long(b)) => match a.checked_add(b) {
            Some(n) => Value::Long(n),
            None => Value::Double(a as f64 + b as f64),
        },
        (a, b) => Value::Double(num_double(a) + num_double(b)),
    }
}

fn eval_unary(env: &mut Env, op: UnaryOp, expr: &Expr) -> Result<Value> {
    let value = expr.eval(env)?;

    let result = match op {
        UnaryOp::Minus => match value.to_num() {
            Num::Long(n) => match n.checked_neg() {
                Some(n) => Value::Long(n),
                None => Value::Double(-(n as f64)),
            },
            Num::Double(d) => Value::Double(-d),
        },

        UnaryOp::Plus => match value.to_num() {
            Num::Long(n) => Value::Long(n),
            Num::Double(d) => Value::Double(d),
        },

        UnaryOp::Not => Value::Bool(!value.to_boolean()),

        UnaryOp::BitNot => Value::Long(!value.to_long()),
    };

    Ok(result)
}

fn eval_cast(env: &mut Env, kind: CastKind, expr: &Expr) -> Result<Value> {
    let value = expr.eval(env)?;

    let result = match kind {
        CastKind::Bool => Value::Bool(value.to_boolean()),
        CastKind::Long => Value::Long(value.to_long()),
        CastKind::Double => Value::Double(value.to_double()),
        CastKind::Str => Value::Str(value.to_str()),

        CastKind::Array => match &value {
            Value::Array(_) => value,
            Value::Null => Value::new_array(),
            Value::Object(obj) => {
                let mut data = ArrayData::new();
                let obj = obj.borrow();
                for name in obj.field_names() {
                    let field = obj.get_field(&name).map(|v| v.get()).unwrap_or(Value::Null);
                    data.put(crate::value::ArrayKey::Str(name), field);
                }
                Value::Array(std::rc::Rc::new(std::cell::RefCell::new(data)))
            }
            other => {
                let mut data = ArrayData::new();
                data.append_var().set(other.clone());
                Value::Array(std::rc::Rc::new(std::cell::RefCell::new(data)))
            }
        },

        CastKind::Object => match &value {
            Value::Object(_) => value,
            Value::Null => Value::new_object(env.std_class()),
            Value::Array(arr) => {
                let obj = Value::new_object(env.std_class());
                {
                    let data = obj.as_object().expect("fresh object");
                    let mut data = data.borrow_mut();
                    for (key, var) in arr.borrow().iter() {
                        let name = match key {
                            crate::value::ArrayKey::Long(n) => {
                                let mut buf = itoa::Buffer::new();
                                buf.format(*n).to_string()
                            }
                            crate::value::ArrayKey::Str(s) => s.to_string(),
                        };
                        data.put_field(&name, var.get());
                    }
                }
                obj
            }
            other => {
                let obj = Value::new_object(env.std_class());
                obj.as_object()
                    .expect("fresh object")
                    .borrow_mut()
                    .put_field("scalar", other.clone());
                obj
            }
        },
    };

    Ok(result)
}

/// ++/-- semantics: null increments to 1 but decrements to null; anything
/// else steps numerically.
fn increment_value(value: &Value, incr: i64) -> Value {
    match value {
        Value::Null => {
            if incr > 0 {
                Value::Long(incr)
            } else {
                Value::Null
            }
        }
        _ => match value.to_num() {
            Num::Long(n) => Value::Long(n.wrapping_add(incr)),
            Num::Double(d) => Value::Double(d + incr as f64),
        },
    }
}

fn num_double(n: Num) -> f64 {
    match n {
        Num::Long(n) => n as f64,
        Num::Double(d) => d,
    }
}

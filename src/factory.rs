//! Expression construction.
//!
//! [`ExprFactory`] is the single place nodes are built.  It carries the
//! lexical class scope so `self::`/`parent::` resolve to concrete class
//! names at construction time while `static::` stays virtual, folds
//! constant string segments in append chains, and rejects malformed
//! l-value shapes before they can reach evaluation.

use std::cell::OnceCell;
use std::rc::Rc;

use log::debug;
use phf::phf_set;

use crate::error::{PhloxError, Result};
use crate::expr::{BinaryOp, CastKind, Expr, Location, UnaryOp};
use crate::value::Value;

/// Class names with scope-relative meaning; everything else is literal.
static RESERVED_CLASS_NAMES: phf::Set<&'static str> = phf_set! {
    "self",
    "parent",
    "static",
};

/// The lexical class a method body is being built inside.
#[derive(Debug, Clone)]
pub struct ClassScope {
    pub name: Rc<str>,
    pub parent: Option<Rc<str>>,
}

impl ClassScope {
    pub fn new(name: &str, parent: Option<&str>) -> Self {
        ClassScope {
            name: Rc::from(name),
            parent: parent.map(Rc::from),
        }
    }
}

/// Outcome of resolving a class reference at construction time.
enum ResolvedClass {
    Named(Rc<str>),
    Virtual,
}

#[derive(Debug, Default)]
pub struct ExprFactory {
    class_scope: Option<ClassScope>,
}

impl ExprFactory {
    pub fn new() -> Self {
        ExprFactory { class_scope: None }
    }

    pub fn with_class_scope(scope: ClassScope) -> Self {
        ExprFactory {
            class_scope: Some(scope),
        }
    }

    /// Swaps the lexical class scope, returning the previous one so a
    /// caller building nested declarations can restore it.
    pub fn set_class_scope(&mut self, scope: Option<ClassScope>) -> Option<ClassScope> {
        std::mem::replace(&mut self.class_scope, scope)
    }

    pub fn class_scope(&self) -> Option<&ClassScope> {
        self.class_scope.as_ref()
    }

    //
    // literals and simple reads
    //

    pub fn literal(&self, value: Value) -> Expr {
        Expr::Literal(value)
    }

    pub fn null_literal(&self) -> Expr {
        Expr::Literal(Value::Null)
    }

    pub fn bool_literal(&self, b: bool) -> Expr {
        Expr::Literal(Value::Bool(b))
    }

    pub fn long_literal(&self, n: i64) -> Expr {
        Expr::Literal(Value::Long(n))
    }

    pub fn double_literal(&self, d: f64) -> Expr {
        Expr::Literal(Value::Double(d))
    }

    pub fn string_literal(&self, s: &str) -> Expr {
        Expr::Literal(Value::string(s))
    }

    pub fn var(&self, name: &str) -> Expr {
        Expr::Var(Rc::from(name))
    }

    pub fn var_var(&self, name: Expr) -> Expr {
        Expr::VarVar(Box::new(name))
    }

    pub fn this(&self) -> Expr {
        Expr::This
    }

    //
    // container access
    //

    pub fn array_get(&self, location: Location, base: Expr, index: Expr) -> Expr {
        Expr::ArrayGet {
            location,
            base: Box::new(base),
            index: Box::new(index),
        }
    }

    pub fn array_tail(&self, location: Location, base: Expr) -> Expr {
        Expr::ArrayTail {
            location,
            base: Box::new(base),
        }
    }

    /// `base->name`; a `$this` base collapses into the dedicated
    /// receiver-field node.
    pub fn field_get(&self, base: Expr, name: &str) -> Expr {
        match base {
            Expr::This => Expr::ThisField(Rc::from(name)),
            base => Expr::ObjectField {
                base: Box::new(base),
                name: Rc::from(name),
            },
        }
    }

    /// `base->$name` with the field name computed at runtime.
    pub fn field_var_get(&self, base: Expr, name: Expr) -> Expr {
        match base {
            Expr::This => Expr::ThisFieldVar(Box::new(name)),
            base => Expr::ObjectFieldVar {
                base: Box::new(base),
                name: Box::new(name),
            },
        }
    }

    /// `A::$field`, with `self`/`parent` resolved against the lexical
    /// scope and `static` left for runtime resolution.
    pub fn class_field(&self, class: &str, field: &str, line: u32) -> Result<Expr> {
        match self.resolve_class_name(class, line)? {
            ResolvedClass::Named(class) => Ok(Expr::ClassField {
                class,
                field: Rc::from(field),
            }),
            ResolvedClass::Virtual => Ok(Expr::ClassVirtualField {
                field: Rc::from(field),
            }),
        }
    }

    pub fn class_var_field(&self, class: Expr, field: &str) -> Expr {
        Expr::ClassVarField {
            class: Box::new(class),
            field: Rc::from(field),
        }
    }

    /// `A::NAME` class constant, with `self`/`parent` resolved against
    /// the lexical scope and `static` left for runtime resolution.
    pub fn class_const(&self, class: &str, name: &str, line: u32) -> Result<Expr> {
        match self.resolve_class_name(class, line)? {
            ResolvedClass::Named(class) => Ok(Expr::ClassConst {
                class,
                name: Rc::from(name),
            }),
            ResolvedClass::Virtual => Ok(Expr::ClassVirtualConst {
                name: Rc::from(name),
            }),
        }
    }

    pub fn char_at(&self, base: Expr, index: Expr) -> Expr {
        Expr::CharAt {
            base: Box::new(base),
            index: Box::new(index),
        }
    }

    //
    // operators
    //

    pub fn binary(&self, op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn unary(&self, op: UnaryOp, expr: Expr) -> Expr {
        Expr::Unary {
            op,
            expr: Box::new(expr),
        }
    }

    /// Unary minus, folding numeric literals in place.
    pub fn minus(&self, expr: Expr) -> Expr {
        match expr {
            Expr::Literal(Value::Long(n)) => Expr::Literal(Value::Long(n.wrapping_neg())),
            Expr::Literal(Value::Double(d)) => Expr::Literal(Value::Double(-d)),
            expr => self.unary(UnaryOp::Minus, expr),
        }
    }

    pub fn not(&self, expr: Expr) -> Expr {
        self.unary(UnaryOp::Not, expr)
    }

    pub fn and(&self, left: Expr, right: Expr) -> Expr {
        Expr::And {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn or(&self, left: Expr, right: Expr) -> Expr {
        Expr::Or {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn xor(&self, left: Expr, right: Expr) -> Expr {
        Expr::Xor {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// `left . right`: nested append chains are spliced flat and adjacent
    /// constant segments are folded into one literal, so the runtime sees
    /// a single segment list with no constant-constant joins left in it.
    pub fn append(&self, left: Expr, right: Expr) -> Expr {
        let mut parts = Vec::new();

        Self::push_append(&mut parts, left);
        Self::push_append(&mut parts, right);

        if parts.len() == 1 {
            debug!("Append chain folded to a single segment");
            return match parts.pop() {
                Some(only) => only,
                None => self.string_literal(""),
            };
        }

        Expr::Append { parts }
    }

    fn push_append(parts: &mut Vec<Expr>, expr: Expr) {
        match expr {
            Expr::Append { parts: inner } => {
                for part in inner {
                    Self::push_append(parts, part);
                }
            }

            Expr::Literal(v) => {
                // fold into the previous segment when it is constant too
                if let Some(Expr::Literal(prev)) = parts.last_mut() {
                    let folded = format!("{}{}", prev.to_str(), v.to_str());
                    *prev = Value::string(folded);
                    return;
                }

                parts.push(Expr::Literal(v));
            }

            other => parts.push(other),
        }
    }

    pub fn cast(&self, kind: CastKind, expr: Expr) -> Expr {
        Expr::Cast {
            kind,
            expr: Box::new(expr),
        }
    }

    /// `expr instanceof A`.  `self`/`parent` resolve lexically; the
    /// late-bound `static` has no stable name here and is refused.
    pub fn instance_of(&self, expr: Expr, class: &str, line: u32) -> Result<Expr> {
        match self.resolve_class_name(class, line)? {
            ResolvedClass::Named(class) => Ok(Expr::InstanceOf {
                expr: Box::new(expr),
                class,
            }),
            ResolvedClass::Virtual => Err(PhloxError::factory(
                "cannot use 'static' as an instanceof target",
                line,
            )),
        }
    }

    pub fn instance_of_var(&self, expr: Expr, class: Expr) -> Expr {
        Expr::InstanceOfVar {
            expr: Box::new(expr),
            class: Box::new(class),
        }
    }

    pub fn conditional(&self, test: Expr, then: Expr, otherwise: Expr) -> Expr {
        Expr::Conditional {
            test: Box::new(test),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        }
    }

    pub fn conditional_short(&self, test: Expr, otherwise: Expr) -> Expr {
        Expr::ConditionalShort {
            test: Box::new(test),
            otherwise: Box::new(otherwise),
        }
    }

    pub fn pre_increment(&self, expr: Expr, incr: i64) -> Result<Expr> {
        if !expr.is_var() {
            return Err(PhloxError::factory(
                format!("{} is an invalid increment target", expr),
                expr.location().line,
            ));
        }

        Ok(Expr::PreIncrement {
            expr: Box::new(expr),
            incr,
        })
    }

    pub fn post_increment(&self, expr: Expr, incr: i64) -> Result<Expr> {
        if !expr.is_var() {
            return Err(PhloxError::factory(
                format!("{} is an invalid increment target", expr),
                expr.location().line,
            ));
        }

        Ok(Expr::PostIncrement {
            expr: Box::new(expr),
            incr,
        })
    }

    //
    // assignment, references, presence
    //

    /// `lhs = rhs`.  A suppressed target (`@$a = ...`) re-wraps the built
    /// assignment so suppression covers the whole store.
    pub fn assign(&self, lhs: Expr, rhs: Expr) -> Result<Expr> {
        if let Expr::Suppress(inner) = lhs {
            let assign = self.assign(*inner, rhs)?;
            return Ok(Expr::Suppress(Box::new(assign)));
        }

        if !lhs.is_var() {
            return Err(PhloxError::factory(
                format!("{} is an invalid left-hand side of an assignment", lhs),
                lhs.location().line,
            ));
        }

        Ok(Expr::Assign {
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    /// `lhs =& rhs`.  String offsets cannot hold references.
    pub fn assign_ref(&self, lhs: Expr, rhs: Expr) -> Result<Expr> {
        if let Expr::Suppress(inner) = lhs {
            let assign = self.assign_ref(*inner, rhs)?;
            return Ok(Expr::Suppress(Box::new(assign)));
        }

        if matches!(lhs, Expr::CharAt { .. }) {
            return Err(PhloxError::factory(
                "cannot assign a reference to a string offset",
                lhs.location().line,
            ));
        }

        if !lhs.is_var() {
            return Err(PhloxError::factory(
                format!("{} is an invalid left-hand side of an assignment", lhs),
                lhs.location().line,
            ));
        }

        Ok(Expr::AssignRef {
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    pub fn ref_to(&self, expr: Expr) -> Expr {
        Expr::Ref(Box::new(expr))
    }

    pub fn suppress(&self, expr: Expr) -> Expr {
        Expr::Suppress(Box::new(expr))
    }

    pub fn isset(&self, expr: Expr) -> Result<Expr> {
        if !expr.is_var() || !expr.can_read() {
            return Err(PhloxError::factory(
                format!("{} is an invalid isset() argument", expr),
                expr.location().line,
            ));
        }

        Ok(Expr::Isset(Box::new(expr)))
    }

    pub fn unset(&self, expr: Expr) -> Result<Expr> {
        if matches!(expr, Expr::CharAt { .. }) {
            return Err(PhloxError::factory(
                "cannot unset a string offset",
                expr.location().line,
            ));
        }

        if !expr.is_var() || !expr.can_read() {
            return Err(PhloxError::factory(
                format!("{} is an invalid unset() argument", expr),
                expr.location().line,
            ));
        }

        Ok(Expr::Unset(Box::new(expr)))
    }

    //
    // calls
    //

    /// `name(args)`.  `isset` is syntax, not a function: a single-argument
    /// `isset(x)` call builds the presence-test node instead.
    pub fn call(&self, location: Location, name: &str, args: Vec<Expr>) -> Result<Expr> {
        if name.eq_ignore_ascii_case("isset") && args.len() == 1 {
            let mut args = args;
            return self.isset(args.remove(0));
        }

        Ok(Expr::Call {
            location,
            name: Rc::from(name),
            args,
            fun_id: OnceCell::new(),
        })
    }

    pub fn call_var(&self, location: Location, name: Expr, args: Vec<Expr>) -> Expr {
        Expr::CallVar {
            location,
            name: Box::new(name),
            args,
        }
    }

    pub fn method_call(
        &self,
        location: Location,
        object: Expr,
        method: &str,
        args: Vec<Expr>,
    ) -> Expr {
        Expr::MethodCall {
            location,
            object: Box::new(object),
            method: Rc::from(method),
            args,
        }
    }

    pub fn method_call_var(
        &self,
        location: Location,
        object: Expr,
        method: Expr,
        args: Vec<Expr>,
    ) -> Expr {
        Expr::MethodCallVar {
            location,
            object: Box::new(object),
            method: Box::new(method),
            args,
        }
    }

    /// `A::method(args)`: `self`/`parent` become concrete names now,
    /// `static::method` stays a virtual call resolved per invocation.
    pub fn class_method_call(
        &self,
        location: Location,
        class: &str,
        method: &str,
        args: Vec<Expr>,
    ) -> Result<Expr> {
        match self.resolve_class_name(class, location.line)? {
            ResolvedClass::Named(class) => Ok(Expr::ClassMethodCall {
                location,
                class,
                method: Rc::from(method),
                args,
            }),
            ResolvedClass::Virtual => Ok(Expr::ClassVirtualMethodCall {
                location,
                method: Rc::from(method),
                args,
            }),
        }
    }

    pub fn class_var_method_call(
        &self,
        location: Location,
        class: Expr,
        method: &str,
        args: Vec<Expr>,
    ) -> Expr {
        Expr::ClassVarMethodCall {
            location,
            class: Box::new(class),
            method: Rc::from(method),
            args,
        }
    }

    /// `new A(args)`.  `self`/`parent` resolve lexically; `new static`
    /// is not supported and refused here.
    pub fn new_object(&self, location: Location, class: &str, args: Vec<Expr>) -> Result<Expr> {
        match self.resolve_class_name(class, location.line)? {
            ResolvedClass::Named(class) => Ok(Expr::New {
                location,
                class,
                args,
            }),
            ResolvedClass::Virtual => Err(PhloxError::factory(
                "cannot use 'static' as an instantiation target",
                location.line,
            )),
        }
    }

    pub fn new_object_var(&self, location: Location, class: Expr, args: Vec<Expr>) -> Expr {
        Expr::NewVar {
            location,
            class: Box::new(class),
            args,
        }
    }

    /// Resolves a class reference against the lexical class scope.
    /// Non-reserved names pass through untouched.
    fn resolve_class_name(&self, name: &str, line: u32) -> Result<ResolvedClass> {
        let lower = name.to_ascii_lowercase();

        if !RESERVED_CLASS_NAMES.contains(lower.as_str()) {
            return Ok(ResolvedClass::Named(Rc::from(name)));
        }

        let Some(scope) = &self.class_scope else {
            return Err(PhloxError::factory(
                format!("cannot use '{}' outside of a class", lower),
                line,
            ));
        };

        match lower.as_str() {
            "self" => {
                debug!("Resolving 'self' to '{}'", scope.name);
                Ok(ResolvedClass::Named(scope.name.clone()))
            }

            "parent" => match &scope.parent {
                Some(parent) => {
                    debug!("Resolving 'parent' to '{}'", parent);
                    Ok(ResolvedClass::Named(parent.clone()))
                }
                None => Err(PhloxError::factory(
                    format!("'{}' has no parent class", scope.name),
                    line,
                )),
            },

            _ => Ok(ResolvedClass::Virtual),
        }
    }
}

use std::cell::OnceCell;
use std::fmt;
use std::rc::Rc;

use serde::Serialize;

use crate::env::FunId;
use crate::value::Value;

/// Optional source position carried by nodes that report errors.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Location {
    pub file: Option<Rc<str>>,
    pub line: u32,
}

pub const UNKNOWN_LOCATION: Location = Location {
    file: None,
    line: 0,
};

impl Location {
    pub fn new(file: &str, line: u32) -> Self {
        Location {
            file: Some(Rc::from(file)),
            line,
        }
    }

    pub fn is_known(&self) -> bool {
        self.file.is_some() || self.line != 0
    }

    /// "file:line" prefix for diagnostics, when known.
    pub fn describe(&self) -> Option<String> {
        match &self.file {
            Some(file) => Some(format!("{}:{}", file, self.line)),
            None if self.line != 0 => Some(format!("line {}", self.line)),
            None => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Lt,
    Leq,
    Gt,
    Geq,
    Eq,
    Neq,
    Same,
    NotSame,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnaryOp {
    Minus,
    Plus,
    Not,
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CastKind {
    Bool,
    Long,
    Double,
    Str,
    Array,
    Object,
}

/// A PHP expression node.  Built once by [`crate::factory::ExprFactory`],
/// logically immutable afterwards; the only runtime mutation is the
/// write-once function-id cache on `Call`.  All execution state lives in
/// the [`crate::env::Env`] passed to the evaluation entry points.
#[derive(Debug, Clone, Serialize)]
pub enum Expr {
    // A scalar literal: null, bool, long, double, string
    Literal(#[serde(serialize_with = "crate::value::serialize_literal")] Value),

    // $a
    Var(Rc<str>),

    // $$a, name computed at runtime
    VarVar(Box<Expr>),

    // $this
    This,

    // $this->name
    ThisField(Rc<str>),

    // $this->$name
    ThisFieldVar(Box<Expr>),

    // $a[i]
    ArrayGet {
        location: Location,
        base: Box<Expr>,
        index: Box<Expr>,
    },

    // $a[], write-only tail append
    ArrayTail {
        location: Location,
        base: Box<Expr>,
    },

    // $a->name
    ObjectField {
        base: Box<Expr>,
        name: Rc<str>,
    },

    // $a->$name
    ObjectFieldVar {
        base: Box<Expr>,
        name: Box<Expr>,
    },

    // A::$name, self/parent already resolved by the factory
    ClassField {
        class: Rc<str>,
        field: Rc<str>,
    },

    // $cls::$name
    ClassVarField {
        class: Box<Expr>,
        field: Rc<str>,
    },

    // static::$name, late static binding
    ClassVirtualField {
        field: Rc<str>,
    },

    // A::NAME, self/parent already resolved by the factory
    ClassConst {
        class: Rc<str>,
        name: Rc<str>,
    },

    // static::NAME, resolved against the runtime called class
    ClassVirtualConst {
        name: Rc<str>,
    },

    // $a{i}, string character access
    CharAt {
        base: Box<Expr>,
        index: Box<Expr>,
    },

    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },

    // Short-circuit logical operators
    And {
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Or {
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Xor {
        left: Box<Expr>,
        right: Box<Expr>,
    },

    // "a" . $b . "c", flat segment list, evaluated left to right into
    // one buffer
    Append {
        parts: Vec<Expr>,
    },

    Cast {
        kind: CastKind,
        expr: Box<Expr>,
    },

    InstanceOf {
        expr: Box<Expr>,
        class: Rc<str>,
    },
    InstanceOfVar {
        expr: Box<Expr>,
        class: Box<Expr>,
    },

    // test ? then : otherwise
    Conditional {
        test: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },

    // test ?: otherwise
    ConditionalShort {
        test: Box<Expr>,
        otherwise: Box<Expr>,
    },

    PreIncrement {
        expr: Box<Expr>,
        incr: i64,
    },
    PostIncrement {
        expr: Box<Expr>,
        incr: i64,
    },

    // lhs = rhs
    Assign {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },

    // lhs =& rhs
    AssignRef {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },

    // &expr
    Ref(Box<Expr>),

    // @expr, error suppression
    Suppress(Box<Expr>),

    Isset(Box<Expr>),
    Unset(Box<Expr>),

    // name(args), free function, id memoized after first resolution
    Call {
        location: Location,
        name: Rc<str>,
        args: Vec<Expr>,
        #[serde(skip)]
        fun_id: OnceCell<FunId>,
    },

    // $name(args), callee name computed at runtime
    CallVar {
        location: Location,
        name: Box<Expr>,
        args: Vec<Expr>,
    },

    // $obj->method(args)
    MethodCall {
        location: Location,
        object: Box<Expr>,
        method: Rc<str>,
        args: Vec<Expr>,
    },

    // $obj->$method(args)
    MethodCallVar {
        location: Location,
        object: Box<Expr>,
        method: Box<Expr>,
        args: Vec<Expr>,
    },

    // A::method(args), self/parent already resolved by the factory
    ClassMethodCall {
        location: Location,
        class: Rc<str>,
        method: Rc<str>,
        args: Vec<Expr>,
    },

    // $cls::method(args)
    ClassVarMethodCall {
        location: Location,
        class: Box<Expr>,
        method: Rc<str>,
        args: Vec<Expr>,
    },

    // static::method(args), resolved against the runtime called class
    ClassVirtualMethodCall {
        location: Location,
        method: Rc<str>,
        args: Vec<Expr>,
    },

    // new A(args)
    New {
        location: Location,
        class: Rc<str>,
        args: Vec<Expr>,
    },

    // new $cls(args)
    NewVar {
        location: Location,
        class: Box<Expr>,
        args: Vec<Expr>,
    },
}

impl Expr {
    /// Returns the node's source location, unknown for nodes that do not
    /// carry one.
    pub fn location(&self) -> &Location {
        match self {
            Expr::ArrayGet { location, .. }
            | Expr::ArrayTail { location, .. }
            | Expr::Call { location, .. }
            | Expr::CallVar { location, .. }
            | Expr::MethodCall { location, .. }
            | Expr::MethodCallVar { location, .. }
            | Expr::ClassMethodCall { location, .. }
            | Expr::ClassVarMethodCall { location, .. }
            | Expr::ClassVirtualMethodCall { location, .. }
            | Expr::New { location, .. }
            | Expr::NewVar { location, .. } => location,
            _ => &UNKNOWN_LOCATION,
        }
    }

    //
    // capability tags
    //

    /// True for a single literal node.
    pub fn is_literal(&self) -> bool {
        matches!(self, Expr::Literal(_))
    }

    /// True when the value is known at construction time.
    pub fn is_constant(&self) -> bool {
        match self {
            Expr::Literal(_) => true,
            Expr::Append { parts } => parts.iter().all(Expr::is_constant),
            _ => false,
        }
    }

    /// True if a statically known true value.
    pub fn is_true(&self) -> bool {
        matches!(self, Expr::Literal(v) if matches!(v, Value::Bool(true)))
    }

    /// True if a statically known false value.
    pub fn is_false(&self) -> bool {
        matches!(self, Expr::Literal(v) if matches!(v, Value::Bool(false)))
    }

    /// True for nodes that can appear as an assignment target.  Every node
    /// answering true implements the full l-value protocol.
    pub fn is_var(&self) -> bool {
        matches!(
            self,
            Expr::Var(_)
                | Expr::VarVar(_)
                | Expr::This
                | Expr::ThisField(_)
                | Expr::ThisFieldVar(_)
                | Expr::ArrayGet { .. }
                | Expr::ArrayTail { .. }
                | Expr::ObjectField { .. }
                | Expr::ObjectFieldVar { .. }
                | Expr::ClassField { .. }
                | Expr::ClassVarField { .. }
                | Expr::ClassVirtualField { .. }
                | Expr::CharAt { .. }
        )
    }

    /// True for an explicit reference node (&$a).
    pub fn is_ref(&self) -> bool {
        matches!(self, Expr::Ref(_))
    }

    /// True for an expression that can be read ($a[] is write-only).
    pub fn can_read(&self) -> bool {
        !matches!(self, Expr::ArrayTail { .. })
    }

    //
    // scalar type hints, used by constant folding and coercion shortcuts
    //

    pub fn is_boolean(&self) -> bool {
        match self {
            Expr::Literal(Value::Bool(_)) => true,
            Expr::Cast { kind, .. } => *kind == CastKind::Bool,
            Expr::Unary { op, .. } => *op == UnaryOp::Not,
            Expr::Binary { op, .. } => matches!(
                op,
                BinaryOp::Lt
                    | BinaryOp::Leq
                    | BinaryOp::Gt
                    | BinaryOp::Geq
                    | BinaryOp::Eq
                    | BinaryOp::Neq
                    | BinaryOp::Same
                    | BinaryOp::NotSame
            ),
            Expr::And { .. } | Expr::Or { .. } | Expr::Xor { .. } => true,
            Expr::InstanceOf { .. } | Expr::InstanceOfVar { .. } => true,
            Expr::Isset(_) => true,
            _ => false,
        }
    }

    pub fn is_long(&self) -> bool {
        match self {
            Expr::Literal(Value::Long(_)) => true,
            Expr::Cast { kind, .. } => *kind == CastKind::Long,
            _ => false,
        }
    }

    pub fn is_double(&self) -> bool {
        match self {
            Expr::Literal(Value::Double(_)) => true,
            Expr::Cast { kind, .. } => *kind == CastKind::Double,
            _ => false,
        }
    }

    pub fn is_number(&self) -> bool {
        self.is_long() || self.is_double()
    }

    pub fn is_string(&self) -> bool {
        match self {
            Expr::Literal(Value::Str(_)) => true,
            Expr::Append { .. } => true,
            Expr::Cast { kind, .. } => *kind == CastKind::Str,
            _ => false,
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Expr::Cast { kind, .. } if *kind == CastKind::Array)
    }

    //
    // constant introspection
    //

    /// The literal value, for literal nodes.
    pub fn literal_value(&self) -> Option<&Value> {
        match self {
            Expr::Literal(v) => Some(v),
            _ => None,
        }
    }

    /// First segment of an append chain if it is a literal; the literal
    /// itself for literal nodes.  Used by constant-prefix optimizations.
    pub fn constant_prefix(&self) -> Option<&Value> {
        match self {
            Expr::Literal(v) => Some(v),
            Expr::Append { parts } => parts.first().and_then(Expr::literal_value),
            _ => None,
        }
    }

    /// Last segment of an append chain if it is a literal.
    pub fn constant_suffix(&self) -> Option<&Value> {
        match self {
            Expr::Literal(v) => Some(v),
            Expr::Append { parts } => parts.last().and_then(Expr::literal_value),
            _ => None,
        }
    }
}

fn fmt_args(f: &mut fmt::Formatter<'_>, args: &[Expr]) -> fmt::Result {
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", arg)?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    /// PHP-ish rendition of the node, used in diagnostics.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(v) => match v {
                Value::Null => write!(f, "null"),
                Value::Bool(b) => write!(f, "{}", b),
                Value::Str(s) => write!(f, "\"{}\"", s),
                other => write!(f, "{}", other),
            },

            Expr::Var(name) => write!(f, "${}", name),

            Expr::VarVar(name) => write!(f, "${{{}}}", name),

            Expr::This => write!(f, "$this"),

            Expr::ThisField(name) => write!(f, "$this->{}", name),

            Expr::ThisFieldVar(name) => write!(f, "$this->{{{}}}", name),

            Expr::ArrayGet { base, index, .. } => write!(f, "{}[{}]", base, index),

            Expr::ArrayTail { base, .. } => write!(f, "{}[]", base),

            Expr::ObjectField { base, name } => write!(f, "{}->{}", base, name),

            Expr::ObjectFieldVar { base, name } => write!(f, "{}->{{{}}}", base, name),

            Expr::ClassField { class, field } => write!(f, "{}::${}", class, field),

            Expr::ClassVarField { class, field } => write!(f, "{}::${}", class, field),

            Expr::ClassVirtualField { field } => write!(f, "static::${}", field),

            Expr::ClassConst { class, name } => write!(f, "{}::{}", class, name),

            Expr::ClassVirtualConst { name } => write!(f, "static::{}", name),

            Expr::CharAt { base, index } => write!(f, "{}{{{}}}", base, index),

            Expr::Binary { op, left, right } => {
                let op_str = match op {
                    BinaryOp::Add => "+",
                    BinaryOp::Sub => "-",
                    BinaryOp::Mul => "*",
                    BinaryOp::Div => "/",
                    BinaryOp::Mod => "%",
                    BinaryOp::BitAnd => "&",
                    BinaryOp::BitOr => "|",
                    BinaryOp::BitXor => "^",
                    BinaryOp::Shl => "<<",
                    BinaryOp::Shr => ">>",
                    BinaryOp::Lt => "<",
                    BinaryOp::Leq => "<=",
                    BinaryOp::Gt => ">",
                    BinaryOp::Geq => ">=",
                    BinaryOp::Eq => "==",
                    BinaryOp::Neq => "!=",
                    BinaryOp::Same => "===",
                    BinaryOp::NotSame => "!==",
                };
                write!(f, "({} {} {})", left, op_str, right)
            }

            Expr::Unary { op, expr } => {
                let op_str = match op {
                    UnaryOp::Minus => "-",
                    UnaryOp::Plus => "+",
                    UnaryOp::Not => "!",
                    UnaryOp::BitNot => "~",
                };
                write!(f, "{}{}", op_str, expr)
            }

            Expr::And { left, right } => write!(f, "({} && {})", left, right),
            Expr::Or { left, right } => write!(f, "({} || {})", left, right),
            Expr::Xor { left, right } => write!(f, "({} xor {})", left, right),

            Expr::Append { parts } => {
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        write!(f, " . ")?;
                    }
                    write!(f, "{}", part)?;
                }
                Ok(())
            }

            Expr::Cast { kind, expr } => {
                let kind_str = match kind {
                    CastKind::Bool => "bool",
                    CastKind::Long => "int",
                    CastKind::Double => "float",
                    CastKind::Str => "string",
                    CastKind::Array => "array",
                    CastKind::Object => "object",
                };
                write!(f, "({}) {}", kind_str, expr)
            }

            Expr::InstanceOf { expr, class } => {
                write!(f, "({} instanceof {})", expr, class)
            }

            Expr::InstanceOfVar { expr, class } => {
                write!(f, "({} instanceof {})", expr, class)
            }

            Expr::Conditional {
                test,
                then,
                otherwise,
            } => write!(f, "({} ? {} : {})", test, then, otherwise),

            Expr::ConditionalShort { test, otherwise } => {
                write!(f, "({} ?: {})", test, otherwise)
            }

            Expr::PreIncrement { expr, incr } => {
                write!(f, "{}{}", if *incr > 0 { "++" } else { "--" }, expr)
            }

            Expr::PostIncrement { expr, incr } => {
                write!(f, "{}{}", expr, if *incr > 0 { "++" } else { "--" })
            }

            Expr::Assign { lhs, rhs } => write!(f, "{} = {}", lhs, rhs),

            Expr::AssignRef { lhs, rhs } => write!(f, "{} =& {}", lhs, rhs),

            Expr::Ref(expr) => write!(f, "&{}", expr),

            Expr::Suppress(expr) => write!(f, "@{}", expr),

            Expr::Isset(expr) => write!(f, "isset({})", expr),

            Expr::Unset(expr) => write!(f, "unset({})", expr),

            Expr::Call { name, args, .. } => {
                write!(f, "{}(", name)?;
                fmt_args(f, args)?;
                write!(f, ")")
            }

            Expr::CallVar { name, args, .. } => {
                write!(f, "{}(", name)?;
                fmt_args(f, args)?;
                write!(f, ")")
            }

            Expr::MethodCall {
                object,
                method,
                args,
                ..
            } => {
                write!(f, "{}->{}(", object, method)?;
                fmt_args(f, args)?;
                write!(f, ")")
            }

            Expr::MethodCallVar {
                object,
                method,
                args,
                ..
            } => {
                write!(f, "{}->{{{}}}(", object, method)?;
                fmt_args(f, args)?;
                write!(f, ")")
            }

            Expr::ClassMethodCall {
                class,
                method,
                args,
                ..
            } => {
                write!(f, "{}::{}(", class, method)?;
                fmt_args(f, args)?;
                write!(f, ")")
            }

            Expr::ClassVarMethodCall {
                class,
                method,
                args,
                ..
            } => {
                write!(f, "{}::{}(", class, method)?;
                fmt_args(f, args)?;
                write!(f, ")")
            }

            Expr::ClassVirtualMethodCall { method, args, .. } => {
                write!(f, "static::{}(", method)?;
                fmt_args(f, args)?;
                write!(f, ")")
            }

            Expr::New { class, args, .. } => {
                write!(f, "new {}(", class)?;
                fmt_args(f, args)?;
                write!(f, ")")
            }

            Expr::NewVar { class, args, .. } => {
                write!(f, "new {{{}}}(", class)?;
                fmt_args(f, args)?;
                write!(f, ")")
            }
        }
    }
}

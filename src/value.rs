use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

use crate::env::{ClassDef, Env};
use crate::var::Var;

/// A PHP runtime value.  Scalars are plain; arrays and objects are
/// heap-allocated handles.  Arrays copy deep on `copy()` (assignment
/// semantics), objects share the handle (PHP5 object semantics).
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Long(i64),
    Double(f64),
    Str(Rc<str>),
    Array(Rc<RefCell<ArrayData>>),
    Object(Rc<RefCell<ObjectData>>),
}

/// Normalized array key.  Integral strings collapse to `Long`, the way PHP
/// array keys do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArrayKey {
    Long(i64),
    Str(Rc<str>),
}

/// Insertion-ordered array storage.  Every slot is a [`Var`] so references
/// into array elements ($b =& $a['x']) alias the slot itself.
#[derive(Debug, Default)]
pub struct ArrayData {
    entries: Vec<(ArrayKey, Var)>,
    next_index: i64,
}

#[derive(Debug)]
pub struct ObjectData {
    pub class: Rc<ClassDef>,
    fields: Vec<(Rc<str>, Var)>,
}

impl ArrayData {
    pub fn new() -> Self {
        ArrayData::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &ArrayKey) -> Option<&Var> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains(&self, key: &ArrayKey) -> bool {
        self.get(key).is_some()
    }

    /// Returns the slot for `key`, creating a null slot if absent.
    pub fn entry_var(&mut self, key: ArrayKey) -> Var {
        if let Some(var) = self.get(&key) {
            return var.clone();
        }

        let var = Var::new(Value::Null);

        if let ArrayKey::Long(n) = key {
            if n >= self.next_index {
                self.next_index = n + 1;
            }
        }

        self.entries.push((key, var.clone()));

        var
    }

    /// Appends a fresh null slot at the next integer index ($a[] = ...).
    pub fn append_var(&mut self) -> Var {
        let key = ArrayKey::Long(self.next_index);
        self.next_index += 1;

        let var = Var::new(Value::Null);
        self.entries.push((key, var.clone()));

        var
    }

    pub fn put(&mut self, key: ArrayKey, value: Value) {
        self.entry_var(key).set(value);
    }

    /// Replaces (or creates) the slot for `key` with an aliased cell.
    pub fn put_var(&mut self, key: ArrayKey, var: Var) {
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = var;
            return;
        }

        if let ArrayKey::Long(n) = key {
            if n >= self.next_index {
                self.next_index = n + 1;
            }
        }

        self.entries.push((key, var));
    }

    /// Appends an existing cell at the next integer index ($a[] =& $b).
    pub fn append_slot(&mut self, var: Var) {
        let key = ArrayKey::Long(self.next_index);
        self.next_index += 1;
        self.entries.push((key, var));
    }

    pub fn remove(&mut self, key: &ArrayKey) -> Option<Value> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        let (_, var) = self.entries.remove(pos);
        Some(var.get())
    }

    pub fn iter(&self) -> impl Iterator<Item = &(ArrayKey, Var)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> Vec<ArrayKey> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }
}

impl ObjectData {
    pub fn new(class: Rc<ClassDef>) -> Self {
        ObjectData {
            class,
            fields: Vec::new(),
        }
    }

    pub fn get_field(&self, name: &str) -> Option<&Var> {
        self.fields
            .iter()
            .find(|(n, _)| n.as_ref() == name)
            .map(|(_, v)| v)
    }

    /// Returns the named field slot, creating a null slot if absent.
    pub fn field_var(&mut self, name: &str) -> Var {
        if let Some(var) = self.get_field(name) {
            return var.clone();
        }

        let var = Var::new(Value::Null);
        self.fields.push((Rc::from(name), var.clone()));

        var
    }

    pub fn put_field(&mut self, name: &str, value: Value) {
        self.field_var(name).set(value);
    }

    pub fn put_field_var(&mut self, name: &str, var: Var) {
        if let Some(entry) = self.fields.iter_mut().find(|(n, _)| n.as_ref() == name) {
            entry.1 = var;
            return;
        }

        self.fields.push((Rc::from(name), var));
    }

    pub fn remove_field(&mut self, name: &str) {
        self.fields.retain(|(n, _)| n.as_ref() != name);
    }

    pub fn field_names(&self) -> Vec<Rc<str>> {
        self.fields.iter().map(|(n, _)| n.clone()).collect()
    }
}

/// Numeric view used by arithmetic coercion.
#[derive(Debug, Clone, Copy)]
pub enum Num {
    Long(i64),
    Double(f64),
}

impl Value {
    pub fn new_array() -> Value {
        Value::Array(Rc::new(RefCell::new(ArrayData::new())))
    }

    pub fn new_object(class: Rc<ClassDef>) -> Value {
        Value::Object(Rc::new(RefCell::new(ObjectData::new(class))))
    }

    pub fn string<S: AsRef<str>>(s: S) -> Value {
        Value::Str(Rc::from(s.as_ref()))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Value::Array(_))
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Value::Object(_))
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Value::Str(_))
    }

    /// isset() semantics: set and not null.
    pub fn is_set(&self) -> bool {
        !self.is_null()
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "boolean",
            Value::Long(_) => "integer",
            Value::Double(_) => "double",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    pub fn to_boolean(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Long(n) => *n != 0,
            Value::Double(d) => *d != 0.0,
            Value::Str(s) => !s.is_empty() && s.as_ref() != "0",
            Value::Array(a) => !a.borrow().is_empty(),
            Value::Object(_) => true,
        }
    }

    pub fn to_long(&self) -> i64 {
        match self {
            Value::Null => 0,
            Value::Bool(b) => *b as i64,
            Value::Long(n) => *n,
            Value::Double(d) => *d as i64,
            Value::Str(s) => leading_double(s) as i64,
            Value::Array(a) => {
                if a.borrow().is_empty() {
                    0
                } else {
                    1
                }
            }
            Value::Object(_) => 1,
        }
    }

    pub fn to_double(&self) -> f64 {
        match self {
            Value::Null => 0.0,
            Value::Bool(b) => *b as i64 as f64,
            Value::Long(n) => *n as f64,
            Value::Double(d) => *d,
            Value::Str(s) => leading_double(s),
            Value::Array(a) => {
                if a.borrow().is_empty() {
                    0.0
                } else {
                    1.0
                }
            }
            Value::Object(_) => 1.0,
        }
    }

    /// PHP string conversion.  Null and false become the empty string,
    /// true becomes "1", whole doubles print without a fractional part.
    pub fn to_str(&self) -> Rc<str> {
        match self {
            Value::Null => Rc::from(""),
            Value::Bool(false) => Rc::from(""),
            Value::Bool(true) => Rc::from("1"),
            Value::Long(n) => {
                let mut buf = itoa::Buffer::new();
                Rc::from(buf.format(*n))
            }
            Value::Double(d) => {
                if d.fract() == 0.0 && d.abs() < 1e15 {
                    let mut buf = itoa::Buffer::new();
                    Rc::from(buf.format(*d as i64))
                } else {
                    Rc::from(format!("{}", d).as_str())
                }
            }
            Value::Str(s) => s.clone(),
            Value::Array(_) => Rc::from("Array"),
            Value::Object(_) => Rc::from("Object"),
        }
    }

    /// Numeric view for arithmetic.  Strings pick double when they carry a
    /// fractional or exponent part, long otherwise.
    pub fn to_num(&self) -> Num {
        match self {
            Value::Double(d) => Num::Double(*d),
            Value::Str(s) => leading_num(s),
            other => Num::Long(other.to_long()),
        }
    }

    /// Normalizes a value into an array key.
    pub fn to_array_key(&self) -> ArrayKey {
        match self {
            Value::Null => ArrayKey::Str(Rc::from("")),
            Value::Bool(b) => ArrayKey::Long(*b as i64),
            Value::Long(n) => ArrayKey::Long(*n),
            Value::Double(d) => ArrayKey::Long(*d as i64),
            Value::Str(s) => {
                if is_integral(s) {
                    ArrayKey::Long(s.parse().unwrap_or(0))
                } else {
                    ArrayKey::Str(s.clone())
                }
            }
            other => ArrayKey::Str(other.to_str()),
        }
    }

    /// Assignment copy.  Arrays duplicate every slot; objects and scalars
    /// keep their handle.  A self-referential array copies to an array
    /// whose cycle slot points at the copy.
    pub fn copy(&self) -> Value {
        self.copy_seen(&mut Vec::new())
    }

    fn copy_seen(&self, seen: &mut Vec<(*const RefCell<ArrayData>, Value)>) -> Value {
        match self {
            Value::Array(a) => {
                let ptr = Rc::as_ptr(a);
                if let Some((_, copied)) = seen.iter().find(|(p, _)| *p == ptr) {
                    return copied.clone();
                }

                let dst = Rc::new(RefCell::new(ArrayData::new()));
                seen.push((ptr, Value::Array(dst.clone())));

                let src = a.borrow();
                for (key, var) in src.iter() {
                    let value = var.get().copy_seen(seen);
                    dst.borrow_mut().put(key.clone(), value);
                }
                dst.borrow_mut().next_index = src.next_index;

                Value::Array(dst)
            }
            other => other.clone(),
        }
    }

    /// Container/string read: array index, string offset, null otherwise.
    pub fn get(&self, key: &Value) -> Value {
        match self {
            Value::Array(a) => a
                .borrow()
                .get(&key.to_array_key())
                .map(|v| v.get())
                .unwrap_or(Value::Null),
            Value::Str(s) => char_at(s, key.to_long()),
            _ => Value::Null,
        }
    }

    /// Object field read; null when absent or not an object.
    pub fn get_field(&self, name: &str) -> Value {
        match self {
            Value::Object(o) => o
                .borrow()
                .get_field(name)
                .map(|v| v.get())
                .unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }

    pub fn as_array(&self) -> Option<&Rc<RefCell<ArrayData>>> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Rc<RefCell<ObjectData>>> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// `instanceof` test against a class name, walking the parent chain.
    pub fn is_a(&self, env: &Env, class_name: &str) -> bool {
        match self {
            Value::Object(o) => env.is_a(&o.borrow().class, class_name),
            _ => false,
        }
    }

    /// Loose (==) comparison with PHP coercion across types.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(_), _) | (_, Value::Bool(_)) => {
                self.to_boolean() == other.to_boolean()
            }
            (Value::Null, Value::Str(s)) | (Value::Str(s), Value::Null) => {
                // null compares as "" against strings, so null != "0"
                s.is_empty()
            }
            (Value::Null, _) | (_, Value::Null) => {
                // null == 0 and null == empty array
                !other.to_boolean() && !self.to_boolean()
            }
            (Value::Str(a), Value::Str(b)) => {
                if is_numeric(a) && is_numeric(b) {
                    leading_double(a) == leading_double(b)
                } else {
                    a == b
                }
            }
            (Value::Array(a), Value::Array(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len()
                    && a.iter().all(|(k, v)| {
                        b.get(k).is_some_and(|bv| v.get().loose_eq(&bv.get()))
                    })
            }
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Array(_), _) | (_, Value::Array(_)) => false,
            (Value::Object(_), _) | (_, Value::Object(_)) => false,
            _ => self.to_double() == other.to_double(),
        }
    }

    /// Strict (===) comparison: type identity plus value identity.
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len()
                    && a.iter().zip(b.iter()).all(|((ka, va), (kb, vb))| {
                        ka == kb && va.get().same(&vb.get())
                    })
            }
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Ordering for the relational operators.
    pub fn cmp_values(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) if !is_numeric(a) || !is_numeric(b) => {
                a.as_ref().cmp(b.as_ref())
            }
            (Value::Array(a), Value::Array(b)) => {
                a.borrow().len().cmp(&b.borrow().len())
            }
            _ => self
                .to_double()
                .partial_cmp(&other.to_double())
                .unwrap_or(Ordering::Equal),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_str())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

fn char_at(s: &str, index: i64) -> Value {
    if index < 0 {
        return Value::Null;
    }

    match s.as_bytes().get(index as usize) {
        Some(&b) => Value::string((b as char).to_string()),
        None => Value::Null,
    }
}

/// The leading numeric prefix of a string and whether it carries a
/// fractional or exponent part.
fn numeric_prefix(s: &str) -> (&str, bool) {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;
    let mut seen_digit = false;
    let mut seen_dot = false;
    let mut seen_exp = false;

    while end < bytes.len() {
        let c = bytes[end] as char;
        match c {
            '0'..='9' => seen_digit = true,
            '+' | '-' if end == 0 => {}
            '+' | '-' if seen_exp && matches!(bytes[end - 1] as char, 'e' | 'E') => {}
            '.' if !seen_dot && !seen_exp => seen_dot = true,
            'e' | 'E' if seen_digit && !seen_exp => seen_exp = true,
            _ => break,
        }
        end += 1;
    }

    // back off a trailing exponent marker with no digits after it
    while end > 0
        && matches!(bytes[end - 1] as char, 'e' | 'E' | '+' | '-' | '.')
        && s[..end].parse::<f64>().is_err()
    {
        end -= 1;
    }

    let prefix = &s[..end];
    let fractional = prefix.contains('.') || prefix.contains('e') || prefix.contains('E');

    (prefix, fractional)
}

/// Parses the leading numeric prefix of a string, PHP-style.
pub fn leading_double(s: &str) -> f64 {
    numeric_prefix(s).0.parse().unwrap_or(0.0)
}

/// Numeric view of a string: long unless the prefix has a fractional or
/// exponent part.
pub(crate) fn leading_num(s: &str) -> Num {
    let (prefix, fractional) = numeric_prefix(s);

    if fractional {
        Num::Double(prefix.parse().unwrap_or(0.0))
    } else {
        Num::Long(prefix.parse().unwrap_or(0))
    }
}

/// True if the whole string is numeric (used by loose string comparison).
pub fn is_numeric(s: &str) -> bool {
    let t = s.trim();
    !t.is_empty() && t.parse::<f64>().is_ok()
}

/// True if the string is a canonical integer (array-key normalization).
fn is_integral(s: &str) -> bool {
    if s.is_empty() || s == "-" {
        return false;
    }

    let digits = s.strip_prefix('-').unwrap_or(s);

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }

    // reject non-canonical forms like "01" so they stay string keys
    if digits.len() > 1 && digits.starts_with('0') {
        return false;
    }

    s.parse::<i64>().is_ok()
}

/// Serializes a literal's value as its display form, for AST dumps.
pub(crate) fn serialize_literal<S>(value: &Value, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.collect_str(&format_args!("{}:{}", value.type_name(), value))
}

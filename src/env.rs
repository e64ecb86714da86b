use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::error::{PhloxError, Result};
use crate::expr::{Expr, Location};
use crate::value::Value;
use crate::var::Var;

/// Dense function identifier, memoized on call nodes after first lookup.
pub type FunId = usize;

/// Hard limit on guest call nesting; overflowing it is a fatal error.
const MAX_CALL_DEPTH: usize = 512;

pub type NativeFn = fn(&mut Env, &[Value]) -> Result<Value>;

/// A declared parameter.  `by_ref` parameters bind the caller's cell
/// directly; others receive a copied value.
#[derive(Debug, Clone)]
pub struct Param {
    pub name: Rc<str>,
    pub by_ref: bool,
    pub default: Option<Value>,
}

impl Param {
    pub fn new(name: &str) -> Self {
        Param {
            name: Rc::from(name),
            by_ref: false,
            default: None,
        }
    }

    pub fn by_ref(name: &str) -> Self {
        Param {
            name: Rc::from(name),
            by_ref: true,
            default: None,
        }
    }

    pub fn with_default(name: &str, default: Value) -> Self {
        Param {
            name: Rc::from(name),
            by_ref: false,
            default: Some(default),
        }
    }
}

/// A callable body: a native hook or a single guest expression.
/// Statement bodies live outside this crate.
#[derive(Debug)]
pub enum FunctionBody {
    Native(NativeFn),
    Expr(Rc<Expr>),
}

#[derive(Debug)]
pub struct Function {
    pub name: Rc<str>,
    pub params: Vec<Param>,
    pub body: FunctionBody,
}

impl Function {
    pub fn native(name: &str, params: Vec<Param>, f: NativeFn) -> Self {
        Function {
            name: Rc::from(name),
            params,
            body: FunctionBody::Native(f),
        }
    }

    pub fn from_expr(name: &str, params: Vec<Param>, body: Expr) -> Self {
        Function {
            name: Rc::from(name),
            params,
            body: FunctionBody::Expr(Rc::new(body)),
        }
    }
}

/// Runtime class descriptor.  Method keys are lowercased: PHP method
/// names are case-insensitive.
#[derive(Debug)]
pub struct ClassDef {
    pub name: Rc<str>,
    pub parent: Option<Rc<str>>,
    methods: HashMap<String, Rc<Function>>,
    pub fields: Vec<(Rc<str>, Value)>,
    static_fields: RefCell<HashMap<String, Var>>,
    constants: HashMap<String, Value>,
}

impl ClassDef {
    pub fn new(name: &str, parent: Option<&str>) -> Self {
        ClassDef {
            name: Rc::from(name),
            parent: parent.map(Rc::from),
            methods: HashMap::new(),
            fields: Vec::new(),
            static_fields: RefCell::new(HashMap::new()),
            constants: HashMap::new(),
        }
    }

    pub fn add_method(&mut self, fun: Function) {
        self.methods.insert(fun.name.to_lowercase(), Rc::new(fun));
    }

    pub fn add_field(&mut self, name: &str, default: Value) {
        self.fields.push((Rc::from(name), default));
    }

    pub fn add_constant(&mut self, name: &str, value: Value) {
        self.constants.insert(name.to_string(), value);
    }

    /// Own-class method lookup; inheritance is resolved by
    /// [`Env::find_method`].
    pub fn method(&self, name: &str) -> Option<Rc<Function>> {
        self.methods.get(&name.to_lowercase()).cloned()
    }

    /// Returns the named static field slot, creating a null slot if absent.
    pub fn static_field_var(&self, name: &str) -> Var {
        let mut fields = self.static_fields.borrow_mut();

        fields
            .entry(name.to_string())
            .or_insert_with(|| Var::new(Value::Null))
            .clone()
    }

    /// Rebinds a static field slot to an aliased cell.
    pub fn put_static_var(&self, name: &str, var: Var) {
        self.static_fields.borrow_mut().insert(name.to_string(), var);
    }

    /// Non-vivifying static field read, for presence probes.
    pub fn static_field(&self, name: &str) -> Option<Value> {
        self.static_fields.borrow().get(name).map(|var| var.get())
    }

    /// Own-class constant lookup; inheritance is resolved by
    /// [`Env::find_constant`].
    pub fn constant(&self, name: &str) -> Option<Value> {
        self.constants.get(name).cloned()
    }
}

/// One entry of call-stack bookkeeping, kept for stack traces and
/// timeout accounting.
#[derive(Debug, Clone)]
pub struct CallFrame {
    pub name: String,
    pub location: Location,
}

impl CallFrame {
    pub fn new(name: &str, location: &Location) -> Self {
        CallFrame {
            name: name.to_string(),
            location: location.clone(),
        }
    }
}

/// Per-execution evaluation context.  Nodes are immutable and shareable;
/// everything mutable about a single run lives here.
pub struct Env {
    scopes: Vec<HashMap<String, Var>>,
    this: Option<Value>,
    calling_class: Option<Rc<str>>,

    functions: Vec<Rc<Function>>,
    function_ids: HashMap<String, FunId>,
    classes: HashMap<String, Rc<ClassDef>>,

    call_stack: Vec<CallFrame>,

    error_mask: i64,
    warnings: Vec<String>,

    time_limit: Option<Duration>,
    deadline: Option<Instant>,
}

impl Env {
    pub fn new() -> Self {
        info!("Initializing evaluation context");

        let mut env = Env {
            scopes: vec![HashMap::new()],
            this: None,
            calling_class: None,
            functions: Vec::new(),
            function_ids: HashMap::new(),
            classes: HashMap::new(),
            call_stack: Vec::new(),
            error_mask: !0,
            warnings: Vec::new(),
            time_limit: None,
            deadline: None,
        };

        env.define_class(ClassDef::new("stdClass", None));

        env
    }

    //
    // variable table
    //

    /// Reads a variable by value; unset names read as null.
    pub fn get_value(&self, name: &str) -> Value {
        self.scope()
            .get(name)
            .map(|var| var.get())
            .unwrap_or(Value::Null)
    }

    /// Returns the variable's storage cell, creating an unset slot on
    /// first touch.
    pub fn get_var(&mut self, name: &str) -> Var {
        self.scope_mut()
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!("Creating variable slot '{}'", name);
                Var::new(Value::Null)
            })
            .clone()
    }

    pub fn set_value(&mut self, name: &str, value: Value) {
        self.get_var(name).set(value);
    }

    /// Rebinds the name to the given cell: reference assignment.
    pub fn set_ref(&mut self, name: &str, var: Var) {
        debug!("Binding '{}' by reference", name);
        self.scope_mut().insert(name.to_string(), var);
    }

    pub fn unset_var(&mut self, name: &str) {
        self.scope_mut().remove(name);
    }

    pub fn has_var(&self, name: &str) -> bool {
        self.scope().contains_key(name)
    }

    fn scope(&self) -> &HashMap<String, Var> {
        self.scopes.last().expect("scope stack is never empty")
    }

    fn scope_mut(&mut self) -> &mut HashMap<String, Var> {
        self.scopes.last_mut().expect("scope stack is never empty")
    }

    /// Enters a fresh local scope (one per call; PHP functions do not
    /// close over outer locals).
    pub fn push_scope(&mut self, bindings: HashMap<String, Var>) {
        self.scopes.push(bindings);
    }

    pub fn pop_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    //
    // receiver and calling class
    //

    pub fn get_this(&self) -> Option<Value> {
        self.this.clone()
    }

    /// Installs the active receiver, returning the previous one so the
    /// caller can restore it after dispatch.
    pub fn set_this(&mut self, this: Option<Value>) -> Option<Value> {
        std::mem::replace(&mut self.this, this)
    }

    /// The late-static-binding class: the class actually invoked through,
    /// not the lexical scope.
    pub fn calling_class(&self) -> Option<Rc<str>> {
        self.calling_class.clone()
    }

    pub fn set_calling_class(&mut self, class: Option<Rc<str>>) -> Option<Rc<str>> {
        std::mem::replace(&mut self.calling_class, class)
    }

    //
    // registries
    //

    pub fn define_function(&mut self, fun: Function) -> FunId {
        let id = self.functions.len();
        let key = fun.name.to_lowercase();

        info!("Defining function '{}' as id {}", fun.name, id);

        self.functions.push(Rc::new(fun));
        self.function_ids.insert(key, id);

        id
    }

    pub fn find_function_id(&self, name: &str) -> Option<FunId> {
        self.function_ids.get(&name.to_lowercase()).copied()
    }

    pub fn function(&self, id: FunId) -> Option<Rc<Function>> {
        self.functions.get(id).cloned()
    }

    pub fn define_class(&mut self, class: ClassDef) -> Rc<ClassDef> {
        let key = class.name.to_lowercase();

        info!("Defining class '{}'", class.name);

        let class = Rc::new(class);
        self.classes.insert(key, class.clone());

        class
    }

    pub fn find_class(&self, name: &str) -> Option<Rc<ClassDef>> {
        self.classes.get(&name.to_lowercase()).cloned()
    }

    /// The built-in stdClass descriptor, used by object auto-vivification.
    pub fn std_class(&mut self) -> Rc<ClassDef> {
        if let Some(class) = self.find_class("stdClass") {
            return class;
        }

        self.define_class(ClassDef::new("stdClass", None))
    }

    /// Case-insensitive method lookup walking the parent chain.
    pub fn find_method(&self, class: &ClassDef, name: &str) -> Option<Rc<Function>> {
        if let Some(fun) = class.method(name) {
            return Some(fun);
        }

        let parent = class.parent.as_ref()?;
        let parent = self.find_class(parent)?;

        self.find_method(&parent, name)
    }

    /// Class constant lookup walking the parent chain.
    pub fn find_constant(&self, class: &ClassDef, name: &str) -> Option<Value> {
        if let Some(value) = class.constant(name) {
            return Some(value);
        }

        let parent = class.parent.as_ref()?;
        let parent = self.find_class(parent)?;

        self.find_constant(&parent, name)
    }

    /// True when `class` is `name` or inherits from it.
    pub fn is_a(&self, class: &Rc<ClassDef>, name: &str) -> bool {
        if class.name.eq_ignore_ascii_case(name) {
            return true;
        }

        match class.parent.as_ref().and_then(|p| self.find_class(p)) {
            Some(parent) => self.is_a(&parent, name),
            None => false,
        }
    }

    //
    // call stack
    //

    pub fn push_call(&mut self, frame: CallFrame) -> Result<()> {
        if self.call_stack.len() >= MAX_CALL_DEPTH {
            return Err(PhloxError::fatal(format!(
                "maximum call depth {} exceeded calling '{}'",
                MAX_CALL_DEPTH, frame.name
            )));
        }

        debug!("Pushing call frame '{}'", frame.name);
        self.call_stack.push(frame);

        Ok(())
    }

    pub fn pop_call(&mut self) {
        self.call_stack.pop();
    }

    pub fn stack_depth(&self) -> usize {
        self.call_stack.len()
    }

    //
    // cooperative timeout
    //

    pub fn set_time_limit(&mut self, limit: Duration) {
        self.time_limit = Some(limit);
        self.deadline = Some(Instant::now() + limit);
    }

    pub fn clear_time_limit(&mut self) {
        self.time_limit = None;
        self.deadline = None;
    }

    /// Checked at every call boundary; once the deadline passes, the
    /// resulting error propagates up through all pending frames.
    pub fn check_timeout(&self) -> Result<()> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(PhloxError::Timeout {
                limit: self.time_limit.unwrap_or_default(),
            }),
            _ => Ok(()),
        }
    }

    //
    // recoverable errors
    //

    /// Swaps the error-reporting mask, returning the previous one.
    /// `@expr` sets it to zero around its delegate.
    pub fn set_error_mask(&mut self, mask: i64) -> i64 {
        std::mem::replace(&mut self.error_mask, mask)
    }

    pub fn error_mask(&self) -> i64 {
        self.error_mask
    }

    /// Recoverable-error channel: records and logs a warning, then lets
    /// the caller continue with a null value.  Silently dropped while the
    /// mask is zero.
    pub fn error<S: Into<String>>(&mut self, location: &Location, message: S) {
        let message = message.into();
        let message = match location.describe() {
            Some(prefix) => format!("{}: {}", prefix, message),
            None => message,
        };

        if self.error_mask != 0 {
            warn!("{}", message);
            self.warnings.push(message);
        } else {
            debug!("Suppressed warning: {}", message);
        }
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }
}

impl Default for Env {
    fn default() -> Self {
        Env::new()
    }
}

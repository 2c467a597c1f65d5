mod call;
mod class;
mod expr;
mod lvalue;
mod output;
mod stmt;

use std::{
    any::Any,
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    rc::Rc,
};

use bytes::Bytes;

pub use self::call::Arg;
pub(crate) use self::{call::CallContext, class::resolve_hooks};
use crate::{
    array::ArrayData,
    ast::{FuncDecl, IncludeKind, Stmt, Visibility},
    builtins,
    error::{Result, Throw},
    lexer::Mode,
    object::{Class, Native, ObjRef, Object, Property},
    parser::{parse_eval, parse_program},
    sapi::{Foreign, Sapi},
    value::{Slot, Value, new_slot},
};

/// Per-request engine settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Value of the `X-Powered-By` header; `None` suppresses it.
    pub expose: Option<String>,
    pub default_mimetype: String,
    pub default_charset: String,
    /// Maximum nesting of user function calls.
    pub max_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            expose: Some(concat!("Conduit/", env!("CARGO_PKG_VERSION")).to_string()),
            default_mimetype: "text/html".to_string(),
            default_charset: "UTF-8".to_string(),
            max_depth: 256,
        }
    }
}

pub(crate) enum Flow {
    Normal,
    Break(u32),
    Continue(u32),
    Return(Value),
}

/// Variables and `$this` of one executing function (or the global scope).
pub(crate) struct Frame {
    vars: HashMap<Rc<str>, Slot>,
    global: bool,
    pub(crate) this: Option<ObjRef>,
    /// Class whose private members are visible; `self::`.
    pub(crate) scope: Option<Rc<Class>>,
    /// Class for `static::`.
    pub(crate) static_scope: Option<Rc<Class>>,
    pub(crate) args: Vec<Value>,
    pub(crate) function: Rc<str>,
}

impl Frame {
    pub(crate) fn global() -> Self {
        Self {
            vars: HashMap::new(),
            global: true,
            this: None,
            scope: None,
            static_scope: None,
            args: Vec::new(),
            function: "{main}".into(),
        }
    }

    pub(crate) fn function(function: Rc<str>, ctx: &CallContext) -> Self {
        Self {
            vars: HashMap::new(),
            global: false,
            this: ctx.this.clone(),
            scope: ctx.scope.clone(),
            static_scope: ctx.static_scope.clone(),
            args: Vec::new(),
            function,
        }
    }
}

/// Result of looking a property up from a given scope.
pub enum PropertyLookup {
    Visible(Slot),
    /// Declared but not accessible (private/protected) from the scope.
    Hidden,
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Hook {
    Get,
    Set,
    Isset,
    Unset,
}

/// A script engine instance. One per request; not thread-safe.
pub struct Interpreter {
    pub(crate) sapi: Box<dyn Sapi>,
    pub(crate) config: EngineConfig,
    pub(crate) functions: HashMap<String, Rc<FuncDecl>>,
    pub(crate) classes: HashMap<String, Rc<Class>>,
    pub(crate) constants: HashMap<String, Value>,
    pub(crate) globals: HashMap<Rc<str>, Slot>,
    pub(crate) superglobals: HashMap<Rc<str>, Slot>,
    pub(crate) output: output::OutputState,
    pub(crate) raw_input: Option<Bytes>,
    /// `ini_get`/`ini_set` settings.
    pub(crate) ini: HashMap<String, String>,
    /// Declarations already run, by AST identity. Holding the nodes keeps
    /// their addresses from being reused by later parses.
    declared: HashMap<usize, Rc<dyn Any>>,
    included: HashSet<PathBuf>,
    files: Vec<PathBuf>,
    hook_guards: HashSet<(u32, Rc<str>, Hook)>,
    next_object_id: u32,
    depth: usize,
}

impl Interpreter {
    #[must_use]
    pub fn new(sapi: Box<dyn Sapi>, config: EngineConfig) -> Self {
        let mut interp = Self {
            sapi,
            config,
            functions: HashMap::new(),
            classes: HashMap::new(),
            constants: HashMap::new(),
            globals: HashMap::new(),
            superglobals: HashMap::new(),
            output: output::OutputState::default(),
            raw_input: None,
            ini: HashMap::new(),
            declared: HashMap::new(),
            included: HashSet::new(),
            files: Vec::new(),
            hook_guards: HashSet::new(),
            next_object_id: 0,
            depth: 0,
        };
        builtins::classes::register(&mut interp);
        builtins::register_constants(&mut interp);
        let defaults = [
            ("default_mimetype", interp.config.default_mimetype.clone()),
            ("default_charset", interp.config.default_charset.clone()),
            ("display_errors", "1".to_string()),
            ("error_reporting", "32767".to_string()),
            ("max_execution_time", "0".to_string()),
            ("memory_limit", "128M".to_string()),
            ("expose_php", if interp.config.expose.is_some() { "1" } else { "0" }.to_string()),
        ];
        interp.ini.extend(defaults.map(|(k, v)| (k.to_string(), v)));
        for name in ["_SERVER", "_GET", "_POST", "_COOKIE", "_REQUEST", "_ENV", "_FILES"] {
            interp.set_superglobal(name, Value::empty_array());
        }
        interp
    }

    /// Runs startup declarations (classes, functions, constants).
    ///
    /// # Errors
    ///
    /// Parse errors and anything the prelude throws.
    pub fn load_prelude(&mut self, source: &str) -> Result<()> {
        let stmts = parse_program(source.as_bytes(), Mode::Code)?;
        self.run_toplevel(&stmts).map(drop)
    }

    /// Evaluates request source. The first expression statement is the
    /// result, as if the source were prefixed with `return`.
    ///
    /// # Errors
    ///
    /// Parse errors, uncaught exceptions, `exit`, and embedding failures.
    pub fn eval_source(&mut self, source: &str) -> Result<Value> {
        let stmts = parse_eval(source.as_bytes())?;
        self.run_toplevel(&stmts)
    }

    /// Executes a script file in the global scope (`require`).
    ///
    /// # Errors
    ///
    /// Missing files raise `Error`; otherwise as [`Interpreter::eval_source`].
    pub fn run_file(&mut self, path: &Path) -> Result<Value> {
        let mut frame = Frame::global();
        self.include(&mut frame, path, IncludeKind::Require)
    }

    fn run_toplevel(&mut self, stmts: &[Stmt]) -> Result<Value> {
        let mut frame = Frame::global();
        self.hoist(stmts);
        match self.exec_block(&mut frame, stmts)? {
            Flow::Return(v) => Ok(v),
            _ => Ok(Value::Null),
        }
    }

    pub(crate) fn include(&mut self, frame: &mut Frame, path: &Path, kind: IncludeKind) -> Result<Value> {
        let resolved = self.resolve_include(path);
        let canonical = std::fs::canonicalize(&resolved).unwrap_or_else(|_| resolved.clone());
        if matches!(kind, IncludeKind::IncludeOnce | IncludeKind::RequireOnce)
            && self.included.contains(&canonical)
        {
            return Ok(Value::Bool(true));
        }
        let source = match std::fs::read(&resolved) {
            Ok(source) => source,
            Err(err) => {
                tracing::debug!(path = %resolved.display(), %err, "include failed");
                return match kind {
                    IncludeKind::Require | IncludeKind::RequireOnce => Err(self.throw_error(
                        "Error",
                        &format!(
                            "Failed opening required '{}' (include_path='.')",
                            path.display()
                        ),
                    )),
                    IncludeKind::Include | IncludeKind::IncludeOnce => Ok(Value::Bool(false)),
                };
            }
        };
        self.included.insert(canonical);
        let stmts = parse_program(&source, Mode::Template)?;
        self.files.push(resolved);
        self.hoist(&stmts);
        let result = self.exec_block(frame, &stmts);
        self.files.pop();
        match result? {
            Flow::Return(v) => Ok(v),
            _ => Ok(Value::Int(1)),
        }
    }

    fn resolve_include(&self, path: &Path) -> PathBuf {
        if path.is_absolute() || path.exists() {
            return path.to_path_buf();
        }
        self.files
            .last()
            .and_then(|current| current.parent())
            .map(|dir| dir.join(path))
            .filter(|candidate| candidate.exists())
            .unwrap_or_else(|| path.to_path_buf())
    }

    /// Path of the file currently executing, if any.
    #[must_use]
    pub fn current_file(&self) -> Option<&Path> {
        self.files.last().map(PathBuf::as_path)
    }

    /// Sends the header block if no output has been produced yet.
    ///
    /// # Errors
    ///
    /// Embedding failures while sending headers.
    pub fn finish(&mut self) -> Result<()> {
        self.send_headers()
    }

    pub fn set_superglobal(&mut self, name: &str, value: Value) {
        self.superglobals.insert(name.into(), new_slot(value));
    }

    #[must_use]
    pub fn superglobal(&self, name: &str) -> Option<Value> {
        self.superglobals.get(name).map(|s| s.borrow().clone())
    }

    pub fn set_global(&mut self, name: &str, value: Value) {
        self.globals.insert(name.into(), new_slot(value));
    }

    #[must_use]
    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals.get(name).map(|s| s.borrow().clone())
    }

    /// Storage slot of a global variable, created when missing.
    pub fn global_slot(&mut self, name: &str) -> Slot {
        self.globals
            .entry(name.into())
            .or_insert_with(|| new_slot(Value::Null))
            .clone()
    }

    /// Request body captured while populating `$_POST`, so that
    /// `php://input` can still be read afterwards.
    pub fn set_raw_input(&mut self, body: Bytes) {
        self.raw_input = Some(body);
    }

    /// Looks a class up by (case-insensitive) name.
    #[must_use]
    pub fn class(&self, name: &str) -> Option<Rc<Class>> {
        self.classes
            .get(&name.trim_start_matches('\\').to_ascii_lowercase())
            .cloned()
    }

    pub(crate) fn alloc_object(&mut self, class: Rc<Class>, props: Vec<Property>, native: Native) -> ObjRef {
        self.next_object_id += 1;
        Rc::new(Object::new(self.next_object_id, class, props, native))
    }

    /// Embeds a host-owned value as a `Js\Object`.
    pub fn wrap_foreign(&mut self, foreign: Rc<dyn Foreign>) -> Value {
        let class = self
            .class(builtins::classes::FOREIGN_CLASS)
            .unwrap_or_else(builtins::classes::foreign_class);
        Value::Object(self.alloc_object(class, Vec::new(), Native::Foreign(foreign)))
    }

    /// Creates an exception object of a built-in or declared class.
    pub fn create_exception(&mut self, class: &str, message: &str) -> ObjRef {
        let class = self
            .class(class)
            .filter(|c| c.is_a("Throwable") && c.is_instantiable())
            .or_else(|| self.class("Error"))
            .unwrap_or_else(builtins::classes::foreign_class);
        let obj = match self.new_instance(&class) {
            Ok(obj) => obj,
            Err(_) => self.alloc_object(class, Vec::new(), Native::None),
        };
        obj.raw_set("message", Value::from(message));
        obj
    }

    /// Builds a catchable exception ready to be returned as an error.
    pub fn throw_error(&mut self, class: &str, message: &str) -> Throw {
        Throw::Exception(self.create_exception(class, message))
    }

    /// `getMessage()` of an exception object.
    #[must_use]
    pub fn exception_message(obj: &ObjRef) -> String {
        String::from_utf8_lossy(&obj.raw_get("message").to_bytes_lossy()).into_owned()
    }

    pub(crate) fn hook_guard(&mut self, obj: &ObjRef, name: &Rc<str>, hook: Hook) -> bool {
        self.hook_guards.insert((obj.id(), name.clone(), hook))
    }

    pub(crate) fn release_hook_guard(&mut self, obj: &ObjRef, name: &Rc<str>, hook: Hook) {
        self.hook_guards.remove(&(obj.id(), name.clone(), hook));
    }

    pub(crate) fn can_access(&self, visibility: Visibility, declaring: &str, scope: Option<&Rc<Class>>) -> bool {
        match visibility {
            Visibility::Public => true,
            Visibility::Private => scope.is_some_and(|s| s.name().eq_ignore_ascii_case(declaring)),
            Visibility::Protected => scope.is_some_and(|s| {
                s.is_a(declaring) || self.class(declaring).is_some_and(|d| d.is_a(s.name()))
            }),
        }
    }

    /// Looks up a property as code running in `scope` would see it.
    #[must_use]
    pub fn lookup_property(&self, obj: &ObjRef, name: &str, scope: Option<&Rc<Class>>) -> PropertyLookup {
        match obj.property(name) {
            None => PropertyLookup::Missing,
            Some((visibility, declaring, slot)) => {
                if self.can_access(visibility, &declaring, scope) {
                    PropertyLookup::Visible(slot)
                } else {
                    PropertyLookup::Hidden
                }
            }
        }
    }

    pub(crate) fn hoist(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            match stmt {
                Stmt::Function(func) => {
                    let key = func.name.to_ascii_lowercase();
                    if !self.functions.contains_key(&key) {
                        self.mark_declared(func.clone());
                        self.functions.insert(key, func.clone());
                    }
                }
                Stmt::Class(decl) if self.class_declarable(decl) => {
                    if self.declare_class(decl).is_ok() {
                        self.mark_declared(decl.clone());
                    }
                }
                Stmt::Block(inner) => self.hoist(inner),
                _ => {}
            }
        }
    }

    pub(crate) fn already_declared<T: Any>(&self, decl: &Rc<T>) -> bool {
        self.declared.contains_key(&decl_identity(decl))
    }

    pub(crate) fn mark_declared<T: Any>(&mut self, decl: Rc<T>) {
        self.declared.insert(decl_identity(&decl), decl);
    }

    pub(crate) fn enter_call(&mut self) -> Result<()> {
        if self.depth >= self.config.max_depth {
            let message = format!(
                "Maximum function nesting level of '{}' reached, aborting!",
                self.config.max_depth
            );
            return Err(self.throw_error("Error", &message));
        }
        self.depth += 1;
        Ok(())
    }

    pub(crate) const fn leave_call(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Reads the whole request body once and keeps it for `php://input`.
    pub(crate) fn request_body(&mut self) -> Result<Bytes> {
        if let Some(body) = &self.raw_input {
            return Ok(body.clone());
        }
        let mut body = Vec::new();
        loop {
            let chunk = self.sapi.read_input(8192)?;
            if chunk.is_empty() {
                break;
            }
            body.extend_from_slice(&chunk);
        }
        let body = Bytes::from(body);
        self.raw_input = Some(body.clone());
        Ok(body)
    }

    /// Converts `$_SERVER`-style pairs into an array value.
    #[must_use]
    pub fn array_from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, Value)>) -> Value {
        let mut array = ArrayData::new();
        for (k, v) in pairs {
            array.insert(crate::ArrayKey::from_str_key(k), v);
        }
        Value::array(array)
    }
}

fn decl_identity<T>(decl: &Rc<T>) -> usize {
    Rc::as_ptr(decl).cast::<()>() as usize
}

#[cfg(test)]
pub(crate) mod tests;

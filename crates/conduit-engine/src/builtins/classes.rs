//! Classes and interfaces every interpreter starts with.

use std::{
    cell::RefCell,
    collections::HashMap,
    rc::Rc,
};

use crate::{
    Interpreter,
    ast::{ClassKind, Expr, Literal, Visibility},
    error::Result,
    object::{Class, Method, MethodBody, NativeMethod, ObjRef, PropDef},
    value::Value,
};

/// Class of host-owned values embedded in scripts.
pub const FOREIGN_CLASS: &str = "Js\\Object";

struct Spec<'a> {
    name: &'a str,
    kind: ClassKind,
    parent: Option<&'a str>,
    interfaces: &'a [&'a str],
    props: Vec<PropDef>,
    methods: &'a [(&'a str, NativeMethod)],
}

impl<'a> Spec<'a> {
    fn class(name: &'a str) -> Self {
        Self {
            name,
            kind: ClassKind::Class,
            parent: None,
            interfaces: &[],
            props: Vec::new(),
            methods: &[],
        }
    }

    fn interface(name: &'a str, parents: &'a [&'a str]) -> Self {
        Self {
            name,
            kind: ClassKind::Interface,
            parent: None,
            interfaces: parents,
            props: Vec::new(),
            methods: &[],
        }
    }

    fn extends(mut self, parent: &'a str) -> Self {
        self.parent = Some(parent);
        self
    }
}

fn build(interp: &Interpreter, spec: Spec<'_>) -> Rc<Class> {
    let parent = spec.parent.and_then(|p| interp.class(p));
    let mut interfaces = parent.as_ref().map(|p| p.interfaces.clone()).unwrap_or_default();
    for name in spec.interfaces {
        interfaces.push(name.to_ascii_lowercase());
        if let Some(iface) = interp.class(name) {
            interfaces.extend(iface.interfaces.iter().cloned());
        }
    }
    interfaces.sort();
    interfaces.dedup();

    let mut methods: HashMap<String, Rc<Method>> = parent.as_ref().map(|p| p.methods.clone()).unwrap_or_default();
    let declaring: Rc<str> = spec.name.into();
    for (name, f) in spec.methods {
        methods.insert(
            name.to_ascii_lowercase(),
            Rc::new(Method {
                name: (*name).into(),
                visibility: Visibility::Public,
                is_static: false,
                is_abstract: false,
                declaring: declaring.clone(),
                body: MethodBody::Native(*f),
            }),
        );
    }
    let mut props = parent.as_ref().map(|p| p.props.clone()).unwrap_or_default();
    props.extend(spec.props);
    let hooks = crate::interp::resolve_hooks(&methods);
    Rc::new(Class {
        name: declaring,
        kind: spec.kind,
        is_abstract: false,
        parent,
        interfaces,
        props,
        methods,
        consts: RefCell::new(HashMap::new()),
        hooks,
    })
}

/// Standalone `Js\Object` class, for when the registry has none.
pub(crate) fn foreign_class() -> Rc<Class> {
    Rc::new(Class {
        name: FOREIGN_CLASS.into(),
        kind: ClassKind::Class,
        is_abstract: false,
        parent: None,
        interfaces: vec!["arrayaccess".into(), "countable".into()],
        props: Vec::new(),
        methods: HashMap::new(),
        consts: RefCell::new(HashMap::new()),
        hooks: crate::object::MagicHooks::default(),
    })
}

fn prop(name: &str, declaring: &str, default: Literal) -> PropDef {
    PropDef {
        name: name.into(),
        visibility: Visibility::Protected,
        declaring: declaring.into(),
        default: Some(Expr::Lit(default)),
    }
}

fn throwable_props(declaring: &str) -> Vec<PropDef> {
    vec![
        prop("message", declaring, Literal::Str(bytes::Bytes::new())),
        prop("code", declaring, Literal::Int(0)),
        prop("file", declaring, Literal::Str(bytes::Bytes::new())),
        prop("line", declaring, Literal::Int(0)),
        prop("previous", declaring, Literal::Null),
    ]
}

const THROWABLE_METHODS: &[(&str, NativeMethod)] = &[
    ("__construct", throwable_construct),
    ("getMessage", get_message),
    ("getCode", get_code),
    ("getPrevious", get_previous),
    ("getFile", get_file),
    ("getLine", get_line),
    ("getTrace", get_trace),
    ("getTraceAsString", get_trace_as_string),
    ("__toString", throwable_to_string),
];

fn get_message(_: &mut Interpreter, this: &ObjRef, _: Vec<Value>) -> Result<Value> {
    Ok(this.raw_get("message"))
}

fn get_code(_: &mut Interpreter, this: &ObjRef, _: Vec<Value>) -> Result<Value> {
    Ok(this.raw_get("code"))
}

fn get_previous(_: &mut Interpreter, this: &ObjRef, _: Vec<Value>) -> Result<Value> {
    Ok(this.raw_get("previous"))
}

fn get_file(_: &mut Interpreter, this: &ObjRef, _: Vec<Value>) -> Result<Value> {
    Ok(this.raw_get("file"))
}

fn get_line(_: &mut Interpreter, this: &ObjRef, _: Vec<Value>) -> Result<Value> {
    Ok(this.raw_get("line"))
}

fn get_trace(_: &mut Interpreter, _: &ObjRef, _: Vec<Value>) -> Result<Value> {
    Ok(Value::empty_array())
}

fn get_trace_as_string(_: &mut Interpreter, _: &ObjRef, _: Vec<Value>) -> Result<Value> {
    Ok(Value::from("#0 {main}"))
}

fn throwable_construct(interp: &mut Interpreter, this: &ObjRef, args: Vec<Value>) -> Result<Value> {
    let mut args = args.into_iter();
    if let Some(message) = args.next() {
        let message = interp.to_bytes(&message)?;
        this.raw_set("message", Value::Str(message));
    }
    if let Some(code) = args.next() {
        this.raw_set("code", Value::Int(code.to_int()));
    }
    if let Some(previous) = args.next() {
        this.raw_set("previous", previous);
    }
    Ok(Value::Null)
}

fn throwable_to_string(_: &mut Interpreter, this: &ObjRef, _: Vec<Value>) -> Result<Value> {
    let message = Interpreter::exception_message(this);
    let text = if message.is_empty() {
        format!("{}\nStack trace:\n#0 {{main}}", this.class().name())
    } else {
        format!("{}: {message}\nStack trace:\n#0 {{main}}", this.class().name())
    };
    Ok(Value::from(text))
}

pub(crate) fn register(interp: &mut Interpreter) {
    let specs = [
        Spec::interface("Traversable", &[]),
        Spec::interface("IteratorAggregate", &["Traversable"]),
        Spec::interface("ArrayAccess", &[]),
        Spec::interface("Countable", &[]),
        Spec::interface("Stringable", &[]),
        Spec::interface("JsonSerializable", &[]),
        Spec::interface("Throwable", &["Stringable"]),
        Spec::class("stdClass"),
        Spec::class("Closure"),
        Spec {
            interfaces: &["Throwable"],
            props: throwable_props("Exception"),
            methods: THROWABLE_METHODS,
            ..Spec::class("Exception")
        },
        Spec {
            interfaces: &["Throwable"],
            props: throwable_props("Error"),
            methods: THROWABLE_METHODS,
            ..Spec::class("Error")
        },
        Spec::class("ErrorException").extends("Exception"),
        Spec::class("JsonException").extends("Exception"),
        Spec::class("RuntimeException").extends("Exception"),
        Spec::class("LogicException").extends("Exception"),
        Spec::class("InvalidArgumentException").extends("LogicException"),
        Spec::class("DomainException").extends("LogicException"),
        Spec::class("LengthException").extends("LogicException"),
        Spec::class("OutOfRangeException").extends("LogicException"),
        Spec::class("OutOfBoundsException").extends("RuntimeException"),
        Spec::class("RangeException").extends("RuntimeException"),
        Spec::class("OverflowException").extends("RuntimeException"),
        Spec::class("UnderflowException").extends("RuntimeException"),
        Spec::class("UnexpectedValueException").extends("RuntimeException"),
        Spec::class("TypeError").extends("Error"),
        Spec::class("ValueError").extends("Error"),
        Spec::class("ArithmeticError").extends("Error"),
        Spec::class("DivisionByZeroError").extends("ArithmeticError"),
        Spec::class("ArgumentCountError").extends("TypeError"),
        Spec::class("UnhandledMatchError").extends("Error"),
        Spec {
            interfaces: &["ArrayAccess", "Countable"],
            ..Spec::class(FOREIGN_CLASS)
        },
    ];
    for spec in specs {
        let class = build(interp, spec);
        interp.classes.insert(class.name().to_ascii_lowercase(), class);
    }
}

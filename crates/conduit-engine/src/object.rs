use std::{
    any::Any,
    cell::{Ref, RefCell},
    collections::HashMap,
    fmt,
    rc::Rc,
};

use crate::{
    Interpreter,
    ast::{ClassKind, Expr, FuncDecl, Visibility},
    error::Result,
    sapi::Foreign,
    value::{Slot, Value, new_slot},
};

pub type ObjRef = Rc<Object>;

/// Method implemented in Rust. Receives `$this` (or the class's prototype
/// object for static calls) and the positional arguments.
pub type NativeMethod = fn(&mut Interpreter, &ObjRef, Vec<Value>) -> Result<Value>;

#[derive(Clone)]
pub enum MethodBody {
    User(Rc<FuncDecl>),
    Native(NativeMethod),
}

#[derive(Clone)]
pub struct Method {
    pub name: Rc<str>,
    pub visibility: Visibility,
    pub is_static: bool,
    pub is_abstract: bool,
    /// Name of the class that declared the method; the scope its body runs in.
    pub declaring: Rc<str>,
    pub body: MethodBody,
}

impl Method {
    #[must_use]
    pub fn is_public(&self) -> bool {
        self.visibility == Visibility::Public
    }

    #[must_use]
    pub fn params(&self) -> Option<&[crate::ast::Param]> {
        match &self.body {
            MethodBody::User(func) => Some(&func.params),
            MethodBody::Native(_) => None,
        }
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.declaring, self.name)
    }
}

#[derive(Debug, Clone)]
pub struct PropDef {
    pub name: Rc<str>,
    pub visibility: Visibility,
    pub declaring: Rc<str>,
    pub default: Option<Expr>,
}

/// Magic methods a class defines, resolved once when the class is declared.
#[derive(Debug, Clone, Default)]
pub struct MagicHooks {
    pub get: Option<Rc<Method>>,
    pub set: Option<Rc<Method>>,
    pub isset: Option<Rc<Method>>,
    pub unset: Option<Rc<Method>>,
    pub call: Option<Rc<Method>>,
    pub invoke: Option<Rc<Method>>,
    pub to_string: Option<Rc<Method>>,
}

pub(crate) enum ConstSlot {
    Pending(Expr),
    Evaluating,
    Ready(Value),
}

pub struct Class {
    pub(crate) name: Rc<str>,
    pub(crate) kind: ClassKind,
    pub(crate) is_abstract: bool,
    pub(crate) parent: Option<Rc<Class>>,
    /// Lowercase names of every interface implemented, inherited ones included.
    pub(crate) interfaces: Vec<String>,
    pub(crate) props: Vec<PropDef>,
    pub(crate) methods: HashMap<String, Rc<Method>>,
    pub(crate) consts: RefCell<HashMap<Rc<str>, ConstSlot>>,
    pub(crate) hooks: MagicHooks,
}

impl Class {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn parent(&self) -> Option<&Rc<Self>> {
        self.parent.as_ref()
    }

    #[must_use]
    pub const fn hooks(&self) -> &MagicHooks {
        &self.hooks
    }

    #[must_use]
    pub fn props(&self) -> &[PropDef] {
        &self.props
    }

    #[must_use]
    pub fn find_method(&self, name: &str) -> Option<&Rc<Method>> {
        self.methods.get(&name.to_ascii_lowercase())
    }

    pub fn methods(&self) -> impl Iterator<Item = &Rc<Method>> {
        self.methods.values()
    }

    #[must_use]
    pub const fn is_instantiable(&self) -> bool {
        matches!(self.kind, ClassKind::Class) && !self.is_abstract
    }

    /// `instanceof` against a class or interface name.
    #[must_use]
    pub fn is_a(&self, name: &str) -> bool {
        let lower = name.trim_start_matches('\\').to_ascii_lowercase();
        let mut class = Some(self);
        while let Some(c) = class {
            if c.name.eq_ignore_ascii_case(&lower) {
                return true;
            }
            class = c.parent.as_deref();
        }
        self.interfaces.iter().any(|i| *i == lower)
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class {}", self.name)
    }
}

pub struct Property {
    pub name: Rc<str>,
    pub visibility: Visibility,
    pub declaring: Rc<str>,
    pub slot: Slot,
}

pub struct Closure {
    pub func: Rc<FuncDecl>,
    pub bound: Vec<(Rc<str>, Slot)>,
    pub this: Option<ObjRef>,
    pub scope: Option<Rc<Class>>,
}

/// Rust-side state attached to an object.
#[derive(Default)]
pub enum Native {
    #[default]
    None,
    Closure(Rc<Closure>),
    Foreign(Rc<dyn Foreign>),
    /// Opaque embedder data, e.g. the host error an exception was raised for.
    Payload(Rc<dyn Any>),
}

pub struct Object {
    id: u32,
    class: Rc<Class>,
    props: RefCell<Vec<Property>>,
    native: RefCell<Native>,
}

impl Object {
    pub(crate) fn new(id: u32, class: Rc<Class>, props: Vec<Property>, native: Native) -> Self {
        Self {
            id,
            class,
            props: RefCell::new(props),
            native: RefCell::new(native),
        }
    }

    #[must_use]
    pub const fn id(&self) -> u32 {
        self.id
    }

    #[must_use]
    pub const fn class(&self) -> &Rc<Class> {
        &self.class
    }

    #[must_use]
    pub fn properties(&self) -> Ref<'_, Vec<Property>> {
        self.props.borrow()
    }

    /// Finds a property by exact name, ignoring visibility.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<(Visibility, Rc<str>, Slot)> {
        self.props
            .borrow()
            .iter()
            .find(|p| &*p.name == name)
            .map(|p| (p.visibility, p.declaring.clone(), p.slot.clone()))
    }

    /// Reads a property ignoring visibility; used by native methods.
    #[must_use]
    pub fn raw_get(&self, name: &str) -> Value {
        self.property(name)
            .map(|(_, _, slot)| slot.borrow().clone())
            .unwrap_or_default()
    }

    /// Writes a property ignoring visibility, creating a public one if needed.
    pub fn raw_set(&self, name: &str, value: Value) {
        if let Some((_, _, slot)) = self.property(name) {
            *slot.borrow_mut() = value;
            return;
        }
        self.add_property(name.into(), Visibility::Public, self.class.name.clone(), new_slot(value));
    }

    pub(crate) fn add_property(&self, name: Rc<str>, visibility: Visibility, declaring: Rc<str>, slot: Slot) {
        self.props.borrow_mut().push(Property {
            name,
            visibility,
            declaring,
            slot,
        });
    }

    /// Rebinds a property to another slot (reference assignment).
    pub(crate) fn bind_property(&self, name: &str, slot: Slot) -> bool {
        let mut props = self.props.borrow_mut();
        match props.iter_mut().find(|p| &*p.name == name) {
            Some(p) => {
                p.slot = slot;
                true
            }
            None => false,
        }
    }

    pub(crate) fn remove_property(&self, name: &str) -> bool {
        let mut props = self.props.borrow_mut();
        let before = props.len();
        props.retain(|p| &*p.name != name);
        props.len() != before
    }

    #[must_use]
    pub fn closure(&self) -> Option<Rc<Closure>> {
        match &*self.native.borrow() {
            Native::Closure(c) => Some(c.clone()),
            _ => None,
        }
    }

    #[must_use]
    pub fn foreign(&self) -> Option<Rc<dyn Foreign>> {
        match &*self.native.borrow() {
            Native::Foreign(f) => Some(f.clone()),
            _ => None,
        }
    }

    #[must_use]
    pub fn payload(&self) -> Option<Rc<dyn Any>> {
        match &*self.native.borrow() {
            Native::Payload(p) => Some(p.clone()),
            _ => None,
        }
    }

    pub fn set_native(&self, native: Native) {
        *self.native.borrow_mut() = native;
    }
}

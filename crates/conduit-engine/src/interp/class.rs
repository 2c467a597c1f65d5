use std::{
    cell::RefCell,
    collections::HashMap,
    rc::Rc,
};

use super::{Arg, Frame, Hook, Interpreter, PropertyLookup};
use crate::{
    ast::{ClassDecl, ClassKind, ClassRef, Expr, Name, Visibility},
    error::Result,
    object::{Class, ConstSlot, MagicHooks, Method, MethodBody, Native, ObjRef, PropDef, Property},
    sapi::HasMode,
    value::{Value, new_slot},
};

impl Interpreter {
    pub(crate) fn find_class(&self, name: &Name) -> Option<Rc<Class>> {
        name.candidates().find_map(|n| self.class(n))
    }

    /// Parent and interfaces are all known, so declaring cannot fail on them.
    pub(crate) fn class_declarable(&self, decl: &ClassDecl) -> bool {
        !self.classes.contains_key(&decl.name.to_ascii_lowercase())
            && decl.parent.as_ref().is_none_or(|p| self.find_class(p).is_some())
            && decl.interfaces.iter().all(|i| self.find_class(i).is_some())
    }

    pub(crate) fn declare_class(&mut self, decl: &Rc<ClassDecl>) -> Result<()> {
        let key = decl.name.to_ascii_lowercase();
        if self.classes.contains_key(&key) {
            let message = format!(
                "Cannot declare class {}, because the name is already in use",
                decl.name
            );
            return Err(self.throw_error("Error", &message));
        }

        let parent = match &decl.parent {
            Some(name) => match self.find_class(name) {
                Some(parent) => Some(parent),
                None => {
                    let message = format!("Class \"{}\" not found", name.primary);
                    return Err(self.throw_error("Error", &message));
                }
            },
            None => None,
        };

        let mut interfaces = parent
            .as_ref()
            .map(|p| p.interfaces.clone())
            .unwrap_or_default();
        for name in &decl.interfaces {
            let Some(iface) = self.find_class(name) else {
                let message = format!("Interface \"{}\" not found", name.primary);
                return Err(self.throw_error("Error", &message));
            };
            interfaces.push(iface.name().to_ascii_lowercase());
            interfaces.extend(iface.interfaces.iter().cloned());
        }
        interfaces.sort();
        interfaces.dedup();

        let mut methods: HashMap<String, Rc<Method>> = parent
            .as_ref()
            .map(|p| p.methods.clone())
            .unwrap_or_default();
        let mut props: Vec<PropDef> = parent.as_ref().map(|p| p.props.clone()).unwrap_or_default();

        for m in &decl.methods {
            methods.insert(
                m.func.name.to_ascii_lowercase(),
                Rc::new(Method {
                    name: m.func.name.clone(),
                    visibility: m.visibility,
                    is_static: m.is_static,
                    is_abstract: m.is_abstract,
                    declaring: decl.name.clone(),
                    body: MethodBody::User(m.func.clone()),
                }),
            );
            if m.func.name.eq_ignore_ascii_case("__construct") {
                for param in &m.func.params {
                    if let Some(visibility) = param.promote {
                        upsert_prop(
                            &mut props,
                            PropDef {
                                name: param.name.clone(),
                                visibility,
                                declaring: decl.name.clone(),
                                default: None,
                            },
                        );
                    }
                }
            }
        }
        for p in &decl.props {
            upsert_prop(
                &mut props,
                PropDef {
                    name: p.name.clone(),
                    visibility: p.visibility,
                    declaring: decl.name.clone(),
                    default: p.default.clone(),
                },
            );
        }

        let consts = decl
            .consts
            .iter()
            .map(|(name, expr)| (name.clone(), ConstSlot::Pending(expr.clone())))
            .collect();

        let hooks = resolve_hooks(&methods);
        let class = Rc::new(Class {
            name: decl.name.clone(),
            kind: decl.kind,
            is_abstract: decl.is_abstract,
            parent,
            interfaces,
            props,
            methods,
            consts: RefCell::new(consts),
            hooks,
        });
        tracing::trace!(class = %class.name(), "declared class");
        self.classes.insert(key, class);
        Ok(())
    }

    pub(crate) fn resolve_class_ref(&mut self, frame: &mut Frame, class: &ClassRef) -> Result<Rc<Class>> {
        let (resolved, missing) = match class {
            ClassRef::Named(name) => (self.find_class(name), name.primary.to_string()),
            ClassRef::SelfRef => (frame.scope.clone(), String::new()),
            ClassRef::Parent => (frame.scope.as_ref().and_then(|s| s.parent().cloned()), String::new()),
            ClassRef::Static => (
                frame.static_scope.clone().or_else(|| frame.scope.clone()),
                String::new(),
            ),
            ClassRef::Dynamic(expr) => match self.eval(frame, expr)? {
                Value::Object(obj) => (Some(obj.class().clone()), String::new()),
                other => {
                    let name = String::from_utf8_lossy(&other.to_bytes_lossy()).into_owned();
                    (self.class(&name), name)
                }
            },
        };
        if let Some(class) = resolved {
            return Ok(class);
        }
        let message = match class {
            ClassRef::SelfRef => "Cannot use \"self\" when no class scope is active".to_string(),
            ClassRef::Parent => "Cannot use \"parent\" when current class scope has no parent".to_string(),
            ClassRef::Static => "Cannot use \"static\" when no class scope is active".to_string(),
            ClassRef::Named(_) | ClassRef::Dynamic(_) => format!("Class \"{missing}\" not found"),
        };
        Err(self.throw_error("Error", &message))
    }

    /// Evaluates a class constant, walking the parent chain.
    pub(crate) fn class_constant(&mut self, class: &Rc<Class>, name: &str) -> Result<Value> {
        let mut current = Some(class.clone());
        while let Some(c) = current {
            let pending = {
                let mut consts = c.consts.borrow_mut();
                match consts.get_mut(name) {
                    Some(slot) => match std::mem::replace(slot, ConstSlot::Evaluating) {
                        ConstSlot::Ready(v) => {
                            *slot = ConstSlot::Ready(v.clone());
                            return Ok(v);
                        }
                        ConstSlot::Evaluating => None,
                        ConstSlot::Pending(expr) => Some(Some(expr)),
                    },
                    None => Some(None),
                }
            };
            match pending {
                None => {
                    let message = format!("Cannot declare self-referencing constant {}::{name}", c.name());
                    return Err(self.throw_error("Error", &message));
                }
                Some(Some(expr)) => {
                    let value = self.eval_const_expr(&expr, Some(c.clone()));
                    let mut consts = c.consts.borrow_mut();
                    return match value {
                        Ok(v) => {
                            consts.insert(name.into(), ConstSlot::Ready(v.clone()));
                            Ok(v)
                        }
                        Err(err) => {
                            consts.insert(name.into(), ConstSlot::Pending(expr));
                            Err(err)
                        }
                    };
                }
                Some(None) => current = c.parent().cloned(),
            }
        }
        let message = format!("Undefined constant {}::{name}", class.name());
        Err(self.throw_error("Error", &message))
    }

    pub(crate) fn eval_const_expr(&mut self, expr: &Expr, scope: Option<Rc<Class>>) -> Result<Value> {
        let mut frame = Frame::global();
        frame.global = false;
        frame.static_scope.clone_from(&scope);
        frame.scope = scope;
        self.eval(&mut frame, expr)
    }

    /// Allocates an object with default property values, without running
    /// its constructor.
    pub(crate) fn new_instance(&mut self, class: &Rc<Class>) -> Result<ObjRef> {
        if !class.is_instantiable() {
            let what = match class.kind {
                ClassKind::Interface => "interface",
                ClassKind::Class => "abstract class",
            };
            let message = format!("Cannot instantiate {what} {}", class.name());
            return Err(self.throw_error("Error", &message));
        }
        let mut props = Vec::with_capacity(class.props.len());
        for def in &class.props {
            let value = match &def.default {
                Some(expr) => {
                    let scope = self.class(&def.declaring);
                    self.eval_const_expr(expr, scope)?
                }
                None => Value::Null,
            };
            props.push(Property {
                name: def.name.clone(),
                visibility: def.visibility,
                declaring: def.declaring.clone(),
                slot: new_slot(value),
            });
        }
        Ok(self.alloc_object(class.clone(), props, Native::None))
    }

    /// `new Class(...args)` from Rust.
    ///
    /// # Errors
    ///
    /// Unknown or abstract classes, and anything the constructor throws.
    pub fn new_object(&mut self, class: &str, args: Vec<Value>) -> Result<ObjRef> {
        let Some(class) = self.class(class) else {
            return Err(self.throw_error("Error", &format!("Class \"{class}\" not found")));
        };
        self.instantiate(&class, args.into_iter().map(Arg::Val).collect(), None)
    }

    pub(crate) fn instantiate(
        &mut self,
        class: &Rc<Class>,
        args: Vec<Arg>,
        scope: Option<&Rc<Class>>,
    ) -> Result<ObjRef> {
        let obj = self.new_instance(class)?;
        if let Some(ctor) = class.find_method("__construct").cloned() {
            if !self.can_access(ctor.visibility, &ctor.declaring, scope) {
                let message = format!(
                    "Call to {} {}::__construct() from {}",
                    visibility_name(ctor.visibility),
                    class.name(),
                    scope_name(scope)
                );
                return Err(self.throw_error("Error", &message));
            }
            self.invoke_method(&obj, &ctor, args)?;
        }
        Ok(obj)
    }

    /// Reads `$obj->name` as code in `scope` would.
    ///
    /// # Errors
    ///
    /// Inaccessible properties without `__get`, and hook failures.
    pub fn read_property(&mut self, obj: &ObjRef, name: &str, scope: Option<&Rc<Class>>) -> Result<Value> {
        if let Some(foreign) = obj.foreign() {
            return foreign.get(self, name);
        }
        let lookup = self.lookup_property(obj, name, scope);
        if let PropertyLookup::Visible(slot) = lookup {
            return Ok(slot.borrow().clone());
        }
        let key: Rc<str> = name.into();
        if let Some(hook) = obj.class().hooks.get.clone()
            && self.hook_guard(obj, &key, Hook::Get)
        {
            let result = self.invoke_method(obj, &hook, vec![Arg::Val(Value::from(name))]);
            self.release_hook_guard(obj, &key, Hook::Get);
            return result;
        }
        match lookup {
            PropertyLookup::Hidden => Err(self.inaccessible(obj, name)),
            _ => {
                tracing::trace!(class = %obj.class().name(), property = name, "undefined property");
                Ok(Value::Null)
            }
        }
    }

    /// Assigns `$obj->name = value`, consulting `__set` only.
    ///
    /// # Errors
    ///
    /// Inaccessible properties without `__set`, and hook failures.
    pub fn write_property(
        &mut self,
        obj: &ObjRef,
        name: &str,
        value: Value,
        scope: Option<&Rc<Class>>,
    ) -> Result<()> {
        if let Some(foreign) = obj.foreign() {
            return foreign.set(self, name, value);
        }
        let lookup = self.lookup_property(obj, name, scope);
        if let PropertyLookup::Visible(slot) = lookup {
            *slot.borrow_mut() = value;
            return Ok(());
        }
        let key: Rc<str> = name.into();
        if let Some(hook) = obj.class().hooks.set.clone()
            && self.hook_guard(obj, &key, Hook::Set)
        {
            let result = self.invoke_method(obj, &hook, vec![Arg::Val(Value::from(name)), Arg::Val(value)]);
            self.release_hook_guard(obj, &key, Hook::Set);
            return result.map(drop);
        }
        match lookup {
            PropertyLookup::Hidden => Err(self.inaccessible(obj, name)),
            _ => {
                let declaring = obj.class().name.clone();
                obj.add_property(key, Visibility::Public, declaring, new_slot(value));
                Ok(())
            }
        }
    }

    /// `unset($obj->name)`.
    ///
    /// # Errors
    ///
    /// Inaccessible properties without `__unset`, and hook failures.
    pub fn unset_property(&mut self, obj: &ObjRef, name: &str, scope: Option<&Rc<Class>>) -> Result<()> {
        if let Some(foreign) = obj.foreign() {
            return foreign.unset(self, name);
        }
        let lookup = self.lookup_property(obj, name, scope);
        if let PropertyLookup::Visible(_) = lookup {
            obj.remove_property(name);
            return Ok(());
        }
        let key: Rc<str> = name.into();
        if let Some(hook) = obj.class().hooks.unset.clone()
            && self.hook_guard(obj, &key, Hook::Unset)
        {
            let result = self.invoke_method(obj, &hook, vec![Arg::Val(Value::from(name))]);
            self.release_hook_guard(obj, &key, Hook::Unset);
            return result.map(drop);
        }
        match lookup {
            PropertyLookup::Hidden => Err(self.inaccessible(obj, name)),
            _ => Ok(()),
        }
    }

    /// `isset($obj->name)` / `!empty($obj->name)` / existence.
    ///
    /// # Errors
    ///
    /// Hook failures.
    pub fn property_isset(
        &mut self,
        obj: &ObjRef,
        name: &str,
        mode: HasMode,
        scope: Option<&Rc<Class>>,
    ) -> Result<bool> {
        if let Some(foreign) = obj.foreign() {
            return foreign.has(self, name, mode);
        }
        if let PropertyLookup::Visible(slot) = self.lookup_property(obj, name, scope) {
            let value = slot.borrow();
            return Ok(match mode {
                HasMode::Isset => !value.is_null(),
                HasMode::NotEmpty => value.to_bool(),
                HasMode::Exists => true,
            });
        }
        let key: Rc<str> = name.into();
        let Some(hook) = obj.class().hooks.isset.clone() else {
            return Ok(false);
        };
        if !self.hook_guard(obj, &key, Hook::Isset) {
            return Ok(false);
        }
        let result = self.invoke_method(obj, &hook, vec![Arg::Val(Value::from(name))]);
        self.release_hook_guard(obj, &key, Hook::Isset);
        let present = result?.to_bool();
        if present && mode == HasMode::NotEmpty {
            return Ok(self.read_property(obj, name, scope)?.to_bool());
        }
        Ok(present)
    }

    fn inaccessible(&mut self, obj: &ObjRef, name: &str) -> crate::Throw {
        let visibility = obj
            .property(name)
            .map_or(Visibility::Private, |(visibility, _, _)| visibility);
        let message = format!(
            "Cannot access {} property {}::${name}",
            visibility_name(visibility),
            obj.class().name()
        );
        self.throw_error("Error", &message)
    }
}

fn upsert_prop(props: &mut Vec<PropDef>, def: PropDef) {
    match props.iter_mut().find(|p| p.name == def.name) {
        Some(existing) => *existing = def,
        None => props.push(def),
    }
}

pub(crate) fn resolve_hooks(methods: &HashMap<String, Rc<Method>>) -> MagicHooks {
    let find = |name: &str| methods.get(name).filter(|m| !m.is_abstract).cloned();
    MagicHooks {
        get: find("__get"),
        set: find("__set"),
        isset: find("__isset"),
        unset: find("__unset"),
        call: find("__call"),
        invoke: find("__invoke"),
        to_string: find("__tostring"),
    }
}

pub(crate) const fn visibility_name(visibility: Visibility) -> &'static str {
    match visibility {
        Visibility::Public => "public",
        Visibility::Protected => "protected",
        Visibility::Private => "private",
    }
}

pub(crate) fn scope_name(scope: Option<&Rc<Class>>) -> String {
    scope.map_or_else(|| "global scope".to_string(), |s| format!("scope {}", s.name()))
}

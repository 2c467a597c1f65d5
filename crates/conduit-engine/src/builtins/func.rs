use std::{collections::HashMap, rc::Rc};

use super::{Builtin, arg, bool_arg, by_value, require, string_arg};
use crate::{
    Interpreter,
    array::ArrayData,
    ast::ClassKind,
    error::Result,
    object::Class,
    value::Value,
};

pub(crate) fn register(table: &mut HashMap<&'static str, Builtin>) {
    table.extend([
        ("call_user_func", by_value(call_user_func)),
        ("call_user_func_array", by_value(call_user_func_array)),
        ("function_exists", by_value(function_exists)),
        ("is_callable", by_value(is_callable)),
        ("method_exists", by_value(method_exists)),
        ("property_exists", by_value(property_exists)),
        ("class_exists", by_value(class_exists)),
        ("interface_exists", by_value(interface_exists)),
        ("get_class", by_value(get_class)),
        ("get_parent_class", by_value(get_parent_class)),
        ("get_class_methods", by_value(get_class_methods)),
        ("is_a", by_value(is_a)),
        ("is_subclass_of", by_value(is_subclass_of)),
        ("spl_object_id", by_value(spl_object_id)),
        ("spl_object_hash", by_value(spl_object_hash)),
        ("iterator_to_array", by_value(iterator_to_array)),
    ]);
}

fn call_user_func(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    require(interp, args, 1, "call_user_func")?;
    let callee = args[0].clone();
    interp.call(&callee, args[1..].to_vec())
}

fn call_user_func_array(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    require(interp, args, 2, "call_user_func_array")?;
    let callee = args[0].clone();
    let Value::Array(list) = &args[1] else {
        let given = args[1].clone();
        return Err(super::type_error(interp, "call_user_func_array", 2, "array", &given));
    };
    let list = list.values().cloned().collect();
    interp.call(&callee, list)
}

fn function_exists(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let name = string_arg(interp, args, 0)?;
    Ok(Value::Bool(interp.function_exists(&name)))
}

fn is_callable(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    Ok(Value::Bool(interp.is_callable(&arg(args, 0))))
}

/// Class named by an object or a class-name string.
fn class_of(interp: &Interpreter, value: &Value) -> Option<Rc<Class>> {
    match value {
        Value::Object(obj) => Some(obj.class().clone()),
        Value::Str(name) => interp.class(&String::from_utf8_lossy(name)),
        _ => None,
    }
}

fn method_exists(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let method = string_arg(interp, args, 1)?;
    let target = arg(args, 0);
    if let Value::Object(obj) = &target
        && let Some(foreign) = obj.foreign()
    {
        return foreign
            .has(interp, &method, crate::HasMode::Exists)
            .map(Value::Bool);
    }
    Ok(Value::Bool(
        class_of(interp, &target).is_some_and(|c| c.find_method(&method).is_some()),
    ))
}

fn property_exists(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let name = string_arg(interp, args, 1)?;
    let target = arg(args, 0);
    if let Value::Object(obj) = &target {
        if let Some(foreign) = obj.foreign() {
            return foreign
                .has(interp, &name, crate::HasMode::Exists)
                .map(Value::Bool);
        }
        if obj.property(&name).is_some() {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(
        class_of(interp, &target).is_some_and(|c| c.props().iter().any(|p| *p.name == *name)),
    ))
}

fn class_exists(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let name = string_arg(interp, args, 0)?;
    Ok(Value::Bool(
        interp
            .class(&name)
            .is_some_and(|c| c.kind == ClassKind::Class),
    ))
}

fn interface_exists(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let name = string_arg(interp, args, 0)?;
    Ok(Value::Bool(
        interp
            .class(&name)
            .is_some_and(|c| c.kind == ClassKind::Interface),
    ))
}

fn get_class(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    match args.first() {
        Some(Value::Object(obj)) => Ok(Value::from(obj.class().name())),
        Some(other) => {
            let given = other.clone();
            Err(super::type_error(interp, "get_class", 1, "object", &given))
        }
        None => Ok(Value::Bool(false)),
    }
}

fn get_parent_class(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let target = arg(args, 0);
    Ok(class_of(interp, &target)
        .and_then(|c| c.parent().cloned())
        .map_or(Value::Bool(false), |p| Value::from(p.name())))
}

fn get_class_methods(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let target = arg(args, 0);
    let Some(class) = class_of(interp, &target) else {
        return Ok(Value::empty_array());
    };
    let mut names: Vec<Rc<str>> = class.methods().map(|m| m.name.clone()).collect();
    names.sort();
    Ok(Value::array(ArrayData::from_values(
        names.into_iter().map(|n| Value::from(&*n)),
    )))
}

fn is_a(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let name = string_arg(interp, args, 1)?;
    let target = arg(args, 0);
    if matches!(target, Value::Str(_)) && !bool_arg(args, 2, false) {
        return Ok(Value::Bool(false));
    }
    Ok(Value::Bool(class_of(interp, &target).is_some_and(|c| c.is_a(&name))))
}

fn is_subclass_of(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let name = string_arg(interp, args, 1)?;
    let target = arg(args, 0);
    Ok(Value::Bool(class_of(interp, &target).is_some_and(|c| {
        !c.name().eq_ignore_ascii_case(name.trim_start_matches('\\')) && c.is_a(&name)
    })))
}

fn spl_object_id(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    match args.first() {
        Some(Value::Object(obj)) => Ok(Value::Int(i64::from(obj.id()))),
        other => {
            let given = other.cloned().unwrap_or_default();
            Err(super::type_error(interp, "spl_object_id", 1, "object", &given))
        }
    }
}

fn spl_object_hash(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let id = spl_object_id(interp, args)?.to_int();
    Ok(Value::from(format!("{id:032x}")))
}

fn iterator_to_array(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let preserve_keys = bool_arg(args, 1, true);
    let mut source = arg(args, 0);
    while let Value::Object(obj) = &source {
        if !obj.class().is_a("IteratorAggregate") {
            break;
        }
        let obj = obj.clone();
        source = interp.call_method(&obj, "getIterator", Vec::new(), None)?;
    }
    match source {
        Value::Array(data) if preserve_keys => Ok(Value::Array(data)),
        Value::Array(data) => Ok(Value::array(ArrayData::from_values(data.values().cloned()))),
        other => Err(super::type_error(
            interp,
            "iterator_to_array",
            1,
            "Traversable|array",
            &other,
        )),
    }
}

use anyhow::{Result, bail};
use conduit::{BufferSink, Error, HostError, HostFunction, HostObject, HostValue, Request};

use super::common::{block, run, runtime};

fn calculator() -> HostObject {
    HostObject::new()
        .with("name", "calc")
        .with(
            "add",
            HostFunction::new(|args| {
                let sum = args.arg(0).as_int().unwrap_or(0) + args.arg(1).as_int().unwrap_or(0);
                Ok(HostValue::Int(sum))
            }),
        )
        .with("fail", HostFunction::new(|_| Err(HostError::new("calculator broke"))))
}

#[tokio::test]
async fn properties_are_readable() -> Result<()> {
    let (value, body) = run("echo $_SERVER['CONTEXT']->name; return 1;", calculator()).await?;
    assert_eq!(value, HostValue::Int(1));
    assert_eq!(body, "calc");
    Ok(())
}

#[tokio::test]
async fn missing_context_is_null() -> Result<()> {
    let (value, _) = run("is_null($_SERVER['CONTEXT'])", HostValue::Undefined).await?;
    assert_eq!(value, HostValue::Bool(true));
    Ok(())
}

#[tokio::test]
async fn injected_false_dumps_as_bool() -> Result<()> {
    let context = HostObject::new().with("flag", false);
    let (_, body) = run("var_dump($_SERVER['CONTEXT']->flag);", context).await?;
    assert_eq!(body, "bool(false)\n");
    Ok(())
}

#[tokio::test]
async fn functions_are_callable_as_methods() -> Result<()> {
    let (value, _) = run("$_SERVER['CONTEXT']->add(2, 3)", calculator()).await?;
    assert_eq!(value, HostValue::Int(5));
    Ok(())
}

#[tokio::test]
async fn host_errors_are_catchable() -> Result<()> {
    let code = r"
        try {
            $_SERVER['CONTEXT']->fail();
            echo 'unreachable';
        } catch (Js\Exception $e) {
            echo get_class($e), ': ', $e->getMessage();
        }
    ";
    let (_, body) = run(code, calculator()).await?;
    assert_eq!(body, "Js\\Exception: calculator broke");
    Ok(())
}

#[tokio::test]
async fn uncaught_host_error_surfaces_unchanged() -> Result<()> {
    let original = HostError::new("exact instance");
    let raised = original.clone();
    let context = HostObject::new().with("fail", HostFunction::new(move |_| Err(raised.clone())));
    let err = runtime()?
        .execute(Request::source("$_SERVER['CONTEXT']->fail();").context(context).output(BufferSink::new()))
        .await
        .expect_err("request should fail");
    let Error::Host(err) = err else {
        bail!("expected a host error, got {err:?}");
    };
    assert!(err.same_as(&original));
    Ok(())
}

#[tokio::test]
async fn writes_reach_the_host_object() -> Result<()> {
    let context = HostObject::new();
    let code = r"
        $c = $_SERVER['CONTEXT'];
        $c->greeting = 'hello';
        $c->count = 3;
        unset($c->count);
        return isset($c->greeting);
    ";
    let (value, _) = run(&block(code), context.clone()).await?;
    assert_eq!(value, HostValue::Bool(true));
    assert_eq!(context.get("greeting"), Some(HostValue::from("hello")));
    assert!(!context.contains("count"));
    Ok(())
}

#[tokio::test]
async fn identity_is_preserved() -> Result<()> {
    let shared = HostObject::new().with("n", 1);
    let context = HostObject::new().with("a", shared.clone()).with("b", shared);
    let (value, _) = run("$_SERVER['CONTEXT']->a === $_SERVER['CONTEXT']->b", context).await?;
    assert_eq!(value, HostValue::Bool(true));
    Ok(())
}

#[tokio::test]
async fn host_objects_round_trip_to_the_same_value() -> Result<()> {
    let context = HostObject::new().with("n", 1);
    let (value, _) = run("$_SERVER['CONTEXT']", context.clone()).await?;
    let HostValue::Object(back) = value else {
        bail!("expected a host object, got {value:?}");
    };
    assert!(back.ptr_eq(&context));
    Ok(())
}

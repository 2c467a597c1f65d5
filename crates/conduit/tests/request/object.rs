use std::sync::Arc;

use anyhow::Result;
use conduit::{CallArgs, HostError, HostFunction, HostObject, HostResult, HostValue, ObjectProxy};
use parking_lot::Mutex;

use super::common::{Log, run};

const MAGIC: &str = r#"
class Magic {
    public $x = 1;
    public $empty = null;
    private $secret = 's';

    public function greet($name) { return "hi $name"; }
    public function __get($name) { echo "__get\n"; return "magic $name"; }
    public function __unset($name) { echo "__unset\n"; }
}
"#;

const HOOKED: &str = r#"
class Hooked {
    public $stored = null;

    public function __isset($name) { echo "__isset\n"; return $name === 'v'; }
    public function __set($name, $value) { echo "__set\n"; $this->stored = "$name=$value"; }
    public function __call($name, $args) { echo "__call\n"; return $name . ':' . implode(',', $args); }
}
"#;

/// Context whose `inspect` runs `check` on the object argument while the
/// script waits in the call.
fn inspecting<F, Fut>(check: F) -> HostObject
where
    F: Fn(ObjectProxy) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HostResult> + Send + 'static,
{
    let check = Arc::new(check);
    HostObject::new().with(
        "inspect",
        HostFunction::from_async(move |args: CallArgs| {
            let check = check.clone();
            async move {
                let Some(proxy) = args.arg(0).as_script_object().cloned() else {
                    return Err(HostError::new("not a script object"));
                };
                check(proxy).await
            }
        }),
    )
}

#[tokio::test]
async fn properties_then_methods_then_hooks() -> Result<()> {
    let log = Log::default();
    let notes = log.clone();
    let context = inspecting(move |obj| {
        let notes = notes.clone();
        async move {
            notes.push(obj.class_name());
            notes.push(obj.get("x").await?);
            notes.push(obj.call("greet", vec!["ann".into()]).await?);
            if let HostValue::Function(greet) = obj.get("greet").await? {
                notes.push(greet.call(CallArgs::new(vec!["bob".into()])).await?);
            }
            notes.push(obj.get("$greet").await?);
            notes.push(obj.get("secret").await?);
            Ok::<_, HostError>(HostValue::Undefined)
        }
    });
    let (_, body) = run(&format!("{MAGIC} $_SERVER['CONTEXT']->inspect(new Magic);"), context).await?;
    assert_eq!(
        log.take(),
        [
            HostValue::from("Magic"),
            HostValue::Int(1),
            HostValue::from("hi ann"),
            HostValue::from("hi bob"),
            HostValue::from("magic greet"),
            HostValue::from("magic secret"),
        ]
    );
    assert_eq!(body, "__get\n__get\n");
    Ok(())
}

#[tokio::test]
async fn presence_queries() -> Result<()> {
    let log = Log::default();
    let notes = log.clone();
    let context = inspecting(move |obj| {
        let notes = notes.clone();
        async move {
            notes.push(obj.has("$empty").await?);
            notes.push(obj.exists("empty").await?);
            notes.push(obj.is_empty("x").await?);
            notes.push(obj.has("greet").await?);
            notes.push(obj.has("$greet").await?);
            notes.push(obj.has("__call").await?);
            notes.push(obj.has("missing").await?);
            Ok::<_, HostError>(HostValue::Undefined)
        }
    });
    let (_, body) = run(&format!("{MAGIC} $_SERVER['CONTEXT']->inspect(new Magic);"), context).await?;
    assert_eq!(
        log.take(),
        [
            HostValue::Bool(false),
            HostValue::Bool(true),
            HostValue::Bool(false),
            HostValue::Bool(true),
            HostValue::Bool(false),
            HostValue::Bool(true),
            HostValue::Bool(false),
        ]
    );
    assert_eq!(body, "");
    Ok(())
}

#[tokio::test]
async fn writes_and_deletes() -> Result<()> {
    let log = Log::default();
    let notes = log.clone();
    let context = inspecting(move |obj| {
        let notes = notes.clone();
        async move {
            notes.push(obj.set("greet", 1).await?);
            notes.push(obj.set("constructor", 1).await?);
            notes.push(obj.set("x", 5).await?);
            notes.push(obj.set("added", "new").await?);
            notes.push(obj.delete("x").await?);
            notes.push(obj.delete("x").await?);
            notes.push(obj.get("x").await?);
            Ok::<_, HostError>(HostValue::Undefined)
        }
    });
    let code = format!("{MAGIC} $m = new Magic; $_SERVER['CONTEXT']->inspect($m); echo $m->added;");
    let (_, body) = run(&code, context).await?;
    assert_eq!(
        log.take(),
        [
            HostValue::Bool(false),
            HostValue::Bool(false),
            HostValue::Bool(true),
            HostValue::Bool(true),
            HostValue::Bool(true),
            HostValue::Bool(true),
            HostValue::from("magic x"),
        ]
    );
    assert_eq!(body, "__unset\n__get\nnew");
    Ok(())
}

#[tokio::test]
async fn call_forwarder_and_constructor() -> Result<()> {
    let log = Log::default();
    let notes = log.clone();
    let context = inspecting(move |obj| {
        let notes = notes.clone();
        async move {
            notes.push(obj.call("__call", vec!["greet".into(), "cy".into()]).await?);
            if let HostValue::Function(ctor) = obj.get("constructor").await? {
                notes.push(ctor.ptr_eq(&ObjectProxy::constructor()));
            }
            let missing = obj.call("nope", Vec::new()).await;
            notes.push(missing.is_err());
            Ok::<_, HostError>(HostValue::Undefined)
        }
    });
    run(&format!("{MAGIC} $_SERVER['CONTEXT']->inspect(new Magic);"), context).await?;
    assert_eq!(
        log.take(),
        [HostValue::from("hi cy"), HostValue::Bool(true), HostValue::Bool(true)]
    );
    Ok(())
}

#[tokio::test]
async fn closures_are_invocable() -> Result<()> {
    let context = inspecting(|obj| async move { obj.invoke(vec![HostValue::Int(21)]).await.map_err(HostError::from) });
    let (value, _) = run("$_SERVER['CONTEXT']->inspect(fn($n) => $n * 2)", context).await?;
    assert_eq!(value, HostValue::Int(42));
    Ok(())
}

#[tokio::test]
async fn same_object_same_handle() -> Result<()> {
    let seen = Log::default();
    let first = Arc::new(Mutex::new(None::<ObjectProxy>));
    let notes = seen.clone();
    let context = inspecting(move |obj| {
        let first = first.clone();
        let notes = notes.clone();
        async move {
            let mut first = first.lock();
            match &*first {
                Some(earlier) => notes.push(earlier.same_handle(&obj)),
                None => *first = Some(obj),
            }
            Ok::<_, HostError>(HostValue::Undefined)
        }
    });
    let code = format!("{MAGIC} $m = new Magic; $c = $_SERVER['CONTEXT']; $c->inspect($m); $c->inspect($m);");
    run(&code, context).await?;
    assert_eq!(seen.take(), [HostValue::Bool(true)]);
    Ok(())
}

#[tokio::test]
async fn isset_hook_runs_once_per_query() -> Result<()> {
    let log = Log::default();
    let notes = log.clone();
    let context = inspecting(move |obj| {
        let notes = notes.clone();
        async move {
            notes.push(obj.has("$v").await?);
            Ok::<_, HostError>(HostValue::Undefined)
        }
    });
    let (_, body) = run(&format!("{HOOKED} $_SERVER['CONTEXT']->inspect(new Hooked);"), context).await?;
    assert_eq!(log.take(), [HostValue::Bool(true)]);
    assert_eq!(body, "__isset\n");
    Ok(())
}

#[tokio::test]
async fn set_and_call_hooks_are_reachable() -> Result<()> {
    let log = Log::default();
    let notes = log.clone();
    let context = inspecting(move |obj| {
        let notes = notes.clone();
        async move {
            notes.push(obj.set("w", 5).await?);
            notes.push(obj.call("shout", vec![1.into(), 2.into()]).await?);
            Ok::<_, HostError>(HostValue::Undefined)
        }
    });
    let code = format!("{HOOKED} $h = new Hooked; $_SERVER['CONTEXT']->inspect($h); echo $h->stored;");
    let (_, body) = run(&code, context).await?;
    assert_eq!(log.take(), [HostValue::Bool(true), HostValue::from("shout:1,2")]);
    assert_eq!(body, "__set\n__call\nw=5");
    Ok(())
}

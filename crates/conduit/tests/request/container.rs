use anyhow::{Context, Result, bail};
use conduit::{BufferSink, CallArgs, ContainerProxy, Error, HostError, HostFunction, HostObject, HostResult, HostValue, Key, Request};

use super::common::{Log, block, run, runtime};

fn container(value: &HostValue) -> Result<&ContainerProxy> {
    value
        .as_container()
        .with_context(|| format!("expected a container, got {value:?}"))
}

/// Context whose `inspect` hands each argument to `check` while the script
/// is suspended in the call.
fn inspecting<F, Fut>(check: F) -> HostObject
where
    F: Fn(CallArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HostResult> + Send + 'static,
{
    HostObject::new().with("inspect", HostFunction::from_async(check))
}

#[tokio::test]
async fn length_is_the_next_index() -> Result<()> {
    let log = Log::default();
    let notes = log.clone();
    let context = inspecting(move |args| {
        let notes = notes.clone();
        async move {
            let c = args.arg(0);
            let c = container(&c).map_err(|e| HostError::new(e.to_string()))?;
            notes.push(i64::try_from(c.size().await?).unwrap_or(-1));
            notes.push(c.length().await?);
            notes.push(c.get(1).await?);
            notes.push(c.get("three").await?);
            notes.push(c.has("1").await?);
            notes.push(c.get(7).await?);
            Ok::<_, HostError>(HostValue::Undefined)
        }
    });
    run("$_SERVER['CONTEXT']->inspect([1 => 2, 'three' => 'four']);", context).await?;
    assert_eq!(
        log.take(),
        [
            HostValue::Int(2),
            HostValue::Int(2),
            HostValue::Int(2),
            HostValue::from("four"),
            HostValue::Bool(true),
            HostValue::Undefined,
        ]
    );
    Ok(())
}

#[tokio::test]
async fn setting_length_truncates_indices_only() -> Result<()> {
    let log = Log::default();
    let notes = log.clone();
    let context = inspecting(move |args| {
        let notes = notes.clone();
        async move {
            let c = args.arg(0);
            let c = container(&c).map_err(|e| HostError::new(e.to_string()))?;
            c.set_length(1).await?;
            let keys = c.keys().await?;
            notes.push(HostValue::Array(keys.into_iter().map(HostValue::from).collect()));
            notes.push(c.length().await?);
            Ok::<_, HostError>(HostValue::Undefined)
        }
    });
    run("$_SERVER['CONTEXT']->inspect(['a', 'b', 'x' => 'y', 'c']);", context).await?;
    assert_eq!(
        log.take(),
        [
            HostValue::Array(vec![HostValue::Int(0), HostValue::from("x")]),
            HostValue::Int(1),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn delete_leaves_the_length_alone() -> Result<()> {
    let log = Log::default();
    let notes = log.clone();
    let context = inspecting(move |args| {
        let notes = notes.clone();
        async move {
            let c = args.arg(0);
            let c = container(&c).map_err(|e| HostError::new(e.to_string()))?;
            notes.push(c.delete(3).await?);
            notes.push(c.length().await?);
            notes.push(i64::try_from(c.size().await?).unwrap_or(-1));
            notes.push(c.has(3).await?);
            Ok::<_, HostError>(HostValue::Undefined)
        }
    });
    run("$_SERVER['CONTEXT']->inspect([1, 2, 3, 4]);", context).await?;
    assert_eq!(
        log.take(),
        [
            HostValue::Bool(true),
            HostValue::Int(4),
            HostValue::Int(3),
            HostValue::Bool(false),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn property_surface_reserves_method_names() -> Result<()> {
    let log = Log::default();
    let notes = log.clone();
    let context = inspecting(move |args| {
        let notes = notes.clone();
        async move {
            let c = args.arg(0);
            let c = container(&c).map_err(|e| HostError::new(e.to_string()))?;
            notes.push(c.set_property("keys", 1).await?);
            notes.push(c.set_property("0", "zero").await?);
            notes.push(c.set_property("named", 1).await?);
            notes.push(c.has_property("size").await?);
            notes.push(c.get_property("named").await?);

            let HostValue::Function(set) = c.get_property("set").await? else {
                return Err(HostError::new("set is not a function"));
            };
            set.call(CallArgs::new(vec!["length".into(), "stored".into()])).await?;
            notes.push(c.get("length").await?);
            notes.push(c.get(0).await?);
            Ok::<_, HostError>(HostValue::Undefined)
        }
    });
    run("$_SERVER['CONTEXT']->inspect([]);", context).await?;
    assert_eq!(
        log.take(),
        [
            HostValue::Bool(false),
            HostValue::Bool(true),
            HostValue::Bool(false),
            HostValue::Bool(true),
            HostValue::Undefined,
            HostValue::from("stored"),
            HostValue::from("zero"),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn plain_arrays_cross_as_copies() -> Result<()> {
    let context = inspecting(|args| async move {
        let c = args.arg(0);
        let c = container(&c).map_err(|e| HostError::new(e.to_string()))?;
        c.set(0, 100).await?;
        c.delete(1).await?;
        Ok::<_, HostError>(HostValue::Undefined)
    });
    let (_, body) = run(
        &block("$a = [1, 2]; $_SERVER['CONTEXT']->inspect($a); echo implode(',', $a);"),
        context,
    ).await?;
    assert_eq!(body, "1,2");
    Ok(())
}

#[tokio::test]
async fn containers_return_as_arrays() -> Result<()> {
    let context = inspecting(|args| async move { Ok::<_, HostError>(args.arg(0)) });
    let (_, body) = run(
        &block("$back = $_SERVER['CONTEXT']->inspect(['k' => [1, 2]]); echo count($back['k']);"),
        context,
    )
    .await?;
    assert_eq!(body, "2");
    Ok(())
}

#[tokio::test]
async fn detached_after_settlement() -> Result<()> {
    let value = runtime()?
        .execute(Request::source("[1, 2, 3]").output(BufferSink::new()))
        .await
        .context("request failed")?;
    let c = container(&value)?;
    match c.size().await {
        Err(Error::Detached) => Ok(()),
        other => bail!("expected a detached proxy, got {other:?}"),
    }
}

#[test]
fn numeric_strings_are_indices() {
    assert_eq!(Key::from("12"), Key::Index(12));
    assert_eq!(Key::from("012"), Key::Name("012".to_string()));
}

use anyhow::Result;
use conduit::{CallArgs, HostError, HostFunction, HostObject, HostValue};

use super::common::{block, run};

/// `push(list, value)` appends through whatever container it is given.
fn pusher() -> HostObject {
    HostObject::new().with(
        "push",
        HostFunction::from_async(|args: CallArgs| async move {
            let list = args.arg(0);
            let Some(list) = list.as_container() else {
                return Err(HostError::new("not a container"));
            };
            let len = list.length().await?;
            list.set(len, args.arg(1)).await?;
            Ok(HostValue::Bool(list.is_by_ref()))
        }),
    )
}

#[tokio::test]
async fn byref_aliases_the_variable() -> Result<()> {
    let code = r"
        $list = [1, 2];
        $aliased = $_SERVER['CONTEXT']->push(new Js\ByRef($list), 3);
        echo implode(',', $list), ' ', var_export($aliased, true);
    ";
    let (_, body) = run(&block(code), pusher()).await?;
    assert_eq!(body, "1,2,3 true");
    Ok(())
}

#[tokio::test]
async fn plain_array_is_untouched() -> Result<()> {
    let code = r"
        $list = [1, 2];
        $aliased = $_SERVER['CONTEXT']->push($list, 3);
        echo implode(',', $list), ' ', var_export($aliased, true);
    ";
    let (_, body) = run(&block(code), pusher()).await?;
    assert_eq!(body, "1,2 false");
    Ok(())
}

#[tokio::test]
async fn copies_taken_before_aliasing_are_untouched() -> Result<()> {
    let context = HostObject::new().with(
        "poke",
        HostFunction::from_async(|args: CallArgs| async move {
            let list = args.arg(0);
            let Some(list) = list.as_container() else {
                return Err(HostError::new("not a container"));
            };
            list.set(0, 99).await?;
            Ok(HostValue::Undefined)
        }),
    );
    let code = r"
        $a = [1];
        $copy = $a;
        $_SERVER['CONTEXT']->poke(new Js\ByRef($a));
        echo $copy[0], ' ', $a[0];
    ";
    let (_, body) = run(&block(code), context).await?;
    assert_eq!(body, "1 99");
    Ok(())
}

#[tokio::test]
async fn byref_scalar_crosses_as_its_value() -> Result<()> {
    let context = HostObject::new().with("identity", HostFunction::new(|args| Ok(args.arg(0))));
    let (value, _) = run(
        &block("$n = 41; return $_SERVER['CONTEXT']->identity(new Js\\ByRef($n)) + 1;"),
        context,
    ).await?;
    assert_eq!(value, HostValue::Int(42));
    Ok(())
}

#[tokio::test]
async fn byref_get_value_reads_through() -> Result<()> {
    let (value, _) = run(
        &block("$a = [1]; $ref = new Js\\ByRef($a); $a[] = 2; return count($ref->getValue());"),
        HostValue::Undefined,
    )
    .await?;
    assert_eq!(value, HostValue::Int(2));
    Ok(())
}

use anyhow::Result;
use conduit::{CallArgs, HostError, HostFunction, HostObject, HostValue};

use super::common::run;

const CATCHING: &str = r"
    try {
        echo $_SERVER['CONTEXT']->later(12, new Js\Wait());
    } catch (Js\Exception $e) {
        echo 'exception caught: ', $e->getMessage();
    }
";

fn context(later: HostFunction) -> HostObject {
    HostObject::new().with("later", later)
}

#[tokio::test]
async fn callback_value_is_the_result() -> Result<()> {
    let later = HostFunction::new(|mut args: CallArgs| {
        let n = args.arg(0).as_int().unwrap_or(0);
        let Some(done) = args.take_wait() else {
            return Err(HostError::new("no callback"));
        };
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            done.resolve(n * 2);
        });
        Ok(HostValue::Undefined)
    });
    let (_, body) = run(CATCHING, context(later)).await?;
    assert_eq!(body, "24");
    Ok(())
}

#[tokio::test]
async fn wait_marker_is_not_passed_on() -> Result<()> {
    let later = HostFunction::new(|mut args: CallArgs| {
        let count = i64::try_from(args.len()).unwrap_or(-1);
        if let Some(done) = args.take_wait() {
            done.resolve(count);
        }
        Ok(HostValue::Undefined)
    });
    let (_, body) = run(CATCHING, context(later)).await?;
    assert_eq!(body, "1");
    Ok(())
}

#[tokio::test]
async fn sync_error_wins_over_early_callback() -> Result<()> {
    let later = HostFunction::new(|mut args: CallArgs| {
        if let Some(done) = args.take_wait() {
            done.resolve("too early");
        }
        Err(HostError::new("early"))
    });
    let (_, body) = run(CATCHING, context(later)).await?;
    assert_eq!(body, "exception caught: early");
    Ok(())
}

#[tokio::test]
async fn late_rejection_is_thrown() -> Result<()> {
    let later = HostFunction::new(|mut args: CallArgs| {
        let Some(done) = args.take_wait() else {
            return Err(HostError::new("no callback"));
        };
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            done.reject(HostError::new("late"));
        });
        Ok(HostValue::Undefined)
    });
    let (_, body) = run(CATCHING, context(later)).await?;
    assert_eq!(body, "exception caught: late");
    Ok(())
}

#[tokio::test]
async fn dropped_callback_is_thrown() -> Result<()> {
    let later = HostFunction::new(|mut args: CallArgs| {
        drop(args.take_wait());
        Ok(HostValue::Undefined)
    });
    let (_, body) = run(CATCHING, context(later)).await?;
    assert_eq!(body, "exception caught: callback dropped");
    Ok(())
}

#[tokio::test]
async fn async_functions_settle_through_the_callback() -> Result<()> {
    let later = HostFunction::from_async(|mut args: CallArgs| async move {
        tokio::task::yield_now().await;
        let n = args.arg(0).as_int().unwrap_or(0);
        if let Some(done) = args.take_wait() {
            done.resolve(n + 1);
        }
        Ok(HostValue::Undefined)
    });
    let (_, body) = run(CATCHING, context(later)).await?;
    assert_eq!(body, "13");
    Ok(())
}

#[tokio::test]
async fn async_function_ignoring_its_callback_rejects() -> Result<()> {
    let later = HostFunction::from_async(|args: CallArgs| async move {
        tokio::task::yield_now().await;
        Ok(HostValue::Int(args.arg(0).as_int().unwrap_or(0) + 1))
    });
    let (_, body) = run(CATCHING, context(later)).await?;
    assert_eq!(body, "exception caught: callback dropped");
    Ok(())
}

#[tokio::test]
async fn async_functions_without_wait_return_their_value() -> Result<()> {
    let later = HostFunction::from_async(|args: CallArgs| async move {
        tokio::task::yield_now().await;
        Ok(HostValue::Int(args.arg(0).as_int().unwrap_or(0) + 1))
    });
    let (value, _) = run("$_SERVER['CONTEXT']->later(12)", context(later)).await?;
    assert_eq!(value, HostValue::Int(13));
    Ok(())
}

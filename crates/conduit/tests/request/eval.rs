use std::io::Write as _;

use anyhow::{Context, Result, bail};
use conduit::{BufferSink, Error, HostValue, Request};

use super::common::{run, runtime};

#[tokio::test]
async fn first_expression_is_the_result() -> Result<()> {
    let (value, body) = run("1 + 2 * 3; 99", HostValue::Undefined).await?;
    assert_eq!(value, HostValue::Int(7));
    assert_eq!(body, "");
    Ok(())
}

#[tokio::test]
async fn echo_reaches_the_sink() -> Result<()> {
    let (value, body) = run("echo 'hello', ' ', 'world';", HostValue::Undefined).await?;
    assert_eq!(value, HostValue::Null);
    assert_eq!(body, "hello world");
    Ok(())
}

#[tokio::test]
async fn exit_settles_with_null() -> Result<()> {
    let (value, body) = run("echo 'a'; exit; echo 'b';", HostValue::Undefined).await?;
    assert_eq!(value, HostValue::Null);
    assert_eq!(body, "a");
    Ok(())
}

#[tokio::test]
async fn uncaught_exception_rejects() -> Result<()> {
    let out = BufferSink::new();
    let err = runtime()?
        .execute(Request::source("echo 'before'; throw new RuntimeException('boom');").output(out.clone()))
        .await
        .expect_err("request should fail");
    let Error::Script { class, message } = err else {
        bail!("expected a script error, got {err:?}");
    };
    assert_eq!(class, "RuntimeException");
    assert_eq!(message, "boom");
    assert_eq!(out.body_string(), "before");
    Ok(())
}

#[tokio::test]
async fn parse_error_rejects() -> Result<()> {
    let err = runtime()?
        .execute(Request::source("1 +;").output(BufferSink::new()))
        .await
        .expect_err("request should fail");
    assert!(matches!(err, Error::Parse(_)), "{err:?}");
    Ok(())
}

#[tokio::test]
async fn deep_recursion_fits_the_engine_stack() -> Result<()> {
    let (value, _) = run(
        "function down($n) { return $n ? down($n - 1) : 0; } return down(200);",
        HostValue::Undefined,
    )
    .await?;
    assert_eq!(value, HostValue::Int(0));
    Ok(())
}

#[tokio::test]
async fn runaway_nesting_is_a_parse_error() -> Result<()> {
    let source = format!("{}1{}", "(".repeat(4096), ")".repeat(4096));
    let err = runtime()?
        .execute(Request::source(source).output(BufferSink::new()))
        .await
        .expect_err("request should fail");
    assert!(matches!(err, Error::Parse(_)), "{err:?}");
    Ok(())
}

#[tokio::test]
async fn file_returns_its_value() -> Result<()> {
    let mut file = tempfile::NamedTempFile::new().context("failed to create script")?;
    write!(file, "<?php\necho isset($_SERVER['SCRIPT_FILENAME']) ? 'set' : 'unset';\nreturn 5;\n")
        .context("failed to write script")?;
    let out = BufferSink::new();
    let value = runtime()?
        .execute(Request::file(file.path()).output(out.clone()))
        .await
        .context("request failed")?;
    assert_eq!(value, HostValue::Int(5));
    assert_eq!(out.body_string(), "set");
    Ok(())
}

#[tokio::test]
async fn startup_file_declarations_are_available() -> Result<()> {
    let mut file = tempfile::NamedTempFile::new().context("failed to create startup file")?;
    write!(file, "<?php\nfunction greet($name) {{ return \"hi $name\"; }}\n").context("failed to write startup file")?;
    let runtime = conduit::Runtime::builder()
        .startup_file(file.path())
        .build()
        .context("failed to build runtime")?;
    let value = runtime
        .execute(Request::source("greet('you')").output(BufferSink::new()))
        .await
        .context("request failed")?;
    assert_eq!(value.as_str(), Some("hi you"));
    Ok(())
}

#[tokio::test]
async fn requests_do_not_share_state() -> Result<()> {
    let runtime = runtime()?;
    let first = runtime
        .execute(Request::source("function only_here() {} return 1;").output(BufferSink::new()))
        .await
        .context("first request failed")?;
    let second = runtime
        .execute(Request::source("function_exists('only_here') ? 'leaked' : 'fresh'").output(BufferSink::new()))
        .await
        .context("second request failed")?;
    assert_eq!(first, HostValue::Int(1));
    assert_eq!(second.as_str(), Some("fresh"));
    Ok(())
}

use anyhow::{Context, Result};
use conduit::{BufferSink, Request};

use super::common::runtime;

async fn body(request: Request) -> Result<String> {
    let out = BufferSink::new();
    runtime()?
        .execute(request.output(out.clone()))
        .await
        .context("request failed")?;
    Ok(out.body_string())
}

#[tokio::test]
async fn no_args_leaves_argv_undefined() -> Result<()> {
    let out = body(Request::source("var_dump($argc ?? null, $argv ?? null);")).await?;
    assert_eq!(out, "NULL\nNULL\n");
    Ok(())
}

#[tokio::test]
async fn args_arrive_as_strings() -> Result<()> {
    let request = Request::source("echo $argc, ' '; var_dump($argv);").args(["1", "abc"]);
    let out = body(request).await?;
    assert_eq!(
        out,
        "2 array(2) {\n  [0]=>\n  string(1) \"1\"\n  [1]=>\n  string(3) \"abc\"\n}\n"
    );
    Ok(())
}

use anyhow::{Context, Result};
use bytes::Bytes;
use conduit::{BufferSink, HttpRequestInfo, Request, Runtime, RuntimeConfig};
use http::{HeaderValue, Method, StatusCode, Uri, header};
use tokio_stream::StreamExt as _;

use super::common::{block, runtime};

async fn serve(runtime: &Runtime, request: Request) -> Result<BufferSink> {
    let out = BufferSink::new();
    runtime
        .execute(request.output(out.clone()))
        .await
        .context("request failed")?;
    Ok(out)
}

fn get(uri: &'static str) -> HttpRequestInfo {
    HttpRequestInfo::new(Method::GET, Uri::from_static(uri))
}

#[tokio::test]
async fn query_string_populates_get() -> Result<()> {
    let request = Request::source("var_dump($_GET);").http(get("/index.php?abc=def"));
    let out = serve(&runtime()?, request).await?;
    assert_eq!(out.body_string(), "array(1) {\n  [\"abc\"]=>\n  string(3) \"def\"\n}\n");
    Ok(())
}

#[tokio::test]
async fn plus_in_query_decodes_to_space() -> Result<()> {
    let request = Request::source("var_dump($_GET);").http(get("/index.php?abc=def&foo=bar+bat"));
    let out = serve(&runtime()?, request).await?;
    assert_eq!(
        out.body_string(),
        "array(2) {\n  [\"abc\"]=>\n  string(3) \"def\"\n  [\"foo\"]=>\n  string(7) \"bar bat\"\n}\n"
    );
    Ok(())
}

#[tokio::test]
async fn form_body_populates_post() -> Result<()> {
    let info = HttpRequestInfo::new(Method::POST, Uri::from_static("/submit?src=q"))
        .header(header::CONTENT_TYPE, HeaderValue::from_static("application/x-www-form-urlencoded"));
    let body = tokio_stream::iter([Bytes::from_static(b"foo=bar"), Bytes::from_static(b"&baz=1")])
        .map(Ok::<_, Box<dyn std::error::Error + Send + Sync>>);
    let request = Request::source(
        "echo $_POST['foo'], '|', $_REQUEST['baz'], '|', $_REQUEST['src'], '|', file_get_contents('php://input');",
    )
    .http(info)
    .input(body);
    let out = serve(&runtime()?, request).await?;
    assert_eq!(out.body_string(), "bar|1|q|foo=bar&baz=1");
    Ok(())
}

#[tokio::test]
async fn cookies_are_parsed() -> Result<()> {
    let info = get("/").header(header::COOKIE, HeaderValue::from_static("foo=bar; bat=ball"));
    let request = Request::source("echo $_COOKIE['foo'], ' ', $_COOKIE['bat'];").http(info);
    let out = serve(&runtime()?, request).await?;
    assert_eq!(out.body_string(), "bar ball");
    Ok(())
}

#[tokio::test]
async fn headers_reach_the_response() -> Result<()> {
    let request = Request::source(block("setcookie('a', 'b'); setcookie('c', 'd', 0, '/'); echo 'ok';")).http(get("/"));
    let out = serve(&runtime()?, request).await?;
    assert_eq!(out.status(), StatusCode::OK);
    assert_eq!(out.header_values("set-cookie"), ["a=b", "c=d; path=/"]);
    assert_eq!(out.header_values("x-powered-by").len(), 1);
    assert_eq!(out.header_values("content-type"), ["text/html; charset=UTF-8"]);
    Ok(())
}

#[tokio::test]
async fn status_line_sets_the_status() -> Result<()> {
    let request = Request::source(block("http_response_code(404); echo 'missing';"));
    let out = serve(&runtime()?, request).await?;
    assert_eq!(out.status(), StatusCode::NOT_FOUND);
    assert_eq!(out.body_string(), "missing");
    Ok(())
}

#[tokio::test]
async fn expose_can_be_disabled() -> Result<()> {
    let runtime = Runtime::builder()
        .config(RuntimeConfig {
            expose: false,
            ..RuntimeConfig::default()
        })
        .build()
        .context("failed to build runtime")?;
    let out = serve(&runtime, Request::source("echo 1;")).await?;
    assert!(out.header_values("x-powered-by").is_empty());
    Ok(())
}

#[tokio::test]
async fn server_variables_describe_the_request() -> Result<()> {
    let info = get("/path/page?x=1")
        .header(header::HOST, HeaderValue::from_static("example.test"))
        .remote_addr("192.0.2.7:40000".parse()?);
    let code = r"
        $s = $_SERVER;
        echo $s['REQUEST_METHOD'], ' ', $s['REQUEST_URI'], ' ', $s['QUERY_STRING'], ' ', $s['HTTP_HOST'], ' ',
            $s['REMOTE_ADDR'], ':', $s['REMOTE_PORT'], ' ', $s['GATEWAY_INTERFACE'], ' ', $s['DOCUMENT_ROOT'];
    ";
    let out = serve(&runtime()?, Request::source(block(code)).http(info)).await?;
    assert_eq!(
        out.body_string(),
        "GET /path/page?x=1 x=1 example.test 192.0.2.7:40000 CGI/1.1 /var/www"
    );
    Ok(())
}

#[tokio::test]
async fn server_init_has_the_last_word() -> Result<()> {
    let request = Request::source("echo $_SERVER['DOCUMENT_ROOT'], ' ', $_GET['v'];")
        .http(get("/?v=original"))
        .server_init(|vars| {
            vars.set("DOCUMENT_ROOT", "/srv/app");
            vars.set("QUERY_STRING", "v=rewritten");
        });
    let out = serve(&runtime()?, request).await?;
    assert_eq!(out.body_string(), "/srv/app rewritten");
    Ok(())
}

#[tokio::test]
async fn no_http_means_no_request_variables() -> Result<()> {
    let out = serve(
        &runtime()?,
        Request::source("echo isset($_SERVER['REQUEST_METHOD']) ? 'http' : 'cli', ' ', count($_GET);"),
    )
    .await?;
    assert_eq!(out.body_string(), "cli 0");
    Ok(())
}

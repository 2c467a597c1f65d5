//! Script environment: `$_SERVER` and the request superglobals.

use std::rc::Rc;

use conduit_engine::{ArrayData, ArrayKey, Interpreter, Result as EngineResult, Value};
use smallvec::SmallVec;
use url::form_urlencoded;

use super::{HttpRequestInfo, Script};
use crate::{
    internal::{
        bridge::{self, Bridge},
        marshal,
    },
    runtime::RuntimeConfig,
    value::HostValue,
};

const READ_CHUNK: usize = 8192;
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// `$_SERVER` under construction: ordered, and setting an existing name
/// replaces its value in place.
#[derive(Debug, Clone, Default)]
pub struct ServerVars(Vec<(String, HostValue)>);

impl ServerVars {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<HostValue>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == name) {
            Some((_, slot)) => *slot = value,
            None => self.0.push((name, value)),
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&HostValue> {
        self.0.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn remove(&mut self, name: &str) -> Option<HostValue> {
        let index = self.0.iter().position(|(k, _)| k == name)?;
        Some(self.0.remove(index).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HostValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(HostValue::as_str)
    }
}

impl IntoIterator for ServerVars {
    type Item = (String, HostValue);
    type IntoIter = std::vec::IntoIter<(String, HostValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// `Content-Type` becomes `HTTP_CONTENT_TYPE`, and so on.
fn header_var(name: &str) -> String {
    let mut var = String::with_capacity(name.len() + 5);
    var.push_str("HTTP_");
    var.extend(name.chars().map(|c| {
        if c.is_ascii_alphabetic() {
            c.to_ascii_uppercase()
        } else {
            '_'
        }
    }));
    var
}

/// Builds `$_SERVER` for a request, before the caller's init hook.
pub(crate) fn server_vars(
    config: &RuntimeConfig,
    script: &Script,
    context: HostValue,
    http: Option<&HttpRequestInfo>,
) -> ServerVars {
    let mut vars = ServerVars::new();
    vars.set("CONTEXT", context);
    if let Script::File(path) = script {
        let path = path.display().to_string();
        vars.set("PHP_SELF", path.clone());
        vars.set("SCRIPT_FILENAME", path);
    }
    let Some(http) = http else {
        return vars;
    };

    for name in http.headers.keys() {
        let mut values = http.headers.get_all(name).iter();
        let (Some(value), None) = (values.next(), values.next()) else {
            continue;
        };
        match value.to_str() {
            Ok(value) => vars.set(header_var(name.as_str()), value),
            Err(_) => vars.set(header_var(name.as_str()), HostValue::Bytes(value.as_bytes().to_vec().into())),
        }
    }
    if let Ok(path) = std::env::var("PATH") {
        vars.set("PATH", path);
    }
    vars.set("SERVER_SIGNATURE", format!("<address>{}</address>", config.server_software));
    vars.set("SERVER_SOFTWARE", config.server_software.clone());
    vars.set("SERVER_PROTOCOL", format!("{:?}", http.version));
    vars.set("GATEWAY_INTERFACE", "CGI/1.1");
    let scheme = http.uri.scheme_str().unwrap_or("http");
    vars.set("REQUEST_SCHEME", scheme);
    vars.set("REQUEST_METHOD", http.method.as_str());
    let target = http.uri.path_and_query().map_or("/", |pq| pq.as_str());
    vars.set("REQUEST_URI", target);
    vars.set("QUERY_STRING", http.uri.query().unwrap_or_default());
    for (header, var) in [
        (http::header::CONTENT_TYPE, "CONTENT_TYPE"),
        (http::header::CONTENT_LENGTH, "CONTENT_LENGTH"),
    ] {
        if let Some(value) = http.headers.get(header).and_then(|v| v.to_str().ok()) {
            vars.set(var, value);
        }
    }
    vars.set("SERVER_ADMIN", config.server_admin.clone());
    if let Some(addr) = http.remote_addr {
        vars.set("REMOTE_ADDR", addr.ip().to_string());
        vars.set("REMOTE_PORT", i64::from(addr.port()));
    }
    if let Some(addr) = http.local_addr {
        vars.set("SERVER_ADDR", addr.ip().to_string());
        vars.set("SERVER_PORT", i64::from(addr.port()));
    }
    vars.set("DOCUMENT_ROOT", config.document_root.clone());
    vars
}

/// Populates the superglobals and `$argv`/`$argc` on the engine thread.
///
/// `$_GET`, `$_COOKIE` and `$_POST` follow the final `$_SERVER`, so an init
/// hook that rewrites `QUERY_STRING` changes `$_GET` as well.
pub(crate) fn install(bridge: &Rc<Bridge>, interp: &mut Interpreter, vars: ServerVars, args: &[String]) -> EngineResult<()> {
    let query = vars.text("QUERY_STRING").map(str::to_string);
    let cookies = vars.text("HTTP_COOKIE").map(str::to_string);
    let is_form_post = vars.text("REQUEST_METHOD") == Some("POST")
        && vars
            .text("CONTENT_TYPE")
            .is_some_and(|t| t.to_ascii_lowercase().starts_with(FORM_CONTENT_TYPE));

    let mut server = ArrayData::new();
    for (name, value) in vars {
        let value = marshal::to_script(bridge, interp, value)?;
        server.insert(ArrayKey::from_str_key(&name), value);
    }
    interp.set_superglobal("_SERVER", Value::array(server));

    let get = query.map(|q| parse_form(q.as_bytes())).unwrap_or_default();
    let cookie = cookies.map(|c| parse_cookies(&c)).unwrap_or_default();
    let post = if is_form_post {
        let mut body = Vec::new();
        loop {
            let chunk = bridge::read_input(bridge, READ_CHUNK)?;
            if chunk.is_empty() {
                break;
            }
            body.extend_from_slice(&chunk);
        }
        let form = parse_form(&body);
        interp.set_raw_input(body.into());
        form
    } else {
        ArrayData::new()
    };

    let mut request = get.clone();
    for (key, value) in post.iter() {
        request.insert(key.clone(), value.clone());
    }
    interp.set_superglobal("_GET", Value::array(get));
    interp.set_superglobal("_POST", Value::array(post));
    interp.set_superglobal("_COOKIE", Value::array(cookie));
    interp.set_superglobal("_REQUEST", Value::array(request));

    if !args.is_empty() {
        let argv = ArrayData::from_values(args.iter().map(|a| Value::from(a.as_str())));
        interp.set_global("argv", Value::array(argv));
        interp.set_global("argc", Value::Int(i64::try_from(args.len()).unwrap_or(i64::MAX)));
    }
    Ok(())
}

/// Parses `a=1&b[]=2&c[x]=3` into nested arrays.
fn parse_form(data: &[u8]) -> ArrayData {
    let mut out = ArrayData::new();
    for (key, value) in form_urlencoded::parse(data) {
        let (base, path) = split_key(&key);
        if base.is_empty() {
            continue;
        }
        let base = base.replace(['.', ' '], "_");
        assign(&mut out, Some(base.as_str()), &path, Value::from(value.into_owned()));
    }
    out
}

/// `a[b][]` splits into `a` and `["b", ""]`. Text after an unclosed `[` is
/// ignored.
fn split_key(key: &str) -> (&str, SmallVec<[&str; 4]>) {
    let mut path = SmallVec::new();
    let Some(open) = key.find('[').filter(|&i| i > 0) else {
        return (key, path);
    };
    let mut rest = &key[open..];
    while let Some(inner) = rest.strip_prefix('[') {
        let Some(close) = inner.find(']') else {
            break;
        };
        path.push(&inner[..close]);
        rest = &inner[close + 1..];
    }
    (&key[..open], path)
}

/// Stores `value` under `key` (appending for `None`), descending `path`.
fn assign(target: &mut ArrayData, key: Option<&str>, path: &[&str], value: Value) {
    let slot = key.map_or_else(|| ArrayKey::Int(target.next_free()), ArrayKey::from_str_key);
    let Some((next, rest)) = path.split_first() else {
        target.insert(slot, value);
        return;
    };
    let mut child = match target.get(&slot) {
        Some(Value::Array(existing)) => (**existing).clone(),
        _ => ArrayData::new(),
    };
    assign(&mut child, (!next.is_empty()).then_some(*next), rest, value);
    target.insert(slot, Value::array(child));
}

/// `Cookie: a=1; b=two%20words`. The first occurrence of a name wins.
fn parse_cookies(header: &str) -> ArrayData {
    let mut out = ArrayData::new();
    for pair in header.split(';') {
        let pair = pair.trim().replace('&', "%26");
        let Some((name, value)) = form_urlencoded::parse(pair.as_bytes()).next() else {
            continue;
        };
        let key = ArrayKey::from_str_key(&name);
        if name.is_empty() || out.contains_key(&key) {
            continue;
        }
        out.insert(key, Value::from(value.into_owned()));
    }
    out
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use http::{HeaderValue, Method, Uri};

    use super::*;

    fn text(array: &ArrayData, key: &str) -> Option<String> {
        match array.get(&ArrayKey::from_str_key(key))? {
            Value::Str(s) => Some(String::from_utf8_lossy(s).into_owned()),
            _ => None,
        }
    }

    #[test]
    fn set_replaces_in_place() {
        let mut vars = ServerVars::new();
        vars.set("A", 1);
        vars.set("B", 2);
        vars.set("A", 3);
        let names: Vec<_> = vars.iter().map(|(k, _)| k.to_string()).collect();
        assert_eq!(names, ["A", "B"]);
        assert_eq!(vars.get("A"), Some(&HostValue::Int(3)));
    }

    #[test]
    fn header_names_become_variables() {
        assert_eq!(header_var("content-type"), "HTTP_CONTENT_TYPE");
        assert_eq!(header_var("x-forwarded-for"), "HTTP_X_FORWARDED_FOR");
        assert_eq!(header_var("dnt1"), "HTTP_DNT_");
    }

    #[test]
    fn derives_http_variables() {
        let remote: SocketAddr = "10.0.0.2:51000".parse().unwrap();
        let local: SocketAddr = "10.0.0.1:8080".parse().unwrap();
        let info = HttpRequestInfo::new(Method::GET, Uri::from_static("/index.html?abc=def"))
            .header(http::header::ACCEPT, HeaderValue::from_static("text/html"))
            .header(http::header::VIA, HeaderValue::from_static("a"))
            .header(http::header::VIA, HeaderValue::from_static("b"))
            .remote_addr(remote)
            .local_addr(local);
        let config = RuntimeConfig::default();
        let vars = server_vars(&config, &Script::Source(String::new()), HostValue::Null, Some(&info));

        assert_eq!(vars.text("HTTP_ACCEPT"), Some("text/html"));
        assert!(vars.get("HTTP_VIA").is_none());
        assert_eq!(vars.text("REQUEST_METHOD"), Some("GET"));
        assert_eq!(vars.text("REQUEST_URI"), Some("/index.html?abc=def"));
        assert_eq!(vars.text("QUERY_STRING"), Some("abc=def"));
        assert_eq!(vars.text("SERVER_PROTOCOL"), Some("HTTP/1.1"));
        assert_eq!(vars.text("REMOTE_ADDR"), Some("10.0.0.2"));
        assert_eq!(vars.get("REMOTE_PORT"), Some(&HostValue::Int(51000)));
        assert_eq!(vars.get("SERVER_PORT"), Some(&HostValue::Int(8080)));
        assert_eq!(vars.text("DOCUMENT_ROOT"), Some("/var/www"));
        assert_eq!(vars.iter().next().map(|(k, _)| k), Some("CONTEXT"));
    }

    #[test]
    fn without_http_only_context_and_file() {
        let config = RuntimeConfig::default();
        let vars = server_vars(&config, &Script::File("/srv/app.php".into()), HostValue::Null, None);
        let names: Vec<_> = vars.iter().map(|(k, _)| k).collect();
        assert_eq!(names, ["CONTEXT", "PHP_SELF", "SCRIPT_FILENAME"]);
    }

    #[test]
    fn parses_forms() {
        let form = parse_form(b"abc=def&foo=bar+bat&list[]=1&list[]=2&map[k]=v&a.b=c");
        assert_eq!(text(&form, "abc").as_deref(), Some("def"));
        assert_eq!(text(&form, "foo").as_deref(), Some("bar bat"));
        assert_eq!(text(&form, "a_b").as_deref(), Some("c"));
        let Some(Value::Array(list)) = form.get(&ArrayKey::from_str_key("list")) else {
            panic!("list is not an array");
        };
        assert_eq!(list.len(), 2);
        assert_eq!(text(list, "1").as_deref(), Some("2"));
        let Some(Value::Array(map)) = form.get(&ArrayKey::from_str_key("map")) else {
            panic!("map is not an array");
        };
        assert_eq!(text(map, "k").as_deref(), Some("v"));
    }

    #[test]
    fn parses_cookies() {
        let cookies = parse_cookies("foo=bar; bat=ball; foo=again; odd=a%20b&c");
        assert_eq!(cookies.len(), 3);
        assert_eq!(text(&cookies, "foo").as_deref(), Some("bar"));
        assert_eq!(text(&cookies, "bat").as_deref(), Some("ball"));
        assert_eq!(text(&cookies, "odd").as_deref(), Some("a b&c"));
    }
}

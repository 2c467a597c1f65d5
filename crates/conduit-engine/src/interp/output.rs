use super::Interpreter;
use crate::{error::Result, value::Value};

/// Header bookkeeping for the current response.
#[derive(Debug, Default)]
pub(crate) struct OutputState {
    pub(crate) headers_sent: bool,
    pub(crate) status: Option<u16>,
    /// `(lowercase name, full header line)` in the order set.
    pub(crate) headers: Vec<(String, Vec<u8>)>,
}

const fn reason_phrase(code: u16) -> &'static str {
    match code {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        409 => "Conflict",
        410 => "Gone",
        413 => "Payload Too Large",
        415 => "Unsupported Media Type",
        418 => "I'm a teapot",
        422 => "Unprocessable Content",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "",
    }
}

/// Status code of an `HTTP/1.1 404 Not Found` line.
fn parse_status_line(line: &[u8]) -> Option<u16> {
    let text = std::str::from_utf8(line).ok()?;
    let mut parts = text.split_ascii_whitespace();
    parts.next()?.strip_prefix("HTTP/")?;
    let code: u16 = parts.next()?.parse().ok()?;
    (100..=999).contains(&code).then_some(code)
}

impl Interpreter {
    /// Writes body output, sending the header block first if needed.
    pub(crate) fn echo(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.send_headers()?;
        self.sapi.write(data)?;
        Ok(())
    }

    pub(crate) fn send_headers(&mut self) -> Result<()> {
        if self.output.headers_sent {
            return Ok(());
        }
        self.output.headers_sent = true;
        if let Some(code) = self.output.status {
            let line = format!("HTTP/1.1 {code} {}", reason_phrase(code));
            self.sapi.send_header(Some(line.trim_end().as_bytes()))?;
        }
        if let Some(expose) = &self.config.expose {
            let line = format!("X-Powered-By: {expose}");
            self.sapi.send_header(Some(line.as_bytes()))?;
        }
        if !self.output.headers.iter().any(|(name, _)| name == "content-type") {
            let line = format!(
                "Content-type: {}; charset={}",
                self.config.default_mimetype, self.config.default_charset
            );
            self.sapi.send_header(Some(line.as_bytes()))?;
        }
        let headers = std::mem::take(&mut self.output.headers);
        for (_, line) in &headers {
            self.sapi.send_header(Some(line))?;
        }
        self.output.headers = headers;
        self.sapi.send_header(None)?;
        Ok(())
    }

    /// `header($line, $replace, $code)`. Returns `false` once headers
    /// have gone out.
    pub(crate) fn header(&mut self, line: &[u8], replace: bool, code: Option<u16>) -> bool {
        if self.output.headers_sent {
            tracing::debug!("header() after output started");
            return false;
        }
        if let Some(status) = parse_status_line(line) {
            self.output.status = Some(status);
            return true;
        }
        let Some(colon) = line.iter().position(|&b| b == b':') else {
            tracing::debug!(line = %String::from_utf8_lossy(line), "malformed header() line");
            return false;
        };
        let name = String::from_utf8_lossy(&line[..colon]).trim().to_ascii_lowercase();
        if replace {
            self.output.headers.retain(|(n, _)| *n != name);
        }
        if name == "location" && code.is_none() && matches!(self.output.status, None | Some(200 | 201)) {
            self.output.status = Some(302);
        }
        self.output.headers.push((name, line.to_vec()));
        if let Some(code) = code {
            self.output.status = Some(code);
        }
        true
    }

    pub(crate) fn remove_header(&mut self, name: Option<&str>) {
        match name {
            Some(name) => {
                let name = name.to_ascii_lowercase();
                self.output.headers.retain(|(n, _)| *n != name);
            }
            None => self.output.headers.clear(),
        }
    }

    pub(crate) fn header_lines(&self) -> Vec<Value> {
        self.output
            .headers
            .iter()
            .map(|(_, line)| Value::string(line.clone()))
            .collect()
    }

    /// `http_response_code()`: the previous code, `false` if none was set.
    pub(crate) fn response_code(&mut self, code: Option<u16>) -> Value {
        let previous = self.output.status;
        if let Some(code) = code
            && !self.output.headers_sent
        {
            self.output.status = Some(code);
        }
        previous.map_or(Value::Bool(code.is_some()), |c| Value::Int(i64::from(c)))
    }

    #[must_use]
    pub const fn headers_sent(&self) -> bool {
        self.output.headers_sent
    }

    /// `flush()`: sends headers and waits for the embedder to hand off output.
    pub(crate) fn flush_output(&mut self) -> Result<()> {
        self.send_headers()?;
        self.sapi.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_lines() {
        assert_eq!(parse_status_line(b"HTTP/1.1 404 Not Found"), Some(404));
        assert_eq!(parse_status_line(b"HTTP/1.0 201"), Some(201));
        assert_eq!(parse_status_line(b"Content-Type: text/plain"), None);
        assert_eq!(parse_status_line(b"HTTP/1.1 abc"), None);
    }
}

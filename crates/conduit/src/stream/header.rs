use http::{HeaderName, HeaderValue, StatusCode};

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum HeaderLine {
    Status {
        code: StatusCode,
        reason: Option<String>,
    },
    Field {
        name: HeaderName,
        value: HeaderValue,
    },
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Malformed {
    Status,
    Field,
    Unrecognized,
}

/// Parses one raw header line as written by the script.
///
/// Bytes are taken one per character; values may carry any visible byte
/// including `0x80..=0xFF`.
pub(crate) fn parse(line: &[u8]) -> Result<HeaderLine, Malformed> {
    if line.starts_with(b"HTTP/") {
        return parse_status(&line[5..]).ok_or(Malformed::Status);
    }
    let Some(colon) = line.iter().position(|b| *b == b':') else {
        return Err(Malformed::Unrecognized);
    };
    let name = HeaderName::from_bytes(&line[..colon]).map_err(|_| Malformed::Field)?;
    let value = HeaderValue::from_bytes(line[colon + 1..].trim_ascii()).map_err(|_| Malformed::Field)?;
    Ok(HeaderLine::Field { name, value })
}

fn parse_status(rest: &[u8]) -> Option<HeaderLine> {
    let rest = std::str::from_utf8(rest).ok()?;
    let (version, rest) = rest.split_once(' ')?;
    let (major, minor) = version.split_once('.')?;
    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !digits(major) || !digits(minor) {
        return None;
    }
    let (code, reason) = match rest.trim_start().split_once(' ') {
        Some((code, reason)) => (code, Some(reason.trim())),
        None => (rest.trim(), None),
    };
    if code.len() != 3 {
        return None;
    }
    let code = StatusCode::from_bytes(code.as_bytes()).ok()?;
    Some(HeaderLine::Status {
        code,
        reason: reason.filter(|r| !r.is_empty()).map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_lines() {
        assert_eq!(
            parse(b"HTTP/1.1 404 Not Found"),
            Ok(HeaderLine::Status {
                code: StatusCode::NOT_FOUND,
                reason: Some("Not Found".to_string())
            })
        );
        assert_eq!(
            parse(b"HTTP/2.0 201"),
            Ok(HeaderLine::Status {
                code: StatusCode::CREATED,
                reason: None
            })
        );
        assert_eq!(parse(b"HTTP/1 200 OK"), Err(Malformed::Status));
        assert_eq!(parse(b"HTTP/1.1 20 OK"), Err(Malformed::Status));
    }

    #[test]
    fn fields_keep_single_byte_values() {
        let Ok(HeaderLine::Field { name, value }) = parse(b"X-Name: caf\xe9 ") else {
            panic!("expected a field");
        };
        assert_eq!(name, "x-name");
        assert_eq!(value.as_bytes(), b"caf\xe9");
    }

    #[test]
    fn junk_is_rejected() {
        assert_eq!(parse(b"no colon here"), Err(Malformed::Unrecognized));
        assert_eq!(parse(b"Bad Name: x"), Err(Malformed::Field));
        assert_eq!(parse(b"X-Ctl: a\x01b"), Err(Malformed::Field));
    }
}

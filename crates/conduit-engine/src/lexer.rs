use bytes::Bytes;

use crate::error::ParseError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    InlineHtml(Bytes),
    /// `<?=` shorthand; the parser turns it into an `echo`.
    OpenTagEcho,
    /// `?>` doubles as a statement terminator.
    CloseTag,
    Variable(String),
    /// Identifier or (possibly qualified) name such as `Js\ByRef`. Fully
    /// qualified names keep their leading `\`.
    Name(String),
    Int(i64),
    Float(f64),
    /// Single-quoted string, already unescaped.
    Str(Bytes),
    /// Double-quoted string with interpolation.
    Template(Vec<TemplatePart>),
    Sym(&'static str),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart {
    Literal(Bytes),
    Var(String),
    /// `$var->prop`
    Prop(String, String),
    /// `$var[key]`
    Index(String, IndexKey),
    /// `{$expr}` source text, starting at the `$`.
    Expr(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum IndexKey {
    Int(i64),
    Str(String),
    Var(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub line: u32,
}

const SYMBOLS: &[&str] = &[
    "?->", "===", "!==", "<=>", "**=", "...", "??=", "==", "!=", "<>", "<=", ">=", "&&", "||", "++",
    "--", "+=", "-=", "*=", "/=", ".=", "%=", "->", "=>", "::", "??", "**", "+", "-", "*", "/",
    "%", "=", "<", ">", "!", ".", "(", ")", "[", "]", "{", "}", ",", ";", "?", ":", "&", "|",
    "^", "~", "@",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Source starts inside `<?php`.
    Code,
    /// Source starts as inline text (script files).
    Template,
}

pub struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: u32,
    in_code: bool,
    out: Vec<Spanned>,
}

/// Tokenizes `src`.
///
/// # Errors
///
/// Returns a [`ParseError`] on unterminated strings or comments and on bytes
/// that start no token.
pub fn tokenize(src: &[u8], mode: Mode) -> Result<Vec<Spanned>, ParseError> {
    let mut lexer = Lexer {
        src,
        pos: 0,
        line: 1,
        in_code: mode == Mode::Code,
        out: Vec::new(),
    };
    while lexer.pos < lexer.src.len() {
        if lexer.in_code {
            lexer.code_token()?;
        } else {
            lexer.inline_html();
        }
    }
    lexer.push(Token::Eof);
    Ok(lexer.out)
}

impl Lexer<'_> {
    fn push(&mut self, token: Token) {
        self.out.push(Spanned {
            token,
            line: self.line,
        });
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn starts_with(&self, s: &[u8]) -> bool {
        self.src[self.pos..].starts_with(s)
    }

    fn starts_with_ci(&self, s: &[u8]) -> bool {
        self.src
            .get(self.pos..self.pos + s.len())
            .is_some_and(|chunk| chunk.eq_ignore_ascii_case(s))
    }

    fn advance(&mut self, n: usize) {
        for _ in 0..n {
            self.bump();
        }
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(message, self.line)
    }

    fn inline_html(&mut self) {
        let start = self.pos;
        while self.pos < self.src.len() {
            let open_echo = self.starts_with(b"<?=");
            if open_echo || self.starts_with_ci(b"<?php") {
                if self.pos > start {
                    let text = Bytes::copy_from_slice(&self.src[start..self.pos]);
                    self.push(Token::InlineHtml(text));
                }
                if open_echo {
                    self.advance(3);
                    self.push(Token::OpenTagEcho);
                } else {
                    self.advance(5);
                }
                self.in_code = true;
                return;
            }
            self.bump();
        }
        let text = Bytes::copy_from_slice(&self.src[start..]);
        self.push(Token::InlineHtml(text));
    }

    fn skip_trivia(&mut self) -> Result<(), ParseError> {
        loop {
            match self.peek() {
                Some(c) if c.is_ascii_whitespace() => {
                    self.bump();
                }
                Some(b'#') => self.skip_line_comment(),
                Some(b'/') if self.peek_at(1) == Some(b'/') => self.skip_line_comment(),
                Some(b'/') if self.peek_at(1) == Some(b'*') => {
                    self.advance(2);
                    loop {
                        if self.pos >= self.src.len() {
                            return Err(self.error("unterminated comment"));
                        }
                        if self.starts_with(b"*/") {
                            self.advance(2);
                            break;
                        }
                        self.bump();
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn skip_line_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == b'\n' || self.starts_with(b"?>") {
                break;
            }
            self.bump();
        }
    }

    fn code_token(&mut self) -> Result<(), ParseError> {
        self.skip_trivia()?;
        let Some(c) = self.peek() else {
            return Ok(());
        };
        if self.starts_with(b"?>") {
            self.advance(2);
            if self.peek() == Some(b'\n') {
                self.bump();
            }
            self.push(Token::CloseTag);
            self.in_code = false;
            return Ok(());
        }
        let line = self.line;
        let token = match c {
            b'$' if self.peek_at(1).is_some_and(is_ident_start) => {
                self.bump();
                Token::Variable(self.ident())
            }
            b'0'..=b'9' => self.number()?,
            b'.' if self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) => self.number()?,
            b'\'' => self.single_quoted()?,
            b'"' => self.double_quoted()?,
            b'\\' if self.peek_at(1).is_some_and(is_ident_start) => {
                self.bump();
                Token::Name(format!("\\{}", self.name()))
            }
            c if is_ident_start(c) => Token::Name(self.name()),
            _ => {
                let sym = SYMBOLS
                    .iter()
                    .find(|s| self.starts_with(s.as_bytes()))
                    .ok_or_else(|| self.error(format!("unexpected character '{}'", c as char)))?;
                self.advance(sym.len());
                Token::Sym(sym)
            }
        };
        self.out.push(Spanned { token, line });
        Ok(())
    }

    fn ident(&mut self) -> String {
        let start = self.pos;
        while self.peek().is_some_and(is_ident_char) {
            self.bump();
        }
        String::from_utf8_lossy(&self.src[start..self.pos]).into_owned()
    }

    fn name(&mut self) -> String {
        let mut name = self.ident();
        while self.peek() == Some(b'\\') && self.peek_at(1).is_some_and(is_ident_start) {
            self.bump();
            name.push('\\');
            name.push_str(&self.ident());
        }
        name
    }

    fn number(&mut self) -> Result<Token, ParseError> {
        let start = self.pos;
        if self.starts_with(b"0x") || self.starts_with(b"0X") {
            self.advance(2);
            let digits_start = self.pos;
            while self.peek().is_some_and(|c| c.is_ascii_hexdigit() || c == b'_') {
                self.bump();
            }
            let digits: String = String::from_utf8_lossy(&self.src[digits_start..self.pos])
                .replace('_', "");
            return i64::from_str_radix(&digits, 16)
                .map(Token::Int)
                .map_err(|_| self.error("invalid hex literal"));
        }
        let mut is_float = false;
        while self.peek().is_some_and(|c| c.is_ascii_digit() || c == b'_') {
            self.bump();
        }
        if self.peek() == Some(b'.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            self.bump();
            while self.peek().is_some_and(|c| c.is_ascii_digit() || c == b'_') {
                self.bump();
            }
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            let sign = usize::from(matches!(self.peek_at(1), Some(b'+' | b'-')));
            if self.peek_at(1 + sign).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                self.advance(1 + sign);
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.bump();
                }
            }
        }
        let text = String::from_utf8_lossy(&self.src[start..self.pos]).replace('_', "");
        if !is_float {
            if let Ok(i) = text.parse::<i64>() {
                return Ok(Token::Int(i));
            }
        }
        text.parse::<f64>()
            .map(Token::Float)
            .map_err(|_| self.error(format!("invalid number '{text}'")))
    }

    fn single_quoted(&mut self) -> Result<Token, ParseError> {
        self.bump();
        let mut buf = Vec::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string")),
                Some(b'\'') => return Ok(Token::Str(Bytes::from(buf))),
                Some(b'\\') if matches!(self.peek(), Some(b'\'' | b'\\')) => {
                    buf.extend(self.bump());
                }
                Some(c) => buf.push(c),
            }
        }
    }

    fn double_quoted(&mut self) -> Result<Token, ParseError> {
        self.bump();
        let mut parts = Vec::new();
        let mut buf = Vec::new();
        loop {
            let Some(c) = self.bump() else {
                return Err(self.error("unterminated string"));
            };
            match c {
                b'"' => break,
                b'\\' => self.escape(&mut buf),
                b'$' if self.peek().is_some_and(is_ident_start) => {
                    flush_literal(&mut parts, &mut buf);
                    parts.push(self.simple_interpolation());
                }
                b'{' if self.peek() == Some(b'$') => {
                    flush_literal(&mut parts, &mut buf);
                    parts.push(TemplatePart::Expr(self.braced_interpolation()?));
                }
                c => buf.push(c),
            }
        }
        if parts.is_empty() {
            return Ok(Token::Str(Bytes::from(buf)));
        }
        flush_literal(&mut parts, &mut buf);
        Ok(Token::Template(parts))
    }

    fn escape(&mut self, buf: &mut Vec<u8>) {
        let Some(c) = self.peek() else {
            buf.push(b'\\');
            return;
        };
        let simple = match c {
            b'n' => Some(b'\n'),
            b't' => Some(b'\t'),
            b'r' => Some(b'\r'),
            b'v' => Some(0x0b),
            b'e' => Some(0x1b),
            b'f' => Some(0x0c),
            b'\\' => Some(b'\\'),
            b'$' => Some(b'$'),
            b'"' => Some(b'"'),
            _ => None,
        };
        if let Some(byte) = simple {
            self.bump();
            buf.push(byte);
            return;
        }
        if (b'0'..=b'7').contains(&c) {
            let mut value: u32 = 0;
            for _ in 0..3 {
                match self.peek() {
                    Some(d @ b'0'..=b'7') => {
                        value = value * 8 + u32::from(d - b'0');
                        self.bump();
                    }
                    _ => break,
                }
            }
            #[allow(clippy::cast_possible_truncation)]
            buf.push((value & 0xff) as u8);
            return;
        }
        if c == b'x' && self.peek_at(1).is_some_and(|d| d.is_ascii_hexdigit()) {
            self.bump();
            let mut value = 0u8;
            for _ in 0..2 {
                match self.peek() {
                    Some(d) if d.is_ascii_hexdigit() => {
                        value = value.wrapping_mul(16).wrapping_add(hex_value(d));
                        self.bump();
                    }
                    _ => break,
                }
            }
            buf.push(value);
            return;
        }
        if c == b'u' && self.peek_at(1) == Some(b'{') {
            let save = (self.pos, self.line);
            self.advance(2);
            let start = self.pos;
            while self.peek().is_some_and(|d| d.is_ascii_hexdigit()) {
                self.bump();
            }
            let digits = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
            if self.peek() == Some(b'}')
                && let Some(ch) = u32::from_str_radix(&digits, 16).ok().and_then(char::from_u32)
            {
                self.bump();
                let mut tmp = [0u8; 4];
                buf.extend_from_slice(ch.encode_utf8(&mut tmp).as_bytes());
                return;
            }
            (self.pos, self.line) = save;
        }
        buf.push(b'\\');
    }

    fn simple_interpolation(&mut self) -> TemplatePart {
        let var = self.ident();
        if self.starts_with(b"->") && self.peek_at(2).is_some_and(is_ident_start) {
            self.advance(2);
            return TemplatePart::Prop(var, self.ident());
        }
        if self.peek() == Some(b'[') {
            let save = (self.pos, self.line);
            self.bump();
            let key = match self.peek() {
                Some(b'$') if self.peek_at(1).is_some_and(is_ident_start) => {
                    self.bump();
                    Some(IndexKey::Var(self.ident()))
                }
                Some(c) if c.is_ascii_digit() || c == b'-' => {
                    let start = self.pos;
                    self.bump();
                    while self.peek().is_some_and(|d| d.is_ascii_digit()) {
                        self.bump();
                    }
                    let text = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
                    Some(
                        text.parse()
                            .map_or_else(|_| IndexKey::Str(text), IndexKey::Int),
                    )
                }
                Some(c) if is_ident_start(c) => Some(IndexKey::Str(self.ident())),
                _ => None,
            };
            if let Some(key) = key
                && self.peek() == Some(b']')
            {
                self.bump();
                return TemplatePart::Index(var, key);
            }
            (self.pos, self.line) = save;
        }
        TemplatePart::Var(var)
    }

    fn braced_interpolation(&mut self) -> Result<String, ParseError> {
        let start = self.pos;
        let mut depth = 1usize;
        while let Some(c) = self.peek() {
            match c {
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        let text = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
                        self.bump();
                        return Ok(text);
                    }
                }
                b'\'' | b'"' => {
                    let quote = c;
                    self.bump();
                    while let Some(d) = self.peek() {
                        if d == b'\\' {
                            self.bump();
                        } else if d == quote {
                            break;
                        }
                        self.bump();
                    }
                }
                _ => {}
            }
            self.bump();
        }
        Err(self.error("unterminated interpolation"))
    }
}

fn flush_literal(parts: &mut Vec<TemplatePart>, buf: &mut Vec<u8>) {
    if !buf.is_empty() {
        parts.push(TemplatePart::Literal(Bytes::from(std::mem::take(buf))));
    }
}

const fn hex_value(d: u8) -> u8 {
    match d {
        b'0'..=b'9' => d - b'0',
        b'a'..=b'f' => d - b'a' + 10,
        _ => d - b'A' + 10,
    }
}

const fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_' || c >= 0x80
}

const fn is_ident_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_' || c >= 0x80
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(src: &str, mode: Mode) -> Vec<Token> {
        tokenize(src.as_bytes(), mode)
            .unwrap()
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    #[test]
    fn template_mode_splits_inline_text() {
        let toks = tokens("<h1><?php echo 1+2; ?></h1>\n", Mode::Template);
        assert_eq!(
            toks,
            vec![
                Token::InlineHtml(Bytes::from_static(b"<h1>")),
                Token::Name("echo".into()),
                Token::Int(1),
                Token::Sym("+"),
                Token::Int(2),
                Token::Sym(";"),
                Token::CloseTag,
                Token::InlineHtml(Bytes::from_static(b"</h1>\n")),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn qualified_names_and_variables() {
        let toks = tokens("new \\Js\\ByRef($a)", Mode::Code);
        assert_eq!(toks[1], Token::Name("\\Js\\ByRef".into()));
        assert_eq!(toks[3], Token::Variable("a".into()));
    }

    #[test]
    fn double_quoted_interpolation() {
        let toks = tokens(r#""a $b {$c['d']} $e->f $g[1]\n""#, Mode::Code);
        let Token::Template(parts) = &toks[0] else {
            panic!("expected template, got {toks:?}");
        };
        assert_eq!(
            parts,
            &vec![
                TemplatePart::Literal(Bytes::from_static(b"a ")),
                TemplatePart::Var("b".into()),
                TemplatePart::Literal(Bytes::from_static(b" ")),
                TemplatePart::Expr("$c['d']".into()),
                TemplatePart::Literal(Bytes::from_static(b" ")),
                TemplatePart::Prop("e".into(), "f".into()),
                TemplatePart::Literal(Bytes::from_static(b" ")),
                TemplatePart::Index("g".into(), IndexKey::Int(1)),
                TemplatePart::Literal(Bytes::from_static(b"\n")),
            ]
        );
    }

    #[test]
    fn numbers_and_strings() {
        let toks = tokens(r"1.5 0x1f 10 'it\'s'", Mode::Code);
        assert_eq!(toks[0], Token::Float(1.5));
        assert_eq!(toks[1], Token::Int(31));
        assert_eq!(toks[2], Token::Int(10));
        assert_eq!(toks[3], Token::Str(Bytes::from_static(b"it's")));
    }
}

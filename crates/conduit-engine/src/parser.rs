use std::{collections::HashMap, rc::Rc};

use bytes::Bytes;

use crate::{
    ast::{
        ArrayItem, BinOp, CastKind, Catch, ClassDecl, ClassKind, ClassRef, Expr, FuncDecl,
        IncludeKind, InterpPart, Literal, LogicalOp, MatchArm, MethodDecl, Name, Param,
        PropDecl, PropName, Stmt, UnaryOp, Visibility,
    },
    error::ParseError,
    lexer::{IndexKey, Mode, Spanned, TemplatePart, Token, tokenize},
};

/// Parses a whole program (a script file or an eval'd source).
///
/// # Errors
///
/// Returns the first syntax error encountered.
pub fn parse_program(src: &[u8], mode: Mode) -> Result<Vec<Stmt>, ParseError> {
    let mut parser = Parser::new(tokenize(src, mode)?);
    let mut stmts = Vec::new();
    while !parser.at_eof() {
        stmts.push(parser.statement()?);
    }
    Ok(stmts)
}

/// Parses source handed to `eval`: like `return <source>;`, the first
/// expression statement provides the result.
///
/// # Errors
///
/// Returns the first syntax error encountered.
pub fn parse_eval(src: &[u8]) -> Result<Vec<Stmt>, ParseError> {
    let mut stmts = parse_program(src, Mode::Code)?;
    if let Some(first) = stmts.first_mut()
        && let Stmt::Expr(expr) = first
    {
        *first = Stmt::Return(Some(expr.clone()));
    }
    Ok(stmts)
}

// Binding powers, loosest first.
const BP_LOW_OR: u8 = 1;
const BP_LOW_XOR: u8 = 2;
const BP_LOW_AND: u8 = 3;
const BP_ASSIGN: u8 = 4;
const BP_TERNARY: u8 = 5;
const BP_COALESCE: u8 = 6;
const BP_OR: u8 = 7;
const BP_AND: u8 = 8;
const BP_BIT_OR: u8 = 9;
const BP_BIT_XOR: u8 = 10;
const BP_BIT_AND: u8 = 11;
const BP_EQUALITY: u8 = 12;
const BP_COMPARE: u8 = 13;
const BP_CONCAT: u8 = 14;
const BP_ADD: u8 = 16;
const BP_MUL: u8 = 17;
const BP_INSTANCEOF: u8 = 18;
const BP_UNARY: u8 = 20;
const BP_POW: u8 = 21;
const BP_POSTFIX: u8 = u8::MAX;

/// Deepest nesting of statements and expressions a source may use.
pub(crate) const MAX_NESTING: usize = 256;

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    namespace: Option<Rc<str>>,
    aliases: HashMap<String, Rc<str>>,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Spanned>) -> Self {
        Self {
            tokens,
            pos: 0,
            namespace: None,
            aliases: HashMap::new(),
            depth: 0,
        }
    }

    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> Result<T, ParseError>) -> Result<T, ParseError> {
        if self.depth >= MAX_NESTING {
            return self.error("nesting too deep");
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        self.tokens
            .get(self.pos + offset)
            .map_or(&Token::Eof, |t| &t.token)
    }

    fn line(&self) -> u32 {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(0, |t| t.line)
    }

    fn next(&mut self) -> Token {
        let token = self.peek().clone();
        self.pos += 1;
        token
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek(), Token::Eof)
    }

    fn error<T>(&self, message: impl Into<String>) -> Result<T, ParseError> {
        Err(ParseError::new(message, self.line()))
    }

    fn unexpected<T>(&self) -> Result<T, ParseError> {
        let found = self.describe_current();
        self.error(format!("unexpected {found}"))
    }

    fn describe_current(&self) -> String {
        match self.peek() {
            Token::Eof => "end of file".to_string(),
            Token::Sym(s) => format!("\"{s}\""),
            Token::Name(n) => format!("identifier \"{n}\""),
            Token::Variable(v) => format!("variable \"${v}\""),
            Token::CloseTag => "\"?>\"".to_string(),
            other => format!("{other:?}"),
        }
    }

    fn is_sym(&self, sym: &str) -> bool {
        matches!(self.peek(), Token::Sym(s) if *s == sym)
    }

    fn eat_sym(&mut self, sym: &str) -> bool {
        if self.is_sym(sym) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_sym(&mut self, sym: &str) -> Result<(), ParseError> {
        if self.eat_sym(sym) {
            return Ok(());
        }
        let found = self.describe_current();
        self.error(format!("unexpected {found}, expecting \"{sym}\""))
    }

    fn is_kw(&self, kw: &str) -> bool {
        self.is_kw_at(0, kw)
    }

    fn is_kw_at(&self, offset: usize, kw: &str) -> bool {
        matches!(self.peek_at(offset), Token::Name(n) if n.eq_ignore_ascii_case(kw))
    }

    fn eat_kw(&mut self, kw: &str) -> bool {
        if self.is_kw(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn ident(&mut self) -> Result<Rc<str>, ParseError> {
        match self.next() {
            Token::Name(n) if !n.starts_with('\\') => Ok(n.into()),
            _ => {
                self.pos -= 1;
                self.unexpected()
            }
        }
    }

    fn variable(&mut self) -> Result<Rc<str>, ParseError> {
        match self.next() {
            Token::Variable(v) => Ok(v.into()),
            _ => {
                self.pos -= 1;
                self.unexpected()
            }
        }
    }

    fn terminator(&mut self) -> Result<(), ParseError> {
        match self.peek() {
            Token::Sym(";") | Token::CloseTag => {
                self.pos += 1;
                Ok(())
            }
            Token::Eof | Token::InlineHtml(_) => Ok(()),
            _ => self.unexpected(),
        }
    }

    fn qualify_decl(&self, name: &str) -> Rc<str> {
        match &self.namespace {
            Some(ns) => format!("{ns}\\{name}").into(),
            None => name.into(),
        }
    }

    fn resolve_name(&self, raw: &str) -> Name {
        if let Some(stripped) = raw.strip_prefix('\\') {
            return Name::global(stripped);
        }
        let (head, rest) = raw.split_once('\\').map_or((raw, None), |(h, r)| (h, Some(r)));
        if let Some(target) = self.aliases.get(&head.to_ascii_lowercase()) {
            let full = match rest {
                Some(rest) => format!("{target}\\{rest}"),
                None => target.to_string(),
            };
            return Name::global(&full);
        }
        match &self.namespace {
            Some(ns) => Name {
                primary: format!("{ns}\\{raw}").into(),
                fallback: Some(raw.into()),
            },
            None => Name::global(raw),
        }
    }

    fn class_ref_from_name(&self, raw: &str) -> ClassRef {
        match raw.to_ascii_lowercase().as_str() {
            "self" => ClassRef::SelfRef,
            "parent" => ClassRef::Parent,
            "static" => ClassRef::Static,
            _ => ClassRef::Named(self.resolve_name(raw)),
        }
    }

    // ---- statements ----

    fn statement(&mut self) -> Result<Stmt, ParseError> {
        self.nested(Self::statement_inner)
    }

    fn statement_inner(&mut self) -> Result<Stmt, ParseError> {
        match self.peek().clone() {
            Token::InlineHtml(text) => {
                self.pos += 1;
                Ok(Stmt::InlineHtml(text))
            }
            Token::OpenTagEcho => {
                self.pos += 1;
                let exprs = self.expr_list()?;
                self.terminator()?;
                Ok(Stmt::Echo(exprs))
            }
            Token::CloseTag | Token::Sym(";") => {
                self.pos += 1;
                Ok(Stmt::Nop)
            }
            Token::Sym("{") => {
                self.pos += 1;
                Ok(Stmt::Block(self.block_rest()?))
            }
            Token::Name(word) => self.keyword_statement(&word.to_ascii_lowercase()),
            _ => self.expression_statement(),
        }
    }

    fn keyword_statement(&mut self, word: &str) -> Result<Stmt, ParseError> {
        match word {
            "echo" => {
                self.pos += 1;
                let exprs = self.expr_list()?;
                self.terminator()?;
                Ok(Stmt::Echo(exprs))
            }
            "if" => self.if_statement(),
            "while" => {
                self.pos += 1;
                let cond = self.paren_expr()?;
                let body = self.body()?;
                Ok(Stmt::While { cond, body })
            }
            "do" => {
                self.pos += 1;
                let body = self.body()?;
                if !self.eat_kw("while") {
                    return self.unexpected();
                }
                let cond = self.paren_expr()?;
                self.terminator()?;
                Ok(Stmt::DoWhile { body, cond })
            }
            "for" => self.for_statement(),
            "foreach" => self.foreach_statement(),
            "switch" => self.switch_statement(),
            "break" | "continue" => {
                self.pos += 1;
                let depth = match self.peek() {
                    Token::Int(n) => {
                        let n = u32::try_from(*n).unwrap_or(1).max(1);
                        self.pos += 1;
                        n
                    }
                    _ => 1,
                };
                self.terminator()?;
                Ok(if word == "break" {
                    Stmt::Break(depth)
                } else {
                    Stmt::Continue(depth)
                })
            }
            "return" => {
                self.pos += 1;
                let value = if matches!(self.peek(), Token::Sym(";") | Token::CloseTag | Token::Eof)
                {
                    None
                } else {
                    Some(self.expr()?)
                };
                self.terminator()?;
                Ok(Stmt::Return(value))
            }
            "try" => self.try_statement(),
            "throw" => {
                self.pos += 1;
                let value = self.expr()?;
                self.terminator()?;
                Ok(Stmt::Throw(value))
            }
            "function"
                if matches!(self.peek_at(1), Token::Name(_))
                    || (matches!(self.peek_at(1), Token::Sym("&"))
                        && matches!(self.peek_at(2), Token::Name(_))) =>
            {
                self.pos += 1;
                let func = self.function_rest(true)?;
                Ok(Stmt::Function(Rc::new(func)))
            }
            "abstract" | "final" | "class" | "interface" | "readonly"
                if word == "class" || word == "interface" || self.class_modifiers_ahead() =>
            {
                self.class_declaration()
            }
            "namespace" => self.namespace_statement(),
            "use" => {
                self.pos += 1;
                loop {
                    let Token::Name(full) = self.next() else {
                        self.pos -= 1;
                        return self.unexpected();
                    };
                    let full = full.trim_start_matches('\\').to_string();
                    let alias = if self.eat_kw("as") {
                        self.ident()?.to_string()
                    } else {
                        full.rsplit('\\').next().unwrap_or(&full).to_string()
                    };
                    self.aliases.insert(alias.to_ascii_lowercase(), full.into());
                    if !self.eat_sym(",") {
                        break;
                    }
                }
                self.terminator()?;
                Ok(Stmt::Nop)
            }
            "unset" if matches!(self.peek_at(1), Token::Sym("(")) => {
                self.pos += 2;
                let mut targets = Vec::new();
                while !self.eat_sym(")") {
                    targets.push(self.expr()?);
                    if !self.eat_sym(",") {
                        self.expect_sym(")")?;
                        break;
                    }
                }
                self.terminator()?;
                Ok(Stmt::Unset(targets))
            }
            "global" => {
                self.pos += 1;
                let mut names = vec![self.variable()?];
                while self.eat_sym(",") {
                    names.push(self.variable()?);
                }
                self.terminator()?;
                Ok(Stmt::Global(names))
            }
            "const" => {
                self.pos += 1;
                let consts = self.const_list()?;
                self.terminator()?;
                Ok(Stmt::Const(
                    consts
                        .into_iter()
                        .map(|(n, e)| (self.qualify_decl(&n), e))
                        .collect(),
                ))
            }
            _ => self.expression_statement(),
        }
    }

    fn class_modifiers_ahead(&self) -> bool {
        let mut offset = 0;
        while ["abstract", "final", "readonly"]
            .iter()
            .any(|m| self.is_kw_at(offset, m))
        {
            offset += 1;
        }
        self.is_kw_at(offset, "class")
    }

    fn expression_statement(&mut self) -> Result<Stmt, ParseError> {
        let expr = self.expr()?;
        self.terminator()?;
        Ok(Stmt::Expr(expr))
    }

    fn block_rest(&mut self) -> Result<Vec<Stmt>, ParseError> {
        let mut stmts = Vec::new();
        while !self.eat_sym("}") {
            if self.at_eof() {
                return self.error("unexpected end of file, expecting \"}\"");
            }
            stmts.push(self.statement()?);
        }
        Ok(stmts)
    }

    fn block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect_sym("{")?;
        self.block_rest()
    }

    fn body(&mut self) -> Result<Vec<Stmt>, ParseError> {
        if self.eat_sym("{") {
            self.block_rest()
        } else {
            Ok(vec![self.statement()?])
        }
    }

    fn paren_expr(&mut self) -> Result<Expr, ParseError> {
        self.expect_sym("(")?;
        let expr = self.expr()?;
        self.expect_sym(")")?;
        Ok(expr)
    }

    fn if_statement(&mut self) -> Result<Stmt, ParseError> {
        self.pos += 1;
        let cond = self.paren_expr()?;
        let then = self.body()?;
        let otherwise = if self.is_kw("elseif") {
            Some(vec![self.if_statement()?])
        } else if self.is_kw("else") && self.is_kw_at(1, "if") {
            self.pos += 1;
            Some(vec![self.if_statement()?])
        } else if self.eat_kw("else") {
            Some(self.body()?)
        } else {
            None
        };
        Ok(Stmt::If {
            cond,
            then,
            otherwise,
        })
    }

    fn for_statement(&mut self) -> Result<Stmt, ParseError> {
        self.pos += 1;
        self.expect_sym("(")?;
        let init = self.for_clause(";")?;
        let cond = self.for_clause(";")?;
        let step = self.for_clause(")")?;
        let body = self.body()?;
        Ok(Stmt::For {
            init,
            cond,
            step,
            body,
        })
    }

    fn for_clause(&mut self, end: &str) -> Result<Vec<Expr>, ParseError> {
        let mut exprs = Vec::new();
        while !self.eat_sym(end) {
            exprs.push(self.expr()?);
            if !self.eat_sym(",") {
                self.expect_sym(end)?;
                break;
            }
        }
        Ok(exprs)
    }

    fn foreach_statement(&mut self) -> Result<Stmt, ParseError> {
        self.pos += 1;
        self.expect_sym("(")?;
        let subject = self.expr()?;
        if !self.eat_kw("as") {
            return self.unexpected();
        }
        let mut by_ref = self.eat_sym("&");
        let mut value = self.expr_bp(BP_ASSIGN + 1)?;
        let mut key = None;
        if self.eat_sym("=>") {
            key = Some(value);
            by_ref = self.eat_sym("&");
            value = self.expr_bp(BP_ASSIGN + 1)?;
        }
        self.expect_sym(")")?;
        let body = self.body()?;
        Ok(Stmt::Foreach {
            subject,
            key,
            value,
            by_ref,
            body,
        })
    }

    fn switch_statement(&mut self) -> Result<Stmt, ParseError> {
        self.pos += 1;
        let subject = self.paren_expr()?;
        self.expect_sym("{")?;
        let mut cases = Vec::new();
        while !self.eat_sym("}") {
            let test = if self.eat_kw("case") {
                Some(self.expr()?)
            } else if self.eat_kw("default") {
                None
            } else {
                return self.unexpected();
            };
            if !self.eat_sym(":") {
                self.expect_sym(";")?;
            }
            let mut body = Vec::new();
            while !(self.is_kw("case") || self.is_kw("default") || self.is_sym("}")) {
                if self.at_eof() {
                    return self.unexpected();
                }
                body.push(self.statement()?);
            }
            cases.push((test, body));
        }
        Ok(Stmt::Switch { subject, cases })
    }

    fn try_statement(&mut self) -> Result<Stmt, ParseError> {
        self.pos += 1;
        let body = self.block()?;
        let mut catches = Vec::new();
        while self.eat_kw("catch") {
            self.expect_sym("(")?;
            let mut types = Vec::new();
            loop {
                let Token::Name(raw) = self.next() else {
                    self.pos -= 1;
                    return self.unexpected();
                };
                types.push(self.resolve_name(&raw));
                if !self.eat_sym("|") {
                    break;
                }
            }
            let var = match self.peek() {
                Token::Variable(_) => Some(self.variable()?),
                _ => None,
            };
            self.expect_sym(")")?;
            let body = self.block()?;
            catches.push(Catch { types, var, body });
        }
        let finally = if self.eat_kw("finally") {
            Some(self.block()?)
        } else {
            None
        };
        if catches.is_empty() && finally.is_none() {
            return self.error("cannot use try without catch or finally");
        }
        Ok(Stmt::Try {
            body,
            catches,
            finally,
        })
    }

    fn namespace_statement(&mut self) -> Result<Stmt, ParseError> {
        self.pos += 1;
        let name = match self.peek() {
            Token::Name(n) => {
                let n: Rc<str> = n.trim_start_matches('\\').into();
                self.pos += 1;
                Some(n)
            }
            _ => None,
        };
        if self.eat_sym("{") {
            let saved = std::mem::replace(&mut self.namespace, name);
            let stmts = self.block_rest();
            self.namespace = saved;
            return Ok(Stmt::Block(stmts?));
        }
        self.terminator()?;
        self.namespace = name;
        Ok(Stmt::Nop)
    }

    fn const_list(&mut self) -> Result<Vec<(Rc<str>, Expr)>, ParseError> {
        let mut consts = Vec::new();
        loop {
            let name = self.ident()?;
            self.expect_sym("=")?;
            consts.push((name, self.expr()?));
            if !self.eat_sym(",") {
                return Ok(consts);
            }
        }
    }

    fn skip_type(&mut self) {
        loop {
            self.eat_sym("?");
            if self.eat_sym("(") {
                self.skip_type();
                self.eat_sym(")");
            } else if matches!(self.peek(), Token::Name(_)) {
                self.pos += 1;
            }
            if !(self.eat_sym("|") || (self.is_sym("&") && self.type_intersection_ahead())) {
                return;
            }
            self.eat_sym("&");
        }
    }

    fn type_intersection_ahead(&self) -> bool {
        matches!(self.peek_at(1), Token::Name(_))
    }

    fn params(&mut self) -> Result<Vec<Param>, ParseError> {
        self.expect_sym("(")?;
        let mut params = Vec::new();
        while !self.eat_sym(")") {
            let mut promote = None;
            loop {
                if self.eat_kw("public") {
                    promote = Some(Visibility::Public);
                } else if self.eat_kw("protected") {
                    promote = Some(Visibility::Protected);
                } else if self.eat_kw("private") {
                    promote = Some(Visibility::Private);
                } else if !self.eat_kw("readonly") {
                    break;
                }
            }
            if !matches!(self.peek(), Token::Variable(_) | Token::Sym("&" | "...")) {
                self.skip_type();
            }
            let by_ref = self.eat_sym("&");
            let variadic = self.eat_sym("...");
            let name = self.variable()?;
            let default = if self.eat_sym("=") {
                Some(self.expr()?)
            } else {
                None
            };
            params.push(Param {
                name,
                by_ref,
                variadic,
                default,
                promote,
            });
            if !self.eat_sym(",") {
                self.expect_sym(")")?;
                break;
            }
        }
        Ok(params)
    }

    fn return_type(&mut self) {
        if self.eat_sym(":") {
            self.skip_type();
        }
    }

    /// Parses after the `function` keyword.
    fn function_rest(&mut self, named: bool) -> Result<FuncDecl, ParseError> {
        let by_ref_return = self.eat_sym("&");
        let name = if named {
            let name = self.ident()?;
            self.qualify_decl(&name)
        } else {
            "{closure}".into()
        };
        let params = self.params()?;
        self.return_type();
        let body = self.block()?;
        Ok(FuncDecl {
            name,
            params,
            by_ref_return,
            body: body.into(),
            is_arrow: false,
        })
    }

    fn class_declaration(&mut self) -> Result<Stmt, ParseError> {
        let mut is_abstract = false;
        loop {
            if self.eat_kw("abstract") {
                is_abstract = true;
            } else if !(self.eat_kw("final") || self.eat_kw("readonly")) {
                break;
            }
        }
        let kind = if self.eat_kw("interface") {
            ClassKind::Interface
        } else if self.eat_kw("class") {
            ClassKind::Class
        } else {
            return self.unexpected();
        };
        let name = self.ident()?;
        let name = self.qualify_decl(&name);
        let mut parent = None;
        let mut interfaces = Vec::new();
        if self.eat_kw("extends") {
            loop {
                let Token::Name(raw) = self.next() else {
                    self.pos -= 1;
                    return self.unexpected();
                };
                let resolved = self.resolve_name(&raw);
                if kind == ClassKind::Interface {
                    interfaces.push(resolved);
                } else {
                    parent = Some(resolved);
                }
                if kind == ClassKind::Class || !self.eat_sym(",") {
                    break;
                }
            }
        }
        if self.eat_kw("implements") {
            loop {
                let Token::Name(raw) = self.next() else {
                    self.pos -= 1;
                    return self.unexpected();
                };
                interfaces.push(self.resolve_name(&raw));
                if !self.eat_sym(",") {
                    break;
                }
            }
        }
        self.expect_sym("{")?;
        let mut decl = ClassDecl {
            name,
            kind,
            parent,
            interfaces,
            consts: Vec::new(),
            props: Vec::new(),
            methods: Vec::new(),
            is_abstract,
        };
        while !self.eat_sym("}") {
            self.class_member(&mut decl)?;
        }
        Ok(Stmt::Class(Rc::new(decl)))
    }

    fn class_member(&mut self, decl: &mut ClassDecl) -> Result<(), ParseError> {
        let mut visibility = Visibility::Public;
        let mut is_static = false;
        let mut is_abstract = false;
        loop {
            if self.eat_kw("public") || self.eat_kw("var") {
                visibility = Visibility::Public;
            } else if self.eat_kw("protected") {
                visibility = Visibility::Protected;
            } else if self.eat_kw("private") {
                visibility = Visibility::Private;
            } else if self.eat_kw("static") {
                is_static = true;
            } else if self.eat_kw("abstract") {
                is_abstract = true;
            } else if !(self.eat_kw("final") || self.eat_kw("readonly")) {
                break;
            }
        }
        if self.eat_kw("use") {
            return self.error("traits are not supported");
        }
        if self.eat_kw("const") {
            if matches!(self.peek_at(1), Token::Name(_)) {
                self.skip_type();
            }
            let consts = self.const_list()?;
            decl.consts.extend(consts);
            return self.terminator();
        }
        if self.eat_kw("function") {
            let by_ref_return = self.eat_sym("&");
            let name = self.ident()?;
            let params = self.params()?;
            self.return_type();
            let body = if self.eat_sym(";") {
                is_abstract = true;
                Vec::new()
            } else {
                self.block()?
            };
            let is_abstract = is_abstract || decl.kind == ClassKind::Interface;
            decl.methods.push(MethodDecl {
                func: Rc::new(FuncDecl {
                    name,
                    params,
                    by_ref_return,
                    body: body.into(),
                    is_arrow: false,
                }),
                visibility,
                is_static,
                is_abstract,
            });
            return Ok(());
        }
        if is_static {
            return self.error("static properties are not supported");
        }
        if !matches!(self.peek(), Token::Variable(_)) {
            self.skip_type();
        }
        loop {
            let name = self.variable()?;
            let default = if self.eat_sym("=") {
                Some(self.expr()?)
            } else {
                None
            };
            decl.props.push(PropDecl {
                name,
                visibility,
                default,
            });
            if !self.eat_sym(",") {
                break;
            }
        }
        self.terminator()
    }

    // ---- expressions ----

    fn expr_list(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut exprs = vec![self.expr()?];
        while self.eat_sym(",") {
            exprs.push(self.expr()?);
        }
        Ok(exprs)
    }

    fn expr(&mut self) -> Result<Expr, ParseError> {
        self.expr_bp(0)
    }

    fn args(&mut self) -> Result<Vec<Expr>, ParseError> {
        self.expect_sym("(")?;
        let mut args = Vec::new();
        while !self.eat_sym(")") {
            args.push(self.expr()?);
            if !self.eat_sym(",") {
                self.expect_sym(")")?;
                break;
            }
        }
        Ok(args)
    }

    fn expr_bp(&mut self, min_bp: u8) -> Result<Expr, ParseError> {
        self.nested(|parser| parser.expr_bp_inner(min_bp))
    }

    fn expr_bp_inner(&mut self, min_bp: u8) -> Result<Expr, ParseError> {
        let mut left = self.prefix()?;
        loop {
            if let Some(expr) = self.assignment(&left)? {
                left = expr;
                continue;
            }
            let Some((bp, right_assoc)) = self.infix_power() else {
                break;
            };
            if bp < min_bp {
                break;
            }
            let next_bp = if right_assoc { bp } else { bp.saturating_add(1) };
            left = self.infix(left, next_bp)?;
        }
        Ok(left)
    }

    /// Assignments bind to any lvalue on their left regardless of the
    /// surrounding precedence (`!$a = f()` assigns before negating).
    fn assignment(&mut self, left: &Expr) -> Result<Option<Expr>, ParseError> {
        if !left.is_lvalue() {
            return Ok(None);
        }
        let Token::Sym(sym) = *self.peek() else {
            return Ok(None);
        };
        let op = match sym {
            "=" => None,
            "+=" => Some(BinOp::Add),
            "-=" => Some(BinOp::Sub),
            "*=" => Some(BinOp::Mul),
            "/=" => Some(BinOp::Div),
            ".=" => Some(BinOp::Concat),
            "%=" => Some(BinOp::Mod),
            "**=" => Some(BinOp::Pow),
            "??=" => {
                self.pos += 1;
                let value = self.expr_bp(BP_ASSIGN)?;
                return Ok(Some(Expr::CoalesceAssign(
                    Box::new(left.clone()),
                    Box::new(value),
                )));
            }
            _ => return Ok(None),
        };
        self.pos += 1;
        if op.is_none() && self.is_sym("&") && !self.is_kw_at(1, "new") {
            self.pos += 1;
            let source = self.expr_bp(BP_ASSIGN)?;
            return Ok(Some(Expr::AssignRef(Box::new(left.clone()), Box::new(source))));
        }
        let value = self.expr_bp(BP_ASSIGN)?;
        Ok(Some(match op {
            None => Expr::Assign(Box::new(left.clone()), Box::new(value)),
            Some(op) => Expr::CompoundAssign(op, Box::new(left.clone()), Box::new(value)),
        }))
    }

    fn infix_power(&self) -> Option<(u8, bool)> {
        Some(match self.peek() {
            Token::Sym(sym) => match *sym {
                "?" => (BP_TERNARY, true),
                "??" => (BP_COALESCE, true),
                "||" => (BP_OR, false),
                "&&" => (BP_AND, false),
                "|" => (BP_BIT_OR, false),
                "^" => (BP_BIT_XOR, false),
                "&" => (BP_BIT_AND, false),
                "==" | "!=" | "<>" | "===" | "!==" | "<=>" => (BP_EQUALITY, false),
                "<" | "<=" | ">" | ">=" => (BP_COMPARE, false),
                "." => (BP_CONCAT, false),
                "+" | "-" => (BP_ADD, false),
                "*" | "/" | "%" => (BP_MUL, false),
                "**" => (BP_POW, true),
                "[" | "->" | "?->" | "(" | "::" | "++" | "--" => (BP_POSTFIX, false),
                _ => return None,
            },
            Token::Name(n) => match n.to_ascii_lowercase().as_str() {
                "or" => (BP_LOW_OR, false),
                "xor" => (BP_LOW_XOR, false),
                "and" => (BP_LOW_AND, false),
                "instanceof" => (BP_INSTANCEOF, false),
                _ => return None,
            },
            _ => return None,
        })
    }

    fn infix(&mut self, left: Expr, next_bp: u8) -> Result<Expr, ParseError> {
        let token = self.next();
        let op = match token {
            Token::Name(n) => {
                return Ok(match n.to_ascii_lowercase().as_str() {
                    "instanceof" => {
                        let class = self.class_ref()?;
                        Expr::InstanceOf(Box::new(left), class)
                    }
                    word => {
                        let op = match word {
                            "or" => LogicalOp::Or,
                            "xor" => LogicalOp::Xor,
                            _ => LogicalOp::And,
                        };
                        let right = self.expr_bp(next_bp)?;
                        Expr::Logical(op, Box::new(left), Box::new(right))
                    }
                });
            }
            Token::Sym(sym) => sym,
            other => return Err(ParseError::new(format!("unexpected {other:?}"), self.line())),
        };
        Ok(match op {
            "[" => {
                let index = if self.is_sym("]") {
                    None
                } else {
                    Some(Box::new(self.expr()?))
                };
                self.expect_sym("]")?;
                Expr::Index {
                    base: Box::new(left),
                    index,
                }
            }
            "->" | "?->" => self.member_access(left, op == "?->")?,
            "::" => {
                let class = ClassRef::Dynamic(Box::new(left));
                self.static_member(class)?
            }
            "(" => {
                self.pos -= 1;
                let args = self.args()?;
                Expr::CallValue {
                    callee: Box::new(left),
                    args,
                }
            }
            "++" | "--" => Expr::IncDec {
                prefix: false,
                increment: op == "++",
                target: Box::new(left),
            },
            "?" => {
                let then = if self.is_sym(":") {
                    None
                } else {
                    Some(Box::new(self.expr_bp(BP_ASSIGN)?))
                };
                self.expect_sym(":")?;
                let otherwise = self.expr_bp(next_bp)?;
                Expr::Ternary {
                    cond: Box::new(left),
                    then,
                    otherwise: Box::new(otherwise),
                }
            }
            "??" => {
                let right = self.expr_bp(next_bp)?;
                Expr::Coalesce(Box::new(left), Box::new(right))
            }
            "||" | "&&" => {
                let right = self.expr_bp(next_bp)?;
                let op = if op == "||" {
                    LogicalOp::Or
                } else {
                    LogicalOp::And
                };
                Expr::Logical(op, Box::new(left), Box::new(right))
            }
            _ => {
                let op = match op {
                    "|" => BinOp::BitOr,
                    "^" => BinOp::BitXor,
                    "&" => BinOp::BitAnd,
                    "==" => BinOp::Eq,
                    "!=" | "<>" => BinOp::NotEq,
                    "===" => BinOp::Identical,
                    "!==" => BinOp::NotIdentical,
                    "<=>" => BinOp::Spaceship,
                    "<" => BinOp::Lt,
                    "<=" => BinOp::Le,
                    ">" => BinOp::Gt,
                    ">=" => BinOp::Ge,
                    "." => BinOp::Concat,
                    "+" => BinOp::Add,
                    "-" => BinOp::Sub,
                    "*" => BinOp::Mul,
                    "/" => BinOp::Div,
                    "%" => BinOp::Mod,
                    "**" => BinOp::Pow,
                    _ => {
                        self.pos -= 1;
                        return self.unexpected();
                    }
                };
                let right = self.expr_bp(next_bp)?;
                Expr::Binary(op, Box::new(left), Box::new(right))
            }
        })
    }

    fn member_name(&mut self) -> Result<PropName, ParseError> {
        match self.next() {
            Token::Name(n) if !n.starts_with('\\') => Ok(PropName::Ident(n.into())),
            Token::Variable(v) => Ok(PropName::Dynamic(Box::new(Expr::Var(v.into())))),
            Token::Sym("{") => {
                let expr = self.expr()?;
                self.expect_sym("}")?;
                Ok(PropName::Dynamic(Box::new(expr)))
            }
            _ => {
                self.pos -= 1;
                self.unexpected()
            }
        }
    }

    fn member_access(&mut self, object: Expr, nullsafe: bool) -> Result<Expr, ParseError> {
        let name = self.member_name()?;
        if self.is_sym("(") {
            let args = self.args()?;
            return Ok(Expr::MethodCall {
                object: Box::new(object),
                name,
                args,
                nullsafe,
            });
        }
        Ok(Expr::Prop {
            base: Box::new(object),
            name,
            nullsafe,
        })
    }

    fn static_member(&mut self, class: ClassRef) -> Result<Expr, ParseError> {
        let name = match self.next() {
            Token::Name(n) => n,
            Token::Variable(_) => {
                self.pos -= 1;
                return self.error("static properties are not supported");
            }
            _ => {
                self.pos -= 1;
                return self.unexpected();
            }
        };
        if self.is_sym("(") {
            let args = self.args()?;
            return Ok(Expr::StaticCall {
                class,
                method: name.into(),
                args,
            });
        }
        Ok(Expr::ClassConst {
            class,
            name: name.into(),
        })
    }

    fn class_ref(&mut self) -> Result<ClassRef, ParseError> {
        match self.next() {
            Token::Name(raw) => Ok(self.class_ref_from_name(&raw)),
            Token::Variable(v) => Ok(ClassRef::Dynamic(Box::new(Expr::Var(v.into())))),
            Token::Sym("(") => {
                let expr = self.expr()?;
                self.expect_sym(")")?;
                Ok(ClassRef::Dynamic(Box::new(expr)))
            }
            _ => {
                self.pos -= 1;
                self.unexpected()
            }
        }
    }

    fn prefix(&mut self) -> Result<Expr, ParseError> {
        let token = self.next();
        Ok(match token {
            Token::Variable(v) => Expr::Var(v.into()),
            Token::Int(i) => Expr::Lit(Literal::Int(i)),
            Token::Float(f) => Expr::Lit(Literal::Float(f)),
            Token::Str(s) => Expr::Lit(Literal::Str(s)),
            Token::Template(parts) => self.template(parts)?,
            Token::Sym("(") => {
                if let Some(kind) = self.cast_ahead() {
                    self.pos += 2;
                    let operand = self.expr_bp(BP_UNARY)?;
                    return Ok(Expr::Cast(kind, Box::new(operand)));
                }
                let inner = self.expr()?;
                self.expect_sym(")")?;
                inner
            }
            Token::Sym("[") => Expr::Array(self.array_items("]")?),
            Token::Sym(op @ ("!" | "-" | "+" | "~" | "@")) => {
                let (op, bp) = match op {
                    "!" => (UnaryOp::Not, BP_INSTANCEOF),
                    "-" => (UnaryOp::Neg, BP_UNARY),
                    "+" => (UnaryOp::Plus, BP_UNARY),
                    "~" => (UnaryOp::BitNot, BP_UNARY),
                    _ => (UnaryOp::Silence, BP_UNARY),
                };
                let operand = self.expr_bp(bp)?;
                Expr::Unary(op, Box::new(operand))
            }
            Token::Sym(op @ ("++" | "--")) => {
                let target = self.expr_bp(BP_UNARY)?;
                Expr::IncDec {
                    prefix: true,
                    increment: op == "++",
                    target: Box::new(target),
                }
            }
            Token::Sym("&") => {
                self.pos -= 1;
                return self.error("unexpected \"&\"");
            }
            Token::Name(name) => self.name_prefix(&name)?,
            _ => {
                self.pos -= 1;
                return self.unexpected();
            }
        })
    }

    fn cast_ahead(&self) -> Option<CastKind> {
        let Token::Name(n) = self.peek() else {
            return None;
        };
        if !matches!(self.peek_at(1), Token::Sym(")")) {
            return None;
        }
        Some(match n.to_ascii_lowercase().as_str() {
            "int" | "integer" => CastKind::Int,
            "float" | "double" | "real" => CastKind::Float,
            "string" | "binary" => CastKind::String,
            "bool" | "boolean" => CastKind::Bool,
            "array" => CastKind::Array,
            "object" => CastKind::Object,
            "unset" => CastKind::Unset,
            _ => return None,
        })
    }

    fn name_prefix(&mut self, name: &str) -> Result<Expr, ParseError> {
        let lower = name.to_ascii_lowercase();
        match lower.as_str() {
            "true" => return Ok(Expr::Lit(Literal::Bool(true))),
            "false" => return Ok(Expr::Lit(Literal::Bool(false))),
            "null" => return Ok(Expr::Lit(Literal::Null)),
            "array" if self.is_sym("(") => {
                self.pos += 1;
                return Ok(Expr::Array(self.array_items(")")?));
            }
            "new" => {
                let class = self.class_ref()?;
                let args = if self.is_sym("(") {
                    self.args()?
                } else {
                    Vec::new()
                };
                return Ok(Expr::New { class, args });
            }
            "function" => return self.closure(false),
            "fn" if self.is_sym("(") || self.is_sym("&") => return self.arrow_fn(),
            "static" if self.is_kw("function") => {
                self.pos += 1;
                return self.closure(true);
            }
            "static" if self.is_kw("fn") => {
                self.pos += 1;
                return self.arrow_fn();
            }
            "isset" => {
                let args = self.args()?;
                return Ok(Expr::Isset(args));
            }
            "empty" => {
                let mut args = self.args()?;
                if args.len() != 1 {
                    return self.error("empty() expects exactly one argument");
                }
                return Ok(Expr::Empty(Box::new(args.remove(0))));
            }
            "include" | "include_once" | "require" | "require_once" => {
                let kind = match lower.as_str() {
                    "include" => IncludeKind::Include,
                    "include_once" => IncludeKind::IncludeOnce,
                    "require" => IncludeKind::Require,
                    _ => IncludeKind::RequireOnce,
                };
                let path = self.expr_bp(BP_ASSIGN)?;
                return Ok(Expr::Include(kind, Box::new(path)));
            }
            "print" => {
                let value = self.expr_bp(BP_ASSIGN)?;
                return Ok(Expr::Print(Box::new(value)));
            }
            "exit" | "die" => {
                let status = if self.eat_sym("(") {
                    if self.eat_sym(")") {
                        None
                    } else {
                        let e = self.expr()?;
                        self.expect_sym(")")?;
                        Some(Box::new(e))
                    }
                } else {
                    None
                };
                return Ok(Expr::Exit(status));
            }
            "match" if self.is_sym("(") => return self.match_expr(),
            _ => {}
        }
        if self.is_sym("::") {
            self.pos += 1;
            let class = self.class_ref_from_name(name);
            return self.static_member(class);
        }
        let resolved = self.resolve_name(name);
        if self.is_sym("(") {
            let args = self.args()?;
            return Ok(Expr::Call {
                name: resolved,
                args,
            });
        }
        Ok(Expr::Const(resolved))
    }

    fn closure(&mut self, is_static: bool) -> Result<Expr, ParseError> {
        let by_ref_return = self.eat_sym("&");
        let params = self.params()?;
        let mut uses = Vec::new();
        if self.eat_kw("use") {
            self.expect_sym("(")?;
            while !self.eat_sym(")") {
                let by_ref = self.eat_sym("&");
                uses.push((self.variable()?, by_ref));
                if !self.eat_sym(",") {
                    self.expect_sym(")")?;
                    break;
                }
            }
        }
        self.return_type();
        let body = self.block()?;
        Ok(Expr::Closure {
            func: Rc::new(FuncDecl {
                name: "{closure}".into(),
                params,
                by_ref_return,
                body: body.into(),
                is_arrow: false,
            }),
            uses,
            is_static,
        })
    }

    fn arrow_fn(&mut self) -> Result<Expr, ParseError> {
        let by_ref_return = self.eat_sym("&");
        let params = self.params()?;
        self.return_type();
        self.expect_sym("=>")?;
        let body = self.expr_bp(BP_ASSIGN)?;
        Ok(Expr::ArrowFn(Rc::new(FuncDecl {
            name: "{closure}".into(),
            params,
            by_ref_return,
            body: vec![Stmt::Return(Some(body))].into(),
            is_arrow: true,
        })))
    }

    fn match_expr(&mut self) -> Result<Expr, ParseError> {
        let subject = self.paren_expr()?;
        self.expect_sym("{")?;
        let mut arms = Vec::new();
        while !self.eat_sym("}") {
            let conditions = if self.eat_kw("default") {
                None
            } else {
                let mut conds = vec![self.expr()?];
                while self.eat_sym(",") {
                    if self.is_sym("=>") {
                        break;
                    }
                    conds.push(self.expr()?);
                }
                Some(conds)
            };
            self.expect_sym("=>")?;
            let body = self.expr()?;
            arms.push(MatchArm { conditions, body });
            if !self.eat_sym(",") {
                self.expect_sym("}")?;
                break;
            }
        }
        Ok(Expr::Match {
            subject: Box::new(subject),
            arms,
        })
    }

    fn array_items(&mut self, close: &str) -> Result<Vec<ArrayItem>, ParseError> {
        let mut items = Vec::new();
        while !self.eat_sym(close) {
            let mut by_ref = self.eat_sym("&");
            let first = self.expr()?;
            let item = if !by_ref && self.eat_sym("=>") {
                by_ref = self.eat_sym("&");
                ArrayItem {
                    key: Some(first),
                    value: self.expr()?,
                    by_ref,
                }
            } else {
                ArrayItem {
                    key: None,
                    value: first,
                    by_ref,
                }
            };
            items.push(item);
            if !self.eat_sym(",") {
                self.expect_sym(close)?;
                break;
            }
        }
        Ok(items)
    }

    fn template(&self, parts: Vec<TemplatePart>) -> Result<Expr, ParseError> {
        let mut out = Vec::with_capacity(parts.len());
        for part in parts {
            out.push(match part {
                TemplatePart::Literal(b) => InterpPart::Literal(b),
                TemplatePart::Var(v) => InterpPart::Expr(Expr::Var(v.into())),
                TemplatePart::Prop(v, p) => InterpPart::Expr(Expr::Prop {
                    base: Box::new(Expr::Var(v.into())),
                    name: PropName::Ident(p.into()),
                    nullsafe: false,
                }),
                TemplatePart::Index(v, key) => {
                    let index = match key {
                        IndexKey::Int(i) => Expr::Lit(Literal::Int(i)),
                        IndexKey::Str(s) => Expr::Lit(Literal::Str(Bytes::from(s))),
                        IndexKey::Var(k) => Expr::Var(k.into()),
                    };
                    InterpPart::Expr(Expr::Index {
                        base: Box::new(Expr::Var(v.into())),
                        index: Some(Box::new(index)),
                    })
                }
                TemplatePart::Expr(src) => {
                    let mut sub = Self::new(tokenize(src.as_bytes(), Mode::Code)?);
                    sub.namespace.clone_from(&self.namespace);
                    sub.aliases.clone_from(&self.aliases);
                    sub.depth = self.depth;
                    let expr = sub.expr()?;
                    if !sub.at_eof() {
                        return sub.unexpected();
                    }
                    InterpPart::Expr(expr)
                }
            });
        }
        Ok(Expr::Interp(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval_ast(src: &str) -> Vec<Stmt> {
        parse_eval(src.as_bytes()).unwrap()
    }

    #[test]
    fn first_expression_becomes_the_result() {
        let stmts = eval_ast("1+2");
        assert!(matches!(
            stmts.as_slice(),
            [Stmt::Return(Some(Expr::Binary(BinOp::Add, _, _)))]
        ));
    }

    #[test]
    fn statements_are_kept_when_source_starts_with_one() {
        let stmts = eval_ast("echo 'a'; $b = 1;");
        assert!(matches!(stmts.as_slice(), [Stmt::Echo(_), Stmt::Expr(Expr::Assign(..))]));
    }

    #[test]
    fn precedence_of_concat_and_addition() {
        let stmts = eval_ast("'a' . 1 + 2");
        let [Stmt::Return(Some(Expr::Binary(BinOp::Concat, _, right)))] = stmts.as_slice() else {
            panic!("unexpected ast {stmts:?}");
        };
        assert!(matches!(**right, Expr::Binary(BinOp::Add, _, _)));
    }

    #[test]
    fn assignment_binds_inside_logical_operators() {
        let stmts = eval_ast("$x && $a = 5");
        let [Stmt::Return(Some(Expr::Logical(LogicalOp::And, _, right)))] = stmts.as_slice()
        else {
            panic!("unexpected ast {stmts:?}");
        };
        assert!(matches!(**right, Expr::Assign(..)));
    }

    #[test]
    fn namespaced_declarations_are_qualified() {
        let stmts = parse_program(
            b"namespace Js; class ByRef { public $value; public function __construct(&$value) { $this->value =& $value; } }",
            Mode::Code,
        )
        .unwrap();
        let Some(Stmt::Class(decl)) = stmts.iter().find(|s| matches!(s, Stmt::Class(_))) else {
            panic!("class missing");
        };
        assert_eq!(&*decl.name, "Js\\ByRef");
        assert!(decl.methods[0].func.params[0].by_ref);
    }

    #[test]
    fn syntax_errors_carry_the_line() {
        let err = parse_program(b"$a = 1;\n$b = ;", Mode::Code).unwrap_err();
        assert_eq!(err.line, 2);
    }

    #[test]
    fn closures_with_uses_and_method_calls() {
        let stmts = eval_ast("call_user_func(function () use (&$a, $b) { return $this->m(1)->p; })");
        let [Stmt::Return(Some(Expr::Call { args, .. }))] = stmts.as_slice() else {
            panic!("unexpected ast {stmts:?}");
        };
        let Expr::Closure { uses, .. } = &args[0] else {
            panic!("expected closure");
        };
        assert_eq!(uses, &vec![("a".into(), true), ("b".into(), false)]);
    }

    #[test]
    fn postfix_chains_parse() {
        let stmts = eval_ast("$a->b()[0]");
        let [Stmt::Return(Some(Expr::Index { base, .. }))] = stmts.as_slice() else {
            panic!("unexpected ast {stmts:?}");
        };
        assert!(matches!(**base, Expr::MethodCall { .. }));
        eval_ast("$this->value =& $value; $i++;");
    }

    #[test]
    fn deep_nesting_is_a_syntax_error() {
        let depth = MAX_NESTING * 4;
        let source = format!("{}1{}", "(".repeat(depth), ")".repeat(depth));
        // Generous stack so the limit, not the thread, ends the descent.
        let err = std::thread::Builder::new()
            .stack_size(256 << 20)
            .spawn(move || parse_eval(source.as_bytes()).map(drop))
            .unwrap()
            .join()
            .unwrap()
            .unwrap_err();
        assert_eq!(err.message, "nesting too deep");

        let shallow = format!("{}1{}", "(".repeat(32), ")".repeat(32));
        assert!(parse_eval(shallow.as_bytes()).is_ok());
    }

}

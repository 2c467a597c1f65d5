use std::rc::Rc;

use bytes::Bytes;

/// Name of a class or function as written, resolved against the enclosing
/// namespace: `primary` is tried first, then `fallback` (the unqualified
/// global name) for names written without a leading `\`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Name {
    pub primary: Rc<str>,
    pub fallback: Option<Rc<str>>,
}

impl Name {
    #[must_use]
    pub fn global(name: &str) -> Self {
        Self {
            primary: name.into(),
            fallback: None,
        }
    }

    pub fn candidates(&self) -> impl Iterator<Item = &str> {
        std::iter::once(&*self.primary).chain(self.fallback.as_deref())
    }
}

#[derive(Debug, Clone)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Bytes),
}

#[derive(Debug, Clone)]
pub enum InterpPart {
    Literal(Bytes),
    Expr(Expr),
}

#[derive(Debug, Clone)]
pub struct ArrayItem {
    pub key: Option<Expr>,
    pub value: Expr,
    pub by_ref: bool,
}

#[derive(Debug, Clone)]
pub enum PropName {
    Ident(Rc<str>),
    Dynamic(Box<Expr>),
}

#[derive(Debug, Clone)]
pub enum ClassRef {
    Named(Name),
    SelfRef,
    Parent,
    Static,
    Dynamic(Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Concat,
    Eq,
    NotEq,
    Identical,
    NotIdentical,
    Lt,
    Le,
    Gt,
    Ge,
    Spaceship,
    BitAnd,
    BitOr,
    BitXor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
    BitNot,
    Silence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Xor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastKind {
    Int,
    Float,
    String,
    Bool,
    Array,
    Object,
    Unset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncludeKind {
    Include,
    IncludeOnce,
    Require,
    RequireOnce,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Lit(Literal),
    Interp(Vec<InterpPart>),
    Var(Rc<str>),
    Array(Vec<ArrayItem>),
    Index {
        base: Box<Expr>,
        index: Option<Box<Expr>>,
    },
    Prop {
        base: Box<Expr>,
        name: PropName,
        nullsafe: bool,
    },
    ClassConst {
        class: ClassRef,
        name: Rc<str>,
    },
    Const(Name),
    Call {
        name: Name,
        args: Vec<Expr>,
    },
    CallValue {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    MethodCall {
        object: Box<Expr>,
        name: PropName,
        args: Vec<Expr>,
        nullsafe: bool,
    },
    StaticCall {
        class: ClassRef,
        method: Rc<str>,
        args: Vec<Expr>,
    },
    New {
        class: ClassRef,
        args: Vec<Expr>,
    },
    Closure {
        func: Rc<FuncDecl>,
        uses: Vec<(Rc<str>, bool)>,
        is_static: bool,
    },
    ArrowFn(Rc<FuncDecl>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Logical(LogicalOp, Box<Expr>, Box<Expr>),
    Coalesce(Box<Expr>, Box<Expr>),
    Ternary {
        cond: Box<Expr>,
        then: Option<Box<Expr>>,
        otherwise: Box<Expr>,
    },
    Assign(Box<Expr>, Box<Expr>),
    AssignRef(Box<Expr>, Box<Expr>),
    CompoundAssign(BinOp, Box<Expr>, Box<Expr>),
    CoalesceAssign(Box<Expr>, Box<Expr>),
    IncDec {
        prefix: bool,
        increment: bool,
        target: Box<Expr>,
    },
    Isset(Vec<Expr>),
    Empty(Box<Expr>),
    Cast(CastKind, Box<Expr>),
    InstanceOf(Box<Expr>, ClassRef),
    Include(IncludeKind, Box<Expr>),
    Print(Box<Expr>),
    Exit(Option<Box<Expr>>),
    Match {
        subject: Box<Expr>,
        arms: Vec<MatchArm>,
    },
}

#[derive(Debug, Clone)]
pub struct MatchArm {
    /// `None` for `default`.
    pub conditions: Option<Vec<Expr>>,
    pub body: Expr,
}

impl Expr {
    /// Whether the expression names a storage location.
    #[must_use]
    pub const fn is_lvalue(&self) -> bool {
        matches!(
            self,
            Self::Var(_) | Self::Index { .. } | Self::Prop { .. }
        )
    }
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: Rc<str>,
    pub by_ref: bool,
    pub variadic: bool,
    pub default: Option<Expr>,
    /// Constructor promotion (`public $x` in a constructor signature).
    pub promote: Option<Visibility>,
}

#[derive(Debug, Clone)]
pub struct FuncDecl {
    pub name: Rc<str>,
    pub params: Vec<Param>,
    pub by_ref_return: bool,
    pub body: Rc<[Stmt]>,
    /// Set by the parser for arrow functions: the body is one `return`.
    pub is_arrow: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Visibility {
    Public,
    Protected,
    Private,
}

#[derive(Debug, Clone)]
pub struct PropDecl {
    pub name: Rc<str>,
    pub visibility: Visibility,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone)]
pub struct MethodDecl {
    pub func: Rc<FuncDecl>,
    pub visibility: Visibility,
    pub is_static: bool,
    pub is_abstract: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassKind {
    Class,
    Interface,
}

#[derive(Debug, Clone)]
pub struct ClassDecl {
    pub name: Rc<str>,
    pub kind: ClassKind,
    pub parent: Option<Name>,
    pub interfaces: Vec<Name>,
    pub consts: Vec<(Rc<str>, Expr)>,
    pub props: Vec<PropDecl>,
    pub methods: Vec<MethodDecl>,
    pub is_abstract: bool,
}

#[derive(Debug, Clone)]
pub struct Catch {
    pub types: Vec<Name>,
    pub var: Option<Rc<str>>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Expr(Expr),
    Echo(Vec<Expr>),
    InlineHtml(Bytes),
    Return(Option<Expr>),
    If {
        cond: Expr,
        then: Vec<Stmt>,
        otherwise: Option<Vec<Stmt>>,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
    },
    DoWhile {
        body: Vec<Stmt>,
        cond: Expr,
    },
    For {
        init: Vec<Expr>,
        cond: Vec<Expr>,
        step: Vec<Expr>,
        body: Vec<Stmt>,
    },
    Foreach {
        subject: Expr,
        key: Option<Expr>,
        value: Expr,
        by_ref: bool,
        body: Vec<Stmt>,
    },
    Switch {
        subject: Expr,
        cases: Vec<(Option<Expr>, Vec<Stmt>)>,
    },
    Break(u32),
    Continue(u32),
    Try {
        body: Vec<Stmt>,
        catches: Vec<Catch>,
        finally: Option<Vec<Stmt>>,
    },
    Throw(Expr),
    Function(Rc<FuncDecl>),
    Class(Rc<ClassDecl>),
    Unset(Vec<Expr>),
    Global(Vec<Rc<str>>),
    Const(Vec<(Rc<str>, Expr)>),
    Block(Vec<Stmt>),
    Nop,
}

//! AST node types for the host language.

use std::iter;
use std::rc::Rc;

/// Source location of a node. Lines are 1-based, columns 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub line: usize,
    pub column: usize,
}

impl Span {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

/// A complete host program.
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

impl Stmt {
    pub fn new(kind: StmtKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// Expressions that belong to the statement itself rather than to one of
    /// its nested blocks, in source order.
    pub fn exprs_mut(&mut self) -> Vec<&mut Expr> {
        match &mut self.kind {
            StmtKind::Expr(expr) | StmtKind::YieldFrom(expr) => vec![expr],
            StmtKind::Assign { targets, value } => targets.iter_mut().chain(iter::once(value)).collect(),
            StmtKind::AugAssign { target, value, .. } => vec![target, value],
            StmtKind::Return(expr) | StmtKind::Raise(expr) | StmtKind::Yield(expr) => expr.iter_mut().collect(),
            StmtKind::Assert { test, msg } => iter::once(test).chain(msg.iter_mut()).collect(),
            StmtKind::If { test, .. } | StmtKind::While { test, .. } => vec![test],
            StmtKind::For { target, iter, .. } => vec![target, iter],
            StmtKind::With { context, target, .. } => iter::once(context).chain(target.iter_mut()).collect(),
            StmtKind::Try { handlers, .. } => handlers.iter_mut().filter_map(|h| h.kind.as_mut()).collect(),
            StmtKind::FunctionDef(def) => {
                let def = Rc::make_mut(def);
                def.decorators
                    .iter_mut()
                    .chain(def.params.args.iter_mut().filter_map(|p| p.default.as_mut()))
                    .collect()
            }
            StmtKind::ClassDef(class) => class.decorators.iter_mut().chain(class.bases.iter_mut()).collect(),
            StmtKind::Pass
            | StmtKind::Break
            | StmtKind::Continue
            | StmtKind::Import(_)
            | StmtKind::ImportFrom { .. }
            | StmtKind::Global(_)
            | StmtKind::Nonlocal(_) => Vec::new(),
        }
    }

    /// Nested statement blocks.
    pub fn blocks_mut(&mut self) -> Vec<&mut Vec<Stmt>> {
        match &mut self.kind {
            StmtKind::If { body, orelse, .. } => vec![body, orelse],
            StmtKind::While { body, .. } | StmtKind::For { body, .. } | StmtKind::With { body, .. } => vec![body],
            StmtKind::Try { body, handlers, finalbody } => iter::once(body)
                .chain(handlers.iter_mut().map(|h| &mut h.body))
                .chain(iter::once(finalbody))
                .collect(),
            StmtKind::FunctionDef(def) => vec![&mut Rc::make_mut(def).body],
            StmtKind::ClassDef(class) => vec![&mut class.body],
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Expr(Expr),
    /// `a = b = value`
    Assign { targets: Vec<Expr>, value: Expr },
    AugAssign { target: Expr, op: BinOp, value: Expr },
    Pass,
    Break,
    Continue,
    Return(Option<Expr>),
    Assert { test: Expr, msg: Option<Expr> },
    Raise(Option<Expr>),
    Yield(Option<Expr>),
    YieldFrom(Expr),
    Import(Vec<Alias>),
    ImportFrom { module: String, names: Vec<Alias> },
    Global(Vec<String>),
    Nonlocal(Vec<String>),
    If { test: Expr, body: Vec<Stmt>, orelse: Vec<Stmt> },
    While { test: Expr, body: Vec<Stmt> },
    For { target: Expr, iter: Expr, body: Vec<Stmt> },
    With { context: Expr, target: Option<Expr>, body: Vec<Stmt> },
    Try { body: Vec<Stmt>, handlers: Vec<ExceptHandler>, finalbody: Vec<Stmt> },
    FunctionDef(Rc<FunctionDef>),
    ClassDef(ClassDef),
}

/// `import a.b as c` / `from m import a as c`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alias {
    pub name: String,
    pub asname: Option<String>,
}

impl Alias {
    /// The name this import binds in the importing scope.
    pub fn binding(&self) -> &str {
        match &self.asname {
            Some(asname) => asname,
            None => self.name.split('.').next().unwrap_or(&self.name),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExceptHandler {
    /// `None` for a bare `except:`.
    pub kind: Option<Expr>,
    pub name: Option<String>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: String,
    pub params: Params,
    pub body: Vec<Stmt>,
    pub decorators: Vec<Expr>,
    /// Set when the body yields; calling the function collects the yields.
    pub is_generator: bool,
    pub span: Span,
}

#[derive(Debug, Clone, Default)]
pub struct Params {
    pub args: Vec<Param>,
    pub vararg: Option<String>,
    pub kwarg: Option<String>,
}

impl Params {
    /// Every name the parameter list binds.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.args
            .iter()
            .map(|p| p.name.as_str())
            .chain(self.vararg.as_deref())
            .chain(self.kwarg.as_deref())
    }
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone)]
pub struct ClassDef {
    pub name: String,
    pub bases: Vec<Expr>,
    pub body: Vec<Stmt>,
    pub decorators: Vec<Expr>,
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }

    pub fn name(name: impl Into<String>, span: Span) -> Self {
        Self::new(ExprKind::Name(name.into()), span)
    }

    pub fn str(value: impl Into<String>, span: Span) -> Self {
        Self::new(ExprKind::Constant(Constant::Str(value.into())), span)
    }

    pub fn attribute(value: Expr, attr: impl Into<String>) -> Self {
        let span = value.span;
        Self::new(ExprKind::Attribute { value: Box::new(value), attr: attr.into() }, span)
    }

    pub fn call(func: Expr, args: Vec<Expr>) -> Self {
        let span = func.span;
        let args = args.into_iter().map(Arg::Positional).collect();
        Self::new(ExprKind::Call { func: Box::new(func), args }, span)
    }

    pub fn subscript(value: Expr, index: Expr) -> Self {
        let span = value.span;
        Self::new(ExprKind::Subscript { value: Box::new(value), index: Box::new(index) }, span)
    }

    pub fn as_name(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Name(name) => Some(name),
            _ => None,
        }
    }

    /// Direct subexpressions, in source order.
    pub fn children_mut(&mut self) -> Vec<&mut Expr> {
        match &mut self.kind {
            ExprKind::Constant(_) | ExprKind::Name(_) => Vec::new(),
            ExprKind::FString(parts) => parts
                .iter_mut()
                .filter_map(|part| match part {
                    FStringPart::Expr { value, .. } => Some(&mut **value),
                    FStringPart::Literal(_) => None,
                })
                .collect(),
            ExprKind::List(items) | ExprKind::Tuple(items) => items.iter_mut().collect(),
            ExprKind::Dict(pairs) => pairs.iter_mut().flat_map(|(key, value)| [key, value]).collect(),
            ExprKind::ListComp { elt, generators } => {
                let mut out = vec![&mut **elt];
                for generator in generators {
                    out.push(&mut generator.target);
                    out.push(&mut generator.iter);
                    out.extend(generator.ifs.iter_mut());
                }
                out
            }
            ExprKind::Attribute { value, .. } | ExprKind::Unary { operand: value, .. } => vec![&mut **value],
            ExprKind::Subscript { value, index } => vec![&mut **value, &mut **index],
            ExprKind::Slice { lower, upper, step } => {
                [lower, upper, step].into_iter().filter_map(|bound| bound.as_deref_mut()).collect()
            }
            ExprKind::Call { func, args } => iter::once(&mut **func).chain(args.iter_mut().map(Arg::value_mut)).collect(),
            ExprKind::Binary { left, right, .. } | ExprKind::Logical { left, right, .. } => {
                vec![&mut **left, &mut **right]
            }
            ExprKind::Compare { left, ops } => iter::once(&mut **left).chain(ops.iter_mut().map(|(_, e)| e)).collect(),
            ExprKind::IfExp { test, body, orelse } => vec![&mut **body, &mut **test, &mut **orelse],
        }
    }

    /// Whether the expression may appear on the left of `=`.
    pub fn is_assignable(&self) -> bool {
        match &self.kind {
            ExprKind::Name(_) | ExprKind::Attribute { .. } | ExprKind::Subscript { .. } => true,
            ExprKind::Tuple(items) | ExprKind::List(items) => items.iter().all(Expr::is_assignable),
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Constant(Constant),
    FString(Vec<FStringPart>),
    Name(String),
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    /// List displays and generator expressions alike; generators evaluate eagerly.
    ListComp { elt: Box<Expr>, generators: Vec<Comprehension> },
    Attribute { value: Box<Expr>, attr: String },
    Subscript { value: Box<Expr>, index: Box<Expr> },
    /// Only valid as a subscript index.
    Slice { lower: Option<Box<Expr>>, upper: Option<Box<Expr>>, step: Option<Box<Expr>> },
    Call { func: Box<Expr>, args: Vec<Arg> },
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary { op: BinOp, left: Box<Expr>, right: Box<Expr> },
    Compare { left: Box<Expr>, ops: Vec<(CmpOp, Expr)> },
    Logical { op: LogicalOp, left: Box<Expr>, right: Box<Expr> },
    IfExp { test: Box<Expr>, body: Box<Expr>, orelse: Box<Expr> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Debug, Clone)]
pub enum FStringPart {
    Literal(String),
    Expr { value: Box<Expr>, conversion: Option<char>, spec: Option<String> },
}

#[derive(Debug, Clone)]
pub struct Comprehension {
    pub target: Expr,
    pub iter: Expr,
    pub ifs: Vec<Expr>,
}

#[derive(Debug, Clone)]
pub enum Arg {
    Positional(Expr),
    Starred(Expr),
    Keyword(String, Expr),
    DoubleStarred(Expr),
}

impl Arg {
    pub fn value(&self) -> &Expr {
        match self {
            Arg::Positional(e) | Arg::Starred(e) | Arg::Keyword(_, e) | Arg::DoubleStarred(e) => e,
        }
    }

    pub fn value_mut(&mut self) -> &mut Expr {
        match self {
            Arg::Positional(e) | Arg::Starred(e) | Arg::Keyword(_, e) | Arg::DoubleStarred(e) => e,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Invert,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    MatMul,
    LShift,
    RShift,
    BitOr,
    BitXor,
    BitAnd,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
            BinOp::MatMul => "@",
            BinOp::LShift => "<<",
            BinOp::RShift => ">>",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::BitAnd => "&",
        }
    }

    /// Operator for an augmented assignment glyph such as `+=`.
    pub fn from_augmented(glyph: &str) -> Option<Self> {
        let op = glyph.strip_suffix('=')?;
        [
            BinOp::Add, BinOp::Sub, BinOp::Mul, BinOp::Div, BinOp::FloorDiv, BinOp::Mod,
            BinOp::Pow, BinOp::MatMul, BinOp::LShift, BinOp::RShift, BinOp::BitOr,
            BinOp::BitXor, BinOp::BitAnd,
        ]
        .into_iter()
        .find(|candidate| candidate.symbol() == op)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    In,
    NotIn,
    Is,
    IsNot,
}

impl CmpOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::NotEq => "!=",
            CmpOp::Lt => "<",
            CmpOp::LtE => "<=",
            CmpOp::Gt => ">",
            CmpOp::GtE => ">=",
            CmpOp::In => "in",
            CmpOp::NotIn => "not in",
            CmpOp::Is => "is",
            CmpOp::IsNot => "is not",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

/// Reserved words that can never be used as names.
pub const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "break", "class", "continue", "def",
    "elif", "else", "except", "finally", "for", "from", "global", "if", "import", "in", "is",
    "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try", "while", "with",
    "yield",
];

pub fn is_keyword(name: &str) -> bool {
    KEYWORDS.contains(&name)
}

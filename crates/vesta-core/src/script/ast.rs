//! Syntax tree for the scripting language.

use std::rc::Rc;

use rustc_hash::FxHashSet;

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
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
        }
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

/// Piece of an f-string.
#[derive(Debug, Clone, PartialEq)]
pub enum FPart {
    Text(String),
    Field {
        expr: Expr,
        /// `r` or `s` from a `!r` / `!s` suffix.
        conversion: Option<char>,
        spec: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Comprehension {
    For(Target, Expr),
    If(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Name(String),
    FString(Vec<FPart>),
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    Unary(UnaryOp, Box<Expr>),
    Binary(Box<Expr>, BinOp, Box<Expr>),
    Compare(Box<Expr>, Vec<(CmpOp, Expr)>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    IfElse {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
    },
    Attribute(Box<Expr>, String),
    Subscript(Box<Expr>, Box<Expr>),
    /// Only valid as the index of a subscript.
    Slice {
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
    Lambda(Rc<FunctionDef>),
    ListComp {
        element: Box<Expr>,
        clauses: Vec<Comprehension>,
    },
}

/// Assignment target.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Name(String),
    Subscript(Expr, Expr),
    Tuple(Vec<Target>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FunctionBody {
    Block(Vec<Stmt>),
    /// Lambda body.
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<Param>,
    pub body: FunctionBody,
    pub scope: ScopeNames,
}

impl FunctionDef {
    pub fn new(name: String, params: Vec<Param>, body: FunctionBody) -> Self {
        let scope = ScopeNames::of(&params, &body);
        Self {
            name,
            params,
            body,
            scope,
        }
    }
}

/// Names a function body binds, known before it runs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScopeNames {
    /// Parameters and every name the body assigns, minus `global` names.
    pub locals: FxHashSet<String>,
    /// Names declared `global` anywhere in the body.
    pub globals: FxHashSet<String>,
}

impl ScopeNames {
    fn of(params: &[Param], body: &FunctionBody) -> Self {
        let mut names = Self::default();
        names
            .locals
            .extend(params.iter().map(|param| param.name.clone()));
        match body {
            FunctionBody::Block(stmts) => names.visit_block(stmts),
            FunctionBody::Expr(expr) => names.visit_expr(expr),
        }
        let globals = &names.globals;
        names.locals.retain(|name| !globals.contains(name));
        names
    }

    fn bind(&mut self, name: &str) {
        self.locals.insert(name.to_string());
    }

    fn visit_block(&mut self, body: &[Stmt]) {
        for stmt in body {
            self.visit_stmt(stmt);
        }
    }

    fn visit_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Expr(expr) => self.visit_expr(expr),
            StmtKind::Assign { targets, value } => {
                for target in targets {
                    self.visit_target(target);
                }
                self.visit_expr(value);
            }
            StmtKind::AugAssign { target, value, .. } => {
                self.visit_target(target);
                self.visit_expr(value);
            }
            StmtKind::If {
                branches,
                otherwise,
            } => {
                for (condition, body) in branches {
                    self.visit_expr(condition);
                    self.visit_block(body);
                }
                self.visit_block(otherwise);
            }
            StmtKind::While { condition, body } => {
                self.visit_expr(condition);
                self.visit_block(body);
            }
            StmtKind::For { target, iter, body } => {
                self.visit_target(target);
                self.visit_expr(iter);
                self.visit_block(body);
            }
            StmtKind::Return(value) | StmtKind::Raise(value) => {
                if let Some(value) = value {
                    self.visit_expr(value);
                }
            }
            StmtKind::Def(def) => {
                self.bind(&def.name);
                self.visit_defaults(&def.params);
            }
            StmtKind::Del(targets) => {
                for target in targets {
                    self.visit_target(target);
                }
            }
            StmtKind::Global(names) => self.globals.extend(names.iter().cloned()),
            StmtKind::Import(names) | StmtKind::FromImport { names, .. } => {
                for name in names {
                    self.bind(name.bound_name());
                }
            }
            StmtKind::Try {
                body,
                handlers,
                otherwise,
                finally,
            } => {
                self.visit_block(body);
                for handler in handlers {
                    if let Some(kinds) = &handler.kinds {
                        self.visit_expr(kinds);
                    }
                    if let Some(binding) = &handler.binding {
                        self.bind(binding);
                    }
                    self.visit_block(&handler.body);
                }
                self.visit_block(otherwise);
                self.visit_block(finally);
            }
            StmtKind::Assert { condition, message } => {
                self.visit_expr(condition);
                if let Some(message) = message {
                    self.visit_expr(message);
                }
            }
            StmtKind::Break | StmtKind::Continue | StmtKind::Pass => {}
        }
    }

    fn visit_target(&mut self, target: &Target) {
        match target {
            Target::Name(name) => self.bind(name),
            Target::Subscript(container, index) => {
                self.visit_expr(container);
                self.visit_expr(index);
            }
            Target::Tuple(targets) => {
                for target in targets {
                    self.visit_target(target);
                }
            }
        }
    }

    /// Defaults are evaluated in the defining scope; the body is not.
    fn visit_defaults(&mut self, params: &[Param]) {
        for param in params {
            if let Some(default) = &param.default {
                self.visit_expr(default);
            }
        }
    }

    /// Only comprehension clauses bind names inside expressions.
    fn visit_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Literal(_) | Expr::Name(_) => {}
            Expr::FString(parts) => {
                for part in parts {
                    if let FPart::Field { expr, .. } = part {
                        self.visit_expr(expr);
                    }
                }
            }
            Expr::List(items) | Expr::Tuple(items) => {
                for item in items {
                    self.visit_expr(item);
                }
            }
            Expr::Dict(pairs) => {
                for (key, value) in pairs {
                    self.visit_expr(key);
                    self.visit_expr(value);
                }
            }
            Expr::Unary(_, operand) | Expr::Attribute(operand, _) => self.visit_expr(operand),
            Expr::Binary(left, _, right)
            | Expr::And(left, right)
            | Expr::Or(left, right)
            | Expr::Subscript(left, right) => {
                self.visit_expr(left);
                self.visit_expr(right);
            }
            Expr::Compare(first, rest) => {
                self.visit_expr(first);
                for (_, operand) in rest {
                    self.visit_expr(operand);
                }
            }
            Expr::IfElse {
                condition,
                then,
                otherwise,
            } => {
                self.visit_expr(condition);
                self.visit_expr(then);
                self.visit_expr(otherwise);
            }
            Expr::Call { func, args, kwargs } => {
                self.visit_expr(func);
                for arg in args {
                    self.visit_expr(arg);
                }
                for (_, value) in kwargs {
                    self.visit_expr(value);
                }
            }
            Expr::Slice { lower, upper, step } => {
                for bound in [lower, upper, step].into_iter().flatten() {
                    self.visit_expr(bound);
                }
            }
            Expr::Lambda(def) => self.visit_defaults(&def.params),
            Expr::ListComp { element, clauses } => {
                for clause in clauses {
                    match clause {
                        Comprehension::For(target, iter) => {
                            self.visit_target(target);
                            self.visit_expr(iter);
                        }
                        Comprehension::If(condition) => self.visit_expr(condition),
                    }
                }
                self.visit_expr(element);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExceptHandler {
    /// Exception type expression; `None` for a bare `except:`.
    pub kinds: Option<Expr>,
    pub binding: Option<String>,
    pub body: Vec<Stmt>,
}

/// `name` or `name as alias` in an import.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportName {
    pub name: String,
    pub alias: Option<String>,
}

impl ImportName {
    /// Name the import binds in the namespace.
    pub fn bound_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Expr(Expr),
    Assign {
        targets: Vec<Target>,
        value: Expr,
    },
    AugAssign {
        target: Target,
        op: BinOp,
        value: Expr,
    },
    If {
        branches: Vec<(Expr, Vec<Stmt>)>,
        otherwise: Vec<Stmt>,
    },
    While {
        condition: Expr,
        body: Vec<Stmt>,
    },
    For {
        target: Target,
        iter: Expr,
        body: Vec<Stmt>,
    },
    Break,
    Continue,
    Pass,
    Return(Option<Expr>),
    Def(Rc<FunctionDef>),
    Del(Vec<Target>),
    Global(Vec<String>),
    Import(Vec<ImportName>),
    FromImport {
        module: String,
        names: Vec<ImportName>,
    },
    Raise(Option<Expr>),
    Try {
        body: Vec<Stmt>,
        handlers: Vec<ExceptHandler>,
        otherwise: Vec<Stmt>,
        finally: Vec<Stmt>,
    },
    Assert {
        condition: Expr,
        message: Option<Expr>,
    },
}

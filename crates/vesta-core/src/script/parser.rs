//! Recursive-descent parser producing the syntax tree.
//!
//! The whole snippet is parsed before anything runs, so a syntax error never
//! leaves a partially executed snippet behind.

use std::rc::Rc;

use super::ast::{
    BinOp, CmpOp, Comprehension, ExceptHandler, Expr, FPart, FunctionBody, FunctionDef,
    ImportName, Literal, Param, Stmt, StmtKind, Target, UnaryOp,
};
use super::failure::ExecutionFailure;
use super::lexer::{Token, TokenKind, tokenize};

type Result<T> = std::result::Result<T, ExecutionFailure>;

/// Maximum nesting of brackets, blocks and unary operators.
const MAX_NESTING: usize = 100;

/// Maximum depth of an expression tree, counting each link of an operator,
/// call or subscript chain as one level.
const MAX_EXPR_DEPTH: usize = 1000;

/// Parse a complete snippet into a list of statements.
pub fn parse_program(source: &str) -> Result<Vec<Stmt>> {
    let tokens = tokenize(source)?;
    Parser::new(tokens).program()
}

/// Parse a single expression, as found inside an f-string field.
fn parse_fragment(source: &str) -> Result<Expr> {
    let mut parser = Parser::new(tokenize(source.trim())?);
    let expr = parser.expr_list()?;
    while parser.peek_kind() == &TokenKind::Newline {
        parser.advance();
    }
    if parser.peek_kind() != &TokenKind::Eof {
        return Err(parser.unexpected("end of expression"));
    }
    Ok(expr)
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Name(name) => format!("name '{}'", name),
        TokenKind::Keyword(keyword) => format!("'{}'", keyword),
        TokenKind::Int(_) | TokenKind::Float(_) => "number".to_string(),
        TokenKind::Str(_) | TokenKind::FString(_) => "string".to_string(),
        TokenKind::Punct(punct) => format!("'{}'", punct),
        TokenKind::Newline => "end of line".to_string(),
        TokenKind::Indent => "indent".to_string(),
        TokenKind::Dedent => "unindent".to_string(),
        TokenKind::Eof => "end of input".to_string(),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    nesting: usize,
    /// Links of the operator chains being parsed.
    links: usize,
    /// Enclosing loops in the current function body.
    loops: usize,
    /// Enclosing function bodies.
    functions: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            nesting: 0,
            links: 0,
            loops: 0,
            functions: 0,
        }
    }

    // ------------------------------------------------------------------
    // Token helpers
    // ------------------------------------------------------------------

    fn peek(&self) -> &Token {
        // The lexer always terminates the stream with Eof.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn peek_nth_kind(&self, n: usize) -> &TokenKind {
        let index = (self.pos + n).min(self.tokens.len() - 1);
        &self.tokens[index].kind
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn check_punct(&self, punct: &str) -> bool {
        matches!(self.peek_kind(), TokenKind::Punct(p) if *p == punct)
    }

    fn eat_punct(&mut self, punct: &str) -> bool {
        if self.check_punct(punct) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, punct: &str) -> Result<()> {
        if self.eat_punct(punct) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{}'", punct)))
        }
    }

    fn check_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek_kind(), TokenKind::Keyword(k) if *k == keyword)
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.check_keyword(keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<()> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{}'", keyword)))
        }
    }

    fn expect_name(&mut self, what: &str) -> Result<String> {
        match self.peek_kind() {
            TokenKind::Name(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected(what)),
        }
    }

    fn error_here(&self, message: &str) -> ExecutionFailure {
        let token = self.peek();
        ExecutionFailure::syntax(message, token.line, token.column)
    }

    fn error_at(token: &Token, message: &str) -> ExecutionFailure {
        ExecutionFailure::syntax(message, token.line, token.column)
    }

    fn unexpected(&self, expected: &str) -> ExecutionFailure {
        self.error_here(&format!(
            "expected {}, found {}",
            expected,
            describe(self.peek_kind())
        ))
    }

    fn enter(&mut self) -> Result<()> {
        self.nesting += 1;
        if self.nesting > MAX_NESTING {
            return Err(self.error_here("too many nested expressions or blocks"));
        }
        Ok(())
    }

    /// Extend an operator or postfix chain by one level.
    fn link(&mut self) -> Result<()> {
        self.links += 1;
        if self.nesting + self.links > MAX_EXPR_DEPTH {
            return Err(ExecutionFailure::recursion(
                "maximum recursion depth exceeded during compilation",
            ));
        }
        Ok(())
    }

    fn at_statement_end(&self) -> bool {
        matches!(
            self.peek_kind(),
            TokenKind::Newline | TokenKind::Eof | TokenKind::Punct(";")
        )
    }

    fn starts_expression(&self) -> bool {
        match self.peek_kind() {
            TokenKind::Name(_)
            | TokenKind::Int(_)
            | TokenKind::Float(_)
            | TokenKind::Str(_)
            | TokenKind::FString(_) => true,
            TokenKind::Keyword(k) => matches!(*k, "None" | "True" | "False" | "not" | "lambda"),
            TokenKind::Punct(p) => matches!(*p, "(" | "[" | "{" | "-" | "+"),
            _ => false,
        }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn program(mut self) -> Result<Vec<Stmt>> {
        let mut body = Vec::new();
        loop {
            match self.peek_kind() {
                TokenKind::Eof => break,
                TokenKind::Newline => {
                    self.advance();
                }
                _ => body.extend(self.statement()?),
            }
        }
        Ok(body)
    }

    fn statement(&mut self) -> Result<Vec<Stmt>> {
        let line = self.peek().line;
        let kind = match self.peek_kind() {
            TokenKind::Indent => return Err(self.error_here("unexpected indent")),
            TokenKind::Dedent => return Err(self.error_here("unexpected unindent")),
            TokenKind::Keyword("if") => self.if_statement()?,
            TokenKind::Keyword("while") => self.while_statement()?,
            TokenKind::Keyword("for") => self.for_statement()?,
            TokenKind::Keyword("def") => self.function_def()?,
            TokenKind::Keyword("try") => self.try_statement()?,
            _ => return self.simple_line(),
        };
        Ok(vec![Stmt { kind, line }])
    }

    fn simple_line(&mut self) -> Result<Vec<Stmt>> {
        let mut stmts = Vec::new();
        loop {
            let line = self.peek().line;
            let kind = self.simple_statement()?;
            stmts.push(Stmt { kind, line });
            if !self.eat_punct(";") {
                break;
            }
            if matches!(self.peek_kind(), TokenKind::Newline | TokenKind::Eof) {
                break;
            }
        }
        match self.peek_kind() {
            TokenKind::Newline => {
                self.advance();
                Ok(stmts)
            }
            TokenKind::Eof => Ok(stmts),
            _ => Err(self.unexpected("end of line")),
        }
    }

    fn block(&mut self) -> Result<Vec<Stmt>> {
        self.expect_punct(":")?;
        self.enter()?;
        let body = self.block_body();
        self.nesting -= 1;
        body
    }

    fn block_body(&mut self) -> Result<Vec<Stmt>> {
        if self.peek_kind() != &TokenKind::Newline {
            return self.simple_line();
        }
        self.advance();
        if self.peek_kind() != &TokenKind::Indent {
            return Err(self.error_here("expected an indented block"));
        }
        self.advance();

        let mut body = Vec::new();
        loop {
            match self.peek_kind() {
                TokenKind::Dedent => {
                    self.advance();
                    break;
                }
                TokenKind::Eof => break,
                TokenKind::Newline => {
                    self.advance();
                }
                _ => body.extend(self.statement()?),
            }
        }
        Ok(body)
    }

    fn if_statement(&mut self) -> Result<StmtKind> {
        self.advance();
        let condition = self.expression()?;
        let body = self.block()?;
        let mut branches = vec![(condition, body)];
        let mut otherwise = Vec::new();
        loop {
            if self.eat_keyword("elif") {
                let condition = self.expression()?;
                let body = self.block()?;
                branches.push((condition, body));
            } else if self.eat_keyword("else") {
                otherwise = self.block()?;
                break;
            } else {
                break;
            }
        }
        Ok(StmtKind::If {
            branches,
            otherwise,
        })
    }

    fn while_statement(&mut self) -> Result<StmtKind> {
        self.advance();
        let condition = self.expression()?;
        self.loops += 1;
        let body = self.block();
        self.loops -= 1;
        Ok(StmtKind::While {
            condition,
            body: body?,
        })
    }

    fn for_statement(&mut self) -> Result<StmtKind> {
        self.advance();
        let target = self.target_list()?;
        self.expect_keyword("in")?;
        let iter = self.expr_list()?;
        self.loops += 1;
        let body = self.block();
        self.loops -= 1;
        Ok(StmtKind::For {
            target,
            iter,
            body: body?,
        })
    }

    fn function_def(&mut self) -> Result<StmtKind> {
        self.advance();
        let name = self.expect_name("function name")?;
        self.expect_punct("(")?;
        let params = self.parameters(")")?;
        if self.eat_punct("->") {
            self.expression()?;
        }

        let (loops, functions) = (self.loops, self.functions);
        self.loops = 0;
        self.functions += 1;
        let body = self.block();
        self.loops = loops;
        self.functions = functions;

        Ok(StmtKind::Def(Rc::new(FunctionDef::new(
            name,
            params,
            FunctionBody::Block(body?),
        ))))
    }

    /// Parameter list up to and including the `close` token.
    fn parameters(&mut self, close: &str) -> Result<Vec<Param>> {
        let mut params: Vec<Param> = Vec::new();
        while !self.check_punct(close) {
            let token = self.peek().clone();
            let name = self.expect_name("parameter name")?;
            if params.iter().any(|p| p.name == name) {
                return Err(Self::error_at(
                    &token,
                    &format!("duplicate argument '{}' in function definition", name),
                ));
            }
            if close == ")" && self.eat_punct(":") {
                self.expression()?;
            }
            let default = if self.eat_punct("=") {
                Some(self.expression()?)
            } else {
                None
            };
            if default.is_none() && params.last().is_some_and(|p| p.default.is_some()) {
                return Err(Self::error_at(
                    &token,
                    "non-default argument follows default argument",
                ));
            }
            params.push(Param { name, default });
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct(close)?;
        Ok(params)
    }

    fn try_statement(&mut self) -> Result<StmtKind> {
        self.advance();
        let body = self.block()?;

        let mut handlers: Vec<ExceptHandler> = Vec::new();
        while self.check_keyword("except") {
            let token = self.advance();
            if handlers.last().is_some_and(|h| h.kinds.is_none()) {
                return Err(Self::error_at(&token, "default 'except:' must be last"));
            }
            let kinds = if self.check_punct(":") {
                None
            } else {
                Some(self.expression()?)
            };
            let binding = if self.eat_keyword("as") {
                Some(self.expect_name("exception name")?)
            } else {
                None
            };
            let body = self.block()?;
            handlers.push(ExceptHandler {
                kinds,
                binding,
                body,
            });
        }

        let otherwise = if !handlers.is_empty() && self.eat_keyword("else") {
            self.block()?
        } else {
            Vec::new()
        };
        let has_finally = self.check_keyword("finally");
        let finally = if self.eat_keyword("finally") {
            self.block()?
        } else {
            Vec::new()
        };
        if handlers.is_empty() && !has_finally {
            return Err(self.unexpected("'except' or 'finally' block"));
        }

        Ok(StmtKind::Try {
            body,
            handlers,
            otherwise,
            finally,
        })
    }

    fn simple_statement(&mut self) -> Result<StmtKind> {
        let TokenKind::Keyword(keyword) = *self.peek_kind() else {
            return self.expression_statement();
        };
        match keyword {
            "pass" => {
                self.advance();
                Ok(StmtKind::Pass)
            }
            "break" => {
                let token = self.advance();
                if self.loops == 0 {
                    return Err(Self::error_at(&token, "'break' outside loop"));
                }
                Ok(StmtKind::Break)
            }
            "continue" => {
                let token = self.advance();
                if self.loops == 0 {
                    return Err(Self::error_at(&token, "'continue' not properly in loop"));
                }
                Ok(StmtKind::Continue)
            }
            "return" => {
                let token = self.advance();
                if self.functions == 0 {
                    return Err(Self::error_at(&token, "'return' outside function"));
                }
                let value = if self.at_statement_end() {
                    None
                } else {
                    Some(self.expr_list()?)
                };
                Ok(StmtKind::Return(value))
            }
            "global" => {
                self.advance();
                let mut names = vec![self.expect_name("name")?];
                while self.eat_punct(",") {
                    names.push(self.expect_name("name")?);
                }
                Ok(StmtKind::Global(names))
            }
            "del" => {
                self.advance();
                let exprs = self.expr_list()?;
                let targets = match self.to_target(exprs)? {
                    Target::Tuple(targets) => targets,
                    target => vec![target],
                };
                Ok(StmtKind::Del(targets))
            }
            "import" => {
                self.advance();
                Ok(StmtKind::Import(self.import_names()?))
            }
            "from" => {
                self.advance();
                let module = self.expect_name("module name")?;
                self.expect_keyword("import")?;
                let parenthesized = self.eat_punct("(");
                let names = self.import_names()?;
                if parenthesized {
                    self.eat_punct(",");
                    self.expect_punct(")")?;
                }
                Ok(StmtKind::FromImport { module, names })
            }
            "raise" => {
                self.advance();
                if self.at_statement_end() {
                    return Ok(StmtKind::Raise(None));
                }
                let exception = self.expression()?;
                if self.eat_keyword("from") {
                    self.expression()?;
                }
                Ok(StmtKind::Raise(Some(exception)))
            }
            "assert" => {
                self.advance();
                let condition = self.expression()?;
                let message = if self.eat_punct(",") {
                    Some(self.expression()?)
                } else {
                    None
                };
                Ok(StmtKind::Assert { condition, message })
            }
            _ => self.expression_statement(),
        }
    }

    fn import_names(&mut self) -> Result<Vec<ImportName>> {
        let mut names = Vec::new();
        loop {
            let name = self.expect_name("module name")?;
            let alias = if self.eat_keyword("as") {
                Some(self.expect_name("alias")?)
            } else {
                None
            };
            names.push(ImportName { name, alias });
            if !self.check_punct(",") || matches!(self.peek_nth_kind(1), TokenKind::Punct(")")) {
                break;
            }
            self.advance();
        }
        Ok(names)
    }

    fn expression_statement(&mut self) -> Result<StmtKind> {
        let first = self.expr_list()?;

        if self.check_punct("=") {
            let mut exprs = vec![first];
            while self.eat_punct("=") {
                exprs.push(self.expr_list()?);
            }
            let value = exprs
                .pop()
                .ok_or_else(|| self.error_here("invalid syntax"))?;
            let targets = exprs
                .into_iter()
                .map(|expr| self.to_target(expr))
                .collect::<Result<Vec<_>>>()?;
            return Ok(StmtKind::Assign { targets, value });
        }

        if let Some(op) = self.augmented_op() {
            let target = self.to_target(first)?;
            if matches!(target, Target::Tuple(_)) {
                return Err(self.error_here("illegal expression for augmented assignment"));
            }
            self.advance();
            let value = self.expr_list()?;
            return Ok(StmtKind::AugAssign { target, op, value });
        }

        if self.check_punct(":") {
            if !matches!(first, Expr::Name(_) | Expr::Subscript(..)) {
                return Err(self.error_here("illegal target for annotation"));
            }
            self.advance();
            self.expression()?;
            if self.eat_punct("=") {
                let value = self.expr_list()?;
                let target = self.to_target(first)?;
                return Ok(StmtKind::Assign {
                    targets: vec![target],
                    value,
                });
            }
            return Ok(StmtKind::Pass);
        }

        Ok(StmtKind::Expr(first))
    }

    fn augmented_op(&self) -> Option<BinOp> {
        let TokenKind::Punct(punct) = self.peek_kind() else {
            return None;
        };
        match *punct {
            "+=" => Some(BinOp::Add),
            "-=" => Some(BinOp::Sub),
            "*=" => Some(BinOp::Mul),
            "/=" => Some(BinOp::Div),
            "//=" => Some(BinOp::FloorDiv),
            "%=" => Some(BinOp::Mod),
            "**=" => Some(BinOp::Pow),
            _ => None,
        }
    }

    fn to_target(&self, expr: Expr) -> Result<Target> {
        match expr {
            Expr::Name(name) => Ok(Target::Name(name)),
            Expr::Subscript(object, index) => Ok(Target::Subscript(*object, *index)),
            Expr::Tuple(items) | Expr::List(items) => Ok(Target::Tuple(
                items
                    .into_iter()
                    .map(|item| self.to_target(item))
                    .collect::<Result<Vec<_>>>()?,
            )),
            Expr::Attribute(..) => Err(self.error_here("cannot assign to attribute")),
            Expr::Call { .. } => Err(self.error_here("cannot assign to function call")),
            Expr::Literal(_) | Expr::FString(_) => Err(self.error_here("cannot assign to literal")),
            _ => Err(self.error_here("cannot assign to expression")),
        }
    }

    /// Assignment targets of a `for` loop or comprehension, stopping before `in`.
    fn target_list(&mut self) -> Result<Target> {
        let first = self.postfix()?;
        if !self.check_punct(",") {
            return self.to_target(first);
        }
        let mut items = vec![first];
        while self.eat_punct(",") {
            if self.check_keyword("in") {
                break;
            }
            items.push(self.postfix()?);
        }
        self.to_target(Expr::Tuple(items))
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    /// Comma-separated expressions; more than one (or a trailing comma) is a tuple.
    fn expr_list(&mut self) -> Result<Expr> {
        let first = self.expression()?;
        if !self.check_punct(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_punct(",") {
            if !self.starts_expression() {
                break;
            }
            items.push(self.expression()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn expression(&mut self) -> Result<Expr> {
        self.enter()?;
        let expr = self.conditional();
        self.nesting -= 1;
        expr
    }

    fn conditional(&mut self) -> Result<Expr> {
        if self.check_keyword("lambda") {
            return self.lambda();
        }
        let value = self.or_test()?;
        if !self.eat_keyword("if") {
            return Ok(value);
        }
        let condition = self.or_test()?;
        self.expect_keyword("else")?;
        let otherwise = self.expression()?;
        Ok(Expr::IfElse {
            condition: Box::new(condition),
            then: Box::new(value),
            otherwise: Box::new(otherwise),
        })
    }

    fn lambda(&mut self) -> Result<Expr> {
        self.advance();
        let params = self.parameters(":")?;
        let (loops, functions) = (self.loops, self.functions);
        self.loops = 0;
        self.functions += 1;
        let body = self.expression();
        self.loops = loops;
        self.functions = functions;
        Ok(Expr::Lambda(Rc::new(FunctionDef::new(
            "<lambda>".to_string(),
            params,
            FunctionBody::Expr(body?),
        ))))
    }

    fn or_test(&mut self) -> Result<Expr> {
        let links = self.links;
        let mut left = self.and_test()?;
        while self.eat_keyword("or") {
            self.link()?;
            let right = self.and_test()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        self.links = links;
        Ok(left)
    }

    fn and_test(&mut self) -> Result<Expr> {
        let links = self.links;
        let mut left = self.not_test()?;
        while self.eat_keyword("and") {
            self.link()?;
            let right = self.not_test()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        self.links = links;
        Ok(left)
    }

    fn not_test(&mut self) -> Result<Expr> {
        if self.eat_keyword("not") {
            self.enter()?;
            let operand = self.not_test();
            self.nesting -= 1;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(operand?)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr> {
        let first = self.arith()?;
        let mut rest = Vec::new();
        loop {
            let op = match self.peek_kind() {
                TokenKind::Punct("==") => CmpOp::Eq,
                TokenKind::Punct("!=") => CmpOp::NotEq,
                TokenKind::Punct("<") => CmpOp::Lt,
                TokenKind::Punct("<=") => CmpOp::LtE,
                TokenKind::Punct(">") => CmpOp::Gt,
                TokenKind::Punct(">=") => CmpOp::GtE,
                TokenKind::Keyword("in") => CmpOp::In,
                TokenKind::Keyword("not")
                    if self.peek_nth_kind(1) == &TokenKind::Keyword("in") =>
                {
                    self.advance();
                    CmpOp::NotIn
                }
                TokenKind::Keyword("is") => {
                    if self.peek_nth_kind(1) == &TokenKind::Keyword("not") {
                        self.advance();
                        CmpOp::IsNot
                    } else {
                        CmpOp::Is
                    }
                }
                _ => break,
            };
            self.advance();
            rest.push((op, self.arith()?));
        }
        if rest.is_empty() {
            Ok(first)
        } else {
            Ok(Expr::Compare(Box::new(first), rest))
        }
    }

    fn arith(&mut self) -> Result<Expr> {
        let links = self.links;
        let mut left = self.term()?;
        loop {
            let op = if self.check_punct("+") {
                BinOp::Add
            } else if self.check_punct("-") {
                BinOp::Sub
            } else {
                break;
            };
            self.advance();
            self.link()?;
            let right = self.term()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        self.links = links;
        Ok(left)
    }

    fn term(&mut self) -> Result<Expr> {
        let links = self.links;
        let mut left = self.factor()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Punct("*") => BinOp::Mul,
                TokenKind::Punct("/") => BinOp::Div,
                TokenKind::Punct("//") => BinOp::FloorDiv,
                TokenKind::Punct("%") => BinOp::Mod,
                _ => break,
            };
            self.advance();
            self.link()?;
            let right = self.factor()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        self.links = links;
        Ok(left)
    }

    fn factor(&mut self) -> Result<Expr> {
        let op = if self.check_punct("-") {
            UnaryOp::Neg
        } else if self.check_punct("+") {
            UnaryOp::Pos
        } else {
            return self.power();
        };
        self.advance();
        self.enter()?;
        let operand = self.factor();
        self.nesting -= 1;
        Ok(Expr::Unary(op, Box::new(operand?)))
    }

    fn power(&mut self) -> Result<Expr> {
        let base = self.postfix()?;
        if !self.eat_punct("**") {
            return Ok(base);
        }
        self.enter()?;
        let exponent = self.factor();
        self.nesting -= 1;
        Ok(Expr::Binary(Box::new(base), BinOp::Pow, Box::new(exponent?)))
    }

    fn postfix(&mut self) -> Result<Expr> {
        let links = self.links;
        let mut expr = self.atom()?;
        loop {
            if matches!(self.peek_kind(), TokenKind::Punct("(" | "[" | ".")) {
                self.link()?;
            }
            if self.eat_punct("(") {
                let (args, kwargs) = self.call_arguments()?;
                expr = Expr::Call {
                    func: Box::new(expr),
                    args,
                    kwargs,
                };
            } else if self.eat_punct("[") {
                let index = self.subscript()?;
                self.expect_punct("]")?;
                expr = Expr::Subscript(Box::new(expr), Box::new(index));
            } else if self.eat_punct(".") {
                let name = self.expect_name("attribute name")?;
                expr = Expr::Attribute(Box::new(expr), name);
            } else {
                self.links = links;
                return Ok(expr);
            }
        }
    }

    fn call_arguments(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>)> {
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expr)> = Vec::new();
        while !self.check_punct(")") {
            let keyword = match (self.peek_kind(), self.peek_nth_kind(1)) {
                (TokenKind::Name(name), TokenKind::Punct("=")) => Some(name.clone()),
                _ => None,
            };
            if let Some(name) = keyword {
                let token = self.advance();
                self.advance();
                if kwargs.iter().any(|(existing, _)| *existing == name) {
                    return Err(Self::error_at(
                        &token,
                        &format!("keyword argument repeated: {}", name),
                    ));
                }
                let value = self.expression()?;
                kwargs.push((name, value));
            } else {
                if !kwargs.is_empty() {
                    return Err(self.error_here("positional argument follows keyword argument"));
                }
                let arg = self.expression()?;
                if self.check_keyword("for") {
                    let clauses = self.comprehension_clauses()?;
                    args.push(Expr::ListComp {
                        element: Box::new(arg),
                        clauses,
                    });
                } else {
                    args.push(arg);
                }
            }
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct(")")?;
        Ok((args, kwargs))
    }

    fn subscript(&mut self) -> Result<Expr> {
        let lower = if self.check_punct(":") {
            None
        } else {
            Some(self.expression()?)
        };

        if !self.check_punct(":") {
            let Some(index) = lower else {
                return Err(self.unexpected("index"));
            };
            if !self.check_punct(",") {
                return Ok(index);
            }
            let mut items = vec![index];
            while self.eat_punct(",") {
                if self.check_punct("]") {
                    break;
                }
                items.push(self.expression()?);
            }
            return Ok(Expr::Tuple(items));
        }

        self.advance();
        let upper = if self.check_punct(":") || self.check_punct("]") {
            None
        } else {
            Some(Box::new(self.expression()?))
        };
        let step = if self.eat_punct(":") && !self.check_punct("]") {
            Some(Box::new(self.expression()?))
        } else {
            None
        };
        Ok(Expr::Slice {
            lower: lower.map(Box::new),
            upper,
            step,
        })
    }

    fn comprehension_clauses(&mut self) -> Result<Vec<Comprehension>> {
        let mut clauses = Vec::new();
        while self.eat_keyword("for") {
            let target = self.target_list()?;
            self.expect_keyword("in")?;
            let iter = self.or_test()?;
            clauses.push(Comprehension::For(target, iter));
            while self.eat_keyword("if") {
                clauses.push(Comprehension::If(self.or_test()?));
            }
        }
        Ok(clauses)
    }

    fn atom(&mut self) -> Result<Expr> {
        let token = self.advance();
        match token.kind {
            TokenKind::Name(name) => Ok(Expr::Name(name)),
            TokenKind::Keyword("None") => Ok(Expr::Literal(Literal::None)),
            TokenKind::Keyword("True") => Ok(Expr::Literal(Literal::Bool(true))),
            TokenKind::Keyword("False") => Ok(Expr::Literal(Literal::Bool(false))),
            TokenKind::Int(value) => Ok(Expr::Literal(Literal::Int(value))),
            TokenKind::Float(value) => Ok(Expr::Literal(Literal::Float(value))),
            TokenKind::Str(_) | TokenKind::FString(_) => self.strings(token),
            TokenKind::Punct("(") => self.parenthesized(),
            TokenKind::Punct("[") => self.list_display(),
            TokenKind::Punct("{") => self.dict_display(),
            ref kind => Err(Self::error_at(
                &token,
                &format!("expected expression, found {}", describe(kind)),
            )),
        }
    }

    fn parenthesized(&mut self) -> Result<Expr> {
        if self.eat_punct(")") {
            return Ok(Expr::Tuple(Vec::new()));
        }
        let first = self.expression()?;
        if self.check_keyword("for") {
            let clauses = self.comprehension_clauses()?;
            self.expect_punct(")")?;
            return Ok(Expr::ListComp {
                element: Box::new(first),
                clauses,
            });
        }
        if self.eat_punct(")") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_punct(",") {
            if self.check_punct(")") {
                break;
            }
            items.push(self.expression()?);
        }
        self.expect_punct(")")?;
        Ok(Expr::Tuple(items))
    }

    fn list_display(&mut self) -> Result<Expr> {
        if self.eat_punct("]") {
            return Ok(Expr::List(Vec::new()));
        }
        let first = self.expression()?;
        if self.check_keyword("for") {
            let clauses = self.comprehension_clauses()?;
            self.expect_punct("]")?;
            return Ok(Expr::ListComp {
                element: Box::new(first),
                clauses,
            });
        }
        let mut items = vec![first];
        while self.eat_punct(",") {
            if self.check_punct("]") {
                break;
            }
            items.push(self.expression()?);
        }
        self.expect_punct("]")?;
        Ok(Expr::List(items))
    }

    fn dict_display(&mut self) -> Result<Expr> {
        let mut pairs = Vec::new();
        while !self.check_punct("}") {
            let key = self.expression()?;
            if !self.check_punct(":") {
                return Err(self.error_here("set literals are not supported"));
            }
            self.advance();
            let value = self.expression()?;
            pairs.push((key, value));
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct("}")?;
        Ok(Expr::Dict(pairs))
    }

    /// Adjacent string literals, concatenated; any f-string makes the result an f-string.
    fn strings(&mut self, first: Token) -> Result<Expr> {
        let mut pieces = vec![first];
        while matches!(self.peek_kind(), TokenKind::Str(_) | TokenKind::FString(_)) {
            pieces.push(self.advance());
        }

        if !pieces
            .iter()
            .any(|t| matches!(t.kind, TokenKind::FString(_)))
        {
            let mut text = String::new();
            for piece in &pieces {
                if let TokenKind::Str(s) = &piece.kind {
                    text.push_str(s);
                }
            }
            return Ok(Expr::Literal(Literal::Str(text.into())));
        }

        let mut parts = Vec::new();
        for piece in pieces {
            match piece.kind {
                TokenKind::Str(text) => parts.push(FPart::Text(text)),
                TokenKind::FString(body) => {
                    parts.extend(fstring_parts(&body, piece.line, piece.column)?)
                }
                _ => {}
            }
        }
        Ok(Expr::FString(parts))
    }
}

/// Split an f-string body into literal text and `{expr!conv:spec}` fields.
fn fstring_parts(body: &str, line: usize, column: usize) -> Result<Vec<FPart>> {
    let error = |message: &str| ExecutionFailure::syntax(format!("f-string: {}", message), line, column);
    let chars: Vec<char> = body.chars().collect();
    let mut parts = Vec::new();
    let mut text = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '}' {
            if chars.get(i + 1) == Some(&'}') {
                text.push('}');
                i += 2;
                continue;
            }
            return Err(error("single '}' is not allowed"));
        }
        if c != '{' {
            text.push(c);
            i += 1;
            continue;
        }
        if chars.get(i + 1) == Some(&'{') {
            text.push('{');
            i += 2;
            continue;
        }

        let start = i + 1;
        let mut j = start;
        let mut depth = 0usize;
        let mut quote: Option<char> = None;
        let mut expr_end = None;
        let mut conversion = None;
        let mut spec_start = None;
        loop {
            let Some(&ch) = chars.get(j) else {
                return Err(error("expecting '}'"));
            };
            if let Some(q) = quote {
                if ch == q {
                    quote = None;
                }
                j += 1;
                continue;
            }
            match ch {
                '\'' | '"' => quote = Some(ch),
                '(' | '[' | '{' => depth += 1,
                ')' | ']' => depth = depth.saturating_sub(1),
                '}' if depth > 0 => depth -= 1,
                '}' => break,
                '!' if depth == 0 && expr_end.is_none() && chars.get(j + 1) != Some(&'=') => {
                    expr_end = Some(j);
                    conversion = chars.get(j + 1).copied();
                    j += 2;
                    continue;
                }
                ':' if depth == 0 => {
                    if expr_end.is_none() {
                        expr_end = Some(j);
                    }
                    spec_start = Some(j + 1);
                    j += 1;
                    while chars.get(j).is_some_and(|&c| c != '}') {
                        j += 1;
                    }
                    continue;
                }
                _ => {}
            }
            j += 1;
        }

        let expr_end = expr_end.unwrap_or(j);
        let source: String = chars[start..expr_end].iter().collect();
        if source.trim().is_empty() {
            return Err(error("empty expression not allowed"));
        }
        let conversion = match conversion {
            None => None,
            Some('r' | 'a') => Some('r'),
            Some('s') => Some('s'),
            Some(_) => return Err(error("invalid conversion character")),
        };
        let spec: String = match spec_start {
            Some(s) => chars[s..j].iter().collect(),
            None => String::new(),
        };
        let expr = parse_fragment(&source)
            .map_err(|_| error(&format!("invalid expression '{}'", source.trim())))?;

        if !text.is_empty() {
            parts.push(FPart::Text(std::mem::take(&mut text)));
        }
        parts.push(FPart::Field {
            expr,
            conversion,
            spec,
        });
        i = j + 1;
    }

    if !text.is_empty() {
        parts.push(FPart::Text(text));
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(source: &str) -> StmtKind {
        let mut stmts = parse_program(source).unwrap();
        assert_eq!(stmts.len(), 1, "expected one statement in {:?}", source);
        stmts.remove(0).kind
    }

    fn parse_expr(source: &str) -> Expr {
        match parse_one(source) {
            StmtKind::Expr(expr) => expr,
            other => panic!("expected expression statement, got {:?}", other),
        }
    }

    #[test]
    fn test_assignment() {
        assert_eq!(
            parse_one("x = 41"),
            StmtKind::Assign {
                targets: vec![Target::Name("x".to_string())],
                value: Expr::Literal(Literal::Int(41)),
            }
        );
    }

    #[test]
    fn test_chained_and_unpacking_assignment() {
        match parse_one("a = b = 1") {
            StmtKind::Assign { targets, .. } => assert_eq!(targets.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
        match parse_one("a, b = b, a") {
            StmtKind::Assign { targets, value } => {
                assert!(matches!(&targets[0], Target::Tuple(items) if items.len() == 2));
                assert!(matches!(value, Expr::Tuple(items) if items.len() == 2));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_precedence() {
        let expr = parse_expr("1 + 2 * 3");
        match expr {
            Expr::Binary(left, BinOp::Add, right) => {
                assert_eq!(*left, Expr::Literal(Literal::Int(1)));
                assert!(matches!(*right, Expr::Binary(_, BinOp::Mul, _)));
            }
            other => panic!("unexpected {:?}", other),
        }
        // -2 ** 2 is -(2 ** 2)
        assert!(matches!(
            parse_expr("-2 ** 2"),
            Expr::Unary(UnaryOp::Neg, inner) if matches!(*inner, Expr::Binary(_, BinOp::Pow, _))
        ));
    }

    #[test]
    fn test_chained_comparison() {
        match parse_expr("a < b <= c not in d") {
            Expr::Compare(_, rest) => {
                let ops: Vec<CmpOp> = rest.iter().map(|(op, _)| *op).collect();
                assert_eq!(ops, vec![CmpOp::Lt, CmpOp::LtE, CmpOp::NotIn]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_if_elif_else() {
        let source = "if a:\n    x = 1\nelif b:\n    x = 2\nelse:\n    x = 3\n";
        match parse_one(source) {
            StmtKind::If {
                branches,
                otherwise,
            } => {
                assert_eq!(branches.len(), 2);
                assert_eq!(otherwise.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_function_def_with_defaults() {
        match parse_one("def add(a, b=2):\n    return a + b\n") {
            StmtKind::Def(def) => {
                assert_eq!(def.name, "add");
                assert_eq!(def.params.len(), 2);
                assert!(def.params[0].default.is_none());
                assert!(def.params[1].default.is_some());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_lambda_and_comprehension() {
        assert!(matches!(parse_expr("lambda x: x + 1"), Expr::Lambda(_)));
        match parse_expr("[x * 2 for x in xs if x > 1]") {
            Expr::ListComp { clauses, .. } => assert_eq!(clauses.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
        match parse_expr("sum(x for x in xs)") {
            Expr::Call { args, .. } => assert!(matches!(args[0], Expr::ListComp { .. })),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_fstring_parts() {
        match parse_expr("f'x={x!r:>4} {{ok}}'") {
            Expr::FString(parts) => {
                assert_eq!(parts.len(), 3);
                assert_eq!(parts[0], FPart::Text("x=".to_string()));
                match &parts[1] {
                    FPart::Field {
                        expr,
                        conversion,
                        spec,
                    } => {
                        assert_eq!(*expr, Expr::Name("x".to_string()));
                        assert_eq!(*conversion, Some('r'));
                        assert_eq!(spec, ">4");
                    }
                    other => panic!("unexpected {:?}", other),
                }
                assert_eq!(parts[2], FPart::Text(" {ok}".to_string()));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_slices() {
        match parse_expr("xs[1:-1]") {
            Expr::Subscript(_, index) => assert!(matches!(
                *index,
                Expr::Slice { lower: Some(_), upper: Some(_), step: None }
            )),
            other => panic!("unexpected {:?}", other),
        }
        match parse_expr("xs[::2]") {
            Expr::Subscript(_, index) => assert!(matches!(
                *index,
                Expr::Slice { lower: None, upper: None, step: Some(_) }
            )),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_try_statement() {
        let source = "try:\n    x = 1\nexcept (KeyError, ValueError) as e:\n    pass\nfinally:\n    y = 2\n";
        match parse_one(source) {
            StmtKind::Try {
                handlers, finally, ..
            } => {
                assert_eq!(handlers.len(), 1);
                assert_eq!(handlers[0].binding.as_deref(), Some("e"));
                assert_eq!(finally.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_semicolons_and_inline_blocks() {
        let stmts = parse_program("a = 1; b = 2\nif a: print(a)\n").unwrap();
        assert_eq!(stmts.len(), 3);
    }

    #[test]
    fn test_syntax_errors() {
        let cases = [
            ("def (", "expected function name"),
            ("x = ", "expected expression"),
            ("  x = 1", "unexpected indent"),
            ("break", "'break' outside loop"),
            ("return 1", "'return' outside function"),
            ("if x:\n", "expected an indented block"),
            ("f() = 1", "cannot assign to function call"),
            ("{1, 2}", "set literals are not supported"),
            ("f'{}'", "empty expression"),
            ("def f(a=1, b): pass", "non-default argument"),
        ];
        for (source, expected) in cases {
            let err = parse_program(source).unwrap_err();
            assert_eq!(err.kind(), "SyntaxError", "source: {:?}", source);
            assert!(
                err.message().contains(expected),
                "source {:?} gave {:?}",
                source,
                err.message()
            );
        }
    }

    #[test]
    fn test_del_targets() {
        let stmts = parse_program("del a, b[0]\ndel c\n").unwrap();
        match &stmts[0].kind {
            StmtKind::Del(targets) => {
                assert_eq!(targets.len(), 2);
                assert_eq!(targets[0], Target::Name("a".to_string()));
                assert!(matches!(targets[1], Target::Subscript(..)));
            }
            other => panic!("expected del, got {:?}", other),
        }
        assert!(matches!(&stmts[1].kind, StmtKind::Del(targets) if targets.len() == 1));
        assert!(parse_program("del f()").is_err());
    }

    #[test]
    fn test_nesting_limit() {
        let source = format!("{}1{}", "(".repeat(MAX_NESTING + 5), ")".repeat(MAX_NESTING + 5));
        let err = parse_program(&source).unwrap_err();
        assert!(err.message().contains("too many nested"));

        let source = format!("x = {}2", "2 ** ".repeat(MAX_NESTING + 5));
        let err = parse_program(&source).unwrap_err();
        assert!(err.message().contains("too many nested"));
    }

    #[test]
    fn test_long_chains_are_bounded() {
        assert!(parse_program(&format!("x = 1{}", " + 1".repeat(500))).is_ok());
        assert!(parse_program(&format!("x = a{}", "[0]".repeat(500))).is_ok());

        for source in [
            format!("x = 1{}", " + 1".repeat(200_000)),
            format!("x = 2{}", " * 2".repeat(MAX_EXPR_DEPTH)),
            format!("x = a{}", "[0]".repeat(MAX_EXPR_DEPTH)),
            format!("x = f{}", "()".repeat(MAX_EXPR_DEPTH)),
            format!("x = a{}", " or a".repeat(MAX_EXPR_DEPTH)),
        ] {
            let err = parse_program(&source).unwrap_err();
            assert_eq!(
                err.to_string(),
                "RecursionError: maximum recursion depth exceeded during compilation"
            );
        }
    }

    #[test]
    fn test_function_scope_names() {
        let source = "\
def f(a, b=c):
    global g
    x = 1
    y += 2
    g = 3
    for i, (j, k) in pairs:
        pass
    items[n] = 4
    total = [m for m in a]
    import math as m2
    def inner(z):
        w = 5
    try:
        pass
    except ValueError as err:
        pass
";
        let StmtKind::Def(def) = parse_one(source) else {
            panic!("expected a function definition");
        };
        let mut locals: Vec<&str> = def.scope.locals.iter().map(String::as_str).collect();
        locals.sort_unstable();
        assert_eq!(
            locals,
            vec!["a", "b", "err", "i", "inner", "j", "k", "m", "m2", "total", "x", "y"]
        );
        assert!(def.scope.globals.contains("g"));
    }
}

//! Tree-walking evaluator.
//!
//! [`Interpreter`] is the [`ScriptRuntime`] the engine uses. Each run parses
//! the whole snippet first, so a syntax error leaves the namespace untouched,
//! then walks the statements with a [`Machine`] that borrows the namespace,
//! the output channel and the abort handle for the duration of the run.
//!
//! Runs happen on a dedicated thread with a fixed stack, and the machine
//! bounds how deeply it recurses, so no script can overflow the native stack
//! whatever thread the caller is on.

use std::cell::RefCell;
use std::panic;
use std::rc::Rc;
use std::thread;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, warn};

use super::ast::{
    Comprehension, ExceptHandler, Expr, FPart, FunctionBody, FunctionDef, Literal, Stmt, StmtKind,
    Target,
};
use super::builtins;
use super::failure::ExecutionFailure;
use super::format::format_value;
use super::methods;
use super::modules;
use super::ops::{self, Index};
use super::parser::parse_program;
use super::value::{Dict, Function, Namespace, Scope, Value};
use crate::execute::{AbortHandle, OutputChannel, ScriptRuntime};

type Result<T> = std::result::Result<T, ExecutionFailure>;

/// Default limit on nested script function calls.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 200;

/// Largest call depth the kernel accepts as a setting.
pub const MAX_CALL_DEPTH_LIMIT: usize = 1000;

/// Stack of the thread each run executes on.
const EVAL_STACK_SIZE: usize = 256 * 1024 * 1024;

/// Limit on nested statement and expression evaluation within one run.
///
/// Sized against [`EVAL_STACK_SIZE`] with room for the helper frames between
/// two counted levels.
const MAX_EVAL_DEPTH: usize = 6000;

/// The embedded script interpreter.
#[derive(Debug, Clone)]
pub struct Interpreter {
    abort: AbortHandle,
    max_call_depth: usize,
}

impl Interpreter {
    /// Create an interpreter that stops when `abort` is tripped.
    pub fn new(abort: AbortHandle) -> Self {
        Self {
            abort,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }

    pub fn with_max_call_depth(mut self, max_call_depth: usize) -> Self {
        self.max_call_depth = max_call_depth;
        self
    }

    pub fn abort_handle(&self) -> &AbortHandle {
        &self.abort
    }
}

impl ScriptRuntime for Interpreter {
    fn run(
        &mut self,
        source: &str,
        namespace: &mut Namespace,
        output: &mut OutputChannel,
    ) -> Result<()> {
        let abort = &self.abort;
        let max_call_depth = self.max_call_depth;
        let state = RunState { namespace, output };

        thread::scope(|scope| {
            let worker = thread::Builder::new()
                .name("vesta-eval".to_string())
                .stack_size(EVAL_STACK_SIZE)
                .spawn_scoped(scope, move || {
                    let RunState { namespace, output } = state.into_inner();
                    evaluate(source, namespace, output, abort, max_call_depth)
                })
                .map_err(|err| {
                    warn!(%err, "Failed to start evaluation thread");
                    ExecutionFailure::new("RuntimeError", "can't start new thread")
                })?;
            worker
                .join()
                .unwrap_or_else(|payload| panic::resume_unwind(payload))
        })
    }
}

/// State a run borrows from the calling thread.
struct RunState<'a> {
    namespace: &'a mut Namespace,
    output: &'a mut OutputChannel,
}

impl RunState<'_> {
    /// Taken whole so a closure captures the `Send` wrapper, not its fields.
    fn into_inner(self) -> Self {
        self
    }
}

// SAFETY: the namespace and output channel hold `Rc` values, which are not
// thread-safe to share. A `RunState` is only moved to the evaluation thread
// while the calling thread is blocked joining it, so they are never used by
// two threads at once, and the join orders every access on the evaluation
// thread before the caller's next one.
unsafe impl Send for RunState<'_> {}

fn evaluate(
    source: &str,
    namespace: &mut Namespace,
    output: &mut OutputChannel,
    abort: &AbortHandle,
    max_call_depth: usize,
) -> Result<()> {
    let program = match parse_program(source) {
        Ok(program) => program,
        Err(failure) => {
            debug!(%failure, "Snippet rejected by parser");
            return Err(failure);
        }
    };

    let mut machine = Machine {
        globals: namespace,
        output,
        abort,
        frames: Vec::new(),
        handling: Vec::new(),
        max_call_depth,
        depth: 0,
        line: 0,
    };
    match machine.exec_block(&program) {
        Ok(_) => Ok(()),
        Err(failure) => {
            debug!(line = machine.line, %failure, "Snippet raised");
            Err(failure)
        }
    }
}

/// Local scope of one function call.
struct Frame {
    locals: Scope,
    /// Scopes of enclosing function calls, outermost first.
    enclosing: Vec<Scope>,
    /// Names declared `global` in this call.
    globals: FxHashSet<String>,
    def: Rc<FunctionDef>,
}

/// How a statement finished.
enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

/// State of one run.
pub(crate) struct Machine<'a> {
    globals: &'a mut Namespace,
    output: &'a mut OutputChannel,
    abort: &'a AbortHandle,
    frames: Vec<Frame>,
    /// Exceptions whose `except` clauses are executing; a bare `raise`
    /// re-raises the innermost.
    handling: Vec<Rc<ExecutionFailure>>,
    max_call_depth: usize,
    /// Statements and expressions currently being evaluated.
    depth: usize,
    line: usize,
}

impl Machine<'_> {
    pub(crate) fn write(&mut self, text: &str) {
        self.output.write(text);
    }

    fn descend(&mut self) -> Result<()> {
        if self.depth >= MAX_EVAL_DEPTH {
            return Err(ExecutionFailure::recursion("maximum recursion depth exceeded"));
        }
        self.depth += 1;
        Ok(())
    }

    fn check_abort(&self) -> Result<()> {
        if self.abort.is_aborted() {
            Err(ExecutionFailure::interrupted())
        } else {
            Ok(())
        }
    }

    // ------------------------------------------------------------------
    // Names
    // ------------------------------------------------------------------

    fn load(&self, name: &str) -> Result<Value> {
        if let Some(frame) = self.frames.last() {
            if !frame.globals.contains(name) {
                if let Some(value) = frame.locals.borrow().get(name) {
                    return Ok(value.clone());
                }
                if frame.def.scope.locals.contains(name) {
                    return Err(ExecutionFailure::unbound_local(name));
                }
                for scope in frame.enclosing.iter().rev() {
                    if let Some(value) = scope.borrow().get(name) {
                        return Ok(value.clone());
                    }
                }
            }
        }
        if let Some(value) = self.globals.get(name) {
            return Ok(value.clone());
        }
        builtins::lookup(name).ok_or_else(|| ExecutionFailure::name_error(name))
    }

    fn store(&mut self, name: &str, value: Value) {
        match self.frames.last() {
            Some(frame) if !frame.globals.contains(name) => {
                frame.locals.borrow_mut().insert(name.to_string(), value);
            }
            _ => self.globals.set(name, value),
        }
    }

    fn delete_name(&mut self, name: &str) -> Result<()> {
        let removed = match self.frames.last() {
            Some(frame) if !frame.globals.contains(name) => {
                frame.locals.borrow_mut().remove(name).is_some()
            }
            _ => self.globals.remove(name).is_some(),
        };
        if removed {
            Ok(())
        } else {
            Err(ExecutionFailure::name_error(name))
        }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn exec_block(&mut self, body: &[Stmt]) -> Result<Flow> {
        for stmt in body {
            match self.exec(stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt) -> Result<Flow> {
        self.descend()?;
        let flow = self.exec_stmt(stmt);
        self.depth -= 1;
        flow
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> Result<Flow> {
        self.line = stmt.line;
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.eval(expr)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value)?;
                for target in targets {
                    self.assign(target, value.clone())?;
                }
            }
            StmtKind::AugAssign { target, op, value } => match target {
                Target::Name(name) => {
                    let current = self.load(name)?;
                    let operand = self.eval(value)?;
                    let updated = ops::inplace(*op, &current, &operand)?;
                    self.store(name, updated);
                }
                Target::Subscript(container, index) => {
                    let container = self.eval(container)?;
                    let index = self.eval_index(index)?;
                    let current = ops::get_index(&container, &index)?;
                    let operand = self.eval(value)?;
                    let updated = ops::inplace(*op, &current, &operand)?;
                    ops::set_index(&container, index, updated)?;
                }
                Target::Tuple(_) => {
                    return Err(ExecutionFailure::new(
                        "SyntaxError",
                        "illegal expression for augmented assignment",
                    ));
                }
            },
            StmtKind::If {
                branches,
                otherwise,
            } => {
                for (condition, body) in branches {
                    if self.eval(condition)?.truthy() {
                        return self.exec_block(body);
                    }
                }
                return self.exec_block(otherwise);
            }
            StmtKind::While { condition, body } => {
                while self.eval(condition)?.truthy() {
                    self.check_abort()?;
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            StmtKind::For { target, iter, body } => {
                let items = self.eval(iter)?.iter()?;
                for item in items {
                    self.check_abort()?;
                    self.assign(target, item)?;
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Pass => {}
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Def(def) => {
                let function = self.make_function(def)?;
                self.store(&def.name, function);
            }
            StmtKind::Del(targets) => {
                for target in targets {
                    self.delete(target)?;
                }
            }
            StmtKind::Global(names) => {
                if let Some(frame) = self.frames.last_mut() {
                    frame.globals.extend(names.iter().cloned());
                }
            }
            StmtKind::Import(names) => {
                for name in names {
                    let module = modules::import(&name.name)?;
                    self.store(name.bound_name(), Value::Module(module));
                }
            }
            StmtKind::FromImport { module, names } => {
                let imported = modules::import(module)?;
                for name in names {
                    let member = imported.members.get(name.name.as_str()).cloned();
                    let member = member.ok_or_else(|| {
                        ExecutionFailure::new(
                            "ImportError",
                            format!("cannot import name '{}' from '{}'", name.name, module),
                        )
                    })?;
                    self.store(name.bound_name(), member);
                }
            }
            StmtKind::Raise(exception) => return Err(self.raised(exception.as_ref())?),
            StmtKind::Try {
                body,
                handlers,
                otherwise,
                finally,
            } => return self.exec_try(body, handlers, otherwise, finally),
            StmtKind::Assert { condition, message } => {
                if !self.eval(condition)?.truthy() {
                    let message = match message {
                        Some(message) => self.eval(message)?.to_str(),
                        None => String::new(),
                    };
                    return Err(ExecutionFailure::new("AssertionError", message));
                }
            }
        }
        Ok(Flow::Normal)
    }

    fn assign(&mut self, target: &Target, value: Value) -> Result<()> {
        match target {
            Target::Name(name) => {
                self.store(name, value);
                Ok(())
            }
            Target::Subscript(container, index) => {
                let container = self.eval(container)?;
                let index = self.eval_index(index)?;
                ops::set_index(&container, index, value)
            }
            Target::Tuple(targets) => {
                let items = value.to_vec().map_err(|_| {
                    ExecutionFailure::type_error(format!(
                        "cannot unpack non-iterable {} object",
                        value.type_name()
                    ))
                })?;
                if items.len() > targets.len() {
                    return Err(ExecutionFailure::value_error(format!(
                        "too many values to unpack (expected {})",
                        targets.len()
                    )));
                }
                if items.len() < targets.len() {
                    return Err(ExecutionFailure::value_error(format!(
                        "not enough values to unpack (expected {}, got {})",
                        targets.len(),
                        items.len()
                    )));
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item)?;
                }
                Ok(())
            }
        }
    }

    fn delete(&mut self, target: &Target) -> Result<()> {
        match target {
            Target::Name(name) => self.delete_name(name),
            Target::Subscript(container, index) => {
                let container = self.eval(container)?;
                let index = self.eval_index(index)?;
                ops::del_index(&container, index)
            }
            Target::Tuple(targets) => {
                for target in targets {
                    self.delete(target)?;
                }
                Ok(())
            }
        }
    }

    fn exec_try(
        &mut self,
        body: &[Stmt],
        handlers: &[ExceptHandler],
        otherwise: &[Stmt],
        finally: &[Stmt],
    ) -> Result<Flow> {
        let outcome = match self.exec_block(body) {
            Ok(Flow::Normal) => self.exec_block(otherwise),
            Ok(flow) => Ok(flow),
            Err(failure) => self.handle(failure, handlers),
        };
        if finally.is_empty() {
            return outcome;
        }
        // A `finally` that raises or jumps replaces the pending outcome.
        match self.exec_block(finally)? {
            Flow::Normal => outcome,
            flow => Ok(flow),
        }
    }

    fn handle(&mut self, failure: ExecutionFailure, handlers: &[ExceptHandler]) -> Result<Flow> {
        let failure = Rc::new(failure);
        for handler in handlers {
            let matched = match &handler.kinds {
                None => true,
                Some(kinds) => {
                    let kinds = self.eval(kinds)?;
                    exception_matches(&failure, &kinds)?
                }
            };
            if !matched {
                continue;
            }

            if let Some(binding) = &handler.binding {
                self.store(binding, Value::Exception(failure.clone()));
            }
            self.handling.push(failure.clone());
            let result = self.exec_block(&handler.body);
            self.handling.pop();
            if let Some(binding) = &handler.binding {
                let _ = self.delete_name(binding);
            }
            return result;
        }
        Err(Rc::unwrap_or_clone(failure))
    }

    /// The failure a `raise` statement produces.
    fn raised(&mut self, exception: Option<&Expr>) -> Result<ExecutionFailure> {
        let Some(exception) = exception else {
            return Ok(match self.handling.last() {
                Some(active) => ExecutionFailure::clone(active),
                None => ExecutionFailure::new("RuntimeError", "No active exception to reraise"),
            });
        };
        Ok(match self.eval(exception)? {
            Value::Exception(failure) => Rc::unwrap_or_clone(failure),
            Value::ExceptionType(kind) => ExecutionFailure::new(kind.to_string(), ""),
            _ => ExecutionFailure::type_error("exceptions must derive from BaseException"),
        })
    }

    // ------------------------------------------------------------------
    // Functions
    // ------------------------------------------------------------------

    fn make_function(&mut self, def: &Rc<FunctionDef>) -> Result<Value> {
        let mut defaults = Vec::with_capacity(def.params.len());
        for param in &def.params {
            let default = match &param.default {
                Some(expr) => Some(self.eval(expr)?),
                None => None,
            };
            defaults.push(default);
        }
        let enclosing = match self.frames.last() {
            Some(frame) => {
                let mut scopes = frame.enclosing.clone();
                scopes.push(frame.locals.clone());
                scopes
            }
            None => Vec::new(),
        };
        Ok(Value::Function(Rc::new(Function {
            def: def.clone(),
            defaults,
            enclosing,
        })))
    }

    /// Call any callable value.
    pub(crate) fn call_value(
        &mut self,
        callee: &Value,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value> {
        self.check_abort()?;
        match callee {
            Value::Function(function) => self.call_function(function, args, kwargs),
            Value::Builtin(builtin) => builtins::call(self, *builtin, args, kwargs),
            Value::Method(method) => methods::call(self, method, args, kwargs),
            Value::ExceptionType(kind) => {
                builtins::reject_kwargs(kind, &kwargs)?;
                let message = match args.as_slice() {
                    [] => String::new(),
                    [single] => single.to_str(),
                    many => Value::tuple(many.to_vec()).repr(),
                };
                Ok(Value::Exception(Rc::new(ExecutionFailure::new(
                    kind.to_string(),
                    message,
                ))))
            }
            other => Err(ExecutionFailure::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_function(
        &mut self,
        function: &Function,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value> {
        if self.frames.len() >= self.max_call_depth {
            return Err(ExecutionFailure::recursion("maximum recursion depth exceeded"));
        }
        let locals = bind_arguments(function, args, kwargs)?;
        self.frames.push(Frame {
            locals: Rc::new(RefCell::new(locals)),
            enclosing: function.enclosing.clone(),
            globals: function.def.scope.globals.clone(),
            def: function.def.clone(),
        });
        let call_line = self.line;
        let result = match &function.def.body {
            FunctionBody::Block(body) => self.exec_block(body).map(|flow| match flow {
                Flow::Return(value) => value,
                _ => Value::None,
            }),
            FunctionBody::Expr(expr) => self.eval(expr),
        };
        self.frames.pop();
        // Failures keep the line they were raised on.
        if result.is_ok() {
            self.line = call_line;
        }
        result
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn eval(&mut self, expr: &Expr) -> Result<Value> {
        self.descend()?;
        let value = self.eval_expr(expr);
        self.depth -= 1;
        value
    }

    fn eval_expr(&mut self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Literal(literal) => Ok(match literal {
                Literal::None => Value::None,
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Int(i) => Value::Int(*i),
                Literal::Float(f) => Value::Float(*f),
                Literal::Str(s) => Value::Str(s.clone()),
            }),
            Expr::Name(name) => self.load(name),
            Expr::FString(parts) => self.eval_fstring(parts),
            Expr::List(items) => Ok(Value::list(self.eval_all(items)?)),
            Expr::Tuple(items) => Ok(Value::tuple(self.eval_all(items)?)),
            Expr::Dict(pairs) => {
                let mut dict = Dict::new();
                for (key, value) in pairs {
                    let key = self.eval(key)?;
                    let value = self.eval(value)?;
                    dict.insert(key, value)?;
                }
                Ok(Value::dict(dict))
            }
            Expr::Unary(op, operand) => {
                let operand = self.eval(operand)?;
                ops::unary(*op, &operand)
            }
            Expr::Binary(left, op, right) => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                ops::binary(*op, &left, &right)
            }
            Expr::Compare(first, rest) => {
                let mut left = self.eval(first)?;
                for (op, right) in rest {
                    let right = self.eval(right)?;
                    if !ops::compare(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::And(left, right) => {
                let left = self.eval(left)?;
                if left.truthy() {
                    self.eval(right)
                } else {
                    Ok(left)
                }
            }
            Expr::Or(left, right) => {
                let left = self.eval(left)?;
                if left.truthy() {
                    Ok(left)
                } else {
                    self.eval(right)
                }
            }
            Expr::IfElse {
                condition,
                then,
                otherwise,
            } => {
                if self.eval(condition)?.truthy() {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            Expr::Call { func, args, kwargs } => {
                let callee = self.eval(func)?;
                let args = self.eval_all(args)?;
                let mut keywords = Vec::with_capacity(kwargs.len());
                for (name, value) in kwargs {
                    keywords.push((name.clone(), self.eval(value)?));
                }
                self.call_value(&callee, args, keywords)
            }
            Expr::Attribute(object, name) => {
                let object = self.eval(object)?;
                attribute(&object, name)
            }
            Expr::Subscript(container, index) => {
                let container = self.eval(container)?;
                let index = self.eval_index(index)?;
                ops::get_index(&container, &index)
            }
            Expr::Slice { .. } => Err(ExecutionFailure::new("SyntaxError", "invalid syntax")),
            Expr::Lambda(def) => self.make_function(def),
            Expr::ListComp { element, clauses } => {
                let mut items = Vec::new();
                self.comprehension(element, clauses, &mut items)?;
                Ok(Value::list(items))
            }
        }
    }

    fn eval_all(&mut self, exprs: &[Expr]) -> Result<Vec<Value>> {
        exprs.iter().map(|expr| self.eval(expr)).collect()
    }

    fn eval_optional(&mut self, expr: &Option<Box<Expr>>) -> Result<Option<Value>> {
        expr.as_deref().map(|expr| self.eval(expr)).transpose()
    }

    fn eval_index(&mut self, index: &Expr) -> Result<Index> {
        match index {
            Expr::Slice { lower, upper, step } => Ok(Index::Slice {
                lower: self.eval_optional(lower)?,
                upper: self.eval_optional(upper)?,
                step: self.eval_optional(step)?,
            }),
            item => Ok(Index::Item(self.eval(item)?)),
        }
    }

    fn eval_fstring(&mut self, parts: &[FPart]) -> Result<Value> {
        let mut text = String::new();
        for part in parts {
            match part {
                FPart::Text(literal) => text.push_str(literal),
                FPart::Field {
                    expr,
                    conversion,
                    spec,
                } => {
                    let value = self.eval(expr)?;
                    let value = match conversion {
                        Some('s') => Value::str(value.to_str()),
                        Some(_) => Value::str(value.repr()),
                        None => value,
                    };
                    text.push_str(&format_value(&value, spec)?);
                }
            }
        }
        Ok(Value::str(text))
    }

    /// Expand comprehension clauses left to right, pushing each element.
    ///
    /// Loop variables bind in the current scope.
    fn comprehension(
        &mut self,
        element: &Expr,
        clauses: &[Comprehension],
        items: &mut Vec<Value>,
    ) -> Result<()> {
        match clauses.split_first() {
            None => items.push(self.eval(element)?),
            Some((Comprehension::If(condition), rest)) => {
                if self.eval(condition)?.truthy() {
                    self.comprehension(element, rest, items)?;
                }
            }
            Some((Comprehension::For(target, iter), rest)) => {
                let values = self.eval(iter)?.iter()?;
                for value in values {
                    self.check_abort()?;
                    self.assign(target, value)?;
                    self.comprehension(element, rest, items)?;
                }
            }
        }
        Ok(())
    }
}

/// Bind call arguments to parameters, filling defaults.
fn bind_arguments(
    function: &Function,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> Result<FxHashMap<String, Value>> {
    let name = &function.def.name;
    let params = &function.def.params;

    if args.len() > params.len() {
        let required = function.defaults.iter().filter(|d| d.is_none()).count();
        let accepted = if required == params.len() {
            params.len().to_string()
        } else {
            format!("from {} to {}", required, params.len())
        };
        return Err(ExecutionFailure::type_error(format!(
            "{}() takes {} positional argument{} but {} {} given",
            name,
            accepted,
            plural(params.len()),
            args.len(),
            if args.len() == 1 { "was" } else { "were" }
        )));
    }

    let mut slots: Vec<Option<Value>> = vec![None; params.len()];
    for (slot, arg) in slots.iter_mut().zip(args) {
        *slot = Some(arg);
    }
    for (key, value) in kwargs {
        let Some(position) = params.iter().position(|param| param.name == key) else {
            return Err(ExecutionFailure::type_error(format!(
                "{}() got an unexpected keyword argument '{}'",
                name, key
            )));
        };
        if slots[position].is_some() {
            return Err(ExecutionFailure::type_error(format!(
                "{}() got multiple values for argument '{}'",
                name, key
            )));
        }
        slots[position] = Some(value);
    }

    let mut locals = FxHashMap::default();
    let mut missing = Vec::new();
    for ((param, slot), default) in params.iter().zip(slots).zip(&function.defaults) {
        match slot.or_else(|| default.clone()) {
            Some(value) => {
                locals.insert(param.name.clone(), value);
            }
            None => missing.push(format!("'{}'", param.name)),
        }
    }
    if !missing.is_empty() {
        return Err(ExecutionFailure::type_error(format!(
            "{}() missing {} required positional argument{}: {}",
            name,
            missing.len(),
            plural(missing.len()),
            join_names(&missing)
        )));
    }
    Ok(locals)
}

fn plural(count: usize) -> &'static str {
    if count == 1 { "" } else { "s" }
}

/// `'a'`, `'a' and 'b'`, `'a', 'b', and 'c'`.
fn join_names(names: &[String]) -> String {
    match names {
        [] => String::new(),
        [only] => only.clone(),
        [first, second] => format!("{} and {}", first, second),
        [init @ .., last] => format!("{}, and {}", init.join(", "), last),
    }
}

fn exception_matches(failure: &ExecutionFailure, kinds: &Value) -> Result<bool> {
    match kinds {
        Value::ExceptionType(kind) => Ok(failure.is_instance_of(kind)),
        Value::Tuple(items) => {
            for item in items.iter() {
                if exception_matches(failure, item)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        _ => Err(ExecutionFailure::type_error(
            "catching classes that do not inherit from BaseException is not allowed",
        )),
    }
}

fn attribute(object: &Value, name: &str) -> Result<Value> {
    match object {
        Value::Module(module) => module.members.get(name).cloned().ok_or_else(|| {
            ExecutionFailure::attribute_error(format!(
                "module '{}' has no attribute '{}'",
                module.name, name
            ))
        }),
        Value::Exception(failure) if name == "args" => {
            let args = if failure.message().is_empty() {
                Vec::new()
            } else {
                vec![Value::str(failure.message())]
            };
            Ok(Value::tuple(args))
        }
        _ => methods::lookup(object, name).ok_or_else(|| {
            ExecutionFailure::attribute_error(format!(
                "'{}' object has no attribute '{}'",
                object.type_name(),
                name
            ))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execute::CaptureBuffer;

    fn run_in(namespace: &mut Namespace, source: &str) -> Result<String> {
        let buffer = CaptureBuffer::new();
        let mut output = OutputChannel::new(buffer.clone());
        Interpreter::new(AbortHandle::new()).run(source, namespace, &mut output)?;
        Ok(buffer.text())
    }

    fn output(source: &str) -> String {
        run_in(&mut Namespace::new(), source).unwrap()
    }

    fn failure(source: &str) -> String {
        run_in(&mut Namespace::new(), source).unwrap_err().to_string()
    }

    #[test]
    fn test_print_and_arithmetic() {
        assert_eq!(output("print(1 + 2 * 3)"), "7\n");
        assert_eq!(output("print(7 / 2, 7 // 2, -7 % 3, 2 ** 10)"), "3.5 3 2 1024\n");
        assert_eq!(output("print('a', 'b', sep='-', end='!')"), "a-b!");
        assert_eq!(output("x = 1"), "");
    }

    #[test]
    fn test_namespace_persists_between_runs() {
        let mut namespace = Namespace::new();
        assert_eq!(run_in(&mut namespace, "x = 41").unwrap(), "");
        assert_eq!(run_in(&mut namespace, "print(x + 1)").unwrap(), "42\n");
    }

    #[test]
    fn test_syntax_error_leaves_namespace_untouched() {
        let mut namespace = Namespace::new();
        run_in(&mut namespace, "x = 1").unwrap();
        let err = run_in(&mut namespace, "x = 2\ndef (").unwrap_err();
        assert_eq!(err.kind(), "SyntaxError");
        assert_eq!(namespace.get("x").and_then(Value::as_int), Some(1));
    }

    #[test]
    fn test_runtime_failure_keeps_earlier_bindings() {
        let mut namespace = Namespace::new();
        let err = run_in(&mut namespace, "a = 1\nb = a / 0\nc = 3").unwrap_err();
        assert_eq!(err.to_string(), "ZeroDivisionError: division by zero");
        assert!(namespace.contains("a"));
        assert!(!namespace.contains("b"));
        assert!(!namespace.contains("c"));
    }

    #[test]
    fn test_undefined_name() {
        assert_eq!(failure("print(y)"), "NameError: name 'y' is not defined");
    }

    #[test]
    fn test_control_flow() {
        let source = "\
total = 0
for i in range(10):
    if i % 2 == 0:
        continue
    if i > 7:
        break
    total += i
n = 0
while True:
    n += 1
    if n == 3:
        break
print(total, n)
";
        assert_eq!(output(source), "16 3\n");
    }

    #[test]
    fn test_functions_defaults_and_keywords() {
        let source = "\
def greet(name, greeting='Hello', punct='!'):
    return f'{greeting}, {name}{punct}'
print(greet('Ada'))
print(greet('Bob', punct='?'))
";
        assert_eq!(output(source), "Hello, Ada!\nHello, Bob?\n");
        assert_eq!(
            failure("def f(a, b):\n    pass\nf(1)"),
            "TypeError: f() missing 1 required positional argument: 'b'"
        );
        assert_eq!(
            failure("def f(a):\n    pass\nf(1, 2)"),
            "TypeError: f() takes 1 positional argument but 2 were given"
        );
        assert_eq!(
            failure("def f(a, b, c):\n    pass\nf()"),
            "TypeError: f() missing 3 required positional arguments: 'a', 'b', and 'c'"
        );
        assert_eq!(
            failure("def f(a):\n    pass\nf(1, a=2)"),
            "TypeError: f() got multiple values for argument 'a'"
        );
    }

    #[test]
    fn test_closures_see_enclosing_scope() {
        let source = "\
def make_counter():
    count = [0]
    def increment():
        count[0] += 1
        return count[0]
    return increment
counter = make_counter()
counter()
print(counter())
def outer():
    x = 1
    def inner():
        return x
    x = 2
    return inner()
print(outer())
";
        assert_eq!(output(source), "2\n2\n");
    }

    #[test]
    fn test_global_declaration() {
        let source = "\
count = 0
def bump():
    global count
    count += 1
def shadow():
    count = 100
bump()
bump()
shadow()
print(count)
";
        assert_eq!(output(source), "2\n");
    }

    #[test]
    fn test_try_except_else_finally() {
        let source = "\
def attempt(x):
    try:
        result = 10 // x
    except ZeroDivisionError as e:
        print('caught', e)
        return -1
    else:
        print('fine')
        return result
    finally:
        print('cleanup')
print(attempt(2))
print(attempt(0))
";
        assert_eq!(
            output(source),
            "fine\ncleanup\n5\ncaught integer division or modulo by zero\ncleanup\n-1\n"
        );
    }

    #[test]
    fn test_exception_hierarchy_and_reraise() {
        assert_eq!(
            output("try:\n    {}['k']\nexcept LookupError:\n    print('lookup')"),
            "lookup\n"
        );
        assert_eq!(
            output("try:\n    int('x')\nexcept (TypeError, ValueError) as err:\n    print(err.args)"),
            "(\"invalid literal for int() with base 10: 'x'\",)\n"
        );
        assert_eq!(
            failure("try:\n    raise ValueError('bad')\nexcept ValueError:\n    raise"),
            "ValueError: bad"
        );
        assert_eq!(
            failure("raise"),
            "RuntimeError: No active exception to reraise"
        );
        assert_eq!(
            failure("assert 1 == 2, 'math is broken'"),
            "AssertionError: math is broken"
        );
    }

    #[test]
    fn test_except_binding_is_cleared() {
        assert_eq!(
            failure("try:\n    1/0\nexcept Exception as e:\n    pass\nprint(e)"),
            "NameError: name 'e' is not defined"
        );
    }

    #[test]
    fn test_unpacking_and_subscripts() {
        let source = "\
a, (b, c) = 1, [2, 3]
data = {'k': [1, 2, 3]}
data['k'][0] = 10
data['k'] += [4]
nums = list(range(10))
nums[2:5] = []
del nums[0]
print(a, b, c, data, nums[::2], nums[-1])
";
        assert_eq!(
            output(source),
            "1 2 3 {'k': [10, 2, 3, 4]} [1, 6, 8] 9\n"
        );
        assert_eq!(
            failure("a, b = [1, 2, 3]"),
            "ValueError: too many values to unpack (expected 2)"
        );
        assert_eq!(
            failure("a, b = 1"),
            "TypeError: cannot unpack non-iterable int object"
        );
    }

    #[test]
    fn test_comprehensions_and_lambdas() {
        let source = "\
squares = [x * x for x in range(6) if x % 2 == 0]
pairs = [(i, j) for i in range(3) for j in range(i)]
by_len = sorted(['ccc', 'a', 'bb'], key=lambda s: len(s))
print(squares, pairs, by_len)
";
        assert_eq!(
            output(source),
            "[0, 4, 16] [(1, 0), (2, 0), (2, 1)] ['a', 'bb', 'ccc']\n"
        );
    }

    #[test]
    fn test_imports() {
        let source = "\
import math
from json import dumps as to_json
print(math.sqrt(16), to_json({'a': [1, None]}))
";
        assert_eq!(output(source), "4.0 {\"a\": [1, null]}\n");
        assert_eq!(failure("import numpy"), "ImportError: No module named 'numpy'");
        assert_eq!(
            failure("import math\nmath.nothing"),
            "AttributeError: module 'math' has no attribute 'nothing'"
        );
    }

    #[test]
    fn test_short_circuit_returns_operand() {
        assert_eq!(output("print(0 or 'x', [] and 1, 1 < 2 < 3, 1 < 3 < 2)"), "x [] True False\n");
    }

    #[test]
    fn test_not_callable() {
        assert_eq!(failure("x = 3\nx()"), "TypeError: 'int' object is not callable");
    }

    #[test]
    fn test_recursion_limit() {
        let source = "\
def fact(n):
    return 1 if n <= 1 else n * fact(n - 1)
print(fact(20))
";
        assert_eq!(output(source), "2432902008176640000\n");
        assert_eq!(
            failure("def f(n):\n    return f(n + 1)\nf(0)"),
            "RecursionError: maximum recursion depth exceeded"
        );
    }

    #[test]
    fn test_evaluation_depth_is_bounded_regardless_of_call_limit() {
        let mut namespace = Namespace::new();
        let mut output = OutputChannel::new(CaptureBuffer::new());
        let mut interpreter =
            Interpreter::new(AbortHandle::new()).with_max_call_depth(usize::MAX);
        let source = "\
def down(n):
    if n > 0:
        while True:
            return [down(n - 1)][0]
    return 0
down(1000000)
";
        let err = interpreter
            .run(source, &mut namespace, &mut output)
            .unwrap_err();
        assert_eq!(err.to_string(), "RecursionError: maximum recursion depth exceeded");

        interpreter
            .run("print(down(50))", &mut namespace, &mut output)
            .unwrap();
    }

    #[test]
    fn test_long_operator_chain_is_rejected() {
        let mut namespace = Namespace::new();
        let source = format!("x = 1{}", " + 1".repeat(200_000));
        let err = run_in(&mut namespace, &source).unwrap_err();
        assert_eq!(
            err.to_string(),
            "RecursionError: maximum recursion depth exceeded during compilation"
        );
        assert_eq!(
            run_in(&mut namespace, &format!("x = 1{}\nprint(x)", " + 1".repeat(900))).unwrap(),
            "901\n"
        );
    }

    #[test]
    fn test_local_read_before_assignment() {
        let source = "\
x = 5
def g():
    print(x)
    x = 1
g()
";
        assert_eq!(
            failure(source),
            "UnboundLocalError: cannot access local variable 'x' where it is not associated with a value"
        );

        let source = "\
x = 5
def g():
    try:
        x += 1
    except NameError:
        print('caught')
    def h():
        global x
        x = x + 1
    h()
    return [x for x in range(2)]
print(g(), x)
def reads_global():
    return x * 2
print(reads_global())
";
        assert_eq!(output(source), "caught\n[0, 1] 6\n12\n");
    }

    #[test]
    fn test_custom_call_depth() {
        let mut namespace = Namespace::new();
        let buffer = CaptureBuffer::new();
        let mut output = OutputChannel::new(buffer);
        let err = Interpreter::new(AbortHandle::new())
            .with_max_call_depth(3)
            .run(
                "def f(n):\n    return 0 if n == 0 else f(n - 1)\nf(5)",
                &mut namespace,
                &mut output,
            )
            .unwrap_err();
        assert_eq!(err.kind(), "RecursionError");
    }

    #[test]
    fn test_abort_interrupts_loop() {
        let abort = AbortHandle::new();
        abort.abort();
        let mut interpreter = Interpreter::new(abort);
        let mut output = OutputChannel::new(CaptureBuffer::new());
        let err = interpreter
            .run("while True:\n    pass", &mut Namespace::new(), &mut output)
            .unwrap_err();
        assert_eq!(err.to_string(), "KeyboardInterrupt: execution interrupted");

        let err = interpreter
            .run(
                "try:\n    while True:\n        pass\nexcept Exception:\n    pass",
                &mut Namespace::new(),
                &mut output,
            )
            .unwrap_err();
        assert_eq!(err.kind(), "KeyboardInterrupt");
    }
}

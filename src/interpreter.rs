use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use log::{debug, info, warn};

use crate::environment::{Environments, FrameId};
use crate::error::RuntimeError;
use crate::expr::{Expr, ExprId, LiteralValue};
use crate::native;
use crate::resolver::Locals;
use crate::stack::ensure_sufficient_stack;
use crate::stmt::{FunctionDecl, Stmt};
use crate::token::{Token, TokenType};
use crate::value::{Callable, LoxFunction, Value};

/// Nested calls allowed before the run is aborted.
const MAX_CALL_DEPTH: usize = 256;

/// Why statement execution stopped early.
#[derive(Debug)]
pub enum Unwind {
    /// A `return` travelling to its call boundary. Never a diagnostic.
    Return(Value),

    /// A runtime fault; ends the run.
    Error(RuntimeError),
}

impl From<RuntimeError> for Unwind {
    fn from(e: RuntimeError) -> Self {
        Unwind::Error(e)
    }
}

/// Convenient alias for statement execution.
pub type ExecResult = Result<(), Unwind>;

pub struct Interpreter {
    environments: Environments,
    globals: FrameId,
    environment: FrameId,
    locals: Locals,
    out: Rc<RefCell<dyn Write>>,
    depth: usize,
}

impl Interpreter {
    /// Creates a new interpreter writing `print` output to `out`, with the
    /// native functions already defined as globals.
    pub fn new(out: Rc<RefCell<dyn Write>>) -> Self {
        info!("Initializing Interpreter");

        let mut environments = Environments::new();
        let globals = environments.globals();

        for native in native::builtins() {
            debug!("Defining native function '{}'", native.name);
            let name = native.name;
            environments.define(globals, name, Value::Callable(Rc::new(native)));
        }

        Self {
            environments,
            globals,
            environment: globals,
            locals: Locals::default(),
            out,
            depth: 0,
        }
    }

    /// Add scope distances from a resolver pass.
    pub fn resolve(&mut self, locals: Locals) {
        debug!("Recording {} resolved local(s)", locals.len());
        self.locals.extend(locals);
    }

    /// Runs a program. Output produced before a failure stays written.
    pub fn interpret(&mut self, statements: &[Stmt]) -> Result<(), RuntimeError> {
        debug!("Interpreting {} statements", statements.len());

        for stmt in statements {
            match self.execute(stmt) {
                Ok(()) => {}
                Err(Unwind::Error(e)) => {
                    debug!("Runtime error: {}", e);
                    return Err(e);
                }
                Err(Unwind::Return(value)) => {
                    // The resolver rejects top-level `return`.
                    warn!("Return of {} escaped to top level", value);
                    return Ok(());
                }
            }
        }

        info!(
            "Interpretation completed successfully, {} frame(s) live",
            self.environments.live()
        );
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Statements
    // ─────────────────────────────────────────────────────────────────────────

    fn execute(&mut self, stmt: &Stmt) -> ExecResult {
        ensure_sufficient_stack(|| self.execute_stmt(stmt))
    }

    fn execute_stmt(&mut self, stmt: &Stmt) -> ExecResult {
        match stmt {
            Stmt::Expression(expr) => {
                self.evaluate(expr)?;
            }

            Stmt::Print { keyword, value } => {
                let value = self.evaluate(value)?;
                if let Err(e) = writeln!(self.out.borrow_mut(), "{}", value) {
                    warn!("Failed to write output: {}", e);
                    return Err(RuntimeError::new(
                        keyword,
                        format!("Failed to write output: {}.", e),
                    )
                    .into());
                }
            }

            Stmt::Var { name, initializer } => {
                let value = match initializer {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::Nil,
                };
                debug!("Defining variable '{}' = {}", name.lexeme, value);
                self.environments
                    .define(self.environment, &name.lexeme, value);
            }

            Stmt::Block(statements) => {
                let frame = self.environments.push(self.environment);
                self.execute_block(statements, frame)?;
            }

            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.evaluate(condition)?.is_truthy() {
                    self.execute(then_branch)?;
                } else if let Some(else_stmt) = else_branch {
                    self.execute(else_stmt)?;
                }
            }

            Stmt::While { condition, body } => {
                while self.evaluate(condition)?.is_truthy() {
                    self.execute(body)?;
                }
            }

            Stmt::Function(decl) => {
                debug!("Defining function '{}'", decl.name.lexeme);
                let pin = self.environments.capture(self.environment);
                let function = LoxFunction {
                    declaration: Rc::clone(decl),
                    closure: self.environment,
                    pin,
                };
                self.environments.define(
                    self.environment,
                    &decl.name.lexeme,
                    Value::Callable(Rc::new(function)),
                );
            }

            Stmt::Return { value, .. } => {
                let value = match value {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::Nil,
                };
                return Err(Unwind::Return(value));
            }
        }

        Ok(())
    }

    /// Run `statements` with `frame` as the current environment. The previous
    /// environment is restored however execution ends, and `frame` goes back
    /// to the arena.
    pub fn execute_block(&mut self, statements: &[Stmt], frame: FrameId) -> ExecResult {
        let previous = self.environment;
        self.environment = frame;

        let result = statements.iter().try_for_each(|stmt| self.execute(stmt));

        self.environment = previous;
        self.environments.release(frame);
        result
    }

    /// Invoke a user function: fresh frame under its closure, parameters
    /// bound positionally, body run as a block.
    pub fn call_function(
        &mut self,
        declaration: &FunctionDecl,
        closure: FrameId,
        arguments: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        let frame = self.environments.push(closure);

        for (param, value) in declaration.params.iter().zip(arguments) {
            self.environments.define(frame, &param.lexeme, value);
        }

        match self.execute_block(&declaration.body, frame) {
            Ok(()) => Ok(Value::Nil),
            Err(Unwind::Return(value)) => Ok(value),
            Err(Unwind::Error(e)) => Err(e),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Expressions
    // ─────────────────────────────────────────────────────────────────────────

    pub fn evaluate(&mut self, expr: &Expr) -> Result<Value, RuntimeError> {
        ensure_sufficient_stack(|| self.evaluate_expr(expr))
    }

    fn evaluate_expr(&mut self, expr: &Expr) -> Result<Value, RuntimeError> {
        match expr {
            Expr::Literal(literal) => Ok(match literal {
                LiteralValue::Number(n) => Value::Number(*n),
                LiteralValue::Str(s) => Value::String(s.clone()),
                LiteralValue::Bool(b) => Value::Bool(*b),
                LiteralValue::Nil => Value::Nil,
            }),

            Expr::Grouping(inner) => self.evaluate(inner),

            Expr::Unary { operator, right } => {
                let right = self.evaluate(right)?;
                match operator.token_type {
                    TokenType::BANG => Ok(Value::Bool(!right.is_truthy())),
                    _ => Ok(Value::Number(-number_operand(operator, &right)?)),
                }
            }

            Expr::Logical {
                left,
                operator,
                right,
            } => {
                let left = self.evaluate(left)?;
                let short_circuit = if operator.token_type == TokenType::OR {
                    left.is_truthy()
                } else {
                    !left.is_truthy()
                };

                if short_circuit {
                    Ok(left)
                } else {
                    self.evaluate(right)
                }
            }

            Expr::Binary {
                left,
                operator,
                right,
            } => {
                let left = self.evaluate(left)?;
                let right = self.evaluate(right)?;
                binary(operator, left, right)
            }

            Expr::Variable { id, name } => self.look_up_variable(*id, name),

            Expr::Assign { id, name, value } => {
                let value = self.evaluate(value)?;
                match self.locals.get(*id) {
                    Some(distance) => self.environments.assign_at(
                        self.environment,
                        distance,
                        name,
                        value.clone(),
                    )?,
                    None => self
                        .environments
                        .assign(self.globals, name, value.clone())?,
                }
                Ok(value)
            }

            Expr::Call {
                callee,
                paren,
                arguments,
            } => {
                let callee = self.evaluate(callee)?;
                let Some(function) = callee.as_callable().cloned() else {
                    return Err(RuntimeError::new(
                        paren,
                        "Can only call functions and classes.",
                    ));
                };

                let mut args = Vec::with_capacity(arguments.len());
                for arg in arguments {
                    args.push(self.evaluate(arg)?);
                }

                if args.len() != function.arity() {
                    return Err(RuntimeError::new(
                        paren,
                        format!(
                            "Expected {} arguments but got {}.",
                            function.arity(),
                            args.len()
                        ),
                    ));
                }

                self.invoke(function.as_ref(), paren, args)
            }
        }
    }

    fn invoke(
        &mut self,
        function: &dyn Callable,
        paren: &Token,
        args: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(RuntimeError::new(paren, "Stack overflow."));
        }

        debug!("Calling {}", function);

        self.depth += 1;
        let result = function.call(self, paren, args);
        self.depth -= 1;
        result
    }

    fn look_up_variable(&self, id: ExprId, name: &Token) -> Result<Value, RuntimeError> {
        match self.locals.get(id) {
            Some(distance) => self.environments.get_at(self.environment, distance, name),
            None => self.environments.get(self.globals, name),
        }
    }
}

fn number_operand(operator: &Token, operand: &Value) -> Result<f64, RuntimeError> {
    match operand {
        Value::Number(n) => Ok(*n),
        _ => Err(RuntimeError::new(operator, "Operand must be a number.")),
    }
}

fn number_operands(
    operator: &Token,
    left: &Value,
    right: &Value,
) -> Result<(f64, f64), RuntimeError> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => Ok((*a, *b)),
        _ => Err(RuntimeError::new(operator, "Operands must be numbers.")),
    }
}

fn binary(operator: &Token, left: Value, right: Value) -> Result<Value, RuntimeError> {
    let value = match operator.token_type {
        TokenType::EQUAL_EQUAL => Value::Bool(left == right),
        TokenType::BANG_EQUAL => Value::Bool(left != right),

        TokenType::PLUS => match (left, right) {
            (Value::Number(a), Value::Number(b)) if a.is_finite() && b.is_finite() => {
                Value::Number(a + b)
            }
            (Value::String(a), Value::String(b)) => Value::String(a + &b),
            _ => {
                return Err(RuntimeError::new(
                    operator,
                    "Operands must be two numbers or two strings.",
                ))
            }
        },

        _ => {
            let (a, b) = number_operands(operator, &left, &right)?;
            match operator.token_type {
                TokenType::MINUS => Value::Number(a - b),
                TokenType::STAR => Value::Number(a * b),
                // IEEE semantics: x / 0 is ±Infinity or NaN, not an error.
                TokenType::SLASH => Value::Number(a / b),
                TokenType::GREATER => Value::Bool(a > b),
                TokenType::GREATER_EQUAL => Value::Bool(a >= b),
                TokenType::LESS => Value::Bool(a < b),
                TokenType::LESS_EQUAL => Value::Bool(a <= b),
                _ => return Err(RuntimeError::new(operator, "Invalid binary operator.")),
            }
        }
    };

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;
    use crate::resolver::Resolver;
    use crate::scanner::scan_tokens;

    fn run(interpreter: &mut Interpreter, source: &str) -> Result<(), RuntimeError> {
        let (tokens, _) = scan_tokens(source);
        let statements = Parser::new(tokens).parse();
        let mut resolver = Resolver::new();
        resolver.resolve(&statements);
        let (locals, errors) = resolver.finish();
        assert!(errors.is_empty());

        interpreter.resolve(locals);
        interpreter.interpret(&statements)
    }

    fn sink() -> (Rc<RefCell<Vec<u8>>>, Interpreter) {
        let out = Rc::new(RefCell::new(Vec::new()));
        let interpreter = Interpreter::new(out.clone());
        (out, interpreter)
    }

    #[test]
    fn frames_of_dead_closures_are_reclaimed() {
        let (_, mut interpreter) = sink();
        let source = "fun make() { fun inner() {} return inner; }\n\
                      for (var i = 0; i < 10000; i = i + 1) { make(); }";

        assert_eq!(run(&mut interpreter, source), Ok(()));
        assert!(
            interpreter.environments.live() < 1000,
            "{} frames live",
            interpreter.environments.live()
        );
    }

    #[test]
    fn frames_of_live_closures_survive_collection() {
        let (out, mut interpreter) = sink();
        let source = "fun counter() { var n = 0; fun next() { n = n + 1; return n; } return next; }\n\
                      var c = counter();\n\
                      fun churn() { fun dead() {} return dead; }\n\
                      for (var i = 0; i < 2000; i = i + 1) { churn(); }\n\
                      c(); print c();";

        assert_eq!(run(&mut interpreter, source), Ok(()));
        assert_eq!(String::from_utf8_lossy(&out.borrow()), "2\n");
    }
}

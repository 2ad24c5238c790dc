//! Per‑run context threading the pipeline stages together.
//!
//! A [`Session`] owns one interpreter (so globals survive across prompt
//! lines), the diagnostic sink, and the static/runtime error flags the driver
//! uses to pick an exit code.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use log::{info, warn};

use crate::error::LoxError;
use crate::interpreter::Interpreter;
use crate::parser::Parser;
use crate::resolver::Resolver;
use crate::scanner::scan_tokens;

/// How a single [`Session::run`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Ok,

    /// Lexical, syntax or resolution errors; nothing was executed.
    StaticError,

    /// Execution started and stopped at a runtime error.
    RuntimeError,
}

pub struct Session {
    interpreter: Interpreter,
    diagnostics: Rc<RefCell<dyn Write>>,
    next_id: u32,
    had_error: bool,
    had_runtime_error: bool,
}

impl Session {
    pub fn new(out: Rc<RefCell<dyn Write>>, diagnostics: Rc<RefCell<dyn Write>>) -> Self {
        Self {
            interpreter: Interpreter::new(out),
            diagnostics,
            next_id: 0,
            had_error: false,
            had_runtime_error: false,
        }
    }

    pub fn had_error(&self) -> bool {
        self.had_error
    }

    pub fn had_runtime_error(&self) -> bool {
        self.had_runtime_error
    }

    /// Forget earlier static errors, e.g. between prompt lines.
    pub fn reset_error(&mut self) {
        self.had_error = false;
    }

    /// Scan, parse, resolve and, when all three were clean, execute `source`.
    pub fn run(&mut self, source: &str) -> RunStatus {
        let (tokens, lex_errors) = scan_tokens(source);
        self.report_all(&lex_errors);

        let mut parser = Parser::starting_at(tokens, self.next_id);
        let statements = parser.parse();
        self.next_id = parser.next_id();
        self.report_all(parser.errors());

        if self.had_error {
            info!("Static errors present; skipping resolution and execution");
            return RunStatus::StaticError;
        }

        let mut resolver = Resolver::new();
        resolver.resolve(&statements);
        let (locals, resolve_errors) = resolver.finish();
        self.report_all(&resolve_errors);

        if self.had_error {
            info!("Resolution errors present; skipping execution");
            return RunStatus::StaticError;
        }

        self.interpreter.resolve(locals);

        match self.interpreter.interpret(&statements) {
            Ok(()) => RunStatus::Ok,
            Err(e) => {
                self.had_runtime_error = true;
                self.emit(&e);
                RunStatus::RuntimeError
            }
        }
    }

    fn report_all(&mut self, errors: &[LoxError]) {
        for error in errors {
            self.had_error = true;
            self.emit(error);
        }
    }

    fn emit(&self, diagnostic: &dyn std::fmt::Display) {
        if let Err(e) = writeln!(self.diagnostics.borrow_mut(), "{}", diagnostic) {
            warn!("Failed to write diagnostic: {}", e);
        }
    }
}
